use anyhow::Context;
use colored::Colorize;
use tokio::net::TcpListener;

use reposerve_server::{PathResolver, RepoServer, ServerConfig, StorageConfig};
use reposerve_types::ObjectClass;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Resolve(args) => cmd_resolve(args),
        Command::Classes => cmd_classes(),
    }
}

/// Merge the optional config file with command-line overrides.
fn build_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(addr) = args.addr {
        config.bind_addr = addr;
    }
    if let Some(mount) = &args.mount {
        config.mount_path = mount.clone();
    }
    if args.memory {
        config.storage = StorageConfig::Memory;
    } else if let Some(root) = &args.root {
        config.storage = StorageConfig::Local { root: root.clone() };
    }
    if args.append_only {
        config.append_only = true;
    }
    if let Some(size) = args.max_object_size {
        config.max_object_size = size;
    }
    config.validate()?;
    Ok(config)
}

/// Where objects will be kept, with local roots made absolute.
fn storage_label(storage: &StorageConfig) -> String {
    match storage {
        StorageConfig::Memory => "memory (lost on exit)".to_string(),
        StorageConfig::Local { root } => std::path::absolute(root)
            .unwrap_or_else(|_| root.clone())
            .display()
            .to_string(),
    }
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let server = RepoServer::from_config(config)?;
    let addr = server.config().bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let storage = storage_label(&server.config().storage);
    println!(
        "{} Serving repositories on http://{}{}",
        "✓".green().bold(),
        listener.local_addr()?.to_string().bold(),
        server.config().mount_path
    );
    println!("  Storage: {}", storage.cyan());
    println!("  Write-once: {}", server.create_guarantee());
    if server.config().append_only {
        println!("  Mode: {}", "append-only".yellow());
    }

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_server.shutdown();
        }
    });

    server.serve(listener).await?;
    Ok(())
}

fn cmd_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let resolver = PathResolver::new(&args.mount);
    for path in &args.paths {
        match resolver.resolve(path) {
            Ok(resolved) => println!("{path} {} {}", "→".dimmed(), resolved.key().yellow()),
            Err(e) => println!("{} {path}: {e}", "✗".red()),
        }
    }
    Ok(())
}

fn cmd_classes() -> anyhow::Result<()> {
    for class in ObjectClass::ALL {
        let traits = class.traits();
        let flag = |set: bool, name: &str| {
            if set {
                name.green().to_string()
            } else {
                name.dimmed().strikethrough().to_string()
            }
        };
        println!(
            "{:<10} {} {} {}",
            class.as_str().bold(),
            flag(traits.shardable, "sharded"),
            flag(traits.singleton, "singleton"),
            flag(traits.immutable, "write-once"),
        );
    }
    Ok(())
}
