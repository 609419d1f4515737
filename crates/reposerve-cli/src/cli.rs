use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "reposerve",
    about = "Serve a storage location as a REST backup repository",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the repository server
    Serve(ServeArgs),
    /// Show the storage key a protocol path maps to
    Resolve(ResolveArgs),
    /// List the object classes and how each is handled
    Classes,
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Address to listen on
    #[arg(long)]
    pub addr: Option<SocketAddr>,
    /// URL prefix to mount repositories under
    #[arg(long)]
    pub mount: Option<String>,
    /// Directory to store repositories in
    #[arg(long, conflicts_with = "memory")]
    pub root: Option<PathBuf>,
    /// Keep repositories in memory (lost on exit)
    #[arg(long)]
    pub memory: bool,
    /// Refuse deletes of anything but locks
    #[arg(long)]
    pub append_only: bool,
    /// Largest accepted object, in bytes
    #[arg(long)]
    pub max_object_size: Option<usize>,
}

#[derive(Args)]
pub struct ResolveArgs {
    #[arg(long, default_value = "/")]
    pub mount: String,
    #[arg(required = true)]
    pub paths: Vec<String>,
}
