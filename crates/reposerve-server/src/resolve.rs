//! Mapping from protocol request paths to storage keys.
//!
//! A request path has the shape `<mount>/<repo>/<class>[/<name>]`, where
//! `<repo>` is zero or more segments naming a repository below the mount
//! point. Resolution is pure: the same path always yields the same
//! [`ResolvedPath`], and nothing here touches storage.
//!
//! | path | key |
//! |---|---|
//! | `/` | `` |
//! | `/data/1` | `data/1` |
//! | `/data/123` | `data/12/123` |
//! | `/keys/123` | `keys/123` |
//! | `/potato/config` | `potato/config` |
//!
//! A final segment that is a class token always names that class, so a
//! repository may be called `locks` or `keys`: `/locks/config` is the config
//! of repository `locks`, not a lock object named `config`. A top-level lock
//! named `config` would share its key `locks/config`. Backup clients only
//! name objects by hex IDs, which are never class tokens, so the two cannot
//! meet in practice.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use reposerve_types::{ObjectClass, ObjectName};

use crate::error::{ServerError, ServerResult};
use crate::state::RepoState;

/// What a request path addresses within its repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The repository root itself.
    Root,
    /// Every object of one class.
    Collection(ObjectClass),
    /// The repository configuration object.
    Config,
    /// A single named object.
    Object(ObjectClass, ObjectName),
}

impl Target {
    pub fn class(&self) -> Option<ObjectClass> {
        match self {
            Self::Root => None,
            Self::Collection(class) | Self::Object(class, _) => Some(*class),
            Self::Config => Some(ObjectClass::Config),
        }
    }

    /// Key of the target relative to its repository.
    fn relative_key(&self) -> String {
        match self {
            Self::Root => String::new(),
            Self::Collection(class) => class.as_str().to_string(),
            Self::Config => ObjectClass::Config.as_str().to_string(),
            Self::Object(class, name) => object_key(*class, name),
        }
    }
}

/// Relative key of a named object: `<class>/<shard>/<name>` when the class
/// shards and the name is longer than its threshold, `<class>/<name>` otherwise.
pub fn object_key(class: ObjectClass, name: &ObjectName) -> String {
    match class.shard_threshold() {
        Some(threshold) if name.len() > threshold => {
            format!("{class}/{}/{name}", name.shard())
        }
        _ => format!("{class}/{name}"),
    }
}

fn join_key(repo: &str, rest: &str) -> String {
    match (repo.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => repo.to_string(),
        (false, false) => format!("{repo}/{rest}"),
    }
}

/// A request path after resolution; attached to each request's extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    repo: String,
    target: Target,
    key: String,
}

impl ResolvedPath {
    fn new(repo: String, target: Target) -> Self {
        let key = join_key(&repo, &target.relative_key());
        Self { repo, target, key }
    }

    /// Repository prefix, without leading or trailing slashes.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Physical storage key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

fn check_segment(segment: &str, path: &str) -> ServerResult<()> {
    let reason = if segment.is_empty() {
        "empty segment"
    } else if segment == "." || segment == ".." {
        "relative segment"
    } else if segment.contains(['\\', '%']) || segment.chars().any(char::is_control) {
        "forbidden character"
    } else {
        return Ok(());
    };
    Err(ServerError::BadPath(format!("{path:?}: {reason}")))
}

/// Resolves request paths below a fixed mount point.
#[derive(Clone, Debug)]
pub struct PathResolver {
    mount: String,
}

impl PathResolver {
    /// `mount_path` is the URL prefix the repository routes live under;
    /// `/` mounts at the server root.
    pub fn new(mount_path: &str) -> Self {
        Self {
            mount: mount_path.trim_end_matches('/').to_string(),
        }
    }

    /// The mount prefix without a trailing slash (empty at the server root).
    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn resolve(&self, path: &str) -> ServerResult<ResolvedPath> {
        let rest = if self.mount.is_empty() {
            path
        } else {
            match path.strip_prefix(self.mount.as_str()) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => {
                    return Err(ServerError::BadPath(format!(
                        "{path:?} is not below {:?}",
                        self.mount
                    )))
                }
            }
        };
        resolve_relative(rest)
    }
}

fn resolve_relative(path: &str) -> ServerResult<ResolvedPath> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(ResolvedPath::new(String::new(), Target::Root));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    for segment in &segments {
        check_segment(segment, path)?;
    }

    let Some((last, init)) = segments.split_last() else {
        return Ok(ResolvedPath::new(String::new(), Target::Root));
    };

    if let Some(class) = ObjectClass::from_token(last) {
        let target = if class.is_singleton() {
            Target::Config
        } else {
            Target::Collection(class)
        };
        return Ok(ResolvedPath::new(init.join("/"), target));
    }

    if let Some((parent, repo)) = init.split_last() {
        if let Some(class) = ObjectClass::from_token(parent) {
            let name = ObjectName::parse(class, last)?;
            return Ok(ResolvedPath::new(repo.join("/"), Target::Object(class, name)));
        }
    }

    Ok(ResolvedPath::new(segments.join("/"), Target::Root))
}

/// Middleware: resolve the request path once and attach the result.
///
/// Paths that fail to resolve are answered with 400 here and never reach a
/// handler or the storage backend.
pub async fn resolve_path(
    State(state): State<RepoState>,
    mut request: Request,
    next: Next,
) -> ServerResult<Response> {
    let resolved = state.resolver.resolve(request.uri().path())?;
    tracing::debug!(method = %request.method(), key = resolved.key(), "resolved path");
    request.extensions_mut().insert(resolved);
    Ok(next.run(request).await)
}
