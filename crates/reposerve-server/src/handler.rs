//! Per-method handlers for repository routes.
//!
//! Every handler receives the [`ResolvedPath`] attached by
//! [`crate::resolve::resolve_path`] and branches on its [`Target`]:
//! collections and repository roots are listed, single objects are read,
//! written or removed. Object bodies are streamed to and from the backend.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use reposerve_store::{StoreError, StreamingUpload, WriteMode};
use reposerve_types::{ObjectClass, ObjectName};

use crate::error::{ServerError, ServerResult};
use crate::resolve::{ResolvedPath, Target};
use crate::state::RepoState;

/// Media type of the name-only listing format.
pub const LIST_V1: &str = "application/vnd.x.restic.rest.v1";
/// Media type of the name-and-size listing format.
pub const LIST_V2: &str = "application/vnd.x.restic.rest.v2";

/// One element of a v2 listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepoQuery {
    #[serde(default)]
    pub create: bool,
}

fn with_content_type(body: impl IntoResponse, content_type: &'static str) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn wants_v1(headers: &HeaderMap) -> bool {
    let accepted: Vec<&str> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    accepted.iter().any(|v| v.contains(LIST_V1)) && !accepted.iter().any(|v| v.contains(LIST_V2))
}

/// Name of a listed object relative to its collection, if it belongs there.
///
/// Objects sit directly in the collection or, for sharded classes, one level
/// down in the directory named by their shard prefix. Anything else below the
/// prefix (stray files, nested repositories) is left out.
fn collection_name(class: ObjectClass, rel: &str) -> Option<String> {
    let (dir, name) = match rel.split_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, rel),
    };
    let parsed = ObjectName::parse(class, name).ok()?;
    match dir {
        None => Some(name.to_string()),
        Some(dir) if class.is_shardable() && dir == parsed.shard() => Some(name.to_string()),
        Some(_) => None,
    }
}

async fn list(state: &RepoState, resolved: &ResolvedPath, headers: &HeaderMap) -> ServerResult<Response> {
    let prefix = resolved.key();
    let entries = match resolved.target() {
        Target::Collection(_) => state.storage.list(prefix).await?,
        _ => state.storage.list_shallow(prefix).await?,
    };
    let skip = if prefix.is_empty() { 0 } else { prefix.len() + 1 };

    let items: Vec<ListEntry> = entries
        .into_iter()
        .filter_map(|entry| {
            let rel = entry.key.get(skip..)?;
            let name = match resolved.target() {
                Target::Collection(class) => collection_name(*class, rel)?,
                _ => (!rel.contains('/')).then(|| rel.to_string())?,
            };
            Some(ListEntry {
                name,
                size: entry.size,
            })
        })
        .collect();
    debug!(prefix, count = items.len(), "listed objects");

    if wants_v1(headers) {
        let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
        let body = serde_json::to_vec(&names).map_err(|e| ServerError::Internal(e.to_string()))?;
        Ok(with_content_type(body, LIST_V1))
    } else {
        let body = serde_json::to_vec(&items).map_err(|e| ServerError::Internal(e.to_string()))?;
        Ok(with_content_type(body, LIST_V2))
    }
}

/// The part of an object a GET asks for.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    /// Half-open `start..end`, already clamped to the object.
    Partial(u64, u64),
    Unsatisfiable,
}

/// Interpret a `Range` header against an object of `size` bytes.
///
/// Only a single `bytes=` range is honored. Multiple ranges, other units and
/// malformed values fall back to the whole object.
fn byte_range(value: Option<&str>, size: u64) -> ByteRange {
    let Some(spec) = value.and_then(|v| v.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        // Suffix range: the final `last` bytes.
        match last.parse::<u64>() {
            Ok(0) => return ByteRange::Unsatisfiable,
            Ok(n) => (size.saturating_sub(n), size),
            Err(_) => return ByteRange::Full,
        }
    } else {
        let Ok(start) = first.parse::<u64>() else {
            return ByteRange::Full;
        };
        let end = if last.is_empty() {
            size
        } else {
            match last.parse::<u64>() {
                Ok(last) if last >= start => last.saturating_add(1).min(size),
                _ => return ByteRange::Full,
            }
        };
        (start, end)
    };

    if start >= size {
        ByteRange::Unsatisfiable
    } else {
        ByteRange::Partial(start, end)
    }
}

fn object_response(status: StatusCode, len: u64, body: Body) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
}

async fn get_object(state: &RepoState, key: &str, headers: &HeaderMap) -> ServerResult<Response> {
    let size = state.storage.stat(key).await?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    match byte_range(range, size) {
        ByteRange::Full => {
            let stream = state.storage.get_stream(key).await?;
            Ok(object_response(StatusCode::OK, size, Body::from_stream(stream)))
        }
        ByteRange::Partial(start, end) => {
            let data = state.storage.get_range(key, start, end).await?;
            let len = data.len() as u64;
            debug!(key, start, len, "serving range");
            let mut response = object_response(StatusCode::PARTIAL_CONTENT, len, Body::from(data));
            let content_range = format!("bytes {start}-{}/{size}", start + len - 1);
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            Ok(response)
        }
        ByteRange::Unsatisfiable => Err(ServerError::RangeNotSatisfiable { size }),
    }
}

/// GET: list a collection or repository root, or fetch one object.
pub async fn get_handler(
    State(state): State<RepoState>,
    Extension(resolved): Extension<ResolvedPath>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    match resolved.target() {
        Target::Root | Target::Collection(_) => list(&state, &resolved, &headers).await,
        Target::Config | Target::Object(..) => get_object(&state, resolved.key(), &headers).await,
    }
}

/// HEAD: report an object's existence and size.
pub async fn head_handler(
    State(state): State<RepoState>,
    Extension(resolved): Extension<ResolvedPath>,
) -> ServerResult<Response> {
    match resolved.target() {
        Target::Config | Target::Object(..) => {
            let size = state.storage.stat(resolved.key()).await?;
            let mut response = StatusCode::OK.into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            Ok(response)
        }
        Target::Root | Target::Collection(_) => Err(ServerError::BadPath(
            "HEAD needs an object path".into(),
        )),
    }
}

/// POST: create a repository (`?create=true` on its root) or store an object.
pub async fn post_handler(
    State(state): State<RepoState>,
    Extension(resolved): Extension<ResolvedPath>,
    Query(query): Query<RepoQuery>,
    request: Request,
) -> ServerResult<Response> {
    match resolved.target() {
        Target::Root if query.create => create_repo(&state, &resolved).await,
        Target::Root => Err(ServerError::BadPath(
            "POST to a repository root needs ?create=true".into(),
        )),
        Target::Collection(class) => Err(ServerError::BadPath(format!(
            "cannot POST to the {class} collection"
        ))),
        Target::Config => write_object(&state, &resolved, ObjectClass::Config, request).await,
        Target::Object(class, _) => write_object(&state, &resolved, *class, request).await,
    }
}

async fn create_repo(state: &RepoState, resolved: &ResolvedPath) -> ServerResult<Response> {
    let root = resolved.key();
    state.storage.create_dir(root).await?;
    for class in ObjectClass::ALL.into_iter().filter(|c| !c.is_singleton()) {
        let dir = if root.is_empty() {
            class.as_str().to_string()
        } else {
            format!("{root}/{class}")
        };
        state.storage.create_dir(&dir).await?;
    }
    info!(repo = resolved.repo(), "created repository");
    Ok(StatusCode::OK.into_response())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

async fn discard(upload: Box<dyn StreamingUpload + '_>, key: &str) {
    if let Err(e) = upload.abort().await {
        warn!(key, error = %e, "failed to discard upload");
    }
}

/// Store an object. Immutable classes are only ever created, never replaced.
///
/// The body is streamed into the backend and committed once complete. For
/// immutable classes the final create-only commit is atomic only where the
/// backend supports it.
async fn write_object(
    state: &RepoState,
    resolved: &ResolvedPath,
    class: ObjectClass,
    request: Request,
) -> ServerResult<Response> {
    let key = resolved.key();
    let limit = state.max_object_size;
    if declared_length(request.headers()).is_some_and(|len| len > limit) {
        return Err(ServerError::PayloadTooLarge(limit));
    }

    let mode = if class.is_immutable() {
        if state.storage.exists(key).await? {
            warn!(key, "refusing to overwrite existing object");
            return Err(ServerError::Conflict(key.to_string()));
        }
        WriteMode::CreateNew
    } else {
        WriteMode::Replace
    };

    let mut upload = state.storage.put_stream(key, mode).await?;
    let mut body = request.into_body().into_data_stream();
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                discard(upload, key).await;
                return Err(ServerError::BodyRead(e.to_string()));
            }
        };
        received += chunk.len() as u64;
        if received > limit {
            discard(upload, key).await;
            return Err(ServerError::PayloadTooLarge(limit));
        }
        if let Err(e) = upload.write(chunk).await {
            discard(upload, key).await;
            return Err(e.into());
        }
    }

    match upload.finish().await {
        Ok(size) => {
            debug!(key, size, "stored object");
            Ok(StatusCode::OK.into_response())
        }
        Err(StoreError::AlreadyExists(_)) => {
            warn!(key, "object appeared during upload, not replaced");
            Err(ServerError::Conflict(key.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// DELETE: remove one object. Append-only repositories only release locks.
pub async fn delete_handler(
    State(state): State<RepoState>,
    Extension(resolved): Extension<ResolvedPath>,
) -> ServerResult<Response> {
    let class = match resolved.target() {
        Target::Config => ObjectClass::Config,
        Target::Object(class, _) => *class,
        Target::Root | Target::Collection(_) => {
            return Err(ServerError::BadPath("DELETE needs an object path".into()))
        }
    };
    if state.append_only && class != ObjectClass::Locks {
        warn!(key = resolved.key(), "delete refused in append-only mode");
        return Err(ServerError::AppendOnly(resolved.key().to_string()));
    }
    state.storage.delete(resolved.key()).await?;
    debug!(key = resolved.key(), "deleted object");
    Ok(StatusCode::OK.into_response())
}
