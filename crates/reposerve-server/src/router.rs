use axum::routing::{get, MethodRouter};
use axum::{middleware, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handler;
use crate::resolve;
use crate::state::RepoState;

fn repo_methods() -> MethodRouter<RepoState> {
    get(handler::get_handler)
        .head(handler::head_handler)
        .post(handler::post_handler)
        .delete(handler::delete_handler)
}

/// Build the repository routes below the configured mount path.
///
/// Repositories may sit at any depth below the mount, so the routes match
/// every path there; the path resolver middleware decides what each path
/// addresses and rejects the rest before a handler runs. Upload size is
/// enforced by the POST handler as the body streams in.
pub fn build_router(state: RepoState, config: &ServerConfig) -> Router {
    let mount = state.resolver.mount().to_string();
    let mut router = Router::new()
        .route(&format!("{mount}/"), repo_methods())
        .route(&format!("{mount}/*path"), repo_methods());
    if !mount.is_empty() {
        router = router.route(&mount, repo_methods());
    }
    router
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            resolve::resolve_path,
        ))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, Bytes};
    use axum::http::{header, HeaderMap, Method, Request, StatusCode};
    use axum::Extension;
    use tower::util::ServiceExt;

    use reposerve_store::{InMemoryStorage, ObjectEntry, Storage, StoreError, StoreResult};

    use super::*;
    use crate::handler::{ListEntry, LIST_V1, LIST_V2};
    use crate::resolve::ResolvedPath;

    const ID: &str = "2159dd48f8a24f33c307b750592773f8b71ff8d11452132a7b2e2a6a01611be1";

    fn app_with(config: ServerConfig) -> (Arc<InMemoryStorage>, Router) {
        let storage = Arc::new(InMemoryStorage::new());
        let state = RepoState::new(storage.clone(), &config);
        (storage, build_router(state, &config))
    }

    fn app() -> (Arc<InMemoryStorage>, Router) {
        app_with(ServerConfig::default())
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: &[u8],
        accept: Option<&str>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }
        dispatch(app, request.body(Body::from(body.to_vec())).unwrap()).await
    }

    async fn dispatch(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Bytes) {
        let (status, _, body) = send(app, Method::GET, uri, b"", None).await;
        (status, body)
    }

    async fn post(app: &Router, uri: &str, body: &[u8]) -> StatusCode {
        send(app, Method::POST, uri, body, None).await.0
    }

    async fn delete(app: &Router, uri: &str) -> StatusCode {
        send(app, Method::DELETE, uri, b"", None).await.0
    }

    async fn get_range(app: &Router, uri: &str, range: &str) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .uri(uri)
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap();
        dispatch(app, request).await
    }

    fn names(body: &[u8]) -> Vec<String> {
        let mut names: Vec<String> = serde_json::from_slice::<Vec<ListEntry>>(body)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // Object lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn post_then_get_returns_same_bytes() {
        let (storage, app) = app();
        let uri = format!("/data/{ID}");
        assert_eq!(post(&app, &uri, b"pack bytes").await, StatusCode::OK);

        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"pack bytes");
        assert_eq!(storage.keys(), vec![format!("data/21/{ID}")]);
    }

    #[tokio::test]
    async fn second_post_to_data_conflicts() {
        let (_storage, app) = app();
        let uri = format!("/data/{ID}");
        assert_eq!(post(&app, &uri, b"original").await, StatusCode::OK);
        assert_eq!(post(&app, &uri, b"replacement").await, StatusCode::FORBIDDEN);

        let (_, body) = get(&app, &uri).await;
        assert_eq!(&body[..], b"original");
    }

    #[tokio::test]
    async fn config_is_write_once() {
        let (_storage, app) = app();
        assert_eq!(post(&app, "/config", b"cfg").await, StatusCode::OK);
        assert_eq!(post(&app, "/config", b"other").await, StatusCode::FORBIDDEN);
        assert_eq!(&get(&app, "/config").await.1[..], b"cfg");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (storage, app) = app();
        let uri = format!("/index/{ID}");
        post(&app, &uri, b"idx").await;
        assert_eq!(delete(&app, &uri).await, StatusCode::OK);
        assert_eq!(get(&app, &uri).await.0, StatusCode::NOT_FOUND);
        assert_eq!(delete(&app, &uri).await, StatusCode::NOT_FOUND);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn recreate_after_delete() {
        let (_storage, app) = app();
        post(&app, "/snapshots/s1", b"v1").await;
        delete(&app, "/snapshots/s1").await;
        assert_eq!(post(&app, "/snapshots/s1", b"v2").await, StatusCode::OK);
        assert_eq!(&get(&app, "/snapshots/s1").await.1[..], b"v2");
    }

    #[tokio::test]
    async fn locks_can_be_overwritten() {
        let (_storage, app) = app();
        assert_eq!(post(&app, "/locks/l1", b"a").await, StatusCode::OK);
        assert_eq!(post(&app, "/locks/l1", b"b").await, StatusCode::OK);
        assert_eq!(&get(&app, "/locks/l1").await.1[..], b"b");
    }

    #[tokio::test]
    async fn head_reports_size() {
        let (_storage, app) = app();
        post(&app, "/keys/k1", b"12345").await;

        let (status, headers, body) = send(&app, Method::HEAD, "/keys/k1", b"", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert!(body.is_empty());

        let (status, _, _) = send(&app, Method::HEAD, "/keys/missing", b"", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_reports_length_and_range_support() {
        let (_storage, app) = app();
        post(&app, "/keys/k1", b"12345").await;
        let (status, headers, body) = send(&app, Method::GET, "/keys/k1", b"", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(&body[..], b"12345");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_storage, app) = app();
        assert_eq!(get(&app, "/config").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get(&app, &format!("/data/{ID}")).await.0, StatusCode::NOT_FOUND);
    }

    // -----------------------------------------------------------------------
    // Ranged reads
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn range_returns_partial_content() {
        let (_storage, app) = app();
        let uri = format!("/data/{ID}");
        post(&app, &uri, b"0123456789").await;

        let (status, headers, body) = get_range(&app, &uri, "bytes=2-4").await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&body[..], b"234");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 2-4/10");
        assert_eq!(headers[header::CONTENT_LENGTH], "3");
    }

    #[tokio::test]
    async fn open_ended_range_reads_to_the_end() {
        let (_storage, app) = app();
        let uri = format!("/data/{ID}");
        post(&app, &uri, b"0123456789").await;

        let (status, headers, body) = get_range(&app, &uri, "bytes=7-").await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&body[..], b"789");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 7-9/10");

        let (status, _, body) = get_range(&app, &uri, "bytes=4-1000").await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&body[..], b"456789");
    }

    #[tokio::test]
    async fn range_past_the_end_is_not_satisfiable() {
        let (_storage, app) = app();
        let uri = format!("/data/{ID}");
        post(&app, &uri, b"0123456789").await;

        let (status, headers, _) = get_range(&app, &uri, "bytes=10-").await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(headers[header::CONTENT_RANGE], "bytes */10");

        let (status, _, _) = get_range(&app, &format!("/data/ff{}", &ID[2..]), "bytes=0-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn multiple_ranges_fall_back_to_whole_object() {
        let (_storage, app) = app();
        post(&app, "/keys/k1", b"0123456789").await;
        let (status, _, body) = get_range(&app, "/keys/k1", "bytes=0-1,5-6").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn ranged_reads_from_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default();
        let storage = Arc::new(reposerve_store::LocalStorage::new(dir.path()).unwrap());
        let app = build_router(RepoState::new(storage, &config), &config);
        let uri = format!("/data/{ID}");
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        assert_eq!(post(&app, &uri, &content).await, StatusCode::OK);

        let (status, _, body) = get_range(&app, &uri, "bytes=65536-65545").await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&body[..], &content[65536..65546]);

        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], &content[..]);
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_returns_exactly_created_names() {
        let (_storage, app) = app();
        for name in ["a", "b", "c"] {
            post(&app, &format!("/keys/{name}"), name.as_bytes()).await;
        }
        post(&app, "/locks/other", b"x").await;

        let (status, headers, body) = send(&app, Method::GET, "/keys/", b"", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], LIST_V2);
        assert_eq!(names(&body), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn data_listing_strips_shards() {
        let (_storage, app) = app();
        let other = format!("ff{}", &ID[2..]);
        post(&app, &format!("/data/{ID}"), b"one").await;
        post(&app, &format!("/data/{other}"), b"three").await;

        let (_, body) = get(&app, "/data/").await;
        let entries: Vec<ListEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&ListEntry { name: ID.into(), size: 3 }));
        assert!(entries.contains(&ListEntry { name: other, size: 5 }));
    }

    #[tokio::test]
    async fn empty_collection_lists_as_empty_array() {
        let (_storage, app) = app();
        let (status, body) = get(&app, "/snapshots/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn v1_listing_has_names_only() {
        let (_storage, app) = app();
        post(&app, "/keys/k1", b"key").await;
        let (status, headers, body) =
            send(&app, Method::GET, "/keys/", b"", Some(LIST_V1)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], LIST_V1);
        let names: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(names, vec!["k1"]);
    }

    #[tokio::test]
    async fn root_lists_top_level_objects() {
        let (_storage, app) = app();
        post(&app, "/config", b"cfg").await;
        post(&app, "/keys/k1", b"key").await;
        post(&app, "/potato/config", b"nested").await;
        let (status, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body), vec!["config"]);
    }

    #[tokio::test]
    async fn local_root_listing_ignores_nested_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default();
        let storage = Arc::new(reposerve_store::LocalStorage::new(dir.path()).unwrap());
        let app = build_router(RepoState::new(storage, &config), &config);
        post(&app, "/config", b"cfg").await;
        post(&app, &format!("/data/{ID}"), b"pack").await;
        post(&app, "/potato/sausage/config", b"nested").await;

        let (_, body) = get(&app, "/").await;
        assert_eq!(names(&body), vec!["config"]);
        let (_, body) = get(&app, "/potato/sausage/").await;
        assert_eq!(names(&body), vec!["config"]);
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn malformed_paths_never_reach_storage() {
        let (storage, app) = app();
        for uri in ["/data/not-hex", "/config/extra", "/repo/../config", "/keys/%2e%2e"] {
            assert_eq!(post(&app, uri, b"x").await, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(get(&app, uri).await.0, StatusCode::BAD_REQUEST, "{uri}");
        }
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn unknown_class_is_rejected() {
        let (storage, app) = app();
        assert_eq!(post(&app, "/bogus/123", b"x").await, StatusCode::BAD_REQUEST);
        assert_eq!(delete(&app, "/bogus/123").await, StatusCode::BAD_REQUEST);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn collections_cannot_be_written_or_deleted() {
        let (_storage, app) = app();
        assert_eq!(post(&app, "/data/", b"x").await, StatusCode::BAD_REQUEST);
        assert_eq!(delete(&app, "/locks/").await, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app, Method::HEAD, "/keys/", b"", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let config = ServerConfig {
            max_object_size: 4,
            ..ServerConfig::default()
        };
        let (storage, app) = app_with(config);
        assert_eq!(
            post(&app, "/locks/l1", b"too many bytes").await,
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn declared_oversized_body_is_rejected_up_front() {
        let config = ServerConfig {
            max_object_size: 4,
            ..ServerConfig::default()
        };
        let (storage, app) = app_with(config);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/keys/k1")
            .header(header::CONTENT_LENGTH, "14")
            .body(Body::from("too many bytes"))
            .unwrap();
        let (status, _, _) = dispatch(&app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn body_at_the_limit_is_accepted() {
        let config = ServerConfig {
            max_object_size: 4,
            ..ServerConfig::default()
        };
        let (_storage, app) = app_with(config);
        assert_eq!(post(&app, "/locks/l1", b"1234").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn chunked_upload_is_streamed_into_storage() {
        let (_storage, app) = app();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"snap")),
            Ok(Bytes::from_static(b"shot ")),
            Ok(Bytes::from_static(b"body")),
        ];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/snapshots/s1")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();
        let (status, _, _) = dispatch(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&get(&app, "/snapshots/s1").await.1[..], b"snapshot body");
    }

    #[tokio::test]
    async fn broken_upload_stores_nothing() {
        let (storage, app) = app();
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"half a")),
            Err(std::io::Error::other("connection reset")),
        ];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/locks/l1")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();
        let (status, _, _) = dispatch(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(storage.is_empty());
    }

    // -----------------------------------------------------------------------
    // Repositories and mounting
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn nested_repository_keys() {
        let (storage, app) = app();
        post(&app, "/potato/sausage/config", b"cfg").await;
        post(&app, &format!("/potato/sausage/data/{ID}"), b"pack").await;
        post(&app, "/potato/sausage/keys/123", b"key").await;

        assert_eq!(
            storage.keys(),
            vec![
                "potato/sausage/config".to_string(),
                format!("potato/sausage/data/21/{ID}"),
                "potato/sausage/keys/123".to_string(),
            ]
        );
        let (_, body) = get(&app, "/potato/sausage/data/").await;
        assert_eq!(names(&body), vec![ID.to_string()]);
        // The top-level repository does not see the nested one.
        let (_, body) = get(&app, "/keys/").await;
        assert!(names(&body).is_empty());
    }

    #[tokio::test]
    async fn create_repository() {
        let (_storage, app) = app();
        assert_eq!(post(&app, "/potato/?create=true", b"").await, StatusCode::OK);
        assert_eq!(post(&app, "/potato/", b"").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_repository_makes_local_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::default();
        let storage = Arc::new(reposerve_store::LocalStorage::new(dir.path()).unwrap());
        let app = build_router(RepoState::new(storage, &config), &config);

        assert_eq!(post(&app, "/repo/?create=true", b"").await, StatusCode::OK);
        for class in ["data", "index", "keys", "locks", "snapshots"] {
            assert!(dir.path().join("repo").join(class).is_dir(), "{class}");
        }
    }

    #[tokio::test]
    async fn mounted_below_prefix() {
        let config = ServerConfig {
            mount_path: "/restic".into(),
            ..ServerConfig::default()
        };
        let (storage, app) = app_with(config);
        assert_eq!(post(&app, "/restic/data/123", b"x").await, StatusCode::OK);
        assert_eq!(storage.keys(), vec!["data/12/123".to_string()]);
        assert_eq!(get(&app, "/restic").await.0, StatusCode::OK);
        assert_eq!(get(&app, "/elsewhere/config").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resolved_key_is_attached_to_request() {
        let config = ServerConfig::default();
        let state = RepoState::new(Arc::new(InMemoryStorage::new()), &config);
        let echo = |Extension(resolved): Extension<ResolvedPath>| async move {
            resolved.key().to_string()
        };
        let app = Router::new()
            .route("/", axum::routing::get(echo))
            .route("/*path", axum::routing::get(echo))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                resolve::resolve_path,
            ))
            .with_state(state);

        for (input, want) in [
            ("/", ""),
            ("/data", "data"),
            ("/data/", "data"),
            ("/data/1", "data/1"),
            ("/data/12", "data/12/12"),
            ("/data/123", "data/12/123"),
            ("/data/123/", "data/12/123"),
            ("/keys", "keys"),
            ("/keys/1", "keys/1"),
            ("/keys/12", "keys/12"),
            ("/keys/123", "keys/123"),
        ] {
            let (status, body) = get(&app, input).await;
            assert_eq!(status, StatusCode::OK, "{input}");
            assert_eq!(&body[..], want.as_bytes(), "{input}");
        }
    }

    // -----------------------------------------------------------------------
    // Append-only mode
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn append_only_keeps_everything_but_locks() {
        let config = ServerConfig {
            append_only: true,
            ..ServerConfig::default()
        };
        let (_storage, app) = app_with(config);
        post(&app, "/snapshots/s1", b"snap").await;
        post(&app, "/locks/l1", b"lock").await;

        assert_eq!(delete(&app, "/snapshots/s1").await, StatusCode::FORBIDDEN);
        assert_eq!(delete(&app, "/config").await, StatusCode::FORBIDDEN);
        assert_eq!(delete(&app, "/locks/l1").await, StatusCode::OK);
        assert_eq!(get(&app, "/snapshots/s1").await.0, StatusCode::OK);
    }

    // -----------------------------------------------------------------------
    // Backend failures
    // -----------------------------------------------------------------------

    struct BrokenStorage;

    #[async_trait]
    impl Storage for BrokenStorage {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn get(&self, _key: &str) -> StoreResult<Bytes> {
            Err(StoreError::Backend("connection reset by bucket-7".into()))
        }
        async fn stat(&self, _key: &str) -> StoreResult<u64> {
            Err(StoreError::Backend("connection reset by bucket-7".into()))
        }
        async fn put(&self, _key: &str, _data: Bytes) -> StoreResult<()> {
            Err(StoreError::Backend("connection reset by bucket-7".into()))
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Backend("connection reset by bucket-7".into()))
        }
        async fn list(&self, _prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
            Err(StoreError::Backend("connection reset by bucket-7".into()))
        }
    }

    #[tokio::test]
    async fn backend_errors_are_generic_500s() {
        let config = ServerConfig::default();
        let app = build_router(RepoState::new(Arc::new(BrokenStorage), &config), &config);

        for (method, uri) in [
            (Method::GET, "/config"),
            (Method::GET, "/data/"),
            (Method::POST, "/locks/l1"),
            (Method::POST, "/keys/k1"),
            (Method::DELETE, "/locks/l1"),
        ] {
            let (status, _, body) = send(&app, method.clone(), uri, b"x", None).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{method} {uri}");
            assert_eq!(&body[..], b"Internal Server Error");
        }
    }

    #[tokio::test]
    async fn v2_is_default_content_type() {
        let (_storage, app) = app();
        let (_, headers, _) = send(&app, Method::GET, "/locks/", b"", Some(LIST_V2)).await;
        assert_eq!(headers[header::CONTENT_TYPE], LIST_V2);
    }
}
