//! Server test utilities.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use trove_core::config::{AppConfig, StorageConfig};
use trove_server::{AppState, create_router};
use trove_storage::{ChunkStore, FilesystemStore, LocalPusher, Pusher};

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// A collected response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server over temporary filesystem storage.
    pub async fn new() -> Self {
        Self::build(|_| {}, Arc::new(LocalPusher)).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, Arc::new(LocalPusher)).await
    }

    /// Create a test server whose uploads sync through `pusher`.
    pub async fn with_pusher(pusher: Arc<dyn Pusher>) -> Self {
        Self::build(|_| {}, pusher).await
    }

    async fn build<F>(modifier: F, pusher: Arc<dyn Pusher>) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("chunks");
        let storage: Arc<dyn ChunkStore> = Arc::new(
            FilesystemStore::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        modifier(&mut config);

        let state = AppState::new(config, storage, pusher).expect("Failed to create state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request and collect the whole response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Upload a single file and return its reference.
    pub async fn upload_file(&self, name: &str, content_type: &str, data: &[u8]) -> String {
        let response = self
            .send(
                Request::post(format!("/bzz?name={name}"))
                    .header("content-type", content_type)
                    .body(Body::from(data.to_vec()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
        reference_of(&response)
    }

    /// Upload a multipart collection and return its reference.
    pub async fn upload_collection(
        &self,
        files: &[(&str, &str, &str)],
        index: Option<&str>,
        error: Option<&str>,
    ) -> String {
        let mut builder = Request::post("/bzz")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .header("trove-collection", "true");
        if let Some(index) = index {
            builder = builder.header("trove-index-document", index);
        }
        if let Some(error) = error {
            builder = builder.header("trove-error-document", error);
        }
        let response = self
            .send(builder.body(Body::from(multipart_body(files))).unwrap())
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
        reference_of(&response)
    }
}

pub const MULTIPART_BOUNDARY: &str = "trove-test-boundary";

/// Encode `(path, content type, data)` triples as a multipart form body.
#[allow(dead_code)]
pub fn multipart_body(files: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (path, content_type, data) in files {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{path}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[allow(dead_code)]
pub fn reference_of(response: &TestResponse) -> String {
    response.json()["reference"]
        .as_str()
        .expect("response carries a reference")
        .to_string()
}
