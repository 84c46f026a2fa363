//! Self-hosted HTTP surface mirroring the remote service's wire contract.
//!
//! Four endpoints:
//!
//! - `POST /process` – multipart upload of one file plus option fields;
//!   converts locally and returns the artifact as JSON.
//! - `POST /unpack` – expand a URL/repository/archive reference into raw
//!   files, base64-encoded.
//! - `GET /health` – liveness plus capability summary.
//! - `GET /formats` – registered extensions.
//!
//! When a server key is configured the two `POST` endpoints require
//! `Authorization: Bearer <key>`; the `GET` endpoints stay open. The server
//! always converts with the local pipeline, so a chain of instances cannot
//! loop back into itself.

use crate::artifact::Artifact;
use crate::config::{Config, PreferenceMode};
use crate::dsl::{OptionValue, Options};
use crate::router::Router as Pipeline;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared state behind every handler.
pub struct AppState {
    pipeline: Pipeline,
    server_key: Option<String>,
    max_upload_bytes: u64,
}

impl AppState {
    /// Wire up server state from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pipeline: Pipeline::from_config(config),
            server_key: config.server_key.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Build state around an existing pipeline, for tests and embedding.
    pub fn new(pipeline: Pipeline, server_key: Option<String>, max_upload_bytes: u64) -> Self {
        Self {
            pipeline,
            server_key,
            max_upload_bytes,
        }
    }
}

/// Build the HTTP router exposing the conversion surface.
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route("/process", post(process_file))
        .route("/unpack", post(unpack_reference))
        .route("/health", get(health))
        .route("/formats", get(formats))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Convert one uploaded file with the local pipeline.
///
/// The multipart form carries the file under the `file` field; every other
/// field is an option, parsed with the same typing rules as the inline
/// option block.
async fn process_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Artifact>, AppError> {
    check_auth(&headers, &state.server_key)?;

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut options = Options::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| AppError::BadRequest("file field needs a filename".into()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadRequest(format!("failed to read upload: {err}")))?;
            file = Some((filename, bytes.to_vec()));
        } else if !name.is_empty() {
            let raw = field
                .text()
                .await
                .map_err(|err| AppError::BadRequest(format!("failed to read field: {err}")))?;
            options.insert(name, OptionValue::parse(&raw));
        }
    }

    let (filename, data) =
        file.ok_or_else(|| AppError::BadRequest("missing 'file' field".into()))?;
    tracing::info!(filename, bytes = data.len(), "processing upload");
    let artifact = state
        .pipeline
        .process_bytes(&filename, &data, &options, PreferenceMode::LocalOnly)
        .await;
    Ok(Json(artifact))
}

/// Request body for `POST /unpack`.
#[derive(Deserialize)]
struct UnpackRequest {
    /// Reference to expand: URL, repository spec, or archive path.
    url: String,
}

/// One expanded file in the `POST /unpack` response.
#[derive(Serialize)]
struct UnpackedFile {
    filename: String,
    data_b64: String,
}

/// Response body for `POST /unpack`.
#[derive(Serialize)]
struct UnpackResponse {
    files: Vec<UnpackedFile>,
}

/// Expand a reference into its raw files.
async fn unpack_reference(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UnpackRequest>,
) -> Result<Json<UnpackResponse>, AppError> {
    check_auth(&headers, &state.server_key)?;

    let records = state
        .pipeline
        .resolve_local(&request.url)
        .await
        .map_err(|err| AppError::BadRequest(format!("failed to resolve reference: {err}")))?;
    tracing::info!(reference = %request.url, files = records.len(), "unpack completed");
    let files = records
        .into_iter()
        .map(|record| UnpackedFile {
            data_b64: STANDARD.encode(&record.bytes),
            filename: record.filename,
        })
        .collect();
    Ok(Json(UnpackResponse { files }))
}

/// Liveness probe with a capability summary. Unauthenticated.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let capabilities: serde_json::Map<String, serde_json::Value> = state
        .pipeline
        .capabilities()
        .check_all()
        .into_iter()
        .map(|(group, entry)| (group, json!(entry.available)))
        .collect();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": capabilities,
    }))
}

/// Registered extensions, sentinels included. Unauthenticated.
async fn formats(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.pipeline.processors().extensions())
}

fn check_auth(headers: &HeaderMap, server_key: &Option<String>) -> Result<(), AppError> {
    let Some(expected) = server_key else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

/// HTTP error mapping for the handlers above.
enum AppError {
    Unauthorized,
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid or missing API key".into()),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::processor::ProcessorRegistry;
    use crate::source::SourceRegistry;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    fn app(server_key: Option<&str>) -> Router {
        let pipeline = Pipeline::new(
            SourceRegistry::with_defaults(&Config::default()),
            ProcessorRegistry::with_defaults(),
            CapabilityRegistry::with_defaults(),
        );
        let state = AppState::new(
            pipeline,
            server_key.map(str::to_string),
            8 * 1024 * 1024,
        );
        create_router(Arc::new(state))
    }

    fn multipart_upload(filename: &str, content: &str, fields: &[(&str, &str)]) -> (String, Body) {
        let boundary = "attache-test-boundary";
        let mut body = String::new();
        body.push_str(&format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"file\"; \
             filename=\"{filename}\"\r\n\r\n{content}\r\n"
        ));
        for (name, value) in fields {
            body.push_str(&format!(
                "--{boundary}\r\ncontent-disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        (
            format!("multipart/form-data; boundary={boundary}"),
            Body::from(body),
        )
    }

    #[tokio::test]
    async fn process_converts_text_upload() {
        let (content_type, body) = multipart_upload("notes.txt", "hello server", &[]);
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process")
                    .header("content-type", content_type)
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let artifact: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(artifact["text"], "hello server");
        assert_eq!(artifact["flags"]["source"], "notes.txt");
    }

    #[tokio::test]
    async fn process_requires_bearer_token_when_key_is_set() {
        let (content_type, body) = multipart_upload("notes.txt", "hi", &[]);
        let response = app(Some("hunter2"))
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process")
                    .header("content-type", content_type)
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (content_type, body) = multipart_upload("notes.txt", "hi", &[]);
        let response = app(Some("hunter2"))
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process")
                    .header("content-type", content_type)
                    .header("authorization", "Bearer hunter2")
                    .body(body)
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_file_field_is_a_bad_request() {
        // Only an option field, no file part.
        let boundary = "attache-test-boundary";
        let body = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"pages\"\r\n\r\n1-3\r\n--{boundary}--\r\n"
        );
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/process")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_formats_stay_open_with_a_key_set() {
        let response = app(Some("hunter2"))
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let health: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(health["status"], "ok");

        let response = app(Some("hunter2"))
            .oneshot(
                Request::builder()
                    .uri("/formats")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let formats: Vec<String> = serde_json::from_slice(&bytes).expect("json");
        assert!(formats.contains(&".txt".to_string()));
    }

    #[tokio::test]
    async fn unpack_returns_base64_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"alpha").expect("write");

        let payload = json!({ "url": dir.path().to_string_lossy() });
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/unpack")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(parsed["files"][0]["filename"], "a.txt");
        assert_eq!(parsed["files"][0]["data_b64"], STANDARD.encode(b"alpha"));
    }
}
