//! End-to-end routing behavior against a mocked remote service.

use attache::artifact::Artifact;
use attache::capability::CapabilityRegistry;
use attache::config::{Config, PreferenceMode};
use attache::dsl::Options;
use attache::processor::{Processor, ProcessorRegistry};
use attache::router::{Router, RouterError};
use attache::service::ServiceClient;
use attache::source::SourceRegistry;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Processor that always fails as if an optional dependency were absent.
struct MissingDepProcessor;

impl Processor for MissingDepProcessor {
    fn process(&self, _data: &[u8], _options: &Options) -> Artifact {
        Artifact::processor_error("conversion requires the 'docx' feature")
    }
}

/// Processor that always fails for a content-level reason.
struct CorruptInputProcessor;

impl Processor for CorruptInputProcessor {
    fn process(&self, _data: &[u8], _options: &Options) -> Artifact {
        Artifact::processor_error("malformed container header")
    }
}

fn service_for(server: &MockServer) -> ServiceClient {
    ServiceClient::new(
        &server.base_url(),
        Some("test-key".to_string()),
        Duration::from_secs(5),
        "attache-test",
    )
}

fn local_router() -> Router {
    Router::new(
        SourceRegistry::with_defaults(&Config::default()),
        ProcessorRegistry::with_defaults(),
        CapabilityRegistry::with_defaults(),
    )
}

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn missing_dependency_failure_retries_via_service_once() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/process");
            then.status(200).json_body(json!({
                "text": "converted remotely",
                "flags": {}
            }));
        })
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "letter.docx", "binary-ish");

    let mut router = local_router();
    router
        .processors_mut()
        .register(".docx", Arc::new(MissingDepProcessor));
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process(&input, &Options::new(), None)
        .await
        .expect("not fatal");

    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].text, "converted remotely");
    assert_eq!(artifacts[0].flags["via"], "service");
    assert!(artifacts[0].error_flag().is_none());
    // Exactly one upload: the retry is not itself retried.
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn content_failures_are_not_retried_remotely() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/process");
            then.status(200).json_body(json!({"text": "should not happen", "flags": {}}));
        })
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "broken.docx", "junk");

    let mut router = local_router();
    router
        .processors_mut()
        .register(".docx", Arc::new(CorruptInputProcessor));
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process(&input, &Options::new(), None)
        .await
        .expect("not fatal");

    assert_eq!(
        artifacts[0].error_flag(),
        Some("malformed container header")
    );
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn without_a_service_the_local_error_stands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "letter.docx", "x");

    let mut router = local_router();
    router
        .processors_mut()
        .register(".docx", Arc::new(MissingDepProcessor));

    let artifacts = router
        .process(&input, &Options::new(), None)
        .await
        .expect("not fatal");

    let error = artifacts[0].error_flag().expect("local error kept");
    assert!(error.contains("requires"));
    assert!(!artifacts[0].flags.contains_key("via"));
}

#[tokio::test]
async fn failed_service_retry_keeps_the_local_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/process");
            then.status(500).body("boom");
        })
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "letter.docx", "x");

    let mut router = local_router();
    router
        .processors_mut()
        .register(".docx", Arc::new(MissingDepProcessor));
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process(&input, &Options::new(), None)
        .await
        .expect("not fatal");

    let error = artifacts[0].error_flag().expect("local error kept");
    assert!(error.contains("requires"));
    assert!(artifacts[0].flags.contains_key("service_error"));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn service_only_without_service_fails_without_touching_the_network() {
    let router = local_router();
    let err = router
        .process("a.txt", &Options::new(), Some(PreferenceMode::ServiceOnly))
        .await
        .expect_err("fatal configuration error");
    assert!(matches!(err, RouterError::ServiceNotConfigured));
}

#[tokio::test]
async fn processor_errors_carry_the_resolved_filename() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "report.pdf", "not a pdf at all");

    let router = local_router();
    let artifacts = router
        .process(&input, &Options::new(), Some(PreferenceMode::LocalOnly))
        .await
        .expect("not fatal");

    assert!(artifacts[0].error_flag().is_some());
    assert_eq!(artifacts[0].flags["source"], "report.pdf");
}

#[tokio::test]
async fn service_only_resolves_local_files_and_processes_remotely() {
    let server = MockServer::start_async().await;
    let unpack = server
        .mock_async(|when, then| {
            when.method(POST).path("/unpack");
            then.status(200).json_body(json!({"files": []}));
        })
        .await;
    let process = server
        .mock_async(|when, then| {
            when.method(POST).path("/process");
            then.status(200).json_body(json!({"text": "remote text", "flags": {}}));
        })
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "notes.txt", "local bytes");

    let mut router = local_router();
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process(&input, &Options::new(), Some(PreferenceMode::ServiceOnly))
        .await
        .expect("not fatal");

    // The path only exists on this machine, so resolution stays local; only
    // the conversion goes over the wire.
    assert_eq!(artifacts[0].text, "remote text");
    assert_eq!(artifacts[0].flags["via"], "service");
    unpack.assert_hits_async(0).await;
    process.assert_hits_async(1).await;
}

#[tokio::test]
async fn service_mode_falls_back_to_local_on_transport_failure() {
    // A client pointed at a closed port: every call fails at the transport.
    let dead_service = ServiceClient::new(
        "http://127.0.0.1:1",
        Some("key".to_string()),
        Duration::from_secs(1),
        "attache-test",
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "notes.txt", "local still works");

    let mut router = local_router();
    router.set_service(Some(dead_service));

    let artifacts = router
        .process(&input, &Options::new(), Some(PreferenceMode::Service))
        .await
        .expect("not fatal");

    assert_eq!(artifacts[0].text, "local still works");
    assert!(artifacts[0].error_flag().is_none());
    assert!(!artifacts[0].flags.contains_key("via"));
}

#[tokio::test]
async fn directory_artifacts_come_back_in_lexicographic_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(&dir, "c.txt", "third");
    write_file(&dir, "a.txt", "first");
    write_file(&dir, "b.txt", "second");

    let router = local_router();
    let artifacts = router
        .process(
            &dir.path().to_string_lossy(),
            &Options::new(),
            Some(PreferenceMode::LocalOnly),
        )
        .await
        .expect("not fatal");

    let sources: Vec<&str> = artifacts
        .iter()
        .map(|artifact| artifact.flags["source"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(sources, vec!["a.txt", "b.txt", "c.txt"]);
    assert_eq!(artifacts[0].text, "first");
}

#[tokio::test]
async fn local_only_processing_is_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = write_file(&dir, "stable.md", "# same input, same output");

    let router = local_router();
    let first = router
        .process(&input, &Options::new(), Some(PreferenceMode::LocalOnly))
        .await
        .expect("first run");
    let second = router
        .process(&input, &Options::new(), Some(PreferenceMode::LocalOnly))
        .await
        .expect("second run");

    assert_eq!(first, second);
}

#[tokio::test]
async fn unresolvable_reference_unpacks_via_service() {
    let server = MockServer::start_async().await;
    let unpack = server
        .mock_async(|when, then| {
            when.method(POST).path("/unpack");
            then.status(200).json_body(json!({
                "files": [
                    {"filename": "readme.txt", "data_b64": "aGVsbG8="}
                ]
            }));
        })
        .await;

    let mut router = local_router();
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process("s3://bucket/readme.txt", &Options::new(), None)
        .await
        .expect("not fatal");

    unpack.assert_hits_async(1).await;
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].text, "hello");
}

#[tokio::test]
async fn local_only_never_calls_the_unpack_endpoint() {
    let server = MockServer::start_async().await;
    let unpack = server
        .mock_async(|when, then| {
            when.method(POST).path("/unpack");
            then.status(200).json_body(json!({"files": []}));
        })
        .await;

    let mut router = local_router();
    router.set_service(Some(service_for(&server)));

    let artifacts = router
        .process(
            "s3://bucket/readme.txt",
            &Options::new(),
            Some(PreferenceMode::LocalOnly),
        )
        .await
        .expect("not fatal");

    unpack.assert_hits_async(0).await;
    assert!(artifacts[0].error_flag().is_some());
}
