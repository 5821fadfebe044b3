//! REST adapter tests against a mock HTTP server

use deid_export::adapters::datastore::{ApiDatastore, Datastore, Query};
use deid_export::adapters::jobs::{ApiJobRunner, JobRunner, JobStatus};
use deid_export::adapters::http::ApiClient;
use deid_export::cli::commands::exit_code_for;
use deid_export::config::{secret_string, DatastoreConfig, RetryConfig};
use deid_export::domain::{
    ContainerId, ContainerKind, ContainerRef, DatastoreError, DeidError, JobId,
};
use mockito::Matcher;

fn config(base_url: String) -> DatastoreConfig {
    DatastoreConfig {
        base_url,
        api_key: None,
        timeout_seconds: 5,
        tls_verify: true,
        retry: RetryConfig::default(),
    }
}

fn store(server: &mockito::Server) -> ApiDatastore {
    let config = config(format!("{}/api", server.url()));
    ApiDatastore::new(&config, Some(secret_string("secret-key".to_string()))).unwrap()
}

fn acquisition() -> ContainerRef {
    ContainerRef::new(ContainerId::new("acq-1").unwrap(), ContainerKind::Acquisition)
}

#[tokio::test]
async fn test_get_container_sends_api_key() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/containers/sub-1")
        .match_header("authorization", "Bearer secret-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"_id": "sub-1", "container_type": "subject", "label": "001",
                "code": "001", "parents": {"project": "prj-1"}}"#,
        )
        .create_async()
        .await;

    let container = store(&server)
        .get_container(&ContainerId::new("sub-1").unwrap())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(container.kind, ContainerKind::Subject);
    assert_eq!(container.code(), Some("001"));
    assert_eq!(
        container.parents.project,
        Some(ContainerId::new("prj-1").unwrap())
    );
}

#[tokio::test]
async fn test_find_first_sends_filter() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/subjects/sub-1/sessions")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("filter".into(), "label=baseline,code=\"001\"".into()),
            Matcher::UrlEncoded("limit".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"_id": "ses-9", "label": "baseline"}]"#)
        .create_async()
        .await;

    let parent = ContainerRef::new(ContainerId::new("sub-1").unwrap(), ContainerKind::Subject);
    let query = Query::new().eq("label", "baseline").eq("code", "001");
    let found = store(&server)
        .find_first(&parent, ContainerKind::Session, &query)
        .await
        .unwrap()
        .unwrap();

    mock.assert_async().await;
    assert_eq!(found.id.as_str(), "ses-9");
    assert_eq!(found.kind, ContainerKind::Session);
}

#[tokio::test]
async fn test_missing_file_is_none() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/acquisitions/acq-1/files/a.dcm/info")
        .with_status(404)
        .with_body("file not found")
        .create_async()
        .await;

    let file = store(&server).get_file(&acquisition(), "a.dcm").await.unwrap();
    assert!(file.is_none());
}

#[tokio::test]
async fn test_file_info_is_parsed() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/acquisitions/acq-1/files/a.dcm/info")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"file_id": "f-1", "name": "a.dcm", "type": "dicom",
                "info": {"export": {"origin_id": "abc"}}}"#,
        )
        .create_async()
        .await;

    let file = store(&server)
        .get_file(&acquisition(), "a.dcm")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.id.as_str(), "f-1");
    assert_eq!(file.file_type(), Some("dicom"));
    assert_eq!(file.parent, acquisition());
}

#[tokio::test]
async fn test_status_mapping() {
    let mut server = mockito::Server::new_async().await;
    let _unauthorized = server
        .mock("GET", "/api/containers/denied")
        .with_status(401)
        .with_body("bad key")
        .create_async()
        .await;
    let _broken = server
        .mock("GET", "/api/containers/broken")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let store = store(&server);
    let err = store
        .get_container(&ContainerId::new("denied").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::AuthenticationFailed(_)));
    assert_eq!(exit_code_for(&DeidError::from(err)), 4);

    let err = store
        .get_container(&ContainerId::new("broken").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::ServerError { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancel_finished_job_keeps_state() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("PUT", "/api/jobs/job-7")
        .match_body(Matcher::Json(serde_json::json!({"state": "cancelled"})))
        .with_status(400)
        .with_body("Cannot mutate a job that is complete.")
        .create_async()
        .await;

    let api = ApiClient::new(&config(format!("{}/api", server.url())), None).unwrap();
    let state = ApiJobRunner::new(api)
        .cancel(&JobId::new("job-7").unwrap())
        .await
        .unwrap();
    assert_eq!(state, JobStatus::Complete);
}
