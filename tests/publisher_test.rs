//! The real publisher against a scripted HTTP stub: body encoding,
//! content type, whole-batch retry, and final drop semantics.

mod support;

use std::collections::BTreeMap;

use gha_exporter::common::error::ExporterError;
use gha_exporter::config::Config;
use gha_exporter::observation::{MetricKind, Observation};
use gha_exporter::publisher::{ObservationSink, VictoriaPublisher};

use support::{CannedResponse, StubServer};

fn config(vm_url: &str, max_retries: &str) -> Config {
    let vm_url = vm_url.to_string();
    let max_retries = max_retries.to_string();
    Config::load(move |var| match var {
        "GITHUB_TOKEN" => Some("t".to_string()),
        "VM_URL" => Some(vm_url.clone()),
        "GHA_EXPORTER_MAX_RETRIES" => Some(max_retries.clone()),
        "GHA_EXPORTER_HTTP_TIMEOUT_SECS" => Some("5".to_string()),
        _ => None,
    })
    .unwrap()
}

fn sample(kind: MetricKind, value: f64, ts: i64) -> Observation {
    Observation {
        kind,
        value,
        labels: BTreeMap::from([
            ("repo".to_string(), "aztec/ci".to_string()),
            ("workflow".to_string(), "ci3.yml".to_string()),
        ]),
        timestamp_ms: ts,
    }
}

#[tokio::test]
async fn pushes_the_encoded_batch_to_the_import_endpoint() {
    let stub = StubServer::start(vec![CannedResponse::empty(204)]).await;
    let publisher = VictoriaPublisher::new(&config(&stub.url(), "3")).unwrap();

    let batch = vec![
        sample(MetricKind::Duration, 120.0, 1000),
        sample(MetricKind::Status, 2.0, 2000),
    ];
    publisher.publish(&batch).await.unwrap();

    let requests = stub.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/v1/import/prometheus");
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/openmetrics-text")
    );
    assert!(request.body.contains("# TYPE workflow_run_duration_seconds gauge"));
    assert!(request
        .body
        .contains("workflow_run_duration_seconds{repo=\"aztec/ci\",workflow=\"ci3.yml\"} 120 1000"));
    assert!(request
        .body
        .contains("workflow_run_status{repo=\"aztec/ci\",workflow=\"ci3.yml\"} 2 2000"));
}

#[tokio::test]
async fn retried_batch_is_byte_identical() {
    let stub = StubServer::start(vec![
        CannedResponse::empty(500),
        CannedResponse::empty(204),
    ])
    .await;
    let publisher = VictoriaPublisher::new(&config(&stub.url(), "3")).unwrap();

    publisher
        .publish(&[sample(MetricKind::Duration, 95.0, 5000)])
        .await
        .unwrap();

    let requests = stub.requests().await;
    assert_eq!(requests.len(), 2);
    // re-sending the same samples is an overwrite on the backend, so the
    // retry must carry exactly the same payload
    assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn exhausted_retries_drop_the_batch_with_an_error() {
    let stub = StubServer::start(vec![CannedResponse::empty(500)]).await;
    let publisher = VictoriaPublisher::new(&config(&stub.url(), "1")).unwrap();

    let err = publisher
        .publish(&[sample(MetricKind::Status, 1.0, 100)])
        .await
        .unwrap_err();
    assert!(matches!(err, ExporterError::Publish(_)), "got {err:?}");
    // original attempt plus one retry
    assert_eq!(stub.requests().await.len(), 2);
}
