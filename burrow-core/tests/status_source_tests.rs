use burrow_core::engine::{HttpStatusSource, StatusError, StatusSource};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn source_for(server: &MockServer, timeout: Duration) -> HttpStatusSource {
    HttpStatusSource::new(format!("{}/status", server.uri()), timeout).unwrap()
}

/// A registered engine with peers decodes into a connected snapshot
#[tokio::test]
async fn test_fetch_registered_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"connected":true,"registered":true,"terminated":false,
                "peers":{"12":{"siteId":12,"connected":true,"endpoint":"198.51.100.4:51820"}}}"#,
        ))
        .mount(&mock_server)
        .await;

    let source = source_for(&mock_server, Duration::from_secs(5));
    let status = source.fetch().await.unwrap();

    assert!(status.snapshot().is_established());
    assert_eq!(status.connected_peers(), 1);
}

/// An engine that has not registered yet omits most fields
#[tokio::test]
async fn test_fetch_partial_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"connected":false}"#))
        .mount(&mock_server)
        .await;

    let source = source_for(&mock_server, Duration::from_secs(5));
    let snapshot = source.fetch().await.unwrap().snapshot();

    assert_eq!(snapshot.registered, None);
    assert!(!snapshot.is_established());
    assert!(!snapshot.is_fatal_pre_registration());
}

#[tokio::test]
async fn test_fetch_reports_http_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let source = source_for(&mock_server, Duration::from_secs(5));
    assert_eq!(source.fetch().await, Err(StatusError::BadStatus(503)));
}

#[tokio::test]
async fn test_fetch_rejects_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&mock_server)
        .await;

    let source = source_for(&mock_server, Duration::from_secs(5));
    assert!(matches!(source.fetch().await, Err(StatusError::Decode(_))));
}

#[tokio::test]
async fn test_fetch_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let source = source_for(&mock_server, Duration::from_millis(500));
    assert!(matches!(
        source.fetch().await,
        Err(StatusError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_fetch_unreachable_engine() {
    // Nothing listens on the discard port
    let source =
        HttpStatusSource::new("http://127.0.0.1:9/status".to_string(), Duration::from_secs(2))
            .unwrap();
    assert!(matches!(
        source.fetch().await,
        Err(StatusError::Unreachable(_) | StatusError::Timeout(_))
    ));
}
