use std::time::Duration;

use axum::{
    Router,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use futures::TryStreamExt;
use rivulet_net::{HttpClient, Net, NetError, NetExt, NetOptions, RangeSpec, RetryPolicy};
use rivulet_test_utils::TestHttpServer;
use rstest::rstest;

const BODY: &[u8] = b"0123456789abcdef";

async fn segment(headers: HeaderMap) -> impl IntoResponse {
    let Some(range) = headers.get("range").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::OK, BODY.to_vec());
    };
    let spec = range.trim_start_matches("bytes=");
    let (start, end) = spec.split_once('-').unwrap_or((spec, ""));
    let start: usize = start.parse().unwrap_or(0);
    let end: usize = end.parse().unwrap_or(BODY.len() - 1);
    (StatusCode::PARTIAL_CONTENT, BODY[start..=end].to_vec())
}

async fn echo_auth(headers: HeaderMap) -> impl IntoResponse {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_string()
}

async fn server() -> TestHttpServer {
    TestHttpServer::new(
        Router::new()
            .route("/seg.m4s", get(segment))
            .route("/auth", get(echo_auth))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(|| async { StatusCode::SERVICE_UNAVAILABLE })),
    )
    .await
}

#[tokio::test]
async fn get_bytes_returns_body() {
    let server = server().await;
    let client = HttpClient::new(NetOptions::default()).expect("client");

    let body = client
        .get_bytes(server.url("/seg.m4s"), None)
        .await
        .expect("body");
    assert_eq!(&body[..], BODY);
}

#[rstest]
#[case(RangeSpec::new(0, Some(3)), b"0123".as_slice())]
#[case(RangeSpec::new(10, Some(15)), b"abcdef".as_slice())]
#[case(RangeSpec::from_start(12), b"cdef".as_slice())]
#[tokio::test]
async fn get_range_streams_requested_bytes(#[case] range: RangeSpec, #[case] expected: &[u8]) {
    let server = server().await;
    let client = HttpClient::new(NetOptions::default()).expect("client");

    let chunks: Vec<_> = client
        .get_range(server.url("/seg.m4s"), range, None)
        .await
        .expect("stream")
        .try_collect()
        .await
        .expect("chunks");
    let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(body, expected);
}

#[rstest]
#[case("/missing", 404)]
#[case("/broken", 503)]
#[tokio::test]
async fn error_status_is_reported(#[case] path: &str, #[case] status: u16) {
    let server = server().await;
    let client = HttpClient::new(NetOptions::default()).expect("client");

    let err = client
        .get_bytes(server.url(path), None)
        .await
        .expect_err("must fail");
    assert_eq!(err.status_code(), Some(status));
}

#[tokio::test]
async fn request_headers_override_defaults() {
    let server = server().await;
    let client =
        HttpClient::new(NetOptions::default().with_header("Authorization", "base")).expect("client");

    let default_auth = client.get_bytes(server.url("/auth"), None).await.expect("body");
    assert_eq!(&default_auth[..], b"base");

    let mut headers = rivulet_net::Headers::new();
    headers.insert("Authorization", "token");
    let overridden = client
        .get_bytes(server.url("/auth"), Some(headers))
        .await
        .expect("body");
    assert_eq!(&overridden[..], b"token");
}

#[tokio::test]
async fn head_probe_distinguishes_present_and_missing() {
    let server = server().await;
    let client = HttpClient::new(NetOptions::default())
        .expect("client")
        .with_timeout(Duration::from_secs(5));

    assert!(client.head(server.url("/seg.m4s"), None).await.is_ok());
    let missing = client.head(server.url("/missing"), None).await;
    assert!(matches!(missing, Err(NetError::HttpStatus { status: 404, .. })));
}

#[tokio::test]
async fn retry_layer_gives_up_on_persistent_failure() {
    let server = server().await;
    let client = HttpClient::new(NetOptions::default())
        .expect("client")
        .with_retry(RetryPolicy::new(2, Duration::from_millis(5)));

    let err = client
        .get_bytes(server.url("/broken"), None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, NetError::RetryExhausted { max_retries: 2, .. }));
    assert_eq!(err.status_code(), Some(503));
}
