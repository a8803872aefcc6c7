use std::time::Duration;

use barrage::{
    BatchConfig, BatchExecutor, BatchRegistry, Output, ReqwestTransport, Request,
    TransferErrorCode, TransferOption,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> ReqwestTransport {
    ReqwestTransport::new().expect("Failed to build transport")
}

/// Answer every connection with `response` verbatim, keep the socket open for `linger`, then
/// close it.
async fn serve_raw(response: &'static str, linger: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                tokio::time::sleep(linger).await;
            });
        }
    });
    format!("http://{}/", addr)
}

const TRUNCATED: &str = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello";

#[test_log::test(tokio::test)]
async fn test_successful_get_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("hello")
                .insert_header("content-type", "text/plain"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/ok", server.uri());
    let mut request = Request::new(&url, transport());
    request.configure(TransferOption::ReturnBody(true));

    assert_eq!(request.execute().await, Output::Body("hello".to_string()));
    assert!(request.is_successful());
    assert_eq!(request.status(), Some(200));
    assert_eq!(request.error_code(), 0);
    assert_eq!(request.error_message(), "");
    assert_eq!(request.info().effective_url.as_deref(), Some(url.as_str()));
    assert_eq!(request.info().content_length, Some(5));
    assert_eq!(request.info().content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn test_error_status_is_not_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(path("/teapot"))
        .respond_with(ResponseTemplate::new(418).set_body_string("short and stout"))
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/teapot", server.uri()), transport());

    assert_eq!(request.execute().await, Output::Completed);
    assert!(!request.is_successful());
    assert_eq!(request.status(), Some(418));
    assert_eq!(request.error_code(), 0);

    assert!(request.retry_if_failed().await);
    assert_eq!(request.retry_count(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_post_sends_method_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(header("x-api-key", "secret"))
        .and(header("user-agent", "barrage-test"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/submit", server.uri()), transport());
    assert!(request.configure_all([
        TransferOption::Method("POST".to_string()),
        TransferOption::Header("x-api-key".to_string(), "secret".to_string()),
        TransferOption::UserAgent("barrage-test".to_string()),
        TransferOption::Body("payload".to_string()),
    ]));

    request.execute().await;
    assert_eq!(request.status(), Some(201));
    assert!(request.is_successful());
}

#[tokio::test]
async fn test_redirects_are_followed_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/old", server.uri()), transport());
    request.configure_all([
        TransferOption::ReturnBody(true),
        TransferOption::FollowRedirects(true),
    ]);

    assert_eq!(request.execute().await, Output::Body("moved".to_string()));
    assert!(request.is_successful());
    assert_eq!(request.info().redirect_count, 1);
    assert_eq!(
        request.info().effective_url.as_deref(),
        Some(format!("{}/new", server.uri()).as_str())
    );
    // The request keeps its own URL
    assert_eq!(request.url(), format!("{}/old", server.uri()));
}

#[tokio::test]
async fn test_redirects_are_not_followed_by_default() {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/old", server.uri()), transport());
    request.execute().await;

    assert_eq!(request.status(), Some(302));
    assert!(!request.is_successful());
    assert_eq!(request.info().redirect_count, 0);
}

#[tokio::test]
async fn test_redirect_limit() {
    let server = MockServer::start().await;
    Mock::given(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/loop"))
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/loop", server.uri()), transport());
    request.configure_all([
        TransferOption::FollowRedirects(true),
        TransferOption::MaxRedirects(2),
    ]);

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(
        request.error_code(),
        TransferErrorCode::TooManyRedirects.as_u32()
    );
    assert_eq!(request.info().redirect_count, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_header_and_verbose_capture() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .insert_header("x-test", "yes"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/ok", server.uri());
    let mut request = Request::new(&url, transport());
    request.enable_header_capture().unwrap();
    request.enable_verbose_capture().unwrap();
    request.execute().await;

    let headers = request.header_lines().unwrap().unwrap();
    assert_eq!(headers[0], "HTTP/1.1 200 OK");
    assert!(headers.iter().any(|line| line == "x-test: yes"));

    let trace = request.verbose_lines().unwrap().unwrap();
    assert_eq!(trace[0], format!("> GET {}", url));
    assert!(trace.iter().any(|line| line == "< HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut request = Request::new(format!("{}/slow", server.uri()), transport());
    request.configure(TransferOption::Timeout(Duration::from_millis(200)));

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(request.error_code(), TransferErrorCode::TimedOut.as_u32());
    assert_eq!(request.status(), None);
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind and release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut request = Request::new(format!("http://127.0.0.1:{}/", port), transport());

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(request.error_code(), TransferErrorCode::CouldntConnect.as_u32());
    assert!(!request.error_message().is_empty());
    assert_eq!(request.status(), None);
    assert!(!request.is_successful());
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let mut request = Request::new("ftp://example.com/file", transport());

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(
        request.error_code(),
        TransferErrorCode::UnsupportedProtocol.as_u32()
    );
}

#[tokio::test]
async fn test_malformed_url() {
    let mut request = Request::new("not a url", transport());

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(request.error_code(), TransferErrorCode::MalformedUrl.as_u32());
}

#[tokio::test]
async fn test_batch_of_ok_teapot_and_redirect() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(path("/teapot"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&server)
        .await;
    Mock::given(path("/moved"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/ok"))
        .mount(&server)
        .await;

    let transport = transport();
    let mut registry = BatchRegistry::new();
    for endpoint in ["/ok", "/teapot", "/moved"] {
        registry
            .add(
                Request::new(format!("{}{}", server.uri(), endpoint), transport.clone()),
                None,
            )
            .unwrap();
    }
    registry.configure(TransferOption::FollowRedirects(true));

    let executor = BatchExecutor::new(BatchConfig {
        max_retries: 3,
        poll_interval_ms: 50,
        ..Default::default()
    });
    executor.run(&mut registry).await;

    let ok = registry.get(0usize).unwrap();
    assert!(ok.is_successful());
    assert_eq!(ok.retry_count(), 0);

    let teapot = registry.get(1usize).unwrap();
    assert!(!teapot.is_successful());
    assert_eq!(teapot.retry_count(), 3);

    let moved = registry.get(2usize).unwrap();
    assert!(moved.is_successful());
    assert_eq!(moved.retry_count(), 0);
    assert_eq!(moved.info().redirect_count, 1);
}

#[test_log::test(tokio::test)]
async fn test_batch_against_live_server() {
    let server = MockServer::start().await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;
    for i in 0..4 {
        Mock::given(path(format!("/item/{}", i)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("item {}", i)))
            .mount(&server)
            .await;
    }

    let transport = transport();
    let mut registry = BatchRegistry::new();
    registry
        .add(
            Request::new(format!("{}/flaky", server.uri()), transport.clone()),
            Some("flaky"),
        )
        .unwrap();
    for i in 0..4 {
        registry
            .add(
                Request::new(format!("{}/item/{}", server.uri(), i), transport.clone()),
                None,
            )
            .unwrap();
    }
    registry.configure(TransferOption::ReturnBody(true));

    let executor = BatchExecutor::new(BatchConfig {
        max_concurrency: Some(2),
        max_retries: 2,
        retry_delay_ms: 10,
        poll_interval_ms: 50,
    });
    let report = executor.run(&mut registry).await;

    assert_eq!(report.chunks, 3);
    assert_eq!(report.succeeded, 5);
    assert_eq!(report.retries, 1);
    assert_eq!(registry.get("flaky").unwrap().retry_count(), 1);
    assert_eq!(registry.content("flaky"), Some("recovered"));
    for i in 0..4usize {
        assert_eq!(registry.content(i), Some(format!("item {}", i).as_str()));
    }
}

#[tokio::test]
async fn test_truncated_body_is_a_transport_failure() {
    let url = serve_raw(TRUNCATED, Duration::ZERO).await;

    let mut request = Request::new(&url, transport());
    request.configure(TransferOption::ReturnBody(true));
    request.enable_header_capture().unwrap();

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(request.error_code(), TransferErrorCode::RecvError.as_u32());
    assert_eq!(request.status(), None);
    assert_eq!(request.content(), None);
    assert!(!request.is_successful());

    // The status line was received and still shows up in the capture
    let headers = request.header_lines().unwrap().unwrap();
    assert_eq!(headers[0], "HTTP/1.1 200 OK");
}

#[tokio::test]
async fn test_truncated_body_is_retried_by_the_executor() {
    let url = serve_raw(TRUNCATED, Duration::ZERO).await;

    let mut registry = BatchRegistry::new();
    registry.add(Request::new(&url, transport()), None).unwrap();

    let executor = BatchExecutor::new(BatchConfig {
        max_retries: 3,
        poll_interval_ms: 50,
        ..Default::default()
    });
    let report = executor.run(&mut registry).await;

    let request = registry.get(0usize).unwrap();
    assert!(!request.is_successful());
    assert_eq!(request.retry_count(), 3);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retries, 3);
}

#[tokio::test]
async fn test_timeout_while_reading_body() {
    let url = serve_raw(
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhel",
        Duration::from_secs(5),
    )
    .await;

    let mut request = Request::new(&url, transport());
    request.configure(TransferOption::Timeout(Duration::from_millis(300)));

    assert_eq!(request.execute().await, Output::Failed);
    assert_eq!(request.error_code(), TransferErrorCode::TimedOut.as_u32());
    assert_eq!(request.status(), None);
    assert!(!request.is_successful());
}
