//! Integration tests for the proxied HTTP server.
//!
//! Requests are sent with `reqwest` to a real listening server; the
//! responses are produced on the caller side by an `HttpHandler`.

use async_trait::async_trait;
use netproxy_client::{HandlerError, HttpHandler, HttpServerProxy, NotFoundHandler};
use netproxy_host::Host;
use netproxy_proto::{HttpServerCall, HttpServerEvent, ListenOptions};
use netproxy_types::http::{HttpRequest, HttpResponse};
use netproxy_types::ProxyConfig;
use netproxy_wire::{Transport, WireError};
use std::sync::Arc;
use std::time::Duration;

struct Greeter;

#[async_trait]
impl HttpHandler for Greeter {
    async fn handle(&self, request: HttpRequest) -> Result<HttpResponse, HandlerError> {
        if request.url == "/boom" {
            return Err("greeter failed".into());
        }
        let agent = request.header("x-agent").unwrap_or("nobody").to_string();
        let mut response = HttpResponse::text(
            200,
            format!("{} {} from {} body={}", request.method, request.url, agent, request.body),
        );
        response
            .headers
            .push(("x-request-version".to_string(), request.http_version));
        Ok(response)
    }
}

async fn serve_with(host: &Host, handler: Arc<dyn HttpHandler>) -> (HttpServerProxy, String) {
    let (server, _events) = HttpServerProxy::new(host.http_server(), handler);
    server
        .listen(ListenOptions::port(0).with_hostname("127.0.0.1"))
        .await
        .unwrap();
    let port = server.address().await.unwrap().expect("listening").port;
    (server, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn test_request_round_trip() {
    let host = Host::new(ProxyConfig::default());
    let (_server, base) = serve_with(&host, Arc::new(Greeter)).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/hello?x=1"))
        .header("X-Agent", "tester")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-request-version"], "1.1");
    assert_eq!(
        response.text().await.unwrap(),
        "POST /hello?x=1 from tester body=payload"
    );
}

#[tokio::test]
async fn test_handler_error_is_500() {
    let host = Host::new(ProxyConfig::default());
    let (_server, base) = serve_with(&host, Arc::new(Greeter)).await;

    let response = reqwest::get(format!("{base}/boom")).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "greeter failed");
}

#[tokio::test]
async fn test_default_handler_is_404() {
    let host = Host::new(ProxyConfig::default());
    let (_server, base) = serve_with(&host, Arc::new(NotFoundHandler)).await;

    let response = reqwest::get(format!("{base}/anything")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = ProxyConfig::default();
    config.http.max_body_bytes = 8;
    let host = Host::new(config);
    let (_server, base) = serve_with(&host, Arc::new(Greeter)).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/big"))
        .body("much more than eight bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn test_unknown_request_id() {
    let host = Host::new(ProxyConfig::default());
    let (transport, _events) = Transport::new(host.http_server());

    let err = transport
        .call(HttpServerCall::Response {
            request_id: 42,
            response: HttpResponse::text(200, "late"),
        })
        .await
        .unwrap_err();
    match err {
        WireError::Remote(message) => assert_eq!(message, "unknown requestId 42"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_close_stops_accepting() {
    let host = Host::new(ProxyConfig::default());
    let (server, mut events) = HttpServerProxy::new(host.http_server(), Arc::new(NotFoundHandler));
    server
        .listen(ListenOptions::port(0).with_hostname("127.0.0.1"))
        .await
        .unwrap();
    let port = server.address().await.unwrap().unwrap().port;

    server.close().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(HttpServerEvent::Close)));
    assert_eq!(server.address().await.unwrap(), None);

    let refused = reqwest::get(format!("http://127.0.0.1:{port}/")).await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn test_concurrent_listen_binds_once() {
    let host = Host::new(ProxyConfig::default());
    let (server, _events) = HttpServerProxy::new(host.http_server(), Arc::new(NotFoundHandler));

    let (a, b) = tokio::join!(
        server.listen(ListenOptions::port(0).with_hostname("127.0.0.1")),
        server.listen(ListenOptions::port(0).with_hostname("127.0.0.1")),
    );
    assert!(a.is_ok() != b.is_ok(), "exactly one listen succeeds: {a:?} {b:?}");
    let err = a.err().or(b.err()).unwrap();
    assert!(err.to_string().contains("already listening"));

    let port = server.address().await.unwrap().expect("listening").port;
    let response = reqwest::get(format!("http://127.0.0.1:{port}/")).await.unwrap();
    assert_eq!(response.status(), 404);
}
