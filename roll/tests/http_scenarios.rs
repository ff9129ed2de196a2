//! End-to-end scenarios driven over a real socket against a spawned
//! [`roll::App`], covering the wire-level behavior `testing::request_with`
//! can't exercise (exact response framing, chunked encoding).

use futures::future::BoxFuture;
use roll::{App, HandlerFn, RollError, RouteOptions, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn spawn(app: App, port: u16) {
    let app = Arc::new(app);
    tokio::spawn(async move {
        let _ = app.serve(("127.0.0.1", port)).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn send_and_read(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write request");
    stream.shutdown().await.ok();

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn simple_get_returns_exact_response() {
    let mut app = App::new(ServerConfig::default());
    app.route(
        "/hello",
        &["GET"],
        HandlerFn::new(|_req, res, _vars| {
            res.set_body_text("ok");
            Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), RollError>>
        }),
        RouteOptions::default(),
    );
    spawn(app, 33001).await;

    let response = send_and_read(33001, "GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
}

#[tokio::test]
async fn path_variable_is_extracted() {
    let mut app = App::new(ServerConfig::default());
    app.route(
        "/item/{id:int}",
        &["GET"],
        HandlerFn::new(|_req, res, vars| {
            let id = vars.get("id").cloned().unwrap_or_default();
            res.set_body_text(id);
            Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), RollError>>
        }),
        RouteOptions::default(),
    );
    spawn(app, 33002).await;

    let response = send_and_read(33002, "GET /item/42 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response, "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n42");
}

#[tokio::test]
async fn unregistered_method_is_405() {
    let mut app = App::new(ServerConfig::default());
    app.route(
        "/submit",
        &["POST"],
        HandlerFn::new(|_req, res, _vars| {
            res.set_body_text("submitted");
            Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), RollError>>
        }),
        RouteOptions::default(),
    );
    spawn(app, 33003).await;

    let response = send_and_read(33003, "GET /submit HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405"), "expected 405, got: {response}");
}

#[tokio::test]
async fn chunked_stream_matches_exact_framing() {
    let mut app = App::new(ServerConfig::default());
    app.route(
        "/stream",
        &["GET"],
        HandlerFn::new(|_req, res, _vars| {
            let chunks = vec![Ok(bytes::Bytes::from_static(b"ab")), Ok(bytes::Bytes::from_static(b"cd")), Ok(bytes::Bytes::from_static(b"ef"))];
            res.set_body_stream(Box::pin(futures::stream::iter(chunks)));
            Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), RollError>>
        }),
        RouteOptions::default(),
    );
    spawn(app, 33004).await;

    let response = send_and_read(33004, "GET /stream HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;
    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nab\r\n2\r\ncd\r\n2\r\nef\r\n0\r\n\r\n"
    );
}
