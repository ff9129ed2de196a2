//! WebSocket echo scenario, driven over a real socket with hand-rolled
//! RFC 6455 framing (client frames must be masked; the server's aren't).

use futures::future::BoxFuture;
use roll::{App, PathVars, RollError, ServerConfig, WebSocketConnection, WebSocketHandlerFn, WebSocketMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Forces the closure below to be inferred against the exact higher-ranked
/// signature `WebSocketHandlerFn` requires, since closures otherwise infer
/// independent lifetimes per argument.
fn ws_handler<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut roll::Request, &'a mut WebSocketConnection, PathVars) -> BoxFuture<'a, Result<(), RollError>>,
{
    f
}

fn client_text_frame(payload: &[u8]) -> Vec<u8> {
    let mask = [0x12u8, 0x34, 0x56, 0x78];
    let mut frame = vec![0x81, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    for (i, byte) in payload.iter().enumerate() {
        frame.push(byte ^ mask[i % 4]);
    }
    frame
}

async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.expect("frame head");
    let opcode = head[0] & 0x0f;
    let len = (head[1] & 0x7f) as usize;
    assert!(len < 126, "test only handles short payloads");
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.expect("frame payload");
    }
    (opcode, payload)
}

#[tokio::test]
async fn websocket_echoes_a_text_frame_then_closes() {
    let mut app = App::new(ServerConfig::default());
    app.route_websocket(
        "/echo",
        WebSocketHandlerFn::new(ws_handler(|_req, ws: &mut WebSocketConnection, _vars| {
            Box::pin(async move {
                match ws.recv().await? {
                    WebSocketMessage::Text(text) => ws.send_text(text).await,
                    _ => Ok(()),
                }
            }) as BoxFuture<'_, Result<(), RollError>>
        })),
        Vec::new(),
    );

    let app = Arc::new(app);
    tokio::spawn(async move {
        let _ = app.serve(("127.0.0.1", 33005)).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", 33005)).await.expect("connect");
    let handshake = "GET /echo HTTP/1.1\r\n\
Host: x\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";
    stream.write_all(handshake.as_bytes()).await.expect("write handshake");

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("handshake response timeout")
        .expect("read handshake response");
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 101"), "expected 101, got: {response}");
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    stream.write_all(&client_text_frame(b"ping")).await.expect("write text frame");

    let (opcode, payload) = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
        .await
        .expect("echo frame timeout");
    assert_eq!(opcode, 0x1, "expected a text frame");
    assert_eq!(&payload, b"ping");

    let (opcode, payload) = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
        .await
        .expect("close frame timeout");
    assert_eq!(opcode, 0x8, "expected a close frame");
    assert!(payload.len() >= 2);
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    assert_eq!(code, 1000);
}
