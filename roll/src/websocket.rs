//! C7 — WebSocket Subprotocol: handshake validation, subprotocol
//! negotiation, and hand-off to `fastwebsockets` for frame I/O. The core
//! never hand-rolls WebSocket framing — masking, fragmentation, and
//! ping/pong are entirely `fastwebsockets`' job, the teacher's own choice
//! (`ext/websocket/lib.rs`) even though the teacher only exercises it
//! client-side; `WebSocket::after_handshake` is the same crate's
//! server-side entry point.
//!
//! Handshake and close-code semantics are grounded on
//! `original_source/roll/websocket.py::WSProtocol` and
//! `original_source/roll/websockets.py::WebsocketProtocol`.

use crate::app::App;
use crate::error::RollError;
use crate::hooks;
use crate::request::Request;
use crate::router::RouteMatch;
use base64::Engine;
use bytes::Bytes;
use fastwebsockets::{FragmentCollector, Frame, OpCode, Payload, Role, WebSocket};
use log::warn;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A message read off an established WebSocket, per spec.md §4.7's
/// `ws.recv()` contract.
#[derive(Debug)]
pub enum WebSocketMessage {
    Text(String),
    Binary(Bytes),
    Close(Option<(u16, String)>),
}

/// The live connection handed to a WebSocket route handler in place of a
/// `Response`, wrapping `fastwebsockets`' frame I/O.
pub struct WebSocketConnection {
    inner: FragmentCollector<TcpStream>,
    pub subprotocol: Option<String>,
    closed: bool,
    idle_timeout: Duration,
}

impl WebSocketConnection {
    fn new(socket: TcpStream, subprotocol: Option<String>, idle_timeout: Duration, max_frame_size: usize) -> Self {
        let mut ws = WebSocket::after_handshake(socket, Role::Server);
        // Configured the same way the teacher pre-configures its raw
        // `WebSocket` before wrapping it in a `FragmentCollector`
        // (`ext/websocket/lib.rs`'s `set_writev`/`set_auto_close`/
        // `set_auto_pong` calls) — bounds a reassembled message to
        // `websocket_max_frame_size` (spec.md §4.7).
        ws.set_max_message_size(max_frame_size);
        ws.set_writev(true);
        ws.set_auto_close(true);
        ws.set_auto_pong(true);
        Self {
            inner: FragmentCollector::new(ws),
            subprotocol,
            closed: false,
            idle_timeout,
        }
    }

    /// Reads the next application message, transparently reassembling
    /// fragmented frames and answering pings (`fastwebsockets`' job, not
    /// ours). Idle between frames longer than the configured
    /// `websocket_idle_timeout` closes the connection (spec.md §4.7).
    pub async fn recv(&mut self) -> Result<WebSocketMessage, RollError> {
        loop {
            let frame = match timeout(self.idle_timeout, self.inner.read_frame()).await {
                Ok(result) => result.map_err(|_| RollError::PeerClosed)?,
                Err(_) => return Err(RollError::IdleTimeout),
            };
            match frame.opcode {
                OpCode::Text => {
                    let text = String::from_utf8(frame.payload.to_vec())
                        .map_err(|e| RollError::unhandled(format!("invalid utf-8 text frame: {e}")))?;
                    return Ok(WebSocketMessage::Text(text));
                }
                OpCode::Binary => return Ok(WebSocketMessage::Binary(Bytes::copy_from_slice(&frame.payload))),
                OpCode::Close => {
                    self.closed = true;
                    if frame.payload.len() < 2 {
                        return Ok(WebSocketMessage::Close(None));
                    }
                    let code = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                    let reason = String::from_utf8_lossy(&frame.payload[2..]).into_owned();
                    return Ok(WebSocketMessage::Close(Some((code, reason))));
                }
                // Ping/Pong/Continuation are handled internally by fastwebsockets.
                _ => continue,
            }
        }
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), RollError> {
        self.inner
            .write_frame(Frame::new(true, OpCode::Text, None, Payload::Owned(text.into().into_bytes())))
            .await
            .map_err(|e| RollError::unhandled(format!("websocket write failed: {e}")))
    }

    pub async fn send_binary(&mut self, data: impl Into<Vec<u8>>) -> Result<(), RollError> {
        self.inner
            .write_frame(Frame::new(true, OpCode::Binary, None, Payload::Owned(data.into())))
            .await
            .map_err(|e| RollError::unhandled(format!("websocket write failed: {e}")))
    }

    /// Closes with `code`/`reason`, per spec.md §4.7's close-code table. A
    /// second call after an already-closed socket is a silent no-op — the
    /// handler's cleanup path and the driver's own teardown both call this.
    pub async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.write_frame(Frame::close(code, reason.as_bytes())).await {
            warn!("error closing websocket: {e}");
        }
    }
}

/// Validates the handshake headers and computes `Sec-WebSocket-Accept`, per
/// RFC 6455 §4.2.2 and `original_source/roll/websocket.py::WSProtocol.handshake`.
fn compute_accept(req: &Request) -> Result<String, RollError> {
    let version = req.headers.get("SEC-WEBSOCKET-VERSION");
    if version != Some("13") {
        return Err(RollError::Http(crate::error::HttpError::bad_request(
            "Unsupported Sec-WebSocket-Version; only 13 is supported.",
        )));
    }
    let key = req
        .headers
        .get("SEC-WEBSOCKET-KEY")
        .ok_or_else(|| RollError::Http(crate::error::HttpError::bad_request("Missing Sec-WebSocket-Key.")))?;

    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

/// Picks the first client-preferred subprotocol that the route also
/// declares, per `original_source/roll/websockets.py`'s negotiation loop.
fn negotiate_subprotocol(req: &Request, route: &RouteMatch) -> Option<String> {
    if route.payload.subprotocols.is_empty() {
        return None;
    }
    let offered = req.headers.get("SEC-WEBSOCKET-PROTOCOL")?;
    offered
        .split(',')
        .map(|p| p.trim())
        .find(|p| route.payload.subprotocols.iter().any(|s| s == p))
        .map(|p| p.to_string())
}

/// Performs the handshake, then runs the route's WebSocket handler to
/// completion, translating its outcome into the exact close codes spec.md
/// §4.7 specifies. `cancel` is raced against the handler so that a server
/// shutdown closes the session with 1001 rather than dropping it silently
/// (spec.md §5's cancellation-propagation requirement).
pub async fn handle_upgrade(
    app: &App,
    mut socket: TcpStream,
    req: &mut Request,
    route: &RouteMatch,
    cancel: CancellationToken,
) -> Result<(), RollError> {
    let accept = compute_accept(req)?;
    let subprotocol = negotiate_subprotocol(req, route);

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(proto) = &subprotocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
    }
    response.push_str("\r\n");
    socket
        .write_all(response.as_bytes())
        .await
        .map_err(RollError::unhandled)?;

    let mut ws = WebSocketConnection::new(
        socket,
        subprotocol,
        app.config.websocket_idle_timeout,
        app.config.websocket_max_frame_size,
    );

    let Some(handler) = route.payload.ws_handler.clone() else {
        ws.close(1011, "Handler died prematurely.").await;
        return Err(RollError::unhandled("websocket route missing a handler"));
    };

    hooks::fire_ws_connect_global_then_route(&app.hooks, Some(&route.payload.hooks), req, &mut ws).await;

    let result = tokio::select! {
        res = handler.call(req, &mut ws, route.vars.clone()) => res,
        _ = cancel.cancelled() => Err(RollError::Cancelled),
    };

    match &result {
        Ok(()) => ws.close(1000, "").await,
        Err(RollError::Cancelled) => ws.close(1001, "Handler cancelled.").await,
        Err(RollError::PeerClosed) => ws.close(1002, "Connection closed untimely.").await,
        Err(_) => ws.close(1011, "Handler died prematurely.").await,
    }

    hooks::fire_ws_disconnect_global_then_route(&app.hooks, Some(&route.payload.hooks), req, &mut ws).await;

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Headers;
    use bytes::Bytes as RawBytes;

    fn request_with_headers(pairs: &[(&str, &str)]) -> Request {
        let mut headers = Headers::new();
        for (k, v) in pairs {
            headers.push(k.to_ascii_uppercase().as_bytes(), v);
        }
        Request::new(
            "GET".into(),
            RawBytes::from_static(b"/ws"),
            "/ws".into(),
            "".into(),
            headers,
            Some("websocket".into()),
            std::sync::Arc::new(crate::body::ByteStreamQueue::new()),
            true,
        )
    }

    #[test]
    fn accept_key_matches_rfc6455_example() {
        let req = request_with_headers(&[
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ]);
        let accept = compute_accept(&req).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_unsupported_version() {
        let req = request_with_headers(&[
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "7"),
        ]);
        assert!(compute_accept(&req).is_err());
    }
}
