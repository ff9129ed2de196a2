//! WebSocket demo, grounded on
//! `original_source/examples/websocket/__main__.py`: a `/chat` route that
//! greets the connecting client, then echoes back every message it
//! receives until the peer closes the connection.
//!
//! The original broadcasts each message to every other open socket via an
//! `app.websockets` registry; that registry has no counterpart here, so
//! this demo echoes to the sender instead.

use futures::future::BoxFuture;
use roll::{App, PathVars, RollError, ServerConfig, WebSocketConnection, WebSocketHandlerFn, WebSocketMessage};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Forces the closure below to be inferred against the exact higher-ranked
/// signature `WebSocketHandlerFn` requires, since closures otherwise infer
/// independent lifetimes per argument.
fn ws_handler<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut roll::Request, &'a mut WebSocketConnection, PathVars) -> BoxFuture<'a, Result<(), RollError>>,
{
    f
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    roll::init_default();

    let mut app = App::new(ServerConfig::default());

    app.route_websocket(
        "/chat",
        WebSocketHandlerFn::new(ws_handler(|_req, ws: &mut WebSocketConnection, _vars| {
            Box::pin(async move {
                let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
                ws.send_text(format!("Welcome {id}!")).await?;

                loop {
                    match ws.recv().await {
                        Ok(WebSocketMessage::Text(text)) => {
                            ws.send_text(format!("{id}: {text}")).await?;
                        }
                        Ok(WebSocketMessage::Binary(data)) => {
                            ws.send_binary(data.to_vec()).await?;
                        }
                        Ok(WebSocketMessage::Close(_)) => return Ok(()),
                        Err(RollError::PeerClosed) => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
            }) as BoxFuture<'_, Result<(), RollError>>
        })),
        Vec::new(),
    );

    std::sync::Arc::new(app).serve("127.0.0.1:3579").await
}
