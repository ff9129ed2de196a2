//! C6 — Connection Protocol State Machine: the per-connection asynchronous
//! driver gluing the parser (C2), the Request/Response model (C3), the
//! router (C4) and hook pipeline (C5), and handing off to the WebSocket
//! subprotocol (C7) on upgrade.
//!
//! Grounded on `original_source/roll/protocols.py::HttpProtocol` for the
//! per-request algorithm (§4.6) and `original_source/roll/socket.py` for
//! the read-loop/backpressure shape: once a route has matched and the body
//! is still arriving, the socket-read loop and the handler run
//! concurrently, with [`crate::body::ByteStreamQueue`]'s bound arbitrating
//! how fast the socket gets read (§4.6/§4.1).

use crate::app::App;
use crate::body::ByteStreamQueue;
use crate::error::RollError;
use crate::hooks;
use crate::parser::{HttpParser, ParserSink};
use crate::request::{decode_latin1, Headers, Request};
use crate::response::{Body, Response};
use crate::router::{Protocol, RouteMatch};
use crate::websocket;
use bytes::{Bytes, BytesMut};
use log::warn;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Collects parser events synchronously (spec.md §5: "parser callbacks...
/// MUST NOT suspend") for the connection driver to act on once `feed()`
/// returns.
#[derive(Default)]
struct RequestSink {
    url: Vec<u8>,
    headers: Headers,
    upgrade: Option<String>,
    headers_complete: bool,
    message_complete: bool,
    upgrade_requested: bool,
    body_chunks: Vec<Bytes>,
}

impl ParserSink for RequestSink {
    fn on_url(&mut self, url: &[u8]) {
        self.url = url.to_vec();
    }

    fn on_header(&mut self, name: &[u8], value: &[u8]) {
        let decoded = decode_latin1(value);
        if name == b"UPGRADE" {
            self.upgrade = Some(decoded.to_ascii_lowercase());
        }
        self.headers.push(name, &decoded);
    }

    fn on_headers_complete(&mut self) {
        self.headers_complete = true;
    }

    fn on_body(&mut self, chunk: &[u8]) {
        self.body_chunks.push(Bytes::copy_from_slice(chunk));
    }

    fn on_message_complete(&mut self) {
        self.message_complete = true;
    }

    fn on_upgrade(&mut self) {
        self.upgrade_requested = true;
    }
}

enum Resolution {
    Matched(RouteMatch),
    NotFound,
    MethodNotAllowed,
}

fn resolve(app: &App, path: &str, method: &str) -> Resolution {
    match app.router.resolve(path) {
        None => Resolution::NotFound,
        Some(m) => {
            if m.payload.handlers.contains_key(method) {
                Resolution::Matched(m)
            } else {
                Resolution::MethodNotAllowed
            }
        }
    }
}

/// What became of a message once its headers finished parsing.
enum HeadersOutcome {
    /// A route matched and the `headers` hook did not short-circuit;
    /// dispatch proceeds once the body (if any) finishes arriving.
    Proceed {
        request: Request,
        route: Option<RouteMatch>,
    },
    /// No route, a method mismatch, a protocol mismatch, or a `headers`-hook
    /// short-circuit — the response is already fully decided. Any remaining
    /// body bytes still on the wire are drained (not buffered) so the
    /// parser's framing stays correct for keep-alive reuse.
    EarlyResponse { request: Request, response: Response },
    /// A WebSocket upgrade request matched a WebSocket route and passed the
    /// `headers` hook.
    Upgrade { request: Request, route: RouteMatch },
}

enum Outcome {
    KeepAlive,
    Close,
    Upgraded,
}

/// Per-connection driver. One instance per accepted socket; lives for the
/// connection's full keep-alive lifetime (spec.md §3's Lifecycle: "Connection
/// state: created on accept, destroyed on close").
pub struct Connection {
    app: Arc<App>,
    /// `None` once the connection has handed its socket off to a
    /// [`websocket::WebSocketConnection`] — `run()` returns immediately
    /// after that, so no call site ever observes it empty.
    socket: Option<TcpStream>,
    #[allow(dead_code)]
    peer: SocketAddr,
    parser: HttpParser,
    read_buf: BytesMut,
    /// Cancelled on server shutdown; handed to [`websocket::handle_upgrade`]
    /// so an in-flight WebSocket handler can close with 1001 instead of
    /// being silently dropped (spec.md §5/§4.7).
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(app: Arc<App>, socket: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> Self {
        let max_header_bytes = app.config.max_header_bytes;
        Self {
            app,
            socket: Some(socket),
            peer,
            parser: HttpParser::new(max_header_bytes),
            read_buf: BytesMut::new(),
            cancel,
        }
    }

    fn socket(&mut self) -> &mut TcpStream {
        self.socket.as_mut().expect("connection socket used after websocket upgrade")
    }

    /// Drives the connection, message after message, until the socket
    /// closes or a non-keep-alive response is written. Pipelining is not
    /// supported beyond carrying a single leftover read across messages
    /// (spec.md §5).
    pub async fn run(&mut self) -> Result<(), RollError> {
        loop {
            match self.serve_one().await? {
                None | Some(Outcome::Close) | Some(Outcome::Upgraded) => return Ok(()),
                Some(Outcome::KeepAlive) => continue,
            }
        }
    }

    /// Reads and parses up to the point where either the whole message is
    /// complete or a route has matched and a body is still incoming — at
    /// which point control hands off to [`Self::pump_body_and_dispatch`] so
    /// the rest of the body streams in concurrently with the handler
    /// instead of being buffered in full first (spec.md §4.6).
    async fn serve_one(&mut self) -> Result<Option<Outcome>, RollError> {
        let mut sink = RequestSink::default();
        let mut headers_result: Option<HeadersOutcome> = None;

        let mut leading = std::mem::take(&mut self.read_buf);
        let mut awaiting_first_byte = leading.is_empty();

        loop {
            if leading.is_empty() {
                let mut chunk = vec![0u8; self.app.config.io_buffer_size];
                let n = if awaiting_first_byte {
                    match timeout(self.app.config.idle_timeout, self.socket().read(&mut chunk)).await {
                        Ok(result) => result.map_err(RollError::unhandled)?,
                        Err(_) => {
                            self.write_simple_error(RollError::IdleTimeout).await?;
                            return Ok(None);
                        }
                    }
                } else {
                    self.socket().read(&mut chunk).await.map_err(RollError::unhandled)?
                };
                if n == 0 {
                    return Ok(None);
                }
                awaiting_first_byte = false;
                leading = BytesMut::from(&chunk[..n]);
            }

            let feed_result = self.parser.feed(&leading, &mut sink);
            let leftover = match feed_result {
                Ok(l) => l,
                Err(parse_err) => {
                    let err = RollError::from(parse_err);
                    match headers_result {
                        Some(HeadersOutcome::Proceed { mut request, route }) => {
                            self.respond_with_error(&mut request, route.as_ref(), err).await?;
                        }
                        _ => {
                            self.write_simple_error(err).await?;
                        }
                    }
                    return Ok(Some(Outcome::Close));
                }
            };

            if sink.headers_complete && headers_result.is_none() {
                headers_result = Some(self.on_headers_complete(&mut sink).await?);
            }

            match &mut headers_result {
                Some(HeadersOutcome::Proceed { request, .. }) => {
                    for chunk in sink.body_chunks.drain(..) {
                        request.push_body_chunk(chunk).await;
                    }
                }
                _ => sink.body_chunks.clear(),
            }

            if sink.message_complete {
                if let Some(HeadersOutcome::Proceed { request, .. }) = &mut headers_result {
                    request.end_body().await;
                }
                self.read_buf = leftover;
                break;
            }

            if matches!(&headers_result, Some(HeadersOutcome::Proceed { .. })) {
                let Some(HeadersOutcome::Proceed { request, route }) = headers_result.take() else {
                    unreachable!("just matched Proceed above");
                };
                return self.pump_body_and_dispatch(sink, leftover, request, route).await.map(Some);
            }

            leading = BytesMut::new();
        }

        match headers_result {
            None => Ok(None),
            Some(HeadersOutcome::Upgrade { mut request, route }) => {
                let socket = self.socket.take().expect("connection socket used after websocket upgrade");
                websocket::handle_upgrade(&self.app, socket, &mut request, &route, self.cancel.clone()).await?;
                Ok(Some(Outcome::Upgraded))
            }
            Some(HeadersOutcome::EarlyResponse { request, response }) => {
                self.write_response(&request, response).await?;
                let keep_alive = self.parser.should_keep_alive();
                self.parser.reset();
                Ok(Some(if keep_alive { Outcome::KeepAlive } else { Outcome::Close }))
            }
            Some(HeadersOutcome::Proceed { mut request, route }) => {
                // The whole body arrived within the initial read(s) already
                // — nothing left to stream concurrently.
                let outcome = self.dispatch(&mut request, route.as_ref()).await?;
                self.parser.reset();
                Ok(Some(outcome))
            }
        }
    }

    /// Resolves the route, runs the `headers` hook, and decides how this
    /// message will end — steps 1-3 of spec.md §4.6's per-request algorithm.
    /// The `headers` hook MUST NOT access `request.body`: at this point the
    /// body has not necessarily arrived yet.
    async fn on_headers_complete(&self, sink: &mut RequestSink) -> Result<HeadersOutcome, RollError> {
        let method = String::from_utf8_lossy(self.parser.get_method()).to_ascii_uppercase();
        let url = Bytes::from(std::mem::take(&mut sink.url));
        let (path, query_string) = split_path_query(&url);
        let upgrade = sink.upgrade.clone();
        let headers = std::mem::take(&mut sink.headers);

        let resolution = resolve(&self.app, &path, &method);
        let lazy_body = matches!(&resolution, Resolution::Matched(m) if m.payload.lazy_body);

        let mut request = Request::new(
            method,
            url,
            path.clone(),
            query_string,
            headers,
            upgrade.clone(),
            Arc::new(ByteStreamQueue::bounded(self.app.config.io_buffer_size)),
            lazy_body,
        );

        match resolution {
            Resolution::NotFound => Ok(self.early_error(request, RollError::RouteNotFound(path)).await),
            Resolution::MethodNotAllowed => Ok(self.early_error(request, RollError::MethodNotAllowed).await),
            Resolution::Matched(m) => {
                let wants_upgrade = upgrade.as_deref() == Some("websocket") && sink.upgrade_requested;
                let route_is_ws = m.payload.protocol == Protocol::WebSocket;
                request.route = Some(m.clone());

                if route_is_ws && !wants_upgrade {
                    return Ok(self.early_error(request, RollError::UpgradeRequired).await);
                }
                if wants_upgrade && !route_is_ws {
                    return Ok(self.early_error(request, RollError::UpgradeNotImplemented).await);
                }

                let route_hooks = Some(&m.payload.hooks);
                let mut scratch = Response::new();
                let short =
                    hooks::fire_global_then_route(hooks::HEADERS, &self.app.hooks, route_hooks, &mut request, &mut scratch)
                        .await?;
                if short {
                    return Ok(HeadersOutcome::EarlyResponse {
                        request,
                        response: scratch,
                    });
                }

                if wants_upgrade {
                    Ok(HeadersOutcome::Upgrade { request, route: m })
                } else {
                    Ok(HeadersOutcome::Proceed {
                        request,
                        route: Some(m),
                    })
                }
            }
        }
    }

    async fn early_error(&self, mut request: Request, err: RollError) -> HeadersOutcome {
        let mut response = Response::new();
        apply_error_to_response(&mut response, &err);
        self.app.hooks.fire_error(&mut request, &mut response, &err).await;
        HeadersOutcome::EarlyResponse { request, response }
    }

    /// Runs the `request` hook, the handler, the `response` hook, and writes
    /// the serialized response — steps 4-9 of spec.md §4.6's per-request
    /// algorithm, for the case where the body had already fully arrived by
    /// the time headers finished parsing.
    async fn dispatch(&mut self, request: &mut Request, route: Option<&RouteMatch>) -> Result<Outcome, RollError> {
        if !request.is_lazy_body() {
            request.load_body().await;
        }
        let res = run_handler(&self.app, request, route).await;
        let keep_alive = self.parser.should_keep_alive();
        self.write_response(request, res).await?;
        Ok(if keep_alive { Outcome::KeepAlive } else { Outcome::Close })
    }

    /// Streams the remainder of the body off the socket while the handler
    /// consumes it from the queue, joining the two so that a handler
    /// blocked on `next_body_chunk()`/`load_body()` is what paces the
    /// socket reads (spec.md §1/§4.6's backpressure requirement). The pump
    /// future touches only `self`/`sink`/the queue handle; the handler
    /// future touches only `request`/`route`/a cloned `Arc<App>` — disjoint
    /// captures, so the two can be polled concurrently via `tokio::join!`
    /// without conflicting borrows of `self` or `request`.
    async fn pump_body_and_dispatch(
        &mut self,
        mut sink: RequestSink,
        mut leading: BytesMut,
        mut request: Request,
        route: Option<RouteMatch>,
    ) -> Result<Outcome, RollError> {
        let queue = request.body_queue_handle();
        let app = self.app.clone();
        let io_buffer_size = app.config.io_buffer_size;
        let lazy_body = request.is_lazy_body();

        let pump = async {
            let result = loop {
                if leading.is_empty() {
                    let mut chunk = vec![0u8; io_buffer_size];
                    let n = match self.socket().read(&mut chunk).await {
                        Ok(n) => n,
                        Err(e) => break Err(RollError::unhandled(e)),
                    };
                    if n == 0 {
                        break Err(RollError::PeerClosed);
                    }
                    leading = BytesMut::from(&chunk[..n]);
                }

                match self.parser.feed(&leading, &mut sink) {
                    Ok(leftover) => {
                        for chunk in sink.body_chunks.drain(..) {
                            queue.put(chunk).await;
                        }
                        if sink.message_complete {
                            break Ok(leftover);
                        }
                        leading = BytesMut::new();
                    }
                    Err(parse_err) => break Err(RollError::from(parse_err)),
                }
            };
            // Unblock a handler parked in `next_body_chunk()`/`load_body()`
            // regardless of how the pump exited, or the join below never
            // completes.
            queue.end().await;
            result
        };

        let handler = async {
            if !lazy_body {
                request.load_body().await;
            }
            run_handler(&app, &mut request, route.as_ref()).await
        };

        let (pump_result, response) = tokio::join!(pump, handler);

        match pump_result {
            Ok(leftover) => {
                self.read_buf = leftover;
                let keep_alive = self.parser.should_keep_alive();
                self.parser.reset();
                self.write_response(&request, response).await?;
                Ok(if keep_alive { Outcome::KeepAlive } else { Outcome::Close })
            }
            Err(err) => {
                // The body never finished arriving; discard whatever the
                // handler produced off a truncated body and report the
                // transport error instead.
                self.parser.reset();
                self.respond_with_error(&mut request, route.as_ref(), err).await?;
                Ok(Outcome::Close)
            }
        }
    }

    async fn respond_with_error(
        &mut self,
        request: &mut Request,
        route: Option<&RouteMatch>,
        err: RollError,
    ) -> Result<(), RollError> {
        let mut response = Response::new();
        apply_error_to_response(&mut response, &err);
        self.app.hooks.fire_error(request, &mut response, &err).await;
        if let Some(route) = route {
            route.payload.hooks.fire_error(request, &mut response, &err).await;
        }
        self.write_response(request, response).await
    }

    async fn write_simple_error(&mut self, err: RollError) -> Result<(), RollError> {
        let status = err.status();
        let body = err.body_message();
        let line = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            body.len(),
            body
        );
        let _ = self.socket().write_all(line.as_bytes()).await;
        let _ = self.socket().shutdown().await;
        Ok(())
    }

    /// Serializes and writes `res`, per spec.md §4.6's response
    /// serialization rules: status line, then `Set-Cookie` headers, then
    /// remaining headers in insertion order, then the bodyless / chunked /
    /// fixed-length body framing.
    async fn write_response(&mut self, req: &Request, res: Response) -> Result<(), RollError> {
        let mut out = BytesMut::new();
        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                res.status.as_u16(),
                res.status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );

        for value in res.cookies.to_header_values() {
            out.extend_from_slice(format!("Set-Cookie: {value}\r\n").as_bytes());
        }
        for (name, value) in res.headers() {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        if res.is_bodyless(&req.method) {
            out.extend_from_slice(b"\r\n");
            self.socket().write_all(&out).await.map_err(RollError::unhandled)?;
            return Ok(());
        }

        let has_content_length = res.has_header("Content-Length");
        let has_transfer_encoding = res.has_header("Transfer-Encoding");

        match res.body {
            Body::Empty => {
                if !has_content_length {
                    out.extend_from_slice(b"Content-Length: 0\r\n");
                }
                out.extend_from_slice(b"\r\n");
                self.socket().write_all(&out).await.map_err(RollError::unhandled)?;
            }
            Body::Bytes(bytes) => {
                if !has_content_length {
                    out.extend_from_slice(format!("Content-Length: {}\r\n", bytes.len()).as_bytes());
                }
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&bytes);
                self.socket().write_all(&out).await.map_err(RollError::unhandled)?;
            }
            Body::Stream(stream) => {
                if !has_transfer_encoding {
                    out.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
                }
                out.extend_from_slice(b"\r\n");
                self.socket().write_all(&out).await.map_err(RollError::unhandled)?;
                self.write_chunked_body(stream).await?;
            }
        }
        Ok(())
    }

    async fn write_chunked_body(
        &mut self,
        mut stream: futures::stream::BoxStream<'static, Result<Bytes, crate::error::HttpError>>,
    ) -> Result<(), RollError> {
        use futures::StreamExt;
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(RollError::Http)?;
            if chunk.is_empty() {
                continue;
            }
            let mut framed = BytesMut::new();
            framed.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            framed.extend_from_slice(&chunk);
            framed.extend_from_slice(b"\r\n");
            self.socket().write_all(&framed).await.map_err(RollError::unhandled)?;
        }
        self.socket().write_all(b"0\r\n\r\n").await.map_err(RollError::unhandled)?;
        Ok(())
    }
}

/// Runs the `request` hook, the handler, and the `response` hook — steps
/// 4-8 of spec.md §4.6's per-request algorithm. Deliberately takes no
/// `&mut Connection`/socket access so it can run concurrently with the body
/// pump in [`Connection::pump_body_and_dispatch`]; the caller writes the
/// returned response once both futures finish.
async fn run_handler(app: &App, request: &mut Request, route: Option<&RouteMatch>) -> Response {
    let mut res = Response::new();
    let global = &app.hooks;
    let route_hooks = route.map(|r| &r.payload.hooks);

    let result: Result<(), RollError> = async {
        let short = hooks::fire_global_then_route(hooks::REQUEST, global, route_hooks, request, &mut res).await?;
        if short {
            return Ok(());
        }
        let route = route.ok_or_else(|| RollError::RouteNotFound(request.path.clone()))?;
        let handler = route
            .payload
            .handlers
            .get(&request.method)
            .ok_or(RollError::MethodNotAllowed)?;
        handler.call(request, &mut res, route.vars.clone()).await
    }
    .await;

    if let Err(err) = &result {
        apply_error_to_response(&mut res, err);
        app.hooks.fire_error(request, &mut res, err).await;
        if let Some(route) = route {
            route.payload.hooks.fire_error(request, &mut res, err).await;
        }
    }

    if let Err(err) = hooks::fire_global_then_route(hooks::RESPONSE, global, route_hooks, request, &mut res).await {
        warn!("response hook failed: {err}");
    }

    res
}

pub(crate) fn apply_error_to_response(res: &mut Response, err: &RollError) {
    let _ = res.set_status(err.status().as_u16());
    res.set_body_text(err.body_message());
}

fn split_path_query(url: &Bytes) -> (String, String) {
    let raw = String::from_utf8_lossy(url);
    match raw.split_once('?') {
        Some((path, query)) => (percent_decode(path), query.to_string()),
        None => (percent_decode(&raw), String::new()),
    }
}

fn percent_decode(path: &str) -> String {
    percent_encoding::percent_decode_str(path).decode_utf8_lossy().into_owned()
}
