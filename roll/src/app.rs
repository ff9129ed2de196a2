//! C8 — Application Facade: owns the Router and Hook Pipeline, exposes
//! registration APIs, and hands a connection factory to the external
//! server launcher.
//!
//! Grounded on `original_source/roll/__init__.py::Roll` for the
//! `route`/`listen`/`factory` surface, and the teacher's `tools/hyper_hello`
//! for the minimal bind-and-serve convenience loop this expanded spec adds
//! (SPEC_FULL.md §1).

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::RollError;
use crate::hooks::{self, ErrorListener, HookSet, Listener};
use crate::request::Request;
use crate::response::Response;
use crate::router::{PathVars, Protocol, Router};
use futures::future::BoxFuture;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// A request handler: `(request, response, path_vars) -> Result<(), RollError>`,
/// mutating `response` in place — the Rust analogue of a Python view
/// function receiving `(request, response, **path_vars)` (spec.md §6).
pub trait Handler: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>>;
}

/// Adapts a plain function/closure into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, PathVars) -> BoxFuture<'a, Result<(), RollError>> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>> {
        (self.f)(req, res, vars)
    }
}

/// The Rust analogue of the original's class-based handlers (SPEC_FULL.md
/// §3): one method per HTTP verb, each defaulting to `405 Method Not
/// Allowed` so a view only needs to implement the verbs it supports.
pub trait View: Send + Sync {
    fn on_get<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
    fn on_post<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
    fn on_put<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
    fn on_patch<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
    fn on_delete<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
    fn on_head<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        self.on_get(req, res, vars)
    }
    fn on_options<'a>(&'a self, req: &'a mut Request, res: &'a mut Response, vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
        let _ = (req, res, vars);
        Box::pin(async { Err(RollError::MethodNotAllowed) })
    }
}

/// Methods a [`View`] can be bound under, each dispatching through a fixed
/// vtable method rather than a boxed closure per method.
pub const VIEW_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

struct ViewHandler<V> {
    view: Arc<V>,
    method: &'static str,
}

impl<V: View + 'static> Handler for ViewHandler<V> {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>> {
        match self.method {
            "GET" => self.view.on_get(req, res, vars),
            "POST" => self.view.on_post(req, res, vars),
            "PUT" => self.view.on_put(req, res, vars),
            "PATCH" => self.view.on_patch(req, res, vars),
            "DELETE" => self.view.on_delete(req, res, vars),
            "HEAD" => self.view.on_head(req, res, vars),
            "OPTIONS" => self.view.on_options(req, res, vars),
            _ => unreachable!("VIEW_METHODS is exhaustive"),
        }
    }
}

/// A WebSocket route handler: `(request, websocket, path_vars) ->
/// Result<(), RollError>`, the Rust analogue of
/// `original_source/roll/websocket.py`'s `handler(request, ws, **params)`.
pub trait WebSocketHandler: Send + Sync {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        ws: &'a mut crate::websocket::WebSocketConnection,
        vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>>;
}

/// Adapts a plain function/closure into a [`WebSocketHandler`].
pub struct WebSocketHandlerFn<F> {
    f: F,
}

impl<F> WebSocketHandlerFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> WebSocketHandler for WebSocketHandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut crate::websocket::WebSocketConnection, PathVars) -> BoxFuture<'a, Result<(), RollError>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        ws: &'a mut crate::websocket::WebSocketConnection,
        vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>> {
        (self.f)(req, ws, vars)
    }
}

/// Placeholder occupying a WebSocket route's `GET` slot in `handlers` — the
/// connection state machine always diverts WebSocket routes to
/// `RoutePayload::ws_handler` before a regular `Handler` could ever be
/// reached, so this exists only to satisfy `Router::resolve`'s method check.
struct NullHandler;

impl Handler for NullHandler {
    fn call<'a>(
        &'a self,
        _req: &'a mut Request,
        _res: &'a mut Response,
        _vars: PathVars,
    ) -> BoxFuture<'a, Result<(), RollError>> {
        Box::pin(async { Err(RollError::UpgradeRequired) })
    }
}

/// Extra per-route registration knobs beyond path/method/handler, mirroring
/// spec.md §3's Route payload fields.
#[derive(Default)]
pub struct RouteOptions {
    pub name: Option<String>,
    pub protocol: Protocol,
    pub lazy_body: bool,
    pub subprotocols: Vec<String>,
}

/// Owns the Router and the Hook Pipeline; the single object the external
/// server launcher (`App::serve`) binds to a listening socket, per spec.md
/// §4.8.
pub struct App {
    pub(crate) router: Router,
    pub(crate) hooks: HookSet,
    pub(crate) config: ServerConfig,
    /// Cancelled on shutdown; cloned into every spawned connection task so
    /// an in-flight WebSocket handler can observe cancellation and close
    /// with 1001 (spec.md §5/§4.7).
    pub(crate) shutdown: CancellationToken,
}

impl App {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            router: Router::new(),
            hooks: HookSet::new(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancels every in-flight connection's handler-cancellation signal,
    /// without itself closing the listening socket — callers drive the
    /// actual shutdown sequence (e.g. stop accepting, then call this).
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Registers `handler` under `methods` for `path`, per spec.md §4.4/§4.8.
    pub fn route(
        &mut self,
        path: &str,
        methods: &[&str],
        handler: impl Handler + 'static,
        options: RouteOptions,
    ) {
        let handler = Arc::new(handler);
        for &method in methods {
            self.router.add(path, method, handler.clone(), |payload| {
                payload.name = options.name.clone();
                payload.protocol = options.protocol;
                payload.lazy_body = options.lazy_body;
                payload.subprotocols = options.subprotocols.clone();
            });
        }
    }

    /// Registers a [`View`] under every HTTP verb it may handle, binding
    /// all of `VIEW_METHODS` to dispatch through the view's vtable — a
    /// single object can thus answer multiple HTTP methods the way a
    /// Python class-based view does.
    pub fn route_view<V: View + 'static>(&mut self, path: &str, view: V, options: RouteOptions) {
        let view = Arc::new(view);
        for &method in VIEW_METHODS {
            let handler: Arc<dyn Handler> = Arc::new(ViewHandler {
                view: view.clone(),
                method,
            });
            self.router.add(path, method, handler, |payload| {
                payload.name = options.name.clone();
                payload.protocol = options.protocol;
                payload.lazy_body = options.lazy_body;
                payload.subprotocols = options.subprotocols.clone();
            });
        }
    }

    /// Registers a WebSocket handler under `GET` for `path`, per spec.md
    /// §4.4/§4.7. `subprotocols` lists this route's accepted
    /// `Sec-WebSocket-Protocol` values, in preference order.
    pub fn route_websocket(&mut self, path: &str, handler: impl WebSocketHandler + 'static, subprotocols: Vec<String>) {
        let handler = Arc::new(handler);
        self.router.add(path, "GET", Arc::new(NullHandler), |payload| {
            payload.protocol = Protocol::WebSocket;
            payload.subprotocols = subprotocols;
            payload.ws_handler = Some(handler);
        });
    }

    pub fn listen(&mut self, name: &str, listener: Listener) {
        self.hooks.listen(name, listener);
    }

    pub fn listen_error(&mut self, listener: ErrorListener) {
        self.hooks.listen_error(listener);
    }

    pub fn listen_ws_connect(&mut self, listener: hooks::WsListener) {
        self.hooks.listen_ws_connect(listener);
    }

    pub fn listen_ws_disconnect(&mut self, listener: hooks::WsListener) {
        self.hooks.listen_ws_disconnect(listener);
    }

    pub fn listen_process(&mut self, name: &str, listener: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>) {
        self.hooks.listen_process(name, listener);
    }

    pub fn url_for(&self, name: &str, params: &HashMap<String, String>) -> Result<String, RollError> {
        self.router.url_for(name, params)
    }

    /// Fires the `startup` hook chain, per spec.md §4.8/§6.
    pub async fn startup(&self) {
        self.hooks.fire_process(hooks::STARTUP).await;
    }

    /// Fires the `shutdown` hook chain.
    pub async fn shutdown(&self) {
        self.hooks.fire_process(hooks::SHUTDOWN).await;
    }

    /// Binds a `TcpListener` and serves connections until the process is
    /// interrupted, running `startup`/`shutdown` around the loop. This is
    /// the minimal convenience launcher SPEC_FULL.md §1 adds; production
    /// process/worker supervision remains out of scope (spec.md §1).
    ///
    /// Ctrl-C cancels every in-flight WebSocket handler (spec.md §5) before
    /// this returns; in-flight HTTP responses are left to finish on their
    /// own, since HTTP has no cooperative cancellation point to run.
    pub async fn serve(self: Arc<Self>, addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("roll listening on {}", listener.local_addr()?);
        self.startup().await;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    let app = self.clone();
                    let cancel = self.shutdown.clone();
                    tokio::spawn(async move {
                        let mut connection = Connection::new(app, socket, peer, cancel);
                        if let Err(err) = connection.run().await {
                            log::warn!("connection {peer} ended with error: {err}");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    self.cancel();
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ByteStreamQueue;
    use crate::request::Headers;
    use bytes::Bytes;

    struct Echo;
    impl View for Echo {
        fn on_get<'a>(&'a self, _req: &'a mut Request, res: &'a mut Response, _vars: PathVars) -> BoxFuture<'a, Result<(), RollError>> {
            res.set_body_text("got");
            Box::pin(async { Ok(()) })
        }
    }

    fn request() -> Request {
        Request::new(
            "GET".into(),
            Bytes::from_static(b"/"),
            "/".into(),
            "".into(),
            Headers::new(),
            None,
            Arc::new(ByteStreamQueue::new()),
            false,
        )
    }

    #[tokio::test]
    async fn view_default_method_returns_method_not_allowed() {
        let app = App::new(ServerConfig::default());
        let mut app = app;
        app.route_view("/echo", Echo, RouteOptions::default());
        let m = app.router.resolve("/echo").unwrap();
        let handler = m.payload.handlers.get("POST").unwrap();
        let mut req = request();
        let mut res = Response::new();
        let result = handler.call(&mut req, &mut res, PathVars::new()).await;
        assert!(matches!(result, Err(RollError::MethodNotAllowed)));
    }

    #[tokio::test]
    async fn view_implemented_method_runs() {
        let mut app = App::new(ServerConfig::default());
        app.route_view("/echo", Echo, RouteOptions::default());
        let m = app.router.resolve("/echo").unwrap();
        let handler = m.payload.handlers.get("GET").unwrap();
        let mut req = request();
        let mut res = Response::new();
        handler.call(&mut req, &mut res, PathVars::new()).await.unwrap();
        assert!(matches!(res.body, crate::response::Body::Bytes(_)));
    }
}
