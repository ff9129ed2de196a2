//! C5 — Hook Pipeline: named ordered listener lists with short-circuit
//! semantics, shared between the application-wide pipeline and each route's
//! per-route pipeline (spec.md §4.5).
//!
//! Grounded on `original_source/roll/__init__.py::Roll.hook`/`listen` for
//! the `listen(name, func)` / `hook(name, *args)` shape, and spec.md §9's
//! explicit guidance: "model hooks as `Vec<BoxedAsyncFn>` per event name in
//! a `HashMap<&'static str, Vec<...>>`".

use crate::error::RollError;
use crate::request::Request;
use crate::response::Response;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// The uniform signature supported for hook listeners: mutate the request
/// and/or response, optionally signaling short-circuit by returning `true`.
/// Covers `headers`, `request`, `response`, and any user-defined event —
/// spec.md §9 notes a systems port need not replicate the source's fully
/// dynamic per-event argument lists.
pub type Listener = Arc<dyn for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, Result<bool, RollError>> + Send + Sync>;

/// `error` hooks receive the triggering error as a third argument and
/// cannot themselves short-circuit (spec.md §4.5).
pub type ErrorListener = Arc<dyn for<'a> Fn(&'a mut Request, &'a mut Response, &'a RollError) -> BoxFuture<'a, ()> + Send + Sync>;

/// `websocket_connect`/`websocket_disconnect` hooks receive the live
/// connection instead of a `Response` under construction, per spec.md §4.7.
pub type WsListener =
    Arc<dyn for<'a> Fn(&'a mut Request, &'a mut crate::websocket::WebSocketConnection) -> BoxFuture<'a, ()> + Send + Sync>;

pub const STARTUP: &str = "startup";
pub const SHUTDOWN: &str = "shutdown";
pub const HEADERS: &str = "headers";
pub const REQUEST: &str = "request";
pub const RESPONSE: &str = "response";
pub const WEBSOCKET_CONNECT: &str = "websocket_connect";
pub const WEBSOCKET_DISCONNECT: &str = "websocket_disconnect";

/// One named, ordered set of listeners. Append-only after registration,
/// iterated (never mutated) at request time, per spec.md §3's Lifecycle.
#[derive(Default)]
pub struct HookSet {
    listeners: HashMap<String, Vec<Listener>>,
    error_listeners: Vec<ErrorListener>,
    process_listeners: HashMap<String, Vec<Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>>>,
    ws_connect_listeners: Vec<WsListener>,
    ws_disconnect_listeners: Vec<WsListener>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&mut self, name: &str, listener: Listener) {
        self.listeners.entry(name.to_string()).or_default().push(listener);
    }

    pub fn listen_error(&mut self, listener: ErrorListener) {
        self.error_listeners.push(listener);
    }

    pub fn listen_process(&mut self, name: &str, listener: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>) {
        self.process_listeners.entry(name.to_string()).or_default().push(listener);
    }

    pub fn listen_ws_connect(&mut self, listener: WsListener) {
        self.ws_connect_listeners.push(listener);
    }

    pub fn listen_ws_disconnect(&mut self, listener: WsListener) {
        self.ws_disconnect_listeners.push(listener);
    }

    /// Awaits listeners for `name` in registration order. The first
    /// listener returning `true` short-circuits and further listeners do
    /// not run; the overall return is that short-circuit flag.
    pub async fn fire(&self, name: &str, req: &mut Request, res: &mut Response) -> Result<bool, RollError> {
        let Some(listeners) = self.listeners.get(name) else {
            return Ok(false);
        };
        for listener in listeners {
            if listener(req, res).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fires the `error` hook chain. Per spec.md §4.5, an exception raised
    /// by an error listener itself degrades to a plain 500 — callers are
    /// responsible for catching failures from listeners if they choose to
    /// make one fallible; this uniform signature does not allow it,
    /// matching the "error hooks cannot themselves short-circuit" rule.
    pub async fn fire_error(&self, req: &mut Request, res: &mut Response, error: &RollError) {
        for listener in &self.error_listeners {
            listener(req, res, error).await;
        }
    }

    pub async fn fire_process(&self, name: &str) {
        if let Some(listeners) = self.process_listeners.get(name) {
            for listener in listeners {
                listener().await;
            }
        }
    }

    pub async fn fire_ws_connect(&self, req: &mut Request, ws: &mut crate::websocket::WebSocketConnection) {
        for listener in &self.ws_connect_listeners {
            listener(req, ws).await;
        }
    }

    pub async fn fire_ws_disconnect(&self, req: &mut Request, ws: &mut crate::websocket::WebSocketConnection) {
        for listener in &self.ws_disconnect_listeners {
            listener(req, ws).await;
        }
    }
}

/// Runs global `websocket_connect`/`websocket_disconnect` listeners before
/// per-route ones, mirroring [`fire_global_then_route`].
pub async fn fire_ws_connect_global_then_route(
    global: &HookSet,
    route: Option<&HookSet>,
    req: &mut Request,
    ws: &mut crate::websocket::WebSocketConnection,
) {
    global.fire_ws_connect(req, ws).await;
    if let Some(route) = route {
        route.fire_ws_connect(req, ws).await;
    }
}

pub async fn fire_ws_disconnect_global_then_route(
    global: &HookSet,
    route: Option<&HookSet>,
    req: &mut Request,
    ws: &mut crate::websocket::WebSocketConnection,
) {
    global.fire_ws_disconnect(req, ws).await;
    if let Some(route) = route {
        route.fire_ws_disconnect(req, ws).await;
    }
}

/// Runs global hooks before per-route hooks of the same name, both in
/// registration order, per spec.md §4.5: "Global hooks run before
/// per-route hooks of the same name".
pub async fn fire_global_then_route(
    name: &str,
    global: &HookSet,
    route: Option<&HookSet>,
    req: &mut Request,
    res: &mut Response,
) -> Result<bool, RollError> {
    if global.fire(name, req, res).await? {
        return Ok(true);
    }
    if let Some(route) = route {
        if route.fire(name, req, res).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ByteStreamQueue;
    use crate::request::Headers;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_request() -> Request {
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
    async fn listeners_run_in_registration_order_until_short_circuit() {
        let mut hooks = HookSet::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        hooks.listen(
            REQUEST,
            Arc::new(move |_req, _res| {
                o1.lock().unwrap().push(1);
                Box::pin(async { Ok(false) })
            }),
        );
        let o2 = order.clone();
        hooks.listen(
            REQUEST,
            Arc::new(move |_req, _res| {
                o2.lock().unwrap().push(2);
                Box::pin(async { Ok(true) })
            }),
        );
        let o3 = order.clone();
        hooks.listen(
            REQUEST,
            Arc::new(move |_req, _res| {
                o3.lock().unwrap().push(3);
                Box::pin(async { Ok(false) })
            }),
        );

        let mut req = empty_request();
        let mut res = Response::new();
        let short_circuited = hooks.fire(REQUEST, &mut req, &mut res).await.unwrap();

        assert!(short_circuited);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn global_hooks_run_before_route_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut global = HookSet::new();
        let mut route = HookSet::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        global.listen(
            HEADERS,
            Arc::new(move |_req, _res| {
                o1.lock().unwrap().push("global");
                Box::pin(async { Ok(false) })
            }),
        );
        let o2 = order.clone();
        route.listen(
            HEADERS,
            Arc::new(move |_req, _res| {
                o2.lock().unwrap().push("route");
                Box::pin(async { Ok(false) })
            }),
        );

        let mut req = empty_request();
        let mut res = Response::new();
        fire_global_then_route(HEADERS, &global, Some(&route), &mut req, &mut res)
            .await
            .unwrap();
        calls.fetch_add(1, Ordering::SeqCst);

        assert_eq!(*order.lock().unwrap(), vec!["global", "route"]);
    }
}
