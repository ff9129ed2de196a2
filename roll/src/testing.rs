//! Testing harness: drive requests through an [`App`]'s router and hook
//! pipeline without a socket, mirroring
//! `original_source/roll/testing.py`'s `req` fixture (`app.respond(req)`
//! called directly against a hand-built `Request`).

use crate::app::App;
use crate::body::ByteStreamQueue;
use crate::connection::apply_error_to_response;
use crate::error::RollError;
use crate::hooks;
use crate::request::{Headers, Request};
use crate::response::Response;
use bytes::Bytes;
use std::sync::Arc;

/// Runs a bodyless `method path` request through `app`, returning the
/// resulting [`Response`].
pub async fn request(app: &App, method: &str, path: &str) -> Response {
    request_with(app, method, path, Headers::new(), Bytes::new()).await
}

/// Like [`request`], with a request body.
pub async fn request_with_body(app: &App, method: &str, path: &str, body: impl Into<Bytes>) -> Response {
    request_with(app, method, path, Headers::new(), body.into()).await
}

/// Runs `method path` through `app`'s router and hook pipeline exactly as
/// [`crate::connection::Connection::dispatch`] would, minus the socket:
/// resolves a route, runs the `headers`, `request`, and `response` hooks
/// and the matched handler, and returns the resulting `Response` in
/// memory.
pub async fn request_with(app: &App, method: &str, path: &str, headers: Headers, body: Bytes) -> Response {
    let queue = Arc::new(ByteStreamQueue::new());
    if !body.is_empty() {
        queue.put(body).await;
    }
    queue.end().await;

    let route = app.router.resolve(path);
    let mut req = Request::new(
        method.to_ascii_uppercase(),
        Bytes::from(path.to_string()),
        path.to_string(),
        String::new(),
        headers,
        None,
        queue,
        false,
    );
    req.route = route.clone();

    let mut res = Response::new();
    let route_hooks = route.as_ref().map(|r| &r.payload.hooks);

    let outcome: Result<(), RollError> = async {
        let short =
            hooks::fire_global_then_route(hooks::HEADERS, &app.hooks, route_hooks, &mut req, &mut res).await?;
        if short {
            return Ok(());
        }
        if !req.is_lazy_body() {
            req.load_body().await;
        }
        let short =
            hooks::fire_global_then_route(hooks::REQUEST, &app.hooks, route_hooks, &mut req, &mut res).await?;
        if short {
            return Ok(());
        }
        let route = route
            .as_ref()
            .ok_or_else(|| RollError::RouteNotFound(path.to_string()))?;
        let handler = route
            .payload
            .handlers
            .get(&req.method)
            .ok_or(RollError::MethodNotAllowed)?;
        handler.call(&mut req, &mut res, route.vars.clone()).await
    }
    .await;

    if let Err(err) = &outcome {
        apply_error_to_response(&mut res, err);
        app.hooks.fire_error(&mut req, &mut res, err).await;
        if let Some(route) = &route {
            route.payload.hooks.fire_error(&mut req, &mut res, err).await;
        }
    }

    let _ = hooks::fire_global_then_route(hooks::RESPONSE, &app.hooks, route_hooks, &mut req, &mut res).await;

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{HandlerFn, RouteOptions};
    use crate::config::ServerConfig;
    use crate::router::PathVars;

    fn coerce<F>(f: F) -> F
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response, PathVars) -> futures::future::BoxFuture<'a, Result<(), RollError>>,
    {
        f
    }

    #[tokio::test]
    async fn drives_a_registered_route_without_a_socket() {
        let mut app = App::new(ServerConfig::default());
        let handler = HandlerFn::new(coerce(|_req, res, _vars| {
            res.set_body_text("ok");
            Box::pin(async { Ok(()) }) as futures::future::BoxFuture<'_, Result<(), RollError>>
        }));
        app.route("/hello", &["GET"], handler, RouteOptions::default());

        let res = request(&app, "GET", "/hello").await;
        assert_eq!(res.status.as_u16(), 200);
        assert!(matches!(res.body, crate::response::Body::Bytes(_)));
    }

    #[tokio::test]
    async fn unmatched_path_yields_404() {
        let app = App::new(ServerConfig::default());
        let res = request(&app, "GET", "/missing").await;
        assert_eq!(res.status.as_u16(), 404);
    }
}
