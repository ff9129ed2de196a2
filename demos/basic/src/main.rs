//! Minimal HTTP demo, grounded on
//! `original_source/examples/basic/__main__.py`: a path-variable route, a
//! JSON-echoing POST route, and the `cors`/`logger` extensions wired up on
//! startup.

use futures::future::BoxFuture;
use roll::ext::{cors, logger};
use roll::{App, HandlerFn, PathVars, RollError, Request, Response, RouteOptions, ServerConfig};

/// Forces each closure below to be inferred against the exact higher-ranked
/// signature `HandlerFn` requires, since closures otherwise infer
/// independent lifetimes per argument.
fn route_handler<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, PathVars) -> BoxFuture<'a, Result<(), RollError>>,
{
    f
}
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    roll::init_default();

    let mut app = App::new(ServerConfig::default());
    cors(&mut app, "*");
    logger(&mut app, log::Level::Info);

    app.route(
        "/hello/{name}",
        &["GET"],
        HandlerFn::new(route_handler(|_req, res, vars| {
            let name = vars.get("name").cloned().unwrap_or_default();
            res.set_body_text(format!("Hello {name}"));
            Box::pin(async { Ok(()) }) as BoxFuture<'_, Result<(), RollError>>
        })),
        RouteOptions::default(),
    );

    app.route(
        "/hello/{name}",
        &["POST"],
        HandlerFn::new(route_handler(|req, res, _vars| {
            Box::pin(async move {
                let value = req.json()?.clone();
                res.set_json(&value).map_err(RollError::Http)?;
                Ok(())
            }) as BoxFuture<'_, Result<(), RollError>>
        })),
        RouteOptions::default(),
    );

    app.listen_process(
        "startup",
        Arc::new(|| Box::pin(async { log::info!("https://vimeo.com/34926862") })),
    );

    Arc::new(app).serve("127.0.0.1:3579").await
}
