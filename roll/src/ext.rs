//! Optional extensions, registered on an [`App`] after construction.
//!
//! Grounded on `original_source/roll/extensions.py`'s `cors`/`logger`/
//! `options` functions — each one installs hooks rather than touching the
//! core, exactly as the original does.

use crate::app::App;
use log::{info, Level};
use std::sync::Arc;

/// Answers every `OPTIONS` request with an empty `200` before it reaches a
/// handler, mirroring `original_source/roll/extensions.py::options`.
pub fn options(app: &mut App) {
    app.listen(
        crate::hooks::REQUEST,
        Arc::new(|req, _res| Box::pin(async move { Ok(req.method == "OPTIONS") })),
    );
}

/// Sets `Access-Control-Allow-Origin: value` on every response, mirroring
/// `original_source/roll/extensions.py::cors`.
pub fn cors(app: &mut App, value: impl Into<String>) {
    let value = value.into();
    app.listen(
        crate::hooks::RESPONSE,
        Arc::new(move |_req, res| {
            let value = value.clone();
            Box::pin(async move {
                res.set_header("Access-Control-Allow-Origin", value);
                Ok(false)
            })
        }),
    );
}

/// Logs `"{method} {path}"` for every request at `level`, mirroring
/// `original_source/roll/extensions.py::logger`. Uses the `log` facade the
/// rest of the core logs through, rather than the original's own
/// per-extension `logging.Logger` instance.
pub fn logger(app: &mut App, level: Level) {
    app.listen(
        crate::hooks::REQUEST,
        Arc::new(move |req, _res| {
            let line = format!("{} {}", req.method, req.path);
            Box::pin(async move {
                log::log!(level, "{line}");
                Ok(false)
            })
        }),
    );
}

/// Logs a `500`'s error message, mirroring
/// `original_source/roll/extensions.py::traceback` (there, the full
/// traceback is printed; here, the error's `Display` is logged through
/// `log`, since Rust has no traceback to capture at the handler boundary).
pub fn traceback(app: &mut App) {
    app.listen_error(Arc::new(|_req, res, err| {
        let status = res.status.as_u16();
        let message = err.to_string();
        Box::pin(async move {
            if status == 500 {
                info!("unhandled error: {message}");
            }
        })
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ByteStreamQueue;
    use crate::config::ServerConfig;
    use crate::request::{Headers, Request};
    use crate::response::Response;
    use bytes::Bytes;

    fn request(method: &str) -> Request {
        Request::new(
            method.into(),
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
    async fn options_short_circuits_options_requests() {
        let mut app = App::new(ServerConfig::default());
        options(&mut app);
        let mut req = request("OPTIONS");
        let mut res = Response::new();
        let short = app.hooks.fire(crate::hooks::REQUEST, &mut req, &mut res).await.unwrap();
        assert!(short);
    }

    #[tokio::test]
    async fn cors_sets_allow_origin_header() {
        let mut app = App::new(ServerConfig::default());
        cors(&mut app, "*");
        let mut req = request("GET");
        let mut res = Response::new();
        app.hooks.fire(crate::hooks::RESPONSE, &mut req, &mut res).await.unwrap();
        let found = res.headers().iter().any(|(n, v)| n == "Access-Control-Allow-Origin" && v == "*");
        assert!(found);
    }
}
