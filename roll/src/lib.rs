//! Roll: an asynchronous HTTP/1.1 server framework with pluggable hooks
//! and WebSocket upgrade support.
//!
//! The surface mirrors `original_source/roll/__init__.py`'s `Roll`
//! application object: register routes and hooks on an [`App`], then hand
//! it to [`App::serve`]. See `SPEC_FULL.md` for the full module map.

mod app;
mod body;
mod config;
mod connection;
mod cookie;
mod error;
mod hooks;
mod logging;
mod multidict;
mod multipart;
mod parser;
mod request;
mod response;
mod router;
mod websocket;

pub mod ext;
pub mod testing;

pub use app::{App, Handler, HandlerFn, RouteOptions, View, WebSocketHandler, WebSocketHandlerFn, VIEW_METHODS};
pub use body::{ByteStreamQueue, SharedByteStreamQueue};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use cookie::{CookieAttrs, ResponseCookies};
pub use error::{HttpError, ParseError, RollError, RollResult};
pub use hooks::{ErrorListener, Listener, WsListener};
pub use multidict::Multidict;
pub use multipart::{Files, UploadedFile};
pub use request::{Extensions, Headers, Request};
pub use response::{Body, Response};
pub use router::{PathVars, Protocol, RouteMatch};
pub use websocket::{WebSocketConnection, WebSocketMessage};

#[cfg(feature = "logging")]
pub use logging::{init, init_default};
