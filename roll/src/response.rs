//! C3 (response half) — in-memory representation of the response a handler
//! builds, serialized on the wire by [`crate::connection`].
//!
//! Grounded on `original_source/roll/http.py::Response` for the
//! status/body/redirect/json setter contract and spec.md §3's Bodyless
//! rule.

use crate::cookie::{CookieAttrs, ResponseCookies};
use crate::error::HttpError;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::StatusCode;

/// Status codes that are always bodyless, per spec.md §3's Bodyless rule
/// (the other half of the rule — `HEAD`/`CONNECT` — depends on the request
/// method and is applied by the connection when it serializes the
/// response).
const BODYLESS_STATUSES: [u16; 5] = [100, 101, 102, 204, 304];

pub fn is_bodyless_status(status: StatusCode) -> bool {
    BODYLESS_STATUSES.contains(&status.as_u16())
}

/// Tagged body variant, per spec.md §9's design note: "treat `Body` as a
/// tagged variant `{ Empty, Bytes(Vec<u8>), Stream(...) }`".
pub enum Body {
    Empty,
    Bytes(Bytes),
    Stream(BoxStream<'static, Result<Bytes, HttpError>>),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Stream(_) => write!(f, "Body::Stream(..)"),
        }
    }
}

/// An HTTP response under construction. Headers preserve insertion order
/// (spec.md §4.6: "all remaining headers in insertion order"), unlike
/// [`crate::request::Headers`] which only needs case-insensitive lookup.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    headers: Vec<(String, String)>,
    pub cookies: ResponseCookies,
    pub body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            cookies: ResponseCookies::new(),
            body: Body::Empty,
        }
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), HttpError> {
        self.status = StatusCode::from_u16(code).map_err(|_| HttpError::bad_request(format!("Invalid status code: {code}")))?;
        Ok(())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_body_bytes(&mut self, bytes: impl Into<Bytes>) {
        self.body = Body::Bytes(bytes.into());
    }

    pub fn set_body_text(&mut self, text: impl Into<String>) {
        self.body = Body::Bytes(Bytes::from(text.into().into_bytes()));
    }

    pub fn set_body_stream(&mut self, stream: BoxStream<'static, Result<Bytes, HttpError>>) {
        self.body = Body::Stream(stream);
    }

    /// `response.json = value` shortcut: sets the `Content-Type` header and
    /// encodes the body, per spec.md §4.3.
    pub fn set_json(&mut self, value: &serde_json::Value) -> Result<(), HttpError> {
        let encoded = serde_json::to_vec(value).map_err(|e| HttpError::internal(e))?;
        self.set_header("Content-Type", "application/json");
        self.body = Body::Bytes(Bytes::from(encoded));
        Ok(())
    }

    /// `response.redirect = (location, status)`: sets Location + status in
    /// one step, defaulting to `302 Found`.
    pub fn set_redirect(&mut self, location: impl Into<String>, status: Option<u16>) -> Result<(), HttpError> {
        self.set_status(status.unwrap_or(302))?;
        self.set_header("Location", location);
        Ok(())
    }

    /// Whether the method/status combination forbids a body, per spec.md
    /// §3's Bodyless rule. `method` should already be upper-case.
    pub fn is_bodyless(&self, method: &str) -> bool {
        matches!(method, "HEAD" | "CONNECT") || is_bodyless_status(self.status)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodyless_for_head_regardless_of_status() {
        let r = Response::new();
        assert!(r.is_bodyless("HEAD"));
    }

    #[test]
    fn bodyless_for_204_regardless_of_method() {
        let mut r = Response::new();
        r.set_status(204).unwrap();
        assert!(r.is_bodyless("GET"));
    }

    #[test]
    fn ordinary_response_is_not_bodyless() {
        let r = Response::new();
        assert!(!r.is_bodyless("GET"));
    }

    #[test]
    fn json_shortcut_sets_content_type() {
        let mut r = Response::new();
        r.set_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(r.headers().iter().find(|(k, _)| k == "Content-Type").unwrap().1, "application/json");
    }

    #[test]
    fn redirect_sets_location_and_default_status() {
        let mut r = Response::new();
        r.set_redirect("/elsewhere", None).unwrap();
        assert_eq!(r.status, StatusCode::FOUND);
        assert_eq!(r.headers().iter().find(|(k, _)| k == "Location").unwrap().1, "/elsewhere");
    }

    #[test]
    fn headers_preserve_insertion_order() {
        let mut r = Response::new();
        r.set_header("B", "2");
        r.set_header("A", "1");
        let names: Vec<_> = r.headers().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
