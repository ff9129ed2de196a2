//! C3 (request half) — in-memory representation of one HTTP message,
//! populated by the connection state machine from [`crate::parser`] events.
//!
//! Grounded on `original_source/roll/http.py::Request` for the attribute
//! set and lazy-accessor contract, and `original_source/roll/io.py` for the
//! body-loading/streaming split.

use crate::body::SharedByteStreamQueue;
use crate::cookie::parse_cookie_header;
use crate::error::{HttpError, RollError};
use crate::multidict::{parse_urlencoded, Multidict};
use crate::multipart::{self, Files};
use crate::router::RouteMatch;
use bytes::Bytes;
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Case-insensitive header map. Repeated fields are merged in arrival order
/// with `", "`, per spec.md §3.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name_upper: &[u8], value: &str) {
        let key = String::from_utf8_lossy(name_upper).into_owned();
        self.entries
            .entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_uppercase()).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Decodes a raw header value byte slice as Latin-1 (ISO-8859-1), the HTTP
/// transport encoding spec.md §4.2 specifies: every byte is one code point.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// A per-request, type-erased key/value bag hooks use to stash state across
/// the lifecycle of one request ("a mapping extension...part of the
/// contract", spec.md §3). Mirrors `http::Extensions`' design, which the
/// crate already depends on for `StatusCode`.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map.remove(&TypeId::of::<T>()).and_then(|v| v.downcast::<T>().ok()).map(|b| *b)
    }
}

/// One HTTP request, created on `on_message_begin` and destroyed at the end
/// of the response write (spec.md §3's Lifecycle section) — never reused
/// across keep-alive messages.
pub struct Request {
    pub method: String,
    pub url: Bytes,
    pub path: String,
    pub query_string: String,
    pub headers: Headers,
    pub upgrade: Option<String>,
    pub route: Option<RouteMatch>,
    pub extensions: Extensions,

    body_queue: SharedByteStreamQueue,
    body: Option<Bytes>,
    lazy_body: bool,

    query: Option<Multidict>,
    cookies: Option<HashMap<String, String>>,
    form: Option<Multidict>,
    files: Option<Files>,
    json: Option<serde_json::Value>,
}

impl Request {
    pub fn new(
        method: String,
        url: Bytes,
        path: String,
        query_string: String,
        headers: Headers,
        upgrade: Option<String>,
        body_queue: SharedByteStreamQueue,
        lazy_body: bool,
    ) -> Self {
        Self {
            method,
            url,
            path,
            query_string,
            headers,
            upgrade,
            route: None,
            extensions: Extensions::new(),
            body_queue,
            body: None,
            lazy_body,
            query: None,
            cookies: None,
            form: None,
            files: None,
            json: None,
        }
    }

    pub fn is_lazy_body(&self) -> bool {
        self.lazy_body
    }

    pub fn query(&mut self) -> &Multidict {
        if self.query.is_none() {
            self.query = Some(parse_urlencoded(&self.query_string));
        }
        self.query.as_ref().unwrap()
    }

    pub fn cookies(&mut self) -> &HashMap<String, String> {
        if self.cookies.is_none() {
            let parsed = self
                .headers
                .get("COOKIE")
                .map(parse_cookie_header)
                .unwrap_or_default();
            self.cookies = Some(parsed);
        }
        self.cookies.as_ref().unwrap()
    }

    /// Pull the next raw body chunk as it arrives from the socket; the empty
    /// buffer signals end-of-stream (spec.md §4.1/§5's async-iteration body
    /// access, for `lazy_body` routes).
    pub async fn next_body_chunk(&self) -> Bytes {
        self.body_queue.get().await
    }

    /// A clone of the underlying queue handle, independent of any borrow of
    /// `self` — lets the connection driver keep feeding the body
    /// concurrently with a handler that holds `&mut Request`.
    pub(crate) fn body_queue_handle(&self) -> SharedByteStreamQueue {
        self.body_queue.clone()
    }

    /// Drain the body stream into memory. Idempotent: a second call returns
    /// the cached buffer without touching the queue again.
    pub async fn load_body(&mut self) -> Bytes {
        if let Some(body) = &self.body {
            return body.clone();
        }
        let mut buf = Vec::new();
        loop {
            let chunk = self.body_queue.get().await;
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let body = Bytes::from(buf);
        self.body = Some(body.clone());
        body
    }

    /// Load and return the body, per spec.md §4.3's `read()`.
    pub async fn read(&mut self) -> Bytes {
        self.load_body().await
    }

    fn loaded_body(&self) -> Result<&Bytes, RollError> {
        self.body.as_ref().ok_or_else(|| {
            RollError::Http(HttpError::bad_request(
                "Body has not been loaded yet; call load_body() first.",
            ))
        })
    }

    /// `request.json`: decode the loaded body as UTF-8 JSON, cached after
    /// first success, per spec.md §4.3.
    pub fn json(&mut self) -> Result<&serde_json::Value, RollError> {
        if self.json.is_none() {
            let body = self.loaded_body()?.clone();
            let value: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|e| RollError::Http(HttpError::bad_request(format!("Invalid JSON body: {e}"))))?;
            self.json = Some(value);
        }
        Ok(self.json.as_ref().unwrap())
    }

    /// Decode the loaded JSON body into a caller-provided type.
    pub fn json_as<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, RollError> {
        let body = self.loaded_body()?.clone();
        serde_json::from_slice(&body)
            .map_err(|e| RollError::Http(HttpError::bad_request(format!("Invalid JSON body: {e}"))))
    }

    /// `request.form` / `request.files`: dispatches on Content-Type the way
    /// `original_source/roll/forms.py` does — multipart, urlencoded, or
    /// neither.
    pub async fn form_and_files(&mut self) -> Result<(&Multidict, &Files), RollError> {
        if self.form.is_none() || self.files.is_none() {
            let body = self.loaded_body()?.clone();
            let content_type = self.headers.get("CONTENT-TYPE").unwrap_or_default().to_string();

            let (form, files) = if content_type.starts_with("multipart/form-data") {
                let boundary = multipart::boundary_from_content_type(&content_type)
                    .ok_or_else(|| RollError::Http(HttpError::bad_request("Missing multipart boundary")))?;
                multipart::parse_multipart(body, &boundary)
                    .await
                    .map_err(RollError::Http)?
            } else if content_type.starts_with("application/x-www-form-urlencoded") {
                let text = String::from_utf8_lossy(&body).into_owned();
                (parse_urlencoded(&text), Files::default())
            } else {
                (Multidict::new(), Files::default())
            };

            self.form = Some(form);
            self.files = Some(files);
        }
        Ok((self.form.as_ref().unwrap(), self.files.as_ref().unwrap()))
    }

    /// Buffer one body chunk off the wire. Called by the connection driver
    /// outside any parser callback, never by application code directly.
    pub(crate) async fn push_body_chunk(&self, chunk: Bytes) {
        self.body_queue.put(chunk).await;
    }

    /// Signal end-of-body. Called once by the connection driver when the
    /// parser reports the message complete.
    pub(crate) async fn end_body(&self) {
        self.body_queue.end().await;
    }
}
