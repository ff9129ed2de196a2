//! RFC 6265 cookie parsing (`Cookie:` request header) and serialization
//! (`Set-Cookie:` response headers), wrapping the `cookie` crate rather than
//! re-implementing attribute formatting by hand.
//!
//! Grounded on `original_source/roll/http.py` cookie attribute set (path,
//! domain, expires, max-age, secure, httponly) and on `other_examples/manifests/`
//! (salvo, axum) both depending on the `cookie` crate for this exact job —
//! the teacher itself never handles cookies, since Deno leaves that to JS.

use ::cookie::time::{Duration, OffsetDateTime};
use ::cookie::{Cookie as InnerCookie, CookieBuilder};
use std::collections::HashMap;

/// Parses a `Cookie:` header value into name → value pairs. Per RFC 6265 the
/// first occurrence of a repeated name wins.
pub fn parse_cookie_header(value: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for part in value.split(';') {
        if let Ok(c) = InnerCookie::parse(part.trim().to_string()) {
            out.entry(c.name().to_string()).or_insert_with(|| c.value().to_string());
        }
    }
    out
}

/// Attributes accepted by [`ResponseCookies::set`], matching spec.md §3's
/// Cookie data model.
#[derive(Debug, Clone, Default)]
pub struct CookieAttrs {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires_in: Option<Duration>,
    pub max_age: Option<Duration>,
    pub secure: bool,
    pub http_only: bool,
}

/// The ordered set of `Set-Cookie` entries to emit for one response.
#[derive(Debug, Clone, Default)]
pub struct ResponseCookies {
    entries: Vec<InnerCookie<'static>>,
}

impl ResponseCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, attrs: CookieAttrs) {
        let mut builder: CookieBuilder<'static> = InnerCookie::build((name.into(), value.into()));
        if let Some(path) = attrs.path {
            builder = builder.path(path);
        }
        if let Some(domain) = attrs.domain {
            builder = builder.domain(domain);
        }
        if let Some(d) = attrs.expires_in {
            builder = builder.expires(OffsetDateTime::now_utc() + d);
        }
        if let Some(d) = attrs.max_age {
            builder = builder.max_age(d);
        }
        if attrs.secure {
            builder = builder.secure(true);
        }
        if attrs.http_only {
            builder = builder.http_only(true);
        }
        self.entries.push(builder.build());
    }

    /// Removes a cookie by emitting an immediately-expiring replacement, the
    /// conventional way to delete a cookie over HTTP.
    pub fn remove(&mut self, name: impl Into<String>, path: Option<String>) {
        let mut attrs = CookieAttrs::default();
        attrs.path = path;
        attrs.max_age = Some(Duration::seconds(0));
        self.set(name, "", attrs);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `Set-Cookie: ...` header value per entry, in insertion order.
    pub fn to_header_values(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_cookies_from_one_header() {
        let parsed = parse_cookie_header("a=1; b=2");
        assert_eq!(parsed.get("a").unwrap(), "1");
        assert_eq!(parsed.get("b").unwrap(), "2");
    }

    #[test]
    fn first_occurrence_of_duplicate_name_wins() {
        let parsed = parse_cookie_header("a=1; a=2");
        assert_eq!(parsed.get("a").unwrap(), "1");
    }

    #[test]
    fn set_cookie_serializes_requested_attributes() {
        let mut cookies = ResponseCookies::new();
        cookies.set(
            "session",
            "xyz",
            CookieAttrs {
                path: Some("/".into()),
                secure: true,
                http_only: true,
                ..Default::default()
            },
        );
        let header = &cookies.to_header_values()[0];
        assert!(header.starts_with("session=xyz"));
        assert!(header.contains("Secure"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Path=/"));
    }
}
