//! Ordered string multimap backing `Query` and `Form`, with the typed
//! casting helpers (`get_int`/`get_float`/`get_bool`) the original exposes
//! on its `Multidict` base class.
//!
//! Grounded on `original_source/roll/http.py::Query` (the `TRUE_STRINGS`/
//! `FALSE_STRINGS`/`NONE_STRINGS` literal sets and tri-state `bool()` for
//! boolean parsing) and the Werkzeug-style `MultiDict` that `Multidict`
//! mirrors.

use crate::error::HttpError;

const TRUE_STRINGS: &[&str] = &["t", "true", "yes", "1", "on"];
const FALSE_STRINGS: &[&str] = &["f", "false", "no", "0", "off"];
const NONE_STRINGS: &[&str] = &["n", "none", "null"];

/// Preserves insertion order and repeated keys, unlike a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct Multidict {
    entries: Vec<(String, String)>,
}

impl Multidict {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn require(&self, key: &str) -> Result<&str, HttpError> {
        self.get(key).ok_or_else(|| HttpError::bad_request(format!("Missing key: {key}")))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, HttpError> {
        self.require(key)?
            .parse::<i64>()
            .map_err(|_| HttpError::bad_request(format!("Invalid integer for key: {key}")))
    }

    pub fn get_float(&self, key: &str) -> Result<f64, HttpError> {
        self.require(key)?
            .parse::<f64>()
            .map_err(|_| HttpError::bad_request(format!("Invalid float for key: {key}")))
    }

    /// Mirrors the original's liberal, tri-state boolean string parsing
    /// (`original_source/roll/http.py::Query.bool`) rather than
    /// `str::parse::<bool>`'s strict `"true"`/`"false"`: a
    /// `NONE_STRINGS` literal (`"n"`, `"none"`, `"null"`) is a valid,
    /// explicit "no value" distinct from a missing key.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, HttpError> {
        let raw = self.require(key)?.to_ascii_lowercase();
        if TRUE_STRINGS.contains(&raw.as_str()) {
            Ok(Some(true))
        } else if FALSE_STRINGS.contains(&raw.as_str()) {
            Ok(Some(false))
        } else if NONE_STRINGS.contains(&raw.as_str()) {
            Ok(None)
        } else {
            Err(HttpError::bad_request(format!("Invalid boolean for key: {key}")))
        }
    }
}

/// Parses `a=1&b=2&b=3` style bodies/query strings, percent-decoding both
/// keys and values via the `url` crate (already in the dependency stack for
/// path/query handling).
pub fn parse_urlencoded(input: &str) -> Multidict {
    let mut out = Multidict::new();
    for (k, v) in url::form_urlencoded::parse(input.as_bytes()) {
        out.push(k.into_owned(), v.into_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_preserve_order_and_arent_merged() {
        let md = parse_urlencoded("b=2&a=1&b=3");
        assert_eq!(md.get_all("b"), vec!["2", "3"]);
        assert_eq!(md.get("a"), Some("1"));
    }

    #[test]
    fn bool_parsing_accepts_common_literals() {
        let mut md = Multidict::new();
        md.push("x", "yes");
        md.push("y", "0");
        assert_eq!(md.get_bool("x").unwrap(), Some(true));
        assert_eq!(md.get_bool("y").unwrap(), Some(false));
        md.push("z", "maybe");
        assert!(md.get_bool("z").is_err());
    }

    #[test]
    fn bool_parsing_accepts_short_and_none_literals() {
        let mut md = Multidict::new();
        md.push("a", "t");
        md.push("b", "F");
        md.push("c", "null");
        assert_eq!(md.get_bool("a").unwrap(), Some(true));
        assert_eq!(md.get_bool("b").unwrap(), Some(false));
        assert_eq!(md.get_bool("c").unwrap(), None);
    }

    #[test]
    fn missing_key_is_bad_request() {
        let md = Multidict::new();
        assert!(md.get_int("missing").is_err());
    }
}
