//! Request-scoped snapshot of an inbound HTTP request.
//!
//! Collected once per request and handed read-only to key extraction,
//! template rendering, and evidence capture.

use bytes::Bytes;
use std::collections::HashMap;

/// Immutable view of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct StubRequest {
    /// HTTP method (uppercase)
    pub method: String,
    /// Request path
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Request headers; multi-value headers keep their first value
    pub headers: HashMap<String, String>,
    /// Query and url-encoded form parameters
    pub parameters: HashMap<String, Vec<String>>,
    /// Path variables captured by the endpoint template
    pub path_variables: HashMap<String, String>,
    /// Raw request body
    pub body: Bytes,
}

impl StubRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Content-Type` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// First value of a query/form parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Named cookie from the `Cookie` header (`name=value; ...`).
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie").and_then(|raw| {
            raw.split(';').find_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                if k.trim() == name {
                    Some(v.trim())
                } else {
                    None
                }
            })
        })
    }
}

/// Parse a query string (or url-encoded form body) into multi-value pairs.
pub fn parse_parameters(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (url_decode(key), url_decode(value)),
            None => (url_decode(part), String::new()),
        };
        params.entry(key).or_default().push(value);
    }

    params
}

/// Minimal percent decoding (`%XX` and `+`).
fn url_decode(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if ch == '+' {
            result.push(' ');
        } else {
            result.push(ch);
        }
    }

    result
}
