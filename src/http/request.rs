//! Request descriptors and their canonical identity.
//!
//! # Responsibilities
//! - Describe a logical request (method, URL, params, headers, body)
//! - Derive a stable cache key from method + URL + params + body
//! - Derive a dedup identity that also covers headers
//! - Build the concrete URL (query string) for the transport
//!
//! # Design Decisions
//! - Object keys are sorted recursively before hashing, so field order never
//!   produces a different key; array order is significant
//! - BLAKE3 over the canonical text keeps keys short and collision-resistant

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

use crate::http::types::FetchError;

/// A logical request, independent of any transport.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    /// Query parameters.
    pub params: Map<String, Value>,
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Skip in-flight deduplication even for eligible methods.
    pub no_dedupe: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Map::new(),
            headers: HeaderMap::new(),
            body: None,
            no_dedupe: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Add a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn no_dedupe(mut self) -> Self {
        self.no_dedupe = true;
        self
    }

    /// Clone this descriptor with `extra` headers added (replacing same-named ones).
    pub fn with_headers(&self, extra: HeaderMap) -> Self {
        let mut cloned = self.clone();
        for (name, value) in extra.iter() {
            cloned.headers.insert(name.clone(), value.clone());
        }
        cloned
    }

    /// Cache key: fully determined by method, URL, params and body.
    pub fn cache_key(&self) -> String {
        blake3::hash(self.key_material().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Dedup identity: the cache key material plus canonicalised headers.
    pub fn identity(&self) -> String {
        let mut material = self.key_material();
        let mut headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        headers.sort();
        for (name, value) in headers {
            material.push('\n');
            material.push_str(name);
            material.push(':');
            material.push_str(&value);
        }
        blake3::hash(material.as_bytes()).to_hex().to_string()
    }

    fn key_material(&self) -> String {
        let params = Value::Object(self.params.clone());
        let body = self.body.as_ref().map(canonical_json).unwrap_or_default();
        format!(
            "{}\n{}\n{}\n{}",
            self.method.as_str(),
            self.url,
            canonical_json(&params),
            body
        )
    }

    /// Concrete URL with params appended as a query string (sorted by key).
    pub fn to_url(&self) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| FetchError::Transport(format!("Invalid URL '{}': {}", self.url, e)))?;

        if !self.params.is_empty() {
            let mut entries: Vec<(&String, &Value)> = self.params.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut query = url.query_pairs_mut();
            for (key, value) in entries {
                match value {
                    Value::Null => {}
                    Value::Array(items) => {
                        for item in items {
                            query.append_pair(key, &query_value(item));
                        }
                    }
                    other => {
                        query.append_pair(key, &query_value(other));
                    }
                }
            }
        }
        Ok(url)
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}

impl PartialEq for RequestDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.no_dedupe == other.no_dedupe && self.identity() == other.identity()
    }
}

impl Eq for RequestDescriptor {}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Serialise `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // Map ordering depends on serde_json's preserve_order feature.
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"y": [3, 1], "x": null}});
        let b = json!({"a": {"x": null, "y": [3, 1]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[3,1]},"b":1}"#);
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
    }

    #[test]
    fn test_cache_key_ignores_field_order() {
        let a = RequestDescriptor::post("https://api.test/items")
            .param("page", 2)
            .param("sort", "asc")
            .json_body(json!({"name": "x", "tags": ["a"]}));
        let b = RequestDescriptor::post("https://api.test/items")
            .param("sort", "asc")
            .param("page", 2)
            .json_body(json!({"tags": ["a"], "name": "x"}));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_distinguishes_components() {
        let base = RequestDescriptor::get("https://api.test/items").param("page", 1);
        let other_page = RequestDescriptor::get("https://api.test/items").param("page", 2);
        let other_method = RequestDescriptor::delete("https://api.test/items").param("page", 1);
        let with_body = base.clone().json_body(json!({"q": 1}));

        assert_ne!(base.cache_key(), other_page.cache_key());
        assert_ne!(base.cache_key(), other_method.cache_key());
        assert_ne!(base.cache_key(), with_body.cache_key());
    }

    #[test]
    fn test_headers_affect_identity_not_cache_key() {
        let plain = RequestDescriptor::get("https://api.test/items");
        let authed = plain.clone().header(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer t"),
        );
        assert_eq!(plain.cache_key(), authed.cache_key());
        assert_ne!(plain.identity(), authed.identity());
        assert_ne!(plain, authed);
    }

    #[test]
    fn test_with_headers_clones() {
        let original = RequestDescriptor::get("https://api.test/items");
        let mut extra = HeaderMap::new();
        extra.insert(
            reqwest::header::IF_NONE_MATCH,
            HeaderValue::from_static("\"v1\""),
        );
        let conditional = original.with_headers(extra);

        assert!(original.headers.is_empty());
        assert_eq!(conditional.headers[reqwest::header::IF_NONE_MATCH], "\"v1\"");
    }

    #[test]
    fn test_to_url_appends_sorted_params() {
        let descriptor = RequestDescriptor::get("https://api.test/search")
            .param("q", "rust lang")
            .param("ids", json!([1, 2]))
            .param("skip", Value::Null);
        let url = descriptor.to_url().unwrap();
        assert_eq!(url.as_str(), "https://api.test/search?ids=1&ids=2&q=rust+lang");
    }

    #[test]
    fn test_to_url_rejects_garbage() {
        let err = RequestDescriptor::get("not a url").to_url().unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
