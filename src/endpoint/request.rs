use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{Map, Value};

use crate::endpoint::error::EndpointError;
use crate::types::Consumer;

pub const EXPAND_HEADER: &str = "x-expand";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Read-only view of an inbound request, as seen by attribute resolution.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: Vec<(String, String)>,
    body: Map<String, Value>,
    consumer: Option<Consumer>,
}

impl EndpointRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query: Vec::new(),
            body: Map::new(),
            consumer: None,
        }
    }

    /// Build from raw HTTP parts. JSON and form-encoded bodies are accepted.
    pub fn from_parts(
        method: Method,
        path: impl Into<String>,
        raw_query: Option<&str>,
        headers: HeaderMap,
        path_params: HashMap<String, String>,
        body: &[u8],
    ) -> Result<Self, EndpointError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let body = if body.iter().all(|b| b.is_ascii_whitespace()) {
            Map::new()
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            parse_form(body)
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(EndpointError::MalformedBody("expected a JSON object".into())),
                Err(e) => return Err(EndpointError::MalformedBody(e.to_string())),
            }
        };

        let query = raw_query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            method,
            path: path.into(),
            headers,
            path_params,
            query,
            body,
            consumer: None,
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.body.insert(name.into(), value);
        self
    }

    /// Replace the body with a JSON object. Non-object values are ignored.
    pub fn with_json_body(mut self, body: Value) -> Self {
        if let Value::Object(map) = body {
            self.body = map;
        }
        self
    }

    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn set_consumer(&mut self, consumer: Option<Consumer>) {
        self.consumer = consumer;
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header(header::AUTHORIZATION.as_str())
    }

    pub fn expand(&self) -> Option<&str> {
        self.header(EXPAND_HEADER)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header(CORRELATION_HEADER)
    }

    pub fn consumer(&self) -> Option<&Consumer> {
        self.consumer.as_ref()
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn body_field_names(&self) -> impl Iterator<Item = &str> {
        self.body.keys().map(String::as_str)
    }

    /// Whether request fields come from the body rather than the query string.
    pub fn reads_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    /// Single parameter value. Null body values count as absent.
    pub fn param(&self, name: &str) -> Option<Value> {
        if self.reads_body() {
            match self.body.get(name) {
                None | Some(Value::Null) => None,
                Some(Value::Array(items)) => items.last().cloned(),
                Some(value) => Some(value.clone()),
            }
        } else {
            self.query_values(name)
                .last()
                .map(|v| Value::String((*v).to_string()))
        }
    }

    /// Every value given for a parameter.
    pub fn params(&self, name: &str) -> Vec<Value> {
        if self.reads_body() {
            match self.body.get(name) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
            }
        } else {
            self.query_values(name)
                .into_iter()
                .map(|v| Value::String(v.to_string()))
                .collect()
        }
    }
}

fn parse_form(body: &[u8]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_reads_query_and_post_reads_body() {
        let get = EndpointRequest::new(Method::GET, "/todos")
            .with_query("priority", "high")
            .with_body_param("priority", json!("low"));
        assert_eq!(get.param("priority"), Some(json!("high")));

        let post = EndpointRequest::new(Method::POST, "/todos")
            .with_query("priority", "high")
            .with_body_param("priority", json!("low"));
        assert_eq!(post.param("priority"), Some(json!("low")));
    }

    #[test]
    fn parses_form_bodies_with_repeated_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let request = EndpointRequest::from_parts(
            Method::POST,
            "/todos",
            Some("x=1"),
            headers,
            HashMap::new(),
            b"tag=a&tag=b&task=buy+milk",
        )
        .unwrap();
        assert_eq!(request.params("tag"), vec![json!("a"), json!("b")]);
        assert_eq!(request.param("task"), Some(json!("buy milk")));
        assert_eq!(request.query_values("x"), vec!["1"]);
    }

    #[test]
    fn rejects_non_object_json() {
        let err = EndpointRequest::from_parts(
            Method::POST,
            "/todos",
            None,
            HeaderMap::new(),
            HashMap::new(),
            b"[1, 2]",
        )
        .unwrap_err();
        assert!(matches!(err, EndpointError::MalformedBody(_)));
    }
}
