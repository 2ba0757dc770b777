// HTTP request and response types

use crate::Extensions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Inbound request descriptor.
///
/// Header names are stored lower-cased. Request-scoped state (for example the
/// resolved tenant context) travels in [`HttpRequest::extensions`], never in
/// ambient globals.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub query_params: HashMap<String, String>,
    pub extensions: Extensions,
    cancellation: CancellationToken,
}

impl HttpRequest {
    pub fn new(method: String, path: String) -> Self {
        Self {
            method,
            path,
            headers: HashMap::new(),
            body: Vec::new(),
            query_params: HashMap::new(),
            extensions: Extensions::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Builder-style header insertion. The name is lower-cased.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// Host name without port, lower-cased.
    pub fn host(&self) -> Option<String> {
        let raw = self.header("host")?;
        let host = raw.split(':').next().unwrap_or(raw).trim();
        if host.is_empty() {
            None
        } else {
            Some(host.to_ascii_lowercase())
        }
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Cancellation signal for everything this request starts.
    ///
    /// Units of work opened for the request observe this token and roll back
    /// when it fires.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replace the request's cancellation token, e.g. with a child of a
    /// server-wide shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// HTTP response wrapper
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn created() -> Self {
        Self::new(201)
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn bad_request() -> Self {
        Self::new(400)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        self.body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Body as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<&crate::Error> for HttpResponse {
    fn from(err: &crate::Error) -> Self {
        HttpResponse::new(err.status_code()).with_body(err.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_strips_port_and_case() {
        let req = HttpRequest::new("GET".into(), "/".into()).with_header("Host", "Acme.Example.com:8080");
        assert_eq!(req.host(), Some("acme.example.com".to_string()));
    }

    #[test]
    fn test_missing_host() {
        let req = HttpRequest::new("GET".into(), "/".into());
        assert_eq!(req.host(), None);

        let req = req.with_header("host", "  ");
        assert_eq!(req.host(), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = HttpRequest::new("GET".into(), "/".into()).with_header("X-Tenant-ID", "t1");
        assert_eq!(req.header("x-tenant-id"), Some(&"t1".to_string()));
        assert_eq!(req.header("X-TENANT-ID"), Some(&"t1".to_string()));
    }

    #[test]
    fn test_cancellation_is_shared_by_clones() {
        let req = HttpRequest::new("GET".into(), "/".into());
        let clone = req.clone();
        req.cancellation().cancel();
        assert!(clone.cancellation().is_cancelled());
    }

    #[test]
    fn test_response_from_error() {
        let err = crate::Error::ServiceUnavailable("tenant store down".into());
        let res = HttpResponse::from(&err);
        assert_eq!(res.status, 503);
        assert!(res.text().contains("tenant store down"));
    }
}
