//! Request and response descriptors exchanged between the host, the worker,
//! the network and the response store

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use url::Url;

/// How the host classified an outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Top-level document load
    Navigate,
    /// Script, stylesheet, image, XHR and everything else
    Subresource,
}

/// An outgoing request as seen by the worker
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub mode: RequestMode,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: Url, mode: RequestMode) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            mode,
        }
    }

    /// A plain sub-resource `GET`
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, RequestMode::Subresource)
    }

    /// A top-level document `GET`
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::new(Method::GET, url, RequestMode::Navigate);
        request
            .headers
            .insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        request
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether the `Accept` header asks for an HTML document
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }
}

/// Visibility class of a response, from the requesting page's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Same-origin, fully visible
    Basic,
    /// Cross-origin without CORS
    Opaque,
    /// A redirect that was handed back instead of followed
    OpaqueRedirect,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(ResponseType::Basic),
            "opaque" => Some(ResponseType::Opaque),
            "opaqueredirect" => Some(ResponseType::OpaqueRedirect),
            _ => None,
        }
    }
}

/// A response produced by the network or read back from the store
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
}

impl ResponseDescriptor {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
        }
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Status in the 200-299 range
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Only same-origin 200 responses are written to the store at fetch time
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && self.response_type == ResponseType::Basic
    }
}
