//! Network access for the worker
//!
//! The worker only talks to the network through the `Network` trait so the
//! fetch policy can be driven by a scripted network in tests.

use crate::http::{RequestDescriptor, ResponseDescriptor, ResponseType};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, StatusCode};
use reqwest::redirect::{Attempt, Policy};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

const MAX_REDIRECTS: usize = 5;

#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Performs an HTTP fetch for a request descriptor
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, NetworkError>;
}

/// Network backed by a reqwest client
///
/// Same-origin redirects are followed; a cross-origin redirect is handed back
/// to the caller as an opaque redirect.
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    /// `origin` is the application origin used to tell basic responses from opaque ones
    pub fn new(origin: Url) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(Policy::custom(same_origin_redirects))
            .build()
            .map_err(|e| NetworkError::Client(e.to_string()))?;

        Ok(Self { client, origin })
    }

    fn classify(&self, response: &reqwest::Response) -> ResponseType {
        response_type(
            &self.origin,
            response.url(),
            response.status(),
            response.headers(),
        )
    }
}

/// Type of a response whose final URL is `url`
///
/// Only a redirect the client stopped at counts as an opaque redirect;
/// `304 Not Modified` is a 3xx but carries no `location`.
fn response_type(origin: &Url, url: &Url, status: StatusCode, headers: &HeaderMap) -> ResponseType {
    let stopped_redirect = status.is_redirection()
        && status != StatusCode::NOT_MODIFIED
        && headers.contains_key(LOCATION);
    if stopped_redirect {
        ResponseType::OpaqueRedirect
    } else if url.origin() == origin.origin() {
        ResponseType::Basic
    } else {
        ResponseType::Opaque
    }
}

fn same_origin_redirects(attempt: Attempt<'_>) -> reqwest::redirect::Action {
    if attempt.previous().len() > MAX_REDIRECTS {
        return attempt.error("too many redirects");
    }
    let same_origin = attempt
        .previous()
        .first()
        .is_some_and(|first| first.origin() == attempt.url().origin());
    if same_origin {
        attempt.follow()
    } else {
        attempt.stop()
    }
}

#[async_trait::async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, NetworkError> {
        let transport = |e: reqwest::Error| NetworkError::Transport {
            url: request.url.to_string(),
            reason: e.to_string(),
        };

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(transport)?;

        let response_type = self.classify(&response);
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?;

        debug!(
            "Fetched {} {} -> {} ({}, {} bytes)",
            request.method,
            request.url,
            status,
            response_type.as_str(),
            body.len()
        );

        Ok(ResponseDescriptor {
            status,
            headers,
            body,
            response_type,
        })
    }
}
