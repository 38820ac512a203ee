//! Executes [`HttpCall`] instructions on behalf of the orchestrator.

use std::sync::LazyLock;

use reqwest::Method;
use thiserror::Error;

use crate::backend::BackendFuture;
use crate::error::ProvisionError;
use crate::instruction::{HttpCall, HttpVerb};

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// Status and body of a completed call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, decoded lossily.
    pub body: String,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Raised when a call could not be completed at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("request to {url} failed: {message}")]
pub struct HttpError {
    /// Target URL.
    pub url: String,
    /// Transport error text.
    pub message: String,
}

impl From<HttpError> for ProvisionError {
    fn from(value: HttpError) -> Self {
        Self::Connection {
            host: value.url,
            message: value.message,
        }
    }
}

/// Sends HTTP calls.
pub trait HttpExecutor: Send + Sync {
    /// Sends `call` and returns the response, whatever its status.
    fn send<'a>(&'a self, call: &'a HttpCall) -> BackendFuture<'a, HttpResponse, HttpError>;
}

/// [`HttpExecutor`] backed by a shared `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct ReqwestExecutor;

const fn method(verb: HttpVerb) -> Method {
    match verb {
        HttpVerb::Get => Method::GET,
        HttpVerb::Post => Method::POST,
        HttpVerb::Put => Method::PUT,
        HttpVerb::Delete => Method::DELETE,
    }
}

impl HttpExecutor for ReqwestExecutor {
    fn send<'a>(&'a self, call: &'a HttpCall) -> BackendFuture<'a, HttpResponse, HttpError> {
        Box::pin(async move {
            let transport = |err: reqwest::Error| HttpError {
                url: call.url.clone(),
                message: err.to_string(),
            };
            let mut request = HTTP_CLIENT.request(method(call.verb), &call.url);
            for (name, value) in &call.headers {
                request = request.header(name, value);
            }
            if let Some(ref body) = call.body {
                request = request.body(body.clone());
            }
            let response = request.send().await.map_err(transport)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(transport)?;
            Ok(HttpResponse { status, body })
        })
    }
}
