//! Contains a remote implementation using HTTP to interact with the system under test.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fanout_engine::{Method, Request, Requester, Response, TransportError};
use reqwest::Url;
use tokio::time::Instant;

/// A [`Requester`] sending requests through a pooled [`reqwest::Client`].
#[derive(Debug)]
pub struct HttpRemote {
    /// Base URL every request path is resolved against.
    pub remote: Url,
    /// The client shared by all virtual users.
    pub client: reqwest::Client,
}

impl HttpRemote {
    /// Creates a remote for `remote` whose requests time out after `timeout`.
    pub fn new(remote: &str, timeout: Duration) -> anyhow::Result<Self> {
        let remote = Url::parse(remote).with_context(|| format!("invalid remote URL `{remote}`"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { remote, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.remote.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Requester for HttpRemote {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, self.url(&request.path));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(transport_error)?;
        let elapsed = start.elapsed();

        // Error pages and empty bodies are not JSON; the status alone classifies those.
        let body = serde_json::from_slice(&bytes).ok();

        Ok(Response {
            status,
            elapsed,
            body,
        })
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_body() || error.is_decode() {
        TransportError::Decode(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}
