//! The interface to the external request-execution collaborator.
//!
//! The engine never issues network calls itself. Transport, connection pooling and retries are
//! the responsibility of whatever implements [`Requester`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::TransportError;

/// HTTP method of a [`Request`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A request against the system under test, relative to the collaborator's base URL.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,
    /// The target path, e.g. `/order-service/api/carts`.
    pub path: String,
    /// An optional JSON body.
    pub body: Option<Value>,
}

impl Request {
    /// A `GET` request without body.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    /// A `POST` request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// The result of a completed request.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Round-trip time as measured by the collaborator.
    pub elapsed: Duration,
    /// The parsed JSON body, if the response carried one.
    pub body: Option<Value>,
}

impl Response {
    /// Whether the status code is in the `2xx` range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reads an integer identifier from a top-level field of the body.
    pub fn id_field(&self, field: &str) -> Option<i64> {
        self.body.as_ref()?.get(field)?.as_i64()
    }

    /// Returns the `collection` array of a list response.
    pub fn collection(&self) -> Option<&Vec<Value>> {
        self.body.as_ref()?.get("collection")?.as_array()
    }
}

/// Executes requests against the system under test.
///
/// Implementations must be safe to share between all virtual users.
#[async_trait]
pub trait Requester: fmt::Debug + Send + Sync + 'static {
    /// Performs the request and returns its outcome.
    ///
    /// Non-2xx responses are not errors; only faults that prevent a response from being received
    /// are reported as [`TransportError`].
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;
}

/// Executes a request and reports how long it took.
///
/// The collaborator's own measurement is used for completed requests. Faults are timed from the
/// caller's side, so they still carry a meaningful duration.
pub async fn execute_timed(
    requester: &dyn Requester,
    request: Request,
) -> (Duration, Result<Response, TransportError>) {
    let start = Instant::now();
    let result = requester.execute(request).await;
    let elapsed = match &result {
        Ok(response) => response.elapsed,
        Err(_) => start.elapsed(),
    };
    (elapsed, result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(body: Value) -> Response {
        Response {
            status: 200,
            elapsed: Duration::ZERO,
            body: Some(body),
        }
    }

    #[test]
    fn success_range() {
        let mut response = response(json!({}));
        assert!(response.is_success());
        response.status = 201;
        assert!(response.is_success());
        response.status = 500;
        assert!(!response.is_success());
        response.status = 302;
        assert!(!response.is_success());
    }

    #[test]
    fn extracts_fields() {
        let response = response(json!({"cartId": 42, "collection": [{"productId": 1}]}));
        assert_eq!(response.id_field("cartId"), Some(42));
        assert_eq!(response.id_field("orderId"), None);
        assert_eq!(response.collection().map(Vec::len), Some(1));
    }

    #[test]
    fn missing_body() {
        let response = Response {
            status: 204,
            elapsed: Duration::ZERO,
            body: None,
        };
        assert_eq!(response.id_field("cartId"), None);
        assert!(response.collection().is_none());
    }
}
