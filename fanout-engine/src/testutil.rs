//! Test doubles for the request-execution collaborator.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use crate::error::TransportError;
use crate::request::{Request, Requester, Response};

type Handler = dyn Fn(&Request) -> Result<Response, TransportError> + Send + Sync;

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner.
pub fn init_tracing() {
    let env_filter = EnvFilter::new("ERROR").add_directive("fanout_engine=TRACE".parse().unwrap());

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// A [`Requester`] answering from a closure and recording every request.
pub struct MockRequester {
    handler: Box<Handler>,
    latency: Duration,
    requests: Mutex<Vec<Request>>,
}

impl MockRequester {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Suspends every request for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl fmt::Debug for MockRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRequester")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Requester for MockRequester {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut response = (self.handler)(&request)?;
        response.elapsed = self.latency;
        Ok(response)
    }
}

pub fn ok(body: Value) -> Result<Response, TransportError> {
    Ok(Response {
        status: 200,
        elapsed: Duration::ZERO,
        body: Some(body),
    })
}

pub fn status(status: u16) -> Result<Response, TransportError> {
    Ok(Response {
        status,
        elapsed: Duration::ZERO,
        body: Some(json!({ "msg": "failure" })),
    })
}

/// Answers like a healthy shop: every create returns an identifier, listings are non-empty.
pub fn shop_response(request: &Request) -> Result<Response, TransportError> {
    match request.path.as_str() {
        "/user-service/api/users" => ok(json!({ "userId": 7 })),
        "/product-service/api/products" => ok(json!({
            "collection": [{ "productId": 1 }, { "productId": 2 }, { "productId": 3 }],
        })),
        "/order-service/api/carts" => ok(json!({ "cartId": 11 })),
        "/order-service/api/orders" => ok(json!({ "orderId": 13 })),
        "/shipping-service/api/shippings" => ok(json!({ "orderId": 13, "productId": 1 })),
        "/payment-service/api/payments" => ok(json!({ "paymentId": 17 })),
        _ => ok(json!({ "collection": [] })),
    }
}

pub fn shop() -> MockRequester {
    MockRequester::new(shop_response)
}
