//! Multi-step business scenarios.
//!
//! A scenario is a fixed, ordered list of [`Step`]s. Each step depends on identifiers returned by
//! earlier steps, which are carried in a private [`FlowContext`]. The first failing step moves
//! the flow to [`FlowState::Aborted`]; an aborted flow is a normal outcome, not an error.
//!
//! ```text
//! Start → Registered → Browsed → CartCreated → OrderCreated → ShippingCreated
//!       → PaymentAttempted → Completed
//! ```
//!
//! Every executed step emits exactly one [`MetricSample`], named after both the scenario and the
//! step (see [`operation_name`]) so flow traffic can be told apart from baseline operations.

use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand_distr::Distribution;
use rand_distr::weighted::WeightedIndex;
use serde_json::{Value, json};
use thiserror::Error;

use crate::error::TransportError;
use crate::identity::IdentityGenerator;
use crate::request::{self, Request, Requester, Response};
use crate::sample::MetricSample;
use crate::stats::StatsAggregator;

/// Relative weights of accepted, rejected and pending payments, in percent.
const PAYMENT_WEIGHTS: [u32; 3] = [85, 10, 5];
const PAYMENT_OUTCOMES: [PaymentOutcome; 3] = [
    PaymentOutcome::Accepted,
    PaymentOutcome::Rejected,
    PaymentOutcome::Pending,
];

static PAYMENT_DISTRIBUTION: LazyLock<Option<WeightedIndex<u32>>> =
    LazyLock::new(|| WeightedIndex::new(PAYMENT_WEIGHTS).ok());

/// A named end-to-end user journey.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Scenario {
    /// Register, browse, fill a cart, order, ship and pay.
    Purchase,
    /// Register and create a cart, then leave without ordering.
    Abandonment,
}

impl Scenario {
    /// The steps of this scenario, in execution order.
    pub fn steps(self) -> &'static [Step] {
        match self {
            Scenario::Purchase => &[
                Step::Register,
                Step::Browse,
                Step::CreateCart,
                Step::CreateOrder,
                Step::CreateShipping,
                Step::ProcessPayment,
            ],
            Scenario::Abandonment => &[Step::Register, Step::CreateCart],
        }
    }

    /// Short label used in operation names.
    pub fn label(self) -> &'static str {
        match self {
            Scenario::Purchase => "purchase",
            Scenario::Abandonment => "abandon",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single step of a scenario.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Step {
    /// Create a user.
    Register,
    /// List products and pick one.
    Browse,
    /// Create a cart for the user.
    CreateCart,
    /// Create an order for the cart.
    CreateOrder,
    /// Create a shipping item for the order and product.
    CreateShipping,
    /// Submit a payment for the order.
    ProcessPayment,
}

impl Step {
    /// Human readable title of the step.
    pub fn title(self) -> &'static str {
        match self {
            Step::Register => "Register User",
            Step::Browse => "Browse Products",
            Step::CreateCart => "Create Cart",
            Step::CreateOrder => "Create Order",
            Step::CreateShipping => "Create Shipping",
            Step::ProcessPayment => "Process Payment",
        }
    }

    /// The state reached once this step succeeds.
    pub fn reached(self) -> FlowState {
        match self {
            Step::Register => FlowState::Registered,
            Step::Browse => FlowState::Browsed,
            Step::CreateCart => FlowState::CartCreated,
            Step::CreateOrder => FlowState::OrderCreated,
            Step::CreateShipping => FlowState::ShippingCreated,
            Step::ProcessPayment => FlowState::PaymentAttempted,
        }
    }
}

/// The operation name samples of `step` within `scenario` are recorded under.
pub fn operation_name(scenario: Scenario, step: Step) -> String {
    format!("[FLOW {}] {}", scenario.label(), step.title())
}

/// Progress of a scenario execution.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FlowState {
    /// Nothing has executed yet.
    Start,
    /// A user was created.
    Registered,
    /// A product was chosen.
    Browsed,
    /// A cart was created.
    CartCreated,
    /// An order was created.
    OrderCreated,
    /// A shipping item was created.
    ShippingCreated,
    /// A payment was submitted, regardless of its business outcome.
    PaymentAttempted,
    /// All steps of the scenario succeeded.
    Completed,
    /// A step failed and the remaining steps were skipped.
    Aborted,
}

/// Business outcome of a submitted payment.
///
/// All three are successful steps; only transport or validation failures abort a flow.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PaymentOutcome {
    /// The payment went through.
    Accepted,
    /// The payment was declined.
    Rejected,
    /// The payment is still being processed.
    Pending,
}

impl PaymentOutcome {
    fn sample(rng: &mut SmallRng) -> Self {
        match PAYMENT_DISTRIBUTION.as_ref() {
            Some(distribution) => PAYMENT_OUTCOMES[distribution.sample(rng)],
            None => PaymentOutcome::Accepted,
        }
    }

    fn status(self) -> &'static str {
        match self {
            PaymentOutcome::Accepted => "COMPLETED",
            PaymentOutcome::Rejected => "NOT_STARTED",
            PaymentOutcome::Pending => "IN_PROGRESS",
        }
    }
}

/// Why a step failed.
#[derive(Debug, Error)]
pub enum StepError {
    /// The request never produced a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The target answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// A required identifier was absent from the response, or from earlier steps.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A listing returned no items to choose from.
    #[error("empty collection")]
    EmptyCollection,
}

/// Identifiers produced by earlier steps for consumption by later ones.
///
/// Owned by exactly one scenario execution and dropped when it ends.
#[derive(Debug, Default)]
struct FlowContext {
    user_id: Option<i64>,
    product_id: Option<i64>,
    cart_id: Option<i64>,
    order_id: Option<i64>,
}

fn required(value: Option<i64>, field: &'static str) -> Result<i64, StepError> {
    value.ok_or(StepError::MissingField(field))
}

/// The result of one scenario execution.
#[derive(Debug)]
pub struct FlowOutcome {
    /// Which scenario ran.
    pub scenario: Scenario,
    /// Either [`FlowState::Completed`] or [`FlowState::Aborted`].
    pub state: FlowState,
    /// Steps that executed, in order. The last one failed if the flow aborted.
    pub executed: Vec<Step>,
    /// The payment outcome, if the payment step succeeded.
    pub payment: Option<PaymentOutcome>,
    /// The failing step and its reason, if the flow aborted.
    pub abort: Option<(Step, StepError)>,
}

impl FlowOutcome {
    /// Whether every step succeeded.
    pub fn is_completed(&self) -> bool {
        self.state == FlowState::Completed
    }
}

/// Executes scenarios against a [`Requester`], reporting every step to a [`StatsAggregator`].
#[derive(Debug)]
pub struct FlowRunner<'a> {
    requester: &'a dyn Requester,
    stats: &'a StatsAggregator,
    ids: &'a IdentityGenerator,
}

impl<'a> FlowRunner<'a> {
    /// Creates a runner borrowing the shared collaborators.
    pub fn new(
        requester: &'a dyn Requester,
        stats: &'a StatsAggregator,
        ids: &'a IdentityGenerator,
    ) -> Self {
        Self {
            requester,
            stats,
            ids,
        }
    }

    /// Runs `scenario` end-to-end, stopping at the first failed step.
    pub async fn run(&self, scenario: Scenario, rng: &mut SmallRng) -> FlowOutcome {
        let mut context = FlowContext::default();
        let mut outcome = FlowOutcome {
            scenario,
            state: FlowState::Start,
            executed: Vec::with_capacity(scenario.steps().len()),
            payment: None,
            abort: None,
        };

        for &step in scenario.steps() {
            outcome.executed.push(step);
            let (elapsed, result) = self.step(step, &mut context, rng).await;
            let sample = MetricSample::new(operation_name(scenario, step), elapsed, result.is_ok());
            self.stats.ingest(sample);

            match result {
                Ok(payment) => {
                    outcome.state = step.reached();
                    outcome.payment = outcome.payment.or(payment);
                }
                Err(error) => {
                    tracing::debug!(%scenario, step = step.title(), %error, "flow aborted");
                    outcome.state = FlowState::Aborted;
                    outcome.abort = Some((step, error));
                    return outcome;
                }
            }
        }

        outcome.state = FlowState::Completed;
        tracing::trace!(%scenario, payment = ?outcome.payment, "flow completed");
        outcome
    }

    async fn step(
        &self,
        step: Step,
        context: &mut FlowContext,
        rng: &mut SmallRng,
    ) -> (std::time::Duration, Result<Option<PaymentOutcome>, StepError>) {
        let mut payment = None;
        let request = match self.build_request(step, context, rng, &mut payment) {
            Ok(request) => request,
            Err(error) => return (std::time::Duration::ZERO, Err(error)),
        };

        let (elapsed, result) = request::execute_timed(self.requester, request).await;
        let result = result
            .map_err(StepError::from)
            .and_then(|response| {
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(StepError::Status(response.status))
                }
            })
            .and_then(|response| extract(step, &response, context, rng))
            .map(|()| payment);

        (elapsed, result)
    }

    fn build_request(
        &self,
        step: Step,
        context: &FlowContext,
        rng: &mut SmallRng,
        payment: &mut Option<PaymentOutcome>,
    ) -> Result<Request, StepError> {
        let ids = self.ids;
        let request = match step {
            Step::Register => Request::post(
                "/user-service/api/users",
                json!({
                    "firstName": format!("Flow{}", ids.timestamp()),
                    "lastName": "Test",
                    "email": ids.unique_email(),
                    "phone": format!("+1{}", rng.random_range(2_000_000_000u64..3_000_000_000)),
                    "imageUrl": "https://via.placeholder.com/150",
                    "credential": {
                        "username": ids.unique_username(),
                        "password": "LoadTest123!",
                        "roleBasedAuthority": "ROLE_USER",
                        "isEnabled": true,
                        "isAccountNonExpired": true,
                        "isAccountNonLocked": true,
                        "isCredentialsNonExpired": true,
                    },
                }),
            ),
            Step::Browse => Request::get("/product-service/api/products"),
            Step::CreateCart => Request::post(
                "/order-service/api/carts",
                json!({ "userId": required(context.user_id, "userId")? }),
            ),
            Step::CreateOrder => Request::post(
                "/order-service/api/orders",
                json!({
                    "orderDate": ids.formatted_timestamp(),
                    "orderDesc": format!("Load test order {}", ids.timestamp()),
                    "orderFee": round_cents(rng.random_range(10.0..500.0)),
                    "cart": { "cartId": required(context.cart_id, "cartId")? },
                }),
            ),
            Step::CreateShipping => Request::post(
                "/shipping-service/api/shippings",
                json!({
                    "productId": required(context.product_id, "productId")?,
                    "orderId": required(context.order_id, "orderId")?,
                    "orderedQuantity": rng.random_range(1..=5),
                }),
            ),
            Step::ProcessPayment => {
                let outcome = PaymentOutcome::sample(rng);
                *payment = Some(outcome);
                Request::post(
                    "/payment-service/api/payments",
                    json!({
                        "isPayed": outcome == PaymentOutcome::Accepted,
                        "paymentStatus": outcome.status(),
                        "order": { "orderId": required(context.order_id, "orderId")? },
                    }),
                )
            }
        };

        Ok(request)
    }
}

/// Stores the identifiers later steps depend on.
fn extract(
    step: Step,
    response: &Response,
    context: &mut FlowContext,
    rng: &mut SmallRng,
) -> Result<(), StepError> {
    match step {
        Step::Register => {
            context.user_id = Some(required(response.id_field("userId"), "userId")?);
        }
        Step::Browse => {
            let products = response
                .collection()
                .ok_or(StepError::MissingField("collection"))?;
            let product = products.choose(rng).ok_or(StepError::EmptyCollection)?;
            let id = product.get("productId").and_then(Value::as_i64);
            context.product_id = Some(required(id, "productId")?);
        }
        Step::CreateCart => {
            context.cart_id = Some(required(response.id_field("cartId"), "cartId")?);
        }
        Step::CreateOrder => {
            context.order_id = Some(required(response.id_field("orderId"), "orderId")?);
        }
        Step::CreateShipping | Step::ProcessPayment => {}
    }

    Ok(())
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
