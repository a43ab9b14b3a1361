//! A load engine which drives weighted, randomized traffic from many virtual users against a set
//! of HTTP services, and reports on latency pathologies caused by server-side fan-out.
//!
//! A [`TaskCatalog`] holds the weighted operations. Each entry is either a single request, or a
//! multi-step [`Scenario`] executed by the flow state machine in [`flow`]. The [`LoadEngine`]
//! spawns independent [`VirtualUser`](user::VirtualUser) loops which pick entries from the
//! catalog, execute them through an injected [`Requester`], and feed every completed unit of work
//! into a shared [`StatsAggregator`].
//!
//! At the end of a run, the [`ReportBuilder`] turns a [`StatsSnapshot`] into a [`Report`] with
//! totals, the slowest operations, a verdict per endpoint class that is prone to the *N+1*
//! pattern, and derived business metrics such as the cart abandonment rate.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod engine;
pub mod error;
pub mod flow;
pub mod identity;
pub mod report;
pub mod request;
pub mod sample;
pub mod scheduler;
pub mod stats;
pub mod user;

#[cfg(test)]
mod testutil;

pub use crate::engine::{EngineBuilder, EngineHooks, EngineSettings, LoadEngine};
pub use crate::error::{CatalogError, EngineError, SampleError, TransportError};
pub use crate::flow::{FlowOutcome, FlowState, Scenario};
pub use crate::identity::IdentityGenerator;
pub use crate::report::{Report, ReportBuilder, ThresholdClass, VerdictLevel};
pub use crate::request::{Method, Request, Requester, Response};
pub use crate::sample::MetricSample;
pub use crate::scheduler::{Behavior, TaskCatalog, TaskContext};
pub use crate::stats::{OperationStats, StatsAggregator, StatsSnapshot};
pub use crate::user::ThinkTime;
