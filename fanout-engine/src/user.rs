//! Virtual users: the unit of concurrency.
//!
//! Each [`VirtualUser`] runs its own loop on its own task. It waits a random think time, picks
//! one entry from the shared [`TaskCatalog`], executes it and records the outcome. No virtual user
//! ever waits on another, and failures never leave the iteration that produced them.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::rngs::SmallRng;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::flow::{FlowOutcome, FlowRunner, Scenario};
use crate::identity::IdentityGenerator;
use crate::request::{self, Requester};
use crate::sample::MetricSample;
use crate::scheduler::{Behavior, TaskCatalog, TaskContext, TaskEntry};
use crate::stats::StatsAggregator;

/// Bounds of the random pause between two units of work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    /// Creates uniform bounds `min..=max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, EngineError> {
        if min > max {
            return Err(EngineError::InvalidThinkTime { min, max });
        }
        Ok(Self { min, max })
    }

    /// Draws one pause.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }

    /// The lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// The upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_millis(500),
        }
    }
}

/// State shared read-only by all virtual users of an engine.
#[derive(Debug)]
pub struct Environment {
    /// The weighted operations to pick from.
    pub catalog: TaskCatalog,
    /// The aggregator every sample is delivered to.
    pub stats: Arc<StatsAggregator>,
    /// Executes requests against the system under test.
    pub requester: Arc<dyn Requester>,
    /// Unique value generator for request payloads.
    pub ids: Arc<IdentityGenerator>,
    /// Pause between units of work.
    pub think_time: ThinkTime,
}

/// One independently scheduled simulated client.
#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    rng: SmallRng,
    env: Arc<Environment>,
}

impl VirtualUser {
    /// Creates a user with its own random source.
    pub fn new(id: u64, rng: SmallRng, env: Arc<Environment>) -> Self {
        Self { id, rng, env }
    }

    /// The identity of this user within its engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs until `cancel` fires, returning the number of completed units of work.
    ///
    /// Cancellation is observed during the think time. A unit of work that already started runs
    /// to completion unless the task is aborted.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        tracing::trace!(user = self.id, "virtual user started");
        let mut completed = 0;

        loop {
            let pause = self.env.think_time.sample(&mut self.rng);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }

            self.step().await;
            completed += 1;
        }

        tracing::trace!(user = self.id, completed, "virtual user stopped");
        completed
    }

    /// Picks one catalog entry and executes it.
    pub async fn step(&mut self) {
        let env = Arc::clone(&self.env);
        let entry = env.catalog.pick(&mut self.rng);

        match entry.behavior() {
            Behavior::Request(factory) => self.request(entry, factory).await,
            Behavior::Flow(scenario) => {
                let outcome = self.flow(scenario).await;
                tracing::debug!(
                    user = self.id,
                    %scenario,
                    state = ?outcome.state,
                    steps = outcome.executed.len(),
                    "flow finished"
                );
            }
        }
    }

    async fn request(&mut self, entry: &TaskEntry, factory: crate::scheduler::RequestFactory) {
        let env = &self.env;
        let request = factory(&mut TaskContext {
            rng: &mut self.rng,
            ids: &env.ids,
        });

        let (elapsed, result) = request::execute_timed(env.requester.as_ref(), request).await;
        let succeeded = match &result {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                tracing::debug!(
                    user = self.id,
                    operation = entry.name(),
                    status = response.status,
                    "request failed"
                );
                false
            }
            Err(error) => {
                tracing::debug!(
                    user = self.id,
                    operation = entry.name(),
                    error = error as &dyn std::error::Error,
                    "request failed"
                );
                false
            }
        };

        if let Some(threshold) = entry.threshold() {
            if elapsed > threshold {
                let items = result
                    .as_ref()
                    .ok()
                    .and_then(|response| response.collection())
                    .map(Vec::len);
                tracing::warn!(
                    operation = entry.name(),
                    ?elapsed,
                    ?threshold,
                    items,
                    "slow response"
                );
            }
        }

        env.stats
            .ingest(MetricSample::new(entry.name(), elapsed, succeeded));
    }

    async fn flow(&mut self, scenario: Scenario) -> FlowOutcome {
        let env = &self.env;
        let runner = FlowRunner::new(env.requester.as_ref(), &env.stats, &env.ids);
        runner.run(scenario, &mut self.rng).await
    }
}
