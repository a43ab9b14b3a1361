//! The top-level orchestrator owning the virtual user population.
//!
//! [`LoadEngine`] spawns every [`VirtualUser`] as its own tokio task. All of them share one
//! [`StatsAggregator`], which outlives population changes. Stopping cancels every loop through a
//! shared [`CancellationToken`], gives in-flight work a bounded grace period, and aborts whatever
//! is still running afterwards.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::identity::IdentityGenerator;
use crate::request::Requester;
use crate::scheduler::TaskCatalog;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::user::{Environment, ThinkTime, VirtualUser};

/// Population and timing parameters of a run.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Number of concurrent virtual users to ramp up to.
    pub population: usize,
    /// Users started (or stopped) per second while ramping.
    pub spawn_rate: f64,
    /// Pause between two units of work of a single user.
    pub think_time: ThinkTime,
    /// How long in-flight work may continue after a stop was requested.
    pub shutdown_grace: Duration,
    /// Seed for the users' random sources. Random if `None`.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            population: 10,
            spawn_rate: 10.0,
            think_time: ThinkTime::default(),
            shutdown_grace: Duration::from_secs(10),
            seed: None,
        }
    }
}

/// Lifecycle callbacks, invoked synchronously by the engine.
pub trait EngineHooks: Send + Sync {
    /// Called once before the first virtual user starts.
    fn on_start(&self, engine: &LoadEngine) {
        let _ = engine;
    }

    /// Called once after all virtual users stopped, with the final statistics.
    fn on_stop(&self, snapshot: &StatsSnapshot) {
        let _ = snapshot;
    }
}

/// A builder for creating a [`LoadEngine`].
#[derive(Debug)]
pub struct EngineBuilder {
    catalog: TaskCatalog,
    requester: Arc<dyn Requester>,
    settings: EngineSettings,
    ids: Arc<IdentityGenerator>,
    hooks: Vec<Arc<dyn EngineHooks>>,
}

impl EngineBuilder {
    /// Population, timing and seed.
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses a dedicated identity generator instead of the process-wide one.
    pub fn identities(mut self, ids: Arc<IdentityGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Registers lifecycle callbacks.
    pub fn hooks(mut self, hooks: Arc<dyn EngineHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    /// Validates the settings and creates the engine. No users are started yet.
    pub fn build(self) -> Result<LoadEngine> {
        let settings = self.settings;
        spawn_period(settings.spawn_rate)?;
        let think_time = ThinkTime::new(settings.think_time.min(), settings.think_time.max())?;

        let env = Environment {
            catalog: self.catalog,
            stats: Arc::new(StatsAggregator::new()),
            requester: self.requester,
            ids: self.ids,
            think_time,
        };

        Ok(LoadEngine {
            env: Arc::new(env),
            settings,
            hooks: self.hooks,
            cancel: CancellationToken::new(),
            users: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
            started: Instant::now(),
        })
    }
}

/// The pause between two spawns at `rate` users per second.
///
/// Rates whose period overflows a [`Duration`] are rejected. Periods below a nanosecond are zero.
fn spawn_period(rate: f64) -> Result<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(EngineError::InvalidSpawnRate(rate));
    }
    Duration::try_from_secs_f64(rate.recip()).map_err(|_| EngineError::InvalidSpawnRate(rate))
}

impl fmt::Debug for dyn EngineHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EngineHooks")
    }
}

struct UserHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

/// Owns the virtual user population and the shared statistics.
pub struct LoadEngine {
    env: Arc<Environment>,
    settings: EngineSettings,
    hooks: Vec<Arc<dyn EngineHooks>>,
    cancel: CancellationToken,
    users: Vec<UserHandle>,
    /// Users cancelled by a ramp-down that may still be finishing their last unit of work.
    retired: Vec<JoinHandle<u64>>,
    next_id: u64,
    /// Start of the measurement window.
    started: Instant,
}

impl LoadEngine {
    /// Constructs a new engine builder.
    pub fn builder(catalog: TaskCatalog, requester: Arc<dyn Requester>) -> EngineBuilder {
        EngineBuilder {
            catalog,
            requester,
            settings: EngineSettings::default(),
            ids: IdentityGenerator::shared(),
            hooks: Vec::new(),
        }
    }

    /// The number of running virtual users.
    pub fn population(&self) -> usize {
        self.users.len()
    }

    /// The settings this engine was built with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The task catalog shared by all users.
    pub fn catalog(&self) -> &TaskCatalog {
        &self.env.catalog
    }

    /// The shared aggregator.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.env.stats
    }

    /// A point-in-time read of the statistics.
    ///
    /// The window is measured from the start of the run, or from construction if the engine is
    /// driven manually.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.env.stats.snapshot();
        snapshot.elapsed = self.started.elapsed();
        snapshot
    }

    /// Immediately starts or retires users until `target` are running.
    ///
    /// Retired users finish their current unit of work in the background. Their samples are kept.
    pub fn scale_to(&mut self, target: usize) {
        while self.users.len() < target {
            self.spawn_user();
        }
        while self.users.len() > target {
            if let Some(user) = self.users.pop() {
                tracing::trace!(user = user.id, "retiring virtual user");
                user.cancel.cancel();
                self.retired.push(user.task);
            }
        }
        self.retired.retain(|task| !task.is_finished());
    }

    /// Moves the population towards `target`, one user every `1 / rate` seconds.
    pub async fn ramp_to(&mut self, target: usize, rate: f64) -> Result<()> {
        let period = spawn_period(rate)?;

        tracing::debug!(from = self.population(), to = target, rate, "ramping");
        if period.is_zero() {
            self.scale_to(target);
            return Ok(());
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        while self.population() != target {
            ticker.tick().await;
            if self.population() < target {
                self.scale_to(self.population() + 1);
            } else {
                self.scale_to(self.population() - 1);
            }
        }

        Ok(())
    }

    fn spawn_user(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let rng = match self.settings.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(id)),
            None => SmallRng::seed_from_u64(rand::random()),
        };
        let user = VirtualUser::new(id, rng, Arc::clone(&self.env));
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(user.run(cancel.clone()));

        self.users.push(UserHandle { id, cancel, task });
    }

    /// Runs a complete load test.
    ///
    /// Calls `on_start`, ramps up to the configured population, and keeps the users running until
    /// `duration` elapsed or `shutdown` resolves, whichever comes first. Then stops the engine and
    /// returns the final statistics.
    pub async fn run(
        mut self,
        duration: Duration,
        shutdown: impl Future<Output = ()>,
    ) -> Result<StatsSnapshot> {
        if self.settings.population == 0 {
            return Err(EngineError::EmptyPopulation);
        }

        for hooks in &self.hooks {
            hooks.on_start(&self);
        }
        self.started = Instant::now();
        tracing::info!(
            population = self.settings.population,
            spawn_rate = self.settings.spawn_rate,
            ?duration,
            "starting load test"
        );

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        let target = self.settings.population;
        let rate = self.settings.spawn_rate;
        let ramped = tokio::select! {
            result = self.ramp_to(target, rate) => Some(result),
            _ = &mut deadline => None,
            _ = &mut shutdown => {
                tracing::info!("shutdown requested during ramp-up");
                None
            }
        };

        match ramped {
            Some(Err(error)) => {
                self.stop().await;
                return Err(error);
            }
            Some(Ok(())) => {
                tracing::info!(population = self.population(), "ramp-up complete");
                tokio::select! {
                    _ = &mut deadline => {}
                    _ = &mut shutdown => tracing::info!("shutdown requested"),
                }
            }
            None => {}
        }

        if self.population() == 0 && self.env.stats.ingested() == 0 {
            self.stop().await;
            return Err(EngineError::NoUsersStarted);
        }

        Ok(self.stop().await)
    }

    /// Stops all users and returns the final statistics.
    ///
    /// Users observe the stop at their next think time. Work still in flight after the grace
    /// period is abandoned. Once this returns, no further samples are ingested.
    ///
    /// The window of the returned snapshot ends when the stop is requested, so the grace period
    /// does not dilute throughput.
    pub async fn stop(mut self) -> StatsSnapshot {
        let window = self.started.elapsed();
        self.cancel.cancel();

        let mut tasks: Vec<_> = self.users.drain(..).map(|user| user.task).collect();
        tasks.append(&mut self.retired);
        tracing::info!(users = tasks.len(), "stopping virtual users");

        let grace = self.settings.shutdown_grace;
        let joined =
            tokio::time::timeout(grace, futures::future::join_all(tasks.iter_mut())).await;

        match joined {
            Ok(results) => {
                let completed: u64 = results.into_iter().filter_map(|r| r.ok()).sum();
                tracing::info!(completed, "all virtual users stopped");
            }
            Err(_) => {
                tracing::warn!(?grace, "grace period elapsed, abandoning in-flight requests");
                for task in &tasks {
                    task.abort();
                }
                // Wait until aborted tasks are gone so none of them can still record a sample.
                // Finished handles may already have been consumed by `join_all`.
                for task in tasks {
                    if !task.is_finished() {
                        let _ = task.await;
                    }
                }
            }
        }

        let mut snapshot = self.env.stats.snapshot();
        snapshot.elapsed = window;
        for hooks in &self.hooks {
            hooks.on_stop(&snapshot);
        }
        snapshot
    }
}

impl Drop for LoadEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for LoadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadEngine")
            .field("population", &self.population())
            .field("settings", &self.settings)
            .field("stats", &self.env.stats)
            .finish_non_exhaustive()
    }
}
