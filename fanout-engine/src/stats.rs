//! Online statistics over the stream of [`MetricSample`]s.
//!
//! Counts, failures, sum, min and max are exact. Percentiles are answered from a [`DDSketch`]
//! with a relative accuracy of 1%: any reported quantile `q̂` is within `±1%` of a value whose
//! rank is the requested rank. Memory per operation is bounded by the sketch's bin limit, not by
//! the number of samples.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use sketches_ddsketch::DDSketch;
use tokio::time::Instant;

use crate::sample::MetricSample;

/// Running statistics for a single operation.
///
/// A value with zero samples reports `None` for all derived statistics.
#[derive(Clone, Default)]
pub struct OperationStats {
    count: u64,
    failures: u64,
    sum: f64,
    min: f64,
    max: f64,
    sketch: DDSketch,
}

impl OperationStats {
    fn record(&mut self, duration: Duration, succeeded: bool) {
        let secs = duration.as_secs_f64();
        if self.count == 0 {
            self.min = secs;
            self.max = secs;
        } else {
            self.min = self.min.min(secs);
            self.max = self.max.max(secs);
        }

        self.count += 1;
        if !succeeded {
            self.failures += 1;
        }
        self.sum += secs;
        self.sketch.add(secs);
    }

    /// Folds the samples of `other` into `self`.
    pub fn merge(&mut self, other: &OperationStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.min = other.min;
            self.max = other.max;
        } else {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }

        self.count += other.count;
        self.failures += other.failures;
        self.sum += other.sum;
        if let Err(error) = self.sketch.merge(&other.sketch) {
            tracing::error!(?error, "failed to merge latency sketches");
        }
    }

    /// Total number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of failed samples. Never exceeds [`count`](Self::count).
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Number of successful samples.
    pub fn successes(&self) -> u64 {
        self.count - self.failures
    }

    /// Fraction of failed samples, or `None` without samples.
    pub fn failure_rate(&self) -> Option<f64> {
        (self.count > 0).then(|| self.failures as f64 / self.count as f64)
    }

    /// Sum of all durations.
    pub fn sum(&self) -> Duration {
        Duration::from_secs_f64(self.sum)
    }

    /// Mean duration.
    pub fn avg(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_secs_f64(self.sum / self.count as f64))
    }

    /// Shortest observed duration.
    pub fn min(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_secs_f64(self.min))
    }

    /// Longest observed duration.
    pub fn max(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_secs_f64(self.max))
    }

    /// Approximate `p`-th percentile, with `p` in `0..=100`.
    ///
    /// The estimate is within 1% relative error of the true order statistic.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.count == 0 || !p.is_finite() {
            return None;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        let value = self.sketch.quantile(q).ok().flatten()?;
        // The sketch may overshoot the true extremes by its relative error.
        Some(Duration::from_secs_f64(value.clamp(self.min, self.max)))
    }
}

impl fmt::Debug for OperationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationStats")
            .field("count", &self.count)
            .field("failures", &self.failures)
            .field("avg", &self.avg())
            .field("min", &self.min())
            .field("max", &self.max())
            .finish_non_exhaustive()
    }
}

/// A read of all operation statistics at one point in time.
///
/// Each [`OperationStats`] is internally consistent. Different operations may have been read at
/// slightly different instants.
#[derive(Clone, Debug, Default)]
pub struct StatsSnapshot {
    /// Length of the measurement window. For engine runs this ends when the stop is requested.
    pub elapsed: Duration,
    /// Statistics per operation name.
    pub operations: BTreeMap<String, OperationStats>,
}

impl StatsSnapshot {
    /// Statistics for one operation, if it has been observed.
    pub fn get(&self, operation: &str) -> Option<&OperationStats> {
        self.operations.get(operation)
    }

    /// Number of successful samples of one operation, zero if never observed.
    pub fn successes(&self, operation: &str) -> u64 {
        self.get(operation).map_or(0, OperationStats::successes)
    }

    /// All operations merged into a single aggregate.
    pub fn total(&self) -> OperationStats {
        let mut total = OperationStats::default();
        for stats in self.operations.values() {
            total.merge(stats);
        }
        total
    }

    /// Iterates over all observed operations.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OperationStats)> {
        self.operations.iter().map(|(name, stats)| (name.as_str(), stats))
    }
}

/// Aggregates samples from any number of concurrent producers.
///
/// Statistics for an operation are created lazily on its first sample. Each operation is guarded
/// by its own lock, so producers reporting different operations do not contend.
pub struct StatsAggregator {
    started: Instant,
    ingested: AtomicU64,
    operations: RwLock<HashMap<String, Arc<Mutex<OperationStats>>>>,
}

impl StatsAggregator {
    /// Creates an empty aggregator. Its clock starts now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ingested: AtomicU64::new(0),
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Records a sample.
    pub fn ingest(&self, sample: MetricSample) {
        let stats = self.operation(sample.operation());
        stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(sample.duration(), sample.succeeded());
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    fn operation(&self, name: &str) -> Arc<Mutex<OperationStats>> {
        {
            let operations = self.operations.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(stats) = operations.get(name) {
                return Arc::clone(stats);
            }
        }

        let mut operations = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(operations.entry(name.to_owned()).or_default())
    }

    /// Total number of samples ingested so far.
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Time since the aggregator was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Copies the current statistics of every operation.
    pub fn snapshot(&self) -> StatsSnapshot {
        let handles: Vec<_> = {
            let operations = self.operations.read().unwrap_or_else(PoisonError::into_inner);
            operations
                .iter()
                .map(|(name, stats)| (name.clone(), Arc::clone(stats)))
                .collect()
        };

        let operations = handles
            .into_iter()
            .map(|(name, stats)| {
                let stats = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
                (name, stats)
            })
            .collect();

        StatsSnapshot {
            elapsed: self.elapsed(),
            operations,
        }
    }

    /// Approximate `p`-th percentile of one operation, `None` if it has no samples.
    pub fn percentile(&self, operation: &str, p: f64) -> Option<Duration> {
        let stats = {
            let operations = self.operations.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(operations.get(operation)?)
        };
        let stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.percentile(p)
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("ingested", &self.ingested())
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}
