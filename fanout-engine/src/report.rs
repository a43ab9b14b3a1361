//! The end-of-run summary.
//!
//! [`ReportBuilder::build`] turns a [`StatsSnapshot`] into a [`Report`]: overall totals and
//! throughput, the slowest operations, a verdict for every operation belonging to an endpoint
//! class that is prone to the *N+1* pattern, and business metrics derived from the flow steps.
//! All durations in the report are milliseconds.

use std::time::Duration;

use serde::Serialize;

use crate::flow::{Scenario, Step, operation_name};
use crate::stats::{OperationStats, StatsSnapshot};

/// Overall failure rate above which service logs should be inspected.
const FAILURE_RATE_ALERT: f64 = 0.05;

/// Prefix of single-request operations that create base data.
const CREATE_PREFIX: &str = "[CREATE]";

/// Latency thresholds for a class of endpoints.
///
/// An operation belongs to the class if its name starts with `prefix`. Its average duration is
/// compared against both thresholds to produce a [`VerdictLevel`].
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdClass {
    /// Operation name prefix identifying the class.
    pub prefix: String,
    /// Averages above this are a [`VerdictLevel::Warning`].
    pub warning: Duration,
    /// Averages above this are [`VerdictLevel::Critical`].
    pub critical: Duration,
}

impl ThresholdClass {
    /// Creates a class with the two thresholds.
    pub fn new(prefix: impl Into<String>, warning: Duration, critical: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            warning,
            critical,
        }
    }

    fn matches(&self, operation: &str) -> bool {
        operation.starts_with(&self.prefix)
    }

    fn level(&self, avg: Duration) -> VerdictLevel {
        if avg > self.critical {
            VerdictLevel::Critical
        } else if avg > self.warning {
            VerdictLevel::Warning
        } else {
            VerdictLevel::Acceptable
        }
    }
}

/// Qualitative assessment of a flagged operation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLevel {
    /// Below the warning threshold.
    Acceptable,
    /// Above the warning threshold: fan-out is measurable.
    Warning,
    /// Above the critical threshold: severe fan-out.
    Critical,
}

/// Totals over all operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Totals {
    /// Number of samples.
    pub requests: u64,
    /// Number of failed samples.
    pub failures: u64,
    /// `failures / requests`, zero without requests.
    pub failure_rate: f64,
    /// Mean duration.
    pub avg_ms: Option<f64>,
    /// Shortest duration.
    pub min_ms: Option<f64>,
    /// Longest duration.
    pub max_ms: Option<f64>,
    /// Samples per second over the run window.
    pub requests_per_second: f64,
    /// Length of the run window in seconds.
    pub window_secs: f64,
}

/// An entry of the slowest-operations ranking.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlowOperation {
    /// Operation name.
    pub name: String,
    /// Mean duration.
    pub avg_ms: f64,
    /// Approximate 95th percentile.
    pub p95_ms: f64,
    /// Longest duration.
    pub max_ms: f64,
    /// Number of samples.
    pub count: u64,
}

/// The assessment of one operation in a flagged class.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    /// Operation name.
    pub operation: String,
    /// Prefix of the class the operation matched.
    pub class: String,
    /// Number of samples.
    pub requests: u64,
    /// Number of failed samples.
    pub failures: u64,
    /// Mean duration.
    pub avg_ms: f64,
    /// Approximate 95th percentile.
    pub p95_ms: f64,
    /// Longest duration.
    pub max_ms: f64,
    /// Warning threshold of the class.
    pub warning_ms: f64,
    /// Critical threshold of the class.
    pub critical_ms: f64,
    /// The outcome.
    pub level: VerdictLevel,
}

/// Business activity generated by the flows.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BusinessMetrics {
    /// Successful registrations in any flow.
    pub users_registered: u64,
    /// Successful order creations in purchase flows.
    pub orders_created: u64,
    /// Successful payment submissions, regardless of the payment's outcome.
    pub payments_processed: u64,
    /// Carts created by abandonment flows.
    pub abandoned_carts: u64,
    /// `abandoned / (abandoned + orders)`, or `None` when both are zero.
    pub abandonment_rate: Option<f64>,
}

/// Follow-up actions suggested by the results.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Fan-out endpoints are slow; fetch related entities in batches or cache them.
    BatchFetching {
        /// The affected operations.
        operations: Vec<String>,
    },
    /// Too many requests failed overall.
    InspectServiceLogs {
        /// The overall failure rate.
        failure_rate: f64,
    },
    /// Create operations failed, usually because referenced base data is missing.
    CheckSeedData {
        /// The failing create operations.
        operations: Vec<String>,
    },
}

/// The structured summary of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    /// Totals over all operations.
    pub totals: Totals,
    /// Operations ranked by mean duration, slowest first.
    pub slowest: Vec<SlowOperation>,
    /// One verdict per operation in a flagged class.
    pub verdicts: Vec<Verdict>,
    /// Derived business metrics.
    pub business: BusinessMetrics,
    /// Suggested follow-ups.
    pub recommendations: Vec<Recommendation>,
}

/// Builds [`Report`]s from statistics snapshots.
#[derive(Clone, Debug)]
pub struct ReportBuilder {
    slowest: usize,
    classes: Vec<ThresholdClass>,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self {
            slowest: 10,
            classes: Vec::new(),
        }
    }
}

impl ReportBuilder {
    /// Creates a builder listing the `slowest` slowest operations.
    pub fn new(slowest: usize) -> Self {
        Self {
            slowest,
            ..Default::default()
        }
    }

    /// Flags operations matching `class` for a verdict.
    pub fn flag(mut self, class: ThresholdClass) -> Self {
        self.classes.push(class);
        self
    }

    /// Computes the report.
    pub fn build(&self, snapshot: &StatsSnapshot) -> Report {
        let totals = totals(snapshot);
        let slowest = self.slowest(snapshot);
        let verdicts = self.verdicts(snapshot);
        let business = business(snapshot);
        let recommendations = recommendations(snapshot, &totals, &verdicts);

        Report {
            totals,
            slowest,
            verdicts,
            business,
            recommendations,
        }
    }

    fn slowest(&self, snapshot: &StatsSnapshot) -> Vec<SlowOperation> {
        let mut ranked: Vec<_> = snapshot
            .iter()
            .filter_map(|(name, stats)| {
                Some(SlowOperation {
                    name: name.to_owned(),
                    avg_ms: millis(stats.avg()?),
                    p95_ms: p95_ms(stats),
                    max_ms: millis(stats.max()?),
                    count: stats.count(),
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.avg_ms.total_cmp(&a.avg_ms));
        ranked.truncate(self.slowest);
        ranked
    }

    /// One verdict per operation, judged by the first flagged class it belongs to.
    fn verdicts(&self, snapshot: &StatsSnapshot) -> Vec<Verdict> {
        snapshot
            .iter()
            .filter_map(|(name, stats)| {
                let class = self.classes.iter().find(|class| class.matches(name))?;
                let (avg, max) = (stats.avg()?, stats.max()?);
                Some(Verdict {
                    operation: name.to_owned(),
                    class: class.prefix.clone(),
                    requests: stats.count(),
                    failures: stats.failures(),
                    avg_ms: millis(avg),
                    p95_ms: p95_ms(stats),
                    max_ms: millis(max),
                    warning_ms: millis(class.warning),
                    critical_ms: millis(class.critical),
                    level: class.level(avg),
                })
            })
            .collect()
    }
}

fn totals(snapshot: &StatsSnapshot) -> Totals {
    let total = snapshot.total();
    let window_secs = snapshot.elapsed.as_secs_f64();
    let requests_per_second = if window_secs > 0.0 {
        total.count() as f64 / window_secs
    } else {
        0.0
    };

    Totals {
        requests: total.count(),
        failures: total.failures(),
        failure_rate: total.failure_rate().unwrap_or(0.0),
        avg_ms: total.avg().map(millis),
        min_ms: total.min().map(millis),
        max_ms: total.max().map(millis),
        requests_per_second,
        window_secs,
    }
}

fn business(snapshot: &StatsSnapshot) -> BusinessMetrics {
    let successes = |scenario, step| snapshot.successes(&operation_name(scenario, step));

    let users_registered = successes(Scenario::Purchase, Step::Register)
        + successes(Scenario::Abandonment, Step::Register);
    let orders_created = successes(Scenario::Purchase, Step::CreateOrder);
    let payments_processed = successes(Scenario::Purchase, Step::ProcessPayment);
    let abandoned_carts = successes(Scenario::Abandonment, Step::CreateCart);

    BusinessMetrics {
        users_registered,
        orders_created,
        payments_processed,
        abandoned_carts,
        abandonment_rate: abandonment_rate(abandoned_carts, orders_created),
    }
}

/// Fraction of carts that never turned into an order.
pub fn abandonment_rate(abandoned: u64, ordered: u64) -> Option<f64> {
    let carts = abandoned + ordered;
    (carts > 0).then(|| abandoned as f64 / carts as f64)
}

fn recommendations(
    snapshot: &StatsSnapshot,
    totals: &Totals,
    verdicts: &[Verdict],
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    let slow: Vec<_> = verdicts
        .iter()
        .filter(|v| v.level >= VerdictLevel::Warning)
        .map(|v| v.operation.clone())
        .collect();
    if !slow.is_empty() {
        recommendations.push(Recommendation::BatchFetching { operations: slow });
    }

    if totals.failure_rate > FAILURE_RATE_ALERT {
        recommendations.push(Recommendation::InspectServiceLogs {
            failure_rate: totals.failure_rate,
        });
    }

    let failing_creates: Vec<_> = snapshot
        .iter()
        .filter(|(name, stats)| name.starts_with(CREATE_PREFIX) && stats.failures() > 0)
        .map(|(name, _)| name.to_owned())
        .collect();
    if !failing_creates.is_empty() {
        recommendations.push(Recommendation::CheckSeedData {
            operations: failing_creates,
        });
    }

    recommendations
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1e6
}

fn p95_ms(stats: &OperationStats) -> f64 {
    stats.percentile(95.0).map_or(0.0, millis)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::flow::FlowRunner;
    use crate::identity::IdentityGenerator;
    use crate::sample::MetricSample;
    use crate::stats::StatsAggregator;
    use crate::testutil;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn record(stats: &StatsAggregator, name: &str, millis: u64, times: usize, succeeded: bool) {
        for _ in 0..times {
            stats.ingest(MetricSample::new(name, ms(millis), succeeded));
        }
    }

    fn builder() -> ReportBuilder {
        ReportBuilder::new(3)
            .flag(ThresholdClass::new("[N+1] GET All Carts", ms(500), ms(1_000)))
            .flag(ThresholdClass::new(
                "[N+1 NESTED] GET All Payments",
                ms(750),
                ms(1_500),
            ))
            .flag(ThresholdClass::new("[N+1 DUAL]", ms(600), ms(1_200)))
    }

    #[test]
    fn totals_and_ranking() {
        let stats = StatsAggregator::new();
        record(&stats, "[BASELINE] GET All Users", 20, 10, true);
        record(&stats, "[N+1] GET All Carts", 800, 4, true);
        record(&stats, "[N+1] GET All Carts", 1_200, 1, false);
        record(&stats, "[BASELINE] GET All Products", 40, 5, true);
        record(&stats, "[POTENTIAL N+1] GET All Orders", 300, 5, true);

        let mut snapshot = stats.snapshot();
        snapshot.elapsed = Duration::from_secs(5);
        let report = builder().build(&snapshot);

        assert_eq!(report.totals.requests, 25);
        assert_eq!(report.totals.failures, 1);
        assert!((report.totals.failure_rate - 0.04).abs() < 1e-9);
        assert!((report.totals.requests_per_second - 5.0).abs() < 1e-9);
        assert!((report.totals.min_ms.unwrap() - 20.0).abs() < 1e-3);
        assert!((report.totals.max_ms.unwrap() - 1_200.0).abs() < 1e-3);

        let names: Vec<_> = report.slowest.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "[N+1] GET All Carts",
                "[POTENTIAL N+1] GET All Orders",
                "[BASELINE] GET All Products",
            ]
        );
        assert!((report.slowest[0].avg_ms - 880.0).abs() < 1e-3);
        assert_eq!(report.slowest[0].count, 5);
    }

    #[test]
    fn verdict_levels_per_class() {
        let stats = StatsAggregator::new();
        // carts: 800ms is a warning for its class
        record(&stats, "[N+1] GET All Carts", 800, 3, true);
        // payments: 700ms stays below its warning threshold
        record(&stats, "[N+1 NESTED] GET All Payments", 700, 3, true);
        // both dual endpoints match the same class
        record(&stats, "[N+1 DUAL] GET All Shippings", 1_300, 2, true);
        record(&stats, "[N+1 DUAL] GET All Favourites", 100, 2, true);

        let report = builder().build(&stats.snapshot());
        let level = |name: &str| {
            report
                .verdicts
                .iter()
                .find(|v| v.operation == name)
                .map(|v| v.level)
        };

        assert_eq!(level("[N+1] GET All Carts"), Some(VerdictLevel::Warning));
        assert_eq!(
            level("[N+1 NESTED] GET All Payments"),
            Some(VerdictLevel::Acceptable)
        );
        assert_eq!(
            level("[N+1 DUAL] GET All Shippings"),
            Some(VerdictLevel::Critical)
        );
        assert_eq!(
            level("[N+1 DUAL] GET All Favourites"),
            Some(VerdictLevel::Acceptable)
        );
        assert_eq!(report.verdicts.len(), 4);

        let Some(Recommendation::BatchFetching { operations }) = report.recommendations.first()
        else {
            panic!("expected a batch fetching recommendation");
        };
        assert_eq!(operations.len(), 2);
    }

    #[test]
    fn overlapping_classes_yield_one_verdict() {
        let stats = StatsAggregator::new();
        record(&stats, "[N+1] GET All Carts", 800, 3, true);

        let report = builder()
            .flag(ThresholdClass::new("[N+1", ms(100), ms(200)))
            .build(&stats.snapshot());

        assert_eq!(report.verdicts.len(), 1);
        let verdict = &report.verdicts[0];
        assert_eq!(verdict.class, "[N+1] GET All Carts");
        assert_eq!(verdict.level, VerdictLevel::Warning);
    }

    #[test]
    fn unobserved_classes_are_skipped() {
        let stats = StatsAggregator::new();
        record(&stats, "[BASELINE] GET All Users", 20, 1, true);

        let report = builder().build(&stats.snapshot());
        assert!(report.verdicts.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn empty_snapshot() {
        let report = builder().build(&StatsSnapshot::default());
        assert_eq!(report.totals, Totals::default());
        assert!(report.slowest.is_empty());
        assert_eq!(report.business.abandonment_rate, None);
    }

    #[test]
    fn abandonment_only() {
        let stats = StatsAggregator::new();
        let cart = operation_name(Scenario::Abandonment, Step::CreateCart);
        record(&stats, &cart, 50, 8, true);

        let business = builder().build(&stats.snapshot()).business;
        assert_eq!(business.abandoned_carts, 8);
        assert_eq!(business.orders_created, 0);
        assert_eq!(business.abandonment_rate, Some(1.0));
    }

    #[test]
    fn abandonment_mixed_with_purchases() {
        let stats = StatsAggregator::new();
        for &step in Scenario::Purchase.steps() {
            record(&stats, &operation_name(Scenario::Purchase, step), 50, 6, true);
        }
        for &step in Scenario::Abandonment.steps() {
            record(&stats, &operation_name(Scenario::Abandonment, step), 50, 2, true);
        }
        // failed cart creations are not abandoned carts
        let cart = operation_name(Scenario::Abandonment, Step::CreateCart);
        record(&stats, &cart, 50, 3, false);

        let business = builder().build(&stats.snapshot()).business;
        assert_eq!(business.users_registered, 8);
        assert_eq!(business.orders_created, 6);
        assert_eq!(business.payments_processed, 6);
        assert_eq!(business.abandoned_carts, 2);
        assert_eq!(business.abandonment_rate, Some(0.25));
    }

    #[tokio::test]
    async fn abandonment_rate_of_executed_flows() {
        let requester = testutil::shop();
        let stats = StatsAggregator::new();
        let ids = IdentityGenerator::with_base(0);
        let runner = FlowRunner::new(&requester, &stats, &ids);
        let mut rng = SmallRng::seed_from_u64(7);

        for _ in 0..4 {
            runner.run(Scenario::Abandonment, &mut rng).await;
        }
        let business = builder().build(&stats.snapshot()).business;
        assert_eq!(business.abandoned_carts, 4);
        assert_eq!(business.abandonment_rate, Some(1.0));

        for _ in 0..6 {
            runner.run(Scenario::Purchase, &mut rng).await;
        }
        let business = builder().build(&stats.snapshot()).business;
        assert_eq!(business.orders_created, 6);
        assert_eq!(business.users_registered, 10);
        assert_eq!(business.abandonment_rate, Some(0.4));
    }

    #[test]
    fn failure_recommendations() {
        let stats = StatsAggregator::new();
        record(&stats, "[CREATE] POST Cart", 10, 5, false);
        record(&stats, "[CREATE] POST User", 10, 5, true);

        let report = builder().build(&stats.snapshot());
        assert_eq!(
            report.recommendations,
            [
                Recommendation::InspectServiceLogs { failure_rate: 0.5 },
                Recommendation::CheckSeedData {
                    operations: vec!["[CREATE] POST Cart".to_owned()]
                },
            ]
        );
    }

    #[test]
    fn serializes_to_json() {
        let stats = StatsAggregator::new();
        record(&stats, "[N+1] GET All Carts", 1_500, 1, true);

        let report = builder().build(&stats.snapshot());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["verdicts"][0]["level"], "critical");
        assert_eq!(json["recommendations"][0]["kind"], "batch_fetching");
        assert_eq!(json["business"]["abandonment_rate"], serde_json::Value::Null);
    }
}
