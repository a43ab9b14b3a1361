//! A weighted catalog of operations from which virtual users draw their next unit of work.
//!
//! The catalog is built once at startup and shared read-only between all virtual users. Each
//! draw uses the calling user's own random source, so there is no global selection state.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use rand::rngs::SmallRng;
use rand_distr::Distribution;
use rand_distr::weighted::WeightedIndex;

use crate::error::CatalogError;
use crate::flow::Scenario;
use crate::identity::IdentityGenerator;
use crate::request::Request;

/// Per-call inputs available to a [`RequestFactory`].
#[derive(Debug)]
pub struct TaskContext<'a> {
    /// The virtual user's random source.
    pub rng: &'a mut SmallRng,
    /// The process-wide unique value generator.
    pub ids: &'a IdentityGenerator,
}

/// Builds the request for a single-request task.
pub type RequestFactory = fn(&mut TaskContext<'_>) -> Request;

/// What a catalog entry does when it is picked.
#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Issue one request built by the factory.
    Request(RequestFactory),
    /// Run a full multi-step scenario.
    Flow(Scenario),
}

/// A named, weighted operation.
#[derive(Debug)]
pub struct TaskEntry {
    name: String,
    weight: u32,
    behavior: Behavior,
    slow_threshold: Option<Duration>,
}

impl TaskEntry {
    /// Logs a warning whenever a request of this task takes longer than `threshold`.
    pub fn slow_threshold(&mut self, threshold: Duration) -> &mut Self {
        self.slow_threshold = Some(threshold);
        self
    }

    /// The operation name samples are recorded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The selection weight.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// What this task does.
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// The latency above which a request is logged as slow.
    pub fn threshold(&self) -> Option<Duration> {
        self.slow_threshold
    }
}

/// A builder for creating a [`TaskCatalog`].
#[derive(Debug, Default)]
pub struct TaskCatalogBuilder {
    entries: Vec<TaskEntry>,
    names: HashSet<String>,
}

impl TaskCatalogBuilder {
    /// Registers a task.
    ///
    /// Fails if `weight` is zero or `name` was registered before.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        weight: u32,
        behavior: Behavior,
    ) -> Result<&mut TaskEntry, CatalogError> {
        let name = name.into();
        if weight == 0 {
            return Err(CatalogError::ZeroWeight(name));
        }
        if !self.names.insert(name.clone()) {
            return Err(CatalogError::DuplicateName(name));
        }

        self.entries.push(TaskEntry {
            name,
            weight,
            behavior,
            slow_threshold: None,
        });
        let index = self.entries.len() - 1;
        Ok(&mut self.entries[index])
    }

    /// Creates the catalog.
    pub fn build(self) -> Result<TaskCatalog, CatalogError> {
        if self.entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        let distribution = WeightedIndex::new(self.entries.iter().map(|e| e.weight))?;
        let total_weight = self.entries.iter().map(|e| u64::from(e.weight)).sum();

        Ok(TaskCatalog {
            entries: self.entries,
            distribution,
            total_weight,
        })
    }
}

/// An immutable set of weighted tasks.
#[derive(Debug)]
pub struct TaskCatalog {
    entries: Vec<TaskEntry>,
    distribution: WeightedIndex<u32>,
    total_weight: u64,
}

impl TaskCatalog {
    /// Constructs a new, empty catalog builder.
    pub fn builder() -> TaskCatalogBuilder {
        TaskCatalogBuilder::default()
    }

    /// Selects one entry with probability `weight / total_weight`.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &TaskEntry {
        &self.entries[self.distribution.sample(rng)]
    }

    /// All entries in registration order.
    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// The selection probability of the named entry.
    pub fn probability(&self, name: &str) -> Option<f64> {
        let entry = self.entries.iter().find(|e| e.name == name)?;
        Some(f64::from(entry.weight) / self.total_weight as f64)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;

    use super::*;

    fn noop(_cx: &mut TaskContext<'_>) -> Request {
        Request::get("/noop")
    }

    #[test]
    fn rejects_zero_weight() {
        let mut builder = TaskCatalog::builder();
        let result = builder.register("zero", 0, Behavior::Request(noop));
        assert!(matches!(result, Err(CatalogError::ZeroWeight(name)) if name == "zero"));
    }

    #[test]
    fn rejects_duplicates() {
        let mut builder = TaskCatalog::builder();
        builder.register("a", 1, Behavior::Request(noop)).unwrap();
        let result = builder.register("a", 2, Behavior::Request(noop));
        assert!(matches!(result, Err(CatalogError::DuplicateName(_))));
    }

    #[test]
    fn rejects_empty() {
        let result = TaskCatalog::builder().build();
        assert!(matches!(result, Err(CatalogError::Empty)));
    }

    #[test]
    fn probabilities() {
        let mut builder = TaskCatalog::builder();
        builder
            .register("a", 3, Behavior::Request(noop))
            .unwrap()
            .slow_threshold(Duration::from_secs(2));
        builder
            .register("b", 1, Behavior::Flow(Scenario::Abandonment))
            .unwrap();
        let catalog = builder.build().unwrap();

        assert_eq!(catalog.total_weight(), 4);
        assert_eq!(catalog.probability("a"), Some(0.75));
        assert_eq!(catalog.probability("b"), Some(0.25));
        assert_eq!(catalog.probability("c"), None);
        assert_eq!(catalog.entries()[0].threshold(), Some(Duration::from_secs(2)));
        assert!(matches!(
            catalog.entries()[1].behavior(),
            Behavior::Flow(Scenario::Abandonment)
        ));
    }

    #[test]
    fn draws_converge_to_weights() {
        let mut builder = TaskCatalog::builder();
        builder.register("A", 50, Behavior::Request(noop)).unwrap();
        builder.register("B", 10, Behavior::Request(noop)).unwrap();
        let catalog = builder.build().unwrap();

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..100_000 {
            *counts.entry(catalog.pick(&mut rng).name()).or_default() += 1;
        }

        let ratio = f64::from(counts["A"]) / f64::from(counts["B"]);
        assert!((ratio - 5.0).abs() < 0.25, "ratio was {ratio}");
    }

    #[test]
    fn independent_sources_do_not_interfere() {
        let mut builder = TaskCatalog::builder();
        builder.register("A", 1, Behavior::Request(noop)).unwrap();
        builder.register("B", 1, Behavior::Request(noop)).unwrap();
        let catalog = builder.build().unwrap();

        // The same seed yields the same sequence, regardless of draws on other sources.
        let mut first = SmallRng::seed_from_u64(7);
        let mut second = SmallRng::seed_from_u64(7);
        let mut other = SmallRng::seed_from_u64(8);

        let a: Vec<_> = (0..32).map(|_| catalog.pick(&mut first).name()).collect();
        let b: Vec<_> = (0..32)
            .map(|_| {
                catalog.pick(&mut other);
                catalog.pick(&mut second).name()
            })
            .collect();
        assert_eq!(a, b);
    }
}
