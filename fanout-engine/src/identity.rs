//! Unique test data for concurrent request creation.
//!
//! Every value handed out by an [`IdentityGenerator`] is derived from a single atomic counter, so
//! two callers never observe the same value regardless of how many virtual users race on it. The
//! wall clock only contributes a base offset and the formatted datetime, and is never relied upon
//! for uniqueness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Format used by the target services for datetime fields, e.g. `17-10-2026__14:03:59:123456`.
const DATETIME_FORMAT: &str = "%d-%m-%Y__%H:%M:%S:%6f";

static SHARED: LazyLock<Arc<IdentityGenerator>> =
    LazyLock::new(|| Arc::new(IdentityGenerator::new()));

/// Generates process-wide unique scalar and string values.
#[derive(Debug)]
pub struct IdentityGenerator {
    counter: AtomicU64,
    base_millis: u64,
}

impl IdentityGenerator {
    /// Creates a generator whose counter starts at zero.
    ///
    /// The base for [`timestamp`](Self::timestamp) is the current wall clock in milliseconds.
    pub fn new() -> Self {
        let base_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self::with_base(base_millis)
    }

    /// Creates a generator with a fixed timestamp base.
    pub fn with_base(base_millis: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            base_millis,
        }
    }

    /// Returns the generator shared by the whole process.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Increments the counter and returns the new value.
    ///
    /// The first call returns `1`.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A unique, timestamp-shaped number: the base in milliseconds plus [`next`](Self::next).
    pub fn timestamp(&self) -> u64 {
        self.base_millis + self.next()
    }

    /// A unique email address, `load_<ts>@test.com`.
    pub fn unique_email(&self) -> String {
        format!("load_{}@test.com", self.timestamp())
    }

    /// A unique username, `user_<ts>`.
    pub fn unique_username(&self) -> String {
        format!("user_{}", self.timestamp())
    }

    /// A unique product SKU, `SKU-<ts>`.
    pub fn unique_sku(&self) -> String {
        format!("SKU-{}", self.timestamp())
    }

    /// The current local time in the `dd-MM-yyyy__HH:mm:ss:SSSSSS` format.
    ///
    /// This value is not unique: many calls may land within the same microsecond.
    pub fn formatted_timestamp(&self) -> String {
        chrono::Local::now().format(DATETIME_FORMAT).to_string()
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    #[test]
    fn counter_starts_at_zero() {
        let ids = IdentityGenerator::with_base(1_000);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.timestamp(), 1_003);
    }

    #[test]
    fn helpers_use_templates() {
        let ids = IdentityGenerator::with_base(0);
        assert_eq!(ids.unique_email(), "load_1@test.com");
        assert_eq!(ids.unique_username(), "user_2");
        assert_eq!(ids.unique_sku(), "SKU-3");
    }

    #[test]
    fn formatted_timestamp_shape() {
        let ids = IdentityGenerator::new();
        let formatted = ids.formatted_timestamp();

        let (date, time) = formatted.split_once("__").unwrap();
        assert_eq!(date.len(), "dd-MM-yyyy".len());
        assert_eq!(time.len(), "HH:mm:ss:SSSSSS".len());
        assert_eq!(time.split(':').count(), 4);
    }

    #[test]
    fn unique_under_concurrency() {
        let ids = Arc::new(IdentityGenerator::new());
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    let values: Vec<_> = (0..10_000).map(|_| ids.next()).collect();
                    // each thread observes a strictly increasing sequence
                    assert!(values.windows(2).all(|w| w[0] < w[1]));
                    values
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for value in thread.join().unwrap() {
                assert!(seen.insert(value), "duplicate value {value}");
            }
        }

        assert_eq!(seen.len(), 160_000);
        assert_eq!(seen.iter().max(), Some(&160_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unique_across_tasks() {
        let ids = IdentityGenerator::shared();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let ids = Arc::clone(&ids);
                tokio::spawn(async move { (0..500).map(|_| ids.unique_sku()).collect::<Vec<_>>() })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in futures::future::join_all(tasks).await {
            for sku in task.unwrap() {
                assert!(seen.insert(sku));
            }
        }
        assert_eq!(seen.len(), 64 * 500);
    }
}
