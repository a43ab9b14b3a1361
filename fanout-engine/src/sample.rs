//! The unit of observation flowing from task execution into aggregation.

use std::time::{Duration, SystemTime};

use crate::error::SampleError;

/// One completed unit of work: a request or a single flow step.
///
/// Samples are immutable once created. A negative or non-finite duration can't be represented,
/// so malformed samples are rejected before they ever reach the [`StatsAggregator`].
///
/// [`StatsAggregator`]: crate::StatsAggregator
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    operation: String,
    duration: Duration,
    succeeded: bool,
    observed_at: SystemTime,
}

impl MetricSample {
    /// Creates a sample observed right now.
    pub fn new(operation: impl Into<String>, duration: Duration, succeeded: bool) -> Self {
        Self {
            operation: operation.into(),
            duration,
            succeeded,
            observed_at: SystemTime::now(),
        }
    }

    /// Creates a sample from a duration in seconds.
    ///
    /// Fails for negative, `NaN` or infinite durations.
    pub fn from_secs_f64(
        operation: impl Into<String>,
        secs: f64,
        succeeded: bool,
    ) -> Result<Self, SampleError> {
        let duration =
            Duration::try_from_secs_f64(secs).map_err(|_| SampleError::InvalidDuration(secs))?;
        Ok(Self::new(operation, duration, succeeded))
    }

    /// Overrides the observation time.
    pub fn observed_at(mut self, observed_at: SystemTime) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// The operation name this sample is recorded under.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// How long the unit of work took.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the unit of work succeeded.
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// When the sample was taken.
    pub fn timestamp(&self) -> SystemTime {
        self.observed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_duration() {
        let result = MetricSample::from_secs_f64("op", -0.5, true);
        assert!(matches!(result, Err(SampleError::InvalidDuration(_))));
    }

    #[test]
    fn rejects_nan() {
        assert!(MetricSample::from_secs_f64("op", f64::NAN, true).is_err());
        assert!(MetricSample::from_secs_f64("op", f64::INFINITY, true).is_err());
    }

    #[test]
    fn accepts_zero() {
        let sample = MetricSample::from_secs_f64("op", 0.0, false).unwrap();
        assert_eq!(sample.duration(), Duration::ZERO);
        assert!(!sample.succeeded());
        assert_eq!(sample.operation(), "op");
    }
}
