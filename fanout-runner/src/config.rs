//! Configuration for the load test runner.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `FANOUT__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested structures. For example:
//!
//! - `FANOUT__REMOTE=http://gateway:8080` sets the target of the load test
//! - `FANOUT__THINK_TIME__MAX=1s` sets the longest pause between two tasks
//!
//! The same in YAML:
//!
//! ```yaml
//! remote: http://gateway:8080
//! duration: 5m
//! population: 200
//! think_time:
//!   min: 100ms
//!   max: 1s
//! weights:
//!   "[CREATE] POST Cart": 0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fanout_engine::{EngineSettings, ReportBuilder, ThinkTime, ThresholdClass};
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "FANOUT__";

/// Bounds of the pause between two tasks of a virtual user.
#[derive(Debug, Deserialize, Serialize)]
pub struct ThinkTimeConfig {
    /// Shortest pause.
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    /// Longest pause.
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for ThinkTimeConfig {
    fn default() -> Self {
        let think_time = ThinkTime::default();
        Self {
            min: think_time.min(),
            max: think_time.max(),
        }
    }
}

/// Latency thresholds for a class of endpoints prone to fan-out.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Threshold {
    /// Prefix of the operation names in this class.
    pub prefix: String,
    /// Mean latency above which the class gets a warning.
    #[serde(with = "humantime_serde")]
    pub warning: Duration,
    /// Mean latency above which the class is critical.
    #[serde(with = "humantime_serde")]
    pub critical: Duration,
}

impl Threshold {
    fn new(prefix: &str, warning_ms: u64, critical_ms: u64) -> Self {
        Self {
            prefix: prefix.to_owned(),
            warning: Duration::from_millis(warning_ms),
            critical: Duration::from_millis(critical_ms),
        }
    }
}

/// The endpoint classes known to fan out to other services per item.
pub fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold::new("[N+1] GET All Carts", 500, 1_000),
        Threshold::new("[N+1 NESTED] GET All Payments", 750, 1_500),
        Threshold::new("[N+1 DUAL] GET All Shippings", 600, 1_200),
        Threshold::new("[N+1 DUAL] GET All Favourites", 600, 1_200),
    ]
}

/// Runtime configuration for the Tokio async runtime.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime executing the virtual users.
    ///
    /// Defaults to the number of CPU cores on the host machine.
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr. The `RUST_LOG` environment variable takes precedence.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Slow responses are reported at `WARN`, failed requests at `DEBUG`.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Main configuration struct for the runner.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the API gateway under test.
    pub remote: String,

    /// Number of concurrent virtual users.
    pub population: usize,

    /// Virtual users started per second during ramp-up.
    pub spawn_rate: f64,

    /// Total length of the test, including ramp-up.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Pause between two tasks of a virtual user.
    pub think_time: ThinkTimeConfig,

    /// How long in-flight requests may finish after the test ended.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Timeout for a single HTTP request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Seed for reproducible task selection.
    pub seed: Option<u64>,

    /// Weight overrides by task name. A weight of zero removes the task.
    pub weights: BTreeMap<String, u32>,

    /// Endpoint classes that receive a verdict in the report.
    pub thresholds: Vec<Threshold>,

    /// Number of entries in the slowest-operations ranking.
    pub slowest: usize,

    /// Writes the report as JSON to this path, in addition to the console.
    pub report_path: Option<PathBuf>,

    /// See [`Logging`].
    pub logging: Logging,

    /// See [`Runtime`].
    pub runtime: Runtime,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            remote: "http://localhost:8080".to_owned(),
            population: engine.population,
            spawn_rate: engine.spawn_rate,
            duration: Duration::from_secs(60),
            think_time: ThinkTimeConfig::default(),
            shutdown_grace: engine.shutdown_grace,
            request_timeout: Duration::from_secs(30),
            seed: None,
            weights: BTreeMap::new(),
            thresholds: default_thresholds(),
            slowest: 10,
            report_path: None,
            logging: Logging::default(),
            runtime: Runtime::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Engine settings for this configuration.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            population: self.population,
            spawn_rate: self.spawn_rate,
            think_time: ThinkTime::new(self.think_time.min, self.think_time.max)?,
            shutdown_grace: self.shutdown_grace,
            seed: self.seed,
        })
    }

    /// A report builder flagging the configured endpoint classes.
    pub fn report_builder(&self) -> ReportBuilder {
        self.thresholds
            .iter()
            .fold(ReportBuilder::new(self.slowest), |builder, threshold| {
                builder.flag(ThresholdClass::new(
                    threshold.prefix.clone(),
                    threshold.warning,
                    threshold.critical,
                ))
            })
    }
}
