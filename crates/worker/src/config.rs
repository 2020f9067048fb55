use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vitals_core::anomaly::{DEFAULT_WINDOW_SIZE, DEFAULT_Z_THRESHOLD};
use vitals_core::thresholds::{DEFAULT_HEART_RATE_MAX, DEFAULT_SPO2_MIN};
use vitals_core::{CoreError, DetectorConfig, DetectorScope, Thresholds};
use vitals_events::{DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_IDLE};

use crate::sink::DeliveryOrder;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read thresholds file {path}: {source}")]
    ThresholdsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Consumer name used when neither `CONSUMER_NAME` nor `HOSTNAME` is set.
pub const DEFAULT_CONSUMER_NAME: &str = "worker";

const DEFAULT_DETECTOR_IDLE_SECS: u64 = 3600;

/// Which transport carries the observation and alert topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBackend {
    Redis,
    /// In-process broker; nothing outside the process can publish to it.
    Memory,
}

impl FromStr for StreamBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown stream backend `{other}` (expected redis or memory)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}` (expected pretty or json)")),
        }
    }
}

/// Processing-service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_backend: StreamBackend,
    pub stream_url: String,
    pub observation_topic: String,
    pub alert_topic: String,
    pub group_id: String,
    /// Consumer name prefix; workers append `-<index>`. Must stay the same
    /// across restarts so pending entries are replayed by their owner.
    pub consumer_name: String,
    pub consumer_workers: usize,
    pub read_block: Duration,
    pub read_batch: usize,
    pub read_backoff: Duration,
    /// Idle time after which another consumer's pending entries are claimed.
    pub claim_idle: Duration,
    pub database_url: String,
    pub influx_addr: String,
    pub influx_db: String,
    pub influx_user: Option<String>,
    pub influx_pass: Option<String>,
    pub heart_rate_max: f64,
    pub spo2_min: f64,
    pub thresholds_file: Option<PathBuf>,
    pub detector: DetectorConfig,
    pub detector_scope: DetectorScope,
    /// Per-patient windows idle this long are dropped; `None` keeps them.
    pub detector_idle: Option<Duration>,
    pub delivery_order: DeliveryOrder,
    pub shutdown_grace: Duration,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `STREAM_BACKEND`          | `redis`                  |
    /// | `STREAM_URL`              | `redis://127.0.0.1:6379` |
    /// | `OBS_TOPIC`               | `observations`           |
    /// | `ALERT_TOPIC`             | `alerts`                 |
    /// | `GROUP_ID`                | `processing-service`     |
    /// | `CONSUMER_NAME`           | `$HOSTNAME`, else `worker` |
    /// | `CONSUMER_WORKERS`        | `1`                      |
    /// | `READ_BLOCK_MS`           | `5000`                   |
    /// | `READ_BATCH`              | `1`                      |
    /// | `READ_BACKOFF_MS`         | `1000`                   |
    /// | `CLAIM_IDLE_MS`           | `60000` (`0` disables)   |
    /// | `DATABASE_URL`            | required (or `POSTGRES_CONN`) |
    /// | `INFLUX_ADDR`             | required                 |
    /// | `INFLUX_DB`               | required                 |
    /// | `INFLUX_USER`             | unset                    |
    /// | `INFLUX_PASS`             | unset                    |
    /// | `HEART_RATE_MAX`          | `100`                    |
    /// | `SPO2_MIN`                | `90`                     |
    /// | `THRESHOLDS_FILE`         | unset                    |
    /// | `DETECTOR_WINDOW`         | `30`                     |
    /// | `DETECTOR_Z_THRESHOLD`    | `3.0`                    |
    /// | `DETECTOR_SCOPE`          | `per_patient`            |
    /// | `DETECTOR_IDLE_SECS`      | `3600` (`0` disables)    |
    /// | `ALERT_DELIVERY_ORDER`    | `persist_first`          |
    /// | `SHUTDOWN_GRACE_SECS`     | `2`                      |
    /// | `LOG_FORMAT`              | `pretty`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let window_size: usize = env.parse("DETECTOR_WINDOW", DEFAULT_WINDOW_SIZE)?;
        let z_threshold: f64 = env.parse("DETECTOR_Z_THRESHOLD", DEFAULT_Z_THRESHOLD)?;
        let detector = DetectorConfig::new(window_size, z_threshold)?;

        let consumer_workers: usize = env.parse("CONSUMER_WORKERS", 1)?;
        if consumer_workers == 0 {
            return Err(ConfigError::Invalid {
                var: "CONSUMER_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let read_batch: usize = env.parse("READ_BATCH", DEFAULT_BATCH_SIZE)?;
        if read_batch == 0 {
            return Err(ConfigError::Invalid {
                var: "READ_BATCH",
                value: "0".to_string(),
                reason: "must read at least one entry".to_string(),
            });
        }

        let detector_idle_secs: u64 = env.parse("DETECTOR_IDLE_SECS", DEFAULT_DETECTOR_IDLE_SECS)?;

        let database_url = env
            .get("DATABASE_URL")
            .or_else(|| env.get("POSTGRES_CONN"))
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            stream_backend: env.parse("STREAM_BACKEND", StreamBackend::Redis)?,
            stream_url: env.string("STREAM_URL", "redis://127.0.0.1:6379"),
            observation_topic: env.string("OBS_TOPIC", "observations"),
            alert_topic: env.string("ALERT_TOPIC", "alerts"),
            group_id: env.string("GROUP_ID", "processing-service"),
            consumer_name: env
                .get("CONSUMER_NAME")
                .or_else(|| env.get("HOSTNAME"))
                .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_string()),
            consumer_workers,
            read_block: Duration::from_millis(env.parse("READ_BLOCK_MS", 5000)?),
            read_batch,
            read_backoff: Duration::from_millis(env.parse("READ_BACKOFF_MS", 1000)?),
            claim_idle: Duration::from_millis(
                env.parse("CLAIM_IDLE_MS", DEFAULT_CLAIM_IDLE.as_millis() as u64)?,
            ),
            database_url,
            influx_addr: env.required("INFLUX_ADDR")?,
            influx_db: env.required("INFLUX_DB")?,
            influx_user: env.get("INFLUX_USER"),
            influx_pass: env.get("INFLUX_PASS"),
            heart_rate_max: env.parse("HEART_RATE_MAX", DEFAULT_HEART_RATE_MAX)?,
            spo2_min: env.parse("SPO2_MIN", DEFAULT_SPO2_MIN)?,
            thresholds_file: env.get("THRESHOLDS_FILE").map(PathBuf::from),
            detector,
            detector_scope: env.parse("DETECTOR_SCOPE", DetectorScope::default())?,
            detector_idle: (detector_idle_secs > 0).then(|| Duration::from_secs(detector_idle_secs)),
            delivery_order: env.parse("ALERT_DELIVERY_ORDER", DeliveryOrder::default())?,
            shutdown_grace: Duration::from_secs(env.parse("SHUTDOWN_GRACE_SECS", 2)?),
            log_format: env.parse("LOG_FORMAT", LogFormat::default())?,
        })
    }

    /// Build the rule set: the JSON file when configured, otherwise the two
    /// standard rules with the configured bounds.
    pub fn load_thresholds(&self) -> Result<Thresholds, ConfigError> {
        match &self.thresholds_file {
            Some(path) => {
                let json =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::ThresholdsFile {
                        path: path.clone(),
                        source,
                    })?;
                Ok(Thresholds::from_json(&json)?)
            }
            None => Ok(Thresholds::standard(self.heart_rate_max, self.spo2_min)?),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `var`.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/vitals"),
        ("INFLUX_ADDR", "http://localhost:8086"),
        ("INFLUX_DB", "vitals"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = load(&REQUIRED).unwrap();

        assert_eq!(cfg.stream_backend, StreamBackend::Redis);
        assert_eq!(cfg.observation_topic, "observations");
        assert_eq!(cfg.alert_topic, "alerts");
        assert_eq!(cfg.group_id, "processing-service");
        assert_eq!(cfg.consumer_name, DEFAULT_CONSUMER_NAME);
        assert_eq!(cfg.consumer_workers, 1);
        assert_eq!(cfg.read_batch, 1);
        assert_eq!(cfg.claim_idle, Duration::from_secs(60));
        assert_eq!(cfg.detector_idle, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.read_backoff, Duration::from_secs(1));
        assert_eq!(cfg.detector.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(cfg.detector_scope, DetectorScope::PerPatient);
        assert_eq!(cfg.delivery_order, DeliveryOrder::PersistFirst);
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(2));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(cfg.influx_user.is_none());
    }

    #[test]
    fn consumer_name_is_stable_across_loads() {
        let first = load(&REQUIRED).unwrap();
        let second = load(&REQUIRED).unwrap();
        assert_eq!(first.consumer_name, second.consumer_name);
        assert!(!first.consumer_name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn consumer_name_falls_back_to_hostname() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("HOSTNAME", "vitals-worker-7f9c"));
        assert_eq!(load(&vars).unwrap().consumer_name, "vitals-worker-7f9c");

        vars.push(("CONSUMER_NAME", "ward-a"));
        assert_eq!(load(&vars).unwrap().consumer_name, "ward-a");
    }

    #[test]
    fn zero_disables_claiming_and_window_eviction() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([("CLAIM_IDLE_MS", "0"), ("DETECTOR_IDLE_SECS", "0")]);

        let cfg = load(&vars).unwrap();
        assert!(cfg.claim_idle.is_zero());
        assert!(cfg.detector_idle.is_none());
    }

    #[test]
    fn zero_read_batch_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("READ_BATCH", "0"));
        assert_matches!(load(&vars), Err(ConfigError::Invalid { var: "READ_BATCH", .. }));
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = load(&REQUIRED[1..]).unwrap_err();
        assert_matches!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn postgres_conn_is_accepted_as_alias() {
        let cfg = load(&[
            ("POSTGRES_CONN", "postgres://db/alerts"),
            ("INFLUX_ADDR", "http://influx:8086"),
            ("INFLUX_DB", "vitals"),
        ])
        .unwrap();
        assert_eq!(cfg.database_url, "postgres://db/alerts");
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("HEART_RATE_MAX", "fast"));

        let err = load(&vars).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "HEART_RATE_MAX", .. });
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CONSUMER_WORKERS", "0"));
        assert_matches!(
            load(&vars),
            Err(ConfigError::Invalid { var: "CONSUMER_WORKERS", .. })
        );
    }

    #[test]
    fn invalid_detector_window_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DETECTOR_WINDOW", "1"));
        assert_matches!(load(&vars), Err(ConfigError::Core(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("STREAM_BACKEND", "memory"),
            ("CONSUMER_WORKERS", "4"),
            ("DETECTOR_SCOPE", "shared"),
            ("ALERT_DELIVERY_ORDER", "publish_first"),
            ("LOG_FORMAT", "json"),
            ("SPO2_MIN", "92.5"),
        ]);

        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.stream_backend, StreamBackend::Memory);
        assert_eq!(cfg.consumer_workers, 4);
        assert_eq!(cfg.detector_scope, DetectorScope::Shared);
        assert_eq!(cfg.delivery_order, DeliveryOrder::PublishFirst);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.spo2_min, 92.5);
    }

    #[test]
    fn standard_thresholds_use_configured_bounds() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("HEART_RATE_MAX", "120"));

        let thresholds = load(&vars).unwrap().load_thresholds().unwrap();
        let hr = thresholds
            .rules()
            .iter()
            .find(|r| r.code == "heart-rate")
            .unwrap();
        assert_eq!(hr.bound, 120.0);
    }

    #[test]
    fn missing_thresholds_file_is_reported() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("THRESHOLDS_FILE", "/nonexistent/thresholds.json"));

        let err = load(&vars).unwrap().load_thresholds().unwrap_err();
        assert_matches!(err, ConfigError::ThresholdsFile { .. });
    }
}
