//! Runtime settings (environment) and the worker configuration file (YAML).

use crate::error::WorkerError;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::{self, RetentionPolicy, StorageType};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment-variable knobs. Everything else comes from the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Broker URL (`NATS_URL`).
    pub nats_url: String,
    /// Jobs pull timeout (`COSMO_JOBS_FETCH_TIMEOUT`, seconds).
    pub jobs_fetch_timeout: Duration,
    /// Scheduler pull timeout (`COSMO_JOBS_SCHEDULER_FETCH_TIMEOUT`, seconds).
    pub scheduler_fetch_timeout: Duration,
    /// Streams pull timeout (`COSMO_STREAMS_FETCH_TIMEOUT`, seconds).
    pub streams_fetch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            jobs_fetch_timeout: Duration::from_millis(100),
            scheduler_fetch_timeout: Duration::from_secs(5),
            streams_fetch_timeout: Duration::from_millis(100),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            nats_url: std::env::var("NATS_URL").unwrap_or(defaults.nats_url),
            jobs_fetch_timeout: env_duration("COSMO_JOBS_FETCH_TIMEOUT", defaults.jobs_fetch_timeout),
            scheduler_fetch_timeout: env_duration(
                "COSMO_JOBS_SCHEDULER_FETCH_TIMEOUT",
                defaults.scheduler_fetch_timeout,
            ),
            streams_fetch_timeout: env_duration(
                "COSMO_STREAMS_FETCH_TIMEOUT",
                defaults.streams_fetch_timeout,
            ),
        }
    }
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|secs| *secs > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

/// The worker configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CosmoConfig {
    /// Streams ensured at setup. Durations are seconds here, nanoseconds on
    /// the wire; the SDK does the conversion.
    #[serde(default)]
    pub streams: BTreeMap<String, StreamSpec>,

    #[serde(default)]
    pub consumers: ConsumersConfig,
}

impl CosmoConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkerError::config_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, WorkerError> {
        serde_yaml::from_str(raw).map_err(|e| WorkerError::config_error(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumersConfig {
    /// Jobs pull consumers, keyed by stream name.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobsConsumerConfig>,

    /// Stream-handler overrides, keyed by handler tag.
    #[serde(default)]
    pub streams: BTreeMap<String, StreamConsumerOverride>,
}

/// Declaration of a stream to ensure at setup.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSpec {
    pub subjects: Vec<String>,
    /// Seconds; 0 keeps messages forever.
    #[serde(default)]
    pub max_age: u64,
    /// Seconds; 0 takes the server default.
    #[serde(default)]
    pub duplicate_window: u64,
    #[serde(default)]
    pub max_messages: i64,
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default)]
    pub retention: RetentionKind,
}

impl StreamSpec {
    pub fn to_stream_config(&self, name: &str) -> stream::Config {
        stream::Config {
            name: name.to_string(),
            subjects: self.subjects.clone(),
            max_age: Duration::from_secs(self.max_age),
            duplicate_window: Duration::from_secs(self.duplicate_window),
            max_messages: self.max_messages,
            storage: self.storage.into(),
            retention: self.retention.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

impl From<StorageKind> for StorageType {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::File => StorageType::File,
            StorageKind::Memory => StorageType::Memory,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionKind {
    #[default]
    Limits,
    Workqueue,
    Interest,
}

impl From<RetentionKind> for RetentionPolicy {
    fn from(kind: RetentionKind) -> Self {
        match kind {
            RetentionKind::Limits => RetentionPolicy::Limits,
            RetentionKind::Workqueue => RetentionPolicy::WorkQueue,
            RetentionKind::Interest => RetentionPolicy::Interest,
        }
    }
}

/// A jobs pull consumer: `consumers.jobs.<stream>`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConsumerConfig {
    pub subject: String,

    /// Fetch-rotation weight; 0 parks the stream.
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Broker delivery cap; -1 is unlimited.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,

    #[serde(default = "default_max_ack_pending")]
    pub max_ack_pending: i64,

    /// Seconds before an un-acked delivery is redelivered.
    #[serde(default = "default_ack_wait")]
    pub ack_wait: u64,
}

fn default_priority() -> u32 {
    1
}

fn default_max_deliver() -> i64 {
    -1
}

fn default_max_ack_pending() -> i64 {
    1000
}

fn default_ack_wait() -> u64 {
    30
}

impl JobsConsumerConfig {
    pub fn to_pull_config(&self, durable: &str) -> pull::Config {
        pull::Config {
            durable_name: Some(durable.to_string()),
            name: Some(durable.to_string()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.ack_wait),
            max_deliver: self.max_deliver,
            max_ack_pending: self.max_ack_pending,
            filter_subject: self.subject.clone(),
            ..Default::default()
        }
    }
}

/// A `consumers.streams.<tag>` entry: names a registered handler class and
/// overrides or supplies its options.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConsumerOverride {
    pub class: String,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub subjects: Option<Vec<String>>,
    #[serde(default)]
    pub consumer_name: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub start_position: Option<StartPosition>,
    #[serde(default)]
    pub ack_wait: Option<u64>,
    #[serde(default)]
    pub max_deliver: Option<i64>,
    #[serde(default)]
    pub max_ack_pending: Option<i64>,
}

/// Where a fresh stream consumer starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    #[default]
    First,
    Last,
    New,
    At(DateTime<Utc>),
}

impl StartPosition {
    /// Parse a config value. Unrecognized input falls back to `First`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "first" => Self::First,
            "last" => Self::Last,
            "new" => Self::New,
            _ => DateTime::parse_from_rfc3339(raw.trim())
                .map(|ts| Self::At(ts.with_timezone(&Utc)))
                .unwrap_or(Self::First),
        }
    }

    pub fn deliver_policy(&self) -> DeliverPolicy {
        match self {
            Self::First => DeliverPolicy::All,
            Self::Last => DeliverPolicy::Last,
            Self::New => DeliverPolicy::New,
            Self::At(ts) => DeliverPolicy::ByStartTime {
                start_time: time::OffsetDateTime::from_unix_timestamp(ts.timestamp())
                    .unwrap_or(time::OffsetDateTime::UNIX_EPOCH),
            },
        }
    }
}

impl<'de> Deserialize<'de> for StartPosition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
