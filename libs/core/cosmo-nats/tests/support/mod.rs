//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use cosmo_nats::{
    BrokerClient, CosmoConfig, Engine, EngineOptions, JobContext, JobHandler, ProcessingError,
    Registry, Serializer, Settings, StreamHandler, StreamMessage,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use test_utils::TestNats;

pub fn broker(nats: &TestNats) -> Arc<BrokerClient> {
    Arc::new(BrokerClient::from_client(nats.client()))
}

pub fn settings(nats: &TestNats) -> Settings {
    Settings {
        nats_url: nats.url().to_string(),
        ..Default::default()
    }
}

pub fn engine(
    nats: &TestNats,
    registry: Registry,
    config: CosmoConfig,
    options: EngineOptions,
) -> Engine {
    Engine::new(
        broker(nats),
        Arc::new(registry),
        config,
        settings(nats),
        options,
    )
}

/// Poll `probe` every 100ms until it returns true or `deadline` passes.
pub async fn wait_until<F>(deadline: Duration, mut probe: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    probe()
}

/// Poll until `stream` holds exactly `count` messages.
pub async fn wait_for_messages(
    client: &Arc<BrokerClient>,
    stream: &str,
    count: u64,
    deadline: Duration,
) -> bool {
    let start = std::time::Instant::now();
    loop {
        let matched = client
            .stream_info(stream)
            .await
            .map(|stats| stats.messages == count)
            .unwrap_or(false);
        if matched {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Job handler that succeeds and counts invocations.
pub struct CountingJob {
    pub invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for CountingJob {
    async fn perform(&self, _ctx: &JobContext, _args: &[Value]) -> Result<(), ProcessingError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Job handler that always fails recoverably and counts invocations.
pub struct FailingJob {
    pub invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for FailingJob {
    async fn perform(&self, _ctx: &JobContext, _args: &[Value]) -> Result<(), ProcessingError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(ProcessingError::failed("always fails"))
    }
}

/// Job handler that sleeps while tracking concurrent invocations.
pub struct SlowJob {
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for SlowJob {
    async fn perform(&self, _ctx: &JobContext, _args: &[Value]) -> Result<(), ProcessingError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON serializer with a version tag in front, to prove the serializer
/// seam is honored end to end.
pub struct PrefixSerializer;

impl PrefixSerializer {
    pub const PREFIX: &'static [u8] = b"v1:";
}

impl Serializer for PrefixSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = Self::PREFIX.to_vec();
        bytes.extend(serde_json::to_vec(value)?);
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, serde_json::Error> {
        let stripped = bytes.strip_prefix(Self::PREFIX).unwrap_or(bytes);
        serde_json::from_slice(stripped)
    }
}

/// Stream handler that decodes every message through its serializer, records
/// the values, and acks.
pub struct DecodingHandler {
    pub values: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl StreamHandler for DecodingHandler {
    async fn process_one(&self, message: StreamMessage) -> Result<(), ProcessingError> {
        let value = message.data()?;
        self.values.lock().unwrap().push(value);
        message
            .ack()
            .await
            .map_err(|e| ProcessingError::failed(e.to_string()))?;
        Ok(())
    }
}

/// Stream handler that acks every message and records batch sizes.
pub struct CollectingHandler {
    pub total: Arc<AtomicUsize>,
    pub batch_sizes: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl StreamHandler for CollectingHandler {
    async fn process(&self, messages: Vec<StreamMessage>) -> Result<(), ProcessingError> {
        self.batch_sizes.lock().unwrap().push(messages.len());
        for message in messages {
            self.total.fetch_add(1, Ordering::SeqCst);
            message
                .ack()
                .await
                .map_err(|e| ProcessingError::failed(e.to_string()))?;
        }
        Ok(())
    }

    async fn process_one(&self, _message: StreamMessage) -> Result<(), ProcessingError> {
        unreachable!("process is overridden")
    }
}
