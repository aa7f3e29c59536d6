//! Stream processor: batch-oriented pull loop over registered stream handlers.

use crate::client::BrokerClient;
use crate::config::{CosmoConfig, Settings};
use crate::error::WorkerError;
use crate::pool::BoundedPool;
use crate::registry::{Registry, StreamHandlerOptions};
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::AckKind;
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cosmo_core::{ProcessingError, Serializer};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A broker message wrapped with the handler's serializer.
///
/// The payload is decoded lazily via [`StreamMessage::data`]; the handler
/// owns the ack decision and may `ack`, `nak`, or `term` each message
/// independently.
pub struct StreamMessage {
    raw: async_nats::jetstream::Message,
    serializer: Arc<dyn Serializer>,
}

impl StreamMessage {
    pub(crate) fn new(raw: async_nats::jetstream::Message, serializer: Arc<dyn Serializer>) -> Self {
        Self { raw, serializer }
    }

    /// Decode the payload with the handler's serializer.
    pub fn data(&self) -> Result<Value, ProcessingError> {
        self.serializer
            .deserialize(&self.raw.payload)
            .map_err(ProcessingError::from)
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.raw.payload
    }

    pub fn subject(&self) -> &str {
        self.raw.subject.as_str()
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.raw.headers.as_ref()
    }

    /// Delivery metadata, when the broker supplied it.
    pub fn meta(&self) -> Option<MessageMeta> {
        let info = self.raw.info().ok()?;
        Some(MessageMeta {
            stream_sequence: info.stream_sequence,
            consumer_sequence: info.consumer_sequence,
            num_delivered: info.delivered,
            num_pending: info.pending,
            timestamp: DateTime::from_timestamp(
                info.published.unix_timestamp(),
                info.published.nanosecond(),
            )
            .unwrap_or(DateTime::UNIX_EPOCH),
        })
    }

    pub async fn ack(self) -> Result<(), WorkerError> {
        self.raw.ack().await.map_err(WorkerError::from_jetstream_error)
    }

    pub async fn nak(self, delay: Option<Duration>) -> Result<(), WorkerError> {
        self.raw
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(WorkerError::from_jetstream_error)
    }

    pub async fn term(self) -> Result<(), WorkerError> {
        self.raw
            .ack_with(AckKind::Term)
            .await
            .map_err(WorkerError::from_jetstream_error)
    }
}

/// Copied delivery metadata.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub num_delivered: i64,
    pub num_pending: u64,
    pub timestamp: DateTime<Utc>,
}

/// A stream handler: one instance per stream, reused across batches.
///
/// Override `process` for batch-wise handling (batch acks, bulk writes);
/// the default iterates `process_one`. The processor never acks on the
/// handler's behalf.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn process(&self, messages: Vec<StreamMessage>) -> Result<(), ProcessingError> {
        for message in messages {
            self.process_one(message).await?;
        }
        Ok(())
    }

    async fn process_one(&self, message: StreamMessage) -> Result<(), ProcessingError>;
}

struct StreamEntry {
    tag: String,
    stream: String,
    handler: Arc<dyn StreamHandler>,
    consumer: Consumer<pull::Config>,
    batch_size: usize,
    serializer: Arc<dyn Serializer>,
}

/// Rotates over all registered stream handlers, fetching batches into the
/// pool and routing them to the handlers.
pub struct StreamProcessor {
    pool: Arc<BoundedPool>,
    running: watch::Receiver<bool>,
    entries: Vec<StreamEntry>,
    fetch_timeout: Duration,
}

impl StreamProcessor {
    /// Merge registered handler defaults with `consumers.streams` overrides
    /// and create one pull consumer per handler.
    ///
    /// Returns `None` when no stream handlers are registered. An override
    /// naming an unregistered class is a configuration error.
    pub async fn setup(
        client: Arc<BrokerClient>,
        registry: Arc<Registry>,
        config: &CosmoConfig,
        settings: &Settings,
        pool: Arc<BoundedPool>,
        running: watch::Receiver<bool>,
    ) -> Result<Option<Self>, WorkerError> {
        if !registry.has_stream_handlers() {
            return Ok(None);
        }

        for entry in config.consumers.streams.values() {
            if registry.stream_registrations().get(&entry.class).is_none() {
                return Err(WorkerError::config_error(format!(
                    "consumers.streams names unregistered class '{}'",
                    entry.class
                )));
            }
        }

        let mut entries = Vec::new();
        for (tag, registration) in registry.stream_registrations() {
            let mut options = registration.options.clone();
            if let Some(over) = config
                .consumers
                .streams
                .values()
                .find(|entry| entry.class == *tag)
            {
                apply_override(&mut options, over);
            }

            let consumer_config = pull::Config {
                durable_name: Some(options.consumer_name.clone()),
                name: Some(options.consumer_name.clone()),
                ack_policy: AckPolicy::Explicit,
                ack_wait: Duration::from_secs(options.ack_wait),
                max_deliver: options.max_deliver,
                max_ack_pending: options.max_ack_pending,
                filter_subjects: options.subjects.clone(),
                deliver_policy: options.start_position.deliver_policy(),
                ..Default::default()
            };

            let consumer = client
                .pull_subscribe(&options.stream, &options.consumer_name, consumer_config)
                .await?;

            entries.push(StreamEntry {
                tag: tag.clone(),
                stream: options.stream.clone(),
                handler: registration.handler.clone(),
                consumer,
                batch_size: options.batch_size,
                serializer: options.serializer.clone(),
            });
        }

        Ok(Some(Self {
            pool,
            running,
            entries,
            fetch_timeout: settings.streams_fetch_timeout,
        }))
    }

    /// Launch the work loop.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let this = Arc::new(self);
        vec![tokio::spawn(async move { this.run_work_loop().await })]
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    async fn run_work_loop(self: Arc<Self>) {
        info!(
            handlers = ?self.entries.iter().map(|e| e.tag.as_str()).collect::<Vec<_>>(),
            "Starting streams work loop"
        );

        loop {
            for index in 0..self.entries.len() {
                if !self.is_running() {
                    info!("Streams work loop stopped");
                    return;
                }
                let processor = self.clone();
                let posted = self
                    .pool
                    .post(async move { processor.fetch_and_process(index).await })
                    .await;
                if posted.is_err() {
                    info!("Pool rejected fetch, streams work loop exiting");
                    return;
                }
            }
        }
    }

    async fn fetch_and_process(&self, index: usize) {
        let entry = &self.entries[index];

        let batch = entry
            .consumer
            .fetch()
            .max_messages(entry.batch_size)
            .expires(self.fetch_timeout)
            .messages()
            .await;

        let mut batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                debug!(stream = %entry.stream, error = %e, "Streams fetch failed");
                return;
            }
        };

        let mut messages = Vec::new();
        while let Some(item) = batch.next().await {
            match item {
                Ok(raw) => messages.push(StreamMessage::new(raw, entry.serializer.clone())),
                Err(e) => debug!(stream = %entry.stream, error = %e, "Streams fetch interrupted"),
            }
        }

        if messages.is_empty() {
            return;
        }

        if let Some(meta) = messages.last().and_then(StreamMessage::meta) {
            info!(
                handler = %entry.tag,
                stream = %entry.stream,
                batch = messages.len(),
                seq_stream = meta.stream_sequence,
                seq_consumer = meta.consumer_sequence,
                num_pending = meta.num_pending,
                timestamp = %meta.timestamp,
                "Processing batch"
            );
        }

        let start = Instant::now();
        match entry.handler.process(messages).await {
            Ok(()) => info!(
                handler = %entry.tag,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "done"
            ),
            // Un-acked messages redeliver after ack_wait; keep going.
            Err(e) => error!(
                handler = %entry.tag,
                error = %e,
                elapsed_secs = start.elapsed().as_secs_f64(),
                "fail"
            ),
        }
    }
}

fn apply_override(options: &mut StreamHandlerOptions, over: &crate::config::StreamConsumerOverride) {
    if let Some(stream) = &over.stream {
        options.stream = stream.clone();
    }
    if let Some(subjects) = &over.subjects {
        options.subjects = subjects.clone();
    }
    if let Some(name) = &over.consumer_name {
        options.consumer_name = name.clone();
    }
    if let Some(batch_size) = over.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(start_position) = over.start_position {
        options.start_position = start_position;
    }
    if let Some(ack_wait) = over.ack_wait {
        options.ack_wait = ack_wait;
    }
    if let Some(max_deliver) = over.max_deliver {
        options.max_deliver = max_deliver;
    }
    if let Some(max_ack_pending) = over.max_ack_pending {
        options.max_ack_pending = max_ack_pending;
    }
}
