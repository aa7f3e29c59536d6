//! Job processor: the weighted fetch loop and the delayed-job scheduler loop.

use crate::client::BrokerClient;
use crate::config::{CosmoConfig, JobsConsumerConfig, Settings};
use crate::error::WorkerError;
use crate::headers;
use crate::pool::BoundedPool;
use crate::registry::Registry;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, Consumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::AckKind;
use async_nats::HeaderMap;
use chrono::Utc;
use cosmo_core::{JobContext, JobEnvelope, SCHEDULED_STREAM};
use futures::StreamExt;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stream that captures dead-lettered envelopes.
pub const DEAD_STREAM: &str = "dead";

const SCHEDULER_BATCH: usize = 100;

/// Nak delay before redelivery `attempt` (1-based): `attempt^4 + 15` seconds.
pub fn backoff_delay(attempt: i64) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_secs(attempt.pow(4) + 15)
}

/// The fetch rotation: each jobs stream repeated `priority` times.
pub fn build_weights(jobs: &BTreeMap<String, JobsConsumerConfig>) -> Vec<String> {
    let mut weights = Vec::new();
    for (stream, config) in jobs {
        for _ in 0..config.priority {
            weights.push(stream.clone());
        }
    }
    weights
}

/// Drains the configured jobs consumers into the pool and promotes delayed
/// jobs when they come due.
pub struct JobProcessor {
    client: Arc<BrokerClient>,
    registry: Arc<Registry>,
    pool: Arc<BoundedPool>,
    running: watch::Receiver<bool>,
    consumers: HashMap<String, Consumer<pull::Config>>,
    scheduler: Consumer<pull::Config>,
    weights: Vec<String>,
    fetch_timeout: Duration,
    scheduler_fetch_timeout: Duration,
}

impl JobProcessor {
    /// Create the per-stream pull consumers and the scheduler consumer.
    ///
    /// Returns `None` when no jobs consumers are configured: the processor
    /// does not start. The `scheduled` and `dead` plumbing streams are
    /// ensured here so retries and promotions always have a home.
    pub async fn setup(
        client: Arc<BrokerClient>,
        registry: Arc<Registry>,
        config: &CosmoConfig,
        settings: &Settings,
        pool: Arc<BoundedPool>,
        running: watch::Receiver<bool>,
    ) -> Result<Option<Self>, WorkerError> {
        if config.consumers.jobs.is_empty() {
            return Ok(None);
        }

        {
            let classes: Vec<&str> = registry.job_classes().collect();
            if classes.is_empty() {
                warn!("Jobs consumers configured but no job handler classes registered");
            } else {
                debug!(classes = ?classes, "Job handler classes registered");
            }
        }

        let mut consumers = HashMap::new();
        for (stream, consumer_config) in &config.consumers.jobs {
            let durable = format!("consumer-{}", stream);
            let consumer = client
                .pull_subscribe(stream, &durable, consumer_config.to_pull_config(&durable))
                .await?;
            consumers.insert(stream.clone(), consumer);
        }

        client
            .ensure_stream(StreamConfig {
                name: SCHEDULED_STREAM.to_string(),
                subjects: vec!["jobs.scheduled.>".to_string()],
                ..Default::default()
            })
            .await?;
        client
            .ensure_stream(StreamConfig {
                name: DEAD_STREAM.to_string(),
                subjects: vec!["jobs.dead.>".to_string()],
                ..Default::default()
            })
            .await?;

        let scheduler = client
            .pull_subscribe(
                SCHEDULED_STREAM,
                "consumer-scheduled",
                pull::Config {
                    durable_name: Some("consumer-scheduled".to_string()),
                    name: Some("consumer-scheduled".to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;

        let weights = build_weights(&config.consumers.jobs);

        Ok(Some(Self {
            client,
            registry,
            pool,
            running,
            consumers,
            scheduler,
            weights,
            fetch_timeout: settings.jobs_fetch_timeout,
            scheduler_fetch_timeout: settings.scheduler_fetch_timeout,
        }))
    }

    /// Launch the work loop and the scheduler loop.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let this = Arc::new(self);
        let work = {
            let processor = this.clone();
            tokio::spawn(async move { processor.run_work_loop().await })
        };
        let scheduler = tokio::spawn(async move { this.run_scheduler_loop().await });
        vec![work, scheduler]
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    async fn run_work_loop(self: Arc<Self>) {
        if self.weights.is_empty() {
            warn!("All jobs streams have priority 0, work loop idle");
            return;
        }

        info!(
            streams = ?self.consumers.keys().collect::<Vec<_>>(),
            concurrency = self.pool.size(),
            "Starting jobs work loop"
        );

        let mut rotation = self.weights.clone();
        loop {
            // A fresh shuffle per pass keeps per-pass turn counts exactly
            // proportional to priority while varying the order.
            rotation.shuffle(&mut rand::rng());
            for stream in &rotation {
                if !self.is_running() {
                    info!("Jobs work loop stopped");
                    return;
                }
                let processor = self.clone();
                let stream = stream.clone();
                let posted = self
                    .pool
                    .post(async move { processor.fetch_and_process(stream).await })
                    .await;
                if posted.is_err() {
                    info!("Pool rejected fetch, jobs work loop exiting");
                    return;
                }
            }
        }
    }

    async fn fetch_and_process(&self, stream: String) {
        let Some(consumer) = self.consumers.get(&stream).cloned() else {
            return;
        };

        let batch = consumer
            .fetch()
            .max_messages(1)
            .expires(self.fetch_timeout)
            .messages()
            .await;

        let mut batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                debug!(stream = %stream, error = %e, "Jobs fetch failed");
                return;
            }
        };

        while let Some(item) = batch.next().await {
            match item {
                Ok(message) => self.process(message).await,
                // Pull timeouts surface here and are expected.
                Err(e) => debug!(stream = %stream, error = %e, "Jobs fetch interrupted"),
            }
        }
    }

    async fn process(&self, message: async_nats::jetstream::Message) {
        let envelope = match JobEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // No ack: the broker redelivers up to max_deliver.
                warn!(error = %e, "Malformed job payload");
                return;
            }
        };

        let Some(factory) = self.registry.job_factory(envelope.class()) else {
            warn!(
                class = %envelope.class(),
                jid = %envelope.jid(),
                "No handler registered for job class"
            );
            return;
        };

        let handler = factory();
        let ctx = JobContext {
            jid: envelope.jid().to_string(),
        };

        debug!(jid = %envelope.jid(), class = %envelope.class(), "Processing job");
        let start = Instant::now();

        match handler.perform(&ctx, envelope.args()).await {
            Ok(()) => {
                if let Err(e) = message.ack().await {
                    warn!(jid = %envelope.jid(), error = %e, "Failed to ack job");
                } else {
                    debug!(
                        jid = %envelope.jid(),
                        elapsed_secs = start.elapsed().as_secs_f64(),
                        "Job done"
                    );
                }
            }
            Err(e) if e.is_fatal() => {
                // Left un-acked on purpose; the supervisor owns recovery.
                error!(
                    jid = %envelope.jid(),
                    class = %envelope.class(),
                    error = %e,
                    "Fatal handler error"
                );
            }
            Err(e) => {
                warn!(
                    jid = %envelope.jid(),
                    class = %envelope.class(),
                    error = %e,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "Job failed"
                );
                self.handle_failure(message, &envelope).await;
            }
        }
    }

    async fn handle_failure(&self, message: async_nats::jetstream::Message, envelope: &JobEnvelope) {
        let attempt = match message.info() {
            Ok(info) => info.delivered,
            Err(e) => {
                warn!(error = %e, "Missing delivery metadata, assuming first attempt");
                1
            }
        };
        let max_attempts = envelope.retry() as i64 + 1;

        if attempt < max_attempts {
            let delay = backoff_delay(attempt);
            info!(
                jid = %envelope.jid(),
                attempt = attempt,
                max_attempts = max_attempts,
                delay_secs = delay.as_secs(),
                "Scheduling job retry"
            );
            if let Err(e) = message.ack_with(AckKind::Nak(Some(delay))).await {
                warn!(jid = %envelope.jid(), error = %e, "Failed to nak job");
            }
        } else if envelope.dead() {
            warn!(
                jid = %envelope.jid(),
                class = %envelope.class(),
                attempts = attempt,
                "Retries exhausted, dead-lettering job"
            );
            // The body is republished unchanged so the jid stays correlatable.
            let publish = self
                .client
                .publish(
                    envelope.dead_subject(),
                    HeaderMap::new(),
                    message.payload.clone(),
                )
                .await;
            match publish {
                Ok(_) => {
                    if let Err(e) = message.ack().await {
                        warn!(jid = %envelope.jid(), error = %e, "Failed to ack dead-lettered job");
                    }
                }
                // No ack: redelivery retries the dead-letter publish.
                Err(e) => error!(jid = %envelope.jid(), error = %e, "Failed to dead-letter job"),
            }
        } else {
            warn!(
                jid = %envelope.jid(),
                class = %envelope.class(),
                attempts = attempt,
                "Retries exhausted, terminating job"
            );
            if let Err(e) = message.ack_with(AckKind::Term).await {
                warn!(jid = %envelope.jid(), error = %e, "Failed to term job");
            }
        }
    }

    async fn run_scheduler_loop(self: Arc<Self>) {
        info!("Starting scheduler loop");
        loop {
            if !self.is_running() {
                info!("Scheduler loop stopped");
                return;
            }

            let batch = self
                .scheduler
                .fetch()
                .max_messages(SCHEDULER_BATCH)
                .expires(self.scheduler_fetch_timeout)
                .messages()
                .await;

            let mut batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "Scheduler fetch failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            while let Some(item) = batch.next().await {
                match item {
                    Ok(message) => self.promote(message).await,
                    Err(e) => debug!(error = %e, "Scheduler fetch interrupted"),
                }
            }
        }
    }

    /// Publish a due scheduled envelope to its target, or park it again with
    /// the remaining delay.
    ///
    /// Publish-then-ack: a crash in between promotes twice, and the target
    /// stream's duplicate window collapses the copies via `Nats-Msg-Id`.
    async fn promote(&self, message: async_nats::jetstream::Message) {
        let message_headers = message.headers.clone().unwrap_or_default();

        let execute_at = message_headers
            .get(headers::EXECUTE_AT)
            .and_then(|v| v.as_str().parse::<i64>().ok());
        let target_stream = message_headers
            .get(headers::TARGET_STREAM)
            .map(|v| v.as_str().to_string());
        let target_subject = message_headers
            .get(headers::TARGET_SUBJECT)
            .map(|v| v.as_str().to_string());

        let (Some(execute_at), Some(target_stream), Some(target_subject)) =
            (execute_at, target_stream, target_subject)
        else {
            // No ack; the broker's delivery cap decides its fate.
            warn!("Scheduled message missing promotion headers");
            return;
        };

        let now = Utc::now().timestamp();
        if now < execute_at {
            let remaining = Duration::from_secs((execute_at - now) as u64);
            debug!(
                subject = %target_subject,
                remaining_secs = remaining.as_secs(),
                "Scheduled job not due"
            );
            if let Err(e) = message.ack_with(AckKind::Nak(Some(remaining))).await {
                warn!(error = %e, "Failed to park scheduled job");
            }
            return;
        }

        let mut promoted_headers = HeaderMap::new();
        for (name, values) in message_headers.iter() {
            if headers::SCHEDULING_HEADERS.contains(&name.as_ref()) {
                continue;
            }
            for value in values {
                promoted_headers.append(name.clone(), value.clone());
            }
        }
        promoted_headers.insert(headers::EXPECTED_STREAM, target_stream.as_str());

        let publish = self
            .client
            .publish(
                target_subject.clone(),
                promoted_headers,
                message.payload.clone(),
            )
            .await;

        match publish {
            Ok(_) => {
                info!(
                    subject = %target_subject,
                    stream = %target_stream,
                    "Promoted scheduled job"
                );
                if let Err(e) = message.ack().await {
                    warn!(error = %e, "Failed to ack promoted job");
                }
            }
            // No ack: promotion is retried on redelivery.
            Err(e) => error!(subject = %target_subject, error = %e, "Failed to promote scheduled job"),
        }
    }
}
