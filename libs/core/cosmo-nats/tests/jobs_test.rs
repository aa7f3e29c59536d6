//! Job processor behavior: execution, retries, dead-lettering, backpressure.

mod support;

use cosmo_core::{JobEnvelope, JobOptions};
use cosmo_nats::{
    CosmoConfig, EngineOptions, ProcessorSelection, Publisher, Registry,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{wait_for_messages, wait_until, CountingJob, FailingJob, SlowJob};
use test_utils::TestNats;

const JOBS_CONFIG: &str = r#"
streams:
  default:
    subjects: ["jobs.default.>"]
    duplicate_window: 120
consumers:
  jobs:
    default:
      subject: "jobs.default.>"
      priority: 1
"#;

fn jobs_options() -> EngineOptions {
    EngineOptions::default()
        .with_selection(ProcessorSelection::Jobs)
        .with_shutdown_timeout(Duration::from_secs(5))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_job_runs_once_and_is_acked() {
    let nats = TestNats::start().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = invocations.clone();
    registry.register_job("EmailJob", move || CountingJob {
        invocations: counter.clone(),
    });

    let config = CosmoConfig::from_yaml(JOBS_CONFIG).unwrap();
    let engine = support::engine(&nats, registry, config, jobs_options());
    engine.ensure_streams().await.unwrap();
    let running = engine.start().await.unwrap();

    let envelope = JobEnvelope::new(
        "EmailJob",
        vec![json!(42), json!("welcome")],
        JobOptions::default().with_stream("default"),
    )
    .unwrap();
    Publisher::new(support::broker(&nats))
        .publish_job(&envelope)
        .await
        .unwrap();

    let ran = {
        let invocations = invocations.clone();
        wait_until(Duration::from_secs(10), move || {
            invocations.load(Ordering::SeqCst) == 1
        })
        .await
    };
    assert!(ran, "handler did not run");

    // Acked: no redelivery shows up.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_retries_dead_letter() {
    let nats = TestNats::start().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = invocations.clone();
    registry.register_job("FailingJob", move || FailingJob {
        invocations: counter.clone(),
    });

    let config = CosmoConfig::from_yaml(JOBS_CONFIG).unwrap();
    let engine = support::engine(&nats, registry, config, jobs_options());
    engine.ensure_streams().await.unwrap();
    let running = engine.start().await.unwrap();

    // retry 0: a single failed attempt goes straight to the dead letter.
    let envelope = JobEnvelope::new(
        "FailingJob",
        vec![],
        JobOptions::default().with_stream("default").with_retry(0),
    )
    .unwrap();
    Publisher::new(support::broker(&nats))
        .publish_job(&envelope)
        .await
        .unwrap();

    let client = support::broker(&nats);
    let dead = wait_for_messages(&client, "dead", 1, Duration::from_secs(10)).await;
    assert!(dead, "job was not dead-lettered");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_then_dead_letter_preserves_body() {
    let nats = TestNats::start().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = invocations.clone();
    registry.register_job("FailingJob", move || FailingJob {
        invocations: counter.clone(),
    });

    let config = CosmoConfig::from_yaml(JOBS_CONFIG).unwrap();
    let engine = support::engine(&nats, registry, config, jobs_options());
    engine.ensure_streams().await.unwrap();
    let running = engine.start().await.unwrap();

    // retry 1: fail, nak for 16s, fail again, dead-letter. Total handler
    // invocations must be exactly retry + 1 = 2.
    let envelope = JobEnvelope::new(
        "FailingJob",
        vec![json!("payload")],
        JobOptions::default().with_stream("default").with_retry(1),
    )
    .unwrap();
    let body = envelope.encode().unwrap();
    Publisher::new(support::broker(&nats))
        .publish_job(&envelope)
        .await
        .unwrap();

    let client = support::broker(&nats);
    let dead = wait_for_messages(&client, "dead", 1, Duration::from_secs(40)).await;
    assert!(dead, "job was not dead-lettered after retries");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // The dead-lettered body is byte-identical to the original envelope.
    let stored = client.get_message("dead", 1).await.unwrap();
    assert_eq!(stored.payload.as_ref(), body.as_slice());

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_retries_term_without_dlq() {
    let nats = TestNats::start().await;
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = invocations.clone();
    registry.register_job("FailingJob", move || FailingJob {
        invocations: counter.clone(),
    });

    let config = CosmoConfig::from_yaml(JOBS_CONFIG).unwrap();
    let engine = support::engine(&nats, registry, config, jobs_options());
    engine.ensure_streams().await.unwrap();
    let running = engine.start().await.unwrap();

    let envelope = JobEnvelope::new(
        "FailingJob",
        vec![],
        JobOptions::default()
            .with_stream("default")
            .with_retry(0)
            .with_dead(false),
    )
    .unwrap();
    Publisher::new(support::broker(&nats))
        .publish_job(&envelope)
        .await
        .unwrap();

    let ran = {
        let invocations = invocations.clone();
        wait_until(Duration::from_secs(10), move || {
            invocations.load(Ordering::SeqCst) == 1
        })
        .await
    };
    assert!(ran);

    // Terminated, not dead-lettered, not redelivered.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let client = support::broker(&nats);
    assert_eq!(client.stream_info("dead").await.unwrap().messages, 0);

    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_in_flight_handlers_bounded_by_pool() {
    use cosmo_nats::JobHandler;

    let nats = TestNats::start().await;
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    struct CountedSlow {
        inner: SlowJob,
        done: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl cosmo_nats::JobHandler for CountedSlow {
        async fn perform(
            &self,
            ctx: &cosmo_nats::JobContext,
            args: &[serde_json::Value],
        ) -> Result<(), cosmo_nats::ProcessingError> {
            let result = self.inner.perform(ctx, args).await;
            self.done.fetch_add(1, Ordering::SeqCst);
            result
        }
    }

    let mut registry = Registry::new();
    let (current_ref, peak_ref, done_ref) = (current.clone(), peak.clone(), done.clone());
    registry.register_job("SlowJob", move || CountedSlow {
        inner: SlowJob {
            current: current_ref.clone(),
            peak: peak_ref.clone(),
        },
        done: done_ref.clone(),
    });

    let config = CosmoConfig::from_yaml(JOBS_CONFIG).unwrap();
    let engine = support::engine(
        &nats,
        registry,
        config,
        jobs_options().with_concurrency(2),
    );
    engine.ensure_streams().await.unwrap();
    let running = engine.start().await.unwrap();

    let publisher = Publisher::new(support::broker(&nats));
    for i in 0..20 {
        let envelope = JobEnvelope::new(
            "SlowJob",
            vec![json!(i)],
            JobOptions::default().with_stream("default"),
        )
        .unwrap();
        publisher.publish_job(&envelope).await.unwrap();
    }

    let drained = {
        let done = done.clone();
        wait_until(Duration::from_secs(30), move || {
            done.load(Ordering::SeqCst) == 20
        })
        .await
    };
    assert!(drained, "only {} of 20 jobs ran", done.load(Ordering::SeqCst));
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "in-flight handlers exceeded the pool size: {}",
        peak.load(Ordering::SeqCst)
    );

    running.shutdown().await;
}
