//! Publisher behavior against a real JetStream broker.

mod support;

use async_nats::jetstream::stream::Config as StreamConfig;
use cosmo_core::{JobEnvelope, JobOptions};
use cosmo_nats::{headers, Publisher, WorkerError};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::PrefixSerializer;
use test_utils::TestNats;

async fn default_stream(client: &cosmo_nats::BrokerClient) {
    client
        .ensure_stream(StreamConfig {
            name: "default".to_string(),
            subjects: vec!["jobs.default.>".to_string()],
            duplicate_window: Duration::from_secs(120),
            ..Default::default()
        })
        .await
        .unwrap();
}

async fn fetch_one(
    jetstream: &async_nats::jetstream::Context,
    stream: &str,
    subject: &str,
) -> async_nats::jetstream::Message {
    let consumer = jetstream
        .get_stream(stream)
        .await
        .unwrap()
        .create_consumer(async_nats::jetstream::consumer::pull::Config {
            durable_name: Some("probe".to_string()),
            filter_subject: subject.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut messages = consumer
        .fetch()
        .max_messages(1)
        .expires(Duration::from_secs(5))
        .messages()
        .await
        .unwrap();
    messages.next().await.expect("no message").unwrap()
}

#[tokio::test]
async fn test_immediate_job_wire_contract() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);
    default_stream(&client).await;

    let envelope = JobEnvelope::new(
        "EmailJob",
        vec![json!(42), json!("welcome")],
        JobOptions::default().with_stream("default").with_retry(3),
    )
    .unwrap();

    let publisher = Publisher::new(client.clone());
    let jid = publisher.publish_job(&envelope).await.unwrap();
    assert_eq!(jid, envelope.jid());

    let stats = client.stream_info("default").await.unwrap();
    assert_eq!(stats.messages, 1);

    let message = fetch_one(&nats.jetstream(), "default", "jobs.default.email_job").await;

    let body: Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(
        body,
        json!({
            "jid": jid,
            "class": "EmailJob",
            "args": [42, "welcome"],
            "retry": 3,
            "dead": true,
        })
    );

    let message_headers = message.headers.clone().expect("headers missing");
    let msg_id = message_headers.get(headers::MSG_ID).expect("no msg id");
    assert_eq!(msg_id.as_str(), jid);
}

#[tokio::test]
async fn test_same_jid_dedups_within_window() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);
    default_stream(&client).await;

    let envelope = JobEnvelope::new(
        "EmailJob",
        vec![json!(1)],
        JobOptions::default().with_stream("default"),
    )
    .unwrap();

    let publisher = Publisher::new(client.clone());
    publisher.publish_job(&envelope).await.unwrap();
    publisher.publish_job(&envelope).await.unwrap();

    let stats = client.stream_info("default").await.unwrap();
    assert_eq!(stats.messages, 1, "duplicate jid must be dropped by the broker");
}

#[tokio::test]
async fn test_missing_stream_is_translated() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);

    let envelope = JobEnvelope::new(
        "EmailJob",
        vec![],
        JobOptions::default().with_stream("missing"),
    )
    .unwrap();

    let result = Publisher::new(client).publish_job(&envelope).await;
    match result {
        Err(WorkerError::StreamNotFound(stream)) => assert_eq!(stream, "missing"),
        other => panic!("expected StreamNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_round_trips_through_serializer() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);
    default_stream(&client).await;

    let data = json!({"nested": {"list": [1, 2, 3]}, "flag": true});
    Publisher::new(client)
        .publish("jobs.default.raw", &data, None)
        .await
        .unwrap();

    let message = fetch_one(&nats.jetstream(), "default", "jobs.default.raw").await;
    let decoded: Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(decoded, data);
}

#[tokio::test]
async fn test_publish_honors_custom_serializer() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);
    default_stream(&client).await;

    let data = json!({"id": 7, "kind": "tagged"});
    Publisher::with_serializer(client, Arc::new(PrefixSerializer))
        .publish("jobs.default.tagged", &data, None)
        .await
        .unwrap();

    let message = fetch_one(&nats.jetstream(), "default", "jobs.default.tagged").await;
    let payload = message.payload.as_ref();
    assert!(payload.starts_with(PrefixSerializer::PREFIX));
    let decoded: Value =
        serde_json::from_slice(&payload[PrefixSerializer::PREFIX.len()..]).unwrap();
    assert_eq!(decoded, data);
}

#[tokio::test]
async fn test_publish_batch_publishes_all() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);
    default_stream(&client).await;

    let items: Vec<Value> = (0..5).map(|i| json!({ "i": i })).collect();
    let acks = Publisher::new(client.clone())
        .publish_batch("jobs.default.batch", &items, None)
        .await
        .unwrap();

    assert_eq!(acks.len(), 5);
    let stats = client.stream_info("default").await.unwrap();
    assert_eq!(stats.messages, 5);
}
