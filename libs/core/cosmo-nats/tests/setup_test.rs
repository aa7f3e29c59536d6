//! Broker client setup: idempotent stream creation and introspection.

mod support;

use async_nats::jetstream::stream::Config as StreamConfig;
use test_utils::{unique, TestNats};

#[tokio::test]
async fn test_ensure_stream_is_idempotent() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);

    let name = unique("setup");
    let config = StreamConfig {
        name: name.clone(),
        subjects: vec![format!("{}.>", name)],
        max_messages: 1000,
        ..Default::default()
    };

    client.ensure_stream(config.clone()).await.unwrap();
    // Identical config again: no-op, never fails.
    client.ensure_stream(config.clone()).await.unwrap();
    client.ensure_stream(config).await.unwrap();

    let stats = client.stream_info(&name).await.unwrap();
    assert_eq!(stats.messages, 0);
    assert!(client.list_streams().await.unwrap().contains(&name));
}

#[tokio::test]
async fn test_stream_info_and_get_message() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);

    let name = unique("intro");
    client
        .ensure_stream(StreamConfig {
            name: name.clone(),
            subjects: vec![format!("{}.>", name)],
            ..Default::default()
        })
        .await
        .unwrap();

    client
        .publish(format!("{}.a", name), Default::default(), "first".into())
        .await
        .unwrap();
    client
        .publish(format!("{}.b", name), Default::default(), "second".into())
        .await
        .unwrap();

    let stats = client.stream_info(&name).await.unwrap();
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.first_sequence, 1);
    assert_eq!(stats.last_sequence, 2);

    let stored = client.get_message(&name, 2).await.unwrap();
    assert_eq!(stored.payload.as_ref(), b"second");
}

#[tokio::test]
async fn test_delete_stream() {
    let nats = TestNats::start().await;
    let client = support::broker(&nats);

    let name = unique("gone");
    client
        .ensure_stream(StreamConfig {
            name: name.clone(),
            subjects: vec![format!("{}.>", name)],
            ..Default::default()
        })
        .await
        .unwrap();

    client.delete_stream(&name).await.unwrap();
    assert!(!client.list_streams().await.unwrap().contains(&name));
}
