//! Thin handle over the NATS SDK: publish, pull-subscribe, stream admin.

use crate::error::WorkerError;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::Consumer;
use async_nats::jetstream::context::{Context, PublishAckFuture, PublishError};
use async_nats::jetstream::message::StreamMessage;
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::HeaderMap;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

/// One logical broker connection shared by publishers and processors.
///
/// Every method propagates SDK errors unchanged (wrapped only for display);
/// domain translation happens in the publisher.
#[derive(Clone)]
pub struct BrokerClient {
    client: async_nats::Client,
    jetstream: Context,
}

impl BrokerClient {
    /// Connect to the broker.
    pub async fn connect(url: &str) -> Result<Self, WorkerError> {
        let client = async_nats::connect(url).await?;
        let jetstream = async_nats::jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    /// Wrap an existing client (used by tests).
    pub fn from_client(client: async_nats::Client) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self { client, jetstream }
    }

    pub fn jetstream(&self) -> &Context {
        &self.jetstream
    }

    pub fn nats(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publish with broker ack. The error is the SDK's, untranslated.
    pub async fn publish(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<async_nats::jetstream::publish::PublishAck, PublishError> {
        let ack: PublishAckFuture = self
            .jetstream
            .publish_with_headers(subject, headers, payload)
            .await?;
        ack.await
    }

    /// Create or bind a durable pull consumer on `stream`.
    pub async fn pull_subscribe(
        &self,
        stream: &str,
        durable: &str,
        config: pull::Config,
    ) -> Result<Consumer<pull::Config>, WorkerError> {
        let stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(WorkerError::from_jetstream_error)?;

        match stream.get_consumer::<pull::Config>(durable).await {
            Ok(consumer) => {
                debug!(consumer = %durable, "Consumer already exists");
                Ok(consumer)
            }
            Err(_) => {
                info!(consumer = %durable, "Creating consumer");
                stream
                    .create_consumer(config)
                    .await
                    .map_err(WorkerError::from_jetstream_error)
            }
        }
    }

    /// Create the stream if absent; no-op when it already exists.
    pub async fn ensure_stream(&self, config: StreamConfig) -> Result<(), WorkerError> {
        match self.jetstream.get_stream(&config.name).await {
            Ok(_) => {
                debug!(stream = %config.name, "Stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(stream = %config.name, subjects = ?config.subjects, "Creating stream");
                self.jetstream
                    .create_stream(config)
                    .await
                    .map(|_| ())
                    .map_err(WorkerError::from_jetstream_error)
            }
        }
    }

    /// Counters of a stream, for startup logging and tests.
    pub async fn stream_info(&self, name: &str) -> Result<StreamStats, WorkerError> {
        let mut stream = self
            .jetstream
            .get_stream(name)
            .await
            .map_err(WorkerError::from_jetstream_error)?;

        let info = stream
            .info()
            .await
            .map_err(WorkerError::from_jetstream_error)?;

        Ok(StreamStats {
            name: name.to_string(),
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    /// Names of all streams on the broker.
    pub async fn list_streams(&self) -> Result<Vec<String>, WorkerError> {
        let mut names = self.jetstream.stream_names();
        let mut result = Vec::new();
        while let Some(name) = names.next().await {
            result.push(name.map_err(WorkerError::from_jetstream_error)?);
        }
        Ok(result)
    }

    pub async fn delete_stream(&self, name: &str) -> Result<(), WorkerError> {
        self.jetstream
            .delete_stream(name)
            .await
            .map(|_| ())
            .map_err(WorkerError::from_jetstream_error)
    }

    /// Fetch a stored message by stream sequence.
    pub async fn get_message(&self, stream: &str, sequence: u64) -> Result<StreamMessage, WorkerError> {
        let stream = self
            .jetstream
            .get_stream(stream)
            .await
            .map_err(WorkerError::from_jetstream_error)?;

        stream
            .get_raw_message(sequence)
            .await
            .map_err(WorkerError::from_jetstream_error)
    }
}

/// Copied stream counters.
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub name: String,
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}
