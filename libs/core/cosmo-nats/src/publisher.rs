//! Serializer-aware publisher; the only place SDK errors become domain errors.

use crate::client::BrokerClient;
use crate::error::WorkerError;
use crate::headers;
use async_nats::jetstream::context::PublishErrorKind;
use async_nats::jetstream::publish::PublishAck;
use async_nats::HeaderMap;
use cosmo_core::{JobEnvelope, JsonSerializer, Serializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Publishes payloads and job envelopes with broker acks.
#[derive(Clone)]
pub struct Publisher {
    client: Arc<BrokerClient>,
    serializer: Arc<dyn Serializer>,
}

impl Publisher {
    /// Create a publisher with the default JSON serializer.
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self {
            client,
            serializer: Arc::new(JsonSerializer),
        }
    }

    /// Create a publisher with a custom serializer.
    pub fn with_serializer(client: Arc<BrokerClient>, serializer: Arc<dyn Serializer>) -> Self {
        Self { client, serializer }
    }

    /// Serialize `data` and publish it to `subject`.
    pub async fn publish(
        &self,
        subject: &str,
        data: &Value,
        extra_headers: Option<HeaderMap>,
    ) -> Result<PublishAck, WorkerError> {
        let payload = self.serializer.serialize(data)?;
        let headers = extra_headers.unwrap_or_default();

        let ack = self
            .client
            .publish(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| WorkerError::publish_error(e.to_string()))?;

        debug!(subject = %subject, sequence = ack.sequence, "Published message");
        Ok(ack)
    }

    /// Publish each item to `subject` in order. Not transactional: a failure
    /// leaves earlier items published.
    pub async fn publish_batch(
        &self,
        subject: &str,
        items: &[Value],
        extra_headers: Option<HeaderMap>,
    ) -> Result<Vec<PublishAck>, WorkerError> {
        let mut acks = Vec::with_capacity(items.len());
        for item in items {
            acks.push(self.publish(subject, item, extra_headers.clone()).await?);
        }
        debug!(subject = %subject, count = acks.len(), "Published batch");
        Ok(acks)
    }

    /// Publish a job envelope to its transport subject and return the jid.
    ///
    /// A publish rejected because the target stream does not exist is
    /// translated into [`WorkerError::StreamNotFound`].
    pub async fn publish_job(&self, envelope: &JobEnvelope) -> Result<String, WorkerError> {
        let payload = envelope.encode()?;
        let subject = envelope.transport_subject();
        let stream = envelope.transport_stream().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(headers::MSG_ID, envelope.jid());
        headers.insert(headers::EXPECTED_STREAM, stream.as_str());
        if let Some(target) = envelope.schedule_target() {
            headers.insert(headers::EXECUTE_AT, target.execute_at.to_string().as_str());
            headers.insert(headers::TARGET_STREAM, target.stream.as_str());
            headers.insert(headers::TARGET_SUBJECT, target.subject.as_str());
        }

        let ack = self
            .client
            .publish(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| match e.kind() {
                PublishErrorKind::StreamNotFound => WorkerError::StreamNotFound(stream.clone()),
                _ => WorkerError::publish_error(e.to_string()),
            })?;

        debug!(
            jid = %envelope.jid(),
            subject = %subject,
            stream = %stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Published job"
        );

        Ok(envelope.jid().to_string())
    }
}
