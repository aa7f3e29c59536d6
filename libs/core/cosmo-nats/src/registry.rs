//! Process-wide handler registry.
//!
//! All registration happens before the engine starts; afterwards the
//! registry is shared behind an `Arc` and only read, so no locking is
//! needed on the hot path.

use crate::config::StartPosition;
use crate::streams::StreamHandler;
use cosmo_core::{JobHandler, JobHandlerFactory, JsonSerializer, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Default options a stream handler is registered with; the config file's
/// `consumers.streams` entries can override any of them.
#[derive(Clone)]
pub struct StreamHandlerOptions {
    /// Stream the pull consumer is created on.
    pub stream: String,
    /// Subjects the consumer filters on.
    pub subjects: Vec<String>,
    pub consumer_name: String,
    pub batch_size: usize,
    pub start_position: StartPosition,
    /// Seconds.
    pub ack_wait: u64,
    pub max_deliver: i64,
    pub max_ack_pending: i64,
    /// Decodes message payloads for the handler.
    pub serializer: Arc<dyn Serializer>,
}

impl StreamHandlerOptions {
    /// Options for `stream` with the conventional defaults: all subjects of
    /// the stream, consumer named `consumer-<stream>`, batches of 10, read
    /// from the start, JSON payloads.
    pub fn new(stream: impl Into<String>) -> Self {
        let stream = stream.into();
        Self {
            subjects: vec![format!("{}.>", stream)],
            consumer_name: format!("consumer-{}", stream),
            batch_size: 10,
            start_position: StartPosition::First,
            ack_wait: 30,
            max_deliver: -1,
            max_ack_pending: 1000,
            serializer: Arc::new(JsonSerializer),
            stream,
        }
    }

    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_start_position(mut self, start_position: StartPosition) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }
}

/// A registered stream handler: one shared instance plus its options.
#[derive(Clone)]
pub struct StreamRegistration {
    pub handler: Arc<dyn StreamHandler>,
    pub options: StreamHandlerOptions,
}

/// Maps handler class tags to factories (jobs) and instances (streams).
#[derive(Default)]
pub struct Registry {
    jobs: HashMap<String, JobHandlerFactory>,
    streams: HashMap<String, StreamRegistration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler class. The factory runs once per message.
    pub fn register_job<F, H>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        self.jobs
            .insert(class.into(), Arc::new(move || Box::new(factory())));
    }

    /// Register a stream handler instance under `tag`.
    pub fn register_stream(
        &mut self,
        tag: impl Into<String>,
        handler: impl StreamHandler + 'static,
        options: StreamHandlerOptions,
    ) {
        self.streams.insert(
            tag.into(),
            StreamRegistration {
                handler: Arc::new(handler),
                options,
            },
        );
    }

    /// Resolve a job class tag.
    pub fn job_factory(&self, class: &str) -> Option<&JobHandlerFactory> {
        self.jobs.get(class)
    }

    pub fn job_classes(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn stream_registrations(&self) -> &HashMap<String, StreamRegistration> {
        &self.streams
    }

    pub fn has_stream_handlers(&self) -> bool {
        !self.streams.is_empty()
    }
}
