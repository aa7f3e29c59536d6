//! NATS JetStream worker runtime for background jobs and stream processing.
//!
//! Producers enqueue [`cosmo_core::JobEnvelope`]s through the [`Publisher`];
//! the [`Engine`] runs pull-based processors that execute registered
//! handlers with bounded concurrency and drive retry, dead-lettering, and
//! delayed execution through broker primitives.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐    ┌──────────────────┐    ┌──────────────────────┐
//! │ Publisher  │───▶│  NATS JetStream  │───▶│ JobProcessor /       │
//! │            │    │ (durable streams)│    │ StreamProcessor      │
//! └────────────┘    └──────────────────┘    └──────────┬───────────┘
//!                        │        ▲                    │
//!                        ▼        │ nak / dead-letter  ▼
//!               ┌────────────┐    │           ┌────────────────┐
//!               │ scheduled /│────┘           │  BoundedPool   │
//!               │ dead       │                │ (N handlers)   │
//!               └────────────┘                └────────────────┘
//! ```
//!
//! # Key behaviors
//!
//! - **Backpressure**: fetch loops block in `BoundedPool::post`; at most
//!   `concurrency` handler invocations are ever in flight.
//! - **Priority**: jobs streams are fetched in a shuffled weighted rotation;
//!   a priority-3 stream gets three turns per pass for a priority-1 stream's
//!   one.
//! - **Retries**: failed jobs are nak'd with `attempt^4 + 15` seconds of
//!   delay, then dead-lettered to `jobs.dead.<class>` or terminated.
//! - **Scheduling**: future-dated envelopes park on the `scheduled` stream
//!   and are promoted to their target subject when due.

mod client;
mod config;
mod engine;
mod error;
pub mod headers;
mod jobs;
mod pool;
mod publisher;
mod registry;
mod streams;

pub use client::{BrokerClient, StreamStats};
pub use config::{
    ConsumersConfig, CosmoConfig, JobsConsumerConfig, RetentionKind, Settings, StartPosition,
    StorageKind, StreamConsumerOverride, StreamSpec,
};
pub use engine::{wait_for_signal, Engine, EngineOptions, ProcessorSelection, RunningEngine};
pub use error::WorkerError;
pub use jobs::{backoff_delay, build_weights, JobProcessor, DEAD_STREAM};
pub use pool::BoundedPool;
pub use publisher::Publisher;
pub use registry::{Registry, StreamHandlerOptions, StreamRegistration};
pub use streams::{MessageMeta, StreamHandler, StreamMessage, StreamProcessor};

// Re-export the core job abstractions.
pub use cosmo_core::{
    JobContext, JobEnvelope, JobHandler, JobOptions, JsonSerializer, ProcessingError, Serializer,
    SCHEDULED_STREAM,
};
