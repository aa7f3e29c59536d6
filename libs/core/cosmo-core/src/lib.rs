//! Core job abstractions for the Cosmo worker runtime.
//!
//! This library is broker-agnostic: it defines the job envelope (the wire
//! contract between producers and workers), the handler traits user code
//! implements, the serializer seam, and the processing error types. The NATS
//! transport lives in `cosmo-nats`.
//!
//! # Example
//!
//! ```rust
//! use cosmo_core::{JobEnvelope, JobOptions};
//!
//! let envelope = JobEnvelope::new(
//!     "EmailJob",
//!     vec![42.into(), "welcome".into()],
//!     JobOptions::default().with_stream("default"),
//! )
//! .unwrap();
//!
//! assert_eq!(envelope.subject(), "jobs.default.email_job");
//! assert_eq!(envelope.jid().len(), 24);
//! ```

mod envelope;
mod error;
mod handler;
mod serializer;

pub use envelope::{snake_case, JobEnvelope, JobOptions, ScheduleTarget, DEFAULT_RETRY, SCHEDULED_STREAM};
pub use error::{EnvelopeError, ProcessingError};
pub use handler::{JobContext, JobHandler, JobHandlerFactory};
pub use serializer::{JsonSerializer, Serializer};
