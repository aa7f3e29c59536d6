//! The job envelope: the wire contract between producers and workers.

use crate::error::EnvelopeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum additional delivery attempts after the first, unless overridden.
pub const DEFAULT_RETRY: u32 = 3;

/// Stream name that holds future-dated envelopes.
pub const SCHEDULED_STREAM: &str = "scheduled";

/// Enqueue options for a job.
///
/// `stream` is required; everything else has a default. `at` and
/// `in_seconds` mark the envelope as scheduled (absolute wins if both are
/// given).
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    stream: Option<String>,
    subject: Option<String>,
    retry: Option<u32>,
    dead: Option<bool>,
    at: Option<i64>,
    in_seconds: Option<u64>,
}

impl JobOptions {
    /// Set the target stream (required).
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Override the derived subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Override the retry budget.
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Override whether permanent failures are dead-lettered.
    pub fn with_dead(mut self, dead: bool) -> Self {
        self.dead = Some(dead);
        self
    }

    /// Execute at an absolute Unix-seconds timestamp.
    pub fn at(mut self, unix_seconds: i64) -> Self {
        self.at = Some(unix_seconds);
        self
    }

    /// Execute after a relative delay in seconds.
    pub fn in_seconds(mut self, seconds: u64) -> Self {
        self.in_seconds = Some(seconds);
        self
    }
}

/// Promotion target of a scheduled envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTarget {
    /// Absolute Unix-seconds timestamp at which to promote.
    pub execute_at: i64,
    /// Stream the promoted job must land on.
    pub stream: String,
    /// Subject the promoted job is published to.
    pub subject: String,
}

/// A single job invocation.
///
/// The serialized form is the compact JSON object
/// `{"jid","class","args","retry","dead"}`; routing fields (stream, subject,
/// schedule) travel as broker subject and headers, never in the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    jid: String,
    class: String,
    args: Vec<Value>,
    retry: u32,
    dead: bool,
    #[serde(skip)]
    stream: String,
    #[serde(skip)]
    subject: String,
    #[serde(skip)]
    execute_at: Option<i64>,
}

impl JobEnvelope {
    /// Build an envelope for `class` with positional `args`.
    ///
    /// Fails if the options do not name a stream. The `jid` is generated
    /// here: 12 random bytes, hex-encoded.
    pub fn new(
        class: impl Into<String>,
        args: Vec<Value>,
        options: JobOptions,
    ) -> Result<Self, EnvelopeError> {
        let class = class.into();
        let stream = options.stream.ok_or(EnvelopeError::MissingStream)?;
        let subject = options
            .subject
            .unwrap_or_else(|| format!("jobs.{}.{}", stream, snake_case(&class)));
        let execute_at = options.at.or_else(|| {
            options
                .in_seconds
                .map(|secs| chrono::Utc::now().timestamp() + secs as i64)
        });

        Ok(Self {
            jid: generate_jid(),
            class,
            args,
            retry: options.retry.unwrap_or(DEFAULT_RETRY),
            dead: options.dead.unwrap_or(true),
            stream,
            subject,
            execute_at,
        })
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Maximum additional attempts after the first delivery.
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Whether permanent failure routes to the dead-letter subject.
    pub fn dead(&self) -> bool {
        self.dead
    }

    /// Target stream (empty on a decoded envelope; routing already happened).
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Target subject the job is consumed from.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_scheduled(&self) -> bool {
        self.execute_at.is_some()
    }

    /// Subject this envelope is actually published to: the target subject,
    /// or the scheduled transport subject for future-dated jobs.
    pub fn transport_subject(&self) -> String {
        if self.is_scheduled() {
            format!("jobs.{}.{}", SCHEDULED_STREAM, snake_case(&self.class))
        } else {
            self.subject.clone()
        }
    }

    /// Stream the publish is asserted against.
    pub fn transport_stream(&self) -> &str {
        if self.is_scheduled() {
            SCHEDULED_STREAM
        } else {
            &self.stream
        }
    }

    /// Subject permanently failed jobs of this class are dead-lettered to.
    pub fn dead_subject(&self) -> String {
        format!("jobs.dead.{}", snake_case(&self.class))
    }

    /// Promotion metadata, present only on scheduled envelopes.
    pub fn schedule_target(&self) -> Option<ScheduleTarget> {
        self.execute_at.map(|execute_at| ScheduleTarget {
            execute_at,
            stream: self.stream.clone(),
            subject: self.subject.clone(),
        })
    }

    /// Serialize the wire body.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a wire body.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

fn generate_jid() -> String {
    let bytes: [u8; 12] = rand::random();
    const_hex::encode(bytes)
}

/// Convert a handler class tag to its subject token, e.g. `EmailJob` to
/// `email_job`.
pub fn snake_case(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len() + 4);
    let chars: Vec<char> = tag.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_numeric());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if i > 0 && (prev_lower || (next_lower && chars[i - 1].is_uppercase())) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}
