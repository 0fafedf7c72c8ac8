//! Job records for asynchronous extraction.
//!
//! A job record is created on admission miss, mutated only by the worker
//! that owns it, and becomes read-only once terminal. Status moves strictly
//! forward: `queued -> running -> finished | failed`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::fingerprint::Fingerprint;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Picked up by a worker
    Running,
    /// Extraction committed successfully
    Finished,
    /// Extraction ended with a terminal error
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "finished" => JobStatus::Finished,
            "failed" => JobStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Lifecycle rank; transitions must be strictly increasing.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Finished | JobStatus::Failed => 2,
        }
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Webhook delivery state for a terminal job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WebhookDeliveryStatus {
    /// No webhook configured
    #[default]
    None,
    /// Terminal job awaiting delivery
    Pending,
    /// A 2xx response was received
    Delivered,
    /// All delivery attempts exhausted
    Failed,
}

impl WebhookDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookDeliveryStatus::None => "none",
            WebhookDeliveryStatus::Pending => "pending",
            WebhookDeliveryStatus::Delivered => "delivered",
            WebhookDeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => WebhookDeliveryStatus::None,
            "pending" => WebhookDeliveryStatus::Pending,
            "delivered" => WebhookDeliveryStatus::Delivered,
            "failed" => WebhookDeliveryStatus::Failed,
            _ => return None,
        })
    }
}

/// A tracked extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job id
    pub job_id: JobId,
    /// The fingerprint this job computes
    pub fingerprint: Fingerprint,
    /// Lifecycle state
    #[serde(default)]
    pub status: JobStatus,
    /// When the job entered the queue
    pub enqueued_at: DateTime<Utc>,
    /// When a worker picked it up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure classification, set on terminal failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure detail (truncated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Caller-supplied webhook endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Webhook delivery state
    #[serde(default)]
    pub webhook_delivery_status: WebhookDeliveryStatus,
    /// Last webhook delivery error (truncated)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_delivery_error: Option<String>,
    /// Delivery attempts made for the webhook
    #[serde(default)]
    pub webhook_attempts: u32,
    /// Number of times this job was handed to a worker
    #[serde(default)]
    pub attempts: u32,
}

/// Cap stored error strings so one pathological upstream message cannot
/// bloat job rows.
const ERROR_MESSAGE_MAX: usize = 500;

fn truncate_error(msg: impl Into<String>) -> String {
    let mut msg = msg.into();
    if msg.len() > ERROR_MESSAGE_MAX {
        // Truncate on a char boundary.
        let mut cut = ERROR_MESSAGE_MAX;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
    }
    msg
}

impl JobRecord {
    /// Create a freshly queued job for a fingerprint.
    pub fn new(fingerprint: Fingerprint, webhook_url: Option<String>) -> Self {
        Self {
            job_id: JobId::new(),
            fingerprint,
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error_kind: None,
            error_message: None,
            webhook_delivery_status: if webhook_url.is_some() {
                WebhookDeliveryStatus::Pending
            } else {
                WebhookDeliveryStatus::None
            },
            webhook_url,
            webhook_delivery_error: None,
            webhook_attempts: 0,
            attempts: 0,
        }
    }

    /// Mark the job running under a worker.
    pub fn start(mut self) -> Self {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
        self
    }

    /// Mark the job finished.
    pub fn finish(mut self) -> Self {
        self.status = JobStatus::Finished;
        self.ended_at = Some(Utc::now());
        self
    }

    /// Mark the job failed with a classified error.
    pub fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error_kind = Some(kind);
        self.error_message = Some(truncate_error(message));
        self
    }

    /// Reset a reclaimed job back to queued (lease expiry). Timing fields
    /// for the aborted attempt are cleared; `attempts` is retained.
    pub fn requeue(mut self) -> Self {
        self.status = JobStatus::Queued;
        self.started_at = None;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn wants_webhook(&self) -> bool {
        self.webhook_url.is_some() && self.is_terminal()
    }
}
