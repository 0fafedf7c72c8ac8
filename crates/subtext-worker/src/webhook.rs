//! Signed webhook delivery.
//!
//! Terminal jobs with a webhook URL produce one JSON POST per delivery
//! attempt, signed with HMAC-SHA256 over `body || "." || timestamp`. The
//! worker loop hands terminal jobs to the dispatcher through a bounded
//! buffer; a small task pool drains it so slow receivers never stall
//! extraction.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use subtext_models::{
    ErrorKind, Fingerprint, JobId, JobRecord, JobStatus, WebhookDeliveryStatus,
};
use subtext_queue::JobStore;

use crate::error::{WorkerError, WorkerResult};

type HmacSha256 = Hmac<Sha256>;

/// Signature header: `sha256=<hex>`.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Timestamp header carrying the payload's RFC 3339 timestamp.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Webhook configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// HMAC secret; deliveries are unsigned when absent
    pub secret: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Total delivery attempts
    pub max_retries: u32,
    /// Bounded hand-off buffer between worker loop and dispatcher
    pub buffer: usize,
    /// Concurrent deliveries
    pub pool_size: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            buffer: 256,
            pool_size: 4,
        }
    }
}

impl WebhookConfig {
    /// Derive delivery knobs from the shared service configuration.
    pub fn from_service(config: &subtext_service::ServiceConfig) -> Self {
        Self {
            secret: config.webhook_secret.clone(),
            timeout: config.webhook_timeout,
            max_retries: config.webhook_max_retries,
            ..Default::default()
        }
    }
}

/// The JSON body POSTed to receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event name; always `job.completed` for terminal jobs
    pub event: String,
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    /// Terminal job status (`finished` or `failed`)
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WebhookError>,
    /// RFC 3339 timestamp; also sent in the timestamp header
    pub timestamp: String,
}

/// Failure detail embedded in failure notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookError {
    pub kind: ErrorKind,
    pub message: String,
}

impl WebhookPayload {
    /// Compose the payload for a terminal job.
    pub fn for_job(job: &JobRecord, result: Option<serde_json::Value>) -> Self {
        Self {
            event: "job.completed".to_string(),
            job_id: job.job_id.clone(),
            fingerprint: job.fingerprint.clone(),
            status: job.status,
            result,
            error: job.error_kind.map(|kind| WebhookError {
                kind,
                message: job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| kind.hint().to_string()),
            }),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Sign `body || "." || timestamp` with the shared secret.
pub fn sign_body(secret: &str, body: &str, timestamp: &str) -> WorkerResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WorkerError::config_error(format!("invalid webhook secret: {e}")))?;
    mac.update(body.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    let signature = mac.finalize().into_bytes();
    Ok(format!("sha256={}", hex::encode(signature)))
}

/// Receiver-side verification helper.
///
/// Comparison happens inside the MAC verification, which is constant-time;
/// receivers should use this rather than comparing hex strings themselves.
pub fn verify_signature(secret: &str, body: &str, timestamp: &str, header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Result of a full delivery (all attempts).
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub delivered: bool,
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

/// HTTP client for webhook deliveries.
pub struct WebhookClient {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WorkerError::config_error(format!("failed to build client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Deliver with retries. Waits 1 s, then 2 s, between the (default)
    /// three attempts; any non-2xx response or transport error retries.
    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> DeliveryOutcome {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryOutcome {
                    delivered: false,
                    attempts: 0,
                    last_status: None,
                    last_error: Some(format!("payload encoding failed: {e}")),
                }
            }
        };

        let signature = match &self.config.secret {
            Some(secret) => match sign_body(secret, &body, &payload.timestamp) {
                Ok(sig) => Some(sig),
                Err(e) => {
                    return DeliveryOutcome {
                        delivered: false,
                        attempts: 0,
                        last_status: None,
                        last_error: Some(e.to_string()),
                    }
                }
            },
            None => None,
        };

        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            match self.post_once(url, &body, payload, signature.as_deref()).await {
                Ok(status) if (200..300).contains(&status) => {
                    info!(
                        url = url,
                        job_id = %payload.job_id,
                        status = status,
                        attempt = attempt,
                        "Webhook delivered"
                    );
                    return DeliveryOutcome {
                        delivered: true,
                        attempts: attempt,
                        last_status: Some(status),
                        last_error: None,
                    };
                }
                Ok(status) => {
                    warn!(
                        url = url,
                        job_id = %payload.job_id,
                        status = status,
                        attempt = attempt,
                        "Webhook attempt returned non-2xx"
                    );
                    last_status = Some(status);
                    last_error = Some(format!("HTTP {status}"));
                }
                Err(e) => {
                    warn!(
                        url = url,
                        job_id = %payload.job_id,
                        attempt = attempt,
                        error = %e,
                        "Webhook attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < self.config.max_retries {
                // Deterministic schedule: 1 s after the first failure,
                // doubling up to the attempt cap.
                let pause = Duration::from_secs(1 << (attempt - 1).min(4));
                tokio::time::sleep(pause).await;
            }
        }

        error!(
            url = url,
            job_id = %payload.job_id,
            attempts = self.config.max_retries,
            "Webhook delivery exhausted all attempts"
        );
        DeliveryOutcome {
            delivered: false,
            attempts: self.config.max_retries,
            last_status,
            last_error,
        }
    }

    async fn post_once(
        &self,
        url: &str,
        body: &str,
        payload: &WebhookPayload,
        signature: Option<&str>,
    ) -> Result<u16, reqwest::Error> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "subtext-webhook/1.0")
            .header(TIMESTAMP_HEADER, &payload.timestamp)
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}

/// A queued delivery request.
struct DispatchRequest {
    job: JobRecord,
    result: Option<serde_json::Value>,
}

/// Sender half handed to the worker loop.
#[derive(Clone)]
pub struct WebhookHandle {
    tx: mpsc::Sender<DispatchRequest>,
}

impl WebhookHandle {
    /// A handle whose deliveries are silently dropped. For wiring tests and
    /// deployments without webhook support.
    pub fn disconnected() -> Self {
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        Self { tx }
    }

    /// Hand a terminal job to the dispatcher. Blocks only while the bounded
    /// buffer is full, which is the back-pressure the worker loop accepts.
    pub async fn dispatch(&self, job: JobRecord, result: Option<serde_json::Value>) {
        if job.webhook_url.is_none() {
            return;
        }
        if self.tx.send(DispatchRequest { job, result }).await.is_err() {
            warn!("Webhook dispatcher is gone; dropping delivery");
        }
    }
}

/// The dispatcher: drains the buffer with a bounded pool of deliveries and
/// records each outcome on the job row.
pub struct WebhookDispatcher {
    handle: WebhookHandle,
    task: tokio::task::JoinHandle<()>,
}

impl WebhookDispatcher {
    pub fn spawn(
        client: WebhookClient,
        jobs: Arc<dyn JobStore>,
        buffer: usize,
        pool_size: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<DispatchRequest>(buffer);
        let client = Arc::new(client);
        let permits = Arc::new(Semaphore::new(pool_size.max(1)));

        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                let client = Arc::clone(&client);
                let jobs = Arc::clone(&jobs);
                tokio::spawn(async move {
                    let _permit = permit;
                    Self::deliver_one(&client, &jobs, request).await;
                });
            }
            debug!("Webhook dispatcher drained");
        });

        Self {
            handle: WebhookHandle { tx },
            task,
        }
    }

    /// The sender half for the worker loop.
    pub fn handle(&self) -> WebhookHandle {
        self.handle.clone()
    }

    /// Drop the sender and wait for in-flight deliveries to settle.
    pub async fn shutdown(self) {
        drop(self.handle);
        self.task.await.ok();
    }

    async fn deliver_one(client: &WebhookClient, jobs: &Arc<dyn JobStore>, request: DispatchRequest) {
        let Some(url) = request.job.webhook_url.clone() else {
            return;
        };
        let payload = WebhookPayload::for_job(&request.job, request.result);
        let outcome = client.deliver(&url, &payload).await;

        let labels = [(
            "outcome",
            if outcome.delivered { "delivered" } else { "failed" }.to_string(),
        )];
        metrics::counter!("subtext_webhook_deliveries_total", &labels).increment(1);

        let status = if outcome.delivered {
            WebhookDeliveryStatus::Delivered
        } else {
            WebhookDeliveryStatus::Failed
        };
        if let Err(e) = jobs
            .set_webhook_delivery(
                &request.job.job_id,
                status,
                outcome.attempts,
                outcome.last_error.as_deref(),
            )
            .await
        {
            error!(job_id = %request.job.job_id, error = %e, "Failed to record webhook outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subtext_models::Fingerprint;

    fn terminal_job(webhook: Option<&str>) -> JobRecord {
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        JobRecord::new(fp, webhook.map(str::to_string))
            .start()
            .finish()
    }

    #[test]
    fn signature_matches_manual_hmac() {
        let secret = "shhh-very-secret";
        let body = r#"{"event":"job.completed"}"#;
        let timestamp = "2024-06-01T12:00:00+00:00";

        let header = sign_body(secret, body, timestamp).unwrap();
        assert!(header.starts_with("sha256="));

        // Manual recomputation over body || "." || timestamp.
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{body}.{timestamp}").as_bytes());
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert_eq!(header, expected);
    }

    #[test]
    fn verification_accepts_good_and_rejects_bad() {
        let secret = "shhh";
        let body = r#"{"x":1}"#;
        let timestamp = "2024-06-01T12:00:00+00:00";
        let header = sign_body(secret, body, timestamp).unwrap();

        assert!(verify_signature(secret, body, timestamp, &header));
        assert!(!verify_signature("wrong", body, timestamp, &header));
        assert!(!verify_signature(secret, r#"{"x":2}"#, timestamp, &header));
        assert!(!verify_signature(secret, body, "2099-01-01T00:00:00Z", &header));
        assert!(!verify_signature(secret, body, timestamp, "sha256=zz"));
        assert!(!verify_signature(secret, body, timestamp, "md5=abcd"));
    }

    #[test]
    fn payload_for_finished_job_carries_result() {
        let job = terminal_job(Some("https://example.com/hook"));
        let result = serde_json::json!({"segment_count": 2});
        let payload = WebhookPayload::for_job(&job, Some(result.clone()));

        assert_eq!(payload.event, "job.completed");
        assert_eq!(payload.status, JobStatus::Finished);
        assert_eq!(payload.result, Some(result));
        assert!(payload.error.is_none());
        assert!(!payload.timestamp.is_empty());
    }

    #[test]
    fn payload_for_failed_job_carries_error() {
        let fp = Fingerprint::canonicalise("dQw4w9WgXcQ", Some("en"), true).unwrap();
        let job = JobRecord::new(fp, Some("https://example.com/hook".to_string()))
            .start()
            .fail(ErrorKind::SubtitlesDisabled, "captions off");
        let payload = WebhookPayload::for_job(&job, None);

        assert_eq!(payload.status, JobStatus::Failed);
        let error = payload.error.unwrap();
        assert_eq!(error.kind, ErrorKind::SubtitlesDisabled);
        assert_eq!(error.message, "captions off");
    }

    #[tokio::test]
    async fn dispatch_skips_jobs_without_webhook() {
        // A handle whose receiver is closed: dispatch must be a no-op, not
        // an error, when the job carries no URL.
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = WebhookHandle { tx };
        handle.dispatch(terminal_job(None), None).await;
    }
}
