//! Worker runtime for the subtext extraction pipeline.
//!
//! A worker process dequeues jobs, runs the extraction ladder, commits the
//! result through the cache coordinator, records the terminal job state,
//! and hands terminal jobs with webhook URLs to the dispatcher.

pub mod config;
pub mod error;
pub mod executor;
pub mod webhook;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use webhook::{
    verify_signature, DeliveryOutcome, WebhookClient, WebhookConfig, WebhookDispatcher,
    WebhookHandle, WebhookPayload, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
