//! Caption extraction.
//!
//! Two engines behind one trait, tried in a fixed ladder with bounded
//! attempts, a wall-clock budget, and proxy rotation:
//!
//! 1. primary engine, direct
//! 2. primary engine, via rotated proxies
//! 3. fallback engine, direct
//! 4. fallback engine, via rotated proxies
//!
//! Terminal classifications (video gone, captions disabled, language absent)
//! short-circuit the ladder; transient ones fall through with exponential
//! full-jitter backoff.

pub mod engine;
pub mod error;
pub mod json3;
pub mod ladder;
pub mod proxy;
pub mod retry;

pub use engine::{CaptionEngine, EngineOutput, PlayerEngine, TimedtextEngine};
pub use error::{ExtractError, ExtractResult};
pub use ladder::{Extraction, Extractor, ExtractorConfig};
pub use proxy::{PoolHealth, ProxyEndpoint, ProxyRotator, RotatorConfig};
pub use retry::BackoffPolicy;
