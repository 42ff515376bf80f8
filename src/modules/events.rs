use log::{info, warn};

use crate::modules::models::telemetry::SessionKey;

/// which tier answered a cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Database,
}

/// Structured events the pipeline emits. The sink decides format and
/// destination, components never write anywhere directly.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    BuildStarted {
        key: SessionKey,
    },
    BuildCompleted {
        key: SessionKey,
        frames: usize,
        degraded: bool,
    },
    PartialFailure {
        key: SessionKey,
        driver: String,
        message: String,
    },
    CacheHit {
        key: SessionKey,
        tier: CacheTier,
    },
    PersistRetry {
        key: SessionKey,
        attempt: u32,
    },
    RetryExhausted {
        key: SessionKey,
        attempts: u32,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// default sink, forwards everything to the log facade
pub struct LogSink {}

impl EventSink for LogSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::BuildStarted { key } => {
                info!(target: "pipeline", "building frames for {}", key);
            }
            PipelineEvent::BuildCompleted { key, frames, degraded } => {
                info!(target: "pipeline", "built {} frames for {} (degraded: {})", frames, key, degraded);
            }
            PipelineEvent::PartialFailure { key, driver, message } => {
                warn!(target: "pipeline", "driver {} failed in {}: {}", driver, key, message);
            }
            PipelineEvent::CacheHit { key, tier } => {
                info!(target: "cache", "{} served from {:?} tier", key, tier);
            }
            PipelineEvent::PersistRetry { key, attempt } => {
                warn!(target: "cache", "retrying durable write for {} (attempt {})", key, attempt);
            }
            PipelineEvent::RetryExhausted { key, attempts } => {
                warn!(target: "cache", "durable write for {} gave up after {} attempts", key, attempts);
            }
        }
    }
}
