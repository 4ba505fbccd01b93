//! # Application State Management
//!
//! Shared state handed to every component that reports activity: the
//! configuration, the voice pipeline counters, and the process start time.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: the capture callback runs on a device thread while the session
//!   driver runs on the runtime thread; both hold a clone of this state
//! - **RwLock**: many readers (status reports) or one writer (a counter bump)
//! - **Poisoning**: a panic while holding the lock poisons it; the counters
//!   stay meaningful, so the guard is recovered instead of propagating the
//!   panic

use crate::config::AppConfig;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<VoiceMetrics>>,
    pub start_time: Instant,
}

/// Counters for the voice pipeline since process start.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceMetrics {
    /// `connect()` calls that began a session
    pub sessions_started: u64,
    /// Sessions that ended on an error rather than a disconnect
    pub sessions_failed: u64,
    /// Microphone frames encoded and handed to the channel
    pub frames_sent: u64,
    /// Frames evicted from the outbound queue under backpressure
    pub frames_dropped: u64,
    /// Response chunks placed on the playback timeline
    pub segments_scheduled: u64,
    /// Inbound payloads rejected by the decoder
    pub payloads_rejected: u64,
    /// Barge-ins reported by the remote
    pub interruptions: u64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(VoiceMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration. Cloning releases the lock at once.
    pub fn get_config(&self) -> AppConfig {
        read(&self.config).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        *write(&self.config) = new_config;
        Ok(())
    }

    pub fn record_session_started(&self) {
        write(&self.metrics).sessions_started += 1;
    }

    pub fn record_session_failed(&self) {
        write(&self.metrics).sessions_failed += 1;
    }

    /// Called from the capture callback for every frame handed off.
    pub fn record_frame_sent(&self, evicted_oldest: bool) {
        let mut metrics = write(&self.metrics);
        metrics.frames_sent += 1;
        if evicted_oldest {
            metrics.frames_dropped += 1;
        }
    }

    pub fn record_segment_scheduled(&self) {
        write(&self.metrics).segments_scheduled += 1;
    }

    pub fn record_payload_rejected(&self) {
        write(&self.metrics).payloads_rejected += 1;
    }

    pub fn record_interruption(&self) {
        write(&self.metrics).interruptions += 1;
    }

    pub fn get_metrics_snapshot(&self) -> VoiceMetrics {
        read(&self.metrics).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
