//! # Application State Management
//!
//! State shared by every HTTP handler and websocket session.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same data
//! - **RwLock**: many concurrent readers, or one writer
//! - Locks are only held for a few field updates and never across an `.await`
//!
//! ### What lives here
//! - **config**: the loaded configuration, read by handlers and new sessions
//! - **metrics**: request counters and session lifecycle counters
//! - **services**: the transcription, generation and synthesis agents, built once
//! - **tracker**: the run tracking sink shared by every session
//! - **shutdown**: flipped once on SIGTERM/SIGINT so live sessions can wind down

use crate::agent::SessionServices;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::session::{EndReason, EndpointKind};
use crate::tracking::Tracker;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Provider-backed agents shared by all sessions
    pub services: Arc<SessionServices>,

    pub tracker: Arc<Tracker>,

    /// `true` once the server has started shutting down
    pub shutdown: Arc<watch::Sender<bool>>,

    pub start_time: Instant,
}

/// Counters exposed on `/api/v1/metrics`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// HTTP requests processed since start
    pub request_count: u64,

    /// HTTP requests answered with a 4xx/5xx
    pub error_count: u64,

    /// Sessions currently running
    pub active_sessions: usize,

    /// Sessions accepted since start
    pub total_sessions: u64,

    /// Sessions refused because the server was full
    pub rejected_sessions: u64,

    /// Ended sessions keyed by end reason
    pub sessions_ended: HashMap<String, u64>,

    /// Accepted sessions keyed by endpoint path
    pub sessions_by_endpoint: HashMap<String, u64>,

    /// Turns completed across all ended sessions
    pub completed_turns: u64,

    /// Per-route request statistics, keyed by "METHOD /pattern"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, services: SessionServices, tracker: Tracker) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            services: Arc::new(services),
            tracker: Arc::new(tracker),
            shutdown: Arc::new(watch::channel(false).0),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration, so no lock is held afterwards.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reserve a session slot, or refuse when `max_concurrent_sessions` are running
    /// or the server is shutting down.
    pub fn try_begin_session(&self, endpoint: EndpointKind) -> Result<(), AppError> {
        if self.is_shutting_down() {
            return Err(AppError::ServiceUnavailable("Server is shutting down".to_string()));
        }

        let limit = self.get_config().performance.max_concurrent_sessions;
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        if metrics.active_sessions >= limit {
            metrics.rejected_sessions += 1;
            return Err(AppError::ServiceUnavailable(format!(
                "Maximum concurrent sessions reached ({})",
                limit
            )));
        }

        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        *metrics
            .sessions_by_endpoint
            .entry(endpoint.path().to_string())
            .or_default() += 1;
        Ok(())
    }

    /// Give back a slot whose websocket upgrade never completed.
    pub fn cancel_session(&self, endpoint: EndpointKind) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.total_sessions = metrics.total_sessions.saturating_sub(1);
        if let Some(count) = metrics.sessions_by_endpoint.get_mut(endpoint.path()) {
            *count = count.saturating_sub(1);
        }
    }

    /// Release a session slot and record how it ended.
    pub fn record_session_end(&self, reason: EndReason, turns: u64) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.completed_turns += turns;
        *metrics.sessions_ended.entry(reason.as_str().to_string()).or_default() += 1;
    }

    /// Ask every live session to finish its current turn and end.
    pub fn begin_shutdown(&self) {
        let was_running = !self.shutdown.send_replace(true);
        if was_running {
            let active = self.get_metrics_snapshot().active_sessions;
            info!("Ending {} active sessions", active);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let entry = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        entry.request_count += 1;
        entry.total_duration_ms += duration_ms;
        if is_error {
            entry.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
