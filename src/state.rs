//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection
//! through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Many handlers run at once and all need the same registry and config
//! - `Arc` gives each of them an owning handle; the data is freed when the
//!   last handle goes away
//!
//! ### Two kinds of locks
//! - `std::sync::RwLock` for config and metrics: held for a few
//!   instructions, never across an `.await`
//! - `tokio::sync` locks inside the session registry: sessions are locked
//!   from async code
//!
//! ### Poisoned locks
//! A std lock is "poisoned" when a thread panics while holding it. Config
//! and metrics are plain values that are always left consistent, so the
//! accessors below recover the guard with `PoisonError::into_inner` instead
//! of propagating the panic to every later request.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;

use crate::collaborators::{Collaborators, ServiceCalls};
use crate::config::AppConfig;
use crate::exam::pipeline::{PipelineConfig, TurnPipeline};
use crate::exam::question_pool::QuestionPool;
use crate::exam::questions::QuestionGenerator;
use crate::exam::session::SessionRegistry;

/// State shared across all handlers.
///
/// ## Fields:
/// - `config`: runtime-updatable configuration
/// - `metrics`: request and connection counters
/// - `sessions`: the live examination sessions
/// - `pipeline`: turn processing, wired to the collaborators
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub sessions: Arc<SessionRegistry>,
    pub pipeline: TurnPipeline,
}

/// Counters collected across all requests and connections.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// WebSocket connections currently open
    pub active_connections: u32,
    /// Connections accepted since start
    pub total_connections: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics, keyed by `"METHOD /path"`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state and wire the examination pipeline.
    ///
    /// The question pool is created here, once per process, and shared by
    /// every session through the pipeline.
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let services = ServiceCalls::new(collaborators, config.collaborator_timeout());
        let pool = Arc::new(QuestionPool::new(config.exam.question_pool_capacity));
        let questions = QuestionGenerator::new(pool, services.clone(), config.exam.question_attempts);
        let pipeline = TurnPipeline::new(
            services,
            questions,
            PipelineConfig {
                history_window: config.exam.history_window,
                send_greeting: config.exam.send_greeting,
            },
        );
        let sessions = Arc::new(SessionRegistry::new(config.performance.max_concurrent_sessions));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            sessions,
            pipeline,
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current configuration; the lock is released immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration after validating it.
    ///
    /// The session limit is pushed into the registry right away; the rest of
    /// `performance` is read when a connection opens.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        self.sessions
            .set_max_sessions(new_config.performance.max_concurrent_sessions);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a WebSocket connection is accepted.
    pub fn connection_opened(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_connections += 1;
        metrics.total_connections += 1;
    }

    /// Called when a WebSocket connection ends. Never underflows.
    pub fn connection_closed(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics().clone()
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

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
