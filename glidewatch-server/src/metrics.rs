//! Server Metrics: request and detection counters with Prometheus + JSON export
//!
//! Uses lock-free atomics for all counters.
//!
//! ## Endpoints
//! - `GET /metrics`: Prometheus text format
//! - `GET /metrics/json`: JSON format

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use glidewatch_core::TickReport;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::api::ApiState;

/// Shared metrics state (all lock-free atomics)
#[derive(Debug)]
pub struct ServerMetrics {
    /// Total HTTP requests served
    pub total_requests: AtomicU64,
    /// Total request errors (4xx + 5xx)
    pub total_errors: AtomicU64,
    /// Cumulative request duration in microseconds (for computing average)
    pub total_duration_us: AtomicU64,
    /// Evaluation passes run
    pub ticks: AtomicU64,
    /// Cumulative evaluation time in microseconds
    pub total_tick_us: AtomicU64,
    pub actors_evaluated: AtomicU64,
    pub detections: AtomicU64,
    pub suppressed: AtomicU64,
    pub bans: AtomicU64,
    pub resets: AtomicU64,
    pub reclaimed: AtomicU64,
    /// Host events accepted by the event pump
    pub host_events: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notification_failures: AtomicU64,
    /// Notifications dropped because the queue was full
    pub notifications_dropped: AtomicU64,
    pub start_time: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            total_tick_us: AtomicU64::new(0),
            actors_evaluated: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            bans: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            host_events: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ServerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, duration_us: u64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration_us, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tick(&self, report: &TickReport, duration_us: u64) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.total_tick_us.fetch_add(duration_us, Ordering::Relaxed);
        self.actors_evaluated
            .fetch_add(report.evaluated as u64, Ordering::Relaxed);
        self.detections
            .fetch_add(report.detections as u64, Ordering::Relaxed);
        self.suppressed
            .fetch_add(report.suppressed as u64, Ordering::Relaxed);
        self.bans.fetch_add(report.bans as u64, Ordering::Relaxed);
        self.resets.fetch_add(report.resets as u64, Ordering::Relaxed);
        self.reclaimed
            .fetch_add(report.reclaimed as u64, Ordering::Relaxed);
    }

    pub fn record_host_event(&self) {
        self.host_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notification_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn requests_per_second(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let uptime = self.uptime_secs();
        if uptime > 0.0 { total / uptime } else { 0.0 }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        let dur_us = self.total_duration_us.load(Ordering::Relaxed);
        if total > 0 {
            (dur_us as f64 / total as f64) / 1000.0
        } else {
            0.0
        }
    }

    pub fn avg_tick_ms(&self) -> f64 {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let tick_us = self.total_tick_us.load(Ordering::Relaxed);
        if ticks > 0 {
            (tick_us as f64 / ticks as f64) / 1000.0
        } else {
            0.0
        }
    }
}

// ============================================================================
// Axum Middleware: Automatic request tracking
// ============================================================================

/// Middleware that records request count and duration for every HTTP request.
pub async fn metrics_middleware(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let resp = next.run(req).await;
    let duration_us = start.elapsed().as_micros() as u64;
    let is_error = resp.status().is_client_error() || resp.status().is_server_error();

    state.metrics.record_request(duration_us, is_error);
    resp
}

// ============================================================================
// GET /metrics: Prometheus text exposition format
// ============================================================================

pub async fn prometheus_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let m = &state.metrics;
    let total_requests = m.total_requests.load(Ordering::Relaxed);
    let total_errors = m.total_errors.load(Ordering::Relaxed);
    let ticks = m.ticks.load(Ordering::Relaxed);
    let detections = m.detections.load(Ordering::Relaxed);
    let suppressed = m.suppressed.load(Ordering::Relaxed);
    let bans = m.bans.load(Ordering::Relaxed);
    let resets = m.resets.load(Ordering::Relaxed);
    let reclaimed = m.reclaimed.load(Ordering::Relaxed);
    let host_events = m.host_events.load(Ordering::Relaxed);
    let sent = m.notifications_sent.load(Ordering::Relaxed);
    let failed = m.notification_failures.load(Ordering::Relaxed);
    let dropped = m.notifications_dropped.load(Ordering::Relaxed);
    let uptime = m.uptime_secs();

    let tracked_actors = state.engine.tracked_actors();
    let active_bans = state.engine.bans().len();
    let dedup_keys = state.attributor.tracked_keys();
    let online = state.registry.online_count();

    let avg_req_duration_s = m.avg_duration_ms() / 1000.0;
    let avg_tick_s = m.avg_tick_ms() / 1000.0;

    let body = format!(
        "# HELP glidewatch_requests_total Total HTTP requests served\n\
         # TYPE glidewatch_requests_total counter\n\
         glidewatch_requests_total {total_requests}\n\
         \n\
         # HELP glidewatch_request_errors_total Total HTTP request errors (4xx/5xx)\n\
         # TYPE glidewatch_request_errors_total counter\n\
         glidewatch_request_errors_total {total_errors}\n\
         \n\
         # HELP glidewatch_request_duration_seconds Average request duration\n\
         # TYPE glidewatch_request_duration_seconds gauge\n\
         glidewatch_request_duration_seconds {avg_req_duration_s:.6}\n\
         \n\
         # HELP glidewatch_ticks_total Evaluation passes run\n\
         # TYPE glidewatch_ticks_total counter\n\
         glidewatch_ticks_total {ticks}\n\
         \n\
         # HELP glidewatch_tick_duration_seconds Average evaluation pass duration\n\
         # TYPE glidewatch_tick_duration_seconds gauge\n\
         glidewatch_tick_duration_seconds {avg_tick_s:.6}\n\
         \n\
         # HELP glidewatch_detections_total Threshold triggers announced\n\
         # TYPE glidewatch_detections_total counter\n\
         glidewatch_detections_total {detections}\n\
         \n\
         # HELP glidewatch_suppressed_total Threshold triggers inside a dimension switch cooldown\n\
         # TYPE glidewatch_suppressed_total counter\n\
         glidewatch_suppressed_total {suppressed}\n\
         \n\
         # HELP glidewatch_bans_total Temporary bans issued\n\
         # TYPE glidewatch_bans_total counter\n\
         glidewatch_bans_total {bans}\n\
         \n\
         # HELP glidewatch_resets_total Continuous count resets\n\
         # TYPE glidewatch_resets_total counter\n\
         glidewatch_resets_total {resets}\n\
         \n\
         # HELP glidewatch_reclaimed_total Idle windows reclaimed\n\
         # TYPE glidewatch_reclaimed_total counter\n\
         glidewatch_reclaimed_total {reclaimed}\n\
         \n\
         # HELP glidewatch_host_events_total Host events processed\n\
         # TYPE glidewatch_host_events_total counter\n\
         glidewatch_host_events_total {host_events}\n\
         \n\
         # HELP glidewatch_notifications_total OneBot notifications by outcome\n\
         # TYPE glidewatch_notifications_total counter\n\
         glidewatch_notifications_total{{outcome=\"sent\"}} {sent}\n\
         glidewatch_notifications_total{{outcome=\"failed\"}} {failed}\n\
         glidewatch_notifications_total{{outcome=\"dropped\"}} {dropped}\n\
         \n\
         # HELP glidewatch_online_actors Actors currently reported online\n\
         # TYPE glidewatch_online_actors gauge\n\
         glidewatch_online_actors {online}\n\
         \n\
         # HELP glidewatch_tracked_actors Actors with a detection window\n\
         # TYPE glidewatch_tracked_actors gauge\n\
         glidewatch_tracked_actors {tracked_actors}\n\
         \n\
         # HELP glidewatch_active_bans Ban records held\n\
         # TYPE glidewatch_active_bans gauge\n\
         glidewatch_active_bans {active_bans}\n\
         \n\
         # HELP glidewatch_dedup_keys Chunk keys in the de-duplication map\n\
         # TYPE glidewatch_dedup_keys gauge\n\
         glidewatch_dedup_keys {dedup_keys}\n\
         \n\
         # HELP glidewatch_uptime_seconds Server uptime\n\
         # TYPE glidewatch_uptime_seconds gauge\n\
         glidewatch_uptime_seconds {uptime:.2}\n",
    );

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ============================================================================
// GET /metrics/json
// ============================================================================

#[derive(Debug, Serialize)]
pub struct JsonMetrics {
    pub uptime_secs: f64,
    pub online_actors: usize,
    pub tracked_actors: usize,
    pub active_bans: usize,
    pub dedup_keys: usize,
    pub ticks: u64,
    pub avg_tick_time_ms: f64,
    pub detections: u64,
    pub suppressed: u64,
    pub bans: u64,
    pub resets: u64,
    pub reclaimed: u64,
    pub host_events: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub notifications_dropped: u64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub rps: f64,
    pub avg_request_duration_ms: f64,
}

pub async fn json_metrics_handler(State(state): State<ApiState>) -> Json<JsonMetrics> {
    let m = &state.metrics;

    Json(JsonMetrics {
        uptime_secs: m.uptime_secs(),
        online_actors: state.registry.online_count(),
        tracked_actors: state.engine.tracked_actors(),
        active_bans: state.engine.bans().len(),
        dedup_keys: state.attributor.tracked_keys(),
        ticks: m.ticks.load(Ordering::Relaxed),
        avg_tick_time_ms: m.avg_tick_ms(),
        detections: m.detections.load(Ordering::Relaxed),
        suppressed: m.suppressed.load(Ordering::Relaxed),
        bans: m.bans.load(Ordering::Relaxed),
        resets: m.resets.load(Ordering::Relaxed),
        reclaimed: m.reclaimed.load(Ordering::Relaxed),
        host_events: m.host_events.load(Ordering::Relaxed),
        notifications_sent: m.notifications_sent.load(Ordering::Relaxed),
        notification_failures: m.notification_failures.load(Ordering::Relaxed),
        notifications_dropped: m.notifications_dropped.load(Ordering::Relaxed),
        total_requests: m.total_requests.load(Ordering::Relaxed),
        total_errors: m.total_errors.load(Ordering::Relaxed),
        rps: m.requests_per_second(),
        avg_request_duration_ms: m.avg_duration_ms(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_metrics_defaults() {
        let m = ServerMetrics::default();
        assert_eq!(m.total_requests.load(Ordering::Relaxed), 0);
        assert_eq!(m.bans.load(Ordering::Relaxed), 0);
        assert_eq!(m.avg_tick_ms(), 0.0);
    }

    #[test]
    fn test_record_request() {
        let m = ServerMetrics::default();
        m.record_request(1500, false);
        m.record_request(2500, true);
        m.record_request(1000, false);

        assert_eq!(m.total_requests.load(Ordering::Relaxed), 3);
        assert_eq!(m.total_errors.load(Ordering::Relaxed), 1);
        assert_eq!(m.total_duration_us.load(Ordering::Relaxed), 5000);
    }

    #[test]
    fn test_record_tick_accumulates() {
        let m = ServerMetrics::default();
        let report = TickReport {
            evaluated: 4,
            detections: 2,
            bans: 1,
            resets: 3,
            ..Default::default()
        };
        m.record_tick(&report, 2000);
        m.record_tick(&report, 4000);

        assert_eq!(m.ticks.load(Ordering::Relaxed), 2);
        assert_eq!(m.actors_evaluated.load(Ordering::Relaxed), 8);
        assert_eq!(m.detections.load(Ordering::Relaxed), 4);
        assert_eq!(m.bans.load(Ordering::Relaxed), 2);
        assert_eq!(m.resets.load(Ordering::Relaxed), 6);
        assert!((m.avg_tick_ms() - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_notification_outcomes() {
        let m = ServerMetrics::default();
        m.record_notification(true);
        m.record_notification(false);
        m.record_notification_dropped();
        assert_eq!(m.notifications_sent.load(Ordering::Relaxed), 1);
        assert_eq!(m.notification_failures.load(Ordering::Relaxed), 1);
        assert_eq!(m.notifications_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rps_zero_uptime() {
        let m = ServerMetrics::default();
        let rps = m.requests_per_second();
        assert!(rps.is_finite());
    }
}
