//! In-process request counters published on `GET /debug/vars`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use tracing::warn;

use crate::AppState;

/// Cumulative counters for the lifetime of the process. The scalar
/// counters are lock-free atomics; only the by-status map needs a lock,
/// since the set of observed status codes grows at runtime.
#[derive(Default)]
pub struct Metrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_micros: AtomicU64,
    responses_by_status: Mutex<HashMap<u16, u64>>,
}

/// Point-in-time copy of the counters, serialized on the debug route.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_micros: u64,
    pub total_responses_sent_by_status: HashMap<u16, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, status: u16, elapsed: Duration) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.processing_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        match self.responses_by_status.lock() {
            Ok(mut by_status) => *by_status.entry(status).or_insert(0) += 1,
            Err(_) => warn!("metrics lock poisoned, dropping a status count"),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_status = match self.responses_by_status.lock() {
            Ok(by_status) => by_status.clone(),
            Err(_) => {
                warn!("metrics lock poisoned, reporting empty status counts");
                HashMap::new()
            }
        };

        MetricsSnapshot {
            total_requests_received: self.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
            total_processing_time_micros: self.processing_time_micros.load(Ordering::Relaxed),
            total_responses_sent_by_status: by_status,
        }
    }
}

/// Middleware counting every request/response pair and the wall time
/// spent between them. Sits outermost so even panics recovered further
/// in still produce a counted 500.
pub async fn record_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    state.metrics.record_request();

    let response = next.run(request).await;

    state
        .metrics
        .record_response(response.status().as_u16(), started.elapsed());
    response
}

/// GET /debug/vars
pub async fn show_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
