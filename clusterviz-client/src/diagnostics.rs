use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub uptime_seconds: u64,
    pub polls_completed: u64,
    pub poll_failures: u64,
    pub retries: u64,
    pub events_received: u64,
    pub stale_responses: u64,
    pub last_update: Option<String>,
    pub poll_status: String,
}

/// Session counters, shared between the session actor and its handle.
#[derive(Clone)]
pub struct Diagnostics {
    start_time: Instant,
    polls_completed: Arc<AtomicU64>,
    poll_failures: Arc<AtomicU64>,
    retries: Arc<AtomicU64>,
    events_received: Arc<AtomicU64>,
    stale_responses: Arc<AtomicU64>,
    last_update: Arc<Mutex<Option<OffsetDateTime>>>,
    poll_status: Arc<Mutex<String>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            polls_completed: Arc::new(AtomicU64::new(0)),
            poll_failures: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            events_received: Arc::new(AtomicU64::new(0)),
            stale_responses: Arc::new(AtomicU64::new(0)),
            last_update: Arc::new(Mutex::new(None)),
            poll_status: Arc::new(Mutex::new("idle".to_string())),
        }
    }

    pub fn mark_polling(&self) {
        *self.poll_status.lock() = "polling".to_string();
    }

    pub fn mark_retrying(&self, attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        *self.poll_status.lock() = format!("retrying (attempt {})", attempt);
    }

    pub fn mark_stopped(&self, reason: &str) {
        *self.poll_status.lock() = format!("stopped: {}", reason);
    }

    pub fn record_poll(&self, events: usize) {
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
        self.events_received.fetch_add(events as u64, Ordering::Relaxed);
        *self.last_update.lock() = Some(OffsetDateTime::now_utc());
        *self.poll_status.lock() = "polling".to_string();
    }

    pub fn record_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            polls_completed: self.polls_completed.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            last_update: self.last_update.lock().and_then(|ts| ts.format(&Rfc3339).ok()),
            poll_status: self.poll_status.lock().clone(),
        }
    }
}
