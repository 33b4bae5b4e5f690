use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Statistics about one session attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Attempt identifier used in logs
    pub attempt_id: String,

    /// When the connection became active
    pub started_at: DateTime<Utc>,

    /// Time spent active, in seconds
    pub duration_secs: f64,

    /// Audio frames forwarded to the backend
    pub frames_sent: usize,

    /// Frame reads that failed and were retried
    pub audio_read_errors: usize,

    /// Inbound events decoded, of any type
    pub events_received: usize,

    /// Responses that reached `response.done`
    pub responses_completed: usize,
}

/// Live counters shared by the session's tasks
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: Arc<AtomicUsize>,
    pub audio_read_errors: Arc<AtomicUsize>,
    pub events_received: Arc<AtomicUsize>,
    pub responses_completed: Arc<AtomicUsize>,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, attempt_id: String, started_at: DateTime<Utc>) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);
        SessionStats {
            attempt_id,
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            audio_read_errors: self.audio_read_errors.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            responses_completed: self.responses_completed.load(Ordering::Relaxed),
        }
    }
}
