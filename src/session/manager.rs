use chrono::Utc;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use super::types::{SessionRecord, SessionStatus};

/// In-process registry of live sessions. Sessions register after the request
/// header authenticates and deregister when the connection task finishes.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<Uuid, SessionRecord>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: SessionRecord) {
        self.sessions.insert(record.session_id, record);
    }

    /// Close out a session, logging the transfer summary.
    pub fn finish(&self, session_id: &Uuid, bytes_up: u64, bytes_down: u64, status: SessionStatus) {
        if let Some((_, mut record)) = self.sessions.remove(session_id) {
            record.end_time = Some(Utc::now());
            record.bytes_up = bytes_up;
            record.bytes_down = bytes_down;
            record.status = status;

            let duration_secs = record
                .end_time
                .map(|end| (end - record.start_time).num_seconds().max(0))
                .unwrap_or(0);

            info!(
                prefix = %record.log_prefix(),
                status = ?status,
                duration_secs,
                bytes_up,
                bytes_down,
                "session finished"
            );
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}
