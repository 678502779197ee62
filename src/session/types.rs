use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound mode of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Tcp,
    Dns,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tcp => write!(f, "tcp"),
            Mode::Dns => write!(f, "udp"),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
    Failed,
}

/// Record of one accepted WebSocket connection, kept in the registry for the
/// lifetime of the connection task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub dest: String,
    pub dest_port: u16,
    pub mode: Mode,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn new(user_id: Uuid, dest: impl Into<String>, dest_port: u16, mode: Mode) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            dest: dest.into(),
            dest_port,
            mode,
            start_time: Utc::now(),
            end_time: None,
            bytes_up: 0,
            bytes_down: 0,
            status: SessionStatus::Active,
        }
    }

    /// Short id used in the per-session log prefix.
    pub fn short_id(&self) -> String {
        self.session_id.simple().to_string()[..8].to_string()
    }

    /// Log prefix in the `address:port-id mode` shape.
    pub fn log_prefix(&self) -> String {
        format!(
            "[{}:{}-{} {}]",
            self.dest,
            self.dest_port,
            self.short_id(),
            self.mode
        )
    }
}
