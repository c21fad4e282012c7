//! Last reported elapsed time per session

use parking_lot::Mutex;
use std::collections::HashMap;

/// In-process record of the latest heartbeat for each live session.
///
/// Feeds the `charge_last_heartbeat` expiry policy. Entries are dropped when
/// the session reaches a terminal state.
#[derive(Default)]
pub struct HeartbeatTracker {
    sessions: Mutex<HashMap<String, i64>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `elapsed`; out-of-order heartbeats never move the value back
    pub fn record(&self, session_id: &str, elapsed: i64) -> i64 {
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(session_id.to_string()).or_insert(0);
        *entry = (*entry).max(elapsed.max(0));
        *entry
    }

    pub fn last(&self, session_id: &str) -> Option<i64> {
        self.sessions.lock().get(session_id).copied()
    }

    pub fn forget(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
