//! Usage events, credit grants and kill-switch signals

use super::{CreditReservation, CreditTransaction, TransactionKind};
use crate::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest session the ledger will price (31 days)
pub const MAX_SESSION_SECONDS: i64 = 31 * 24 * 3600;

/// Session lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventKind {
    SessionStart,
    Heartbeat,
    SessionEnd,
    SessionCancelled,
}

impl fmt::Display for UsageEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageEventKind::SessionStart => write!(f, "session_start"),
            UsageEventKind::Heartbeat => write!(f, "heartbeat"),
            UsageEventKind::SessionEnd => write!(f, "session_end"),
            UsageEventKind::SessionCancelled => write!(f, "session_cancelled"),
        }
    }
}

/// Lifecycle event from the telephony layer (delivered at least once)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub kind: UsageEventKind,
    pub session_id: String,
    pub org_id: String,
    /// Seconds since session start (heartbeat, end)
    #[serde(default)]
    pub elapsed_seconds: Option<i64>,
    /// Expected duration (start)
    #[serde(default)]
    pub estimated_seconds: Option<i64>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    fn new(kind: UsageEventKind, org_id: &str, session_id: &str) -> Self {
        Self {
            kind,
            session_id: session_id.to_string(),
            org_id: org_id.to_string(),
            elapsed_seconds: None,
            estimated_seconds: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn start(org_id: &str, session_id: &str, estimated_seconds: Option<i64>) -> Self {
        Self {
            estimated_seconds,
            ..Self::new(UsageEventKind::SessionStart, org_id, session_id)
        }
    }

    pub fn heartbeat(org_id: &str, session_id: &str, elapsed_seconds: i64) -> Self {
        Self {
            elapsed_seconds: Some(elapsed_seconds),
            ..Self::new(UsageEventKind::Heartbeat, org_id, session_id)
        }
    }

    pub fn end(org_id: &str, session_id: &str, elapsed_seconds: i64) -> Self {
        Self {
            elapsed_seconds: Some(elapsed_seconds),
            ..Self::new(UsageEventKind::SessionEnd, org_id, session_id)
        }
    }

    pub fn cancelled(org_id: &str, session_id: &str) -> Self {
        Self::new(UsageEventKind::SessionCancelled, org_id, session_id)
    }

    /// Elapsed seconds, clamped to zero when absent or negative
    pub fn elapsed(&self) -> i64 {
        self.elapsed_seconds.unwrap_or(0).max(0)
    }

    /// Reject durations outside `0..=MAX_SESSION_SECONDS`
    pub fn check_durations(&self) -> AppResult<()> {
        for (field, value) in [
            ("elapsed_seconds", self.elapsed_seconds),
            ("estimated_seconds", self.estimated_seconds),
        ] {
            if let Some(secs) = value.filter(|s| !(0..=MAX_SESSION_SECONDS).contains(s)) {
                return Err(AppError::InvalidInput(format!(
                    "{} must be between 0 and {}, got {}",
                    field, MAX_SESSION_SECONDS, secs
                )));
            }
        }
        Ok(())
    }
}

/// External credit grant (payment processor, promotions, support)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    pub org_id: String,
    pub amount_minor_units: i64,
    pub kind: TransactionKind,
    /// Provider event id; a redelivered grant is a no-op
    pub external_event_id: String,
}

/// Result of handling one usage event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Session admitted with a hold (or the existing hold on redelivery)
    Reserved { reservation: CreditReservation },
    /// Heartbeat evaluated, no ledger effect
    Evaluated { decision: KillSwitchDecision },
    /// Heartbeat for a session that already ended; neither tracked nor evaluated
    Stale,
    /// Session end debited the wallet
    Settled {
        transaction: CreditTransaction,
        reservation_bypassed: bool,
    },
    /// Session end already applied earlier; nothing new was written
    AlreadySettled { transaction: CreditTransaction },
    /// Hold dropped without charge
    Released { reservation: Option<CreditReservation> },
}

impl EventOutcome {
    pub fn transaction(&self) -> Option<&CreditTransaction> {
        match self {
            EventOutcome::Settled { transaction, .. }
            | EventOutcome::AlreadySettled { transaction } => Some(transaction),
            _ => None,
        }
    }
}

/// Low-balance notice raised alongside a heartbeat evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowBalanceWarning {
    pub org_id: String,
    pub session_id: String,
    /// effective balance (excluding this session's hold) minus projected cost
    pub balance_headroom: i64,
    /// reserved - projected; negative once the session outran its hold
    pub reservation_headroom: i64,
    /// cost of the configured warning runway
    pub threshold: i64,
}

/// Kill-switch verdict for one heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KillSwitchDecision {
    pub terminate: bool,
    pub warning: Option<LowBalanceWarning>,
    pub projected_cost: i64,
}

impl KillSwitchDecision {
    /// Verdict used when evaluation itself failed
    pub fn no_op() -> Self {
        Self::default()
    }
}

/// Command sent back to the telephony layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSignal {
    pub org_id: String,
    pub session_id: String,
    pub action: String,
    pub reason: String,
}

impl KillSignal {
    pub fn terminate(org_id: &str, session_id: &str, reason: impl Into<String>) -> Self {
        Self {
            org_id: org_id.to_string(),
            session_id: session_id.to_string(),
            action: "terminate".to_string(),
            reason: reason.into(),
        }
    }
}
