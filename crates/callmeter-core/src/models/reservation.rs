//! Credit reservation model
//!
//! A temporary hold on funds for the duration of a metered session.

use crate::AppError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reservation status
///
/// `Active` is the only non-terminal state. Every transition leaves it and
/// none returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holding funds
    #[default]
    Active,
    /// Settled by a session end
    Committed,
    /// Dropped without charge
    Released,
    /// Reclaimed by the expiry sweep
    Expired,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ReservationStatus::Active),
            "committed" => Ok(ReservationStatus::Committed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(AppError::InvalidInput(format!(
                "unknown reservation status '{}'",
                other
            ))),
        }
    }
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }

    /// Check if reservation is still holding balance
    pub fn is_holding(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    /// Check if reservation is finalized
    pub fn is_final(&self) -> bool {
        !self.is_holding()
    }
}

/// Credit reservation entity
///
/// Lifecycle:
/// 1. Created at session start (Active)
/// 2. Committed at session end, released on cancel, or expired by the sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReservation {
    /// Unique identifier (UUID)
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// Session being metered (unique across all reservations)
    pub session_id: String,

    /// Amount held, never negative
    pub amount_minor_units: i64,

    /// Current status
    pub status: ReservationStatus,

    /// Actual cost written on commit (or expiry charge)
    pub committed_minor_units: Option<i64>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the sweep may reclaim this hold
    pub expires_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl CreditReservation {
    /// Create a new active reservation
    pub fn new(
        org_id: impl Into<String>,
        session_id: impl Into<String>,
        amount_minor_units: i64,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            session_id: session_id.into(),
            amount_minor_units,
            status: ReservationStatus::Active,
            committed_minor_units: None,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            updated_at: now,
        }
    }

    /// Check if reservation is past its TTL
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_holding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reservation_is_active() {
        let res = CreditReservation::new("org-1", "call-1", 280, 2700);

        assert!(res.is_active());
        assert!(!res.is_expired());
        assert_eq!(res.committed_minor_units, None);
        assert_eq!((res.expires_at - res.created_at).num_seconds(), 2700);
    }

    #[test]
    fn test_expiry_boundary() {
        let res = CreditReservation::new("org-1", "call-1", 280, 60);

        assert!(!res.is_expired_at(res.expires_at - Duration::seconds(1)));
        assert!(res.is_expired_at(res.expires_at));
    }

    #[test]
    fn test_reservation_status() {
        assert!(ReservationStatus::Active.is_holding());
        assert!(ReservationStatus::Committed.is_final());
        assert!(ReservationStatus::Released.is_final());
        assert!(ReservationStatus::Expired.is_final());
        assert_eq!(
            "EXPIRED".parse::<ReservationStatus>().unwrap(),
            ReservationStatus::Expired
        );
        assert!("pending".parse::<ReservationStatus>().is_err());
        assert_eq!(ReservationStatus::Committed.to_string(), "committed");
    }
}
