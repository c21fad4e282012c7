//! Usage event and credit grant DTOs

use callmeter_core::models::{
    CreditGrant, TransactionKind, UsageEvent, UsageEventKind, MAX_AMOUNT_MINOR_UNITS,
    MAX_SESSION_SECONDS,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

/// Lifecycle event posted by the telephony layer
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageEventRequest {
    pub kind: UsageEventKind,

    #[validate(length(min = 1, max = 128, message = "session_id is required"))]
    pub session_id: String,

    #[validate(length(min = 1, max = 128, message = "org_id is required"))]
    pub org_id: String,

    /// Seconds since the session started (heartbeat, end)
    #[validate(range(min = 0, max = MAX_SESSION_SECONDS))]
    pub elapsed_seconds: Option<i64>,

    /// Expected session length (start)
    #[validate(range(min = 0, max = MAX_SESSION_SECONDS))]
    pub estimated_seconds: Option<i64>,

    pub occurred_at: Option<DateTime<Utc>>,
}

impl UsageEventRequest {
    /// Heartbeats and ends must say how long the session has run
    pub fn check_kind_fields(&self) -> Result<(), String> {
        match self.kind {
            UsageEventKind::Heartbeat | UsageEventKind::SessionEnd
                if self.elapsed_seconds.is_none() =>
            {
                Err(format!("elapsed_seconds is required for {}", self.kind))
            }
            _ => Ok(()),
        }
    }
}

impl From<UsageEventRequest> for UsageEvent {
    fn from(req: UsageEventRequest) -> Self {
        Self {
            kind: req.kind,
            session_id: req.session_id,
            org_id: req.org_id,
            elapsed_seconds: req.elapsed_seconds,
            estimated_seconds: req.estimated_seconds,
            occurred_at: req.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Query parameters for event intake
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventIntakeParams {
    /// Queue the event for the worker pool instead of handling it inline
    #[serde(default)]
    pub queue: bool,
}

/// Top-up, bonus, refund or manual adjustment from an upstream system
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreditGrantRequest {
    #[validate(length(min = 1, max = 128, message = "org_id is required"))]
    pub org_id: String,

    /// Signed amount in minor units; only adjustments may be negative
    #[validate(range(min = -MAX_AMOUNT_MINOR_UNITS, max = MAX_AMOUNT_MINOR_UNITS))]
    pub amount_minor_units: i64,

    #[serde(default = "default_grant_kind")]
    pub kind: TransactionKind,

    /// Provider id used to absorb redelivery
    #[validate(length(min = 1, max = 256, message = "external_event_id is required"))]
    pub external_event_id: String,
}

fn default_grant_kind() -> TransactionKind {
    TransactionKind::Topup
}

impl From<CreditGrantRequest> for CreditGrant {
    fn from(req: CreditGrantRequest) -> Self {
        Self {
            org_id: req.org_id,
            amount_minor_units: req.amount_minor_units,
            kind: req.kind,
            external_event_id: req.external_event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_request_validation() {
        let req: UsageEventRequest = serde_json::from_str(
            r#"{"kind":"session_end","session_id":"call-1","org_id":"org-1","elapsed_seconds":120}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.check_kind_fields().is_ok());

        let event = UsageEvent::from(req);
        assert_eq!(event.kind, UsageEventKind::SessionEnd);
        assert_eq!(event.elapsed(), 120);
    }

    #[test]
    fn test_end_requires_elapsed() {
        let req: UsageEventRequest = serde_json::from_str(
            r#"{"kind":"session_end","session_id":"call-1","org_id":"org-1"}"#,
        )
        .unwrap();
        assert!(req.check_kind_fields().is_err());
    }

    #[test]
    fn test_blank_ids_rejected() {
        let req: UsageEventRequest =
            serde_json::from_str(r#"{"kind":"session_start","session_id":"","org_id":"org-1"}"#)
                .unwrap();
        assert!(req.validate().is_err());

        let req: UsageEventRequest = serde_json::from_str(
            r#"{"kind":"heartbeat","session_id":"c","org_id":"o","elapsed_seconds":-5}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_grant_defaults_to_topup() {
        let req: CreditGrantRequest = serde_json::from_str(
            r#"{"org_id":"org-1","amount_minor_units":500,"external_event_id":"pay-1"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, TransactionKind::Topup);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let req: CreditGrantRequest = serde_json::from_str(&format!(
            r#"{{"org_id":"org-1","amount_minor_units":{},"external_event_id":"pay-1"}}"#,
            i64::MAX
        ))
        .unwrap();
        assert!(req.validate().is_err());

        let req: UsageEventRequest = serde_json::from_str(&format!(
            r#"{{"kind":"session_end","session_id":"c","org_id":"o","elapsed_seconds":{}}}"#,
            MAX_SESSION_SECONDS + 1
        ))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
