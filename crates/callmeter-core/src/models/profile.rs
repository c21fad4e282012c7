//! Tenant billing profile
//!
//! Rate, increment and ceiling settings resolved per organization. Profiles
//! are read on every event so configuration changes take effect without a
//! restart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How fractional minor units are rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Always round toward the organization's disadvantage
    #[default]
    Up,
    /// Half away from zero
    Nearest,
    Down,
}

/// What happens to a reservation that outlives its TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryChargePolicy {
    /// Release the hold without charging
    #[default]
    Release,
    /// Charge the cost at the last heartbeat seen for the session
    ChargeLastHeartbeat,
}

/// Billing settings for one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingProfile {
    /// Price of one minute in minor units
    pub rate_per_minute: Decimal,
    pub billing_increment_secs: u32,
    pub rounding: Rounding,
    /// Desired debt ceiling; reconciled onto the wallet when it drifts
    pub debt_ceiling: i64,
    pub reservation_ttl_secs: i64,
    pub default_estimated_secs: i64,
    pub low_balance_runway_secs: i64,
    pub expiry_charge_policy: ExpiryChargePolicy,
}

impl Default for BillingProfile {
    fn default() -> Self {
        Self {
            rate_per_minute: Decimal::from(56),
            billing_increment_secs: 60,
            rounding: Rounding::Up,
            debt_ceiling: 0,
            reservation_ttl_secs: 2700,
            default_estimated_secs: 300,
            low_balance_runway_secs: 60,
            expiry_charge_policy: ExpiryChargePolicy::Release,
        }
    }
}

impl BillingProfile {
    /// Estimated duration to reserve for, falling back to the default
    pub fn estimate_secs(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(secs) if secs > 0 => secs,
            _ => self.default_estimated_secs,
        }
    }
}
