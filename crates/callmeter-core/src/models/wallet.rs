//! Wallet model
//!
//! One prepaid wallet per organization. Balances are signed integers in the
//! smallest currency unit; the wallet may go negative down to its debt ceiling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet entity
///
/// Created once at onboarding with zero balance and never deleted. Only the
/// balance guard mutates it, through the ledger store's append primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Organization identifier (already resolved upstream)
    pub org_id: String,

    /// Current balance in minor units
    pub balance_minor_units: i64,

    /// How far below zero the balance may go
    pub debt_ceiling_minor_units: i64,

    /// Currency code (ISO 4217)
    pub currency: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a freshly onboarded wallet
    pub fn new(org_id: impl Into<String>, currency: impl Into<String>, debt_ceiling: i64) -> Self {
        let now = Utc::now();
        Self {
            org_id: org_id.into(),
            balance_minor_units: 0,
            debt_ceiling_minor_units: debt_ceiling.max(0),
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Balance plus debt ceiling, before any reservations are subtracted
    #[inline]
    pub fn spendable(&self) -> i64 {
        self.balance_minor_units
            .saturating_add(self.debt_ceiling_minor_units)
    }

    /// Whether applying `amount` keeps the balance at or above `-debt_ceiling`
    pub fn can_absorb(&self, amount: i64, reserved_elsewhere: i64) -> bool {
        // Widened so extreme balances compare exactly
        i128::from(self.balance_minor_units) + i128::from(amount) - i128::from(reserved_elsewhere)
            >= -i128::from(self.debt_ceiling_minor_units)
    }
}

/// Point-in-time view of a wallet used by queries and the kill switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub org_id: String,
    pub balance: i64,
    pub debt_ceiling: i64,
    /// Sum of active reservations
    pub reserved: i64,
    /// balance + debt_ceiling - reserved
    pub effective_balance: i64,
    pub currency: String,
}

impl BalanceSnapshot {
    pub fn from_wallet(wallet: &Wallet, reserved: i64) -> Self {
        Self {
            org_id: wallet.org_id.clone(),
            balance: wallet.balance_minor_units,
            debt_ceiling: wallet.debt_ceiling_minor_units,
            reserved,
            effective_balance: wallet.spendable().saturating_sub(reserved),
            currency: wallet.currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_starts_empty() {
        let wallet = Wallet::new("org-1", "USD", 500);
        assert_eq!(wallet.balance_minor_units, 0);
        assert_eq!(wallet.spendable(), 500);
    }

    #[test]
    fn test_negative_ceiling_is_clamped() {
        let wallet = Wallet::new("org-1", "USD", -10);
        assert_eq!(wallet.debt_ceiling_minor_units, 0);
    }

    #[test]
    fn test_can_absorb() {
        let mut wallet = Wallet::new("org-1", "USD", 500);
        wallet.balance_minor_units = 100;

        assert!(wallet.can_absorb(-600, 0));
        assert!(!wallet.can_absorb(-601, 0));
        assert!(!wallet.can_absorb(-600, 1));
        assert!(wallet.can_absorb(1_000, 10_000));
    }

    #[test]
    fn test_extreme_balances_do_not_wrap() {
        let mut wallet = Wallet::new("org-1", "USD", i64::MAX);
        wallet.balance_minor_units = i64::MAX;

        assert_eq!(wallet.spendable(), i64::MAX);
        assert!(wallet.can_absorb(i64::MIN, 0));
        assert_eq!(BalanceSnapshot::from_wallet(&wallet, 10).effective_balance, i64::MAX - 10);

        wallet.debt_ceiling_minor_units = 0;
        wallet.balance_minor_units = i64::MIN + 1;
        assert!(!wallet.can_absorb(-1, i64::MAX));
    }

    #[test]
    fn test_snapshot_effective_balance() {
        let mut wallet = Wallet::new("org-1", "USD", 500);
        wallet.balance_minor_units = 10_000;

        let snapshot = BalanceSnapshot::from_wallet(&wallet, 280);
        assert_eq!(snapshot.effective_balance, 10_220);
    }
}
