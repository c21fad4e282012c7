//! Credit transaction model
//!
//! Immutable audit log of every balance change. Rows are appended once and
//! never updated or deleted; replaying them in creation order reconstructs the
//! wallet balance.

use crate::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Largest magnitude a single ledger amount may carry
pub const MAX_AMOUNT_MINOR_UNITS: i64 = 1_000_000_000_000_000;

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credit purchased through the payment processor
    Topup,
    /// Final cost of a metered session
    CallDeduction,
    /// Promotional credit
    Bonus,
    /// Money returned to the organization
    Refund,
    /// Manual or reconciling correction (signed)
    Adjustment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Topup => "topup",
            TransactionKind::CallDeduction => "call_deduction",
            TransactionKind::Bonus => "bonus",
            TransactionKind::Refund => "refund",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    /// Kinds that only ever add money to a wallet
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionKind::Topup | TransactionKind::Bonus | TransactionKind::Refund
        )
    }
}

impl FromStr for TransactionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "topup" => Ok(TransactionKind::Topup),
            "call_deduction" => Ok(TransactionKind::CallDeduction),
            "bonus" => Ok(TransactionKind::Bonus),
            "refund" => Ok(TransactionKind::Refund),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(AppError::InvalidInput(format!(
                "unknown transaction kind '{}'",
                other
            ))),
        }
    }
}

/// Request to append one ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub org_id: String,
    pub amount_minor_units: i64,
    pub kind: TransactionKind,
    /// Idempotency key, unique together with `kind`
    pub external_event_id: Option<String>,
    pub reservation_id: Option<Uuid>,
    pub reservation_bypassed: bool,
}

impl NewTransaction {
    pub fn new(org_id: impl Into<String>, amount: i64, kind: TransactionKind) -> Self {
        Self {
            org_id: org_id.into(),
            amount_minor_units: amount,
            kind,
            external_event_id: None,
            reservation_id: None,
            reservation_bypassed: false,
        }
    }

    pub fn with_external_id(mut self, external_event_id: impl Into<String>) -> Self {
        self.external_event_id = Some(external_event_id.into());
        self
    }

    pub fn with_reservation(mut self, reservation_id: Uuid) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    pub fn bypassing_reservation(mut self) -> Self {
        self.reservation_bypassed = true;
        self
    }

    pub fn is_debit(&self) -> bool {
        self.amount_minor_units < 0
    }

    /// Balance after applying this request on top of `previous_balance`
    pub fn balance_after(&self, previous_balance: i64) -> AppResult<i64> {
        previous_balance
            .checked_add(self.amount_minor_units)
            .ok_or_else(|| AppError::BalanceOverflow {
                org_id: self.org_id.clone(),
            })
    }
}

/// Credit transaction entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique identifier
    pub id: Uuid,

    /// Store-assigned insertion sequence, strictly increasing
    pub seq: i64,

    /// Owning organization
    pub org_id: String,

    /// Signed amount: positive = credit, negative = debit
    pub amount_minor_units: i64,

    /// Type of transaction
    pub kind: TransactionKind,

    /// Session id or provider event id this row was derived from
    pub external_event_id: Option<String>,

    /// Balance after this row was applied
    pub balance_after_minor_units: i64,

    /// Reservation committed by this row (if applicable)
    pub reservation_id: Option<Uuid>,

    /// Debit applied without an active reservation
    pub reservation_bypassed: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Build the row for `request` on top of `previous_balance`
    pub fn from_request(
        request: &NewTransaction,
        seq: i64,
        previous_balance: i64,
        created_at: DateTime<Utc>,
    ) -> AppResult<Self> {
        let balance_after_minor_units = request.balance_after(previous_balance)?;

        Ok(Self {
            id: Uuid::new_v4(),
            seq,
            org_id: request.org_id.clone(),
            amount_minor_units: request.amount_minor_units,
            kind: request.kind,
            external_event_id: request.external_event_id.clone(),
            balance_after_minor_units,
            reservation_id: request.reservation_id,
            reservation_bypassed: request.reservation_bypassed,
            created_at,
        })
    }

    #[inline]
    pub fn balance_before(&self) -> i64 {
        self.balance_after_minor_units
            .saturating_sub(self.amount_minor_units)
    }

    pub fn is_debit(&self) -> bool {
        self.amount_minor_units < 0
    }
}

/// Result of an append attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was written and the wallet updated
    Applied {
        transaction: CreditTransaction,
        new_balance: i64,
    },
    /// The (kind, external_event_id) pair already existed; nothing was written
    Duplicate(CreditTransaction),
}

impl AppendOutcome {
    pub fn transaction(&self) -> &CreditTransaction {
        match self {
            AppendOutcome::Applied { transaction, .. } => transaction,
            AppendOutcome::Duplicate(existing) => existing,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

/// Keyset cursor for newest-first transaction pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCursor {
    /// Only rows with a smaller `seq` are returned
    pub before_seq: i64,
}

/// One page of transactions, newest first
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<CreditTransaction>,
    pub next_cursor: Option<TransactionCursor>,
}

impl TransactionPage {
    /// Build a page from up to `limit + 1` fetched rows
    pub fn from_rows(mut rows: Vec<CreditTransaction>, limit: usize) -> Self {
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|tx| TransactionCursor { before_seq: tx.seq })
        } else {
            None
        };

        Self {
            items: rows,
            next_cursor,
        }
    }
}

/// Replay transactions (oldest first) from a zero opening balance.
///
/// Returns the reconstructed balance or the first row that breaks the
/// running sum.
pub fn replay<'a, I>(transactions: I) -> AppResult<i64>
where
    I: IntoIterator<Item = &'a CreditTransaction>,
{
    let mut running = 0i64;
    let mut last_seq = i64::MIN;

    for tx in transactions {
        if tx.seq <= last_seq {
            return Err(AppError::IntegrityViolation(format!(
                "transaction {} out of order (seq {} after {})",
                tx.id, tx.seq, last_seq
            )));
        }

        running = running.checked_add(tx.amount_minor_units).ok_or_else(|| {
            AppError::IntegrityViolation(format!(
                "transaction {} overflows the running sum",
                tx.id
            ))
        })?;
        if tx.balance_after_minor_units != running {
            return Err(AppError::IntegrityViolation(format!(
                "transaction {} records balance_after {} but running sum is {}",
                tx.id, tx.balance_after_minor_units, running
            )));
        }
        last_seq = tx.seq;
    }

    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seq: i64, previous: i64, amount: i64, kind: TransactionKind) -> CreditTransaction {
        let req = NewTransaction::new("org-1", amount, kind);
        CreditTransaction::from_request(&req, seq, previous, Utc::now()).unwrap()
    }

    #[test]
    fn test_kind_round_trip_names() {
        assert_eq!(TransactionKind::CallDeduction.to_string(), "call_deduction");
        assert_eq!(
            "TOPUP".parse::<TransactionKind>().unwrap(),
            TransactionKind::Topup
        );
        assert!("chargeback".parse::<TransactionKind>().is_err());
        assert!(TransactionKind::Bonus.is_credit());
        assert!(!TransactionKind::Adjustment.is_credit());
    }

    #[test]
    fn test_from_request_computes_balance_after() {
        let tx = row(1, 10_000, -112, TransactionKind::CallDeduction);
        assert_eq!(tx.balance_after_minor_units, 9_888);
        assert_eq!(tx.balance_before(), 10_000);
        assert!(tx.is_debit());
    }

    #[test]
    fn test_balance_overflow_is_rejected() {
        let req = NewTransaction::new("org-1", 1, TransactionKind::Bonus);
        let err = CreditTransaction::from_request(&req, 2, i64::MAX, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::BalanceOverflow { .. }));

        let debit = NewTransaction::new("org-1", -1, TransactionKind::Adjustment);
        assert!(debit.balance_after(i64::MIN).is_err());
        assert_eq!(debit.balance_after(0).unwrap(), -1);
    }

    #[test]
    fn test_replay_accepts_running_sum() {
        let rows = vec![
            row(1, 0, 10_000, TransactionKind::Topup),
            row(2, 10_000, -112, TransactionKind::CallDeduction),
            row(3, 9_888, 50, TransactionKind::Bonus),
        ];
        assert_eq!(replay(&rows).unwrap(), 9_938);
    }

    #[test]
    fn test_replay_detects_broken_chain() {
        let mut rows = vec![
            row(1, 0, 10_000, TransactionKind::Topup),
            row(2, 10_000, -112, TransactionKind::CallDeduction),
        ];
        rows[1].balance_after_minor_units = 9_000;

        let err = replay(&rows).unwrap_err();
        assert!(matches!(err, AppError::IntegrityViolation(_)));
    }

    #[test]
    fn test_page_cursor() {
        let rows: Vec<_> = (1..=4)
            .rev()
            .map(|seq| row(seq, 0, 1, TransactionKind::Bonus))
            .collect();

        let page = TransactionPage::from_rows(rows, 3);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.next_cursor, Some(TransactionCursor { before_seq: 2 }));

        let last = TransactionPage::from_rows(vec![row(1, 0, 1, TransactionKind::Bonus)], 3);
        assert!(last.next_cursor.is_none());
    }
}
