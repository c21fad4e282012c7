//! Common traits for storage and delivery seams
//!
//! Services depend only on these traits so the ledger can run on PostgreSQL,
//! on the in-memory stores, or on test doubles.

use crate::error::AppError;
use crate::models::{
    AppendOutcome, BillingProfile, CreditReservation, CreditTransaction, KillSignal,
    NewTransaction, ReservationStatus, TransactionCursor, TransactionKind, TransactionPage, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Largest page the transaction listing will return
pub const MAX_PAGE_SIZE: usize = 500;

/// Default page size when the caller does not ask for one
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`
pub fn page_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Wallets plus the append-only transaction log.
///
/// `append_transaction` is the only primitive that changes a balance: the
/// wallet update and the row insert happen in one atomic unit, and a failure
/// leaves neither behind.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the wallet if missing; returns the existing one otherwise
    async fn open_wallet(
        &self,
        org_id: &str,
        currency: &str,
        debt_ceiling: i64,
    ) -> Result<Wallet, AppError>;

    async fn get_wallet(&self, org_id: &str) -> Result<Option<Wallet>, AppError>;

    async fn update_debt_ceiling(&self, org_id: &str, debt_ceiling: i64)
        -> Result<Wallet, AppError>;

    /// Apply one signed amount and record it.
    ///
    /// When a row with the same (kind, external_event_id) exists, nothing is
    /// written and the existing row is returned as a duplicate.
    async fn append_transaction(&self, tx: NewTransaction) -> Result<AppendOutcome, AppError>;

    async fn find_transaction(
        &self,
        kind: TransactionKind,
        external_event_id: &str,
    ) -> Result<Option<CreditTransaction>, AppError>;

    /// Newest first, keyset paginated
    async fn list_transactions(
        &self,
        org_id: &str,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> Result<TransactionPage, AppError>;

    /// Full history oldest first, for replay verification
    async fn transaction_history(&self, org_id: &str) -> Result<Vec<CreditTransaction>, AppError>;
}

/// Reservation persistence
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Insert a new active reservation; `DuplicateSession` if the session
    /// already has one in any status
    async fn insert(&self, reservation: &CreditReservation) -> Result<CreditReservation, AppError>;

    async fn find_by_session(&self, session_id: &str)
        -> Result<Option<CreditReservation>, AppError>;

    /// Sum of active holds for an organization, optionally skipping one
    async fn sum_active(&self, org_id: &str, excluding: Option<Uuid>) -> Result<i64, AppError>;

    /// Move an active reservation to a terminal status.
    ///
    /// Returns `None` when the reservation is no longer active.
    async fn transition(
        &self,
        id: Uuid,
        to: ReservationStatus,
        committed_minor_units: Option<i64>,
    ) -> Result<Option<CreditReservation>, AppError>;

    async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CreditReservation>, AppError>;

    async fn list_active_by_org(&self, org_id: &str) -> Result<Vec<CreditReservation>, AppError>;
}

/// Source of per-organization billing settings, read on every event
#[async_trait]
pub trait TenantConfigProvider: Send + Sync {
    async fn profile(&self, org_id: &str) -> Result<BillingProfile, AppError>;
}

/// Outbound channel for terminate commands (fire-and-forget)
#[async_trait]
pub trait KillSignalSink: Send + Sync {
    async fn send(&self, signal: KillSignal) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_limit() {
        assert_eq!(page_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_limit(Some(0)), 1);
        assert_eq!(page_limit(Some(10)), 10);
        assert_eq!(page_limit(Some(10_000)), MAX_PAGE_SIZE);
    }
}
