//! Balance guard
//!
//! The only component allowed to change a wallet. Every mutation runs inside
//! the organization's lock: load wallet, sum active holds, check the ceiling,
//! then write through the ledger store's atomic append. Reads go straight to
//! the stores without locking.

use crate::locks::{KeyedGuard, KeyedLocks};
use callmeter_core::{
    models::{
        AppendOutcome, BalanceSnapshot, CreditReservation, NewTransaction, ReservationStatus,
        TransactionKind, Wallet,
    },
    traits::{LedgerStore, ReservationRepository},
    AppError, AppResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How a debit treats the debt ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeilingPolicy {
    /// Reject debits that would take effective balance below zero
    Enforce,
    /// Apply regardless; the usage already happened
    Settle,
}

/// Serialized write path for wallets
pub struct BalanceGuard {
    ledger: Arc<dyn LedgerStore>,
    reservations: Arc<dyn ReservationRepository>,
    locks: KeyedLocks,
}

impl BalanceGuard {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        reservations: Arc<dyn ReservationRepository>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            reservations,
            locks: KeyedLocks::new("org", lock_timeout),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    async fn lock(&self, org_id: &str) -> AppResult<KeyedGuard> {
        self.locks.acquire(org_id).await
    }

    async fn load_wallet(&self, org_id: &str) -> AppResult<Wallet> {
        self.ledger
            .get_wallet(org_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(org_id.to_string()))
    }

    /// Lock-free view of balance, ceiling and holds
    #[instrument(skip(self))]
    pub async fn snapshot(&self, org_id: &str) -> AppResult<BalanceSnapshot> {
        let wallet = self.load_wallet(org_id).await?;
        let reserved = self.reservations.sum_active(org_id, None).await?;
        debug!(org_id = %org_id, reserved, "Balance snapshot");
        Ok(BalanceSnapshot::from_wallet(&wallet, reserved))
    }

    /// Guarded append of one ledger row.
    ///
    /// Credits are always accepted. Debits under `Enforce` must leave
    /// `balance + ceiling - reserved >= 0`; under `Settle` they are applied
    /// even past the ceiling.
    #[instrument(skip(self, request), fields(org_id = %request.org_id, kind = %request.kind, amount = request.amount_minor_units))]
    pub async fn apply(
        &self,
        request: NewTransaction,
        policy: CeilingPolicy,
    ) -> AppResult<AppendOutcome> {
        let _org = self.lock(&request.org_id).await?;
        self.apply_locked(request, policy).await
    }

    async fn apply_locked(
        &self,
        request: NewTransaction,
        policy: CeilingPolicy,
    ) -> AppResult<AppendOutcome> {
        // A redelivered event wins over any balance check
        if let Some(external_id) = &request.external_event_id {
            if let Some(existing) = self.ledger.find_transaction(request.kind, external_id).await? {
                debug!(external_event_id = %external_id, "Transaction already recorded");
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let wallet = self.load_wallet(&request.org_id).await?;

        if request.is_debit() {
            let reserved = self
                .reservations
                .sum_active(&request.org_id, request.reservation_id)
                .await?;

            if !wallet.can_absorb(request.amount_minor_units, reserved) {
                let available = wallet.spendable().saturating_sub(reserved);
                let required = request.amount_minor_units.saturating_neg();
                match policy {
                    CeilingPolicy::Enforce => {
                        warn!(required, available, "Debit rejected by debt ceiling");
                        return Err(AppError::InsufficientFunds {
                            required,
                            available,
                        });
                    }
                    CeilingPolicy::Settle => {
                        warn!(required, available, "Settling debit past the debt ceiling");
                    }
                }
            }
        }

        let outcome = self.ledger.append_transaction(request).await?;
        if let AppendOutcome::Applied {
            transaction,
            new_balance,
        } = &outcome
        {
            info!(
                transaction_id = %transaction.id,
                new_balance = *new_balance,
                "Ledger row appended"
            );
        }
        Ok(outcome)
    }

    /// Admit a new hold if effective balance covers it. No ledger row.
    #[instrument(skip(self, reservation), fields(org_id = %reservation.org_id, session_id = %reservation.session_id, amount = reservation.amount_minor_units))]
    pub async fn admit(&self, reservation: &CreditReservation) -> AppResult<CreditReservation> {
        let _org = self.lock(&reservation.org_id).await?;

        let wallet = self.load_wallet(&reservation.org_id).await?;
        let reserved = self.reservations.sum_active(&reservation.org_id, None).await?;
        let effective = wallet.spendable().saturating_sub(reserved);

        if reservation.amount_minor_units > effective {
            warn!(effective, "Reservation rejected");
            return Err(AppError::InsufficientFunds {
                required: reservation.amount_minor_units,
                available: effective,
            });
        }

        let stored = self.reservations.insert(reservation).await?;
        info!(
            reservation_id = %stored.id,
            remaining = effective.saturating_sub(stored.amount_minor_units),
            "Reservation admitted"
        );
        Ok(stored)
    }

    /// Debit `charge` against a reservation and move it to `to`.
    ///
    /// The debit is keyed by session id, so replaying after a failure between
    /// the two writes finds the existing row instead of charging twice.
    #[instrument(skip(self, reservation), fields(org_id = %reservation.org_id, session_id = %reservation.session_id))]
    pub async fn settle(
        &self,
        reservation: &CreditReservation,
        charge: i64,
        to: ReservationStatus,
    ) -> AppResult<(AppendOutcome, Option<CreditReservation>)> {
        let _org = self.lock(&reservation.org_id).await?;

        let request = NewTransaction::new(
            &reservation.org_id,
            -charge.max(0),
            TransactionKind::CallDeduction,
        )
        .with_external_id(&reservation.session_id)
        .with_reservation(reservation.id);

        let outcome = self.apply_locked(request, CeilingPolicy::Settle).await?;
        let updated = self
            .reservations
            .transition(reservation.id, to, Some(charge.max(0)))
            .await?;

        Ok((outcome, updated))
    }

    /// Drop a hold without touching the ledger
    #[instrument(skip(self, reservation), fields(org_id = %reservation.org_id, session_id = %reservation.session_id))]
    pub async fn release(
        &self,
        reservation: &CreditReservation,
        to: ReservationStatus,
    ) -> AppResult<Option<CreditReservation>> {
        let _org = self.lock(&reservation.org_id).await?;
        self.reservations.transition(reservation.id, to, None).await
    }

    /// Bring the wallet's ceiling in line with the tenant profile
    #[instrument(skip(self))]
    pub async fn reconcile_ceiling(&self, org_id: &str, desired: i64) -> AppResult<Wallet> {
        let desired = desired.max(0);
        let wallet = self.load_wallet(org_id).await?;
        if wallet.debt_ceiling_minor_units == desired {
            return Ok(wallet);
        }

        let _org = self.lock(org_id).await?;
        let updated = self.ledger.update_debt_ceiling(org_id, desired).await?;
        info!(
            org_id = %org_id,
            from = wallet.debt_ceiling_minor_units,
            to = desired,
            "Debt ceiling reconciled"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_db::{InMemoryLedgerStore, InMemoryReservationRepository};

    async fn setup(balance: i64, ceiling: i64) -> (BalanceGuard, Arc<InMemoryReservationRepository>) {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let reservations = Arc::new(InMemoryReservationRepository::new());
        ledger.open_wallet("org-1", "USD", ceiling).await.unwrap();
        if balance != 0 {
            ledger
                .append_transaction(NewTransaction::new("org-1", balance, TransactionKind::Topup))
                .await
                .unwrap();
        }
        let guard = BalanceGuard::new(ledger, reservations.clone(), Duration::from_secs(1));
        (guard, reservations)
    }

    #[tokio::test]
    async fn test_enforce_rejects_past_ceiling() {
        let (guard, _) = setup(100, 50).await;

        let ok = guard
            .apply(
                NewTransaction::new("org-1", -150, TransactionKind::Adjustment),
                CeilingPolicy::Enforce,
            )
            .await
            .unwrap();
        assert!(matches!(ok, AppendOutcome::Applied { new_balance: -50, .. }));

        let err = guard
            .apply(
                NewTransaction::new("org-1", -1, TransactionKind::Adjustment),
                CeilingPolicy::Enforce,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientFunds {
                required: 1,
                available: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_settle_applies_past_ceiling() {
        let (guard, _) = setup(100, 0).await;

        let outcome = guard
            .apply(
                NewTransaction::new("org-1", -400, TransactionKind::CallDeduction)
                    .bypassing_reservation(),
                CeilingPolicy::Settle,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Applied { new_balance: -300, .. }));
    }

    #[tokio::test]
    async fn test_admit_counts_existing_holds() {
        let (guard, _) = setup(500, 0).await;

        guard
            .admit(&CreditReservation::new("org-1", "call-1", 300, 60))
            .await
            .unwrap();
        let err = guard
            .admit(&CreditReservation::new("org-1", "call-2", 300, 60))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientFunds {
                required: 300,
                available: 200
            }
        ));

        let snapshot = guard.snapshot("org-1").await.unwrap();
        assert_eq!(snapshot.reserved, 300);
        assert_eq!(snapshot.effective_balance, 200);
    }

    #[tokio::test]
    async fn test_enforced_debit_respects_holds() {
        let (guard, _) = setup(500, 0).await;
        guard
            .admit(&CreditReservation::new("org-1", "call-1", 300, 60))
            .await
            .unwrap();

        let err = guard
            .apply(
                NewTransaction::new("org-1", -201, TransactionKind::Adjustment),
                CeilingPolicy::Enforce,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let (guard, reservations) = setup(1_000, 0).await;
        let reservation = guard
            .admit(&CreditReservation::new("org-1", "call-1", 280, 60))
            .await
            .unwrap();

        let (first, updated) = guard
            .settle(&reservation, 112, ReservationStatus::Committed)
            .await
            .unwrap();
        assert!(!first.is_duplicate());
        assert_eq!(updated.unwrap().committed_minor_units, Some(112));

        let (second, again) = guard
            .settle(&reservation, 112, ReservationStatus::Committed)
            .await
            .unwrap();
        assert!(second.is_duplicate());
        assert!(again.is_none());
        assert_eq!(reservations.sum_active("org-1", None).await.unwrap(), 0);

        let snapshot = guard.snapshot("org-1").await.unwrap();
        assert_eq!(snapshot.balance, 888);
    }

    #[tokio::test]
    async fn test_duplicate_grant_skips_checks() {
        let (guard, _) = setup(0, 0).await;
        let grant = NewTransaction::new("org-1", 5_000, TransactionKind::Topup).with_external_id("pay-1");

        guard.apply(grant.clone(), CeilingPolicy::Enforce).await.unwrap();
        let again = guard.apply(grant, CeilingPolicy::Enforce).await.unwrap();
        assert!(again.is_duplicate());
        assert_eq!(guard.snapshot("org-1").await.unwrap().balance, 5_000);
    }

    #[tokio::test]
    async fn test_reconcile_ceiling() {
        let (guard, _) = setup(0, 0).await;

        let wallet = guard.reconcile_ceiling("org-1", 750).await.unwrap();
        assert_eq!(wallet.debt_ceiling_minor_units, 750);

        let unchanged = guard.reconcile_ceiling("org-1", 750).await.unwrap();
        assert_eq!(unchanged.debt_ceiling_minor_units, 750);
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let (guard, _) = setup(0, 0).await;
        let err = guard.snapshot("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::WalletNotFound(_)));
    }
}
