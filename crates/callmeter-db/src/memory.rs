//! In-memory stores
//!
//! Same contracts as the PostgreSQL stores. All state for a store lives behind
//! one `parking_lot::Mutex`, so an append either fully applies (wallet and log
//! row together) or leaves nothing behind. Used by the test suites and by
//! deployments started without a database URL.

use callmeter_core::{
    models::{
        AppendOutcome, CreditReservation, CreditTransaction, NewTransaction, ReservationStatus,
        TransactionCursor, TransactionKind, TransactionPage, Wallet,
    },
    traits::{LedgerStore, ReservationRepository},
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<String, Wallet>,
    /// Insertion order; index + 1 is the row's seq
    transactions: Vec<CreditTransaction>,
    by_external_id: HashMap<(TransactionKind, String), usize>,
    failing_appends: u32,
}

/// Wallets and transaction log held in process memory
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with a persistence error before
    /// touching any state
    pub fn fail_next_appends(&self, count: u32) {
        self.state.lock().failing_appends = count;
    }

    /// Overwrite a wallet balance without writing a log row.
    ///
    /// Only for exercising integrity verification.
    #[doc(hidden)]
    pub fn force_balance(&self, org_id: &str, balance: i64) {
        if let Some(wallet) = self.state.lock().wallets.get_mut(org_id) {
            wallet.balance_minor_units = balance;
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_wallet(&self, org_id: &str, currency: &str, debt_ceiling: i64) -> AppResult<Wallet> {
        let mut state = self.state.lock();
        let wallet = state
            .wallets
            .entry(org_id.to_string())
            .or_insert_with(|| {
                info!(org_id = %org_id, debt_ceiling, "Wallet opened");
                Wallet::new(org_id, currency, debt_ceiling)
            });
        Ok(wallet.clone())
    }

    async fn get_wallet(&self, org_id: &str) -> AppResult<Option<Wallet>> {
        Ok(self.state.lock().wallets.get(org_id).cloned())
    }

    async fn update_debt_ceiling(&self, org_id: &str, debt_ceiling: i64) -> AppResult<Wallet> {
        let mut state = self.state.lock();
        let wallet = state
            .wallets
            .get_mut(org_id)
            .ok_or_else(|| AppError::WalletNotFound(org_id.to_string()))?;

        wallet.debt_ceiling_minor_units = debt_ceiling.max(0);
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn append_transaction(&self, request: NewTransaction) -> AppResult<AppendOutcome> {
        let mut state = self.state.lock();

        if state.failing_appends > 0 {
            state.failing_appends -= 1;
            return Err(AppError::Persistence(
                "injected append failure".to_string(),
            ));
        }

        if let Some(external_id) = &request.external_event_id {
            let key = (request.kind, external_id.clone());
            if let Some(&index) = state.by_external_id.get(&key) {
                debug!(external_event_id = %external_id, "Duplicate append ignored");
                return Ok(AppendOutcome::Duplicate(state.transactions[index].clone()));
            }
        }

        let previous_balance = state
            .wallets
            .get(&request.org_id)
            .map(|w| w.balance_minor_units)
            .ok_or_else(|| AppError::WalletNotFound(request.org_id.clone()))?;

        let now = Utc::now();
        let created_at = state
            .transactions
            .iter()
            .rev()
            .find(|tx| tx.org_id == request.org_id)
            .map_or(now, |last| last.created_at.max(now));

        let seq = state.transactions.len() as i64 + 1;
        let transaction =
            CreditTransaction::from_request(&request, seq, previous_balance, created_at)?;
        let new_balance = transaction.balance_after_minor_units;

        if let Some(wallet) = state.wallets.get_mut(&request.org_id) {
            wallet.balance_minor_units = new_balance;
            wallet.updated_at = now;
        }
        if let Some(external_id) = &request.external_event_id {
            let index = state.transactions.len();
            state
                .by_external_id
                .insert((request.kind, external_id.clone()), index);
        }
        state.transactions.push(transaction.clone());

        Ok(AppendOutcome::Applied {
            transaction,
            new_balance,
        })
    }

    async fn find_transaction(
        &self,
        kind: TransactionKind,
        external_event_id: &str,
    ) -> AppResult<Option<CreditTransaction>> {
        let state = self.state.lock();
        Ok(state
            .by_external_id
            .get(&(kind, external_event_id.to_string()))
            .map(|&index| state.transactions[index].clone()))
    }

    async fn list_transactions(
        &self,
        org_id: &str,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> AppResult<TransactionPage> {
        let before = cursor.map_or(i64::MAX, |c| c.before_seq);
        let rows = self
            .state
            .lock()
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.org_id == org_id && tx.seq < before)
            .take(limit + 1)
            .cloned()
            .collect();

        Ok(TransactionPage::from_rows(rows, limit))
    }

    async fn transaction_history(&self, org_id: &str) -> AppResult<Vec<CreditTransaction>> {
        Ok(self
            .state
            .lock()
            .transactions
            .iter()
            .filter(|tx| tx.org_id == org_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct ReservationState {
    by_id: HashMap<Uuid, CreditReservation>,
    by_session: HashMap<String, Uuid>,
}

/// Reservations held in process memory
#[derive(Default)]
pub struct InMemoryReservationRepository {
    state: Mutex<ReservationState>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a reservation's expiry, for driving the sweep in tests
    #[doc(hidden)]
    pub fn set_expires_at(&self, session_id: &str, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(id) = state.by_session.get(session_id).copied() {
            if let Some(reservation) = state.by_id.get_mut(&id) {
                reservation.expires_at = expires_at;
            }
        }
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn insert(&self, reservation: &CreditReservation) -> AppResult<CreditReservation> {
        let mut state = self.state.lock();
        if state.by_session.contains_key(&reservation.session_id) {
            return Err(AppError::DuplicateSession(reservation.session_id.clone()));
        }

        state
            .by_session
            .insert(reservation.session_id.clone(), reservation.id);
        state.by_id.insert(reservation.id, reservation.clone());
        Ok(reservation.clone())
    }

    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<CreditReservation>> {
        let state = self.state.lock();
        Ok(state
            .by_session
            .get(session_id)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn sum_active(&self, org_id: &str, excluding: Option<Uuid>) -> AppResult<i64> {
        Ok(self
            .state
            .lock()
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && r.is_active() && Some(r.id) != excluding)
            .map(|r| r.amount_minor_units)
            .sum())
    }

    async fn transition(
        &self,
        id: Uuid,
        to: ReservationStatus,
        committed_minor_units: Option<i64>,
    ) -> AppResult<Option<CreditReservation>> {
        if to.is_holding() {
            return Err(AppError::InvalidInput(
                "reservations cannot transition back to active".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let Some(reservation) = state.by_id.get_mut(&id) else {
            return Ok(None);
        };
        if !reservation.is_active() {
            return Ok(None);
        }

        reservation.status = to;
        if committed_minor_units.is_some() {
            reservation.committed_minor_units = committed_minor_units;
        }
        reservation.updated_at = Utc::now();
        Ok(Some(reservation.clone()))
    }

    async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<CreditReservation>> {
        let mut expired: Vec<_> = self
            .state
            .lock()
            .by_id
            .values()
            .filter(|r| r.is_active() && r.is_expired_at(now))
            .cloned()
            .collect();

        expired.sort_by_key(|r| r.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn list_active_by_org(&self, org_id: &str) -> AppResult<Vec<CreditReservation>> {
        let mut active: Vec<_> = self
            .state
            .lock()
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && r.is_active())
            .cloned()
            .collect();

        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }
}
