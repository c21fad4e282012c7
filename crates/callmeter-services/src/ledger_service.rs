//! Wallet onboarding and read-side queries

use crate::balance_guard::BalanceGuard;
use callmeter_core::{
    models::{replay, BalanceSnapshot, TransactionCursor, TransactionPage, Wallet},
    traits::{page_limit, TenantConfigProvider},
    AppError, AppResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Result of replaying an organization's log against its wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerVerification {
    pub org_id: String,
    pub transaction_count: usize,
    pub replayed_balance: i64,
    pub wallet_balance: i64,
    pub consistent: bool,
}

pub struct LedgerService {
    guard: Arc<BalanceGuard>,
    tenants: Arc<dyn TenantConfigProvider>,
    default_currency: String,
}

impl LedgerService {
    pub fn new(
        guard: Arc<BalanceGuard>,
        tenants: Arc<dyn TenantConfigProvider>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            guard,
            tenants,
            default_currency: default_currency.into(),
        }
    }

    /// Create the organization's wallet at zero balance (idempotent)
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, org_id: &str, currency: Option<&str>) -> AppResult<Wallet> {
        if org_id.trim().is_empty() {
            return Err(AppError::InvalidInput("org_id is required".to_string()));
        }

        let profile = self.tenants.profile(org_id).await?;
        let currency = currency.unwrap_or(&self.default_currency);
        let wallet = self
            .guard
            .ledger()
            .open_wallet(org_id, currency, profile.debt_ceiling)
            .await?;

        info!(org_id = %org_id, currency = %wallet.currency, "Wallet ready");
        Ok(wallet)
    }

    pub async fn balance(&self, org_id: &str) -> AppResult<BalanceSnapshot> {
        self.guard.snapshot(org_id).await
    }

    /// Newest-first page of transactions
    pub async fn transactions(
        &self,
        org_id: &str,
        cursor: Option<TransactionCursor>,
        limit: Option<usize>,
    ) -> AppResult<TransactionPage> {
        let ledger = self.guard.ledger();
        if ledger.get_wallet(org_id).await?.is_none() {
            return Err(AppError::WalletNotFound(org_id.to_string()));
        }

        ledger
            .list_transactions(org_id, cursor, page_limit(limit))
            .await
    }

    /// Replay the full log and compare with the stored balance
    #[instrument(skip(self))]
    pub async fn verify(&self, org_id: &str) -> AppResult<LedgerVerification> {
        let ledger = self.guard.ledger();
        let wallet = ledger
            .get_wallet(org_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(org_id.to_string()))?;
        let history = ledger.transaction_history(org_id).await?;

        let replayed_balance = replay(&history)?;
        let consistent = replayed_balance == wallet.balance_minor_units;
        if !consistent {
            error!(
                org_id = %org_id,
                replayed_balance,
                wallet_balance = wallet.balance_minor_units,
                "Ledger replay does not match wallet"
            );
        }

        Ok(LedgerVerification {
            org_id: org_id.to_string(),
            transaction_count: history.len(),
            replayed_balance,
            wallet_balance: wallet.balance_minor_units,
            consistent,
        })
    }
}
