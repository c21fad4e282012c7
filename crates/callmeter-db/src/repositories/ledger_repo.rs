//! Ledger store implementation
//!
//! Wallets and the append-only transaction log in PostgreSQL. Every append
//! runs in one database transaction: the wallet row is locked with
//! `SELECT ... FOR UPDATE`, the log row is inserted, and the balance is
//! updated before commit.

use super::db_error;
use callmeter_core::{
    models::{
        AppendOutcome, CreditTransaction, NewTransaction, TransactionCursor, TransactionKind,
        TransactionPage, Wallet,
    },
    traits::LedgerStore,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, seq, org_id, amount_minor_units, kind, external_event_id, \
     balance_after_minor_units, reservation_id, reservation_bypassed, created_at";

/// PostgreSQL implementation of LedgerStore
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new ledger store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn open_wallet(&self, org_id: &str, currency: &str, debt_ceiling: i64) -> AppResult<Wallet> {
        let inserted = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            INSERT INTO wallets (org_id, balance_minor_units, debt_ceiling_minor_units, currency)
            VALUES ($1, 0, $2, $3)
            ON CONFLICT (org_id) DO NOTHING
            RETURNING org_id, balance_minor_units, debt_ceiling_minor_units, currency,
                      created_at, updated_at
            "#,
        )
        .bind(org_id)
        .bind(debt_ceiling.max(0))
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("open wallet", e))?;

        if let Some(row) = inserted {
            info!(org_id = %org_id, debt_ceiling, "Wallet opened");
            return Ok(row.into());
        }

        self.get_wallet(org_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(org_id.to_string()))
    }

    #[instrument(skip(self))]
    async fn get_wallet(&self, org_id: &str) -> AppResult<Option<Wallet>> {
        debug!("Loading wallet {}", org_id);

        let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            SELECT org_id, balance_minor_units, debt_ceiling_minor_units, currency,
                   created_at, updated_at
            FROM wallets
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get wallet", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn update_debt_ceiling(&self, org_id: &str, debt_ceiling: i64) -> AppResult<Wallet> {
        let row = sqlx::query_as::<sqlx::Postgres, WalletRow>(
            r#"
            UPDATE wallets
            SET debt_ceiling_minor_units = $2, updated_at = NOW()
            WHERE org_id = $1
            RETURNING org_id, balance_minor_units, debt_ceiling_minor_units, currency,
                      created_at, updated_at
            "#,
        )
        .bind(org_id)
        .bind(debt_ceiling.max(0))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update debt ceiling", e))?
        .ok_or_else(|| AppError::WalletNotFound(org_id.to_string()))?;

        Ok(row.into())
    }

    #[instrument(skip(self, request), fields(org_id = %request.org_id, kind = %request.kind))]
    async fn append_transaction(&self, request: NewTransaction) -> AppResult<AppendOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin append", e))?;

        let balance: Option<i64> = sqlx::query_scalar(
            "SELECT balance_minor_units FROM wallets WHERE org_id = $1 FOR UPDATE",
        )
        .bind(&request.org_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock wallet", e))?;

        let previous_balance =
            balance.ok_or_else(|| AppError::WalletNotFound(request.org_id.clone()))?;

        // created_at never goes backwards within one organization's log
        let last_created: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT created_at FROM credit_transactions
            WHERE org_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(&request.org_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("read last transaction", e))?;

        let now = Utc::now();
        let created_at = last_created.map_or(now, |last| last.max(now));
        // Dropping the transaction on overflow rolls back the row lock
        let new_balance = request.balance_after(previous_balance)?;

        let insert_sql = format!(
            r#"
            INSERT INTO credit_transactions
                (id, org_id, amount_minor_units, kind, external_event_id,
                 balance_after_minor_units, reservation_id, reservation_bypassed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (kind, external_event_id) WHERE external_event_id IS NOT NULL
            DO NOTHING
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let inserted = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&insert_sql)
            .bind(Uuid::new_v4())
            .bind(&request.org_id)
            .bind(request.amount_minor_units)
            .bind(request.kind.as_str())
            .bind(&request.external_event_id)
            .bind(new_balance)
            .bind(request.reservation_id)
            .bind(request.reservation_bypassed)
            .bind(created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("insert transaction", e))?;

        let Some(row) = inserted else {
            tx.rollback()
                .await
                .map_err(|e| db_error("rollback duplicate", e))?;

            let external_id = request.external_event_id.as_deref().unwrap_or_default();
            let existing = self
                .find_transaction(request.kind, external_id)
                .await?
                .ok_or_else(|| {
                    AppError::IntegrityViolation(format!(
                        "conflict on {}/{} but no existing row",
                        request.kind, external_id
                    ))
                })?;

            debug!(external_event_id = %external_id, "Duplicate append ignored");
            return Ok(AppendOutcome::Duplicate(existing));
        };

        sqlx::query(
            "UPDATE wallets SET balance_minor_units = $2, updated_at = $3 WHERE org_id = $1",
        )
        .bind(&request.org_id)
        .bind(new_balance)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update wallet balance", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit append", e))?;

        Ok(AppendOutcome::Applied {
            transaction: row.try_into()?,
            new_balance,
        })
    }

    #[instrument(skip(self))]
    async fn find_transaction(
        &self,
        kind: TransactionKind,
        external_event_id: &str,
    ) -> AppResult<Option<CreditTransaction>> {
        let sql = format!(
            "SELECT {} FROM credit_transactions WHERE kind = $1 AND external_event_id = $2",
            TRANSACTION_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&sql)
            .bind(kind.as_str())
            .bind(external_event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find transaction", e))?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        org_id: &str,
        cursor: Option<TransactionCursor>,
        limit: usize,
    ) -> AppResult<TransactionPage> {
        let sql = format!(
            r#"
            SELECT {} FROM credit_transactions
            WHERE org_id = $1 AND seq < $2
            ORDER BY seq DESC
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        );

        let before = cursor.map_or(i64::MAX, |c| c.before_seq);
        let rows = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&sql)
            .bind(org_id)
            .bind(before)
            .bind(limit as i64 + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list transactions", e))?;

        let items = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<AppResult<Vec<CreditTransaction>>>()?;

        Ok(TransactionPage::from_rows(items, limit))
    }

    #[instrument(skip(self))]
    async fn transaction_history(&self, org_id: &str) -> AppResult<Vec<CreditTransaction>> {
        let sql = format!(
            "SELECT {} FROM credit_transactions WHERE org_id = $1 ORDER BY seq ASC",
            TRANSACTION_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&sql)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("load transaction history", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Helper struct for mapping wallet rows
#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    org_id: String,
    balance_minor_units: i64,
    debt_ceiling_minor_units: i64,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            org_id: row.org_id,
            balance_minor_units: row.balance_minor_units,
            debt_ceiling_minor_units: row.debt_ceiling_minor_units,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Helper struct for mapping transaction rows
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    seq: i64,
    org_id: String,
    amount_minor_units: i64,
    kind: String,
    external_event_id: Option<String>,
    balance_after_minor_units: i64,
    reservation_id: Option<Uuid>,
    reservation_bypassed: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse::<TransactionKind>().map_err(|_| {
            AppError::IntegrityViolation(format!(
                "transaction {} has unknown kind '{}'",
                row.id, row.kind
            ))
        })?;

        Ok(Self {
            id: row.id,
            seq: row.seq,
            org_id: row.org_id,
            amount_minor_units: row.amount_minor_units,
            kind,
            external_event_id: row.external_event_id,
            balance_after_minor_units: row.balance_after_minor_units,
            reservation_id: row.reservation_id,
            reservation_bypassed: row.reservation_bypassed,
            created_at: row.created_at,
        })
    }
}
