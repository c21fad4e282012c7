//! Credit reservation repository implementation
//!
//! PostgreSQL-backed storage for reservations. Status transitions are guarded
//! in SQL (`WHERE status = 'active'`) so a terminal reservation can never be
//! moved again, even by a racing writer.

use super::db_error;
use callmeter_core::{
    models::{CreditReservation, ReservationStatus},
    traits::ReservationRepository,
    AppError, AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = "id, org_id, session_id, amount_minor_units, status, \
     committed_minor_units, created_at, expires_at, updated_at";

/// PostgreSQL implementation of ReservationRepository
pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    #[instrument(skip(self, reservation), fields(session_id = %reservation.session_id))]
    async fn insert(&self, reservation: &CreditReservation) -> AppResult<CreditReservation> {
        let sql = format!(
            r#"
            INSERT INTO credit_reservations
                (id, org_id, session_id, amount_minor_units, status,
                 committed_minor_units, created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO NOTHING
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(reservation.id)
            .bind(&reservation.org_id)
            .bind(&reservation.session_id)
            .bind(reservation.amount_minor_units)
            .bind(reservation.status.as_str())
            .bind(reservation.committed_minor_units)
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .bind(reservation.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("insert reservation", e))?;

        match row {
            Some(row) => row.try_into(),
            None => {
                warn!("Reservation already exists for session");
                Err(AppError::DuplicateSession(reservation.session_id.clone()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<CreditReservation>> {
        debug!("Finding reservation for session {}", session_id);

        let sql = format!(
            "SELECT {} FROM credit_reservations WHERE session_id = $1",
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find reservation", e))?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn sum_active(&self, org_id: &str, excluding: Option<Uuid>) -> AppResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount_minor_units)::BIGINT
            FROM credit_reservations
            WHERE org_id = $1
              AND status = 'active'
              AND ($2::UUID IS NULL OR id <> $2)
            "#,
        )
        .bind(org_id)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("sum active reservations", e))?;

        Ok(total.unwrap_or(0))
    }

    #[instrument(skip(self))]
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

        let sql = format!(
            r#"
            UPDATE credit_reservations
            SET status = $2,
                committed_minor_units = COALESCE($3, committed_minor_units),
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        );

        let row = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(committed_minor_units)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("transition reservation", e))?;

        row.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self))]
    async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<CreditReservation>> {
        let sql = format!(
            r#"
            SELECT {} FROM credit_reservations
            WHERE status = 'active' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            RESERVATION_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list expired reservations", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn list_active_by_org(&self, org_id: &str) -> AppResult<Vec<CreditReservation>> {
        let sql = format!(
            r#"
            SELECT {} FROM credit_reservations
            WHERE org_id = $1 AND status = 'active'
            ORDER BY created_at ASC
            "#,
            RESERVATION_COLUMNS
        );

        let rows = sqlx::query_as::<sqlx::Postgres, ReservationRow>(&sql)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list active reservations", e))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    org_id: String,
    session_id: String,
    amount_minor_units: i64,
    status: String,
    committed_minor_units: Option<i64>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for CreditReservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ReservationStatus>().map_err(|_| {
            AppError::IntegrityViolation(format!(
                "reservation {} has unknown status '{}'",
                row.id, row.status
            ))
        })?;

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            session_id: row.session_id,
            amount_minor_units: row.amount_minor_units,
            status,
            committed_minor_units: row.committed_minor_units,
            created_at: row.created_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, run_migrations};
    use crate::repositories::PgLedgerStore;
    use callmeter_core::config::DatabaseConfig;
    use callmeter_core::traits::LedgerStore;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_insert_sum_and_transition() {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/callmeter".to_string());
        let pool = create_pool(&url, &DatabaseConfig::default()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let org = format!("org-{}", Uuid::new_v4());
        PgLedgerStore::new(pool.clone())
            .open_wallet(&org, "USD", 0)
            .await
            .unwrap();

        let repo = PgReservationRepository::new(pool);
        let session = format!("call-{}", Uuid::new_v4());
        let reservation = CreditReservation::new(&org, &session, 280, 2700);

        repo.insert(&reservation).await.unwrap();
        let err = repo.insert(&reservation).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateSession(_)));

        assert_eq!(repo.sum_active(&org, None).await.unwrap(), 280);
        assert_eq!(repo.sum_active(&org, Some(reservation.id)).await.unwrap(), 0);

        let committed = repo
            .transition(reservation.id, ReservationStatus::Committed, Some(112))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(committed.committed_minor_units, Some(112));

        let again = repo
            .transition(reservation.id, ReservationStatus::Released, None)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(repo.sum_active(&org, None).await.unwrap(), 0);
    }
}
