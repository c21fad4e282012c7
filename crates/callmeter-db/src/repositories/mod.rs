//! Repository implementations
//!
//! Concrete PostgreSQL implementations of the storage traits defined in
//! callmeter-core, using sqlx.

pub mod ledger_repo;
pub mod reservation_repo;

pub use ledger_repo::PgLedgerStore;
pub use reservation_repo::PgReservationRepository;

use callmeter_core::AppError;
use tracing::error;

/// Map a sqlx failure onto the ledger's error taxonomy.
///
/// Pool exhaustion and every other driver failure are retryable.
pub(crate) fn db_error(context: &str, err: sqlx::Error) -> AppError {
    error!("Database error ({}): {}", context, err);
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            AppError::Pool(format!("{}: {}", context, err))
        }
        other => AppError::Persistence(format!("{}: {}", context, other)),
    }
}
