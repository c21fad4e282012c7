//! Callmeter Database Layer
//!
//! Storage implementations for the credit ledger:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - PostgreSQL ledger store (wallet + transaction log in one transaction)
//! - PostgreSQL reservation repository
//! - In-memory stores with the same atomicity, used by tests and by
//!   deployments without a database URL

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{InMemoryLedgerStore, InMemoryReservationRepository};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use callmeter_core::{AppError, AppResult};
pub use sqlx::PgPool;
