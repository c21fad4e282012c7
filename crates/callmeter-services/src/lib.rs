//! Ledger services for callmeter
//!
//! Everything that moves money lives here. The crate is layered bottom-up:
//!
//! - `CostCalculator` - duration to minor units under a billing profile
//! - `BalanceGuard` - the single serialized write path per organization
//! - `ReservationManager` - credit holds across the session lifecycle
//! - `KillSwitchMonitor` - heartbeat evaluation and terminate commands
//! - `UsageEventProcessor` - idempotent handling of lifecycle events and grants
//! - `LedgerService` - onboarding, balance and history queries, replay checks
//!
//! Lock order is always session before organization.

pub mod balance_guard;
pub mod cost;
pub mod engine;
pub mod expiry_sweeper;
pub mod heartbeat;
pub mod kill_switch;
pub mod ledger_service;
pub mod locks;
pub mod reservation_manager;
pub mod retry;
pub mod tenant_config;
pub mod usage_processor;
pub mod workers;

pub use balance_guard::{BalanceGuard, CeilingPolicy};
pub use cost::CostCalculator;
pub use engine::LedgerEngine;
pub use expiry_sweeper::spawn_expiry_sweeper;
pub use heartbeat::HeartbeatTracker;
pub use kill_switch::{ChannelKillSink, KillSwitchMonitor, LoggingKillSink, TERMINATE_REASON};
pub use ledger_service::{LedgerService, LedgerVerification};
pub use locks::{KeyedGuard, KeyedLocks};
pub use reservation_manager::{ReservationManager, SweepReport};
pub use retry::RetryPolicy;
pub use tenant_config::StaticTenantConfig;
pub use usage_processor::UsageEventProcessor;
pub use workers::run_workers;

/// Ledger constants
pub mod constants {
    /// Maximum expired holds reclaimed per sweep
    pub const SWEEP_BATCH_SIZE: usize = 500;

    /// Capacity of the in-process kill-signal channel
    pub const KILL_SIGNAL_BUFFER: usize = 256;
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::engine::LedgerEngine;
    use crate::kill_switch::LoggingKillSink;
    use crate::tenant_config::StaticTenantConfig;
    use callmeter_core::config::BillingConfig;
    use callmeter_core::models::{NewTransaction, TransactionKind};
    use callmeter_core::traits::LedgerStore;
    use callmeter_db::{InMemoryLedgerStore, InMemoryReservationRepository};
    use std::sync::Arc;

    pub struct MemoryEngine {
        pub engine: LedgerEngine,
        pub ledger: Arc<InMemoryLedgerStore>,
        pub reservations: Arc<InMemoryReservationRepository>,
    }

    /// Engine over the in-memory stores with `org-1` funded to `balance`
    pub async fn funded_engine(balance: i64) -> MemoryEngine {
        let billing = BillingConfig {
            lock_timeout_ms: 500,
            ..Default::default()
        };
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let reservations = Arc::new(InMemoryReservationRepository::new());
        let engine = LedgerEngine::new(
            ledger.clone(),
            reservations.clone(),
            Arc::new(StaticTenantConfig::new(billing.clone())),
            Arc::new(LoggingKillSink),
            &billing,
        );

        ledger.open_wallet("org-1", "USD", 0).await.unwrap();
        if balance != 0 {
            ledger
                .append_transaction(
                    NewTransaction::new("org-1", balance, TransactionKind::Topup)
                        .with_external_id("seed"),
                )
                .await
                .unwrap();
        }

        MemoryEngine {
            engine,
            ledger,
            reservations,
        }
    }
}
