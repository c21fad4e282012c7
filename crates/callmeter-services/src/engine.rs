//! Service wiring
//!
//! Builds the full service graph over a chosen ledger store, reservation
//! repository, tenant source and kill-signal sink. The binary and the HTTP
//! tests share this so both run the same graph.

use crate::balance_guard::BalanceGuard;
use crate::heartbeat::HeartbeatTracker;
use crate::kill_switch::KillSwitchMonitor;
use crate::ledger_service::LedgerService;
use crate::reservation_manager::ReservationManager;
use crate::retry::RetryPolicy;
use crate::usage_processor::UsageEventProcessor;
use callmeter_core::{
    config::BillingConfig,
    traits::{KillSignalSink, LedgerStore, ReservationRepository, TenantConfigProvider},
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct LedgerEngine {
    pub ledger: Arc<dyn LedgerStore>,
    pub guard: Arc<BalanceGuard>,
    pub manager: Arc<ReservationManager>,
    pub monitor: Arc<KillSwitchMonitor>,
    pub processor: Arc<UsageEventProcessor>,
    pub ledger_service: Arc<LedgerService>,
}

impl LedgerEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        reservations: Arc<dyn ReservationRepository>,
        tenants: Arc<dyn TenantConfigProvider>,
        sink: Arc<dyn KillSignalSink>,
        billing: &BillingConfig,
    ) -> Self {
        let lock_timeout = Duration::from_millis(billing.lock_timeout_ms);

        let guard = Arc::new(BalanceGuard::new(
            ledger.clone(),
            reservations.clone(),
            lock_timeout,
        ));
        let manager = Arc::new(ReservationManager::new(
            guard.clone(),
            reservations.clone(),
            tenants.clone(),
            Arc::new(HeartbeatTracker::new()),
            lock_timeout,
        ));
        let monitor = Arc::new(KillSwitchMonitor::new(
            guard.clone(),
            reservations,
            tenants.clone(),
            sink,
        ));
        let processor = Arc::new(UsageEventProcessor::new(
            guard.clone(),
            manager.clone(),
            monitor.clone(),
            tenants.clone(),
            RetryPolicy::with_attempts(billing.max_event_attempts),
        ));
        let ledger_service = Arc::new(LedgerService::new(
            guard.clone(),
            tenants,
            billing.currency.clone(),
        ));

        Self {
            ledger,
            guard,
            manager,
            monitor,
            processor,
            ledger_service,
        }
    }
}
