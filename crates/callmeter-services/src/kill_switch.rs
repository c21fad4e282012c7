//! Kill-switch monitor
//!
//! Evaluates each heartbeat against the organization's balance and decides
//! whether the session must be cut off. Evaluation is read-only and never
//! takes the organization lock; if any read fails the verdict is "no warning,
//! no terminate".

use crate::balance_guard::BalanceGuard;
use crate::cost::CostCalculator;
use async_trait::async_trait;
use callmeter_core::{
    models::{KillSignal, KillSwitchDecision, LowBalanceWarning},
    traits::{KillSignalSink, ReservationRepository, TenantConfigProvider},
    AppResult,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Reason attached to terminate commands
pub const TERMINATE_REASON: &str = "insufficient_balance";

pub struct KillSwitchMonitor {
    guard: Arc<BalanceGuard>,
    reservations: Arc<dyn ReservationRepository>,
    tenants: Arc<dyn TenantConfigProvider>,
    sink: Arc<dyn KillSignalSink>,
}

impl KillSwitchMonitor {
    pub fn new(
        guard: Arc<BalanceGuard>,
        reservations: Arc<dyn ReservationRepository>,
        tenants: Arc<dyn TenantConfigProvider>,
        sink: Arc<dyn KillSignalSink>,
    ) -> Self {
        Self {
            guard,
            reservations,
            tenants,
            sink,
        }
    }

    /// Verdict for a session that has run `elapsed` seconds
    #[instrument(skip(self))]
    pub async fn evaluate(&self, org_id: &str, session_id: &str, elapsed: i64) -> KillSwitchDecision {
        match self.try_evaluate(org_id, session_id, elapsed).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Kill-switch evaluation degraded to no-op");
                KillSwitchDecision::no_op()
            }
        }
    }

    async fn try_evaluate(
        &self,
        org_id: &str,
        session_id: &str,
        elapsed: i64,
    ) -> AppResult<KillSwitchDecision> {
        let profile = self.tenants.profile(org_id).await?;
        let calculator = CostCalculator::from_profile(&profile);
        let projected = calculator.cost(elapsed);

        let snapshot = self.guard.snapshot(org_id).await?;
        let own = self
            .reservations
            .find_by_session(session_id)
            .await?
            .filter(|r| r.is_active() && r.org_id == org_id);
        let own_hold = own.as_ref().map_or(0, |r| r.amount_minor_units);

        // Effective balance without this session's own hold
        let available = snapshot.effective_balance.saturating_add(own_hold);
        let balance_headroom = available.saturating_sub(projected);
        let reservation_headroom = own_hold.saturating_sub(projected);
        let threshold = calculator.cost(profile.low_balance_runway_secs);

        let terminate = projected > available;
        let warning = (balance_headroom < threshold).then(|| LowBalanceWarning {
            org_id: org_id.to_string(),
            session_id: session_id.to_string(),
            balance_headroom,
            reservation_headroom,
            threshold,
        });

        debug!(
            projected,
            available, reservation_headroom, terminate, "Heartbeat evaluated"
        );

        Ok(KillSwitchDecision {
            terminate,
            warning,
            projected_cost: projected,
        })
    }

    /// Evaluate and, when warranted, send the terminate command.
    ///
    /// Delivery is fire-and-forget: a failing sink is logged, never surfaced.
    pub async fn check(&self, org_id: &str, session_id: &str, elapsed: i64) -> KillSwitchDecision {
        let decision = self.evaluate(org_id, session_id, elapsed).await;

        if let Some(warning) = &decision.warning {
            warn!(
                org_id = %org_id,
                session_id = %session_id,
                balance_headroom = warning.balance_headroom,
                threshold = warning.threshold,
                "Low balance"
            );
        }

        if decision.terminate {
            let signal = KillSignal::terminate(org_id, session_id, TERMINATE_REASON);
            if let Err(e) = self.sink.send(signal).await {
                warn!(session_id = %session_id, error = %e, "Kill signal delivery failed");
            }
        }

        decision
    }
}

/// Forwards kill signals into an in-process channel
pub struct ChannelKillSink {
    sender: mpsc::Sender<KillSignal>,
}

impl ChannelKillSink {
    pub fn new(sender: mpsc::Sender<KillSignal>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<KillSignal>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl KillSignalSink for ChannelKillSink {
    async fn send(&self, signal: KillSignal) -> AppResult<()> {
        // Never block event processing on a slow consumer
        if let Err(e) = self.sender.try_send(signal) {
            warn!("Kill signal dropped: {}", e);
        }
        Ok(())
    }
}

/// Writes kill signals to the log only
#[derive(Default)]
pub struct LoggingKillSink;

#[async_trait]
impl KillSignalSink for LoggingKillSink {
    async fn send(&self, signal: KillSignal) -> AppResult<()> {
        info!(
            org_id = %signal.org_id,
            session_id = %signal.session_id,
            action = %signal.action,
            reason = %signal.reason,
            "Kill signal"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant_config::StaticTenantConfig;
    use callmeter_core::config::BillingConfig;
    use callmeter_core::models::{CreditReservation, NewTransaction, TransactionKind};
    use callmeter_core::traits::LedgerStore;
    use callmeter_db::{InMemoryLedgerStore, InMemoryReservationRepository};
    use std::time::Duration;

    async fn monitor(
        balance: i64,
        ceiling: i64,
    ) -> (KillSwitchMonitor, Arc<BalanceGuard>, mpsc::Receiver<KillSignal>) {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let repo = Arc::new(InMemoryReservationRepository::new());
        ledger.open_wallet("org-1", "USD", ceiling).await.unwrap();
        if balance != 0 {
            ledger
                .append_transaction(NewTransaction::new("org-1", balance, TransactionKind::Topup))
                .await
                .unwrap();
        }

        let guard = Arc::new(BalanceGuard::new(ledger, repo.clone(), Duration::from_secs(1)));
        let (sink, rx) = ChannelKillSink::channel(8);
        let monitor = KillSwitchMonitor::new(
            guard.clone(),
            repo,
            Arc::new(StaticTenantConfig::new(BillingConfig::default())),
            Arc::new(sink),
        );
        (monitor, guard, rx)
    }

    #[tokio::test]
    async fn test_ceiling_breach_terminates() {
        let (monitor, _, mut rx) = monitor(50, 0).await;

        let decision = monitor.check("org-1", "call-1", 60).await;
        assert!(decision.terminate);
        assert_eq!(decision.projected_cost, 56);

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.action, "terminate");
        assert_eq!(signal.session_id, "call-1");
    }

    #[tokio::test]
    async fn test_healthy_balance() {
        let (monitor, _, mut rx) = monitor(10_000, 500).await;

        let decision = monitor.check("org-1", "call-1", 60).await;
        assert!(!decision.terminate);
        assert!(decision.warning.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_own_hold_is_not_counted_against_session() {
        let (monitor, guard, _rx) = monitor(300, 0).await;
        guard
            .admit(&CreditReservation::new("org-1", "call-1", 280, 2700))
            .await
            .unwrap();

        // Effective balance is 20, but this session's own hold is available to it
        let decision = monitor.evaluate("org-1", "call-1", 120).await;
        assert!(!decision.terminate);

        let other = monitor.evaluate("org-1", "call-2", 60).await;
        assert!(other.terminate);
    }

    #[tokio::test]
    async fn test_runs_past_hold_until_balance_exhausted() {
        let (monitor, guard, _rx) = monitor(1_000, 0).await;
        guard
            .admit(&CreditReservation::new("org-1", "call-1", 56, 2700))
            .await
            .unwrap();

        // 5 minutes = 280, well past the 56 hold but within balance
        let decision = monitor.evaluate("org-1", "call-1", 300).await;
        assert!(!decision.terminate);
        let warning = decision.warning;
        assert!(warning.is_none());

        // 18 minutes = 1008 > 1000
        let decision = monitor.evaluate("org-1", "call-1", 18 * 60).await;
        assert!(decision.terminate);
        let warning = decision.warning.unwrap();
        assert_eq!(warning.reservation_headroom, 56 - 1_008);
    }

    #[tokio::test]
    async fn test_low_balance_warning() {
        let (monitor, _, _rx) = monitor(150, 0).await;

        // 120s = 112, headroom 38 < one minute (56)
        let decision = monitor.evaluate("org-1", "call-1", 120).await;
        assert!(!decision.terminate);
        let warning = decision.warning.unwrap();
        assert_eq!(warning.balance_headroom, 38);
        assert_eq!(warning.threshold, 56);
    }

    #[tokio::test]
    async fn test_unknown_org_degrades() {
        let (monitor, _, mut rx) = monitor(0, 0).await;

        let decision = monitor.check("ghost", "call-1", 600).await;
        assert_eq!(decision, KillSwitchDecision::no_op());
        assert!(rx.try_recv().is_err());
    }
}
