//! Usage event processor
//!
//! Entry point for session lifecycle events and external credit grants.
//! Events arrive at least once and possibly out of order; every effect is
//! keyed on a natural identity (session id, provider event id) so a
//! redelivery resolves to the result of the first delivery.

use crate::balance_guard::{BalanceGuard, CeilingPolicy};
use crate::cost::CostCalculator;
use crate::kill_switch::KillSwitchMonitor;
use crate::reservation_manager::ReservationManager;
use crate::retry::RetryPolicy;
use callmeter_core::{
    models::{
        AppendOutcome, BillingProfile, CreditGrant, CreditReservation, EventOutcome,
        NewTransaction, MAX_AMOUNT_MINOR_UNITS, ReservationStatus, TransactionKind, UsageEvent, UsageEventKind,
    },
    traits::TenantConfigProvider,
    AppError, AppResult,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct UsageEventProcessor {
    guard: Arc<BalanceGuard>,
    reservations: Arc<ReservationManager>,
    monitor: Arc<KillSwitchMonitor>,
    tenants: Arc<dyn TenantConfigProvider>,
    retry: RetryPolicy,
}

impl UsageEventProcessor {
    pub fn new(
        guard: Arc<BalanceGuard>,
        reservations: Arc<ReservationManager>,
        monitor: Arc<KillSwitchMonitor>,
        tenants: Arc<dyn TenantConfigProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            guard,
            reservations,
            monitor,
            tenants,
            retry,
        }
    }

    /// Handle one lifecycle event, retrying transient failures
    #[instrument(skip(self, event), fields(kind = %event.kind, org_id = %event.org_id, session_id = %event.session_id))]
    pub async fn handle(&self, event: UsageEvent) -> AppResult<EventOutcome> {
        if event.session_id.trim().is_empty() || event.org_id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "session_id and org_id are required".to_string(),
            ));
        }
        event.check_durations()?;

        self.retry
            .run("usage_event", || self.handle_once(&event))
            .await
    }

    async fn handle_once(&self, event: &UsageEvent) -> AppResult<EventOutcome> {
        let _session = self.reservations.lock_session(&event.session_id).await?;

        match event.kind {
            UsageEventKind::SessionStart => {
                let profile = self.current_profile(&event.org_id).await?;
                self.start(event, &profile).await
            }
            UsageEventKind::Heartbeat => self.heartbeat(event).await,
            UsageEventKind::SessionEnd => {
                let profile = self.current_profile(&event.org_id).await?;
                self.end(event, &profile).await
            }
            UsageEventKind::SessionCancelled => {
                let reservation = self.reservations.release(&event.session_id).await?;
                Ok(EventOutcome::Released { reservation })
            }
        }
    }

    /// Read the tenant profile and bring the wallet ceiling in line with it
    async fn current_profile(&self, org_id: &str) -> AppResult<BillingProfile> {
        let profile = self.tenants.profile(org_id).await?;
        self.guard
            .reconcile_ceiling(org_id, profile.debt_ceiling)
            .await?;
        Ok(profile)
    }

    async fn start(&self, event: &UsageEvent, profile: &BillingProfile) -> AppResult<EventOutcome> {
        // An end that overtook its start already settled the session
        if let Some(existing) = self
            .guard
            .ledger()
            .find_transaction(TransactionKind::CallDeduction, &event.session_id)
            .await?
        {
            debug!(transaction_id = %existing.id, "Start after settlement ignored");
            return Ok(EventOutcome::AlreadySettled {
                transaction: existing,
            });
        }

        let estimated = profile.estimate_secs(event.estimated_seconds);
        let amount = CostCalculator::from_profile(profile).cost(estimated);

        let reservation = self
            .reservations
            .create(
                &event.org_id,
                &event.session_id,
                amount,
                profile.reservation_ttl_secs,
            )
            .await?;

        Ok(EventOutcome::Reserved { reservation })
    }

    async fn heartbeat(&self, event: &UsageEvent) -> AppResult<EventOutcome> {
        if self.is_closed(&event.session_id).await? {
            debug!("Heartbeat after session end ignored");
            self.reservations.heartbeats().forget(&event.session_id);
            return Ok(EventOutcome::Stale);
        }

        let elapsed = self
            .reservations
            .heartbeats()
            .record(&event.session_id, event.elapsed());

        let decision = self
            .monitor
            .check(&event.org_id, &event.session_id, elapsed)
            .await;

        Ok(EventOutcome::Evaluated { decision })
    }

    /// Terminal reservation or an existing settlement row
    async fn is_closed(&self, session_id: &str) -> AppResult<bool> {
        if let Some(reservation) = self.reservations.find(session_id).await? {
            return Ok(!reservation.is_active());
        }

        let settled = self
            .guard
            .ledger()
            .find_transaction(TransactionKind::CallDeduction, session_id)
            .await?;
        Ok(settled.is_some())
    }

    async fn end(&self, event: &UsageEvent, profile: &BillingProfile) -> AppResult<EventOutcome> {
        let actual = CostCalculator::from_profile(profile).cost(event.elapsed());
        let ledger = self.guard.ledger();

        let reservation = self.reservations.find(&event.session_id).await?;
        if let Some(expired) = reservation.as_ref().filter(|r| {
            r.status == ReservationStatus::Expired && r.committed_minor_units.is_some()
        }) {
            return self.true_up_expired(expired, actual).await;
        }

        if let Some(existing) = ledger
            .find_transaction(TransactionKind::CallDeduction, &event.session_id)
            .await?
        {
            info!(transaction_id = %existing.id, "Session already settled");
            return Ok(EventOutcome::AlreadySettled {
                transaction: existing,
            });
        }

        let outcome = match self.reservations.commit(&event.session_id, actual).await {
            Ok((outcome, _)) => outcome,
            Err(AppError::UnknownReservation(_)) => {
                warn!(actual, "No active reservation, settling unreserved");
                let request = NewTransaction::new(
                    &event.org_id,
                    -actual,
                    TransactionKind::CallDeduction,
                )
                .with_external_id(&event.session_id)
                .bypassing_reservation();

                let outcome = self.guard.apply(request, CeilingPolicy::Settle).await?;
                self.reservations.heartbeats().forget(&event.session_id);
                outcome
            }
            Err(e) => return Err(e),
        };

        Ok(Self::settled(outcome))
    }

    /// Book the difference between the true cost and what expiry charged
    async fn true_up_expired(
        &self,
        reservation: &CreditReservation,
        actual: i64,
    ) -> AppResult<EventOutcome> {
        let charged = reservation.committed_minor_units.unwrap_or(0);
        let delta = actual.saturating_sub(charged);

        if delta == 0 {
            let existing = self
                .guard
                .ledger()
                .find_transaction(TransactionKind::CallDeduction, &reservation.session_id)
                .await?
                .ok_or_else(|| {
                    AppError::IntegrityViolation(format!(
                        "expired reservation {} charged without a ledger row",
                        reservation.id
                    ))
                })?;
            return Ok(EventOutcome::AlreadySettled {
                transaction: existing,
            });
        }

        info!(charged, actual, delta, "Late end after charged expiry");
        let request = NewTransaction::new(&reservation.org_id, -delta, TransactionKind::Adjustment)
            .with_external_id(&reservation.session_id)
            .with_reservation(reservation.id);

        let outcome = self.guard.apply(request, CeilingPolicy::Settle).await?;
        Ok(Self::settled(outcome))
    }

    fn settled(outcome: AppendOutcome) -> EventOutcome {
        match outcome {
            AppendOutcome::Applied { transaction, .. } => EventOutcome::Settled {
                reservation_bypassed: transaction.reservation_bypassed,
                transaction,
            },
            AppendOutcome::Duplicate(transaction) => EventOutcome::AlreadySettled { transaction },
        }
    }

    /// Apply an external credit grant; a redelivered grant is a no-op
    #[instrument(skip(self, grant), fields(org_id = %grant.org_id, kind = %grant.kind, external_event_id = %grant.external_event_id))]
    pub async fn grant_credit(&self, grant: CreditGrant) -> AppResult<AppendOutcome> {
        validate_grant(&grant)?;

        let request = NewTransaction::new(&grant.org_id, grant.amount_minor_units, grant.kind)
            .with_external_id(&grant.external_event_id);

        let outcome = self
            .retry
            .run("credit_grant", || {
                self.guard.apply(request.clone(), CeilingPolicy::Enforce)
            })
            .await?;

        if outcome.is_duplicate() {
            debug!("Credit grant already applied");
        } else {
            info!(amount = grant.amount_minor_units, "Credit granted");
        }
        Ok(outcome)
    }
}

fn validate_grant(grant: &CreditGrant) -> AppResult<()> {
    if grant.external_event_id.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "external_event_id is required".to_string(),
        ));
    }

    if grant.amount_minor_units.unsigned_abs() > MAX_AMOUNT_MINOR_UNITS.unsigned_abs() {
        return Err(AppError::InvalidInput(format!(
            "amount magnitude must not exceed {}",
            MAX_AMOUNT_MINOR_UNITS
        )));
    }

    match grant.kind {
        TransactionKind::CallDeduction => Err(AppError::InvalidInput(
            "call deductions are only written by session settlement".to_string(),
        )),
        kind if kind.is_credit() && grant.amount_minor_units <= 0 => Err(AppError::InvalidInput(
            format!("{} amount must be positive", kind),
        )),
        TransactionKind::Adjustment if grant.amount_minor_units == 0 => Err(
            AppError::InvalidInput("adjustment amount must be non-zero".to_string()),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(kind: TransactionKind, amount: i64) -> CreditGrant {
        CreditGrant {
            org_id: "org-1".to_string(),
            amount_minor_units: amount,
            kind,
            external_event_id: "evt-1".to_string(),
        }
    }

    #[test]
    fn test_validate_grant() {
        assert!(validate_grant(&grant(TransactionKind::Topup, 100)).is_ok());
        assert!(validate_grant(&grant(TransactionKind::Adjustment, -100)).is_ok());
        assert!(validate_grant(&grant(TransactionKind::Topup, -100)).is_err());
        assert!(validate_grant(&grant(TransactionKind::Refund, 0)).is_err());
        assert!(validate_grant(&grant(TransactionKind::Adjustment, 0)).is_err());
        assert!(validate_grant(&grant(TransactionKind::CallDeduction, -100)).is_err());
        assert!(validate_grant(&grant(TransactionKind::Topup, MAX_AMOUNT_MINOR_UNITS)).is_ok());
        assert!(validate_grant(&grant(TransactionKind::Topup, i64::MAX)).is_err());
        assert!(validate_grant(&grant(TransactionKind::Adjustment, i64::MIN)).is_err());

        let mut blank = grant(TransactionKind::Bonus, 10);
        blank.external_event_id = "  ".to_string();
        assert!(validate_grant(&blank).is_err());
    }
}
