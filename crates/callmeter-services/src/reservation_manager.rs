//! Reservation manager service
//!
//! Manages credit holds throughout the session lifecycle:
//! - Create holds at session start (admission checked by the balance guard)
//! - Commit the actual cost at session end
//! - Release holds for cancelled sessions
//! - Reclaim holds whose session never reported an end
//!
//! Lifecycle operations on one session are serialized by the session lock,
//! which is always taken before the organization lock.

use crate::balance_guard::BalanceGuard;
use crate::cost::CostCalculator;
use crate::heartbeat::HeartbeatTracker;
use crate::locks::{KeyedGuard, KeyedLocks};
use callmeter_core::{
    models::{AppendOutcome, CreditReservation, ExpiryChargePolicy, ReservationStatus},
    traits::{ReservationRepository, TenantConfigProvider},
    AppError, AppResult,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::SWEEP_BATCH_SIZE;

/// Totals from one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Holds moved to `expired`
    pub expired: usize,
    /// Of those, how many were charged
    pub charged: usize,
    /// Skipped because the session was busy or already settled
    pub skipped: usize,
    pub failed: usize,
}

/// Reservation manager
pub struct ReservationManager {
    guard: Arc<BalanceGuard>,
    reservations: Arc<dyn ReservationRepository>,
    tenants: Arc<dyn TenantConfigProvider>,
    heartbeats: Arc<HeartbeatTracker>,
    session_locks: KeyedLocks,
}

impl ReservationManager {
    /// Create a new reservation manager
    pub fn new(
        guard: Arc<BalanceGuard>,
        reservations: Arc<dyn ReservationRepository>,
        tenants: Arc<dyn TenantConfigProvider>,
        heartbeats: Arc<HeartbeatTracker>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            guard,
            reservations,
            tenants,
            heartbeats,
            session_locks: KeyedLocks::new("session", lock_timeout),
        }
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatTracker> {
        &self.heartbeats
    }

    /// Serialize lifecycle work on one session
    pub async fn lock_session(&self, session_id: &str) -> AppResult<KeyedGuard> {
        self.session_locks.acquire(session_id).await
    }

    /// Create a hold of `amount` for a new session.
    ///
    /// A session that already has a reservation gets it back unchanged,
    /// whatever its status.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        org_id: &str,
        session_id: &str,
        amount: i64,
        ttl_secs: i64,
    ) -> AppResult<CreditReservation> {
        if let Some(existing) = self.reservations.find_by_session(session_id).await? {
            debug!(status = %existing.status, "Reservation already exists for session");
            return Ok(existing);
        }

        let reservation = CreditReservation::new(org_id, session_id, amount.max(0), ttl_secs);
        match self.guard.admit(&reservation).await {
            Ok(created) => {
                info!(
                    reservation_id = %created.id,
                    amount = created.amount_minor_units,
                    expires_at = %created.expires_at,
                    "Reservation created"
                );
                Ok(created)
            }
            Err(AppError::DuplicateSession(_)) => self
                .reservations
                .find_by_session(session_id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("reservation for {} vanished", session_id))),
            Err(e) => Err(e),
        }
    }

    /// Settle the active hold for a session at `actual` cost.
    ///
    /// `UnknownReservation` when the session has no active hold.
    #[instrument(skip(self))]
    pub async fn commit(
        &self,
        session_id: &str,
        actual: i64,
    ) -> AppResult<(AppendOutcome, CreditReservation)> {
        let reservation = self
            .reservations
            .find_by_session(session_id)
            .await?
            .filter(CreditReservation::is_active)
            .ok_or_else(|| AppError::UnknownReservation(session_id.to_string()))?;

        let (outcome, updated) = self
            .guard
            .settle(&reservation, actual, ReservationStatus::Committed)
            .await?;
        self.heartbeats.forget(session_id);

        let reservation = match updated {
            Some(r) => r,
            None => self
                .reservations
                .find_by_session(session_id)
                .await?
                .unwrap_or(reservation),
        };

        info!(
            reservation_id = %reservation.id,
            reserved = reservation.amount_minor_units,
            actual,
            "Reservation committed"
        );
        Ok((outcome, reservation))
    }

    /// Drop the hold for a session without charging.
    ///
    /// Returns the reservation in its resulting state, `None` if the session
    /// never had one.
    #[instrument(skip(self))]
    pub async fn release(&self, session_id: &str) -> AppResult<Option<CreditReservation>> {
        let Some(reservation) = self.reservations.find_by_session(session_id).await? else {
            debug!("No reservation to release");
            return Ok(None);
        };

        if !reservation.is_active() {
            debug!(status = %reservation.status, "Reservation already final");
            return Ok(Some(reservation));
        }

        let released = self
            .guard
            .release(&reservation, ReservationStatus::Released)
            .await?;
        self.heartbeats.forget(session_id);
        info!(reservation_id = %reservation.id, "Reservation released");

        Ok(released.or(Some(reservation)))
    }

    /// Release under the session lock, for callers outside event processing
    pub async fn release_session(&self, session_id: &str) -> AppResult<Option<CreditReservation>> {
        let _session = self.lock_session(session_id).await?;
        self.release(session_id).await
    }

    pub async fn find(&self, session_id: &str) -> AppResult<Option<CreditReservation>> {
        self.reservations.find_by_session(session_id).await
    }

    pub async fn list_active(&self, org_id: &str) -> AppResult<Vec<CreditReservation>> {
        self.reservations.list_active_by_org(org_id).await
    }

    /// Expire every active hold past its TTL.
    ///
    /// Each expiry takes the session lock, so it never races a commit or a
    /// release of the same session. Per-item failures are logged and counted.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> AppResult<SweepReport> {
        let candidates = self
            .reservations
            .list_expired_active(Utc::now(), SWEEP_BATCH_SIZE)
            .await?;

        let mut report = SweepReport::default();
        for candidate in candidates {
            match self.expire_one(&candidate).await {
                Ok(Some(charged)) => {
                    report.expired += 1;
                    if charged {
                        report.charged += 1;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) if e.is_retryable() => {
                    warn!(session_id = %candidate.session_id, error = %e, "Expiry deferred");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(session_id = %candidate.session_id, error = %e, "Expiry failed");
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                charged = report.charged,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// `Some(charged)` when the hold was expired, `None` when it was settled
    /// by someone else first
    async fn expire_one(&self, candidate: &CreditReservation) -> AppResult<Option<bool>> {
        let _session = self.lock_session(&candidate.session_id).await?;

        // Re-read under the lock; a session end may have won the race
        let current = self
            .reservations
            .find_by_session(&candidate.session_id)
            .await?
            .filter(|r| r.is_active() && r.is_expired_at(Utc::now()));
        let Some(reservation) = current else {
            return Ok(None);
        };

        let profile = self.tenants.profile(&reservation.org_id).await?;
        let charged = match profile.expiry_charge_policy {
            ExpiryChargePolicy::Release => {
                self.guard
                    .release(&reservation, ReservationStatus::Expired)
                    .await?;
                false
            }
            ExpiryChargePolicy::ChargeLastHeartbeat => {
                let elapsed = self.heartbeats.last(&reservation.session_id).unwrap_or(0);
                let charge = CostCalculator::from_profile(&profile).cost(elapsed);
                self.guard
                    .settle(&reservation, charge, ReservationStatus::Expired)
                    .await?;
                info!(
                    session_id = %reservation.session_id,
                    elapsed,
                    charge,
                    "Expired reservation charged at last heartbeat"
                );
                true
            }
        };

        self.heartbeats.forget(&reservation.session_id);
        info!(
            reservation_id = %reservation.id,
            session_id = %reservation.session_id,
            "Reservation expired"
        );
        Ok(Some(charged))
    }
}
