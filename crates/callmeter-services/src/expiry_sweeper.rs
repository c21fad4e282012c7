//! Background expiry sweep

use crate::reservation_manager::ReservationManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run `sweep_expired` every `interval` until `shutdown` is cancelled
pub fn spawn_expiry_sweeper(
    manager: Arc<ReservationManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = manager.sweep_expired().await {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::funded_engine;
    use callmeter_core::models::{ReservationStatus, UsageEvent};
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_sweeper_expires_stale_holds() {
        let fixture = funded_engine(1_000).await;
        let engine = &fixture.engine;
        engine
            .processor
            .handle(UsageEvent::start("org-1", "call-1", Some(300)))
            .await
            .unwrap();
        assert_eq!(engine.ledger_service.balance("org-1").await.unwrap().effective_balance, 720);

        fixture
            .reservations
            .set_expires_at("call-1", Utc::now() - ChronoDuration::seconds(1));

        let shutdown = CancellationToken::new();
        let handle = spawn_expiry_sweeper(
            engine.manager.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let reservation = engine.manager.find("call-1").await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);
        assert_eq!(engine.ledger_service.balance("org-1").await.unwrap().effective_balance, 1_000);
    }
}
