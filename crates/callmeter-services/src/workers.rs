//! Concurrent event workers
//!
//! Drains the in-process event queue with a bounded number of in-flight
//! events. Ordering across sessions is not preserved; events of one session
//! are serialized by the session lock inside the processor.

use crate::usage_processor::UsageEventProcessor;
use callmeter_core::models::UsageEvent;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Process events from `rx` until every sender is dropped
pub async fn run_workers(
    processor: Arc<UsageEventProcessor>,
    mut rx: mpsc::Receiver<UsageEvent>,
    workers: usize,
) {
    let workers = workers.max(1);
    info!(workers, "Event workers started");

    stream::poll_fn(|cx| rx.poll_recv(cx))
        .for_each_concurrent(workers, |event| {
            let processor = processor.clone();
            async move {
                let kind = event.kind;
                let session_id = event.session_id.clone();
                match processor.handle(event).await {
                    Ok(outcome) => debug!(%kind, %session_id, ?outcome, "Event processed"),
                    Err(e) => error!(%kind, %session_id, error = %e, "Event failed"),
                }
            }
        })
        .await;

    info!("Event queue closed, workers stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::funded_engine;
    use callmeter_core::models::TransactionKind;
    use callmeter_core::traits::LedgerStore;

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let fixture = funded_engine(10_000).await;

        let (tx, rx) = mpsc::channel(16);
        for i in 0..5 {
            let session = format!("call-{}", i);
            tx.send(UsageEvent::start("org-1", &session, Some(60)))
                .await
                .unwrap();
            tx.send(UsageEvent::end("org-1", &session, 60)).await.unwrap();
        }
        drop(tx);

        run_workers(fixture.engine.processor.clone(), rx, 4).await;

        // Every session settled exactly once, whatever order the workers ran in
        let history = fixture.engine.ledger.transaction_history("org-1").await.unwrap();
        let deductions: Vec<_> = history
            .iter()
            .filter(|t| t.kind == TransactionKind::CallDeduction)
            .collect();
        assert_eq!(deductions.len(), 5);
        assert!(deductions.iter().all(|t| t.amount_minor_units == -56));
        assert_eq!(history.last().unwrap().balance_after_minor_units, 10_000 - 5 * 56);
    }
}
