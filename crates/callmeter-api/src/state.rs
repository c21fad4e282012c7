//! Shared handler state

use callmeter_core::models::UsageEvent;
use callmeter_core::{AppError, AppResult};
use callmeter_services::LedgerEngine;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Services reachable from every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: LedgerEngine,
    /// Intake for the worker pool; `None` when events are only handled inline
    pub events: Option<mpsc::Sender<UsageEvent>>,
}

impl AppState {
    pub fn new(engine: LedgerEngine) -> Self {
        Self {
            engine,
            events: None,
        }
    }

    pub fn with_event_queue(mut self, events: mpsc::Sender<UsageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Hand an event to the worker pool without waiting
    pub fn enqueue(&self, event: UsageEvent) -> AppResult<()> {
        let sender = self
            .events
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("event queue is not enabled".to_string()))?;

        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Overloaded("event queue is full".to_string()),
            TrySendError::Closed(_) => AppError::Internal("event queue is closed".to_string()),
        })
    }
}
