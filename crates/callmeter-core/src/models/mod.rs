//! Domain models for callmeter
//!
//! This module contains all the core domain models used throughout the ledger.

pub mod event;
pub mod profile;
pub mod reservation;
pub mod transaction;
pub mod wallet;

pub use event::{
    CreditGrant, EventOutcome, MAX_SESSION_SECONDS, KillSignal, KillSwitchDecision, LowBalanceWarning, UsageEvent,
    UsageEventKind,
};
pub use profile::{BillingProfile, ExpiryChargePolicy, Rounding};
pub use reservation::{CreditReservation, ReservationStatus};
pub use transaction::{
    replay, AppendOutcome, MAX_AMOUNT_MINOR_UNITS, CreditTransaction, NewTransaction, TransactionCursor, TransactionKind,
    TransactionPage,
};
pub use wallet::{BalanceSnapshot, Wallet};
