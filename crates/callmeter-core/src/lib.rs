//! Callmeter Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the callmeter prepaid credit ledger. It includes:
//!
//! - Domain models (Wallet, CreditTransaction, CreditReservation, usage events)
//! - Storage and configuration traits implemented by the db and cache crates
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
