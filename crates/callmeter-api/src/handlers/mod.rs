//! HTTP request handlers

pub mod credit;
pub mod event;
pub mod health;
pub mod org;
pub mod session;

pub use credit::configure as configure_credits;
pub use event::configure as configure_events;
pub use health::health_check;
pub use org::configure as configure_orgs;
pub use session::configure as configure_sessions;
