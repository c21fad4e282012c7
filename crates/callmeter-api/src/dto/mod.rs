//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod event;
pub mod org;

pub use common::*;
pub use event::*;
pub use org::*;
