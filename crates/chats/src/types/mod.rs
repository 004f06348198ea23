//! Shared types for the messaging core

pub mod errors;
pub mod events;

pub use errors::{ChatError, ChatResult};
pub use events::{ClientEvent, ServerEvent};
