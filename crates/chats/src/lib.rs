//! # StudyCircle Chats Crate
//!
//! Domain logic for the real-time messaging core: conversations and their
//! append-only message logs, read receipts, and the group-membership role
//! model that gates chat access.
//!
//! ## Architecture
//!
//! - **Repositories**: data access over the shared SQLite pool
//! - **Services**: validation, authorization, and state transitions
//! - **Types**: wire events and the error taxonomy

pub mod repositories;
pub mod services;
pub mod types;

pub use repositories::{ConversationRepository, MembershipRepository, MessageRepository};
pub use services::{
    ConversationService, MarkReadOutcome, MembershipService, MessagePage, MessageService,
};
pub use types::{ChatError, ChatResult, ClientEvent, ServerEvent};
