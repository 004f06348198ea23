//! Business logic layer for the messaging core

pub mod conversation_service;
pub mod membership_service;
pub mod message_service;

pub use conversation_service::ConversationService;
pub use membership_service::MembershipService;
pub use message_service::{MarkReadOutcome, MessagePage, MessageService};
