//! Data access layer for the messaging core

pub mod conversation_repository;
pub mod membership_repository;
pub mod message_repository;

pub use conversation_repository::ConversationRepository;
pub use membership_repository::MembershipRepository;
pub use message_repository::MessageRepository;
