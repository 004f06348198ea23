//! StudyCircle Database Crate
//!
//! Connection management, embedded migrations, and the entity structs shared
//! by the messaging core.

use sqlx::SqlitePool;
use studycircle_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use entities::{
    Conversation, ConversationKind, GroupPrivacy, MemberRole, MemberStatus, Membership, Message,
    StudyGroup,
};

pub use types::{DatabaseError, DatabaseResult};

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    Ok(pool)
}
