//! Live-session registry.
//!
//! The one place in the process that knows which connections exist. All
//! access goes through a single mutex; no connection task touches another
//! connection's record directly. Sessions on other processes are reached
//! only through the broadcast router, never by direct lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use studycircle_auth::UserIdentity;
use studycircle_chats::ServerEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::broker::TopicRegistry;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: i64,
    pub user_public_id: String,
    pub conversation_id: String,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, SessionRecord>,
    /// Ephemeral (conversation, user) typing flags. Advisory only; cleared
    /// on disconnect and never persisted.
    typing: HashMap<(String, i64), bool>,
}

pub struct SessionManager {
    topics: Arc<TopicRegistry>,
    inner: Mutex<Registry>,
}

impl SessionManager {
    pub fn new(topics: Arc<TopicRegistry>) -> Self {
        Self {
            topics,
            inner: Mutex::new(Registry::default()),
        }
    }

    /// Register a connection after it has been authenticated and
    /// authorized. Returns the session id and the conversation's local
    /// event stream.
    pub fn register(
        &self,
        conversation_id: &str,
        identity: &UserIdentity,
    ) -> (Uuid, broadcast::Receiver<ServerEvent>) {
        let receiver = self.topics.subscribe(conversation_id);
        let session_id = Uuid::new_v4();

        let mut registry = self.inner.lock().expect("session registry poisoned");
        registry.sessions.insert(
            session_id,
            SessionRecord {
                user_id: identity.id,
                user_public_id: identity.public_id.clone(),
                conversation_id: conversation_id.to_string(),
            },
        );

        info!(
            session = %session_id,
            user = %identity.public_id,
            conversation = %conversation_id,
            "session registered"
        );

        (session_id, receiver)
    }

    /// Remove a session. Idempotent: the registry entry is taken exactly
    /// once, so concurrent cleanup paths (client close frame racing a
    /// network error) unsubscribe exactly once.
    pub fn deregister(&self, session_id: Uuid) {
        let record = {
            let mut registry = self.inner.lock().expect("session registry poisoned");
            let record = registry.sessions.remove(&session_id);
            if let Some(record) = &record {
                registry
                    .typing
                    .remove(&(record.conversation_id.clone(), record.user_id));
            }
            record
        };

        if let Some(record) = record {
            self.topics.unsubscribe(&record.conversation_id);
            info!(
                session = %session_id,
                user = %record.user_public_id,
                conversation = %record.conversation_id,
                "session deregistered"
            );
        } else {
            debug!(session = %session_id, "session already deregistered");
        }
    }

    pub fn set_typing(&self, conversation_id: &str, user_id: i64, is_typing: bool) {
        let mut registry = self.inner.lock().expect("session registry poisoned");
        if is_typing {
            registry
                .typing
                .insert((conversation_id.to_string(), user_id), true);
        } else {
            registry.typing.remove(&(conversation_id.to_string(), user_id));
        }
    }

    pub fn is_typing(&self, conversation_id: &str, user_id: i64) -> bool {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .typing
            .contains_key(&(conversation_id.to_string(), user_id))
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .sessions
            .len()
    }
}

/// Guarantees deregistration when the connection task ends, whether by a
/// clean close frame, an I/O error, or task cancellation during shutdown.
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    session_id: Uuid,
}

impl SessionGuard {
    pub fn new(manager: Arc<SessionManager>, session_id: Uuid) -> Self {
        Self {
            manager,
            session_id,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.manager.deregister(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::broker::detached_registry;

    fn identity(id: i64, public_id: &str) -> UserIdentity {
        UserIdentity {
            id,
            public_id: public_id.to_string(),
            display_name: None,
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn register_and_deregister_track_topic_sessions() {
        let registry = detached_registry(16);
        let manager = SessionManager::new(registry.clone());

        let (first, _rx1) = manager.register("conv-1", &identity(1, "u1"));
        let (second, _rx2) = manager.register("conv-1", &identity(2, "u2"));
        assert_eq!(manager.session_count(), 2);
        assert_eq!(registry.local_sessions("conv-1"), 2);

        manager.deregister(first);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(registry.local_sessions("conv-1"), 1);

        manager.deregister(second);
        assert_eq!(registry.local_sessions("conv-1"), 0);
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = detached_registry(16);
        let manager = SessionManager::new(registry.clone());

        let (session_id, _rx) = manager.register("conv-1", &identity(1, "u1"));
        let (_other, _rx2) = manager.register("conv-1", &identity(2, "u2"));

        // A client close frame racing a network error both trigger
        // cleanup; the second call must not decrement again.
        manager.deregister(session_id);
        manager.deregister(session_id);
        assert_eq!(registry.local_sessions("conv-1"), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_typing_state() {
        let registry = detached_registry(16);
        let manager = SessionManager::new(registry);

        let user = identity(1, "u1");
        let (session_id, _rx) = manager.register("conv-1", &user);

        manager.set_typing("conv-1", user.id, true);
        assert!(manager.is_typing("conv-1", user.id));

        manager.deregister(session_id);
        assert!(!manager.is_typing("conv-1", user.id));
    }

    #[tokio::test]
    async fn guard_deregisters_on_drop() {
        let registry = detached_registry(16);
        let manager = Arc::new(SessionManager::new(registry.clone()));

        let (session_id, _rx) = manager.register("conv-1", &identity(1, "u1"));
        {
            let _guard = SessionGuard::new(manager.clone(), session_id);
        }
        assert_eq!(manager.session_count(), 0);
        assert_eq!(registry.local_sessions("conv-1"), 0);
    }
}
