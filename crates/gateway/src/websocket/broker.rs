//! Broadcast router over the shared pub/sub layer.
//!
//! Every server event for a conversation is PUBLISHed to that
//! conversation's redis channel; a single router task owns the subscriber
//! connection and fans received events into a per-conversation
//! `tokio::sync::broadcast` channel that local sessions listen on. All
//! delivery, including to sessions on the publishing process, takes this
//! path, so there is exactly one ordering of live events per publisher and
//! no duplicate-delivery bookkeeping.
//!
//! The process subscribes to a conversation's channel when its first local
//! session joins and unsubscribes when the last one leaves, bounding
//! fan-in to conversations this process actually serves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use studycircle_chats::ServerEvent;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

const CHANNEL_PREFIX: &str = "convo:";

fn channel_name(conversation_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{conversation_id}")
}

#[derive(Debug, PartialEq, Eq)]
enum RouterCommand {
    Subscribe(String),
    Unsubscribe(String),
}

struct Topic {
    sender: broadcast::Sender<ServerEvent>,
    sessions: usize,
}

/// Local fan-out state: one broadcast channel per conversation with a
/// session count, plus the command lane that drives the remote
/// subscription set. Guarded by a single mutex.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Topic>>,
    control_tx: mpsc::UnboundedSender<RouterCommand>,
    capacity: usize,
}

impl TopicRegistry {
    fn new(control_tx: mpsc::UnboundedSender<RouterCommand>, capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            control_tx,
            capacity,
        }
    }

    /// Attach a local session to a conversation's event stream. The first
    /// session for a conversation triggers the channel subscription.
    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<ServerEvent> {
        let mut topics = self.topics.lock().expect("broadcast topic registry poisoned");
        let topic = topics.entry(conversation_id.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            let _ = self
                .control_tx
                .send(RouterCommand::Subscribe(channel_name(conversation_id)));
            Topic { sender, sessions: 0 }
        });
        topic.sessions += 1;
        topic.sender.subscribe()
    }

    /// Detach a local session; the last one for a conversation triggers
    /// the channel unsubscription.
    pub fn unsubscribe(&self, conversation_id: &str) {
        let mut topics = self.topics.lock().expect("broadcast topic registry poisoned");
        if let Some(topic) = topics.get_mut(conversation_id) {
            topic.sessions = topic.sessions.saturating_sub(1);
            if topic.sessions == 0 {
                topics.remove(conversation_id);
                let _ = self
                    .control_tx
                    .send(RouterCommand::Unsubscribe(channel_name(conversation_id)));
            }
        }
    }

    /// Fan an event out to the local sessions of a conversation.
    fn deliver(&self, conversation_id: &str, event: ServerEvent) {
        let topics = self.topics.lock().expect("broadcast topic registry poisoned");
        if let Some(topic) = topics.get(conversation_id) {
            // send() fails only when no receiver is alive, which just
            // means the last local session raced the unsubscribe.
            let _ = topic.sender.send(event);
        }
    }

    /// Number of local sessions currently attached to a conversation.
    pub fn local_sessions(&self, conversation_id: &str) -> usize {
        self.topics
            .lock()
            .expect("broadcast topic registry poisoned")
            .get(conversation_id)
            .map(|topic| topic.sessions)
            .unwrap_or(0)
    }
}

/// Cloneable handle to the broadcast layer. Stored in the gateway state.
#[derive(Clone)]
pub struct BroadcastRouter {
    publish_conn: ConnectionManager,
    registry: Arc<TopicRegistry>,
}

impl BroadcastRouter {
    /// Connect the subscriber side and spawn the router task. Fails when
    /// the pub/sub layer is unreachable, which callers treat as fatal at
    /// startup: a process that cannot broadcast must not accept sessions.
    pub async fn start(
        client: redis::Client,
        publish_conn: ConnectionManager,
        capacity: usize,
    ) -> anyhow::Result<Self> {
        let pubsub = client.get_async_pubsub().await?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(TopicRegistry::new(control_tx, capacity));

        tokio::spawn(run_router(pubsub, control_rx, registry.clone()));

        Ok(Self {
            publish_conn,
            registry,
        })
    }

    /// The local topic registry, shared with the session manager.
    pub fn registry(&self) -> Arc<TopicRegistry> {
        self.registry.clone()
    }

    /// Publish an event to every live session subscribed to the
    /// conversation, on this process and others.
    pub async fn publish(
        &self,
        conversation_id: &str,
        event: &ServerEvent,
    ) -> anyhow::Result<()> {
        let payload =
            serde_json::to_string(event).context("failed to encode server event")?;
        let mut conn = self.publish_conn.clone();
        let _: () = conn
            .publish(channel_name(conversation_id), payload)
            .await
            .context("failed to publish to pub/sub layer")?;
        Ok(())
    }
}

async fn run_router(
    mut pubsub: PubSub,
    mut control_rx: mpsc::UnboundedReceiver<RouterCommand>,
    registry: Arc<TopicRegistry>,
) {
    enum Wake {
        Command(Option<RouterCommand>),
        Message(Option<redis::Msg>),
    }

    loop {
        let wake = {
            let mut stream = pubsub.on_message();
            tokio::select! {
                command = control_rx.recv() => Wake::Command(command),
                message = stream.next() => Wake::Message(message),
            }
        };

        match wake {
            Wake::Command(Some(RouterCommand::Subscribe(channel))) => {
                debug!(%channel, "subscribing to conversation channel");
                if let Err(error) = pubsub.subscribe(&channel).await {
                    error!(%channel, %error, "failed to subscribe to conversation channel");
                }
            }
            Wake::Command(Some(RouterCommand::Unsubscribe(channel))) => {
                debug!(%channel, "unsubscribing from conversation channel");
                if let Err(error) = pubsub.unsubscribe(&channel).await {
                    warn!(%channel, %error, "failed to unsubscribe from conversation channel");
                }
            }
            Wake::Command(None) => {
                debug!("all broadcast router handles dropped, stopping");
                break;
            }
            Wake::Message(Some(message)) => deliver(message, &registry),
            Wake::Message(None) => {
                error!("pub/sub connection closed, live broadcasts stopped");
                break;
            }
        }
    }
}

fn deliver(message: redis::Msg, registry: &TopicRegistry) {
    let channel = message.get_channel_name().to_string();
    let Some(conversation_id) = channel.strip_prefix(CHANNEL_PREFIX) else {
        warn!(%channel, "ignoring message on unexpected channel");
        return;
    };

    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%channel, %error, "failed to read pub/sub payload");
            return;
        }
    };

    match serde_json::from_str::<ServerEvent>(&payload) {
        Ok(event) => registry.deliver(conversation_id, event),
        Err(error) => {
            warn!(%channel, %error, "ignoring undecodable pub/sub payload");
        }
    }
}

/// Registry with no router task behind it, for exercising local fan-out
/// logic in tests.
#[cfg(test)]
pub(crate) fn detached_registry(capacity: usize) -> Arc<TopicRegistry> {
    let (control_tx, _control_rx) = mpsc::unbounded_channel();
    Arc::new(TopicRegistry::new(control_tx, capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> (Arc<TopicRegistry>, mpsc::UnboundedReceiver<RouterCommand>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        (Arc::new(TopicRegistry::new(control_tx, 16)), control_rx)
    }

    #[tokio::test]
    async fn first_subscribe_and_last_unsubscribe_drive_channel_commands() {
        let (registry, mut commands) = test_registry();

        let _first = registry.subscribe("conv-1");
        let _second = registry.subscribe("conv-1");
        assert_eq!(registry.local_sessions("conv-1"), 2);

        // Only the first local session subscribes the channel.
        assert_eq!(
            commands.try_recv().unwrap(),
            RouterCommand::Subscribe("convo:conv-1".to_string())
        );
        assert!(commands.try_recv().is_err());

        registry.unsubscribe("conv-1");
        assert_eq!(registry.local_sessions("conv-1"), 1);
        assert!(commands.try_recv().is_err());

        registry.unsubscribe("conv-1");
        assert_eq!(registry.local_sessions("conv-1"), 0);
        assert_eq!(
            commands.try_recv().unwrap(),
            RouterCommand::Unsubscribe("convo:conv-1".to_string())
        );
    }

    #[tokio::test]
    async fn deliver_reaches_only_the_conversation_topic() {
        let (registry, _commands) = test_registry();

        let mut receiver = registry.subscribe("conv-1");
        let mut other = registry.subscribe("conv-2");

        registry.deliver(
            "conv-1",
            ServerEvent::Error {
                message: "test".to_string(),
            },
        );

        let event = receiver.try_recv().unwrap();
        assert!(matches!(event, ServerEvent::Error { message } if message == "test"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_without_local_sessions_is_a_noop() {
        let (registry, _commands) = test_registry();
        // No panic, no state.
        registry.deliver(
            "conv-unknown",
            ServerEvent::Error {
                message: "dropped".to_string(),
            },
        );
        assert_eq!(registry.local_sessions("conv-unknown"), 0);
    }
}
