//! The relay hub shared by every connection task.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    config::RelayConfig,
    dispatch::{DispatchError, Dispatched, Dispatcher, RoutingTable},
    message::ChatMessage,
    router::{DeliveryReport, OutboundSink, Payload, TopicRouter},
    session::{ConnectionId, RegistryError, SessionRegistry},
};

/// What a connection task holds on to between `connect` and `disconnect`.
///
/// Not `Clone`: `disconnect` consumes it, so cleanup runs once per connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sink: OutboundSink,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub topic: String,
    pub sessions: usize,
    pub subscribers: usize,
    pub users: Vec<String>,
}

#[derive(Debug)]
pub struct Relay {
    config: RelayConfig,
    sessions: SessionRegistry,
    router: TopicRouter,
    dispatcher: Dispatcher,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let dispatcher = Dispatcher::new(
            RoutingTable::standard(),
            config.policy,
            config.topic_name.clone(),
        );
        Self {
            config,
            sessions: SessionRegistry::new(),
            router: TopicRouter::new(),
            dispatcher,
        }
    }

    pub fn shared(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Registers a new session and creates its outbound queue.
    pub async fn connect(&self) -> Result<(Connection, mpsc::Receiver<Payload>), RegistryError> {
        let id = self.sessions.next_id();
        if let Err(err) = self.sessions.register(id).await {
            error!(connection = %id, error = %err, "connection id collision");
            return Err(err);
        }

        let (sink, outbound) = OutboundSink::channel(self.config.outbound_capacity);
        debug!(connection = %id, "session registered");
        Ok((Connection { id, sink }, outbound))
    }

    pub async fn dispatch(
        &self,
        connection: &Connection,
        raw: &str,
    ) -> Result<Dispatched, DispatchError> {
        self.dispatcher
            .dispatch(
                &self.sessions,
                &self.router,
                connection.id,
                &connection.sink,
                raw,
            )
            .await
    }

    /// Tears the session down: unsubscribes it everywhere, removes it from
    /// the registry, then tells the topic who left.
    ///
    /// Returns the report of the `LEAVE` publish when the session had a
    /// username.
    pub async fn disconnect(&self, connection: Connection) -> Option<DeliveryReport> {
        let Connection { id, sink } = connection;
        let topics_left = self.router.unsubscribe_all(id).await;
        drop(sink);

        let Some(session) = self.sessions.remove(id).await else {
            debug!(connection = %id, "session already removed");
            return None;
        };

        let username = session.username()?;
        info!(connection = %id, username, topics_left, "user left");

        match ChatMessage::leave(username).encode() {
            Ok(encoded) => Some(
                self.router
                    .publish(&self.config.topic_name, Payload::from(encoded))
                    .await,
            ),
            Err(err) => {
                warn!(connection = %id, error = ?err, "failed to encode leave event");
                None
            }
        }
    }

    pub async fn health(&self) -> HealthReport {
        let topic = self.config.topic_name.clone();
        let subscribers = self.router.subscribers(&topic).await.len();
        HealthReport {
            status: "ok",
            sessions: self.sessions.len().await,
            users: self.sessions.usernames().await,
            subscribers,
            topic,
        }
    }
}
