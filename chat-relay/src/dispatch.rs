//! Turns inbound frames into registry updates and publishes.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::DispatchPolicy,
    message::{self, ChatMessage},
    router::{DeliveryReport, OutboundSink, Payload, TopicRouter},
    session::{BindOutcome, ConnectionId, Phase, RegistryError, SessionRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SendMessage,
    AddUser,
}

/// Event type string to handler, fixed when the relay starts.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<&'static str, EventKind>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RoutingTable {
    pub fn standard() -> Self {
        let routes = HashMap::from([
            (message::SEND_MESSAGE, EventKind::SendMessage),
            (message::CHAT, EventKind::SendMessage),
            (message::ADD_USER, EventKind::AddUser),
            (message::JOIN, EventKind::AddUser),
        ]);
        Self { routes }
    }

    pub fn resolve(&self, kind: &str) -> Option<EventKind> {
        self.routes.get(kind).copied()
    }
}

/// The frame could not be understood; it is dropped.
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("frame is not a chat event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unrecognized event type '{0}'")]
    UnknownKind(String),
    #[error("add-user needs a non-empty sender")]
    MissingSender,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),
    #[error("connection {0} has to add a user before sending messages")]
    NotIdentified(ConnectionId),
    #[error("sender '{sender}' does not match bound username '{bound}'")]
    SenderMismatch { sender: String, bound: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug)]
pub struct Dispatched {
    pub kind: EventKind,
    pub report: DeliveryReport,
}

/// Applies the routing table and policy to one frame at a time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: RoutingTable,
    policy: DispatchPolicy,
    topic: String,
}

impl Dispatcher {
    pub fn new(routes: RoutingTable, policy: DispatchPolicy, topic: impl Into<String>) -> Self {
        Self {
            routes,
            policy,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handles one raw frame from connection `id`.
    ///
    /// Nothing is changed unless the frame decodes to a known event and passes
    /// the policy checks. Accepted frames are published as received.
    pub async fn dispatch(
        &self,
        sessions: &SessionRegistry,
        router: &TopicRouter,
        id: ConnectionId,
        sink: &OutboundSink,
        raw: &str,
    ) -> Result<Dispatched, DispatchError> {
        let event = ChatMessage::decode(raw).map_err(MalformedEvent::Decode)?;
        let kind = self
            .routes
            .resolve(&event.kind)
            .ok_or_else(|| MalformedEvent::UnknownKind(event.kind.clone()))?;

        let payload: Payload = Arc::from(raw);
        let report = match kind {
            EventKind::AddUser => {
                self.add_user(sessions, router, id, sink, &event, payload)
                    .await?
            }
            EventKind::SendMessage => {
                self.send_message(sessions, router, id, &event, payload)
                    .await?
            }
        };

        Ok(Dispatched { kind, report })
    }

    async fn add_user(
        &self,
        sessions: &SessionRegistry,
        router: &TopicRouter,
        id: ConnectionId,
        sink: &OutboundSink,
        event: &ChatMessage,
        payload: Payload,
    ) -> Result<DeliveryReport, DispatchError> {
        let username = event.sender.trim();
        if username.is_empty() {
            return Err(MalformedEvent::MissingSender.into());
        }

        let outcome = if self.policy.allow_rebind {
            sessions.rebind_username(id, username).await?
        } else {
            sessions.bind_username(id, username).await?
        };

        match outcome {
            BindOutcome::Bound => info!(connection = %id, username, "user joined"),
            BindOutcome::Rebound { previous } => {
                info!(connection = %id, %previous, username, "user renamed")
            }
            BindOutcome::Unchanged => debug!(connection = %id, username, "user re-announced"),
        }

        router.subscribe(&self.topic, id, sink.clone()).await;
        Ok(router.publish(&self.topic, payload).await)
    }

    async fn send_message(
        &self,
        sessions: &SessionRegistry,
        router: &TopicRouter,
        id: ConnectionId,
        event: &ChatMessage,
        payload: Payload,
    ) -> Result<DeliveryReport, DispatchError> {
        let session = sessions
            .lookup(id)
            .await
            .ok_or(RegistryError::UnknownSession(id))?;

        match (session.phase(), session.username()) {
            // Without a bound name there is nothing to check the sender against.
            (Phase::Unidentified, _)
                if self.policy.require_identification || self.policy.enforce_sender =>
            {
                return Err(DispatchError::NotIdentified(id));
            }
            (Phase::Identified, Some(bound))
                if self.policy.enforce_sender && bound != event.sender.trim() =>
            {
                return Err(DispatchError::SenderMismatch {
                    sender: event.sender.clone(),
                    bound: bound.to_string(),
                });
            }
            _ => {}
        }

        Ok(router.publish(&self.topic, payload).await)
    }
}
