//! Session registry: which connections are live and who they claim to be.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::RwLock;

/// Identifies one accepted connection for as long as it stays open.
///
/// Ids come from a process-wide counter and are never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unidentified,
    Identified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: ConnectionId,
    username: Option<String>,
}

impl Session {
    fn new(id: ConnectionId) -> Self {
        Self { id, username: None }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn phase(&self) -> Phase {
        match self.username {
            Some(_) => Phase::Identified,
            None => Phase::Unidentified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The session had no username before.
    Bound,
    /// The session already carried this exact username.
    Unchanged,
    /// A different username was overwritten.
    Rebound { previous: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("no live session for connection {0}")]
    UnknownSession(ConnectionId),
    #[error("connection {id} is already identified as '{current}'")]
    AlreadyIdentified { id: ConnectionId, current: String },
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Hands out a fresh connection id. Ids are not reused.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn register(&self, id: ConnectionId) -> Result<Session, RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id));
        }

        let session = Session::new(id);
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Binds `username` to an unidentified session.
    ///
    /// Repeating the bound name is a no-op; a different name is refused.
    pub async fn bind_username(
        &self,
        id: ConnectionId,
        username: &str,
    ) -> Result<BindOutcome, RegistryError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;

        match session.username.as_deref() {
            None => {
                session.username = Some(username.to_string());
                Ok(BindOutcome::Bound)
            }
            Some(current) if current == username => Ok(BindOutcome::Unchanged),
            Some(current) => Err(RegistryError::AlreadyIdentified {
                id,
                current: current.to_string(),
            }),
        }
    }

    /// Binds `username`, overwriting whatever name the session had.
    pub async fn rebind_username(
        &self,
        id: ConnectionId,
        username: &str,
    ) -> Result<BindOutcome, RegistryError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;

        let outcome = match session.username.replace(username.to_string()) {
            None => BindOutcome::Bound,
            Some(previous) if previous == username => BindOutcome::Unchanged,
            Some(previous) => BindOutcome::Rebound { previous },
        };
        Ok(outcome)
    }

    pub async fn lookup(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Drops the session. Callers unsubscribe the connection from its topics
    /// first; [`crate::relay::Relay::disconnect`] does both in that order.
    pub async fn remove(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Bound usernames in sorted order.
    pub async fn usernames(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut names: Vec<String> = sessions
            .values()
            .filter_map(|session| session.username.clone())
            .collect();
        names.sort();
        names
    }
}
