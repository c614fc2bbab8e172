//! Coordinator-side set of live sessions with broadcast fan-out.
//!
//! [`Registry`] keeps every open [`SessionHandle`] behind one
//! [`tokio::sync::Mutex`]. Membership changes and broadcasts all take that
//! lock, so a broadcast sees a single consistent membership and a session
//! is removed (and closed) at most once.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use tokio::sync::Mutex;

use super::frame::Frame;
use super::session::SessionHandle;
use crate::domain::{Envelope, SessionId};
use crate::error::RelayError;

/// How [`Registry::broadcast`] iterates the membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastStrategy {
    /// Hold the lock for the whole fan-out. Connects and disconnects wait
    /// until the broadcast is done.
    #[default]
    Locked,
    /// Copy the membership under the lock and fan out after releasing it.
    Snapshot,
}

impl FromStr for BroadcastStrategy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "locked" => Ok(Self::Locked),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(RelayError::Config(format!(
                "unknown broadcast strategy: {other}"
            ))),
        }
    }
}

/// Public view of one registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Identity header supplied by the peer.
    pub identity: String,
    /// Peer socket address, when known.
    pub remote_addr: Option<String>,
}

/// Thread-safe membership of live sessions.
#[derive(Debug, Default)]
pub struct Registry {
    members: Mutex<HashMap<SessionId, SessionHandle>>,
    strategy: BroadcastStrategy,
}

impl Registry {
    /// Creates an empty registry using [`BroadcastStrategy::Locked`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry with the given broadcast strategy.
    #[must_use]
    pub fn with_strategy(strategy: BroadcastStrategy) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            strategy,
        }
    }

    /// Adds a session. Adding the same session twice is a no-op.
    pub async fn add(&self, session: SessionHandle) {
        let mut members = self.members.lock().await;
        tracing::info!(
            session_id = %session.id(),
            identity = session.identity(),
            remote_addr = ?session.remote_addr(),
            "new connection"
        );
        members.insert(session.id(), session);
    }

    /// Closes and removes a session.
    ///
    /// Returns `false` without touching the session if it is not a member,
    /// so racing callers close it exactly once.
    pub async fn remove(&self, session: &SessionHandle) -> bool {
        let mut members = self.members.lock().await;
        if !members.contains_key(&session.id()) {
            return false;
        }
        session.close();
        members.remove(&session.id());
        tracing::info!(
            session_id = %session.id(),
            remote_addr = ?session.remote_addr(),
            "remove connection"
        );
        true
    }

    /// Encodes `envelope` once and enqueues it on every member.
    ///
    /// Returns the number of sessions that accepted the frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if the envelope cannot be encoded.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<usize, RelayError> {
        let text = envelope.encode()?;
        Ok(self.broadcast_frame(&Frame::Text(text)).await)
    }

    /// Enqueues a copy of `frame` on every member.
    pub async fn broadcast_frame(&self, frame: &Frame) -> usize {
        match self.strategy {
            BroadcastStrategy::Locked => {
                let members = self.members.lock().await;
                fan_out(members.values(), frame)
            }
            BroadcastStrategy::Snapshot => {
                let snapshot = self.members.lock().await.clone();
                fan_out(snapshot.values(), frame)
            }
        }
    }

    /// Returns `true` if the session is currently registered.
    pub async fn contains(&self, id: SessionId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Returns `true` if no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    /// Lists registered sessions.
    pub async fn members(&self) -> Vec<SessionInfo> {
        let members = self.members.lock().await;
        members
            .values()
            .map(|s| SessionInfo {
                id: s.id(),
                identity: s.identity().to_owned(),
                remote_addr: s.remote_addr().map(|a| a.to_string()),
            })
            .collect()
    }
}

fn fan_out<'a>(members: impl Iterator<Item = &'a SessionHandle>, frame: &Frame) -> usize {
    members.filter(|session| session.send(frame.clone())).count()
}
