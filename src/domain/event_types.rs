//! Known event type tags and the payloads of the built-in `test` event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Round-trip test message, broadcast back by the coordinator.
pub const TEST: &str = "test";

/// Agent → coordinator: every Jenkins job the agent manages.
pub const JENKINS_JOB_MAP: &str = "JenkinsJobMap";

/// Agent → coordinator: outcome of a finished build.
pub const BUILD_RESULT: &str = "BuildResult";

/// Agent → coordinator: a build has started.
pub const BUILD_START: &str = "BuildStart";

/// Coordinator → agent: approval event for a pending build.
pub const BUILD_EVENT: &str = "BuildEvent";

/// Payload of a `test` event sent by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    /// Free text.
    pub message: String,
    /// Sender label (the agent's environment).
    pub from: String,
}

/// `test` payload stamped with the time the coordinator sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedTestMessage {
    /// Message body and original sender.
    #[serde(flatten)]
    pub inner: TestMessage,
    /// Send timestamp.
    pub sent: DateTime<Utc>,
}
