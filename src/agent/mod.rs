//! Client role: dialing, reconnect supervision and synthetic traffic.

pub mod connector;
pub mod producer;
pub mod retry;
pub mod supervisor;

pub use connector::{Connector, WsConnector};
pub use producer::{Producer, TestMessageProducer};
pub use retry::{RetryPolicy, RetryState};
pub use supervisor::Agent;
