//! WebSocket layer: sessions, routing, and the coordinator's registry.
//!
//! The coordinator accepts connections at `/ws`; agents dial the same
//! endpoint. Both ends run the same [`connection::Session`] loops.

pub mod connection;
pub mod frame;
pub mod handler;
pub mod registry;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ReadExit, Role, Session, SessionOutcome, WriteExit};
pub use frame::{CloseReason, Frame, Transport};
pub use registry::{BroadcastStrategy, Registry};
pub use router::EventRouter;
pub use session::{DecodeErrorPolicy, SessionConfig, SessionHandle, SessionState};
