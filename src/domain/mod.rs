//! Domain layer: the wire envelope, known event types, session identity.

pub mod envelope;
pub mod event_types;
pub mod session_id;

pub use envelope::Envelope;
pub use session_id::SessionId;
