//! Service layer: application event handlers for each role.

pub mod agent_events;
pub mod server_events;
