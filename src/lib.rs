//! # relay-gateway
//!
//! Long-lived WebSocket sessions between remote agents and a central
//! coordinator, with typed event routing, keepalive and reconnection.
//!
//! The same session engine runs on both ends. The coordinator accepts
//! upgrades and tracks live sessions in a registry for broadcast; the
//! agent dials out and rebuilds its session whenever the transport drops.
//!
//! ## Architecture
//!
//! ```text
//! Coordinator (relay-gateway)            Agent (relay-agent)
//!     │                                      │
//!     ├── REST + /ws (api/, ws::handler)     ├── Agent supervisor (agent/)
//!     │                                      │       ├── Connector + RetryPolicy
//!     ├── Registry (ws::registry)            │       └── Producer
//!     │                                      │
//!     └── Session ◀──── WebSocket ────▶ Session (ws::connection)
//!             │                                      │
//!             └── EventRouter (ws::router) ──────────┘
//!                     │
//!                     └── handlers (service/)
//! ```

pub mod agent;
pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod ws;
