//! Topic-scoped fan-out of events to long-lived client connections.
//!
//! Producers submit events through [`Hub::broadcast`]; a fixed worker pool
//! delivers each one into the bounded outbound queue of every connection whose
//! topic matches. Every connection is driven by its own agent, which writes
//! the queue to the wire and watches the peer for disconnects. Connections
//! that stop draining their queue are evicted instead of stalling delivery.

pub mod agent;
pub mod config;
pub mod error;
pub mod filter;
pub mod hub;
mod pool;
pub mod registry;

pub use agent::{Frame, Inbound};
pub use config::HubConfig;
pub use error::HubError;
pub use hub::{Hub, NullWelcome, WelcomeHook};
pub use hub_api::{Event, Topic};
pub use registry::{ConnectionId, LeaveReason};
