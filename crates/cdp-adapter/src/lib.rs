//! CDP endpoint for an embedded script engine's debug agent.
//!
//! The adapter accepts Chrome DevTools Protocol over WebSocket, translates
//! each request into the engine's native debug vocabulary, dispatches it
//! across the engine thread boundary, and converts responses and
//! asynchronous backend events back into CDP. HTTP discovery routes under
//! `/json/...` let clients find the WebSocket.

pub mod bridge;
pub mod config;
pub mod error;
pub mod mapper;
pub mod pending;
pub mod script;
pub mod server;
pub mod value;

/// Identifier of one connected WebSocket client.
pub type ClientId = u64;

pub use bridge::{BackendHandle, BackendMessage, EngineBackend, EventNotifier};
pub use config::AdapterConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use server::{CdpAdapter, PendingProbe};
