//! Handshake-gated message bridge between the host and the sandboxed renderer.

pub mod controller;
pub mod messages;
pub mod session;

pub use controller::{Bridge, BridgeCollaborators, BridgeOptions};
pub use messages::{InboundEvent, LoadSource, OutboundCommand};
pub use session::{BridgeState, RenderSession, Selection};
