//! Message-port transport layer.
//!
//! Communication between a tab and the worker happens over one duplex
//! [`Port`] per tab. A [`Channel`] binds to a port and layers
//! request/response correlation and notifications on top.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐   Frame {message, ports}   ┌─────────────────────────┐
//! │  tab   │ ◄────────────────────────► │ Channel ── event loop   │
//! │ (port) │                            │  · correlation map      │
//! └────────┘                            │  · request handler      │
//!                                       │  · ping acknowledgement │
//!                                       └─────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `port` | In-process duplex message port with transferables |
//! | `channel` | Request/response + notification layer and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// In-process duplex message port.
pub mod port;

/// Request/response + notification layer over one port.
pub mod channel;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, InboundRequest, Reply, RequestHandler};
pub use port::{Frame, Port};
