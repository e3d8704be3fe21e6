//! In-process duplex message port.
//!
//! A [`Port`] is one end of a connected pair created by [`Port::pair`].
//! Frames are moved between the ends, never shared: the sending side
//! gives up ownership of the message and any transferable ports riding
//! with it, mirroring a structured-clone-with-transferables transport.
//!
//! Dropping one end closes the pair: the peer's `recv` returns `None`
//! and its sends fail.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::WireMessage;

// ============================================================================
// Frame
// ============================================================================

/// One message in flight on a port, with its transferables.
#[derive(Debug)]
pub struct Frame {
    /// The structured message.
    pub message: WireMessage,
    /// Ports transferred alongside the payload.
    pub ports: Vec<Port>,
}

impl Frame {
    /// Creates a frame with no transferables.
    #[inline]
    #[must_use]
    pub fn new(message: WireMessage) -> Self {
        Self {
            message,
            ports: Vec::new(),
        }
    }

    /// Creates a frame carrying transferable ports.
    #[inline]
    #[must_use]
    pub fn with_ports(message: WireMessage, ports: Vec<Port>) -> Self {
        Self { message, ports }
    }
}

// ============================================================================
// Port
// ============================================================================

/// One end of a duplex message port.
///
/// Not cloneable: a port end has exactly one owner, and transferring it
/// inside a [`Frame`] moves that ownership to the receiver.
pub struct Port {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Port {
    /// Creates a connected pair of ports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }

    /// Sends a frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the peer end was dropped.
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::Disconnected)
    }

    /// Receives the next frame, or `None` once the peer end is dropped
    /// and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Splits the port into an independently cloneable sender and the
    /// receiving half, for use in an event loop.
    #[must_use]
    pub(crate) fn split(self) -> (PortSender, mpsc::UnboundedReceiver<Frame>) {
        (PortSender { tx: self.tx }, self.rx)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("peer_open", &!self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PortSender
// ============================================================================

/// Sending half of a split [`Port`].
#[derive(Clone)]
pub(crate) struct PortSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl PortSender {
    /// Sends a frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the peer end was dropped.
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::Disconnected)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, empty_payload};

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (a, mut b) = Port::pair();

        let message = WireMessage::notification(MessageKind::LogEvent, empty_payload());
        a.send(Frame::new(message)).expect("send");

        let frame = b.recv().await.expect("frame");
        assert_eq!(frame.message.kind, MessageKind::LogEvent);
        assert!(frame.ports.is_empty());
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (a, mut b) = Port::pair();
        drop(a);

        assert!(b.recv().await.is_none());
        let message = WireMessage::notification(MessageKind::LogEvent, empty_payload());
        assert!(b.send(Frame::new(message)).is_err());
    }

    #[tokio::test]
    async fn test_transferred_port_stays_connected() {
        let (a, mut b) = Port::pair();
        let (transferred, mut kept) = Port::pair();

        let message = WireMessage::notification(MessageKind::NotifySyncStatus, empty_payload());
        a.send(Frame::with_ports(message, vec![transferred]))
            .expect("send");

        let frame = b.recv().await.expect("frame");
        let received = frame.ports.into_iter().next().expect("transferred port");

        // The transferred end still reaches the end we kept.
        let message = WireMessage::notification(MessageKind::LogEvent, empty_payload());
        received.send(Frame::new(message)).expect("send over transferred");
        assert!(kept.recv().await.is_some());
    }
}
