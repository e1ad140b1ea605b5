// SPDX-License-Identifier: MIT OR Apache-2.0
//! The opaque transport seam.
//!
//! Link-layer concerns (discovery, pairing, Bluetooth / Wi-Fi-Direct /
//! TCP) live outside this crate; a transport only has to move whole
//! [`SyncMessage`] values in order, and is assumed to be authenticated —
//! the peer's key in [`courier_policy::PeerContext`] is the transport's
//! claim.

use crate::{SyncError, SyncMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An established, authenticated point-to-point message channel.
#[async_trait]
pub trait SyncTransport: Send {
    /// Deliver one message to the peer.
    async fn send(&mut self, msg: SyncMessage) -> Result<(), SyncError>;

    /// Wait for the peer's next message. [`SyncError::Closed`] signals a
    /// clean end of the channel.
    async fn recv(&mut self) -> Result<SyncMessage, SyncError>;
}

/// In-process duplex transport over a pair of bounded channels. Used by
/// tests and by co-located nodes.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<SyncMessage>,
    rx: mpsc::Receiver<SyncMessage>,
}

impl ChannelTransport {
    /// Two connected endpoints with `capacity` messages of buffering each
    /// way.
    #[must_use]
    pub fn pair(capacity: usize) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            ChannelTransport { tx: a_tx, rx: a_rx },
            ChannelTransport { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl SyncTransport for ChannelTransport {
    async fn send(&mut self, msg: SyncMessage) -> Result<(), SyncError> {
        self.tx.send(msg).await.map_err(|_| SyncError::Closed)
    }

    async fn recv(&mut self) -> Result<SyncMessage, SyncError> {
        self.rx.recv().await.ok_or(SyncError::Closed)
    }
}
