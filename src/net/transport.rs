//! Outbound transport interface
//!
//! The scene posts one delta per client per tick and never waits on I/O. The
//! transport reports after the fact which delivery mode each event actually
//! went out with, through the [`DeliveryReceipt`] returned when posting.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::metrics::SceneMetrics;
use crate::net::protocol::{encode, EncodeError, SceneDelta};
use crate::scene::ClientId;

/// Largest payload sent as a datagram; bigger events go over the stream
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// Default outbound queue capacity shared by all clients
const DEFAULT_OUTBOUND_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Stream delivery: arrives, and in order
    ReliableOrdered,
    /// Datagram delivery: may be lost or reordered
    Unreliable,
}

const PENDING: u8 = 0;
const DELIVERED_RELIABLE: u8 = 1;
const DELIVERED_UNRELIABLE: u8 = 2;

/// Shared slot the transport fills in once an event has gone out
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt(Arc<AtomicU8>);

impl DeliveryReceipt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_delivered(&self, mode: DeliveryMode) {
        let value = match mode {
            DeliveryMode::ReliableOrdered => DELIVERED_RELIABLE,
            DeliveryMode::Unreliable => DELIVERED_UNRELIABLE,
        };
        self.0.store(value, Ordering::Release);
    }

    /// Mode the event was delivered with, once known
    pub fn delivered_mode(&self) -> Option<DeliveryMode> {
        match self.0.load(Ordering::Acquire) {
            DELIVERED_RELIABLE => Some(DeliveryMode::ReliableOrdered),
            DELIVERED_UNRELIABLE => Some(DeliveryMode::Unreliable),
            _ => None,
        }
    }

    #[inline]
    pub fn delivered_reliably(&self) -> bool {
        self.delivered_mode() == Some(DeliveryMode::ReliableOrdered)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("transport closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

/// Per-client outbound handle
pub trait ClientTransport: Send + Sync {
    /// Queue a delta for delivery (fire-and-forget)
    fn post_event(
        &self,
        delta: &SceneDelta,
        mode: DeliveryMode,
    ) -> Result<DeliveryReceipt, TransportError>;

    /// Whether unreliable datagrams are available for this client
    fn transmit_datagrams(&self) -> bool;
}

/// An encoded event waiting for the I/O side
#[derive(Debug)]
pub struct OutboundEvent {
    pub client: ClientId,
    pub mode: DeliveryMode,
    pub payload: Vec<u8>,
    pub receipt: DeliveryReceipt,
}

impl OutboundEvent {
    /// Called by the I/O side once the payload has been written
    pub fn delivered(&self) {
        self.receipt.mark_delivered(self.mode);
    }
}

/// Channel-backed transport: encodes on the scene thread and hands events to
/// an I/O task through a bounded crossbeam channel
pub struct ChannelTransport {
    client: ClientId,
    sender: Sender<OutboundEvent>,
    datagrams: AtomicBool,
    metrics: Option<Arc<SceneMetrics>>,
}

impl ChannelTransport {
    pub fn new(client: ClientId, sender: Sender<OutboundEvent>, datagrams: bool) -> Self {
        Self {
            client,
            sender,
            datagrams: AtomicBool::new(datagrams),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SceneMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The session learned whether datagrams work for this client
    pub fn set_datagrams(&self, enabled: bool) {
        self.datagrams.store(enabled, Ordering::Relaxed);
    }
}

impl ClientTransport for ChannelTransport {
    fn post_event(
        &self,
        delta: &SceneDelta,
        mode: DeliveryMode,
    ) -> Result<DeliveryReceipt, TransportError> {
        let payload = encode(delta)?;

        // Oversized events cannot go out as one datagram
        let mode = if mode == DeliveryMode::Unreliable && payload.len() > MAX_DATAGRAM_SIZE {
            debug!(client = %self.client, bytes = payload.len(), "delta too large for datagram, using stream");
            DeliveryMode::ReliableOrdered
        } else {
            mode
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_delta_sent(mode, payload.len());
        }

        let receipt = DeliveryReceipt::new();
        self.sender
            .try_send(OutboundEvent {
                client: self.client,
                mode,
                payload,
                receipt: receipt.clone(),
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Full,
                TrySendError::Disconnected(_) => TransportError::Closed,
            })?;
        Ok(receipt)
    }

    fn transmit_datagrams(&self) -> bool {
        self.datagrams.load(Ordering::Relaxed)
    }
}

/// Outbound queue shared by every client's [`ChannelTransport`]
pub fn outbound_channel() -> (Sender<OutboundEvent>, Receiver<OutboundEvent>) {
    bounded(DEFAULT_OUTBOUND_CAPACITY)
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Records every posted delta; delivery is marked by the test
    pub struct RecordingTransport {
        datagrams: AtomicBool,
        posted: Mutex<Vec<(SceneDelta, DeliveryMode, DeliveryReceipt)>>,
    }

    impl RecordingTransport {
        pub fn new(datagrams: bool) -> Arc<Self> {
            Arc::new(Self {
                datagrams: AtomicBool::new(datagrams),
                posted: Mutex::new(Vec::new()),
            })
        }

        pub fn last(&self) -> Option<SceneDelta> {
            self.posted.lock().last().map(|(delta, _, _)| delta.clone())
        }

        pub fn last_mode(&self) -> Option<DeliveryMode> {
            self.posted.lock().last().map(|(_, mode, _)| *mode)
        }

        pub fn count(&self) -> usize {
            self.posted.lock().len()
        }

        /// Mark the newest event as delivered with the mode it was posted with
        pub fn deliver_last(&self) {
            if let Some((_, mode, receipt)) = self.posted.lock().last() {
                receipt.mark_delivered(*mode);
            }
        }

        /// Mark every event delivered reliably, as a stream fallback would
        pub fn deliver_all_reliably(&self) {
            for (_, _, receipt) in self.posted.lock().iter() {
                receipt.mark_delivered(DeliveryMode::ReliableOrdered);
            }
        }
    }

    impl ClientTransport for RecordingTransport {
        fn post_event(
            &self,
            delta: &SceneDelta,
            mode: DeliveryMode,
        ) -> Result<DeliveryReceipt, TransportError> {
            let receipt = DeliveryReceipt::new();
            self.posted.lock().push((delta.clone(), mode, receipt.clone()));
            Ok(receipt)
        }

        fn transmit_datagrams(&self) -> bool {
            self.datagrams.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn delta(timestamp: u64) -> SceneDelta {
        SceneDelta {
            last_input: 0,
            ping: 0,
            reference: 0,
            timestamp,
            elapsed: 50,
            added: None,
            updated: None,
            removed: None,
            effects: None,
        }
    }

    #[test]
    fn test_receipt_starts_pending() {
        let receipt = DeliveryReceipt::new();
        assert_eq!(receipt.delivered_mode(), None);

        let shared = receipt.clone();
        shared.mark_delivered(DeliveryMode::ReliableOrdered);
        assert!(receipt.delivered_reliably());
    }

    #[test]
    fn test_channel_transport_posts_encoded_event() {
        let (sender, receiver) = outbound_channel();
        let client = Uuid::new_v4();
        let transport = ChannelTransport::new(client, sender, true);

        let receipt = transport
            .post_event(&delta(100), DeliveryMode::Unreliable)
            .unwrap();
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.client, client);
        assert_eq!(event.mode, DeliveryMode::Unreliable);
        assert!(!event.payload.is_empty());

        event.delivered();
        assert_eq!(receipt.delivered_mode(), Some(DeliveryMode::Unreliable));
    }

    #[test]
    fn test_oversized_datagram_falls_back_to_stream() {
        let (sender, receiver) = outbound_channel();
        let transport = ChannelTransport::new(Uuid::new_v4(), sender, true);
        let mut big = delta(100);
        big.added = Some(
            (0..100)
                .map(|id| crate::net::protocol::ActorSnapshot {
                    id,
                    config: "drone".to_string(),
                    ..Default::default()
                })
                .collect(),
        );

        transport.post_event(&big, DeliveryMode::Unreliable).unwrap();
        assert_eq!(receiver.try_recv().unwrap().mode, DeliveryMode::ReliableOrdered);
    }

    #[test]
    fn test_closed_channel() {
        let (sender, receiver) = outbound_channel();
        drop(receiver);
        let transport = ChannelTransport::new(Uuid::new_v4(), sender, false);

        let result = transport.post_event(&delta(1), DeliveryMode::ReliableOrdered);
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn test_full_channel() {
        let (sender, _receiver) = bounded(1);
        let transport = ChannelTransport::new(Uuid::new_v4(), sender, false);

        transport.post_event(&delta(1), DeliveryMode::ReliableOrdered).unwrap();
        let result = transport.post_event(&delta(2), DeliveryMode::ReliableOrdered);
        assert!(matches!(result, Err(TransportError::Full)));
    }

    #[test]
    fn test_datagram_toggle() {
        let (sender, _receiver) = outbound_channel();
        let transport = ChannelTransport::new(Uuid::new_v4(), sender, true);
        transport.set_datagrams(false);
        assert!(!transport.transmit_datagrams());
    }
}
