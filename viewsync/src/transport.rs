//! Broadcast transport scoped to a sync group.
//!
//! ```text
//!  SyncController A ──┐                      ┌──► Subscription (A)
//!  SyncController B ──┼──► BusChannel("g1") ─┼──► Subscription (B)
//!  SyncController C ──┘    tokio broadcast   └──► Subscription (C)
//! ```
//!
//! [`BroadcastBus`] is the in-process stand-in for a same-device cross-tab
//! broadcast primitive: one tokio broadcast channel per group, created on
//! first use. Every subscriber sees every frame, its own included;
//! filtering is the receiver's job. A lagging subscriber loses the frames
//! it fell behind on (at-most-once), and nothing is replayed to
//! subscribers that join later.
//!
//! [`NullTransport`] models a host without the primitive: sends succeed,
//! nothing ever arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::protocol::SyncMessage;

/// One encoded message as it travels on the bus.
pub type Frame = Arc<Vec<u8>>;

/// Pub/sub primitive the controller talks to.
pub trait TransportChannel: Send + Sync {
    /// Deliver to every live subscriber of this group.
    fn broadcast(&self, message: &SyncMessage) -> Result<(), TransportError>;

    /// Open a new subscription, or `None` if this transport cannot receive.
    fn subscribe(&self) -> Option<Subscription>;

    /// Release the channel. Later broadcasts fail with `Closed`.
    fn close(&self);

    /// `false` when the host lacks a transport and the engine runs standalone.
    fn is_available(&self) -> bool {
        true
    }
}

/// Receiving end of a transport.
pub struct Subscription {
    rx: broadcast::Receiver<Frame>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<Frame>) -> Self {
        Self { rx }
    }

    /// Next frame, skipping over anything lost to lag. `None` once the
    /// channel is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Subscription lagged, {skipped} frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Counters for monitoring a bus channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub subscribers: usize,
}

/// A group-scoped channel on a [`BroadcastBus`].
pub struct BusChannel {
    group_id: String,
    sender: broadcast::Sender<Frame>,
    closed: AtomicBool,
    frames_sent: AtomicU64,
}

impl BusChannel {
    fn new(group_id: String, sender: broadcast::Sender<Frame>) -> Self {
        Self {
            group_id,
            sender,
            closed: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Push an already-encoded frame.
    pub fn broadcast_raw(&self, frame: Frame) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // No receivers is not an error: nobody else is around yet.
        let delivered = self.sender.send(frame).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(delivered)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

impl TransportChannel for BusChannel {
    fn broadcast(&self, message: &SyncMessage) -> Result<(), TransportError> {
        let frame = Arc::new(message.encode()?);
        self.broadcast_raw(frame).map(|_| ())
    }

    fn subscribe(&self) -> Option<Subscription> {
        if self.is_closed() {
            return None;
        }
        Some(Subscription::new(self.sender.subscribe()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// In-process hub handing out one broadcast channel per group.
///
/// Cheap to clone; clones share the same groups.
#[derive(Clone)]
pub struct BroadcastBus {
    groups: Arc<RwLock<HashMap<String, broadcast::Sender<Frame>>>>,
    capacity: usize,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastBus {
    /// `capacity` frames are buffered per subscriber before it starts lagging.
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// A fresh channel handle for `group_id`. Handles are independent:
    /// closing one leaves the others working.
    pub fn channel(&self, group_id: &str) -> Arc<BusChannel> {
        // Fast path: read lock
        if let Some(sender) = read(&self.groups).get(group_id) {
            return Arc::new(BusChannel::new(group_id.to_string(), sender.clone()));
        }

        let mut groups = write(&self.groups);
        let sender = groups
            .entry(group_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        Arc::new(BusChannel::new(group_id.to_string(), sender))
    }

    pub fn group_count(&self) -> usize {
        read(&self.groups).len()
    }

    pub fn subscriber_count(&self, group_id: &str) -> usize {
        read(&self.groups)
            .get(group_id)
            .map_or(0, |s| s.receiver_count())
    }

    /// Forget groups nobody is subscribed to. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let mut groups = write(&self.groups);
        let before = groups.len();
        groups.retain(|_, sender| sender.receiver_count() > 0);
        before - groups.len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport for hosts without a broadcast primitive.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl TransportChannel for NullTransport {
    fn broadcast(&self, _message: &SyncMessage) -> Result<(), TransportError> {
        Ok(())
    }

    fn subscribe(&self) -> Option<Subscription> {
        None
    }

    fn close(&self) {}

    fn is_available(&self) -> bool {
        false
    }
}
