use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use rtrb::{Producer, PushError};

use crate::TileResponse;

#[derive(Default)]
pub(crate) struct ArrivalHub {
    subscribers: Mutex<Vec<Sender<()>>>,
    pushed: AtomicU64,
}

impl ArrivalHub {
    pub(crate) fn subscribe(&self) -> TileArrivalSubscription {
        let (sender, receiver) = bounded(1);
        self.subscribers
            .lock()
            .expect("arrival subscriber list poisoned")
            .push(sender);
        TileArrivalSubscription { receiver }
    }

    fn notify(&self) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("arrival subscriber list poisoned");
        subscribers.retain(|sender| match sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        });
    }

    pub(crate) fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

/// Network-side handle delivering tiles to the render thread.
///
/// Single producer; keep it on the thread that owns the connection.
pub struct TileResponseSender {
    producer: Producer<TileResponse>,
    hub: Arc<ArrivalHub>,
}

impl TileResponseSender {
    pub(crate) fn new(producer: Producer<TileResponse>, hub: Arc<ArrivalHub>) -> Self {
        Self { producer, hub }
    }

    /// Queues one tile and wakes every subscriber. A full ring hands the
    /// tile back so the caller can retry after the render thread drains.
    pub fn push(&mut self, response: TileResponse) -> Result<(), TileResponse> {
        match self.producer.push(response) {
            Ok(()) => {
                self.hub.pushed.fetch_add(1, Ordering::Relaxed);
                self.hub.notify();
                Ok(())
            }
            Err(PushError::Full(response)) => Err(response),
        }
    }

    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    /// True once the render thread dropped its end of the ring.
    pub fn is_closed(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// Coalesced "new tiles arrived" signal. Carries no tile identity; the
/// receiver re-checks the cache for everything it needs.
pub struct TileArrivalSubscription {
    receiver: Receiver<()>,
}

impl TileArrivalSubscription {
    /// Consumes a pending signal, if any.
    pub fn try_consume(&self) -> bool {
        self.receiver.try_recv().is_ok()
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}
