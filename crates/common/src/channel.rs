//! Bounded event channel between the read loop and the dispatch thread
//!
//! The read loop must never wait on consumer code, so the sending side only
//! ever uses `try_send`. When the queue is full the event is dropped, logged
//! and counted rather than stalling the next USB read.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace};

/// Default queue depth between worker and dispatcher
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Producer side (read loop, session control)
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queue an event without blocking
    ///
    /// Returns `false` if the event was dropped (queue full or closed).
    pub fn emit(&self, event: Event) -> bool {
        let category = event.category();
        match self.tx.try_send(event) {
            Ok(()) => {
                trace!("Queued {} event", category);
                true
            }
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    "Event queue full, dropped {} event (total dropped: {})",
                    category, total
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Event queue closed, dropped {} event", category);
                false
            }
        }
    }

    /// Events dropped because the queue was full or closed
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel; the receiver drains what is queued and then ends
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side (dispatch thread)
pub struct EventReceiver {
    rx: Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event, blocking the current thread
    pub fn recv_blocking(&self) -> crate::Result<Event> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next event from an async context
    pub async fn recv(&self) -> crate::Result<Event> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of events waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the event channel
///
/// Returns (EventSender for producers, EventReceiver for the dispatcher)
pub fn create_event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_receive_in_order() {
        let (tx, rx) = create_event_channel(8);
        assert!(tx.emit(Event::Connection(true)));
        assert!(tx.emit(Event::error("boom")));

        assert_eq!(rx.recv_blocking().unwrap(), Event::Connection(true));
        assert_eq!(rx.recv_blocking().unwrap(), Event::Error("boom".into()));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, rx) = create_event_channel(2);
        assert!(tx.emit(Event::Connection(true)));
        assert!(tx.emit(Event::Connection(false)));
        assert!(!tx.emit(Event::error("overflow")));

        assert_eq!(tx.dropped_events(), 1);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let (tx, rx) = create_event_channel(4);
        tx.emit(Event::Connection(true));
        tx.close();

        assert!(!tx.emit(Event::Connection(false)));
        assert_eq!(rx.recv_blocking().unwrap(), Event::Connection(true));
        assert!(rx.recv_blocking().is_err());
    }

    #[tokio::test]
    async fn test_async_receive_from_worker_thread() {
        let (tx, rx) = create_event_channel(4);

        let handle = std::thread::spawn(move || tx.emit(Event::error("from worker")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, Event::Error("from worker".into()));
        assert!(handle.join().unwrap());
    }
}
