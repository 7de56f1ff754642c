//! Event dispatch
//!
//! Events queued by the read loop are delivered on a separate thread so
//! consumer code can never stall a USB read. Each category has zero or one
//! subscriber; subscribing again replaces the previous one (last write wins).
//!
//! A subscriber or sink that panics is isolated: the panic becomes an error
//! event handed to the error subscriber. A panic in the error subscriber
//! itself is logged and dropped.

use crate::panic_message;
use common::EventReceiver;
use protocol::{Event, EventCategory};
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Name of the dispatch thread
pub const DISPATCH_THREAD: &str = "gc2-dispatch";

/// Subscriber callback for one event category
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Receives every event in its boundary text form
///
/// The payload is the JSON shot record, `"true"`/`"false"`, the error text,
/// or the `{"isReady","ballDetected"}` status record.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, category: EventCategory, payload: &str);
}

impl<F> NotificationSink for F
where
    F: Fn(EventCategory, &str) + Send + Sync,
{
    fn notify(&self, category: EventCategory, payload: &str) {
        self(category, payload)
    }
}

/// Zero-or-one subscriber per event category
#[derive(Default)]
pub struct SubscriberRegistry {
    slots: RwLock<HashMap<EventCategory, Callback>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `category`
    ///
    /// Returns `true` if a previous subscriber was replaced.
    pub fn subscribe(&self, category: EventCategory, callback: Callback) -> bool {
        let replaced = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, callback)
            .is_some();
        if replaced {
            info!("Replaced {} subscriber", category);
        } else {
            debug!("Registered {} subscriber", category);
        }
        replaced
    }

    /// Remove the subscriber for `category`; returns whether one existed
    pub fn unsubscribe(&self, category: EventCategory) -> bool {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&category)
            .is_some()
    }

    pub fn is_subscribed(&self, category: EventCategory) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&category)
    }

    fn get(&self, category: EventCategory) -> Option<Callback> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned()
    }

    /// Deliver one event to its subscriber and the sink
    ///
    /// Callbacks run without any registry lock held, so they may subscribe
    /// or unsubscribe themselves.
    pub fn deliver(&self, event: &Event, sink: Option<&dyn NotificationSink>) {
        let category = event.category();

        if let Some(sink) = sink {
            let payload = event.payload();
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| sink.notify(category, &payload)));
            if let Err(payload) = result {
                let reason = panic_message(payload.as_ref());
                self.report_failure(
                    format!("Notification sink panicked on {} event: {}", category, reason),
                    false,
                );
            }
        }

        match self.get(category) {
            Some(callback) => {
                trace!("Delivering {} event", category);
                let result = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
                if let Err(payload) = result {
                    let reason = panic_message(payload.as_ref());
                    self.report_failure(
                        format!("{} callback panicked: {}", category, reason),
                        category == EventCategory::Error,
                    );
                }
            }
            None => trace!("No {} subscriber, event dropped", category),
        }
    }

    /// Route a consumer failure to the error subscriber
    fn report_failure(&self, message: String, from_error_subscriber: bool) {
        error!("{}", message);
        if from_error_subscriber {
            warn!("Error subscriber failed, not reporting to itself");
            return;
        }

        let Some(callback) = self.get(EventCategory::Error) else {
            return;
        };
        let event = Event::Error(message);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
            error!(
                "Error subscriber panicked while reporting a failure: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

/// Dispatch thread draining the event channel
pub struct EventDispatcher {
    handle: JoinHandle<()>,
}

impl EventDispatcher {
    /// Start the dispatch thread
    ///
    /// The thread runs until every sender is closed and the queue is drained.
    pub fn spawn(
        receiver: EventReceiver,
        registry: Arc<SubscriberRegistry>,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD.to_string())
            .spawn(move || {
                debug!("Dispatcher started");
                let mut delivered: u64 = 0;
                while let Ok(event) = receiver.recv_blocking() {
                    registry.deliver(&event, sink.as_deref());
                    delivered += 1;
                }
                debug!("Dispatcher stopped after {} events", delivered);
            })?;

        Ok(Self { handle })
    }

    /// Wait for the queue to drain and the thread to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Dispatch thread terminated abnormally");
        }
    }
}
