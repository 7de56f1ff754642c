//! Consumer-facing driver
//!
//! [`Gc2Driver`] owns one session, the event channel and the dispatch thread.
//! It is created by [`Gc2Driver::initialize`] and destroyed by
//! [`Gc2Driver::shutdown`] (or drop), which disconnects, drains queued events
//! to the subscribers and joins the dispatcher.

use crate::dispatcher::{Callback, EventDispatcher, NotificationSink, SubscriberRegistry};
use crate::session::Session;
use crate::usb::{RusbTransport, UsbTransport};
use common::{DEFAULT_EVENT_CAPACITY, Error, EventSender, Result, create_event_channel};
use protocol::{ConnectionState, DeviceIdentity, DeviceStatus, Event, EventCategory, ShotData};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Library-side tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Depth of the read loop -> dispatcher queue
    pub event_queue_capacity: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// GC2 launch monitor driver
pub struct Gc2Driver<T: UsbTransport = RusbTransport> {
    session: Session<T>,
    registry: Arc<SubscriberRegistry>,
    events: EventSender,
    dispatcher: Option<EventDispatcher>,
}

impl Gc2Driver<RusbTransport> {
    /// Create a driver on the system USB bus
    pub fn initialize(sink: Option<Arc<dyn NotificationSink>>) -> Result<Self> {
        Self::initialize_with(sink, DriverOptions::default())
    }

    pub fn initialize_with(
        sink: Option<Arc<dyn NotificationSink>>,
        options: DriverOptions,
    ) -> Result<Self> {
        let transport = RusbTransport::new()
            .map_err(|e| Error::Usb(format!("Failed to create USB context: {}", e)))?;
        Self::with_transport(transport, sink, options)
    }
}

impl<T: UsbTransport> Gc2Driver<T> {
    /// Create a driver over any transport
    pub fn with_transport(
        transport: T,
        sink: Option<Arc<dyn NotificationSink>>,
        options: DriverOptions,
    ) -> Result<Self> {
        let (events, receiver) = create_event_channel(options.event_queue_capacity);
        let registry = Arc::new(SubscriberRegistry::new());
        let dispatcher = EventDispatcher::spawn(receiver, Arc::clone(&registry), sink)?;

        info!(
            "GC2 driver initialized (event queue capacity {})",
            options.event_queue_capacity
        );

        Ok(Self {
            session: Session::new(transport, events.clone()),
            registry,
            events,
            dispatcher: Some(dispatcher),
        })
    }

    /// Whether a GC2 is on the bus; never opens it
    pub fn is_device_available(&self) -> bool {
        self.session.is_device_available()
    }

    /// Open the device and start streaming events
    pub fn connect(&self) -> bool {
        self.session.connect()
    }

    /// Stop streaming and close the device; no-op when not connected
    pub fn disconnect(&self) {
        self.session.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn device_serial(&self) -> Option<String> {
        self.session.serial()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.session.firmware_version()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.session.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn read_loop_active(&self) -> bool {
        self.session.read_loop_active()
    }

    /// Events lost to a full queue since initialization
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped_events()
    }

    /// Register the subscriber for `category`, replacing any previous one
    ///
    /// Returns `true` if a subscriber was replaced.
    pub fn subscribe<F>(&self, category: EventCategory, callback: F) -> bool
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.registry.subscribe(category, callback)
    }

    pub fn unsubscribe(&self, category: EventCategory) -> bool {
        self.registry.unsubscribe(category)
    }

    pub fn on_shot<F>(&self, callback: F) -> bool
    where
        F: Fn(&ShotData) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Shot, move |event| {
            if let Event::Shot(shot) = event {
                callback(shot);
            }
        })
    }

    pub fn on_connection<F>(&self, callback: F) -> bool
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Connection, move |event| {
            if let Event::Connection(connected) = event {
                callback(*connected);
            }
        })
    }

    pub fn on_error<F>(&self, callback: F) -> bool
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::Error, move |event| {
            if let Event::Error(message) = event {
                callback(message);
            }
        })
    }

    pub fn on_device_status<F>(&self, callback: F) -> bool
    where
        F: Fn(&DeviceStatus) + Send + Sync + 'static,
    {
        self.subscribe(EventCategory::DeviceStatus, move |event| {
            if let Event::DeviceStatus(status) = event {
                callback(status);
            }
        })
    }

    /// Disconnect, deliver what is still queued and stop the dispatcher
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        debug!("Shutting down GC2 driver");
        self.session.disconnect();
        self.events.close();
        dispatcher.join();

        let dropped = self.events.dropped_events();
        if dropped > 0 {
            info!("GC2 driver shut down ({} events dropped)", dropped);
        } else {
            info!("GC2 driver shut down");
        }
    }
}

impl<T: UsbTransport> Drop for Gc2Driver<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
