//! Session state machine
//!
//! ```text
//! Disconnected | Failed --connect()--> Connecting
//! Connecting --open ok--> Connected          (identity queried, read loop started)
//! Connecting --open failed--> Disconnected   (error event)
//! Connected --disconnect() | fatal read--> Disconnecting --link closed--> Disconnected
//! Connected --read loop panic--> Disconnecting --link closed--> Failed(reason)
//! ```
//!
//! Connection and identity live behind one lock shared with the read loop.
//! Whoever moves the state out of `Connected` first (consumer disconnect or
//! worker failure) owns the teardown and emits the single `false` event.

use crate::usb::{DeviceLink, UsbTransport};
use crate::worker::{self, ReadLoop};
use common::EventSender;
use protocol::{ConnectionState, DeviceIdentity, Event};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct SessionInner {
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
}

/// State shared between the consumer-facing session and its read loop
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    inner: RwLock<SessionInner>,
    worker_alive: AtomicBool,
}

impl SessionShared {
    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.read().state.clone()
    }

    pub(crate) fn identity(&self) -> Option<DeviceIdentity> {
        self.read().identity.clone()
    }

    fn transition(inner: &mut SessionInner, next: ConnectionState) {
        if inner.state != next {
            info!("Session {} -> {}", inner.state, next);
            inner.state = next;
        }
    }

    fn set_state(&self, next: ConnectionState) {
        Self::transition(&mut self.write(), next);
    }

    pub(crate) fn set_connected(&self, identity: DeviceIdentity) {
        let mut inner = self.write();
        inner.identity = Some(identity);
        Self::transition(&mut inner, ConnectionState::Connected);
    }

    /// Move `Connected` to `Disconnecting`
    ///
    /// Returns `true` for the single caller that wins the transition.
    pub(crate) fn begin_teardown(&self) -> bool {
        let mut inner = self.write();
        if inner.state.is_connected() {
            Self::transition(&mut inner, ConnectionState::Disconnecting);
            true
        } else {
            false
        }
    }

    /// Settle a teardown into `Disconnected`, invalidating the identity
    pub(crate) fn finish_teardown(&self) {
        let mut inner = self.write();
        inner.identity = None;
        Self::transition(&mut inner, ConnectionState::Disconnected);
    }

    /// Settle a teardown into `Failed(reason)`
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let mut inner = self.write();
        inner.identity = None;
        Self::transition(&mut inner, ConnectionState::Failed(reason.into()));
    }

    pub(crate) fn set_worker_alive(&self, alive: bool) {
        self.worker_alive.store(alive, Ordering::Release);
    }

    pub(crate) fn worker_alive(&self) -> bool {
        self.worker_alive.load(Ordering::Acquire)
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct Control {
    worker: Option<Worker>,
}

/// One device session over a transport
///
/// `connect` and `disconnect` are serialized against each other; queries
/// never wait on them beyond a short state lock.
pub struct Session<T: UsbTransport> {
    transport: T,
    shared: Arc<SessionShared>,
    events: EventSender,
    control: Mutex<Control>,
}

impl<T: UsbTransport> Session<T> {
    pub fn new(transport: T, events: EventSender) -> Self {
        Self {
            transport,
            shared: Arc::new(SessionShared::default()),
            events,
            control: Mutex::new(Control::default()),
        }
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a read loop that already left `Connected` on its own
    fn reap(&self, control: &mut Control) {
        if self.shared.state().is_connected() {
            return;
        }
        if let Some(worker) = control.worker.take() {
            debug!("Reaping finished read loop");
            if worker.handle.join().is_err() {
                error!("Read loop thread terminated abnormally");
            }
        }
    }

    /// Whether a GC2 is on the bus
    pub fn is_device_available(&self) -> bool {
        self.transport.is_device_available()
    }

    /// Open the device and start the read loop
    ///
    /// Returns `true` if the session is connected afterwards. Calling it while
    /// already connected is a no-op returning `true`.
    pub fn connect(&self) -> bool {
        let mut control = self.lock_control();
        self.reap(&mut control);

        let state = self.shared.state();
        if state.is_connected() {
            debug!("connect() while already connected");
            return true;
        }
        if !state.accepts_connect() {
            warn!("connect() rejected in state {}", state);
            return false;
        }

        self.shared.set_state(ConnectionState::Connecting);

        let mut link = match self.transport.open() {
            Ok(link) => link,
            Err(e) => {
                warn!("Failed to open GC2: {}", e);
                self.shared.set_state(ConnectionState::Disconnected);
                self.events.emit(Event::error(format!("Failed to open GC2: {}", e)));
                return false;
            }
        };

        let identity = link.query_identity();
        info!(
            "Connected to GC2 (serial: {}, firmware: {})",
            identity.serial.as_deref().unwrap_or("unknown"),
            identity.firmware_version.as_deref().unwrap_or("unknown")
        );
        self.shared.set_connected(identity);
        self.events.emit(Event::Connection(true));

        let cancel = Arc::new(AtomicBool::new(false));
        let read_loop = ReadLoop::new(
            link,
            self.events.clone(),
            Arc::clone(&self.shared),
            Arc::clone(&cancel),
        );

        match worker::spawn(read_loop) {
            Ok(handle) => {
                control.worker = Some(Worker { handle, cancel });
                true
            }
            Err(e) => {
                // The link was dropped with the unspawned closure
                error!("Failed to spawn read loop: {}", e);
                if self.shared.begin_teardown() {
                    self.shared.finish_teardown();
                    self.events
                        .emit(Event::error(format!("Failed to start read loop: {}", e)));
                    self.events.emit(Event::Connection(false));
                }
                false
            }
        }
    }

    /// Stop the read loop and close the device
    ///
    /// Blocks for at most one read timeout while the current read returns.
    /// A no-op without a live session.
    pub fn disconnect(&self) {
        let mut control = self.lock_control();
        let Some(worker) = control.worker.take() else {
            debug!("disconnect() with no active session");
            return;
        };

        let owns = self.shared.begin_teardown();
        worker.cancel.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            error!("Read loop thread terminated abnormally");
        }

        if owns {
            self.shared.finish_teardown();
            self.events.emit(Event::Connection(false));
            info!("Disconnected from GC2");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Identity of the connected device, `None` when disconnected
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.shared.identity()
    }

    pub fn serial(&self) -> Option<String> {
        self.shared.identity().and_then(|id| id.serial)
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.shared.identity().and_then(|id| id.firmware_version)
    }

    /// Whether the read loop thread is running
    pub fn read_loop_active(&self) -> bool {
        self.shared.worker_alive()
    }
}

impl<T: UsbTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
