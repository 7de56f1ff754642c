//! Test utilities for the GC2 driver
//!
//! [`MockTransport`] stands in for the USB bus: availability, the outcome of
//! `open`, the reported identity and the sequence of reads are all scripted.
//! An empty read queue behaves like an idle device: the read waits out its
//! timeout and returns `Timeout`.
//!
//! # Example
//!
//! ```
//! use device::test_utils::{EventRecorder, MockTransport};
//! use device::{DriverOptions, Gc2Driver};
//! use std::time::Duration;
//!
//! let transport = MockTransport::new();
//! transport.queue_frame(b"0M\nFLAGS=7\nBALLS=1\n\t");
//!
//! let driver = Gc2Driver::with_transport(transport, None, DriverOptions::default()).unwrap();
//! let recorder = EventRecorder::attach(&driver);
//! assert!(driver.connect());
//! assert!(recorder.wait_for_count(2, Duration::from_secs(2)));
//! driver.shutdown();
//! ```

use crate::driver::Gc2Driver;
use crate::usb::{DeviceLink, TransportError, UsbTransport};
use protocol::{
    DeviceIdentity, Event, EventCategory, FrameKind, RawPacket, encode_frame, split_packets,
};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default wait used by tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One scripted read outcome
#[derive(Debug, Clone)]
pub enum MockRead {
    Packet(RawPacket),
    Timeout,
    IoError(String),
    /// Panic inside `read_packet`
    Panic(String),
}

struct MockState {
    available: bool,
    open_error: Option<TransportError>,
    identity: DeviceIdentity,
    reads: VecDeque<MockRead>,
}

struct MockShared {
    state: Mutex<MockState>,
    reads_ready: Condvar,
    link_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MockShared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scriptable transport
///
/// Clones share the same script, so a test can keep a handle after moving
/// the transport into a driver.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// A present GC2 reporting serial `GC2-12345` and firmware `1.2.0`
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                state: Mutex::new(MockState {
                    available: true,
                    open_error: None,
                    identity: DeviceIdentity::with_strings(
                        Some("GC2-12345".to_string()),
                        Some("1.2.0".to_string()),
                    ),
                    reads: VecDeque::new(),
                }),
                reads_ready: Condvar::new(),
                link_open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// No device on the bus
    pub fn absent() -> Self {
        let transport = Self::new();
        transport.set_available(false);
        transport
    }

    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
    }

    /// Make subsequent `open` calls fail with `error`
    pub fn fail_open_with(&self, error: Option<TransportError>) {
        self.shared.lock().open_error = error;
    }

    pub fn set_identity(&self, identity: DeviceIdentity) {
        self.shared.lock().identity = identity;
    }

    fn push(&self, read: MockRead) {
        self.shared.lock().reads.push_back(read);
        self.shared.reads_ready.notify_all();
    }

    pub fn queue_packet(&self, bytes: &[u8]) {
        self.push(MockRead::Packet(RawPacket::from_slice(bytes)));
    }

    /// Queue a complete frame as consecutive packets
    pub fn queue_frame(&self, frame: &[u8]) {
        let packets = split_packets(frame);
        let mut state = self.shared.lock();
        state
            .reads
            .extend(packets.into_iter().map(MockRead::Packet));
        drop(state);
        self.shared.reads_ready.notify_all();
    }

    pub fn queue_timeout(&self) {
        self.push(MockRead::Timeout);
    }

    pub fn queue_io_error(&self, message: &str) {
        self.push(MockRead::IoError(message.to_string()));
    }

    pub fn queue_panic(&self, message: &str) {
        self.push(MockRead::Panic(message.to_string()));
    }

    /// Reads still waiting to be consumed
    pub fn pending_reads(&self) -> usize {
        self.shared.lock().reads.len()
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn is_link_open(&self) -> bool {
        self.shared.link_open.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    type Link = MockLink;

    fn is_device_available(&self) -> bool {
        self.shared.lock().available
    }

    fn open(&self) -> Result<MockLink, TransportError> {
        let (available, open_error, identity) = {
            let state = self.shared.lock();
            (
                state.available,
                state.open_error.clone(),
                state.identity.clone(),
            )
        };

        if !available {
            return Err(TransportError::NotFound);
        }
        if let Some(error) = open_error {
            return Err(error);
        }
        if self.shared.link_open.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpen);
        }

        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockLink {
            shared: Arc::clone(&self.shared),
            identity,
            open: true,
        })
    }
}

/// Link handed out by [`MockTransport`]
pub struct MockLink {
    shared: Arc<MockShared>,
    identity: DeviceIdentity,
    open: bool,
}

impl DeviceLink for MockLink {
    fn read_packet(&mut self, timeout: Duration) -> Result<RawPacket, TransportError> {
        if !self.open {
            return Err(TransportError::Io("link is closed".to_string()));
        }

        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .reads_ready
            .wait_timeout_while(state, timeout, |s| s.reads.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let next = state.reads.pop_front();
        drop(state);

        match next {
            Some(MockRead::Packet(packet)) => Ok(packet),
            Some(MockRead::Timeout) | None => Err(TransportError::Timeout),
            Some(MockRead::IoError(message)) => Err(TransportError::Io(message)),
            Some(MockRead::Panic(message)) => panic!("{}", message),
        }
    }

    fn query_identity(&mut self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.shared.link_open.store(false, Ordering::SeqCst);
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Records every event a driver dispatches
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<(Mutex<Vec<Event>>, Condvar)>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every category of `driver`
    pub fn attach<T: UsbTransport>(driver: &Gc2Driver<T>) -> Self {
        let recorder = Self::new();
        for category in EventCategory::ALL {
            let sink = recorder.clone();
            driver.subscribe(category, move |event| sink.record(event.clone()));
        }
        recorder
    }

    pub fn record(&self, event: Event) {
        let (events, changed) = &*self.events;
        events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        changed.notify_all();
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded events of one category
    pub fn of(&self, category: EventCategory) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.category() == category)
            .collect()
    }

    /// Wait until `predicate` holds for the recorded events
    ///
    /// Returns `false` if `timeout` elapses first.
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let (events, changed) = &*self.events;
        let mut guard = events.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if predicate(guard.as_slice()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait until at least `count` events were recorded
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| events.len() >= count)
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Shot fields in the shape the GC2 reports them
///
/// `final_reading` adds the `BACK_RPM`/`SIDE_RPM` pair that only the second
/// reading of a shot carries.
pub fn random_shot_fields(
    rng: &mut impl Rng,
    shot_id: u32,
    final_reading: bool,
) -> Vec<(String, String)> {
    let speed: f64 = rng.random_range(85.0..175.0);
    let back: f64 = rng.random_range(2000.0..10800.0);
    let side: f64 = rng.random_range(-500.0..500.0);

    let mut fields = vec![
        ("SHOT_ID".to_string(), shot_id.to_string()),
        ("TIME_SEC".to_string(), "0".to_string()),
        (
            "MSEC_SINCE_CONTACT".to_string(),
            if final_reading { "1000" } else { "200" }.to_string(),
        ),
        ("SPEED_MPH".to_string(), format!("{:.2}", speed)),
        (
            "AZIMUTH_DEG".to_string(),
            format!("{:.2}", rng.random_range(-3.0f64..3.0)),
        ),
        (
            "ELEVATION_DEG".to_string(),
            format!("{:.2}", rng.random_range(9.0f64..38.0)),
        ),
        ("SPIN_RPM".to_string(), format!("{:.0}", back.hypot(side))),
    ];
    if final_reading {
        fields.push(("BACK_RPM".to_string(), format!("{:.0}", back)));
        fields.push(("SIDE_RPM".to_string(), format!("{:.0}", side)));
    }
    fields.push(("IS_LEFT".to_string(), "0".to_string()));
    fields.push(("HMT".to_string(), "0".to_string()));
    fields
}

/// Encode shot fields as a device frame
pub fn shot_frame(fields: &[(String, String)]) -> Vec<u8> {
    let borrowed: Vec<(&str, &str)> = fields
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    encode_frame(FrameKind::Shot, &borrowed)
}

/// Encode a device status frame
pub fn status_frame(ready: bool, ball: Option<(u32, u32, u32)>) -> Vec<u8> {
    let flags = if ready { "7" } else { "1" };
    match ball {
        Some((x, y, r)) => {
            let position = format!("{},{},{}", x, y, r);
            encode_frame(
                FrameKind::DeviceStatus,
                &[("FLAGS", flags), ("BALLS", "1"), ("BALL1", &position)],
            )
        }
        None => encode_frame(FrameKind::DeviceStatus, &[("FLAGS", flags), ("BALLS", "0")]),
    }
}
