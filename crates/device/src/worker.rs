//! Read loop worker
//!
//! One dedicated thread per session pulls packets from the link, feeds the
//! frame decoder and queues every completed message for dispatch. The read
//! timeout is the only blocking point and the cancellation granularity.

use crate::panic_message;
use crate::session::SessionShared;
use crate::usb::{DeviceLink, TransportError};
use common::EventSender;
use protocol::{Event, FrameDecoder, READ_TIMEOUT};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Name of the read loop thread
pub const READ_LOOP_THREAD: &str = "gc2-read-loop";

enum Exit {
    Cancelled,
    Failed(TransportError),
    Panicked(String),
}

pub(crate) struct ReadLoop<L: DeviceLink> {
    link: L,
    decoder: FrameDecoder,
    events: EventSender,
    shared: Arc<SessionShared>,
    cancel: Arc<AtomicBool>,
}

impl<L: DeviceLink> ReadLoop<L> {
    pub(crate) fn new(
        link: L,
        events: EventSender,
        shared: Arc<SessionShared>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            link,
            decoder: FrameDecoder::new(),
            events,
            shared,
            cancel,
        }
    }

    fn pump(&mut self) -> Exit {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return Exit::Cancelled;
            }

            match self.link.read_packet(READ_TIMEOUT) {
                Ok(packet) => {
                    trace!("Read {} bytes", packet.len());
                    if let Some(message) = self.decoder.push_packet(&packet) {
                        self.events.emit(Event::from(message));
                    }
                }
                Err(TransportError::Timeout) => continue,
                Err(e) if e.is_fatal() => return Exit::Failed(e),
                Err(e) => debug!("Ignoring non-fatal read error: {}", e),
            }
        }
    }

    fn run(mut self) {
        info!("Read loop started");
        self.decoder.reset();

        let exit = match panic::catch_unwind(AssertUnwindSafe(|| self.pump())) {
            Ok(exit) => exit,
            Err(payload) => Exit::Panicked(panic_message(payload.as_ref())),
        };

        let owns = match exit {
            Exit::Cancelled => false,
            _ => self.shared.begin_teardown(),
        };
        self.link.close();
        self.shared.set_worker_alive(false);

        // The error is reported either way; the teardown owner emits `false`
        match exit {
            Exit::Cancelled => info!("Read loop stopped"),
            Exit::Failed(e) => {
                error!("Device read failed: {}", e);
                if owns {
                    self.shared.finish_teardown();
                }
                self.events
                    .emit(Event::error(format!("Device read failed: {}", e)));
                if owns {
                    self.events.emit(Event::Connection(false));
                }
            }
            Exit::Panicked(reason) => {
                error!("Read loop panicked: {}", reason);
                if owns {
                    self.shared.fail(reason.clone());
                }
                self.events
                    .emit(Event::error(format!("Read loop panicked: {}", reason)));
                if owns {
                    self.events.emit(Event::Connection(false));
                }
            }
        }

        let stats = self.decoder.stats();
        debug!(
            "Read loop exiting: {} frames, {} stale, {} orphan packets, {} errors",
            stats.frames_decoded, stats.stale_frames_dropped, stats.orphan_packets, stats.errors
        );
    }
}

/// Start the read loop on its own named thread
pub(crate) fn spawn<L: DeviceLink>(read_loop: ReadLoop<L>) -> io::Result<JoinHandle<()>> {
    let shared = Arc::clone(&read_loop.shared);
    shared.set_worker_alive(true);

    let result = thread::Builder::new()
        .name(READ_LOOP_THREAD.to_string())
        .spawn(move || read_loop.run());

    if result.is_err() {
        shared.set_worker_alive(false);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;
    use crate::usb::UsbTransport;
    use protocol::{ConnectionState, DeviceIdentity};

    fn connected_loop(
        transport: &MockTransport,
    ) -> (ReadLoop<crate::test_utils::MockLink>, common::EventReceiver, Arc<SessionShared>) {
        let (events, receiver) = common::create_event_channel(8);
        let shared = Arc::new(SessionShared::default());
        shared.set_connected(DeviceIdentity::gc2());
        let link = transport.open().unwrap();
        let read_loop = ReadLoop::new(link, events, Arc::clone(&shared), Arc::default());
        (read_loop, receiver, shared)
    }

    fn drain(receiver: &common::EventReceiver) -> Vec<Event> {
        std::iter::from_fn(|| receiver.try_recv()).collect()
    }

    #[test]
    fn test_io_error_owns_teardown() {
        let transport = MockTransport::new();
        transport.queue_io_error("pipe");
        let (read_loop, receiver, shared) = connected_loop(&transport);

        read_loop.run();

        assert_eq!(shared.state(), ConnectionState::Disconnected);
        assert!(!shared.worker_alive());
        assert!(!transport.is_link_open());
        let events = drain(&receiver);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Error(text) if text.contains("pipe")));
        assert_eq!(events[1], Event::Connection(false));
    }

    #[test]
    fn test_io_error_during_consumer_teardown_still_reported() {
        let transport = MockTransport::new();
        transport.queue_io_error("unplugged");
        let (read_loop, receiver, shared) = connected_loop(&transport);
        // A consumer disconnect already won the teardown
        assert!(shared.begin_teardown());

        read_loop.run();

        // Settling the state and emitting `false` stay with the owner
        assert_eq!(shared.state(), ConnectionState::Disconnecting);
        assert!(!transport.is_link_open());
        let events = drain(&receiver);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error(text) if text.contains("unplugged")));
    }

    #[test]
    fn test_cancelled_loop_is_silent() {
        let transport = MockTransport::new();
        let (read_loop, receiver, shared) = connected_loop(&transport);
        read_loop.cancel.store(true, Ordering::Release);

        read_loop.run();

        assert_eq!(shared.state(), ConnectionState::Connected);
        assert!(drain(&receiver).is_empty());
    }
}
