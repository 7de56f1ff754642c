//! GC2 launch monitor driver
//!
//! Discovers the device on the USB bus, manages one connect/disconnect
//! session at a time, reads the interrupt stream on a dedicated thread and
//! delivers decoded events to consumer callbacks on a separate dispatch
//! thread.
//!
//! # Architecture
//!
//! ```text
//! UsbTransport ──open──> DeviceLink ──read_packet──> ReadLoop ──FrameDecoder──┐
//!      ^                                                                       │
//!      │ connect/disconnect                                       bounded channel
//!   Session <── Gc2Driver ──subscribe──> SubscriberRegistry <── EventDispatcher
//! ```
//!
//! # Example
//!
//! ```no_run
//! use device::Gc2Driver;
//!
//! let driver = Gc2Driver::initialize(None)?;
//! driver.on_shot(|shot| println!("shot {:?}: {:?} mph", shot.shot_id(), shot.get("SPEED_MPH")));
//! driver.on_connection(|connected| println!("connected: {}", connected));
//!
//! if driver.connect() {
//!     std::thread::sleep(std::time::Duration::from_secs(30));
//! }
//! driver.shutdown();
//! # Ok::<(), common::Error>(())
//! ```

pub mod dispatcher;
pub mod driver;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;
mod worker;

pub use dispatcher::{
    Callback, DISPATCH_THREAD, EventDispatcher, NotificationSink, SubscriberRegistry,
};
pub use driver::{DriverOptions, Gc2Driver};
pub use session::Session;
pub use usb::{DeviceLink, RusbLink, RusbTransport, TransportError, UsbTransport};
pub use worker::READ_LOOP_THREAD;

use std::any::Any;

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
