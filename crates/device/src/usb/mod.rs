//! USB subsystem
//!
//! Opens the GC2 by its fixed vendor/product IDs, claims its interface and
//! performs blocking interrupt-IN reads with a timeout.
//!
//! The [`UsbTransport`] / [`DeviceLink`] traits are the seam between the
//! session logic and the bus; [`RusbTransport`] is the libusb-backed
//! implementation and `test_utils::MockTransport` a scriptable stand-in.

pub mod device;
pub mod transport;

pub use device::{RusbLink, RusbTransport};
pub use transport::{DeviceLink, TransportError, UsbTransport};
