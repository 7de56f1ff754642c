//! Transport contract
//!
//! A transport finds and opens the device; the link it returns owns the
//! open handle and is the only thing the read loop touches.

use protocol::{DeviceIdentity, RawPacket};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No device with the GC2 vendor/product IDs on the bus
    #[error("GC2 device not found")]
    NotFound,

    /// Device or interface is held elsewhere
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A link is already open for this transport
    #[error("Device already open")]
    AlreadyOpen,

    /// No data within the read window
    #[error("Read timed out")]
    Timeout,

    /// Device unplugged or bus failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the error ends the current session
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Io(_))
    }
}

/// Finds and opens the launch monitor
pub trait UsbTransport: Send + Sync + 'static {
    type Link: DeviceLink;

    /// Whether a matching device is on the bus; never opens it
    fn is_device_available(&self) -> bool;

    /// Open the device and claim its interface
    ///
    /// Fails with `NotFound`, `AccessDenied`, or `AlreadyOpen` while a link
    /// from a previous `open` is still live.
    fn open(&self) -> Result<Self::Link, TransportError>;
}

/// An open, claimed device
///
/// Implementations must release the device on drop if `close` was never
/// called.
pub trait DeviceLink: Send + 'static {
    /// One interrupt-IN transfer of up to one packet
    fn read_packet(&mut self, timeout: Duration) -> Result<RawPacket, TransportError>;

    /// Read serial and firmware strings; unreported fields stay `None`
    fn query_identity(&mut self) -> DeviceIdentity;

    /// Release the interface and close the handle; idempotent
    fn close(&mut self);
}
