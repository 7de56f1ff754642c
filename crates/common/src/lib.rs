//! Common utilities for the GC2 driver
//!
//! This crate provides functionality shared between the device library and
//! the monitor binary: error handling, logging setup and the bounded channel
//! that carries events from the read loop to the dispatch thread.

pub mod channel;
pub mod error;
pub mod logging;

pub use channel::{DEFAULT_EVENT_CAPACITY, EventReceiver, EventSender, create_event_channel};
pub use error::{Error, Result};
pub use logging::setup_logging;
