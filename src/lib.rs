#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Possible errors in this library.
pub mod error;

/// Relates to config files and device strings.
pub mod config;

/// An endpoint, i.e. something which can be opened to talk to a device.
/// Usually a serial port, but can also be mocked.
pub mod endpoint;

/// Mocked devices.
pub mod mock;

/// Talking to serial devices.
pub mod serial;

/// Serializes access to a device.
pub mod arbiter;

/// The handler spawned for each connected client.
pub(crate) mod session;

/// One device exposed on one TCP port.
pub mod bridge;

/// Starting and stopping several bridges at once.
pub mod group;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Logging/tracing setup.
pub mod logging;
