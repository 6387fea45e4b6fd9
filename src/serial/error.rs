use std::io;

use thiserror::Error;

use crate::{endpoint::EndpointId, error::Error};

/// Problems talking to a device, before it is known which bridge they belong to.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The device closed the stream.
    #[error("Serial port disconnected")]
    Disconnected,

    /// The delimiter never showed up.
    #[error("Reply ended without a delimiter after {discarded} byte(s)")]
    IncompleteFrame {
        /// Bytes read and then thrown away.
        discarded: usize,
    },
}

impl SerialPortError {
    /// Attach the device this happened on.
    pub fn into_error(self, device: &EndpointId) -> Error {
        match self {
            SerialPortError::IO(e) => Error::SerialIo {
                device: device.to_string(),
                problem: e.to_string(),
            },
            SerialPortError::Disconnected => Error::SerialIo {
                device: device.to_string(),
                problem: "The device closed the connection".into(),
            },
            SerialPortError::IncompleteFrame { discarded } => Error::IncompleteFrame { discarded },
        }
    }
}
