use thiserror::Error;

/// Everything that can go wrong while bridging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The device could not be opened.
    /// Missing file, no permission, or locked by another process.
    #[error("The device `{device}` is unavailable. Problem: {problem}")]
    DeviceUnavailable {
        /// The device which could not be opened.
        device: String,

        /// Why it could not be opened.
        problem: String,
    },

    /// Writing to or reading from an open device failed.
    /// The channel to the device is closed when this happens.
    #[error("Serial I/O on `{device}` failed. Problem: {problem}")]
    SerialIo {
        /// The device the failure happened on.
        device: String,

        /// The underlying problem.
        problem: String,
    },

    /// Delimiter mode only: the device stopped producing data before the delimiter was seen.
    #[error("The reply ended before the delimiter was seen, discarded {discarded} byte(s)")]
    IncompleteFrame {
        /// How many bytes were read (and thrown away) before giving up.
        discarded: usize,
    },

    /// The connection to a TCP client broke.
    #[error("Client connection problem: {0}")]
    ClientIo(String),

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The TCP listener for a bridge could not be set up.
    #[error("Could not listen on port {port}. Problem: {problem}")]
    Listen {
        /// The port which was asked for.
        port: u16,

        /// Why listening failed.
        problem: String,
    },
}

impl Error {
    /// Get the message of a [`Error::BadConfig`], or the error back if it is another variant.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    pub(crate) fn bad_config<S: Into<String>>(message: S) -> Self {
        Self::BadConfig(message.into())
    }
}
