use std::fmt::Display;

/// Serial port related errors.
pub mod error;

/// Decides when a device's reply is complete.
pub mod accumulator;

/// The connection to one device.
pub mod channel;

/// Codecs for finding frames in the bytes coming off the wire.
pub(crate) mod codecs;

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// Shows the start of some bytes as text, for logging.
pub(crate) struct Preview<'a>(pub(crate) &'a [u8]);

impl Display for Preview<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = String::from_utf8_lossy(self.0)
            .chars()
            .take(48)
            .collect::<String>();

        write!(f, "{:?}", s.trim())
    }
}
