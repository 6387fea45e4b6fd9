//! A device gives no indication of where its reply ends.
//!
//! The accumulator decides this in one of two ways:
//!
//! - Idle timeout (default): keep reading for as long as bytes keep arriving.
//!   The reply is complete once no byte arrives within the timeout.
//!   The timeout restarts after every read, so it bounds the gap between bytes,
//!   not the length of the whole reply.
//! - Delimiter: keep reading until a configured byte sequence has been seen.
//!   The reply includes the delimiter.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use super::{
    codecs::delimiter::DelimiterCodec, error::SerialPortError, Preview, SerialMessageBytes,
};
use crate::config::Delimiter;

const INITIAL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Mode {
    Idle,
    Delimited(DelimiterCodec),
}

/// Collects a device's reply.
#[derive(Debug)]
pub struct ResponseAccumulator {
    mode: Mode,

    /// Bytes read from the device but not yet handed out.
    buffer: BytesMut,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::idle()
    }
}

impl ResponseAccumulator {
    /// A reply is complete once the device goes quiet.
    pub fn idle() -> Self {
        Self {
            mode: Mode::Idle,
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// A reply is complete once `delimiter` has been seen.
    /// An empty delimiter gives an idle accumulator.
    pub fn delimited(delimiter: &[u8]) -> Self {
        match DelimiterCodec::new(delimiter) {
            Some(codec) => Self {
                mode: Mode::Delimited(codec),
                buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            },
            None => Self::idle(),
        }
    }

    /// Pick the mode from an optional delimiter.
    pub fn for_delimiter(delimiter: Option<&Delimiter>) -> Self {
        match delimiter {
            Some(delimiter) => Self::delimited(delimiter.as_bytes()),
            None => Self::idle(),
        }
    }

    /// Throw away anything buffered.
    /// Used when the device the bytes came from goes away.
    pub fn reset(&mut self) {
        self.buffer.clear();

        if let Mode::Delimited(codec) = &mut self.mode {
            codec.reset();
        }
    }

    /// Read one reply from `reader`.
    ///
    /// `timeout` bounds each individual read attempt.
    ///
    /// In idle mode running into the timeout is how a reply normally ends, and the reply may be empty.
    /// In delimiter mode running into the timeout, or the stream ending, before the delimiter
    /// is [`SerialPortError::IncompleteFrame`] and the partial reply is discarded.
    /// The stream ending in idle mode is [`SerialPortError::Disconnected`].
    pub async fn accumulate<R>(
        &mut self,
        reader: &mut R,
        timeout: Duration,
    ) -> Result<SerialMessageBytes, SerialPortError>
    where
        R: AsyncRead + Unpin,
    {
        let reply = match &mut self.mode {
            Mode::Idle => read_until_idle(reader, &mut self.buffer, timeout).await,
            Mode::Delimited(codec) => {
                read_until_delimiter(reader, codec, &mut self.buffer, timeout).await
            }
        };

        if reply.is_err() {
            self.reset();
        }

        reply
    }
}

async fn read_until_idle<R>(
    reader: &mut R,
    buffer: &mut BytesMut,
    timeout: Duration,
) -> Result<SerialMessageBytes, SerialPortError>
where
    R: AsyncRead + Unpin,
{
    let mut reply = SerialMessageBytes::new();

    loop {
        match tokio::time::timeout(timeout, reader.read_buf(buffer)).await {
            Err(_elapsed) => {
                trace!("Quiet for {timeout:?}, reply of {} byte(s) done", reply.len());
                return Ok(reply);
            }
            Ok(Ok(0)) => return Err(SerialPortError::Disconnected),
            Ok(Ok(n)) => {
                trace!("Read {n} byte(s)");
                reply.extend_from_slice(&buffer.split());
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

async fn read_until_delimiter<R>(
    reader: &mut R,
    codec: &mut DelimiterCodec,
    buffer: &mut BytesMut,
    timeout: Duration,
) -> Result<SerialMessageBytes, SerialPortError>
where
    R: AsyncRead + Unpin,
{
    loop {
        // Bytes after a previous delimiter stay buffered, so look before reading.
        if let Some(frame) = codec.decode(buffer)? {
            return Ok(frame.to_vec());
        }

        match tokio::time::timeout(timeout, reader.read_buf(buffer)).await {
            Err(_elapsed) => {
                debug!(partial = %Preview(buffer), "Quiet for {timeout:?} before the delimiter");
                return Err(SerialPortError::IncompleteFrame {
                    discarded: buffer.len(),
                });
            }
            Ok(Ok(0)) => {
                debug!(partial = %Preview(buffer), "Stream ended before the delimiter");
                return Err(SerialPortError::IncompleteFrame {
                    discarded: buffer.len(),
                });
            }
            Ok(Ok(n)) => trace!("Read {n} byte(s)"),
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}
