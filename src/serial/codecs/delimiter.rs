use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::serial::error::SerialPortError;

/// This codec yields everything up to and including a configurable delimiter.
/// The delimiter may be several bytes long.
#[derive(Debug, Clone)]
pub(crate) struct DelimiterCodec {
    /// How far into the buffer no delimiter can start.
    cursor: usize,

    delimiter: Vec<u8>,
}

impl DelimiterCodec {
    /// Create a new codec.
    /// There is no codec for an empty delimiter.
    pub(crate) fn new(delimiter: &[u8]) -> Option<Self> {
        (!delimiter.is_empty()).then(|| Self {
            cursor: 0,
            delimiter: delimiter.to_vec(),
        })
    }

    /// Forget how far we have looked.
    /// Needed whenever the buffer is cleared behind our back.
    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Decoder for DelimiterCodec {
    type Item = BytesMut;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.cursor.min(src.len());
        let look_at = &src[start..];

        if let Some(position) = look_at
            .windows(self.delimiter.len())
            .position(|window| window == self.delimiter.as_slice())
        {
            let end = start + position + self.delimiter.len();

            // Next time we need to start over.
            self.cursor = 0;

            Ok(Some(src.split_to(end)))
        } else {
            // A delimiter may straddle what we have and what is still to come,
            // so keep the tail which could be its beginning.
            self.cursor = src.len().saturating_sub(self.delimiter.len() - 1);

            Ok(None)
        }
    }
}
