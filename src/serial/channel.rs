use std::{sync::Arc, time::Duration};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use super::{
    accumulator::ResponseAccumulator, error::SerialPortError, Preview, SerialMessageBytes,
};
use crate::{
    endpoint::{DeviceStream, Endpoint, EndpointId},
    error::Error,
};

enum ChannelState {
    Closed,
    Open(DeviceStream),
}

/// The connection to one device.
///
/// Holds at most one open stream to the device.
/// The stream is opened lazily by [`SerialChannel::exchange`] whenever there is none,
/// and dropped whenever something goes wrong with it.
/// There are no retries: a failed exchange is reported, and the next one starts afresh.
pub struct SerialChannel {
    endpoint: Arc<dyn Endpoint>,
    state: ChannelState,
    accumulator: ResponseAccumulator,

    /// Once retired the channel refuses to open again.
    retired: bool,
}

impl SerialChannel {
    /// A closed channel to the given device.
    pub fn new(endpoint: Arc<dyn Endpoint>, accumulator: ResponseAccumulator) -> Self {
        Self {
            endpoint,
            state: ChannelState::Closed,
            accumulator,
            retired: false,
        }
    }

    /// Which device this channel talks to.
    pub fn device(&self) -> &EndpointId {
        self.endpoint.id()
    }

    /// Whether a stream to the device is currently held.
    pub fn is_open(&self) -> bool {
        matches!(self.state, ChannelState::Open(_))
    }

    /// Open the device.
    ///
    /// If the channel is already open, the old stream is closed first.
    pub fn open(&mut self) -> Result<(), Error> {
        if self.retired {
            return Err(Error::DeviceUnavailable {
                device: self.device().to_string(),
                problem: "The bridge has been stopped".into(),
            });
        }

        self.close();

        let stream = self.endpoint.open()?;
        self.state = ChannelState::Open(stream);

        info!(device = %self.device(), "Channel open");

        Ok(())
    }

    /// Close the device.
    /// Closing a closed channel does nothing.
    pub fn close(&mut self) {
        if let ChannelState::Open(stream) = std::mem::replace(&mut self.state, ChannelState::Closed)
        {
            drop(stream);
            self.accumulator.reset();

            info!(device = %self.device(), "Channel closed");
        }
    }

    /// Close the channel for good.
    pub(crate) fn retire(&mut self) {
        self.close();
        self.retired = true;
    }

    /// Write `request` to the device and collect its reply.
    ///
    /// Opens the device first if needed.
    /// If anything goes wrong the channel closes itself, so the next exchange reopens it.
    pub async fn exchange(
        &mut self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<SerialMessageBytes, Error> {
        if !self.is_open() {
            debug!(device = %self.device(), "Channel not open, opening");
            self.open()?;
        }

        trace!(request = %Preview(request), "Putting {} byte(s) on wire", request.len());

        let outcome = match &mut self.state {
            ChannelState::Open(stream) => {
                write_then_accumulate(stream, &mut self.accumulator, request, timeout).await
            }
            ChannelState::Closed => Err(SerialPortError::Disconnected),
        };

        match outcome {
            Ok(reply) => {
                debug!(reply = %Preview(&reply), "Exchange got {} byte(s) back", reply.len());
                Ok(reply)
            }
            Err(e) => {
                let e = e.into_error(self.device());
                warn!(%e, "Exchange failed, closing channel");
                self.close();
                Err(e)
            }
        }
    }
}

async fn write_then_accumulate(
    stream: &mut DeviceStream,
    accumulator: &mut ResponseAccumulator,
    request: &[u8],
    timeout: Duration,
) -> Result<SerialMessageBytes, SerialPortError> {
    stream.write_all(request).await?;
    stream.flush().await?;

    accumulator.accumulate(stream, timeout).await
}
