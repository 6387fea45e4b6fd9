use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, ToSocketAddrs},
};
use tracing::{debug, info};

use crate::{
    config::Delimiter,
    error::Error,
    serial::{accumulator::ResponseAccumulator, error::SerialPortError, SerialMessageBytes},
};

/// A client connected to a bridge.
///
/// Replies are collected the way the bridge collects them from a device:
/// until the bridge is quiet for a while, or until a delimiter if one is set.
#[derive(Debug)]
pub struct BridgeClient {
    stream: TcpStream,
    peer: SocketAddr,
    accumulator: ResponseAccumulator,
}

fn client_io(e: impl std::fmt::Display) -> Error {
    Error::ClientIo(e.to_string())
}

impl BridgeClient {
    /// Connect to the bridge on `host` and `port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, Error> {
        Self::connect_addr((host, port)).await
    }

    /// Connect to the bridge at `addr`.
    pub async fn connect_addr<A: ToSocketAddrs>(addr: A) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await.map_err(client_io)?;
        let peer = stream.peer_addr().map_err(client_io)?;

        info!(%peer, "Connected to bridge");

        Ok(Self {
            stream,
            peer,
            accumulator: ResponseAccumulator::idle(),
        })
    }

    /// Consider a reply complete once `delimiter` has been seen.
    pub fn with_delimiter(mut self, delimiter: &Delimiter) -> Self {
        self.accumulator = ResponseAccumulator::delimited(delimiter.as_bytes());
        self
    }

    /// Send `message` and collect the reply.
    ///
    /// `idle` is how long the bridge may be quiet before the reply is considered complete.
    /// A bridge with nothing to say gives an empty reply.
    pub async fn request<M: AsRef<[u8]>>(
        &mut self,
        message: M,
        idle: Duration,
    ) -> Result<SerialMessageBytes, Error> {
        self.send(message).await?;
        self.receive(idle).await
    }

    /// Send `message` without waiting for a reply.
    pub async fn send<M: AsRef<[u8]>>(&mut self, message: M) -> Result<(), Error> {
        let message = message.as_ref();
        debug!("Sending {} byte(s)", message.len());

        self.stream.write_all(message).await.map_err(client_io)
    }

    /// Collect the next reply.
    ///
    /// The bridge closing the connection is an error.
    pub async fn receive(&mut self, idle: Duration) -> Result<SerialMessageBytes, Error> {
        self.accumulator
            .accumulate(&mut self.stream, idle)
            .await
            .map_err(|e| match e {
                SerialPortError::Disconnected => {
                    Error::ClientIo(format!("{} closed the connection", self.peer))
                }
                e => client_io(e),
            })
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), Error> {
        self.stream.shutdown().await.map_err(client_io)
    }
}
