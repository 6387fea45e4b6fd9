use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, info, trace, warn};

use crate::{arbiter::RequestArbiter, error::Error, serial::Preview};

/// The most bytes taken from a client in one go.
/// Whatever one read yields is forwarded as one request.
pub(crate) const CLIENT_READ_CHUNK: usize = 1024;

/// One connected TCP client.
///
/// Requests from the client are forwarded to the device one at a time,
/// and the device's reply is written back.
pub(crate) struct ClientSession {
    stream: TcpStream,
    addr: SocketAddr,
    arbiter: RequestArbiter,
    response_timeout: Duration,
}

impl ClientSession {
    pub(crate) fn new(
        stream: TcpStream,
        addr: SocketAddr,
        arbiter: RequestArbiter,
        response_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            addr,
            arbiter,
            response_timeout,
        }
    }

    /// Serve the client until it disconnects or something breaks.
    ///
    /// The connection is closed when this returns.
    pub(crate) async fn run(mut self) -> Result<(), Error> {
        info!("Client connected");

        let outcome = self.serve().await;

        match &outcome {
            Ok(()) => info!("Client disconnected"),
            Err(e) => warn!(%e, "Client session ended"),
        }

        if let Err(e) = self.stream.shutdown().await {
            trace!(%e, "Shutdown of client connection failed");
        }

        outcome
    }

    async fn serve(&mut self) -> Result<(), Error> {
        let mut request = vec![0; CLIENT_READ_CHUNK];

        loop {
            let n = self
                .stream
                .read(&mut request)
                .await
                .map_err(|e| Error::ClientIo(format!("{}: {e}", self.addr)))?;

            if n == 0 {
                return Ok(());
            }

            let request = &request[..n];
            trace!(request = %Preview(request), "Request of {n} byte(s)");

            self.forward(request).await?;
        }
    }

    /// Forward one request and write back the reply.
    ///
    /// Access to the device is held until the reply has been written to the client,
    /// so replies from different clients never interleave.
    async fn forward(&mut self, request: &[u8]) -> Result<(), Error> {
        let mut channel = self.arbiter.acquire().await;

        let reply = match channel.exchange(request, self.response_timeout).await {
            Ok(reply) => reply,
            Err(Error::IncompleteFrame { discarded }) => {
                debug!("No complete reply, {discarded} byte(s) dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if reply.is_empty() {
            debug!("Device had nothing to say");
            return Ok(());
        }

        self.stream
            .write_all(&reply)
            .await
            .map_err(|e| Error::ClientIo(format!("{}: {e}", self.addr)))?;

        channel.release();

        Ok(())
    }
}
