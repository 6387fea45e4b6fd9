use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use futures::{Stream, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    arbiter::RequestArbiter,
    config::BridgeConfig,
    endpoint::{self, Endpoint, EndpointId},
    error::Error,
    serial::{accumulator::ResponseAccumulator, channel::SerialChannel},
    session::ClientSession,
};

/// How long to back off when accepting a client fails,
/// e.g. because the process ran out of file descriptors.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One device exposed on one TCP port.
///
/// All clients connected to the port share one [`SerialChannel`],
/// and take turns using it through a [`RequestArbiter`].
pub struct Bridge {
    config: BridgeConfig,
    endpoint: Arc<dyn Endpoint>,
}

impl Bridge {
    /// A bridge for the device the config names.
    pub fn new(config: BridgeConfig) -> Self {
        let endpoint = endpoint::from_spec(&config.device);

        Self { config, endpoint }
    }

    /// A bridge for an already set up endpoint,
    /// for example a [`crate::mock::MockHandle`] a test wants to keep a handle to.
    ///
    /// The device in the config is not used.
    pub fn with_endpoint(config: BridgeConfig, endpoint: Arc<dyn Endpoint>) -> Self {
        Self { config, endpoint }
    }

    /// What the bridge will be started with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Which device is bridged.
    pub fn device(&self) -> &EndpointId {
        self.endpoint.id()
    }

    /// Start listening for clients.
    ///
    /// The device is opened right away if possible.
    /// If not, a warning is logged and the next request tries again.
    pub async fn start(self, bind: IpAddr) -> Result<BridgeHandle, Error> {
        let Self { config, endpoint } = self;
        let device = endpoint.id().clone();

        let listener = TcpListener::bind((bind, config.port))
            .await
            .map_err(|e| Error::Listen {
                port: config.port,
                problem: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| Error::Listen {
            port: config.port,
            problem: e.to_string(),
        })?;

        let span = info_span!("bridge", port = local_addr.port(), %device);

        let mut channel = SerialChannel::new(
            endpoint,
            ResponseAccumulator::for_delimiter(config.delimiter()),
        );
        span.in_scope(|| match channel.open() {
            Ok(()) => info!("Listening on {local_addr}"),
            Err(e) => warn!(%e, "Listening on {local_addr}, device not available yet"),
        });

        let arbiter = RequestArbiter::new(channel);
        let cancel = CancellationToken::new();

        let accept_task = tokio::spawn(
            accept_clients(
                TcpListenerStream::new(listener),
                arbiter.clone(),
                config.clone(),
                cancel.child_token(),
            )
            .instrument(span),
        );

        Ok(BridgeHandle {
            config,
            local_addr,
            device,
            arbiter,
            cancel,
            accept_task,
        })
    }
}

async fn accept_clients<S>(
    mut incoming: S,
    arbiter: RequestArbiter,
    config: BridgeConfig,
    cancel: CancellationToken,
) where
    S: Stream<Item = io::Result<TcpStream>> + Unpin,
{
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("No longer accepting clients");
                break;
            }
            stream = incoming.next() => stream,
        };

        let stream = match stream {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                warn!(%e, "Could not accept client");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("No longer accepting clients");
                        break;
                    }
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                }
            }
            None => {
                error!("Listener closed");
                break;
            }
        };

        let addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%e, "Client went away before it could be served");
                continue;
            }
        };

        let session =
            ClientSession::new(stream, addr, arbiter.clone(), config.response_timeout);

        tokio::spawn(
            async move {
                // How the session ended is logged by the session itself.
                let _ = session.run().await;
            }
            .instrument(info_span!("client", %addr)),
        );
    }
}

/// A running bridge.
pub struct BridgeHandle {
    config: BridgeConfig,
    local_addr: SocketAddr,
    device: EndpointId,
    arbiter: RequestArbiter,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl BridgeHandle {
    /// The port clients connect to.
    /// If the config asked for port zero, this is the port actually used.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The address the bridge listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Which device is bridged.
    pub fn device(&self) -> &EndpointId {
        &self.device
    }

    /// What the bridge was started with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The arbiter guarding the device.
    pub fn arbiter(&self) -> &RequestArbiter {
        &self.arbiter
    }

    /// Stop accepting clients, then close the device for good.
    ///
    /// An exchange in progress is allowed to finish first.
    /// Sessions still connected are not cut off, but their next request fails
    /// and ends them.
    pub async fn stop(self) {
        let port = self.port();

        self.cancel.cancel();
        if let Err(e) = self.accept_task.await {
            error!(%e, port, "Accept task did not end cleanly");
        }

        let mut channel = self.arbiter.acquire().await;
        channel.retire();

        info!(port, device = %self.device, "Bridge stopped");
    }
}
