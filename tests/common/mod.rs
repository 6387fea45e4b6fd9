#![allow(dead_code)]

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use color_eyre::Result;
use serial_bridge::{
    bridge::{Bridge, BridgeHandle},
    client::BridgeClient,
    config::{BridgeConfig, Delimiter, DeviceSpec},
    endpoint::Endpoint,
    mock::{MockBehaviour, MockBuilder, MockHandle},
};
use tracing::{info, Level};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How long the bridge waits for a device to go quiet, unless a test needs otherwise.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_millis(100);

/// How long clients wait for the bridge to go quiet.
/// Longer than [`BRIDGE_TIMEOUT`] so that a reply is never cut short.
pub const CLIENT_IDLE: Duration = Duration::from_millis(400);

pub async fn init_logging() {
    serial_bridge::logging::init(Level::DEBUG, None).await;
}

pub fn mock(name: &str, behaviour: MockBehaviour) -> MockHandle {
    MockBuilder::new(name).behaviour(behaviour).build()
}

/// The config for a bridge to the given mock, on any free port.
pub fn bridge_config(mock: &MockHandle, timeout: Duration) -> BridgeConfig {
    BridgeConfig::new(DeviceSpec::new(mock.id().clone()), 0).with_response_timeout(timeout)
}

pub async fn start_with(config: BridgeConfig, mock: &MockHandle) -> Result<BridgeHandle> {
    init_logging().await;

    let endpoint: Arc<dyn Endpoint> = Arc::new(mock.clone());
    let bridge = Bridge::with_endpoint(config, endpoint).start(LOCALHOST).await?;

    info!("Bridge to {} on port {}", bridge.device(), bridge.port());

    Ok(bridge)
}

pub async fn start(mock: &MockHandle, timeout: Duration) -> Result<BridgeHandle> {
    start_with(bridge_config(mock, timeout), mock).await
}

pub async fn start_delimited(
    mock: &MockHandle,
    timeout: Duration,
    delimiter: &[u8],
) -> Result<BridgeHandle> {
    let config = bridge_config(mock, timeout).with_delimiter(Delimiter::new(delimiter));

    start_with(config, mock).await
}

pub async fn connect(bridge: &BridgeHandle) -> Result<BridgeClient> {
    Ok(BridgeClient::connect_addr((LOCALHOST, bridge.port())).await?)
}

/// A client which considers a reply complete at the first newline.
pub async fn connect_lines(bridge: &BridgeHandle) -> Result<BridgeClient> {
    Ok(connect(bridge).await?.with_delimiter(&Delimiter::new(*b"\n")))
}

/// Let spawned tasks catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
