use std::{fmt::Display, net::IpAddr, sync::Arc};

use futures::future::join_all;
use tracing::{error, info};

use crate::{
    bridge::{Bridge, BridgeHandle},
    config::{BridgeConfig, Config},
    endpoint::{Endpoint, EndpointId},
    error::Error,
};

/// A bridge which could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    /// The port the bridge was configured with.
    pub port: u16,

    /// The device the bridge was configured with.
    pub device: EndpointId,

    /// What went wrong.
    pub error: Error,
}

impl Display for StartFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on port {}: {}", self.device, self.port, self.error)
    }
}

/// Several bridges started together.
pub struct BridgeGroup {
    bridges: Vec<BridgeHandle>,
    failures: Vec<StartFailure>,
}

impl BridgeGroup {
    /// Start one bridge per configured device.
    ///
    /// A bad configuration starts nothing.
    /// Otherwise a bridge failing to start does not stop the others from starting,
    /// see [`BridgeGroup::failures`].
    pub async fn start(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let bridges = config
            .bridges
            .iter()
            .cloned()
            .map(Bridge::new)
            .collect::<Vec<_>>();

        Ok(Self::start_bridges(config.bind, bridges).await)
    }

    /// Like [`BridgeGroup::start`], but with endpoints set up by the caller.
    pub async fn start_with_endpoints(
        bind: IpAddr,
        bridges: Vec<(BridgeConfig, Arc<dyn Endpoint>)>,
    ) -> Result<Self, Error> {
        Config {
            bind,
            bridges: bridges.iter().map(|(config, _)| config.clone()).collect(),
        }
        .validate()?;

        let bridges = bridges
            .into_iter()
            .map(|(config, endpoint)| Bridge::with_endpoint(config, endpoint))
            .collect::<Vec<_>>();

        Ok(Self::start_bridges(bind, bridges).await)
    }

    async fn start_bridges(bind: IpAddr, bridges: Vec<Bridge>) -> Self {
        let starting = bridges.into_iter().map(|bridge| async move {
            let port = bridge.config().port;
            let device = bridge.device().clone();

            bridge
                .start(bind)
                .await
                .map_err(|error| StartFailure {
                    port,
                    device,
                    error,
                })
        });

        let mut group = Self {
            bridges: vec![],
            failures: vec![],
        };

        for outcome in join_all(starting).await {
            match outcome {
                Ok(bridge) => group.bridges.push(bridge),
                Err(failure) => {
                    error!(%failure, "Bridge did not start");
                    group.failures.push(failure);
                }
            }
        }

        info!(
            "{} bridge(s) running, {} failed to start",
            group.bridges.len(),
            group.failures.len()
        );

        group
    }

    /// The bridges which are running.
    pub fn bridges(&self) -> &[BridgeHandle] {
        &self.bridges
    }

    /// The bridges which could not be started.
    pub fn failures(&self) -> &[StartFailure] {
        &self.failures
    }

    /// The running bridge for the given device, if any.
    pub fn get(&self, device: &EndpointId) -> Option<&BridgeHandle> {
        self.bridges.iter().find(|bridge| bridge.device() == device)
    }

    /// Stop all running bridges.
    pub async fn stop(self) {
        join_all(self.bridges.into_iter().map(BridgeHandle::stop)).await;
    }
}
