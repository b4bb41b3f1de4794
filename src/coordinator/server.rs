//! Controller server

use crate::common::{ControllerConfig, Error, Result};
use crate::coordinator::cluster::Cluster;
use crate::coordinator::rebalance::Rebalancer;
use crate::coordinator::session::run_session;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct Controller {
    listener: TcpListener,
    cluster: Arc<Cluster>,
    rebalance_period: Duration,
}

impl Controller {
    /// Bind the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: &ControllerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self {
            listener,
            cluster: Cluster::new(config.replication_factor, config.timeout()),
            rebalance_period: config.rebalance_period(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn cluster(&self) -> Arc<Cluster> {
        self.cluster.clone()
    }

    /// Accept connections forever, one task per socket.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting controller on {}", self.local_addr()?);
        tracing::info!("  Replicas: {}", self.cluster.replication_factor());
        tracing::info!("  Peer timeout: {:?}", self.cluster.peer_timeout());
        tracing::info!("  Rebalance period: {:?}", self.rebalance_period);

        let mut rebalancer = Rebalancer::new(self.cluster.clone(), self.rebalance_period).start();

        tracing::info!("✓ Controller ready");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(run_session(self.cluster.clone(), stream));
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                res = &mut rebalancer => {
                    return Err(Error::Internal(format!("rebalancer stopped: {:?}", res)));
                }
            }
        }
    }
}
