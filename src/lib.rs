pub mod config;
pub mod logger;
pub mod rpc;
pub mod server;

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use registry::Registry;
use tokio::{net::TcpListener, task::JoinSet};

use self::{config::Config, server::Forwarder};

/// A bound data plane: the control plane listener, both forwarders and
/// the registry they share.
///
/// Binding is separate from running so every socket failure surfaces
/// before any task starts.
pub struct DataPlane {
    registry: Arc<Registry>,
    listener: TcpListener,
    rtp: Forwarder,
    rtcp: Forwarder,
}

impl DataPlane {
    pub async fn bind(config: &Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::default());
        let listener = rpc::bind(config.rpc_listen()).await?;
        let (rtp, rtcp) = server::bind(config, registry.clone()).await?;

        Ok(Self {
            registry,
            listener,
            rtp,
            rtcp,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn rpc_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn rtp_addr(&self) -> Result<SocketAddr> {
        self.rtp.local_addr()
    }

    pub fn rtcp_addr(&self) -> Result<SocketAddr> {
        self.rtcp.local_addr()
    }

    /// Runs the forwarders and the rpc server until `shutdown` resolves or
    /// any of them stops.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut workers = JoinSet::new();

        workers.spawn(self.rtp.run());
        workers.spawn(self.rtcp.run());
        workers.spawn(rpc::start_server(self.listener, self.registry, shutdown));

        if let Some(res) = workers.join_next().await {
            workers.abort_all();

            return res?;
        }

        Ok(())
    }
}

/// Starts the data plane described by `config` and runs it until ctrl-c.
pub async fn startup(config: Config) -> Result<()> {
    DataPlane::bind(&config)
        .await?
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {e}");

                std::future::pending::<()>().await;
            }

            log::info!("shutdown requested");
        })
        .await
}
