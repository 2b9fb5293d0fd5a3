pub mod controller;
pub mod health;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use protos::{health::health_server::HealthServer, msm_data_plane_server::MsmDataPlaneServer};
use registry::Registry;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use self::{controller::Controller, health::HealthChecker};

pub async fn bind(listen: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind rpc listener: addr={listen}"))
}

/// Serves the data plane and health services on `listener` until
/// `shutdown` resolves.
pub async fn start_server<F>(listener: TcpListener, registry: Arc<Registry>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    log::info!("rpc server listening: addr={}", listener.local_addr()?);

    Server::builder()
        .timeout(Duration::from_secs(5))
        .accept_http1(false)
        .add_service(MsmDataPlaneServer::new(Controller::new(registry)))
        .add_service(HealthServer::new(HealthChecker))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    log::info!("rpc server stopped");

    Ok(())
}
