pub mod forwarder;

pub use self::forwarder::{Counters, Forwarder, MAX_DATAGRAM_SIZE, Stats};

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use registry::{Flow, Registry};
use tokio::net::UdpSocket;

use crate::config::Config;

async fn bind_flow(flow: Flow, listen: SocketAddr, registry: Arc<Registry>) -> Result<Forwarder> {
    let socket = UdpSocket::bind(listen)
        .await
        .with_context(|| format!("failed to bind {flow:?} socket: addr={listen}"))?;

    Ok(Forwarder::new(flow, socket, registry))
}

/// Binds the RTP socket and the RTCP socket on the next port.
///
/// Both must bind, there is no mode with only one flow.
pub async fn bind(config: &Config, registry: Arc<Registry>) -> Result<(Forwarder, Forwarder)> {
    Ok((
        bind_flow(Flow::Rtp, config.rtp_listen(), registry.clone()).await?,
        bind_flow(Flow::Rtcp, config.rtcp_listen(), registry).await?,
    ))
}
