use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use registry::{Flow, Registry, canonicalize};
use tokio::net::UdpSocket;

/// Large enough for any UDP payload (65507 bytes over IPv4).
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// An ICMP port unreachable from an earlier send surfaces as a receive error
// on some platforms, it says nothing about the socket itself.
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}

/// Packet counters of one forwarder.
#[derive(Default)]
pub struct Counters {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    send_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Datagrams read from the socket.
    pub received: u64,
    /// Copies written to subscribers.
    pub forwarded: u64,
    /// Datagrams from sources that resolve to no stream.
    pub dropped: u64,
    pub send_errors: u64,
}

impl Counters {
    fn add(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> Stats {
        Stats {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Replicates the datagrams of one flow to the subscribers of their
/// stream.
///
/// The socket that receives from the sources also sends the copies, so
/// subscribers see the forwarder's well known port as the origin.
pub struct Forwarder {
    flow: Flow,
    socket: UdpSocket,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
}

impl Forwarder {
    pub fn new(flow: Flow, socket: UdpSocket, registry: Arc<Registry>) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            registry,
            socket,
            flow,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// The receive loop.
    ///
    /// Transient receive errors are skipped, any other error ends the loop
    /// and is returned. The forwarder also stops when its task is dropped
    /// or aborted, which closes the socket.
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        log::info!(
            "forwarder listening: flow={:?}, addr={local_addr}",
            self.flow
        );

        loop {
            let (size, source) = match self.socket.recv_from(&mut buffer).await {
                Ok(it) => it,
                Err(e) if is_transient(e.kind()) => continue,
                Err(e) => {
                    log::error!("udp recv failed: flow={:?}, error={e}", self.flow);

                    return Err(e.into());
                }
            };

            Counters::add(&self.counters.received);
            self.forward(&buffer[..size], source).await;
        }
    }

    async fn forward(&self, bytes: &[u8], source: SocketAddr) {
        let route = match self.registry.lookup(self.flow, source) {
            // The index must point at a stream that really has this source.
            Some(route) if self.flow.target(route.source) == Some(canonicalize(source)) => route,
            _ => {
                Counters::add(&self.counters.dropped);
                log::trace!(
                    "drop datagram from unknown source: flow={:?}, addr={source}, size={}",
                    self.flow,
                    bytes.len()
                );

                return;
            }
        };

        log::trace!(
            "udp relay: flow={:?}, stream={}, addr={source}, size={}, subscribers={}",
            self.flow,
            route.id,
            bytes.len(),
            route.subscribers.len()
        );

        for address in route.enabled() {
            let Some(target) = self.flow.target(address) else {
                Counters::add(&self.counters.send_errors);
                log::warn!(
                    "subscriber has no {:?} port: stream={}, addr={address}",
                    self.flow,
                    route.id
                );

                continue;
            };

            match self.socket.send_to(bytes, target).await {
                Ok(_) => Counters::add(&self.counters.forwarded),
                Err(e) => {
                    Counters::add(&self.counters.send_errors);
                    log::warn!(
                        "udp send failed: flow={:?}, stream={}, addr={target}, error={e}",
                        self.flow,
                        route.id
                    );
                }
            }
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        let stats = self.counters.get();

        log::info!(
            "forwarder stopped: flow={:?}, received={}, forwarded={}, dropped={}, send errors={}",
            self.flow,
            stats.received,
            stats.forwarded,
            stats.dropped,
            stats.send_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_icmp_and_retry_errors_are_transient() {
        assert!(is_transient(ErrorKind::ConnectionReset));
        assert!(is_transient(ErrorKind::ConnectionRefused));
        assert!(is_transient(ErrorKind::Interrupted));
        assert!(is_transient(ErrorKind::WouldBlock));

        assert!(!is_transient(ErrorKind::NotConnected));
        assert!(!is_transient(ErrorKind::PermissionDenied));
        assert!(!is_transient(ErrorKind::Other));
    }

    #[tokio::test]
    async fn counts_nothing_before_traffic() -> anyhow::Result<()> {
        let forwarder = Forwarder::new(
            Flow::Rtcp,
            UdpSocket::bind("127.0.0.1:0").await?,
            Arc::new(Registry::default()),
        );

        assert_eq!(forwarder.counters().get(), Stats::default());
        assert_eq!(forwarder.local_addr()?.ip(), std::net::Ipv4Addr::LOCALHOST);

        Ok(())
    }
}
