use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, bail, ensure};
use msm_dp::server::{Counters, Forwarder, Stats};
use registry::{Flow, Registry};
use tokio::{
    net::UdpSocket,
    task::JoinSet,
    time::{sleep, timeout},
};

/// Two sockets on consecutive loopback ports, an RTP/RTCP pair.
async fn pair() -> Result<(UdpSocket, UdpSocket)> {
    for _ in 0..64 {
        let rtp = UdpSocket::bind("127.0.0.1:0").await?;
        let port = rtp.local_addr()?.port();
        if port == u16::MAX {
            continue;
        }

        if let Ok(rtcp) = UdpSocket::bind(("127.0.0.1", port + 1)).await {
            return Ok((rtp, rtcp));
        }
    }

    bail!("no consecutive udp ports available")
}

struct Peer {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl Peer {
    async fn new() -> Result<Self> {
        let (rtp, rtcp) = pair().await?;
        Ok(Self { rtp, rtcp })
    }

    fn addr(&self) -> SocketAddr {
        self.rtp.local_addr().unwrap()
    }
}

async fn expect(socket: &UdpSocket, from: SocketAddr, payload: &[u8]) -> Result<()> {
    let mut buffer = [0u8; 2048];
    let (size, addr) = timeout(Duration::from_secs(1), socket.recv_from(&mut buffer)).await??;

    ensure!(addr == from, "datagram from {addr}, expected {from}");
    ensure!(&buffer[..size] == payload, "unexpected payload {:?}", &buffer[..size]);
    Ok(())
}

async fn expect_nothing(socket: &UdpSocket) -> Result<()> {
    let mut buffer = [0u8; 2048];
    if let Ok(ret) = timeout(Duration::from_millis(200), socket.recv_from(&mut buffer)).await {
        let (size, addr) = ret?;
        bail!("unexpected datagram from {addr}: {:?}", &buffer[..size]);
    }

    Ok(())
}

async fn wait_for(counters: &Counters, check: impl Fn(Stats) -> bool) -> Result<Stats> {
    for _ in 0..100 {
        let stats = counters.get();
        if check(stats) {
            return Ok(stats);
        }

        sleep(Duration::from_millis(10)).await;
    }

    bail!("counters never matched: {:?}", counters.get())
}

struct Harness {
    registry: Arc<Registry>,
    rtp: SocketAddr,
    rtcp: SocketAddr,
    rtp_counters: Arc<Counters>,
    rtcp_counters: Arc<Counters>,
    _workers: JoinSet<Result<()>>,
}

impl Harness {
    async fn new() -> Result<Self> {
        let registry = Arc::new(Registry::default());
        let rtp = Forwarder::new(
            Flow::Rtp,
            UdpSocket::bind("127.0.0.1:0").await?,
            registry.clone(),
        );

        let rtcp = Forwarder::new(
            Flow::Rtcp,
            UdpSocket::bind("127.0.0.1:0").await?,
            registry.clone(),
        );

        let (rtp_addr, rtcp_addr) = (rtp.local_addr()?, rtcp.local_addr()?);
        let (rtp_counters, rtcp_counters) = (rtp.counters(), rtcp.counters());

        let mut workers = JoinSet::new();
        workers.spawn(rtp.run());
        workers.spawn(rtcp.run());

        Ok(Self {
            rtp: rtp_addr,
            rtcp: rtcp_addr,
            _workers: workers,
            rtp_counters,
            rtcp_counters,
            registry,
        })
    }
}

#[tokio::test]
async fn rtp_to_one_subscriber() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let subscriber = Peer::new().await?;

    harness.registry.create_stream(1, source.addr())?;
    harness.registry.add_subscriber(1, subscriber.addr(), true)?;

    source.rtp.send_to(b"hello", harness.rtp).await?;

    expect(&subscriber.rtp, harness.rtp, b"hello").await?;
    expect_nothing(&subscriber.rtcp).await?;

    let stats = wait_for(&harness.rtp_counters, |it| it.forwarded == 1).await?;
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dropped, 0);

    Ok(())
}

#[tokio::test]
async fn rtcp_goes_to_next_port() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let subscriber = Peer::new().await?;

    harness.registry.create_stream(1, source.addr())?;
    harness.registry.add_subscriber(1, subscriber.addr(), true)?;

    source.rtcp.send_to(b"rtcp", harness.rtcp).await?;

    expect(&subscriber.rtcp, harness.rtcp, b"rtcp").await?;
    expect_nothing(&subscriber.rtp).await?;

    // RTP from the source port arriving at the RTCP listener belongs to no
    // stream, the RTCP source is always the RTP port plus one.
    source.rtp.send_to(b"misrouted", harness.rtcp).await?;
    expect_nothing(&subscriber.rtcp).await?;

    wait_for(&harness.rtcp_counters, |it| it.dropped == 1 && it.forwarded == 1).await?;

    Ok(())
}

#[tokio::test]
async fn fan_out_and_disable() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let subscribers = [Peer::new().await?, Peer::new().await?, Peer::new().await?];

    harness.registry.create_stream(7, source.addr())?;
    for subscriber in &subscribers {
        harness.registry.add_subscriber(7, subscriber.addr(), true)?;
    }

    source.rtp.send_to(b"x", harness.rtp).await?;
    for subscriber in &subscribers {
        expect(&subscriber.rtp, harness.rtp, b"x").await?;
    }

    harness
        .registry
        .update_subscriber(7, subscribers[1].addr(), false)?;

    source.rtp.send_to(b"y", harness.rtp).await?;
    expect(&subscribers[0].rtp, harness.rtp, b"y").await?;
    expect(&subscribers[2].rtp, harness.rtp, b"y").await?;
    expect_nothing(&subscribers[1].rtp).await?;

    wait_for(&harness.rtp_counters, |it| it.forwarded == 5).await?;

    // Enabled again, it receives again.
    harness
        .registry
        .update_subscriber(7, subscribers[1].addr(), true)?;

    source.rtp.send_to(b"z", harness.rtp).await?;
    for subscriber in &subscribers {
        expect(&subscriber.rtp, harness.rtp, b"z").await?;
    }

    Ok(())
}

#[tokio::test]
async fn unknown_source_is_dropped() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let stranger = Peer::new().await?;
    let subscriber = Peer::new().await?;

    harness.registry.create_stream(1, source.addr())?;
    harness.registry.add_subscriber(1, subscriber.addr(), true)?;

    stranger.rtp.send_to(b"hello", harness.rtp).await?;
    stranger.rtcp.send_to(b"hello", harness.rtcp).await?;
    expect_nothing(&subscriber.rtp).await?;
    expect_nothing(&subscriber.rtcp).await?;

    wait_for(&harness.rtp_counters, |it| it.dropped == 1).await?;
    wait_for(&harness.rtcp_counters, |it| it.dropped == 1).await?;

    // Once the stream is gone its own source is unknown as well.
    harness.registry.delete_stream(1)?;
    source.rtp.send_to(b"late", harness.rtp).await?;
    expect_nothing(&subscriber.rtp).await?;

    let stats = wait_for(&harness.rtp_counters, |it| it.dropped == 2).await?;
    assert_eq!(stats.forwarded, 0);

    Ok(())
}

#[tokio::test]
async fn removed_subscriber_gets_nothing() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let kept = Peer::new().await?;
    let removed = Peer::new().await?;

    harness.registry.create_stream(2, source.addr())?;
    harness.registry.add_subscriber(2, kept.addr(), true)?;
    harness.registry.add_subscriber(2, removed.addr(), true)?;
    harness.registry.remove_subscriber(2, removed.addr())?;

    source.rtp.send_to(b"only one", harness.rtp).await?;
    expect(&kept.rtp, harness.rtp, b"only one").await?;
    expect_nothing(&removed.rtp).await?;

    Ok(())
}

#[tokio::test]
async fn keeps_source_order_per_subscriber() -> Result<()> {
    let harness = Harness::new().await?;
    let source = Peer::new().await?;
    let subscribers = [Peer::new().await?, Peer::new().await?];

    harness.registry.create_stream(3, source.addr())?;
    for subscriber in &subscribers {
        harness.registry.add_subscriber(3, subscriber.addr(), true)?;
    }

    for index in 0u8..20 {
        source.rtp.send_to(&[index], harness.rtp).await?;
    }

    for subscriber in &subscribers {
        for index in 0u8..20 {
            expect(&subscriber.rtp, harness.rtp, &[index]).await?;
        }
    }

    Ok(())
}
