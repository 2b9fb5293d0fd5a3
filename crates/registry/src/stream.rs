use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// Folds an address into the form used as a registry key.
///
/// An IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) and the plain IPv4
/// address compare equal after this, so a source registered as
/// `10.0.0.5:5000` still matches a datagram reported by a dual-stack
/// socket.
///
/// ```
/// use msm_dp_registry::canonicalize;
///
/// let mapped = "[::ffff:10.0.0.5]:5000".parse().unwrap();
/// let plain = "10.0.0.5:5000".parse().unwrap();
///
/// assert_eq!(canonicalize(mapped), plain);
/// ```
pub fn canonicalize(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(ip) => SocketAddr::new(ip.to_canonical(), addr.port()),
        IpAddr::V4(_) => addr,
    }
}

/// One of the two paired UDP flows of a media stream.
///
/// An endpoint is always described by its RTP address; the RTCP address
/// is the same ip with the port plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    Rtp,
    Rtcp,
}

impl Flow {
    /// Address of this flow for an endpoint whose RTP address is `addr`.
    ///
    /// Returns `None` for RTCP when the RTP port is 65535.
    ///
    /// ```
    /// use msm_dp_registry::Flow;
    ///
    /// let addr = "10.0.1.1:6000".parse().unwrap();
    ///
    /// assert_eq!(Flow::Rtp.target(addr), Some(addr));
    /// assert_eq!(Flow::Rtcp.target(addr), Some("10.0.1.1:6001".parse().unwrap()));
    /// assert_eq!(Flow::Rtcp.target("10.0.1.1:65535".parse().unwrap()), None);
    /// ```
    pub fn target(self, addr: SocketAddr) -> Option<SocketAddr> {
        match self {
            Self::Rtp => Some(addr),
            Self::Rtcp => Some(SocketAddr::new(addr.ip(), addr.port().checked_add(1)?)),
        }
    }

    /// The inverse of [`Flow::target`]: the RTP address of an endpoint seen
    /// sending from `addr` on this flow.
    pub fn rtp_address(self, addr: SocketAddr) -> Option<SocketAddr> {
        match self {
            Self::Rtp => Some(addr),
            Self::Rtcp => Some(SocketAddr::new(addr.ip(), addr.port().checked_sub(1)?)),
        }
    }
}

/// A client endpoint receiving a copy of every datagram of a stream.
///
/// Disabled subscribers stay registered and are skipped by forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber {
    /// The subscriber's RTP address.
    pub address: SocketAddr,
    pub enabled: bool,
}

/// One media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: u32,
    /// The media server's RTP address.
    pub source: SocketAddr,
    /// Subscribers in registration order, unique by address.
    pub subscribers: Arc<[Subscriber]>,
}

impl Stream {
    pub(crate) fn new(id: u32, source: SocketAddr) -> Self {
        Self {
            subscribers: Arc::from([]),
            source,
            id,
        }
    }

    pub(crate) fn position(&self, address: &SocketAddr) -> Option<usize> {
        self.subscribers
            .iter()
            .position(|item| &item.address == address)
    }
}

/// A point-in-time view of a stream handed to a forwarder.
///
/// The subscriber list is shared with the registry until the next
/// mutation of that stream replaces it, so holding a route never blocks
/// the control plane.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: u32,
    pub source: SocketAddr,
    pub subscribers: Arc<[Subscriber]>,
}

impl Route {
    /// Addresses of the enabled subscribers, in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.subscribers
            .iter()
            .filter(|item| item.enabled)
            .map(|item| item.address)
    }
}

impl From<&Stream> for Route {
    fn from(stream: &Stream) -> Self {
        Self {
            subscribers: stream.subscribers.clone(),
            source: stream.source,
            id: stream.id,
        }
    }
}
