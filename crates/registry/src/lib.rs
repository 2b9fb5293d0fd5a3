pub mod stream;

pub use self::stream::{Flow, Route, Stream, Subscriber, canonicalize};

use std::{net::SocketAddr, sync::Arc};

use ahash::{HashMap, HashMapExt};
use parking_lot::RwLock;

/// Reasons a registry mutation is rejected.
///
/// A rejected mutation never changes the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// CREATE for an id that is already live.
    StreamExists,
    /// CREATE whose source already feeds another live stream.
    SourceInUse(u32),
    StreamNotFound,
    EndpointNotFound,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamExists => write!(f, "stream already exists"),
            Self::SourceInUse(id) => write!(f, "source already used by stream {id}"),
            Self::StreamNotFound => write!(f, "stream not found"),
            Self::EndpointNotFound => write!(f, "endpoint not found"),
        }
    }
}

struct Tables {
    streams: HashMap<u32, Stream>,
    // Keyed by the canonical RTP address of each stream's source.
    sources: HashMap<SocketAddr, u32>,
}

impl Tables {
    fn stream_mut(&mut self, id: u32) -> Result<&mut Stream, Error> {
        self.streams.get_mut(&id).ok_or(Error::StreamNotFound)
    }
}

/// The stream and subscriber table shared by the control plane and the
/// forwarders.
///
/// Both maps live behind one lock, so a reader observes either the state
/// before or the state after any mutation. Subscriber lists are
/// copy-on-write: a mutation builds a new list, and lookups only clone
/// the `Arc` of the current one.
///
/// ```
/// use msm_dp_registry::{Flow, Registry};
///
/// let registry = Registry::default();
///
/// registry.create_stream(1, "10.0.0.5:5000".parse().unwrap()).unwrap();
/// registry.add_subscriber(1, "10.0.1.1:6000".parse().unwrap(), true).unwrap();
///
/// let route = registry
///     .lookup(Flow::Rtcp, "10.0.0.5:5001".parse().unwrap())
///     .unwrap();
///
/// assert_eq!(route.id, 1);
/// assert_eq!(route.enabled().count(), 1);
/// ```
pub struct Registry(RwLock<Tables>);

impl Default for Registry {
    fn default() -> Self {
        Self(RwLock::new(Tables {
            streams: HashMap::with_capacity(64),
            sources: HashMap::with_capacity(64),
        }))
    }
}

impl Registry {
    /// Registers a stream with no subscribers.
    ///
    /// An id can only be created once while it is live, and a source can
    /// only feed one stream.
    pub fn create_stream(&self, id: u32, source: SocketAddr) -> Result<(), Error> {
        let source = canonicalize(source);
        let mut tables = self.0.write();

        if tables.streams.contains_key(&id) {
            return Err(Error::StreamExists);
        }

        if let Some(owner) = tables.sources.get(&source) {
            return Err(Error::SourceInUse(*owner));
        }

        tables.sources.insert(source, id);
        tables.streams.insert(id, Stream::new(id, source));
        Ok(())
    }

    /// Removes a stream, its subscribers and its source index entry.
    ///
    /// Returns the removed stream.
    pub fn delete_stream(&self, id: u32) -> Result<Stream, Error> {
        let mut tables = self.0.write();
        let stream = tables.streams.remove(&id).ok_or(Error::StreamNotFound)?;

        if tables.sources.get(&stream.source) == Some(&id) {
            tables.sources.remove(&stream.source);
        }

        Ok(stream)
    }

    /// Adds a subscriber, or updates the enable bit of an existing one.
    ///
    /// An existing subscriber keeps its position in the list.
    pub fn add_subscriber(&self, id: u32, address: SocketAddr, enabled: bool) -> Result<(), Error> {
        let address = canonicalize(address);
        let mut tables = self.0.write();
        let stream = tables.stream_mut(id)?;

        let mut subscribers = stream.subscribers.to_vec();
        if let Some(index) = stream.position(&address) {
            subscribers[index].enabled = enabled;
        } else {
            subscribers.push(Subscriber { address, enabled });
        }

        stream.subscribers = Arc::from(subscribers);
        Ok(())
    }

    /// Sets the enable bit of an existing subscriber.
    pub fn update_subscriber(
        &self,
        id: u32,
        address: SocketAddr,
        enabled: bool,
    ) -> Result<(), Error> {
        let address = canonicalize(address);
        let mut tables = self.0.write();
        let stream = tables.stream_mut(id)?;
        let index = stream.position(&address).ok_or(Error::EndpointNotFound)?;

        // Nothing changes, keep the list the forwarders already hold.
        if stream.subscribers[index].enabled == enabled {
            return Ok(());
        }

        let mut subscribers = stream.subscribers.to_vec();
        subscribers[index].enabled = enabled;

        stream.subscribers = Arc::from(subscribers);
        Ok(())
    }

    pub fn remove_subscriber(&self, id: u32, address: SocketAddr) -> Result<(), Error> {
        let address = canonicalize(address);
        let mut tables = self.0.write();
        let stream = tables.stream_mut(id)?;
        let index = stream.position(&address).ok_or(Error::EndpointNotFound)?;

        let mut subscribers = stream.subscribers.to_vec();
        subscribers.remove(index);

        stream.subscribers = Arc::from(subscribers);
        Ok(())
    }

    /// Finds the stream fed by the RTP source `addr`.
    ///
    /// The returned route is verified: its source equals `addr` after
    /// canonicalisation.
    pub fn lookup_by_rtp_source(&self, addr: SocketAddr) -> Option<Route> {
        let addr = canonicalize(addr);
        let tables = self.0.read();
        let stream = tables.streams.get(tables.sources.get(&addr)?)?;

        if stream.source != addr {
            return None;
        }

        Some(Route::from(stream))
    }

    /// Finds the stream whose source sends RTCP from `addr`, that is whose
    /// RTP source is `addr` with the port minus one.
    pub fn lookup_by_rtcp_source(&self, addr: SocketAddr) -> Option<Route> {
        self.lookup_by_rtp_source(Flow::Rtcp.rtp_address(addr)?)
    }

    pub fn lookup(&self, flow: Flow, addr: SocketAddr) -> Option<Route> {
        match flow {
            Flow::Rtp => self.lookup_by_rtp_source(addr),
            Flow::Rtcp => self.lookup_by_rtcp_source(addr),
        }
    }

    pub fn get(&self, id: u32) -> Option<Stream> {
        self.0.read().streams.get(&id).cloned()
    }

    /// All indexed sources with the id of the stream they feed.
    pub fn sources(&self) -> Vec<(SocketAddr, u32)> {
        self.0
            .read()
            .sources
            .iter()
            .map(|(addr, id)| (*addr, *id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
