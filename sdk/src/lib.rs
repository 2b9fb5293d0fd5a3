//! # MSM Data Plane SDK
//!
//! A client for the gRPC API of the media streaming mesh data plane. The
//! control plane uses it to register streams, attach subscribers and
//! toggle delivery to them.
//!
//! ```no_run
//! use msm_dp_sdk::{DataPlane, tonic::transport::Channel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Channel::from_static("http://127.0.0.1:9000")
//!     .connect()
//!     .await?;
//!
//! let mut client = DataPlane::new(channel);
//!
//! // Packets from 10.0.0.5:5000 (and RTCP from :5001) belong to stream 1.
//! client.create_stream(1, "10.0.0.5:5000".parse()?).await?;
//!
//! // Copy them to 10.0.1.1:6000 (and RTCP to :6001).
//! client.add_endpoint(1, "10.0.1.1:6000".parse()?, true).await?;
//!
//! // Pause delivery without forgetting the subscriber.
//! client.update_endpoint(1, "10.0.1.1:6000".parse()?, false).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every helper returns the `success` field of the reply. A rejected
//! operation (unknown stream, duplicate create, ...) is `Ok(false)`;
//! `Err` is reserved for transport failures and malformed requests.

pub use protos;
pub use tonic;

use std::net::SocketAddr;

use protos::{
    Endpoint, ProxyProtocol, StreamData, StreamOperation,
    health::{
        HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
    },
    msm_data_plane_client::MsmDataPlaneClient,
};

use tonic::{Request, Status, transport::Channel};

fn endpoint(address: SocketAddr) -> Endpoint {
    Endpoint {
        ip: address.ip().to_string(),
        port: address.port() as u32,
        quic_stream: 0,
        encap: 0,
    }
}

/// data plane client
///
/// Wraps the generated client with one method per stream operation.
#[derive(Clone)]
pub struct DataPlane {
    client: MsmDataPlaneClient<Channel>,
    health: HealthClient<Channel>,
}

impl DataPlane {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: MsmDataPlaneClient::new(channel.clone()),
            health: HealthClient::new(channel),
        }
    }

    /// Sends a raw message.
    pub async fn stream_add_del(&mut self, data: StreamData) -> Result<bool, Status> {
        Ok(self
            .client
            .stream_add_del(Request::new(data))
            .await?
            .into_inner()
            .success)
    }

    async fn send(
        &mut self,
        id: u32,
        operation: StreamOperation,
        address: Option<SocketAddr>,
        enable: bool,
    ) -> Result<bool, Status> {
        self.stream_add_del(StreamData {
            id,
            operation: operation as i32,
            protocol: ProxyProtocol::Udp as i32,
            endpoint: address.map(endpoint),
            enable,
        })
        .await
    }

    /// register a stream fed by the RTP source `source`
    pub async fn create_stream(&mut self, id: u32, source: SocketAddr) -> Result<bool, Status> {
        self.send(id, StreamOperation::Create, Some(source), false)
            .await
    }

    /// delete a stream and all of its subscribers
    pub async fn delete_stream(&mut self, id: u32) -> Result<bool, Status> {
        self.send(id, StreamOperation::Delete, None, false).await
    }

    /// stream level update
    ///
    /// The data plane does not support it and always answers `false`.
    pub async fn update(&mut self, id: u32) -> Result<bool, Status> {
        self.send(id, StreamOperation::Update, None, false).await
    }

    /// add a subscriber, or set the enable bit of an existing one
    ///
    /// Returns `enable` when the subscriber was added.
    pub async fn add_endpoint(
        &mut self,
        id: u32,
        address: SocketAddr,
        enable: bool,
    ) -> Result<bool, Status> {
        self.send(id, StreamOperation::AddEp, Some(address), enable)
            .await
    }

    /// set the enable bit of an existing subscriber
    ///
    /// Returns `enable` when the subscriber was updated.
    pub async fn update_endpoint(
        &mut self,
        id: u32,
        address: SocketAddr,
        enable: bool,
    ) -> Result<bool, Status> {
        self.send(id, StreamOperation::UpdEp, Some(address), enable)
            .await
    }

    /// remove a subscriber
    pub async fn remove_endpoint(&mut self, id: u32, address: SocketAddr) -> Result<bool, Status> {
        self.send(id, StreamOperation::DelEp, Some(address), false)
            .await
    }

    /// ask the standard health service for the status of the data plane
    pub async fn health_check(&mut self) -> Result<ServingStatus, Status> {
        let status = self
            .health
            .check(Request::new(HealthCheckRequest {
                service: protos::SERVICE_NAME.to_string(),
            }))
            .await?
            .into_inner()
            .status();

        Ok(status)
    }
}
