use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use protos::{
    Endpoint, ProxyProtocol, StreamData, StreamOperation, StreamResult,
    msm_data_plane_server::MsmDataPlane,
};

use registry::{Error, Registry};
use tonic::{Request, Response, Status};

// A malformed endpoint fails the call with INVALID_ARGUMENT instead of a
// `false` reply, `false` only ever means the registry refused the change.
fn parse_endpoint(endpoint: Option<&Endpoint>) -> Result<SocketAddr, Status> {
    let endpoint = endpoint.ok_or_else(|| Status::invalid_argument("endpoint is missing"))?;
    let ip = endpoint
        .ip
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| Status::invalid_argument(format!("invalid endpoint ip: {}", endpoint.ip)))?;

    let port = u16::try_from(endpoint.port).map_err(|_| {
        Status::invalid_argument(format!("invalid endpoint port: {}", endpoint.port))
    })?;

    Ok(SocketAddr::new(ip, port))
}

/// Translates control plane messages into registry mutations.
///
/// This is the only writer of the registry. Each operation is a single
/// registry call, so the registry write lock orders concurrent requests.
pub struct Controller {
    registry: Arc<Registry>,
}

impl Controller {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn endpoint(&self, data: &StreamData, operation: StreamOperation) -> Result<SocketAddr, Status> {
        parse_endpoint(data.endpoint.as_ref()).inspect_err(|e| {
            log::error!(
                "malformed endpoint: id={}, operation={operation:?}, endpoint={:?}, error={}",
                data.id,
                data.endpoint,
                e.message()
            );
        })
    }

    /// Applies one message and returns the `success` value of the reply.
    ///
    /// Only malformed messages are errors; a rejected mutation is a
    /// `false` reply.
    pub async fn apply(&self, data: &StreamData) -> Result<bool, Status> {
        let id = data.id;
        let operation = StreamOperation::try_from(data.operation).map_err(|_| {
            log::error!("unknown stream operation: id={id}, operation={}", data.operation);

            Status::invalid_argument(format!("unknown stream operation: {}", data.operation))
        })?;

        log::debug!(
            "stream add del: id={id}, operation={operation:?}, protocol={:?}, endpoint={:?}, enable={}",
            ProxyProtocol::try_from(data.protocol).ok(),
            data.endpoint,
            data.enable,
        );

        let ret = match operation {
            StreamOperation::Update => {
                log::error!("stream update is not supported: id={id}");

                return Ok(false);
            }
            StreamOperation::Create => {
                let source = self.endpoint(data, operation)?;

                self.registry
                    .create_stream(id, source)
                    .map(|_| {
                        log::info!("stream created: id={id}, source={source}");
                        true
                    })
            }
            StreamOperation::Delete => self.registry.delete_stream(id).map(|stream| {
                log::info!(
                    "stream deleted: id={id}, source={}, subscribers={}",
                    stream.source,
                    stream.subscribers.len()
                );

                true
            }),
            StreamOperation::AddEp => {
                let address = self.endpoint(data, operation)?;

                self.registry
                    .add_subscriber(id, address, data.enable)
                    .map(|_| {
                        log::info!(
                            "endpoint added: id={id}, addr={address}, enable={}",
                            data.enable
                        );

                        data.enable
                    })
            }
            StreamOperation::UpdEp => {
                let address = self.endpoint(data, operation)?;

                self.registry
                    .update_subscriber(id, address, data.enable)
                    .map(|_| {
                        log::info!(
                            "endpoint updated: id={id}, addr={address}, enable={}",
                            data.enable
                        );

                        data.enable
                    })
            }
            StreamOperation::DelEp => {
                let address = self.endpoint(data, operation)?;

                self.registry.remove_subscriber(id, address).map(|_| {
                    log::info!("endpoint removed: id={id}, addr={address}");
                    true
                })
            }
        };

        Ok(ret.unwrap_or_else(|e: Error| {
            log::warn!(
                "stream operation rejected: id={id}, operation={operation:?}, endpoint={:?}, error={e}",
                data.endpoint
            );

            false
        }))
    }
}

#[tonic::async_trait]
impl MsmDataPlane for Controller {
    async fn stream_add_del(
        &self,
        request: Request<StreamData>,
    ) -> Result<Response<StreamResult>, Status> {
        let success = self.apply(request.get_ref()).await?;

        Ok(Response::new(StreamResult { success }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u32, operation: StreamOperation, ip: &str, port: u32, enable: bool) -> StreamData {
        StreamData {
            id,
            operation: operation as i32,
            protocol: ProxyProtocol::Udp as i32,
            endpoint: Some(Endpoint {
                ip: ip.to_string(),
                port,
                quic_stream: 0,
                encap: 0,
            }),
            enable,
        }
    }

    #[tokio::test]
    async fn dispatches_operations() -> anyhow::Result<()> {
        let registry = Arc::new(Registry::default());
        let controller = Controller::new(registry.clone());

        assert!(
            controller
                .apply(&message(1, StreamOperation::Create, "10.0.0.5", 5000, false))
                .await?
        );
        assert!(
            controller
                .apply(&message(1, StreamOperation::AddEp, "10.0.1.1", 6000, true))
                .await?
        );

        // The reply echoes the enable bit.
        assert!(
            !controller
                .apply(&message(1, StreamOperation::UpdEp, "10.0.1.1", 6000, false))
                .await?
        );
        assert!(!registry.get(1).unwrap().subscribers[0].enabled);

        assert!(
            controller
                .apply(&message(1, StreamOperation::DelEp, "10.0.1.1", 6000, false))
                .await?
        );
        assert!(registry.get(1).unwrap().subscribers.is_empty());

        let mut delete = message(1, StreamOperation::Delete, "", 0, false);
        delete.endpoint = None;

        assert!(controller.apply(&delete).await?);
        assert!(!controller.apply(&delete).await?);
        assert!(registry.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() -> anyhow::Result<()> {
        let registry = Arc::new(Registry::default());
        let controller = Controller::new(registry.clone());
        let create = message(1, StreamOperation::Create, "10.0.0.5", 5000, false);

        assert!(controller.apply(&create).await?);
        assert!(
            !controller
                .apply(&message(1, StreamOperation::Create, "10.0.0.6", 5002, false))
                .await?
        );

        assert_eq!(registry.get(1).unwrap().source, "10.0.0.5:5000".parse::<SocketAddr>()?);
        assert_eq!(registry.sources().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn rejects_without_mutation() -> anyhow::Result<()> {
        let registry = Arc::new(Registry::default());
        let controller = Controller::new(registry.clone());

        // Unknown stream.
        assert!(
            !controller
                .apply(&message(9, StreamOperation::AddEp, "10.0.1.1", 6000, true))
                .await?
        );

        // Update at the stream level is not supported.
        assert!(
            !controller
                .apply(&message(9, StreamOperation::Update, "10.0.0.5", 5000, true))
                .await?
        );

        let status = controller
            .apply(&message(9, StreamOperation::Create, "not-an-ip", 5000, false))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = controller
            .apply(&message(9, StreamOperation::Create, "10.0.0.5", 70000, false))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut unknown = message(9, StreamOperation::Create, "10.0.0.5", 5000, false);
        unknown.operation = 42;
        assert_eq!(
            controller.apply(&unknown).await.unwrap_err().code(),
            tonic::Code::InvalidArgument
        );

        assert!(registry.is_empty());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_have_one_winner() -> anyhow::Result<()> {
        let registry = Arc::new(Registry::default());
        let controller = Arc::new(Controller::new(registry.clone()));

        let tasks = (0..16u32)
            .map(|index| {
                let controller = controller.clone();
                let create = message(
                    1,
                    StreamOperation::Create,
                    &format!("10.0.0.{}", index + 1),
                    5000,
                    false,
                );

                tokio::spawn(async move { controller.apply(&create).await })
            })
            .collect::<Vec<_>>();

        let mut winners = 0;
        for task in tasks {
            if task.await?? {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.sources().len(), 1);

        Ok(())
    }
}
