use protos::health::{
    HealthCheckRequest, HealthCheckResponse, health_check_response::ServingStatus,
    health_server::Health,
};

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

/// Standard health service.
///
/// The data plane has no degraded state: once the server answers at all,
/// every service is serving.
#[derive(Default, Clone, Copy)]
pub struct HealthChecker;

#[tonic::async_trait]
impl Health for HealthChecker {
    type WatchStream = ReceiverStream<Result<HealthCheckResponse, Status>>;

    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        log::debug!("health check: service={:?}", request.get_ref().service);

        Ok(Response::new(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        }))
    }

    async fn watch(
        &self,
        _: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("Watching is not supported"))
    }
}
