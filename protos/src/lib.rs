//! Generated bindings for the data plane control API and the standard
//! gRPC health service.

pub mod health {
    tonic::include_proto!("grpc.health.v1");
}

tonic::include_proto!("msm_dp");

/// Fully qualified name of the data plane service, as reported to health
/// checks.
pub const SERVICE_NAME: &str = "msm_dp.MsmDataPlane";
