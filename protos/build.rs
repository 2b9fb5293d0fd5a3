fn main() {
    println!("cargo:rerun-if-changed=msm_dp.proto");
    println!("cargo:rerun-if-changed=health.proto");

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["msm_dp.proto", "health.proto"], &["."])
        .expect("failed to compile gRPC definitions");
}
