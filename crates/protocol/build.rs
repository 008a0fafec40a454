//! Generates the `sitefleet.v1.Controller` service stubs.
//!
//! Messages are plain prost derives in `src/proto.rs`, so only the service
//! plumbing is generated and no `.proto` compiler is needed.

use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let controller = Service::builder()
        .name("Controller")
        .package("sitefleet.v1")
        .method(method("get_state", "GetState", "GetStateRequest", "StateSnapshot").build())
        .method(
            method("watch_state", "WatchState", "WatchStateRequest", "StateSnapshot")
                .server_streaming()
                .build(),
        )
        .method(
            method("health_channel", "HealthChannel", "HealthReport", "HealthPing")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[controller]);
}
