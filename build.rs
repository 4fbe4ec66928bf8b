//! Generates the setup service client and server stubs.
//!
//! The messages are hand-written prost types in `src/remote/proto.rs`, so
//! only the service plumbing is generated here and no `protoc` is needed.

fn main() {
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::remote::proto::{}", input))
            .output_type(format!("crate::remote::proto::{}", output))
            .codec_path("tonic::codec::ProstCodec")
    };

    let service = tonic_build::manual::Service::builder()
        .name("SetupService")
        .package("tct_setup")
        .method(method("hello", "Hello", "HelloRequest", "HelloReply").build())
        .method(method("call", "Call", "CallRequest", "CallReply").build())
        .method(
            method("lease", "Lease", "LeaseRequest", "LeaseReply")
                .client_streaming()
                .server_streaming()
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
    println!("cargo:rerun-if-changed=build.rs");
}
