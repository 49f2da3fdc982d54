use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::matmul::{input}"))
        .output_type(format!("crate::matmul::{output}"))
        .codec_path("tonic_prost::ProstCodec")
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let service = Service::builder()
        .name("MatMul")
        .package("matmul")
        .method(method(
            "multiply",
            "Multiply",
            "MultiplyRequest",
            "MultiplyResponse",
        ))
        .method(method(
            "set_worker_count",
            "SetWorkerCount",
            "SetWorkerCountRequest",
            "SetWorkerCountResponse",
        ))
        .build();

    Builder::new().compile(&[service]);
}
