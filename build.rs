fn main() {
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .unwrap_or_else(|e| panic!("vendored protoc unavailable: {e}"));
    std::env::set_var("PROTOC", protoc_path);

    println!("cargo:rerun-if-changed=proto/catalog.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(&["proto/catalog.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("Failed to compile protos: {e}"));
}
