fn main() {
    // Compile the lock service proto
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/latch.proto"], &["proto"])
        .unwrap();
}
