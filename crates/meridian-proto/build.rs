fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_file = "../../proto/meridian/v1/meridian.proto";

    // Use the vendored protoc unless the environment provides one.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&[proto_file], &["../../proto"])?;

    println!("cargo:rerun-if-changed={proto_file}");
    println!("cargo:rerun-if-changed=../../proto/meridian/v1");

    Ok(())
}
