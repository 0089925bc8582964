use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");

    // Server stubs only; gateways bring their own clients.
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(
            &[proto_dir.join("turnstile/v1/turnstile.proto")],
            &[&proto_dir],
        )?;

    Ok(())
}
