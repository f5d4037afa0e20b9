// build.rs: stamp the build update identifier reported by GET /version.
//
// Set LIVEGATE_UPDATE at build time (release tooling passes the date or
// revision); local builds report "dev".

fn main() {
    println!("cargo:rerun-if-env-changed=LIVEGATE_UPDATE");
    let update = std::env::var("LIVEGATE_UPDATE").unwrap_or_else(|_| "dev".to_string());
    println!("cargo:rustc-env=LIVEGATE_UPDATE={}", update);
}
