// Stamps the binary with its build time for `--version`

fn main() {
    let build_time = chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_time);
    // no rerun-if-changed: the stamp is refreshed on every build
}
