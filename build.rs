fn main() {
    // ESP-IDF build configuration. Host builds (unit tests) have no IDF
    // environment to propagate, so only wire it up for the device target.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    // Re-run if this file changes
    println!("cargo:rerun-if-changed=build.rs");
}
