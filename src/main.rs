#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    esp32_relay_firmware::runtime::run()
}

/// The firmware only runs on the ESP32; host builds exist for the pure-core
/// unit tests.
#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("esp32-relay-firmware must be built for the espidf target");
}
