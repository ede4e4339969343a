//! Compile-time configuration: pins, identifiers, timeouts, thresholds.

use core::time::Duration;

/// Relay boards of this series pull the line low to energize the coil.
/// The relay lines themselves sit on GPIO16-19, the force-setup button on
/// GPIO0, the status LED on GPIO2 and the proximity sensor on GPIO34; pin
/// ownership is wired up in `runtime::run`.
pub const RELAY_ACTIVE_LOW: bool = true;

/// Inclusive hysteresis window for the proximity automation: the sensor
/// midpoint (2800) plus/minus 200 counts.
pub const IR_WINDOW_MIN: u16 = 2600;
pub const IR_WINDOW_MAX: u16 = 3000;

/// Proximity sampling cadence.
pub const IR_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded STA connect attempts: boot-time attempts against saved and
/// fallback credentials, and the shorter provisioning attempt.
pub const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const PROVISION_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Network the device falls back to when the saved credentials fail.
pub const FALLBACK_SSID: &str = match option_env!("FALLBACK_SSID") {
    Some(ssid) => ssid,
    None => "Rudra 2.0",
};
pub const FALLBACK_PASS: &str = match option_env!("FALLBACK_PASS") {
    Some(pass) => pass,
    None => "ssssssss",
};

/// Setup AP SSID prefix; the STA MAC tail is appended at runtime.
pub const AP_SSID_PREFIX: &str = "ESP32-Setup-";

/// TCP port of the local push channel (the HTTP surface uses port 80).
pub const PUSH_CHANNEL_PORT: u16 = 81;

/// Control-loop idle backoff: tight while push clients are connected,
/// relaxed otherwise. A scheduling hint, not a correctness requirement.
pub const LOOP_DELAY_ACTIVE: Duration = Duration::from_millis(10);
pub const LOOP_DELAY_IDLE: Duration = Duration::from_millis(150);

/// Cloud switch service endpoint and application credentials.
pub const CLOUD_ENDPOINT: &str = match option_env!("CLOUD_ENDPOINT") {
    Some(url) => url,
    None => "wss://ws.switch-cloud.example.com",
};
pub const CLOUD_APP_KEY: &str = match option_env!("CLOUD_APP_KEY") {
    Some(key) => key,
    None => "00000000-0000-0000-0000-000000000000",
};
pub const CLOUD_APP_SECRET: &str = match option_env!("CLOUD_APP_SECRET") {
    Some(secret) => secret,
    None => "0000000000000000000000000000000000000000",
};

/// Cloud device identifiers for relays 1-3, in slot order. Relay 4 has no
/// cloud identity on purpose.
pub const CLOUD_DEVICE_IDS: [&str; 3] = [
    match option_env!("CLOUD_DEVICE_ID_1") {
        Some(id) => id,
        None => "64b7f1e2a401cd5b28000001",
    },
    match option_env!("CLOUD_DEVICE_ID_2") {
        Some(id) => id,
        None => "64b7f1e2a401cd5b28000002",
    },
    match option_env!("CLOUD_DEVICE_ID_3") {
        Some(id) => id,
        None => "64b7f1e2a401cd5b28000003",
    },
];

/// NVS namespace and keys for the persisted WiFi credentials.
pub const NVS_NAMESPACE: &str = "wifi";
pub const NVS_KEY_SSID: &str = "ssid";
pub const NVS_KEY_PASS: &str = "pass";
