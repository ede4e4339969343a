//! ESP32 four-relay controller firmware library.
//!
//! Relays 1-3 are mirrored to a cloud switch service while the device is in
//! STA mode; relay 4 is local-only and can be driven by a proximity sensor.
//! When no known network is reachable the device opens its own setup AP with
//! an HTTP control surface and a TCP push channel.
//!
//! The pure modules (relays, connectivity, automation, protocol, cloud,
//! events) carry the domain logic and compile on any target so they can be
//! unit tested on the host. Everything that touches ESP-IDF is guarded by
//! `#[cfg(target_os = "espidf")]`.

pub mod automation;
pub mod cloud;
pub mod config;
pub mod connectivity;
pub mod events;
pub mod indicator;
pub mod protocol;
pub mod push_channel;
pub mod relays;
pub mod storage;

#[cfg(target_os = "espidf")]
pub mod http_server;
#[cfg(target_os = "espidf")]
pub mod runtime;
#[cfg(target_os = "espidf")]
pub mod sensor;
#[cfg(target_os = "espidf")]
pub mod wifi;
