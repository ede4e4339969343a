//! Cloud switch-service bridge.
//!
//! Relays 1-3 carry fixed cloud device identifiers. The bridge resolves
//! inbound power commands through a static lookup table (validated once at
//! startup), mirrors local changes upstream as state events, and rejects
//! unknown identifiers without touching any relay. Connection handling
//! beyond the initial connect is the transport SDK's problem; the bridge is
//! started exactly once on entry to STA mode and never while the setup AP
//! is up.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::relays::RelayIndex;

/// Number of cloud-bound relays (slots 1-3).
pub const CLOUD_RELAY_COUNT: usize = 3;

/// Inbound power command from the switch service.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudCommand {
    pub device_id: String,
    pub action: String,
    pub on: bool,
}

/// Outbound state event keeping the remote view in sync with local changes.
#[derive(Debug, Serialize)]
pub struct CloudStateEvent {
    pub device_id: &'static str,
    pub event: &'static str,
    pub on: bool,
}

/// Static device-id-to-relay lookup table.
pub struct DeviceTable {
    entries: [(&'static str, RelayIndex); CLOUD_RELAY_COUNT],
}

impl DeviceTable {
    /// Build and validate the table. Empty or duplicate identifiers are a
    /// configuration error caught at startup, not at command time.
    pub fn new(device_ids: [&'static str; CLOUD_RELAY_COUNT]) -> Result<Self> {
        let mut entries = [("", RelayIndex::RELAY_4); CLOUD_RELAY_COUNT];
        for (slot, &id) in device_ids.iter().enumerate() {
            if id.is_empty() {
                bail!("cloud device id for relay {} is empty", slot + 1);
            }
            if device_ids[..slot].contains(&id) {
                bail!("cloud device id {id} is assigned twice");
            }
            let index = RelayIndex::new(slot as u8 + 1)
                .expect("slot 0..3 maps to relay index 1..=3");
            entries[slot] = (id, index);
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, device_id: &str) -> Option<RelayIndex> {
        self.entries
            .iter()
            .find(|(id, _)| *id == device_id)
            .map(|&(_, index)| index)
    }

    /// Cloud identity of a relay, if it has one. Relay 4 never does.
    pub fn device_for(&self, index: RelayIndex) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|&&(_, entry)| entry == index)
            .map(|&(id, _)| id)
    }
}

/// Protocol logic of the bridge, independent of the transport.
pub struct CloudBridge {
    table: DeviceTable,
}

impl CloudBridge {
    pub fn new(table: DeviceTable) -> Self {
        Self { table }
    }

    /// Resolve an inbound command to the relay it targets. Unrecognized
    /// identifiers and unknown actions are rejected without mutating state;
    /// the rejection is logged but never surfaced to the local UI.
    pub fn resolve_command(&self, command: &CloudCommand) -> Option<RelayIndex> {
        if command.action != "set_power" {
            log::warn!("cloud: unknown action {:?}", command.action);
            return None;
        }
        let index = self.table.resolve(&command.device_id);
        if index.is_none() {
            log::warn!("cloud: unknown device id {:?}", command.device_id);
        }
        index
    }

    /// State event for a local relay change, or `None` for the local-only
    /// relay 4.
    pub fn state_event(&self, index: RelayIndex, on: bool) -> Option<CloudStateEvent> {
        self.table.device_for(index).map(|device_id| CloudStateEvent {
            device_id,
            event: "power_state",
            on,
        })
    }
}

pub fn parse_cloud_frame(payload: &str) -> Option<CloudCommand> {
    match serde_json::from_str(payload) {
        Ok(command) => Some(command),
        Err(err) => {
            log::warn!("cloud: dropping malformed frame: {err}");
            None
        }
    }
}

// =============================================================================
// Websocket transport (espidf)
// =============================================================================

#[cfg(target_os = "espidf")]
pub use self::link::CloudLink;

#[cfg(target_os = "espidf")]
mod link {
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use embedded_svc::ws::FrameType;
    use esp_idf_svc::ws::client::{
        EspWebSocketClient, EspWebSocketClientConfig, WebSocketEvent, WebSocketEventType,
    };

    use super::{parse_cloud_frame, CloudStateEvent};
    use crate::config;
    use crate::events::ControlEvent;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Thin wrapper over the websocket SDK. Inbound frames become
    /// [`ControlEvent::Cloud`] messages so all relay mutation stays inside
    /// the control loop; retry and backoff are left to the SDK.
    pub struct CloudLink {
        client: EspWebSocketClient<'static>,
    }

    impl CloudLink {
        pub fn connect(events: Sender<ControlEvent>) -> Result<Self> {
            // Application credentials ride on the connect URL; the service
            // rejects the session during the handshake if they are stale.
            let url = format!(
                "{}?app_key={}&app_secret={}",
                config::CLOUD_ENDPOINT,
                config::CLOUD_APP_KEY,
                config::CLOUD_APP_SECRET
            );

            let ws_config = EspWebSocketClientConfig::default();

            let client = EspWebSocketClient::new(&url, &ws_config, CONNECT_TIMEOUT, move |event| {
                Self::on_event(&events, event)
            })
            .context("cloud websocket connect failed")?;

            log::info!("cloud: bridge connected to {}", config::CLOUD_ENDPOINT);
            Ok(Self { client })
        }

        fn on_event(
            events: &Sender<ControlEvent>,
            event: &Result<WebSocketEvent<'_>, esp_idf_svc::io::EspIOError>,
        ) {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    log::warn!("cloud: websocket error: {err}");
                    return;
                }
            };
            match &event.event_type {
                WebSocketEventType::Text(payload) => {
                    if let Some(command) = parse_cloud_frame(payload) {
                        // The loop may already be gone during shutdown.
                        let _ = events.send(ControlEvent::Cloud(command));
                    }
                }
                WebSocketEventType::Connected => log::info!("cloud: session established"),
                WebSocketEventType::Disconnected => log::warn!("cloud: session lost"),
                _ => {}
            }
        }

        pub fn send_state_event(&mut self, event: &CloudStateEvent) -> Result<()> {
            let payload = serde_json::to_string(event)?;
            self.client
                .send(FrameType::Text(false), payload.as_bytes())
                .context("cloud state event send failed")?;
            Ok(())
        }
    }
}
