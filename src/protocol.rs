//! Wire formats of the local control surfaces.
//!
//! JSON payload shapes for the HTTP endpoints and the push channel, the
//! push-channel text tokens, and the tiny form/query decoding the setup
//! endpoints need. All of it is pure so the shapes are pinned by host tests.

use serde::Serialize;

use crate::relays::{RelayIndex, RELAY_COUNT};

/// `/status` response body.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub mode: &'static str,
    pub wifi_connected: bool,
    pub sta_ip: String,
    pub ap_ssid: String,
    pub ir_value: u16,
    pub relay4_mode: &'static str,
    pub relay_states: [bool; RELAY_COUNT],
}

/// One `/scan` result entry.
#[derive(Debug, Serialize)]
pub struct ScanNetwork {
    pub ssid: String,
    pub rssi: i8,
    pub secure: bool,
}

/// Relay-state frame pushed over the local channel, and the reply to an
/// inbound `status` token.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelayStatesFrame {
    pub relay_states: [bool; RELAY_COUNT],
}

impl RelayStatesFrame {
    pub fn new(relay_states: [bool; RELAY_COUNT]) -> Self {
        Self { relay_states }
    }

    /// Newline-framed JSON as written to the channel.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Inbound push-channel commands, carried as short text tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    Toggle(RelayIndex),
    Status,
}

/// Parse one inbound line. Unknown or malformed tokens are dropped by the
/// caller; the channel is too informal for error replies.
pub fn parse_push_command(line: &str) -> Option<PushCommand> {
    let line = line.trim();
    if line == "status" {
        return Some(PushCommand::Status);
    }
    let raw = line.strip_prefix("toggle:")?;
    RelayIndex::parse(raw).map(PushCommand::Toggle)
}

// =============================================================================
// Form / query decoding
// =============================================================================

/// Extract a value from an `application/x-www-form-urlencoded` body.
pub fn form_value(body: &str, key: &str) -> Option<String> {
    for pair in body.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if name == key {
            return Some(url_decode(value));
        }
    }
    None
}

/// Extract a query parameter from a request URI such as `/toggle?relay=2`.
pub fn query_value(uri: &str, key: &str) -> Option<String> {
    let (_, query) = uri.split_once('?')?;
    form_value(query, key)
}

/// Minimal percent-decoding: `+` to space, `%XX` to the byte value. Invalid
/// escapes pass through literally rather than failing the whole request.
fn url_decode(raw: &str) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|h| {
                    core::str::from_utf8(h)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                });
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_four_relay_states() {
        let snapshot = StatusSnapshot {
            mode: "AP",
            wifi_connected: false,
            sta_ip: String::new(),
            ap_ssid: "ESP32-Setup-1A2B".to_string(),
            ir_value: 2750,
            relay4_mode: "auto",
            relay_states: [true, false, false, true],
        };

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(value["mode"], "AP");
        assert_eq!(value["wifi_connected"], false);
        assert_eq!(value["ir_value"], 2750);
        assert_eq!(value["relay4_mode"], "auto");
        let states = value["relay_states"].as_array().unwrap();
        assert_eq!(states.len(), 4);
        assert_eq!(states[0], true);
        assert_eq!(states[3], true);
    }

    #[test]
    fn relay_frame_is_newline_terminated_json() {
        let line = RelayStatesFrame::new([false, true, false, false]).to_line();
        assert_eq!(line, "{\"relay_states\":[false,true,false,false]}\n");
    }

    #[test]
    fn scan_entry_shape() {
        let entry = ScanNetwork {
            ssid: "HomeNet".to_string(),
            rssi: -61,
            secure: true,
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            "{\"ssid\":\"HomeNet\",\"rssi\":-61,\"secure\":true}"
        );
    }

    #[test]
    fn push_command_tokens() {
        assert_eq!(parse_push_command("status"), Some(PushCommand::Status));
        assert_eq!(parse_push_command(" status \r"), Some(PushCommand::Status));
        assert_eq!(
            parse_push_command("toggle:3"),
            Some(PushCommand::Toggle(RelayIndex::new(3).unwrap()))
        );
        assert_eq!(parse_push_command("toggle:0"), None);
        assert_eq!(parse_push_command("toggle:5"), None);
        assert_eq!(parse_push_command("toggle:"), None);
        assert_eq!(parse_push_command("reboot"), None);
    }

    #[test]
    fn form_and_query_decoding() {
        assert_eq!(
            form_value("ssid=My+Net&pass=p%40ss", "ssid").as_deref(),
            Some("My Net")
        );
        assert_eq!(
            form_value("ssid=My+Net&pass=p%40ss", "pass").as_deref(),
            Some("p@ss")
        );
        assert_eq!(form_value("ssid=x", "pass"), None);
        // A key without '=' decodes to an empty value, not a miss.
        assert_eq!(form_value("ssid", "ssid").as_deref(), Some(""));

        assert_eq!(query_value("/toggle?relay=2", "relay").as_deref(), Some("2"));
        assert_eq!(query_value("/toggle", "relay"), None);
        assert_eq!(
            query_value("/relay4_mode?mode=auto&x=1", "mode").as_deref(),
            Some("auto")
        );
    }

    #[test]
    fn url_decode_tolerates_bad_escapes() {
        assert_eq!(form_value("k=100%", "k").as_deref(), Some("100%"));
        assert_eq!(form_value("k=%zz", "k").as_deref(), Some("%zz"));
    }
}
