//! Control events funneled into the single control loop.
//!
//! The HTTP handler threads and the cloud websocket callback never mutate
//! relay or mode state themselves; they package the request as a
//! [`ControlEvent`] and, where a response needs data, wait on a per-request
//! reply channel. The loop drains the queue once per iteration, so there is
//! never more than one mutation in flight.

use std::sync::mpsc::Sender;

use crate::cloud::CloudCommand;
use crate::protocol::{ScanNetwork, StatusSnapshot};
use crate::relays::{Relay4Mode, RelayIndex};

pub enum ControlEvent {
    /// Flip one relay; replies with the new boolean.
    Toggle {
        index: RelayIndex,
        reply: Sender<bool>,
    },
    /// Change the relay-4 mode; replies once applied.
    SetRelay4Mode {
        mode: Relay4Mode,
        reply: Sender<()>,
    },
    /// Full status snapshot for `/status`.
    Status { reply: Sender<StatusSnapshot> },
    /// Blocking network scan for `/scan`. Nothing else is serviced while
    /// the scan runs.
    Scan { reply: Sender<Vec<ScanNetwork>> },
    /// Credentials submitted on `/save`; the ack has already been sent, the
    /// provisioning transition happens asynchronously in the loop.
    Provision { ssid: String, pass: String },
    /// Inbound command from the cloud bridge.
    Cloud(CloudCommand),
}

impl core::fmt::Debug for ControlEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Toggle { index, .. } => write!(f, "Toggle({})", index.get()),
            Self::SetRelay4Mode { mode, .. } => write!(f, "SetRelay4Mode({})", mode.as_str()),
            Self::Status { .. } => write!(f, "Status"),
            Self::Scan { .. } => write!(f, "Scan"),
            Self::Provision { ssid, .. } => write!(f, "Provision({ssid:?})"),
            Self::Cloud(command) => write!(f, "Cloud({:?})", command.device_id),
        }
    }
}
