//! Connectivity state machine.
//!
//! Decides between the two exclusive operating modes: AP (setup portal +
//! push channel live, cloud bridge down) and STA (cloud bridge live, local
//! surfaces down). The machine is pure: it maps events to a new state plus
//! an ordered list of actions, and the runtime executes those actions
//! against the WiFi driver, the servers and the credential store. Ordering
//! inside an action list is part of the contract — the local surface is
//! always torn down before a station attempt starts, and the cloud bridge
//! only ever starts on entry to `StaActive`.
//!
//! Transitions are driven synchronously by the control loop; a bounded
//! connect attempt occupies the loop for up to its timeout and no second
//! transition can start while one is in flight.

use core::time::Duration;

use crate::config;

/// Operating mode of the terminal states. Exactly one is active whenever
/// the machine has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityMode {
    Ap,
    Sta,
}

impl ConnectivityMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ap => "AP",
            Self::Sta => "STA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Boot,
    ConnectingSaved,
    ConnectingFallback,
    /// Station attempt with operator-submitted credentials (provisioning).
    ConnectingSubmitted,
    StaActive,
    ApActive,
}

/// Which credentials a station attempt should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Saved,
    Fallback,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// Boot sampling finished: force-setup input level and whether saved
    /// credentials exist.
    BootCompleted { force_setup: bool, have_saved: bool },
    ConnectSucceeded,
    ConnectFailed,
    /// New credentials arrived on the provisioning endpoint.
    ProvisionSubmitted,
}

/// Side effects the runtime must execute, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAction {
    /// Blocking station connect attempt with a bounded timeout. The runtime
    /// reports the outcome back as `ConnectSucceeded`/`ConnectFailed`.
    AttemptSta {
        source: CredentialSource,
        timeout: Duration,
    },
    StartAccessPoint,
    StopAccessPoint,
    /// Bring up the HTTP surface and the push channel.
    StartLocalSurface,
    /// Tear both down; disconnects every push client.
    StopLocalSurface,
    StartCloudBridge,
    /// Write the submitted credentials to the store.
    PersistCredentials,
}

pub struct ConnectivityMachine {
    state: ConnState,
}

impl ConnectivityMachine {
    pub fn new() -> Self {
        Self { state: ConnState::Boot }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Settled operating mode, if any. `None` while booting or mid-attempt.
    pub fn mode(&self) -> Option<ConnectivityMode> {
        match self.state {
            ConnState::StaActive => Some(ConnectivityMode::Sta),
            ConnState::ApActive => Some(ConnectivityMode::Ap),
            _ => None,
        }
    }

    /// The local control surface may only be reachable in AP mode.
    pub fn local_surface_allowed(&self) -> bool {
        self.state == ConnState::ApActive
    }

    /// Apply one event and return the actions the runtime must execute.
    pub fn handle(&mut self, event: ConnEvent) -> Vec<ConnAction> {
        use ConnAction::*;
        use ConnState::*;

        let (next, actions): (ConnState, Vec<ConnAction>) = match (self.state, event) {
            (Boot, ConnEvent::BootCompleted { force_setup: true, .. }) => {
                (ApActive, vec![StartAccessPoint, StartLocalSurface])
            }
            (Boot, ConnEvent::BootCompleted { have_saved: true, .. }) => (
                ConnectingSaved,
                vec![AttemptSta {
                    source: CredentialSource::Saved,
                    timeout: config::WIFI_CONNECT_TIMEOUT,
                }],
            ),
            (Boot, ConnEvent::BootCompleted { .. }) => (
                ConnectingFallback,
                vec![AttemptSta {
                    source: CredentialSource::Fallback,
                    timeout: config::WIFI_CONNECT_TIMEOUT,
                }],
            ),

            (ConnectingSaved, ConnEvent::ConnectSucceeded) => (StaActive, vec![StartCloudBridge]),
            (ConnectingSaved, ConnEvent::ConnectFailed) => (
                ConnectingFallback,
                vec![AttemptSta {
                    source: CredentialSource::Fallback,
                    timeout: config::WIFI_CONNECT_TIMEOUT,
                }],
            ),

            (ConnectingFallback, ConnEvent::ConnectSucceeded) => {
                (StaActive, vec![StartCloudBridge])
            }
            (ConnectingFallback, ConnEvent::ConnectFailed) => {
                (ApActive, vec![StartAccessPoint, StartLocalSurface])
            }

            // Provisioning: tear the setup surface down, persist, then try
            // the submitted network with the shorter timeout.
            (ApActive, ConnEvent::ProvisionSubmitted) => (
                ConnectingSubmitted,
                vec![
                    StopLocalSurface,
                    StopAccessPoint,
                    PersistCredentials,
                    AttemptSta {
                        source: CredentialSource::Submitted,
                        timeout: config::PROVISION_CONNECT_TIMEOUT,
                    },
                ],
            ),
            (ConnectingSubmitted, ConnEvent::ConnectSucceeded) => {
                (StaActive, vec![StartCloudBridge])
            }
            // Failed provisioning returns to AP with the surface restored;
            // the operator has to resubmit.
            (ConnectingSubmitted, ConnEvent::ConnectFailed) => {
                (ApActive, vec![StartAccessPoint, StartLocalSurface])
            }

            (state, event) => {
                log::warn!("connectivity: ignoring {event:?} in {state:?}");
                (state, Vec::new())
            }
        };

        if next != self.state {
            log::info!("connectivity: {:?} -> {next:?}", self.state);
            self.state = next;
        }

        actions
    }
}

impl Default for ConnectivityMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnAction::*;
    use super::*;

    fn attempt(source: CredentialSource, secs: u64) -> ConnAction {
        AttemptSta {
            source,
            timeout: Duration::from_secs(secs),
        }
    }

    #[test]
    fn forced_setup_goes_straight_to_ap() {
        let mut machine = ConnectivityMachine::new();
        let actions = machine.handle(ConnEvent::BootCompleted {
            force_setup: true,
            have_saved: true,
        });
        assert_eq!(machine.state(), ConnState::ApActive);
        assert_eq!(actions, vec![StartAccessPoint, StartLocalSurface]);
    }

    #[test]
    fn saved_credentials_then_fallback_then_ap() {
        let mut machine = ConnectivityMachine::new();

        let actions = machine.handle(ConnEvent::BootCompleted {
            force_setup: false,
            have_saved: true,
        });
        assert_eq!(machine.state(), ConnState::ConnectingSaved);
        assert_eq!(actions, vec![attempt(CredentialSource::Saved, 20)]);

        let actions = machine.handle(ConnEvent::ConnectFailed);
        assert_eq!(machine.state(), ConnState::ConnectingFallback);
        assert_eq!(actions, vec![attempt(CredentialSource::Fallback, 20)]);

        let actions = machine.handle(ConnEvent::ConnectFailed);
        assert_eq!(machine.state(), ConnState::ApActive);
        assert_eq!(actions, vec![StartAccessPoint, StartLocalSurface]);
    }

    #[test]
    fn missing_saved_credentials_skip_to_fallback() {
        let mut machine = ConnectivityMachine::new();
        let actions = machine.handle(ConnEvent::BootCompleted {
            force_setup: false,
            have_saved: false,
        });
        assert_eq!(machine.state(), ConnState::ConnectingFallback);
        assert_eq!(actions, vec![attempt(CredentialSource::Fallback, 20)]);
    }

    #[test]
    fn successful_connect_starts_cloud_bridge_only() {
        for have_saved in [true, false] {
            let mut machine = ConnectivityMachine::new();
            machine.handle(ConnEvent::BootCompleted {
                force_setup: false,
                have_saved,
            });
            let actions = machine.handle(ConnEvent::ConnectSucceeded);
            assert_eq!(machine.state(), ConnState::StaActive);
            assert_eq!(actions, vec![StartCloudBridge]);
        }
    }

    #[test]
    fn provisioning_success_swaps_ap_for_sta() {
        let mut machine = ConnectivityMachine::new();
        machine.handle(ConnEvent::BootCompleted {
            force_setup: true,
            have_saved: false,
        });

        let actions = machine.handle(ConnEvent::ProvisionSubmitted);
        assert_eq!(machine.state(), ConnState::ConnectingSubmitted);
        assert_eq!(
            actions,
            vec![
                StopLocalSurface,
                StopAccessPoint,
                PersistCredentials,
                attempt(CredentialSource::Submitted, 15),
            ]
        );

        let actions = machine.handle(ConnEvent::ConnectSucceeded);
        assert_eq!(machine.state(), ConnState::StaActive);
        assert_eq!(actions, vec![StartCloudBridge]);
    }

    #[test]
    fn provisioning_failure_restores_the_ap_surface() {
        let mut machine = ConnectivityMachine::new();
        machine.handle(ConnEvent::BootCompleted {
            force_setup: true,
            have_saved: false,
        });
        machine.handle(ConnEvent::ProvisionSubmitted);

        let actions = machine.handle(ConnEvent::ConnectFailed);
        assert_eq!(machine.state(), ConnState::ApActive);
        assert_eq!(actions, vec![StartAccessPoint, StartLocalSurface]);
        assert!(machine.local_surface_allowed());
    }

    /// Mutual exclusion, checked structurally: wherever a station attempt is
    /// issued, the local surface teardown comes first in the same action
    /// list (or the surface was never started); the cloud bridge is started
    /// only by transitions that land in `StaActive`, and the local surface
    /// only by transitions that land in `ApActive`.
    #[test]
    fn surface_teardown_always_precedes_station_attempts() {
        let boot_events = [
            ConnEvent::BootCompleted {
                force_setup: false,
                have_saved: true,
            },
            ConnEvent::BootCompleted {
                force_setup: false,
                have_saved: false,
            },
            ConnEvent::BootCompleted {
                force_setup: true,
                have_saved: false,
            },
        ];
        let follow_ups = [
            ConnEvent::ConnectFailed,
            ConnEvent::ConnectSucceeded,
            ConnEvent::ProvisionSubmitted,
        ];

        for boot in boot_events {
            for second in follow_ups {
                for third in follow_ups {
                    let mut machine = ConnectivityMachine::new();
                    for event in [boot, second, third] {
                        let was_ap = machine.state() == ConnState::ApActive;
                        let actions = machine.handle(event);

                        let attempt_at = actions
                            .iter()
                            .position(|a| matches!(a, AttemptSta { .. }));
                        if let Some(attempt_at) = attempt_at {
                            if was_ap {
                                let stop_at = actions
                                    .iter()
                                    .position(|a| *a == StopLocalSurface)
                                    .expect("attempt from AP must stop the surface");
                                assert!(stop_at < attempt_at);
                            }
                        }

                        if actions.contains(&StartCloudBridge) {
                            assert_eq!(machine.state(), ConnState::StaActive);
                            assert!(!actions.contains(&StartLocalSurface));
                        }
                        if actions.contains(&StartLocalSurface) {
                            assert_eq!(machine.state(), ConnState::ApActive);
                            assert!(!actions.contains(&StartCloudBridge));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn mode_is_settled_only_in_terminal_states() {
        let mut machine = ConnectivityMachine::new();
        assert_eq!(machine.mode(), None);

        machine.handle(ConnEvent::BootCompleted {
            force_setup: false,
            have_saved: true,
        });
        assert_eq!(machine.mode(), None);

        machine.handle(ConnEvent::ConnectSucceeded);
        assert_eq!(machine.mode(), Some(ConnectivityMode::Sta));
        assert!(!machine.local_surface_allowed());
    }

    #[test]
    fn stray_events_are_ignored() {
        let mut machine = ConnectivityMachine::new();
        assert!(machine.handle(ConnEvent::ConnectSucceeded).is_empty());
        assert_eq!(machine.state(), ConnState::Boot);

        machine.handle(ConnEvent::BootCompleted {
            force_setup: true,
            have_saved: false,
        });
        // Provisioning is only meaningful from AP; a second submission while
        // one attempt is in flight cannot happen (single-threaded driver),
        // and a stray success in AP changes nothing.
        assert!(machine.handle(ConnEvent::ConnectSucceeded).is_empty());
        assert_eq!(machine.state(), ConnState::ApActive);
    }
}
