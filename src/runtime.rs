//! Boot sequence and the single control loop.
//!
//! The loop owns a [`Context`] holding every piece of shared state (relay
//! bank, mode machine, push channel, cloud bridge, WiFi driver); nothing
//! else mutates relays or mode. Per iteration the order is fixed: sensor
//! sample, queued control events, push-channel servicing, indicator tick.
//! The only calls allowed to block the loop for a user-visible duration are
//! the bounded WiFi connect attempts and the network scan.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use esp_idf_hal::gpio::{PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use crate::automation::{HysteresisWindow, ProximityAutomation};
use crate::cloud::{CloudBridge, CloudCommand, CloudLink, DeviceTable};
use crate::config;
use crate::connectivity::{
    ConnAction, ConnEvent, ConnState, ConnectivityMachine, ConnectivityMode, CredentialSource,
};
use crate::events::ControlEvent;
use crate::http_server::{self, LocalControlServer};
use crate::indicator::{IndicatorMode, StatusLed};
use crate::protocol::{PushCommand, RelayStatesFrame, StatusSnapshot};
use crate::push_channel::PushChannel;
use crate::relays::{RelayBank, RelayGpio, RelayIndex};
use crate::sensor::ProximitySensor;
use crate::storage::{CredentialStore, Credentials};
use crate::wifi::WifiService;

/// Everything the control loop owns. Passed by reference into each step;
/// there are no ambient globals.
struct Context {
    bank: RelayBank,
    lines: RelayGpio,
    machine: ConnectivityMachine,
    automation: ProximityAutomation,
    push: PushChannel,
    http: Option<LocalControlServer>,
    cloud: CloudBridge,
    cloud_link: Option<CloudLink>,
    wifi: WifiService,
    store: CredentialStore,
    led: StatusLed,
    saved: Option<Credentials>,
    pending: Option<Credentials>,
    events_tx: Sender<ControlEvent>,
}

pub fn run() -> Result<()> {
    esp_idf_sys::link_patches();
    EspLogger::initialize_default();

    log::info!("relay controller firmware starting");

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // Relay lines first, forced to the off level before anything network
    // related comes up.
    let mut lines = RelayGpio::new([
        pins.gpio16.downgrade_output(),
        pins.gpio17.downgrade_output(),
        pins.gpio18.downgrade_output(),
        pins.gpio19.downgrade_output(),
    ])?;
    let bank = RelayBank::new(config::RELAY_ACTIVE_LOW);
    bank.apply_line_levels(&mut lines);

    // Force-setup input, sampled exactly once at boot.
    let force_setup = {
        let mut button = PinDriver::input(pins.gpio0.downgrade())?;
        button.set_pull(Pull::Up)?;
        thread::sleep(Duration::from_millis(50));
        button.is_low()
    };

    let store = CredentialStore::open(nvs_partition.clone())?;
    let saved = store.load();

    let wifi = WifiService::new(peripherals.modem, sysloop, nvs_partition)?;
    let sensor = ProximitySensor::new(peripherals.adc1, pins.gpio34)?;
    let led = StatusLed::new(pins.gpio2.downgrade_output())?;

    // The device-id table is validated here, once; a bad table is a build
    // configuration error and stops the boot.
    let cloud = CloudBridge::new(DeviceTable::new(config::CLOUD_DEVICE_IDS)?);

    let (events_tx, events_rx) = mpsc::channel();

    let mut ctx = Context {
        bank,
        lines,
        machine: ConnectivityMachine::new(),
        automation: ProximityAutomation::new(HysteresisWindow::new(
            config::IR_WINDOW_MIN,
            config::IR_WINDOW_MAX,
        )),
        push: PushChannel::new(),
        http: None,
        cloud,
        cloud_link: None,
        wifi,
        store,
        led,
        saved,
        pending: None,
        events_tx,
    };

    if force_setup {
        log::info!("force-setup input asserted; entering AP mode unconditionally");
    }
    let have_saved = ctx.saved.is_some();
    ctx.dispatch(ConnEvent::BootCompleted {
        force_setup,
        have_saved,
    });

    control_loop(ctx, events_rx, sensor)
}

fn control_loop(
    mut ctx: Context,
    events: Receiver<ControlEvent>,
    mut sensor: ProximitySensor,
) -> Result<()> {
    let mut last_sample: Option<Instant> = None;

    loop {
        // 1. Sensor sample, on cadence, regardless of mode.
        if last_sample.map_or(true, |at| at.elapsed() >= config::IR_SAMPLE_INTERVAL) {
            last_sample = Some(Instant::now());
            match sensor.read_raw() {
                Ok(raw) => {
                    ctx.automation.record(raw);
                    let relay4_on = ctx.bank.is_on(RelayIndex::RELAY_4);
                    if let Some(target) = ctx
                        .automation
                        .evaluate(ctx.bank.relay4_mode(), relay4_on)
                    {
                        ctx.bank.set(&mut ctx.lines, RelayIndex::RELAY_4, target);
                        ctx.broadcast_states();
                    }
                }
                Err(err) => log::debug!("sensor: read failed: {err:#}"),
            }
        }

        // 2. Queued control events from the HTTP surface and the cloud link.
        while let Ok(event) = events.try_recv() {
            ctx.handle_control_event(event);
        }

        // 3. Local push channel: accepts, disconnects and inbound tokens.
        let frame = RelayStatesFrame::new(ctx.bank.snapshot());
        for command in ctx.push.poll(&frame) {
            match command {
                PushCommand::Toggle(index) => {
                    ctx.toggle_relay(index);
                }
                // Answered inline by the channel itself.
                PushCommand::Status => {}
            }
        }

        // 4. Status indicator.
        ctx.led.tick();

        // Idle backoff: tight while local clients are connected.
        let delay = if ctx.push.client_count() > 0 {
            config::LOOP_DELAY_ACTIVE
        } else {
            config::LOOP_DELAY_IDLE
        };
        thread::sleep(delay);
    }
}

impl Context {
    /// Feed one event through the mode machine and execute the resulting
    /// actions in order. Connect attempts recurse with their outcome; the
    /// chain is short and always ends in a terminal state.
    fn dispatch(&mut self, event: ConnEvent) {
        let actions = self.machine.handle(event);
        for action in actions {
            self.execute(action);
        }

        self.led.set_mode(match self.machine.state() {
            ConnState::StaActive => IndicatorMode::Solid,
            ConnState::ApActive | ConnState::Boot => IndicatorMode::SlowBlink,
            _ => IndicatorMode::FastBlink,
        });
    }

    fn execute(&mut self, action: ConnAction) {
        match action {
            ConnAction::AttemptSta { source, timeout } => {
                self.led.set_mode(IndicatorMode::FastBlink);
                let credentials = match source {
                    CredentialSource::Saved => self.saved.clone(),
                    CredentialSource::Fallback => Some(Credentials::fallback()),
                    CredentialSource::Submitted => self.pending.clone(),
                };
                let connected = match credentials {
                    Some(credentials) if credentials.is_set() => self
                        .wifi
                        .connect_sta(&credentials, timeout)
                        .unwrap_or_else(|err| {
                            log::warn!("wifi: connect attempt errored: {err:#}");
                            false
                        }),
                    _ => {
                        log::warn!("wifi: no usable credentials for {source:?} attempt");
                        false
                    }
                };
                self.dispatch(if connected {
                    ConnEvent::ConnectSucceeded
                } else {
                    ConnEvent::ConnectFailed
                });
            }

            ConnAction::StartAccessPoint => {
                if let Err(err) = self.wifi.start_access_point() {
                    log::error!("wifi: AP start failed: {err:#}");
                }
            }
            ConnAction::StopAccessPoint => {
                if let Err(err) = self.wifi.stop_access_point() {
                    log::warn!("wifi: AP stop failed: {err:#}");
                }
            }

            ConnAction::StartLocalSurface => {
                if let Err(err) = self.push.start(config::PUSH_CHANNEL_PORT) {
                    log::error!("push: channel start failed: {err:#}");
                }
                match http_server::start(self.events_tx.clone()) {
                    Ok(server) => self.http = Some(server),
                    Err(err) => log::error!("http: surface start failed: {err:#}"),
                }
            }
            ConnAction::StopLocalSurface => {
                // Dropping the server handle stops the httpd; the push
                // channel disconnects every client.
                self.http = None;
                self.push.stop();
            }

            ConnAction::StartCloudBridge => {
                match CloudLink::connect(self.events_tx.clone()) {
                    Ok(link) => self.cloud_link = Some(link),
                    // Degraded but alive: relays stay locally controllable
                    // through a later provisioning cycle.
                    Err(err) => log::warn!("cloud: bridge start failed: {err:#}"),
                }
            }

            ConnAction::PersistCredentials => {
                if let Some(pending) = self.pending.clone() {
                    if let Err(err) = self.store.save(&pending) {
                        log::warn!("storage: persist failed: {err:#}");
                    }
                    self.saved = Some(pending);
                }
            }
        }
    }

    fn handle_control_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Toggle { index, reply } => {
                let on = self.toggle_relay(index);
                let _ = reply.send(on);
            }
            ControlEvent::SetRelay4Mode { mode, reply } => {
                self.bank.set_relay4_mode(&mut self.lines, mode);
                log::info!("relay: relay 4 mode set to {}", mode.as_str());
                self.broadcast_states();
                let _ = reply.send(());
            }
            ControlEvent::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ControlEvent::Scan { reply } => {
                let networks = self.wifi.scan().unwrap_or_else(|err| {
                    log::warn!("wifi: scan failed: {err:#}");
                    Vec::new()
                });
                let _ = reply.send(networks);
            }
            ControlEvent::Provision { ssid, pass } => {
                log::info!("provisioning: credentials for {ssid:?} submitted");
                self.pending = Some(Credentials::new(ssid, pass));
                self.dispatch(ConnEvent::ProvisionSubmitted);
            }
            ControlEvent::Cloud(command) => self.handle_cloud_command(command),
        }
    }

    fn handle_cloud_command(&mut self, command: CloudCommand) {
        // Dead under the mode invariant, kept as a safety net: a cloud
        // session must not drive relays while the setup surface is live.
        if self.machine.mode() != Some(ConnectivityMode::Sta) {
            log::warn!("cloud: dropping command outside STA mode: {command:?}");
            return;
        }
        let Some(index) = self.cloud.resolve_command(&command) else {
            return;
        };
        self.bank.set(&mut self.lines, index, command.on);
        log::info!(
            "cloud: relay {} -> {}",
            index.get(),
            if command.on { "ON" } else { "OFF" }
        );
        // No upstream echo for a cloud-originated change; the service
        // already knows. Local views still get the broadcast.
        self.broadcast_states();
    }

    /// Local relay change: flip, broadcast, and mirror to the cloud where
    /// the relay has a cloud identity.
    fn toggle_relay(&mut self, index: RelayIndex) -> bool {
        let on = self.bank.toggle(&mut self.lines, index);
        log::info!(
            "relay: relay {} -> {}",
            index.get(),
            if on { "ON" } else { "OFF" }
        );
        self.broadcast_states();

        // Defensively also covers the should-not-happen case of a live
        // cloud session during AP mode.
        if index.is_cloud_bound() && self.wifi.is_connected() {
            if let Some(event) = self.cloud.state_event(index, on) {
                if let Some(link) = self.cloud_link.as_mut() {
                    if let Err(err) = link.send_state_event(&event) {
                        log::warn!("cloud: state event failed: {err:#}");
                    }
                }
            }
        }
        on
    }

    fn broadcast_states(&mut self) {
        let frame = RelayStatesFrame::new(self.bank.snapshot());
        self.push.broadcast(&frame);
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self
                .machine
                .mode()
                .map_or("UNKNOWN", ConnectivityMode::as_str),
            wifi_connected: self.wifi.is_connected(),
            sta_ip: self
                .wifi
                .sta_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            ap_ssid: self.wifi.ap_ssid().to_string(),
            ir_value: self.automation.last_raw(),
            relay4_mode: self.bank.relay4_mode().as_str(),
            relay_states: self.bank.snapshot(),
        }
    }
}
