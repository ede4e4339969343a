//! WiFi driver wrapper: bounded station attempts, the setup AP, and the
//! blocking network scan.
//!
//! The station connect is a blocking call with a declared maximum duration
//! and no cancellation once initiated. The AP runs with a mixed (AP+STA)
//! driver configuration so `/scan` keeps working while the portal is up.

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use esp_idf_sys::{esp, esp_mac_type_t_ESP_MAC_WIFI_STA, esp_read_mac};

use crate::config;
use crate::protocol::ScanNetwork;
use crate::storage::Credentials;

/// Poll interval while waiting out a connect attempt.
const CONNECT_POLL: Duration = Duration::from_millis(30);

pub struct WifiService {
    wifi: EspWifi<'static>,
    ap_ssid: String,
}

impl WifiService {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self> {
        let wifi = EspWifi::new(modem, sysloop, Some(nvs)).context("wifi driver init failed")?;
        let ap_ssid = format!("{}{}", config::AP_SSID_PREFIX, mac_tail()?);
        Ok(Self { wifi, ap_ssid })
    }

    /// SSID the setup AP broadcasts; stable across boots (MAC-derived).
    pub fn ap_ssid(&self) -> &str {
        &self.ap_ssid
    }

    /// Blocking station connect attempt. Returns whether an IP was obtained
    /// within `timeout`; on failure the driver is left stopped so the next
    /// attempt (or the AP) starts clean.
    pub fn connect_sta(&mut self, credentials: &Credentials, timeout: Duration) -> Result<bool> {
        log::info!(
            "wifi: attempting STA connect to {:?} (timeout {}s)",
            credentials.ssid,
            timeout.as_secs()
        );

        let auth_method = if credentials.pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("ssid too long"))?,
                password: credentials
                    .pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("passphrase too long"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        self.wifi.connect()?;

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.wifi.is_connected().unwrap_or(false) {
                if let Some(ip) = self.sta_ip() {
                    log::info!("wifi: STA connected, ip {ip}");
                    return Ok(true);
                }
            }
            thread::sleep(CONNECT_POLL);
        }

        log::warn!("wifi: STA connect to {:?} timed out", credentials.ssid);
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
        Ok(false)
    }

    /// Bring up the setup AP (open network). Mixed mode keeps the station
    /// side available for scanning.
    pub fn start_access_point(&mut self) -> Result<()> {
        let ap = AccessPointConfiguration {
            ssid: self
                .ap_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("AP ssid too long"))?,
            auth_method: AuthMethod::None,
            channel: 1,
            ..Default::default()
        };
        self.wifi
            .set_configuration(&Configuration::Mixed(
                ClientConfiguration::default(),
                ap,
            ))?;
        self.wifi.start()?;
        log::info!("wifi: setup AP {:?} broadcasting", self.ap_ssid);
        Ok(())
    }

    pub fn stop_access_point(&mut self) -> Result<()> {
        self.wifi.stop().context("stopping AP failed")?;
        log::info!("wifi: setup AP stopped");
        Ok(())
    }

    /// Blocking scan of visible networks. Nothing else is serviced while
    /// this runs; that is the documented behavior of the scan endpoint.
    pub fn scan(&mut self) -> Result<Vec<ScanNetwork>> {
        let found = self.wifi.scan().context("network scan failed")?;
        let networks = found
            .into_iter()
            .map(|ap| ScanNetwork {
                ssid: ap.ssid.to_string(),
                rssi: ap.signal_strength,
                secure: ap.auth_method != Some(AuthMethod::None),
            })
            .collect::<Vec<_>>();
        log::info!("wifi: scan found {} network(s)", networks.len());
        Ok(networks)
    }

    /// True while the station side is associated.
    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    /// Station IP once DHCP has finished; `None` before that.
    pub fn sta_ip(&self) -> Option<Ipv4Addr> {
        let info = self.wifi.sta_netif().get_ip_info().ok()?;
        (info.ip != Ipv4Addr::UNSPECIFIED).then_some(info.ip)
    }
}

/// Last two bytes of the station MAC, rendered the way the AP SSID wants.
fn mac_tail() -> Result<String> {
    let mut mac = [0u8; 6];
    unsafe {
        esp!(esp_read_mac(mac.as_mut_ptr(), esp_mac_type_t_ESP_MAC_WIFI_STA))
            .context("reading station MAC failed")?;
    }
    Ok(format!("{:02X}{:02X}", mac[4], mac[5]))
}
