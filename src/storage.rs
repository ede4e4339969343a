//! Persisted WiFi credentials.
//!
//! One namespaced key-value record, written only on a successful
//! provisioning submission and read once at boot. A store failure is
//! deliberately indistinguishable from "no credentials saved": both fall
//! through to the fallback network and then the setup AP.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub pass: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            pass: pass.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::new(crate::config::FALLBACK_SSID, crate::config::FALLBACK_PASS)
    }

    /// An empty SSID means the record is unset.
    pub fn is_set(&self) -> bool {
        !self.ssid.is_empty()
    }
}

#[cfg(target_os = "espidf")]
pub use self::nvs::CredentialStore;

#[cfg(target_os = "espidf")]
mod nvs {
    use anyhow::{Context, Result};
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    use super::Credentials;
    use crate::config;

    /// Longest SSID is 32 bytes, passphrases 64; headroom for the NUL.
    const VALUE_BUF_LEN: usize = 96;

    pub struct CredentialStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl CredentialStore {
        pub fn open(partition: EspDefaultNvsPartition) -> Result<Self> {
            let nvs = EspNvs::new(partition, config::NVS_NAMESPACE, true)
                .context("opening credential namespace failed")?;
            Ok(Self { nvs })
        }

        /// Load the saved credentials. Any store error maps to `None`.
        pub fn load(&self) -> Option<Credentials> {
            let ssid = self.read_key(config::NVS_KEY_SSID)?;
            let pass = self.read_key(config::NVS_KEY_PASS).unwrap_or_default();
            let credentials = Credentials::new(ssid, pass);
            credentials.is_set().then_some(credentials)
        }

        pub fn save(&mut self, credentials: &Credentials) -> Result<()> {
            self.nvs
                .set_str(config::NVS_KEY_SSID, &credentials.ssid)
                .context("persisting ssid failed")?;
            self.nvs
                .set_str(config::NVS_KEY_PASS, &credentials.pass)
                .context("persisting passphrase failed")?;
            log::info!("storage: credentials for {:?} persisted", credentials.ssid);
            Ok(())
        }

        fn read_key(&self, key: &str) -> Option<String> {
            let mut buf = [0u8; VALUE_BUF_LEN];
            match self.nvs.get_str(key, &mut buf) {
                Ok(Some(value)) => Some(value.to_string()),
                Ok(None) => None,
                Err(err) => {
                    // Not distinguished from an absent record by design.
                    log::warn!("storage: reading {key} failed ({err}); treating as unset");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ssid_means_unset() {
        assert!(!Credentials::new("", "secret").is_set());
        assert!(Credentials::new("HomeNet", "").is_set());
    }

    #[test]
    fn fallback_credentials_are_configured() {
        assert!(Credentials::fallback().is_set());
    }
}
