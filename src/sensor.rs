//! Analog proximity sensor input (oneshot ADC).

use anyhow::{Context, Result};
use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::gpio::Gpio34;

pub struct ProximitySensor {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
}

impl ProximitySensor {
    pub fn new(adc: ADC1, pin: Gpio34) -> Result<Self> {
        let adc = AdcDriver::new(adc).context("adc driver init failed")?;
        // Full attenuation so the sensor's output range maps onto the ADC.
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let channel =
            AdcChannelDriver::new(adc, pin, &config).context("adc channel init failed")?;
        Ok(Self { channel })
    }

    /// One raw sample. Read failures are transient; the caller keeps the
    /// previous value.
    pub fn read_raw(&mut self) -> Result<u16> {
        Ok(self.channel.read()?)
    }
}
