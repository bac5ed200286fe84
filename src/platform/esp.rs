//! ESP-IDF implementations of the hardware seams.

use super::{AnalogInput, Transport};
use crate::modem::{ModemError, ModemResult};
use crate::secure::{CredentialKind, CredentialStore};
use anyhow::Result;
use esp_idf_hal::adc::attenuation::DB_6;
use esp_idf_hal::adc::oneshot::config::{AdcChannelConfig, Calibration};
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADC1;
use esp_idf_hal::delay::TickType;
use esp_idf_hal::gpio::Gpio34;
use esp_idf_hal::uart::UartDriver;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::warn;
use std::sync::Mutex;
use std::time::Duration;

/// Modem UART (UART2 on this board).
pub struct ModemUart {
    uart: UartDriver<'static>,
}

impl ModemUart {
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self { uart }
    }
}

impl Transport for ModemUart {
    fn write_all(&mut self, mut bytes: &[u8]) -> ModemResult<()> {
        while !bytes.is_empty() {
            let written = self.uart.write(bytes).map_err(|_| ModemError::WriteError)?;
            bytes = &bytes[written..];
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ModemResult<usize> {
        let ticks = TickType::from(timeout).ticks();
        self.uart
            .read(buffer, ticks)
            .map_err(|_| ModemError::ReadError)
    }
}

type BatteryChannel = AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>;

/// Battery divider tap on GPIO34 (ADC1 channel 6), read through the eFuse line-fitting
/// calibration.
pub struct BatteryAdc {
    channel: BatteryChannel,
}

// SAFETY: the channel is only ever used from behind the battery monitor's mutex.
unsafe impl Send for BatteryAdc {}

impl BatteryAdc {
    pub fn new(adc: ADC1, pin: Gpio34) -> Result<Self> {
        let driver = AdcDriver::new(adc)?;
        let config = AdcChannelConfig {
            attenuation: DB_6,
            calibration: Calibration::Line,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(driver, pin, &config)?;
        Ok(Self { channel })
    }
}

impl AnalogInput for BatteryAdc {
    fn read_millivolts(&mut self) -> Result<u32> {
        Ok(u32::from(self.channel.read()?))
    }
}

/// Credentials kept in the default NVS partition under the `certs` namespace.
pub struct NvsCredentialStore {
    nvs: Mutex<EspNvs<NvsDefault>>,
}

impl NvsCredentialStore {
    const NAMESPACE: &'static str = "certs";
    const MAX_BLOB: usize = 4096;

    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, Self::NAMESPACE, false)?;
        Ok(Self {
            nvs: Mutex::new(nvs),
        })
    }

    fn key(kind: CredentialKind) -> &'static str {
        match kind {
            CredentialKind::CaCert => "ca_cert",
            CredentialKind::ClientCert => "client_cert",
            CredentialKind::ClientKey => "client_key",
        }
    }
}

impl CredentialStore for NvsCredentialStore {
    fn fetch(&self, kind: CredentialKind) -> Result<Option<Vec<u8>>> {
        let nvs = crate::lock(&self.nvs);
        let key = Self::key(kind);
        let Some(len) = nvs.blob_len(key)? else {
            return Ok(None);
        };
        if len > Self::MAX_BLOB {
            warn!("NVS: {} is {} bytes, larger than {}", key, len, Self::MAX_BLOB);
            return Ok(None);
        }
        let mut buffer = vec![0u8; len];
        Ok(nvs.get_blob(key, &mut buffer)?.map(<[u8]>::to_vec))
    }
}
