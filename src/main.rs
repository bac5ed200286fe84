#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp32_gps_tracker::platform::esp::{BatteryAdc, ModemUart, NvsCredentialStore};
    use esp32_gps_tracker::{AppContext, CredentialStore, Hardware, TrackerConfig, Workers};
    use esp_idf_hal::gpio::PinDriver;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys;
    use std::sync::Arc;

    // Initialize ESP-IDF system services
    sys::link_patches();

    // Initialize logging
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("ESP32 Cellular GPS Tracker (SIM7600)");
    log::info!("Initializing...");

    let config = match option_env!("TRACKER_CONFIG") {
        Some(json) => TrackerConfig::from_json(json)?,
        None => TrackerConfig::default(),
    };
    log::info!("  Broker: {}:{}", config.broker.server, config.broker.port);
    log::info!("  Topic:  {}", config.broker.topic);

    let peripherals = Peripherals::take()?;

    log::info!("✅ ESP32 initialized with ESP-IDF");

    // UART2 to the modem
    log::info!("Initializing UART2 for SIM7600...");
    let uart_config = UartConfig::new().baudrate(115200.into());
    let uart = UartDriver::new(
        peripherals.uart2,
        peripherals.pins.gpio17, // TX
        peripherals.pins.gpio16, // RX
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        &uart_config,
    )?;
    log::info!("✅ UART2 initialized (115200 baud)");

    // Module power starts LOW; the supervisor raises it once conditions allow
    let mut power_line = PinDriver::output(peripherals.pins.gpio4)?;
    power_line.set_low()?;
    let mut measure_line = PinDriver::output(peripherals.pins.gpio13)?;
    measure_line.set_low()?;
    let mut led_line = PinDriver::output(peripherals.pins.gpio27)?;
    led_line.set_low()?;
    log::info!("✅ GPIO configured (power: GPIO4, battery enable: GPIO13, LED: GPIO27)");

    let adc = BatteryAdc::new(peripherals.adc1, peripherals.pins.gpio34)?;
    log::info!("✅ Battery ADC on GPIO34");

    let credentials: Option<Box<dyn CredentialStore>> = match EspDefaultNvsPartition::take()
        .map_err(anyhow::Error::from)
        .and_then(NvsCredentialStore::new)
    {
        Ok(store) => Some(Box::new(store)),
        Err(e) => {
            log::warn!("No credential store, provisioning disabled: {:?}", e);
            None
        }
    };

    let hardware = Hardware {
        transport: Box::new(ModemUart::new(uart)),
        power_line: Box::new(power_line),
        measure_line: Box::new(measure_line),
        led_line: Box::new(led_line),
        adc: Box::new(adc),
    };
    let (ctx, indicator) = AppContext::new(config, hardware, credentials);
    let _workers = Workers::spawn(Arc::new(ctx), indicator)?;

    log::info!("✅ Tracker running");

    loop {
        std::thread::park();
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("the tracker firmware runs on the ESP-IDF target only; use `cargo test` on the host")
}
