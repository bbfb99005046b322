use std::{
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::TickType,
    gpio::AnyIOPin,
    peripheral::Peripheral,
    uart::{config::Config as UartConfig, Uart, UartDriver},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use bridge_common::engine::{BridgeEngine, Effect};
use bridge_common::keys;
use bridge_common::link::{LinkBridge, LinkMode, Port};
use bridge_common::types::WallClock;
use bridge_common::BridgeConfig;

const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 3;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const UART_POLL_MS: u64 = 20;
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Clone)]
struct SharedState {
    engine: Arc<Mutex<BridgeEngine>>,
    /// Read mutex: one reader decodes at a time, the codec state is shared.
    link: Arc<Mutex<LinkBridge>>,
    mcu_uart: Arc<UartDriver<'static>>,
    wifi_uart: Option<Arc<UartDriver<'static>>>,
    /// Write mutex: heartbeat, encoder and forwarding contend for the ports.
    write_lock: Arc<Mutex<()>>,
    mqtt: Option<Arc<Mutex<EspMqttClient<'static>>>>,
    timezone: Arc<str>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = device_config();
    info!(
        "bridge starting: sniffer={}, uart0={}, baud={}",
        config.serial.use_sniffer, config.serial.use_uart0, config.serial.baud_rate
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals {
        modem,
        uart0,
        uart1,
        uart2,
        ..
    } = Peripherals::take()?;

    let serial = &config.serial;
    let (mcu_uart, wifi_uart) = if serial.use_uart0 {
        info!("detach UART0 from serial monitor");
        let mcu = create_uart(uart0, serial.mcu_tx_pin, serial.mcu_rx_pin, serial.baud_rate)?;
        let wifi = if serial.use_sniffer {
            Some(create_uart(
                uart1,
                serial.wifi_tx_pin,
                serial.wifi_rx_pin,
                serial.baud_rate,
            )?)
        } else {
            None
        };
        (mcu, wifi)
    } else {
        let mcu = create_uart(uart1, serial.mcu_tx_pin, serial.mcu_rx_pin, serial.baud_rate)?;
        let wifi = if serial.use_sniffer {
            Some(create_uart(
                uart2,
                serial.wifi_tx_pin,
                serial.wifi_rx_pin,
                serial.baud_rate,
            )?)
        } else {
            None
        };
        (mcu, wifi)
    };

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &config)?;
    let _sntp = match EspSntp::new_default() {
        Ok(sntp) => {
            info!("SNTP initialized");
            Some(sntp)
        }
        Err(err) => {
            warn!("failed to start SNTP, running without wall time: {err}");
            None
        }
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let link_mode = if serial.use_sniffer {
        LinkMode::Sniffer
    } else {
        LinkMode::Bridge
    };

    // MQTT is the UI surface; the sniffer has no datapoint machinery to feed.
    let mqtt = if serial.use_sniffer {
        None
    } else {
        match create_mqtt_client(&config) {
            Ok((client, connection)) => {
                let client = Arc::new(Mutex::new(client));
                subscribe_commands(&client)?;
                Some((client, connection))
            }
            Err(err) => {
                warn!("mqtt unavailable, running without UI surface: {err:#}");
                None
            }
        }
    };

    let state = SharedState {
        engine: Arc::new(Mutex::new(BridgeEngine::new())),
        link: Arc::new(Mutex::new(LinkBridge::new(link_mode))),
        mcu_uart: Arc::new(mcu_uart),
        wifi_uart: wifi_uart.map(Arc::new),
        write_lock: Arc::new(Mutex::new(())),
        mqtt: mqtt.as_ref().map(|(client, _)| client.clone()),
        timezone: Arc::from(config.timezone.as_str()),
    };

    spawn_reader(state.clone(), Port::Mcu);
    if state.wifi_uart.is_some() {
        spawn_reader(state.clone(), Port::Wifi);
    }
    if let Some((client, connection)) = mqtt {
        spawn_mqtt_receiver(state.clone(), connection, client);
    }
    if !serial.use_sniffer {
        spawn_heartbeat_loop(state);
    }

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn device_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();

    if let Some(ssid) = option_env!("WIFI_SSID") {
        config.network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        config.network.wifi_pass = pass.to_string();
    }
    if let Some(host) = option_env!("MQTT_HOST") {
        config.network.mqtt_host = host.to_string();
    }
    if let Some(port) = option_env!("MQTT_PORT").and_then(|v| v.parse().ok()) {
        config.network.mqtt_port = port;
    }
    if let Some(baud) = option_env!("TUYA_BAUD_RATE").and_then(|v| v.parse().ok()) {
        config.serial.baud_rate = baud;
    }
    if let Some(tz) = option_env!("BRIDGE_TZ") {
        config.timezone = tz.to_string();
    }
    config.serial.use_sniffer = option_env!("USE_SNIFFER").is_some();
    config.serial.use_uart0 = option_env!("USE_UART0").is_some();

    config.sanitize();
    config
}

fn create_uart(
    uart: impl Peripheral<P = impl Uart> + 'static,
    tx_pin: i32,
    rx_pin: i32,
    baud_rate: u32,
) -> anyhow::Result<UartDriver<'static>> {
    let uart_config = UartConfig::default().baudrate(Hertz(baud_rate));
    let driver = UartDriver::new(
        uart,
        unsafe { AnyIOPin::new(tx_pin) },
        unsafe { AnyIOPin::new(rx_pin) },
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )
    .context("failed to install uart driver")?;
    Ok(driver)
}

fn uart_for(state: &SharedState, port: Port) -> Option<&Arc<UartDriver<'static>>> {
    match port {
        Port::Mcu => Some(&state.mcu_uart),
        Port::Wifi => state.wifi_uart.as_ref(),
    }
}

/// Reader loop for one port: drain bytes under the read mutex, forward in
/// sniffer mode, dispatch decoded MCU frames otherwise.
fn spawn_reader(state: SharedState, port: Port) {
    thread::Builder::new()
        .name(format!("{}-reader", port.label().to_ascii_lowercase()))
        .stack_size(8 * 1024)
        .spawn(move || {
            let uart = uart_for(&state, port).cloned().expect("reader port exists");
            let mut byte = [0u8; 1];
            loop {
                match uart.read(&mut byte, TickType::from(Duration::from_millis(UART_POLL_MS)).ticks()) {
                    Ok(0) => {}
                    Ok(_) => {
                        let outcome = {
                            let mut link = state.link.lock().unwrap();
                            link.ingest(port, byte[0])
                        };

                        if let Some(to) = outcome.forward_to {
                            if let Some(peer) = uart_for(&state, to) {
                                let _guard = state.write_lock.lock().unwrap();
                                if let Err(err) = peer.write(&byte) {
                                    warn!("{} forward failed: {err}", to.label());
                                }
                            }
                        }

                        if let Some(frame) = outcome.frame {
                            match state.link.lock().unwrap().mode() {
                                LinkMode::Sniffer => info!(
                                    "{} > [{}] {:02x?}",
                                    port.label(),
                                    frame.command,
                                    frame.payload
                                ),
                                LinkMode::Bridge => {
                                    if port == Port::Mcu {
                                        dispatch_frame(&state, &frame);
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => {
                        // Frame, parity, break or overflow; drop the garbage
                        // and keep reading.
                        error!("{} uart unexpected event: {err}", port.label());
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        })
        .expect("failed to spawn uart reader thread");
}

fn dispatch_frame(state: &SharedState, frame: &bridge_common::Frame) {
    let effects = {
        let mut engine = state.engine.lock().unwrap();
        engine.handle_frame(
            frame,
            is_wifi_station_connected(),
            wall_clock(&state.timezone).as_ref(),
            monotonic_ms(),
        )
    };
    execute_effects(state, effects);
}

fn spawn_heartbeat_loop(state: SharedState) {
    thread::Builder::new()
        .name("heartbeat".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register heartbeat loop with watchdog: {err:#}");
            }

            loop {
                feed_watchdog();
                let outcome = {
                    let mut engine = state.engine.lock().unwrap();
                    engine.tick(
                        monotonic_ms(),
                        is_wifi_station_connected(),
                        wall_clock(&state.timezone).as_ref(),
                    )
                };
                execute_effects(&state, outcome.effects);
                thread::sleep(Duration::from_secs(outcome.next_delay_secs));
            }
        })
        .expect("failed to spawn heartbeat thread");
}

fn execute_effects(state: &SharedState, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Publish { key, value } => {
                info!("{{\"cfgGroup\":\"-1\", \"{key}\":\"{value}\"}}");
                if let Some(mqtt) = &state.mqtt {
                    let topic = format!("{}{}", keys::TOPIC_STATUS_PREFIX, key);
                    let mut client = mqtt.lock().unwrap();
                    if let Err(err) =
                        client.publish(&topic, QoS::AtLeastOnce, true, value.as_bytes())
                    {
                        warn!("status publish failed: {err}");
                    }
                }
            }
            Effect::Send(frame) => {
                let bytes = frame.encode();
                let _guard = state.write_lock.lock().unwrap();
                match state.mcu_uart.write(&bytes) {
                    Ok(written) if written == bytes.len() => {}
                    Ok(written) => warn!("mcu uart wrote {written}, expected {}", bytes.len()),
                    Err(err) => warn!("mcu uart write failed: {err}"),
                }
            }
        }
    }
}

fn create_mqtt_client(
    config: &BridgeConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let network = &config.network;
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("tuya-bridge"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_commands(mqtt: &Arc<Mutex<EspMqttClient<'static>>>) -> anyhow::Result<()> {
    let mut client = mqtt.lock().unwrap();
    client.subscribe(keys::TOPIC_CMND_WILDCARD, QoS::AtMostOnce)?;
    Ok(())
}

fn spawn_mqtt_receiver(
    state: SharedState,
    mut connection: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            match connection.next() {
                Ok(event) => {
                    if let EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } = event.payload()
                    {
                        if !matches!(details, Details::Complete) {
                            continue;
                        }
                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }
                        let Some(key) = topic.strip_prefix(keys::TOPIC_CMND_PREFIX) else {
                            continue;
                        };
                        let Ok(value) = core::str::from_utf8(data) else {
                            warn!("non utf8 payload on {topic}");
                            continue;
                        };

                        let effects = {
                            let mut engine = state.engine.lock().unwrap();
                            engine.apply_update(key, value.trim())
                        };
                        execute_effects(&state, effects);
                    }
                }
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    if let Err(sub_err) = subscribe_commands(&mqtt) {
                        warn!("mqtt re-subscribe failed: {sub_err:#}");
                    }
                }
            }
        })
        .expect("failed to spawn mqtt receiver thread");
}

fn connect_wifi(
    modem: impl Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    config: &BridgeConfig,
) -> anyhow::Result<Option<EspWifi<'static>>> {
    let network = &config.network;
    if network.wifi_ssid.is_empty() {
        warn!("wifi credentials missing; running offline");
        return Ok(None);
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                drop(wifi);
                return Ok(Some(esp_wifi));
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }
    }

    // The MCU link still works without the network; the status datapoint
    // simply reports disconnected.
    warn!("wifi unavailable after {WIFI_CONNECT_ATTEMPTS} attempts; continuing offline");
    drop(wifi);
    Ok(Some(esp_wifi))
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

/// Local wall time, once SNTP has pulled the clock out of the epoch.
fn wall_clock(timezone: &str) -> Option<WallClock> {
    let tz: Tz = timezone.parse().ok()?;
    let now = Utc::now();
    if now.year() < 2020 {
        return None;
    }
    let local = now.with_timezone(&tz);
    Some(WallClock::from_datetime(
        local.with_timezone(&local.offset().fix()),
    ))
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
