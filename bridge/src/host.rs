use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use bridge_common::engine::{BridgeEngine, Effect};
use bridge_common::keys;
use bridge_common::link::{LinkBridge, LinkMode, Port};
use bridge_common::types::WallClock;
use bridge_common::BridgeConfig;

use crate::{console, sim};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

type McuStream = tokio::io::DuplexStream;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<BridgeEngine>>,
    /// Read side serialization; the codec state is shared across ports.
    link: Arc<Mutex<LinkBridge>>,
    /// Write side serialization; heartbeat, encoder and console contend.
    mcu_writer: Arc<Mutex<WriteHalf<McuStream>>>,
    mqtt: AsyncClient,
    timezone: Arc<str>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = load_config().unwrap_or_else(|err| {
        warn!("failed to load bridge config: {err:#}");
        BridgeConfig::default()
    });
    config.sanitize();
    if config.serial.use_sniffer {
        // The host backend has a single simulated port; nothing to sniff.
        warn!("sniffer mode is only meaningful on the device; running as bridge");
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(config.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("tuya-bridge-host", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(config.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(config.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    // The simulated MCU hangs off the far end of a duplex pipe.
    let (bridge_io, mcu_io) = tokio::io::duplex(512);
    tokio::spawn(sim::run(mcu_io));
    let (reader, writer) = tokio::io::split(bridge_io);

    let state = AppState {
        engine: Arc::new(Mutex::new(BridgeEngine::new())),
        link: Arc::new(Mutex::new(LinkBridge::new(LinkMode::Bridge))),
        mcu_writer: Arc::new(Mutex::new(writer)),
        mqtt,
        timezone: Arc::from(config.timezone.as_str()),
    };

    if let Err(err) = state
        .mqtt
        .subscribe(keys::TOPIC_CMND_WILDCARD, QoS::AtMostOnce)
        .await
    {
        warn!("mqtt subscribe failed: {err}");
    }
    spawn_mqtt_loop(state.clone(), eventloop);
    spawn_reader_loop(state.clone(), reader);
    spawn_console_loop(state.clone());

    info!("bridge host runtime started (simulated MCU attached)");
    heartbeat_loop(state).await
}

fn load_config() -> anyhow::Result<BridgeConfig> {
    let Some(path) = std::env::var_os("BRIDGE_CONFIG") else {
        return Ok(BridgeConfig::default());
    };
    let path = PathBuf::from(path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Drain bytes from the MCU stream into the shared link state.
fn spawn_reader_loop(state: AppState, mut reader: ReadHalf<McuStream>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    warn!("mcu stream closed; reader stopping");
                    return;
                }
                Ok(n) => n,
            };

            for byte in &buf[..n] {
                let frame = {
                    let mut link = state.link.lock().await;
                    link.ingest(Port::Mcu, *byte).frame
                };
                if let Some(frame) = frame {
                    let effects = {
                        let mut engine = state.engine.lock().await;
                        engine.handle_frame(
                            &frame,
                            true,
                            wall_clock(&state.timezone).as_ref(),
                            monotonic_ms(),
                        )
                    };
                    execute_effects(&state, effects).await;
                }
            }
        }
    });
}

fn spawn_mqtt_loop(state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized MQTT payload on {} ({} bytes)",
                            message.topic,
                            message.payload.len()
                        );
                        continue;
                    }
                    let Some(key) = message.topic.strip_prefix(keys::TOPIC_CMND_PREFIX) else {
                        continue;
                    };
                    let Ok(value) = String::from_utf8(message.payload.to_vec()) else {
                        warn!("non utf8 payload on {}", message.topic);
                        continue;
                    };

                    let effects = {
                        let mut engine = state.engine.lock().await;
                        engine.apply_update(key, value.trim())
                    };
                    execute_effects(&state, effects).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Line console: `key=value` feeds the UI encoder, anything else is treated
/// as a raw frame in the `M 6 4 4 1` grammar.
fn spawn_console_loop(state: AppState) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let effects = {
                    let mut engine = state.engine.lock().await;
                    engine.apply_update(key.trim(), value.trim())
                };
                execute_effects(&state, effects).await;
                continue;
            }

            match console::parse_frame(line) {
                Ok((Port::Mcu, frame)) => send_frame(&state, &frame).await,
                Ok((Port::Wifi, _)) => {
                    warn!("no wifi module port on the host runtime");
                }
                Err(err) => warn!("console input rejected: {err:#}"),
            }
        }
    });
}

/// Heartbeat cadence: fast until the MCU acknowledges, then relaxed.
async fn heartbeat_loop(state: AppState) -> anyhow::Result<()> {
    loop {
        let outcome = {
            let mut engine = state.engine.lock().await;
            engine.tick(monotonic_ms(), true, wall_clock(&state.timezone).as_ref())
        };
        execute_effects(&state, outcome.effects).await;
        tokio::time::sleep(Duration::from_secs(outcome.next_delay_secs)).await;
    }
}

async fn execute_effects(state: &AppState, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Publish { key, value } => {
                info!("{{\"cfgGroup\":\"-1\", \"{key}\":\"{value}\"}}");
                let topic = format!("{}{}", keys::TOPIC_STATUS_PREFIX, key);
                if let Err(err) = state.mqtt.try_publish(topic, QoS::AtLeastOnce, true, value) {
                    warn!("status publish failed: {err}");
                }
            }
            Effect::Send(frame) => send_frame(state, &frame).await,
        }
    }
}

async fn send_frame(state: &AppState, frame: &bridge_common::Frame) {
    let bytes = frame.encode();
    let mut writer = state.mcu_writer.lock().await;
    if let Err(err) = writer.write_all(&bytes).await {
        warn!("mcu write failed: {err}");
    }
}

fn wall_clock(timezone: &str) -> Option<WallClock> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
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
