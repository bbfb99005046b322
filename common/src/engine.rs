use log::{error, info, warn};

use crate::controller::HysteresisController;
use crate::datapoint::{dp, Datapoint, DpValue};
use crate::frame::{cmd, Frame, VERSION_WIFI};
use crate::keys;
use crate::schedule::{ScheduleDriver, ScheduleTable, TIME_SLOTS};
use crate::stats;
use crate::types::{ControlMode, WallClock};

/// Heartbeat cadence before the MCU has acknowledged, in seconds.
pub const HEARTBEAT_FAST_SECS: u64 = 1;
/// Heartbeat cadence once replies are flowing.
pub const HEARTBEAT_SLOW_SECS: u64 = 15;

/// Side effect requested by the engine. The embedding runtime performs the
/// I/O; the engine itself never touches a port or the network.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a key/value pair on the UI surface.
    Publish { key: String, value: String },
    /// Encode and submit a frame to the MCU port.
    Send(Frame),
}

impl Effect {
    fn publish(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Publish {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Result of one heartbeat cycle.
#[derive(Debug)]
pub struct TickOutcome {
    pub effects: Vec<Effect>,
    /// Seconds until the next cycle.
    pub next_delay_secs: u64,
}

/// State machine between the MCU's datapoints and the UI surface.
///
/// Frames come in through [`BridgeEngine::handle_frame`], UI updates through
/// [`BridgeEngine::apply_update`], and the heartbeat task drives
/// [`BridgeEngine::tick`]. All three return the effects to perform so the
/// engine stays synchronous and fully testable.
#[derive(Debug)]
pub struct BridgeEngine {
    mode: ControlMode,
    controller: HysteresisController,
    schedule: ScheduleTable,
    driver: ScheduleDriver,
    slot_edits: usize,

    got_heartbeat: bool,
    heating_on: bool,
    target_decideg: i32,
    raw_decideg: i32,
    backlash_decideg: i32,
    base_cal: f32,
    heating_elapsed_ms: u64,
    session_start_ms: Option<u64>,

    last_wifi_status: Option<u8>,
    time_sent: bool,
}

impl Default for BridgeEngine {
    fn default() -> Self {
        Self {
            mode: ControlMode::Mcu,
            controller: HysteresisController::default(),
            schedule: ScheduleTable::default(),
            driver: ScheduleDriver::new(),
            slot_edits: 0,
            got_heartbeat: false,
            heating_on: false,
            target_decideg: 190,
            raw_decideg: 0,
            backlash_decideg: 0,
            base_cal: 0.0,
            heating_elapsed_ms: 0,
            session_start_ms: None,
            last_wifi_status: None,
            time_sent: false,
        }
    }
}

impl BridgeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn heating_on(&self) -> bool {
        self.heating_on
    }

    pub fn target_decideg(&self) -> i32 {
        self.target_decideg
    }

    /// Last temperature reported by the MCU, calibration offset included.
    pub fn raw_decideg(&self) -> i32 {
        self.raw_decideg
    }

    pub fn heating_elapsed_ms(&self) -> u64 {
        self.heating_elapsed_ms
    }

    pub fn controller(&self) -> &HysteresisController {
        &self.controller
    }

    pub fn schedule(&self) -> &ScheduleTable {
        &self.schedule
    }

    /// Dispatch one decoded frame from the MCU.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        wifi_connected: bool,
        clock: Option<&WallClock>,
        now_ms: u64,
    ) -> Vec<Effect> {
        match frame.command {
            cmd::HEARTBEAT => {
                self.got_heartbeat = true;
                // Payload byte 0 means the MCU restarted; announce the
                // program mode and pull every datapoint.
                if frame.payload.first() == Some(&0) {
                    info!("initialising MCU after restart");
                    return self.init_effects();
                }
                Vec::new()
            }
            cmd::PRODUCT_QUERY | cmd::WORKING_MODE | cmd::WIFI_STATUS | cmd::WIFI_RESET => {
                Vec::new()
            }
            cmd::DP_REPORT => match Datapoint::parse(&frame.payload) {
                Ok(datapoint) => self.handle_datapoint(&datapoint, wifi_connected, clock, now_ms),
                Err(err) => {
                    error!("bad datapoint payload: {err}");
                    Vec::new()
                }
            },
            cmd::LOCAL_TIME => self.local_time_effect(clock, true).into_iter().collect(),
            other => {
                error!("unhandled command number {other}");
                Vec::new()
            }
        }
    }

    /// Apply one `(variable, value)` update from the UI surface.
    pub fn apply_update(&mut self, key: &str, value: &str) -> Vec<Effect> {
        let mut effects = Vec::new();

        match key {
            keys::KEY_TGT_TEMP => {
                if let Some(degrees) = parse_f32(key, value) {
                    effects.push(self.send_dp(dp::TGT_TEMP, DpValue::Int(decideg(degrees))));
                }
            }
            keys::KEY_FLOOR_MAX => {
                if let Some(v) = parse_i32(key, value) {
                    effects.push(self.send_dp(dp::FLOOR_MAX, DpValue::Int(v)));
                }
            }
            keys::KEY_ROOM_MAX => {
                if let Some(v) = parse_i32(key, value) {
                    effects.push(self.send_dp(dp::ROOM_MAX, DpValue::Int(v)));
                }
            }
            keys::KEY_TEMP_SENSOR => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::TEMP_SENSOR, DpValue::Enum(v)));
                }
            }
            keys::KEY_PROG_MODE => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::PROG_MODE, DpValue::Enum(v)));
                }
            }
            keys::KEY_FROST => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::FROST, DpValue::Bool(v != 0)));
                }
            }
            keys::KEY_SWITCH_DISP => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::SWITCH_DISP, DpValue::Bool(v != 0)));
                }
            }
            keys::KEY_CHILD_LOCK => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::CHILD_LOCK, DpValue::Bool(v != 0)));
                }
            }
            keys::KEY_DO_RESET => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::DO_RESET, DpValue::Bool(v != 0)));
                }
            }
            keys::KEY_DO_REVERSE => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::OP_REVERSE, DpValue::Bool(v != 0)));
                }
            }
            keys::KEY_BACKLIGHT => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::BACKLIGHT, DpValue::Enum(v)));
                }
            }
            keys::KEY_DAY_SETTING => {
                if let Some(v) = parse_u8(key, value) {
                    effects.push(self.send_dp(dp::DAY_SETTING, DpValue::Enum(v)));
                }
            }
            keys::KEY_TEMP_LASH => {
                if let Some(degrees) = parse_f32(key, value) {
                    effects.push(self.send_dp(dp::TEMP_LASH, DpValue::Int(decideg(degrees))));
                }
            }
            keys::KEY_TEMP_CAL => {
                if let Some(degrees) = parse_f32(key, value) {
                    self.base_cal = degrees;
                    // Under bridge control the controller owns the
                    // calibration setting; do not fight it.
                    if self.mode == ControlMode::Mcu {
                        effects.push(self.send_dp(dp::TEMP_CAL, DpValue::Int(decideg(degrees))));
                    }
                }
            }
            keys::KEY_ESP_CAL => {
                if let Some(v) = parse_i32(key, value) {
                    effects.push(self.send_dp(dp::TEMP_CAL, DpValue::Int(v)));
                }
            }
            keys::KEY_ALPHA => {
                if let Some(v) = parse_f32(key, value) {
                    self.controller.alpha = v;
                }
            }
            keys::KEY_DRIFT => {
                if let Some(v) = parse_i32(key, value) {
                    self.controller.drift = v;
                }
            }
            keys::KEY_SET_CTRL => {
                if let Some(v) = parse_u8(key, value) {
                    self.mode = ControlMode::from_flag(v != 0);
                    info!("Control mode switched to {}", self.mode.as_str());
                    effects.push(
                        self.send_dp(dp::PROG_MODE, DpValue::Enum(self.mode.program_mode())),
                    );
                }
            }
            _ if key.starts_with(keys::SLOT_TIME_PREFIX) => {
                if let Some(slot) = self.slot_index(key, keys::SLOT_TIME_PREFIX) {
                    if let Some((hour, minute)) = parse_slot_time(value) {
                        self.schedule.slots[slot].hour = hour;
                        self.schedule.slots[slot].minute = minute;
                        self.note_slot_edit(&mut effects);
                    }
                }
            }
            _ if key.starts_with(keys::SLOT_TEMP_PREFIX) => {
                if let Some(slot) = self.slot_index(key, keys::SLOT_TEMP_PREFIX) {
                    if let Some(degrees) = parse_f32(key, value) {
                        self.schedule.slots[slot].temp_decideg = decideg(degrees) as i16;
                        self.note_slot_edit(&mut effects);
                    }
                }
            }
            other => warn!("ignoring unrecognised variable {other}"),
        }

        effects
    }

    /// One heartbeat cycle: emit the heartbeat, and on an acknowledged cycle
    /// push wifi status and time changes, refresh statistics and advance the
    /// schedule.
    pub fn tick(
        &mut self,
        now_ms: u64,
        wifi_connected: bool,
        clock: Option<&WallClock>,
    ) -> TickOutcome {
        let mut effects = vec![Effect::Send(Frame::new(
            VERSION_WIFI,
            cmd::HEARTBEAT,
            Vec::new(),
        ))];

        let acked = self.got_heartbeat;
        if acked {
            self.got_heartbeat = false;
            effects.extend(self.wifi_status_effect(wifi_connected, false));
            effects.extend(self.local_time_effect(clock, false));
            for (key, value) in stats::heating_stats(now_ms, self.heating_elapsed_ms) {
                effects.push(Effect::publish(key, value));
            }
            if let Some(clock) = clock {
                if let Some((index, slot)) =
                    self.driver.advance(&self.schedule, clock.second_of_day, now_ms)
                {
                    let temp = format!("{:.1}", slot.temp_decideg as f32 / 10.0);
                    info!(
                        "Activate schedule W{}: Temp {} for {} mins",
                        index + 1,
                        temp,
                        self.driver.slot_duration_ms() / 60_000
                    );
                    effects.extend(self.apply_update(keys::KEY_TGT_TEMP, &temp));
                }
            }
        } else {
            warn!("Missed heartbeat");
        }

        TickOutcome {
            effects,
            next_delay_secs: if acked {
                HEARTBEAT_SLOW_SECS
            } else {
                HEARTBEAT_FAST_SECS
            },
        }
    }

    fn handle_datapoint(
        &mut self,
        datapoint: &Datapoint,
        wifi_connected: bool,
        clock: Option<&WallClock>,
        now_ms: u64,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let value = &datapoint.value;

        match datapoint.id {
            dp::SWITCH_DISP => {
                let on = value.scalar().unwrap_or(0);
                effects.push(Effect::publish(keys::KEY_SWITCH_DISP, on.to_string()));
                if on != 0 {
                    // Display woke up; refresh its clock and wifi icon.
                    effects.extend(self.local_time_effect(clock, true));
                    effects.extend(self.wifi_status_effect(wifi_connected, true));
                }
            }
            dp::TGT_TEMP => {
                if let Some(v) = value.as_int() {
                    self.target_decideg = v;
                    effects.push(Effect::publish(keys::KEY_TGT_TEMP, format_deci(v)));
                }
            }
            dp::CURR_TEMP => {
                if let Some(v) = value.as_int() {
                    self.raw_decideg = v;
                    effects.push(Effect::publish(keys::KEY_RAW_TEMP, format_deci(v)));
                    if self.mode == ControlMode::Esp {
                        let push = self.controller.on_report(
                            v as f32 / 10.0,
                            self.heating_on,
                            self.base_cal,
                            self.backlash_decideg as f32 / 10.0,
                            self.target_decideg as f32 / 10.0,
                        );
                        if let Some(push) = push {
                            effects
                                .extend(self.apply_update(keys::KEY_ESP_CAL, &push.0.to_string()));
                        }
                    } else {
                        self.controller.set_smoothed(v as f32 / 10.0);
                    }
                    effects.push(Effect::publish(
                        keys::KEY_CURR_TEMP,
                        format!("{:.1}", self.controller.smoothed()),
                    ));
                }
            }
            dp::PROG_MODE => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_PROG_MODE, v.to_string()));
                }
            }
            dp::OUTPUT_ON => {
                let on = value.scalar().unwrap_or(0) != 0;
                effects.push(Effect::publish(keys::KEY_OUTPUT_ON, (on as u8).to_string()));
                self.heating_on = on;
                if on {
                    self.session_start_ms = Some(now_ms);
                } else if let Some(start) = self.session_start_ms.take() {
                    let session = now_ms.saturating_sub(start);
                    self.heating_elapsed_ms += session;
                    info!("Heating session lasted {} secs", session / 1000);
                }
            }
            dp::CHILD_LOCK => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_CHILD_LOCK, v.to_string()));
                }
            }
            dp::SOUND_ON => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_SOUND_ON, v.to_string()));
                }
            }
            dp::FAULT => {
                let fault = value.scalar().unwrap_or(0);
                effects.push(Effect::publish(keys::KEY_FAULT, fault.to_string()));
                if fault != 0 {
                    error!("external temperature sensor not connected: {fault}");
                }
            }
            dp::TEMP_CAL => {
                // While the bridge controls heating the offset is ours; the
                // report only echoes the falsified value.
                if self.mode == ControlMode::Mcu {
                    if let Some(v) = value.as_int() {
                        effects.push(Effect::publish(keys::KEY_TEMP_CAL, format_deci(v)));
                    }
                }
            }
            dp::ROOM_MAX => {
                if let Some(v) = value.as_int() {
                    effects.push(Effect::publish(keys::KEY_ROOM_MAX, v.to_string()));
                }
            }
            dp::TEMP_SENSOR => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_TEMP_SENSOR, v.to_string()));
                }
            }
            dp::FROST => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_FROST, v.to_string()));
                }
            }
            dp::DO_RESET => {
                if value.scalar().unwrap_or(0) != 0 {
                    effects.push(self.query_status());
                }
            }
            dp::BACKLIGHT => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_BACKLIGHT, v.to_string()));
                }
            }
            dp::DAY_SETTING => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_DAY_SETTING, v.to_string()));
                }
            }
            dp::SCHEDULE => {
                effects.extend(publish_schedule(value));
            }
            dp::OP_REVERSE => {
                if let Some(v) = value.scalar() {
                    effects.push(Effect::publish(keys::KEY_OP_REVERSE, v.to_string()));
                }
            }
            dp::TEMP_LASH => {
                if let Some(v) = value.as_int() {
                    self.backlash_decideg = v;
                    effects.push(Effect::publish(keys::KEY_TEMP_LASH, format_deci(v)));
                }
            }
            dp::FLOOR_MAX => {
                if let Some(v) = value.as_int() {
                    effects.push(Effect::publish(keys::KEY_FLOOR_MAX, v.to_string()));
                }
            }
            other => error!("unknown datapoint id {other}"),
        }

        effects
    }

    fn init_effects(&mut self) -> Vec<Effect> {
        vec![
            self.send_dp(dp::PROG_MODE, DpValue::Enum(self.mode.program_mode())),
            self.query_status(),
        ]
    }

    fn query_status(&self) -> Effect {
        Effect::Send(Frame::new(VERSION_WIFI, cmd::DP_QUERY, Vec::new()))
    }

    fn send_dp(&self, id: u8, value: DpValue) -> Effect {
        Effect::Send(Frame::datapoint(VERSION_WIFI, cmd::DP_SET, id, &value))
    }

    fn wifi_status_effect(&mut self, connected: bool, demanded: bool) -> Option<Effect> {
        let status = if connected { 4 } else { 0 };
        if demanded || self.last_wifi_status != Some(status) {
            self.last_wifi_status = Some(status);
            return Some(Effect::Send(Frame::new(
                VERSION_WIFI,
                cmd::WIFI_STATUS,
                vec![status],
            )));
        }
        None
    }

    fn local_time_effect(&mut self, clock: Option<&WallClock>, demanded: bool) -> Option<Effect> {
        if (clock.is_some() && !self.time_sent) || demanded {
            if clock.is_some() {
                self.time_sent = true;
            }
            return Some(Effect::Send(Frame::new(
                VERSION_WIFI,
                cmd::LOCAL_TIME,
                WallClock::time_payload(clock),
            )));
        }
        None
    }

    fn slot_index(&self, key: &str, prefix: &str) -> Option<usize> {
        match key[prefix.len()..].parse::<usize>() {
            Ok(n) if (1..=TIME_SLOTS).contains(&n) => Some(n - 1),
            Ok(n) => {
                error!("invalid schedule slot number {n}");
                None
            }
            Err(_) => {
                error!("non numeric schedule slot in {key}");
                None
            }
        }
    }

    fn note_slot_edit(&mut self, effects: &mut Vec<Effect>) {
        self.slot_edits += 1;
        if self.slot_edits >= 2 * TIME_SLOTS {
            self.slot_edits = 0;
            effects.push(self.send_dp(dp::SCHEDULE, DpValue::Raw(self.schedule.to_wire())));
        }
    }
}

fn publish_schedule(value: &DpValue) -> Vec<Effect> {
    let blob = value.to_wire();
    if blob.len() < TIME_SLOTS * 4 {
        error!("schedule blob too short: {} bytes", blob.len());
        return Vec::new();
    }

    let mut effects = Vec::with_capacity(TIME_SLOTS * 2);
    for (i, chunk) in blob.chunks_exact(4).take(TIME_SLOTS).enumerate() {
        effects.push(Effect::publish(
            format!("{}{}", keys::SLOT_TIME_PREFIX, i + 1),
            format!("{:02}:{:02}", chunk[0], chunk[1]),
        ));
        let temp = i16::from_be_bytes([chunk[2], chunk[3]]) / 10;
        effects.push(Effect::publish(
            format!("{}{}", keys::SLOT_TEMP_PREFIX, i + 1),
            temp.to_string(),
        ));
    }
    effects
}

fn decideg(degrees: f32) -> i32 {
    (degrees * 10.0).round() as i32
}

fn format_deci(value: i32) -> String {
    format!("{:.1}", value as f32 / 10.0)
}

fn parse_f32(key: &str, value: &str) -> Option<f32> {
    match value.trim().parse::<f32>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            warn!("dropping non numeric value for {key}: {value:?}");
            None
        }
    }
}

fn parse_i32(key: &str, value: &str) -> Option<i32> {
    match value.trim().parse::<i32>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("dropping non numeric value for {key}: {value:?}");
            None
        }
    }
}

fn parse_u8(key: &str, value: &str) -> Option<u8> {
    match value.trim().parse::<u8>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("dropping non numeric value for {key}: {value:?}");
            None
        }
    }
}

fn parse_slot_time(value: &str) -> Option<(u8, u8)> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour = hour.parse::<u8>().ok()?;
    let minute = minute.parse::<u8>().ok()?;
    if hour > 23 || minute > 59 {
        warn!("dropping out of range slot time {value:?}");
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VERSION_MCU;

    fn mcu_report(id: u8, value: DpValue) -> Frame {
        Frame::datapoint(VERSION_MCU, cmd::DP_REPORT, id, &value)
    }

    fn sends(effects: &[Effect]) -> Vec<&Frame> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn published<'a>(effects: &'a [Effect], key: &str) -> Option<&'a str> {
        effects.iter().find_map(|e| match e {
            Effect::Publish { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    #[test]
    fn target_report_updates_mirror_and_publishes_degrees() {
        let mut engine = BridgeEngine::new();
        let effects = engine.handle_frame(&mcu_report(dp::TGT_TEMP, DpValue::Int(188)), true, None, 0);

        assert_eq!(engine.target_decideg(), 188);
        assert_eq!(published(&effects, keys::KEY_TGT_TEMP), Some("18.8"));
    }

    #[test]
    fn target_update_encodes_the_reference_byte_stream() {
        let mut engine = BridgeEngine::new();
        let effects = engine.apply_update(keys::KEY_TGT_TEMP, "19");

        let frames = sends(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].encode(),
            vec![
                0x55, 0xaa, 0x00, 0x06, 0x00, 0x08, 0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00,
                0xbe, 0xd3,
            ]
        );
    }

    #[test]
    fn first_heartbeat_reply_announces_mode_and_queries_status() {
        let mut engine = BridgeEngine::new();
        let reply = Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![0]);
        let effects = engine.handle_frame(&reply, true, None, 0);

        let frames = sends(&effects);
        assert_eq!(frames.len(), 2);
        // MCU keeps its own program: auto mode.
        let dp4 = Datapoint::parse(&frames[0].payload).unwrap();
        assert_eq!(dp4.id, dp::PROG_MODE);
        assert_eq!(dp4.value, DpValue::Enum(1));
        assert_eq!(frames[1].command, cmd::DP_QUERY);
    }

    #[test]
    fn later_heartbeat_replies_do_not_reinitialise() {
        let mut engine = BridgeEngine::new();
        let reply = Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![1]);
        assert!(engine.handle_frame(&reply, true, None, 0).is_empty());
    }

    #[test]
    fn heartbeat_cadence_switches_after_first_reply() {
        let mut engine = BridgeEngine::new();

        // Cold start: two fast ticks, no reply yet.
        let tick = engine.tick(0, false, None);
        assert_eq!(tick.next_delay_secs, HEARTBEAT_FAST_SECS);
        assert_eq!(sends(&tick.effects).len(), 1);
        let tick = engine.tick(1_000, false, None);
        assert_eq!(tick.next_delay_secs, HEARTBEAT_FAST_SECS);

        engine.handle_frame(&Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![1]), false, None, 1_500);

        let tick = engine.tick(2_000, false, None);
        assert_eq!(tick.next_delay_secs, HEARTBEAT_SLOW_SECS);
    }

    #[test]
    fn acknowledged_tick_pushes_wifi_status_once_per_change() {
        let mut engine = BridgeEngine::new();
        engine.handle_frame(&Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![1]), true, None, 0);

        let tick = engine.tick(1_000, true, None);
        let status: Vec<_> = sends(&tick.effects)
            .into_iter()
            .filter(|f| f.command == cmd::WIFI_STATUS)
            .collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload, vec![4]);

        // Unchanged on the next acknowledged tick.
        engine.handle_frame(&Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![1]), true, None, 2_000);
        let tick = engine.tick(16_000, true, None);
        assert!(sends(&tick.effects)
            .iter()
            .all(|f| f.command != cmd::WIFI_STATUS));
    }

    #[test]
    fn local_time_request_is_answered_with_the_clock_payload() {
        let mut engine = BridgeEngine::new();
        let clock = WallClock {
            year: 26,
            month: 2,
            day: 1,
            hour: 7,
            minute: 30,
            second: 5,
            weekday: 0,
            second_of_day: 27_005,
        };

        let request = Frame::new(VERSION_MCU, cmd::LOCAL_TIME, Vec::new());
        let effects = engine.handle_frame(&request, true, Some(&clock), 0);
        let frames = sends(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, cmd::LOCAL_TIME);
        assert_eq!(frames[0].payload, vec![1, 26, 2, 1, 7, 30, 5, 0]);

        // Without sync the payload is all zeros.
        let effects = engine.handle_frame(&request, true, None, 0);
        assert_eq!(sends(&effects)[0].payload, vec![0; 8]);
    }

    #[test]
    fn heating_sessions_accumulate_elapsed_time() {
        let mut engine = BridgeEngine::new();

        engine.handle_frame(&mcu_report(dp::OUTPUT_ON, DpValue::Bool(true)), true, None, 10_000);
        assert!(engine.heating_on());

        engine.handle_frame(&mcu_report(dp::OUTPUT_ON, DpValue::Bool(false)), true, None, 70_000);
        assert!(!engine.heating_on());
        assert_eq!(engine.heating_elapsed_ms(), 60_000);

        // A lone OFF report must not add anything.
        engine.handle_frame(&mcu_report(dp::OUTPUT_ON, DpValue::Bool(false)), true, None, 90_000);
        assert_eq!(engine.heating_elapsed_ms(), 60_000);
    }

    #[test]
    fn cold_floor_under_bridge_control_pushes_negative_calibration() {
        let mut engine = BridgeEngine::new();
        engine.apply_update(keys::KEY_SET_CTRL, "1");
        engine.handle_frame(&mcu_report(dp::TGT_TEMP, DpValue::Int(190)), true, None, 0);
        engine.handle_frame(&mcu_report(dp::TEMP_LASH, DpValue::Int(5)), true, None, 0);

        let effects = engine.handle_frame(&mcu_report(dp::CURR_TEMP, DpValue::Int(184)), true, None, 0);

        assert_eq!(published(&effects, keys::KEY_RAW_TEMP), Some("18.4"));
        assert_eq!(published(&effects, keys::KEY_CURR_TEMP), Some("15.4"));
        let frames = sends(&effects);
        assert_eq!(frames.len(), 1);
        let push = Datapoint::parse(&frames[0].payload).unwrap();
        assert_eq!(push.id, dp::TEMP_CAL);
        assert_eq!(push.value, DpValue::Int(-30));
    }

    #[test]
    fn mcu_control_takes_readings_at_face_value() {
        let mut engine = BridgeEngine::new();
        let effects = engine.handle_frame(&mcu_report(dp::CURR_TEMP, DpValue::Int(215)), true, None, 0);

        assert_eq!(engine.raw_decideg(), 215);
        assert_eq!(published(&effects, keys::KEY_RAW_TEMP), Some("21.5"));
        assert_eq!(published(&effects, keys::KEY_CURR_TEMP), Some("21.5"));
        assert!(sends(&effects).is_empty());
    }

    #[test]
    fn inbound_calibration_is_ignored_while_bridge_controls() {
        let mut engine = BridgeEngine::new();

        let effects = engine.handle_frame(&mcu_report(dp::TEMP_CAL, DpValue::Int(15)), true, None, 0);
        assert_eq!(published(&effects, keys::KEY_TEMP_CAL), Some("1.5"));

        engine.apply_update(keys::KEY_SET_CTRL, "1");
        let effects = engine.handle_frame(&mcu_report(dp::TEMP_CAL, DpValue::Int(15)), true, None, 0);
        assert!(effects.is_empty());
    }

    #[test]
    fn calibration_update_is_held_back_under_bridge_control() {
        let mut engine = BridgeEngine::new();

        engine.apply_update(keys::KEY_SET_CTRL, "1");
        assert!(sends(&engine.apply_update(keys::KEY_TEMP_CAL, "1.5")).is_empty());

        engine.apply_update(keys::KEY_SET_CTRL, "0");
        let effects = engine.apply_update(keys::KEY_TEMP_CAL, "1.5");
        let frames = sends(&effects);
        assert_eq!(frames.len(), 1);
        let dp20 = Datapoint::parse(&frames[0].payload).unwrap();
        assert_eq!(dp20.value, DpValue::Int(15));
    }

    #[test]
    fn control_handover_announces_manual_mode() {
        let mut engine = BridgeEngine::new();
        let effects = engine.apply_update(keys::KEY_SET_CTRL, "1");

        assert_eq!(engine.mode(), ControlMode::Esp);
        let dp4 = Datapoint::parse(&sends(&effects)[0].payload).unwrap();
        assert_eq!(dp4.id, dp::PROG_MODE);
        assert_eq!(dp4.value, DpValue::Enum(0));
    }

    #[test]
    fn reset_report_triggers_a_status_requery() {
        let mut engine = BridgeEngine::new();
        let effects = engine.handle_frame(&mcu_report(dp::DO_RESET, DpValue::Bool(true)), true, None, 0);
        assert_eq!(sends(&effects)[0].command, cmd::DP_QUERY);
    }

    #[test]
    fn full_slot_edit_batch_emits_exactly_one_schedule_frame() {
        let mut engine = BridgeEngine::new();
        let mut total = 0;

        for slot in 1..=TIME_SLOTS {
            let time_key = format!("{}{}", keys::SLOT_TIME_PREFIX, slot);
            let temp_key = format!("{}{}", keys::SLOT_TEMP_PREFIX, slot);
            total += sends(&engine.apply_update(&time_key, &format!("{slot:02}:30"))).len();
            total += sends(&engine.apply_update(&temp_key, &format!("{}.5", 18 + slot))).len();
        }

        assert_eq!(total, 1);

        // The flush carries the whole table in wire order.
        let mut engine2 = BridgeEngine::new();
        let mut flush = None;
        for slot in 1..=TIME_SLOTS {
            engine2.apply_update(&format!("{}{}", keys::SLOT_TIME_PREFIX, slot), "06:00");
            let effects =
                engine2.apply_update(&format!("{}{}", keys::SLOT_TEMP_PREFIX, slot), "19.0");
            if let Some(Effect::Send(frame)) = effects.into_iter().next() {
                flush = Some(frame);
            }
        }
        let flush = flush.expect("schedule flush frame");
        let dp43 = Datapoint::parse(&flush.payload).unwrap();
        assert_eq!(dp43.id, dp::SCHEDULE);
        assert_eq!(dp43.value.to_wire().len(), 32);
        assert_eq!(&dp43.value.to_wire()[..4], &[6, 0, 0, 190]);
    }

    #[test]
    fn invalid_slot_numbers_are_dropped_without_counting() {
        let mut engine = BridgeEngine::new();
        assert!(engine.apply_update("slotTime9", "06:00").is_empty());
        assert!(engine.apply_update("slotTimeX", "06:00").is_empty());
        assert!(engine.apply_update("slotTemp1", "warm").is_empty());

        // A full valid batch afterwards still flushes exactly once.
        let mut sent = 0;
        for slot in 1..=TIME_SLOTS {
            sent += sends(&engine.apply_update(&format!("slotTime{slot}"), "06:00")).len();
            sent += sends(&engine.apply_update(&format!("slotTemp{slot}"), "19")).len();
        }
        assert_eq!(sent, 1);
    }

    #[test]
    fn schedule_report_mirrors_slots_to_the_ui() {
        let mut engine = BridgeEngine::new();
        let mut blob = vec![0u8; 32];
        blob[0] = 6; // 06:30, 19.5 degrees
        blob[1] = 30;
        blob[2..4].copy_from_slice(&195i16.to_be_bytes());

        let effects =
            engine.handle_frame(&mcu_report(dp::SCHEDULE, DpValue::Raw(blob)), true, None, 0);

        assert_eq!(published(&effects, "slotTime1"), Some("06:30"));
        assert_eq!(published(&effects, "slotTemp1"), Some("19"));
        assert_eq!(effects.len(), TIME_SLOTS * 2);
    }

    #[test]
    fn unknown_keys_and_datapoints_change_nothing() {
        let mut engine = BridgeEngine::new();
        assert!(engine.apply_update("lightShow", "1").is_empty());

        let effects = engine.handle_frame(&mcu_report(99, DpValue::Bool(true)), true, None, 0);
        assert!(effects.is_empty());
    }

    #[test]
    fn schedule_change_routes_target_through_the_encoder() {
        let mut engine = BridgeEngine::new();

        // Populate slot starts via the UI path.
        let starts = ["06:00", "08:30", "09:00", "12:30", "16:30", "22:00", "08:00", "20:00"];
        for (i, start) in starts.iter().enumerate() {
            engine.apply_update(&format!("slotTime{}", i + 1), start);
            engine.apply_update(&format!("slotTemp{}", i + 1), &format!("{}", 18 + i));
        }

        engine.handle_frame(&Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![1]), true, None, 0);
        let clock = WallClock {
            year: 26,
            month: 2,
            day: 2,
            hour: 11,
            minute: 6,
            second: 40,
            weekday: 1,
            second_of_day: 40_000,
        };
        let tick = engine.tick(1_000, true, Some(&clock));

        // Slot 2 (09:00, 20 degrees) is active; its target goes to the MCU.
        let dp2 = sends(&tick.effects)
            .into_iter()
            .filter(|f| f.command == cmd::DP_SET)
            .map(|f| Datapoint::parse(&f.payload).unwrap())
            .find(|d| d.id == dp::TGT_TEMP)
            .expect("target frame");
        assert_eq!(dp2.value, DpValue::Int(200));
    }
}
