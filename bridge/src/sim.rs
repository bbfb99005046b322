//! In-process stand-in for the Avatto i8 display/sensor MCU.
//!
//! Speaks the serial protocol over one end of a duplex pipe: answers
//! heartbeats (first reply flags a restart), reports every datapoint on a
//! status query, echoes accepted sets, and runs a crude thermal model with
//! the MCU's own on/off thermostat so the calibration trick can be watched
//! end to end on a desk.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, warn};

use bridge_common::datapoint::{dp, Datapoint, DpValue};
use bridge_common::frame::{cmd, Frame, FrameAccumulator, VERSION_MCU};
use bridge_common::schedule::{ScheduleTable, Slot};

/// Seconds between thermal model steps and temperature reports.
const REPORT_INTERVAL_SECS: u64 = 5;

struct McuModel {
    booted: bool,
    display_on: bool,
    /// True floor temperature in decidegrees.
    sensor_decideg: f32,
    target_decideg: i32,
    cal_decideg: i32,
    backlash_decideg: i32,
    heating: bool,
    schedule: ScheduleTable,
}

impl Default for McuModel {
    fn default() -> Self {
        let mut schedule = ScheduleTable::default();
        let program: [(u8, u8, i16); 8] = [
            (6, 0, 200),
            (8, 30, 190),
            (9, 0, 185),
            (12, 30, 190),
            (16, 30, 200),
            (22, 0, 170),
            (8, 0, 190),
            (20, 0, 170),
        ];
        for (i, (hour, minute, temp_decideg)) in program.into_iter().enumerate() {
            schedule.slots[i] = Slot {
                hour,
                minute,
                temp_decideg,
            };
        }

        Self {
            booted: false,
            display_on: true,
            sensor_decideg: 188.0,
            target_decideg: 190,
            cal_decideg: 0,
            backlash_decideg: 5,
            heating: false,
            schedule,
        }
    }
}

impl McuModel {
    /// Temperature as shown on the display: sensor plus calibration offset.
    fn displayed_decideg(&self) -> i32 {
        self.sensor_decideg as i32 + self.cal_decideg
    }

    fn report(&self, id: u8, value: DpValue) -> Frame {
        Frame::datapoint(VERSION_MCU, cmd::DP_REPORT, id, &value)
    }

    fn all_reports(&self) -> Vec<Frame> {
        vec![
            self.report(dp::SWITCH_DISP, DpValue::Bool(self.display_on)),
            self.report(dp::TGT_TEMP, DpValue::Int(self.target_decideg)),
            self.report(dp::CURR_TEMP, DpValue::Int(self.displayed_decideg())),
            self.report(dp::PROG_MODE, DpValue::Enum(1)),
            self.report(dp::OUTPUT_ON, DpValue::Bool(self.heating)),
            self.report(dp::CHILD_LOCK, DpValue::Bool(false)),
            self.report(dp::SOUND_ON, DpValue::Bool(true)),
            self.report(dp::FAULT, DpValue::Bitmap(vec![0])),
            self.report(dp::TEMP_CAL, DpValue::Int(self.cal_decideg)),
            self.report(dp::ROOM_MAX, DpValue::Int(45)),
            self.report(dp::TEMP_SENSOR, DpValue::Enum(2)),
            self.report(dp::FROST, DpValue::Bool(false)),
            self.report(dp::BACKLIGHT, DpValue::Enum(1)),
            self.report(dp::DAY_SETTING, DpValue::Enum(0)),
            self.report(dp::SCHEDULE, DpValue::Raw(self.schedule.to_wire())),
            self.report(dp::OP_REVERSE, DpValue::Bool(false)),
            self.report(dp::TEMP_LASH, DpValue::Int(self.backlash_decideg)),
            self.report(dp::FLOOR_MAX, DpValue::Int(50)),
        ]
    }

    fn handle(&mut self, frame: &Frame) -> Vec<Frame> {
        match frame.command {
            cmd::HEARTBEAT => {
                let flag = self.booted as u8;
                self.booted = true;
                vec![Frame::new(VERSION_MCU, cmd::HEARTBEAT, vec![flag])]
            }
            cmd::DP_QUERY => self.all_reports(),
            cmd::DP_SET => match Datapoint::parse(&frame.payload) {
                Ok(datapoint) => self.apply_set(datapoint),
                Err(err) => {
                    warn!("sim: rejecting datapoint set: {err}");
                    Vec::new()
                }
            },
            cmd::WIFI_STATUS => {
                vec![Frame::new(VERSION_MCU, cmd::WIFI_STATUS, Vec::new())]
            }
            cmd::LOCAL_TIME | cmd::PRODUCT_QUERY | cmd::WORKING_MODE | cmd::WIFI_RESET => {
                Vec::new()
            }
            other => {
                debug!("sim: ignoring command {other}");
                Vec::new()
            }
        }
    }

    /// Accept a set and echo it back as a report, like the real display.
    fn apply_set(&mut self, datapoint: Datapoint) -> Vec<Frame> {
        match (datapoint.id, &datapoint.value) {
            (dp::TGT_TEMP, DpValue::Int(v)) => self.target_decideg = *v,
            (dp::TEMP_CAL, DpValue::Int(v)) => self.cal_decideg = *v,
            (dp::TEMP_LASH, DpValue::Int(v)) => self.backlash_decideg = *v,
            (dp::SWITCH_DISP, DpValue::Bool(on)) => self.display_on = *on,
            (dp::SCHEDULE, DpValue::Raw(blob)) => {
                if let Some(table) = ScheduleTable::from_wire(blob) {
                    self.schedule = table;
                }
            }
            _ => {}
        }
        vec![self.report(datapoint.id, datapoint.value)]
    }

    /// One thermal step plus the MCU's built-in relay decision.
    fn step(&mut self) -> Vec<Frame> {
        self.sensor_decideg += if self.heating { 3.0 } else { -1.0 };

        let mut frames = Vec::new();
        let displayed = self.displayed_decideg();
        if self.heating && displayed > self.target_decideg {
            self.heating = false;
            frames.push(self.report(dp::OUTPUT_ON, DpValue::Bool(false)));
        } else if !self.heating && displayed < self.target_decideg - self.backlash_decideg {
            self.heating = true;
            frames.push(self.report(dp::OUTPUT_ON, DpValue::Bool(true)));
        }
        frames.push(self.report(dp::CURR_TEMP, DpValue::Int(displayed)));
        frames
    }
}

pub async fn run(io: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut accumulator = FrameAccumulator::new();
    let mut model = McuModel::default();
    let mut buf = [0u8; 64];
    let mut ticker = tokio::time::interval(Duration::from_secs(REPORT_INTERVAL_SECS));

    loop {
        let frames = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    debug!("sim: bridge side closed");
                    return;
                }
                Ok(n) => buf[..n]
                    .iter()
                    .filter_map(|byte| accumulator.push_decode(*byte))
                    .flat_map(|frame| model.handle(&frame))
                    .collect::<Vec<_>>(),
            },
            _ = ticker.tick() => model.step(),
        };

        for frame in frames {
            if writer.write_all(&frame.encode()).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_heartbeat_reply_signals_a_restart() {
        let mut model = McuModel::default();
        let heartbeat = Frame::new(0x00, cmd::HEARTBEAT, Vec::new());

        let first = model.handle(&heartbeat);
        assert_eq!(first[0].payload, vec![0]);
        let second = model.handle(&heartbeat);
        assert_eq!(second[0].payload, vec![1]);
    }

    #[test]
    fn status_query_reports_the_full_datapoint_set() {
        let mut model = McuModel::default();
        let reports = model.handle(&Frame::new(0x00, cmd::DP_QUERY, Vec::new()));
        assert_eq!(reports.len(), 18);
    }

    #[test]
    fn understated_calibration_forces_the_relay_on() {
        let mut model = McuModel::default();
        assert!(!model.heating);

        // Floor is inside the deadband; nothing happens on its own.
        assert!(model.step().iter().all(|f| {
            Datapoint::parse(&f.payload).unwrap().id != dp::OUTPUT_ON
        }));

        // A -3 degree calibration push drops the displayed value below
        // target - backlash and the relay engages.
        let push = Frame::datapoint(0x00, cmd::DP_SET, dp::TEMP_CAL, &DpValue::Int(-30));
        model.handle(&push);
        let frames = model.step();
        assert!(model.heating);
        assert!(frames
            .iter()
            .any(|f| Datapoint::parse(&f.payload).unwrap().id == dp::OUTPUT_ON));
    }
}
