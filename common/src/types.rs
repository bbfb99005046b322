use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Who runs the heating decision. The MCU has a built-in on/off thermostat;
/// in `Esp` mode the bridge overrides it through the calibration offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMode {
    Mcu,
    Esp,
}

impl ControlMode {
    pub fn from_flag(esp_controls: bool) -> Self {
        if esp_controls {
            Self::Esp
        } else {
            Self::Mcu
        }
    }

    /// Program mode announced to the MCU: manual while the bridge controls
    /// heating, auto when the MCU runs its own program.
    pub fn program_mode(self) -> u8 {
        match self {
            Self::Esp => 0,
            Self::Mcu => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mcu => "MCU",
            Self::Esp => "ESP",
        }
    }
}

/// Snapshot of synchronized wall time, precomputed by the runtime so the
/// core stays clock-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClock {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 0 = Sunday, matching the MCU's expectation for the time frame.
    pub weekday: u8,
    pub second_of_day: u32,
}

impl WallClock {
    pub fn from_datetime(now: DateTime<FixedOffset>) -> Self {
        Self {
            year: (now.year() % 100) as u8,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            weekday: now.weekday().num_days_from_sunday() as u8,
            second_of_day: now.num_seconds_from_midnight(),
        }
    }

    /// Payload for a local time frame: sync flag then y m d H M S weekday.
    /// Eight zero bytes mean "time not available".
    pub fn time_payload(clock: Option<&WallClock>) -> Vec<u8> {
        match clock {
            Some(clock) => vec![
                1,
                clock.year,
                clock.month,
                clock.day,
                clock.hour,
                clock.minute,
                clock.second,
                clock.weekday,
            ],
            None => vec![0; 8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wall_clock_fields_match_chrono() {
        let now = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 2, 1, 11, 6, 40)
            .unwrap();
        let clock = WallClock::from_datetime(now);

        assert_eq!(clock.year, 26);
        assert_eq!(clock.month, 2);
        assert_eq!(clock.day, 1);
        assert_eq!(clock.weekday, 0); // 2026-02-01 is a Sunday
        assert_eq!(clock.second_of_day, 11 * 3600 + 6 * 60 + 40);
        assert_eq!(
            WallClock::time_payload(Some(&clock)),
            vec![1, 26, 2, 1, 11, 6, 40, 0]
        );
    }

    #[test]
    fn unsynchronized_payload_is_all_zero() {
        assert_eq!(WallClock::time_payload(None), vec![0; 8]);
    }
}
