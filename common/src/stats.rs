use crate::keys;

/// Rated power of the heating mat, used for the projected energy figure.
pub const RATED_KW: f32 = 1.8;

const MS_PER_HOUR: f32 = 3600.0 * 1000.0;

/// Elapsed time as `d:HH:MM:SS`.
pub fn format_elapsed(ms: u64) -> String {
    let total_secs = ms / 1000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{days}:{hours:02}:{minutes:02}:{seconds:02}")
}

/// Runtime statistics published on each acknowledged heartbeat: uptime,
/// total heating time, duty cycle, and the projections derived from it.
pub fn heating_stats(uptime_ms: u64, heating_ms: u64) -> Vec<(&'static str, String)> {
    let pcnt_on = if uptime_ms == 0 {
        0.0
    } else {
        heating_ms as f32 * 100.0 / uptime_ms as f32
    };
    // Duty cycle scaled to milliseconds per day.
    let avg_on_ms = pcnt_on * 864.0 * 1000.0;
    let kwh = (avg_on_ms / MS_PER_HOUR) * RATED_KW;

    let avg_on = format_elapsed(avg_on_ms as u64);
    // The daily average never reaches a day; drop the day counter.
    let avg_on = avg_on.split_once(':').map(|(_, rest)| rest.to_string()).unwrap_or(avg_on);

    vec![
        (keys::KEY_UPTIME, format_elapsed(uptime_ms)),
        (keys::KEY_TOTAL_ON, format_elapsed(heating_ms)),
        (keys::KEY_PCNT_ON, format!("{pcnt_on:.1}%")),
        (keys::KEY_AVG_ON, avg_on),
        (keys::KEY_KWH, format!("{kwh:.1}kWh")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_days_hours_minutes_seconds() {
        assert_eq!(format_elapsed(0), "0:00:00:00");
        assert_eq!(format_elapsed(61_000), "0:00:01:01");
        assert_eq!(format_elapsed((86_400 + 3_600 + 62) * 1000), "1:01:01:02");
    }

    #[test]
    fn half_duty_cycle_projects_half_a_day_of_heating() {
        let stats = heating_stats(7_200_000, 3_600_000);
        let lookup = |key: &str| {
            stats
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(lookup(keys::KEY_UPTIME), "0:02:00:00");
        assert_eq!(lookup(keys::KEY_TOTAL_ON), "0:01:00:00");
        assert_eq!(lookup(keys::KEY_PCNT_ON), "50.0%");
        assert_eq!(lookup(keys::KEY_AVG_ON), "12:00:00");
        // Twelve hours a day at 1.8 kW.
        assert_eq!(lookup(keys::KEY_KWH), "21.6kWh");
    }

    #[test]
    fn zero_uptime_does_not_divide_by_zero() {
        let stats = heating_stats(0, 0);
        assert!(stats.iter().any(|(k, v)| *k == keys::KEY_PCNT_ON && v == "0.0%"));
    }
}
