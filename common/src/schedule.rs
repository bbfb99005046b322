use serde::{Deserialize, Serialize};

/// Slots in the daily program as carried by the schedule datapoint.
pub const TIME_SLOTS: usize = 8;
/// Only the first six slots form the work day program; the final two are the
/// rest day pair and are not consulted by the driver.
pub const USED_SLOTS: usize = 6;

pub const SECS_IN_DAY: i64 = 24 * 60 * 60;

/// One program slot: start time plus target temperature in decidegrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub hour: u8,
    pub minute: u8,
    pub temp_decideg: i16,
}

impl Slot {
    pub fn second_of_day(&self) -> i64 {
        ((self.hour as i64 * 60) + self.minute as i64) * 60
    }

    /// The two byte big endian temperature carried on the wire.
    pub fn temp_bytes(&self) -> [u8; 2] {
        self.temp_decideg.to_be_bytes()
    }
}

/// The full eight slot table, mirrored from UI slot edits and flushed to the
/// MCU as one 32 byte raw datapoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleTable {
    pub slots: [Slot; TIME_SLOTS],
}

impl ScheduleTable {
    /// Flat wire blob: `(HH, MM, TH, TL)` for slots 0..8 in order.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(TIME_SLOTS * 4);
        for slot in &self.slots {
            blob.push(slot.hour);
            blob.push(slot.minute);
            blob.extend_from_slice(&slot.temp_bytes());
        }
        blob
    }

    pub fn from_wire(blob: &[u8]) -> Option<Self> {
        if blob.len() != TIME_SLOTS * 4 {
            return None;
        }
        let mut table = Self::default();
        for (i, chunk) in blob.chunks_exact(4).enumerate() {
            table.slots[i] = Slot {
                hour: chunk[0],
                minute: chunk[1],
                temp_decideg: i16::from_be_bytes([chunk[2], chunk[3]]),
            };
        }
        Some(table)
    }
}

/// Walks the work day program, publishing a new target when a slot opens.
///
/// Assumes slots 0..6 are sorted by start time; the table editor is trusted
/// to maintain that.
#[derive(Debug, Default)]
pub struct ScheduleDriver {
    current: Option<usize>,
    duration_ms: i64,
    started_ms: u64,
}

impl ScheduleDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    /// Advance the program. `second_of_day` comes from synchronized local
    /// time; callers skip the call entirely until sync. Returns the slot that
    /// just became active, if any.
    pub fn advance(
        &mut self,
        table: &ScheduleTable,
        second_of_day: u32,
        now_ms: u64,
    ) -> Option<(usize, Slot)> {
        let changed = match self.current {
            None => {
                // First call: seek the latest slot at or before the current
                // time of day. A time before slot 0 belongs to the overnight
                // tail of slot 5.
                let now_secs = second_of_day as i64;
                let seek = (0..USED_SLOTS)
                    .rev()
                    .find(|i| table.slots[*i].second_of_day() <= now_secs);

                let slot = match seek {
                    Some(i) if i < USED_SLOTS - 1 => i,
                    _ => USED_SLOTS - 1,
                };
                self.current = Some(slot);

                let mut duration = if slot == USED_SLOTS - 1 {
                    // Remaining time crosses the day boundary.
                    let mut secs = table.slots[0].second_of_day() - now_secs;
                    if secs < 0 {
                        secs += SECS_IN_DAY;
                    }
                    secs
                } else {
                    table.slots[slot + 1].second_of_day() - now_secs
                };
                duration *= 1000;
                self.duration_ms = duration;
                true
            }
            Some(slot) => {
                if now_ms.saturating_sub(self.started_ms) as i64 > self.duration_ms {
                    let next = (slot + 1) % USED_SLOTS;
                    self.current = Some(next);
                    let boundary = if next < USED_SLOTS - 1 {
                        table.slots[next + 1].second_of_day()
                    } else {
                        SECS_IN_DAY + table.slots[0].second_of_day()
                    };
                    self.duration_ms = (boundary - table.slots[next].second_of_day()) * 1000;
                    true
                } else {
                    false
                }
            }
        };

        if changed {
            self.started_ms = now_ms;
            let index = self.current.unwrap_or(0);
            return Some((index, table.slots[index]));
        }
        None
    }

    pub fn slot_duration_ms(&self) -> i64 {
        self.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_starts(starts: [(u8, u8); USED_SLOTS]) -> ScheduleTable {
        let mut table = ScheduleTable::default();
        for (i, (hour, minute)) in starts.iter().enumerate() {
            table.slots[i] = Slot {
                hour: *hour,
                minute: *minute,
                temp_decideg: 180 + 10 * i as i16,
            };
        }
        table
    }

    // Start seconds: 21600, 30600, 32400, 45000, 59400, 79200.
    fn work_day() -> ScheduleTable {
        table_with_starts([(6, 0), (8, 30), (9, 0), (12, 30), (16, 30), (22, 0)])
    }

    #[test]
    fn seeks_the_running_slot_on_first_call() {
        let table = work_day();
        let mut driver = ScheduleDriver::new();

        let (index, _) = driver.advance(&table, 40_000, 0).unwrap();
        assert_eq!(index, 2);
        assert_eq!(driver.slot_duration_ms(), 5_000 * 1000);
    }

    #[test]
    fn advances_when_the_slot_duration_elapses() {
        let table = work_day();
        let mut driver = ScheduleDriver::new();
        driver.advance(&table, 40_000, 0).unwrap();

        assert!(driver.advance(&table, 40_500, 500 * 1000).is_none());

        let (index, slot) = driver.advance(&table, 45_001, 5_001 * 1000).unwrap();
        assert_eq!(index, 3);
        assert_eq!(slot.temp_decideg, 210);
        assert_eq!(driver.slot_duration_ms(), (59_400 - 45_000) * 1000);
    }

    #[test]
    fn evening_tail_wraps_past_midnight() {
        let table = work_day();
        let mut driver = ScheduleDriver::new();

        let (index, _) = driver.advance(&table, 82_800, 0).unwrap();
        assert_eq!(index, 5);
        assert_eq!(driver.slot_duration_ms(), (21_600 - 82_800 + 86_400) * 1000);
    }

    #[test]
    fn time_before_the_first_slot_belongs_to_the_overnight_slot() {
        let table = work_day();
        let mut driver = ScheduleDriver::new();

        let (index, _) = driver.advance(&table, 100, 0).unwrap();
        assert_eq!(index, 5);
        assert_eq!(driver.slot_duration_ms(), (21_600 - 100) * 1000);
    }

    #[test]
    fn a_full_cycle_of_slot_durations_covers_the_day() {
        let table = work_day();
        let mut driver = ScheduleDriver::new();
        driver.advance(&table, 40_000, 0).unwrap();

        // Walk six advances; the steady state durations must sum to a day.
        let mut now_ms = 0u64;
        let mut total_ms = 0i64;
        for _ in 0..USED_SLOTS {
            now_ms += driver.slot_duration_ms() as u64 + 1;
            let sod = ((40_000 + now_ms / 1000) % 86_400) as u32;
            driver.advance(&table, sod, now_ms).unwrap();
            total_ms += driver.slot_duration_ms();
        }
        assert_eq!(total_ms, SECS_IN_DAY * 1000);
    }

    #[test]
    fn wire_blob_is_32_bytes_and_round_trips() {
        let table = work_day();
        let blob = table.to_wire();
        assert_eq!(blob.len(), 32);
        assert_eq!(blob[0], 6);
        assert_eq!(blob[1], 0);
        assert_eq!(i16::from_be_bytes([blob[2], blob[3]]), 180);
        assert_eq!(ScheduleTable::from_wire(&blob).unwrap(), table);
    }
}
