use log::info;

/// Calibration push, in decidegrees, produced by a control decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationPush(pub i32);

/// Hysteresis controller that replaces the MCU's built-in thermostat.
///
/// The MCU firmware cannot be modified, but its calibration offset input
/// can. Pushing `base_cal + drift` overstates the floor reading and makes
/// the MCU switch the relay off; `base_cal - drift` understates it and
/// forces the relay on. `drift` is chosen above the floor sensor's jitter so
/// the falsified value always clears the actuation threshold.
#[derive(Debug, Clone)]
pub struct HysteresisController {
    /// Exponential moving average coefficient, (0, 1].
    pub alpha: f32,
    /// Degrees added past the deadband when falsifying the calibration.
    pub drift: i32,
    smoothed: f32,
}

impl Default for HysteresisController {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            drift: 3,
            smoothed: 15.0,
        }
    }
}

impl HysteresisController {
    /// Current smoothed temperature estimate in degrees.
    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// Overwrite the estimate; used while the MCU is in control and the
    /// reported reading is taken at face value.
    pub fn set_smoothed(&mut self, degrees: f32) {
        self.smoothed = degrees;
    }

    /// Consume one reported temperature and decide on actuation.
    ///
    /// The reported value has the previous calibration push baked in, so the
    /// floor estimate first inverts it: `+drift` while heating, `-drift`
    /// while idle, pulling the estimate back toward the true reading.
    pub fn on_report(
        &mut self,
        reported: f32,
        heating_on: bool,
        base_cal: f32,
        backlash: f32,
        target: f32,
    ) -> Option<CalibrationPush> {
        let drift = self.drift as f32;
        let floor = reported + if heating_on { base_cal + drift } else { base_cal - drift };
        self.smoothed = self.alpha * floor + (1.0 - self.alpha) * self.smoothed;

        if heating_on {
            if self.smoothed > target {
                info!(
                    "set OFF: current {:.1}, mcu {:.1}, floor {:.1}, calib {:.1}, target {:.1}",
                    self.smoothed,
                    reported,
                    floor,
                    base_cal + drift,
                    target
                );
                return Some(CalibrationPush(((base_cal + drift) * 10.0) as i32));
            }
        } else if self.smoothed + backlash < target {
            info!(
                "set ON: current + backlash {:.1}, mcu {:.1}, floor {:.1}, calib {:.1}, target {:.1}",
                self.smoothed + backlash,
                reported,
                floor,
                base_cal - drift,
                target
            );
            return Some(CalibrationPush(((base_cal - drift) * 10.0) as i32));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(alpha: f32, drift: i32) -> HysteresisController {
        HysteresisController {
            alpha,
            drift,
            ..Default::default()
        }
    }

    #[test]
    fn cold_room_forces_the_relay_on() {
        let mut ctrl = controller(1.0, 3);

        // Idle, reported 18.4: floor = 15.4, and 15.4 + 0.5 < 19.
        let push = ctrl.on_report(18.4, false, 0.0, 0.5, 19.0);
        assert_eq!(push, Some(CalibrationPush(-30)));
        assert!((ctrl.smoothed() - 15.4).abs() < 1e-6);
    }

    #[test]
    fn warm_room_forces_the_relay_off() {
        let mut ctrl = controller(1.0, 3);

        // Heating, reported 16.5: floor = 19.5 > 19.
        let push = ctrl.on_report(16.5, true, 0.0, 0.5, 19.0);
        assert_eq!(push, Some(CalibrationPush(30)));
    }

    #[test]
    fn no_actuation_inside_the_deadband() {
        // Idle at target - backlash exactly: stays off.
        let mut ctrl = controller(1.0, 3);
        assert_eq!(ctrl.on_report(21.5, false, 0.0, 0.5, 19.0), None);
        assert!((ctrl.smoothed() - 18.5).abs() < 1e-6);

        // Heating at target exactly: stays on.
        let mut ctrl = controller(1.0, 3);
        assert_eq!(ctrl.on_report(16.0, true, 0.0, 0.5, 19.0), None);
        assert!((ctrl.smoothed() - 19.0).abs() < 1e-6);
    }

    #[test]
    fn base_calibration_shifts_the_push() {
        let mut ctrl = controller(1.0, 3);
        let push = ctrl.on_report(18.0, false, 1.5, 0.0, 19.0);
        assert_eq!(push, Some(CalibrationPush(-15)));
    }

    #[test]
    fn smoothing_damps_a_jittery_reading() {
        let mut ctrl = controller(0.5, 3);
        ctrl.set_smoothed(18.0);

        // floor = 25.0; one half-weight sample moves the estimate to 21.5.
        ctrl.on_report(28.0, false, 0.0, 0.0, 30.0);
        assert!((ctrl.smoothed() - 21.5).abs() < 1e-6);
    }
}
