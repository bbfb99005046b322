pub mod config;
pub mod controller;
pub mod datapoint;
pub mod engine;
pub mod frame;
pub mod keys;
pub mod link;
pub mod schedule;
pub mod stats;
pub mod types;

pub use config::{BridgeConfig, NetworkConfig, SerialConfig};
pub use controller::{CalibrationPush, HysteresisController};
pub use datapoint::{Datapoint, DpType, DpValue};
pub use engine::{BridgeEngine, Effect, TickOutcome};
pub use frame::{Frame, FrameAccumulator};
pub use keys::*;
pub use link::{LinkBridge, LinkMode, Port};
pub use schedule::{ScheduleDriver, ScheduleTable, Slot};
pub use types::{ControlMode, WallClock};
