// Keys on the UI key/value surface. Status keys are published by the
// dispatcher; command keys arrive from the surface into the encoder.

pub const KEY_SWITCH_DISP: &str = "switchDisp";
pub const KEY_TGT_TEMP: &str = "tgtTemp";
pub const KEY_RAW_TEMP: &str = "rawTemp";
pub const KEY_CURR_TEMP: &str = "currTemp";
pub const KEY_PROG_MODE: &str = "progMode";
pub const KEY_OUTPUT_ON: &str = "outputOn";
pub const KEY_CHILD_LOCK: &str = "childLock";
pub const KEY_SOUND_ON: &str = "soundOn";
pub const KEY_FAULT: &str = "fault";
pub const KEY_TEMP_CAL: &str = "tempCal";
pub const KEY_ROOM_MAX: &str = "roomMax";
pub const KEY_TEMP_SENSOR: &str = "tempSensor";
pub const KEY_FROST: &str = "frost";
pub const KEY_DO_RESET: &str = "doReset";
pub const KEY_BACKLIGHT: &str = "backLight";
pub const KEY_DAY_SETTING: &str = "daySetting";
pub const KEY_OP_REVERSE: &str = "opReverse";
pub const KEY_DO_REVERSE: &str = "doReverse";
pub const KEY_TEMP_LASH: &str = "tempLash";
pub const KEY_FLOOR_MAX: &str = "floorMax";

pub const KEY_ALPHA: &str = "alpha";
pub const KEY_DRIFT: &str = "drift";
pub const KEY_SET_CTRL: &str = "setCtrl";
pub const KEY_ESP_CAL: &str = "espCal";

pub const KEY_UPTIME: &str = "upTime";
pub const KEY_TOTAL_ON: &str = "totalOn";
pub const KEY_PCNT_ON: &str = "pcntOn";
pub const KEY_AVG_ON: &str = "avgOn";
pub const KEY_KWH: &str = "kWh";

pub const SLOT_TIME_PREFIX: &str = "slotTime";
pub const SLOT_TEMP_PREFIX: &str = "slotTemp";

pub const TOPIC_STATUS_PREFIX: &str = "thermostat/bridge/status/";
pub const TOPIC_CMND_PREFIX: &str = "thermostat/bridge/cmnd/";
pub const TOPIC_CMND_WILDCARD: &str = "thermostat/bridge/cmnd/#";
