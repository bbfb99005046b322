use core::fmt;

/// Datapoint ids exposed by the Avatto i8 MCU.
pub mod dp {
    pub const SWITCH_DISP: u8 = 1;
    pub const TGT_TEMP: u8 = 2;
    pub const CURR_TEMP: u8 = 3;
    pub const PROG_MODE: u8 = 4;
    pub const OUTPUT_ON: u8 = 5;
    pub const CHILD_LOCK: u8 = 8;
    pub const SOUND_ON: u8 = 13;
    pub const FAULT: u8 = 16;
    pub const TEMP_CAL: u8 = 20;
    pub const ROOM_MAX: u8 = 21;
    pub const TEMP_SENSOR: u8 = 25;
    pub const FROST: u8 = 26;
    pub const DO_RESET: u8 = 31;
    pub const BACKLIGHT: u8 = 41;
    pub const DAY_SETTING: u8 = 42;
    pub const SCHEDULE: u8 = 43;
    pub const OP_REVERSE: u8 = 101;
    pub const TEMP_LASH: u8 = 105;
    pub const FLOOR_MAX: u8 = 107;
}

/// The six wire types a datapoint payload can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DpType {
    Raw = 0,
    Bool = 1,
    Int = 2,
    Str = 3,
    Enum = 4,
    Bitmap = 5,
}

impl DpType {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Raw),
            1 => Some(Self::Bool),
            2 => Some(Self::Int),
            3 => Some(Self::Str),
            4 => Some(Self::Enum),
            5 => Some(Self::Bitmap),
            _ => None,
        }
    }
}

/// A typed datapoint value. Integers are 32 bit signed big endian on the
/// wire; bool and enum are a single byte; the rest are length prefixed blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpValue {
    Raw(Vec<u8>),
    Bool(bool),
    Int(i32),
    Str(String),
    Enum(u8),
    Bitmap(Vec<u8>),
}

impl DpValue {
    pub fn dp_type(&self) -> DpType {
        match self {
            Self::Raw(_) => DpType::Raw,
            Self::Bool(_) => DpType::Bool,
            Self::Int(_) => DpType::Int,
            Self::Str(_) => DpType::Str,
            Self::Enum(_) => DpType::Enum,
            Self::Bitmap(_) => DpType::Bitmap,
        }
    }

    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Raw(bytes) | Self::Bitmap(bytes) => bytes.clone(),
            Self::Bool(on) => vec![*on as u8],
            Self::Int(value) => value.to_be_bytes().to_vec(),
            Self::Str(text) => text.as_bytes().to_vec(),
            Self::Enum(value) => vec![*value],
        }
    }

    /// Integer view used by the temperature handlers (value × 10 wire unit).
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// First data byte, the scalar carried by bool, enum and bitmap reports.
    pub fn scalar(&self) -> Option<u8> {
        match self {
            Self::Bool(on) => Some(*on as u8),
            Self::Enum(value) => Some(*value),
            Self::Bitmap(bytes) | Self::Raw(bytes) => bytes.first().copied(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpError {
    Truncated,
    UnknownType(u8),
    BadLength { dp_type: DpType, len: usize },
}

impl fmt::Display for DpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "datapoint payload truncated"),
            Self::UnknownType(byte) => write!(f, "unknown datapoint type {byte}"),
            Self::BadLength { dp_type, len } => {
                write!(f, "bad data length {len} for {dp_type:?} datapoint")
            }
        }
    }
}

/// One parsed datapoint from a command 6/7 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datapoint {
    pub id: u8,
    pub value: DpValue,
}

impl Datapoint {
    /// Parse the `DP_ID | DP_TYPE | DLH | DLL | data...` payload shape.
    pub fn parse(payload: &[u8]) -> Result<Self, DpError> {
        if payload.len() < 4 {
            return Err(DpError::Truncated);
        }
        let id = payload[0];
        let dp_type = DpType::from_wire(payload[1]).ok_or(DpError::UnknownType(payload[1]))?;
        let len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        let data = payload.get(4..4 + len).ok_or(DpError::Truncated)?;

        let value = match dp_type {
            DpType::Raw => DpValue::Raw(data.to_vec()),
            DpType::Bitmap => DpValue::Bitmap(data.to_vec()),
            DpType::Str => DpValue::Str(String::from_utf8_lossy(data).into_owned()),
            DpType::Bool => match data {
                [byte] => DpValue::Bool(*byte != 0),
                _ => return Err(DpError::BadLength { dp_type, len }),
            },
            DpType::Enum => match data {
                [byte] => DpValue::Enum(*byte),
                _ => return Err(DpError::BadLength { dp_type, len }),
            },
            DpType::Int => match data {
                [a, b, c, d] => DpValue::Int(i32::from_be_bytes([*a, *b, *c, *d])),
                _ => return Err(DpError::BadLength { dp_type, len }),
            },
        };

        Ok(Self { id, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_integers() {
        // -30 decidegrees, the calibration push used to force heating on.
        let payload = [20, 2, 0, 4, 0xff, 0xff, 0xff, 0xe2];
        let dp = Datapoint::parse(&payload).unwrap();
        assert_eq!(dp.id, 20);
        assert_eq!(dp.value, DpValue::Int(-30));
    }

    #[test]
    fn parses_bool_and_enum_scalars() {
        let on = Datapoint::parse(&[5, 1, 0, 1, 1]).unwrap();
        assert_eq!(on.value, DpValue::Bool(true));
        assert_eq!(on.value.scalar(), Some(1));

        let mode = Datapoint::parse(&[4, 4, 0, 1, 2]).unwrap();
        assert_eq!(mode.value, DpValue::Enum(2));
    }

    #[test]
    fn rejects_short_int_data() {
        let err = Datapoint::parse(&[2, 2, 0, 2, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, DpError::BadLength { .. }));
    }

    #[test]
    fn rejects_unknown_wire_type() {
        let err = Datapoint::parse(&[2, 9, 0, 0]).unwrap_err();
        assert_eq!(err, DpError::UnknownType(9));
    }

    #[test]
    fn schedule_blob_round_trips_as_raw() {
        let blob: Vec<u8> = (0..32).collect();
        let value = DpValue::Raw(blob.clone());
        let mut payload = vec![43, 0, 0, 32];
        payload.extend_from_slice(&blob);

        let dp = Datapoint::parse(&payload).unwrap();
        assert_eq!(dp.value.to_wire(), blob);
    }
}
