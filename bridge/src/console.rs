//! Raw frame injection grammar for the host console.
//!
//! A line names the destination port, the command number and the data in
//! decimal, the same shape the original web monitor accepted:
//!
//! - `M 0`: heartbeat to the MCU
//! - `M 3 4`: wifi status 4 to the MCU
//! - `M 6 4 4 1`: datapoint set: dp 4, enum type, value 1
//! - `M 6 2 2 190`: datapoint set: dp 2, int type, value 190
//!
//! Header, version, lengths and checksum are derived.

use anyhow::{anyhow, bail, Context};

use bridge_common::datapoint::{DpType, DpValue};
use bridge_common::frame::{carries_datapoint, Frame, VERSION_MCU, VERSION_WIFI};
use bridge_common::link::Port;

pub fn parse_frame(line: &str) -> anyhow::Result<(Port, Frame)> {
    let mut fields = line.split_whitespace();

    let port = match fields.next() {
        Some("M") => Port::Mcu,
        Some("W") => Port::Wifi,
        Some(other) => bail!("invalid command destination {other}, needs to be M or W"),
        None => bail!("empty command"),
    };
    // Frames heading to the MCU impersonate the wifi module and vice versa.
    let version = match port {
        Port::Mcu => VERSION_WIFI,
        Port::Wifi => VERSION_MCU,
    };

    let command: u8 = fields
        .next()
        .context("missing command number")?
        .parse()
        .context("non numeric command number")?;

    let frame = if carries_datapoint(command) {
        let id: u8 = fields
            .next()
            .context("missing datapoint id")?
            .parse()
            .context("non numeric datapoint id")?;
        let type_byte: u8 = fields
            .next()
            .context("missing datapoint type")?
            .parse()
            .context("non numeric datapoint type")?;
        let dp_type =
            DpType::from_wire(type_byte).ok_or_else(|| anyhow!("unknown datapoint type {type_byte}"))?;

        let value = match dp_type {
            DpType::Int => DpValue::Int(
                fields
                    .next()
                    .context("missing int value")?
                    .parse()
                    .context("non numeric int value")?,
            ),
            DpType::Bool => DpValue::Bool(next_byte(&mut fields)? != 0),
            DpType::Enum => DpValue::Enum(next_byte(&mut fields)?),
            DpType::Raw => DpValue::Raw(remaining_bytes(fields)?),
            DpType::Bitmap => DpValue::Bitmap(remaining_bytes(fields)?),
            DpType::Str => DpValue::Str(String::from_utf8_lossy(&remaining_bytes(fields)?).into_owned()),
        };

        Frame::datapoint(version, command, id, &value)
    } else {
        Frame::new(version, command, remaining_bytes(fields)?)
    };

    Ok((port, frame))
}

fn next_byte<'a>(fields: &mut impl Iterator<Item = &'a str>) -> anyhow::Result<u8> {
    fields
        .next()
        .context("missing data byte")?
        .parse()
        .context("non numeric data byte")
}

fn remaining_bytes<'a>(fields: impl Iterator<Item = &'a str>) -> anyhow::Result<Vec<u8>> {
    fields
        .map(|field| field.parse::<u8>().context("non numeric data byte"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::frame::cmd;

    #[test]
    fn heartbeat_line_builds_the_documented_bytes() {
        let (port, frame) = parse_frame("M 0").unwrap();
        assert_eq!(port, Port::Mcu);
        assert_eq!(frame.encode(), vec![0x55, 0xaa, 0x00, 0x00, 0x00, 0x00, 0xff]);
    }

    #[test]
    fn wifi_status_line_carries_its_data_byte() {
        let (port, frame) = parse_frame("W 3 0").unwrap();
        assert_eq!(port, Port::Wifi);
        assert_eq!(frame.version, VERSION_MCU);
        assert_eq!(frame.command, cmd::WIFI_STATUS);
        assert_eq!(frame.payload, vec![0]);
    }

    #[test]
    fn int_datapoint_line_expands_to_four_bytes() {
        let (_, frame) = parse_frame("M 6 2 2 190").unwrap();
        assert_eq!(
            frame.encode(),
            vec![
                0x55, 0xaa, 0x00, 0x06, 0x00, 0x08, 0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00,
                0xbe, 0xd3,
            ]
        );
    }

    #[test]
    fn enum_datapoint_line_is_a_single_byte() {
        let (_, frame) = parse_frame("M 6 4 4 1").unwrap();
        assert_eq!(frame.payload, vec![4, 4, 0, 1, 1]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_frame("").is_err());
        assert!(parse_frame("X 0").is_err());
        assert!(parse_frame("M six").is_err());
        assert!(parse_frame("M 6 2 2 lots").is_err());
    }
}
