//! Turns one validated analog reply into a keyed [`Snapshot`].

use crate::analog::{
    parse_battery_block, parse_header, BatteryRecord, SystemHeader, BATTERY_BLOCK_DIGITS,
    HEADER_OFFSET,
};
use crate::protocol::Response;
use crate::Error;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Decoded state of one group as of a single poll cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    pub group: SystemHeader,
    /// Header digits as received.
    pub raw_header: String,
    /// Keyed by 1-based battery position.
    pub batteries: BTreeMap<u8, BatteryRecord>,
    /// Positions whose block could not be decoded this cycle.
    pub failed_batteries: Vec<u8>,
}

impl Snapshot {
    pub fn battery(&self, number: u8) -> Option<&BatteryRecord> {
        self.batteries.get(&number)
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batteries.is_empty()
    }
}

/// Decodes the header and then as many battery blocks as the header announces.
///
/// A header that cannot be decoded fails the whole reply. A battery block that
/// cannot be decoded is left out and recorded in
/// [`Snapshot::failed_batteries`]; decoding resumes at the nominal start of the
/// following block.
pub fn assemble(response: &Response) -> Result<Snapshot, Error> {
    let hex = response.decodable();
    let (group, mut offset) = parse_header(hex, HEADER_OFFSET).map_err(|err| {
        log::error!("Header decode failed: {err} - frame={hex}");
        Error::Header(err)
    })?;
    let raw_header = hex.get(HEADER_OFFSET..offset).unwrap_or_default().to_string();

    let battery_count = group.battery_count;
    let mut batteries = BTreeMap::new();
    let mut failed_batteries = Vec::new();
    for position in 1..=battery_count {
        if offset >= hex.len() {
            log::warn!("No data left for battery {position} at offset {offset}");
            failed_batteries.push(position);
            continue;
        }
        match parse_battery_block(hex, offset) {
            Ok((record, next)) => {
                if record.number != position {
                    log::warn!(
                        "Battery block {position} carries battery number {}",
                        record.number
                    );
                }
                batteries.insert(position, record);
                offset = next;
            }
            Err(source) => {
                let err = Error::Battery {
                    position,
                    offset,
                    source,
                };
                log::warn!(
                    "{err} - block={}",
                    hex.get(offset..(offset + BATTERY_BLOCK_DIGITS).min(hex.len()))
                        .unwrap_or_default()
                );
                failed_batteries.push(position);
                offset += BATTERY_BLOCK_DIGITS;
            }
        }
    }

    Ok(Snapshot {
        group,
        raw_header,
        batteries,
        failed_batteries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analog::tests::{battery_block, nominal_block, HEADER};
    use crate::fields::FieldError;
    use crate::protocol::{build_frame, screen_response, Command};

    fn header_with_batteries(count: u8) -> String {
        format!("{}{count:02X}", &HEADER[..HEADER.len() - 2])
    }

    fn response(info: &str) -> Response {
        let length = info.len() as u16 & 0x0FFF;
        let frame = build_frame(0x22, 0x00, 0x4A, 0x00, length, info);
        screen_response(&frame, Command::AnalogData.min_response_len()).unwrap()
    }

    #[test]
    fn assembles_every_announced_battery() {
        let info = format!(
            "{HEADER}{}{}{}{}",
            nominal_block(0),
            nominal_block(1),
            nominal_block(2),
            nominal_block(3)
        );
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.group.battery_count, 4);
        assert_eq!(snapshot.raw_header, HEADER);
        assert_eq!(snapshot.batteries.keys().copied().collect::<Vec<_>>(), [1, 2, 3, 4]);
        assert_eq!(snapshot.battery(3).unwrap().number, 3);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn follows_variable_block_lengths() {
        let info = format!(
            "{}{}{}",
            header_with_batteries(2),
            battery_block(0, &[3300; 8], &[200]),
            nominal_block(1)
        );
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.battery(1).unwrap().cell_voltages.len(), 8);
        assert_eq!(snapshot.battery(2).unwrap().cell_voltages.len(), 16);
        assert_eq!(snapshot.battery(2).unwrap().number, 2);
    }

    #[test]
    fn corrupted_middle_block_is_isolated() {
        // cell count of 255 runs past the end of the reply
        let broken = nominal_block(1).replacen("14C810", "14C8FF", 1);
        let info = format!(
            "{HEADER}{}{broken}{}{}",
            nominal_block(0),
            nominal_block(2),
            nominal_block(3)
        );
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.batteries.keys().copied().collect::<Vec<_>>(), [1, 3, 4]);
        assert_eq!(snapshot.failed_batteries, [2]);
        assert_eq!(snapshot.group.voltage, 55.41);
        assert_eq!(snapshot.battery(4).unwrap().number, 4);
    }

    #[test]
    fn truncated_reply_marks_missing_batteries() {
        let info = format!("{HEADER}{}{}", nominal_block(0), &nominal_block(1)[..100]);
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.batteries.len(), 1);
        assert_eq!(snapshot.failed_batteries, [2, 3, 4]);
    }

    #[test]
    fn decodes_every_announced_block_past_twelve() {
        let blocks: String = (0..15).map(nominal_block).collect();
        let info = format!("{}{blocks}", header_with_batteries(15));
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.group.battery_count, 15);
        assert_eq!(
            snapshot.batteries.keys().copied().collect::<Vec<_>>(),
            (1..=15).collect::<Vec<u8>>()
        );
        assert_eq!(snapshot.battery(15).unwrap().number, 15);
        assert!(snapshot.is_complete());
    }

    #[test]
    fn short_reply_past_twelve_reports_missing_positions() {
        let blocks: String = (0..12).map(nominal_block).collect();
        let info = format!("{}{blocks}", header_with_batteries(15));
        let snapshot = assemble(&response(&info)).unwrap();
        assert_eq!(snapshot.batteries.len(), 12);
        assert_eq!(snapshot.failed_batteries, [13, 14, 15]);
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn header_failure_fails_the_reply() {
        let err = assemble(&response(&HEADER[..40])).unwrap_err();
        assert!(matches!(err, Error::Header(FieldError::OutOfBounds { .. })));
    }
}
