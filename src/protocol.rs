use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const SOI: u8 = b'~';
pub const EOI: u8 = b'\r';

const VERSION: u8 = 0x22;
const CID1_BATTERY: u8 = 0x4A;
const COMMAND_LENGTH: u16 = 0xE002;
// Every observed request carries INFO `FF`, whatever the target address.
const COMMAND_INFO: &str = "FF";

/// Hex digits of VER, ADR, CID1, CID2 and LENGTH preceding INFO.
pub const ENVELOPE_DIGITS: usize = 12;
pub const CHECKSUM_DIGITS: usize = 4;

// The BMS needs at least 850ms between a request and the next bus activity.
pub const MINIMUM_DELAY: std::time::Duration = std::time::Duration::from_millis(850);
pub const DEFAULT_DELAY: std::time::Duration = std::time::Duration::from_millis(900);
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

pub const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];
pub const DEFAULT_BAUD_RATE: u32 = 9600;

pub const MAX_GROUP: u8 = 7;
pub const MAX_POSITION: u8 = 0x0F;
pub const MAX_BATTERIES_PER_GROUP: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    AnalogData = 0x42,
    ProtocolVersion = 0x4F,
}

impl Command {
    /// Shortest reply, in bytes including SOI and EOI, accepted for this command.
    ///
    /// Other controllers sharing the bus poll the stack with short frames; those
    /// must not be taken for the analog reply.
    pub fn min_response_len(&self) -> usize {
        match self {
            Command::AnalogData => 30,
            Command::ProtocolVersion => 2 + ENVELOPE_DIGITS + CHECKSUM_DIGITS,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::AnalogData => write!(f, "analog data query"),
            Command::ProtocolVersion => write!(f, "protocol version query"),
        }
    }
}

/// Encoded `ADR` byte: battery position in the low nibble, group in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address(u8);

impl Address {
    /// `position` of `None` addresses the whole group.
    pub fn new(group: u8, position: Option<u8>) -> Result<Self, Error> {
        if group > MAX_GROUP || position.is_some_and(|p| p > MAX_POSITION) {
            return Err(Error::RangeError);
        }
        Ok(Self(position.unwrap_or(0) + 0x10 * group))
    }

    pub fn system(group: u8) -> Result<Self, Error> {
        Self::new(group, None)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// `RTN` carried in `CID2` of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Normal,
    VerError,
    ChecksumError,
    LengthChecksumError,
    Cid2Invalid,
    CommandFormatError,
    InvalidData,
    AddressError,
    CommunicationError,
    Unknown(u8),
}

impl From<u8> for ReturnCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ReturnCode::Normal,
            0x01 => ReturnCode::VerError,
            0x02 => ReturnCode::ChecksumError,
            0x03 => ReturnCode::LengthChecksumError,
            0x04 => ReturnCode::Cid2Invalid,
            0x05 => ReturnCode::CommandFormatError,
            0x06 => ReturnCode::InvalidData,
            0x90 => ReturnCode::AddressError,
            0x91 => ReturnCode::CommunicationError,
            other => ReturnCode::Unknown(other),
        }
    }
}

impl ReturnCode {
    pub fn is_normal(&self) -> bool {
        *self == ReturnCode::Normal
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReturnCode::Normal => write!(f, "Normal"),
            ReturnCode::VerError => write!(f, "VER error"),
            ReturnCode::ChecksumError => write!(f, "CHKSUM error"),
            ReturnCode::LengthChecksumError => write!(f, "LCHKSUM error"),
            ReturnCode::Cid2Invalid => write!(f, "CID2 invalidation"),
            ReturnCode::CommandFormatError => write!(f, "Command format error"),
            ReturnCode::InvalidData => write!(f, "Invalid data"),
            ReturnCode::AddressError => write!(f, "ADR error"),
            ReturnCode::CommunicationError => write!(f, "Communication error"),
            ReturnCode::Unknown(code) => write!(f, "unknown RTN {code:02X}"),
        }
    }
}

/// Checksum over the ASCII characters from `VER` up to the end of `INFO`.
pub fn checksum(body: &[u8]) -> u16 {
    let sum = body
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    (sum ^ 0xFFFF).wrapping_add(1)
}

/// Assembles `~VER ADR CID1 CID2 LENGTH INFO CHKSUM\r` with a fresh checksum.
pub fn build_frame(ver: u8, adr: u8, cid1: u8, cid2: u8, length: u16, info: &str) -> Vec<u8> {
    let body = format!("{ver:02X}{adr:02X}{cid1:02X}{cid2:02X}{length:04X}{info}");
    let mut frame = Vec::with_capacity(body.len() + CHECKSUM_DIGITS + 2);
    frame.push(SOI);
    frame.extend_from_slice(body.as_bytes());
    frame.extend_from_slice(format!("{:04X}", checksum(body.as_bytes())).as_bytes());
    frame.push(EOI);
    frame
}

pub fn build_command(command: Command, address: Address) -> Vec<u8> {
    let frame = build_frame(
        VERSION,
        address.value(),
        CID1_BATTERY,
        command as u8,
        COMMAND_LENGTH,
        COMMAND_INFO,
    );
    log::trace!("build_command: {}", String::from_utf8_lossy(&frame).trim_end());
    frame
}

/// Splits a delimited frame into its checked body and claimed checksum.
fn split_checksum(frame: &[u8]) -> Option<(&[u8], u16)> {
    let inner = frame.strip_prefix(&[SOI])?.strip_suffix(&[EOI])?;
    let split = inner.len().checked_sub(CHECKSUM_DIGITS)?;
    let (body, claimed) = inner.split_at(split);
    let claimed = std::str::from_utf8(claimed).ok()?;
    if !claimed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((body, u16::from_str_radix(claimed, 16).ok()?))
}

pub fn verify_checksum(frame: &[u8]) -> bool {
    split_checksum(frame).is_some_and(|(body, claimed)| checksum(body) == claimed)
}

/// Envelope of a validated reply.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Response {
    pub version: String,
    pub address: u8,
    pub cid1: u8,
    pub rtn: u8,
    /// Hex text between SOI and EOI, checksum included.
    pub body: String,
}

impl Response {
    pub fn return_code(&self) -> ReturnCode {
        ReturnCode::from(self.rtn)
    }

    /// `INFO` digits, i.e. the body without the envelope and the checksum.
    pub fn info(&self) -> &str {
        let end = self.body.len().saturating_sub(CHECKSUM_DIGITS);
        self.body.get(ENVELOPE_DIGITS..end).unwrap_or("")
    }

    /// The body up to the checksum; decoder offsets are counted from its start.
    pub fn decodable(&self) -> &str {
        let end = self.body.len().saturating_sub(CHECKSUM_DIGITS);
        self.body.get(..end).unwrap_or("")
    }
}

/// Runs the gates every received candidate passes before it is decoded:
/// delimiters, checksum, minimum length and return code, in that order.
pub fn screen_response(frame: &[u8], min_len: usize) -> Result<Response, Error> {
    if frame.first() != Some(&SOI) || frame.last() != Some(&EOI) {
        return Err(Error::FrameDelimiter);
    }
    let (body, received) = split_checksum(frame).ok_or(Error::FrameEncoding)?;
    let calculated = checksum(body);
    if calculated != received {
        log::debug!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} frame={:?}",
            String::from_utf8_lossy(frame)
        );
        return Err(Error::CheckSumError {
            calculated,
            received,
        });
    }
    if frame.len() < min_len {
        return Err(Error::ShortFrame {
            required: min_len,
            received: frame.len(),
        });
    }
    let body = std::str::from_utf8(&frame[1..frame.len() - 1]).map_err(|_| Error::FrameEncoding)?;
    if body.len() < ENVELOPE_DIGITS + CHECKSUM_DIGITS || !body.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(Error::FrameEncoding);
    }
    let byte_at = |offset| crate::fields::read_unsigned(body, offset, 2).map(|v| v as u8);
    let response = Response {
        version: body[0..2].to_string(),
        address: byte_at(2).map_err(|_| Error::FrameEncoding)?,
        cid1: byte_at(4).map_err(|_| Error::FrameEncoding)?,
        rtn: byte_at(6).map_err(|_| Error::FrameEncoding)?,
        body: body.to_string(),
    };
    log::debug!(
        "RX Frame: VER={} ADR={:02X} CID1={:02X} RTN={:02X}({}) LEN={} INFO={} digits",
        response.version,
        response.address,
        response.cid1,
        response.rtn,
        response.return_code(),
        &body[8..12],
        response.info().len()
    );
    if !response.return_code().is_normal() {
        return Err(Error::ReturnCode(response.return_code()));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_reference_vector() {
        assert_eq!(checksum(b"22004A42E002FF"), 0xFCFE);
    }

    #[test]
    fn checksum_wraps_to_zero() {
        assert_eq!(checksum(b""), 0x0000);
    }

    #[test]
    fn analog_command_for_group_zero() {
        let frame = build_command(Command::AnalogData, Address::system(0).unwrap());
        assert_eq!(frame, b"~22004A42E002FFFCFE\r");
    }

    #[test]
    fn commands_always_verify() {
        for group in 0..=MAX_GROUP {
            for position in [None, Some(0), Some(2), Some(13), Some(MAX_POSITION)] {
                for command in [Command::AnalogData, Command::ProtocolVersion] {
                    let address = Address::new(group, position).unwrap();
                    let frame = build_command(command, address);
                    assert!(verify_checksum(&frame), "{}", String::from_utf8_lossy(&frame));
                }
            }
        }
    }

    #[test]
    fn address_encoding() {
        assert_eq!(Address::system(0).unwrap().value(), 0x00);
        assert_eq!(Address::system(3).unwrap().value(), 0x30);
        assert_eq!(Address::new(1, Some(2)).unwrap().value(), 0x12);
        assert!(matches!(Address::new(8, None), Err(Error::RangeError)));
        assert!(matches!(Address::new(0, Some(16)), Err(Error::RangeError)));
    }

    #[test]
    fn verify_rejects_tampered_and_malformed_frames() {
        assert!(!verify_checksum(b"~22004A42E002FEFCFE\r"));
        assert!(!verify_checksum(b"~22004A42E002FFFCFE"));
        assert!(!verify_checksum(b"~FCF\r"));
        assert!(!verify_checksum(b"~22004A42E002FFZZZZ\r"));
        assert!(!verify_checksum(b""));
    }

    #[test]
    fn screen_accepts_normal_reply() {
        let frame = build_frame(0x22, 0x00, 0x4A, 0x00, 0x1008, "0102030405060708");
        let response = screen_response(&frame, Command::AnalogData.min_response_len()).unwrap();
        assert_eq!(response.version, "22");
        assert_eq!(response.cid1, 0x4A);
        assert_eq!(response.return_code(), ReturnCode::Normal);
        assert_eq!(response.info(), "0102030405060708");
        assert_eq!(response.decodable().len(), 12 + 16);
    }

    #[test]
    fn screen_gates_in_order() {
        assert!(matches!(
            screen_response(b"22004A00\r", 0),
            Err(Error::FrameDelimiter)
        ));

        let mut corrupted = build_frame(0x22, 0x00, 0x4A, 0x00, 0x1008, "0102030405060708");
        corrupted[14] = b'9';
        assert!(matches!(
            screen_response(&corrupted, 0),
            Err(Error::CheckSumError { .. })
        ));

        let short = build_frame(0x22, 0x02, 0x4A, 0x42, 0xE002, "02");
        assert!(matches!(
            screen_response(&short, Command::AnalogData.min_response_len()),
            Err(Error::ShortFrame {
                required: 30,
                received: 20
            })
        ));

        let refused = build_frame(0x22, 0x00, 0x4A, 0x90, 0x1008, "0102030405060708");
        assert!(matches!(
            screen_response(&refused, Command::AnalogData.min_response_len()),
            Err(Error::ReturnCode(ReturnCode::AddressError))
        ));
    }

    #[test]
    fn version_reply_passes_its_own_length_gate() {
        let frame = build_frame(0x22, 0x00, 0x4A, 0x00, 0x0000, "");
        assert_eq!(frame.len(), Command::ProtocolVersion.min_response_len());
        assert!(screen_response(&frame, Command::ProtocolVersion.min_response_len()).is_ok());
        assert!(matches!(
            screen_response(&frame, Command::AnalogData.min_response_len()),
            Err(Error::ShortFrame { .. })
        ));
    }

    #[test]
    fn return_code_descriptions() {
        assert_eq!(ReturnCode::from(0x02).to_string(), "CHKSUM error");
        assert_eq!(ReturnCode::from(0x91), ReturnCode::CommunicationError);
        assert_eq!(ReturnCode::from(0x42), ReturnCode::Unknown(0x42));
        assert!(!ReturnCode::from(0x42).is_normal());
    }
}
