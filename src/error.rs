use crate::fields::FieldError;
use crate::protocol::ReturnCode;

/// Errors raised while encoding, validating or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Value out of range")]
    RangeError,
    #[error("Frame does not start with SOI or end with EOI")]
    FrameDelimiter,
    #[error("Frame body is not ASCII hex")]
    FrameEncoding,
    #[error("Invalid checksum - calculated={calculated:04X} received={received:04X}")]
    CheckSumError { calculated: u16, received: u16 },
    #[error("Frame too short - required={required} received={received}")]
    ShortFrame { required: usize, received: usize },
    #[error("BMS returned {0}")]
    ReturnCode(ReturnCode),
    #[error("Cannot decode header block: {0}")]
    Header(#[source] FieldError),
    #[error("Cannot decode battery {position} at offset {offset}: {source}")]
    Battery {
        position: u8,
        offset: usize,
        #[source]
        source: FieldError,
    },
}
