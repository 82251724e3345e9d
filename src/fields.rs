//! Positional field extraction from an ASCII hex-digit string.
//!
//! Every value in an INFO block is a run of hex digits at a known offset. Widths
//! are given in hex digits (two digits per byte), and signed values are folded
//! over their own width rather than a fixed integer size.

/// Widest field accepted by the decoders, in hex digits.
pub const MAX_FIELD_DIGITS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("field of {digits} digits at offset {offset} exceeds input of {available} digits")]
    OutOfBounds {
        offset: usize,
        digits: usize,
        available: usize,
    },
    #[error("non-hex digit in field of {digits} digits at offset {offset}")]
    InvalidHex { offset: usize, digits: usize },
    #[error("unsupported field width of {0} digits")]
    Width(usize),
}

/// Parses `digits` hex digits at `offset` as an unsigned integer.
pub fn read_unsigned(hex: &str, offset: usize, digits: usize) -> Result<u32, FieldError> {
    if digits == 0 || digits > MAX_FIELD_DIGITS {
        return Err(FieldError::Width(digits));
    }
    let field = offset
        .checked_add(digits)
        .and_then(|end| hex.as_bytes().get(offset..end))
        .ok_or(FieldError::OutOfBounds {
            offset,
            digits,
            available: hex.len(),
        })?;
    field.iter().try_fold(0u32, |acc, &b| {
        char::from(b)
            .to_digit(16)
            .map(|nibble| (acc << 4) | nibble)
            .ok_or(FieldError::InvalidHex { offset, digits })
    })
}

/// Parses a two's-complement field over its own bit width and divides by `scale`.
///
/// A 4 digit field holding `FFFF` is `-1`, `8000` is `-32768`; a 2 digit field
/// holding `FF` is also `-1`.
pub fn read_signed(hex: &str, offset: usize, digits: usize, scale: f32) -> Result<f32, FieldError> {
    let raw = i64::from(read_unsigned(hex, offset, digits)?);
    let bits = digits as u32 * 4;
    let value = if raw >= 1 << (bits - 1) {
        raw - (1 << bits)
    } else {
        raw
    };
    Ok(value as f32 / scale)
}

/// Parses an unsigned field and divides it by `scale`.
pub fn read_scaled(hex: &str, offset: usize, digits: usize, scale: f32) -> Result<f32, FieldError> {
    Ok(read_unsigned(hex, offset, digits)? as f32 / scale)
}

/// Sequential reader used by the block parsers; each read advances the position.
#[derive(Debug, Clone)]
pub struct HexCursor<'a> {
    hex: &'a str,
    position: usize,
}

impl<'a> HexCursor<'a> {
    pub fn new(hex: &'a str, position: usize) -> Self {
        Self { hex, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn unsigned(&mut self, digits: usize) -> Result<u32, FieldError> {
        let value = read_unsigned(self.hex, self.position, digits)?;
        log::trace!(
            "offset {} {:?} -> {value}",
            self.position,
            &self.hex[self.position..self.position + digits]
        );
        self.position += digits;
        Ok(value)
    }

    pub fn u8(&mut self) -> Result<u8, FieldError> {
        Ok(self.unsigned(2)? as u8)
    }

    pub fn u16(&mut self) -> Result<u16, FieldError> {
        Ok(self.unsigned(4)? as u16)
    }

    pub fn signed(&mut self, digits: usize, scale: f32) -> Result<f32, FieldError> {
        let value = read_signed(self.hex, self.position, digits, scale)?;
        self.position += digits;
        Ok(value)
    }

    pub fn scaled(&mut self, digits: usize, scale: f32) -> Result<f32, FieldError> {
        let value = read_scaled(self.hex, self.position, digits, scale)?;
        self.position += digits;
        Ok(value)
    }

    /// Returns the next `digits` characters verbatim.
    pub fn text(&mut self, digits: usize) -> Result<&'a str, FieldError> {
        let hex: &'a str = self.hex;
        let end = self.position + digits;
        let span = hex.get(self.position..end).ok_or(FieldError::OutOfBounds {
            offset: self.position,
            digits,
            available: hex.len(),
        })?;
        self.position = end;
        Ok(span)
    }

    pub fn skip(&mut self, digits: usize) -> Result<(), FieldError> {
        self.text(digits).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_reads_at_offset() {
        assert_eq!(read_unsigned("XX15A5", 2, 4), Ok(0x15A5));
        assert_eq!(read_unsigned("0e2a", 0, 4), Ok(3626));
        assert_eq!(read_unsigned("10", 0, 2), Ok(16));
    }

    #[test]
    fn signed_fold_uses_field_width() {
        assert_eq!(read_signed("FFFF", 0, 4, 1.0), Ok(-1.0));
        assert_eq!(read_signed("7FFF", 0, 4, 1.0), Ok(32767.0));
        assert_eq!(read_signed("8000", 0, 4, 1.0), Ok(-32768.0));
        assert_eq!(read_signed("FF", 0, 2, 1.0), Ok(-1.0));
        assert_eq!(read_signed("7F", 0, 2, 1.0), Ok(127.0));
    }

    #[test]
    fn signed_applies_scale() {
        assert_eq!(read_signed("00A0", 0, 4, 10.0), Ok(16.0));
        // -2.5 A
        assert_eq!(read_signed("FF06", 0, 4, 100.0), Ok(-2.5));
        assert_eq!(read_scaled("15A5", 0, 4, 100.0), Ok(55.41));
    }

    #[test]
    fn out_of_bounds_is_reported() {
        assert_eq!(
            read_unsigned("15A", 0, 4),
            Err(FieldError::OutOfBounds {
                offset: 0,
                digits: 4,
                available: 3
            })
        );
        assert!(matches!(
            read_unsigned("15A5", usize::MAX, 4),
            Err(FieldError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn rejects_non_hex_and_bad_widths() {
        assert_eq!(
            read_unsigned("+1", 0, 2),
            Err(FieldError::InvalidHex {
                offset: 0,
                digits: 2
            })
        );
        assert_eq!(read_unsigned("15A5", 0, 0), Err(FieldError::Width(0)));
        assert_eq!(read_unsigned("0000000000", 0, 9), Err(FieldError::Width(9)));
    }

    #[test]
    fn cursor_advances_by_field_width() {
        let mut cursor = HexCursor::new("0010FFFF0D1Aabcd", 2);
        assert_eq!(cursor.u8(), Ok(0x10));
        assert_eq!(cursor.signed(4, 1.0), Ok(-1.0));
        assert_eq!(cursor.scaled(4, 1000.0), Ok(3.354));
        assert_eq!(cursor.position(), 12);
        assert_eq!(cursor.text(4), Ok("abcd"));
        assert!(cursor.skip(2).is_err());
        assert_eq!(cursor.position(), 16);
    }
}
