//! Decoders for the analog data reply (`CID2` 42h).
//!
//! The INFO field holds one fixed-size system header followed by one block per
//! battery. Battery blocks describe their own length: the cell count and the
//! temperature sensor count are read in-line, before the runs they size.

use crate::fields::{read_scaled, read_signed, read_unsigned, FieldError, HexCursor};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Offset of the system header in the body (right after the envelope).
pub const HEADER_OFFSET: usize = crate::protocol::ENVELOPE_DIGITS;
pub const HEADER_DIGITS: usize = 66;
/// Length of a battery block with 16 cells and 4 pack temperature sensors.
pub const BATTERY_BLOCK_DIGITS: usize = 212;
pub const MAX_CELLS: u8 = 16;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SystemHeader {
    pub voltage: f32,
    pub current: f32, // negative=discharging
    pub total_capacity: u16,
    pub remaining_capacity: u16,
    pub soc: u16,
    pub max_ambient_temperature: f32,
    pub min_ambient_temperature: f32,
    /// mV
    pub max_cell_voltage: u16,
    /// mV
    pub min_cell_voltage: u16,
    pub temperature_min: f32,
    pub temperature_max: f32,
    pub reserved: String,
    pub cell_count: u8,
    pub battery_count: u8,
}

/// Decodes the system header at `offset`; returns it with the offset of the first battery block.
pub fn parse_header(hex: &str, offset: usize) -> Result<(SystemHeader, usize), FieldError> {
    let u16_at = |pos: usize| read_unsigned(hex, offset + pos, 4).map(|v| v as u16);
    let u8_at = |pos: usize| read_unsigned(hex, offset + pos, 2).map(|v| v as u8);
    let temperature_at = |pos: usize| read_signed(hex, offset + pos, 4, 10.0);

    let reserved_range = offset + 44..offset + 62;
    let header = SystemHeader {
        voltage: read_scaled(hex, offset, 4, 100.0)?,
        current: read_signed(hex, offset + 4, 4, 1.0)?,
        total_capacity: u16_at(8)?,
        remaining_capacity: u16_at(12)?,
        soc: u16_at(16)?,
        max_ambient_temperature: temperature_at(20)?,
        min_ambient_temperature: temperature_at(24)?,
        max_cell_voltage: u16_at(28)?,
        min_cell_voltage: u16_at(32)?,
        temperature_min: temperature_at(36)?,
        temperature_max: temperature_at(40)?,
        reserved: hex
            .get(reserved_range)
            .ok_or(FieldError::OutOfBounds {
                offset: offset + 44,
                digits: 18,
                available: hex.len(),
            })?
            .to_string(),
        cell_count: u8_at(62)?,
        battery_count: u8_at(64)?,
    };
    log::debug!(
        "Parsed header: V={:.2}V I={:.2}A SOC={}% Batt={} Cells={} MaxCell={}mV MinCell={}mV",
        header.voltage,
        header.current,
        header.soc,
        header.battery_count,
        header.cell_count,
        header.max_cell_voltage,
        header.min_cell_voltage
    );
    Ok((header, offset + HEADER_DIGITS))
}

/// Fields whose meaning is not established; kept as decoded values only.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExtraFields {
    pub max_cell_temperature: f32,
    pub min_cell_temperature: f32,
    pub unknown_3: u16,
    pub unknown_4: u16,
    pub avg_cell_temperature: f32,
}

/// Raw status bitmasks, see [`crate::labels`] for their bit assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryStatus {
    pub voltage: u16,
    pub current: u16,
    pub temperature: u16,
    pub alarm: u16,
    pub fet: u16,
}

/// Per-cell bitmasks, bit 0 is cell 1.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Protection {
    pub overvoltage_protect: u16,
    pub undervoltage_protect: u16,
    pub overvoltage_alarm: u16,
    pub undervoltage_alarm: u16,
    pub balance_status: u16,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryRecord {
    /// 1-based
    pub number: u8,
    pub soc: u8,
    pub voltage: f32,
    pub cell_voltages: Vec<f32>,
    pub ambient_temperature: f32,
    pub pack_avg_temperature: f32,
    pub mos_temperature: f32,
    pub pack_temperatures: Vec<f32>,
    pub current: f32, // negative=discharging
    pub internal_resistance: u16,
    pub soh: u16,
    pub user_defined: u8,
    pub full_capacity: f32,
    pub remaining_capacity: f32,
    pub cycle_count: u16,
    /// mV
    pub max_cell_voltage: u16,
    /// mV
    pub min_cell_voltage: u16,
    /// mV
    pub average_cell_voltage: u16,
    pub total_charge: u16,
    pub total_discharge: u16,
    pub extra: ExtraFields,
    pub status: BatteryStatus,
    pub protection: Protection,
}

/// Decodes one battery block starting at `offset`.
///
/// Returns the record and the offset where the next block starts. A block
/// whose length differs from [`BATTERY_BLOCK_DIGITS`] is accepted; the
/// mismatch is only logged.
pub fn parse_battery_block(hex: &str, offset: usize) -> Result<(BatteryRecord, usize), FieldError> {
    let mut cursor = HexCursor::new(hex, offset);
    log::trace!(
        "Battery frame at {offset}: {}",
        hex.get(offset..(offset + BATTERY_BLOCK_DIGITS).min(hex.len()))
            .unwrap_or_default()
    );

    // First byte is the 0-based battery number, second one is unused.
    let number = cursor.u8()?.saturating_add(1);
    cursor.skip(2)?;
    let soc = cursor.u8()?;
    let voltage = cursor.scaled(4, 100.0)?;

    let cell_count = cursor.u8()?;
    if cell_count > MAX_CELLS {
        log::warn!("Battery {number} reports {cell_count} cells, more than {MAX_CELLS}");
    }
    let cell_voltages = (0..cell_count)
        .map(|_| cursor.scaled(4, 1000.0))
        .collect::<Result<Vec<_>, _>>()?;

    let ambient_temperature = cursor.signed(4, 10.0)?;
    let pack_avg_temperature = cursor.signed(4, 10.0)?;
    let mos_temperature = cursor.signed(4, 10.0)?;

    let sensor_count = cursor.u8()?;
    let pack_temperatures = (0..sensor_count)
        .map(|_| cursor.signed(4, 10.0))
        .collect::<Result<Vec<_>, _>>()?;

    let current = cursor.signed(4, 100.0)?;
    let internal_resistance = cursor.u16()?;
    let soh = cursor.u16()?;
    let user_defined = cursor.u8()?;
    let full_capacity = cursor.scaled(4, 100.0)?;
    let remaining_capacity = cursor.scaled(4, 100.0)?;
    let cycle_count = cursor.u16()?;
    let max_cell_voltage = cursor.u16()?;
    let min_cell_voltage = cursor.u16()?;
    let extra = ExtraFields {
        max_cell_temperature: cursor.signed(4, 10.0)?,
        min_cell_temperature: cursor.signed(4, 10.0)?,
        unknown_3: cursor.u16()?,
        unknown_4: cursor.u16()?,
        avg_cell_temperature: cursor.signed(4, 10.0)?,
    };
    let average_cell_voltage = cursor.u16()?;
    let total_charge = cursor.u16()?;
    let total_discharge = cursor.u16()?;
    let status = BatteryStatus {
        voltage: cursor.u16()?,
        current: cursor.u16()?,
        temperature: cursor.u16()?,
        alarm: cursor.u16()?,
        fet: cursor.u16()?,
    };
    let protection = Protection {
        overvoltage_protect: cursor.u16()?,
        undervoltage_protect: cursor.u16()?,
        overvoltage_alarm: cursor.u16()?,
        undervoltage_alarm: cursor.u16()?,
        balance_status: cursor.u16()?,
    };

    let consumed = cursor.position() - offset;
    if consumed != BATTERY_BLOCK_DIGITS {
        log::warn!(
            "Battery {number} block length mismatch: expected {BATTERY_BLOCK_DIGITS} hex digits, got {consumed} ({cell_count} cells, {sensor_count} sensors)"
        );
    }

    let record = BatteryRecord {
        number,
        soc,
        voltage,
        cell_voltages,
        ambient_temperature,
        pack_avg_temperature,
        mos_temperature,
        pack_temperatures,
        current,
        internal_resistance,
        soh,
        user_defined,
        full_capacity,
        remaining_capacity,
        cycle_count,
        max_cell_voltage,
        min_cell_voltage,
        average_cell_voltage,
        total_charge,
        total_discharge,
        extra,
        status,
        protection,
    };
    log::debug!("Parsed battery: {record:?}");
    Ok((record, cursor.position()))
}
