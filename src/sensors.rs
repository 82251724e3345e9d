//! Declarative description of the values a snapshot exposes.
//!
//! Each entry maps a stable key to a display name, a unit and an accessor, so
//! the presentation side can walk the tables instead of naming every field.

use crate::analog::{BatteryRecord, SystemHeader};

pub struct Sensor<R> {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub value: fn(&R) -> f64,
}

impl<R> std::fmt::Debug for Sensor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("unit", &self.unit)
            .finish()
    }
}

const VOLT: Option<&str> = Some("V");
const MILLIVOLT: Option<&str> = Some("mV");
const AMPERE: Option<&str> = Some("A");
const AMPERE_HOUR: Option<&str> = Some("Ah");
const CELSIUS: Option<&str> = Some("°C");
const PERCENT: Option<&str> = Some("%");

#[rustfmt::skip]
pub const GROUP_SENSORS: &[Sensor<SystemHeader>] = &[
    Sensor { key: "voltage", name: "System Voltage", unit: VOLT, value: |h| f64::from(h.voltage) },
    Sensor { key: "current", name: "System Current", unit: AMPERE, value: |h| f64::from(h.current) },
    Sensor { key: "total_capacity", name: "Total Capacity", unit: AMPERE_HOUR, value: |h| f64::from(h.total_capacity) },
    Sensor { key: "remaining_capacity", name: "Remaining Capacity", unit: AMPERE_HOUR, value: |h| f64::from(h.remaining_capacity) },
    Sensor { key: "soc", name: "System SOC", unit: PERCENT, value: |h| f64::from(h.soc) },
    Sensor { key: "max_ambient_temperature", name: "Max Ambient Temperature", unit: CELSIUS, value: |h| f64::from(h.max_ambient_temperature) },
    Sensor { key: "min_ambient_temperature", name: "Min Ambient Temperature", unit: CELSIUS, value: |h| f64::from(h.min_ambient_temperature) },
    Sensor { key: "max_cell_voltage", name: "Max Cell Voltage", unit: MILLIVOLT, value: |h| f64::from(h.max_cell_voltage) },
    Sensor { key: "min_cell_voltage", name: "Min Cell Voltage", unit: MILLIVOLT, value: |h| f64::from(h.min_cell_voltage) },
    Sensor { key: "temperature_min", name: "Pack Temperature Minimum", unit: CELSIUS, value: |h| f64::from(h.temperature_min) },
    Sensor { key: "temperature_max", name: "Pack Temperature Maximum", unit: CELSIUS, value: |h| f64::from(h.temperature_max) },
    Sensor { key: "cell_count", name: "Cell Count", unit: None, value: |h| f64::from(h.cell_count) },
    Sensor { key: "battery_count", name: "Battery Count", unit: None, value: |h| f64::from(h.battery_count) },
];

#[rustfmt::skip]
pub const BATTERY_SENSORS: &[Sensor<BatteryRecord>] = &[
    Sensor { key: "soc", name: "SOC", unit: PERCENT, value: |b| f64::from(b.soc) },
    Sensor { key: "voltage", name: "Voltage", unit: VOLT, value: |b| f64::from(b.voltage) },
    Sensor { key: "current", name: "Current", unit: AMPERE, value: |b| f64::from(b.current) },
    Sensor { key: "ambient_temperature", name: "Ambient Temperature", unit: CELSIUS, value: |b| f64::from(b.ambient_temperature) },
    Sensor { key: "pack_avg_temperature", name: "Pack Average Temperature", unit: CELSIUS, value: |b| f64::from(b.pack_avg_temperature) },
    Sensor { key: "mos_temperature", name: "MOS Temperature", unit: CELSIUS, value: |b| f64::from(b.mos_temperature) },
    Sensor { key: "internal_resistance", name: "Internal Resistance", unit: None, value: |b| f64::from(b.internal_resistance) },
    Sensor { key: "soh", name: "SOH", unit: PERCENT, value: |b| f64::from(b.soh) },
    Sensor { key: "user_defined", name: "User Defined", unit: None, value: |b| f64::from(b.user_defined) },
    Sensor { key: "full_capacity", name: "Full Capacity", unit: AMPERE_HOUR, value: |b| f64::from(b.full_capacity) },
    Sensor { key: "remaining_capacity", name: "Remaining Capacity", unit: AMPERE_HOUR, value: |b| f64::from(b.remaining_capacity) },
    Sensor { key: "cycle_count", name: "Cycle Count", unit: None, value: |b| f64::from(b.cycle_count) },
    Sensor { key: "max_cell_voltage", name: "Max Cell Voltage", unit: MILLIVOLT, value: |b| f64::from(b.max_cell_voltage) },
    Sensor { key: "min_cell_voltage", name: "Min Cell Voltage", unit: MILLIVOLT, value: |b| f64::from(b.min_cell_voltage) },
    Sensor { key: "average_cell_voltage", name: "Average Cell Voltage", unit: MILLIVOLT, value: |b| f64::from(b.average_cell_voltage) },
    Sensor { key: "total_charge", name: "Total Charge", unit: AMPERE_HOUR, value: |b| f64::from(b.total_charge) },
    Sensor { key: "total_discharge", name: "Total Discharge", unit: AMPERE_HOUR, value: |b| f64::from(b.total_discharge) },
    Sensor { key: "max_cell_temperature", name: "Max Cell Temperature", unit: CELSIUS, value: |b| f64::from(b.extra.max_cell_temperature) },
    Sensor { key: "min_cell_temperature", name: "Min Cell Temperature", unit: CELSIUS, value: |b| f64::from(b.extra.min_cell_temperature) },
    Sensor { key: "avg_cell_temperature", name: "Average Cell Temperature", unit: CELSIUS, value: |b| f64::from(b.extra.avg_cell_temperature) },
    Sensor { key: "unknown_3", name: "Unknown 3", unit: None, value: |b| f64::from(b.extra.unknown_3) },
    Sensor { key: "unknown_4", name: "Unknown 4", unit: None, value: |b| f64::from(b.extra.unknown_4) },
];

/// One value ready for display or publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub key: String,
    pub name: String,
    pub unit: Option<&'static str>,
    pub value: f64,
}

fn table_readings<'a, R>(
    table: &'a [Sensor<R>],
    record: &'a R,
) -> impl Iterator<Item = Reading> + 'a {
    table.iter().map(move |sensor| Reading {
        key: sensor.key.to_string(),
        name: sensor.name.to_string(),
        unit: sensor.unit,
        value: (sensor.value)(record),
    })
}

pub fn group_readings(header: &SystemHeader) -> Vec<Reading> {
    table_readings(GROUP_SENSORS, header).collect()
}

/// Table values followed by one reading per cell voltage and pack temperature.
pub fn battery_readings(record: &BatteryRecord) -> Vec<Reading> {
    let cells = record.cell_voltages.iter().enumerate().map(|(i, voltage)| Reading {
        key: format!("cell_{}_voltage", i + 1),
        name: format!("Cell {} Voltage", i + 1),
        unit: VOLT,
        value: f64::from(*voltage),
    });
    let temperatures = record
        .pack_temperatures
        .iter()
        .enumerate()
        .map(|(i, temperature)| Reading {
            key: format!("pack_temperature_{}", i + 1),
            name: format!("Pack Temperature {}", i + 1),
            unit: CELSIUS,
            value: f64::from(*temperature),
        });
    table_readings(BATTERY_SENSORS, record)
        .chain(cells)
        .chain(temperatures)
        .collect()
}
