//! Bit assignments of the per-battery status and protection words.

use crate::analog::{BatteryStatus, Protection};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

macro_rules! read_bit {
    ($word:expr,$position:expr) => {
        ($word >> $position) & 1 != 0
    };
}

/// Bit position and label of one status flag.
pub type BitLabel = (u8, &'static str);

pub const VOLTAGE_STATUS: &[BitLabel] = &[
    (0, "Cell Overvoltage Protection"),
    (1, "Cell Undervoltage Protection"),
    (2, "Pack Overvoltage Protection"),
    (3, "Pack Undervoltage Protection"),
    (4, "Cell Overvoltage Alarm"),
    (5, "Cell Undervoltage Alarm"),
    (6, "Pack Overvoltage Alarm"),
    (7, "Pack Undervoltage Alarm"),
    (8, "Cell Voltage Difference Alarm"),
    (15, "System Sleep"),
];

pub const CURRENT_STATUS: &[BitLabel] = &[
    (0, "Charging"),
    (1, "Discharging"),
    (2, "Charge Overcurrent Protection"),
    (3, "Short Circuit Protection"),
    (4, "Discharge Overcurrent 1 Protection"),
    (5, "Discharge Overcurrent 2 Protection"),
    (6, "Charge Overcurrent Alarm"),
    (7, "Discharge Overcurrent Alarm"),
];

pub const TEMPERATURE_STATUS: &[BitLabel] = &[
    (0, "Charge Over Temperature Protection"),
    (1, "Charge Under Temperature Protection"),
    (2, "Discharge Over Temperature Protection"),
    (3, "Discharge Under Temperature Protection"),
    (4, "Ambient Over Temperature Protection"),
    (5, "Ambient Under Temperature Protection"),
    (6, "MOS Over Temperature Protection"),
    (7, "MOS Under Temperature Protection"),
    (8, "Charge Over Temperature Alarm"),
    (9, "Charge Under Temperature Alarm"),
    (10, "Discharge Over Temperature Alarm"),
    (11, "Discharge Under Temperature Alarm"),
    (12, "Ambient Over Temperature Alarm"),
    (13, "Ambient Under Temperature Alarm"),
    (14, "MOS Over Temperature Alarm"),
    (15, "MOS Under Temperature Alarm"),
];

pub const ALARM_STATUS: &[BitLabel] = &[
    (0, "Cell Voltage Differential Alarm"),
    (1, "Charge MOS Damage Alarm"),
    (2, "External SD Card Failure Alarm"),
    (3, "SPI Communication Failure Alarm"),
    (4, "EEPROM Failure Alarm"),
    (5, "LED Alarm Enable"),
    (6, "Buzzer Alarm Enable"),
    (7, "Low Battery Alarm"),
    (8, "MOS Over Temperature Protection"),
    (9, "MOS Over Temperature Alarm"),
    (10, "Current Limiting Board Failure"),
    (11, "Sampling Failure"),
    (12, "Battery Failure"),
    (13, "NTC Failure"),
    (14, "Charge MOS Failure"),
    (15, "Discharge MOS Failure"),
];

/// Labels of all set bits, in table order.
pub fn decode_flags(word: u16, table: &[BitLabel]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(bit, _)| read_bit!(word, bit))
        .map(|(_, label)| *label)
        .collect()
}

/// 1-based numbers of the cells flagged in a protection word.
pub fn flagged_cells(word: u16) -> Vec<u8> {
    (0..16u8).filter(|cell| read_bit!(word, cell)).map(|cell| cell + 1).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CurrentLimit {
    None,
    Limit5A,
    Limit10A,
    Limit25A,
}

impl std::fmt::Display for CurrentLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CurrentLimit::None => write!(f, "No current limit"),
            CurrentLimit::Limit5A => write!(f, "Current limit 5A"),
            CurrentLimit::Limit10A => write!(f, "Current limit 10A"),
            CurrentLimit::Limit25A => write!(f, "Current limit 25A"),
        }
    }
}

/// Decoded FET status word.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetStatus {
    pub charge_mos: bool,
    pub discharge_mos: bool,
    pub discharge_mos_failure: bool,
    pub charge_mos_failure: bool,
    pub current_limit: CurrentLimit,
    pub led_alarm: bool,
    pub beep: bool,
}

impl From<u16> for FetStatus {
    fn from(word: u16) -> Self {
        Self {
            charge_mos: read_bit!(word, 0),
            discharge_mos: read_bit!(word, 1),
            discharge_mos_failure: read_bit!(word, 2),
            charge_mos_failure: read_bit!(word, 3),
            current_limit: match (word >> 4) & 0b11 {
                0 => CurrentLimit::None,
                1 => CurrentLimit::Limit5A,
                2 => CurrentLimit::Limit10A,
                _ => CurrentLimit::Limit25A,
            },
            // bits 6-10 and 13-15 are reserved
            led_alarm: read_bit!(word, 11),
            beep: read_bit!(word, 12),
        }
    }
}

impl FetStatus {
    pub fn labels(&self) -> Vec<String> {
        let on_off = |on: bool| if on { "On" } else { "Off" };
        let mut labels = vec![
            format!("Charge MOS: {}", on_off(self.charge_mos)),
            format!("Discharge MOS: {}", on_off(self.discharge_mos)),
        ];
        if self.discharge_mos_failure {
            labels.push("Discharge MOS Failure".to_string());
        }
        if self.charge_mos_failure {
            labels.push("Charge MOS Failure".to_string());
        }
        labels.push(self.current_limit.to_string());
        if self.led_alarm {
            labels.push("LED alarm enabled".to_string());
        }
        if self.beep {
            labels.push("Beep enabled".to_string());
        }
        labels
    }
}

impl BatteryStatus {
    pub fn voltage_flags(&self) -> Vec<&'static str> {
        decode_flags(self.voltage, VOLTAGE_STATUS)
    }

    pub fn current_flags(&self) -> Vec<&'static str> {
        decode_flags(self.current, CURRENT_STATUS)
    }

    pub fn temperature_flags(&self) -> Vec<&'static str> {
        decode_flags(self.temperature, TEMPERATURE_STATUS)
    }

    pub fn alarm_flags(&self) -> Vec<&'static str> {
        decode_flags(self.alarm, ALARM_STATUS)
    }

    pub fn fet_status(&self) -> FetStatus {
        FetStatus::from(self.fet)
    }
}

impl Protection {
    /// Name and raw word of each protection mask.
    pub fn masks(&self) -> [(&'static str, u16); 5] {
        [
            ("Overvoltage Protection", self.overvoltage_protect),
            ("Undervoltage Protection", self.undervoltage_protect),
            ("Overvoltage Alarm", self.overvoltage_alarm),
            ("Undervoltage Alarm", self.undervoltage_alarm),
            ("Balance Status", self.balance_status),
        ]
    }
}
