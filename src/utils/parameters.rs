use lazy_static::lazy_static;
use serde_derive::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryBank {
    /// Gear identity and capabilities, read only
    Bank0,
    /// Vendor specific, holds the gear variables
    Bank1,
}

impl MemoryBank {
    /// Value loaded into DTR1 to select the bank
    pub fn number(&self) -> u8 {
        match self {
            MemoryBank::Bank0 => 0,
            MemoryBank::Bank1 => 1,
        }
    }

    /// Offset of the last cell in the bank
    pub fn last_location(&self) -> u8 {
        match self {
            MemoryBank::Bank0 => 0x21,
            MemoryBank::Bank1 => 0x22,
        }
    }

    pub fn writable(&self) -> bool {
        matches!(self, MemoryBank::Bank1)
    }
}

impl fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MB{}", self.number())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterSelector {
    ShortAddress,
    PowerOnLevel,
    SystemFailureLevel,
    MinLevel,
    MaxLevel,
    LastRequestedLevel,
    FadeRate,
    FadeTime,
    RandomAddressH,
    RandomAddressM,
    RandomAddressL,
    Groups0_7,
    Groups8_15,
    /// Scene 0..=15
    Scene(u8),
    FailureStatus,
    OperatingMode,
    FastFadeTime,
    MinFastFadeTime,
    GearType,
    PossibleOperatingModes,
    Features,
    ExtendedVersionNumber,
    DeviceType,
    PhysicalMinimum,
}

impl fmt::Display for ParameterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSelector::Scene(n) => write!(f, "Scene{:02}", n),
            s => fmt::Debug::fmt(s, f),
        }
    }
}

/// Where a parameter is stored in the device
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub bank: MemoryBank,
    pub offset: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// Selector has no cell, e.g. a scene number above 15
    Unknown(ParameterSelector),
    Duplicate(ParameterSelector),
    SharedCell(ParameterSelector, ParameterSelector),
    OutOfBank(ParameterSelector),
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::Unknown(s) => write!(f, "No storage for parameter {}", s),
            ParameterError::Duplicate(s) => write!(f, "Parameter {} listed twice", s),
            ParameterError::SharedCell(a, b) => {
                write!(f, "Parameters {} and {} share a cell", a, b)
            }
            ParameterError::OutOfBank(s) => write!(f, "Parameter {} is outside its bank", s),
        }
    }
}

impl std::error::Error for ParameterError {}

const fn at(bank: MemoryBank, offset: u8) -> Location {
    Location { bank, offset }
}

use MemoryBank::{Bank0, Bank1};
use ParameterSelector as P;

/// Offsets 0x00..=0x02 of every bank hold the bank header.
/// Bank 0 offsets up to 0x1a are the standard identity block.
const FIXED_TABLE: [(ParameterSelector, Location); 23] = [
    (P::ShortAddress, at(Bank1, 0x03)),
    (P::PowerOnLevel, at(Bank1, 0x04)),
    (P::SystemFailureLevel, at(Bank1, 0x05)),
    (P::MinLevel, at(Bank1, 0x06)),
    (P::MaxLevel, at(Bank1, 0x07)),
    (P::LastRequestedLevel, at(Bank1, 0x08)),
    (P::FadeRate, at(Bank1, 0x09)),
    (P::FadeTime, at(Bank1, 0x0a)),
    (P::RandomAddressH, at(Bank1, 0x0b)),
    (P::RandomAddressM, at(Bank1, 0x0c)),
    (P::RandomAddressL, at(Bank1, 0x0d)),
    (P::Groups0_7, at(Bank1, 0x0e)),
    (P::Groups8_15, at(Bank1, 0x0f)),
    (P::FailureStatus, at(Bank1, 0x20)),
    (P::OperatingMode, at(Bank1, 0x21)),
    (P::FastFadeTime, at(Bank1, 0x22)),
    (P::MinFastFadeTime, at(Bank0, 0x1b)),
    (P::GearType, at(Bank0, 0x1c)),
    (P::PossibleOperatingModes, at(Bank0, 0x1d)),
    (P::Features, at(Bank0, 0x1e)),
    (P::ExtendedVersionNumber, at(Bank0, 0x1f)),
    (P::DeviceType, at(Bank0, 0x20)),
    (P::PhysicalMinimum, at(Bank0, 0x21)),
];

const SCENE_BASE: u8 = 0x10;

/// Unique identification number in bank 0
pub const IDENTIFICATION_NUMBER: Location = at(Bank0, 0x0b);
pub const IDENTIFICATION_LENGTH: u8 = 8;

/// Full selector table, scenes included
pub fn table() -> Vec<(ParameterSelector, Location)> {
    let mut entries = FIXED_TABLE.to_vec();
    entries.extend((0..16).map(|n| (P::Scene(n), at(Bank1, SCENE_BASE + n))));
    entries
}

/// Check that no two selectors share a cell and that every cell exists
pub fn check_table(entries: &[(ParameterSelector, Location)]) -> Result<(), ParameterError> {
    let mut cells: HashMap<Location, ParameterSelector> = HashMap::new();
    let mut seen = HashSet::new();
    for (selector, location) in entries {
        if !seen.insert(*selector) {
            return Err(ParameterError::Duplicate(*selector));
        }
        if location.offset > location.bank.last_location() {
            return Err(ParameterError::OutOfBank(*selector));
        }
        if let Some(other) = cells.insert(*location, *selector) {
            return Err(ParameterError::SharedCell(other, *selector));
        }
    }
    Ok(())
}

lazy_static! {
    static ref PARAMETERS: HashMap<ParameterSelector, Location> = table().into_iter().collect();
}

/// Validate the parameter table, called once when a bus is created.
/// Also builds the lookup map.
pub fn validate() -> Result<(), ParameterError> {
    let entries = table();
    check_table(&entries)?;
    for (selector, location) in &entries {
        if PARAMETERS.get(selector) != Some(location) {
            return Err(ParameterError::Duplicate(*selector));
        }
    }
    Ok(())
}

pub fn location(selector: ParameterSelector) -> Result<Location, ParameterError> {
    PARAMETERS
        .get(&selector)
        .copied()
        .ok_or(ParameterError::Unknown(selector))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_valid() {
        assert_eq!(validate(), Ok(()));
        assert_eq!(table().len(), 39);
        assert_eq!(PARAMETERS.len(), 39);
    }

    #[test]
    fn lookup() {
        assert_eq!(location(P::ShortAddress), Ok(at(Bank1, 0x03)));
        assert_eq!(location(P::Scene(15)), Ok(at(Bank1, 0x1f)));
        assert_eq!(location(P::PhysicalMinimum), Ok(at(Bank0, 0x21)));
        assert_eq!(
            location(P::Scene(16)),
            Err(ParameterError::Unknown(P::Scene(16)))
        );
    }

    #[test]
    fn rejects_bad_tables() {
        let shared = [(P::MinLevel, at(Bank1, 0x06)), (P::MaxLevel, at(Bank1, 0x06))];
        assert_eq!(
            check_table(&shared),
            Err(ParameterError::SharedCell(P::MinLevel, P::MaxLevel))
        );
        let twice = [(P::MinLevel, at(Bank1, 0x06)), (P::MinLevel, at(Bank1, 0x07))];
        assert_eq!(check_table(&twice), Err(ParameterError::Duplicate(P::MinLevel)));
        let outside = [(P::GearType, at(Bank0, 0x40))];
        assert_eq!(
            check_table(&outside),
            Err(ParameterError::OutOfBank(P::GearType))
        );
        // Same offset in different banks is fine
        let split = [(P::GearType, at(Bank0, 0x06)), (P::MinLevel, at(Bank1, 0x06))];
        assert_eq!(check_table(&split), Ok(()));
    }
}
