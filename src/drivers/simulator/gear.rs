use crate::common::address::{Long, LONG_MAX};
use crate::common::cmd_defs::{MASK, YES};
use crate::gear::cmd_defs::opcode;
use crate::gear::status;
use crate::utils::parameters::{self, Location, MemoryBank, ParameterSelector};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitialisationState {
    Enabled,
    Disabled,
    Withdrawn,
}

const BANK0_SIZE: usize = 0x22;

/// Simulated control gear. Level changes are immediate, there is no fading.
pub struct SimGear {
    pub actual_level: u8,
    pub target_level: u8,
    pub last_active_level: u8,
    pub power_on_level: u8,
    pub system_failure_level: u8,
    pub min_level: u8,
    pub max_level: u8,
    pub fade_rate: u8,
    pub fade_time: u8,
    pub fast_fade_time: u8,
    pub short_address: u8,
    pub search_address: Long,
    pub random_address: Long,
    pub operating_mode: u8,
    pub initialisation_state: InitialisationState,
    pub write_enabled: bool,
    pub status: u8,
    pub gear_groups: u16,
    pub scene: [u8; 16],
    pub dtr0: u8,
    pub dtr1: u8,
    pub dtr2: u8,
    pub phm: u8,
    pub device_type: u8,
    bank0: [u8; BANK0_SIZE],
    /// Previous frame, for commands that must be received twice
    last_frame: Option<[u8; 2]>,
    rng: StdRng,
}

impl SimGear {
    pub fn new(seed: u64) -> SimGear {
        let phm = 0x01;
        let mut bank0 = [0u8; BANK0_SIZE];
        bank0[0x00] = MemoryBank::Bank0.last_location();
        bank0[0x02] = 1; // Last accessible bank
        bank0[0x03..0x09].copy_from_slice(&[0x00, 0x00, 0x0d, 0xa1, 0x00, 0x01]); // GTIN
        bank0[0x09] = 1; // Firmware version
        let id = parameters::IDENTIFICATION_NUMBER.offset as usize;
        bank0[id..id + 8].copy_from_slice(&seed.to_be_bytes());
        bank0[0x15] = 0x08; // IEC 62386-101 version 2.0
        bank0[0x16] = 0x08;
        bank0[0x17] = 0xff;
        bank0[0x19] = 1;
        bank0[0x1b] = 0x01; // Min fast fade time
        bank0[0x1c] = 0x00; // Gear type
        bank0[0x1d] = 0x01; // Possible operating modes
        bank0[0x1e] = 0x00; // Features
        bank0[0x1f] = 0x02; // Extended version number
        bank0[0x20] = 6; // Device type, LED
        bank0[0x21] = phm;
        SimGear {
            actual_level: 0xfe,
            target_level: 0xfe,
            last_active_level: 0xfe,
            power_on_level: 0xfe,
            system_failure_level: 0xfe,
            min_level: phm,
            max_level: 0xfe,
            fade_rate: 0x07,
            fade_time: 0x00,
            fast_fade_time: 0x00,
            short_address: MASK,
            search_address: LONG_MAX,
            random_address: LONG_MAX,
            operating_mode: 0,
            initialisation_state: InitialisationState::Disabled,
            write_enabled: false,
            status: status::POWER_CYCLE,
            gear_groups: 0x0000,
            scene: [MASK; 16],
            dtr0: 0,
            dtr1: 0,
            dtr2: 0,
            phm,
            device_type: 6,
            bank0,
            last_frame: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Handle a forward frame. Returns the backward frame, if any.
    pub fn forward(&mut self, frame: [u8; 2]) -> Option<u8> {
        let repeated = self.last_frame == Some(frame);
        self.last_frame = if repeated { None } else { Some(frame) };
        let [addr, data] = frame;
        match addr {
            0xa0..=0xcb if addr & 1 == 1 => self.special_cmd(addr, data, repeated),
            _ => {
                if !self.addressed(addr) {
                    return None;
                }
                if addr & 1 == 0 {
                    self.write_enabled = false;
                    self.direct_arc_power(data);
                    None
                } else {
                    self.device_cmd(data, repeated)
                }
            }
        }
    }

    fn addressed(&self, addr: u8) -> bool {
        match addr >> 1 {
            a @ 0x00..=0x3f => a == self.short_address,
            g @ 0x40..=0x4f => self.gear_groups & (1 << (g & 0x0f)) != 0,
            0x7e => self.short_address == MASK,
            0x7f => true,
            _ => false,
        }
    }

    fn set_level(&mut self, level: u8) {
        let level = if level == 0 {
            0
        } else {
            level.clamp(self.min_level, self.max_level)
        };
        self.target_level = level;
        self.actual_level = level;
        if level > 0 {
            self.last_active_level = level;
        }
        self.status &= !status::RESET_STATE;
    }

    fn direct_arc_power(&mut self, level: u8) {
        if level != MASK {
            self.set_level(level);
        }
    }

    fn update_status(&mut self) {
        self.status = (self.status & status::STORED)
            | if self.actual_level > 0 { status::LAMP_ON } else { 0 }
            | if self.short_address == MASK {
                status::NO_ADDRESS
            } else {
                0
            };
    }

    fn flag(&self, flag: u8) -> Option<u8> {
        if self.status & flag != 0 {
            Some(YES)
        } else {
            None
        }
    }

    fn device_cmd(&mut self, cmd: u8, repeated: bool) -> Option<u8> {
        if !matches!(
            cmd,
            opcode::ENABLE_WRITE_MEMORY | opcode::QUERY_CONTENT_DTR0 | opcode::QUERY_CONTENT_DTR1
        ) {
            self.write_enabled = false;
        }
        match cmd {
            opcode::OFF => self.set_level(0),
            opcode::UP => {
                if self.actual_level > 0 {
                    self.set_level(self.actual_level.saturating_add(1).min(self.max_level))
                }
            }
            opcode::DOWN => {
                if self.actual_level > self.min_level {
                    self.set_level(self.actual_level - 1)
                }
            }
            opcode::STEP_UP => {
                if self.actual_level > 0 && self.actual_level < self.max_level {
                    self.set_level(self.actual_level + 1)
                }
            }
            opcode::STEP_DOWN => {
                if self.actual_level > self.min_level {
                    self.set_level(self.actual_level - 1)
                }
            }
            opcode::RECALL_MAX_LEVEL => self.set_level(self.max_level),
            opcode::RECALL_MIN_LEVEL => self.set_level(self.min_level),
            opcode::GO_TO_LAST_ACTIVE_LEVEL => self.set_level(self.last_active_level),
            c @ 0x10..=0x1f => {
                let level = self.scene[(c & 0x0f) as usize];
                if level != MASK {
                    self.set_level(level)
                }
            }
            c @ 0x20..=0x81 => {
                if repeated {
                    self.config_cmd(c);
                }
            }
            _ => return self.query_cmd(cmd),
        }
        None
    }

    /// Configuration commands, only accepted when received twice
    fn config_cmd(&mut self, cmd: u8) {
        debug!("Gear {:02x} config {:02x} dtr0 {:02x}", self.short_address, cmd, self.dtr0);
        match cmd {
            opcode::RESET => {
                // Addresses and identity survive a reset
                let short = self.short_address;
                let long = self.random_address;
                let rng = self.rng.clone();
                let bank0 = self.bank0;
                *self = SimGear::new(0);
                self.bank0 = bank0;
                self.rng = rng;
                self.short_address = short;
                self.random_address = long;
                self.status = status::RESET_STATE;
            }
            opcode::STORE_ACTUAL_LEVEL_IN_DTR0 => self.dtr0 = self.actual_level,
            opcode::SET_OPERATING_MODE => self.operating_mode = self.dtr0,
            opcode::IDENTIFY_DEVICE => {}
            opcode::SET_MAX_LEVEL => {
                self.max_level = self.dtr0.clamp(self.min_level, 0xfe);
            }
            opcode::SET_MIN_LEVEL => {
                self.min_level = self.dtr0.clamp(self.phm, self.max_level);
            }
            opcode::SET_SYSTEM_FAILURE_LEVEL => self.system_failure_level = self.dtr0,
            opcode::SET_POWER_ON_LEVEL => self.power_on_level = self.dtr0,
            opcode::SET_FADE_TIME => self.fade_time = self.dtr0.min(15),
            opcode::SET_FADE_RATE => self.fade_rate = self.dtr0.clamp(1, 15),
            c @ 0x40..=0x4f => self.scene[(c & 0x0f) as usize] = self.dtr0,
            c @ 0x50..=0x5f => self.scene[(c & 0x0f) as usize] = MASK,
            c @ 0x60..=0x6f => self.gear_groups |= 1 << (c & 0x0f),
            c @ 0x70..=0x7f => self.gear_groups &= !(1 << (c & 0x0f)),
            opcode::SET_SHORT_ADDRESS => {
                if self.dtr0 == MASK {
                    self.short_address = MASK;
                } else if self.dtr0 & 0x81 == 0x01 {
                    self.short_address = self.dtr0 >> 1;
                }
            }
            opcode::ENABLE_WRITE_MEMORY => self.write_enabled = true,
            _ => {}
        }
    }

    fn query_cmd(&mut self, cmd: u8) -> Option<u8> {
        match cmd {
            opcode::QUERY_STATUS => {
                self.update_status();
                Some(self.status)
            }
            opcode::QUERY_CONTROL_GEAR_PRESENT => Some(YES),
            opcode::QUERY_LAMP_FAILURE => self.flag(status::LAMP_FAILURE),
            opcode::QUERY_LAMP_POWER_ON => {
                self.update_status();
                self.flag(status::LAMP_ON)
            }
            opcode::QUERY_MISSING_SHORT_ADDRESS => (self.short_address == MASK).then_some(YES),
            opcode::QUERY_VERSION_NUMBER => Some(0x08),
            opcode::QUERY_CONTENT_DTR0 => Some(self.dtr0),
            opcode::QUERY_DEVICE_TYPE => Some(self.device_type),
            opcode::QUERY_PHYSICAL_MINIMUM => Some(self.phm),
            opcode::QUERY_CONTENT_DTR1 => Some(self.dtr1),
            opcode::QUERY_ACTUAL_LEVEL => Some(self.actual_level),
            opcode::QUERY_MAX_LEVEL => Some(self.max_level),
            opcode::QUERY_MIN_LEVEL => Some(self.min_level),
            opcode::QUERY_POWER_ON_LEVEL => Some(self.power_on_level),
            opcode::QUERY_SYSTEM_FAILURE_LEVEL => Some(self.system_failure_level),
            opcode::QUERY_FADE => Some(self.fade_time << 4 | self.fade_rate),
            c @ 0xb0..=0xbf => Some(self.scene[(c & 0x0f) as usize]),
            opcode::QUERY_GROUPS_0_7 => Some(self.gear_groups as u8),
            opcode::QUERY_GROUPS_8_15 => Some((self.gear_groups >> 8) as u8),
            opcode::QUERY_RANDOM_ADDRESS_H => Some((self.random_address >> 16) as u8),
            opcode::QUERY_RANDOM_ADDRESS_M => Some((self.random_address >> 8) as u8),
            opcode::QUERY_RANDOM_ADDRESS_L => Some(self.random_address as u8),
            opcode::READ_MEMORY_LOCATION => self.read_memory(),
            _ => None,
        }
    }

    fn bank(&self) -> Option<MemoryBank> {
        match self.dtr1 {
            0 => Some(MemoryBank::Bank0),
            1 => Some(MemoryBank::Bank1),
            _ => None,
        }
    }

    fn advance_dtr0(&mut self) {
        if self.dtr0 < 0xff {
            self.dtr0 += 1;
        }
    }

    fn read_memory(&mut self) -> Option<u8> {
        let bank = self.bank()?;
        let offset = self.dtr0;
        self.advance_dtr0();
        if offset > bank.last_location() {
            return None;
        }
        Some(self.cell(bank, offset))
    }

    fn cell(&self, bank: MemoryBank, offset: u8) -> u8 {
        match bank {
            MemoryBank::Bank0 => self.bank0[offset as usize],
            MemoryBank::Bank1 => match offset {
                0x00 => bank.last_location(),
                0x01 => 0x00,
                0x02 => 0xff,
                _ => selector_at(bank, offset)
                    .map(|s| self.parameter(s))
                    .unwrap_or(MASK),
            },
        }
    }

    fn write_memory(&mut self, value: u8) -> Option<u8> {
        if !self.write_enabled {
            return None;
        }
        let bank = self.bank()?;
        let offset = self.dtr0;
        self.advance_dtr0();
        if !bank.writable() || offset > bank.last_location() {
            return None;
        }
        let selector = selector_at(bank, offset)?;
        self.set_parameter(selector, value);
        Some(value)
    }

    /// Current value of a parameter as stored in the memory banks
    pub fn parameter(&self, selector: ParameterSelector) -> u8 {
        use ParameterSelector as P;
        match selector {
            P::ShortAddress => self.short_address,
            P::PowerOnLevel => self.power_on_level,
            P::SystemFailureLevel => self.system_failure_level,
            P::MinLevel => self.min_level,
            P::MaxLevel => self.max_level,
            P::LastRequestedLevel => self.target_level,
            P::FadeRate => self.fade_rate,
            P::FadeTime => self.fade_time,
            P::RandomAddressH => (self.random_address >> 16) as u8,
            P::RandomAddressM => (self.random_address >> 8) as u8,
            P::RandomAddressL => self.random_address as u8,
            P::Groups0_7 => self.gear_groups as u8,
            P::Groups8_15 => (self.gear_groups >> 8) as u8,
            P::Scene(n) => self.scene.get(n as usize).copied().unwrap_or(MASK),
            P::FailureStatus => self.status & (status::GEAR_FAILURE | status::LAMP_FAILURE),
            P::OperatingMode => self.operating_mode,
            P::FastFadeTime => self.fast_fade_time,
            P::MinFastFadeTime
            | P::GearType
            | P::PossibleOperatingModes
            | P::Features
            | P::ExtendedVersionNumber
            | P::DeviceType
            | P::PhysicalMinimum => match parameters::location(selector) {
                Ok(Location { bank: MemoryBank::Bank0, offset }) => self.bank0[offset as usize],
                _ => MASK,
            },
        }
    }

    fn set_parameter(&mut self, selector: ParameterSelector, value: u8) {
        use ParameterSelector as P;
        match selector {
            P::ShortAddress => {
                self.short_address = if value <= 0x3f { value } else { MASK };
            }
            P::PowerOnLevel => self.power_on_level = value,
            P::SystemFailureLevel => self.system_failure_level = value,
            P::MinLevel => self.min_level = value.clamp(self.phm, self.max_level),
            P::MaxLevel => self.max_level = value.clamp(self.min_level, 0xfe),
            P::FadeRate => self.fade_rate = value.clamp(1, 15),
            P::FadeTime => self.fade_time = value.min(15),
            P::Groups0_7 => self.gear_groups = (self.gear_groups & 0xff00) | value as u16,
            P::Groups8_15 => {
                self.gear_groups = (self.gear_groups & 0x00ff) | (value as u16) << 8
            }
            P::Scene(n) => {
                if let Some(level) = self.scene.get_mut(n as usize) {
                    *level = value;
                }
            }
            P::OperatingMode => self.operating_mode = value,
            P::FastFadeTime => self.fast_fade_time = value,
            // Status and random address are not writable through the bank
            _ => {}
        }
    }

    fn special_cmd(&mut self, cmd: u8, data: u8, repeated: bool) -> Option<u8> {
        let initialising = self.initialisation_state != InitialisationState::Disabled;
        match cmd {
            opcode::TERMINATE => {
                self.initialisation_state = InitialisationState::Disabled;
            }
            opcode::DTR0 => self.dtr0 = data,
            opcode::DTR1 => self.dtr1 = data,
            opcode::DTR2 => self.dtr2 = data,
            opcode::INITIALISE if repeated => {
                if (data & 0x81 == 0x01 && data >> 1 == self.short_address)
                    || (data == 0xff && self.short_address == MASK)
                    || data == 0x00
                {
                    self.initialisation_state = InitialisationState::Enabled;
                }
            }
            opcode::RANDOMISE if repeated => {
                if initialising {
                    self.random_address = self.rng.gen_range(0..=LONG_MAX);
                    debug!("Gear randomised to {:06x}", self.random_address);
                }
            }
            opcode::COMPARE => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address <= self.search_address
                {
                    return Some(YES);
                }
            }
            opcode::WITHDRAW => {
                if self.initialisation_state == InitialisationState::Enabled
                    && self.random_address == self.search_address
                {
                    self.initialisation_state = InitialisationState::Withdrawn;
                }
            }
            opcode::SEARCHADDRH if initialising => {
                self.search_address = (self.search_address & 0x00ffff) | (data as Long) << 16;
            }
            opcode::SEARCHADDRM if initialising => {
                self.search_address = (self.search_address & 0xff00ff) | (data as Long) << 8;
            }
            opcode::SEARCHADDRL if initialising => {
                self.search_address = (self.search_address & 0xffff00) | data as Long;
            }
            opcode::PROGRAM_SHORT_ADDRESS => {
                if initialising && self.search_address == self.random_address {
                    if data & 0x81 == 0x01 {
                        self.short_address = data >> 1;
                    } else if data == MASK {
                        self.short_address = MASK;
                    }
                }
            }
            opcode::VERIFY_SHORT_ADDRESS => {
                if initialising && data & 0x81 == 0x01 && data >> 1 == self.short_address {
                    return Some(YES);
                }
            }
            opcode::QUERY_SHORT_ADDRESS => {
                if initialising && self.search_address == self.random_address {
                    return Some(if self.short_address == MASK {
                        MASK
                    } else {
                        (self.short_address << 1) | 0x01
                    });
                }
            }
            opcode::WRITE_MEMORY_LOCATION => return self.write_memory(data),
            opcode::WRITE_MEMORY_LOCATION_NO_REPLY => {
                self.write_memory(data);
            }
            _ => {}
        }
        None
    }
}

fn selector_at(bank: MemoryBank, offset: u8) -> Option<ParameterSelector> {
    parameters::table()
        .into_iter()
        .find(|(_, location)| location.bank == bank && location.offset == offset)
        .map(|(selector, _)| selector)
}

#[cfg(test)]
mod test {
    use super::*;

    fn twice(gear: &mut SimGear, frame: [u8; 2]) {
        gear.forward(frame);
        gear.forward(frame);
    }

    #[test]
    fn config_needs_two_frames() {
        let mut gear = SimGear::new(1);
        gear.forward([opcode::DTR0, 0x80]);
        gear.forward([0xff, opcode::SET_MAX_LEVEL]);
        assert_eq!(gear.max_level, 0xfe);
        gear.forward([0xff, opcode::SET_MAX_LEVEL]);
        assert_eq!(gear.max_level, 0x80);
        assert_eq!(gear.forward([0xff, opcode::QUERY_MAX_LEVEL]), Some(0x80));
    }

    #[test]
    fn addressing() {
        let mut gear = SimGear::new(1);
        assert_eq!(gear.forward([0xfd, opcode::QUERY_CONTROL_GEAR_PRESENT]), Some(YES));
        gear.forward([opcode::DTR0, 0x07]);
        twice(&mut gear, [0xff, opcode::SET_SHORT_ADDRESS]);
        assert_eq!(gear.short_address, 3);
        assert_eq!(gear.forward([0xfd, opcode::QUERY_CONTROL_GEAR_PRESENT]), None);
        assert_eq!(gear.forward([0x07, opcode::QUERY_CONTROL_GEAR_PRESENT]), Some(YES));
        assert_eq!(gear.forward([0x09, opcode::QUERY_CONTROL_GEAR_PRESENT]), None);
        twice(&mut gear, [0x07, opcode::ADD_TO_GROUP + 2]);
        gear.forward([0x84, 0x40]);
        assert_eq!(gear.actual_level, 0x40);
        assert_eq!(gear.forward([0x07, opcode::QUERY_GROUPS_0_7]), Some(0x04));
    }

    #[test]
    fn memory_bank_access() {
        let mut gear = SimGear::new(1);
        gear.forward([opcode::DTR1, 0]);
        gear.forward([opcode::DTR0, 0x20]);
        assert_eq!(gear.forward([0xff, opcode::READ_MEMORY_LOCATION]), Some(6));
        assert_eq!(gear.forward([0xff, opcode::READ_MEMORY_LOCATION]), Some(0x01));
        assert_eq!(gear.forward([0xff, opcode::READ_MEMORY_LOCATION]), None);
        assert_eq!(gear.dtr0, 0x23);

        gear.forward([opcode::DTR1, 1]);
        gear.forward([opcode::DTR0, 0x07]);
        assert_eq!(gear.forward([opcode::WRITE_MEMORY_LOCATION, 0x90]), None);
        gear.forward([opcode::DTR0, 0x07]);
        twice(&mut gear, [0xff, opcode::ENABLE_WRITE_MEMORY]);
        assert_eq!(gear.forward([opcode::WRITE_MEMORY_LOCATION, 0x90]), Some(0x90));
        assert_eq!(gear.max_level, 0x90);
        assert_eq!(gear.parameter(ParameterSelector::MaxLevel), 0x90);
    }

    #[test]
    fn random_address_selection() {
        let mut gear = SimGear::new(7);
        twice(&mut gear, [opcode::INITIALISE, 0x00]);
        twice(&mut gear, [opcode::RANDOMISE, 0x00]);
        let long = gear.random_address;
        gear.forward([opcode::SEARCHADDRH, (long >> 16) as u8]);
        gear.forward([opcode::SEARCHADDRM, (long >> 8) as u8]);
        gear.forward([opcode::SEARCHADDRL, long as u8]);
        assert_eq!(gear.forward([opcode::COMPARE, 0x00]), Some(YES));
        gear.forward([opcode::PROGRAM_SHORT_ADDRESS, 0x0b]);
        assert_eq!(gear.forward([opcode::QUERY_SHORT_ADDRESS, 0x00]), Some(0x0b));
        gear.forward([opcode::WITHDRAW, 0x00]);
        assert_eq!(gear.forward([opcode::COMPARE, 0x00]), None);
        gear.forward([opcode::TERMINATE, 0x00]);
        assert_eq!(gear.initialisation_state, InitialisationState::Disabled);
    }
}
