use crate::bus::message::Message;
use crate::common::address::{AddressMode, Long};

/// Raw opcodes. Gear commands are the second byte of an addressed frame,
/// special commands the first byte.
pub mod opcode {
    pub const OFF: u8 = 0x00;
    pub const UP: u8 = 0x01;
    pub const DOWN: u8 = 0x02;
    pub const STEP_UP: u8 = 0x03;
    pub const STEP_DOWN: u8 = 0x04;
    pub const RECALL_MAX_LEVEL: u8 = 0x05;
    pub const RECALL_MIN_LEVEL: u8 = 0x06;
    pub const GO_TO_LAST_ACTIVE_LEVEL: u8 = 0x0a;
    pub const GOTO_SCENE: u8 = 0x10;
    pub const RESET: u8 = 0x20;
    pub const STORE_ACTUAL_LEVEL_IN_DTR0: u8 = 0x21;
    pub const SET_OPERATING_MODE: u8 = 0x23;
    pub const RESET_MEMORY_BANK: u8 = 0x24;
    pub const IDENTIFY_DEVICE: u8 = 0x25;
    pub const SET_MAX_LEVEL: u8 = 0x2a;
    pub const SET_MIN_LEVEL: u8 = 0x2b;
    pub const SET_SYSTEM_FAILURE_LEVEL: u8 = 0x2c;
    pub const SET_POWER_ON_LEVEL: u8 = 0x2d;
    pub const SET_FADE_TIME: u8 = 0x2e;
    pub const SET_FADE_RATE: u8 = 0x2f;
    pub const SET_SCENE: u8 = 0x40;
    pub const REMOVE_FROM_SCENE: u8 = 0x50;
    pub const ADD_TO_GROUP: u8 = 0x60;
    pub const REMOVE_FROM_GROUP: u8 = 0x70;
    pub const SET_SHORT_ADDRESS: u8 = 0x80;
    pub const ENABLE_WRITE_MEMORY: u8 = 0x81;
    pub const QUERY_STATUS: u8 = 0x90;
    pub const QUERY_CONTROL_GEAR_PRESENT: u8 = 0x91;
    pub const QUERY_LAMP_FAILURE: u8 = 0x92;
    pub const QUERY_LAMP_POWER_ON: u8 = 0x93;
    pub const QUERY_MISSING_SHORT_ADDRESS: u8 = 0x96;
    pub const QUERY_VERSION_NUMBER: u8 = 0x97;
    pub const QUERY_CONTENT_DTR0: u8 = 0x98;
    pub const QUERY_DEVICE_TYPE: u8 = 0x99;
    pub const QUERY_PHYSICAL_MINIMUM: u8 = 0x9a;
    pub const QUERY_CONTENT_DTR1: u8 = 0x9c;
    pub const QUERY_ACTUAL_LEVEL: u8 = 0xa0;
    pub const QUERY_MAX_LEVEL: u8 = 0xa1;
    pub const QUERY_MIN_LEVEL: u8 = 0xa2;
    pub const QUERY_POWER_ON_LEVEL: u8 = 0xa3;
    pub const QUERY_SYSTEM_FAILURE_LEVEL: u8 = 0xa4;
    pub const QUERY_FADE: u8 = 0xa5;
    pub const QUERY_SCENE_LEVEL: u8 = 0xb0;
    pub const QUERY_GROUPS_0_7: u8 = 0xc0;
    pub const QUERY_GROUPS_8_15: u8 = 0xc1;
    pub const QUERY_RANDOM_ADDRESS_H: u8 = 0xc2;
    pub const QUERY_RANDOM_ADDRESS_M: u8 = 0xc3;
    pub const QUERY_RANDOM_ADDRESS_L: u8 = 0xc4;
    pub const READ_MEMORY_LOCATION: u8 = 0xc5;

    // Special commands
    pub const TERMINATE: u8 = 0xa1;
    pub const DTR0: u8 = 0xa3;
    pub const INITIALISE: u8 = 0xa5;
    pub const RANDOMISE: u8 = 0xa7;
    pub const COMPARE: u8 = 0xa9;
    pub const WITHDRAW: u8 = 0xab;
    pub const PING: u8 = 0xad;
    pub const SEARCHADDRH: u8 = 0xb1;
    pub const SEARCHADDRM: u8 = 0xb3;
    pub const SEARCHADDRL: u8 = 0xb5;
    pub const PROGRAM_SHORT_ADDRESS: u8 = 0xb7;
    pub const VERIFY_SHORT_ADDRESS: u8 = 0xb9;
    pub const QUERY_SHORT_ADDRESS: u8 = 0xbb;
    pub const ENABLE_DEVICE_TYPE: u8 = 0xc1;
    pub const DTR1: u8 = 0xc3;
    pub const DTR2: u8 = 0xc5;
    pub const WRITE_MEMORY_LOCATION: u8 = 0xc7;
    pub const WRITE_MEMORY_LOCATION_NO_REPLY: u8 = 0xc9;

    /// INITIALISE data selecting all devices
    pub const INITIALISE_ALL: u8 = 0x00;
    /// INITIALISE data selecting devices without short address
    pub const INITIALISE_NO_ADDR: u8 = 0xff;
}

macro_rules! apply_attr {
    ($msg: expr) => {$msg};
    ($msg: expr, Answer) => {$msg.answer()};
    ($msg: expr, Twice) => {$msg.twice()};
}

macro_rules! dev_cmd_def {
    ($sym: ident, $opcode: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym<A>(addr: A) -> Message
        where
            A: Into<AddressMode>,
        {
            apply_attr!(Message::new(addr.into(), $opcode) $(,$attr)?)
        }
    };
}

macro_rules! offset_cmd_def {
    ($sym: ident, $opcode: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym<A>(addr: A, offset: u8) -> Message
        where
            A: Into<AddressMode>,
        {
            assert!(offset < 16);
            apply_attr!(Message::new(addr.into(), $opcode + offset) $(,$attr)?)
        }
    };
}

macro_rules! special_cmd_def {
    ($sym: ident, $byte1: expr, $byte2: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym() -> Message {
            apply_attr!(Message::new(AddressMode::Special($byte1), $byte2) $(,$attr)?)
        }
    };
}

macro_rules! special_data_cmd_def {
    ($sym: ident, $byte1: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym(data: u8) -> Message {
            apply_attr!(Message::new(AddressMode::Special($byte1), data) $(,$attr)?)
        }
    };
}

macro_rules! random_cmd_def {
    ($sym: ident, $byte1: expr $(,$attr: ident)?) => {
        #[allow(non_snake_case)]
        #[inline(always)]
        pub fn $sym(long: Long) -> Message {
            apply_attr!(Message::new(AddressMode::Random(long), $byte1) $(,$attr)?)
        }
    };
}

/// Direct arc power control
#[allow(non_snake_case)]
#[inline(always)]
pub fn DAPC<A>(addr: A, level: u8) -> Message
where
    A: Into<AddressMode>,
{
    let mut msg = Message::new(addr.into(), level);
    msg.arc_power = true;
    msg
}

dev_cmd_def!(OFF, opcode::OFF);
dev_cmd_def!(UP, opcode::UP);
dev_cmd_def!(DOWN, opcode::DOWN);
dev_cmd_def!(STEP_UP, opcode::STEP_UP);
dev_cmd_def!(STEP_DOWN, opcode::STEP_DOWN);
dev_cmd_def!(RECALL_MAX_LEVEL, opcode::RECALL_MAX_LEVEL);
dev_cmd_def!(RECALL_MIN_LEVEL, opcode::RECALL_MIN_LEVEL);
dev_cmd_def!(GO_TO_LAST_ACTIVE_LEVEL, opcode::GO_TO_LAST_ACTIVE_LEVEL);

offset_cmd_def!(GOTO_SCENE, opcode::GOTO_SCENE);

dev_cmd_def!(RESET, opcode::RESET, Twice);
dev_cmd_def!(STORE_ACTUAL_LEVEL_IN_DTR0, opcode::STORE_ACTUAL_LEVEL_IN_DTR0, Twice);
dev_cmd_def!(SET_OPERATING_MODE, opcode::SET_OPERATING_MODE, Twice);
dev_cmd_def!(RESET_MEMORY_BANK, opcode::RESET_MEMORY_BANK, Twice);
dev_cmd_def!(IDENTIFY_DEVICE, opcode::IDENTIFY_DEVICE, Twice);
dev_cmd_def!(SET_MAX_LEVEL, opcode::SET_MAX_LEVEL, Twice);
dev_cmd_def!(SET_MIN_LEVEL, opcode::SET_MIN_LEVEL, Twice);
dev_cmd_def!(SET_SYSTEM_FAILURE_LEVEL, opcode::SET_SYSTEM_FAILURE_LEVEL, Twice);
dev_cmd_def!(SET_POWER_ON_LEVEL, opcode::SET_POWER_ON_LEVEL, Twice);
dev_cmd_def!(SET_FADE_TIME, opcode::SET_FADE_TIME, Twice);
dev_cmd_def!(SET_FADE_RATE, opcode::SET_FADE_RATE, Twice);

offset_cmd_def!(SET_SCENE, opcode::SET_SCENE, Twice);
offset_cmd_def!(REMOVE_FROM_SCENE, opcode::REMOVE_FROM_SCENE, Twice);
offset_cmd_def!(ADD_TO_GROUP, opcode::ADD_TO_GROUP, Twice);
offset_cmd_def!(REMOVE_FROM_GROUP, opcode::REMOVE_FROM_GROUP, Twice);

dev_cmd_def!(SET_SHORT_ADDRESS, opcode::SET_SHORT_ADDRESS, Twice);
dev_cmd_def!(ENABLE_WRITE_MEMORY, opcode::ENABLE_WRITE_MEMORY, Twice);

dev_cmd_def!(QUERY_STATUS, opcode::QUERY_STATUS, Answer);
dev_cmd_def!(QUERY_CONTROL_GEAR_PRESENT, opcode::QUERY_CONTROL_GEAR_PRESENT, Answer);
dev_cmd_def!(QUERY_LAMP_FAILURE, opcode::QUERY_LAMP_FAILURE, Answer);
dev_cmd_def!(QUERY_LAMP_POWER_ON, opcode::QUERY_LAMP_POWER_ON, Answer);
dev_cmd_def!(QUERY_MISSING_SHORT_ADDRESS, opcode::QUERY_MISSING_SHORT_ADDRESS, Answer);
dev_cmd_def!(QUERY_VERSION_NUMBER, opcode::QUERY_VERSION_NUMBER, Answer);
dev_cmd_def!(QUERY_CONTENT_DTR0, opcode::QUERY_CONTENT_DTR0, Answer);
dev_cmd_def!(QUERY_DEVICE_TYPE, opcode::QUERY_DEVICE_TYPE, Answer);
dev_cmd_def!(QUERY_PHYSICAL_MINIMUM, opcode::QUERY_PHYSICAL_MINIMUM, Answer);
dev_cmd_def!(QUERY_ACTUAL_LEVEL, opcode::QUERY_ACTUAL_LEVEL, Answer);
dev_cmd_def!(QUERY_MAX_LEVEL, opcode::QUERY_MAX_LEVEL, Answer);
dev_cmd_def!(QUERY_MIN_LEVEL, opcode::QUERY_MIN_LEVEL, Answer);
dev_cmd_def!(QUERY_POWER_ON_LEVEL, opcode::QUERY_POWER_ON_LEVEL, Answer);
dev_cmd_def!(QUERY_SYSTEM_FAILURE_LEVEL, opcode::QUERY_SYSTEM_FAILURE_LEVEL, Answer);
dev_cmd_def!(QUERY_FADE, opcode::QUERY_FADE, Answer);
offset_cmd_def!(QUERY_SCENE_LEVEL, opcode::QUERY_SCENE_LEVEL, Answer);
dev_cmd_def!(QUERY_GROUPS_0_7, opcode::QUERY_GROUPS_0_7, Answer);
dev_cmd_def!(QUERY_GROUPS_8_15, opcode::QUERY_GROUPS_8_15, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_H, opcode::QUERY_RANDOM_ADDRESS_H, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_M, opcode::QUERY_RANDOM_ADDRESS_M, Answer);
dev_cmd_def!(QUERY_RANDOM_ADDRESS_L, opcode::QUERY_RANDOM_ADDRESS_L, Answer);
dev_cmd_def!(READ_MEMORY_LOCATION, opcode::READ_MEMORY_LOCATION, Answer);

special_cmd_def!(TERMINATE, opcode::TERMINATE, 0x00);
special_cmd_def!(INITIALISE_ALL, opcode::INITIALISE, opcode::INITIALISE_ALL, Twice);
special_cmd_def!(INITIALISE_NO_ADDR, opcode::INITIALISE, opcode::INITIALISE_NO_ADDR, Twice);
special_cmd_def!(RANDOMISE, opcode::RANDOMISE, 0x00, Twice);
special_cmd_def!(COMPARE, opcode::COMPARE, 0x00, Answer);
special_cmd_def!(WITHDRAW, opcode::WITHDRAW, 0x00);
special_cmd_def!(PING, opcode::PING, 0x00);
special_cmd_def!(QUERY_SHORT_ADDRESS, opcode::QUERY_SHORT_ADDRESS, 0x00, Answer);

special_data_cmd_def!(PROGRAM_SHORT_ADDRESS, opcode::PROGRAM_SHORT_ADDRESS);
special_data_cmd_def!(VERIFY_SHORT_ADDRESS, opcode::VERIFY_SHORT_ADDRESS, Answer);
special_data_cmd_def!(ENABLE_DEVICE_TYPE, opcode::ENABLE_DEVICE_TYPE);
special_data_cmd_def!(DTR0, opcode::DTR0);
special_data_cmd_def!(DTR1, opcode::DTR1);
special_data_cmd_def!(DTR2, opcode::DTR2);
special_data_cmd_def!(WRITE_MEMORY_LOCATION, opcode::WRITE_MEMORY_LOCATION, Answer);
special_data_cmd_def!(WRITE_MEMORY_LOCATION_NO_REPLY, opcode::WRITE_MEMORY_LOCATION_NO_REPLY);

// Commands to the device selected by a random address
random_cmd_def!(COMPARE_AT, opcode::COMPARE, Answer);
random_cmd_def!(WITHDRAW_AT, opcode::WITHDRAW);
random_cmd_def!(QUERY_SHORT_ADDRESS_AT, opcode::QUERY_SHORT_ADDRESS, Answer);

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::address::{Group, Short};

    #[test]
    fn command_attributes() {
        let msg = QUERY_STATUS(Short::new(5));
        assert!(msg.expects_response);
        assert!(!msg.send_twice);
        assert_eq!(msg.frames(&mut None), vec![[0x0b, 0x90]]);

        let msg = ADD_TO_GROUP(AddressMode::Broadcast, 3);
        assert!(msg.send_twice);
        assert_eq!(msg.frames(&mut None), vec![[0xff, 0x63]]);

        let msg = DAPC(Group::new(1), 0x80);
        assert_eq!(msg.frames(&mut None), vec![[0x82, 0x80]]);

        let msg = INITIALISE_NO_ADDR();
        assert!(msg.send_twice);
        assert_eq!(msg.frames(&mut None), vec![[0xa5, 0xff]]);

        let msg = PROGRAM_SHORT_ADDRESS(Short::new(2).bus_address());
        assert_eq!(msg.frames(&mut None), vec![[0xb7, 0x05]]);
    }
}
