use super::cmd_defs::AddressByte;
use core::ops::RangeInclusive;
use core::str::FromStr;
use serde_derive::{Deserialize, Serialize};

/// Value used for display, normally 1 based
pub trait DisplayValue {
    fn display_value(&self) -> u8;
    fn from_display_value<A>(value: A) -> Result<Self, AddressError>
    where
        A: TryInto<u8>,
        Self: Sized;
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum AddressError {
    NotShort,
    NotGroup,
    InvalidAddress,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        match self {
            AddressError::NotShort => write!(fmt, "Not a short address"),
            AddressError::NotGroup => write!(fmt, "Not a group address"),
            AddressError::InvalidAddress => write!(fmt, "InvalidAddress"),
        }
    }
}

impl std::error::Error for AddressError {}

fn convert_display_value<A>(a: A, range: RangeInclusive<u8>) -> Result<u8, AddressError>
where
    A: TryInto<u8>,
{
    let Ok(a) = a.try_into() else {
        return Err(AddressError::InvalidAddress);
    };
    if !range.contains(&a) {
        return Err(AddressError::InvalidAddress);
    }
    Ok(a - range.start())
}

/// Short address 0..=63
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Short(u8);

impl Short {
    const DISPLAY_RANGE: RangeInclusive<u8> = 1..=64;
    pub const MAX: u8 = 63;

    pub fn new(a: u8) -> Short {
        assert!(a <= Self::MAX);
        Short(a)
    }

    pub fn try_new(a: u8) -> Result<Short, AddressError> {
        if a <= Self::MAX {
            Ok(Short(a))
        } else {
            Err(AddressError::NotShort)
        }
    }

    /// Address 0..64
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Address as used in PROGRAM_SHORT_ADDRESS and returned by QUERY_SHORT_ADDRESS
    pub fn bus_address(&self) -> u8 {
        (self.0 << 1) | 1
    }
}

impl From<Short> for AddressByte {
    fn from(short: Short) -> Self {
        AddressByte((short.0 << 1) | 1)
    }
}

impl DisplayValue for Short {
    fn display_value(&self) -> u8 {
        self.0 + Self::DISPLAY_RANGE.start()
    }
    fn from_display_value<A>(a: A) -> Result<Short, AddressError>
    where
        A: TryInto<u8>,
    {
        convert_display_value(a, Self::DISPLAY_RANGE).map(Short)
    }
}

impl std::convert::TryFrom<AddressMode> for Short {
    type Error = AddressError;
    fn try_from(addr: AddressMode) -> Result<Short, Self::Error> {
        if let AddressMode::Short(s) = addr {
            Ok(s)
        } else {
            Err(AddressError::NotShort)
        }
    }
}

impl std::fmt::Display for Short {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        self.display_value().fmt(fmt)
    }
}

impl FromStr for Short {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u8::from_str(s).map_or(Err(AddressError::InvalidAddress), |a| {
            Self::from_display_value(a)
        })
    }
}

/// 24-bit random address
pub type Long = u32;

pub const LONG_MAX: Long = 0xff_ffff;

/// Group address 0..=15
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Group(u8);

impl Group {
    const DISPLAY_RANGE: RangeInclusive<u8> = 1..=16;
    pub const MAX: u8 = 15;

    pub fn new(a: u8) -> Group {
        assert!(a <= Self::MAX);
        Group(a)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::convert::TryFrom<AddressMode> for Group {
    type Error = AddressError;
    fn try_from(addr: AddressMode) -> Result<Group, Self::Error> {
        if let AddressMode::Group(g) = addr {
            Ok(g)
        } else {
            Err(AddressError::NotGroup)
        }
    }
}

impl From<Group> for AddressByte {
    fn from(group: Group) -> AddressByte {
        AddressByte((group.0 << 1) | 0x81)
    }
}

impl DisplayValue for Group {
    fn display_value(&self) -> u8 {
        self.0 + Self::DISPLAY_RANGE.start()
    }

    fn from_display_value<A>(a: A) -> Result<Group, AddressError>
    where
        A: TryInto<u8>,
    {
        convert_display_value(a, Self::DISPLAY_RANGE).map(Group)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::result::Result<(), std::fmt::Error> {
        self.display_value().fmt(fmt)
    }
}

impl FromStr for Group {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u8::from_str(s).map_or(Err(AddressError::InvalidAddress), |a| {
            Self::from_display_value(a)
        })
    }
}

/// How a forward frame is addressed.
///
/// `Special` and `Random` are only valid for special commands. A `Random`
/// target is reached by loading the search address before the command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressMode {
    Short(Short),
    Group(Group),
    Broadcast,
    BroadcastUnaddressed,
    /// First byte of the frame is the special command
    Special(u8),
    /// Device selected by its 24-bit random address
    Random(Long),
}

impl AddressMode {
    /// Decode the first byte of a forward frame
    pub fn from_bus_address(bus: u8) -> Result<AddressMode, AddressError> {
        match bus >> 1 {
            a @ 0..=0x3f => Ok(AddressMode::Short(Short(a))),
            a @ 0x40..=0x4f => Ok(AddressMode::Group(Group(a & 0x0f))),
            0x7e => Ok(AddressMode::BroadcastUnaddressed),
            0x7f => Ok(AddressMode::Broadcast),
            0x50..=0x6f if bus & 1 == 1 => Ok(AddressMode::Special(bus)),
            _ => Err(AddressError::InvalidAddress),
        }
    }

    /// Address byte for gear commands. None for special commands.
    pub fn address_byte(&self) -> Option<AddressByte> {
        match *self {
            AddressMode::Short(a) => Some(a.into()),
            AddressMode::Group(a) => Some(a.into()),
            AddressMode::Broadcast => Some(AddressByte(0xff)),
            AddressMode::BroadcastUnaddressed => Some(AddressByte(0xfd)),
            AddressMode::Special(_) | AddressMode::Random(_) => None,
        }
    }

    /// Targets more than one device, or no device in particular
    pub fn is_multicast(&self) -> bool {
        !matches!(self, AddressMode::Short(_))
    }
}

impl std::convert::From<Short> for AddressMode {
    fn from(a: Short) -> Self {
        AddressMode::Short(a)
    }
}

impl std::convert::From<Group> for AddressMode {
    fn from(a: Group) -> Self {
        AddressMode::Group(a)
    }
}

impl std::cmp::PartialEq<Short> for AddressMode {
    fn eq(&self, other: &Short) -> bool {
        match self {
            AddressMode::Short(a) => a == other,
            _ => false,
        }
    }
}

impl std::cmp::PartialEq<Group> for AddressMode {
    fn eq(&self, other: &Group) -> bool {
        match self {
            AddressMode::Group(a) => a == other,
            _ => false,
        }
    }
}

impl std::fmt::Display for AddressMode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AddressMode::Short(a) => write!(fmt, "S{}", a),
            AddressMode::Group(g) => write!(fmt, "G{}", g),
            AddressMode::Broadcast => write!(fmt, "BC"),
            AddressMode::BroadcastUnaddressed => write!(fmt, "BCU"),
            AddressMode::Special(c) => write!(fmt, "SP{:02x}", c),
            AddressMode::Random(l) => write!(fmt, "R{:06x}", l),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn short_address_test() {
        let a: Short = Short::new(1);
        let b: AddressMode = a.into();
        assert_eq!(b, Short::new(1));
        assert_eq!(b, AddressMode::from_bus_address(0x02).unwrap());

        let a = Short::new(63);
        let b: AddressMode = a.into();
        assert_eq!(b, AddressMode::from_bus_address(0x3f << 1).unwrap());
        assert_eq!(Short::try_from(b).unwrap(), Short::new(63));
        assert_eq!(Short::try_new(64), Err(AddressError::NotShort));
        assert_eq!(Short::new(5).bus_address(), 0x0b);
    }

    #[test]
    fn group_address_test() {
        let a: Group = Group::new(0);
        let b: AddressMode = a.into();
        assert_eq!(b, Group::new(0));
        assert_eq!(b, AddressMode::from_bus_address(0x80).unwrap());

        let a = Group::from_display_value(16).unwrap();
        let b: AddressMode = a.into();
        assert_eq!(b, Group::new(15));
        assert_eq!(b, AddressMode::from_bus_address(0x9f).unwrap());
        assert_eq!(Group::try_from(b).unwrap(), Group::new(15));
        assert!(Group::from_display_value(17).is_err());
    }

    #[test]
    fn short_and_group_are_disjoint() {
        for s in 0..=Short::MAX {
            let byte = AddressByte::from(Short::new(s)).0;
            assert_eq!(byte & 0x80, 0);
        }
        for g in 0..=Group::MAX {
            let byte = AddressByte::from(Group::new(g)).0;
            assert_eq!(byte & 0x80, 0x80);
            assert!(matches!(
                AddressMode::from_bus_address(byte),
                Ok(AddressMode::Group(_))
            ));
        }
    }

    #[test]
    fn broadcast_and_special() {
        assert_eq!(
            AddressMode::from_bus_address(0xff),
            Ok(AddressMode::Broadcast)
        );
        assert_eq!(
            AddressMode::from_bus_address(0xfd),
            Ok(AddressMode::BroadcastUnaddressed)
        );
        assert_eq!(
            AddressMode::from_bus_address(0xa1),
            Ok(AddressMode::Special(0xa1))
        );
        assert_eq!(AddressMode::Broadcast.address_byte(), Some(AddressByte(0xff)));
        assert_eq!(AddressMode::Special(0xa9).address_byte(), None);
        assert_eq!("64".parse::<Short>(), Ok(Short::new(63)));
    }
}
