/// First byte of a forward frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressByte(pub u8);

impl AddressByte {
    /// Clear the selector bit, the second byte is then a direct arc power level
    pub fn arc_power(self) -> AddressByte {
        AddressByte(self.0 & 0xfe)
    }
}

/// "No value" for levels, scenes and addresses
pub const MASK: u8 = 0xff;

/// YES answer in a backward frame
pub const YES: u8 = 0xff;
