use crate::common::address::{AddressMode, Long};
use crate::common::cmd_defs::AddressByte;
use crate::error::DaliError;
use crate::gear::cmd_defs::opcode;

/// Sequence tag assigned when a message is submitted
pub type Ticket = u16;

/// Who gets the outcome of an exchange
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Origin {
    Application,
    Commissioning,
}

/// Outbound command, one exchange on the bus
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Message {
    pub address: AddressMode,
    /// Opcode for addressed commands, data byte for special commands,
    /// arc power level when `arc_power` is set
    pub opcode: u8,
    pub expects_response: bool,
    pub send_twice: bool,
    pub arc_power: bool,
    /// Allow one automatic retry on failure
    pub retry: bool,
    pub origin: Origin,
    pub tag: Ticket,
}

impl Message {
    pub fn new(address: AddressMode, opcode: u8) -> Message {
        Message {
            address,
            opcode,
            expects_response: false,
            send_twice: false,
            arc_power: false,
            retry: true,
            origin: Origin::Application,
            tag: 0,
        }
    }

    pub fn answer(mut self) -> Message {
        self.expects_response = true;
        self
    }

    pub fn twice(mut self) -> Message {
        self.send_twice = true;
        self
    }

    pub fn no_retry(mut self) -> Message {
        self.retry = false;
        self
    }

    pub(crate) fn with_origin(mut self, origin: Origin) -> Message {
        self.origin = origin;
        self
    }

    /// Forward frames needed for this message.
    ///
    /// `search` is the search address currently loaded in the devices, if
    /// known. For `Random` targets only the search address bytes that
    /// differ are sent, and `search` is updated.
    pub fn frames(&self, search: &mut Option<Long>) -> Vec<[u8; 2]> {
        match self.address {
            AddressMode::Special(cmd) => vec![[cmd, self.opcode]],
            AddressMode::Random(long) => {
                let mut frames = Vec::with_capacity(4);
                let diff = match *search {
                    Some(current) => long ^ current,
                    None => 0xff_ffff,
                };
                if (diff & 0xff0000) != 0 {
                    frames.push([opcode::SEARCHADDRH, (long >> 16 & 0xff) as u8]);
                }
                if (diff & 0x00ff00) != 0 {
                    frames.push([opcode::SEARCHADDRM, (long >> 8 & 0xff) as u8]);
                }
                if (diff & 0x0000ff) != 0 {
                    frames.push([opcode::SEARCHADDRL, (long & 0xff) as u8]);
                }
                *search = Some(long);
                frames.push([self.opcode, 0x00]);
                frames
            }
            addr => {
                // Only special modes lack an address byte
                let byte = addr.address_byte().unwrap_or(AddressByte(0xff));
                let byte = if self.arc_power { byte.arc_power() } else { byte };
                vec![[byte.0, self.opcode]]
            }
        }
    }
}

/// Result of a request as seen by the application
pub type Reply = Result<Option<u8>, DaliError>;

/// Inbound message, the answer to an outbound one
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub tag: Ticket,
    pub address: AddressMode,
    pub reply: Reply,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    FramingError,
    ResponseTimeout,
    TransmitTimeout,
    Codec(crate::bus::codec::CodecError),
}

impl From<FailureKind> for DaliError {
    fn from(kind: FailureKind) -> DaliError {
        match kind {
            FailureKind::FramingError => DaliError::FramingError,
            FailureKind::ResponseTimeout => DaliError::ResponseTimeout,
            FailureKind::TransmitTimeout => DaliError::TransmitTimeout,
            FailureKind::Codec(e) => DaliError::Codec(e),
        }
    }
}

/// Bus level outcome of one exchange, reported by the transmit task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Success(Option<u8>),
    Failure(FailureKind),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::address::{Group, Short};

    #[test]
    fn addressed_frames() {
        let mut search = None;
        let msg = Message::new(Short::new(5).into(), 0x05);
        assert_eq!(msg.frames(&mut search), vec![[0x0b, 0x05]]);
        let mut msg = Message::new(Group::new(2).into(), 0x80);
        msg.arc_power = true;
        assert_eq!(msg.frames(&mut search), vec![[0x84, 0x80]]);
        let msg = Message::new(AddressMode::Broadcast, 0x00);
        assert_eq!(msg.frames(&mut search), vec![[0xff, 0x00]]);
        let msg = Message::new(AddressMode::Special(0xa3), 0x12);
        assert_eq!(msg.frames(&mut search), vec![[0xa3, 0x12]]);
        assert_eq!(search, None);
    }

    #[test]
    fn random_frames_use_cached_search_address() {
        let mut search = None;
        let msg = Message::new(AddressMode::Random(0x123456), opcode::COMPARE);
        assert_eq!(
            msg.frames(&mut search),
            vec![
                [opcode::SEARCHADDRH, 0x12],
                [opcode::SEARCHADDRM, 0x34],
                [opcode::SEARCHADDRL, 0x56],
                [opcode::COMPARE, 0x00]
            ]
        );
        assert_eq!(search, Some(0x123456));
        let msg = Message::new(AddressMode::Random(0x123400), opcode::COMPARE);
        assert_eq!(
            msg.frames(&mut search),
            vec![[opcode::SEARCHADDRL, 0x00], [opcode::COMPARE, 0x00]]
        );
        let msg = Message::new(AddressMode::Random(0x123400), opcode::WITHDRAW);
        assert_eq!(msg.frames(&mut search), vec![[opcode::WITHDRAW, 0x00]]);
    }
}
