use crate::bus::message::{Message, Reply};
use crate::common::address::Short;
use crate::error::DaliError;
use crate::gear::cmd_defs as cmd;
use crate::utils::parameters::{self, MemoryBank, ParameterError, ParameterSelector};
use std::error::Error;
use std::fmt;

#[derive(Clone, PartialEq)]
pub enum MemoryError {
    LengthMismatch,
    InvalidMemoryArea,
    ReadOnly,
    /// The device answered a write with a different value
    WriteRejected { wrote: u8, read: u8 },
    Parameter(ParameterError),
}

impl Error for MemoryError {}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::LengthMismatch => write!(f, "DTR0 doesn't match read length"),
            MemoryError::InvalidMemoryArea => {
                write!(f, "Trying to read an unimplemented memory area")
            }
            MemoryError::ReadOnly => write!(f, "Memory bank is read only"),
            MemoryError::WriteRejected { wrote, read } => {
                write!(f, "Wrote 0x{:02x} but device returned 0x{:02x}", wrote, read)
            }
            MemoryError::Parameter(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl fmt::Debug for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<ParameterError> for MemoryError {
    fn from(err: ParameterError) -> MemoryError {
        MemoryError::Parameter(err)
    }
}

// READ_MEMORY_LOCATION and WRITE_MEMORY_LOCATION advance DTR0 in the
// device, so a repeated exchange would touch the next cell.

fn select(bank: MemoryBank, offset: u8) -> [Message; 2] {
    [cmd::DTR1(bank.number()), cmd::DTR0(offset)]
}

/// Messages reading one parameter. The last reply is the value.
pub fn read_plan(addr: Short, selector: ParameterSelector) -> Result<Vec<Message>, MemoryError> {
    let location = parameters::location(selector)?;
    let mut plan = select(location.bank, location.offset).to_vec();
    plan.push(cmd::READ_MEMORY_LOCATION(addr).no_retry());
    Ok(plan)
}

/// Messages writing one parameter. The last reply echoes the value written.
pub fn write_plan(
    addr: Short,
    selector: ParameterSelector,
    value: u8,
) -> Result<Vec<Message>, MemoryError> {
    let location = parameters::location(selector)?;
    if !location.bank.writable() {
        return Err(MemoryError::ReadOnly);
    }
    let mut plan = select(location.bank, location.offset).to_vec();
    plan.push(cmd::ENABLE_WRITE_MEMORY(addr));
    plan.push(cmd::WRITE_MEMORY_LOCATION(value).no_retry());
    Ok(plan)
}

/// Messages reading `length` consecutive cells, followed by a DTR0 query
/// used to check how far the device got.
pub fn read_range(
    addr: Short,
    bank: MemoryBank,
    start: u8,
    length: u8,
) -> Result<Vec<Message>, MemoryError> {
    if start as u16 + length as u16 > bank.last_location() as u16 + 1 {
        return Err(MemoryError::InvalidMemoryArea);
    }
    let mut plan = select(bank, start).to_vec();
    for _ in 0..length {
        plan.push(cmd::READ_MEMORY_LOCATION(addr).no_retry());
    }
    plan.push(cmd::QUERY_CONTENT_DTR0(addr));
    Ok(plan)
}

/// Value returned by the last message of a read plan
pub fn read_result(replies: &[Reply]) -> Result<u8, DaliError> {
    match replies.last() {
        Some(Ok(Some(value))) => Ok(*value),
        Some(Ok(None)) => Err(DaliError::ResponseTimeout),
        Some(Err(e)) => Err(e.clone()),
        None => Err(DaliError::Memory(MemoryError::InvalidMemoryArea)),
    }
}

/// Check the echo returned by the last message of a write plan
pub fn write_result(value: u8, replies: &[Reply]) -> Result<(), DaliError> {
    let read = read_result(replies)?;
    if read != value {
        return Err(DaliError::Memory(MemoryError::WriteRejected { wrote: value, read }));
    }
    Ok(())
}

/// Collect the cells of a range read. Data ends at the first cell
/// without an answer.
pub fn range_result(start: u8, length: u8, replies: &[Reply]) -> Result<Vec<u8>, DaliError> {
    let reads = replies
        .get(2..2 + length as usize)
        .ok_or(DaliError::Memory(MemoryError::LengthMismatch))?;
    let mut data = Vec::new();
    for reply in reads {
        match reply {
            Ok(Some(d)) => data.push(*d),
            Ok(None) | Err(DaliError::ResponseTimeout) => break,
            Err(e) => return Err(e.clone()),
        }
    }
    // Every read advances DTR0, answered or not
    let dtr = read_result(replies)?;
    let expected = start.saturating_add(length);
    if dtr != expected {
        return Err(DaliError::Memory(MemoryError::LengthMismatch));
    }
    Ok(data)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::address::AddressMode;
    use crate::drivers::simulator::gear::SimGear;
    use crate::gear::cmd_defs::opcode;

    #[test]
    fn read_plan_selects_bank_and_offset() {
        let plan = read_plan(Short::new(3), ParameterSelector::MaxLevel).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].frames(&mut None), vec![[opcode::DTR1, 1]]);
        assert_eq!(plan[1].frames(&mut None), vec![[opcode::DTR0, 0x07]]);
        assert_eq!(plan[2].address, AddressMode::Short(Short::new(3)));
        assert_eq!(plan[2].opcode, opcode::READ_MEMORY_LOCATION);
        assert!(plan[2].expects_response);
        assert!(!plan[2].retry);
    }

    #[test]
    fn write_plan_enables_write() {
        let plan = write_plan(Short::new(3), ParameterSelector::Scene(2), 0x80).unwrap();
        assert_eq!(plan[1].frames(&mut None), vec![[opcode::DTR0, 0x12]]);
        assert_eq!(plan[2].opcode, opcode::ENABLE_WRITE_MEMORY);
        assert!(plan[2].send_twice);
        assert_eq!(
            plan[3].frames(&mut None),
            vec![[opcode::WRITE_MEMORY_LOCATION, 0x80]]
        );
        assert_eq!(
            write_plan(Short::new(3), ParameterSelector::GearType, 1),
            Err(MemoryError::ReadOnly)
        );
        assert_eq!(
            write_result(0x80, &[Ok(None), Ok(None), Ok(None), Ok(Some(0x7f))]),
            Err(DaliError::Memory(MemoryError::WriteRejected {
                wrote: 0x80,
                read: 0x7f
            }))
        );
    }

    #[test]
    fn range_checks_dtr() {
        let plan = read_range(Short::new(0), MemoryBank::Bank0, 0x1b, 3).unwrap();
        assert_eq!(plan.len(), 6);
        let replies: [Reply; 6] = [
            Ok(None),
            Ok(None),
            Ok(Some(1)),
            Ok(Some(2)),
            Ok(Some(3)),
            Ok(Some(0x1e)),
        ];
        assert_eq!(range_result(0x1b, 3, &replies), Ok(vec![1, 2, 3]));
        let wrong: [Reply; 6] = [
            Ok(None),
            Ok(None),
            Ok(Some(1)),
            Ok(Some(2)),
            Ok(Some(3)),
            Ok(Some(0x20)),
        ];
        assert_eq!(
            range_result(0x1b, 3, &wrong),
            Err(DaliError::Memory(MemoryError::LengthMismatch))
        );
        assert_eq!(
            read_range(Short::new(0), MemoryBank::Bank0, 0x20, 4),
            Err(MemoryError::InvalidMemoryArea)
        );
    }

    #[test]
    fn range_stops_at_missing_cell() {
        // DTR0 still moved past every cell that was read
        let partial: [Reply; 6] = [
            Ok(None),
            Ok(None),
            Ok(Some(1)),
            Err(DaliError::ResponseTimeout),
            Ok(Some(3)),
            Ok(Some(0x1e)),
        ];
        assert_eq!(range_result(0x1b, 3, &partial), Ok(vec![1]));
        let early_dtr: [Reply; 6] = [
            Ok(None),
            Ok(None),
            Ok(Some(1)),
            Ok(None),
            Ok(None),
            Ok(Some(0x1d)),
        ];
        assert_eq!(
            range_result(0x1b, 3, &early_dtr),
            Err(DaliError::Memory(MemoryError::LengthMismatch))
        );
    }

    #[test]
    fn range_read_from_simulated_gear() {
        let mut gear = SimGear::new(5);
        let plan = read_range(Short::new(0), MemoryBank::Bank0, 0x20, 2).unwrap();
        gear.short_address = 0;
        let replies: Vec<Reply> = plan
            .iter()
            .flat_map(|m| m.frames(&mut None))
            .map(|frame| Ok(gear.forward(frame)))
            .collect();
        assert_eq!(range_result(0x20, 2, &replies), Ok(vec![6, 0x01]));
    }
}
