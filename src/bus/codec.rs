use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The codec is already sending or receiving
    Busy,
    /// Hardware or driver specific error code
    Driver(u32),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Busy => write!(f, "Codec busy"),
            CodecError::Driver(code) => write!(f, "Driver error {}", code),
        }
    }
}

impl std::error::Error for CodecError {}

/// Manchester bit-level encoder/decoder.
///
/// Calls only start an operation. Completion is reported from interrupt
/// context by posting a `CodecEvent` through an `IsrHandle`.
pub trait ManchesterCodec: Send {
    /// Start sending a forward frame
    fn transmit(&mut self, frame: &[u8]) -> Result<(), CodecError>;
    /// Arm the receiver for a frame of `length` bytes
    fn receive(&mut self, length: usize) -> Result<(), CodecError>;
    /// Disarm the receiver. Must be harmless when not armed.
    fn stop_receive(&mut self);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineLevel {
    /// Idle level, bus powered
    High,
    Low,
}

/// Physical bus line, sampled by the bus monitor
pub trait BusLine: Send {
    fn sample(&mut self) -> LineLevel;
}
