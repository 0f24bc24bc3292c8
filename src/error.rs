use crate::bus::codec::CodecError;
use crate::utils::memory_banks::MemoryError;
use crate::utils::parameters::ParameterError;
use std::fmt;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Errors reported for requests on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum DaliError {
    /// Outbound queue is full, the message was not queued
    QueueFull,
    /// Malformed or early backward frame
    FramingError,
    /// No backward frame within the receive window
    ResponseTimeout,
    /// The bus monitor reports a fault, no new requests accepted
    BusFault,
    /// No free short address left for a device found during commissioning
    AddressSpaceExhausted,
    /// The codec never reported the forward frame as sent
    TransmitTimeout,
    Codec(CodecError),
    /// Parameter or memory bank access failed
    Memory(MemoryError),
    /// Application requests are refused while commissioning runs
    CommissioningActive,
    /// Too many devices disappeared during commissioning
    CommissioningStalled,
    /// The exchange was cancelled with stop_receive
    Aborted,
    /// The bus task has terminated
    Closed,
}

impl fmt::Display for DaliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaliError::QueueFull => write!(f, "Transmit queue full"),
            DaliError::FramingError => write!(f, "Framing error in backward frame"),
            DaliError::ResponseTimeout => write!(f, "No backward frame received"),
            DaliError::BusFault => write!(f, "Bus fault"),
            DaliError::AddressSpaceExhausted => write!(f, "No free short address"),
            DaliError::TransmitTimeout => write!(f, "Forward frame not sent"),
            DaliError::Codec(e) => write!(f, "Codec error: {}", e),
            DaliError::Memory(e) => write!(f, "Memory bank: {}", e),
            DaliError::CommissioningActive => write!(f, "Commissioning in progress"),
            DaliError::CommissioningStalled => {
                write!(f, "Commissioning stopped, devices not responding")
            }
            DaliError::Aborted => write!(f, "Exchange aborted"),
            DaliError::Closed => write!(f, "Bus closed"),
        }
    }
}

impl std::error::Error for DaliError {}

impl From<CodecError> for DaliError {
    fn from(err: CodecError) -> DaliError {
        DaliError::Codec(err)
    }
}

impl From<MemoryError> for DaliError {
    fn from(err: MemoryError) -> DaliError {
        DaliError::Memory(err)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(&'static str),
    Parameters(ParameterError),
    Parse(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(what) => write!(f, "Invalid configuration: {}", what),
            ConfigError::Parameters(e) => write!(f, "Bad parameter table: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse configuration: {}", e),
            ConfigError::Io(e) => write!(f, "Failed to read configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> ConfigError {
        ConfigError::Parse(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<ParameterError> for ConfigError {
    fn from(err: ParameterError) -> ConfigError {
        ConfigError::Parameters(err)
    }
}
