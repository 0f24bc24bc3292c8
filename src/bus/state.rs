use std::fmt;

/// State of the bus as seen by the control task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusState {
    Idle,
    TransmitPending,
    Transmitting,
    SettlingDelay,
    AwaitingBackwardFrame,
    BackwardFrameReceived,
    Fault,
}

impl BusState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, BusState::Idle)
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusState::Idle => "idle",
            BusState::TransmitPending => "transmit pending",
            BusState::Transmitting => "transmitting",
            BusState::SettlingDelay => "settling delay",
            BusState::AwaitingBackwardFrame => "awaiting backward frame",
            BusState::BackwardFrameReceived => "backward frame received",
            BusState::Fault => "fault",
        };
        f.write_str(s)
    }
}
