use super::message::{ExchangeOutcome, FailureKind, Message};
use super::state::BusState;
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type EventCode = u8;
/// Fixed width argument carried with every event
pub type EventPayload = u32;

pub const MESSAGE_IN_QUEUE: EventCode = 0x01;
pub const EXCHANGE_DONE: EventCode = 0x02;
pub const EXCHANGE_ABORTED: EventCode = 0x03;
pub const RETRY: EventCode = 0x04;
pub const PHASE_CHANGED: EventCode = 0x05;
pub const BUS_FAULT: EventCode = 0x06;
pub const XMIT_DONE: EventCode = 0x10;
pub const RECV_DONE: EventCode = 0x11;
pub const RECV_ERROR: EventCode = 0x12;

/// Completion events from the Manchester codec, posted from interrupt context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecEvent {
    XmitDone,
    RecvDone(Vec<u8>),
    RecvError,
}

impl CodecEvent {
    pub fn code(&self) -> EventCode {
        match self {
            CodecEvent::XmitDone => XMIT_DONE,
            CodecEvent::RecvDone(_) => RECV_DONE,
            CodecEvent::RecvError => RECV_ERROR,
        }
    }
}

pub type IsrReceiver = UnboundedReceiver<CodecEvent>;

/// Channel carrying codec completions from interrupt context to the transmit task
pub fn isr_channel() -> (IsrHandle, IsrReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IsrHandle(tx), rx)
}

/// Sender side of the interrupt channel. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct IsrHandle(UnboundedSender<CodecEvent>);

impl IsrHandle {
    pub fn post(&self, event: CodecEvent) {
        // Receiver gone means the bus is shut down
        let _ = self.0.send(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitEvent {
    MessageInQueue,
    /// Send the message again, ahead of anything queued
    Retry(Message),
    Codec(CodecEvent),
}

impl TransmitEvent {
    pub fn code(&self) -> EventCode {
        match self {
            TransmitEvent::MessageInQueue => MESSAGE_IN_QUEUE,
            TransmitEvent::Retry(_) => RETRY,
            TransmitEvent::Codec(ev) => ev.code(),
        }
    }

    pub fn payload(&self) -> EventPayload {
        match self {
            TransmitEvent::Retry(msg) => msg.tag as EventPayload,
            TransmitEvent::Codec(CodecEvent::RecvDone(data)) => data.len() as EventPayload,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Progress of the exchange in flight, mirrored into BusState
    Phase(BusState),
    ExchangeDone {
        message: Message,
        outcome: ExchangeOutcome,
    },
    ExchangeAborted(Message),
    /// true when the monitor detects a fault, false when it clears
    BusFault(bool),
}

impl ControlEvent {
    pub fn code(&self) -> EventCode {
        match self {
            ControlEvent::Phase(_) => PHASE_CHANGED,
            ControlEvent::ExchangeDone { .. } => EXCHANGE_DONE,
            ControlEvent::ExchangeAborted(_) => EXCHANGE_ABORTED,
            ControlEvent::BusFault(_) => BUS_FAULT,
        }
    }

    /// Tag in the low 16 bits, outcome detail in the high 16 bits
    pub fn payload(&self) -> EventPayload {
        match self {
            ControlEvent::Phase(state) => *state as EventPayload,
            ControlEvent::ExchangeDone { message, outcome } => {
                let detail: EventPayload = match outcome {
                    ExchangeOutcome::Success(None) => 0x000,
                    ExchangeOutcome::Success(Some(b)) => 0x100 | *b as EventPayload,
                    ExchangeOutcome::Failure(FailureKind::FramingError) => 0x200,
                    ExchangeOutcome::Failure(FailureKind::ResponseTimeout) => 0x201,
                    ExchangeOutcome::Failure(FailureKind::TransmitTimeout) => 0x202,
                    ExchangeOutcome::Failure(FailureKind::Codec(_)) => 0x203,
                };
                (detail << 16) | message.tag as EventPayload
            }
            ControlEvent::ExchangeAborted(message) => message.tag as EventPayload,
            ControlEvent::BusFault(fault) => *fault as EventPayload,
        }
    }
}

/// Pending events for the tasks, drained by the dispatcher
#[derive(Debug, Default)]
pub struct Mailbox {
    pub(crate) control: VecDeque<ControlEvent>,
    pub(crate) transmit: VecDeque<TransmitEvent>,
}

impl Mailbox {
    pub fn post_control(&mut self, event: ControlEvent) {
        self.control.push_back(event);
    }

    pub fn post_transmit(&mut self, event: TransmitEvent) {
        self.transmit.push_back(event);
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.transmit.is_empty()
    }
}
