pub mod codec;
pub mod control;
pub mod event;
pub mod master;
pub mod message;
pub mod monitor;
pub mod queue;
pub mod runtime;
pub mod state;
pub mod timer;
pub mod transmit;

use event::Mailbox;
use message::{Message, Response};
use queue::MessageQueue;
use std::time::Duration;

/// Queues shared between the application, the control task and the transmit task
#[derive(Debug)]
pub struct Queues {
    pub outbound: MessageQueue<Message>,
    pub inbound: MessageQueue<Response>,
}

impl Queues {
    pub fn new(outbound_depth: usize, inbound_depth: usize) -> Queues {
        Queues {
            outbound: MessageQueue::new(outbound_depth),
            inbound: MessageQueue::new(inbound_depth),
        }
    }
}

/// Passed to a task handler for the duration of one dispatch
pub struct TaskContext<'a> {
    pub now: Duration,
    pub queues: &'a mut Queues,
    pub mailbox: &'a mut Mailbox,
}
