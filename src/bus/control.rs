use super::event::{ControlEvent, TransmitEvent};
use super::message::{ExchangeOutcome, FailureKind, Message, Origin, Reply, Response, Ticket};
use super::state::BusState;
use super::timer::SoftTimer;
use super::TaskContext;
use crate::config::BusConfig;
use crate::error::DaliError;
use crate::utils::commissioning::{
    Assignment, CommissionMode, Commissioning, CommissioningReport, Step,
};
use log::{debug, error, info, warn};
use std::collections::VecDeque;

/// Automatic retries of a failed exchange
const MAX_RETRIES: u8 = 1;
/// Finished tickets kept for the application
const DONE_HISTORY: usize = 16;

/// Sole owner of BusState. Sequences requests and runs commissioning.
pub struct ControlTask {
    state: BusState,
    fault: bool,
    next_tag: Ticket,
    /// Tag and attempt count of the exchange being retried
    attempts: Option<(Ticket, u8)>,
    done: VecDeque<Ticket>,
    session: Option<Commissioning>,
    session_result: Option<Result<CommissioningReport, DaliError>>,
    assignments: VecDeque<Assignment>,
    /// Waits requested by the commissioning session
    timer: SoftTimer,
    config: BusConfig,
}

impl ControlTask {
    pub fn new(config: &BusConfig) -> ControlTask {
        ControlTask {
            state: BusState::Idle,
            fault: false,
            next_tag: 1,
            attempts: None,
            done: VecDeque::new(),
            session: None,
            session_result: None,
            assignments: VecDeque::new(),
            timer: SoftTimer::new(),
            config: config.clone(),
        }
    }

    pub fn bus_state(&self) -> BusState {
        if self.fault {
            BusState::Fault
        } else {
            self.state
        }
    }

    pub fn is_busy(&self) -> bool {
        self.bus_state().is_busy()
    }

    pub fn commissioning_active(&self) -> bool {
        self.session.is_some()
    }

    /// Queue an application message
    pub fn submit(&mut self, message: Message, ctx: &mut TaskContext) -> Result<Ticket, DaliError> {
        if self.fault {
            return Err(DaliError::BusFault);
        }
        if self.session.is_some() {
            return Err(DaliError::CommissioningActive);
        }
        self.enqueue(message.with_origin(Origin::Application), ctx)
    }

    fn enqueue(
        &mut self,
        mut message: Message,
        ctx: &mut TaskContext,
    ) -> Result<Ticket, DaliError> {
        let tag = self.next_tag;
        message.tag = tag;
        if ctx.queues.outbound.put(message).is_err() {
            debug!("Queue full, rejected message to {}", message.address);
            return Err(DaliError::QueueFull);
        }
        self.next_tag = self.next_tag.wrapping_add(1);
        self.kick(ctx);
        Ok(tag)
    }

    /// Start the transmit task if idle and something is queued
    fn kick(&mut self, ctx: &mut TaskContext) {
        if self.state == BusState::Idle && !ctx.queues.outbound.is_empty() {
            self.state = BusState::TransmitPending;
            ctx.mailbox.post_transmit(TransmitEvent::MessageInQueue);
        }
    }

    pub fn handle(&mut self, event: ControlEvent, ctx: &mut TaskContext) {
        debug!(
            "[{:04x}] event {:08x}",
            self.config.control_log_base + event.code() as u16,
            event.payload()
        );
        match event {
            ControlEvent::Phase(BusState::Idle) => {
                if self.state == BusState::TransmitPending {
                    self.state = BusState::Idle;
                    self.kick(ctx);
                }
            }
            ControlEvent::Phase(state) => self.state = state,
            ControlEvent::ExchangeDone { message, outcome } => {
                self.exchange_done(message, outcome, ctx)
            }
            ControlEvent::ExchangeAborted(message) => {
                self.attempts = None;
                self.state = BusState::Idle;
                match message.origin {
                    Origin::Application => self.route(message, Err(DaliError::Aborted), ctx),
                    Origin::Commissioning => {
                        if let Some(session) = self.session.as_mut() {
                            session.abort(DaliError::Aborted);
                            self.drive_session(ctx);
                        }
                    }
                }
                self.kick(ctx);
            }
            ControlEvent::BusFault(true) => {
                if !self.fault {
                    warn!("Bus fault, rejecting requests");
                }
                self.fault = true;
                if self.session.is_some() {
                    self.end_session(Err(DaliError::BusFault));
                }
                let flushed: Vec<Message> = ctx.queues.outbound.drain().collect();
                for message in flushed {
                    self.route(message, Err(DaliError::BusFault), ctx);
                }
            }
            ControlEvent::BusFault(false) => {
                if self.fault {
                    info!("Bus fault cleared");
                }
                self.fault = false;
                self.kick(ctx);
            }
        }
    }

    fn exchange_done(&mut self, message: Message, outcome: ExchangeOutcome, ctx: &mut TaskContext) {
        let reply: Reply = match outcome {
            ExchangeOutcome::Success(answer) => {
                Ok(if message.expects_response { answer } else { None })
            }
            // No answer from a group, broadcast or special command is a valid "no"
            ExchangeOutcome::Failure(FailureKind::ResponseTimeout)
                if message.address.is_multicast() =>
            {
                Ok(None)
            }
            ExchangeOutcome::Failure(kind) => {
                let attempts = match self.attempts {
                    Some((tag, n)) if tag == message.tag => n,
                    _ => 0,
                };
                if message.retry && attempts < MAX_RETRIES && !self.fault {
                    warn!("Exchange {} failed ({:?}), retrying", message.tag, kind);
                    self.attempts = Some((message.tag, attempts + 1));
                    self.state = BusState::TransmitPending;
                    ctx.mailbox.post_transmit(TransmitEvent::Retry(message));
                    return;
                }
                Err(kind.into())
            }
        };
        self.attempts = None;
        self.state = BusState::Idle;
        self.route(message, reply, ctx);
        self.kick(ctx);
    }

    /// Deliver the result of a message to whoever is waiting for it
    fn route(&mut self, message: Message, reply: Reply, ctx: &mut TaskContext) {
        match message.origin {
            Origin::Application => {
                if message.expects_response || reply.is_err() {
                    let response = Response {
                        tag: message.tag,
                        address: message.address,
                        reply,
                    };
                    if let Err(response) = ctx.queues.inbound.put(response) {
                        error!(
                            "Receive queue full, response for {} lost: {:?}",
                            response.tag, response.reply
                        );
                    }
                }
                if self.done.len() >= DONE_HISTORY {
                    self.done.pop_front();
                }
                self.done.push_back(message.tag);
            }
            Origin::Commissioning => {
                let Some(session) = self.session.as_mut() else {
                    debug!("Commissioning reply {} without session", message.tag);
                    return;
                };
                session.on_reply(reply);
                self.drive_session(ctx);
            }
        }
    }

    pub fn take_done(&mut self) -> Option<Ticket> {
        self.done.pop_front()
    }

    pub fn on_tick(&mut self, ctx: &mut TaskContext) {
        if self.timer.fire(ctx.now) {
            self.drive_session(ctx);
        }
    }

    pub fn start_commissioning(
        &mut self,
        mode: CommissionMode,
        reserved: u64,
        ctx: &mut TaskContext,
    ) -> Result<(), DaliError> {
        if self.fault {
            return Err(DaliError::BusFault);
        }
        if self.session.is_some() {
            return Err(DaliError::CommissioningActive);
        }
        info!("Commissioning {:?} devices", mode);
        self.session_result = None;
        self.session = Some(Commissioning::new(mode, reserved, &self.config));
        self.drive_session(ctx);
        Ok(())
    }

    /// Let the session issue its next message or wait
    fn drive_session(&mut self, ctx: &mut TaskContext) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        while let Some(assignment) = session.take_assignment() {
            self.assignments.push_back(assignment);
        }
        match session.next_step() {
            Some(Step::Send(message)) => {
                if let Err(e) = self.enqueue(message.with_origin(Origin::Commissioning), ctx) {
                    self.end_session(Err(e));
                }
            }
            Some(Step::Wait(duration)) => self.timer.arm(ctx.now, duration),
            Some(Step::Finished(result)) => self.end_session(result),
            None => {}
        }
    }

    fn end_session(&mut self, result: Result<CommissioningReport, DaliError>) {
        match &result {
            Ok(report) => info!(
                "Commissioning done, {} devices in {} rounds",
                report.assigned.len(),
                report.rounds
            ),
            Err(e) => error!("Commissioning failed: {}", e),
        }
        self.timer.disarm();
        if let Some(mut session) = self.session.take() {
            while let Some(assignment) = session.take_assignment() {
                self.assignments.push_back(assignment);
            }
        }
        self.session_result = Some(result);
    }

    pub fn take_commissioning_result(&mut self) -> Option<Result<CommissioningReport, DaliError>> {
        self.session_result.take()
    }

    pub fn take_assignment(&mut self) -> Option<Assignment> {
        self.assignments.pop_front()
    }
}
