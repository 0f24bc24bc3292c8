use super::codec::ManchesterCodec;
use super::event::{CodecEvent, ControlEvent, TransmitEvent};
use super::message::{ExchangeOutcome, FailureKind, Message};
use super::state::BusState;
use super::timer::SoftTimer;
use super::TaskContext;
use crate::common::address::{AddressMode, Long};
use crate::config::BusConfig;
use crate::gear::cmd_defs::opcode;
use log::{debug, warn};
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Waiting for XmitDone
    Transmitting,
    /// Pause between frames of the same exchange
    Gap,
    /// Forward-backward settling, receiver not armed
    Settling,
    /// Receiver armed
    Receiving,
}

struct Exchange {
    message: Message,
    frames: Vec<[u8; 2]>,
    next: usize,
}

/// Owns the physical exchange. Only reports outcomes, never touches BusState.
pub struct TransmitTask<C> {
    codec: C,
    phase: Phase,
    current: Option<Exchange>,
    timer: SoftTimer,
    /// Search address loaded in the devices, if known
    search: Option<Long>,
    settling_delay: Duration,
    response_timeout: Duration,
    transmit_timeout: Duration,
    log_base: u16,
}

impl<C> TransmitTask<C>
where
    C: ManchesterCodec,
{
    pub fn new(codec: C, config: &BusConfig) -> TransmitTask<C> {
        TransmitTask {
            codec,
            phase: Phase::Idle,
            current: None,
            timer: SoftTimer::new(),
            search: None,
            settling_delay: config.settling_delay(),
            response_timeout: config.response_timeout(),
            transmit_timeout: config.transmit_timeout(),
            log_base: config.transmit_log_base,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn receive_armed(&self) -> bool {
        self.phase == Phase::Receiving
    }

    pub fn handle(&mut self, event: TransmitEvent, ctx: &mut TaskContext) {
        debug!(
            "[{:04x}] event {:08x}",
            self.log_base + event.code() as u16,
            event.payload()
        );
        match event {
            TransmitEvent::MessageInQueue => {
                if self.current.is_some() {
                    return;
                }
                match ctx.queues.outbound.get() {
                    Some(message) => self.start(message, ctx),
                    None => ctx.mailbox.post_control(ControlEvent::Phase(BusState::Idle)),
                }
            }
            TransmitEvent::Retry(message) => {
                if self.current.is_some() {
                    warn!("Retry of {} while busy", message.tag);
                    return;
                }
                self.start(message, ctx);
            }
            TransmitEvent::Codec(event) => self.codec_event(event, ctx),
        }
    }

    fn codec_event(&mut self, event: CodecEvent, ctx: &mut TaskContext) {
        match (self.phase, event) {
            (Phase::Transmitting, CodecEvent::XmitDone) => {
                self.timer.disarm();
                let Some(exchange) = self.current.as_mut() else {
                    self.phase = Phase::Idle;
                    return;
                };
                exchange.next += 1;
                if exchange.next < exchange.frames.len() {
                    self.phase = Phase::Gap;
                    self.timer.arm(ctx.now, self.settling_delay);
                } else if exchange.message.expects_response {
                    self.phase = Phase::Settling;
                    self.timer.arm(ctx.now, self.settling_delay);
                    ctx.mailbox
                        .post_control(ControlEvent::Phase(BusState::SettlingDelay));
                } else {
                    self.finish(ExchangeOutcome::Success(None), ctx);
                }
            }
            (Phase::Settling, CodecEvent::RecvDone(_) | CodecEvent::RecvError) => {
                warn!("Backward frame before settling delay");
                self.codec.stop_receive();
                self.finish(ExchangeOutcome::Failure(FailureKind::FramingError), ctx);
            }
            (Phase::Receiving, CodecEvent::RecvDone(data)) => {
                self.codec.stop_receive();
                ctx.mailbox
                    .post_control(ControlEvent::Phase(BusState::BackwardFrameReceived));
                let outcome = if data.len() == 1 {
                    ExchangeOutcome::Success(Some(data[0]))
                } else {
                    ExchangeOutcome::Failure(FailureKind::FramingError)
                };
                self.finish(outcome, ctx);
            }
            (Phase::Receiving, CodecEvent::RecvError) => {
                self.codec.stop_receive();
                self.finish(ExchangeOutcome::Failure(FailureKind::FramingError), ctx);
            }
            (phase, event) => {
                debug!("Ignored {:?} in phase {:?}", event, phase);
            }
        }
    }

    /// Called on every scheduler tick
    pub fn on_tick(&mut self, ctx: &mut TaskContext) {
        if !self.timer.fire(ctx.now) {
            return;
        }
        match self.phase {
            Phase::Transmitting => {
                warn!("No transmit done from codec");
                self.search = None;
                self.finish(ExchangeOutcome::Failure(FailureKind::TransmitTimeout), ctx);
            }
            Phase::Gap => self.send_next_frame(ctx),
            Phase::Settling => {
                if let Err(e) = self.codec.receive(1) {
                    self.finish(ExchangeOutcome::Failure(FailureKind::Codec(e)), ctx);
                    return;
                }
                self.phase = Phase::Receiving;
                self.timer.arm(ctx.now, self.response_timeout);
                ctx.mailbox
                    .post_control(ControlEvent::Phase(BusState::AwaitingBackwardFrame));
            }
            Phase::Receiving => {
                self.codec.stop_receive();
                self.finish(ExchangeOutcome::Failure(FailureKind::ResponseTimeout), ctx);
            }
            Phase::Idle => {}
        }
    }

    /// Cancel an armed or pending receive window. No-op otherwise.
    pub fn stop_receive(&mut self, ctx: &mut TaskContext) {
        if !matches!(self.phase, Phase::Settling | Phase::Receiving) {
            return;
        }
        self.codec.stop_receive();
        self.timer.disarm();
        self.phase = Phase::Idle;
        if let Some(exchange) = self.current.take() {
            debug!("Receive for {} stopped", exchange.message.tag);
            ctx.mailbox.post_control(ControlEvent::ExchangeAborted(exchange.message));
        }
    }

    /// Arm or disarm the exchange timer
    pub fn set_transmit_timer(&mut self, enable: bool, duration_ms: u32, now: Duration) {
        if enable {
            self.timer.arm(now, Duration::from_millis(duration_ms as u64));
        } else {
            self.timer.disarm();
        }
    }

    fn start(&mut self, message: Message, ctx: &mut TaskContext) {
        // Devices may reset their search address when (re)entering initialisation
        if matches!(
            message.address,
            AddressMode::Special(opcode::INITIALISE | opcode::TERMINATE)
        ) {
            self.search = None;
        }
        let mut frames = message.frames(&mut self.search);
        if message.send_twice {
            if let Some(last) = frames.last().copied() {
                frames.push(last);
            }
        }
        debug!("Exchange {} to {}: {:02x?}", message.tag, message.address, frames);
        self.current = Some(Exchange {
            message,
            frames,
            next: 0,
        });
        ctx.mailbox
            .post_control(ControlEvent::Phase(BusState::Transmitting));
        self.send_next_frame(ctx);
    }

    fn send_next_frame(&mut self, ctx: &mut TaskContext) {
        let Some(exchange) = self.current.as_ref() else {
            self.phase = Phase::Idle;
            return;
        };
        let frame = exchange.frames[exchange.next];
        match self.codec.transmit(&frame) {
            Ok(()) => {
                self.phase = Phase::Transmitting;
                self.timer.arm(ctx.now, self.transmit_timeout);
            }
            Err(e) => {
                warn!("Codec failed to transmit: {}", e);
                self.search = None;
                self.finish(ExchangeOutcome::Failure(FailureKind::Codec(e)), ctx);
            }
        }
    }

    fn finish(&mut self, outcome: ExchangeOutcome, ctx: &mut TaskContext) {
        self.phase = Phase::Idle;
        self.timer.disarm();
        if let Some(exchange) = self.current.take() {
            ctx.mailbox.post_control(ControlEvent::ExchangeDone {
                message: exchange.message,
                outcome,
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::codec::CodecError;
    use crate::bus::event::Mailbox;
    use crate::bus::Queues;
    use crate::common::address::Short;
    use crate::gear::cmd_defs as cmd;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        armed: u32,
        stopped: u32,
    }

    impl ManchesterCodec for Recorder {
        fn transmit(&mut self, frame: &[u8]) -> Result<(), CodecError> {
            self.sent.push(frame.to_vec());
            Ok(())
        }
        fn receive(&mut self, _length: usize) -> Result<(), CodecError> {
            self.armed += 1;
            Ok(())
        }
        fn stop_receive(&mut self) {
            self.stopped += 1;
        }
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn send_twice_waits_between_frames() {
        let config = BusConfig::default();
        let mut task = TransmitTask::new(Recorder::default(), &config);
        let mut queues = Queues::new(2, 2);
        let mut mailbox = Mailbox::default();
        queues
            .outbound
            .put(cmd::SET_MAX_LEVEL(Short::new(1)))
            .unwrap();
        let mut ctx = TaskContext {
            now: ms(0),
            queues: &mut queues,
            mailbox: &mut mailbox,
        };
        task.handle(TransmitEvent::MessageInQueue, &mut ctx);
        assert_eq!(task.codec().sent.len(), 1);
        task.handle(TransmitEvent::Codec(CodecEvent::XmitDone), &mut ctx);
        ctx.now = ms(3);
        task.on_tick(&mut ctx);
        assert_eq!(task.codec().sent.len(), 1);
        ctx.now = ms(4);
        task.on_tick(&mut ctx);
        assert_eq!(task.codec().sent, vec![vec![0x03, 0x2a], vec![0x03, 0x2a]]);
        task.handle(TransmitEvent::Codec(CodecEvent::XmitDone), &mut ctx);
        assert!(task.is_idle());
        assert_eq!(task.codec().armed, 0);
        assert!(matches!(
            mailbox.control.back(),
            Some(ControlEvent::ExchangeDone {
                outcome: ExchangeOutcome::Success(None),
                ..
            })
        ));
    }

    #[test]
    fn stop_receive_when_idle_is_noop() {
        let config = BusConfig::default();
        let mut task = TransmitTask::new(Recorder::default(), &config);
        let mut queues = Queues::new(2, 2);
        let mut mailbox = Mailbox::default();
        let mut ctx = TaskContext {
            now: ms(0),
            queues: &mut queues,
            mailbox: &mut mailbox,
        };
        task.stop_receive(&mut ctx);
        task.stop_receive(&mut ctx);
        assert!(task.is_idle());
        assert_eq!(task.codec().stopped, 0);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn response_timeout_after_window() {
        let config = BusConfig::default();
        let mut task = TransmitTask::new(Recorder::default(), &config);
        let mut queues = Queues::new(2, 2);
        let mut mailbox = Mailbox::default();
        queues.outbound.put(cmd::QUERY_STATUS(Short::new(5))).unwrap();
        let mut ctx = TaskContext {
            now: ms(0),
            queues: &mut queues,
            mailbox: &mut mailbox,
        };
        task.handle(TransmitEvent::MessageInQueue, &mut ctx);
        task.handle(TransmitEvent::Codec(CodecEvent::XmitDone), &mut ctx);
        ctx.now = ms(4);
        task.on_tick(&mut ctx);
        assert!(task.receive_armed());
        ctx.now = ms(25);
        task.on_tick(&mut ctx);
        assert!(task.receive_armed());
        ctx.now = ms(26);
        task.on_tick(&mut ctx);
        assert!(task.is_idle());
        assert!(matches!(
            mailbox.control.back(),
            Some(ControlEvent::ExchangeDone {
                outcome: ExchangeOutcome::Failure(FailureKind::ResponseTimeout),
                ..
            })
        ));
    }
}
