use super::codec::{BusLine, ManchesterCodec};
use super::control::ControlTask;
use super::event::{ControlEvent, IsrReceiver, Mailbox, TransmitEvent};
use super::message::{Message, Response, Ticket};
use super::monitor::MonitorTask;
use super::state::BusState;
use super::transmit::TransmitTask;
use super::{Queues, TaskContext};
use crate::config::BusConfig;
use crate::error::{ConfigError, DaliError};
use crate::utils::commissioning::{Assignment, CommissionMode, CommissioningReport};
use crate::utils::parameters;
use std::time::Duration;

/// Cooperative dispatcher for one bus.
///
/// Owns the tasks and their queues. Every public call runs the affected
/// handlers to completion before returning. Time only moves through `tick`.
pub struct BusMaster<C, L> {
    config: BusConfig,
    queues: Queues,
    mailbox: Mailbox,
    control: ControlTask,
    transmit: TransmitTask<C>,
    monitor: MonitorTask<L>,
    isr: IsrReceiver,
    now: Duration,
}

impl<C, L> BusMaster<C, L>
where
    C: ManchesterCodec,
    L: BusLine,
{
    /// `isr` receives the events posted by the codec through its `IsrHandle`
    pub fn new(
        config: BusConfig,
        codec: C,
        line: L,
        isr: IsrReceiver,
    ) -> Result<BusMaster<C, L>, ConfigError> {
        config.validate()?;
        parameters::validate()?;
        Ok(BusMaster {
            queues: Queues::new(config.transmit_queue_depth, config.receive_queue_depth),
            mailbox: Mailbox::default(),
            control: ControlTask::new(&config),
            transmit: TransmitTask::new(codec, &config),
            monitor: MonitorTask::new(line, &config),
            isr,
            now: Duration::ZERO,
            config,
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn codec(&self) -> &C {
        self.transmit.codec()
    }

    pub fn codec_mut(&mut self) -> &mut C {
        self.transmit.codec_mut()
    }

    pub fn line_mut(&mut self) -> &mut L {
        self.monitor.line_mut()
    }

    pub fn submit(&mut self, message: Message) -> Result<Ticket, DaliError> {
        let mut ctx = TaskContext {
            now: self.now,
            queues: &mut self.queues,
            mailbox: &mut self.mailbox,
        };
        let res = self.control.submit(message, &mut ctx);
        self.dispatch();
        res
    }

    pub fn stop_receive(&mut self) {
        let mut ctx = TaskContext {
            now: self.now,
            queues: &mut self.queues,
            mailbox: &mut self.mailbox,
        };
        self.transmit.stop_receive(&mut ctx);
        self.dispatch();
    }

    pub fn bus_state(&self) -> BusState {
        self.control.bus_state()
    }

    pub fn is_busy(&self) -> bool {
        self.control.is_busy()
    }

    /// Receive window currently armed
    pub fn receive_armed(&self) -> bool {
        self.transmit.receive_armed()
    }

    pub fn queue_put_received_message(&mut self, response: Response) -> Result<(), Response> {
        self.queues.inbound.put(response)
    }

    /// Take the next outbound message, bypassing the transmit task
    pub fn queue_get_next_outbound_message(&mut self) -> Option<Message> {
        self.queues.outbound.get()
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.queues.inbound.get()
    }

    /// Tickets of finished application messages
    pub fn take_done(&mut self) -> Option<Ticket> {
        self.control.take_done()
    }

    pub fn post_control_event(&mut self, event: ControlEvent) {
        self.mailbox.post_control(event);
        self.dispatch();
    }

    pub fn post_transmit_event(&mut self, event: TransmitEvent) {
        self.mailbox.post_transmit(event);
        self.dispatch();
    }

    pub fn set_transmit_timer(&mut self, enable: bool, duration_ms: u32) {
        self.transmit
            .set_transmit_timer(enable, duration_ms, self.now);
    }

    /// Advance time to `now` and run everything that became due
    pub fn tick(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
        self.dispatch();
        let mut ctx = TaskContext {
            now: self.now,
            queues: &mut self.queues,
            mailbox: &mut self.mailbox,
        };
        self.transmit.on_tick(&mut ctx);
        self.control.on_tick(&mut ctx);
        self.dispatch();
    }

    /// Run the bus monitor once, normally every `monitor_period`
    pub fn poll_monitor(&mut self) {
        let mut ctx = TaskContext {
            now: self.now,
            queues: &mut self.queues,
            mailbox: &mut self.mailbox,
        };
        self.monitor.poll(&mut ctx);
        self.dispatch();
    }

    /// `reserved` has a bit set for each short address that must not be assigned
    pub fn start_commissioning(
        &mut self,
        mode: CommissionMode,
        reserved: u64,
    ) -> Result<(), DaliError> {
        let mut ctx = TaskContext {
            now: self.now,
            queues: &mut self.queues,
            mailbox: &mut self.mailbox,
        };
        let res = self.control.start_commissioning(mode, reserved, &mut ctx);
        self.dispatch();
        res
    }

    pub fn commissioning_active(&self) -> bool {
        self.control.commissioning_active()
    }

    pub fn take_commissioning_result(&mut self) -> Option<Result<CommissioningReport, DaliError>> {
        self.control.take_commissioning_result()
    }

    pub fn take_assignment(&mut self) -> Option<Assignment> {
        self.control.take_assignment()
    }

    /// Run handlers until no events are pending
    pub fn dispatch(&mut self) {
        loop {
            while let Ok(event) = self.isr.try_recv() {
                self.mailbox.post_transmit(TransmitEvent::Codec(event));
            }
            if let Some(event) = self.mailbox.transmit.pop_front() {
                let mut ctx = TaskContext {
                    now: self.now,
                    queues: &mut self.queues,
                    mailbox: &mut self.mailbox,
                };
                self.transmit.handle(event, &mut ctx);
                continue;
            }
            if let Some(event) = self.mailbox.control.pop_front() {
                let mut ctx = TaskContext {
                    now: self.now,
                    queues: &mut self.queues,
                    mailbox: &mut self.mailbox,
                };
                self.control.handle(event, &mut ctx);
                continue;
            }
            break;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::codec::LineLevel;
    use crate::bus::event::{isr_channel, CodecEvent, IsrHandle};
    use crate::common::address::{AddressMode, Short};
    use crate::drivers::simulator::bus::{SimBus, SimCodec, SimLine};
    use crate::drivers::simulator::gear::{InitialisationState, SimGear};
    use crate::gear::cmd_defs::{self as cmd, opcode};
    use std::collections::HashSet;

    struct Harness {
        master: BusMaster<SimCodec, SimLine>,
        sim: SimBus,
        isr: IsrHandle,
        now: Duration,
    }

    impl Harness {
        fn new(sim: SimBus) -> Harness {
            let (isr, events) = isr_channel();
            let master =
                BusMaster::new(BusConfig::default(), sim.codec(isr.clone()), sim.line(), events)
                    .unwrap();
            Harness {
                master,
                sim,
                isr,
                now: Duration::ZERO,
            }
        }

        fn with_short(short: u8) -> Harness {
            let sim = SimBus::new();
            let mut gear = SimGear::new(1);
            gear.short_address = short;
            sim.add_gear(gear);
            Harness::new(sim)
        }

        fn advance(&mut self, ms: u64) {
            for _ in 0..ms {
                self.now += Duration::from_millis(1);
                self.master.tick(self.now);
            }
        }

        fn sent(&self) -> Vec<[u8; 2]> {
            self.master.codec().sent().to_vec()
        }
    }

    #[test]
    fn recall_max_level() {
        let mut h = Harness::with_short(0);
        h.sim.gears()[0].actual_level = 0x10;
        let tag = h
            .master
            .submit(cmd::RECALL_MAX_LEVEL(AddressMode::Broadcast))
            .unwrap();
        assert_eq!(h.sent(), vec![[0xff, opcode::RECALL_MAX_LEVEL]]);
        assert!(!h.master.receive_armed());
        assert_eq!(h.master.bus_state(), BusState::Idle);
        assert_eq!(h.master.take_done(), Some(tag));
        assert_eq!(h.master.take_response(), None);
        assert_eq!(h.sim.gears()[0].actual_level, 0xfe);
    }

    #[test]
    fn query_status_returns_raw_answer() {
        // Nothing on the bus answers, the backward frame is injected
        let mut h = Harness::new(SimBus::new());
        let tag = h.master.submit(cmd::QUERY_STATUS(Short::new(5))).unwrap();
        assert_eq!(h.sent(), vec![[0x0b, 0x90]]);
        h.advance(3);
        assert_eq!(h.master.bus_state(), BusState::SettlingDelay);
        assert!(!h.master.receive_armed());
        h.advance(1);
        assert!(h.master.receive_armed());
        assert_eq!(h.master.bus_state(), BusState::AwaitingBackwardFrame);
        h.isr.post(CodecEvent::RecvDone(vec![0xff]));
        h.master.dispatch();
        assert_eq!(
            h.master.take_response(),
            Some(Response {
                tag,
                address: Short::new(5).into(),
                reply: Ok(Some(0xff))
            })
        );
        assert_eq!(h.master.bus_state(), BusState::Idle);
    }

    #[test]
    fn queue_full_keeps_queued_messages() {
        let mut h = Harness::with_short(0);
        h.master.codec_mut().set_stuck(true);
        h.master.submit(cmd::OFF(AddressMode::Broadcast)).unwrap();
        h.master.submit(cmd::UP(AddressMode::Broadcast)).unwrap();
        h.master.submit(cmd::DOWN(AddressMode::Broadcast)).unwrap();
        assert_eq!(
            h.master.submit(cmd::STEP_UP(AddressMode::Broadcast)),
            Err(DaliError::QueueFull)
        );
        assert_eq!(
            h.master.queue_get_next_outbound_message().map(|m| m.opcode),
            Some(opcode::UP)
        );
        assert_eq!(
            h.master.queue_get_next_outbound_message().map(|m| m.opcode),
            Some(opcode::DOWN)
        );
        assert_eq!(h.master.queue_get_next_outbound_message(), None);
    }

    #[test]
    fn exchanges_do_not_interleave() {
        let mut h = Harness::with_short(5);
        let query = h.master.submit(cmd::QUERY_ACTUAL_LEVEL(Short::new(5))).unwrap();
        let recall = h
            .master
            .submit(cmd::RECALL_MIN_LEVEL(AddressMode::Broadcast))
            .unwrap();
        h.advance(3);
        assert_eq!(h.sent().len(), 1);
        h.advance(1);
        assert_eq!(
            h.sent(),
            vec![[0x0b, opcode::QUERY_ACTUAL_LEVEL], [0xff, opcode::RECALL_MIN_LEVEL]]
        );
        assert_eq!(h.master.take_response().map(|r| r.reply), Some(Ok(Some(0xfe))));
        assert_eq!(h.master.take_done(), Some(query));
        assert_eq!(h.master.take_done(), Some(recall));
        assert_eq!(h.sim.gears()[0].actual_level, 0x01);
    }

    #[test]
    fn stop_receive() {
        let mut h = Harness::new(SimBus::new());
        h.master.stop_receive();
        h.master.stop_receive();
        assert_eq!(h.master.bus_state(), BusState::Idle);
        assert_eq!(h.master.take_done(), None);

        let tag = h.master.submit(cmd::QUERY_STATUS(Short::new(2))).unwrap();
        h.advance(2);
        h.master.stop_receive();
        assert_eq!(h.master.bus_state(), BusState::Idle);
        assert_eq!(
            h.master.take_response().map(|r| (r.tag, r.reply)),
            Some((tag, Err(DaliError::Aborted)))
        );
        h.master.stop_receive();
        assert_eq!(h.master.take_response(), None);
    }

    #[test]
    fn early_backward_frame_is_retried_once() {
        let mut h = Harness::new(SimBus::new());
        h.master.submit(cmd::QUERY_STATUS(Short::new(5))).unwrap();
        h.advance(1);
        h.isr.post(CodecEvent::RecvDone(vec![0x12]));
        h.master.dispatch();
        assert_eq!(h.sent().len(), 2);
        assert_eq!(h.master.take_response(), None);
        h.advance(1);
        h.isr.post(CodecEvent::RecvDone(vec![0x12]));
        h.master.dispatch();
        assert_eq!(h.sent().len(), 2);
        assert_eq!(
            h.master.take_response().map(|r| r.reply),
            Some(Err(DaliError::FramingError))
        );
    }

    #[test]
    fn no_answer_from_group_is_no() {
        let mut h = Harness::new(SimBus::new());
        h.master
            .submit(cmd::QUERY_CONTROL_GEAR_PRESENT(AddressMode::Broadcast))
            .unwrap();
        h.advance(26);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.master.take_response().map(|r| r.reply), Some(Ok(None)));

        h.master.submit(cmd::QUERY_STATUS(Short::new(9))).unwrap();
        h.advance(52);
        assert_eq!(h.sent().len(), 3);
        assert_eq!(
            h.master.take_response().map(|r| r.reply),
            Some(Err(DaliError::ResponseTimeout))
        );
    }

    #[test]
    fn stuck_transmitter_times_out() {
        let mut h = Harness::new(SimBus::new());
        h.master.codec_mut().set_stuck(true);
        h.master.submit(cmd::OFF(AddressMode::Broadcast)).unwrap();
        h.advance(50);
        assert_eq!(h.sent().len(), 2);
        h.advance(50);
        assert_eq!(
            h.master.take_response().map(|r| r.reply),
            Some(Err(DaliError::TransmitTimeout))
        );
        assert_eq!(h.master.bus_state(), BusState::Idle);
    }

    #[test]
    fn bus_fault_blocks_requests() {
        let mut h = Harness::with_short(0);
        h.master.codec_mut().set_stuck(true);
        h.master.submit(cmd::OFF(AddressMode::Broadcast)).unwrap();
        let queued = h.master.submit(cmd::UP(AddressMode::Broadcast)).unwrap();
        h.sim.line().set(LineLevel::Low);
        h.master.poll_monitor();
        assert_eq!(h.master.bus_state(), BusState::Transmitting);
        h.master.poll_monitor();
        assert_eq!(h.master.bus_state(), BusState::Fault);
        assert!(h.master.is_busy());
        assert_eq!(
            h.master.take_response().map(|r| (r.tag, r.reply)),
            Some((queued, Err(DaliError::BusFault)))
        );
        assert_eq!(
            h.master.submit(cmd::OFF(AddressMode::Broadcast)),
            Err(DaliError::BusFault)
        );
        // No retry while faulty
        h.advance(50);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(
            h.master.take_response().map(|r| r.reply),
            Some(Err(DaliError::TransmitTimeout))
        );

        h.sim.line().set(LineLevel::High);
        h.master.codec_mut().set_stuck(false);
        h.master.poll_monitor();
        assert_eq!(h.master.bus_state(), BusState::Idle);
        let tag = h.master.submit(cmd::OFF(AddressMode::Broadcast)).unwrap();
        assert_eq!(h.master.take_done(), Some(queued));
        assert_eq!(h.master.take_done().map(|_| ()), Some(()));
        assert_eq!(h.master.take_done(), Some(tag));
    }

    #[test]
    fn commission_simulated_gears() {
        const COUNT: usize = 6;
        let mut h = Harness::new(SimBus::with_gears(COUNT, 42));
        h.master
            .start_commissioning(CommissionMode::All, 0)
            .unwrap();
        assert_eq!(
            h.master.submit(cmd::OFF(AddressMode::Broadcast)),
            Err(DaliError::CommissioningActive)
        );
        let mut result = None;
        for _ in 0..120_000 {
            h.advance(1);
            if let Some(r) = h.master.take_commissioning_result() {
                result = Some(r);
                break;
            }
        }
        let report = result.unwrap().unwrap();
        assert_eq!(report.assigned.len(), COUNT);
        assert!(report.rounds <= 24 * COUNT as u32);
        let shorts: HashSet<Short> = report.assigned.iter().map(|a| a.short).collect();
        assert_eq!(shorts.len(), COUNT);
        let mut streamed = Vec::new();
        while let Some(a) = h.master.take_assignment() {
            streamed.push(a);
        }
        assert_eq!(streamed, report.assigned);
        for gear in h.sim.gears().iter() {
            let assignment = report
                .assigned
                .iter()
                .find(|a| a.long == gear.random_address)
                .unwrap();
            assert_eq!(gear.short_address, assignment.short.value());
        }
        assert!(!h.master.commissioning_active());
        assert!(h.master.submit(cmd::OFF(AddressMode::Broadcast)).is_ok());
    }

    fn run_commissioning(h: &mut Harness) -> Result<CommissioningReport, DaliError> {
        for _ in 0..120_000 {
            h.advance(1);
            if let Some(r) = h.master.take_commissioning_result() {
                return r;
            }
        }
        panic!("Commissioning did not finish");
    }

    #[test]
    fn twins_get_separate_short_addresses() {
        let mut h = Harness::new(SimBus::with_gears(2, 1));
        h.master.start_commissioning(CommissionMode::All, 0).unwrap();
        h.advance(60);
        {
            let mut gears = h.sim.gears();
            gears[1].random_address = gears[0].random_address;
        }
        let report = run_commissioning(&mut h).unwrap();
        assert_eq!(report.collisions, 1);
        assert_eq!(report.assigned.len(), 2);
        let gears = h.sim.gears();
        assert_ne!(gears[0].short_address, gears[1].short_address);
        assert!(gears.iter().all(|g| g.short_address <= Short::MAX));
    }

    #[test]
    fn aborted_commissioning_terminates() {
        let mut h = Harness::new(SimBus::with_gears(3, 5));
        h.master.start_commissioning(CommissionMode::All, 0).unwrap();
        for _ in 0..1000 {
            if h.master.receive_armed() {
                break;
            }
            h.advance(1);
        }
        assert!(h.master.receive_armed());
        h.master.stop_receive();
        assert_eq!(run_commissioning(&mut h), Err(DaliError::Aborted));
        assert_eq!(h.sent().last(), Some(&[opcode::TERMINATE, 0x00]));
        assert!(h
            .sim
            .gears()
            .iter()
            .all(|g| g.initialisation_state == InitialisationState::Disabled));
        assert!(!h.master.commissioning_active());
    }
}
