use crate::bus::message::{Message, Reply};
use crate::common::address::{Long, Short, LONG_MAX};
use crate::common::cmd_defs::MASK;
use crate::config::BusConfig;
use crate::error::DaliError;
use crate::gear::cmd_defs as cmd;
use crate::utils::parameters::{IDENTIFICATION_LENGTH, IDENTIFICATION_NUMBER};
use log::{debug, info, warn};
use serde_derive::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Which devices take part in commissioning
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionMode {
    /// Every device gets a new short address
    All,
    /// Only devices without a short address
    Unaddressed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub long: Long,
    pub short: Short,
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x} -> {}", self.long, self.short)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommissioningReport {
    pub assigned: Vec<Assignment>,
    /// Bisection COMPAREs issued
    pub rounds: u32,
    /// Devices lost during search or programming
    pub failures: u32,
    /// Devices found sharing a random address
    pub collisions: u32,
}

/// What the session wants the control task to do next
#[derive(Debug)]
pub enum Step {
    Send(Message),
    Wait(Duration),
    Finished(Result<CommissioningReport, DaliError>),
}

/// How to interpret the reply to the message in flight
#[derive(Debug, Copy, Clone)]
enum Expect {
    Ack,
    Randomised,
    /// COMPARE at the top of the search space
    AnyLeft,
    Bisect { mid: Long },
    Verify,
    ShortAddress { short: Short },
    /// Identification number cell, `last` for the final one
    Identity { short: Short, last: bool },
    Withdrawn { short: Short },
    Terminated,
}

/// Random address allocation by bisection.
///
/// The search window `low..=high` always contains the lowest random
/// address of the devices still taking part.
pub struct Commissioning {
    reserved: u64,
    used: u64,
    low: Long,
    high: Long,
    pending: VecDeque<(Message, Expect)>,
    awaiting: Option<Expect>,
    wait: Option<Duration>,
    result: Option<Result<CommissioningReport, DaliError>>,
    report: CommissioningReport,
    new_assignments: VecDeque<Assignment>,
    max_failures: u32,
    randomise_delay: Duration,
}

/// Any activity on the bus counts as an answer to COMPARE.
/// A framing error is several devices answering at once.
fn responded(reply: &Reply) -> Result<bool, DaliError> {
    match reply {
        Ok(Some(_)) => Ok(true),
        Ok(None) => Ok(false),
        Err(DaliError::FramingError) => Ok(true),
        Err(e) => Err(e.clone()),
    }
}

impl Commissioning {
    pub fn new(mode: CommissionMode, reserved: u64, config: &BusConfig) -> Commissioning {
        let mut pending = VecDeque::new();
        let initialise = match mode {
            CommissionMode::All => cmd::INITIALISE_ALL(),
            CommissionMode::Unaddressed => cmd::INITIALISE_NO_ADDR(),
        };
        pending.push_back((initialise, Expect::Ack));
        pending.push_back((cmd::RANDOMISE(), Expect::Randomised));
        Commissioning {
            reserved,
            used: 0,
            low: 0,
            high: LONG_MAX,
            pending,
            awaiting: None,
            wait: None,
            result: None,
            report: CommissioningReport::default(),
            new_assignments: VecDeque::new(),
            max_failures: config.max_device_failures,
            randomise_delay: config.randomise_delay(),
        }
    }

    /// Next action. None while a reply is outstanding.
    pub fn next_step(&mut self) -> Option<Step> {
        if self.awaiting.is_some() {
            return None;
        }
        if let Some(duration) = self.wait.take() {
            return Some(Step::Wait(duration));
        }
        if let Some((message, expect)) = self.pending.pop_front() {
            self.awaiting = Some(expect);
            return Some(Step::Send(message));
        }
        Some(Step::Finished(
            self.result
                .take()
                .unwrap_or_else(|| Ok(self.report.clone())),
        ))
    }

    pub fn take_assignment(&mut self) -> Option<Assignment> {
        self.new_assignments.pop_front()
    }

    pub fn report(&self) -> &CommissioningReport {
        &self.report
    }

    fn next_short(&self) -> Option<Short> {
        let taken = self.reserved | self.used;
        (0..=Short::MAX)
            .find(|a| taken & (1u64 << a) == 0)
            .map(Short::new)
    }

    pub fn on_reply(&mut self, reply: Reply) {
        let Some(expect) = self.awaiting.take() else {
            warn!("Unexpected commissioning reply {:?}", reply);
            return;
        };
        debug!("{:?}: {:?}", expect, reply);
        match expect {
            Expect::Ack => {
                if let Err(e) = reply {
                    self.finish(Err(e));
                }
            }
            Expect::Randomised => match reply {
                Ok(_) => {
                    self.wait = Some(self.randomise_delay);
                    self.begin_search();
                }
                Err(e) => self.finish(Err(e)),
            },
            Expect::AnyLeft => match responded(&reply) {
                Ok(true) => {
                    if self.next_short().is_none() {
                        self.finish(Err(DaliError::AddressSpaceExhausted));
                        return;
                    }
                    self.low = 0;
                    self.high = LONG_MAX;
                    self.bisect();
                }
                Ok(false) => {
                    let report = self.report.clone();
                    self.finish(Ok(report));
                }
                Err(e) => self.finish(Err(e)),
            },
            Expect::Bisect { mid } => match responded(&reply) {
                Ok(found) => {
                    self.report.rounds += 1;
                    if found {
                        self.high = mid;
                    } else {
                        self.low = mid + 1;
                    }
                    self.bisect();
                }
                Err(e) => self.finish(Err(e)),
            },
            Expect::Verify => match responded(&reply) {
                Ok(true) => {
                    let Some(short) = self.next_short() else {
                        self.finish(Err(DaliError::AddressSpaceExhausted));
                        return;
                    };
                    debug!("Isolated 0x{:06x}, programming {}", self.low, short);
                    // Search address is already set by the COMPARE
                    self.pending
                        .push_back((cmd::PROGRAM_SHORT_ADDRESS(short.bus_address()), Expect::Ack));
                    self.pending.push_back((
                        cmd::QUERY_SHORT_ADDRESS_AT(self.low),
                        Expect::ShortAddress { short },
                    ));
                }
                Ok(false) => self.device_lost(),
                Err(e) => self.finish(Err(e)),
            },
            Expect::ShortAddress { short } => match reply {
                Ok(Some(a)) if a == short.bus_address() => self.check_identity(short),
                Ok(_) => self.device_lost(),
                Err(DaliError::FramingError) => self.collision(),
                Err(e) => self.finish(Err(e)),
            },
            // Devices sharing a random address answer identically until
            // asked for something unique to each of them
            Expect::Identity { short, last } => match reply {
                Ok(_) | Err(DaliError::ResponseTimeout) => {
                    if last {
                        self.pending
                            .push_back((cmd::WITHDRAW_AT(self.low), Expect::Withdrawn { short }));
                    }
                }
                Err(DaliError::FramingError) => self.collision(),
                Err(e) => self.finish(Err(e)),
            },
            Expect::Withdrawn { short } => match reply {
                Ok(_) => {
                    let assignment = Assignment {
                        long: self.low,
                        short,
                    };
                    info!("Assigned {}", assignment);
                    self.used |= 1u64 << short.value();
                    self.report.assigned.push(assignment);
                    self.new_assignments.push_back(assignment);
                    self.begin_search();
                }
                Err(e) => self.finish(Err(e)),
            },
            Expect::Terminated => {
                if let Err(e) = reply {
                    warn!("TERMINATE failed: {}", e);
                }
            }
        }
    }

    /// Stop the session, still leaving initialisation on the bus
    pub fn abort(&mut self, error: DaliError) {
        self.awaiting = None;
        if self.result.is_none() {
            self.finish(Err(error));
        }
    }

    /// Read the identification number of the device just programmed
    fn check_identity(&mut self, short: Short) {
        self.pending.push_back((
            cmd::DTR1(IDENTIFICATION_NUMBER.bank.number()),
            Expect::Ack,
        ));
        self.pending
            .push_back((cmd::DTR0(IDENTIFICATION_NUMBER.offset), Expect::Ack));
        for i in 0..IDENTIFICATION_LENGTH {
            self.pending.push_back((
                cmd::READ_MEMORY_LOCATION(short).no_retry(),
                Expect::Identity {
                    short,
                    last: i + 1 == IDENTIFICATION_LENGTH,
                },
            ));
        }
    }

    /// Several devices at the isolated random address. Unprogram them
    /// and let them pick new random addresses.
    fn collision(&mut self) {
        warn!("Several devices at random address 0x{:06x}", self.low);
        self.report.collisions += 1;
        self.pending.clear();
        self.pending
            .push_back((cmd::PROGRAM_SHORT_ADDRESS(MASK), Expect::Ack));
        self.pending
            .push_back((cmd::RANDOMISE(), Expect::Randomised));
    }

    fn begin_search(&mut self) {
        self.pending
            .push_back((cmd::COMPARE_AT(LONG_MAX).no_retry(), Expect::AnyLeft));
    }

    fn bisect(&mut self) {
        if self.low >= self.high {
            self.pending
                .push_back((cmd::COMPARE_AT(self.low).no_retry(), Expect::Verify));
        } else {
            let mid = self.low + (self.high - self.low) / 2;
            self.pending
                .push_back((cmd::COMPARE_AT(mid).no_retry(), Expect::Bisect { mid }));
        }
    }

    fn device_lost(&mut self) {
        self.report.failures += 1;
        warn!(
            "Device at 0x{:06x} stopped responding ({} failures)",
            self.low, self.report.failures
        );
        if self.report.failures > self.max_failures {
            self.finish(Err(DaliError::CommissioningStalled));
        } else {
            self.begin_search();
        }
    }

    fn finish(&mut self, result: Result<CommissioningReport, DaliError>) {
        self.pending.clear();
        self.wait = None;
        self.result = Some(result);
        self.pending.push_back((cmd::TERMINATE(), Expect::Terminated));
    }
}
