use super::codec::{BusLine, LineLevel};
use super::event::{ControlEvent, BUS_FAULT};
use super::TaskContext;
use crate::config::BusConfig;
use log::{info, warn};

/// Periodic check of the bus line, independent of any exchange
pub struct MonitorTask<L> {
    line: L,
    low_polls: u32,
    fault_polls: u32,
    fault: bool,
    log_base: u16,
}

impl<L> MonitorTask<L>
where
    L: BusLine,
{
    pub fn new(line: L, config: &BusConfig) -> MonitorTask<L> {
        MonitorTask {
            line,
            low_polls: 0,
            fault_polls: config.monitor_fault_polls,
            fault: false,
            log_base: config.monitor_log_base,
        }
    }

    pub fn fault(&self) -> bool {
        self.fault
    }

    pub fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    /// Sample the line. Only changes between healthy and fault are reported.
    pub fn poll(&mut self, ctx: &mut TaskContext) {
        match self.line.sample() {
            LineLevel::Low => {
                self.low_polls = self.low_polls.saturating_add(1);
                if !self.fault && self.low_polls >= self.fault_polls {
                    warn!(
                        "[{:04x}] Bus stuck low for {} polls",
                        self.log_base + BUS_FAULT as u16,
                        self.low_polls
                    );
                    self.fault = true;
                    ctx.mailbox.post_control(ControlEvent::BusFault(true));
                }
            }
            LineLevel::High => {
                self.low_polls = 0;
                if self.fault {
                    info!("[{:04x}] Bus idle again", self.log_base + BUS_FAULT as u16);
                    self.fault = false;
                    ctx.mailbox.post_control(ControlEvent::BusFault(false));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::event::Mailbox;
    use crate::bus::Queues;
    use std::time::Duration;

    struct Levels(Vec<LineLevel>);

    impl BusLine for Levels {
        fn sample(&mut self) -> LineLevel {
            self.0.remove(0)
        }
    }

    #[test]
    fn reports_transitions_only() {
        use LineLevel::*;
        let config = BusConfig::default();
        let levels = Levels(vec![Low, High, Low, Low, Low, High, High]);
        let mut monitor = MonitorTask::new(levels, &config);
        let mut queues = Queues::new(1, 1);
        let mut mailbox = Mailbox::default();
        let mut ctx = TaskContext {
            now: Duration::ZERO,
            queues: &mut queues,
            mailbox: &mut mailbox,
        };
        for _ in 0..7 {
            monitor.poll(&mut ctx);
        }
        assert_eq!(
            mailbox.control.into_iter().collect::<Vec<_>>(),
            vec![ControlEvent::BusFault(true), ControlEvent::BusFault(false)]
        );
    }
}
