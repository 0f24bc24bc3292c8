use super::gear::SimGear;
use crate::bus::codec::{BusLine, CodecError, LineLevel, ManchesterCodec};
use crate::bus::event::{CodecEvent, IsrHandle};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Gears sharing one simulated bus
#[derive(Clone, Default)]
pub struct SimBus {
    gears: Arc<Mutex<Vec<SimGear>>>,
    line: SimLine,
}

impl SimBus {
    pub fn new() -> SimBus {
        SimBus::default()
    }

    /// Bus with `count` unaddressed gears, seeded from `seed`
    pub fn with_gears(count: usize, seed: u64) -> SimBus {
        let bus = SimBus::new();
        for i in 0..count {
            bus.add_gear(SimGear::new(seed.wrapping_add(i as u64)));
        }
        bus
    }

    pub fn add_gear(&self, gear: SimGear) {
        self.gears().push(gear);
    }

    pub fn gears(&self) -> MutexGuard<'_, Vec<SimGear>> {
        self.gears.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn codec(&self, isr: IsrHandle) -> SimCodec {
        SimCodec {
            gears: self.gears.clone(),
            isr,
            answers: Vec::new(),
            sent: Vec::new(),
            stuck: false,
            receiving: false,
        }
    }

    pub fn line(&self) -> SimLine {
        self.line.clone()
    }
}

/// Codec delivering forward frames to every gear on the bus.
///
/// Backward frames combine like on a real bus: identical answers look like
/// one answer, different answers collide.
pub struct SimCodec {
    gears: Arc<Mutex<Vec<SimGear>>>,
    isr: IsrHandle,
    answers: Vec<u8>,
    sent: Vec<[u8; 2]>,
    stuck: bool,
    receiving: bool,
}

impl SimCodec {
    /// Forward frames sent so far
    pub fn sent(&self) -> &[[u8; 2]] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// A stuck codec never reports transmit done
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }
}

impl ManchesterCodec for SimCodec {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        let frame: [u8; 2] = frame.try_into().map_err(|_| CodecError::Driver(1))?;
        self.sent.push(frame);
        if self.stuck {
            return Ok(());
        }
        let mut gears = self.gears.lock().unwrap_or_else(PoisonError::into_inner);
        self.answers = gears.iter_mut().filter_map(|g| g.forward(frame)).collect();
        debug!("Sim {:02x?} -> {:02x?}", frame, self.answers);
        self.isr.post(CodecEvent::XmitDone);
        Ok(())
    }

    fn receive(&mut self, length: usize) -> Result<(), CodecError> {
        if length != 1 {
            return Err(CodecError::Driver(2));
        }
        self.receiving = true;
        let answers = std::mem::take(&mut self.answers);
        match answers.split_first() {
            None => {}
            Some((first, rest)) => {
                self.receiving = false;
                if rest.iter().all(|a| a == first) {
                    self.isr.post(CodecEvent::RecvDone(vec![*first]));
                } else {
                    self.isr.post(CodecEvent::RecvError);
                }
            }
        }
        Ok(())
    }

    fn stop_receive(&mut self) {
        self.receiving = false;
    }
}

/// Line level controlled from tests
#[derive(Clone)]
pub struct SimLine(Arc<Mutex<LineLevel>>);

impl Default for SimLine {
    fn default() -> Self {
        SimLine(Arc::new(Mutex::new(LineLevel::High)))
    }
}

impl SimLine {
    pub fn set(&self, level: LineLevel) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = level;
    }
}

impl BusLine for SimLine {
    fn sample(&mut self) -> LineLevel {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
