use super::codec::{BusLine, ManchesterCodec};
use super::event::IsrReceiver;
use super::master::BusMaster;
use super::message::{Message, Reply, Response, Ticket};
use super::state::BusState;
use crate::common::address::Short;
use crate::config::BusConfig;
use crate::error::{ConfigError, DaliError};
use crate::gear::cmd_defs as cmd;
use crate::utils::commissioning::{Assignment, CommissionMode, CommissioningReport};
use crate::utils::memory_banks;
use crate::utils::parameters::{MemoryBank, ParameterSelector};
use log::{debug, warn};
use std::collections::VecDeque;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

type ExecuteResult = Result<Vec<Reply>, DaliError>;
type CommissionResult = Result<CommissioningReport, DaliError>;

enum Request {
    Execute {
        messages: Vec<Message>,
        reply: oneshot::Sender<ExecuteResult>,
    },
    Commission {
        mode: CommissionMode,
        reserved: u64,
        progress: mpsc::Sender<Assignment>,
        reply: oneshot::Sender<CommissionResult>,
    },
}

/// Messages of one request, sent back to back
struct Execution {
    messages: VecDeque<Message>,
    replies: Vec<Reply>,
    waiting: Option<Ticket>,
    responses: Vec<Response>,
    reply: oneshot::Sender<ExecuteResult>,
}

enum Current {
    Execute(Execution),
    Commission {
        progress: mpsc::Sender<Assignment>,
        reply: oneshot::Sender<CommissionResult>,
    },
}

fn start_request<C, L>(master: &mut BusMaster<C, L>, req: Request) -> Option<Current>
where
    C: ManchesterCodec,
    L: BusLine,
{
    match req {
        Request::Execute { messages, reply } => Some(Current::Execute(Execution {
            messages: messages.into(),
            replies: Vec::new(),
            waiting: None,
            responses: Vec::new(),
            reply,
        })),
        Request::Commission {
            mode,
            reserved,
            progress,
            reply,
        } => match master.start_commissioning(mode, reserved) {
            Ok(()) => Some(Current::Commission { progress, reply }),
            Err(e) => {
                let _ = reply.send(Err(e));
                None
            }
        },
    }
}

/// Advance an execution as far as possible. Returns the result when done.
fn poll_execution<C, L>(master: &mut BusMaster<C, L>, exec: &mut Execution) -> Option<ExecuteResult>
where
    C: ManchesterCodec,
    L: BusLine,
{
    loop {
        if let Some(tag) = exec.waiting {
            while let Some(response) = master.take_response() {
                exec.responses.push(response);
            }
            let mut finished = false;
            while let Some(done) = master.take_done() {
                finished |= done == tag;
            }
            if !finished {
                return None;
            }
            let reply = match exec.responses.iter().position(|r| r.tag == tag) {
                Some(i) => exec.responses.swap_remove(i).reply,
                None => Ok(None),
            };
            exec.responses.clear();
            exec.replies.push(reply);
            exec.waiting = None;
        }
        let Some(message) = exec.messages.pop_front() else {
            return Some(Ok(std::mem::take(&mut exec.replies)));
        };
        match master.submit(message) {
            Ok(tag) => exec.waiting = Some(tag),
            Err(e) => return Some(Err(e)),
        }
    }
}

fn poll_current<C, L>(master: &mut BusMaster<C, L>, current: Current) -> Option<Current>
where
    C: ManchesterCodec,
    L: BusLine,
{
    match current {
        Current::Execute(mut exec) => match poll_execution(master, &mut exec) {
            Some(result) => {
                let _ = exec.reply.send(result);
                None
            }
            None => Some(Current::Execute(exec)),
        },
        Current::Commission { progress, reply } => {
            while let Some(assignment) = master.take_assignment() {
                if progress.try_send(assignment).is_err() {
                    debug!("Assignment {} not delivered", assignment);
                }
            }
            match master.take_commissioning_result() {
                Some(result) => {
                    let _ = reply.send(result);
                    None
                }
                None => Some(Current::Commission { progress, reply }),
            }
        }
    }
}

async fn bus_task<C, L>(
    mut master: BusMaster<C, L>,
    mut requests: mpsc::Receiver<Request>,
    state: watch::Sender<BusState>,
) where
    C: ManchesterCodec,
    L: BusLine,
{
    let start = Instant::now();
    let mut tick = time::interval(master.config().tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut monitor = time::interval(master.config().monitor_period());
    monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut current: Option<Current> = None;
    loop {
        select! {
            req = requests.recv(), if current.is_none() => {
                match req {
                    Some(req) => current = start_request(&mut master, req),
                    None => break,
                }
            },
            _ = tick.tick() => master.tick(start.elapsed()),
            _ = monitor.tick() => master.poll_monitor(),
        }
        if let Some(c) = current.take() {
            current = poll_current(&mut master, c);
        }
        state.send_replace(master.bus_state());
    }
    debug!("Bus task stopped");
}

/// Start a bus master on the tokio runtime
pub fn spawn<C, L>(
    config: BusConfig,
    codec: C,
    line: L,
    isr: IsrReceiver,
) -> Result<BusHandle, ConfigError>
where
    C: ManchesterCodec + 'static,
    L: BusLine + 'static,
{
    let master = BusMaster::new(config, codec, line, isr)?;
    let (tx, rx) = mpsc::channel(10);
    let (state_tx, state_rx) = watch::channel(BusState::Idle);
    tokio::spawn(bus_task(master, rx, state_tx));
    Ok(BusHandle {
        requests: tx,
        state: state_rx,
    })
}

/// Commissioning in progress. Assignments are streamed as they are made.
pub struct CommissioningRun {
    pub assignments: ReceiverStream<Assignment>,
    result: oneshot::Receiver<CommissionResult>,
}

impl CommissioningRun {
    pub async fn finish(self) -> CommissionResult {
        self.result.await.map_err(|_| DaliError::Closed)?
    }
}

/// Client side of a bus task. Requests are handled one at a time.
#[derive(Clone)]
pub struct BusHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<BusState>,
}

impl BusHandle {
    /// Send messages back to back. No other request runs in between.
    pub async fn execute(&self, messages: Vec<Message>) -> ExecuteResult {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Execute {
                messages,
                reply: tx,
            })
            .await
            .map_err(|_| DaliError::Closed)?;
        rx.await.map_err(|_| DaliError::Closed)?
    }

    pub async fn send(&self, message: Message) -> Reply {
        let mut replies = self.execute(vec![message]).await?;
        replies.pop().unwrap_or(Ok(None))
    }

    pub async fn query(&self, addr: Short, opcode: u8) -> Reply {
        self.send(Message::new(addr.into(), opcode).answer()).await
    }

    pub async fn read_parameter(
        &self,
        addr: Short,
        selector: ParameterSelector,
    ) -> Result<u8, DaliError> {
        let plan = memory_banks::read_plan(addr, selector)?;
        memory_banks::read_result(&self.execute(plan).await?)
    }

    pub async fn write_parameter(
        &self,
        addr: Short,
        selector: ParameterSelector,
        value: u8,
    ) -> Result<(), DaliError> {
        let plan = memory_banks::write_plan(addr, selector, value)?;
        memory_banks::write_result(value, &self.execute(plan).await?)
    }

    pub async fn read_memory(
        &self,
        addr: Short,
        bank: MemoryBank,
        start: u8,
        length: u8,
    ) -> Result<Vec<u8>, DaliError> {
        let plan = memory_banks::read_range(addr, bank, start, length)?;
        memory_banks::range_result(start, length, &self.execute(plan).await?)
    }

    /// Bitmap of short addresses answering QUERY_CONTROL_GEAR_PRESENT
    pub async fn scan_addresses(&self) -> Result<u64, DaliError> {
        let plan = (0..=Short::MAX)
            .map(|a| cmd::QUERY_CONTROL_GEAR_PRESENT(Short::new(a)))
            .collect();
        let replies = self.execute(plan).await?;
        let mut found = 0u64;
        for (a, reply) in replies.iter().enumerate() {
            match reply {
                Ok(Some(_)) | Err(DaliError::FramingError) => found |= 1 << a,
                Ok(None) | Err(DaliError::ResponseTimeout) => {}
                Err(e) => return Err(e.clone()),
            }
        }
        Ok(found)
    }

    /// Start commissioning. Addresses in use are kept when only
    /// unaddressed devices are commissioned.
    pub async fn start_commissioning(
        &self,
        mode: CommissionMode,
    ) -> Result<CommissioningRun, DaliError> {
        let reserved = match mode {
            CommissionMode::All => 0,
            CommissionMode::Unaddressed => self.scan_addresses().await?,
        };
        let (progress, assignments) = mpsc::channel(Short::MAX as usize + 1);
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Commission {
                mode,
                reserved,
                progress,
                reply: tx,
            })
            .await
            .map_err(|_| DaliError::Closed)?;
        Ok(CommissioningRun {
            assignments: ReceiverStream::new(assignments),
            result: rx,
        })
    }

    pub async fn commission(&self, mode: CommissionMode) -> CommissionResult {
        let run = self.start_commissioning(mode).await?;
        let result = run.finish().await;
        if let Err(e) = &result {
            warn!("Commissioning failed: {}", e);
        }
        result
    }

    /// State after the last scheduler step
    pub fn bus_state(&self) -> BusState {
        *self.state.borrow()
    }
}
