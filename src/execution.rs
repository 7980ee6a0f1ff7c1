//! One command round trip on its own thread.
//!
//! A [`CommandExecution`] holds the request and the shared transport. Once
//! started it locks the transport, writes the request, waits the command's
//! settle time, reads the answer and unlocks. The lock spans the whole
//! exchange so answers are always read by the execution that sent the request.

use crate::codec::hex;
use crate::command::Command;
use crate::error::{FrameDefect, Result, ShdlcError};
use crate::frame::{MisoFrame, MosiFrame, Response};
use crate::transport::{SharedTransport, Transport};
use log::{debug, trace};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce(&MisoFrame) + Send + 'static>;

/// Lifecycle of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// Timestamps taken during a round trip
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionTrace {
    pub started: Option<Instant>,
    pub command_sent: Option<Instant>,
    pub read_started: Option<Instant>,
    pub ended: Option<Instant>,
}

fn between(from: Option<Instant>, to: Option<Instant>) -> Option<Duration> {
    Some(to?.saturating_duration_since(from?))
}

impl ExecutionTrace {
    pub fn write_duration(&self) -> Option<Duration> {
        between(self.started, self.command_sent)
    }

    pub fn read_duration(&self) -> Option<Duration> {
        between(self.read_started, self.ended)
    }

    pub fn total_duration(&self) -> Option<Duration> {
        between(self.started, self.ended)
    }
}

impl fmt::Display for ExecutionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Option<Duration>| {
            d.map(|d| format!("{:.1}", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "{} ms (write: {}, read: {} ms)",
            ms(self.total_duration()),
            ms(self.write_duration()),
            ms(self.read_duration())
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    state: ExecutionState,
    trace: ExecutionTrace,
}

fn record(progress: &Mutex<Progress>, update: impl FnOnce(&mut Progress)) {
    update(&mut progress.lock().unwrap_or_else(PoisonError::into_inner));
}

/// A request ready to be sent.
pub struct CommandExecution<T> {
    transport: SharedTransport<T>,
    request: MosiFrame,
    callback: Option<Callback>,
}

impl<T: Transport + 'static> CommandExecution<T> {
    pub fn new(transport: SharedTransport<T>, request: MosiFrame) -> Self {
        Self {
            transport,
            request,
            callback: None,
        }
    }

    pub fn command(&self) -> Command {
        self.request.command()
    }

    pub fn request(&self) -> &MosiFrame {
        &self.request
    }

    /// Registers the function receiving the decoded response.
    ///
    /// Only called when the exchange succeeds.
    ///
    /// # Errors
    ///
    /// [`ShdlcError::CallbackAlreadyRegistered`] on a second registration.
    pub fn register_callback<F>(&mut self, on_complete: F) -> Result<()>
    where
        F: FnOnce(&MisoFrame) + Send + 'static,
    {
        if self.callback.is_some() {
            return Err(ShdlcError::CallbackAlreadyRegistered);
        }
        self.callback = Some(Box::new(on_complete));
        Ok(())
    }

    /// Spawns the round trip and returns at once.
    pub fn start(self) -> Result<PendingCommand> {
        let command = self.command();
        let progress = Arc::new(Mutex::new(Progress {
            state: ExecutionState::Created,
            trace: ExecutionTrace::default(),
        }));

        let shared = Arc::clone(&progress);
        let CommandExecution {
            transport,
            request,
            callback,
        } = self;
        let handle = thread::Builder::new()
            .name(format!("sps30-{:02x}", command.code()))
            .spawn(move || run(&transport, &request, callback, &shared))
            .map_err(|_| ShdlcError::ExecutionAborted(command))?;

        Ok(PendingCommand {
            command,
            handle,
            progress,
        })
    }

    /// Runs the round trip and waits for it.
    ///
    /// # Errors
    ///
    /// Whatever the exchange failed with.
    pub fn execute(self) -> Result<CompletedCommand> {
        let completed = self.start()?.join();
        completed.raise_on_error()?;
        Ok(completed)
    }

    /// Runs the round trip in the background, handing the response to
    /// `on_complete`. Failures stay on the execution for inspection.
    pub fn execute_async<F>(mut self, on_complete: F) -> Result<PendingCommand>
    where
        F: FnOnce(&MisoFrame) + Send + 'static,
    {
        self.register_callback(on_complete)?;
        self.start()
    }
}

fn run<T: Transport>(
    transport: &Mutex<T>,
    request: &MosiFrame,
    callback: Option<Callback>,
    progress: &Mutex<Progress>,
) -> CompletedCommand {
    let command = request.command();
    record(progress, |p| {
        p.state = ExecutionState::Running;
        p.trace.started = Some(Instant::now());
    });

    let outcome = exchange(transport, request, progress).and_then(|raw| {
        let frame = MisoFrame::decode(&raw)?;
        if frame.command() != command {
            return Err(ShdlcError::malformed(
                FrameDefect::CommandMismatch {
                    expected: command.code(),
                    received: frame.command().code(),
                },
                &raw,
            ));
        }
        Ok(frame)
    });

    if let (Ok(frame), Some(on_complete)) = (&outcome, callback) {
        on_complete(frame);
    }

    let mut trace = ExecutionTrace::default();
    record(progress, |p| {
        p.trace.ended = Some(Instant::now());
        p.state = if outcome.is_ok() {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };
        trace = p.trace;
    });
    debug!("{} executed in {}", command, trace);

    CompletedCommand {
        command,
        outcome,
        trace,
    }
}

/// Write, settle, read, all under the transport lock.
fn exchange<T: Transport>(
    transport: &Mutex<T>,
    request: &MosiFrame,
    progress: &Mutex<Progress>,
) -> Result<Vec<u8>> {
    let command = request.command();
    let bytes = request.to_bytes();
    let mut port = transport.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(preamble) = command.preamble() {
        trace!("tx {}", hex(preamble));
        port.write(preamble)?;
    }
    trace!("tx {}", hex(&bytes));
    port.write(&bytes)?;
    record(progress, |p| p.trace.command_sent = Some(Instant::now()));

    thread::sleep(command.settle_time());

    record(progress, |p| p.trace.read_started = Some(Instant::now()));
    let raw = port.read_all()?;
    trace!("rx {}", hex(&raw));

    let recovery = command.recovery_time();
    if !raw.is_empty() && !recovery.is_zero() {
        thread::sleep(recovery);
    }
    Ok(raw)
}

/// A running execution.
pub struct PendingCommand {
    command: Command,
    handle: JoinHandle<CompletedCommand>,
    progress: Arc<Mutex<Progress>>,
}

impl PendingCommand {
    pub fn command(&self) -> Command {
        self.command
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn state(&self) -> ExecutionState {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Trace recorded so far
    pub fn trace(&self) -> ExecutionTrace {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trace
    }

    /// Blocks until the execution is done.
    pub fn join(self) -> CompletedCommand {
        let command = self.command;
        let progress = self.progress;
        self.handle.join().unwrap_or_else(|_| CompletedCommand {
            command,
            outcome: Err(ShdlcError::ExecutionAborted(command)),
            trace: progress.lock().unwrap_or_else(PoisonError::into_inner).trace,
        })
    }
}

/// A finished execution and what it produced.
#[derive(Debug, Clone)]
pub struct CompletedCommand {
    command: Command,
    outcome: Result<MisoFrame>,
    trace: ExecutionTrace,
}

impl CompletedCommand {
    pub fn command(&self) -> Command {
        self.command
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the stored failure, if any.
    pub fn raise_on_error(&self) -> Result<()> {
        self.result().map(|_| ())
    }

    /// Decoded response frame
    pub fn result(&self) -> Result<&MisoFrame> {
        self.outcome.as_ref().map_err(Clone::clone)
    }

    /// Typed interpretation of the response
    pub fn response(&self) -> Result<Response> {
        self.result()?.interpret()
    }

    pub fn into_result(self) -> Result<MisoFrame> {
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::frame::encode_response;
    use crate::simulator::{DeviceSimulator, Malfunction};
    use std::collections::VecDeque;
    use std::sync::mpsc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Write(Vec<u8>),
        Read,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Vec<u8>>,
        events: Vec<Event>,
        fail_writes: bool,
    }

    impl ScriptedTransport {
        fn replying(replies: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::WriteTimeout(Duration::from_millis(1)));
            }
            self.events.push(Event::Write(bytes.to_vec()));
            Ok(())
        }

        fn read_all(&mut self) -> std::result::Result<Vec<u8>, TransportError> {
            self.events.push(Event::Read);
            Ok(self.replies.pop_front().unwrap_or_default())
        }
    }

    fn shared(transport: ScriptedTransport) -> SharedTransport<ScriptedTransport> {
        Arc::new(Mutex::new(transport))
    }

    fn request(command: Command) -> MosiFrame {
        MosiFrame::new(command, Vec::new()).unwrap()
    }

    fn ok_reply(command: Command, payload: &[u8]) -> Vec<u8> {
        encode_response(command.code(), 0, payload).unwrap()
    }

    #[test]
    fn execute_returns_frame_and_trace() {
        let transport = shared(ScriptedTransport::replying([ok_reply(
            Command::ReadVersion,
            &[2, 3, 0, 7, 0, 2, 0],
        )]));
        let completed = CommandExecution::new(transport.clone(), request(Command::ReadVersion))
            .execute()
            .unwrap();

        assert_eq!(completed.result().unwrap().command(), Command::ReadVersion);
        let trace = completed.trace();
        assert!(trace.started.unwrap() <= trace.command_sent.unwrap());
        assert!(trace.command_sent.unwrap() <= trace.read_started.unwrap());
        assert!(trace.read_started.unwrap() <= trace.ended.unwrap());
        assert!(trace.total_duration().unwrap() >= Command::ReadVersion.settle_time());

        let guard = transport.lock().unwrap();
        let events = &guard.events;
        assert_eq!(
            events,
            &[
                Event::Write(request(Command::ReadVersion).to_bytes()),
                Event::Read
            ]
        );
    }

    #[test]
    fn wake_up_sends_pulse_first() {
        let transport = shared(ScriptedTransport::replying([ok_reply(Command::WakeUp, &[])]));
        CommandExecution::new(transport.clone(), request(Command::WakeUp))
            .execute()
            .unwrap();

        let guard = transport.lock().unwrap();
        let events = &guard.events;
        assert_eq!(events[0], Event::Write(vec![0xFF]));
        assert_eq!(events[1], Event::Write(request(Command::WakeUp).to_bytes()));
    }

    #[test]
    fn failed_write_skips_read() {
        let transport = shared(ScriptedTransport {
            fail_writes: true,
            ..ScriptedTransport::default()
        });
        let completed = CommandExecution::new(transport.clone(), request(Command::Reset))
            .start()
            .unwrap()
            .join();

        assert!(matches!(
            completed.raise_on_error(),
            Err(ShdlcError::Transport(TransportError::WriteTimeout(_)))
        ));
        // stored failure can be raised again
        assert!(completed.raise_on_error().is_err());
        assert!(completed.trace().command_sent.is_none());
        assert!(transport.lock().unwrap().events.is_empty());
    }

    #[test]
    fn empty_read_is_no_data() {
        let transport = shared(ScriptedTransport::default());
        let err = CommandExecution::new(transport, request(Command::ReadMeasuredValues))
            .execute()
            .unwrap_err();
        assert!(matches!(err, ShdlcError::NoData));
    }

    #[test]
    fn answer_to_other_command_is_rejected() {
        let transport = shared(ScriptedTransport::replying([ok_reply(Command::Reset, &[])]));
        let err = CommandExecution::new(transport, request(Command::StopMeasurement))
            .execute()
            .unwrap_err();
        assert!(matches!(
            err,
            ShdlcError::MalformedFrame {
                defect: FrameDefect::CommandMismatch {
                    expected: 0x01,
                    received: 0xD3
                },
                ..
            }
        ));
    }

    #[test]
    fn callback_receives_frame() {
        let transport = shared(ScriptedTransport::replying([ok_reply(Command::Reset, &[])]));
        let (tx, rx) = mpsc::channel();
        let pending = CommandExecution::new(transport, request(Command::Reset))
            .execute_async(move |frame| tx.send(frame.command()).unwrap())
            .unwrap();

        let completed = pending.join();
        assert!(completed.succeeded());
        assert_eq!(rx.recv().unwrap(), Command::Reset);
    }

    #[test]
    fn callback_skipped_on_failure() {
        let transport = shared(ScriptedTransport::default());
        let (tx, rx) = mpsc::channel::<Command>();
        let completed = CommandExecution::new(transport, request(Command::Reset))
            .execute_async(move |frame| tx.send(frame.command()).unwrap())
            .unwrap()
            .join();

        assert!(matches!(completed.raise_on_error(), Err(ShdlcError::NoData)));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn second_callback_is_refused() {
        let transport = shared(ScriptedTransport::default());
        let mut execution = CommandExecution::new(transport, request(Command::Reset));
        execution.register_callback(|_| {}).unwrap();
        assert!(matches!(
            execution.register_callback(|_| {}),
            Err(ShdlcError::CallbackAlreadyRegistered)
        ));
        assert!(matches!(
            execution.execute_async(|_| {}),
            Err(ShdlcError::CallbackAlreadyRegistered)
        ));
    }

    #[test]
    fn concurrent_executions_do_not_interleave() {
        let replies = (0..8).map(|_| ok_reply(Command::Reset, &[]));
        let transport = shared(ScriptedTransport::replying(replies));

        let pending: Vec<_> = (0..8)
            .map(|_| {
                CommandExecution::new(transport.clone(), request(Command::Reset))
                    .start()
                    .unwrap()
            })
            .collect();
        for p in pending {
            assert!(p.join().succeeded());
        }

        let guard = transport.lock().unwrap();
        let events = &guard.events;
        assert_eq!(events.len(), 16);
        for pair in events.chunks(2) {
            assert!(matches!(pair[0], Event::Write(_)));
            assert_eq!(pair[1], Event::Read);
        }
    }

    fn simulated(simulator: DeviceSimulator) -> SharedTransport<DeviceSimulator> {
        let transport = Arc::new(Mutex::new(simulator));
        transport.lock().unwrap().open().unwrap();
        transport
    }

    fn wait_until_finished(pending: &PendingCommand) -> ExecutionTrace {
        let mut last = pending.trace();
        while !pending.is_finished() {
            let trace = pending.trace();
            // timestamps only ever get filled in
            assert!(last.started.is_none() || trace.started == last.started);
            assert!(last.command_sent.is_none() || trace.command_sent == last.command_sent);
            last = trace;
            thread::sleep(Duration::from_millis(1));
        }
        pending.trace()
    }

    #[test]
    fn pending_state_follows_the_round_trip() {
        let transport = simulated(DeviceSimulator::new());
        let guard = transport.lock().unwrap();

        let pending = CommandExecution::new(transport.clone(), request(Command::ReadVersion))
            .start()
            .unwrap();
        assert_eq!(pending.command(), Command::ReadVersion);
        assert!(matches!(
            pending.state(),
            ExecutionState::Created | ExecutionState::Running
        ));
        while pending.state() != ExecutionState::Running {
            thread::sleep(Duration::from_millis(1));
        }
        // blocked on the transport
        assert!(!pending.is_finished());
        assert!(pending.trace().started.is_some());
        assert!(pending.trace().command_sent.is_none());
        drop(guard);

        let trace = wait_until_finished(&pending);
        assert_eq!(pending.state(), ExecutionState::Succeeded);
        assert!(trace.ended.is_some());
        assert!(trace.read_started.unwrap() <= trace.ended.unwrap());

        let frame = pending.join().into_result().unwrap();
        assert_eq!(frame.command(), Command::ReadVersion);
        assert!(matches!(frame.interpret(), Ok(Response::Versions(_))));
    }

    #[test]
    fn pending_state_reports_failure() {
        let timeout = Duration::from_millis(20);
        let mut simulator = DeviceSimulator::new().with_timeouts(timeout, timeout);
        simulator.inject(Malfunction::NotResponding);
        let transport = simulated(simulator);

        let pending = CommandExecution::new(transport, request(Command::ReadDeviceStatus))
            .start()
            .unwrap();
        let trace = wait_until_finished(&pending);
        assert_eq!(pending.state(), ExecutionState::Failed);
        assert!(trace.ended.is_some());
        assert!(trace.command_sent.is_none());

        let completed = pending.join();
        assert!(!completed.succeeded());
        assert!(matches!(
            completed.into_result(),
            Err(ShdlcError::Transport(TransportError::WriteTimeout(t))) if t == timeout
        ));
    }

    #[test]
    fn trace_display() {
        let now = Instant::now();
        let trace = ExecutionTrace {
            started: Some(now),
            command_sent: Some(now + Duration::from_millis(2)),
            read_started: Some(now + Duration::from_millis(22)),
            ended: Some(now + Duration::from_millis(25)),
        };
        assert_eq!(trace.to_string(), "25.0 ms (write: 2.0, read: 3.0 ms)");
        assert_eq!(ExecutionTrace::default().total_duration(), None);
    }
}
