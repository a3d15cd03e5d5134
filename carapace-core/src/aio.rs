//! Asynchronous operations.
//!
//! An [`Aio`] is a reusable handle for one in-flight send, receive or sleep.
//! The engine completes it from one of its own threads; the optional callback
//! given at construction runs there, exactly once per start.
//!
//! Lifecycle:
//!
//! ```text
//! Idle --start--> Started --engine--> Running (callback) --> Done --start--> ...
//! ```
//!
//! `cancel`, `abort` and timeouts only change how `Started` ends. An `Aio` is
//! freed with [`Aio::free`], which refuses while an operation is in flight and
//! hands the `Aio` back. Dropping a busy `Aio` stops it first.
//!
//! # Examples
//!
//! ```no_run
//! use carapace_core::aio::Aio;
//! use carapace_core::protocol::Protocol;
//! use carapace_core::socket::Socket;
//! use std::time::Duration;
//!
//! # fn example() -> carapace_core::error::Result<()> {
//! let socket = Socket::open(Protocol::Pull0)?;
//! let aio = Aio::new(|done| {
//!     if let Ok(()) = done.result() {
//!         let _msg = done.take_message();
//!     }
//! })?;
//! aio.set_timeout(Some(Duration::from_millis(50)));
//! aio.start_recv(socket)?;
//! aio.wait();
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{error, trace, warn};

use crate::error::{raise_if_error, Error, Result, Status};
use crate::handle::{Context, Socket};
use crate::message::Message;
use crate::native::{self, AioOp, Completer, IoVec, OpId, Outcome, Submission, Target, MAX_IOV};

/// Number of input and of output argument slots.
pub const MAX_SLOTS: usize = 4;

type Callback = Box<dyn Fn(&Completion<'_>) + Send + Sync>;
type Slot = Option<Arc<dyn Any + Send + Sync>>;

/// Socket or context an asynchronous transfer runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AioTarget {
    Socket(Socket),
    Context(Context),
}

impl AioTarget {
    const fn native(self) -> Target {
        match self {
            Self::Socket(socket) => socket.target(),
            Self::Context(context) => context.target(),
        }
    }
}

impl From<Socket> for AioTarget {
    fn from(socket: Socket) -> Self {
        Self::Socket(socket)
    }
}

impl From<Context> for AioTarget {
    fn from(context: Context) -> Self {
        Self::Context(context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Never started.
    Idle,
    /// Submitted; the op id is filled in once `aio_submit` returns.
    Started { op: Option<OpId> },
    /// Completion callback executing on `thread`.
    Running { thread: ThreadId },
    /// Result and count are valid.
    Done,
}

impl State {
    const fn is_busy(self) -> bool {
        matches!(self, Self::Started { .. } | Self::Running { .. })
    }
}

enum Start {
    Send(Target),
    Recv(Target),
    Sleep(Duration),
}

struct Inner {
    state: State,
    generation: u64,
    pending_abort: Option<Status>,
    operation: &'static str,
    status: Status,
    count: usize,
    msg: Option<Message>,
    timeout: Option<Duration>,
    iov: IoVec,
    inputs: [Slot; MAX_SLOTS],
    outputs: [Slot; MAX_SLOTS],
}

struct Shared {
    inner: Mutex<Inner>,
    done: Condvar,
    callback: Option<Callback>,
}

fn slot_index(index: usize, context: &'static str) -> Result<usize> {
    if index < MAX_SLOTS {
        Ok(index)
    } else {
        Err(Error::native(Status::INVALID, context))
    }
}

fn downcast<T: Any + Send + Sync>(slot: &Slot, context: &'static str) -> Result<Option<Arc<T>>> {
    match slot {
        None => Ok(None),
        Some(value) => Arc::clone(value)
            .downcast::<T>()
            .map(Some)
            .map_err(|_| Error::native(Status::BAD_TYPE, context)),
    }
}

impl Shared {
    fn start(self: &Arc<Self>, start: Start, operation: &'static str) -> Result<()> {
        let engine = native::engine()?;
        let mut inner = self.inner.lock();
        if matches!(inner.state, State::Started { .. }) {
            return Err(Error::native(Status::BUSY, operation));
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.state = State::Started { op: None };
        inner.pending_abort = None;
        inner.operation = operation;
        inner.status = Status::SUCCESS;
        inner.count = 0;

        let op = match start {
            Start::Send(target) => AioOp::Send {
                target,
                msg: inner.msg.take(),
            },
            Start::Recv(target) => AioOp::Recv { target },
            Start::Sleep(duration) => AioOp::Sleep { duration },
        };
        let shared = Arc::clone(self);
        let submission = Submission {
            op,
            timeout: inner.timeout,
            iov: inner.iov.clone(),
            completer: Completer::new(move |outcome| shared.finish(generation, outcome)),
        };
        drop(inner);

        trace!(generation, operation, "aio start");
        let op_id = engine.aio_submit(submission);

        let abort = {
            let mut inner = self.inner.lock();
            if inner.generation == generation && inner.state == (State::Started { op: None }) {
                inner.state = State::Started { op: Some(op_id) };
                inner.pending_abort.take()
            } else {
                None
            }
        };
        if let Some(status) = abort {
            engine.aio_abort(op_id, status);
        }
        Ok(())
    }

    fn finish(self: &Arc<Self>, generation: u64, outcome: Outcome) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation || !matches!(inner.state, State::Started { .. }) {
                warn!(generation, "ignoring stale aio completion");
                return;
            }
            inner.state = State::Running {
                thread: thread::current().id(),
            };
            inner.status = outcome.status;
            inner.count = outcome.count;
            if let Some(msg) = outcome.msg {
                inner.msg = Some(msg);
            }
        }
        trace!(generation, status = outcome.status.raw(), "aio complete");

        if let Some(callback) = &self.callback {
            let view = Completion { shared: self };
            if catch_unwind(AssertUnwindSafe(|| callback(&view))).is_err() {
                error!(generation, "aio completion callback panicked");
            }
        }

        {
            let mut inner = self.inner.lock();
            if inner.generation == generation && matches!(inner.state, State::Running { .. }) {
                inner.state = State::Done;
            }
        }
        self.done.notify_all();
    }

    fn abort(&self, status: Status) {
        let Some(engine) = native::installed() else {
            return;
        };
        let op = {
            let mut inner = self.inner.lock();
            match inner.state {
                State::Started { op: Some(op) } => Some(op),
                State::Started { op: None } => {
                    inner.pending_abort = Some(status);
                    None
                }
                _ => None,
            }
        };
        if let Some(op) = op {
            trace!(op = op.0, status = status.raw(), "aio abort");
            engine.aio_abort(op, status);
        }
    }

    fn wait(&self) {
        let me = thread::current().id();
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                State::Started { .. } => {}
                // Waiting from inside our own callback would never return.
                State::Running { thread } if thread != me => {}
                _ => return,
            }
            self.done.wait(&mut inner);
        }
    }

    fn result(&self) -> Result<()> {
        let inner = self.inner.lock();
        match inner.state {
            State::Idle | State::Started { .. } => {
                Err(Error::native(Status::INCORRECT_STATE, "Aio::result"))
            }
            State::Running { .. } | State::Done => raise_if_error(inner.status, inner.operation),
        }
    }

    fn count(&self) -> Result<usize> {
        let inner = self.inner.lock();
        match inner.state {
            State::Idle | State::Started { .. } => {
                Err(Error::native(Status::INCORRECT_STATE, "Aio::count"))
            }
            State::Running { .. } | State::Done => Ok(inner.count),
        }
    }

    fn take_message(&self) -> Option<Message> {
        self.inner.lock().msg.take()
    }

    fn set_message(&self, msg: Option<Message>) {
        self.inner.lock().msg = msg;
    }

    fn input<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        let index = slot_index(index, "Aio::input")?;
        downcast(&self.inner.lock().inputs[index], "Aio::input")
    }

    fn output<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        let index = slot_index(index, "Aio::output")?;
        downcast(&self.inner.lock().outputs[index], "Aio::output")
    }

    fn set_output(&self, index: usize, value: Slot) -> Result<()> {
        let index = slot_index(index, "Aio::set_output")?;
        self.inner.lock().outputs[index] = value;
        Ok(())
    }
}

/// A reusable asynchronous operation.
pub struct Aio {
    shared: Arc<Shared>,
}

impl Aio {
    /// Allocate an operation whose `callback` runs on an engine thread each
    /// time a started operation completes.
    ///
    /// Anything the callback needs (the "user argument") is captured by the
    /// closure.
    pub fn new<F>(callback: F) -> Result<Self>
    where
        F: Fn(&Completion<'_>) + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(callback)))
    }

    /// Allocate an operation without a callback, for use with [`Aio::wait`].
    pub fn without_callback() -> Result<Self> {
        Self::build(None)
    }

    fn build(callback: Option<Callback>) -> Result<Self> {
        native::engine()?;
        let inner = Inner {
            state: State::Idle,
            generation: 0,
            pending_abort: None,
            operation: "Aio::result",
            status: Status::SUCCESS,
            count: 0,
            msg: None,
            timeout: None,
            iov: IoVec::new(),
            inputs: Default::default(),
            outputs: Default::default(),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                done: Condvar::new(),
                callback,
            }),
        })
    }

    /// Send the bound message, or the I/O vector when none is bound.
    ///
    /// Returns immediately. On success the engine owns the message; on failure
    /// it is handed back and can be recovered with [`Aio::take_message`].
    pub fn start_send(&self, target: impl Into<AioTarget>) -> Result<()> {
        self.shared
            .start(Start::Send(target.into().native()), "Aio::start_send")
    }

    /// Receive one message; on success it is bound to this operation.
    pub fn start_recv(&self, target: impl Into<AioTarget>) -> Result<()> {
        self.shared
            .start(Start::Recv(target.into().native()), "Aio::start_recv")
    }

    /// Complete successfully once `duration` has elapsed.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.shared.start(Start::Sleep(duration), "Aio::sleep")
    }

    /// Finish the current operation early with `Canceled`. No-op when
    /// nothing is in flight.
    pub fn cancel(&self) {
        self.shared.abort(Status::CANCELED);
    }

    /// Finish the current operation early with `status`.
    pub fn abort(&self, status: Status) {
        self.shared.abort(status);
    }

    /// Block until the current operation, including its callback, is over.
    pub fn wait(&self) {
        self.shared.wait();
    }

    /// Cancel, then wait.
    pub fn stop(&self) {
        self.cancel();
        self.wait();
    }

    /// Whether an operation is started or its callback is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.shared.inner.lock().state.is_busy()
    }

    /// Outcome of the last completed operation.
    ///
    /// Fails with `IncorrectState` before the first completion or while an
    /// operation is in flight.
    pub fn result(&self) -> Result<()> {
        self.shared.result()
    }

    /// Bytes transferred by the last completed operation.
    pub fn count(&self) -> Result<usize> {
        self.shared.count()
    }

    /// Timeout for the next start. `None` waits forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.shared.inner.lock().timeout = timeout;
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.shared.inner.lock().timeout
    }

    /// Bind the message the next send will transfer.
    pub fn set_message(&self, msg: Message) {
        self.shared.set_message(Some(msg));
    }

    /// Take the bound message: the received one, or one a failed send
    /// returned.
    pub fn take_message(&self) -> Option<Message> {
        self.shared.take_message()
    }

    /// Set the scatter/gather list, at most [`MAX_IOV`] segments.
    pub fn set_iov<I>(&self, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let iov: IoVec = segments.into_iter().collect();
        if iov.len() > MAX_IOV {
            return Err(Error::native(Status::INVALID, "Aio::set_iov"));
        }
        self.shared.inner.lock().iov = iov;
        Ok(())
    }

    pub fn set_input<T: Any + Send + Sync>(&self, index: usize, value: T) -> Result<()> {
        let index = slot_index(index, "Aio::set_input")?;
        self.shared.inner.lock().inputs[index] = Some(Arc::new(value));
        Ok(())
    }

    pub fn clear_input(&self, index: usize) -> Result<()> {
        let index = slot_index(index, "Aio::clear_input")?;
        self.shared.inner.lock().inputs[index] = None;
        Ok(())
    }

    /// Typed input slot. `Ok(None)` when empty, `BadType` when it holds
    /// another type.
    pub fn input<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.shared.input(index)
    }

    pub fn set_output<T: Any + Send + Sync>(&self, index: usize, value: T) -> Result<()> {
        self.shared.set_output(index, Some(Arc::new(value)))
    }

    pub fn output<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.shared.output(index)
    }

    /// Release the operation.
    ///
    /// Refused while an operation is started or its callback is running; the
    /// error gives the `Aio` back so the caller can `stop` it and retry.
    pub fn free(self) -> std::result::Result<(), FreeError> {
        if self.is_busy() {
            return Err(FreeError { aio: self });
        }
        Ok(())
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        if self.is_busy() {
            warn!("aio dropped while in flight, stopping it");
            self.stop();
        }
    }
}

impl fmt::Debug for Aio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Aio")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("timeout", &inner.timeout)
            .finish_non_exhaustive()
    }
}

/// [`Aio::free`] was called while an operation was in flight.
#[derive(Debug, thiserror::Error)]
#[error("aio freed while an operation is in flight")]
pub struct FreeError {
    aio: Aio,
}

impl FreeError {
    /// Recover the operation.
    #[must_use]
    pub fn into_aio(self) -> Aio {
        self.aio
    }
}

impl From<FreeError> for Error {
    fn from(err: FreeError) -> Self {
        // Dropping the returned `Aio` stops it.
        drop(err.aio);
        Self::native(Status::BUSY, "Aio::free")
    }
}

/// View of an [`Aio`] handed to its completion callback.
///
/// Besides reading the outcome, the callback may restart the operation, which
/// is how receive loops are usually written.
pub struct Completion<'a> {
    shared: &'a Arc<Shared>,
}

impl Completion<'_> {
    pub fn result(&self) -> Result<()> {
        self.shared.result()
    }

    pub fn count(&self) -> Result<usize> {
        self.shared.count()
    }

    pub fn take_message(&self) -> Option<Message> {
        self.shared.take_message()
    }

    pub fn set_message(&self, msg: Message) {
        self.shared.set_message(Some(msg));
    }

    pub fn input<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.shared.input(index)
    }

    pub fn output<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.shared.output(index)
    }

    pub fn set_output<T: Any + Send + Sync>(&self, index: usize, value: T) -> Result<()> {
        self.shared.set_output(index, Some(Arc::new(value)))
    }

    pub fn start_send(&self, target: impl Into<AioTarget>) -> Result<()> {
        self.shared
            .start(Start::Send(target.into().native()), "Aio::start_send")
    }

    pub fn start_recv(&self, target: impl Into<AioTarget>) -> Result<()> {
        self.shared
            .start(Start::Recv(target.into().native()), "Aio::start_recv")
    }

    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.shared.start(Start::Sleep(duration), "Aio::sleep")
    }
}

impl fmt::Debug for Completion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}
