//! Native collaborator surface.
//!
//! The safe layer never touches sockets, threads or transports itself. All of
//! that lives behind the [`Engine`] trait, whose calls mirror a status-code
//! returning C interface: every call yields a [`NativeResult`] and nothing
//! else. One engine is installed per process.
//!
//! Asynchronous operations are handed to the engine as a [`Submission`]. The
//! engine reports the outcome through the submission's [`Completer`] from one
//! of its own threads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use tracing::debug;

use crate::address::SockAddr;
use crate::error::{Error, Result, Status};
use crate::handle::Pipe;
use crate::message::Message;
use crate::pipe::PipeEvent;
use crate::protocol::Protocol;

/// Result of a single engine call.
pub type NativeResult<T> = std::result::Result<T, Status>;

/// Maximum number of I/O vector segments an AIO may carry.
pub const MAX_IOV: usize = 8;

/// Scatter/gather list attached to an AIO.
pub type IoVec = SmallVec<[Bytes; MAX_IOV]>;

/// Pipe notification callback as registered with the engine.
pub type PipeCallback = Arc<dyn Fn(Pipe, PipeEvent) + Send + Sync>;

/// Object an option call or an asynchronous transfer is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Socket(u32),
    Context(u32),
    Dialer(u32),
    Listener(u32),
    Pipe(u32),
}

impl Target {
    /// Raw identifier of the addressed object.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Socket(id)
            | Self::Context(id)
            | Self::Dialer(id)
            | Self::Listener(id)
            | Self::Pipe(id) => id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(id) => write!(f, "socket#{id}"),
            Self::Context(id) => write!(f, "context#{id}"),
            Self::Dialer(id) => write!(f, "dialer#{id}"),
            Self::Listener(id) => write!(f, "listener#{id}"),
            Self::Pipe(id) => write!(f, "pipe#{id}"),
        }
    }
}

/// Opaque pointer-like option value.
///
/// Used for objects the engine only hands around, such as a TLS configuration.
/// Two values are equal when they point at the same allocation.
#[derive(Clone)]
pub struct OpaquePtr(Arc<dyn Any + Send + Sync>);

impl OpaquePtr {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    #[must_use]
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    /// Borrow the pointee if it has type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    #[must_use]
    pub fn as_arc(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.0
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for OpaquePtr {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl fmt::Debug for OpaquePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaquePtr({:p})", self.addr())
    }
}

/// Native value kinds understood by the option interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Bool,
    Int,
    Size,
    Ms,
    U64,
    Bytes,
    Ptr,
    String,
    Addr,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Size => "size",
            Self::Ms => "ms",
            Self::U64 => "uint64",
            Self::Bytes => "bytes",
            Self::Ptr => "ptr",
            Self::String => "string",
            Self::Addr => "sockaddr",
        };
        f.write_str(name)
    }
}

/// Untyped option value as exchanged with the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Bool(bool),
    Int(i32),
    Size(usize),
    /// Milliseconds; `-1` is infinite.
    Ms(i32),
    U64(u64),
    Bytes(Bytes),
    Ptr(OpaquePtr),
    String(String),
    Addr(SockAddr),
}

impl NativeValue {
    #[must_use]
    pub const fn kind(&self) -> OptionKind {
        match self {
            Self::Bool(_) => OptionKind::Bool,
            Self::Int(_) => OptionKind::Int,
            Self::Size(_) => OptionKind::Size,
            Self::Ms(_) => OptionKind::Ms,
            Self::U64(_) => OptionKind::U64,
            Self::Bytes(_) => OptionKind::Bytes,
            Self::Ptr(_) => OptionKind::Ptr,
            Self::String(_) => OptionKind::String,
            Self::Addr(_) => OptionKind::Addr,
        }
    }
}

/// Engine-assigned identity of one submitted operation.
///
/// Never reused within a process, so aborting a stale id is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

/// What an asynchronous submission asks the engine to do.
#[derive(Debug)]
pub enum AioOp {
    /// Send `msg`, or the gathered I/O vector when no message is bound.
    Send { target: Target, msg: Option<Message> },
    Recv { target: Target },
    /// Complete successfully once `duration` has elapsed.
    Sleep { duration: Duration },
}

/// Final state of one asynchronous operation.
#[derive(Debug)]
pub struct Outcome {
    pub status: Status,
    /// Bytes transferred.
    pub count: usize,
    /// Received message, or the unsent message handed back after a failed send.
    pub msg: Option<Message>,
}

impl Outcome {
    #[must_use]
    pub const fn success(count: usize) -> Self {
        Self {
            status: Status::SUCCESS,
            count,
            msg: None,
        }
    }

    #[must_use]
    pub fn received(msg: Message) -> Self {
        Self {
            status: Status::SUCCESS,
            count: msg.len(),
            msg: Some(msg),
        }
    }

    #[must_use]
    pub const fn failed(status: Status) -> Self {
        Self {
            status,
            count: 0,
            msg: None,
        }
    }

    /// A failed send returning its message to the caller.
    #[must_use]
    pub const fn returned(status: Status, msg: Option<Message>) -> Self {
        Self {
            status,
            count: 0,
            msg,
        }
    }
}

type CompleteFn = Box<dyn FnOnce(Outcome) + Send>;

/// One-shot completion handle for a submission.
///
/// Calling [`Completer::complete`] consumes it. A completer dropped without
/// being called reports [`Status::CLOSED`], so every submission completes
/// exactly once.
pub struct Completer {
    inner: Option<CompleteFn>,
}

impl Completer {
    pub fn new(f: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            inner: Some(Box::new(f)),
        }
    }

    pub fn complete(mut self, outcome: Outcome) {
        if let Some(f) = self.inner.take() {
            f(outcome);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(f) = self.inner.take() {
            debug!("completer dropped without completion, reporting closed");
            f(Outcome::failed(Status::CLOSED));
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}

/// One asynchronous request handed to [`Engine::aio_submit`].
#[derive(Debug)]
pub struct Submission {
    pub op: AioOp,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub iov: IoVec,
    pub completer: Completer,
}

/// The native messaging engine.
///
/// Identifiers are plain `u32`s. Any call naming a closed or unknown object
/// fails with [`Status::CLOSED`]. Implementations must run completion and pipe
/// callbacks on their own threads, never inside the call that triggered them
/// while holding internal locks.
pub trait Engine: Send + Sync + 'static {
    /// Short engine name, used in logs.
    fn name(&self) -> &'static str;

    /// Engine text for a status code.
    fn strerror(&self, status: Status) -> Option<&'static str>;

    fn socket_open(&self, protocol: Protocol, raw: bool) -> NativeResult<u32>;
    fn socket_close(&self, socket: u32) -> NativeResult<()>;
    /// Returns the id back if the socket is still open.
    fn socket_id(&self, socket: u32) -> NativeResult<u32>;

    fn context_open(&self, socket: u32) -> NativeResult<u32>;
    fn context_close(&self, context: u32) -> NativeResult<()>;
    fn context_id(&self, context: u32) -> NativeResult<u32>;

    fn dialer_create(&self, socket: u32, url: &str) -> NativeResult<u32>;
    /// Start connecting. A blocking start returns once the first connection
    /// attempt has resolved; a non-blocking start retries in the background.
    fn dialer_start(&self, dialer: u32, blocking: bool) -> NativeResult<()>;
    fn dialer_close(&self, dialer: u32) -> NativeResult<()>;
    fn dialer_id(&self, dialer: u32) -> NativeResult<u32>;

    fn listener_create(&self, socket: u32, url: &str) -> NativeResult<u32>;
    fn listener_start(&self, listener: u32) -> NativeResult<()>;
    fn listener_close(&self, listener: u32) -> NativeResult<()>;
    fn listener_id(&self, listener: u32) -> NativeResult<u32>;

    fn pipe_close(&self, pipe: u32) -> NativeResult<()>;
    fn pipe_id(&self, pipe: u32) -> NativeResult<u32>;
    fn pipe_socket(&self, pipe: u32) -> NativeResult<u32>;
    fn pipe_dialer(&self, pipe: u32) -> NativeResult<Option<u32>>;
    fn pipe_listener(&self, pipe: u32) -> NativeResult<Option<u32>>;

    /// Replace (or clear, with `None`) the callback for one pipe event.
    fn set_pipe_notify(
        &self,
        socket: u32,
        event: PipeEvent,
        callback: Option<PipeCallback>,
    ) -> NativeResult<()>;

    fn get_option(&self, target: Target, key: &str, kind: OptionKind) -> NativeResult<NativeValue>;
    fn set_option(&self, target: Target, key: &str, value: NativeValue) -> NativeResult<()>;

    /// Submit an asynchronous operation.
    ///
    /// Never fails synchronously: errors are reported through the completer.
    /// The completer may run before this call returns, but only on an engine
    /// thread.
    fn aio_submit(&self, submission: Submission) -> OpId;

    /// Ask the engine to finish `op` early with `status`. No-op if `op` has
    /// already completed.
    fn aio_abort(&self, op: OpId, status: Status);
}

static ENGINE: OnceCell<Box<dyn Engine>> = OnceCell::new();

/// Install the process-wide engine.
///
/// Fails with `Busy` if an engine is already installed; the rejected engine is
/// dropped.
pub fn install(engine: impl Engine) -> Result<&'static dyn Engine> {
    let name = engine.name();
    let mut fresh = false;
    let installed = ENGINE.get_or_init(|| {
        fresh = true;
        Box::new(engine)
    });
    if !fresh {
        return Err(Error::native(Status::BUSY, "native::install"));
    }
    debug!(engine = name, "engine installed");
    Ok(installed.as_ref())
}

/// Return the installed engine, installing the one built by `init` if none is.
pub fn get_or_install<E, F>(init: F) -> &'static dyn Engine
where
    E: Engine,
    F: FnOnce() -> E,
{
    ENGINE
        .get_or_init(|| {
            let engine = init();
            debug!(engine = engine.name(), "engine installed");
            Box::new(engine)
        })
        .as_ref()
}

/// The installed engine.
pub fn engine() -> Result<&'static dyn Engine> {
    installed().ok_or(Error::NoEngine)
}

pub(crate) fn installed() -> Option<&'static dyn Engine> {
    ENGINE.get().map(AsRef::as_ref)
}
