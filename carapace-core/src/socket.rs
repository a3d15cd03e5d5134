//! Sockets and contexts.
//!
//! A [`Socket`] is opened for one protocol and stays that protocol until it is
//! closed. Closing a socket closes its contexts, dialers, listeners and pipes;
//! handles to any of them then fail with `Closed`.
//!
//! Besides the asynchronous [`Aio`](crate::aio::Aio) interface, sockets and
//! contexts offer blocking `send`/`recv` bounded by their `send-timeout` and
//! `recv-timeout` options, and non-blocking `try_send`/`try_recv`.
//!
//! # Examples
//!
//! ```no_run
//! use carapace_core::protocol::Protocol;
//! use carapace_core::socket::Socket;
//!
//! # fn example() -> carapace_core::error::Result<()> {
//! let pull = Socket::open(Protocol::Pull0)?;
//! pull.listen("inproc://jobs")?;
//!
//! let push = Socket::open(Protocol::Push0)?;
//! push.dial("inproc://jobs")?;
//! push.send("work".into())?;
//!
//! let msg = pull.recv()?;
//! assert_eq!(msg.body(), b"work");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tracing::{debug, warn};

use crate::aio::{Aio, AioTarget};
use crate::error::{Error, ErrorKind, NativeResultExt, Result, Status};
pub use crate::handle::{Context, Socket};
use crate::handle::{Dialer, Listener};
use crate::message::Message;
use crate::native::{self, Target};
use crate::options::{OptionName, Options};
use crate::protocol::Protocol;

/// A failed send, carrying the message back when the engine returned it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SendError {
    pub error: Error,
    pub message: Option<Message>,
}

impl SendError {
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        self.message
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        err.error
    }
}

/// Error for an endpoint that failed to start. The start failure is reported;
/// a failed close of the half-made endpoint is only logged.
fn abandon_endpoint(
    status: Status,
    closed: native::NativeResult<()>,
    endpoint: u32,
    operation: &'static str,
) -> Error {
    if let Err(close_status) = closed {
        warn!(
            endpoint,
            operation,
            status = close_status.raw(),
            "closing endpoint after failed start"
        );
    }
    Error::native(status, operation)
}

/// Result of a non-blocking send.
#[derive(Debug)]
pub enum SendOutcome {
    Sent,
    /// The socket could not accept the message right now; it is handed back.
    WouldBlock(Message),
}

impl SendOutcome {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

fn would_block(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Blocking send through a private AIO.
fn send_on(
    target: AioTarget,
    timeout: Option<Duration>,
    msg: Message,
    operation: &'static str,
) -> std::result::Result<(), SendError> {
    let fail = |error: Error, message| SendError { error, message };
    let aio = match Aio::without_callback() {
        Ok(aio) => aio,
        Err(error) => return Err(fail(error, Some(msg))),
    };
    aio.set_timeout(timeout);
    aio.set_message(msg);
    if let Err(error) = aio.start_send(target) {
        return Err(fail(error, aio.take_message()));
    }
    aio.wait();
    match aio.result() {
        Ok(()) => Ok(()),
        Err(error) => {
            let error = match error.status() {
                Some(status) => Error::native(status, operation),
                None => error,
            };
            Err(fail(error, aio.take_message()))
        }
    }
}

/// Blocking receive through a private AIO.
fn recv_on(target: AioTarget, timeout: Option<Duration>, operation: &'static str) -> Result<Message> {
    let aio = Aio::without_callback()?;
    aio.set_timeout(timeout);
    aio.start_recv(target)?;
    aio.wait();
    match aio.result() {
        Ok(()) => aio
            .take_message()
            .ok_or_else(|| Error::native(Status::INTERNAL, operation)),
        Err(error) => Err(match error.status() {
            Some(status) => Error::native(status, operation),
            None => error,
        }),
    }
}

fn try_send_on(
    target: AioTarget,
    msg: Message,
    operation: &'static str,
) -> std::result::Result<SendOutcome, SendError> {
    match send_on(target, Some(Duration::ZERO), msg, operation) {
        Ok(()) => Ok(SendOutcome::Sent),
        Err(SendError {
            error,
            message: Some(message),
        }) if would_block(&error) => Ok(SendOutcome::WouldBlock(message)),
        Err(err) => Err(err),
    }
}

fn try_recv_on(target: AioTarget, operation: &'static str) -> Result<Option<Message>> {
    match recv_on(target, Some(Duration::ZERO), operation) {
        Ok(msg) => Ok(Some(msg)),
        Err(err) if would_block(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

impl Socket {
    /// Open a socket speaking `protocol`.
    pub fn open(protocol: Protocol) -> Result<Self> {
        Self::open_with(protocol, false)
    }

    /// Open a raw-mode socket, which exposes protocol headers.
    pub fn open_raw(protocol: Protocol) -> Result<Self> {
        Self::open_with(protocol, true)
    }

    fn open_with(protocol: Protocol, raw: bool) -> Result<Self> {
        let id = native::engine()?
            .socket_open(protocol, raw)
            .raise(if raw { "Socket::open_raw" } else { "Socket::open" })?;
        debug!(socket = id, %protocol, raw, "socket opened");
        Ok(Self::from_raw(id))
    }

    /// Close the socket and everything created on it.
    pub fn close(self) -> Result<()> {
        native::engine()?
            .socket_close(self.raw())
            .raise("Socket::close")?;
        debug!(socket = self.raw(), "socket closed");
        Ok(())
    }

    /// The identifier, if the socket is still open.
    pub fn id(self) -> Result<u32> {
        native::engine()?.socket_id(self.raw()).raise("Socket::id")
    }

    pub fn protocol(self) -> Result<Protocol> {
        let number = self.get_int(OptionName::Protocol)?;
        u16::try_from(number)
            .ok()
            .and_then(Protocol::from_number)
            .ok_or_else(|| Error::native(Status::PROTOCOL, "Socket::protocol"))
    }

    pub fn is_raw(self) -> Result<bool> {
        self.get_bool(OptionName::Raw)
    }

    /// Create a dialer for `url` without starting it.
    pub fn dialer(self, url: &str) -> Result<Dialer> {
        native::engine()?
            .dialer_create(self.raw(), url)
            .map(Dialer::from_raw)
            .raise("Socket::dialer")
    }

    /// Create a listener for `url` without starting it.
    pub fn listener(self, url: &str) -> Result<Listener> {
        native::engine()?
            .listener_create(self.raw(), url)
            .map(Listener::from_raw)
            .raise("Socket::listener")
    }

    /// Create and start a dialer, blocking until the first connection attempt
    /// resolves. Nothing is left behind on failure.
    pub fn dial(self, url: &str) -> Result<Dialer> {
        self.dial_with(url, true, "Socket::dial")
    }

    /// Create and start a dialer that connects in the background.
    pub fn dial_nonblocking(self, url: &str) -> Result<Dialer> {
        self.dial_with(url, false, "Socket::dial_nonblocking")
    }

    fn dial_with(self, url: &str, blocking: bool, operation: &'static str) -> Result<Dialer> {
        let engine = native::engine()?;
        let id = engine.dialer_create(self.raw(), url).raise(operation)?;
        if let Err(status) = engine.dialer_start(id, blocking) {
            return Err(abandon_endpoint(status, engine.dialer_close(id), id, operation));
        }
        debug!(socket = self.raw(), dialer = id, url, blocking, "dialed");
        Ok(Dialer::from_raw(id))
    }

    /// Create and start a listener.
    pub fn listen(self, url: &str) -> Result<Listener> {
        let engine = native::engine()?;
        let id = engine
            .listener_create(self.raw(), url)
            .raise("Socket::listen")?;
        if let Err(status) = engine.listener_start(id) {
            let closed = engine.listener_close(id);
            return Err(abandon_endpoint(status, closed, id, "Socket::listen"));
        }
        debug!(socket = self.raw(), listener = id, url, "listening");
        Ok(Listener::from_raw(id))
    }

    /// Send, blocking for at most the socket's `send-timeout`.
    pub fn send(self, msg: Message) -> std::result::Result<(), SendError> {
        let timeout = match self.get_duration(OptionName::SendTimeout) {
            Ok(timeout) => timeout,
            Err(error) => {
                return Err(SendError {
                    error,
                    message: Some(msg),
                })
            }
        };
        send_on(self.into(), timeout, msg, "Socket::send")
    }

    /// Send without blocking.
    pub fn try_send(self, msg: Message) -> std::result::Result<SendOutcome, SendError> {
        try_send_on(self.into(), msg, "Socket::try_send")
    }

    /// Receive, blocking for at most the socket's `recv-timeout`.
    pub fn recv(self) -> Result<Message> {
        let timeout = self.get_duration(OptionName::RecvTimeout)?;
        recv_on(self.into(), timeout, "Socket::recv")
    }

    /// Receive without blocking. `Ok(None)` when nothing is queued.
    pub fn try_recv(self) -> Result<Option<Message>> {
        try_recv_on(self.into(), "Socket::try_recv")
    }

    /// Start an asynchronous send of the message bound to `aio`.
    pub fn send_aio(self, aio: &Aio) -> Result<()> {
        aio.start_send(self)
    }

    /// Start an asynchronous receive into `aio`.
    pub fn recv_aio(self, aio: &Aio) -> Result<()> {
        aio.start_recv(self)
    }
}

impl Options for Socket {
    fn option_target(&self) -> Target {
        self.target()
    }
}

impl Context {
    /// Open a context on `socket`.
    ///
    /// Fails with `NotSupported` for protocols without context support.
    pub fn open(socket: Socket) -> Result<Self> {
        let id = native::engine()?
            .context_open(socket.raw())
            .raise("Context::open")?;
        debug!(socket = socket.raw(), context = id, "context opened");
        Ok(Self::from_raw(id))
    }

    pub fn close(self) -> Result<()> {
        native::engine()?
            .context_close(self.raw())
            .raise("Context::close")?;
        debug!(context = self.raw(), "context closed");
        Ok(())
    }

    pub fn id(self) -> Result<u32> {
        native::engine()?.context_id(self.raw()).raise("Context::id")
    }

    pub fn send(self, msg: Message) -> std::result::Result<(), SendError> {
        let timeout = match self.get_duration(OptionName::SendTimeout) {
            Ok(timeout) => timeout,
            Err(error) => {
                return Err(SendError {
                    error,
                    message: Some(msg),
                })
            }
        };
        send_on(self.into(), timeout, msg, "Context::send")
    }

    pub fn try_send(self, msg: Message) -> std::result::Result<SendOutcome, SendError> {
        try_send_on(self.into(), msg, "Context::try_send")
    }

    pub fn recv(self) -> Result<Message> {
        let timeout = self.get_duration(OptionName::RecvTimeout)?;
        recv_on(self.into(), timeout, "Context::recv")
    }

    pub fn try_recv(self) -> Result<Option<Message>> {
        try_recv_on(self.into(), "Context::try_recv")
    }

    pub fn send_aio(self, aio: &Aio) -> Result<()> {
        aio.start_send(self)
    }

    pub fn recv_aio(self, aio: &Aio) -> Result<()> {
        aio.start_recv(self)
    }
}

impl Options for Context {
    fn option_target(&self) -> Target {
        self.target()
    }
}
