//! Carapace Loopback
//!
//! In-process implementation of the `carapace_core::native::Engine` seam:
//! - Identifier tables with delayed reuse (`table`)
//! - Completion worker pool and ordered pipe event thread (`pool`)
//! - Timer thread for timeouts, sleeps and redials (`timer`)
//! - `inproc://` naming (`transport`)
//! - Dialer backoff (`reconnect`)
//! - Per-object option stores
//!
//! Messages travel between sockets connected over `inproc://` and are handed
//! to connected peers round-robin. No protocol state machines run here.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod config;
mod pool;
pub mod reconnect;
mod runtime;
mod state;
mod store;
mod strerror;
mod table;
mod timer;
mod transport;

use std::sync::Arc;

use carapace_core::error::Status;
use carapace_core::native::{
    Engine, NativeResult, NativeValue, OpId, OptionKind, PipeCallback, Submission, Target,
};
use carapace_core::pipe::PipeEvent;
use carapace_core::protocol::Protocol;

use crate::config::EngineConfig;
use crate::runtime::Runtime;

/// The in-process engine.
///
/// Dropping it closes every object it still holds and stops its threads.
///
/// # Examples
///
/// ```
/// use carapace_core::native::Engine;
/// use carapace_core::protocol::Protocol;
/// use carapace_loopback::Loopback;
///
/// let engine = Loopback::new().unwrap();
/// let socket = engine.socket_open(Protocol::Pair0, false).unwrap();
/// assert_eq!(engine.socket_id(socket), Ok(socket));
/// engine.socket_close(socket).unwrap();
/// assert!(engine.socket_id(socket).is_err());
/// ```
pub struct Loopback {
    runtime: Arc<Runtime>,
}

impl Loopback {
    /// Engine with the default configuration.
    pub fn new() -> std::io::Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    /// Fails only if the engine threads cannot be spawned.
    pub fn with_config(config: EngineConfig) -> std::io::Result<Self> {
        let runtime = Runtime::new(config)?;
        Ok(Self { runtime })
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback").finish_non_exhaustive()
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.runtime.shutdown();
    }
}

impl Engine for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn strerror(&self, status: Status) -> Option<&'static str> {
        strerror::describe(status)
    }

    fn socket_open(&self, protocol: Protocol, raw: bool) -> NativeResult<u32> {
        self.runtime.socket_open(protocol, raw)
    }

    fn socket_close(&self, socket: u32) -> NativeResult<()> {
        self.runtime.socket_close(socket)
    }

    fn socket_id(&self, socket: u32) -> NativeResult<u32> {
        self.runtime.socket_id(socket)
    }

    fn context_open(&self, socket: u32) -> NativeResult<u32> {
        self.runtime.context_open(socket)
    }

    fn context_close(&self, context: u32) -> NativeResult<()> {
        self.runtime.context_close(context)
    }

    fn context_id(&self, context: u32) -> NativeResult<u32> {
        self.runtime.context_id(context)
    }

    fn dialer_create(&self, socket: u32, url: &str) -> NativeResult<u32> {
        self.runtime.dialer_create(socket, url)
    }

    fn dialer_start(&self, dialer: u32, blocking: bool) -> NativeResult<()> {
        self.runtime.dialer_start(dialer, blocking)
    }

    fn dialer_close(&self, dialer: u32) -> NativeResult<()> {
        self.runtime.dialer_close(dialer)
    }

    fn dialer_id(&self, dialer: u32) -> NativeResult<u32> {
        self.runtime.dialer_id(dialer)
    }

    fn listener_create(&self, socket: u32, url: &str) -> NativeResult<u32> {
        self.runtime.listener_create(socket, url)
    }

    fn listener_start(&self, listener: u32) -> NativeResult<()> {
        self.runtime.listener_start(listener)
    }

    fn listener_close(&self, listener: u32) -> NativeResult<()> {
        self.runtime.listener_close(listener)
    }

    fn listener_id(&self, listener: u32) -> NativeResult<u32> {
        self.runtime.listener_id(listener)
    }

    fn pipe_close(&self, pipe: u32) -> NativeResult<()> {
        self.runtime.pipe_close(pipe)
    }

    fn pipe_id(&self, pipe: u32) -> NativeResult<u32> {
        self.runtime.pipe_id(pipe)
    }

    fn pipe_socket(&self, pipe: u32) -> NativeResult<u32> {
        self.runtime.pipe_socket(pipe)
    }

    fn pipe_dialer(&self, pipe: u32) -> NativeResult<Option<u32>> {
        self.runtime.pipe_dialer(pipe)
    }

    fn pipe_listener(&self, pipe: u32) -> NativeResult<Option<u32>> {
        self.runtime.pipe_listener(pipe)
    }

    fn set_pipe_notify(
        &self,
        socket: u32,
        event: PipeEvent,
        callback: Option<PipeCallback>,
    ) -> NativeResult<()> {
        self.runtime.set_pipe_notify(socket, event, callback)
    }

    fn get_option(&self, target: Target, key: &str, kind: OptionKind) -> NativeResult<NativeValue> {
        self.runtime.get_option(target, key, kind)
    }

    fn set_option(&self, target: Target, key: &str, value: NativeValue) -> NativeResult<()> {
        self.runtime.set_option(target, key, value)
    }

    fn aio_submit(&self, submission: Submission) -> OpId {
        self.runtime.submit(submission)
    }

    fn aio_abort(&self, op: OpId, status: Status) {
        self.runtime.abort(op, status);
    }
}
