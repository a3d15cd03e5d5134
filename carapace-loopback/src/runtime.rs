//! The loopback engine's shared core.
//!
//! One [`Runtime`] owns the object tables, the inproc name registry, the
//! completion pool, the single-threaded pipe event pool and the timer thread.
//!
//! Locking: all tables sit behind one `state` mutex. Completions are never run
//! under it; they are posted to the completion pool. Pipe `Adding` callbacks
//! run on the event thread with the lock released, so a callback may close the
//! pipe (rejecting it) or call back into the engine.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use carapace_core::address::SockAddr;
use carapace_core::error::Status;
use carapace_core::handle::Pipe;
use carapace_core::message::Message;
use carapace_core::native::{
    AioOp, Completer, IoVec, NativeResult, NativeValue, OpId, OptionKind, Outcome, PipeCallback,
    Submission, Target,
};
use carapace_core::options::{ms_to_duration, OptionName};
use carapace_core::pipe::PipeEvent;
use carapace_core::protocol::Protocol;

use crate::config::{EngineConfig, DEFAULT_RECONNECT_MIN};
use crate::pool::WorkerPool;
use crate::reconnect::ReconnectState;
use crate::state::{
    context_options, dialer_options, listener_options, pipe_options, socket_options,
    ContextEntry, DialerEntry, ListenerEntry, PendingKind, PendingOp, PipeEntry, PipeOwner,
    PipeState, SocketEntry, State,
};
use crate::store::OptionStore;
use crate::timer::{TimerId, Timers};
use crate::transport::{self, Registry};

pub(crate) struct Runtime {
    this: Weak<Runtime>,
    config: EngineConfig,
    state: Mutex<State>,
    registry: Registry,
    /// Runs AIO completions.
    pool: WorkerPool,
    /// Runs pipe events and connection attempts, strictly in order.
    events: WorkerPool,
    timers: Timers,
    next_op: AtomicU64,
}

impl Runtime {
    pub(crate) fn new(config: EngineConfig) -> io::Result<Arc<Self>> {
        let pool = WorkerPool::new("carapace-worker", config.worker_threads)?;
        let events = WorkerPool::new("carapace-events", 1)?;
        let timers = Timers::new()?;
        Ok(Arc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            config,
            state: Mutex::new(State::new()),
            registry: Registry::new(),
            pool,
            events,
            timers,
            next_op: AtomicU64::new(1),
        }))
    }

    fn lock(&self) -> NativeResult<MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.closed {
            return Err(Status::CLOSED);
        }
        Ok(state)
    }

    fn dispatch(&self, completer: Completer, outcome: Outcome) {
        self.pool.execute(move || completer.complete(outcome));
    }

    // Sockets and contexts

    pub(crate) fn socket_open(&self, protocol: Protocol, raw: bool) -> NativeResult<u32> {
        let mut state = self.lock()?;
        let config = &self.config;
        let id = state.sockets.insert_with(|id| {
            SocketEntry::new(protocol, socket_options(id, protocol, raw, config))
        })?;
        debug!(socket = id, %protocol, raw, "socket opened");
        Ok(id)
    }

    pub(crate) fn socket_close(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        self.close_socket(&mut state, id)
    }

    pub(crate) fn socket_id(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.sockets.get(id).map(|_| id)
    }

    fn close_socket(&self, state: &mut State, id: u32) -> NativeResult<()> {
        let socket = state.sockets.get(id)?;
        let dialers = socket.dialers.clone();
        let listeners = socket.listeners.clone();
        let contexts = socket.contexts.clone();

        for dialer in dialers {
            self.close_dialer(state, dialer);
        }
        for listener in listeners {
            self.close_listener(state, listener);
        }
        for context in contexts {
            state.contexts.remove(context);
        }
        if let Some(socket) = state.sockets.remove(id) {
            for pipe in socket.pipes {
                self.detach_pipe(state, pipe);
            }
        }

        let ops: Vec<OpId> = state
            .ops
            .iter()
            .filter(|(_, op)| op.socket == Some(id))
            .map(|(op, _)| *op)
            .collect();
        for op in ops {
            self.finish_op(state, op, Status::CLOSED);
        }
        debug!(socket = id, "socket closed");
        Ok(())
    }

    pub(crate) fn context_open(&self, socket: u32) -> NativeResult<u32> {
        let mut state = self.lock()?;
        let entry = state.sockets.get(socket)?;
        let raw = matches!(entry.options.value(OptionName::Raw), Some(NativeValue::Bool(true)));
        if raw || !entry.protocol.supports_contexts() {
            return Err(Status::NOT_SUPPORTED);
        }
        let options = context_options(&entry.options, entry.protocol);
        let id = state.contexts.insert(ContextEntry { socket, options })?;
        state.sockets.get_mut(socket)?.contexts.push(id);
        trace!(context = id, socket, "context opened");
        Ok(id)
    }

    pub(crate) fn context_close(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        let context = state.contexts.remove(id).ok_or(Status::CLOSED)?;
        if let Ok(socket) = state.sockets.get_mut(context.socket) {
            socket.contexts.retain(|c| *c != id);
        }
        let ops: Vec<OpId> = state
            .ops
            .iter()
            .filter(|(_, op)| op.target == Some(Target::Context(id)))
            .map(|(op, _)| *op)
            .collect();
        for op in ops {
            self.finish_op(&mut state, op, Status::CLOSED);
        }
        trace!(context = id, "context closed");
        Ok(())
    }

    pub(crate) fn context_id(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.contexts.get(id).map(|_| id)
    }

    // Dialers

    pub(crate) fn dialer_create(&self, socket: u32, url: &str) -> NativeResult<u32> {
        let mut state = self.lock()?;
        let entry = state.sockets.get(socket)?;
        let address = transport::parse(url)?;
        let options = dialer_options(url, &address, &entry.options);
        let reconnect = reconnect_for(&options);
        let id = state.dialers.insert(DialerEntry {
            socket,
            url: url.to_string(),
            address,
            options,
            started: false,
            pipe: None,
            reconnect,
            retry: None,
        })?;
        state.sockets.get_mut(socket)?.dialers.push(id);
        debug!(dialer = id, socket, url, "dialer created");
        Ok(id)
    }

    pub(crate) fn dialer_start(&self, id: u32, blocking: bool) -> NativeResult<()> {
        {
            let mut state = self.lock()?;
            let dialer = state.dialers.get_mut(id)?;
            if dialer.started {
                return Err(Status::INCORRECT_STATE);
            }
            transport::inproc_name(&dialer.address)?;
            dialer.started = true;
            dialer.reconnect = reconnect_for(&dialer.options);
        }
        debug!(dialer = id, blocking, "dialer starting");

        if !blocking {
            let this = Weak::clone(&self.this);
            self.events.execute(move || {
                if let Some(runtime) = this.upgrade() {
                    runtime.redial(id);
                }
            });
            return Ok(());
        }

        // Connection attempts run on the event thread. A blocking dial made
        // from a pipe callback is already there.
        let result = if self.events.owns_current_thread() {
            self.establish(id)
        } else {
            let (tx, rx) = flume::bounded(1);
            let this = Weak::clone(&self.this);
            self.events.execute(move || {
                let result = this
                    .upgrade()
                    .map_or(Err(Status::CLOSED), |runtime| runtime.establish(id));
                let _ = tx.send(result);
            });
            rx.recv().unwrap_or(Err(Status::CLOSED))
        };

        if let Err(status) = result {
            if let Ok(mut state) = self.lock() {
                if let Ok(dialer) = state.dialers.get_mut(id) {
                    dialer.started = false;
                }
            }
            debug!(dialer = id, status = status.raw(), "dial failed");
            return Err(status);
        }
        Ok(())
    }

    pub(crate) fn dialer_close(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        state.dialers.get(id)?;
        self.close_dialer(&mut state, id);
        Ok(())
    }

    pub(crate) fn dialer_id(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.dialers.get(id).map(|_| id)
    }

    fn close_dialer(&self, state: &mut State, id: u32) {
        let Some(dialer) = state.dialers.remove(id) else {
            return;
        };
        if let Some(timer) = dialer.retry {
            self.timers.cancel(timer);
        }
        if let Ok(socket) = state.sockets.get_mut(dialer.socket) {
            socket.dialers.retain(|d| *d != id);
        }
        if let Some(pipe) = dialer.pipe {
            self.detach_pipe(state, pipe);
        }
        debug!(dialer = id, "dialer closed");
    }

    /// One connection attempt, rescheduling on failure while the dialer runs.
    fn redial(&self, id: u32) {
        let Err(status) = self.establish(id) else {
            return;
        };
        trace!(dialer = id, status = status.raw(), "connect attempt failed");
        let Ok(mut state) = self.lock() else {
            return;
        };
        let retry = matches!(state.dialers.get(id), Ok(d) if d.started && d.pipe.is_none());
        if retry {
            self.schedule_redial(&mut state, id);
        }
    }

    fn schedule_redial(&self, state: &mut State, id: u32) {
        let Ok(dialer) = state.dialers.get_mut(id) else {
            return;
        };
        if let Some(timer) = dialer.retry.take() {
            self.timers.cancel(timer);
        }
        let delay = dialer.reconnect.next_delay();
        debug!(dialer = id, ?delay, attempt = dialer.reconnect.attempt(), "reconnect scheduled");

        let this = Weak::clone(&self.this);
        let timer = self.timers.schedule(Instant::now() + delay, move || {
            let Some(runtime) = this.upgrade() else {
                return;
            };
            runtime.events.execute(move || {
                if let Some(runtime) = this.upgrade() {
                    runtime.redial(id);
                }
            });
        });
        dialer.retry = Some(timer);
    }

    /// Connect dialer `id` to the listener bound to its name.
    ///
    /// Runs on the event thread. Both pipes are created pending, the `Adding`
    /// callbacks run without the lock, and the pair is attached only if no
    /// callback closed either pipe.
    fn establish(&self, id: u32) -> NativeResult<()> {
        let (dialer_pipe, listener_pipe, adding) = {
            let mut state = self.lock()?;
            let dialer = state.dialers.get(id)?;
            if !dialer.started {
                return Err(Status::INCORRECT_STATE);
            }
            if dialer.pipe.is_some() {
                return Ok(());
            }
            let name = transport::inproc_name(&dialer.address)?.to_string();
            let listener_id = self.registry.lookup(&name)?;
            let listener = state
                .listeners
                .get(listener_id)
                .map_err(|_| Status::CONNECTION_REFUSED)?;

            let dialer_socket = dialer.socket;
            let listener_socket = listener.socket;
            let ours = state.sockets.get(dialer_socket)?.protocol;
            let theirs = state
                .sockets
                .get(listener_socket)
                .map_err(|_| Status::CONNECTION_REFUSED)?
                .protocol;
            if !ours.is_compatible(theirs) {
                debug!(dialer = id, %ours, %theirs, "peer protocol mismatch");
                return Err(Status::PROTOCOL);
            }

            let address = SockAddr::Inproc(name);
            let url = dialer.url.clone();
            let dialer_max = dialer.options.size(OptionName::RecvSizeMax).unwrap_or(0);
            let listener_max = listener.options.size(OptionName::RecvSizeMax).unwrap_or(0);

            let dialer_pipe = state.pipes.insert(PipeEntry {
                socket: dialer_socket,
                owner: PipeOwner::Dialer(id),
                peer: 0,
                state: PipeState::Pending { rejected: false },
                options: pipe_options(&url, &address, &address, dialer_max),
            })?;
            let listener_pipe = match state.pipes.insert(PipeEntry {
                socket: listener_socket,
                owner: PipeOwner::Listener(listener_id),
                peer: dialer_pipe,
                state: PipeState::Pending { rejected: false },
                options: pipe_options(&url, &address, &address, listener_max),
            }) {
                Ok(pipe) => pipe,
                Err(status) => {
                    state.pipes.remove(dialer_pipe);
                    return Err(status);
                }
            };
            state.pipes.get_mut(dialer_pipe)?.peer = listener_pipe;
            state.dialers.get_mut(id)?.pipe = Some(dialer_pipe);
            state.listeners.get_mut(listener_id)?.pipes.push(listener_pipe);

            let adding = [
                (callback(&state, dialer_socket, PipeEvent::Adding), dialer_pipe),
                (callback(&state, listener_socket, PipeEvent::Adding), listener_pipe),
            ];
            (dialer_pipe, listener_pipe, adding)
        };

        for (callback, pipe) in adding {
            if let Some(callback) = callback {
                invoke(&callback, pipe, PipeEvent::Adding);
            }
        }

        let mut state = self.lock()?;
        let accepted = [dialer_pipe, listener_pipe].into_iter().all(|pipe| {
            matches!(
                state.pipes.get(pipe),
                Ok(PipeEntry {
                    state: PipeState::Pending { rejected: false },
                    ..
                })
            )
        });
        if !accepted {
            debug!(dialer = id, pipe = dialer_pipe, "connection rejected");
            self.detach_pipe(&mut state, dialer_pipe);
            self.detach_pipe(&mut state, listener_pipe);
            return Ok(());
        }

        let mut sockets = Vec::with_capacity(2);
        for pipe in [dialer_pipe, listener_pipe] {
            let entry = state.pipes.get_mut(pipe)?;
            entry.state = PipeState::Attached;
            let socket = entry.socket;
            state.sockets.get_mut(socket)?.pipes.push(pipe);
            self.post_event(&state, socket, pipe, PipeEvent::Added);
            sockets.push(socket);
        }
        if let Ok(dialer) = state.dialers.get_mut(id) {
            dialer.reconnect.reset();
        }
        debug!(dialer = id, pipe = dialer_pipe, peer = listener_pipe, "pipe attached");

        for socket in sockets {
            self.pump(&mut state, socket);
        }
        Ok(())
    }

    // Listeners

    pub(crate) fn listener_create(&self, socket: u32, url: &str) -> NativeResult<u32> {
        let mut state = self.lock()?;
        let entry = state.sockets.get(socket)?;
        let address = transport::parse(url)?;
        let options = listener_options(url, &address, &entry.options);
        let id = state.listeners.insert(ListenerEntry {
            socket,
            url: url.to_string(),
            address,
            options,
            started: false,
            pipes: Vec::new(),
        })?;
        state.sockets.get_mut(socket)?.listeners.push(id);
        debug!(listener = id, socket, url, "listener created");
        Ok(id)
    }

    pub(crate) fn listener_start(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        let listener = state.listeners.get_mut(id)?;
        if listener.started {
            return Err(Status::INCORRECT_STATE);
        }
        let name = transport::inproc_name(&listener.address)?;
        self.registry.bind(name, id)?;
        listener.started = true;
        debug!(listener = id, url = %listener.url, "listening");
        Ok(())
    }

    pub(crate) fn listener_close(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        state.listeners.get(id)?;
        self.close_listener(&mut state, id);
        Ok(())
    }

    pub(crate) fn listener_id(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.listeners.get(id).map(|_| id)
    }

    fn close_listener(&self, state: &mut State, id: u32) {
        let Some(listener) = state.listeners.remove(id) else {
            return;
        };
        if listener.started {
            if let Ok(name) = transport::inproc_name(&listener.address) {
                self.registry.unbind(name, id);
            }
        }
        if let Ok(socket) = state.sockets.get_mut(listener.socket) {
            socket.listeners.retain(|l| *l != id);
        }
        for pipe in listener.pipes {
            self.detach_pipe(state, pipe);
        }
        debug!(listener = id, "listener closed");
    }

    // Pipes

    pub(crate) fn pipe_close(&self, id: u32) -> NativeResult<()> {
        let mut state = self.lock()?;
        let pipe = state.pipes.get_mut(id)?;
        if pipe.state == PipeState::Attached {
            self.detach_pipe(&mut state, id);
        } else {
            pipe.state = PipeState::Pending { rejected: true };
            trace!(pipe = id, "pending pipe rejected");
        }
        Ok(())
    }

    pub(crate) fn pipe_id(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.pipes.get(id).map(|_| id)
    }

    pub(crate) fn pipe_socket(&self, id: u32) -> NativeResult<u32> {
        self.lock()?.pipes.get(id).map(|pipe| pipe.socket)
    }

    pub(crate) fn pipe_dialer(&self, id: u32) -> NativeResult<Option<u32>> {
        self.lock()?.pipes.get(id).map(|pipe| match pipe.owner {
            PipeOwner::Dialer(dialer) => Some(dialer),
            PipeOwner::Listener(_) => None,
        })
    }

    pub(crate) fn pipe_listener(&self, id: u32) -> NativeResult<Option<u32>> {
        self.lock()?.pipes.get(id).map(|pipe| match pipe.owner {
            PipeOwner::Listener(listener) => Some(listener),
            PipeOwner::Dialer(_) => None,
        })
    }

    pub(crate) fn set_pipe_notify(
        &self,
        socket: u32,
        event: PipeEvent,
        callback: Option<PipeCallback>,
    ) -> NativeResult<()> {
        let mut state = self.lock()?;
        state.sockets.get_mut(socket)?.notify[event.index()] = callback;
        Ok(())
    }

    /// Remove a pipe and its peer. The owning dialer redials if it is still
    /// running.
    fn detach_pipe(&self, state: &mut State, id: u32) {
        let Some(pipe) = state.pipes.remove(id) else {
            return;
        };
        if let Ok(socket) = state.sockets.get_mut(pipe.socket) {
            socket.pipes.retain(|p| *p != id);
            if socket.cursor >= socket.pipes.len() {
                socket.cursor = 0;
            }
        }
        self.post_event(state, pipe.socket, id, PipeEvent::Removed);
        debug!(pipe = id, socket = pipe.socket, "pipe removed");

        match pipe.owner {
            PipeOwner::Dialer(dialer) => {
                let redial = match state.dialers.get_mut(dialer) {
                    Ok(entry) if entry.pipe == Some(id) => {
                        entry.pipe = None;
                        entry.started
                    }
                    _ => false,
                };
                if redial {
                    self.schedule_redial(state, dialer);
                }
            }
            PipeOwner::Listener(listener) => {
                if let Ok(entry) = state.listeners.get_mut(listener) {
                    entry.pipes.retain(|p| *p != id);
                }
            }
        }
        self.detach_pipe(state, pipe.peer);
    }

    fn post_event(&self, state: &State, socket: u32, pipe: u32, event: PipeEvent) {
        if let Some(callback) = callback(state, socket, event) {
            self.events.execute(move || invoke(&callback, pipe, event));
        }
    }

    // Options

    pub(crate) fn get_option(
        &self,
        target: Target,
        key: &str,
        kind: OptionKind,
    ) -> NativeResult<NativeValue> {
        let mut state = self.lock()?;
        let store = state.options_mut(target).ok_or(Status::CLOSED)?;
        store.get(key, kind)
    }

    pub(crate) fn set_option(&self, target: Target, key: &str, value: NativeValue) -> NativeResult<()> {
        let mut state = self.lock()?;
        let store = state.options_mut(target).ok_or(Status::CLOSED)?;
        store.set(key, value)?;

        match (target, OptionName::resolve(key)) {
            (
                Target::Dialer(id),
                Ok(OptionName::ReconnectTimeMin | OptionName::ReconnectTimeMax),
            ) => {
                if let Ok(dialer) = state.dialers.get_mut(id) {
                    dialer.reconnect = reconnect_for(&dialer.options);
                }
            }
            // A deeper queue may unblock waiting peers.
            (Target::Socket(id), Ok(OptionName::RecvBuffer)) => self.pump(&mut state, id),
            _ => {}
        }
        Ok(())
    }

    // Asynchronous operations

    pub(crate) fn submit(&self, submission: Submission) -> OpId {
        let id = OpId(self.next_op.fetch_add(1, Ordering::Relaxed));
        let Submission {
            op,
            timeout,
            iov,
            completer,
        } = submission;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            let msg = match op {
                AioOp::Send { msg, .. } => msg,
                _ => None,
            };
            self.dispatch(completer, Outcome::returned(Status::CLOSED, msg));
            return id;
        }

        match op {
            AioOp::Sleep { duration } => {
                let timer = self.schedule_expiry(id, duration, Status::SUCCESS);
                state.ops.insert(
                    id,
                    PendingOp {
                        kind: PendingKind::Sleep,
                        socket: None,
                        target: None,
                        msg: None,
                        completer,
                        timer,
                    },
                );
            }
            AioOp::Send { target, msg } => {
                self.submit_send(&mut state, id, target, msg, &iov, timeout, completer);
            }
            AioOp::Recv { target } => {
                self.submit_recv(&mut state, id, target, timeout, completer);
            }
        }
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_send(
        &self,
        state: &mut State,
        id: OpId,
        target: Target,
        msg: Option<Message>,
        iov: &IoVec,
        timeout: Option<Duration>,
        completer: Completer,
    ) {
        let socket = match resolve(state, target) {
            Ok(socket) => socket,
            Err(status) => return self.dispatch(completer, Outcome::returned(status, msg)),
        };
        let msg = match msg {
            Some(msg) => msg,
            None => match gather(iov) {
                Ok(msg) => msg,
                Err(status) => return self.dispatch(completer, Outcome::failed(status)),
            },
        };
        let Ok(entry) = state.sockets.get(socket) else {
            return self.dispatch(completer, Outcome::returned(Status::CLOSED, Some(msg)));
        };
        if !entry.protocol.can_send() {
            return self.dispatch(completer, Outcome::returned(Status::NOT_SUPPORTED, Some(msg)));
        }

        // Earlier sends still waiting go first.
        let queued = entry.senders.iter().any(|op| state.ops.contains_key(op));
        let len = msg.len();
        let msg = if queued {
            msg
        } else {
            match self.deliver(state, socket, msg) {
                Ok(()) => {
                    trace!(op = id.0, socket, len, "message sent");
                    return self.dispatch(completer, Outcome::success(len));
                }
                Err(msg) => msg,
            }
        };

        if timeout == Some(Duration::ZERO) {
            return self.dispatch(completer, Outcome::returned(Status::TIMED_OUT, Some(msg)));
        }
        let timer = timeout.and_then(|after| self.schedule_expiry(id, after, Status::TIMED_OUT));
        state.ops.insert(
            id,
            PendingOp {
                kind: PendingKind::Send,
                socket: Some(socket),
                target: Some(target),
                msg: Some(msg),
                completer,
                timer,
            },
        );
        if let Ok(entry) = state.sockets.get_mut(socket) {
            entry.senders.push_back(id);
        }
        trace!(op = id.0, socket, "send waiting for a peer");
    }

    fn submit_recv(
        &self,
        state: &mut State,
        id: OpId,
        target: Target,
        timeout: Option<Duration>,
        completer: Completer,
    ) {
        let socket = match resolve(state, target) {
            Ok(socket) => socket,
            Err(status) => return self.dispatch(completer, Outcome::failed(status)),
        };
        let Ok(entry) = state.sockets.get_mut(socket) else {
            return self.dispatch(completer, Outcome::failed(Status::CLOSED));
        };
        if !entry.protocol.can_recv() {
            return self.dispatch(completer, Outcome::failed(Status::NOT_SUPPORTED));
        }

        let waiting = entry.receivers.iter().any(|op| state.ops.contains_key(op));
        if !waiting {
            if let Some(msg) = take_queued(entry) {
                trace!(op = id.0, socket, len = msg.len(), "message received");
                self.dispatch(completer, Outcome::received(msg));
                // Room in the queue may unblock a peer's send.
                self.pump(state, socket);
                return;
            }
        }

        entry.receivers.push_back(id);
        state.ops.insert(
            id,
            PendingOp {
                kind: PendingKind::Recv,
                socket: Some(socket),
                target: Some(target),
                msg: None,
                completer,
                timer: None,
            },
        );
        // A peer send waiting for room can hand over directly.
        self.pump(state, socket);
        if !state.ops.contains_key(&id) {
            return;
        }
        if timeout == Some(Duration::ZERO) {
            self.finish_op(state, id, Status::TIMED_OUT);
            return;
        }
        let timer = timeout.and_then(|after| self.schedule_expiry(id, after, Status::TIMED_OUT));
        if let Some(op) = state.ops.get_mut(&id) {
            op.timer = timer;
        }
    }

    pub(crate) fn abort(&self, id: OpId, status: Status) {
        let mut state = self.state.lock();
        if self.finish_op(&mut state, id, status) {
            trace!(op = id.0, status = status.raw(), "operation aborted");
        }
    }

    fn schedule_expiry(&self, id: OpId, after: Duration, status: Status) -> Option<TimerId> {
        let deadline = Instant::now().checked_add(after)?;
        let this = Weak::clone(&self.this);
        Some(self.timers.schedule(deadline, move || {
            if let Some(runtime) = this.upgrade() {
                runtime.expire(id, status);
            }
        }))
    }

    fn expire(&self, id: OpId, status: Status) {
        let mut state = self.state.lock();
        if let Some(op) = state.ops.get_mut(&id) {
            op.timer = None;
        }
        self.finish_op(&mut state, id, status);
    }

    /// Complete a pending op early. A send hands its message back.
    fn finish_op(&self, state: &mut State, id: OpId, status: Status) -> bool {
        let Some(op) = state.ops.remove(&id) else {
            return false;
        };
        if let Some(timer) = op.timer {
            self.timers.cancel(timer);
        }
        if let Some(socket) = op.socket.and_then(|socket| state.sockets.get_mut(socket).ok()) {
            socket.senders.retain(|queued| *queued != id);
            socket.receivers.retain(|queued| *queued != id);
        }
        trace!(op = id.0, kind = ?op.kind, status = status.raw(), "operation finished");
        self.dispatch(op.completer, Outcome::returned(status, op.msg));
        true
    }

    // Delivery

    /// Route `msg` from `socket` to one attached pipe: the pipe it is
    /// addressed to, else the next in round-robin order with room.
    fn deliver(&self, state: &mut State, socket: u32, msg: Message) -> Result<(), Message> {
        let Ok(entry) = state.sockets.get(socket) else {
            return Err(msg);
        };
        if entry.pipes.is_empty() {
            return Err(msg);
        }
        let pipes = entry.pipes.clone();
        let start = entry.cursor;

        if let Some(pipe) = msg.pipe() {
            if pipes.contains(&pipe.raw()) {
                return self.offer(state, pipe.raw(), msg);
            }
        }

        let mut msg = msg;
        for step in 0..pipes.len() {
            let index = (start + step) % pipes.len();
            match self.offer(state, pipes[index], msg) {
                Ok(()) => {
                    if let Ok(entry) = state.sockets.get_mut(socket) {
                        entry.cursor = index + 1;
                    }
                    return Ok(());
                }
                Err(back) => msg = back,
            }
        }
        Err(msg)
    }

    /// Push `msg` through one pipe to the peer socket. Hands it straight to a
    /// waiting receive, else queues it if the peer has room.
    fn offer(&self, state: &mut State, pipe: u32, mut msg: Message) -> Result<(), Message> {
        let Some(peer) = state.pipes.get(pipe).ok().map(|entry| entry.peer) else {
            return Err(msg);
        };
        let Ok(peer_entry) = state.pipes.get(peer) else {
            return Err(msg);
        };
        if peer_entry.state != PipeState::Attached {
            return Err(msg);
        }

        let limit = peer_entry.options.size(OptionName::RecvSizeMax).unwrap_or(0);
        if limit > 0 && msg.len() > limit {
            debug!(pipe = peer, size = msg.len(), limit, "dropping oversized message");
            return Ok(());
        }
        if msg.is_expired(Instant::now()) {
            trace!(pipe = peer, "dropping expired message");
            return Ok(());
        }

        msg.set_pipe(Some(Pipe::from_raw(peer)));
        if let Some(NativeValue::String(url)) = peer_entry.options.value(OptionName::Url) {
            msg.set_option(OptionName::Url, Bytes::from(url.clone()));
        }
        if let Some(NativeValue::Addr(addr)) = peer_entry.options.value(OptionName::RemoteAddress) {
            msg.set_option(OptionName::RemoteAddress, Bytes::from(addr.to_string()));
        }

        let Ok(socket) = state.sockets.get_mut(peer_entry.socket) else {
            return Err(msg);
        };
        while let Some(op_id) = socket.receivers.pop_front() {
            if let Some(op) = state.ops.remove(&op_id) {
                if let Some(timer) = op.timer {
                    self.timers.cancel(timer);
                }
                trace!(op = op_id.0, pipe = peer, len = msg.len(), "message received");
                self.dispatch(op.completer, Outcome::received(msg));
                return Ok(());
            }
        }
        if socket.queue.len() < socket.recv_depth() {
            socket.queue.push_back(msg);
            return Ok(());
        }
        Err(msg)
    }

    /// Retry waiting sends on `socket` and on every socket it is connected to.
    fn pump(&self, state: &mut State, socket: u32) {
        let mut sockets = vec![socket];
        if let Ok(entry) = state.sockets.get(socket) {
            for pipe in &entry.pipes {
                let peer_socket = state
                    .pipes
                    .get(*pipe)
                    .and_then(|p| state.pipes.get(p.peer))
                    .map(|peer| peer.socket);
                if let Ok(peer_socket) = peer_socket {
                    if !sockets.contains(&peer_socket) {
                        sockets.push(peer_socket);
                    }
                }
            }
        }
        loop {
            let mut progress = false;
            for id in &sockets {
                progress |= self.flush_senders(state, *id);
            }
            if !progress {
                break;
            }
        }
    }

    fn flush_senders(&self, state: &mut State, socket: u32) -> bool {
        let mut progress = false;
        loop {
            let Some(op_id) = state
                .sockets
                .get(socket)
                .ok()
                .and_then(|entry| entry.senders.front().copied())
            else {
                break;
            };
            let Some(mut op) = state.ops.remove(&op_id) else {
                pop_sender(state, socket);
                continue;
            };
            let Some(msg) = op.msg.take() else {
                pop_sender(state, socket);
                state.ops.insert(op_id, op);
                continue;
            };
            let len = msg.len();
            match self.deliver(state, socket, msg) {
                Ok(()) => {
                    pop_sender(state, socket);
                    if let Some(timer) = op.timer {
                        self.timers.cancel(timer);
                    }
                    trace!(op = op_id.0, socket, len, "queued message sent");
                    self.dispatch(op.completer, Outcome::success(len));
                    progress = true;
                }
                Err(msg) => {
                    op.msg = Some(msg);
                    state.ops.insert(op_id, op);
                    break;
                }
            }
        }
        progress
    }

    // Shutdown

    /// Close everything and stop every engine thread. Later calls fail with
    /// `Closed`.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            for socket in state.sockets.ids() {
                let _ = self.close_socket(&mut state, socket);
            }
            let ops: Vec<OpId> = state.ops.keys().copied().collect();
            for op in ops {
                self.finish_op(&mut state, op, Status::CLOSED);
            }
            state.closed = true;
        }
        self.timers.shutdown();
        self.events.shutdown();
        self.pool.shutdown();
        debug!("loopback engine shut down");
    }
}

fn reconnect_for(options: &OptionStore) -> ReconnectState {
    let min = options
        .ms(OptionName::ReconnectTimeMin)
        .and_then(ms_to_duration)
        .unwrap_or(DEFAULT_RECONNECT_MIN);
    let max = options
        .ms(OptionName::ReconnectTimeMax)
        .and_then(ms_to_duration)
        .unwrap_or(Duration::ZERO);
    ReconnectState::new(min, max)
}

/// Socket behind a transfer target.
fn resolve(state: &State, target: Target) -> NativeResult<u32> {
    match target {
        Target::Socket(id) => state.sockets.get(id).map(|_| id),
        Target::Context(id) => state.contexts.get(id).map(|context| context.socket),
        Target::Dialer(_) | Target::Listener(_) | Target::Pipe(_) => Err(Status::NOT_SUPPORTED),
    }
}

/// Build a message body from an I/O vector.
fn gather(iov: &IoVec) -> NativeResult<Message> {
    if iov.is_empty() {
        return Err(Status::INVALID);
    }
    let mut msg = Message::new();
    for segment in iov {
        msg.append_body(segment).map_err(|_| Status::NO_MEMORY)?;
    }
    Ok(msg)
}

fn take_queued(socket: &mut SocketEntry) -> Option<Message> {
    let now = Instant::now();
    while let Some(msg) = socket.queue.pop_front() {
        if msg.is_expired(now) {
            trace!("dropping expired message");
            continue;
        }
        return Some(msg);
    }
    None
}

fn pop_sender(state: &mut State, socket: u32) {
    if let Ok(entry) = state.sockets.get_mut(socket) {
        entry.senders.pop_front();
    }
}

fn callback(state: &State, socket: u32, event: PipeEvent) -> Option<PipeCallback> {
    state.sockets.get(socket).ok()?.notify[event.index()].clone()
}

fn invoke(callback: &PipeCallback, pipe: u32, event: PipeEvent) {
    trace!(pipe, %event, "pipe event");
    if catch_unwind(AssertUnwindSafe(|| callback(Pipe::from_raw(pipe), event))).is_err() {
        error!(pipe, %event, "pipe callback panicked");
    }
}
