//! Engine object tables.
//!
//! Everything the engine knows about sockets, contexts, endpoints, pipes and
//! in-flight operations lives in one [`State`] behind one lock. The free
//! functions at the bottom seed each object's option store.

use std::collections::VecDeque;
use std::time::Duration;

use hashbrown::HashMap;

use carapace_core::address::{Address, SockAddr};
use carapace_core::message::Message;
use carapace_core::native::{Completer, NativeValue, OpId, PipeCallback, Target};
use carapace_core::options::{duration_to_ms, OptionName};
use carapace_core::protocol::Protocol;

use crate::config::{EngineConfig, DEFAULT_REQ_RESEND_TIME, DEFAULT_SURVEY_TIME};
use crate::reconnect::ReconnectState;
use crate::store::OptionStore;
use crate::table::IdTable;
use crate::timer::TimerId;

pub(crate) struct State {
    pub(crate) sockets: IdTable<SocketEntry>,
    pub(crate) contexts: IdTable<ContextEntry>,
    pub(crate) dialers: IdTable<DialerEntry>,
    pub(crate) listeners: IdTable<ListenerEntry>,
    pub(crate) pipes: IdTable<PipeEntry>,
    pub(crate) ops: HashMap<OpId, PendingOp>,
    /// Set once the engine shuts down; every later call fails with `Closed`.
    pub(crate) closed: bool,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            sockets: IdTable::new(),
            contexts: IdTable::new(),
            dialers: IdTable::new(),
            listeners: IdTable::new(),
            pipes: IdTable::new(),
            ops: HashMap::new(),
            closed: false,
        }
    }

    /// Options of whatever `target` names.
    pub(crate) fn options_mut(&mut self, target: Target) -> Option<&mut OptionStore> {
        let store = match target {
            Target::Socket(id) => &mut self.sockets.get_mut(id).ok()?.options,
            Target::Context(id) => &mut self.contexts.get_mut(id).ok()?.options,
            Target::Dialer(id) => &mut self.dialers.get_mut(id).ok()?.options,
            Target::Listener(id) => &mut self.listeners.get_mut(id).ok()?.options,
            Target::Pipe(id) => &mut self.pipes.get_mut(id).ok()?.options,
        };
        Some(store)
    }
}

pub(crate) struct SocketEntry {
    pub(crate) protocol: Protocol,
    pub(crate) options: OptionStore,
    /// Attached pipes, in attach order.
    pub(crate) pipes: Vec<u32>,
    /// Round-robin position into `pipes`.
    pub(crate) cursor: usize,
    /// Messages received but not yet taken by a receive.
    pub(crate) queue: VecDeque<Message>,
    pub(crate) senders: VecDeque<OpId>,
    pub(crate) receivers: VecDeque<OpId>,
    pub(crate) contexts: Vec<u32>,
    pub(crate) dialers: Vec<u32>,
    pub(crate) listeners: Vec<u32>,
    pub(crate) notify: [Option<PipeCallback>; 3],
}

impl SocketEntry {
    pub(crate) fn new(protocol: Protocol, options: OptionStore) -> Self {
        Self {
            protocol,
            options,
            pipes: Vec::new(),
            cursor: 0,
            queue: VecDeque::new(),
            senders: VecDeque::new(),
            receivers: VecDeque::new(),
            contexts: Vec::new(),
            dialers: Vec::new(),
            listeners: Vec::new(),
            notify: [None, None, None],
        }
    }

    /// Current `recv-buffer` depth.
    pub(crate) fn recv_depth(&self) -> usize {
        self.options
            .int(OptionName::RecvBuffer)
            .map_or(0, |depth| usize::try_from(depth).unwrap_or(0))
    }
}

pub(crate) struct ContextEntry {
    pub(crate) socket: u32,
    pub(crate) options: OptionStore,
}

pub(crate) struct DialerEntry {
    pub(crate) socket: u32,
    pub(crate) url: String,
    pub(crate) address: Address,
    pub(crate) options: OptionStore,
    pub(crate) started: bool,
    /// Pipe currently owned, pending or attached.
    pub(crate) pipe: Option<u32>,
    pub(crate) reconnect: ReconnectState,
    /// Scheduled redial.
    pub(crate) retry: Option<TimerId>,
}

pub(crate) struct ListenerEntry {
    pub(crate) socket: u32,
    pub(crate) url: String,
    pub(crate) address: Address,
    pub(crate) options: OptionStore,
    pub(crate) started: bool,
    pub(crate) pipes: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeOwner {
    Dialer(u32),
    Listener(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipeState {
    /// Adding callbacks still running. `rejected` is set when one closes it.
    Pending { rejected: bool },
    Attached,
}

pub(crate) struct PipeEntry {
    pub(crate) socket: u32,
    pub(crate) owner: PipeOwner,
    /// The pipe on the other side of the connection.
    pub(crate) peer: u32,
    pub(crate) state: PipeState,
    pub(crate) options: OptionStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Send,
    Recv,
    Sleep,
}

pub(crate) struct PendingOp {
    pub(crate) kind: PendingKind,
    /// Owning socket and the object the op was addressed to. `None` for sleeps.
    pub(crate) socket: Option<u32>,
    pub(crate) target: Option<Target>,
    /// Message waiting to be sent, handed back if the send fails.
    pub(crate) msg: Option<Message>,
    pub(crate) completer: Completer,
    pub(crate) timer: Option<TimerId>,
}

fn ms(duration: Duration) -> NativeValue {
    NativeValue::Ms(duration_to_ms(Some(duration)))
}

/// Options that only make sense for one protocol.
fn protocol_options(store: OptionStore, protocol: Protocol) -> OptionStore {
    match protocol {
        Protocol::Req0 => store.with(OptionName::ReqResendTime, ms(DEFAULT_REQ_RESEND_TIME)),
        Protocol::Sub0 => store
            .with_unset(OptionName::SubSubscribe)
            .with_unset(OptionName::SubUnsubscribe)
            .with(OptionName::SubPreferNew, NativeValue::Bool(false)),
        Protocol::Surveyor0 => {
            store.with(OptionName::SurveyorSurveyTime, ms(DEFAULT_SURVEY_TIME))
        }
        _ => store,
    }
}

pub(crate) fn socket_options(
    id: u32,
    protocol: Protocol,
    raw: bool,
    config: &EngineConfig,
) -> OptionStore {
    let peer = protocol.peer();
    let store = OptionStore::new()
        .with(OptionName::SocketName, NativeValue::String(id.to_string()))
        .with(OptionName::Raw, NativeValue::Bool(raw))
        .with(OptionName::Protocol, NativeValue::Int(i32::from(protocol.number())))
        .with(
            OptionName::ProtocolName,
            NativeValue::String(protocol.name().to_string()),
        )
        .with(OptionName::Peer, NativeValue::Int(i32::from(peer.number())))
        .with(OptionName::PeerName, NativeValue::String(peer.name().to_string()))
        .with(OptionName::RecvBuffer, NativeValue::Int(config.recv_buffer))
        .with(OptionName::SendBuffer, NativeValue::Int(config.send_buffer))
        .with(OptionName::RecvTimeout, NativeValue::Ms(-1))
        .with(OptionName::SendTimeout, NativeValue::Ms(-1))
        .with(OptionName::TtlMax, NativeValue::Int(config.ttl_max))
        .with(OptionName::RecvSizeMax, NativeValue::Size(config.recv_size_max))
        .with(OptionName::ReconnectTimeMin, ms(config.reconnect_min))
        .with(OptionName::ReconnectTimeMax, ms(config.reconnect_max))
        .with(OptionName::TcpNoDelay, NativeValue::Bool(true))
        .with(OptionName::TcpKeepAlive, NativeValue::Bool(false));
    protocol_options(store, protocol)
}

pub(crate) fn context_options(socket: &OptionStore, protocol: Protocol) -> OptionStore {
    let store = OptionStore::new().inherit(socket, &[OptionName::RecvTimeout, OptionName::SendTimeout]);
    // Current socket values win over the protocol defaults.
    protocol_options(store, protocol).inherit(
        socket,
        &[
            OptionName::ReqResendTime,
            OptionName::SubPreferNew,
            OptionName::SurveyorSurveyTime,
        ],
    )
}

fn transport_options(store: OptionStore, address: &Address, socket: &OptionStore) -> OptionStore {
    let mut store = store;
    if address.is_tcp() {
        store = store.inherit(socket, &[OptionName::TcpNoDelay, OptionName::TcpKeepAlive]);
    }
    if address.is_tls() {
        store = store
            .with_unset(OptionName::TlsConfig)
            .with_unset(OptionName::TlsAuthMode)
            .with_unset(OptionName::TlsCertKeyFile)
            .with_unset(OptionName::TlsCaFile)
            .with_unset(OptionName::TlsServerName)
            .with(OptionName::TlsVerified, NativeValue::Bool(false));
    }
    store
}

pub(crate) fn dialer_options(url: &str, address: &Address, socket: &OptionStore) -> OptionStore {
    let store = OptionStore::new()
        .with(OptionName::Url, NativeValue::String(url.to_string()))
        .inherit(
            socket,
            &[
                OptionName::RecvSizeMax,
                OptionName::ReconnectTimeMin,
                OptionName::ReconnectTimeMax,
            ],
        );
    transport_options(store, address, socket)
}

pub(crate) fn listener_options(url: &str, address: &Address, socket: &OptionStore) -> OptionStore {
    let mut store = OptionStore::new()
        .with(OptionName::Url, NativeValue::String(url.to_string()))
        .with(OptionName::LocalAddress, NativeValue::Addr(SockAddr::from(address)))
        .inherit(socket, &[OptionName::RecvSizeMax]);
    if let Address::Tcp { port, .. } | Address::Tls { port, .. } = address {
        store = store.with(OptionName::TcpBoundPort, NativeValue::Int(i32::from(*port)));
    }
    if address.is_ipc() {
        store = store.with_unset(OptionName::IpcPermissions);
    }
    transport_options(store, address, socket)
}

pub(crate) fn pipe_options(
    url: &str,
    local: &SockAddr,
    remote: &SockAddr,
    recv_size_max: usize,
) -> OptionStore {
    OptionStore::new()
        .with(OptionName::Url, NativeValue::String(url.to_string()))
        .with(OptionName::LocalAddress, NativeValue::Addr(local.clone()))
        .with(OptionName::RemoteAddress, NativeValue::Addr(remote.clone()))
        .with(OptionName::RecvSizeMax, NativeValue::Size(recv_size_max))
        .frozen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use carapace_core::error::Status;
    use carapace_core::native::OptionKind;

    #[test]
    fn test_socket_defaults() {
        let store = socket_options(7, Protocol::Req0, false, &EngineConfig::default());
        assert_eq!(
            store.get("socket-name", OptionKind::String),
            Ok(NativeValue::String("7".to_string()))
        );
        assert_eq!(
            store.get("peer-name", OptionKind::String),
            Ok(NativeValue::String("rep".to_string()))
        );
        assert_eq!(
            store.get("req:resend-time", OptionKind::Ms),
            Ok(NativeValue::Ms(60_000))
        );
        assert_eq!(store.get("recv-fd", OptionKind::Int), Err(Status::NOT_SUPPORTED));
        assert_eq!(
            store.get("surveyor:survey-time", OptionKind::Ms),
            Err(Status::NOT_SUPPORTED)
        );
    }

    #[test]
    fn test_context_inherits_timeouts() {
        let mut socket = socket_options(1, Protocol::Rep0, false, &EngineConfig::default());
        socket.set("recv-timeout", NativeValue::Ms(250)).unwrap();
        let context = context_options(&socket, Protocol::Rep0);
        assert_eq!(context.ms(OptionName::RecvTimeout), Some(250));
        assert_eq!(context.value(OptionName::RecvBuffer), None);
    }

    #[test]
    fn test_endpoint_transport_options() {
        let socket = socket_options(1, Protocol::Pair0, false, &EngineConfig::default());
        let tls = Address::parse("tls+tcp://127.0.0.1:4433").unwrap();
        let dialer = dialer_options("tls+tcp://127.0.0.1:4433", &tls, &socket);
        assert_eq!(dialer.get("tls-config", OptionKind::Ptr), Err(Status::NOT_FOUND));
        assert_eq!(
            dialer.get("tcp-nodelay", OptionKind::Bool),
            Ok(NativeValue::Bool(true))
        );

        let tcp = Address::parse("tcp://127.0.0.1:5555").unwrap();
        let listener = listener_options("tcp://127.0.0.1:5555", &tcp, &socket);
        assert_eq!(
            listener.get("tcp-bound-port", OptionKind::Int),
            Ok(NativeValue::Int(5555))
        );
        assert_eq!(listener.get("tls-config", OptionKind::Ptr), Err(Status::NOT_SUPPORTED));
    }
}
