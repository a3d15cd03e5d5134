//! Option registry and typed accessors.
//!
//! The engine exposes one untyped key/value interface. This module pins every
//! option to a symbolic [`OptionName`], the engine key string, a value kind and
//! an access mode, all held in one static table. Typed accessors resolve the
//! name, check kind and access, make a single engine call and map the result
//! through the error mapper. Nothing reaches the engine for a name, kind or
//! access mode the table rejects.
//!
//! # Examples
//!
//! ```no_run
//! use carapace_core::options::{OptionName, Options};
//! use carapace_core::protocol::Protocol;
//! use carapace_core::socket::Socket;
//! use std::time::Duration;
//!
//! # fn example() -> carapace_core::error::Result<()> {
//! let socket = Socket::open(Protocol::Req0)?;
//! socket.set_duration(OptionName::SendTimeout, Duration::from_millis(500))?;
//! assert_eq!(
//!     socket.get_duration(OptionName::SendTimeout)?,
//!     Some(Duration::from_millis(500))
//! );
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;

use crate::address::SockAddr;
use crate::error::{Error, NativeResultExt, Result, Status};
use crate::native::{self, NativeValue, OpaquePtr, OptionKind, Target};

/// Whether an option may be read, written, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    #[must_use]
    pub const fn readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    #[must_use]
    pub const fn writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Registry entry for one option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: OptionName,
    /// Engine key string.
    pub key: &'static str,
    pub kind: OptionKind,
    pub access: Access,
}

macro_rules! option_table {
    ($($(#[$meta:meta])* $variant:ident => $key:literal, $kind:ident, $access:ident;)+) => {
        /// Symbolic option identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        pub enum OptionName {
            $($(#[$meta])* $variant,)+
        }

        static TABLE: &[OptionSpec] = &[
            $(OptionSpec {
                name: OptionName::$variant,
                key: $key,
                kind: OptionKind::$kind,
                access: Access::$access,
            },)+
        ];

        impl OptionName {
            /// Every registered option, in table order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];
        }
    };
}

option_table! {
    SocketName => "socket-name", String, ReadWrite;
    /// Whether the socket was opened in raw mode.
    Raw => "raw", Bool, ReadOnly;
    Protocol => "protocol", Int, ReadOnly;
    ProtocolName => "protocol-name", String, ReadOnly;
    Peer => "peer", Int, ReadOnly;
    PeerName => "peer-name", String, ReadOnly;
    /// Receive queue depth in messages.
    RecvBuffer => "recv-buffer", Int, ReadWrite;
    /// Send queue depth in messages.
    SendBuffer => "send-buffer", Int, ReadWrite;
    RecvFd => "recv-fd", Int, ReadOnly;
    SendFd => "send-fd", Int, ReadOnly;
    RecvTimeout => "recv-timeout", Ms, ReadWrite;
    SendTimeout => "send-timeout", Ms, ReadWrite;
    LocalAddress => "local-address", Addr, ReadOnly;
    RemoteAddress => "remote-address", Addr, ReadOnly;
    Url => "url", String, ReadOnly;
    TtlMax => "ttl-max", Int, ReadWrite;
    /// Largest message accepted from a peer; zero is unlimited.
    RecvSizeMax => "recv-size-max", Size, ReadWrite;
    ReconnectTimeMin => "reconnect-time-min", Ms, ReadWrite;
    /// Zero keeps the reconnect interval fixed at the minimum.
    ReconnectTimeMax => "reconnect-time-max", Ms, ReadWrite;
    TcpNoDelay => "tcp-nodelay", Bool, ReadWrite;
    TcpKeepAlive => "tcp-keepalive", Bool, ReadWrite;
    TcpBoundPort => "tcp-bound-port", Int, ReadOnly;
    TlsConfig => "tls-config", Ptr, ReadWrite;
    TlsAuthMode => "tls-authmode", Int, WriteOnly;
    TlsCertKeyFile => "tls-cert-key-file", String, WriteOnly;
    TlsCaFile => "tls-ca-file", String, WriteOnly;
    TlsServerName => "tls-server-name", String, WriteOnly;
    TlsVerified => "tls-verified", Bool, ReadOnly;
    ReqResendTime => "req:resend-time", Ms, ReadWrite;
    SubSubscribe => "sub:subscribe", Bytes, WriteOnly;
    SubUnsubscribe => "sub:unsubscribe", Bytes, WriteOnly;
    SubPreferNew => "sub:prefnew", Bool, ReadWrite;
    SurveyorSurveyTime => "surveyor:survey-time", Ms, ReadWrite;
    IpcPermissions => "ipc:permissions", Int, WriteOnly;
}

impl OptionName {
    /// Registry entry for this option.
    #[must_use]
    pub fn spec(self) -> &'static OptionSpec {
        &TABLE[self as usize]
    }

    /// Engine key string.
    #[must_use]
    pub fn key(self) -> &'static str {
        self.spec().key
    }

    #[must_use]
    pub fn kind(self) -> OptionKind {
        self.spec().kind
    }

    #[must_use]
    pub fn access(self) -> Access {
        self.spec().access
    }

    /// Look an option up by its engine key.
    pub fn resolve(key: &str) -> Result<Self> {
        TABLE
            .iter()
            .find(|spec| spec.key == key)
            .map(|spec| spec.name)
            .ok_or_else(|| Error::unknown_option(key))
    }
}

impl FromStr for OptionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}

impl fmt::Display for OptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A Rust type that maps onto one native option kind.
pub trait OptionType: Sized {
    const KIND: OptionKind;

    fn into_native(self) -> NativeValue;

    /// `None` when the engine returned a different kind.
    fn from_native(value: NativeValue) -> Option<Self>;
}

macro_rules! option_type {
    ($ty:ty, $kind:ident) => {
        impl OptionType for $ty {
            const KIND: OptionKind = OptionKind::$kind;

            fn into_native(self) -> NativeValue {
                NativeValue::$kind(self)
            }

            fn from_native(value: NativeValue) -> Option<Self> {
                match value {
                    NativeValue::$kind(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

option_type!(bool, Bool);
option_type!(i32, Int);
option_type!(usize, Size);
option_type!(u64, U64);
option_type!(Bytes, Bytes);
option_type!(OpaquePtr, Ptr);
option_type!(String, String);
option_type!(SockAddr, Addr);

/// Durations travel as whole milliseconds. `None` is infinite.
///
/// Writes truncate below a millisecond and saturate at `i32::MAX`
/// milliseconds; reads report exactly what the engine stored.
impl OptionType for Option<Duration> {
    const KIND: OptionKind = OptionKind::Ms;

    fn into_native(self) -> NativeValue {
        NativeValue::Ms(duration_to_ms(self))
    }

    fn from_native(value: NativeValue) -> Option<Self> {
        match value {
            NativeValue::Ms(ms) => Some(ms_to_duration(ms)),
            _ => None,
        }
    }
}

/// Milliseconds as sent to the engine; `-1` for infinite.
#[must_use]
pub fn duration_to_ms(duration: Option<Duration>) -> i32 {
    match duration {
        None => -1,
        Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
    }
}

/// Inverse of [`duration_to_ms`]. Any negative value is infinite.
#[must_use]
pub fn ms_to_duration(ms: i32) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}

fn check(name: OptionName, kind: OptionKind, write: bool, context: &str) -> Result<()> {
    let spec = name.spec();
    if spec.kind != kind {
        return Err(Error::native(Status::BAD_TYPE, context.to_string()));
    }
    if write && !spec.access.writable() {
        return Err(Error::native(Status::READ_ONLY, context.to_string()));
    }
    if !write && !spec.access.readable() {
        return Err(Error::native(Status::WRITE_ONLY, context.to_string()));
    }
    Ok(())
}

pub(crate) fn get<T: OptionType>(target: Target, name: OptionName) -> Result<T> {
    let context = format!("get_opt({name})");
    check(name, T::KIND, false, &context)?;
    let value = native::engine()?
        .get_option(target, name.key(), T::KIND)
        .raise(context.clone())?;
    T::from_native(value).ok_or_else(|| Error::native(Status::BAD_TYPE, context))
}

pub(crate) fn set<T: OptionType>(target: Target, name: OptionName, value: T) -> Result<()> {
    let context = format!("set_opt({name})");
    check(name, T::KIND, true, &context)?;
    native::engine()?
        .set_option(target, name.key(), value.into_native())
        .raise(context)
}

/// Typed option access, shared by every handle that carries options.
///
/// Implemented for [`Socket`](crate::socket::Socket),
/// [`Context`](crate::socket::Context), [`Dialer`](crate::dialer::Dialer),
/// [`Listener`](crate::dialer::Listener) and [`Pipe`](crate::pipe::Pipe).
///
/// Byte values come back as [`Bytes`] snapshots. They stay valid after the
/// option changes; re-read the option to observe the change.
pub trait Options {
    /// The engine object this handle addresses.
    #[doc(hidden)]
    fn option_target(&self) -> Target;

    fn get_opt<T: OptionType>(&self, name: OptionName) -> Result<T> {
        get(self.option_target(), name)
    }

    fn set_opt<T: OptionType>(&self, name: OptionName, value: T) -> Result<()> {
        set(self.option_target(), name, value)
    }

    /// Read an option by engine key, failing with `UnknownOption` before any
    /// engine call if the key is not registered.
    fn get_opt_by_key<T: OptionType>(&self, key: &str) -> Result<T> {
        self.get_opt(OptionName::resolve(key)?)
    }

    fn set_opt_by_key<T: OptionType>(&self, key: &str, value: T) -> Result<()> {
        self.set_opt(OptionName::resolve(key)?, value)
    }

    fn get_bool(&self, name: OptionName) -> Result<bool> {
        self.get_opt(name)
    }

    fn set_bool(&self, name: OptionName, value: bool) -> Result<()> {
        self.set_opt(name, value)
    }

    fn get_int(&self, name: OptionName) -> Result<i32> {
        self.get_opt(name)
    }

    fn set_int(&self, name: OptionName, value: i32) -> Result<()> {
        self.set_opt(name, value)
    }

    fn get_size(&self, name: OptionName) -> Result<usize> {
        self.get_opt(name)
    }

    fn set_size(&self, name: OptionName, value: usize) -> Result<()> {
        self.set_opt(name, value)
    }

    fn get_u64(&self, name: OptionName) -> Result<u64> {
        self.get_opt(name)
    }

    fn set_u64(&self, name: OptionName, value: u64) -> Result<()> {
        self.set_opt(name, value)
    }

    /// `Ok(None)` means infinite.
    fn get_duration(&self, name: OptionName) -> Result<Option<Duration>> {
        self.get_opt(name)
    }

    fn set_duration(&self, name: OptionName, value: impl Into<Option<Duration>>) -> Result<()> {
        self.set_opt(name, value.into())
    }

    fn get_bytes(&self, name: OptionName) -> Result<Bytes> {
        self.get_opt(name)
    }

    fn set_bytes(&self, name: OptionName, value: impl Into<Bytes>) -> Result<()> {
        self.set_opt(name, value.into())
    }

    fn get_ptr(&self, name: OptionName) -> Result<OpaquePtr> {
        self.get_opt(name)
    }

    fn set_ptr(&self, name: OptionName, value: OpaquePtr) -> Result<()> {
        self.set_opt(name, value)
    }

    fn get_string(&self, name: OptionName) -> Result<String> {
        self.get_opt(name)
    }

    fn set_string(&self, name: OptionName, value: impl Into<String>) -> Result<()> {
        self.set_opt(name, value.into())
    }

    fn get_addr(&self, name: OptionName) -> Result<SockAddr> {
        self.get_opt(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashSet;

    #[test]
    fn test_table_order_matches_enum() {
        for (index, spec) in TABLE.iter().enumerate() {
            assert_eq!(spec.name as usize, index, "{}", spec.key);
        }
        assert_eq!(TABLE.len(), OptionName::ALL.len());
    }

    #[test]
    fn test_mapping_is_bijective() {
        let keys: HashSet<_> = TABLE.iter().map(|spec| spec.key).collect();
        assert_eq!(keys.len(), TABLE.len());
        for &name in OptionName::ALL {
            assert_eq!(OptionName::resolve(name.key()).unwrap(), name);
        }
    }

    #[test]
    fn test_unknown_option() {
        let err = OptionName::resolve("no-such-option").unwrap_err();
        assert!(matches!(err, Error::UnknownOption(ref key) if key == "no-such-option"));
        assert!("recv-timeout".parse::<OptionName>().is_ok());
    }

    #[test]
    fn test_kind_and_access_checked_first() {
        let err = check(OptionName::SendTimeout, OptionKind::Int, false, "t").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadType);

        let err = check(OptionName::Protocol, OptionKind::Int, true, "t").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);

        let err = check(OptionName::SubSubscribe, OptionKind::Bytes, false, "t").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteOnly);

        assert!(check(OptionName::SubSubscribe, OptionKind::Bytes, true, "t").is_ok());
    }

    #[test]
    fn test_duration_conversion() {
        assert_eq!(duration_to_ms(None), -1);
        assert_eq!(duration_to_ms(Some(Duration::from_micros(1_999))), 1);
        assert_eq!(duration_to_ms(Some(Duration::from_secs(u64::MAX))), i32::MAX);
        assert_eq!(ms_to_duration(-1), None);
        assert_eq!(ms_to_duration(500), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_option_type_mismatch() {
        assert_eq!(bool::from_native(NativeValue::Int(1)), None);
        assert_eq!(i32::from_native(NativeValue::Int(7)), Some(7));
        assert_eq!(
            <Option<Duration>>::from_native(NativeValue::Ms(-1)),
            Some(None)
        );
    }
}
