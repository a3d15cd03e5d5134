//! Carapace Error Types
//!
//! Every engine call reports a [`Status`]. This module classifies status codes
//! into the closed [`ErrorKind`] taxonomy, looks up their descriptions and turns
//! failures into [`Error`] values that carry the name of the failing operation.

use std::borrow::Cow;
use std::fmt;
use std::io;
use thiserror::Error;

use crate::native;

/// Raw status code reported by the engine.
///
/// Zero is success. Codes `1..=31` and `1000` are engine errors. Two high-bit
/// ranges wrap errors from outside the engine: `0x1000_0000 | errno` for
/// operating system errors and `0x2000_0000 | code` for transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    pub const SUCCESS: Self = Self(0);
    pub const INTERRUPTED: Self = Self(1);
    pub const NO_MEMORY: Self = Self(2);
    pub const INVALID: Self = Self(3);
    pub const BUSY: Self = Self(4);
    pub const TIMED_OUT: Self = Self(5);
    pub const CONNECTION_REFUSED: Self = Self(6);
    pub const CLOSED: Self = Self(7);
    pub const TRY_AGAIN: Self = Self(8);
    pub const NOT_SUPPORTED: Self = Self(9);
    pub const ADDRESS_IN_USE: Self = Self(10);
    pub const INCORRECT_STATE: Self = Self(11);
    pub const NOT_FOUND: Self = Self(12);
    pub const PROTOCOL: Self = Self(13);
    pub const UNREACHABLE: Self = Self(14);
    pub const INVALID_ADDRESS: Self = Self(15);
    pub const PERMISSION: Self = Self(16);
    pub const MESSAGE_TOO_LARGE: Self = Self(17);
    pub const CONNECTION_ABORTED: Self = Self(18);
    pub const CONNECTION_RESET: Self = Self(19);
    pub const CANCELED: Self = Self(20);
    pub const OUT_OF_FILES: Self = Self(21);
    pub const OUT_OF_SPACE: Self = Self(22);
    pub const ALREADY_EXISTS: Self = Self(23);
    pub const READ_ONLY: Self = Self(24);
    pub const WRITE_ONLY: Self = Self(25);
    pub const CRYPTO: Self = Self(26);
    pub const PEER_AUTH: Self = Self(27);
    pub const NO_ARGUMENT: Self = Self(28);
    pub const AMBIGUOUS: Self = Self(29);
    pub const BAD_TYPE: Self = Self(30);
    pub const CONNECTION_SHUTDOWN: Self = Self(31);
    pub const INTERNAL: Self = Self(1000);

    /// Flag marking a wrapped operating system error.
    pub const SYSTEM_FLAG: u32 = 0x1000_0000;
    /// Flag marking a wrapped transport error.
    pub const TRANSPORT_FLAG: u32 = 0x2000_0000;

    const PAYLOAD_MASK: u32 = 0x0FFF_FFFF;

    /// Wrap a raw code as reported by the engine.
    #[inline]
    #[must_use]
    pub const fn from_raw(code: u32) -> Self {
        Self(code)
    }

    /// The raw numeric code.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Wrap an operating system `errno`.
    #[must_use]
    pub const fn system(errno: i32) -> Self {
        Self(Self::SYSTEM_FLAG | (errno as u32 & Self::PAYLOAD_MASK))
    }

    /// Wrap a transport-specific error code.
    #[must_use]
    pub const fn transport(code: u32) -> Self {
        Self(Self::TRANSPORT_FLAG | (code & Self::PAYLOAD_MASK))
    }

    /// The wrapped `errno`, if this is a system error.
    #[must_use]
    pub const fn system_errno(self) -> Option<i32> {
        if self.0 & Self::SYSTEM_FLAG != 0 {
            Some((self.0 & Self::PAYLOAD_MASK) as i32)
        } else {
            None
        }
    }

    /// The wrapped transport code, if this is a transport error.
    #[must_use]
    pub const fn transport_code(self) -> Option<u32> {
        if self.0 & Self::TRANSPORT_FLAG != 0 {
            Some(self.0 & Self::PAYLOAD_MASK)
        } else {
            None
        }
    }

    /// Classify this status into the error taxonomy.
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        classify(self)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.0)
    }
}

/// Closed classification of every status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    Interrupted,
    NoMemory,
    InvalidArgument,
    Busy,
    TimedOut,
    ConnectionRefused,
    Closed,
    /// The operation would block. Non-blocking sends and receives surface
    /// this as an outcome rather than an error.
    WouldBlock,
    NotSupported,
    AddressInUse,
    IncorrectState,
    NotFound,
    Protocol,
    Unreachable,
    InvalidAddress,
    PermissionDenied,
    MessageTooLarge,
    ConnectionAborted,
    ConnectionReset,
    Canceled,
    OutOfFiles,
    OutOfSpace,
    AlreadyExists,
    ReadOnly,
    WriteOnly,
    CryptoFailure,
    PeerAuthFailure,
    NoArgument,
    AmbiguousOption,
    BadType,
    ConnectionShutdown,
    Internal,
    /// Wrapped operating system error.
    System,
    /// Wrapped transport error.
    Transport,
}

impl ErrorKind {
    /// Static text used when no description is available for a code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Interrupted => "interrupted",
            Self::NoMemory => "out of memory",
            Self::InvalidArgument => "invalid argument",
            Self::Busy => "resource busy",
            Self::TimedOut => "timed out",
            Self::ConnectionRefused => "connection refused",
            Self::Closed => "object closed",
            Self::WouldBlock => "try again",
            Self::NotSupported => "not supported",
            Self::AddressInUse => "address in use",
            Self::IncorrectState => "incorrect state",
            Self::NotFound => "entry not found",
            Self::Protocol => "protocol error",
            Self::Unreachable => "destination unreachable",
            Self::InvalidAddress => "address invalid",
            Self::PermissionDenied => "permission denied",
            Self::MessageTooLarge => "message too large",
            Self::ConnectionAborted => "connection aborted",
            Self::ConnectionReset => "connection reset",
            Self::Canceled => "operation canceled",
            Self::OutOfFiles => "out of files",
            Self::OutOfSpace => "out of space",
            Self::AlreadyExists => "resource already exists",
            Self::ReadOnly => "read only resource",
            Self::WriteOnly => "write only resource",
            Self::CryptoFailure => "cryptographic error",
            Self::PeerAuthFailure => "peer could not be authenticated",
            Self::NoArgument => "option requires argument",
            Self::AmbiguousOption => "ambiguous option",
            Self::BadType => "incorrect type",
            Self::ConnectionShutdown => "connection shutdown",
            Self::Internal => "internal error detected",
            Self::System => "system error",
            Self::Transport => "transport error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a status code to its [`ErrorKind`].
#[must_use]
pub fn classify(status: Status) -> ErrorKind {
    if status.system_errno().is_some() {
        return ErrorKind::System;
    }
    if status.transport_code().is_some() {
        return ErrorKind::Transport;
    }
    match status {
        Status::SUCCESS => ErrorKind::Success,
        Status::INTERRUPTED => ErrorKind::Interrupted,
        Status::NO_MEMORY => ErrorKind::NoMemory,
        Status::INVALID => ErrorKind::InvalidArgument,
        Status::BUSY => ErrorKind::Busy,
        Status::TIMED_OUT => ErrorKind::TimedOut,
        Status::CONNECTION_REFUSED => ErrorKind::ConnectionRefused,
        Status::CLOSED => ErrorKind::Closed,
        Status::TRY_AGAIN => ErrorKind::WouldBlock,
        Status::NOT_SUPPORTED => ErrorKind::NotSupported,
        Status::ADDRESS_IN_USE => ErrorKind::AddressInUse,
        Status::INCORRECT_STATE => ErrorKind::IncorrectState,
        Status::NOT_FOUND => ErrorKind::NotFound,
        Status::PROTOCOL => ErrorKind::Protocol,
        Status::UNREACHABLE => ErrorKind::Unreachable,
        Status::INVALID_ADDRESS => ErrorKind::InvalidAddress,
        Status::PERMISSION => ErrorKind::PermissionDenied,
        Status::MESSAGE_TOO_LARGE => ErrorKind::MessageTooLarge,
        Status::CONNECTION_ABORTED => ErrorKind::ConnectionAborted,
        Status::CONNECTION_RESET => ErrorKind::ConnectionReset,
        Status::CANCELED => ErrorKind::Canceled,
        Status::OUT_OF_FILES => ErrorKind::OutOfFiles,
        Status::OUT_OF_SPACE => ErrorKind::OutOfSpace,
        Status::ALREADY_EXISTS => ErrorKind::AlreadyExists,
        Status::READ_ONLY => ErrorKind::ReadOnly,
        Status::WRITE_ONLY => ErrorKind::WriteOnly,
        Status::CRYPTO => ErrorKind::CryptoFailure,
        Status::PEER_AUTH => ErrorKind::PeerAuthFailure,
        Status::NO_ARGUMENT => ErrorKind::NoArgument,
        Status::AMBIGUOUS => ErrorKind::AmbiguousOption,
        Status::BAD_TYPE => ErrorKind::BadType,
        Status::CONNECTION_SHUTDOWN => ErrorKind::ConnectionShutdown,
        _ => ErrorKind::Internal,
    }
}

/// Human readable text for a status code.
///
/// Wrapped system errors are described by the operating system; everything
/// else is asked of the installed engine. Returns an empty string when no
/// description exists.
#[must_use]
pub fn describe(status: Status) -> Cow<'static, str> {
    if let Some(errno) = status.system_errno() {
        return Cow::Owned(io::Error::from_raw_os_error(errno).to_string());
    }
    native::installed()
        .and_then(|engine| engine.strerror(status))
        .map_or(Cow::Borrowed(""), Cow::Borrowed)
}

/// Main error type for Carapace operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The engine reported a failure status.
    #[error("{context}: {description}")]
    Native {
        /// Failing operation name, or an explicit message supplied by the caller.
        context: Cow<'static, str>,
        status: Status,
        kind: ErrorKind,
        description: Cow<'static, str>,
    },

    /// Option name not present in the registry. Raised before any engine call.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// No engine has been installed in this process.
    #[error("no engine installed")]
    NoEngine,
}

/// Result type alias for Carapace operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an error for a failed status.
    ///
    /// Falls back to the static [`ErrorKind`] text when the description lookup
    /// yields nothing.
    pub fn native(status: Status, context: impl Into<Cow<'static, str>>) -> Self {
        let kind = classify(status);
        let description = match describe(status) {
            text if text.is_empty() => Cow::Borrowed(kind.as_str()),
            text => text,
        };
        Self::Native {
            context: context.into(),
            status,
            kind,
            description,
        }
    }

    /// Create an unknown option error
    pub fn unknown_option(name: impl Into<String>) -> Self {
        Self::UnknownOption(name.into())
    }

    /// Classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Native { kind, .. } => *kind,
            Self::UnknownOption(_) | Self::NoEngine => ErrorKind::NotSupported,
        }
    }

    /// The engine status behind this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::Native { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.kind() == ErrorKind::Closed
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::TimedOut
    }

    /// Check if retrying the same call may succeed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::Busy
                | ErrorKind::ConnectionRefused
                | ErrorKind::Unreachable
        )
    }

    /// Check if this is a connection error
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionShutdown
                | ErrorKind::Unreachable
        )
    }
}

/// Convert a status into `Ok(())` or an [`Error`] naming `context`.
///
/// `context` is normally the calling operation (`"Socket::dial"`); callers may
/// pass a full message instead.
pub fn raise_if_error(status: Status, context: impl Into<Cow<'static, str>>) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::native(status, context))
    }
}

/// Funnel an engine result through the error mapper.
pub trait NativeResultExt<T> {
    /// Map a failed status to an [`Error`] naming `context`.
    fn raise(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> NativeResultExt<T> for std::result::Result<T, Status> {
    #[inline]
    fn raise(self, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|status| Error::native(status, context))
    }
}
