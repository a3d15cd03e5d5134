//! Handle types.
//!
//! Every engine object is addressed by a 32-bit identifier. Handles are plain
//! `Copy` values compared by identifier only; they do not close anything when
//! dropped. Closing is always an explicit call.
//!
//! The engine may hand a closed identifier out again for a new object, so two
//! equal handles taken on either side of a close/reopen boundary need not
//! refer to the same live resource.

use std::fmt;

use crate::native::Target;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $label:literal, $target:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw engine identifier without checking liveness.
            #[inline]
            #[must_use]
            pub const fn from_raw(id: u32) -> Self {
                Self(id)
            }

            /// The raw identifier, without asking the engine whether it is
            /// still open.
            #[inline]
            #[must_use]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub(crate) const fn target(self) -> Target {
                Target::$target(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// An open scalability-protocol socket.
    Socket,
    "socket",
    Socket
);

handle!(
    /// Independent send/receive state on a socket.
    Context,
    "context",
    Context
);

handle!(
    /// One connection owned by a dialer or listener.
    Pipe,
    "pipe",
    Pipe
);

handle!(
    /// Endpoint that initiates connections.
    Dialer,
    "dialer",
    Dialer
);

handle!(
    /// Endpoint that accepts connections.
    Listener,
    "listener",
    Listener
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_id() {
        assert_eq!(Socket::from_raw(7), Socket::from_raw(7));
        assert_ne!(Socket::from_raw(7), Socket::from_raw(8));
        assert_eq!(Pipe::from_raw(3).raw(), 3);
    }

    #[test]
    fn test_display() {
        assert_eq!(Socket::from_raw(1).to_string(), "socket#1");
        assert_eq!(Listener::from_raw(12).to_string(), "listener#12");
        assert_eq!(format!("{:?}", Context::from_raw(4)), "Context(4)");
    }

    #[test]
    fn test_targets() {
        assert_eq!(Dialer::from_raw(9).target(), Target::Dialer(9));
        assert_eq!(Pipe::from_raw(2).target(), Target::Pipe(2));
    }
}
