//! Scalability protocol enumeration.
//!
//! A socket's protocol is fixed when the socket is opened. The wire behavior of
//! each protocol lives in the engine; this table only carries the identity that
//! the engine exposes through the `protocol`, `protocol-name`, `peer` and
//! `peer-name` options.

use std::fmt;

/// Scalability protocols.
///
/// Discriminants are the 16-bit protocol numbers exchanged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Protocol {
    /// PAIR v0 for exclusive bidirectional communication
    Pair0 = 0x10,

    /// PAIR v1, adds polyamorous mode in the engine
    Pair1 = 0x11,

    /// PUB for broadcasting to subscribers
    Pub0 = 0x20,

    /// SUB for receiving broadcasts
    Sub0 = 0x21,

    /// REQ request side of request/reply
    Req0 = 0x30,

    /// REP reply side of request/reply
    Rep0 = 0x31,

    /// PUSH sending side of a pipeline
    Push0 = 0x50,

    /// PULL receiving side of a pipeline
    Pull0 = 0x51,

    /// SURVEYOR asks every respondent
    Surveyor0 = 0x62,

    /// RESPONDENT answers surveys
    Respondent0 = 0x63,

    /// BUS for many-to-many meshes
    Bus0 = 0x70,
}

impl Protocol {
    /// All protocols known to this layer.
    pub const ALL: [Self; 11] = [
        Self::Pair0,
        Self::Pair1,
        Self::Pub0,
        Self::Sub0,
        Self::Req0,
        Self::Rep0,
        Self::Push0,
        Self::Pull0,
        Self::Surveyor0,
        Self::Respondent0,
        Self::Bus0,
    ];

    /// Protocol number as used on the wire.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u16 {
        self as u16
    }

    /// Look a protocol up by its wire number.
    #[must_use]
    pub fn from_number(number: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.number() == number)
    }

    /// Protocol name as reported by the `protocol-name` option.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pair0 | Self::Pair1 => "pair",
            Self::Pub0 => "pub",
            Self::Sub0 => "sub",
            Self::Req0 => "req",
            Self::Rep0 => "rep",
            Self::Push0 => "push",
            Self::Pull0 => "pull",
            Self::Surveyor0 => "surveyor",
            Self::Respondent0 => "respondent",
            Self::Bus0 => "bus",
        }
    }

    /// The protocol a peer must speak to be accepted.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Pair0 => Self::Pair0,
            Self::Pair1 => Self::Pair1,
            Self::Pub0 => Self::Sub0,
            Self::Sub0 => Self::Pub0,
            Self::Req0 => Self::Rep0,
            Self::Rep0 => Self::Req0,
            Self::Push0 => Self::Pull0,
            Self::Pull0 => Self::Push0,
            Self::Surveyor0 => Self::Respondent0,
            Self::Respondent0 => Self::Surveyor0,
            Self::Bus0 => Self::Bus0,
        }
    }

    /// Check if this protocol accepts connections from `peer`.
    #[must_use]
    pub fn is_compatible(self, peer: Self) -> bool {
        self.peer() == peer
    }

    /// Whether sockets of this protocol can send at all.
    #[must_use]
    pub const fn can_send(self) -> bool {
        !matches!(self, Self::Sub0 | Self::Pull0)
    }

    /// Whether sockets of this protocol can receive at all.
    #[must_use]
    pub const fn can_recv(self) -> bool {
        !matches!(self, Self::Pub0 | Self::Push0)
    }

    /// Whether the protocol supports contexts.
    #[must_use]
    pub const fn supports_contexts(self) -> bool {
        matches!(
            self,
            Self::Req0 | Self::Rep0 | Self::Sub0 | Self::Surveyor0 | Self::Respondent0
        )
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair1 => f.write_str("pair1"),
            other => write!(f, "{}0", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Req0.to_string(), "req0");
        assert_eq!(Protocol::Pair1.to_string(), "pair1");
        assert_eq!(Protocol::Surveyor0.to_string(), "surveyor0");
    }

    #[test]
    fn test_peer_is_involution() {
        for p in Protocol::ALL {
            assert_eq!(p.peer().peer(), p);
        }
    }

    #[test]
    fn test_compatibility() {
        assert!(Protocol::Req0.is_compatible(Protocol::Rep0));
        assert!(Protocol::Pub0.is_compatible(Protocol::Sub0));
        assert!(Protocol::Bus0.is_compatible(Protocol::Bus0));

        // Incompatible pairs
        assert!(!Protocol::Req0.is_compatible(Protocol::Req0));
        assert!(!Protocol::Pair0.is_compatible(Protocol::Pair1));
        assert!(!Protocol::Push0.is_compatible(Protocol::Sub0));
    }

    #[test]
    fn test_number_roundtrip() {
        for p in Protocol::ALL {
            assert_eq!(Protocol::from_number(p.number()), Some(p));
        }
        assert_eq!(Protocol::from_number(0xffff), None);
    }
}
