//! Status code descriptions.

use carapace_core::error::Status;

static MESSAGES: [&str; 32] = [
    "Hunky dory",
    "Interrupted",
    "Out of memory",
    "Invalid argument",
    "Resource busy",
    "Timed out",
    "Connection refused",
    "Object closed",
    "Try again",
    "Not supported",
    "Address in use",
    "Incorrect state",
    "Entry not found",
    "Protocol error",
    "Destination unreachable",
    "Address invalid",
    "Permission denied",
    "Message too large",
    "Connection aborted",
    "Connection reset",
    "Operation canceled",
    "Out of files",
    "Out of space",
    "Resource already exists",
    "Read only resource",
    "Write only resource",
    "Cryptographic error",
    "Peer could not be authenticated",
    "Option requires argument",
    "Ambiguous option",
    "Incorrect type",
    "Connection shutdown",
];

/// Engine text for `status`. System errors have none; the caller falls back to
/// the operating system's description.
pub(crate) fn describe(status: Status) -> Option<&'static str> {
    if status.system_errno().is_some() {
        return None;
    }
    if status.transport_code().is_some() {
        return Some("Transport error");
    }
    if status == Status::INTERNAL {
        return Some("Internal error detected");
    }
    MESSAGES.get(status.raw() as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(describe(Status::TIMED_OUT), Some("Timed out"));
        assert_eq!(describe(Status::CLOSED), Some("Object closed"));
        assert_eq!(describe(Status::CONNECTION_SHUTDOWN), Some("Connection shutdown"));
        assert_eq!(describe(Status::INTERNAL), Some("Internal error detected"));
    }

    #[test]
    fn test_wrapped_codes() {
        assert_eq!(describe(Status::transport(4)), Some("Transport error"));
        assert_eq!(describe(Status::system(2)), None);
        assert_eq!(describe(Status::from_raw(500)), None);
    }
}
