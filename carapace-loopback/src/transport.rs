//! In-process transport naming.
//!
//! Listeners bind `inproc://` names in a [`Registry`] owned by the engine;
//! dialers look the name up to find the listener they connect to. Other
//! transports parse but are not carried by the loopback engine.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use carapace_core::address::Address;
use carapace_core::error::Status;
use carapace_core::native::NativeResult;

/// Parse `url`, mapping parse failures to engine status codes.
pub(crate) fn parse(url: &str) -> NativeResult<Address> {
    Address::parse(url).map_err(|e| e.status())
}

/// Endpoint name bound by a listener, if the transport is carried in-process.
pub(crate) fn inproc_name(address: &Address) -> NativeResult<&str> {
    match address {
        Address::Inproc(name) => Ok(name),
        _ => Err(Status::NOT_SUPPORTED),
    }
}

/// Bound inproc names and the listener behind each.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    names: DashMap<String, u32>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `listener`.
    pub(crate) fn bind(&self, name: &str, listener: u32) -> NativeResult<()> {
        match self.names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Status::ADDRESS_IN_USE),
            Entry::Vacant(slot) => {
                slot.insert(listener);
                trace!(name, listener, "inproc name bound");
                Ok(())
            }
        }
    }

    /// Listener bound to `name`.
    pub(crate) fn lookup(&self, name: &str) -> NativeResult<u32> {
        self.names
            .get(name)
            .map(|entry| *entry)
            .ok_or(Status::CONNECTION_REFUSED)
    }

    /// Release `name` if `listener` still holds it.
    pub(crate) fn unbind(&self, name: &str, listener: u32) {
        if self.names.remove_if(name, |_, holder| *holder == listener).is_some() {
            trace!(name, listener, "inproc name released");
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_twice_is_in_use() {
        let registry = Registry::new();
        registry.bind("jobs", 1).unwrap();
        assert_eq!(registry.bind("jobs", 2), Err(Status::ADDRESS_IN_USE));
        assert_eq!(registry.lookup("jobs"), Ok(1));
    }

    #[test]
    fn test_unbind_only_by_holder() {
        let registry = Registry::new();
        registry.bind("jobs", 1).unwrap();
        registry.unbind("jobs", 2);
        assert_eq!(registry.lookup("jobs"), Ok(1));
        registry.unbind("jobs", 1);
        assert_eq!(registry.lookup("jobs"), Err(Status::CONNECTION_REFUSED));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parse_errors_map_to_status() {
        assert_eq!(parse("nonsense").err(), Some(Status::INVALID_ADDRESS));
        assert_eq!(parse("udp://1.2.3.4:5").err(), Some(Status::NOT_SUPPORTED));
        let address = parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(inproc_name(&address), Err(Status::NOT_SUPPORTED));
        let address = parse("inproc://a").unwrap();
        assert_eq!(inproc_name(&address), Ok("a"));
    }
}
