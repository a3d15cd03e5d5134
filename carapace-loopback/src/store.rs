//! Per-object option storage.
//!
//! Every socket, context, endpoint and pipe carries an [`OptionStore`] seeded
//! with the options that object supports. Keys outside the store are
//! `NotSupported` for that object.

use hashbrown::HashMap;

use carapace_core::error::Status;
use carapace_core::native::{NativeResult, NativeValue, OptionKind};
use carapace_core::options::{Access, OptionName};

use crate::config::{MAX_BUFFER_DEPTH, MAX_TTL};

#[derive(Debug, Clone)]
struct Entry {
    /// `None` for write-only options and unset values.
    value: Option<NativeValue>,
    writable: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OptionStore {
    entries: HashMap<OptionName, Entry>,
}

impl OptionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Support `name` with an initial value.
    pub(crate) fn with(mut self, name: OptionName, value: NativeValue) -> Self {
        self.entries.insert(
            name,
            Entry {
                value: Some(value),
                writable: name.access().writable(),
            },
        );
        self
    }

    /// Support `name` without a readable value.
    pub(crate) fn with_unset(mut self, name: OptionName) -> Self {
        self.entries.insert(
            name,
            Entry {
                value: None,
                writable: name.access().writable(),
            },
        );
        self
    }

    /// Copy `names` from another store, where present there.
    pub(crate) fn inherit(mut self, from: &Self, names: &[OptionName]) -> Self {
        for name in names {
            if let Some(entry) = from.entries.get(name) {
                self.entries.insert(*name, entry.clone());
            }
        }
        self
    }

    /// Make every option read-only.
    pub(crate) fn frozen(mut self) -> Self {
        for entry in self.entries.values_mut() {
            entry.writable = false;
        }
        self
    }

    pub(crate) fn get(&self, key: &str, kind: OptionKind) -> NativeResult<NativeValue> {
        let name = OptionName::resolve(key).map_err(|_| Status::NOT_SUPPORTED)?;
        let entry = self.entries.get(&name).ok_or(Status::NOT_SUPPORTED)?;
        if name.access() == Access::WriteOnly {
            return Err(Status::WRITE_ONLY);
        }
        if name.kind() != kind {
            return Err(Status::BAD_TYPE);
        }
        entry.value.clone().ok_or(Status::NOT_FOUND)
    }

    pub(crate) fn set(&mut self, key: &str, value: NativeValue) -> NativeResult<()> {
        let name = OptionName::resolve(key).map_err(|_| Status::NOT_SUPPORTED)?;
        let entry = self.entries.get_mut(&name).ok_or(Status::NOT_SUPPORTED)?;
        if !entry.writable {
            return Err(Status::READ_ONLY);
        }
        if value.kind() != name.kind() {
            return Err(Status::BAD_TYPE);
        }
        validate(name, &value)?;
        entry.value = if name.access().readable() {
            Some(value)
        } else {
            None
        };
        Ok(())
    }

    /// Typed read for engine-internal use.
    pub(crate) fn value(&self, name: OptionName) -> Option<&NativeValue> {
        self.entries.get(&name)?.value.as_ref()
    }

    pub(crate) fn int(&self, name: OptionName) -> Option<i32> {
        match self.value(name)? {
            NativeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn ms(&self, name: OptionName) -> Option<i32> {
        match self.value(name)? {
            NativeValue::Ms(v) => Some(*v),
            _ => None,
        }
    }

    pub(crate) fn size(&self, name: OptionName) -> Option<usize> {
        match self.value(name)? {
            NativeValue::Size(v) => Some(*v),
            _ => None,
        }
    }
}

fn validate(name: OptionName, value: &NativeValue) -> NativeResult<()> {
    let ok = match (name, value) {
        (OptionName::RecvBuffer | OptionName::SendBuffer, NativeValue::Int(v)) => {
            (0..=MAX_BUFFER_DEPTH).contains(v)
        }
        (OptionName::TtlMax, NativeValue::Int(v)) => (1..=MAX_TTL).contains(v),
        (
            OptionName::RecvTimeout
            | OptionName::SendTimeout
            | OptionName::ReqResendTime
            | OptionName::SurveyorSurveyTime,
            NativeValue::Ms(v),
        ) => *v >= -1,
        (OptionName::ReconnectTimeMin | OptionName::ReconnectTimeMax, NativeValue::Ms(v)) => {
            *v >= 0
        }
        (OptionName::TlsAuthMode, NativeValue::Int(v)) => (0..=2).contains(v),
        (OptionName::IpcPermissions, NativeValue::Int(v)) => (0..=0o777).contains(v),
        (OptionName::SocketName, NativeValue::String(s)) => s.len() < 64,
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(Status::INVALID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OptionStore {
        OptionStore::new()
            .with(OptionName::RecvBuffer, NativeValue::Int(8))
            .with(OptionName::Protocol, NativeValue::Int(0x30))
            .with(OptionName::SendTimeout, NativeValue::Ms(-1))
            .with_unset(OptionName::SubSubscribe)
    }

    #[test]
    fn test_round_trip() {
        let mut store = store();
        store.set("send-timeout", NativeValue::Ms(500)).unwrap();
        assert_eq!(
            store.get("send-timeout", OptionKind::Ms).unwrap(),
            NativeValue::Ms(500)
        );
    }

    #[test]
    fn test_errors() {
        let mut store = store();
        assert_eq!(store.get("recv-fd", OptionKind::Int), Err(Status::NOT_SUPPORTED));
        assert_eq!(store.get("bogus", OptionKind::Int), Err(Status::NOT_SUPPORTED));
        assert_eq!(store.get("recv-buffer", OptionKind::Ms), Err(Status::BAD_TYPE));
        assert_eq!(
            store.set("protocol", NativeValue::Int(1)),
            Err(Status::READ_ONLY)
        );
        assert_eq!(
            store.set("recv-buffer", NativeValue::Int(9000)),
            Err(Status::INVALID)
        );
        assert_eq!(
            store.set("recv-buffer", NativeValue::Bool(true)),
            Err(Status::BAD_TYPE)
        );
        assert_eq!(
            store.get("sub:subscribe", OptionKind::Bytes),
            Err(Status::WRITE_ONLY)
        );
        assert!(store
            .set("sub:subscribe", NativeValue::Bytes(bytes::Bytes::new()))
            .is_ok());
    }

    #[test]
    fn test_frozen_and_inherit() {
        let parent = store();
        let mut child = OptionStore::new()
            .inherit(&parent, &[OptionName::RecvBuffer, OptionName::Url])
            .frozen();
        assert_eq!(child.int(OptionName::RecvBuffer), Some(8));
        assert_eq!(child.value(OptionName::Url), None);
        assert_eq!(
            child.set("recv-buffer", NativeValue::Int(1)),
            Err(Status::READ_ONLY)
        );
    }
}
