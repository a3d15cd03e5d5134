//! Identifier tables.
//!
//! Each object class gets its own table. Identifiers are handed out from a
//! random starting point and increase monotonically, wrapping within the
//! positive 31-bit range and skipping live entries. A closed identifier is
//! therefore reused only after the counter has gone all the way around.

use hashbrown::HashMap;
use rand::Rng;

use carapace_core::error::Status;
use carapace_core::native::NativeResult;

/// Largest identifier handed out.
pub(crate) const MAX_ID: u32 = 0x7fff_ffff;

pub(crate) struct IdTable<T> {
    entries: HashMap<u32, T>,
    next: u32,
}

impl<T> IdTable<T> {
    pub(crate) fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen_range(1..=MAX_ID))
    }

    pub(crate) fn starting_at(first: u32) -> Self {
        Self {
            entries: HashMap::new(),
            next: first.clamp(1, MAX_ID),
        }
    }

    /// Insert `value` under a fresh identifier.
    pub(crate) fn insert(&mut self, value: T) -> NativeResult<u32> {
        self.insert_with(|_| value)
    }

    /// Insert a value that needs to know its own identifier.
    pub(crate) fn insert_with(&mut self, build: impl FnOnce(u32) -> T) -> NativeResult<u32> {
        if self.entries.len() >= MAX_ID as usize {
            return Err(Status::OUT_OF_FILES);
        }
        let mut id = self.next;
        while self.entries.contains_key(&id) {
            id = wrap(id);
        }
        self.next = wrap(id);
        self.entries.insert(id, build(id));
        Ok(id)
    }

    pub(crate) fn get(&self, id: u32) -> NativeResult<&T> {
        self.entries.get(&id).ok_or(Status::CLOSED)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> NativeResult<&mut T> {
        self.entries.get_mut(&id).ok_or(Status::CLOSED)
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn ids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

const fn wrap(id: u32) -> u32 {
    if id >= MAX_ID {
        1
    } else {
        id + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_ids() {
        let mut table = IdTable::starting_at(10);
        assert_eq!(table.insert("a").unwrap(), 10);
        assert_eq!(table.insert("b").unwrap(), 11);
        table.remove(10);
        // Closed ids are not handed out again right away.
        assert_eq!(table.insert("c").unwrap(), 12);
    }

    #[test]
    fn test_wraps_and_skips_live_ids() {
        let mut table = IdTable::starting_at(MAX_ID);
        assert_eq!(table.insert(()).unwrap(), MAX_ID);
        assert_eq!(table.insert(()).unwrap(), 1);
        assert_eq!(table.insert(()).unwrap(), 2);

        let mut table = IdTable::starting_at(MAX_ID - 1);
        table.insert(()).unwrap();
        table.insert(()).unwrap();
        let id = table.insert(()).unwrap();
        table.remove(MAX_ID - 1);
        assert_eq!(id, 1);
        assert!(table.contains(MAX_ID));
    }

    #[test]
    fn test_missing_is_closed() {
        let mut table: IdTable<u8> = IdTable::starting_at(1);
        assert_eq!(table.get(5).err(), Some(Status::CLOSED));
        assert_eq!(table.get_mut(5).err(), Some(Status::CLOSED));
        let id = table.insert_with(|id| id as u8).unwrap();
        assert_eq!(*table.get(id).unwrap(), 1);
        assert_eq!(table.len(), 1);
    }
}
