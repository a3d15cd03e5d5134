//! Growable byte segment with front headroom.
//!
//! Backs the header and body of a [`Message`](crate::message::Message).
//! Prepending uses spare headroom when there is some; appending grows the tail.
//! Every growing operation reserves first, so a failed allocation leaves the
//! segment exactly as it was.

use std::collections::TryReserveError;

use bytes::Bytes;

/// Headroom kept in front of freshly allocated segments.
pub(crate) const DEFAULT_HEADROOM: usize = 32;

/// A segment could not grow: the allocator refused or the size overflowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AllocError;

impl From<TryReserveError> for AllocError {
    fn from(_: TryReserveError) -> Self {
        Self
    }
}

/// Total capacity for `parts` plus fresh headroom.
fn capacity_for(parts: &[usize]) -> Result<usize, AllocError> {
    parts
        .iter()
        .try_fold(DEFAULT_HEADROOM, |acc, n| acc.checked_add(*n))
        .ok_or(AllocError)
}

#[derive(Clone, Default)]
pub(crate) struct Chunk {
    buf: Vec<u8>,
    start: usize,
}

impl Chunk {
    pub(crate) fn with_len(len: usize) -> Result<Self, AllocError> {
        let total = capacity_for(&[len])?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)?;
        buf.resize(total, 0);
        Ok(Self {
            buf,
            start: DEFAULT_HEADROOM,
        })
    }

    pub(crate) fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, start: 0 }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..]
    }

    /// Grow with zeros or shrink from the back.
    pub(crate) fn resize(&mut self, len: usize) -> Result<(), AllocError> {
        let current = self.len();
        if len > current {
            self.buf.try_reserve(len - current)?;
        }
        self.buf.resize(self.start + len, 0);
        Ok(())
    }

    pub(crate) fn append(&mut self, data: &[u8]) -> Result<(), AllocError> {
        self.buf.try_reserve(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn prepend(&mut self, data: &[u8]) -> Result<(), AllocError> {
        let n = data.len();
        if n <= self.start {
            self.start -= n;
            self.buf[self.start..self.start + n].copy_from_slice(data);
            return Ok(());
        }

        // Not enough headroom: rebuild with fresh headroom in front.
        let total = capacity_for(&[n, self.len()])?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)?;
        buf.resize(DEFAULT_HEADROOM, 0);
        buf.extend_from_slice(data);
        buf.extend_from_slice(self.as_slice());
        self.buf = buf;
        self.start = DEFAULT_HEADROOM;
        Ok(())
    }

    /// Remove `n` bytes from the front. `None` if fewer are present.
    pub(crate) fn trim(&mut self, n: usize) -> Option<Bytes> {
        if n > self.len() {
            return None;
        }
        let removed = Bytes::copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        Some(removed)
    }

    /// Remove `n` bytes from the back. `None` if fewer are present.
    pub(crate) fn chop(&mut self, n: usize) -> Option<Bytes> {
        let len = self.len();
        if n > len {
            return None;
        }
        let at = self.buf.len() - n;
        let removed = Bytes::copy_from_slice(&self.buf[at..]);
        self.buf.truncate(at);
        Some(removed)
    }

    /// Peek at the first `N` bytes without removing them.
    pub(crate) fn front<const N: usize>(&self) -> Option<[u8; N]> {
        self.as_slice().get(..N)?.try_into().ok()
    }

    /// Peek at the last `N` bytes without removing them.
    pub(crate) fn back<const N: usize>(&self) -> Option<[u8; N]> {
        let slice = self.as_slice();
        slice.get(slice.len().checked_sub(N)?..)?.try_into().ok()
    }

    pub(crate) fn clear(&mut self) {
        self.buf.truncate(self.start);
    }

    /// Deep copy that reports allocation failure instead of aborting.
    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(self.buf.len())?;
        buf.extend_from_slice(&self.buf);
        Ok(Self {
            buf,
            start: self.start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_len_is_zeroed() {
        let chunk = Chunk::with_len(16).unwrap();
        assert_eq!(chunk.len(), 16);
        assert!(chunk.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_prepend_uses_headroom() {
        let mut chunk = Chunk::from_vec(b"world".to_vec());
        chunk.prepend(b"hello ").unwrap();
        assert_eq!(chunk.as_slice(), b"hello world");

        // The rebuild left headroom behind, so this one is in place.
        chunk.prepend(b">").unwrap();
        assert_eq!(chunk.as_slice(), b">hello world");
    }

    #[test]
    fn test_trim_and_chop() {
        let mut chunk = Chunk::from_vec(b"abcdef".to_vec());
        assert_eq!(chunk.trim(2).unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(chunk.chop(2).unwrap(), Bytes::from_static(b"ef"));
        assert_eq!(chunk.as_slice(), b"cd");
        assert!(chunk.trim(3).is_none());
        assert!(chunk.chop(3).is_none());
        assert_eq!(chunk.as_slice(), b"cd");
    }

    #[test]
    fn test_front_back_peek() {
        let chunk = Chunk::from_vec(vec![1, 2, 3, 4, 5]);
        assert_eq!(chunk.front::<2>(), Some([1, 2]));
        assert_eq!(chunk.back::<2>(), Some([4, 5]));
        assert_eq!(chunk.back::<6>(), None);
    }

    #[test]
    fn test_capacity_overflow() {
        assert_eq!(capacity_for(&[8, 8]), Ok(DEFAULT_HEADROOM + 16));
        assert_eq!(capacity_for(&[usize::MAX]), Err(AllocError));
        assert_eq!(capacity_for(&[usize::MAX / 2, usize::MAX / 2]), Err(AllocError));
        assert!(Chunk::with_len(usize::MAX).is_err());
    }

    #[test]
    fn test_resize_and_clear() {
        let mut chunk = Chunk::from_vec(b"abc".to_vec());
        chunk.resize(5).unwrap();
        assert_eq!(chunk.as_slice(), b"abc\0\0");
        chunk.resize(1).unwrap();
        assert_eq!(chunk.as_slice(), b"a");
        chunk.clear();
        assert!(chunk.is_empty());
    }
}
