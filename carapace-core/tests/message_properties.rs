//! Property tests for message segment manipulation

use carapace_core::message::Message;
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_with_size_is_zeroed(size in 0usize..4096) {
        let msg = Message::with_size(size).unwrap();
        prop_assert_eq!(msg.body().len(), size);
        prop_assert!(msg.header().is_empty());
        prop_assert!(msg.body().iter().all(|b| *b == 0));
        prop_assert_eq!(msg.len(), size);
    }

    #[test]
    fn prop_append_then_chop(base in proptest::collection::vec(any::<u8>(), 0..256), value: u32) {
        let mut msg = Message::from(base.clone());
        msg.append_body_u32(value).unwrap();
        prop_assert_eq!(msg.body().len(), base.len() + 4);
        prop_assert_eq!(msg.chop_body_u32().unwrap(), value);
        prop_assert_eq!(msg.body(), base.as_slice());
    }

    #[test]
    fn prop_append_then_chop_bytes(
        base in proptest::collection::vec(any::<u8>(), 0..128),
        data in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut msg = Message::from(base.clone());
        msg.append_body(&data).unwrap();
        let chop_body = msg.chop_body(data.len()).unwrap();
        prop_assert_eq!(chop_body.as_ref(), data.as_slice());
        prop_assert_eq!(msg.body(), base.as_slice());

        msg.append_header(&base).unwrap();
        msg.append_header(&data).unwrap();
        let chop_header = msg.chop_header(data.len()).unwrap();
        prop_assert_eq!(chop_header.as_ref(), data.as_slice());
        prop_assert_eq!(msg.header(), base.as_slice());
    }

    /// Prepends past the spare headroom still come back out intact.
    #[test]
    fn prop_prepend_then_trim_bytes(
        base in proptest::collection::vec(any::<u8>(), 0..128),
        data in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut msg = Message::from(base.clone());
        msg.prepend_body(&data).unwrap();
        let trim_body = msg.trim_body(data.len()).unwrap();
        prop_assert_eq!(trim_body.as_ref(), data.as_slice());
        prop_assert_eq!(msg.body(), base.as_slice());

        msg.prepend_header(&data).unwrap();
        prop_assert_eq!(msg.header().len(), data.len());
        let trim_header = msg.trim_header(data.len()).unwrap();
        prop_assert_eq!(trim_header.as_ref(), data.as_slice());
        prop_assert!(msg.header().is_empty());
    }

    #[test]
    fn prop_prepend_then_trim(base in proptest::collection::vec(any::<u8>(), 0..256), value: u64) {
        let mut msg = Message::new();
        msg.append_header(&base).unwrap();
        msg.prepend_header_u64(value).unwrap();
        prop_assert_eq!(msg.trim_header_u64().unwrap(), value);
        prop_assert_eq!(msg.header(), base.as_slice());
        prop_assert!(msg.body().is_empty());
    }

    /// Resizing keeps the common prefix and zero-fills growth.
    #[test]
    fn prop_resize_keeps_prefix(
        base in proptest::collection::vec(any::<u8>(), 0..256),
        size in 0usize..512,
    ) {
        let mut msg = Message::from(base.clone());
        msg.resize(size).unwrap();
        prop_assert_eq!(msg.body().len(), size);
        let common = size.min(base.len());
        prop_assert_eq!(&msg.body()[..common], &base[..common]);
        prop_assert!(msg.body()[common..].iter().all(|b| *b == 0));
    }

    /// A duplicate shares no storage with the original.
    #[test]
    fn prop_duplicate_is_independent(base in proptest::collection::vec(any::<u8>(), 1..128)) {
        let original = Message::from(base.clone());
        let mut copy = original.duplicate().unwrap();
        prop_assert_eq!(&copy, &original);
        copy.body_mut()[0] ^= 0xff;
        prop_assert_eq!(original.body(), base.as_slice());
        prop_assert_ne!(copy.body()[0], base[0]);
    }
}

#[test]
fn test_big_endian_encoding() {
    let mut msg = Message::new();
    msg.append_body_u16(0x0102).unwrap();
    msg.append_body_u32(0x0304_0506).unwrap();
    assert_eq!(msg.body(), &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_short_segment_errors() {
    let mut msg = Message::from(&b"abc"[..]);
    assert!(msg.chop_body_u32().is_err());
    assert!(msg.trim_header(1).is_err());
    assert_eq!(msg.body(), b"abc");
}

#[test]
fn test_contiguous_bytes() {
    let mut msg = Message::from("body");
    msg.append_header(b"hd").unwrap();
    assert_eq!(msg.to_bytes().as_ref(), b"hdbody");
    msg.clear();
    assert!(msg.is_empty());
}
