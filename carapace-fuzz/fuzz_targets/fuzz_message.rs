#![no_main]

use carapace_core::message::Message;
use libfuzzer_sys::fuzz_target;

// Interpret the input as a sequence of segment operations and check the
// length bookkeeping after each one.
fuzz_target!(|data: &[u8]| {
    let mut msg = Message::new();
    let mut expected = 0usize;

    for chunk in data.chunks(3) {
        let [op, len, fill] = match *chunk {
            [a, b, c] => [a, b, c],
            _ => return,
        };
        let len = usize::from(len);
        let bytes = vec![fill; len];
        let before = msg.len();
        match op % 8 {
            0 => {
                msg.append_body(&bytes).unwrap();
                expected += len;
            }
            1 => {
                msg.prepend_body(&bytes).unwrap();
                expected += len;
            }
            2 => {
                msg.append_header(&bytes).unwrap();
                expected += len;
            }
            3 => {
                msg.prepend_header(&bytes).unwrap();
                expected += len;
            }
            4 => {
                if msg.trim_body(len).is_ok() {
                    expected -= len;
                } else {
                    assert_eq!(msg.len(), before);
                }
            }
            5 => {
                if msg.chop_body(len).is_ok() {
                    expected -= len;
                } else {
                    assert_eq!(msg.len(), before);
                }
            }
            6 => {
                let header = msg.header().len();
                msg.resize(len).unwrap();
                expected = header + len;
            }
            _ => {
                let copy = msg.duplicate().unwrap();
                assert_eq!(copy, msg);
            }
        }
        assert_eq!(msg.len(), expected);
    }
});
