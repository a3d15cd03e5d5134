#![no_main]

use carapace_core::address::{Address, SockAddr, MAX_ADDRESS_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(address) = Address::parse(text) else {
        return;
    };

    // Accepted addresses are bounded and survive a display/parse cycle.
    assert!(text.len() < MAX_ADDRESS_LEN);
    let shown = address.to_string();
    if let Ok(again) = Address::parse(&shown) {
        assert_eq!(again, address);
    }
    let _ = SockAddr::from(&address);
});
