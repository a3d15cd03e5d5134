//! Status mapping with the loopback engine supplying descriptions

use carapace::error::{classify, describe, raise_if_error};
use carapace::prelude::*;

fn setup() {
    carapace::init().unwrap();
    carapace::dev_tracing::init_tracing();
}

/// Every failure code the engine defines, plus one of each wrapped range.
fn failure_codes() -> Vec<Status> {
    let mut codes: Vec<Status> = (1..=31).map(Status::from_raw).collect();
    codes.push(Status::INTERNAL);
    codes.push(Status::system(2));
    codes.push(Status::transport(7));
    codes
}

#[test]
fn test_every_failure_raises() {
    setup();
    for code in failure_codes() {
        let err = raise_if_error(code, "Socket::dial").unwrap_err();
        let description = describe(code);

        assert_eq!(err.kind(), classify(code), "code {}", code.raw());
        assert_eq!(err.status(), Some(code));
        assert!(!description.is_empty(), "code {} has no text", code.raw());
        let text = err.to_string();
        assert!(text.starts_with("Socket::dial"), "{text}");
        assert!(text.contains(description.as_ref()), "{text}");
    }
}

#[test]
fn test_engine_text_is_used() {
    setup();
    assert_eq!(describe(Status::TIMED_OUT), "Timed out");
    let err = raise_if_error(Status::CLOSED, "Aio::wait").unwrap_err();
    assert_eq!(err.to_string(), "Aio::wait: Object closed");

    assert_eq!(describe(Status::transport(7)), "Transport error");
    assert_eq!(classify(Status::transport(7)), ErrorKind::Transport);
}

#[test]
fn test_system_text_comes_from_os() {
    setup();
    let code = Status::system(2);
    let os_text = std::io::Error::from_raw_os_error(2).to_string();
    assert_eq!(describe(code), os_text);
    assert_eq!(classify(code), ErrorKind::System);
    assert_eq!(code.system_errno(), Some(2));
}

/// Codes the engine has no text for fall back to the kind's static text.
#[test]
fn test_undescribed_code_falls_back() {
    setup();
    let code = Status::from_raw(500);
    assert!(describe(code).is_empty());
    assert_eq!(classify(code), ErrorKind::Internal);

    let err = raise_if_error(code, "Socket::close").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(
        err.to_string(),
        format!("Socket::close: {}", ErrorKind::Internal.as_str())
    );
}

#[test]
fn test_success_is_ok() {
    setup();
    assert!(raise_if_error(Status::SUCCESS, "Socket::open").is_ok());
}
