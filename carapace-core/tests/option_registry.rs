//! Option registry and engine-less behavior

use carapace_core::error::{Error, ErrorKind};
use carapace_core::native::OptionKind;
use carapace_core::options::{Access, OptionName};
use carapace_core::protocol::Protocol;
use carapace_core::socket::Socket;

#[test]
fn test_registry_keys() {
    assert_eq!(OptionName::SendTimeout.key(), "send-timeout");
    assert_eq!(OptionName::ReqResendTime.key(), "req:resend-time");
    assert_eq!(OptionName::SurveyorSurveyTime.key(), "surveyor:survey-time");
    assert_eq!(
        "ipc:permissions".parse::<OptionName>().unwrap(),
        OptionName::IpcPermissions
    );
}

#[test]
fn test_registry_kinds_and_access() {
    assert_eq!(OptionName::RecvTimeout.kind(), OptionKind::Ms);
    assert_eq!(OptionName::RecvSizeMax.kind(), OptionKind::Size);
    assert_eq!(OptionName::TlsConfig.kind(), OptionKind::Ptr);
    assert_eq!(OptionName::LocalAddress.kind(), OptionKind::Addr);

    assert_eq!(OptionName::Raw.access(), Access::ReadOnly);
    assert_eq!(OptionName::SubSubscribe.access(), Access::WriteOnly);
    assert_eq!(OptionName::TtlMax.access(), Access::ReadWrite);
}

#[test]
fn test_every_option_round_trips_by_key() {
    for &name in OptionName::ALL {
        assert_eq!(OptionName::resolve(name.key()).unwrap(), name);
        assert_eq!(name.to_string(), name.key());
    }
}

#[test]
fn test_unknown_key() {
    let err = OptionName::resolve("recv-timeout-ms").unwrap_err();
    assert!(matches!(err, Error::UnknownOption(_)));
    assert_eq!(err.to_string(), "unknown option: recv-timeout-ms");
}

/// Nothing works before an engine is installed.
#[test]
fn test_no_engine() {
    let err = Socket::open(Protocol::Req0).unwrap_err();
    assert!(matches!(err, Error::NoEngine));
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}
