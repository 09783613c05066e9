//! Unit tests for error handling and recovery

use sbs_gauge::transport::bus_status_code;
use sbs_gauge::{
    BusError, Error, Family, FamilyA, FamilyB, ProtocolError, Reply, SbsDevice,
};

use crate::common::{create_family_a_gauge, create_family_b_gauge, create_sbs_device};

#[test]
fn test_read_failure_basic() {
    let (mut device, bus) = create_sbs_device();
    bus.fail_next_read(BusError::Timeout);

    assert_eq!(device.voltage(), Err(Error::Bus(BusError::Timeout)));
    assert_eq!(device.last_error(), Some(BusError::Timeout));
}

#[test]
fn test_read_failure_recovery() {
    let (mut device, bus) = create_sbs_device();
    bus.set_word(0x09, 12_345);

    bus.fail_next_read(BusError::Other);
    assert!(device.voltage().is_err());
    assert_eq!(device.last_error(), Some(BusError::Other));

    // Next transaction succeeds and clears the recorded error
    assert_eq!(device.voltage().unwrap(), 12_345);
    assert_eq!(device.last_error(), None);
}

#[test]
fn test_write_failure_passed_through() {
    let (mut device, bus) = create_sbs_device();
    bus.fail_next_write(BusError::NackData);

    assert_eq!(
        device.set_at_rate(100),
        Err(Error::Bus(BusError::NackData))
    );
    assert_eq!(device.last_error(), Some(BusError::NackData));
    assert_eq!(device.at_rate().unwrap(), 0);
}

#[test]
fn test_errors_are_not_retried() {
    let (mut device, bus) = create_sbs_device();
    bus.fail_next_read(BusError::Timeout);

    assert!(device.temperature().is_err());
    assert_eq!(bus.operations().len(), 1);
}

#[test]
fn test_wrong_address_is_nack_address() {
    let (mut device, bus) = create_sbs_device();
    bus.set_address(0x0C);

    assert_eq!(
        device.device_name(),
        Err(Error::Bus(BusError::NackAddress))
    );
    assert_eq!(bus_status_code(device.last_error()), 2);
}

#[test]
fn test_status_codes() {
    assert_eq!(bus_status_code(None), 0);
    assert_eq!(BusError::DataTooLong.code(), 1);
    assert_eq!(BusError::NackAddress.code(), 2);
    assert_eq!(BusError::NackData.code(), 3);
    assert_eq!(BusError::Other.code(), 4);
    assert_eq!(BusError::Timeout.code(), 5);
}

#[test]
fn test_error_display() {
    assert_eq!(
        Error::Bus(BusError::NackAddress).to_string(),
        "bus: address not acknowledged"
    );
    assert_eq!(
        Error::from(ProtocolError::NotFound).to_string(),
        "protocol: command not found"
    );
}

#[test]
fn test_unknown_name_touches_nothing() {
    let (mut gauge, bus) = create_family_a_gauge();

    assert_eq!(
        gauge.execute_by_name("NoSuchCommand"),
        Err(Error::Protocol(ProtocolError::NotFound))
    );
    assert!(bus.operations().is_empty());
}

#[test]
fn test_base_driver_cannot_run_key_sequences() {
    let (mut device, bus) = create_sbs_device();
    let unseal = FamilyA::table().by_name("Unseal").unwrap();

    assert_eq!(
        device.execute(unseal),
        Err(Error::Protocol(ProtocolError::Unsupported))
    );
    assert!(bus.operations().is_empty());
}

#[test]
fn test_base_driver_runs_family_commands_without_level_tracking() {
    let (mut device, bus) = create_sbs_device();
    let table = FamilyB::table();
    let mut extended = SbsDevice::with_table(bus.clone(), 0x0B, table);

    assert!(device.execute_by_name("SafetyStatus").is_err());
    assert!(extended.execute_by_name("SafetyStatus").is_ok());
}

#[test]
fn test_reply_shape_mismatch() {
    assert_eq!(
        Reply::Done.into_word(),
        Err(Error::Protocol(ProtocolError::Unsupported))
    );
    assert_eq!(
        Reply::Word(7).into_block(),
        Err(Error::Protocol(ProtocolError::Unsupported))
    );
}

#[test]
fn test_failure_between_write_and_read() {
    let (mut gauge, bus) = create_family_a_gauge();
    bus.fail_next_read(BusError::Timeout);

    assert_eq!(gauge.device_type(), Err(Error::Bus(BusError::Timeout)));
    assert_eq!(gauge.last_error(), Some(BusError::Timeout));
    assert_eq!(bus.written_words(0x00), vec![0x0001]);
}

#[test]
fn test_sealed_extended_zeros_are_implausible() {
    let (mut gauge, _bus) = create_family_b_gauge();
    let safety = FamilyB::table().by_name("SafetyStatus").unwrap();

    assert_eq!(
        gauge.execute_checked(safety),
        Err(Error::Protocol(ProtocolError::ImplausibleData))
    );
    // Unchecked execution returns the zeros as read
    assert!(gauge.execute(safety).is_ok());
}

#[test]
fn test_rebind_clears_last_error() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_address(0x0C);

    assert!(gauge.device_type().is_err());
    assert_eq!(gauge.last_error(), Some(BusError::NackAddress));

    gauge.rebind(0x0C);
    assert_eq!(gauge.last_error(), None);
    assert!(gauge.device_type().is_ok());
}
