//! End-to-end scenarios over the simulated bus

use sbs_gauge::{
    AccessLevel, BusError, DecodedValue, Error, FamilyA, FamilyB, Gauge, GaugeConfig,
    SbsDevice, Unit,
};

use crate::common::{create_family_a_gauge, create_sbs_device, MockBus, MockFamily, Operation};

#[test]
fn test_voltage_by_name() {
    let (mut device, bus) = create_sbs_device();
    bus.set_frame(0x09, vec![0x34, 0x12]);

    let voltage = device.table().by_name("Voltage").unwrap();
    assert_eq!(
        device.execute(voltage).unwrap(),
        DecodedValue::Word {
            value: 4660,
            unit: Unit::Millivolts
        }
    );
}

#[test]
fn test_device_name_block() {
    let (mut device, bus) = create_sbs_device();
    bus.set_frame(0x21, vec![0x04, 0x41, 0x42, 0x43, 0x44]);

    match device.execute_by_name("DeviceName").unwrap() {
        DecodedValue::Text(block) => {
            assert_eq!(block.as_str(), Some("ABCD"));
            assert_eq!(block.len(), 4);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(device.device_name().unwrap().as_str(), Some("ABCD"));
}

#[test]
fn test_second_key_word_nacked() {
    let (mut gauge, bus) = create_family_a_gauge();
    bus.fail_nth_write(2, BusError::NackData);

    assert_eq!(gauge.unseal(), Err(Error::Bus(BusError::NackData)));
    assert_eq!(gauge.access_level(), AccessLevel::Sealed);
    assert_eq!(gauge.last_error(), Some(BusError::NackData));
    assert_eq!(bus.level(), AccessLevel::Sealed);
    // No verification read after a failed write
    assert_eq!(bus.operations().len(), 2);
}

#[test]
fn test_discover_and_bind() {
    let bus = MockBus::with_family(MockFamily::B);
    bus.set_address(0x16);

    let mut probe = bus.clone();
    let address = sbs_gauge::scan(&mut probe, sbs_gauge::transport::SCAN_RANGE).unwrap();
    assert_eq!(address, 0x16);

    bus.clear_operations();
    let config = GaugeConfig::for_family::<FamilyB>().with_address(address);
    let mut gauge: Gauge<MockBus, FamilyB> = Gauge::new(bus.clone(), config);
    bus.set_word(0x0D, 87);

    assert_eq!(gauge.sbs_mut().relative_state_of_charge().unwrap(), 87);
    assert!(bus.operations().iter().all(|op| match op {
        Operation::Write { address, .. } | Operation::WriteRead { address, .. } => {
            *address == 0x16
        }
    }));
}

#[test]
fn test_service_session_family_a() {
    let (mut gauge, bus) = create_family_a_gauge();
    bus.set_subcommand_word(0x0001, 0x0550);
    bus.set_word(0x51, 0x0000);
    bus.set_word(0x53, 0x0040);

    gauge.unseal().unwrap();
    gauge.full_access().unwrap();

    assert_eq!(gauge.device_type().unwrap(), 0x0550);
    assert!(!gauge.safety_status().unwrap().any());
    assert!(gauge.pf_status().unwrap().flag("DFETF"));

    gauge.clear_permanent_failure().unwrap();
    assert!(!gauge.pf_status().unwrap().any());

    gauge.seal().unwrap();
    assert_eq!(gauge.access_level(), AccessLevel::Sealed);
    assert_eq!(bus.level(), AccessLevel::Sealed);
}

#[test]
fn test_console_walk_over_table() {
    let bus = MockBus::with_family(MockFamily::B);
    bus.set_level(AccessLevel::Unsealed);
    let mut gauge: Gauge<MockBus, FamilyB> = Gauge::with_defaults(bus.clone());
    gauge.sync_access_level().unwrap();

    let table = *gauge.table();
    let mut read = 0;
    for command in table.iter() {
        if matches!(
            command.access,
            sbs_gauge::Access::WriteWord | sbs_gauge::Access::WriteTwoWordSequence(_)
        ) {
            continue;
        }
        gauge.execute(command).unwrap();
        read += 1;
    }
    assert!(read > 40);
    assert_eq!(gauge.access_level(), AccessLevel::Unsealed);
}

#[test]
fn test_plain_driver_on_family_a_gauge() {
    let bus = MockBus::with_family(MockFamily::A);
    let mut device = SbsDevice::new(bus.clone(), 0x0B);
    bus.set_word(0x17, 12);

    assert_eq!(device.cycle_count().unwrap(), 12);
    assert_eq!(device.table().len(), sbs_gauge::sbs::STANDARD_COMMANDS.len());

    let mut gauge: Gauge<MockBus, FamilyA> = Gauge::with_defaults(device.release());
    assert_eq!(gauge.sync_access_level().unwrap(), AccessLevel::Sealed);
}
