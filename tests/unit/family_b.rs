//! Unit tests for Family B extensions (results read from the data block register)

use sbs_gauge::family::family_b::{reg, Subcommand};
use sbs_gauge::{AccessLevel, DecodedValue, Family, FamilyB, KeyPair, ManufacturerCommand, Reply};

use crate::common::{create_family_b_gauge, Operation};

#[test]
fn test_subcommand_result_from_data_block() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(Subcommand::DeviceType as u16, &[0x00, 0x45]);

    assert_eq!(gauge.device_type().unwrap(), 0x4500);
    assert_eq!(
        bus.operations(),
        vec![
            Operation::Write {
                address: 0x0B,
                bytes: vec![0x00, 0x01, 0x00]
            },
            Operation::WriteRead {
                address: 0x0B,
                bytes: vec![0x23],
                len: 3
            },
        ]
    );
}

#[test]
fn test_firmware_version() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(
        0x0002,
        &[0x45, 0x00, 0x01, 0x09, 0x00, 0x22, 0x00, 0x04, 0x02, 0x00, 0x00],
    );

    let version = gauge.firmware_version().unwrap();
    assert_eq!(version.device, 0x4500);
    assert_eq!(version.version, 0x0109);
    assert_eq!(version.build, 0x0022);
    assert_eq!(version.impedance_track, 0x0402);
    assert_eq!(bus.operations()[1], Operation::WriteRead {
        address: 0x0B,
        bytes: vec![0x23],
        len: 12
    });
}

#[test]
fn test_reply_longer_than_capacity_is_truncated() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(Subcommand::HardwareVersion as u16, &[0x11, 0x22, 0x33, 0x44]);

    assert_eq!(gauge.hardware_version().unwrap(), 0x2211);
    match gauge.manufacturer_command(Subcommand::HardwareVersion).unwrap() {
        Reply::Block(block) => assert_eq!(block.as_bytes(), &[0x11, 0x22]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_security_keys_readback() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(
        Subcommand::SecurityKeys as u16,
        &[0x14, 0x04, 0x72, 0x36, 0xFF, 0xFF, 0xFF, 0xFF],
    );

    let keys = gauge.security_keys().unwrap();
    assert_eq!(keys.unseal, KeyPair::new(0x0414, 0x3672));
    assert_eq!(keys.full_access, KeyPair::new(0xFFFF, 0xFFFF));
    assert_eq!(keys.unseal, FamilyB::DEFAULT_KEYS.unseal);
}

#[test]
fn test_da_status1() {
    let (mut gauge, bus) = create_family_b_gauge();
    let mut payload = Vec::new();
    for word in [
        3700u16, 3701, 3702, 3703, 14806, 14790, 0xFF9C, 0xFF9C, 0xFF9C, 0xFF9C, 0xFFDB,
        0xFFDB, 0xFFDB, 0xFFDB, 0xFF6A, 0xFF70,
    ] {
        payload.extend_from_slice(&word.to_le_bytes());
    }
    bus.set_subcommand_block(Subcommand::DaStatus1 as u16, &payload);

    let status = gauge.da_status1().unwrap();
    assert_eq!(status.cell_voltages, [3700, 3701, 3702, 3703]);
    assert_eq!(status.battery_voltage, 14806);
    assert_eq!(status.pack_voltage, 14790);
    assert_eq!(status.cell_currents, [-100; 4]);
    assert_eq!(status.cell_powers, [-37; 4]);
    assert_eq!(status.power, -150);
    assert_eq!(status.average_power, -144);
}

#[test]
fn test_da_status1_short_reply() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(Subcommand::DaStatus1 as u16, &[0x74, 0x0E, 0x75, 0x0E]);

    let status = gauge.da_status1().unwrap();
    assert_eq!(status.cell_voltages, [3700, 3701, 0, 0]);
    assert_eq!(status.power, 0);
}

#[test]
fn test_32_bit_status_words() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(0x0050, &[0x01, 0x00, 0x00, 0x00]);
    bus.set_subcommand_block(0x0051, &[0x00, 0x00, 0x00, 0x08]);
    bus.set_subcommand_block(0x0052, &[0x00, 0x00, 0x01, 0x00]);
    bus.set_subcommand_block(0x0053, &[0x00, 0x00, 0x00, 0x80]);
    bus.set_subcommand_block(0x0055, &[0x00, 0x00, 0x01]);
    bus.set_subcommand_block(0x0056, &[0x00, 0x00, 0x02]);
    bus.set_subcommand_block(0x0057, &[0x08, 0x00]);

    assert!(gauge.safety_alert().unwrap().active().eq(["CUV"]));
    assert!(gauge.safety_status().unwrap().active().eq(["UTD"]));
    assert!(gauge.pf_alert().unwrap().flag("CFETF"));
    assert!(gauge.pf_status().unwrap().flag("TS4"));
    assert!(gauge.charging_status().unwrap().flag("CCR"));
    assert!(gauge.gauging_status().unwrap().flag("QMAX"));
    assert!(gauge.manufacturing_status().unwrap().flag("GAUGE_EN"));
}

#[test]
fn test_operation_status_seal_field() {
    let (mut gauge, bus) = create_family_b_gauge();

    let status = gauge.operation_status().unwrap();
    assert_eq!(status.uint("SEC"), Some(3));
    assert!(status.flag("PRES"));

    bus.set_level(AccessLevel::Unsealed);
    assert_eq!(gauge.operation_status().unwrap().uint("SEC"), Some(2));
    assert_eq!(gauge.read_access_level().unwrap(), AccessLevel::Unsealed);
}

#[test]
fn test_actions() {
    let (mut gauge, bus) = create_family_b_gauge();

    gauge.toggle_fet_control().unwrap();
    gauge.device_reset().unwrap();

    assert_eq!(bus.written_words(0x00), vec![0x0022, 0x0041]);
    assert_eq!(bus.operations().len(), 2);
}

#[test]
fn test_chem_id_and_state_of_health() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(Subcommand::ChemId as u16, &[0x54, 0x12]);
    bus.set_word(reg::STATE_OF_HEALTH, 0x0062);

    assert_eq!(gauge.chem_id().unwrap(), 0x1254);
    assert_eq!(gauge.state_of_health().unwrap(), 98);
}

#[test]
fn test_execute_status_through_table() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(0x0053, &[0x01, 0x00, 0x00, 0x00]);

    match gauge.execute_by_name("PFStatus").unwrap() {
        DecodedValue::Bitfield(bits) => {
            assert_eq!(bits.raw(), 1);
            assert!(bits.flag("SUV"));
        }
        other => panic!("unexpected {other:?}"),
    }

    match gauge.execute_by_name("FirmwareVersion").unwrap() {
        DecodedValue::Bytes(block) => assert!(block.is_empty()),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_permanent_failure_clear_resets_status() {
    let (mut gauge, bus) = create_family_b_gauge();
    bus.set_subcommand_block(0x0053, &[0x00, 0x00, 0x00, 0x80]);

    assert!(gauge.pf_status().unwrap().any());
    gauge.clear_permanent_failure().unwrap();
    assert!(!gauge.pf_status().unwrap().any());
    assert_eq!(bus.pf_clears(), 1);
}

#[test]
fn test_seal_code_differs_from_family_a() {
    assert_eq!(FamilyB::SEAL.code(), 0x0030);
    assert_eq!(<sbs_gauge::FamilyA as Family>::SEAL.code(), 0x0020);
}
