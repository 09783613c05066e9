//! Unit tests for the register bit layouts of all drivers

use sbs_gauge::family::{family_a, family_b};
use sbs_gauge::sbs::{self, STANDARD_TABLE};
use sbs_gauge::{decode_bitfield, Decode, Family, FamilyA, FamilyB, FieldValue, Layout};

fn all_layouts() -> Vec<&'static Layout> {
    let mut layouts: Vec<&'static Layout> = vec![
        &sbs::BATTERY_MODE,
        &sbs::BATTERY_STATUS,
        &sbs::SPECIFICATION_INFO,
        &sbs::MANUFACTURE_DATE,
        &family_a::SAFETY_ALERT,
        &family_a::SAFETY_STATUS,
        &family_a::PF_ALERT,
        &family_a::PF_STATUS,
        &family_a::OPERATION_STATUS,
        &family_a::CHARGING_STATUS,
        &family_a::FET_CONTROL,
        &family_a::MANUFACTURER_STATUS,
        &family_b::SAFETY_ALERT,
        &family_b::SAFETY_STATUS,
        &family_b::PF_ALERT,
        &family_b::PF_STATUS,
        &family_b::OPERATION_STATUS,
        &family_b::CHARGING_STATUS,
        &family_b::GAUGING_STATUS,
        &family_b::MANUFACTURING_STATUS,
    ];

    // Anything a command table decodes through must be covered as well
    for table in [STANDARD_TABLE, FamilyA::table(), FamilyB::table()] {
        for command in table.iter() {
            if let Decode::Bits(layout) = command.decode {
                if !layouts.iter().any(|known| std::ptr::eq(*known, layout)) {
                    layouts.push(layout);
                }
            }
        }
    }
    layouts
}

#[test]
fn test_layouts_well_formed() {
    for layout in all_layouts() {
        assert!(layout.is_well_formed(), "{} is malformed", layout.name);
    }
}

#[test]
fn test_single_bit_sets_only_owning_field() {
    for layout in all_layouts() {
        for k in 0..layout.width.bits() {
            let value = decode_bitfield(1 << k, layout);
            let owner = layout.field_at(k);

            for (field, decoded) in value.fields() {
                let expected = owner.is_some_and(|o| o.name == field.name);
                assert_eq!(
                    decoded.is_nonzero(),
                    expected,
                    "{}: bit {} vs field {}",
                    layout.name,
                    k,
                    field.name
                );
            }

            match owner {
                Some(_) => assert!(value.any()),
                None => {
                    assert!(!value.any(), "{}: reserved bit {} decoded", layout.name, k);
                    assert_eq!(value.reserved_bits(), 1 << k);
                }
            }
        }
    }
}

#[test]
fn test_family_a_status_is_16_bit() {
    let value = decode_bitfield(0x0001_8000, &family_a::SAFETY_STATUS);
    assert_eq!(value.raw(), 0x8000);
    assert!(value.flag("OTD"));
    assert!(value.active().eq(["OTD"]));
}

#[test]
fn test_family_b_status_uses_upper_half() {
    let value = decode_bitfield(0x8000_0000 | 1 << 25, &family_b::PF_STATUS);
    assert!(value.flag("TS4"));
    assert!(value.flag("OPNCELL"));
    assert!(!value.flag("SUV"));
    assert_eq!(value.active().count(), 2);
}

#[test]
fn test_enum_field_labels() {
    let status = decode_bitfield(0x0004, &sbs::BATTERY_STATUS);
    assert_eq!(
        status.get("ERROR_CODE"),
        Some(FieldValue::Enum {
            value: 4,
            label: Some("AccessDenied")
        })
    );

    let op = decode_bitfield(0x0000_0300, &family_b::OPERATION_STATUS);
    assert_eq!(
        op.get("SEC"),
        Some(FieldValue::Enum {
            value: 3,
            label: Some("Sealed")
        })
    );
}

#[test]
fn test_reserved_bits_round_trip_through_write_back() {
    let fet = decode_bitfield(0xFFE1, &family_a::FET_CONTROL);
    let updated = fet.with("CHG", 1).expect("CHG exists");
    assert_eq!(updated.raw(), 0xFFE5);
    assert_eq!(updated.reserved_bits(), fet.reserved_bits());
}
