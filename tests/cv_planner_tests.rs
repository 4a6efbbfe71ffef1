//! Planner-level tests for the configuration-variable database.

use dcc_station::cvdb::{self, ChangeSet, CvChange};
use dcc_station::packets;
use dcc_station::ErrorCode;

fn change(set: &ChangeSet<16>, cv: u16) -> CvChange {
    *set.changes()
        .iter()
        .find(|c| c.cv == cv)
        .unwrap_or_else(|| panic!("no change for CV {}", cv))
}

#[test]
fn switching_to_long_address_2000_touches_four_cvs() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("long_address", 2000).unwrap();

    // Exactly four distinct CVs in the plan.
    assert_eq!(set.changes().len(), 4);

    assert_eq!(change(&set, 17).value, 0xC7);
    assert_eq!(change(&set, 18).value, 0xD0);

    // CV29 bit 5 selects the extended address.
    let cv29 = change(&set, 29);
    assert_eq!(cv29.mask, 0b0010_0000);
    assert_eq!(cv29.value, 0b0010_0000);

    // CV1 carries no part of the address but is fully masked by the
    // enabling sequence.
    let cv1 = change(&set, 1);
    assert_eq!(cv1.mask, 0xFF);
}

#[test]
fn switching_back_to_short_address_reverses_the_flag() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("short_address", 42).unwrap();

    let cv29 = change(&set, 29);
    assert_eq!(cv29.mask, 0b0010_0000);
    assert_eq!(cv29.value, 0);
    assert_eq!(change(&set, 1).value, 42);
}

#[test]
fn batches_never_list_a_cv_twice() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("long_address", 421).unwrap();
    set.apply_named("direction", 1).unwrap();
    set.apply_named("consist_address", 7).unwrap();
    set.apply_named("consist_direction", 1).unwrap();

    let mut cvs: Vec<u16> = set.changes().iter().map(|c| c.cv).collect();
    cvs.sort_unstable();
    let before = cvs.len();
    cvs.dedup();
    assert_eq!(before, cvs.len());

    // CV19 holds both consist fields in one change.
    let cv19 = change(&set, 19);
    assert_eq!(cv19.mask, 0xFF);
    assert_eq!(cv19.value, 0x87);
}

#[test]
fn every_change_converts_to_a_service_command() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("long_address", 2000).unwrap();

    for change in set.changes() {
        if change.mask == 0xFF {
            // Whole byte: one write-byte command.
            let pkt = packets::service_write_byte(change.cv, change.value).unwrap();
            assert_eq!(pkt.len(), 4);
        } else {
            // Sparse mask: one write-bit command per set mask bit.
            for bit in 0..8 {
                if change.mask & (1 << bit) != 0 {
                    let value = (change.value >> bit) & 1;
                    let pkt = packets::service_write_bit(change.cv, bit, value).unwrap();
                    assert_eq!(pkt.len(), 4);
                }
            }
        }
    }
}

#[test]
fn combined_values_round_trip_across_the_element_chain() {
    for value in [1u16, 2, 127, 128, 255, 256, 5000, 10239] {
        let mut set: ChangeSet<16> = ChangeSet::new();
        set.apply_named("long_address", value).unwrap();

        let low = change(&set, 18).value as u16;
        let high = (change(&set, 17).value & 0x3F) as u16;
        assert_eq!((high << 8) | low, value, "value {} did not survive", value);
    }
}

#[test]
fn read_only_and_range_violations_leave_the_set_clean() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    assert_eq!(
        set.apply_named("manufacturer_model", 1),
        Err(ErrorCode::InvalidState)
    );
    assert_eq!(
        set.apply_named("consist_address", 128),
        Err(ErrorCode::InvalidWordValue)
    );
    assert_eq!(set.apply_named("absent", 0), Err(ErrorCode::InvalidCvNumber));
    assert!(set.changes().is_empty());
}

#[test]
fn zimo_block_is_addressable() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("z_total_vol", 180).unwrap();
    assert_eq!(change(&set, 266).value, 180);
    assert_eq!(change(&set, 266).mask, 0xFF);
}

#[test]
fn speed_table_slots_map_to_their_cvs() {
    let table = cvdb::find("speed_table").unwrap();
    let mut set: ChangeSet<16> = ChangeSet::new();
    for (slot, value) in [(0usize, 5u16), (13, 128), (27, 255)] {
        set.apply_indexed(table, slot, value).unwrap();
    }
    assert_eq!(change(&set, 67).value, 5);
    assert_eq!(change(&set, 80).value, 128);
    assert_eq!(change(&set, 94).value, 255);
}

#[test]
fn decoder_factory_reset_is_exposed_as_reset8() {
    let mut set: ChangeSet<16> = ChangeSet::new();
    set.apply_named("reset8", 8).unwrap();
    assert_eq!(change(&set, 8).value, 8);

    let mut bad: ChangeSet<16> = ChangeSet::new();
    assert_eq!(bad.apply_named("reset8", 7), Err(ErrorCode::InvalidWordValue));
}
