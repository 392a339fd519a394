// PIO instr grouping is 3/5/3/5
#![allow(clippy::unusual_byte_groupings)]

#[macro_use]
extern crate pretty_assertions;

use std::rc::Rc;

use rp1_pio::{Error, PioDriver, Program, Settings, SideSet, SimPio, StateMachine, Wrap};

// Repeatedly get one word of data from the TX FIFO, stalling when the FIFO
// is empty, and write the least significant bit to the OUT pin group.
const HELLO: [u16; 3] = [
    0b100_00000_101_00000, // PULL
    0b011_00000_000_00001, // OUT PINS, 1
    0b000_00000_000_00000, // JMP 0
];

fn device() -> Rc<SimPio> {
    Rc::new(SimPio::open(0).unwrap())
}

fn hello_program() -> Program {
    Program::new(HELLO.to_vec()).unwrap()
}

#[test]
fn test_construction_claims_loads_and_enables() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
        .unwrap();
    assert_eq!(sm.slot(), 0);
    assert_eq!(sm.offset(), 29);
    assert!(dev.is_claimed(0));
    assert!(dev.is_enabled(0));
    assert_eq!(dev.used_instruction_slots(), 0b111 << 29);

    let (pc, config) = dev.sm_config(0).unwrap();
    assert_eq!(pc, 29);
    assert_eq!(
        config.wrap(),
        Wrap {
            source: 31,
            target: 29
        }
    );
}

#[test]
fn test_divider_and_wrap_for_a_twenty_word_program() {
    let dev = device();
    let settings = Settings {
        auto_pull: true,
        ..Settings::new(50_000_000.0) // sys clock / 4
    };
    let sm =
        StateMachine::on_device(Rc::clone(&dev), Program::new(vec![0; 20]).unwrap(), &settings)
            .unwrap();
    assert_eq!(sm.offset(), 12);
    assert_eq!(
        sm.wrap(),
        Wrap {
            source: 31,
            target: 12
        }
    );

    let (pc, config) = dev.sm_config(sm.slot()).unwrap();
    assert_eq!(pc, 12);
    assert_eq!(config.clkdiv, 0x0004_0000);
    assert_eq!(
        config.wrap(),
        Wrap {
            source: 31,
            target: 12
        }
    );
}

#[test]
fn test_write_replicates_bytes_across_lanes() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(800_000.0))
        .unwrap();
    sm.write(&[0x00u8, 0x01, 0x02, 0xff][..]).unwrap();
    let words = dev.take_tx(sm.slot());
    assert_eq!(words, [0x00000000, 0x01010101, 0x02020202, 0xffffffff]);
    assert_eq!(words.len() * 4, 16);
}

#[test]
fn test_write_half_words_and_words() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(800_000.0))
        .unwrap();
    sm.write(&[0x1234u16, 0x0000][..]).unwrap();
    assert_eq!(dev.take_tx(sm.slot()), [0x12341234, 0x00000000]);
    sm.write(&[0xcafef00du32][..]).unwrap();
    assert_eq!(dev.take_tx(sm.slot()), [0xcafef00d]);
}

#[test]
fn test_empty_write_is_a_no_op() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(800_000.0))
        .unwrap();
    sm.write(&[0u8; 0][..]).unwrap();
    assert_eq!(dev.take_tx(sm.slot()), [0u32; 0]);
}

#[test]
fn test_release_is_idempotent() {
    let dev = device();
    let mut sm =
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
            .unwrap();
    let slot = sm.slot();
    sm.release();
    assert!(sm.is_released());
    assert!(!dev.is_claimed(slot));
    assert!(!dev.is_enabled(slot));
    assert_eq!(dev.used_instruction_slots(), 0);

    // A second release and the drop that follows must not free anything
    // twice. Claim the slot again in between to prove they would.
    let other =
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
            .unwrap();
    assert_eq!(other.slot(), slot);
    sm.release();
    drop(sm);
    assert!(dev.is_claimed(slot));
    assert_eq!(dev.used_instruction_slots(), 0b111 << 29);
}

#[test]
fn test_drop_releases() {
    let dev = device();
    {
        let _sm = StateMachine::on_device(
            Rc::clone(&dev),
            hello_program(),
            &Settings::new(1_000_000.0),
        )
        .unwrap();
        assert!(dev.is_claimed(0));
    }
    assert!(!dev.is_claimed(0));
    assert_eq!(dev.used_instruction_slots(), 0);
}

#[test]
fn test_write_after_release_fails() {
    let dev = device();
    let mut sm =
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
            .unwrap();
    sm.release();
    assert_eq!(sm.write(&[1u32][..]), Err(Error::Released));
    assert_eq!(dev.take_tx(0), [0u32; 0]);
}

#[test]
fn test_slot_exhaustion_leaves_no_leaks() {
    let dev = device();
    let mut machines = Vec::new();
    for _ in 0..4 {
        machines.push(
            StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
                .unwrap(),
        );
    }
    let before = Rc::strong_count(&dev);
    let err =
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(1_000_000.0))
            .unwrap_err();
    assert_eq!(err, Error::NoSlotAvailable);
    // The failed construction dropped its device handle again.
    assert_eq!(Rc::strong_count(&dev), before);
    // And left the other machines' programs alone.
    assert_eq!(dev.used_instruction_slots().count_ones(), 12);

    drop(machines);
    assert_eq!(Rc::strong_count(&dev), 1);
    assert_eq!(dev.used_instruction_slots(), 0);
}

#[test]
fn test_program_memory_exhaustion_unclaims_the_slot() {
    let dev = device();
    let big =
        StateMachine::on_device(Rc::clone(&dev), Program::new(vec![0; 31]).unwrap(), &Settings::new(1_000_000.0))
            .unwrap();
    assert_eq!(big.offset(), 1);
    let err = StateMachine::on_device(
        Rc::clone(&dev),
        Program::new(vec![0; 2]).unwrap(),
        &Settings::new(1_000_000.0),
    )
    .unwrap_err();
    assert_eq!(err, Error::InsufficientProgramMemory { length: 2 });
    // The slot claimed for the failed construction was returned.
    assert!(dev.is_claimed(big.slot()));
    assert!(!dev.is_claimed(1));
    // A one-word program still fits in the remaining slot.
    let small = StateMachine::on_device(
        Rc::clone(&dev),
        Program::new(vec![0]).unwrap(),
        &Settings::new(1_000_000.0),
    )
    .unwrap();
    assert_eq!(small.offset(), 0);
}

#[test]
fn test_config_failure_rolls_back_slot_and_program() {
    let dev = device();
    let err =
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(0.0)).unwrap_err();
    assert!(matches!(err, Error::InvalidFrequency { .. }));
    assert!(!dev.is_claimed(0));
    assert_eq!(dev.used_instruction_slots(), 0);
    assert_eq!(dev.sm_config(0), None);
}

#[test]
fn test_sideset_pins_initialize_ascending() {
    let dev = device();
    let settings = Settings {
        side_set: Some(SideSet { base: 18, count: 5 }),
        ..Settings::new(1_000_000.0)
    };
    let _sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap();
    assert_eq!(dev.gpio_init_order(), [18, 19, 20, 21, 22]);
}

#[test]
fn test_sideset_count_bounds() {
    let dev = device();
    for count in [0, 6] {
        let settings = Settings {
            side_set: Some(SideSet { base: 2, count }),
            ..Settings::new(1_000_000.0)
        };
        let err =
            StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap_err();
        assert_eq!(err, Error::InvalidSidesetCount { count });
        assert!(!dev.is_claimed(0));
        assert_eq!(dev.used_instruction_slots(), 0);
    }
    for count in [1, 5] {
        let settings = Settings {
            side_set: Some(SideSet { base: 2, count }),
            ..Settings::new(1_000_000.0)
        };
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap();
    }
}

#[test]
fn test_sideset_pin_out_of_range_rolls_back() {
    let dev = device();
    let settings = Settings {
        side_set: Some(SideSet { base: 26, count: 3 }),
        ..Settings::new(1_000_000.0)
    };
    let err = StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap_err();
    assert_eq!(err, Error::InvalidPin { pin: 28 });
    assert_eq!(dev.gpio_init_order(), [26, 27]);
    assert!(!dev.is_claimed(0));
    assert_eq!(dev.used_instruction_slots(), 0);
}

#[test]
fn test_pull_threshold_bounds() {
    let dev = device();
    for threshold in [0, 33] {
        let settings = Settings {
            pull_threshold: threshold,
            ..Settings::new(1_000_000.0)
        };
        let err =
            StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap_err();
        assert_eq!(err, Error::InvalidPullThreshold { threshold });
    }
    for threshold in [1, 32] {
        let settings = Settings {
            pull_threshold: threshold,
            ..Settings::new(1_000_000.0)
        };
        StateMachine::on_device(Rc::clone(&dev), hello_program(), &settings).unwrap();
    }
}

#[test]
fn test_oversized_write_fails_but_machine_stays_usable() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(800_000.0))
        .unwrap();
    let huge = vec![0u32; 16384];
    assert_eq!(
        sm.write(&huge[..]),
        Err(Error::BufferTooLarge {
            bytes: 65536,
            max: 0xffff
        })
    );
    sm.write(&[0x55u8][..]).unwrap();
    assert_eq!(dev.take_tx(sm.slot()), [0x55555555]);
}

#[test]
fn test_wrap_stays_fixed_for_the_machine_lifetime() {
    let dev = device();
    let sm = StateMachine::on_device(Rc::clone(&dev), hello_program(), &Settings::new(800_000.0))
        .unwrap();
    let wrap = sm.wrap();
    sm.write(&[1u32, 2][..]).unwrap();
    assert_eq!(sm.wrap(), wrap);
    assert_eq!(sm.offset(), wrap.target);
    assert_eq!(sm.program().len(), 3);
}

#[test]
fn test_new_opens_device_zero() {
    let sm = StateMachine::<SimPio>::new(hello_program(), &Settings::new(1_000_000.0)).unwrap();
    assert_eq!(sm.slot(), 0);
}
