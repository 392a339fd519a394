//! In-memory model of a PIO device.

use std::sync::{Mutex, MutexGuard};

use crate::config::SmConfig;
use crate::driver::{PioDriver, XferDir};
use crate::program::Program;
use crate::{Error, GPIO_COUNT, INSTRUCTION_COUNT, MAX_XFER_BYTES, SM_COUNT};

/// The RP1's system clock in Hz.
const SYS_CLOCK_HZ: f64 = 200_000_000.0;

/// Software model of one PIO device, backing [`PioDriver`] without
/// hardware.
///
/// Slot claims and the instruction arena are explicit bitmaps behind a
/// single allocator lock; applied configurations, initialized pins and
/// transferred words are recorded and can be inspected. One value models
/// one device; share it across state machines with
/// [`StateMachine::on_device`](crate::StateMachine::on_device).
///
/// Resource exhaustion and bad transfer setups surface as [`Error`]s, the
/// way the real driver reports them; out-of-range slot indices are
/// programmer error and panic. RX transfers are not modeled.
#[derive(Debug)]
pub struct SimPio {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    claimed: u8,
    enabled: u8,
    arena: u32,
    configs: [Option<(u8, SmConfig)>; SM_COUNT as usize],
    xfer: [Option<(XferDir, usize)>; SM_COUNT as usize],
    tx: [Vec<u32>; SM_COUNT as usize],
    gpio_order: Vec<u8>,
}

impl SimPio {
    /// Poisoning is ignored: the model stays usable after a caller panic.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_sm(sm: u8) {
        assert!(sm < SM_COUNT, "state machine index {sm} out of range");
    }

    /// Initial program counter and configuration applied to `sm`, if any.
    pub fn sm_config(&self, sm: u8) -> Option<(u8, SmConfig)> {
        Self::check_sm(sm);
        self.lock().configs[sm as usize]
    }

    pub fn is_claimed(&self, sm: u8) -> bool {
        Self::check_sm(sm);
        self.lock().claimed & 1 << sm != 0
    }

    pub fn is_enabled(&self, sm: u8) -> bool {
        Self::check_sm(sm);
        self.lock().enabled & 1 << sm != 0
    }

    /// Bitmap of occupied instruction memory slots.
    pub fn used_instruction_slots(&self) -> u32 {
        self.lock().arena
    }

    /// Pins handed to the PIO block so far, in call order.
    pub fn gpio_init_order(&self) -> Vec<u8> {
        self.lock().gpio_order.clone()
    }

    /// Drain the words transferred into `sm`'s TX FIFO so far.
    pub fn take_tx(&self, sm: u8) -> Vec<u32> {
        Self::check_sm(sm);
        std::mem::take(&mut self.lock().tx[sm as usize])
    }
}

impl PioDriver for SimPio {
    fn open(index: u32) -> Result<SimPio, Error> {
        // One PIO instance, as on the RP1.
        if index != 0 {
            return Err(Error::DeviceUnavailable { index });
        }
        Ok(SimPio {
            state: Mutex::new(State::default()),
        })
    }

    fn sys_clock_hz(&self) -> f64 {
        SYS_CLOCK_HZ
    }

    fn sm_claim_unused(&self) -> Result<u8, Error> {
        let mut state = self.lock();
        for sm in 0..SM_COUNT {
            if state.claimed & 1 << sm == 0 {
                state.claimed |= 1 << sm;
                return Ok(sm);
            }
        }
        Err(Error::NoSlotAvailable)
    }

    fn sm_unclaim(&self, sm: u8) -> Result<(), Error> {
        Self::check_sm(sm);
        let mut state = self.lock();
        state.claimed &= !(1 << sm);
        state.enabled &= !(1 << sm);
        state.configs[sm as usize] = None;
        state.xfer[sm as usize] = None;
        Ok(())
    }

    fn add_program(&self, program: &Program) -> Result<u8, Error> {
        let length = program.len();
        let mask = (1u32 << length) - 1;
        let candidates = match program.origin() {
            Some(origin) => vec![origin],
            // The hardware allocator fills instruction memory from the top.
            None => (0..=INSTRUCTION_COUNT - length).rev().collect(),
        };
        let mut state = self.lock();
        for offset in candidates {
            if u32::from(offset) + u32::from(length) > u32::from(INSTRUCTION_COUNT) {
                continue;
            }
            if state.arena & mask << offset == 0 {
                state.arena |= mask << offset;
                return Ok(offset);
            }
        }
        Err(Error::InsufficientProgramMemory { length })
    }

    fn remove_program(&self, program: &Program, offset: u8) -> Result<(), Error> {
        let length = program.len();
        assert!(
            u32::from(offset) + u32::from(length) <= u32::from(INSTRUCTION_COUNT),
            "program at offset {offset} out of range"
        );
        let mask = ((1u32 << length) - 1) << offset;
        self.lock().arena &= !mask;
        Ok(())
    }

    fn gpio_init(&self, pin: u8) -> Result<(), Error> {
        if pin >= GPIO_COUNT {
            return Err(Error::InvalidPin { pin });
        }
        self.lock().gpio_order.push(pin);
        Ok(())
    }

    fn sm_init(&self, sm: u8, initial_pc: u8, config: &SmConfig) -> Result<(), Error> {
        Self::check_sm(sm);
        assert!(
            initial_pc < INSTRUCTION_COUNT,
            "initial pc {initial_pc} out of range"
        );
        let mut state = self.lock();
        assert!(
            state.claimed & 1 << sm != 0,
            "state machine {sm} is not claimed"
        );
        state.configs[sm as usize] = Some((initial_pc, *config));
        Ok(())
    }

    fn sm_set_enabled(&self, sm: u8, enabled: bool) -> Result<(), Error> {
        Self::check_sm(sm);
        let mut state = self.lock();
        assert!(
            state.claimed & 1 << sm != 0,
            "state machine {sm} is not claimed"
        );
        if enabled {
            state.enabled |= 1 << sm;
        } else {
            state.enabled &= !(1 << sm);
        }
        Ok(())
    }

    fn sm_config_xfer(
        &self,
        sm: u8,
        dir: XferDir,
        buf_size: usize,
        buf_count: u32,
    ) -> Result<(), Error> {
        Self::check_sm(sm);
        let mut state = self.lock();
        assert!(
            state.claimed & 1 << sm != 0,
            "state machine {sm} is not claimed"
        );
        if dir == XferDir::FromSm
            || buf_size == 0
            || buf_size > MAX_XFER_BYTES
            || buf_size % 4 != 0
            || buf_count == 0
        {
            return Err(Error::TransferConfigFailed { sm });
        }
        state.xfer[sm as usize] = Some((dir, buf_size));
        Ok(())
    }

    fn sm_xfer_data(&self, sm: u8, dir: XferDir, words: &[u32]) -> Result<(), Error> {
        Self::check_sm(sm);
        let mut state = self.lock();
        match state.xfer[sm as usize] {
            Some((d, buf_size)) if d == dir && words.len() * 4 == buf_size => {
                state.tx[sm as usize].extend_from_slice(words);
                Ok(())
            }
            _ => Err(Error::TransferFailed { sm }),
        }
    }
}

#[test]
fn test_open_knows_one_device() {
    assert!(SimPio::open(0).is_ok());
    assert_eq!(
        SimPio::open(1).err(),
        Some(Error::DeviceUnavailable { index: 1 })
    );
}

#[test]
fn test_claims_exhaust() {
    let pio = SimPio::open(0).unwrap();
    for sm in 0..SM_COUNT {
        assert_eq!(pio.sm_claim_unused().unwrap(), sm);
    }
    assert_eq!(pio.sm_claim_unused(), Err(Error::NoSlotAvailable));
    pio.sm_unclaim(2).unwrap();
    assert_eq!(pio.sm_claim_unused().unwrap(), 2);
}

#[test]
fn test_programs_load_from_the_top() {
    let pio = SimPio::open(0).unwrap();
    let program = Program::new(vec![0; 20]).unwrap();
    assert_eq!(pio.add_program(&program).unwrap(), 12);
    // 12 slots left below.
    let rest = Program::new(vec![0; 12]).unwrap();
    assert_eq!(pio.add_program(&rest).unwrap(), 0);
    assert_eq!(pio.used_instruction_slots(), u32::MAX);
    assert_eq!(
        pio.add_program(&Program::new(vec![0]).unwrap()),
        Err(Error::InsufficientProgramMemory { length: 1 })
    );
    pio.remove_program(&program, 12).unwrap();
    assert_eq!(pio.used_instruction_slots(), 0x0000_0fff);
}

#[test]
fn test_fixed_origin_is_honored() {
    let pio = SimPio::open(0).unwrap();
    let program = Program::with_origin(vec![0; 4], 8).unwrap();
    assert_eq!(pio.add_program(&program).unwrap(), 8);
    assert_eq!(
        pio.add_program(&program),
        Err(Error::InsufficientProgramMemory { length: 4 })
    );
    let too_high = Program::with_origin(vec![0; 4], 30).unwrap();
    assert_eq!(
        pio.add_program(&too_high),
        Err(Error::InsufficientProgramMemory { length: 4 })
    );
}

#[test]
fn test_gpio_bounds() {
    let pio = SimPio::open(0).unwrap();
    pio.gpio_init(0).unwrap();
    pio.gpio_init(27).unwrap();
    assert_eq!(pio.gpio_init(28), Err(Error::InvalidPin { pin: 28 }));
    assert_eq!(pio.gpio_init_order(), [0, 27]);
}

#[test]
fn test_xfer_requires_matching_setup() {
    let pio = SimPio::open(0).unwrap();
    let sm = pio.sm_claim_unused().unwrap();
    assert_eq!(
        pio.sm_xfer_data(sm, XferDir::ToSm, &[1, 2]),
        Err(Error::TransferFailed { sm })
    );
    assert_eq!(
        pio.sm_config_xfer(sm, XferDir::FromSm, 8, 1),
        Err(Error::TransferConfigFailed { sm })
    );
    pio.sm_config_xfer(sm, XferDir::ToSm, 8, 1).unwrap();
    assert_eq!(
        pio.sm_xfer_data(sm, XferDir::ToSm, &[1, 2, 3]),
        Err(Error::TransferFailed { sm })
    );
    pio.sm_xfer_data(sm, XferDir::ToSm, &[1, 2]).unwrap();
    assert_eq!(pio.take_tx(sm), [1, 2]);
    assert_eq!(pio.take_tx(sm), [0u32; 0]);
}
