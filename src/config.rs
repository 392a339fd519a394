//! Translation of high-level state machine parameters into the low-level
//! per-slot configuration record.

use log::debug;

use crate::program::Wrap;
use crate::Error;

// Register field positions of the RP2040-compatible PIO block. CLKDIV is
// 16.8 fixed point; the wrap bounds live in EXECCTRL, the shift counters in
// SHIFTCTRL and the side-set pin mapping in PINCTRL.
const CLKDIV_INT_LSB: u32 = 16;
const CLKDIV_FRAC_LSB: u32 = 8;

const EXECCTRL_SIDE_EN: u32 = 1 << 30;
const EXECCTRL_SIDE_PINDIR: u32 = 1 << 29;
const EXECCTRL_WRAP_TOP_LSB: u32 = 12;
const EXECCTRL_WRAP_BOTTOM_LSB: u32 = 7;
const EXECCTRL_WRAP_MASK: u32 = 0b11111_11111 << EXECCTRL_WRAP_BOTTOM_LSB;

const SHIFTCTRL_PULL_THRESH_LSB: u32 = 25;
const SHIFTCTRL_PULL_THRESH_MASK: u32 = 0b11111 << SHIFTCTRL_PULL_THRESH_LSB;
const SHIFTCTRL_OUT_SHIFTDIR: u32 = 1 << 19;
const SHIFTCTRL_IN_SHIFTDIR: u32 = 1 << 18;
const SHIFTCTRL_AUTOPULL: u32 = 1 << 17;

const PINCTRL_SIDESET_COUNT_LSB: u32 = 29;
const PINCTRL_SIDESET_COUNT_MASK: u32 = 0b111 << PINCTRL_SIDESET_COUNT_LSB;
const PINCTRL_SIDESET_BASE_LSB: u32 = 10;
const PINCTRL_SIDESET_BASE_MASK: u32 = 0b11111 << PINCTRL_SIDESET_BASE_LSB;

/// Clock divider in the hardware's 16.8 fixed-point representation.
///
/// `int == 0` encodes the maximum divider of 65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClkDiv {
    pub int: u16,
    pub frac: u8,
}

impl ClkDiv {
    /// Split a floating-point divider into integer and fractional parts.
    /// Dividers outside [1.0, 65536.0] are not representable.
    pub fn from_divider(div: f64) -> Option<ClkDiv> {
        if !(1.0..=65536.0).contains(&div) {
            return None;
        }
        if div == 65536.0 {
            return Some(ClkDiv { int: 0, frac: 0 });
        }
        let int = div as u16;
        let frac = ((div - f64::from(int)) * 256.0) as u8;
        Some(ClkDiv { int, frac })
    }

    /// The CLKDIV register value.
    pub fn bits(self) -> u32 {
        u32::from(self.int) << CLKDIV_INT_LSB | u32::from(self.frac) << CLKDIV_FRAC_LSB
    }
}

/// A contiguous run of GPIO pins driven synchronously with instruction
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideSet {
    /// First (lowest-numbered) pin of the run.
    pub base: u8,
    /// Number of pins, 1 to 5.
    pub count: u8,
}

/// Per-slot hardware configuration, applied in a single
/// [`sm_init`](crate::PioDriver::sm_init) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmConfig {
    pub clkdiv: u32,
    pub execctrl: u32,
    pub shiftctrl: u32,
    pub pinctrl: u32,
}

impl Default for SmConfig {
    /// The reset configuration: divider 1.0, wrap over the whole
    /// instruction memory, shift right in both directions, thresholds at
    /// 32, no side-set.
    fn default() -> SmConfig {
        let mut config = SmConfig {
            clkdiv: 0,
            execctrl: 0,
            shiftctrl: SHIFTCTRL_OUT_SHIFTDIR | SHIFTCTRL_IN_SHIFTDIR,
            pinctrl: 0,
        };
        config.set_clkdiv(ClkDiv { int: 1, frac: 0 });
        config.set_wrap(Wrap {
            source: 31,
            target: 0,
        });
        config
    }
}

impl SmConfig {
    pub fn set_clkdiv(&mut self, div: ClkDiv) {
        self.clkdiv = div.bits();
    }

    /// After the instruction at `wrap.source`, continue at `wrap.target`.
    pub fn set_wrap(&mut self, wrap: Wrap) {
        self.execctrl = (self.execctrl & !EXECCTRL_WRAP_MASK)
            | u32::from(wrap.source) << EXECCTRL_WRAP_TOP_LSB
            | u32::from(wrap.target) << EXECCTRL_WRAP_BOTTOM_LSB;
    }

    /// Reserve `bits` side-set data bits per instruction. `optional` spends
    /// one of them as the per-instruction enable; `pindirs` drives pin
    /// directions instead of pin values.
    pub fn set_sideset(&mut self, bits: u8, optional: bool, pindirs: bool) {
        self.pinctrl = (self.pinctrl & !PINCTRL_SIDESET_COUNT_MASK)
            | u32::from(bits) << PINCTRL_SIDESET_COUNT_LSB;
        self.execctrl &= !(EXECCTRL_SIDE_EN | EXECCTRL_SIDE_PINDIR);
        if optional {
            self.execctrl |= EXECCTRL_SIDE_EN;
        }
        if pindirs {
            self.execctrl |= EXECCTRL_SIDE_PINDIR;
        }
    }

    pub fn set_sideset_base(&mut self, base: u8) {
        self.pinctrl = (self.pinctrl & !PINCTRL_SIDESET_BASE_MASK)
            | u32::from(base) << PINCTRL_SIDESET_BASE_LSB;
    }

    /// Output shift behavior: direction, automatic refill from the TX FIFO
    /// and the refill threshold in bits (32 encodes as 0).
    pub fn set_out_shift(&mut self, shift_right: bool, auto_pull: bool, threshold: u8) {
        self.shiftctrl = (self.shiftctrl
            & !(SHIFTCTRL_OUT_SHIFTDIR | SHIFTCTRL_AUTOPULL | SHIFTCTRL_PULL_THRESH_MASK))
            | u32::from(threshold & 0b11111) << SHIFTCTRL_PULL_THRESH_LSB;
        if shift_right {
            self.shiftctrl |= SHIFTCTRL_OUT_SHIFTDIR;
        }
        if auto_pull {
            self.shiftctrl |= SHIFTCTRL_AUTOPULL;
        }
    }

    /// Wrap bounds currently programmed into EXECCTRL.
    pub fn wrap(&self) -> Wrap {
        Wrap {
            source: (self.execctrl >> EXECCTRL_WRAP_TOP_LSB) as u8 & 0b11111,
            target: (self.execctrl >> EXECCTRL_WRAP_BOTTOM_LSB) as u8 & 0b11111,
        }
    }
}

/// High-level state machine parameters, translated into an [`SmConfig`]
/// once per construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// State machine clock frequency in Hz.
    pub frequency: f64,
    /// Optional side-set pin range, driven as outputs.
    pub side_set: Option<SideSet>,
    /// Refill the output shift register from the TX FIFO automatically.
    pub auto_pull: bool,
    /// Shift output data right (least significant bit first).
    pub shift_right: bool,
    /// Output shift refill threshold in bits, 1 to 32.
    pub pull_threshold: u8,
}

impl Settings {
    /// Settings for `frequency`, with no side-set, auto-pull off, shift
    /// right and a pull threshold of 32.
    pub fn new(frequency: f64) -> Settings {
        Settings {
            frequency,
            side_set: None,
            auto_pull: false,
            shift_right: true,
            pull_threshold: 32,
        }
    }

    /// Build the configuration record for a program wrapped at `wrap` on a
    /// device clocked at `sys_clock_hz`.
    ///
    /// The divider is `sys_clock_hz / frequency` and must land in
    /// [1.0, 65536.0]; out-of-range dividers are rejected, never clamped.
    pub fn sm_config(&self, wrap: Wrap, sys_clock_hz: f64) -> Result<SmConfig, Error> {
        let divider = sys_clock_hz / self.frequency;
        let clkdiv = ClkDiv::from_divider(divider).ok_or(Error::InvalidFrequency {
            frequency: self.frequency,
            divider,
        })?;
        debug!("frequency {} Hz, divider {}", self.frequency, divider);

        if !(1..=32).contains(&self.pull_threshold) {
            return Err(Error::InvalidPullThreshold {
                threshold: self.pull_threshold,
            });
        }

        let mut config = SmConfig::default();
        config.set_clkdiv(clkdiv);
        config.set_wrap(wrap);
        config.set_out_shift(self.shift_right, self.auto_pull, self.pull_threshold);
        if let Some(side_set) = self.side_set {
            if !(1..=5).contains(&side_set.count) {
                return Err(Error::InvalidSidesetCount {
                    count: side_set.count,
                });
            }
            config.set_sideset(side_set.count, false, false);
            config.set_sideset_base(side_set.base);
        }
        Ok(config)
    }
}

#[test]
fn test_clkdiv_splits() {
    assert_eq!(ClkDiv::from_divider(1.0), Some(ClkDiv { int: 1, frac: 0 }));
    assert_eq!(ClkDiv::from_divider(4.0), Some(ClkDiv { int: 4, frac: 0 }));
    assert_eq!(
        ClkDiv::from_divider(2.5),
        Some(ClkDiv { int: 2, frac: 128 })
    );
    assert_eq!(
        ClkDiv::from_divider(65536.0),
        Some(ClkDiv { int: 0, frac: 0 })
    );
    assert_eq!(ClkDiv::from_divider(0.5), None);
    assert_eq!(ClkDiv::from_divider(65536.5), None);
    assert_eq!(ClkDiv::from_divider(f64::NAN), None);
}

#[test]
fn test_clkdiv_bits() {
    assert_eq!(ClkDiv { int: 1, frac: 0 }.bits(), 0x0001_0000);
    assert_eq!(ClkDiv { int: 4, frac: 0 }.bits(), 0x0004_0000);
    assert_eq!(ClkDiv { int: 2, frac: 128 }.bits(), 0x0002_8000);
}

#[test]
fn test_default_config_is_reset_value() {
    let config = SmConfig::default();
    assert_eq!(config.clkdiv, 0x0001_0000);
    assert_eq!(config.execctrl, 0b11111_00000 << 7);
    assert_eq!(config.shiftctrl, 0b11_0 << 17);
    assert_eq!(config.pinctrl, 0);
}

#[test]
fn test_set_wrap_replaces_old_bounds() {
    let mut config = SmConfig::default();
    config.set_wrap(Wrap {
        source: 31,
        target: 12,
    });
    assert_eq!(
        config.wrap(),
        Wrap {
            source: 31,
            target: 12
        }
    );
    config.set_wrap(Wrap {
        source: 5,
        target: 3,
    });
    assert_eq!(config.execctrl, 0b00101_00011 << 7);
}

#[test]
fn test_out_shift_bits() {
    let mut config = SmConfig::default();
    // Threshold 32 encodes as 0.
    config.set_out_shift(true, true, 32);
    assert_eq!(config.shiftctrl, 0b1_1_1 << 17);
    config.set_out_shift(false, false, 24);
    assert_eq!(config.shiftctrl, 0b11000 << 25 | 1 << 18);
}

#[test]
fn test_sideset_bits() {
    let mut config = SmConfig { clkdiv: 0, execctrl: 0, shiftctrl: 0, pinctrl: 0 };
    config.set_sideset(5, false, false);
    config.set_sideset_base(2);
    assert_eq!(config.pinctrl, 0b101 << 29 | 0b00010 << 10);
    assert_eq!(config.execctrl, 0);
    config.set_sideset(2, true, true);
    assert_eq!(config.pinctrl, 0b010 << 29 | 0b00010 << 10);
    assert_eq!(config.execctrl, EXECCTRL_SIDE_EN | EXECCTRL_SIDE_PINDIR);
}

#[test]
fn test_sm_config_rejects_bad_frequencies() {
    let wrap = Wrap { source: 2, target: 0 };
    for frequency in [0.0, -1.0, 400_000_000.0, 0.001] {
        let err = Settings::new(frequency).sm_config(wrap, 200_000_000.0).unwrap_err();
        assert!(
            matches!(err, Error::InvalidFrequency { .. }),
            "frequency {frequency} gave {err:?}"
        );
    }
}

#[test]
fn test_sm_config_rejects_bad_thresholds() {
    let wrap = Wrap { source: 2, target: 0 };
    for threshold in [0, 33] {
        let settings = Settings {
            pull_threshold: threshold,
            ..Settings::new(1_000_000.0)
        };
        assert_eq!(
            settings.sm_config(wrap, 200_000_000.0).unwrap_err(),
            Error::InvalidPullThreshold { threshold }
        );
    }
}

#[test]
fn test_sm_config_rejects_bad_sideset_counts() {
    let wrap = Wrap { source: 2, target: 0 };
    for count in [0, 6] {
        let settings = Settings {
            side_set: Some(SideSet { base: 0, count }),
            ..Settings::new(1_000_000.0)
        };
        assert_eq!(
            settings.sm_config(wrap, 200_000_000.0).unwrap_err(),
            Error::InvalidSidesetCount { count }
        );
    }
}

#[test]
fn test_sm_config_packs_everything() {
    let settings = Settings {
        auto_pull: true,
        side_set: Some(SideSet { base: 13, count: 1 }),
        ..Settings::new(50_000_000.0)
    };
    let config = settings
        .sm_config(
            Wrap {
                source: 31,
                target: 12,
            },
            200_000_000.0,
        )
        .unwrap();
    assert_eq!(config.clkdiv, 0x0004_0000);
    assert_eq!(config.execctrl, 0b11111_01100 << 7);
    assert_eq!(
        config.shiftctrl,
        SHIFTCTRL_OUT_SHIFTDIR | SHIFTCTRL_IN_SHIFTDIR | SHIFTCTRL_AUTOPULL
    );
    assert_eq!(config.pinctrl, 0b001 << 29 | 0b01101 << 10);
}
