//! Drive the state machines of an RP1 PIO coprocessor.
//!
//! ```rust
//! // Repeatedly get one word of data from the TX FIFO, stalling when
//! // the FIFO is empty. Write the least significant bit to the OUT pin
//! // group.
//! // https://github.com/raspberrypi/pico-examples/tree/master/pio/hello_pio/hello.pio
//! let program = rp1_pio::Program::new(vec![
//!     0b100_00000_101_00000, // PULL
//!     0b011_00000_000_00001, // OUT PINS, 1
//!     0b000_00000_000_00000, // JMP 0
//! ])
//! .unwrap();
//!
//! let settings = rp1_pio::Settings::new(1_000_000.0);
//! let mut sm = rp1_pio::StateMachine::<rp1_pio::SimPio>::new(program, &settings).unwrap();
//! sm.write(&[0xABu8, 0xCD][..]).unwrap();
//! sm.release();
//! ```
//!
//! A [`StateMachine`] claims one of the device's execution slots, loads its
//! program into the shared instruction memory arena and runs it at its own
//! clock divider. [`StateMachine::write`] normalizes application buffers of
//! 1-, 2- or 4-byte elements into the 32-bit words the FIFO expects and
//! hands them to the driver's DMA path.
//!
//! The underlying device driver is reached through the [`PioDriver`] trait;
//! [`SimPio`] backs it with an in-memory model so everything here runs on
//! the host.

// PIO instr grouping is 3/5/3/5
#![allow(clippy::unusual_byte_groupings)]

use derive_more::{Display, Error};

pub mod config;
pub mod driver;
pub mod program;
pub mod sim;
pub mod sm;
pub mod xfer;

pub use config::{ClkDiv, Settings, SideSet, SmConfig};
pub use driver::{PioDriver, XferDir};
pub use program::{Program, Wrap};
pub use sim::SimPio;
pub use sm::StateMachine;
pub use xfer::{words_from_raw, TxBuffer};

/// State machine slots per PIO device.
pub const SM_COUNT: u8 = 4;

/// Instruction memory slots per PIO device.
pub const INSTRUCTION_COUNT: u8 = 32;

/// Longest loadable program, in instruction words.
pub const MAX_PROGRAM_LEN: usize = 31;

/// GPIOs reachable from the PIO block.
pub const GPIO_COUNT: u8 = 28;

/// Largest single transfer the driver boundary can address, in bytes.
pub const MAX_XFER_BYTES: usize = 0xffff;

/// Everything that can go wrong here.
///
/// Each variant carries the context of the violated precondition. Errors
/// are surfaced synchronously at the failing call and never retried.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq)]
pub enum Error {
    /// The PIO subsystem could not be initialized or the device opened.
    #[display("PIO device {index} unavailable")]
    DeviceUnavailable { index: u32 },
    /// Every state machine slot on the device is already claimed.
    #[display("no state machine available")]
    NoSlotAvailable,
    /// No contiguous free region of instruction memory is large enough.
    #[display("no room in instruction memory for a {length}-word program")]
    InsufficientProgramMemory { length: u8 },
    /// Programs hold 1 to 31 instruction words.
    #[display("invalid program length {length} (must be 1 to 31)")]
    InvalidProgramLength { length: usize },
    /// The requested frequency yields a clock divider the hardware cannot
    /// run at.
    #[display("frequency {frequency} Hz yields out-of-range divider {divider}")]
    InvalidFrequency { frequency: f64, divider: f64 },
    #[display("side-set pin count {count} out of range (must be 1 to 5)")]
    InvalidSidesetCount { count: u8 },
    #[display("pull threshold {threshold} out of range (must be 1 to 32)")]
    InvalidPullThreshold { threshold: u8 },
    #[display("GPIO {pin} out of range")]
    InvalidPin { pin: u8 },
    #[display("unsupported element width {width} (must be 1, 2 or 4 bytes)")]
    UnsupportedElementWidth { width: usize },
    /// The raw buffer does not divide into whole elements.
    #[display("{length}-byte buffer is not a whole number of {width}-byte elements")]
    TruncatedBuffer { length: usize, width: usize },
    #[display("transfer of {bytes} bytes exceeds the {max}-byte limit")]
    BufferTooLarge { bytes: usize, max: usize },
    #[display("transfer setup failed on state machine {sm}")]
    TransferConfigFailed { sm: u8 },
    #[display("transfer failed on state machine {sm}")]
    TransferFailed { sm: u8 },
    /// The state machine was already released.
    #[display("state machine already released")]
    Released,
}
