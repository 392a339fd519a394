//! Acquisition, configuration and lifetime of one state machine.

use std::rc::Rc;

use log::{debug, warn};

use crate::config::Settings;
use crate::driver::{PioDriver, XferDir};
use crate::program::{Program, Wrap};
use crate::xfer::TxBuffer;
use crate::{Error, MAX_XFER_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Slot claimed and program resident, not yet running.
    Configured,
    /// Running the program.
    Enabled,
    /// All resources returned. Terminal.
    Released,
}

/// One claimed, configured and running PIO state machine.
///
/// Construction claims an unused slot, loads the program into the shared
/// instruction memory arena, applies the configuration built from
/// [`Settings`] and enables the slot. If any step fails, everything
/// acquired up to that point is released again before the error is
/// returned; the caller never sees a partially constructed value.
///
/// The device handle is shared with other state machines on the same
/// device; the slot and the loaded program belong to this value alone until
/// [`release`](StateMachine::release) returns them.
#[derive(Debug)]
pub struct StateMachine<D: PioDriver> {
    device: Rc<D>,
    program: Program,
    sm: u8,
    offset: u8,
    stage: Stage,
}

impl<D: PioDriver> StateMachine<D> {
    /// Open PIO device 0 and bring up `program` on an unused slot.
    pub fn new(program: Program, settings: &Settings) -> Result<StateMachine<D>, Error> {
        StateMachine::on_device(Rc::new(D::open(0)?), program, settings)
    }

    /// Bring up `program` on an unused slot of an already opened device.
    pub fn on_device(
        device: Rc<D>,
        program: Program,
        settings: &Settings,
    ) -> Result<StateMachine<D>, Error> {
        let sm = device.sm_claim_unused()?;
        let offset = match device.add_program(&program) {
            Ok(offset) => offset,
            Err(e) => {
                if let Err(e) = device.sm_unclaim(sm) {
                    warn!("failed to unclaim state machine {sm}: {e}");
                }
                return Err(e);
            }
        };
        debug!("claimed state machine {sm}, {}-word program at offset {offset}", program.len());

        // From here on any `?` drops `this`, which runs the same teardown
        // as an explicit release.
        let mut this = StateMachine {
            device,
            program,
            sm,
            offset,
            stage: Stage::Configured,
        };
        let config = settings.sm_config(this.wrap(), this.device.sys_clock_hz())?;
        if let Some(side_set) = settings.side_set {
            let base = u16::from(side_set.base);
            for pin in base..base + u16::from(side_set.count) {
                this.device.gpio_init(pin as u8)?;
            }
        }
        this.device.sm_init(this.sm, this.offset, &config)?;
        this.device.sm_set_enabled(this.sm, true)?;
        this.stage = Stage::Enabled;
        Ok(this)
    }

    /// The claimed slot index.
    pub fn slot(&self) -> u8 {
        self.sm
    }

    /// The program's load offset in instruction memory.
    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Wrap bounds of the loaded program.
    pub fn wrap(&self) -> Wrap {
        self.program.wrap(self.offset)
    }

    pub fn is_released(&self) -> bool {
        self.stage == Stage::Released
    }

    /// Move `data` into the TX FIFO, one 32-bit word per element.
    ///
    /// Accepts slices of 1-, 2- or 4-byte elements; narrow elements are
    /// replicated across the word. Blocks until the transfer is submitted.
    /// A failure is terminal for this call only; the state machine stays
    /// usable.
    pub fn write<'a>(&self, data: impl Into<TxBuffer<'a>>) -> Result<(), Error> {
        if self.stage == Stage::Released {
            return Err(Error::Released);
        }
        let data = data.into();
        let words = data.normalize();
        if words.is_empty() {
            return Ok(());
        }
        let bytes = words.len() * 4;
        if bytes > MAX_XFER_BYTES {
            return Err(Error::BufferTooLarge {
                bytes,
                max: MAX_XFER_BYTES,
            });
        }
        debug!(
            "state machine {}: transferring {} {}-byte elements as {bytes} bytes",
            self.sm,
            data.len(),
            data.element_width(),
        );
        self.device
            .sm_config_xfer(self.sm, XferDir::ToSm, bytes, 1)?;
        self.device.sm_xfer_data(self.sm, XferDir::ToSm, &words)
    }

    /// Stop the state machine and return its slot and instruction memory
    /// to the device.
    ///
    /// Idempotent: later calls (and the drop that follows) are no-ops.
    /// Teardown failures reported by the driver are logged and skipped so
    /// the remaining resources are still returned.
    pub fn release(&mut self) {
        match self.stage {
            Stage::Released => return,
            Stage::Enabled => {
                if let Err(e) = self.device.sm_set_enabled(self.sm, false) {
                    warn!("failed to disable state machine {}: {e}", self.sm);
                }
            }
            Stage::Configured => {}
        }
        if let Err(e) = self.device.remove_program(&self.program, self.offset) {
            warn!("failed to remove program at offset {}: {e}", self.offset);
        }
        if let Err(e) = self.device.sm_unclaim(self.sm) {
            warn!("failed to unclaim state machine {}: {e}", self.sm);
        }
        self.stage = Stage::Released;
    }
}

impl<D: PioDriver> Drop for StateMachine<D> {
    fn drop(&mut self) {
        self.release();
    }
}
