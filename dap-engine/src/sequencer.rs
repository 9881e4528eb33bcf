//! Debug port bring-up and shutdown.
//!
//! Bring-up reconfigures the clocked line and pins in a fixed order, stops at the first
//! failing step and emits a line sequence that puts the target's debug port into the
//! requested mode. Shutdown is best effort and never fails.
use std::sync::Arc;
use std::time::Duration;

use crate::completion::{ExecContext, IsrWriteMode, WriteOperation, WriteSync};
use crate::error::{BringUpStep, HwError, SequenceError};
use crate::{DapIo, Direction, LineConfig, PinConfig, Pull};

/// Clock cycles with SWDIO high that reset the SWD line. At least 50 are required.
pub const SWD_LINE_RESET_CYCLES: usize = 56;
/// The 16-bit JTAG-to-SWD select sequence, emitted most significant bit first.
pub const JTAG_TO_SWD: u16 = 0xE79E;

/// Line reset, JTAG-to-SWD select, line reset, in one unbroken write.
pub const SWD_BRING_UP: [u8; 16] = swd_bring_up();
/// Clocks with TMS high that return every TAP to Test-Logic-Reset. At least 5 are required.
pub const JTAG_BRING_UP: [u8; 1] = [0xFF];

const fn swd_bring_up() -> [u8; 16] {
    let reset_bytes = SWD_LINE_RESET_CYCLES / 8;
    let mut sequence = [0xFF; 16];
    let [high, low] = JTAG_TO_SWD.to_be_bytes();
    sequence[reset_bytes] = high;
    sequence[reset_bytes + 1] = low;
    sequence
}

const RESET_DRIVE: PinConfig = PinConfig::new(Direction::OutputOpenDrain, Pull::None);
const DATA_DRIVE: PinConfig = PinConfig::new(Direction::OutputPushPull, Pull::None);
const INPUT_PULL_UP: PinConfig = PinConfig::new(Direction::Input, Pull::Up);
const INPUT_FLOATING: PinConfig = PinConfig::new(Direction::Input, Pull::None);

fn at(step: BringUpStep) -> impl FnOnce(HwError) -> SequenceError {
    move |source| SequenceError::new(step, source)
}

fn log_completion(in_isr: bool, result: Result<(), HwError>) {
    if let Err(e) = result {
        log::warn!("Unawaited line write failed (in_isr={}): {}", in_isr, e);
    }
}

/// Drives the probe's hardware through the port sequences.
pub struct Sequencer<'s, 'io> {
    io: &'s mut DapIo<'io>,
    sync: &'s Arc<WriteSync>,
    write_timeout: Duration,
    isr_mode: IsrWriteMode,
}

impl<'s, 'io> Sequencer<'s, 'io> {
    pub fn new(
        io: &'s mut DapIo<'io>,
        sync: &'s Arc<WriteSync>,
        write_timeout: Duration,
        isr_mode: IsrWriteMode,
    ) -> Sequencer<'s, 'io> {
        Sequencer {
            io,
            sync,
            write_timeout,
            isr_mode,
        }
    }

    pub fn setup_swd(&mut self, cx: ExecContext) -> Result<(), SequenceError> {
        log::debug!("Bringing up SWD port");
        self.io
            .line
            .set_config(LineConfig::DEBUG)
            .map_err(at(BringUpStep::LineConfig))?;
        self.io
            .nreset
            .set_config(RESET_DRIVE)
            .map_err(at(BringUpStep::ResetPin))?;
        self.io.nreset.write(true);
        self.io
            .swdio
            .set_config(DATA_DRIVE)
            .map_err(at(BringUpStep::DataPin))?;
        self.io.swdio.write(true);
        self.emit(&SWD_BRING_UP, cx).map_err(at(BringUpStep::Emit))
    }

    pub fn setup_jtag(&mut self, cx: ExecContext) -> Result<(), SequenceError> {
        log::debug!("Bringing up JTAG port");
        self.io
            .line
            .set_config(LineConfig::DEBUG)
            .map_err(at(BringUpStep::LineConfig))?;
        self.io
            .nreset
            .set_config(RESET_DRIVE)
            .map_err(at(BringUpStep::ResetPin))?;
        self.io.nreset.write(true);
        self.io
            .tdo
            .set_config(INPUT_PULL_UP)
            .map_err(at(BringUpStep::InputPin))?;
        self.io
            .swdio
            .set_config(DATA_DRIVE)
            .map_err(at(BringUpStep::DataPin))?;
        self.io.swdio.write(true);
        self.emit(&JTAG_BRING_UP, cx).map_err(at(BringUpStep::Emit))
    }

    /// Releases every debug line. Failures are logged and the remaining steps still run.
    pub fn port_off(&mut self) {
        log::debug!("Releasing debug port lines");
        if let Err(e) = self.io.swdio.set_config(INPUT_FLOATING) {
            log::warn!("Could not release data pin: {}", e);
        }
        if let Err(e) = self.io.tdo.set_config(INPUT_FLOATING) {
            log::warn!("Could not release input pin: {}", e);
        }
        if let Err(e) = self.io.nreset.set_config(INPUT_PULL_UP) {
            log::warn!("Could not release reset pin: {}", e);
        }
    }

    /// Clocks out `data` and waits for completion as appropriate for `cx`.
    pub fn emit(&mut self, data: &[u8], cx: ExecContext) -> Result<(), HwError> {
        let op = match (cx, self.isr_mode) {
            (ExecContext::Thread, _) => WriteOperation::blocking(self.sync, self.write_timeout),
            (ExecContext::Interrupt, IsrWriteMode::Poll) => WriteOperation::polling(self.sync),
            (ExecContext::Interrupt, IsrWriteMode::FireAndForget) => {
                WriteOperation::callback(self.sync, log_completion)
            }
        };
        log::trace!("Emitting line sequence: {:02x?}", data);
        self.io.line.write(data, &op)?;
        op.wait()
    }
}
