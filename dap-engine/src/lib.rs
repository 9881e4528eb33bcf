//! # CMSIS-DAP Engine Library
//!
//! This crate provides the protocol core of a [CMSIS-DAP](https://arm-software.github.io/CMSIS_5/DAP/html/index.html)
//! debug probe: it turns request packets from a host debugger into responses and drives
//! the probe's debug port lines while doing so.
//!
//! ## Overview
//!
//! A host sends one command per request packet. The engine decodes the command, updates
//! its connection state, brings debug ports up or down and writes a response that echoes
//! the command identifier. Unknown commands are answered with a single `0xFF`.
//!
//! ## Architecture
//!
//! - **Hardware capabilities**: [`ClockedLine`] and [`DigitalPin`] describe the little a
//!   probe needs from its board. A [`DapIo`] bundles one clocked line and the data, input,
//!   reset and optional status pins.
//! - **[`engine::DapEngine`]**: the dispatcher and connection state machine.
//! - **[`sequencer`]**: SWD and JTAG bring-up and the best-effort port shutdown.
//! - **[`transfer`]**: the contract for register transfers. The default
//!   [`transfer::UnimplementedTransfer`] answers every transfer with an error status.
//! - **[`completion`]**: how writes are awaited in thread and interrupt context.
//!
//! ## Basic Usage
//!
//! ### Implementing the Hardware
//!
//! ```ignore
//! use dap_engine::{ClockedLine, HwError, LineConfig, WriteOperation};
//!
//! struct SpiLine {
//!     pending: Option<WriteOperation>,
//! }
//!
//! impl ClockedLine for SpiLine {
//!     fn set_config(&mut self, config: LineConfig) -> Result<(), HwError> {
//!         // Program clock polarity and phase
//!         Ok(())
//!     }
//!
//!     fn write(&mut self, data: &[u8], op: &WriteOperation) -> Result<(), HwError> {
//!         // Start the transfer and keep the operation for the DMA interrupt,
//!         // which calls pending.complete(true, Ok(())).
//!         self.pending = Some(op.clone());
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ### Running Commands
//!
//! ```ignore
//! use dap_engine::{DapIo, ExecContext, engine::Builder};
//!
//! let io = DapIo::new(&mut line, &mut swdio, &mut tdo, &mut nreset);
//! let mut engine = Builder::new().product("My Probe").build(io);
//!
//! let mut response = [0u8; 64];
//! let len = engine.execute_command(&[0x02, 0x01], &mut response, ExecContext::Thread);
//! assert_eq!(&response[..len], &[0x02, 0x01]);
//! ```
//!
//! ## Error Handling
//!
//! The protocol has no way to report hardware errors other than through status bytes.
//! Failed bring-up sequences are logged, shut the port down and are answered with the
//! failure value of the command. Hardware resources report [`HwError`].
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Commands are logged at `debug`, packet contents at
//! `trace` and hardware failures at `warn`.
//!
//! ## Thread Model
//!
//! An engine is driven by one caller at a time. It may be called from thread or interrupt
//! context, passed as [`ExecContext`]. Only the abort flag ([`state::AbortHandle`]) is
//! shared and may be set from anywhere.
pub mod completion;
pub mod engine;
pub mod error;
pub mod sequencer;
pub mod state;
pub mod transfer;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use completion::{ExecContext, IsrWriteMode, WriteOperation};
pub use error::HwError;

/// Idle level of the clock of a [`ClockedLine`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockPolarity {
    IdleLow,
    IdleHigh,
}

/// Clock edge on which data is sampled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockPhase {
    FirstEdge,
    SecondEdge,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineConfig {
    pub polarity: ClockPolarity,
    pub phase: ClockPhase,
}

impl LineConfig {
    /// Idle-low clock, data sampled on the first edge. Used for both SWD and JTAG.
    pub const DEBUG: LineConfig = LineConfig {
        polarity: ClockPolarity::IdleLow,
        phase: ClockPhase::FirstEdge,
    };
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Input,
    OutputPushPull,
    OutputOpenDrain,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Pull {
    None,
    Up,
    Down,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinConfig {
    pub direction: Direction,
    pub pull: Pull,
}

impl PinConfig {
    pub const fn new(direction: Direction, pull: Pull) -> PinConfig {
        PinConfig { direction, pull }
    }
}

/// A serial line that clocks out bytes, most significant bit first.
///
/// Writes are asynchronous: [`ClockedLine::write`] starts the transfer and the driver
/// reports its end through [`WriteOperation::complete`]. A driver that finishes later,
/// possibly from an interrupt, keeps a clone of the operation. A driver may also finish
/// the write before returning, in which case it calls `complete` before `write` returns.
pub trait ClockedLine {
    fn set_config(&mut self, config: LineConfig) -> Result<(), HwError>;

    /// Starts clocking out `data`.
    ///
    /// An error means the write was never started and `op` will not be completed.
    fn write(&mut self, data: &[u8], op: &WriteOperation) -> Result<(), HwError>;
}

/// A single GPIO line.
pub trait DigitalPin {
    fn set_config(&mut self, config: PinConfig) -> Result<(), HwError>;

    fn write(&mut self, high: bool);

    fn read(&self) -> bool;
}

/// The hardware resources of a probe.
pub struct DapIo<'a> {
    /// Carries SWCLK/TCK and the serialized data.
    pub line: &'a mut dyn ClockedLine,
    /// SWDIO/TMS.
    pub swdio: &'a mut dyn DigitalPin,
    /// TDO, only used by JTAG.
    pub tdo: &'a mut dyn DigitalPin,
    /// Target reset, open drain and active low.
    pub nreset: &'a mut dyn DigitalPin,
    /// Connect indicator driven by `HostStatus`.
    pub led: Option<&'a mut dyn DigitalPin>,
}

impl<'a> DapIo<'a> {
    pub fn new(
        line: &'a mut dyn ClockedLine,
        swdio: &'a mut dyn DigitalPin,
        tdo: &'a mut dyn DigitalPin,
        nreset: &'a mut dyn DigitalPin,
    ) -> DapIo<'a> {
        DapIo {
            line,
            swdio,
            tdo,
            nreset,
            led: None,
        }
    }

    pub fn with_status_led(mut self, led: &'a mut dyn DigitalPin) -> DapIo<'a> {
        self.led = Some(led);
        self
    }
}
