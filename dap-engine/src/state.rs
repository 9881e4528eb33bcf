//! Connection and transfer state kept between commands.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dap_protocol::Port;

use crate::error::ChainTooLong;

/// Maximum number of devices on a JTAG scan chain.
pub const MAX_JTAG_DEVICES: usize = 8;

/// Port currently brought up.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DebugPort {
    #[default]
    Disabled,
    Swd,
    Jtag,
}

impl From<DebugPort> for u8 {
    fn from(port: DebugPort) -> u8 {
        match port {
            DebugPort::Disabled => Port::DISABLED,
            DebugPort::Swd => Port::Swd.into(),
            DebugPort::Jtag => Port::Jtag.into(),
        }
    }
}

/// Parameters set by `TransferConfigure`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferConfig {
    /// Idle cycles after each transfer.
    pub idle_cycles: u8,
    /// Retries on a WAIT acknowledge.
    pub retry_count: u16,
    /// Retries of a read with value match.
    pub match_retry: u16,
    pub match_mask: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idle_cycles: 0,
            retry_count: 100,
            match_retry: 0,
            match_mask: 0,
        }
    }
}

/// Parameters set by `SWD_Configure`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwdConfig {
    /// Turnaround period in clock cycles, 1 to 4.
    pub turnaround: u8,
    /// Always generate a data phase, even on WAIT/FAULT.
    pub data_phase: bool,
}

impl Default for SwdConfig {
    fn default() -> Self {
        Self {
            turnaround: 1,
            data_phase: false,
        }
    }
}

impl SwdConfig {
    pub fn from_byte(byte: u8) -> SwdConfig {
        SwdConfig {
            turnaround: (byte & 0x03) + 1,
            data_phase: byte & 0x04 != 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct JtagDevice {
    pub ir_length: u8,
    /// Sum of IR lengths of the devices before this one.
    pub ir_before: u16,
    /// Sum of IR lengths of the devices after this one.
    pub ir_after: u16,
}

/// JTAG scan chain as described by `JTAG_Configure`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct JtagContext {
    /// Device selected by the index byte of transfer commands.
    pub index: u8,
    count: u8,
    devices: [JtagDevice; MAX_JTAG_DEVICES],
}

impl JtagContext {
    /// Replaces the chain with devices of the given IR lengths.
    pub fn configure(&mut self, ir_lengths: &[u8]) -> Result<(), ChainTooLong> {
        if ir_lengths.len() > MAX_JTAG_DEVICES {
            return Err(ChainTooLong {
                count: ir_lengths.len(),
                max: MAX_JTAG_DEVICES,
            });
        }
        let total: u16 = ir_lengths.iter().map(|&len| u16::from(len)).sum();
        let mut before = 0u16;
        self.devices = [JtagDevice::default(); MAX_JTAG_DEVICES];
        for (device, &ir_length) in self.devices.iter_mut().zip(ir_lengths) {
            device.ir_length = ir_length;
            device.ir_before = before;
            before += u16::from(ir_length);
            device.ir_after = total - before;
        }
        self.count = ir_lengths.len() as u8;
        Ok(())
    }

    pub fn devices(&self) -> &[JtagDevice] {
        &self.devices[..usize::from(self.count)]
    }

    pub fn selected(&self) -> Option<&JtagDevice> {
        self.devices().get(usize::from(self.index))
    }
}

/// Shared flag requesting the abort of a running transfer.
///
/// Set from any context, typically by the transport when a `TransferAbort` arrives
/// while a transfer is in progress.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// All state the engine carries between commands.
#[derive(Clone, Debug, Default)]
pub struct EngineState {
    pub debug_port: DebugPort,
    pub transfer: TransferConfig,
    pub swd: SwdConfig,
    pub jtag: JtagContext,
    abort: AbortHandle,
}

impl EngineState {
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Returns every field to its default. Handles to the abort flag stay valid.
    pub fn reset(&mut self) {
        self.debug_port = DebugPort::default();
        self.transfer = TransferConfig::default();
        self.swd = SwdConfig::default();
        self.jtag = JtagContext::default();
        self.abort.clear();
    }
}

impl PartialEq for EngineState {
    fn eq(&self, other: &Self) -> bool {
        self.debug_port == other.debug_port
            && self.transfer == other.transfer
            && self.swd == other.swd
            && self.jtag == other.jtag
            && self.abort.is_aborted() == other.abort.is_aborted()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let state = EngineState::default();
        assert_eq!(state.debug_port, DebugPort::Disabled);
        assert_eq!(state.transfer.retry_count, 100);
        assert_eq!(state.swd.turnaround, 1);
        assert!(state.jtag.devices().is_empty());
        assert!(!state.abort_handle().is_aborted());
    }

    #[test]
    fn jtag_chain_offsets() {
        let mut jtag = JtagContext::default();
        jtag.configure(&[4, 5, 6]).unwrap();
        assert_eq!(
            jtag.devices(),
            &[
                JtagDevice {
                    ir_length: 4,
                    ir_before: 0,
                    ir_after: 11
                },
                JtagDevice {
                    ir_length: 5,
                    ir_before: 4,
                    ir_after: 6
                },
                JtagDevice {
                    ir_length: 6,
                    ir_before: 9,
                    ir_after: 0
                },
            ]
        );
    }

    #[test]
    fn jtag_chain_too_long() {
        let mut jtag = JtagContext::default();
        jtag.configure(&[4]).unwrap();
        assert_eq!(
            jtag.configure(&[1; 9]),
            Err(ChainTooLong { count: 9, max: 8 })
        );
        assert_eq!(jtag.devices().len(), 1);
    }

    #[test]
    fn swd_configure_byte() {
        assert_eq!(
            SwdConfig::from_byte(0x07),
            SwdConfig {
                turnaround: 4,
                data_phase: true
            }
        );
        assert_eq!(SwdConfig::from_byte(0x00), SwdConfig::default());
    }

    #[test]
    fn reset_keeps_abort_handles_connected() {
        let mut state = EngineState::default();
        let handle = state.abort_handle().clone();
        state.debug_port = DebugPort::Swd;
        state.transfer.retry_count = 3;
        handle.abort();
        assert!(state.abort_handle().is_aborted());

        state.reset();
        assert_eq!(state, EngineState::default());
        assert!(!handle.is_aborted());
        handle.abort();
        assert!(state.abort_handle().is_aborted());
    }
}
