//! Register transfer contract.
//!
//! `Transfer`, `TransferBlock` and `WriteABORT` are delegated to a [`TransferEngine`].
//! The engine receives a reader positioned after the command byte and a writer positioned
//! after the echoed command byte. The number of request bytes it consumes is taken from
//! the reader position.
//!
//! [`UnimplementedTransfer`] is the default and answers every transfer with an error.
//! [`RegisterTransfer`] implements the full command framing on top of a
//! [`RegisterAccess`], which performs single register accesses on the wire.
use dap_protocol::codec::{RequestReader, ResponseWriter};
use dap_protocol::{Status, TransferRequest, TransferStatus};

use crate::state::{AbortHandle, DebugPort, EngineState, JtagContext, SwdConfig, TransferConfig};

/// Payload bytes consumed by the unimplemented `Transfer` and `TransferBlock` handlers.
pub const STUB_TRANSFER_LEN: usize = 4;
/// Payload bytes of `WriteABORT`: DAP index and the 32-bit abort value.
pub const WRITE_ABORT_LEN: usize = 5;

/// View of the engine state handed to transfer handlers.
#[derive(Copy, Clone, Debug)]
pub struct TransferContext<'s> {
    pub port: DebugPort,
    pub config: &'s TransferConfig,
    pub swd: &'s SwdConfig,
    pub jtag: &'s JtagContext,
    abort: &'s AbortHandle,
}

impl<'s> TransferContext<'s> {
    pub fn new(state: &'s EngineState) -> TransferContext<'s> {
        TransferContext {
            port: state.debug_port,
            config: &state.transfer,
            swd: &state.swd,
            jtag: &state.jtag,
            abort: state.abort_handle(),
        }
    }

    /// True once `TransferAbort` was received during the current transfer.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// False when JTAG is active and the DAP index lies outside the configured chain.
    pub fn device_selected(&self) -> bool {
        self.port != DebugPort::Jtag || self.jtag.selected().is_some()
    }

    fn check_device(&self) -> Option<TransferError> {
        if self.device_selected() {
            return None;
        }
        log::debug!(
            "DAP index {} outside JTAG chain of {} devices",
            self.jtag.index,
            self.jtag.devices().len()
        );
        Some(TransferError::Protocol)
    }
}

/// Outcome of a failed register access.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("Target answered WAIT")]
    Wait,
    #[error("Target answered FAULT")]
    Fault,
    #[error("Protocol error on the wire")]
    Protocol,
    #[error("No target answered")]
    NoTarget,
    #[error("Read value did not match")]
    Mismatch,
    #[error("Transfer aborted")]
    Aborted,
}

impl TransferError {
    /// Status byte reported for a transfer ending with this error.
    pub fn status(&self) -> TransferStatus {
        match self {
            TransferError::Wait | TransferError::Aborted => TransferStatus::WAIT,
            TransferError::Fault => TransferStatus::FAULT,
            TransferError::Protocol => TransferStatus::ERROR,
            TransferError::NoTarget => TransferStatus::NO_TARGET,
            TransferError::Mismatch => TransferStatus::OK | TransferStatus::MISMATCH,
        }
    }
}

/// Handlers of the register transfer commands.
pub trait TransferEngine {
    fn transfer(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    );

    fn transfer_block(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    );

    fn write_abort(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    );
}

/// Transfer handlers for probes without a register access layer.
#[derive(Copy, Clone, Debug, Default)]
pub struct UnimplementedTransfer;

impl TransferEngine for UnimplementedTransfer {
    fn transfer(
        &mut self,
        _cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        request.skip(STUB_TRANSFER_LEN);
        response.write_u8(0);
        response.write_u8(TransferStatus::ERROR.bits());
    }

    fn transfer_block(
        &mut self,
        _cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        request.skip(STUB_TRANSFER_LEN);
        response.write_u16(0);
        response.write_u8(TransferStatus::ERROR.bits());
    }

    fn write_abort(
        &mut self,
        _cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        request.skip(WRITE_ABORT_LEN);
        response.write_u8(Status::Error.into());
    }
}

/// A single DP/AP register access on the wire.
///
/// Implementations resolve posted AP reads themselves and honour
/// [`TransferConfig::idle_cycles`] and the SWD/JTAG settings in the context.
pub trait RegisterAccess {
    fn read(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
    ) -> Result<u32, TransferError>;

    fn write(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
        value: u32,
    ) -> Result<(), TransferError>;
}

/// Repeats `access` while it answers WAIT, at most `retry_count` times.
/// Stops early once the transfer is aborted.
pub fn retry_on_wait<T>(
    cx: &TransferContext<'_>,
    mut access: impl FnMut() -> Result<T, TransferError>,
) -> Result<T, TransferError> {
    let mut retries = 0;
    loop {
        match access() {
            Err(TransferError::Wait) if retries < cx.config.retry_count => {
                if cx.is_aborted() {
                    return Err(TransferError::Aborted);
                }
                retries += 1;
            }
            other => return other,
        }
    }
}

/// Reads until `value & mask == expected`, at most `match_retry` extra times.
pub fn read_until_match(
    cx: &TransferContext<'_>,
    mask: u32,
    expected: u32,
    mut read: impl FnMut() -> Result<u32, TransferError>,
) -> Result<u32, TransferError> {
    let mut retries = 0;
    loop {
        let value = retry_on_wait(cx, &mut read)?;
        if value & mask == expected & mask {
            return Ok(value);
        }
        if retries >= cx.config.match_retry {
            return Err(TransferError::Mismatch);
        }
        if cx.is_aborted() {
            return Err(TransferError::Aborted);
        }
        retries += 1;
    }
}

/// Transfer commands implemented on top of a [`RegisterAccess`].
#[derive(Debug, Default)]
pub struct RegisterTransfer<A> {
    access: A,
}

impl<A: RegisterAccess> RegisterTransfer<A> {
    pub fn new(access: A) -> RegisterTransfer<A> {
        RegisterTransfer { access }
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    fn single(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
        value: u32,
        match_mask: &mut u32,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), TransferError> {
        if cx.is_aborted() {
            return Err(TransferError::Aborted);
        }
        let access = &mut self.access;
        if request.is_read() {
            if request.contains(TransferRequest::MATCH_VALUE) {
                read_until_match(cx, *match_mask, value, || access.read(cx, request))?;
                return Ok(());
            }
            let needed = if request.contains(TransferRequest::TIMESTAMP) { 8 } else { 4 };
            if response.remaining() < needed {
                return Err(TransferError::Protocol);
            }
            let data = retry_on_wait(cx, || access.read(cx, request))?;
            if request.contains(TransferRequest::TIMESTAMP) {
                response.write_u32(0);
            }
            response.write_u32(data);
        } else if request.contains(TransferRequest::MATCH_MASK) {
            *match_mask = value;
        } else {
            retry_on_wait(cx, || access.write(cx, request, value))?;
        }
        Ok(())
    }

    fn block_item(
        &mut self,
        cx: &TransferContext<'_>,
        request: TransferRequest,
        value: u32,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), TransferError> {
        if cx.is_aborted() {
            return Err(TransferError::Aborted);
        }
        let access = &mut self.access;
        if request.is_read() {
            if response.remaining() < 4 {
                return Err(TransferError::Protocol);
            }
            let data = retry_on_wait(cx, || access.read(cx, request))?;
            response.write_u32(data);
        } else {
            retry_on_wait(cx, || access.write(cx, request, value))?;
        }
        Ok(())
    }
}

impl<A: RegisterAccess> TransferEngine for RegisterTransfer<A> {
    fn transfer(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        let _dap_index = request.next_u8();
        let count = request.next_u8();
        let header = response.position();
        response.write_u8(0);
        response.write_u8(0);

        let mut match_mask = cx.config.match_mask;
        let mut done = 0u8;
        let mut failure = cx.check_device();
        for _ in 0..count {
            let req = TransferRequest::from_bits_retain(request.next_u8());
            let value = if !req.is_read() || req.contains(TransferRequest::MATCH_VALUE) {
                request.next_u32()
            } else {
                0
            };
            // The remaining requests are still consumed after a failure.
            if failure.is_some() {
                continue;
            }
            match self.single(cx, req, value, &mut match_mask, response) {
                Ok(()) => done += 1,
                Err(e) => {
                    log::debug!("Transfer {} failed: {}", done, e);
                    failure = Some(e);
                }
            }
        }

        let status = failure.map_or(TransferStatus::OK, |e| e.status());
        response.write_u8_at(header, done);
        response.write_u8_at(header + 1, status.bits());
    }

    fn transfer_block(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        let _dap_index = request.next_u8();
        let count = request.next_u16();
        let req = TransferRequest::from_bits_retain(request.next_u8());
        let header = response.position();
        response.write_u16(0);
        response.write_u8(0);

        let mut done = 0u16;
        let mut failure = cx.check_device();
        for _ in 0..count {
            let value = if req.is_read() { 0 } else { request.next_u32() };
            if failure.is_some() {
                if req.is_read() {
                    break;
                }
                continue;
            }
            match self.block_item(cx, req, value, response) {
                Ok(()) => done += 1,
                Err(e) => {
                    log::debug!("Block transfer {} failed: {}", done, e);
                    failure = Some(e);
                }
            }
        }

        let status = failure.map_or(TransferStatus::OK, |e| e.status());
        response.write_u16_at(header, done);
        response.write_u8_at(header + 2, status.bits());
    }

    fn write_abort(
        &mut self,
        cx: &TransferContext<'_>,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
    ) {
        let _dap_index = request.next_u8();
        let value = request.next_u32();
        let access = &mut self.access;
        // DP ABORT is the write of DP register 0.
        let result = match cx.check_device() {
            Some(e) => Err(e),
            None => retry_on_wait(cx, || access.write(cx, TransferRequest::empty(), value)),
        };
        let status = match result {
            Ok(()) => Status::Ok,
            Err(e) => {
                log::warn!("Writing DP ABORT failed: {}", e);
                Status::Error
            }
        };
        response.write_u8(status.into());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{SIM_IDCODE, SimTarget};
    use dap_protocol::dp;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn connected() -> EngineState {
        let mut state = EngineState::default();
        state.debug_port = DebugPort::Swd;
        state
    }

    #[derive(Copy, Clone, Debug)]
    enum Command {
        Transfer,
        Block,
        Abort,
    }

    fn run(
        engine: &mut impl TransferEngine,
        state: &EngineState,
        command: Command,
        request: &[u8],
    ) -> (usize, Vec<u8>) {
        let cx = TransferContext::new(state);
        let mut reader = RequestReader::new(request);
        let mut buf = [0u8; 64];
        let mut writer = ResponseWriter::new(&mut buf);
        match command {
            Command::Transfer => engine.transfer(&cx, &mut reader, &mut writer),
            Command::Block => engine.transfer_block(&cx, &mut reader, &mut writer),
            Command::Abort => engine.write_abort(&cx, &mut reader, &mut writer),
        }
        (reader.position(), writer.written().to_vec())
    }

    #[test_case(Command::Transfer, &[0x00, 0x01, 0x02, 0x00], 4, &[0x00, 0x08] ; "transfer")]
    #[test_case(Command::Block, &[0x00, 0x01, 0x00, 0x02], 4, &[0x00, 0x00, 0x08] ; "transfer block")]
    #[test_case(Command::Abort, &[0x00, 0x1E, 0x00, 0x00, 0x00], 5, &[0xFF] ; "write abort")]
    fn unimplemented_transfer(
        command: Command,
        request: &[u8],
        consumed: usize,
        expected: &[u8],
    ) {
        let state = connected();
        let (used, response) = run(&mut UnimplementedTransfer, &state, command, request);
        assert_eq!(used, consumed);
        assert_eq!(response, expected);
    }

    #[test]
    fn reads_idcode() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (used, response) = run(&mut engine, &state, Command::Transfer, &[0x00, 0x01, 0x02]);
        assert_eq!(used, 3);
        let mut expected = vec![0x01, 0x01];
        expected.extend_from_slice(&SIM_IDCODE.to_le_bytes());
        assert_eq!(response, expected);
    }

    #[test]
    fn writes_then_reads_ap_register() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        // Write AP TAR, read AP TAR.
        let request = [0x00, 0x02, 0x05, 0x78, 0x56, 0x34, 0x12, 0x07];
        let (used, response) = run(&mut engine, &state, Command::Transfer, &request);
        assert_eq!(used, request.len());
        assert_eq!(response, vec![0x02, 0x01, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn wait_is_retried() {
        let mut state = connected();
        state.transfer.retry_count = 3;
        let mut engine = RegisterTransfer::new(SimTarget {
            wait_responses: 3,
            ..SimTarget::default()
        });
        let (_, response) = run(&mut engine, &state, Command::Transfer, &[0x00, 0x01, 0x02]);
        assert_eq!(&response[..2], &[0x01, 0x01]);
        assert_eq!(engine.access().accesses, 4);
    }

    #[test]
    fn wait_exhausts_retries() {
        let mut state = connected();
        state.transfer.retry_count = 2;
        let mut engine = RegisterTransfer::new(SimTarget {
            wait_responses: 10,
            ..SimTarget::default()
        });
        // The second request is consumed but not executed.
        let request = [0x00, 0x02, 0x02, 0x06];
        let (used, response) = run(&mut engine, &state, Command::Transfer, &request);
        assert_eq!(used, 4);
        assert_eq!(response, vec![0x00, 0x02]);
        assert_eq!(engine.access().accesses, 3);
    }

    #[test]
    fn fault_is_reported() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget {
            fault: true,
            ..SimTarget::default()
        });
        let (_, response) = run(&mut engine, &state, Command::Transfer, &[0x00, 0x01, 0x02]);
        assert_eq!(response, vec![0x00, 0x04]);
    }

    #[test]
    fn disconnected_port_has_no_target() {
        let state = EngineState::default();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (_, response) = run(&mut engine, &state, Command::Transfer, &[0x00, 0x01, 0x02]);
        assert_eq!(response, vec![0x00, 0x80]);
    }

    #[test]
    fn match_value_with_mask() {
        let mut state = connected();
        state.transfer.match_retry = 1;
        let mut target = SimTarget::default();
        target.dp[usize::from(dp::CTRL_STAT >> 2)] = 0xF000_0040;
        let mut engine = RegisterTransfer::new(target);
        // Set match mask 0xF0000000, then read CTRL/STAT expecting 0xF0000000.
        let request = [
            0x00, 0x02, 0x20, 0x00, 0x00, 0x00, 0xF0, 0x16, 0x00, 0x00, 0x00, 0xF0,
        ];
        let (used, response) = run(&mut engine, &state, Command::Transfer, &request);
        assert_eq!(used, request.len());
        assert_eq!(response, vec![0x02, 0x01]);
    }

    #[test]
    fn match_value_mismatch() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let mut cfg_state = state.clone();
        cfg_state.transfer.match_mask = 0xFFFF_FFFF;
        let request = [0x00, 0x01, 0x12, 0x00, 0x00, 0x00, 0x00];
        let (_, response) = run(&mut engine, &cfg_state, Command::Transfer, &request);
        assert_eq!(response, vec![0x00, 0x11]);
    }

    #[test]
    fn aborted_transfer_stops() {
        let state = connected();
        state.abort_handle().abort();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (used, response) = run(&mut engine, &state, Command::Transfer, &[0x00, 0x02, 0x02, 0x02]);
        assert_eq!(used, 4);
        assert_eq!(response, vec![0x00, 0x02]);
        assert_eq!(engine.access().accesses, 0);
    }

    #[test]
    fn block_write_then_read() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let request = [0x00, 0x02, 0x00, 0x05, 1, 0, 0, 0, 2, 0, 0, 0];
        let (used, response) = run(&mut engine, &state, Command::Block, &request);
        assert_eq!(used, request.len());
        assert_eq!(response, vec![0x02, 0x00, 0x01]);

        let (used, response) = run(&mut engine, &state, Command::Block, &[0x00, 0x02, 0x00, 0x07]);
        assert_eq!(used, 4);
        assert_eq!(
            response,
            vec![0x02, 0x00, 0x01, 2, 0, 0, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn block_read_stops_at_response_capacity() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (_, response) = run(&mut engine, &state, Command::Block, &[0x00, 0x20, 0x00, 0x07]);
        // 64 byte buffer: 3 header bytes and 15 words.
        assert_eq!(&response[..3], &[0x0F, 0x00, 0x08]);
        assert_eq!(response.len(), 3 + 15 * 4);
    }

    #[test]
    fn write_abort_succeeds() {
        let state = connected();
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (used, response) =
            run(&mut engine, &state, Command::Abort, &[0x00, 0x1E, 0x00, 0x00, 0x00]);
        assert_eq!(used, 5);
        assert_eq!(response, vec![0x00]);
    }

    #[test_case(Command::Transfer, &[0x01, 0x01, 0x02], 3, &[0x00, 0x08] ; "transfer")]
    #[test_case(Command::Block, &[0x01, 0x01, 0x00, 0x07], 4, &[0x00, 0x00, 0x08] ; "transfer block")]
    #[test_case(Command::Abort, &[0x01, 0x1E, 0x00, 0x00, 0x00], 5, &[0xFF] ; "write abort")]
    fn index_outside_jtag_chain(
        command: Command,
        request: &[u8],
        consumed: usize,
        expected: &[u8],
    ) {
        let mut state = EngineState::default();
        state.debug_port = DebugPort::Jtag;
        state.jtag.configure(&[4]).unwrap();
        state.jtag.index = 1;
        let mut engine = RegisterTransfer::new(SimTarget::default());
        let (used, response) = run(&mut engine, &state, command, request);
        assert_eq!(used, consumed);
        assert_eq!(response, expected);
        assert_eq!(engine.access().accesses, 0);
    }

    #[test]
    fn retry_helper_respects_abort() {
        let state = connected();
        state.abort_handle().abort();
        let cx = TransferContext::new(&state);
        let result: Result<u32, _> = retry_on_wait(&cx, || Err(TransferError::Wait));
        assert_eq!(result, Err(TransferError::Aborted));
    }
}
