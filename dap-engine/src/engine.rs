use std::sync::Arc;
use std::time::Duration;

use dap_protocol::codec::{RequestReader, ResponseWriter};
use dap_protocol::{
    Capabilities, CommandId, DEFAULT_PACKET_COUNT, DEFAULT_PACKET_SIZE, HostStatusKind, InfoId,
    JTAG_SEQUENCE_TCK, MAX_RESPONSE_SIZE, Port, SWD_SEQUENCE_CLK, SWD_SEQUENCE_DIN, Status,
    SwjPins, VENDOR_COMMAND_FIRST, bytes_for_bits, is_vendor_command,
};

use crate::DapIo;
use crate::completion::{ExecContext, IsrWriteMode, WriteSync};
use crate::error::SequenceError;
use crate::sequencer::Sequencer;
use crate::state::{AbortHandle, DebugPort, EngineState, SwdConfig};
use crate::transfer::{TransferContext, TransferEngine, UnimplementedTransfer};

/// Number of vendor command slots (0x80..=0x9F).
pub const VENDOR_COMMAND_COUNT: usize = 32;

/// Handler of a vendor command. The command byte is already echoed; the handler reads
/// its payload from `request` and appends to `response`.
pub type VendorHandler = fn(&mut RequestReader<'_>, &mut ResponseWriter<'_>);

/// Identification strings reported by the `Info` command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProbeInfo {
    pub vendor: String,
    pub product: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub device_vendor: Option<String>,
    pub device_name: Option<String>,
    pub board_vendor: Option<String>,
    pub board_name: Option<String>,
}

impl Default for ProbeInfo {
    fn default() -> Self {
        Self {
            vendor: "Open Probe".to_string(),
            product: "CMSIS-DAP Probe".to_string(),
            serial_number: "0001".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            device_vendor: None,
            device_name: None,
            board_vendor: None,
            board_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub info: ProbeInfo,
    /// Advertised capabilities. Atomic commands are always added.
    pub capabilities: Capabilities,
    pub packet_size: u16,
    pub packet_count: u8,
    /// How long a thread-context write waits for completion.
    pub write_timeout: Duration,
    pub isr_write_mode: IsrWriteMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            info: ProbeInfo::default(),
            capabilities: Capabilities::default(),
            packet_size: DEFAULT_PACKET_SIZE,
            packet_count: DEFAULT_PACKET_COUNT,
            write_timeout: Duration::from_millis(100),
            isr_write_mode: IsrWriteMode::default(),
        }
    }
}

/// Bytes consumed from a request and produced into its response.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandResult {
    pub request_consumed: usize,
    pub response_generated: usize,
}

/// Builder to create a [DapEngine] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use dap_engine::engine::Builder;
/// use std::time::Duration;
///
/// let engine = Builder::new()
///     .product("Debug Probe")
///     .serial_number("A1B2")
///     .write_timeout(Duration::from_millis(50))
///     .build(io);
/// ```
pub struct Builder<T = UnimplementedTransfer> {
    config: Config,
    vendor: [Option<VendorHandler>; VENDOR_COMMAND_COUNT],
    transfer: T,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            config: Config::default(),
            vendor: [None; VENDOR_COMMAND_COUNT],
            transfer: UnimplementedTransfer,
        }
    }
}

impl<T: TransferEngine> Builder<T> {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.config.info.vendor = vendor.into();
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.config.info.product = product.into();
        self
    }

    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.config.info.serial_number = serial.into();
        self
    }

    pub fn firmware_version(mut self, version: impl Into<String>) -> Self {
        self.config.info.firmware_version = version.into();
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Set the packet size reported to the host. Info strings are clamped to fit.
    pub fn packet_size(mut self, size: u16) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Set how long thread-context writes wait for the hardware.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn isr_write_mode(mut self, mode: IsrWriteMode) -> Self {
        self.config.isr_write_mode = mode;
        self
    }

    /// Register a handler for the vendor command `id` (0x80..=0x9F).
    /// Identifiers outside the vendor range are ignored.
    pub fn vendor_command(mut self, id: u8, handler: VendorHandler) -> Self {
        if is_vendor_command(id) {
            self.vendor[usize::from(id - VENDOR_COMMAND_FIRST)] = Some(handler);
        } else {
            log::warn!("Ignoring vendor handler for non-vendor command 0x{:02x}", id);
        }
        self
    }

    /// Replace the register transfer handlers.
    pub fn transfer_engine<U: TransferEngine>(self, transfer: U) -> Builder<U> {
        Builder {
            config: self.config,
            vendor: self.vendor,
            transfer,
        }
    }

    /// Build and return the engine
    pub fn build(self, io: DapIo<'_>) -> DapEngine<'_, T> {
        let mut engine = DapEngine::with_transfer(io, self.config, self.transfer);
        engine.vendor = self.vendor;
        engine
    }
}

enum Route {
    Command(CommandId),
    Vendor(VendorHandler),
    Invalid,
}

/// CMSIS-DAP command dispatcher.
pub struct DapEngine<'a, T: TransferEngine = UnimplementedTransfer> {
    io: DapIo<'a>,
    config: Config,
    state: EngineState,
    sync: Arc<WriteSync>,
    transfer: T,
    vendor: [Option<VendorHandler>; VENDOR_COMMAND_COUNT],
    response: Box<[u8]>,
}

impl<'a> DapEngine<'a> {
    pub fn new(io: DapIo<'a>, config: Config) -> DapEngine<'a> {
        DapEngine::with_transfer(io, config, UnimplementedTransfer)
    }
}

impl<'a, T: TransferEngine> DapEngine<'a, T> {
    pub fn with_transfer(io: DapIo<'a>, mut config: Config, transfer: T) -> DapEngine<'a, T> {
        if usize::from(config.packet_size) > MAX_RESPONSE_SIZE {
            log::warn!(
                "Packet size {} exceeds the response buffer, using {}",
                config.packet_size,
                MAX_RESPONSE_SIZE
            );
            config.packet_size = MAX_RESPONSE_SIZE as u16;
        }
        log::debug!(
            "Engine config: packet_size={}, capabilities={:?}, write_timeout={:?}",
            config.packet_size,
            config.capabilities,
            config.write_timeout
        );
        DapEngine {
            io,
            config,
            state: EngineState::default(),
            sync: Arc::new(WriteSync::new()),
            transfer,
            vendor: [None; VENDOR_COMMAND_COUNT],
            response: vec![0u8; MAX_RESPONSE_SIZE].into_boxed_slice(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn debug_port(&self) -> DebugPort {
        self.state.debug_port
    }

    /// Handle to the abort flag, for transports that intercept `TransferAbort`.
    pub fn abort_handle(&self) -> AbortHandle {
        self.state.abort_handle().clone()
    }

    pub fn transfer_engine(&self) -> &T {
        &self.transfer
    }

    pub fn transfer_engine_mut(&mut self) -> &mut T {
        &mut self.transfer
    }

    /// Returns all state to its power-on defaults. Hardware is left untouched.
    pub fn reset(&mut self) {
        log::debug!("Resetting engine state");
        self.state.reset();
    }

    /// Executes one request and returns the response length.
    pub fn execute_command(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        cx: ExecContext,
    ) -> usize {
        self.process_command(request, response, cx)
            .response_generated
    }

    /// Executes one request into the engine's own response buffer and hands the
    /// response to `sink`. Returns the response length.
    pub fn execute_command_with<F>(&mut self, request: &[u8], cx: ExecContext, sink: F) -> usize
    where
        F: FnOnce(ExecContext, &[u8]),
    {
        let mut buffer = std::mem::take(&mut self.response);
        let len = self.process_command(request, &mut buffer, cx).response_generated;
        sink(cx, &buffer[..len]);
        self.response = buffer;
        len
    }

    /// Executes one request and reports both request and response lengths.
    pub fn process_command(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        cx: ExecContext,
    ) -> CommandResult {
        log::trace!("Request: {:02x?}", request);
        let mut writer = ResponseWriter::new(response);
        let request_consumed = self.dispatch(request, &mut writer, cx, false);
        if writer.overflowed() {
            log::warn!(
                "Response truncated to {} bytes of buffer space",
                writer.capacity()
            );
        }
        log::trace!("Response: {:02x?}", writer.written());
        CommandResult {
            request_consumed,
            response_generated: writer.position(),
        }
    }

    fn route(&self, byte: u8, nested: bool) -> Route {
        if let Some(id) = CommandId::from_byte(byte) {
            return match id {
                CommandId::QueueCommands | CommandId::ExecuteCommands if nested => Route::Invalid,
                CommandId::SwoTransport
                | CommandId::SwoMode
                | CommandId::SwoBaudrate
                | CommandId::SwoControl
                | CommandId::SwoStatus
                | CommandId::SwoData
                | CommandId::SwoExtendedStatus
                | CommandId::UartTransport
                | CommandId::UartConfigure
                | CommandId::UartTransfer
                | CommandId::UartControl => Route::Invalid,
                id => Route::Command(id),
            };
        }
        if is_vendor_command(byte)
            && let Some(handler) = self.vendor[usize::from(byte - VENDOR_COMMAND_FIRST)]
        {
            return Route::Vendor(handler);
        }
        Route::Invalid
    }

    /// Handles one command and returns the number of request bytes it consumed.
    fn dispatch(
        &mut self,
        request: &[u8],
        response: &mut ResponseWriter<'_>,
        cx: ExecContext,
        nested: bool,
    ) -> usize {
        let Some((&byte, payload)) = request.split_first() else {
            log::debug!("Received empty request");
            response.write_u8(CommandId::INVALID);
            return 1;
        };
        let route = self.route(byte, nested);
        if let Route::Invalid = route {
            log::debug!("Received unsupported command 0x{:02x}", byte);
            response.write_u8(CommandId::INVALID);
            return 1;
        }

        response.write_u8(byte);
        let mut reader = RequestReader::new(payload);
        match route {
            Route::Command(id) => {
                log::debug!("Received {:?} command", id);
                self.process_message(id, &mut reader, response, cx);
            }
            Route::Vendor(handler) => {
                log::debug!("Received vendor command 0x{:02x}", byte);
                handler(&mut reader, response);
            }
            Route::Invalid => {}
        }
        if reader.is_truncated() {
            log::debug!("Request for 0x{:02x} was shorter than its payload", byte);
        }
        1 + reader.position()
    }

    /// Process each command, forwarding register transfers to the transfer engine.
    fn process_message(
        &mut self,
        id: CommandId,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
        cx: ExecContext,
    ) {
        match id {
            CommandId::Info => self.info(request, response),
            CommandId::HostStatus => {
                let kind = request.next_u8();
                let value = request.next_u8();
                if matches!(HostStatusKind::try_from(kind), Ok(HostStatusKind::Connect))
                    && let Some(led) = self.io.led.as_mut()
                {
                    led.write(value != 0);
                }
                response.write_u8(Status::Ok.into());
            }
            CommandId::Connect => {
                let port = request.next_u8();
                let connected = self.connect(port, cx);
                response.write_u8(connected.into());
            }
            CommandId::Disconnect => {
                self.sequencer().port_off();
                self.state.debug_port = DebugPort::Disabled;
                response.write_u8(Status::Ok.into());
            }
            CommandId::TransferConfigure => {
                self.state.transfer.idle_cycles = request.next_u8();
                self.state.transfer.retry_count = request.next_u16();
                self.state.transfer.match_retry = request.next_u16();
                log::debug!("Transfer config: {:?}", self.state.transfer);
                response.write_u8(Status::Ok.into());
            }
            CommandId::Transfer => {
                self.state.abort_handle().clear();
                self.select_device(request);
                let transfer_cx = TransferContext::new(&self.state);
                self.transfer.transfer(&transfer_cx, request, response);
            }
            CommandId::TransferBlock => {
                self.state.abort_handle().clear();
                self.select_device(request);
                let transfer_cx = TransferContext::new(&self.state);
                self.transfer.transfer_block(&transfer_cx, request, response);
            }
            CommandId::TransferAbort => {
                self.state.abort_handle().abort();
                response.write_u8(Status::Ok.into());
            }
            CommandId::WriteAbort => {
                self.select_device(request);
                let transfer_cx = TransferContext::new(&self.state);
                self.transfer.write_abort(&transfer_cx, request, response);
            }
            CommandId::Delay => {
                let delay_us = request.next_u16();
                log::trace!("Delay of {}us acknowledged", delay_us);
                response.write_u8(Status::Ok.into());
            }
            CommandId::ResetTarget => response.write_u8(Status::Ok.into()),
            CommandId::SwjPins => {
                let output = SwjPins::from_bits_retain(request.next_u8());
                let select = SwjPins::from_bits_retain(request.next_u8());
                let wait_us = request.next_u32();
                log::trace!(
                    "SWJ pins {:?} set to {:?}, wait {}us",
                    select,
                    output & select,
                    wait_us
                );
                response.write_u8(Status::Ok.into());
            }
            CommandId::SwjClock => {
                let clock_hz = request.next_u32();
                log::debug!("SWJ clock set to {}Hz", clock_hz);
                response.write_u8(Status::Ok.into());
            }
            CommandId::SwjSequence => {
                let bits = match request.next_u8() {
                    0 => 256,
                    n => usize::from(n),
                };
                request.skip(bytes_for_bits(bits));
                response.write_u8(Status::Ok.into());
            }
            CommandId::SwdConfigure => {
                self.state.swd = SwdConfig::from_byte(request.next_u8());
                response.write_u8(Status::Ok.into());
            }
            CommandId::SwdSequence => {
                let count = request.next_u8();
                for _ in 0..count {
                    let info = request.next_u8();
                    if info & SWD_SEQUENCE_DIN == 0 {
                        request.skip(bytes_for_bits(sequence_clocks(info & SWD_SEQUENCE_CLK)));
                    }
                }
                response.write_u8(Status::Ok.into());
            }
            CommandId::JtagSequence => {
                let count = request.next_u8();
                for _ in 0..count {
                    let info = request.next_u8();
                    request.skip(bytes_for_bits(sequence_clocks(info & JTAG_SEQUENCE_TCK)));
                }
                response.write_u8(Status::Error.into());
            }
            CommandId::JtagConfigure => {
                let count = usize::from(request.next_u8());
                let ir_lengths = request.take(count);
                let status = match self.state.jtag.configure(ir_lengths) {
                    Ok(()) => Status::Ok,
                    Err(e) => {
                        log::warn!("{}", e);
                        Status::Error
                    }
                };
                response.write_u8(status.into());
            }
            CommandId::JtagIdcode => {
                let _index = request.next_u8();
                response.write_u8(Status::Error.into());
                response.write_u32(0);
            }
            CommandId::QueueCommands | CommandId::ExecuteCommands => {
                self.execute_commands(request, response, cx)
            }
            _ => {}
        }
    }

    fn info(&self, request: &mut RequestReader<'_>, response: &mut ResponseWriter<'_>) {
        let id = request.next_u8();
        let info = &self.config.info;
        let string = match InfoId::try_from(id) {
            Ok(InfoId::Vendor) => Some(&info.vendor),
            Ok(InfoId::Product) => Some(&info.product),
            Ok(InfoId::SerialNumber) => Some(&info.serial_number),
            Ok(InfoId::FirmwareVersion) | Ok(InfoId::ProductFirmwareVersion) => {
                Some(&info.firmware_version)
            }
            Ok(InfoId::DeviceVendor) => Some(info.device_vendor.as_ref().unwrap_or(&info.vendor)),
            Ok(InfoId::DeviceName) => Some(info.device_name.as_ref().unwrap_or(&info.product)),
            Ok(InfoId::BoardVendor) => Some(info.board_vendor.as_ref().unwrap_or(&info.vendor)),
            Ok(InfoId::BoardName) => Some(info.board_name.as_ref().unwrap_or(&info.product)),
            Ok(InfoId::Capabilities) => {
                let capabilities = self.config.capabilities | Capabilities::ATOMIC_COMMANDS;
                response.write_u8(1);
                response.write_u8(capabilities.bits());
                return;
            }
            Ok(InfoId::PacketSize) => {
                response.write_u8(2);
                response.write_u16(self.config.packet_size);
                return;
            }
            Ok(InfoId::PacketCount) => {
                response.write_u8(1);
                response.write_u8(self.config.packet_count);
                return;
            }
            Ok(InfoId::TimestampClock) | Ok(InfoId::SwoBufferSize) | Err(_) => None,
        };

        let Some(string) = string else {
            response.write_u8(0);
            return;
        };
        // Command and length byte share the packet with the string.
        let limit = usize::from(self.config.packet_size)
            .saturating_sub(2)
            .min(response.remaining().saturating_sub(1))
            .min(usize::from(u8::MAX));
        let bytes = &string.as_bytes()[..string.len().min(limit)];
        response.write_u8(bytes.len() as u8);
        response.write_slice(bytes);
    }

    /// Brings up the requested port and returns the port byte of the response.
    fn connect(&mut self, requested: u8, cx: ExecContext) -> DebugPort {
        let target = match Port::try_from(requested) {
            Ok(Port::Default) | Ok(Port::Swd) => Some(DebugPort::Swd),
            Ok(Port::Jtag) => Some(DebugPort::Jtag),
            Err(_) => None,
        };

        let result: Option<Result<DebugPort, SequenceError>> = target.map(|port| {
            let mut sequencer = self.sequencer();
            let bring_up = match port {
                DebugPort::Jtag => sequencer.setup_jtag(cx),
                _ => sequencer.setup_swd(cx),
            };
            bring_up.map(|()| port)
        });

        match result {
            Some(Ok(port)) => {
                log::info!("Connected {:?} port", port);
                self.state.debug_port = port;
                port
            }
            Some(Err(e)) => {
                log::warn!("Connect failed: {}", e);
                self.disable_port()
            }
            None => {
                log::warn!("Connect requested unknown port {}", requested);
                self.disable_port()
            }
        }
    }

    /// Records the DAP index byte leading every transfer command as the selected device.
    fn select_device(&mut self, request: &RequestReader<'_>) {
        if let Some(&index) = request.rest().first() {
            self.state.jtag.index = index;
        }
    }

    fn disable_port(&mut self) -> DebugPort {
        self.sequencer().port_off();
        self.state.debug_port = DebugPort::Disabled;
        DebugPort::Disabled
    }

    fn execute_commands(
        &mut self,
        request: &mut RequestReader<'_>,
        response: &mut ResponseWriter<'_>,
        cx: ExecContext,
    ) {
        let count = request.next_u8();
        response.write_u8(count);
        for _ in 0..count {
            let consumed;
            let produced;
            {
                let mut nested = response.sub_writer();
                consumed = self.dispatch(request.rest(), &mut nested, cx, true);
                produced = nested.position();
            }
            request.skip(consumed);
            response.advance(produced);
        }
    }

    fn sequencer(&mut self) -> Sequencer<'_, 'a> {
        Sequencer::new(
            &mut self.io,
            &self.sync,
            self.config.write_timeout,
            self.config.isr_write_mode,
        )
    }
}

/// Clock count of a sequence info byte, where 0 encodes 64.
fn sequence_clocks(count: u8) -> usize {
    match count {
        0 => 64,
        n => usize::from(n),
    }
}
