use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Largest response the engine ever produces for one request.
pub const MAX_RESPONSE_SIZE: usize = 512;
/// Packet size of full-speed HID transports.
pub const DEFAULT_PACKET_SIZE: u16 = 64;
/// Number of packets the probe can buffer.
pub const DEFAULT_PACKET_COUNT: u8 = 1;

/// First and last identifier of the vendor command range.
pub const VENDOR_COMMAND_FIRST: u8 = 0x80;
pub const VENDOR_COMMAND_LAST: u8 = 0x9F;

/// Command identifiers, carried in the first byte of every request.
///
/// Vendor commands (0x80..=0x9F) are not listed here, see [`is_vendor_command`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CommandId {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    TransferAbort = 0x07,
    WriteAbort = 0x08,
    Delay = 0x09,
    ResetTarget = 0x0A,

    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
    JtagSequence = 0x14,
    JtagConfigure = 0x15,
    JtagIdcode = 0x16,

    SwoTransport = 0x17,
    SwoMode = 0x18,
    SwoBaudrate = 0x19,
    SwoControl = 0x1A,
    SwoStatus = 0x1B,
    SwoData = 0x1C,
    SwdSequence = 0x1D,
    SwoExtendedStatus = 0x1E,

    UartTransport = 0x1F,
    UartConfigure = 0x20,
    UartTransfer = 0x21,
    UartControl = 0x22,

    QueueCommands = 0x7E,
    ExecuteCommands = 0x7F,
}

impl CommandId {
    /// The single byte answered for unknown or unsupported commands.
    /// It is never accepted as an inbound identifier.
    pub const INVALID: u8 = 0xFF;

    /// Decodes a command byte. Vendor and reserved bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<CommandId> {
        CommandId::try_from(byte).ok()
    }
}

/// Returns true for identifiers in the vendor range 0x80..=0x9F.
pub fn is_vendor_command(byte: u8) -> bool {
    (VENDOR_COMMAND_FIRST..=VENDOR_COMMAND_LAST).contains(&byte)
}

/// Identifiers of the `Info` command.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum InfoId {
    Vendor = 0x01,
    Product = 0x02,
    SerialNumber = 0x03,
    FirmwareVersion = 0x04,
    DeviceVendor = 0x05,
    DeviceName = 0x06,
    BoardVendor = 0x07,
    BoardName = 0x08,
    ProductFirmwareVersion = 0x09,
    Capabilities = 0xF0,
    TimestampClock = 0xF1,
    SwoBufferSize = 0xFD,
    PacketCount = 0xFE,
    PacketSize = 0xFF,
}

/// Generic command status.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0xFF,
}

/// Port byte of the `Connect` command and its response.
///
/// `Default` on the request side and the failure sentinel on the response side
/// share the value 0.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Port {
    Default = 0x00,
    Swd = 0x01,
    Jtag = 0x02,
}

impl Port {
    /// Response value reported when no port could be brought up.
    pub const DISABLED: u8 = 0x00;
}

/// Status kinds of the `HostStatus` command.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum HostStatusKind {
    Connect = 0x00,
    Running = 0x01,
}

bitflags! {
    /// Capability bits reported by `Info(Capabilities)`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Capabilities: u8 {
        const SWD = 1 << 0;
        const JTAG = 1 << 1;
        const SWO_UART = 1 << 2;
        const SWO_MANCHESTER = 1 << 3;
        const ATOMIC_COMMANDS = 1 << 4;
        const TEST_DOMAIN_TIMER = 1 << 5;
        const SWO_STREAMING = 1 << 6;
        const UART_COMM = 1 << 7;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::SWD | Capabilities::JTAG
    }
}

bitflags! {
    /// Request byte of a single register transfer.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TransferRequest: u8 {
        const AP_N_DP = 1 << 0;
        const R_N_W = 1 << 1;
        const A2 = 1 << 2;
        const A3 = 1 << 3;
        const MATCH_VALUE = 1 << 4;
        const MATCH_MASK = 1 << 5;
        const TIMESTAMP = 1 << 7;
    }
}

impl TransferRequest {
    pub fn is_ap(&self) -> bool {
        self.contains(TransferRequest::AP_N_DP)
    }

    pub fn is_read(&self) -> bool {
        self.contains(TransferRequest::R_N_W)
    }

    /// Register address (A3:A2) as a byte offset.
    pub fn register(&self) -> u8 {
        self.bits() & 0x0C
    }
}

bitflags! {
    /// Status byte of `Transfer`/`TransferBlock` responses.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TransferStatus: u8 {
        const OK = 1 << 0;
        const WAIT = 1 << 1;
        const FAULT = 1 << 2;
        const ERROR = 1 << 3;
        const MISMATCH = 1 << 4;
        const NO_TARGET = 1 << 7;
    }
}

bitflags! {
    /// Pin bits of the `SWJ_Pins` command.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SwjPins: u8 {
        const SWCLK_TCK = 1 << 0;
        const SWDIO_TMS = 1 << 1;
        const TDI = 1 << 2;
        const TDO = 1 << 3;
        const N_TRST = 1 << 5;
        const N_RESET = 1 << 7;
    }
}

/// Clock count field of an SWD sequence info byte, 0 means 64.
pub const SWD_SEQUENCE_CLK: u8 = 0x3F;
/// Set when an SWD sequence samples SWDIO instead of driving it.
pub const SWD_SEQUENCE_DIN: u8 = 1 << 7;
/// Clock count field of a JTAG sequence info byte, 0 means 64.
pub const JTAG_SEQUENCE_TCK: u8 = 0x3F;

/// Debug port register offsets.
pub mod dp {
    pub const IDCODE: u8 = 0x00;
    pub const ABORT: u8 = 0x00;
    pub const CTRL_STAT: u8 = 0x04;
    pub const WCR: u8 = 0x04;
    pub const SELECT: u8 = 0x08;
    pub const RDBUFF: u8 = 0x0C;
}

/// Number of bytes needed to carry `bits` bits.
pub fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_range() {
        assert!(is_vendor_command(0x80));
        assert!(is_vendor_command(0x9F));
        assert!(!is_vendor_command(0x7F));
        assert!(!is_vendor_command(0xA0));
    }

    #[test]
    fn invalid_sentinel_is_never_decoded() {
        assert!(CommandId::from_byte(CommandId::INVALID).is_none());
        assert!(!is_vendor_command(CommandId::INVALID));
    }

    #[test]
    fn command_bytes_decode() {
        assert_eq!(CommandId::from_byte(0x02), Some(CommandId::Connect));
        assert_eq!(CommandId::from_byte(0x1D), Some(CommandId::SwdSequence));
        assert_eq!(CommandId::from_byte(0x0B), None);
        assert_eq!(u8::from(CommandId::ExecuteCommands), 0x7F);
    }

    #[test]
    fn transfer_request_fields() {
        let req = TransferRequest::from_bits_retain(0b0000_1111);
        assert!(req.is_ap());
        assert!(req.is_read());
        assert_eq!(req.register(), dp::RDBUFF);
        assert!(!TransferRequest::A2.is_ap());
    }

    #[test]
    fn default_capabilities() {
        assert_eq!(Capabilities::default().bits(), 0b11);
    }
}
