//! # CMSIS-DAP Protocol Library
//!
//! This crate provides the wire vocabulary of the [CMSIS-DAP](https://arm-software.github.io/CMSIS_5/DAP/html/index.html)
//! command protocol spoken between a host debugger and a debug probe.
//!
//! ## Overview
//!
//! Every request starts with a one-byte command identifier followed by a command specific
//! payload. Every response echoes the identifier first, except for unknown commands which
//! are answered with the single byte [`CommandId::INVALID`].
//!
//! This library provides:
//!
//! - Command, info, port and status identifiers ([`CommandId`], [`InfoId`], [`Port`], [`Status`])
//! - Bit sets for transfer requests, transfer status, capabilities and SWJ pins
//! - A bounded [`codec::RequestReader`] and [`codec::ResponseWriter`] for handler code
//! - Fixed-size packet framing for stream transports
//!
//! ## Basic Usage
//!
//! ### Decoding a Request
//!
//! ```
//! use dap_protocol::{CommandId, codec::RequestReader};
//!
//! let request = [0x04, 0x00, 0x64, 0x00, 0x00, 0x00];
//! assert_eq!(CommandId::from_byte(request[0]), Some(CommandId::TransferConfigure));
//!
//! let mut reader = RequestReader::new(&request[1..]);
//! let idle_cycles = reader.next_u8();
//! let retry_count = reader.next_u16();
//! assert_eq!((idle_cycles, retry_count), (0, 100));
//! ```
//!
//! ### Writing a Response
//!
//! ```
//! use dap_protocol::{CommandId, Status, codec::ResponseWriter};
//!
//! let mut buffer = [0u8; 64];
//! let mut writer = ResponseWriter::new(&mut buffer);
//! writer.write_u8(CommandId::Disconnect.into());
//! writer.write_u8(Status::Ok.into());
//! assert_eq!(writer.written(), &[0x03, 0x00]);
//! ```
//!
//! ### Framing Packets
//!
//! Stream transports carry fixed-size packets, zero padded like HID reports:
//!
//! ```
//! use dap_protocol::codec::write_packet;
//!
//! let mut out = Vec::new();
//! write_packet(&mut out, &[0x03, 0x00], 4).expect("Writing to vector shouldn't fail");
//! assert_eq!(out, [0x03, 0x00, 0x00, 0x00]);
//! ```
//!
//! With the `tokio` feature, [`codec::PacketCodec`] provides the same framing as a
//! `tokio_util` codec.
//!
//! ## Error Handling
//!
//! Framing errors are reported as [`error::FrameError`]. Request decoding itself never fails:
//! reads past the end of a request yield zeros and are flagged on the reader.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
