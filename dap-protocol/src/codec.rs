//! Bounded request reading, bounded response writing and packet framing.
use std::io::{self, Read, Write};

use crate::error::FrameError;

/// Cursor over a request payload.
///
/// Reads past the end of the buffer yield zero bytes instead of failing,
/// matching the fixed-size report semantics of the USB transports.
/// [`RequestReader::is_truncated`] tells whether that happened.
#[derive(Debug, Clone)]
pub struct RequestReader<'a> {
    buf: &'a [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> RequestReader<'a> {
    pub fn new(buf: &'a [u8]) -> RequestReader<'a> {
        RequestReader {
            buf,
            pos: 0,
            truncated: false,
        }
    }

    /// Number of bytes consumed so far, including bytes read past the end.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.buf.get(self.pos..).unwrap_or_default()
    }

    pub fn next_u8(&mut self) -> u8 {
        let mut b = [0u8; 1];
        self.fill(&mut b);
        b[0]
    }

    pub fn next_u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.fill(&mut b);
        u16::from_le_bytes(b)
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        self.fill(&mut b);
        u32::from_le_bytes(b)
    }

    /// Consumes `len` bytes and returns the part of them actually present.
    pub fn take(&mut self, len: usize) -> &'a [u8] {
        let rest = self.rest();
        let available = rest.len().min(len);
        if available < len {
            self.truncated = true;
        }
        self.pos += len;
        &rest[..available]
    }

    pub fn skip(&mut self, len: usize) {
        let _ = self.take(len);
    }

    fn fill(&mut self, out: &mut [u8]) {
        let src = self.take(out.len());
        out[..src.len()].copy_from_slice(src);
    }
}

/// Writer over a response buffer that never writes past its end.
///
/// Writes that do not fit are dropped and flagged via
/// [`ResponseWriter::overflowed`]; the position never exceeds the capacity.
#[derive(Debug)]
pub struct ResponseWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: bool,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> ResponseWriter<'a> {
        ResponseWriter {
            buf,
            pos: 0,
            overflow: false,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Space left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_slice(&value.to_le_bytes());
    }

    /// Writes all of `data` or nothing.
    pub fn write_slice(&mut self, data: &[u8]) {
        if data.len() > self.remaining() {
            self.overflow = true;
            return;
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    /// Overwrites an already written byte.
    pub fn write_u8_at(&mut self, index: usize, value: u8) {
        if index < self.pos {
            self.buf[index] = value;
        }
    }

    /// Overwrites an already written little-endian u16.
    pub fn write_u16_at(&mut self, index: usize, value: u16) {
        if index + 2 <= self.pos {
            self.buf[index..index + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn advance(&mut self, len: usize) {
        let len = len.min(self.remaining());
        self.pos += len;
    }

    /// Splits off a writer over the unwritten tail, used for nested commands.
    /// Bytes written through it are accounted for with [`ResponseWriter::advance`].
    pub fn sub_writer(&mut self) -> ResponseWriter<'_> {
        ResponseWriter::new(&mut self.buf[self.pos..])
    }
}

/// Reads one fixed-size packet from a stream.
///
/// `buf` must be exactly one packet long.
pub fn read_packet(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), FrameError> {
    if buf.is_empty() {
        return Err(FrameError::EmptyPacket);
    }
    reader.read_exact(buf)?;
    Ok(())
}

/// Writes `data` as one packet of `packet_size` bytes, padding with zeros.
pub fn write_packet(
    writer: &mut impl Write,
    data: &[u8],
    packet_size: usize,
) -> Result<(), FrameError> {
    if data.len() > packet_size {
        return Err(FrameError::PacketTooLarge {
            max: packet_size,
            got: data.len(),
        });
    }
    writer.write_all(data)?;
    let padding = packet_size - data.len();
    if padding > 0 {
        io::copy(&mut io::repeat(0).take(padding as u64), writer)?;
    }
    Ok(())
}

#[cfg(feature = "tokio")]
pub use self::tokio_codec::PacketCodec;

#[cfg(feature = "tokio")]
mod tokio_codec {
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::error::FrameError;

    /// Frames a byte stream into fixed-size packets.
    #[derive(Debug, Clone, Copy)]
    pub struct PacketCodec {
        packet_size: usize,
    }

    impl PacketCodec {
        pub fn new(packet_size: usize) -> PacketCodec {
            PacketCodec { packet_size }
        }

        pub fn packet_size(&self) -> usize {
            self.packet_size
        }
    }

    impl Decoder for PacketCodec {
        type Item = BytesMut;
        type Error = FrameError;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
            if self.packet_size == 0 {
                return Err(FrameError::EmptyPacket);
            }
            if src.len() < self.packet_size {
                src.reserve(self.packet_size - src.len());
                return Ok(None);
            }
            Ok(Some(src.split_to(self.packet_size)))
        }
    }

    impl Encoder<&[u8]> for PacketCodec {
        type Error = FrameError;

        fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
            if item.len() > self.packet_size {
                return Err(FrameError::PacketTooLarge {
                    max: self.packet_size,
                    got: item.len(),
                });
            }
            dst.reserve(self.packet_size);
            dst.put_slice(item);
            dst.put_bytes(0, self.packet_size - item.len());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn waits_for_full_packet() {
            let mut codec = PacketCodec::new(4);
            let mut src = BytesMut::from(&[1u8, 2, 3][..]);
            assert!(codec.decode(&mut src).unwrap().is_none());
            src.put_slice(&[4, 5]);
            let packet = codec.decode(&mut src).unwrap().unwrap();
            assert_eq!(&packet[..], &[1, 2, 3, 4]);
            assert_eq!(&src[..], &[5]);
        }

        #[test]
        fn pads_responses() {
            let mut codec = PacketCodec::new(4);
            let mut dst = BytesMut::new();
            codec.encode(&[0x03, 0x00][..], &mut dst).unwrap();
            assert_eq!(&dst[..], &[0x03, 0x00, 0x00, 0x00]);
        }

        #[test]
        fn rejects_oversized_responses() {
            let mut codec = PacketCodec::new(2);
            let mut dst = BytesMut::new();
            assert!(matches!(
                codec.encode(&[1u8, 2, 3][..], &mut dst),
                Err(FrameError::PacketTooLarge { max: 2, got: 3 })
            ));
        }
    }
}
