use std::io;

/// Errors that may occur when moving packets over a stream transport.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Packet too large! Maximum is {max}, but got {got}")]
    PacketTooLarge { max: usize, got: usize },
    #[error("Received an empty packet")]
    EmptyPacket,
}
