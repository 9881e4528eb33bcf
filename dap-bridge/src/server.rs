use std::{
    io::{ErrorKind, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use dap_engine::{ExecContext, engine::DapEngine, transfer::TransferEngine};
use dap_protocol::codec::{read_packet, write_packet};
use dap_protocol::error::FrameError;
use dap_protocol::{DEFAULT_PACKET_SIZE, MAX_RESPONSE_SIZE};

#[derive(Debug, Clone)]
pub struct Config {
    pub packet_size: usize,
    pub read_write_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: usize::from(DEFAULT_PACKET_SIZE),
            read_write_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Server<'a, T: TransferEngine> {
    engine: DapEngine<'a, T>,
    config: Config,
    response: Vec<u8>,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use dap_bridge::server::Builder;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .packet_size(512)
///     .rw_timeout(Duration::from_secs(20))
///     .build(engine);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the size of every packet exchanged with the client.
    pub fn packet_size(mut self, size: usize) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Build and return the server
    pub fn build<T: TransferEngine>(self, engine: DapEngine<'_, T>) -> Server<'_, T> {
        Server::new(engine, self.config)
    }
}

impl<'a, T: TransferEngine> Server<'a, T> {
    pub fn new(engine: DapEngine<'a, T>, config: Config) -> Server<'a, T> {
        if usize::from(engine.config().packet_size) != config.packet_size {
            log::warn!(
                "Engine reports packet size {} but the server frames {} byte packets",
                engine.config().packet_size,
                config.packet_size
            );
        }
        Server {
            engine,
            config,
            response: vec![0u8; MAX_RESPONSE_SIZE],
        }
    }

    pub fn engine(&self) -> &DapEngine<'a, T> {
        &self.engine
    }

    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr)?;
        log::info!("Server listening for connections");
        self.serve(listener);
        Ok(())
    }

    /// Accepts clients on an already bound listener, one at a time.
    pub fn serve(&mut self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(tcp) => {
                    let peer_addr = tcp.peer_addr().ok();
                    if let Some(addr) = peer_addr {
                        log::info!("New client connection from {}", addr);
                    }
                    self.engine.reset();
                    if let Err(e) = self.handle_client(tcp) {
                        log::error!("Client error: {}", e);
                    }
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    fn handle_client(&mut self, mut tcp: TcpStream) -> Result<(), FrameError> {
        tcp.set_read_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_write_timeout(Some(self.config.read_write_timeout))?;
        tcp.set_nodelay(true)?;

        let mut packet = vec![0u8; self.config.packet_size];
        loop {
            match read_packet(&mut tcp, &mut packet) {
                Ok(()) => self.process_packet(&packet, &mut tcp)?,
                Err(FrameError::Io(err))
                    if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock =>
                {
                    log::error!("Client read timeout, closing connection");
                    break;
                }
                Err(FrameError::Io(err))
                    if err.kind() == ErrorKind::UnexpectedEof
                        || err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset =>
                {
                    log::info!("Client disconnected");
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Runs one request packet through the engine and writes the response packet.
    pub fn process_packet(
        &mut self,
        packet: &[u8],
        out: &mut impl Write,
    ) -> Result<(), FrameError> {
        let len = self
            .engine
            .execute_command(packet, &mut self.response, ExecContext::Thread);
        let mut response = &self.response[..len];
        if response.len() > self.config.packet_size {
            log::warn!(
                "Response of {} bytes truncated to packet size {}",
                response.len(),
                self.config.packet_size
            );
            response = &response[..self.config.packet_size];
        }
        write_packet(out, response, self.config.packet_size)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dap_engine::engine;
    use dap_engine::sim::SimProbe;
    use pretty_assertions::assert_eq;

    #[test]
    fn responses_are_padded_packets() {
        let mut probe = SimProbe::new();
        let mut server = Builder::new()
            .packet_size(64)
            .build(engine::Builder::new().build(probe.io()));

        let mut request = [0u8; 64];
        request[..2].copy_from_slice(&[0x02, 0x01]);
        let mut out = Vec::new();
        server.process_packet(&request, &mut out).unwrap();

        assert_eq!(out.len(), 64);
        assert_eq!(&out[..2], &[0x02, 0x01]);
        assert!(out[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_responses_are_truncated() {
        let mut probe = SimProbe::new();
        let mut server = Builder::new()
            .packet_size(8)
            .build(engine::Builder::new().vendor("A long vendor name").build(probe.io()));

        let mut out = Vec::new();
        server
            .process_packet(&[0x00, 0x01, 0, 0, 0, 0, 0, 0], &mut out)
            .unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..4], &[0x00, 18, b'A', b' ']);
    }
}
