//! Helpers for end-to-end tests: a bridge with simulated hardware on a background
//! thread and a packet client speaking to it.
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dap_bridge::server::{Config, Server};
use dap_engine::engine::Builder;
use dap_engine::sim::{FaultHandle, Faults, Recorder, SimProbe, SimTarget};
use dap_engine::transfer::RegisterTransfer;
use dap_protocol::codec::PacketCodec;
use dap_protocol::error::FrameError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

pub const PACKET_SIZE: usize = 64;

pub type Client = Framed<TcpStream, PacketCodec>;

/// A bridge running on a background thread.
pub struct SimBridge {
    pub addr: SocketAddr,
    pub recorder: Recorder,
    pub faults: FaultHandle,
}

/// Starts a bridge on an ephemeral port. With `with_target`, register transfers are
/// answered by a simulated target instead of the unimplemented handlers.
pub fn spawn_bridge(faults: Faults, with_target: bool) -> io::Result<SimBridge> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut probe = SimProbe::with_faults(faults);
        if tx.send((probe.recorder(), probe.fault_handle())).is_err() {
            return;
        }
        let config = Config {
            packet_size: PACKET_SIZE,
            read_write_timeout: Duration::from_secs(5),
        };
        let builder = Builder::new().product("Test Probe");
        if with_target {
            let engine = builder
                .transfer_engine(RegisterTransfer::new(SimTarget::default()))
                .build(probe.io());
            Server::new(engine, config).serve(listener);
        } else {
            Server::new(builder.build(probe.io()), config).serve(listener);
        }
    });

    let (recorder, faults) = rx.recv().map_err(io::Error::other)?;
    log::debug!("Test bridge listening on {}", addr);
    Ok(SimBridge {
        addr,
        recorder,
        faults,
    })
}

pub async fn connect(addr: SocketAddr) -> io::Result<Client> {
    let stream = TcpStream::connect(addr).await?;
    Ok(Framed::new(stream, PacketCodec::new(PACKET_SIZE)))
}

/// Sends one request packet and returns the response packet.
pub async fn exchange(client: &mut Client, request: &[u8]) -> Result<Vec<u8>, FrameError> {
    client.send(request).await?;
    match client.next().await {
        Some(packet) => Ok(packet?.to_vec()),
        None => Err(FrameError::Io(io::ErrorKind::UnexpectedEof.into())),
    }
}
