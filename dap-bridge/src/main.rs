//! # CMSIS-DAP Bridge
//!
//! Runs the CMSIS-DAP engine behind a TCP socket. Packets have the fixed size of a HID
//! report, so host-side tooling can be exercised against the engine without a USB stack.
//!
//! ## Overview
//!
//! The probe hardware is simulated. Line and pin faults can be injected from the command
//! line to observe how the engine handles failing bring-up sequences, and a simulated
//! target can be attached to answer register transfers.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use dap_bridge::server::{Config, Server};
use dap_engine::engine::Builder;
use dap_engine::sim::{Faults, SimProbe, SimTarget};
use dap_engine::transfer::RegisterTransfer;
use dap_protocol::MAX_RESPONSE_SIZE;
use env_logger::Env;

#[derive(Parser, Eq, PartialEq, Clone)]
enum DeviceImpl {
    Sim {
        #[arg(long, help = "Fail every clocked line configuration")]
        fail_line_config: bool,
        #[arg(long, help = "Fail every clocked line write")]
        fail_line_write: bool,
        #[arg(long, help = "Accept clocked line writes but never complete them")]
        stall_line_write: bool,
        #[arg(
            long,
            value_name = "MS",
            help = "Complete clocked line writes from another thread after a delay"
        )]
        line_write_delay: Option<u64>,
        #[arg(
            short,
            long,
            help = "Attach a simulated target that answers register transfers"
        )]
        target: bool,
    },
}

fn packet_size_range(s: &str) -> Result<u16, String> {
    clap_num::number_range(s, 64, MAX_RESPONSE_SIZE as u16)
}

#[derive(Parser)]
#[command(about = "CMSIS-DAP probe engine served over TCP", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "2541")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(long, default_value = "64", value_parser = packet_size_range)]
    packet_size: u16,

    #[arg(long, help = "Vendor string reported to the host")]
    vendor: Option<String>,

    #[arg(long, help = "Product string reported to the host")]
    product: Option<String>,

    #[arg(long, help = "Serial number reported to the host")]
    serial: Option<String>,

    #[clap(subcommand)]
    device: Option<DeviceImpl>,
}

fn engine_builder(args: &Args) -> Builder {
    let mut builder = Builder::new().packet_size(args.packet_size);
    if let Some(vendor) = &args.vendor {
        builder = builder.vendor(vendor.as_str());
    }
    if let Some(product) = &args.product {
        builder = builder.product(product.as_str());
    }
    if let Some(serial) = &args.serial {
        builder = builder.serial_number(serial.as_str());
    }
    builder
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting CMSIS-DAP bridge");

    let args = Args::parse();
    log::debug!(
        "Parsed arguments: ip={}, port={}, packet_size={}",
        args.ip,
        args.port,
        args.packet_size
    );

    let config = Config {
        packet_size: usize::from(args.packet_size),
        ..Config::default()
    };
    let builder = engine_builder(&args);

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    match args.device {
        Some(DeviceImpl::Sim {
            fail_line_config,
            fail_line_write,
            stall_line_write,
            line_write_delay,
            target,
        }) => {
            let mut probe = SimProbe::with_faults(Faults {
                fail_line_config,
                fail_line_write,
                stall_line_write,
                delay_line_write: line_write_delay.map(Duration::from_millis),
                fail_pin_config: None,
            });
            if target {
                log::info!("Initializing simulated probe with simulated target");
                let engine = builder
                    .transfer_engine(RegisterTransfer::new(SimTarget::default()))
                    .build(probe.io_with_led());
                Server::new(engine, config).listen(addr)?;
            } else {
                log::info!("Initializing simulated probe");
                let engine = builder.build(probe.io_with_led());
                Server::new(engine, config).listen(addr)?;
            }
        }
        None => {
            println!(
                "No probe backend selected. Use dap-bridge sim to serve the engine with simulated hardware."
            )
        }
    }
    Ok(())
}
