//! # CMSIS-DAP TCP Bridge
//!
//! Serves a [`dap_engine::engine::DapEngine`] over TCP so host tools and tests can talk to
//! the engine without USB hardware.
//!
//! ## Overview
//!
//! The wire format mirrors a HID transport: every request and every response is one packet
//! of exactly `packet_size` bytes, zero padded. Requests are processed strictly one after
//! another, so a response always belongs to the previous request.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use dap_bridge::server::{Builder, Server};
//! use dap_engine::{engine, sim::SimProbe};
//!
//! let mut probe = SimProbe::new();
//! let engine = engine::Builder::new().build(probe.io());
//! let mut server = Builder::new().packet_size(64).build(engine);
//! server.listen("127.0.0.1:2541")?;
//! ```
//!
//! ## Thread Model
//!
//! Clients are served one at a time. The engine state is reset for every new client.
pub mod server;
