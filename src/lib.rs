// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [tokio](https://tokio.rs)-based Modbus/TCP gateway that transparently
//! proxies traffic between a client and a back-end server while applying
//! four interacting wire-level mechanisms:
//!
//! - response **caching** per register address with TTL and
//!   write-invalidation,
//! - transaction-ID **normalization** (±1 across the gateway boundary),
//! - duty-cycle **rate limiting**,
//! - two **covert channels** hiding an auxiliary bitstream in frame-length
//!   parity (S1) and inter-packet timing (T1), together with the decoders
//!   that recover the hidden bits from observed traffic.
//!
//! The deployment speaks exactly function codes 3 (read holding registers,
//! single register) and 6 (write single register).
//!
//! ```no_run
//! use covert_modbus_gateway::{config::Config, gateway::Gateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//!     let gateway = Gateway::new(listener, config);
//!     gateway.serve(|err| eprintln!("{err}")).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod limiter;
pub mod normalize;
pub mod server;
pub mod steg;

pub use self::error::{Error, FrameError, Result};
