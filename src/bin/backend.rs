// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Back-end server process: a randomly seeded 100-register bank behind
//! the gateway. When size modulation is enabled, this is the vantage
//! point where the hidden bits are recovered; they are reported on
//! shutdown.

use std::sync::{Arc, Mutex};

use covert_modbus_gateway::{
    config::Config,
    server::{BackendServer, RegisterBank},
    steg::SizeModulationReader,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env();

    let listener = tokio::net::TcpListener::bind(config.backend_addr).await?;
    log::info!("back-end server running on {}", config.backend_addr);

    let mut server = BackendServer::new(listener, RegisterBank::with_random_values());
    let reader = config.apply_size_modulation.then(|| {
        log::info!("observing frame lengths for the size-modulation channel");
        Arc::new(Mutex::new(SizeModulationReader::new()))
    });
    if let Some(reader) = &reader {
        server = server.with_reader(Arc::clone(reader));
    }

    let abort = async {
        tokio::signal::ctrl_c().await.ok();
        log::info!("back-end server shutting down");
    };
    server.serve_until(abort).await?;

    if let Some(reader) = reader {
        let reader = reader.lock().expect("reader lock");
        match reader.hidden_message() {
            Ok(message) => log::info!("recovered hidden message: {message:?}"),
            Err(_) => log::info!(
                "recovered {} hidden bits (incomplete message)",
                reader.message_bits().len()
            ),
        }
    }
    Ok(())
}
