// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Traffic driver: sends interleaved random single-register reads and
//! writes through the gateway at one request per second. When the
//! inter-packet-times channel is enabled, this process is the vantage
//! point recovering the hidden bits from round-trip times.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rand::Rng as _;

use covert_modbus_gateway::{
    client::GatewayClient, config::Config, error::Error, server::REGISTER_COUNT,
    steg::InterPacketTimesReader,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env();
    let request_duration = Duration::from_secs(
        std::env::var("REQUEST_DURATION_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(600),
    );

    let mut client = GatewayClient::connect(config.bind_addr).await?;
    let reader = config.apply_inter_packet_times.then(|| {
        log::info!("observing round-trip times for the inter-packet-times channel");
        Arc::new(Mutex::new(InterPacketTimesReader::new()))
    });
    if let Some(reader) = &reader {
        client = client.with_reader(Arc::clone(reader));
    }

    let started = Instant::now();
    let mut counter = 0u64;
    while started.elapsed() < request_duration {
        let address = rand::thread_rng().gen_range(0..REGISTER_COUNT);
        let result = if counter % 2 == 0 {
            match client.read_holding_register(address).await {
                Ok(value) => {
                    log::info!("read register {address}: {value}");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        } else {
            let value = rand::thread_rng().gen_range(0..=1000);
            client.write_single_register(address, value).await.map(|()| {
                log::info!("wrote {value} to register {address}");
            })
        };
        match result {
            // Modbus exceptions are server answers, not session killers.
            Err(Error::Exception(code)) => log::warn!("server exception: {code}"),
            Err(err) => return Err(err.into()),
            Ok(()) => {}
        }
        counter += 1;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

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
