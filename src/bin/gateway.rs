// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway process: proxies one client to the back-end server, applying
//! caching, rate limiting, normalization and the enabled covert channels.

use covert_modbus_gateway::{config::Config, gateway::Gateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env();

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!(
        "gateway running on {}, forwarding to back end at {}",
        config.bind_addr,
        config.backend_addr
    );
    let gateway = Gateway::new(listener, config);

    let abort = async {
        tokio::signal::ctrl_c().await.ok();
        log::info!("gateway shutting down");
    };
    let terminated = gateway
        .serve_until(|err| log::error!("session error: {err}"), abort)
        .await?;
    log::info!("gateway stopped: {terminated:?}");
    Ok(())
}
