// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway configuration.
//!
//! Defaults match the reference deployment; every knob can be overridden
//! through the environment (the processes are configured via a compose
//! file in that deployment).

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

/// Default hidden message for the size-modulation channel.
pub const DEFAULT_S1_MESSAGE: &str =
    "this steganography message will be embedded with S1 method";

/// Default hidden message for the inter-packet-times channel.
pub const DEFAULT_T1_MESSAGE: &str =
    "this steganography message will be embedded with T1 method";

/// Runtime configuration for the gateway and its collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway listens on.
    pub bind_addr: SocketAddr,
    /// Address of the back-end Modbus server.
    pub backend_addr: SocketAddr,
    /// Listen backlog; the reference deployment serves one client.
    pub max_clients: u32,
    /// Soft read timeout on live sockets and the accept loop.
    pub socket_timeout: Duration,
    /// Cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Idle phase length of the rate-limit duty cycle.
    pub delay_interval: Duration,
    /// Active phase length of the rate-limit duty cycle.
    pub delay_duration: Duration,
    /// Per-request sleep while the rate limiter is active.
    pub sleep_duration: Duration,
    /// Enable the size-modulation channel.
    pub apply_size_modulation: bool,
    /// Enable the inter-packet-times channel.
    pub apply_inter_packet_times: bool,
    /// Hidden message for size modulation.
    pub s1_message: String,
    /// Hidden message for inter-packet times.
    pub t1_message: String,
    /// Padding byte appended by size modulation.
    pub dummy_byte: u8,
    /// Delay carrying one inter-packet-times bit.
    pub embed_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5500".parse().expect("valid address"),
            backend_addr: "127.0.0.1:5502".parse().expect("valid address"),
            max_clients: 1,
            socket_timeout: Duration::from_millis(1100),
            cache_ttl: Duration::from_secs(30),
            delay_interval: Duration::from_secs(30),
            delay_duration: Duration::from_secs(10),
            sleep_duration: Duration::from_secs(1),
            apply_size_modulation: false,
            apply_inter_packet_times: false,
            s1_message: DEFAULT_S1_MESSAGE.to_string(),
            t1_message: DEFAULT_T1_MESSAGE.to_string(),
            dummy_byte: 0,
            embed_delay: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Defaults overridden by whatever environment variables are set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        read_env("GATEWAY_BIND_ADDR", &mut config.bind_addr);
        read_env("BACKEND_ADDR", &mut config.backend_addr);
        read_env("MAX_CLIENTS", &mut config.max_clients);
        read_env_secs("CACHE_TTL_SECS", &mut config.cache_ttl);
        read_env_secs("DELAY_INTERVAL_SECS", &mut config.delay_interval);
        read_env_secs("DELAY_DURATION_SECS", &mut config.delay_duration);
        read_env_secs("SLEEP_DURATION_SECS", &mut config.sleep_duration);
        read_env_millis("SOCKET_TIMEOUT_MS", &mut config.socket_timeout);
        read_env_flag("APPLY_SIZE_MODULATION", &mut config.apply_size_modulation);
        read_env_flag(
            "APPLY_INTER_PACKET_TIMES",
            &mut config.apply_inter_packet_times,
        );
        read_env("S1_MESSAGE", &mut config.s1_message);
        read_env("T1_MESSAGE", &mut config.t1_message);
        read_env("DUMMY_BYTE", &mut config.dummy_byte);
        config
    }
}

fn read_env<T: FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = env::var(name) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("ignoring unparsable {name}={raw}"),
        }
    }
}

fn read_env_secs(name: &str, slot: &mut Duration) {
    let mut secs = slot.as_secs();
    read_env(name, &mut secs);
    *slot = Duration::from_secs(secs);
}

fn read_env_millis(name: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    read_env(name, &mut millis);
    *slot = Duration::from_millis(millis);
}

fn read_env_flag(name: &str, slot: &mut bool) {
    // Presence of any non-empty value enables the flag, mirroring the
    // truthiness of the reference deployment's getenv checks.
    if let Ok(raw) = env::var(name) {
        *slot = !raw.is_empty() && raw != "0" && !raw.eq_ignore_ascii_case("false");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = Config::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.delay_interval, Duration::from_secs(30));
        assert_eq!(config.delay_duration, Duration::from_secs(10));
        assert_eq!(config.sleep_duration, Duration::from_secs(1));
        assert_eq!(config.socket_timeout, Duration::from_millis(1100));
        assert_eq!(config.embed_delay, Duration::from_millis(250));
        assert_eq!(config.max_clients, 1);
        assert!(!config.apply_size_modulation);
        assert!(!config.apply_inter_packet_times);
    }
}
