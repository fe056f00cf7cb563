// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The gateway itself: accept loop and per-connection proxy pipeline.
//!
//! One task runs per accepted client connection. Each task owns its own
//! [`Cache`], [`RateLimiter`] and covert-channel encoders; nothing is
//! shared between connections. A session ends on the first transport or
//! framing error, tearing down both sockets; the next client connection
//! starts over with fresh per-connection state.

use std::{future::Future, io, net::SocketAddr, time::Instant};

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::timeout,
};
use tokio_util::codec::Framed;

use crate::{
    cache::Cache,
    codec::{decode_request_pdu, decode_response_pdu, FrameCodec},
    config::Config,
    error::Error,
    frame::{Frame, Pdu},
    limiter::RateLimiter,
    normalize::{normalize, Direction},
    steg::{InterPacketTimes, SizeModulation},
};

/// How a server stopped serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// The accept loop ended on its own (listener failure).
    Finished,
    /// The abort signal fired; connection tasks were cancelled.
    Aborted,
}

/// Modbus/TCP gateway server.
#[derive(Debug)]
pub struct Gateway {
    listener: TcpListener,
    config: Config,
}

impl Gateway {
    #[must_use]
    pub fn new(listener: TcpListener, config: Config) -> Self {
        Self { listener, config }
    }

    /// The locally bound listener address.
    ///
    /// # Errors
    ///
    /// Fails if the underlying socket has gone away.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and proxy client connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Listener-level I/O errors; per-session errors are reported through
    /// `on_process_error` and end only that session.
    pub async fn serve<F>(&self, on_process_error: F) -> io::Result<Terminated>
    where
        F: Fn(Error) + Clone + Send + Sync + 'static,
    {
        self.serve_until(on_process_error, std::future::pending())
            .await
    }

    /// Accept and proxy client connections until `abort_signal` resolves,
    /// then cancel all in-flight sessions.
    ///
    /// # Errors
    ///
    /// Listener-level I/O errors.
    pub async fn serve_until<F, X>(
        &self,
        on_process_error: F,
        abort_signal: X,
    ) -> io::Result<Terminated>
    where
        F: Fn(Error) + Clone + Send + Sync + 'static,
        X: Future<Output = ()> + Send,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(abort_signal);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    if sessions.len() >= self.config.max_clients as usize {
                        log::warn!(
                            "refusing connection from {peer_addr}: {} session(s) already active",
                            sessions.len()
                        );
                        drop(stream);
                        continue;
                    }
                    log::info!("connection from client {peer_addr}");
                    let config = self.config.clone();
                    let on_process_error = on_process_error.clone();
                    sessions.spawn(async move {
                        if let Err(err) = process(stream, config).await {
                            log::error!("session with {peer_addr} terminated: {err}");
                            on_process_error(err);
                        }
                    });
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    // Reap finished sessions; a panicked session must not
                    // take the accept loop down with it.
                    if let Err(err) = finished {
                        if !err.is_cancelled() {
                            log::error!("session task failed: {err}");
                        }
                    }
                }
                () = &mut abort_signal => {
                    log::info!("shutdown signal received, closing {} session(s)", sessions.len());
                    sessions.abort_all();
                    while sessions.join_next().await.is_some() {}
                    return Ok(Terminated::Aborted);
                }
            }
        }
    }
}

/// Per-connection state for the covert channels.
struct Channels {
    size_modulation: Option<SizeModulation>,
    inter_packet_times: Option<InterPacketTimes>,
}

impl Channels {
    fn from_config(config: &Config) -> Result<Self, Error> {
        let size_modulation = if config.apply_size_modulation {
            log::info!("applying size modulation");
            Some(SizeModulation::from_message(
                &config.s1_message,
                config.dummy_byte,
            )?)
        } else {
            None
        };
        let inter_packet_times = if config.apply_inter_packet_times {
            log::info!("applying inter-packet times");
            Some(InterPacketTimes::from_message(
                &config.t1_message,
                config.embed_delay,
            )?)
        } else {
            None
        };
        Ok(Self {
            size_modulation,
            inter_packet_times,
        })
    }
}

/// Proxy a single client connection until error or disconnect.
async fn process(client_stream: TcpStream, config: Config) -> Result<(), Error> {
    // A session without its back end is useless: connect failure is fatal
    // before the first request.
    let backend_stream = TcpStream::connect(config.backend_addr).await.map_err(|err| {
        log::error!("connecting to back end {} failed: {err}", config.backend_addr);
        Error::Io(err)
    })?;

    let mut client = Framed::new(client_stream, FrameCodec);
    let mut backend = Framed::new(backend_stream, FrameCodec);

    let mut cache = Cache::new(config.cache_ttl);
    let mut limiter = RateLimiter::new(config.delay_interval, config.delay_duration);
    let mut channels = Channels::from_config(&config)?;

    loop {
        // A read timeout is a soft condition: re-poll. Shutdown reaches
        // this task as cancellation, not through a flag.
        let request = match timeout(config.socket_timeout, client.next()).await {
            Err(_elapsed) => continue,
            Ok(None) => {
                log::info!("client disconnected");
                return Ok(());
            }
            Ok(Some(request)) => request?,
        };
        let received_at = Instant::now();

        let request_pdu = decode_request_pdu(&request)?;
        let mut read_address = None;
        match request_pdu {
            Pdu::ReadHoldingRegisters { address, .. } => {
                if let Some(response) = cache.cached_response(&request) {
                    client.send(response).await?;
                    log::info!(
                        "round-trip time at gateway (cache): {:?}",
                        received_at.elapsed()
                    );
                    continue;
                }
                read_address = Some(address);
            }
            Pdu::WriteSingleRegister { address, .. } => {
                // An overwritten register must not be served stale.
                cache.invalidate(address);
            }
            Pdu::ReadHoldingRegistersResponse { .. } | Pdu::Exception { .. } => {
                return Err(Error::UnexpectedResponse("response PDU in request stream"));
            }
        }

        let request = match &mut channels.size_modulation {
            Some(steg) if !steg.exhausted() => {
                let embedded = steg.apply(&request, true);
                // The bit is consumed once per processed request, matching
                // or not; see SizeModulation::apply.
                steg.advance();
                embedded
            }
            _ => request,
        };

        if let Some(steg) = &mut channels.inter_packet_times {
            if !steg.exhausted() {
                steg.apply_delay(request.function_code()).await;
            }
        }

        if limiter.check_in_delay_period() {
            tokio::time::sleep(config.sleep_duration).await;
        }

        backend.send(normalize(request, Direction::ClientToServer)).await?;
        log::debug!("request forwarded to back end");

        let response = loop {
            match timeout(config.socket_timeout, backend.next()).await {
                Err(_elapsed) => continue,
                Ok(None) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "back end closed the connection",
                    )))
                }
                Ok(Some(response)) => break response?,
            }
        };

        // A read response fills the cache; exception responses are
        // forwarded like any other response and cache nothing.
        if let Some(address) = read_address {
            if let Pdu::ReadHoldingRegistersResponse { value } = decode_response_pdu(&response)? {
                cache.insert(address, value);
            }
        } else {
            // Decode for the trace record only.
            decode_response_pdu(&response)?;
        }

        client
            .send(normalize(response, Direction::ServerToClient))
            .await?;
        log::info!(
            "round-trip time at gateway (back end): {:?}",
            received_at.elapsed()
        );
    }
}
