// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Back-end Modbus/TCP server with a holding-register bank.
//!
//! Serves the two function codes of this deployment against an in-memory
//! register bank and optionally feeds every received MBAP length to a
//! shared [`SizeModulationReader`] — the vantage point where the
//! size-modulation channel is recovered.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures_util::{SinkExt as _, StreamExt as _};
use rand::Rng as _;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::codec::Framed;

use crate::{
    codec::{decode_request_pdu, encode_pdu, FrameCodec},
    error::Error,
    frame::{ExceptionCode, Frame, Pdu},
    gateway::Terminated,
    steg::SizeModulationReader,
};

/// Number of holding registers in the bank.
pub const REGISTER_COUNT: u16 = 100;

/// In-memory holding-register store.
#[derive(Debug)]
pub struct RegisterBank {
    registers: Vec<u16>,
}

impl RegisterBank {
    /// A bank of [`REGISTER_COUNT`] registers, all zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registers: vec![0; REGISTER_COUNT as usize],
        }
    }

    /// A bank seeded with random values in `[0, 1000]`, as the reference
    /// deployment initializes it.
    #[must_use]
    pub fn with_random_values() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            registers: (0..REGISTER_COUNT).map(|_| rng.gen_range(0..=1000)).collect(),
        }
    }

    #[must_use]
    pub fn read(&self, address: u16) -> Option<u16> {
        self.registers.get(address as usize).copied()
    }

    /// Returns false when the address is out of range.
    pub fn write(&mut self, address: u16, value: u16) -> bool {
        match self.registers.get_mut(address as usize) {
            Some(register) => {
                *register = value;
                true
            }
            None => false,
        }
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Back-end server.
#[derive(Debug)]
pub struct BackendServer {
    listener: TcpListener,
    bank: Arc<Mutex<RegisterBank>>,
    /// Shared reader fed one length per received request, when the
    /// size-modulation vantage point is in-process.
    reader: Option<Arc<Mutex<SizeModulationReader>>>,
}

impl BackendServer {
    #[must_use]
    pub fn new(listener: TcpListener, bank: RegisterBank) -> Self {
        Self {
            listener,
            bank: Arc::new(Mutex::new(bank)),
            reader: None,
        }
    }

    /// Attach the size-modulation vantage point.
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<Mutex<SizeModulationReader>>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// The locally bound listener address.
    ///
    /// # Errors
    ///
    /// Fails if the underlying socket has gone away.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Listener-level I/O errors.
    pub async fn serve(&self) -> io::Result<Terminated> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `abort_signal` resolves.
    ///
    /// # Errors
    ///
    /// Listener-level I/O errors.
    pub async fn serve_until<X>(&self, abort_signal: X) -> io::Result<Terminated>
    where
        X: Future<Output = ()> + Send,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(abort_signal);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    log::info!("back end: connection from {peer_addr}");
                    let bank = Arc::clone(&self.bank);
                    let reader = self.reader.clone();
                    sessions.spawn(async move {
                        if let Err(err) = serve_connection(stream, bank, reader).await {
                            log::error!("back end: session with {peer_addr} ended: {err}");
                        }
                    });
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = finished {
                        if !err.is_cancelled() {
                            log::error!("back end: session task failed: {err}");
                        }
                    }
                }
                () = &mut abort_signal => {
                    sessions.abort_all();
                    while sessions.join_next().await.is_some() {}
                    return Ok(Terminated::Aborted);
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    bank: Arc<Mutex<RegisterBank>>,
    reader: Option<Arc<Mutex<SizeModulationReader>>>,
) -> Result<(), Error> {
    let mut framed = Framed::new(stream, FrameCodec);
    while let Some(request) = framed.next().await {
        let request = request?;
        if let Some(reader) = &reader {
            // Bit accumulation is order-dependent; the lock serializes
            // observations from concurrent connections.
            let mut reader = reader.lock().expect("reader lock");
            reader.observe(request.header.length);
        }
        let response_pdu = answer(&request, &bank)?;
        let pdu = encode_pdu(&response_pdu);
        let header = request.header.with_pdu_len(pdu.len());
        framed.send(Frame { header, pdu }).await?;
    }
    log::info!("back end: peer disconnected");
    Ok(())
}

/// Compute the response PDU for one request against the bank.
fn answer(request: &Frame, bank: &Arc<Mutex<RegisterBank>>) -> Result<Pdu, Error> {
    let pdu = decode_request_pdu(request)?;
    let response = match pdu {
        Pdu::ReadHoldingRegisters { address, quantity } => {
            // Single-register deployment: wider reads are refused rather
            // than half-served.
            if quantity != 1 {
                exception(&pdu, ExceptionCode::IllegalDataValue)
            } else {
                match bank.lock().expect("bank lock").read(address) {
                    Some(value) => Pdu::ReadHoldingRegistersResponse { value },
                    None => exception(&pdu, ExceptionCode::IllegalDataAddress),
                }
            }
        }
        Pdu::WriteSingleRegister { address, value } => {
            if bank.lock().expect("bank lock").write(address, value) {
                Pdu::WriteSingleRegister { address, value }
            } else {
                exception(&pdu, ExceptionCode::IllegalDataAddress)
            }
        }
        Pdu::ReadHoldingRegistersResponse { .. } | Pdu::Exception { .. } => {
            return Err(Error::UnexpectedResponse("response PDU in request stream"))
        }
    };
    Ok(response)
}

fn exception(request: &Pdu, code: ExceptionCode) -> Pdu {
    Pdu::Exception {
        function: request.function_code(),
        code,
    }
}
