// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus/TCP client for driving traffic through the gateway.
//!
//! The client keeps its own transaction-ID counter starting at 1 — the
//! client side of the offset the gateway's normalizer reconciles. Every
//! call measures the round-trip time and optionally feeds it to a shared
//! [`InterPacketTimesReader`], the vantage point of the inter-packet-times
//! channel.

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Instant,
};

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{
    codec::{decode_response_pdu, encode_pdu, FrameCodec},
    error::{Error, Result},
    frame::{Frame, MbapHeader, Pdu, PROTOCOL_ID},
    steg::InterPacketTimesReader,
};

/// Transaction IDs on the client side start at 1; the back end expects a
/// sequence starting at 0.
const INITIAL_TRANSACTION_ID: u16 = 1;

/// Unit identifier of the single device in this deployment.
const UNIT_ID: u8 = 1;

/// Client connected to the gateway.
#[derive(Debug)]
pub struct GatewayClient {
    framed: Framed<TcpStream, FrameCodec>,
    transaction_id: u16,
    reader: Option<Arc<Mutex<InterPacketTimesReader>>>,
}

impl GatewayClient {
    /// Connect to the gateway.
    ///
    /// # Errors
    ///
    /// Connection failure.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        log::info!("connected to gateway at {addr}");
        Ok(Self {
            framed: Framed::new(stream, FrameCodec),
            transaction_id: INITIAL_TRANSACTION_ID,
            reader: None,
        })
    }

    /// Attach the inter-packet-times vantage point.
    #[must_use]
    pub fn with_reader(mut self, reader: Arc<Mutex<InterPacketTimesReader>>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Read one holding register.
    ///
    /// # Errors
    ///
    /// Transport and framing failures, plus [`Error::Exception`] when the
    /// server answers with a Modbus exception.
    pub async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        let response = self
            .call(Pdu::ReadHoldingRegisters {
                address,
                quantity: 1,
            })
            .await?;
        match response {
            Pdu::ReadHoldingRegistersResponse { value } => Ok(value),
            Pdu::Exception { code, .. } => Err(Error::Exception(code)),
            _ => Err(Error::UnexpectedResponse("wrong function code in response")),
        }
    }

    /// Write one holding register.
    ///
    /// # Errors
    ///
    /// As for [`GatewayClient::read_holding_register`].
    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let response = self
            .call(Pdu::WriteSingleRegister { address, value })
            .await?;
        match response {
            Pdu::WriteSingleRegister {
                address: echo_address,
                value: echo_value,
            } if echo_address == address && echo_value == value => Ok(()),
            Pdu::WriteSingleRegister { .. } => {
                Err(Error::UnexpectedResponse("write echo mismatch"))
            }
            Pdu::Exception { code, .. } => Err(Error::Exception(code)),
            _ => Err(Error::UnexpectedResponse("wrong function code in response")),
        }
    }

    async fn call(&mut self, request: Pdu) -> Result<Pdu> {
        let pdu = encode_pdu(&request);
        let header = MbapHeader {
            transaction_id: self.transaction_id,
            protocol_id: PROTOCOL_ID,
            length: pdu.len() as u16 + 1,
            unit_id: UNIT_ID,
        };
        self.framed.send(Frame { header, pdu }).await?;
        let sent_at = Instant::now();

        let response = self
            .framed
            .next()
            .await
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "gateway closed the connection",
                ))
            })??;
        let rtt = sent_at.elapsed();

        self.verify_response_header(&response.header)?;
        let response_pdu = decode_response_pdu(&response)?;

        if let Some(reader) = &self.reader {
            let mut reader = reader.lock().expect("reader lock");
            reader.observe(rtt.as_secs_f64(), response.function_code());
        }
        log::debug!("round-trip time at client: {rtt:?}");

        self.transaction_id = self.transaction_id.wrapping_add(1);
        Ok(response_pdu)
    }

    fn verify_response_header(&self, header: &MbapHeader) -> Result<()> {
        if header.transaction_id != self.transaction_id {
            return Err(Error::UnexpectedResponse("transaction ID mismatch"));
        }
        if header.unit_id != UNIT_ID {
            return Err(Error::UnexpectedResponse("unit ID mismatch"));
        }
        Ok(())
    }
}
