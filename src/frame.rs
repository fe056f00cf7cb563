// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus/TCP frame data model.
//!
//! The gateway deals with frames on two levels: the raw [`Frame`] (header
//! plus opaque PDU bytes) that is forwarded, mutated and cached, and the
//! typed [`Pdu`] view used wherever field access is required. Keeping the
//! raw bytes around is deliberate: the size-modulation channel appends a
//! padding byte that no typed representation would preserve.

use std::fmt;

use bytes::Bytes;

/// Size of the MBAP header in bytes.
pub const MBAP_HEADER_LEN: usize = 7;

/// The only protocol identifier defined for Modbus/TCP.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Function code 0x03, read holding registers.
pub const FN_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Function code 0x06, write single register.
pub const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// High bit marking an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// MBAP (Modbus Application Protocol) header.
///
/// Invariants maintained by the codec: `protocol_id == 0`,
/// `2 < length < 256` and `length == 1 + pdu.len()` (the unit identifier
/// is counted by the length field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for a new frame carrying `pdu_len` PDU bytes, reusing the
    /// identification fields of `self`.
    #[must_use]
    pub fn with_pdu_len(self, pdu_len: usize) -> Self {
        Self {
            length: pdu_len as u16 + 1,
            ..self
        }
    }
}

/// A raw Modbus/TCP frame as carried through the gateway.
///
/// `pdu` holds the function code and everything after it. It may be one
/// byte longer than the canonical layout when a size-modulation padding
/// byte has been appended; [`crate::codec::decode_request_pdu`] tolerates
/// and preserves such trailing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

impl Frame {
    /// The function code, i.e. the first PDU byte.
    ///
    /// The codec guarantees at least one PDU byte (`length > 2`).
    #[must_use]
    pub fn function_code(&self) -> u8 {
        self.pdu[0]
    }
}

/// Typed view of the PDUs this deployment speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu {
    /// Request 0x03. `quantity` is carried but this system only ever
    /// reads a single register.
    ReadHoldingRegisters { address: u16, quantity: u16 },

    /// Response 0x03, single register (`byte_count` is always 2 on the
    /// wire and derived on encode).
    ReadHoldingRegistersResponse { value: u16 },

    /// Request and response 0x06 share the same layout.
    WriteSingleRegister { address: u16, value: u16 },

    /// Exception response: original function code with the high bit set,
    /// followed by the exception code. A valid response, not an error.
    Exception { function: u8, code: ExceptionCode },
}

impl Pdu {
    /// The function code byte this PDU serializes to.
    #[must_use]
    pub fn function_code(&self) -> u8 {
        match self {
            Self::ReadHoldingRegisters { .. } | Self::ReadHoldingRegistersResponse { .. } => {
                FN_READ_HOLDING_REGISTERS
            }
            Self::WriteSingleRegister { .. } => FN_WRITE_SINGLE_REGISTER,
            Self::Exception { function, .. } => *function | EXCEPTION_FLAG,
        }
    }
}

/// Modbus exception codes used by this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    /// Codes outside the subset above are carried through unmodified.
    Custom(u8),
}

impl ExceptionCode {
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            code => Self::Custom(code),
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
            Self::Custom(_) => "custom",
        };
        write!(f, "{description} (0x{:02X})", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trip() {
        for value in [0x01, 0x02, 0x03, 0x04, 0x0B] {
            assert_eq!(ExceptionCode::new(value).value(), value);
        }
    }

    #[test]
    fn header_pdu_len() {
        let hdr = MbapHeader {
            transaction_id: 7,
            protocol_id: 0,
            length: 6,
            unit_id: 1,
        };
        assert_eq!(hdr.with_pdu_len(6).length, 7);
        assert_eq!(hdr.with_pdu_len(6).transaction_id, 7);
    }

    #[test]
    fn exception_function_code_sets_high_bit() {
        let pdu = Pdu::Exception {
            function: FN_READ_HOLDING_REGISTERS,
            code: ExceptionCode::IllegalDataValue,
        };
        assert_eq!(pdu.function_code(), 0x83);
    }
}
