// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use thiserror::Error;

use crate::frame::ExceptionCode;

/// Structural errors raised while decoding a frame off the wire.
///
/// Every variant is fatal to the session that produced it: the gateway never
/// forwards a frame it could not fully decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The 7-byte MBAP header is missing, has a non-zero protocol
    /// identifier or carries a length outside the valid `(2, 256)` range.
    #[error("malformed MBAP header: {0}")]
    MalformedHeader(&'static str),

    /// The function code is neither 3 (read holding registers) nor
    /// 6 (write single register), nor an exception variant thereof.
    #[error("unsupported function code: 0x{0:02X}")]
    UnsupportedFunction(u8),

    /// The PDU is shorter than the minimum layout for its function code.
    #[error("frame too short for function code 0x{function:02X}: {len} bytes")]
    ShortFrame { function: u8, len: usize },
}

/// Error type for all library operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame failed structural validation.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The peer responded with a Modbus exception.
    ///
    /// This is a valid protocol response, not a transport failure; the
    /// gateway forwards it and keeps the session alive. Only the client
    /// surfaces it as an error to its caller.
    #[error("exception response: {0}")]
    Exception(ExceptionCode),

    /// The response header does not match the request that was sent.
    #[error("unexpected response header: {0}")]
    UnexpectedResponse(&'static str),

    /// A hidden message could not be converted to a bit sequence.
    #[error("invalid steganography message: {0}")]
    InvalidMessage(&'static str),

    /// Transport failure. Fatal to the session.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for all library operations.
pub type Result<T> = std::result::Result<T, Error>;
