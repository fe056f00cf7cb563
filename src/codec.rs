// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP/PDU frame codec.
//!
//! [`FrameCodec`] frames raw Modbus/TCP traffic for use with
//! [`tokio_util::codec::Framed`] on both gateway-facing sockets. Decoding
//! validates the structural invariants of the MBAP header and hands out a
//! raw [`Frame`]; the typed PDU views are produced separately by
//! [`decode_request_pdu`] / [`decode_response_pdu`] so that frames carrying
//! a size-modulation padding byte survive the trip untouched.
//!
//! Every decode and encode emits a trace record with the header fields and
//! function code. The offline analysis of the covert channels relies on
//! these records; the gateway itself does not.

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf as _, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::FrameError,
    frame::{
        ExceptionCode, Frame, MbapHeader, Pdu, EXCEPTION_FLAG, FN_READ_HOLDING_REGISTERS,
        FN_WRITE_SINGLE_REGISTER, MBAP_HEADER_LEN, PROTOCOL_ID,
    },
};

/// Decode a 7-byte MBAP header.
///
/// # Errors
///
/// [`FrameError::MalformedHeader`] if the slice is not exactly 7 bytes, the
/// protocol identifier is non-zero or the length field falls outside the
/// exclusive `(2, 256)` range.
pub fn decode_header(bytes: &[u8]) -> std::result::Result<MbapHeader, FrameError> {
    if bytes.len() != MBAP_HEADER_LEN {
        return Err(FrameError::MalformedHeader("MBAP must be 7 bytes"));
    }
    let header = MbapHeader {
        transaction_id: BigEndian::read_u16(&bytes[0..2]),
        protocol_id: BigEndian::read_u16(&bytes[2..4]),
        length: BigEndian::read_u16(&bytes[4..6]),
        unit_id: bytes[6],
    };
    if header.protocol_id != PROTOCOL_ID {
        return Err(FrameError::MalformedHeader("protocol ID must be 0"));
    }
    if !(2 < header.length && header.length < 256) {
        return Err(FrameError::MalformedHeader(
            "length must be between 2 and 256",
        ));
    }
    Ok(header)
}

/// Serialize a frame, recomputing the length field from the actual PDU
/// size. Callers never hand-set a stale length.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(MBAP_HEADER_LEN + frame.pdu.len());
    let length = frame.pdu.len() as u16 + 1;
    buf.put_u16(frame.header.transaction_id);
    buf.put_u16(frame.header.protocol_id);
    buf.put_u16(length);
    buf.put_u8(frame.header.unit_id);
    buf.extend_from_slice(&frame.pdu);
    log::trace!(
        "encode frame: transaction_id={} protocol_id={} length={} unit_id={} function_code=0x{:02X}",
        frame.header.transaction_id,
        frame.header.protocol_id,
        length,
        frame.header.unit_id,
        frame.function_code(),
    );
    buf.freeze()
}

/// Serialize a typed PDU into its wire layout.
#[must_use]
pub fn encode_pdu(pdu: &Pdu) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(pdu.function_code());
    match *pdu {
        Pdu::ReadHoldingRegisters { address, quantity } => {
            buf.put_u16(address);
            buf.put_u16(quantity);
        }
        Pdu::ReadHoldingRegistersResponse { value } => {
            // One register is read at a time, so byte_count is fixed.
            buf.put_u8(2);
            buf.put_u16(value);
        }
        Pdu::WriteSingleRegister { address, value } => {
            buf.put_u16(address);
            buf.put_u16(value);
        }
        Pdu::Exception { code, .. } => {
            buf.put_u8(code.value());
        }
    }
    buf.freeze()
}

fn check_function_code(pdu: &[u8]) -> std::result::Result<u8, FrameError> {
    if pdu.len() < 2 {
        return Err(FrameError::ShortFrame {
            function: pdu.first().copied().unwrap_or(0),
            len: pdu.len(),
        });
    }
    let function = pdu[0];
    if function >= EXCEPTION_FLAG {
        return Ok(function);
    }
    if function != FN_READ_HOLDING_REGISTERS && function != FN_WRITE_SINGLE_REGISTER {
        return Err(FrameError::UnsupportedFunction(function));
    }
    Ok(function)
}

fn expect_min_len(pdu: &[u8], min: usize) -> std::result::Result<(), FrameError> {
    if pdu.len() < min {
        return Err(FrameError::ShortFrame {
            function: pdu[0],
            len: pdu.len(),
        });
    }
    Ok(())
}

/// Decode the PDU of a request frame.
///
/// Trailing bytes beyond the per-function layout (a padding byte appended
/// by the size-modulation channel) are tolerated.
///
/// # Errors
///
/// [`FrameError::UnsupportedFunction`] or [`FrameError::ShortFrame`].
pub fn decode_request_pdu(frame: &Frame) -> std::result::Result<Pdu, FrameError> {
    let pdu = frame.pdu.as_ref();
    let function = check_function_code(pdu)?;
    let decoded = match function {
        FN_READ_HOLDING_REGISTERS => {
            expect_min_len(pdu, 5)?;
            Pdu::ReadHoldingRegisters {
                address: BigEndian::read_u16(&pdu[1..3]),
                quantity: BigEndian::read_u16(&pdu[3..5]),
            }
        }
        FN_WRITE_SINGLE_REGISTER => {
            expect_min_len(pdu, 5)?;
            Pdu::WriteSingleRegister {
                address: BigEndian::read_u16(&pdu[1..3]),
                value: BigEndian::read_u16(&pdu[3..5]),
            }
        }
        function => Pdu::Exception {
            function: function & !EXCEPTION_FLAG,
            code: ExceptionCode::new(pdu[1]),
        },
    };
    log_pdu("request", frame.header, &decoded);
    Ok(decoded)
}

/// Decode the PDU of a response frame.
///
/// # Errors
///
/// [`FrameError::UnsupportedFunction`] or [`FrameError::ShortFrame`].
pub fn decode_response_pdu(frame: &Frame) -> std::result::Result<Pdu, FrameError> {
    let pdu = frame.pdu.as_ref();
    let function = check_function_code(pdu)?;
    let decoded = match function {
        FN_READ_HOLDING_REGISTERS => {
            expect_min_len(pdu, 4)?;
            Pdu::ReadHoldingRegistersResponse {
                value: BigEndian::read_u16(&pdu[2..4]),
            }
        }
        FN_WRITE_SINGLE_REGISTER => {
            expect_min_len(pdu, 5)?;
            Pdu::WriteSingleRegister {
                address: BigEndian::read_u16(&pdu[1..3]),
                value: BigEndian::read_u16(&pdu[3..5]),
            }
        }
        function => Pdu::Exception {
            function: function & !EXCEPTION_FLAG,
            code: ExceptionCode::new(pdu[1]),
        },
    };
    log_pdu("response", frame.header, &decoded);
    Ok(decoded)
}

fn log_pdu(direction: &str, header: MbapHeader, pdu: &Pdu) {
    log::trace!(
        "decode {direction}: transaction_id={} protocol_id={} length={} unit_id={} pdu={pdu:?}",
        header.transaction_id,
        header.protocol_id,
        header.length,
        header.unit_id,
    );
}

/// Codec framing raw Modbus/TCP traffic.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        // Validate the header before waiting for the body so a malformed
        // peer fails fast instead of stalling the session.
        let header = decode_header(&buf[0..MBAP_HEADER_LEN])
            .map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
        let pdu_len = header.length as usize - 1;
        if buf.len() < MBAP_HEADER_LEN + pdu_len {
            return Ok(None);
        }
        buf.advance(MBAP_HEADER_LEN);
        let pdu = buf.split_to(pdu_len).freeze();
        log::trace!(
            "decode frame: transaction_id={} protocol_id={} length={} unit_id={} function_code=0x{:02X}",
            header.transaction_id,
            header.protocol_id,
            header.length,
            header.unit_id,
            pdu[0],
        );
        Ok(Some(Frame { header, pdu }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        buf.extend_from_slice(&encode_frame(&frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(transaction_id: u16, pdu: &'static [u8]) -> Frame {
        Frame {
            header: MbapHeader {
                transaction_id,
                protocol_id: 0,
                length: pdu.len() as u16 + 1,
                unit_id: 1,
            },
            pdu: Bytes::from_static(pdu),
        }
    }

    #[test]
    fn decode_header_fragment() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x11, // transaction id
                0x00, 0x00, // protocol id
                0x00, 0x06, // length
                0x01, // unit id
                0x03, // function code, rest of the PDU still in flight
            ][..],
        );
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_read_request_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(
            &[
                0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x01, // MBAP
                0x03, 0x00, 0x05, 0x00, 0x01, // PDU
            ][..],
        );
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, 42);
        assert_eq!(frame.header.length, 6);
        assert_eq!(frame.function_code(), 0x03);
        assert_eq!(
            decode_request_pdu(&frame).unwrap(),
            Pdu::ReadHoldingRegisters {
                address: 5,
                quantity: 1
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_nonzero_protocol_id() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(
            &[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x05, 0x00, 0x01][..],
        );
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn decode_rejects_out_of_range_length() {
        for length in [0x0002u16, 0x0100] {
            let mut codec = FrameCodec;
            let mut bytes = vec![0x00, 0x01, 0x00, 0x00];
            bytes.extend_from_slice(&length.to_be_bytes());
            bytes.extend_from_slice(&[0x01; 256]);
            let mut buf = BytesMut::from(&bytes[..]);
            assert!(codec.decode(&mut buf).is_err());
        }
    }

    #[test]
    fn decode_tolerates_padding_byte() {
        // A request that went through size modulation is one byte longer
        // than its canonical layout but must still decode.
        let padded = frame(1, &[0x06, 0x00, 0x07, 0x03, 0xE8, 0x00]);
        assert_eq!(
            decode_request_pdu(&padded).unwrap(),
            Pdu::WriteSingleRegister {
                address: 7,
                value: 1000
            }
        );
    }

    #[test]
    fn decode_unsupported_function() {
        let bad = frame(1, &[0x10, 0x00, 0x07, 0x00, 0x01]);
        assert_eq!(
            decode_request_pdu(&bad),
            Err(FrameError::UnsupportedFunction(0x10))
        );
    }

    #[test]
    fn decode_short_frames() {
        let short = frame(1, &[0x03, 0x00, 0x05]);
        assert!(matches!(
            decode_request_pdu(&short),
            Err(FrameError::ShortFrame {
                function: 0x03,
                len: 3
            })
        ));
        let short = frame(1, &[0x06, 0x00, 0x05, 0x00]);
        assert!(matches!(
            decode_response_pdu(&short),
            Err(FrameError::ShortFrame {
                function: 0x06,
                len: 4
            })
        ));
    }

    #[test]
    fn decode_exception_response() {
        let exception = frame(1, &[0x83, 0x03]);
        assert_eq!(
            decode_response_pdu(&exception).unwrap(),
            Pdu::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataValue
            }
        );
    }

    #[test]
    fn encode_recomputes_length() {
        // A frame whose header still advertises the unpadded length gets
        // its length field recomputed from the actual PDU on encode.
        let stale = Frame {
            header: MbapHeader {
                transaction_id: 3,
                protocol_id: 0,
                length: 5,
                unit_id: 1,
            },
            pdu: Bytes::from_static(&[0x06, 0x00, 0x01, 0x00, 0x02, 0x00]),
        };
        let bytes = encode_frame(&stale);
        assert_eq!(BigEndian::read_u16(&bytes[4..6]), 7);
    }

    #[test]
    fn frame_round_trip() {
        let mut codec = FrameCodec;
        for pdu in [
            Pdu::ReadHoldingRegisters {
                address: 5,
                quantity: 1,
            },
            Pdu::ReadHoldingRegistersResponse { value: 0x1234 },
            Pdu::WriteSingleRegister {
                address: 99,
                value: 1000,
            },
            Pdu::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataAddress,
            },
        ] {
            let pdu_bytes = encode_pdu(&pdu);
            let frame = Frame {
                header: MbapHeader {
                    transaction_id: 17,
                    protocol_id: 0,
                    length: pdu_bytes.len() as u16 + 1,
                    unit_id: 1,
                },
                pdu: pdu_bytes,
            };
            let mut buf = BytesMut::from(&encode_frame(&frame)[..]);
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
            let redecoded = match pdu {
                Pdu::ReadHoldingRegisters { .. } => decode_request_pdu(&decoded),
                _ => decode_response_pdu(&decoded),
            };
            assert_eq!(redecoded.unwrap(), pdu);
        }
    }
}
