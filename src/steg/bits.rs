// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hidden-message bit coding shared by both covert channels.
//!
//! A textual message is turned into a bit sequence by concatenating the
//! 7-bit ASCII code of every character, most significant bit first, and
//! prefixing a 10-bit big-endian field holding the total payload
//! bit-length. The 10-bit prefix bounds the payload at 1023 bits, i.e.
//! 146 characters.

use crate::error::Error;

/// Number of prefix bits holding the payload bit-length.
pub const HEADER_BITS: usize = 10;

/// Width of one character field.
pub const BITS_PER_CHAR: usize = 7;

/// Largest payload bit-count the 10-bit prefix can declare.
pub const MAX_PAYLOAD_BITS: usize = (1 << HEADER_BITS) - 1;

/// Convert a message into its full bit sequence (prefix + payload).
///
/// # Errors
///
/// [`Error::InvalidMessage`] for non-ASCII input or messages whose payload
/// would exceed 1023 bits.
pub fn encode_message(message: &str) -> Result<Vec<bool>, Error> {
    if !message.is_ascii() {
        return Err(Error::InvalidMessage("message must be ASCII"));
    }
    let payload_bits = message.len() * BITS_PER_CHAR;
    if payload_bits > MAX_PAYLOAD_BITS {
        return Err(Error::InvalidMessage(
            "message exceeds the 1023-bit payload limit",
        ));
    }
    let mut bits = Vec::with_capacity(HEADER_BITS + payload_bits);
    for shift in (0..HEADER_BITS).rev() {
        bits.push(payload_bits >> shift & 1 == 1);
    }
    for byte in message.bytes() {
        for shift in (0..BITS_PER_CHAR).rev() {
            bits.push(byte >> shift & 1 == 1);
        }
    }
    Ok(bits)
}

/// Decode payload bits (without the 10-bit prefix) back into text.
///
/// # Errors
///
/// [`Error::InvalidMessage`] if the bit count is not a multiple of the
/// character width.
pub fn decode_message(payload: &[bool]) -> Result<String, Error> {
    if payload.len() % BITS_PER_CHAR != 0 {
        return Err(Error::InvalidMessage(
            "payload length is not a multiple of 7 bits",
        ));
    }
    let mut message = String::with_capacity(payload.len() / BITS_PER_CHAR);
    for field in payload.chunks(BITS_PER_CHAR) {
        let code = field.iter().fold(0u8, |acc, bit| acc << 1 | u8::from(*bit));
        message.push(char::from(code));
    }
    Ok(message)
}

/// Interpret accumulated prefix bits as the big-endian payload bit-count.
#[must_use]
pub fn header_value(header: &[bool]) -> usize {
    header
        .iter()
        .fold(0usize, |acc, bit| acc << 1 | usize::from(*bit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit_string(bits: &[bool]) -> String {
        bits.iter().map(|bit| if *bit { '1' } else { '0' }).collect()
    }

    #[test]
    fn encode_known_message() {
        // "AB" is 14 payload bits behind a 10-bit prefix declaring 14.
        let bits = encode_message("AB").unwrap();
        assert_eq!(bits.len(), 24);
        assert_eq!(bit_string(&bits), "000000111010000011000010");
    }

    #[test]
    fn prefix_declares_payload_length() {
        let bits = encode_message("hello world").unwrap();
        assert_eq!(header_value(&bits[..HEADER_BITS]), 77);
        assert_eq!(bits.len(), HEADER_BITS + 77);
    }

    #[test]
    fn message_round_trip() {
        let message = "this steganography message will be embedded with S1 method";
        let bits = encode_message(message).unwrap();
        assert_eq!(decode_message(&bits[HEADER_BITS..]).unwrap(), message);
    }

    #[test]
    fn empty_message() {
        let bits = encode_message("").unwrap();
        assert_eq!(bits.len(), HEADER_BITS);
        assert_eq!(header_value(&bits), 0);
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(encode_message("héllo").is_err());
    }

    #[test]
    fn rejects_oversized_message() {
        let long = "x".repeat(147);
        assert!(encode_message(&long).is_err());
        assert!(encode_message(&"x".repeat(146)).is_ok());
    }

    #[test]
    fn rejects_ragged_payload() {
        assert!(decode_message(&[true; 8]).is_err());
    }
}
