// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Size-modulation covert channel (S1).
//!
//! One hidden bit is carried per forwarded request by the parity of the
//! MBAP length field: odd length encodes 1, even length encodes 0. When
//! the natural parity of a request already matches the pending bit it is
//! forwarded untouched; otherwise a single dummy byte is appended to the
//! PDU, producing a structurally valid frame one byte longer.

use bytes::{BufMut as _, BytesMut};

use crate::{
    error::Error,
    frame::Frame,
    steg::bits::{self, HEADER_BITS},
};

/// Request-side encoder.
///
/// The cursor does not advance inside [`SizeModulation::apply`]; the
/// connection handler calls [`SizeModulation::advance`] exactly once per
/// processed request, whether or not a padding byte was needed. Keeping
/// the advance outside `apply` makes the consumption rule auditable at the
/// call site.
#[derive(Debug)]
pub struct SizeModulation {
    bits: Vec<bool>,
    cursor: usize,
    dummy_byte: u8,
}

impl SizeModulation {
    /// Build an encoder for `message`, padded with `dummy_byte` where the
    /// parity must flip.
    ///
    /// # Errors
    ///
    /// See [`bits::encode_message`].
    pub fn from_message(message: &str, dummy_byte: u8) -> Result<Self, Error> {
        let bits = bits::encode_message(message)?;
        log::info!(
            "size modulation carries {} bits ({} header + {} payload)",
            bits.len(),
            HEADER_BITS,
            bits.len() - HEADER_BITS
        );
        Ok(Self {
            bits,
            cursor: 0,
            dummy_byte,
        })
    }

    /// Force the frame's length parity to the pending bit.
    ///
    /// Responses and frames whose parity already matches pass through
    /// unchanged. Does not advance the cursor.
    #[must_use]
    pub fn apply(&self, frame: &Frame, is_request: bool) -> Frame {
        let Some(&bit) = self.bits.get(self.cursor) else {
            return frame.clone();
        };
        let length_is_odd = frame.header.length % 2 == 1;
        if !is_request || length_is_odd == bit {
            log::debug!(
                "size modulation bit {}: length {} already matches",
                u8::from(bit),
                frame.header.length
            );
            return frame.clone();
        }
        log::debug!(
            "size modulation bit {}: appending one byte to length {}",
            u8::from(bit),
            frame.header.length
        );
        let mut pdu = BytesMut::with_capacity(frame.pdu.len() + 1);
        pdu.extend_from_slice(&frame.pdu);
        pdu.put_u8(self.dummy_byte);
        let pdu = pdu.freeze();
        Frame {
            header: frame.header.with_pdu_len(pdu.len()),
            pdu,
        }
    }

    /// Consume the pending bit. Called once per processed request.
    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Whether every bit of the hidden message has been consumed.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.cursor >= self.bits.len()
    }

    /// Total number of bits to embed, prefix included.
    #[must_use]
    pub fn total_bits(&self) -> usize {
        self.bits.len()
    }
}

/// Decoder observing MBAP length values at a vantage point.
///
/// Process-wide: one instance accumulates bits across every connection
/// that reaches the vantage point, and once complete it ignores all
/// further observations.
#[derive(Debug, Default)]
pub struct SizeModulationReader {
    header: Vec<bool>,
    remaining: usize,
    message: Vec<bool>,
    done: bool,
}

impl SizeModulationReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observed frame length, in arrival order.
    pub fn observe(&mut self, length: u16) {
        if self.done {
            return;
        }
        let bit = length % 2 == 1;
        if self.header.len() < HEADER_BITS {
            self.header.push(bit);
            if self.header.len() == HEADER_BITS {
                self.remaining = bits::header_value(&self.header);
                log::info!("hidden message prefix complete: {} bits follow", self.remaining);
                if self.remaining == 0 {
                    self.done = true;
                }
            }
            return;
        }
        self.message.push(bit);
        self.remaining -= 1;
        if self.remaining == 0 {
            log::info!("hidden message complete: {} bits", self.message.len());
            self.done = true;
        }
    }

    /// The accumulated payload bits.
    #[must_use]
    pub fn message_bits(&self) -> &[bool] {
        &self.message
    }

    /// Terminal state: the declared bit count has been fully read.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode the accumulated payload back into text.
    ///
    /// # Errors
    ///
    /// See [`bits::decode_message`].
    pub fn hidden_message(&self) -> Result<String, Error> {
        bits::decode_message(&self.message)
    }
}
