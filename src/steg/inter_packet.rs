// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inter-packet-time covert channel (T1).
//!
//! One hidden bit is carried per forwarded request by a selective 250 ms
//! delay, conditioned on the function code: a delayed write request
//! (function code 6) encodes 0, a delayed read request (function code 3)
//! encodes 1. The decoder recognizes a deliberately delayed request by the
//! fractional part of its round-trip time falling into the
//! `[0.25 s, 0.5 s)` window.

use std::time::Duration;

use crate::{
    error::Error,
    frame::{FN_READ_HOLDING_REGISTERS, FN_WRITE_SINGLE_REGISTER},
    steg::bits::{self, HEADER_BITS},
};

/// Delay applied to a request that carries a bit.
pub const EMBED_DELAY: Duration = Duration::from_millis(250);

/// The function code bound to a given bit value.
const fn code_for_bit(bit: bool) -> u8 {
    if bit {
        FN_READ_HOLDING_REGISTERS
    } else {
        FN_WRITE_SINGLE_REGISTER
    }
}

/// Request-side encoder.
#[derive(Debug)]
pub struct InterPacketTimes {
    bits: Vec<bool>,
    cursor: usize,
    delay: Duration,
}

impl InterPacketTimes {
    /// Build an encoder for `message`.
    ///
    /// # Errors
    ///
    /// See [`bits::encode_message`].
    pub fn from_message(message: &str, delay: Duration) -> Result<Self, Error> {
        let bits = bits::encode_message(message)?;
        log::info!(
            "inter-packet times carries {} bits ({} header + {} payload)",
            bits.len(),
            HEADER_BITS,
            bits.len() - HEADER_BITS
        );
        Ok(Self {
            bits,
            cursor: 0,
            delay,
        })
    }

    /// Delay the current request if its function code matches the code
    /// bound to the pending bit.
    ///
    /// Returns whether a bit was embedded; the cursor advances only then.
    /// The caller's bit budget must follow the same rule so that budget
    /// and cursor stay in lock step.
    pub async fn apply_delay(&mut self, function_code: u8) -> bool {
        let Some(&bit) = self.bits.get(self.cursor) else {
            return false;
        };
        if function_code != code_for_bit(bit) {
            log::warn!(
                "no delay for bit {} and function code {function_code}",
                u8::from(bit)
            );
            return false;
        }
        log::debug!("delaying for bit {}", u8::from(bit));
        tokio::time::sleep(self.delay).await;
        self.cursor += 1;
        true
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

    /// Encoder with the default 250 ms embed delay.
    ///
    /// # Errors
    ///
    /// See [`bits::encode_message`].
    pub fn with_default_delay(message: &str) -> Result<Self, Error> {
        Self::from_message(message, EMBED_DELAY)
    }
}

/// Decoder observing round-trip times at a vantage point.
///
/// Process-wide, like [`super::SizeModulationReader`]: a single instance
/// accumulates bits across connections and ignores everything once the
/// declared bit count has been read.
#[derive(Debug, Default)]
pub struct InterPacketTimesReader {
    header: Vec<bool>,
    remaining: usize,
    message: Vec<bool>,
    done: bool,
}

impl InterPacketTimesReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one measured round-trip time (seconds) and the function code
    /// of the request/response pair it belongs to.
    pub fn observe(&mut self, rtt_secs: f64, function_code: u8) {
        if self.done {
            return;
        }
        let bit = match function_code {
            FN_READ_HOLDING_REGISTERS => true,
            FN_WRITE_SINGLE_REGISTER => false,
            _ => return,
        };
        if !Self::in_delay_window(rtt_secs) {
            return;
        }
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

    /// Whether the round-trip time's fractional part betrays the embed
    /// delay. Rounded to two decimals with a half-ulp nudge so that
    /// timings straddling the window edge resolve consistently.
    fn in_delay_window(rtt_secs: f64) -> bool {
        let frac = ((rtt_secs.fract() + 0.005) * 100.0).round() / 100.0;
        (0.25..0.5).contains(&frac)
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
