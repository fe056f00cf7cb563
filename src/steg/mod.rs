// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Covert-channel encodings.
//!
//! Two independent channels hide an auxiliary bitstream inside otherwise
//! legitimate gateway traffic:
//!
//! - [`SizeModulation`] (S1) forces the PDU byte-length parity of each
//!   forwarded request to the hidden bit, appending a padding byte when the
//!   natural parity does not match. [`SizeModulationReader`] recovers the
//!   bits from observed frame lengths at the back end.
//! - [`InterPacketTimes`] (T1) selectively delays a request by 250 ms when
//!   its function code matches the code bound to the pending bit.
//!   [`InterPacketTimesReader`] recovers the bits from the fractional part
//!   of round-trip times measured at the client.
//!
//! Both channels share the bit-sequence layout of [`bits`]: a 10-bit
//! big-endian payload-length prefix followed by 7-bit ASCII character
//! fields.

pub mod bits;
pub mod inter_packet;
pub mod size_modulation;

pub use self::{
    inter_packet::{InterPacketTimes, InterPacketTimesReader},
    size_modulation::{SizeModulation, SizeModulationReader},
};
