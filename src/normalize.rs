// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transaction-ID normalization.
//!
//! The client and the back-end server keep independently incrementing
//! transaction-ID counters that are offset by exactly one (the client
//! starts at 1, the server expects 0). The gateway reconciles the two
//! sequences symmetrically: requests are shifted by −1 on the way to the
//! server, responses by +1 on the way back, so each side observes a
//! self-consistent sequence.

use crate::frame::{Frame, MbapHeader};

/// Direction of travel across the gateway boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Shift the transaction ID by ±1 depending on direction. All other
/// header fields and the PDU pass through unchanged.
#[must_use]
pub fn normalize_header(header: MbapHeader, direction: Direction) -> MbapHeader {
    let transaction_id = match direction {
        Direction::ClientToServer => header.transaction_id.wrapping_sub(1),
        Direction::ServerToClient => header.transaction_id.wrapping_add(1),
    };
    log::debug!(
        "normalize {direction:?}: transaction_id {} -> {transaction_id}",
        header.transaction_id
    );
    MbapHeader {
        transaction_id,
        ..header
    }
}

/// Frame-level convenience wrapper around [`normalize_header`].
#[must_use]
pub fn normalize(frame: Frame, direction: Direction) -> Frame {
    Frame {
        header: normalize_header(frame.header, direction),
        pdu: frame.pdu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(transaction_id: u16) -> MbapHeader {
        MbapHeader {
            transaction_id,
            protocol_id: 0,
            length: 6,
            unit_id: 1,
        }
    }

    #[test]
    fn client_to_server_decrements() {
        let normalized = normalize_header(header(42), Direction::ClientToServer);
        assert_eq!(normalized.transaction_id, 41);
        assert_eq!(normalized.length, 6);
        assert_eq!(normalized.unit_id, 1);
    }

    #[test]
    fn server_to_client_increments() {
        assert_eq!(
            normalize_header(header(42), Direction::ServerToClient).transaction_id,
            43
        );
    }

    #[test]
    fn both_directions_restore_original_id() {
        let forward = normalize_header(header(42), Direction::ClientToServer);
        let back = normalize_header(forward, Direction::ServerToClient);
        assert_eq!(back.transaction_id, 42);
    }

    #[test]
    fn wraps_at_domain_bounds() {
        assert_eq!(
            normalize_header(header(0), Direction::ClientToServer).transaction_id,
            u16::MAX
        );
        assert_eq!(
            normalize_header(header(u16::MAX), Direction::ServerToClient).transaction_id,
            0
        );
    }
}
