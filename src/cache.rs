// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Response cache for read holding register requests.
//!
//! A read response observed at the gateway is cached per register address
//! with its insertion time. While an entry is younger than the TTL, read
//! requests for its address are answered by the gateway without contacting
//! the back end. A write request to a cached address removes the entry, as
//! does TTL expiry during the periodic sweep that every write triggers.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    codec::{decode_request_pdu, encode_pdu},
    frame::{Frame, Pdu},
};

/// Per-connection response cache.
#[derive(Debug)]
pub struct Cache {
    entries: HashMap<u16, (Instant, u16)>,
    ttl: Duration,
}

impl Cache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// The cached value for `address`, if present and still within its TTL.
    ///
    /// Pure read: an expired entry is reported as absent but not removed;
    /// removal is deferred to [`Cache::invalidate`].
    #[must_use]
    pub fn lookup(&self, address: u16) -> Option<u16> {
        self.lookup_at(address, Instant::now())
    }

    fn lookup_at(&self, address: u16, now: Instant) -> Option<u16> {
        let (inserted_at, value) = self.entries.get(&address)?;
        if now.duration_since(*inserted_at) < self.ttl {
            Some(*value)
        } else {
            None
        }
    }

    /// Cache `value` for `address`, replacing any prior entry.
    pub fn insert(&mut self, address: u16, value: u16) {
        self.insert_at(address, value, Instant::now());
    }

    fn insert_at(&mut self, address: u16, value: u16, now: Instant) {
        self.entries.insert(address, (now, value));
        log::debug!("cached register {address} = {value}");
    }

    /// Remove the entry for a rewritten address along with every expired
    /// entry. Called for every observed write request; a no-op when
    /// nothing matches.
    pub fn invalidate(&mut self, written_address: u16) {
        self.invalidate_at(written_address, Instant::now());
    }

    fn invalidate_at(&mut self, written_address: u16, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|address, (inserted_at, _)| {
            let stale =
                now.duration_since(*inserted_at) > ttl || *address == written_address;
            if stale {
                log::debug!("register {address} removed from cache");
            }
            !stale
        });
    }

    /// Synthesize a complete response frame for a cached read request.
    ///
    /// Returns `None` on a cache miss, for anything that is not a read
    /// holding registers request, and for requests with a quantity other
    /// than one: the cache holds exactly one register per entry, so a
    /// wider read must go to the back end to get a consistent byte count.
    #[must_use]
    pub fn cached_response(&self, request: &Frame) -> Option<Frame> {
        let Ok(Pdu::ReadHoldingRegisters { address, quantity }) = decode_request_pdu(request)
        else {
            return None;
        };
        if quantity != 1 {
            return None;
        }
        let value = self.lookup(address)?;
        let pdu = encode_pdu(&Pdu::ReadHoldingRegistersResponse { value });
        let header = request.header.with_pdu_len(pdu.len());
        log::info!(
            "cache hit for register {address}, responding without back end (transaction_id={})",
            header.transaction_id
        );
        Some(Frame { header, pdu })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;

    use crate::frame::MbapHeader;

    const TTL: Duration = Duration::from_secs(30);

    fn read_request(transaction_id: u16, address: u16, quantity: u16) -> Frame {
        let pdu = encode_pdu(&Pdu::ReadHoldingRegisters { address, quantity });
        Frame {
            header: MbapHeader {
                transaction_id,
                protocol_id: 0,
                length: pdu.len() as u16 + 1,
                unit_id: 1,
            },
            pdu,
        }
    }

    #[test]
    fn lookup_within_ttl() {
        let t0 = Instant::now();
        let mut cache = Cache::new(TTL);
        cache.insert_at(5, 777, t0);
        assert_eq!(cache.lookup_at(5, t0 + Duration::from_secs(29)), Some(777));
    }

    #[test]
    fn lookup_after_ttl_expired() {
        let t0 = Instant::now();
        let mut cache = Cache::new(TTL);
        cache.insert_at(5, 777, t0);
        assert_eq!(cache.lookup_at(5, t0 + Duration::from_secs(30)), None);
        // Expiry is observed by lookup but the entry itself survives until
        // the next invalidation sweep.
        assert!(cache.entries.contains_key(&5));
    }

    #[test]
    fn invalidate_removes_written_address() {
        let t0 = Instant::now();
        let mut cache = Cache::new(TTL);
        cache.insert_at(5, 777, t0);
        cache.insert_at(6, 888, t0);
        cache.invalidate_at(5, t0 + Duration::from_secs(1));
        assert_eq!(cache.lookup_at(5, t0 + Duration::from_secs(1)), None);
        assert_eq!(cache.lookup_at(6, t0 + Duration::from_secs(1)), Some(888));
    }

    #[test]
    fn invalidate_sweeps_expired_entries() {
        let t0 = Instant::now();
        let mut cache = Cache::new(TTL);
        cache.insert_at(5, 777, t0);
        cache.insert_at(6, 888, t0 + Duration::from_secs(20));
        cache.invalidate_at(100, t0 + Duration::from_secs(31));
        assert!(!cache.entries.contains_key(&5));
        assert!(cache.entries.contains_key(&6));
    }

    #[test]
    fn invalidate_unknown_address_is_noop() {
        let mut cache = Cache::new(TTL);
        cache.insert(5, 777);
        cache.invalidate(42);
        assert_eq!(cache.lookup(5), Some(777));
    }

    #[test]
    fn insert_replaces_prior_entry() {
        let mut cache = Cache::new(TTL);
        cache.insert(5, 777);
        cache.insert(5, 778);
        assert_eq!(cache.lookup(5), Some(778));
    }

    #[test]
    fn cached_response_echoes_request_header() {
        let mut cache = Cache::new(TTL);
        cache.insert(5, 1000);
        let response = cache.cached_response(&read_request(42, 5, 1)).unwrap();
        assert_eq!(response.header.transaction_id, 42);
        assert_eq!(response.header.unit_id, 1);
        assert_eq!(response.header.length, 6);
        assert_eq!(response.pdu, Bytes::from_static(&[0x03, 0x02, 0x03, 0xE8]));
    }

    #[test]
    fn cached_response_misses() {
        let mut cache = Cache::new(TTL);
        cache.insert(5, 1000);
        // Unknown address.
        assert!(cache.cached_response(&read_request(1, 6, 1)).is_none());
        // Multi-register reads bypass the cache: it stores one register
        // per entry and must not fabricate a wider response.
        assert!(cache.cached_response(&read_request(1, 5, 2)).is_none());
        // Write requests never hit.
        let write = Frame {
            header: MbapHeader {
                transaction_id: 1,
                protocol_id: 0,
                length: 6,
                unit_id: 1,
            },
            pdu: encode_pdu(&Pdu::WriteSingleRegister {
                address: 5,
                value: 1,
            }),
        };
        assert!(cache.cached_response(&write).is_none());
    }
}
