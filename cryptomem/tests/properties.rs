// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Behavioural properties of the public API

use sha2::{Digest, Sha256};

use cryptomem::keys::{self, HKDF_TAG, QUOTE_TAG};
use cryptomem::{
    BlockTransfer, CryptoMemContext, Error, PollConfig, QuoteMask, Simulator, SimulatorConfig,
    Transport, TransportError,
};

/// Bus that records every transfer and reports a fixed status word
struct LoggingBus {
    log: Vec<String>,
    status: [u8; 4],
}

impl LoggingBus {
    fn new(status: [u8; 4]) -> Self {
        Self {
            log: Vec::new(),
            status,
        }
    }
}

impl Transport for LoggingBus {
    fn read(&mut self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        self.log.push(format!("r {address:02x} {len}"));
        if address == cryptomem::reg::STAT {
            return Ok(self.status[..len].to_vec());
        }
        Ok(vec![0; len])
    }

    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), TransportError> {
        self.log.push(format!("w {address:02x} {}", data.len()));
        Ok(())
    }
}

fn sim() -> Simulator {
    Simulator::new(&SimulatorConfig::default()).unwrap()
}

#[test]
fn extend_is_a_hash_chain() {
    let mut a = sim();
    a.extend(2, b"d1").unwrap();
    a.extend(2, b"d2").unwrap();

    let step1 = Sha256::new().chain_update([0u8; 32]).chain_update(b"d1").finalize();
    let step2 = Sha256::new().chain_update(step1).chain_update(b"d2").finalize();
    assert_eq!(a.pcr(2).unwrap()[..], step2[..]);

    let mut b = sim();
    b.extend(2, b"d2d1").unwrap();
    assert_ne!(a.pcr(2).unwrap(), b.pcr(2).unwrap());
    assert!(matches!(a.extend(3, b"x"), Err(Error::InvalidArgument(_))));
}

#[test]
fn quote_covers_only_selected_fields() {
    let mask = QuoteMask::from_bits(QuoteMask::PCR_0 | QuoteMask::COUNTER_0);
    let mut a = sim();
    let before = a.quote(mask, b"n").unwrap();
    assert_eq!(a.quote(mask, b"n").unwrap(), before);

    a.extend(1, b"unselected").unwrap();
    a.increment(1, 1).unwrap();
    assert_eq!(a.quote(mask, b"n").unwrap(), before);

    a.increment(0, 1).unwrap();
    assert_ne!(a.quote(mask, b"n").unwrap(), before);
    assert_ne!(a.quote(mask, b"m").unwrap(), a.quote(mask, b"n").unwrap());
}

#[test]
fn hkdf_outputs_are_distinct() {
    let a = sim();
    let x = a.hkdf(b"a").unwrap();
    assert_eq!(x, a.hkdf(b"a").unwrap());
    assert_ne!(x, a.hkdf(b"b").unwrap());
    assert!(matches!(a.hkdf(&[0; 81]), Err(Error::InvalidArgument(_))));
}

#[test]
fn purpose_keys_are_domain_separated() {
    let root = [7u8; 32];
    let seed = [1u8; 8];
    assert_ne!(
        *keys::derive_device_key(&root, QUOTE_TAG, &seed),
        *keys::derive_device_key(&root, HKDF_TAG, &seed)
    );
}

#[test]
fn expected_quote_matches_device() {
    let config = SimulatorConfig::default();
    let mut device = sim();
    device.extend(0, b"fw").unwrap();

    let root: [u8; 32] = config.root_key.as_slice().try_into().unwrap();
    let quote_key = keys::derive_device_key(&root, QUOTE_TAG, &config.quote_seed);
    let mask = QuoteMask::all();
    assert_eq!(
        keys::expected_quote(&quote_key, &device.snapshot(), mask, b"nonce"),
        device.quote(mask, b"nonce").unwrap()
    );
}

#[test]
fn block_transfers_are_chunked_in_order() {
    let mut io = BlockTransfer::new(LoggingBus::new([0xC3, 0, 0, 0]));
    io.write(0x00, &[0u8; 32]).unwrap();
    io.write(0x00, &[0u8; 50]).unwrap();
    io.read(0x90, 96).unwrap();
    io.write(0x10, &[]).unwrap();

    assert_eq!(
        io.bus().log,
        vec!["w 00 32", "w 00 32", "w 20 18", "r 90 32", "r b0 32", "r d0 32"]
    );
}

#[test]
fn oversize_payload_is_rejected_before_io() {
    let mut ctx = CryptoMemContext::with_poll_config(
        LoggingBus::new([0xC3, 0, 0, 0]),
        PollConfig::immediate(4),
    );
    assert!(matches!(ctx.extend(0, &[0; 81]), Err(Error::InvalidArgument(_))));
    assert!(matches!(ctx.quote(QuoteMask::all(), &[0; 81]), Err(Error::InvalidArgument(_))));
    assert!(matches!(ctx.hkdf(&[0; 81]), Err(Error::InvalidArgument(_))));
    assert!(matches!(ctx.increment(0, 0), Err(Error::InvalidArgument(_))));
    assert!(ctx.into_inner().log.is_empty());
}

#[test]
fn failed_status_carries_raw_bytes() {
    let mut ctx = CryptoMemContext::with_poll_config(
        LoggingBus::new([0x01, 0x00, 0, 0]),
        PollConfig::immediate(4),
    );
    let err = ctx.extend(0, b"x").unwrap_err();
    assert!(matches!(
        err,
        Error::CommandFailed {
            status0: 0x01,
            status1: 0x00
        }
    ));
    assert_eq!(err.device_status(), None);

    // INCREMENT hands back the status unchecked
    let response = ctx.increment(0, 1).unwrap();
    assert_eq!((response.status0, response.status1), (0x01, 0x00));
}
