// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Key derivation and attestation
//!
//! Purpose-bound keys are derived from the device root key as
//!
//! ```text
//! key(tag) = HMAC-SHA256(root_key, seed || tag)
//! ```
//!
//! A quote is `HMAC-SHA256(quote_key, M)` where `M` is assembled from the
//! fields selected by the quote mask in a fixed order:
//!
//! | Field                          | Mask bit |
//! |--------------------------------|----------|
//! | `"QUOT"`                       | always   |
//! | mask as u32 (LE)               | always   |
//! | device UID                     | `0x80`   |
//! | volatile bits, locks (u32 LE)  | `0x40`   |
//! | counter 0 (u32 LE)             | `0x20`   |
//! | counter 1 (u32 LE)             | `0x10`   |
//! | user data                      | `0x08`   |
//! | PCR 2                          | `0x04`   |
//! | PCR 1                          | `0x02`   |
//! | PCR 0                          | `0x01`   |
//! | nonce                          | non-empty|

use hmac::{Hmac, Mac};
use or_panic::ResultOrPanic;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::constants::*;
use crate::marshal::MessageBuffer;
use crate::types::{DeviceSnapshot, QuoteMask};

type HmacSha256 = Hmac<Sha256>;

/// Purpose tag of the quote key
pub const QUOTE_TAG: &[u8; 4] = b"QUOT";
/// Purpose tag of the HKDF key
pub const HKDF_TAG: &[u8; 4] = b"HKDF";

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).or_panic("HMAC accepts keys of any length")
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut mac = new_mac(key);
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Derive a purpose-bound key from the root key
pub fn derive_device_key(
    root_key: &[u8; KEY_SIZE],
    tag: &[u8; 4],
    seed: &[u8],
) -> Zeroizing<[u8; KEY_SIZE]> {
    Zeroizing::new(hmac_sha256(root_key, &[seed, &tag[..]]))
}

/// Assemble the quote digest input
pub fn quote_message(snapshot: &DeviceSnapshot, mask: QuoteMask, nonce: &[u8]) -> Vec<u8> {
    let mut buf = MessageBuffer::with_capacity(256);

    buf.put_bytes(QUOTE_TAG);
    buf.put_u32(mask.bits() as u32);

    if mask.contains(QuoteMask::DEVICE_UID) {
        buf.put_bytes(&snapshot.device_uid);
    }
    if mask.contains(QuoteMask::VOLATILE_BITS) {
        buf.put_u32(snapshot.volatile_bits);
        buf.put_u32(snapshot.volatile_locks);
    }
    if mask.contains(QuoteMask::COUNTER_0) {
        buf.put_u32(snapshot.counters[0]);
    }
    if mask.contains(QuoteMask::COUNTER_1) {
        buf.put_u32(snapshot.counters[1]);
    }
    if mask.contains(QuoteMask::USER_DATA) {
        buf.put_bytes(&snapshot.user_data);
    }
    // PCRs go in descending index order
    for (index, flag) in [(2, QuoteMask::PCR_2), (1, QuoteMask::PCR_1), (0, QuoteMask::PCR_0)] {
        if mask.contains(flag) {
            buf.put_bytes(&snapshot.pcrs[index].0);
        }
    }
    if !nonce.is_empty() {
        buf.put_bytes(nonce);
    }

    buf.into_vec()
}

/// Recompute the quote a device holding `quote_key` reports for `snapshot`
pub fn expected_quote(
    quote_key: &[u8; KEY_SIZE],
    snapshot: &DeviceSnapshot,
    mask: QuoteMask,
    nonce: &[u8],
) -> [u8; DIGEST_SIZE] {
    hmac_sha256(quote_key, &[quote_message(snapshot, mask, nonce).as_slice()])
}

/// Key used to authenticate quotes
pub struct QuoteKey(Zeroizing<[u8; KEY_SIZE]>);

impl QuoteKey {
    pub fn derive(root_key: &[u8; KEY_SIZE], seed: &[u8]) -> Self {
        Self(derive_device_key(root_key, QUOTE_TAG, seed))
    }

    /// Use an already derived key, e.g. on the verifier side
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(key))
    }

    pub fn quote(
        &self,
        snapshot: &DeviceSnapshot,
        mask: QuoteMask,
        nonce: &[u8],
    ) -> [u8; DIGEST_SIZE] {
        expected_quote(&self.0, snapshot, mask, nonce)
    }

    /// Constant-time comparison of `digest` against the expected quote
    pub fn verify(
        &self,
        snapshot: &DeviceSnapshot,
        mask: QuoteMask,
        nonce: &[u8],
        digest: &[u8],
    ) -> bool {
        let mut mac = new_mac(&self.0[..]);
        mac.update(&quote_message(snapshot, mask, nonce));
        mac.verify_slice(digest).is_ok()
    }
}

/// Key used for the HMAC based KDF
pub struct HkdfKey(Zeroizing<[u8; KEY_SIZE]>);

impl HkdfKey {
    pub fn derive(root_key: &[u8; KEY_SIZE], seed: &[u8]) -> Self {
        Self(derive_device_key(root_key, HKDF_TAG, seed))
    }

    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(key))
    }

    /// HMAC-SHA256(hkdf_key, seed); single block, always 32 bytes
    pub fn derive_output(&self, seed: &[u8]) -> [u8; DIGEST_SIZE] {
        hmac_sha256(&self.0[..], &[seed])
    }
}

/// The purpose-bound keys of one device
pub struct DeviceKeys {
    pub quote: QuoteKey,
    pub hkdf: HkdfKey,
}

impl DeviceKeys {
    /// Derive both keys. The root key is not retained.
    pub fn derive(root_key: &[u8; KEY_SIZE], quote_seed: &[u8], hkdf_seed: &[u8]) -> Self {
        Self {
            quote: QuoteKey::derive(root_key, quote_seed),
            hkdf: HkdfKey::derive(root_key, hkdf_seed),
        }
    }
}
