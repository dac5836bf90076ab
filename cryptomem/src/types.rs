// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem data types

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::keys::QuoteKey;

/// Index of a measurement register (0..=2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PcrIndex(u8);

impl PcrIndex {
    pub fn new(index: usize) -> Result<Self> {
        if index >= PCR_COUNT {
            return Err(Error::InvalidArgument(format!(
                "PCR index {} out of range (0..{})",
                index, PCR_COUNT
            )));
        }
        Ok(Self(index as u8))
    }

    pub fn all() -> [PcrIndex; PCR_COUNT] {
        [PcrIndex(0), PcrIndex(1), PcrIndex(2)]
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Register offset of this PCR
    pub fn offset(self) -> u8 {
        reg::pcr(self.0)
    }
}

/// Index of a volatile counter (0..=1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterIndex(u8);

impl CounterIndex {
    pub fn new(index: usize) -> Result<Self> {
        if index >= COUNTER_COUNT {
            return Err(Error::InvalidArgument(format!(
                "counter index {} out of range (0..{})",
                index, COUNTER_COUNT
            )));
        }
        Ok(Self(index as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Register offset of this counter
    pub fn offset(self) -> u8 {
        reg::counter(self.0)
    }
}

/// Selection of device state fields included in a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteMask(u8);

impl QuoteMask {
    pub const DEVICE_UID: u8 = 0x80;
    pub const VOLATILE_BITS: u8 = 0x40;
    pub const COUNTER_0: u8 = 0x20;
    pub const COUNTER_1: u8 = 0x10;
    pub const USER_DATA: u8 = 0x08;
    pub const PCR_2: u8 = 0x04;
    pub const PCR_1: u8 = 0x02;
    pub const PCR_0: u8 = 0x01;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0xFF)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn with_device_uid(self) -> Self {
        Self(self.0 | Self::DEVICE_UID)
    }

    pub fn with_volatile_bits(self) -> Self {
        Self(self.0 | Self::VOLATILE_BITS)
    }

    pub fn with_counter(self, index: CounterIndex) -> Self {
        Self(self.0 | Self::counter_flag(index))
    }

    pub fn with_user_data(self) -> Self {
        Self(self.0 | Self::USER_DATA)
    }

    pub fn with_pcr(self, index: PcrIndex) -> Self {
        Self(self.0 | Self::pcr_flag(index))
    }

    pub fn counter_flag(index: CounterIndex) -> u8 {
        match index.get() {
            0 => Self::COUNTER_0,
            _ => Self::COUNTER_1,
        }
    }

    pub fn pcr_flag(index: PcrIndex) -> u8 {
        1 << index.get()
    }
}

/// Contents of one PCR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PcrValue(#[serde(with = "hex_bytes")] pub [u8; PCR_SIZE]);

/// Point-in-time copy of every field a quote can cover
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(with = "hex_bytes")]
    pub device_uid: [u8; DEVICE_UID_SIZE],
    pub volatile_bits: u32,
    pub volatile_locks: u32,
    pub counters: [u32; COUNTER_COUNT],
    #[serde(with = "hex_bytes")]
    pub user_data: [u8; USER_DATA_SIZE],
    pub pcrs: [PcrValue; PCR_COUNT],
}

impl DeviceSnapshot {
    /// Copy with every field not selected by `mask` zeroed
    pub fn disclose(&self, mask: QuoteMask) -> Self {
        let mut out = Self::default();
        if mask.contains(QuoteMask::DEVICE_UID) {
            out.device_uid = self.device_uid;
        }
        if mask.contains(QuoteMask::VOLATILE_BITS) {
            out.volatile_bits = self.volatile_bits;
            out.volatile_locks = self.volatile_locks;
        }
        if mask.contains(QuoteMask::COUNTER_0) {
            out.counters[0] = self.counters[0];
        }
        if mask.contains(QuoteMask::COUNTER_1) {
            out.counters[1] = self.counters[1];
        }
        if mask.contains(QuoteMask::USER_DATA) {
            out.user_data = self.user_data;
        }
        for index in PcrIndex::all() {
            if mask.contains(QuoteMask::pcr_flag(index)) {
                out.pcrs[index.as_usize()] = self.pcrs[index.as_usize()];
            }
        }
        out
    }
}

/// A quote together with the state it claims to cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteReport {
    pub mask: QuoteMask,
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub digest: [u8; DIGEST_SIZE],
    /// Disclosed fields; fields outside `mask` are zero
    pub state: DeviceSnapshot,
}

impl QuoteReport {
    pub fn new(
        mask: QuoteMask,
        nonce: &[u8],
        digest: [u8; DIGEST_SIZE],
        state: &DeviceSnapshot,
    ) -> Self {
        Self {
            mask,
            nonce: nonce.to_vec(),
            digest,
            state: state.disclose(mask),
        }
    }

    /// Recompute the quote over the disclosed state and compare
    pub fn verify(&self, key: &QuoteKey) -> bool {
        key.verify(&self.state, self.mask, &self.nonce, &self.digest)
    }
}
