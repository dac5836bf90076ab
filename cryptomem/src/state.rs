// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Device state: measurement registers, counters, volatile bits and identity

use sha2::{Digest, Sha256};

use crate::constants::*;
use crate::types::{CounterIndex, DeviceSnapshot, PcrIndex, PcrValue};

/// Authoritative model of the device registers
#[derive(Debug, Clone)]
pub struct DeviceState {
    pcrs: [[u8; PCR_SIZE]; PCR_COUNT],
    counters: [u32; COUNTER_COUNT],
    volatile_bits: u32,
    volatile_locks: u32,
    user_data: [u8; USER_DATA_SIZE],
    device_uid: [u8; DEVICE_UID_SIZE],
}

impl DeviceState {
    pub fn new(
        device_uid: [u8; DEVICE_UID_SIZE],
        user_data: [u8; USER_DATA_SIZE],
        volatile_bits: u32,
        volatile_locks: u32,
    ) -> Self {
        Self {
            pcrs: [[0u8; PCR_SIZE]; PCR_COUNT],
            counters: [0; COUNTER_COUNT],
            volatile_bits,
            volatile_locks,
            user_data,
            device_uid,
        }
    }

    /// PCR[index] = SHA-256(PCR[index] || data)
    pub fn extend(&mut self, index: PcrIndex, data: &[u8]) {
        let pcr = &mut self.pcrs[index.as_usize()];
        let mut hasher = Sha256::new();
        hasher.update(&pcr[..]);
        hasher.update(data);
        pcr.copy_from_slice(&hasher.finalize());
    }

    pub fn pcr(&self, index: PcrIndex) -> &[u8; PCR_SIZE] {
        &self.pcrs[index.as_usize()]
    }

    /// Add `addend` to a counter, wrapping at 2^32; returns the new value
    pub fn increment(&mut self, index: CounterIndex, addend: u32) -> u32 {
        let counter = &mut self.counters[index.as_usize()];
        *counter = counter.wrapping_add(addend);
        *counter
    }

    pub fn counter(&self, index: CounterIndex) -> u32 {
        self.counters[index.as_usize()]
    }

    pub fn volatile_bits(&self) -> u32 {
        self.volatile_bits
    }

    pub fn volatile_locks(&self) -> u32 {
        self.volatile_locks
    }

    /// Update the bits selected by `mask`; locked positions keep their value.
    /// Returns the resulting bits.
    pub fn write_volatile_bits(&mut self, value: u32, mask: u32) -> u32 {
        let writable = mask & !self.volatile_locks;
        self.volatile_bits = (self.volatile_bits & !writable) | (value & writable);
        self.volatile_bits
    }

    /// Freeze the given bit positions. Locks can only be set, never cleared.
    pub fn lock_volatile_bits(&mut self, mask: u32) -> u32 {
        self.volatile_locks |= mask;
        self.volatile_locks
    }

    pub fn user_data(&self) -> &[u8; USER_DATA_SIZE] {
        &self.user_data
    }

    pub fn device_uid(&self) -> &[u8; DEVICE_UID_SIZE] {
        &self.device_uid
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device_uid: self.device_uid,
            volatile_bits: self.volatile_bits,
            volatile_locks: self.volatile_locks,
            counters: self.counters,
            user_data: self.user_data,
            pcrs: self.pcrs.map(PcrValue),
        }
    }
}
