// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem command implementations
//!
//! This module provides the high-level device operations.

use tracing::debug;

use crate::command::{Command, Response};
use crate::constants::*;
use crate::device::{CryptoMemDevice, PollConfig};
use crate::error::{Error, Result};
use crate::marshal::RegisterReader;
use crate::transport::Transport;
use crate::types::{CounterIndex, DeviceSnapshot, PcrIndex, PcrValue, QuoteMask};

/// CryptoMem context over a register-window transport
pub struct CryptoMemContext<T> {
    device: CryptoMemDevice<T>,
}

impl<T: Transport> CryptoMemContext<T> {
    pub fn new(bus: T) -> Self {
        Self {
            device: CryptoMemDevice::new(bus),
        }
    }

    pub fn with_poll_config(bus: T, poll: PollConfig) -> Self {
        Self {
            device: CryptoMemDevice::with_poll_config(bus, poll),
        }
    }

    pub fn device(&self) -> &CryptoMemDevice<T> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut CryptoMemDevice<T> {
        &mut self.device
    }

    pub fn into_inner(self) -> T {
        self.device.into_inner()
    }

    /// Execute a typed command and return the raw response
    pub fn execute(&mut self, command: &Command) -> Result<Response> {
        let frame = command.frame()?;
        self.device.execute(&frame, command.response_len())
    }

    fn execute_checked(&mut self, command: &Command) -> Result<Vec<u8>> {
        self.execute(command)?.ensure_success()
    }

    fn digest(&mut self, command: &Command) -> Result<[u8; DIGEST_SIZE]> {
        let data = self.execute_checked(command)?;
        data.as_slice().try_into().map_err(|_| {
            Error::ProtocolViolation(format!(
                "expected a {} byte digest, got {} bytes",
                DIGEST_SIZE,
                data.len()
            ))
        })
    }

    // ==================== Commands ====================

    /// No-op; clears the DATA area
    pub fn nop(&mut self) -> Result<()> {
        self.execute_checked(&Command::Nop)?;
        Ok(())
    }

    /// Extend a PCR with measurement data
    pub fn extend(&mut self, pcr: usize, data: &[u8]) -> Result<()> {
        let command = Command::extend(pcr, data)?;
        self.execute_checked(&command)?;
        debug!("extended PCR {} with {} bytes", pcr, data.len());
        Ok(())
    }

    /// Produce a quote over the fields selected by `mask`
    pub fn quote(&mut self, mask: QuoteMask, nonce: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
        self.digest(&Command::quote(mask, nonce)?)
    }

    /// Increment a volatile counter
    ///
    /// The status is returned as is; callers decide how to treat failures.
    pub fn increment(&mut self, counter: usize, addend: u8) -> Result<Response> {
        self.execute(&Command::increment(counter, addend)?)
    }

    /// Derive 32 bytes from the device HKDF key and `seed`
    pub fn hkdf(&mut self, seed: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
        self.digest(&Command::hkdf(seed)?)
    }

    // ==================== Register reads ====================

    pub fn pcr(&mut self, pcr: usize) -> Result<[u8; PCR_SIZE]> {
        let pcr = PcrIndex::new(pcr)?;
        self.read_array(pcr.offset())
    }

    pub fn counter(&mut self, counter: usize) -> Result<u32> {
        let counter = CounterIndex::new(counter)?;
        self.read_u32(counter.offset())
    }

    pub fn volatile_bits(&mut self) -> Result<u32> {
        self.read_u32(reg::VOLATILE_BITS)
    }

    pub fn volatile_locks(&mut self) -> Result<u32> {
        self.read_u32(reg::VOLATILE_LOCKS)
    }

    pub fn user_data(&mut self) -> Result<[u8; USER_DATA_SIZE]> {
        self.read_array(reg::USER_DATA)
    }

    pub fn device_uid(&mut self) -> Result<[u8; DEVICE_UID_SIZE]> {
        self.read_array(reg::DEVICE_UID)
    }

    /// Read every quotable field
    pub fn snapshot(&mut self) -> Result<DeviceSnapshot> {
        // VOLATILE_BITS, VOLATILE_LOCKS, COUNTER_0, COUNTER_1
        let words = self.device.read(reg::VOLATILE_BITS, 16)?;
        let mut reader = RegisterReader::new(&words);
        let volatile_bits = reader.get_u32()?;
        let volatile_locks = reader.get_u32()?;
        let counters = [reader.get_u32()?, reader.get_u32()?];

        Ok(DeviceSnapshot {
            device_uid: self.device_uid()?,
            volatile_bits,
            volatile_locks,
            counters,
            user_data: self.user_data()?,
            pcrs: [
                PcrValue(self.pcr(0)?),
                PcrValue(self.pcr(1)?),
                PcrValue(self.pcr(2)?),
            ],
        })
    }

    // ==================== Volatile bits ====================

    /// Write the volatile bits register; locked bits keep their value
    pub fn set_volatile_bits(&mut self, bits: u32) -> Result<u32> {
        self.device.write(reg::VOLATILE_BITS, &bits.to_le_bytes())?;
        self.volatile_bits()
    }

    /// Set lock bits; locks cannot be cleared
    pub fn lock_volatile_bits(&mut self, mask: u32) -> Result<u32> {
        self.device.write(reg::VOLATILE_LOCKS, &mask.to_le_bytes())?;
        self.volatile_locks()
    }

    fn read_u32(&mut self, offset: u8) -> Result<u32> {
        let data = self.device.read(offset, 4)?;
        RegisterReader::new(&data).get_u32()
    }

    fn read_array<const N: usize>(&mut self, offset: u8) -> Result<[u8; N]> {
        let data = self.device.read(offset, N)?;
        RegisterReader::new(&data).get_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedBus, SimulatorConfig};

    fn context() -> CryptoMemContext<SimulatedBus> {
        let bus = SimulatedBus::from_config(&SimulatorConfig::default()).unwrap();
        CryptoMemContext::with_poll_config(bus, PollConfig::immediate(8))
    }

    #[test]
    fn test_nop_clears_data() {
        let mut ctx = context();
        ctx.device_mut().write(reg::DATA, &[0xAA; 16]).unwrap();
        ctx.nop().unwrap();
        assert_eq!(ctx.device_mut().read(reg::DATA, 16).unwrap(), vec![0; 16]);
    }

    #[test]
    fn test_increment_returns_raw_status() {
        let mut ctx = context();
        let response = ctx.increment(1, 5).unwrap();
        assert!(response.is_success());
        assert_eq!(ctx.counter(1).unwrap(), 5);
        assert_eq!(ctx.counter(0).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_matches_simulator() {
        let mut ctx = context();
        ctx.extend(0, b"kernel").unwrap();
        ctx.increment(0, 3).unwrap();
        ctx.set_volatile_bits(0x8000_0001).unwrap();

        let snapshot = ctx.snapshot().unwrap();
        let bus = ctx.into_inner();
        assert_eq!(snapshot, bus.simulator().snapshot());
    }

    #[test]
    fn test_volatile_locks() {
        let mut ctx = context();
        assert_eq!(ctx.set_volatile_bits(0x0000_00F0).unwrap(), 0x0000_00F0);
        assert_eq!(ctx.lock_volatile_bits(0x0000_00FF).unwrap(), 0x0000_00FF);
        assert_eq!(ctx.set_volatile_bits(0x0000_0F0F).unwrap(), 0x0000_0FF0);
        assert_eq!(ctx.lock_volatile_bits(0).unwrap(), 0x0000_00FF);
    }
}
