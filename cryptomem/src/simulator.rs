// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Host-side CryptoMem simulator
//!
//! [`Simulator`] owns the device state and keys and can be driven directly.
//! [`SimulatedBus`] wraps it behind the 256-byte register window so the full
//! driver stack can run against it.

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use tracing::{debug, trace};

use crate::command::{check_payload, Command};
use crate::constants::*;
use crate::error::{Error, Result, TransportError};
use crate::keys::DeviceKeys;
use crate::state::DeviceState;
use crate::transport::Transport;
use crate::types::{CounterIndex, DeviceSnapshot, PcrIndex, QuoteMask};

const DEFAULT_ROOT_KEY: [u8; KEY_SIZE] = [
    0x66, 0x68, 0x7a, 0xad, 0xf8, 0x62, 0xbd, 0x77, 0x6c, 0x8f, 0xc1, 0x8b, 0x8e, 0x9f, 0x8e, 0x20,
    0x08, 0x97, 0x14, 0x85, 0x6e, 0xe2, 0x33, 0xb3, 0x90, 0x2a, 0x59, 0x1d, 0x0d, 0x5f, 0x29, 0x25,
];
const DEFAULT_QUOTE_SEED: [u8; KEY_SEED_SIZE] = [0x3C; KEY_SEED_SIZE];
const DEFAULT_HKDF_SEED: [u8; KEY_SEED_SIZE] = [0xC3; KEY_SEED_SIZE];
const DEFAULT_DEVICE_UID: [u8; DEVICE_UID_SIZE] = [
    0x38, 0x20, 0x04, 0x16, 0x02, 0x84, 0x1b, 0xae, 0xa9, 0x0d, 0xd8, 0x51, 0x03, 0x19, 0x00, 0xf5,
];
const DEFAULT_USER_DATA: &[u8] = b"don't feed the bugs!";

/// Provisioning values of a simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    #[serde(with = "hex_bytes")]
    pub root_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub quote_seed: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub hkdf_seed: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub device_uid: Vec<u8>,
    /// Zero-padded to 32 bytes
    #[serde(with = "hex_bytes")]
    pub user_data: Vec<u8>,
    pub volatile_bits: u32,
    pub volatile_locks: u32,
    /// Status polls answered with busy before a command completes
    pub busy_polls: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            root_key: DEFAULT_ROOT_KEY.to_vec(),
            quote_seed: DEFAULT_QUOTE_SEED.to_vec(),
            hkdf_seed: DEFAULT_HKDF_SEED.to_vec(),
            device_uid: DEFAULT_DEVICE_UID.to_vec(),
            user_data: DEFAULT_USER_DATA.to_vec(),
            volatile_bits: 0,
            volatile_locks: 0,
            busy_polls: 0,
        }
    }
}

fn fixed<const N: usize>(name: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidArgument(format!(
            "{} must be {} bytes, got {}",
            name,
            N,
            bytes.len()
        ))
    })
}

/// Simulated device
pub struct Simulator {
    state: DeviceState,
    keys: DeviceKeys,
}

impl Simulator {
    pub fn new(config: &SimulatorConfig) -> Result<Self> {
        let root_key = zeroize::Zeroizing::new(fixed::<KEY_SIZE>("root key", &config.root_key)?);
        let quote_seed = fixed::<KEY_SEED_SIZE>("quote seed", &config.quote_seed)?;
        let hkdf_seed = fixed::<KEY_SEED_SIZE>("HKDF seed", &config.hkdf_seed)?;
        let device_uid = fixed::<DEVICE_UID_SIZE>("device UID", &config.device_uid)?;
        if config.user_data.len() > USER_DATA_SIZE {
            return Err(Error::InvalidArgument(format!(
                "user data must be at most {} bytes, got {}",
                USER_DATA_SIZE,
                config.user_data.len()
            )));
        }
        let mut user_data = [0u8; USER_DATA_SIZE];
        user_data[..config.user_data.len()].copy_from_slice(&config.user_data);

        Ok(Self {
            state: DeviceState::new(
                device_uid,
                user_data,
                config.volatile_bits,
                config.volatile_locks,
            ),
            keys: DeviceKeys::derive(&root_key, &quote_seed, &hkdf_seed),
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.snapshot()
    }

    pub fn extend(&mut self, pcr: usize, data: &[u8]) -> Result<()> {
        let pcr = PcrIndex::new(pcr)?;
        self.state.extend(pcr, data);
        Ok(())
    }

    pub fn pcr(&self, pcr: usize) -> Result<[u8; PCR_SIZE]> {
        Ok(*self.state.pcr(PcrIndex::new(pcr)?))
    }

    /// Returns the new counter value
    pub fn increment(&mut self, counter: usize, addend: u32) -> Result<u32> {
        Ok(self.state.increment(CounterIndex::new(counter)?, addend))
    }

    pub fn counter(&self, counter: usize) -> Result<u32> {
        Ok(self.state.counter(CounterIndex::new(counter)?))
    }

    pub fn volatile_bits(&self) -> u32 {
        self.state.volatile_bits()
    }

    pub fn volatile_locks(&self) -> u32 {
        self.state.volatile_locks()
    }

    pub fn user_data(&self) -> [u8; USER_DATA_SIZE] {
        *self.state.user_data()
    }

    pub fn device_uid(&self) -> [u8; DEVICE_UID_SIZE] {
        *self.state.device_uid()
    }

    pub fn quote(&self, mask: QuoteMask, nonce: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
        check_payload(nonce)?;
        Ok(self.keys.quote.quote(&self.state.snapshot(), mask, nonce))
    }

    pub fn hkdf(&self, seed: &[u8]) -> Result<[u8; DIGEST_SIZE]> {
        check_payload(seed)?;
        Ok(self.keys.hkdf.derive_output(seed))
    }

    /// Execute a typed command and return its response data
    pub fn execute(&mut self, command: &Command) -> Result<Vec<u8>> {
        let frame = command.frame()?;
        let mut data = [0u8; DATA_SIZE];
        data[..frame.payload().len()].copy_from_slice(frame.payload());

        let (status, response) = self.dispatch(frame.opcode(), frame.args(), &data);
        if !status.is_success() {
            return Err(Error::CommandFailed {
                status0: STAT_READY,
                status1: status.to_u8(),
            });
        }
        Ok(response)
    }

    /// Command handler operating on the raw register contents
    ///
    /// Returns the return code and the data left in the DATA buffer.
    pub fn dispatch(
        &mut self,
        opcode: u8,
        args: [u8; 3],
        data: &[u8; DATA_SIZE],
    ) -> (DeviceStatus, Vec<u8>) {
        let [arg0, arg1, _] = args;
        let result = match Opcode::from_u8(opcode) {
            Some(Opcode::Nop) => Ok(Vec::new()),
            Some(Opcode::Extend) => self.handle_extend(arg0, arg1, data),
            Some(Opcode::Quote) => self.handle_quote(arg0, arg1, data),
            Some(Opcode::Hkdf) => self.handle_hkdf(arg0, arg1, data),
            Some(Opcode::Increment) => self.handle_increment(arg0, arg1),
            None => Err(DeviceStatus::UnknownCommand),
        };

        match result {
            Ok(response) => {
                trace!("simulated command 0x{:02x} succeeded", opcode);
                (DeviceStatus::Success, response)
            }
            Err(status) => {
                debug!(
                    "simulated command 0x{:02x} failed: {}",
                    opcode,
                    status.description()
                );
                (status, Vec::new())
            }
        }
    }

    fn handle_extend(
        &mut self,
        index: u8,
        len: u8,
        data: &[u8; DATA_SIZE],
    ) -> std::result::Result<Vec<u8>, DeviceStatus> {
        let pcr = PcrIndex::new(index as usize).map_err(|_| DeviceStatus::ParameterError)?;
        let data = data_prefix(data, len)?;
        self.state.extend(pcr, data);
        Ok(Vec::new())
    }

    fn handle_quote(
        &mut self,
        mask: u8,
        len: u8,
        data: &[u8; DATA_SIZE],
    ) -> std::result::Result<Vec<u8>, DeviceStatus> {
        let nonce = data_prefix(data, len)?;
        let digest = self
            .keys
            .quote
            .quote(&self.state.snapshot(), QuoteMask::from_bits(mask), nonce);
        Ok(digest.to_vec())
    }

    fn handle_hkdf(
        &mut self,
        len: u8,
        reserved: u8,
        data: &[u8; DATA_SIZE],
    ) -> std::result::Result<Vec<u8>, DeviceStatus> {
        if reserved != 0 {
            return Err(DeviceStatus::ParameterError);
        }
        let seed = data_prefix(data, len)?;
        Ok(self.keys.hkdf.derive_output(seed).to_vec())
    }

    fn handle_increment(
        &mut self,
        index: u8,
        addend: u8,
    ) -> std::result::Result<Vec<u8>, DeviceStatus> {
        let counter = CounterIndex::new(index as usize).map_err(|_| DeviceStatus::ParameterError)?;
        self.state.increment(counter, addend as u32);
        Ok(Vec::new())
    }
}

fn data_prefix(data: &[u8; DATA_SIZE], len: u8) -> std::result::Result<&[u8], DeviceStatus> {
    data.get(..len as usize).ok_or(DeviceStatus::ParameterError)
}

/// Register-window view of a [`Simulator`]
///
/// Mirrors the device I/O memory semantics: writing CMD starts a command,
/// STAT reads busy and DATA reads zero while it runs, writes are ignored
/// while a command is active, and only the volatile bits and locks are
/// writable above STAT.
pub struct SimulatedBus {
    sim: Simulator,
    /// DATA, ARG_x, CMD, STAT and RET_x
    iomem: [u8; reg::VOLATILE_BITS as usize],
    busy_polls: u32,
    remaining_polls: u32,
    active: bool,
}

impl SimulatedBus {
    pub fn new(sim: Simulator) -> Self {
        let mut iomem = [0u8; reg::VOLATILE_BITS as usize];
        iomem[reg::STAT as usize] = STAT_READY;
        Self {
            sim,
            iomem,
            busy_polls: 0,
            remaining_polls: 0,
            active: false,
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Result<Self> {
        let mut bus = Self::new(Simulator::new(config)?);
        bus.set_busy_polls(config.busy_polls);
        Ok(bus)
    }

    /// Number of status polls answered with busy before each command completes
    pub fn set_busy_polls(&mut self, polls: u32) {
        self.busy_polls = polls;
    }

    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.sim
    }

    pub fn is_busy(&self) -> bool {
        self.active
    }

    fn start_command(&mut self, opcode: u8) {
        let io = &mut self.iomem;
        io[reg::CMD as usize] = opcode;
        io[reg::STAT as usize] = STAT_BUSY;
        io[reg::RET_0 as usize] = 0;
        io[reg::RET_1 as usize] = 0;
        io[reg::RET_2 as usize] = 0;
        self.active = true;
        self.remaining_polls = self.busy_polls;
        if self.remaining_polls == 0 {
            self.finish_command();
        }
    }

    fn finish_command(&mut self) {
        let mut data = [0u8; DATA_SIZE];
        data.copy_from_slice(&self.iomem[..DATA_SIZE]);
        let opcode = self.iomem[reg::CMD as usize];
        let args = [
            self.iomem[reg::ARG_0 as usize],
            self.iomem[reg::ARG_1 as usize],
            self.iomem[reg::ARG_2 as usize],
        ];

        let (status, response) = self.sim.dispatch(opcode, args, &data);

        let io = &mut self.iomem;
        io[..DATA_SIZE].fill(0);
        io[..response.len()].copy_from_slice(&response);
        io[reg::CMD as usize] = 0;
        io[reg::RET_0 as usize] = status.to_u8();
        io[reg::RET_2 as usize] = args[2];
        io[reg::ARG_0 as usize] = 0;
        io[reg::ARG_1 as usize] = 0;
        io[reg::ARG_2 as usize] = 0;
        io[reg::STAT as usize] = STAT_READY;
        self.active = false;
    }

    /// Advance a running command by one status poll
    fn poll(&mut self) {
        if !self.active {
            return;
        }
        if self.remaining_polls == 0 {
            self.finish_command();
        } else {
            self.remaining_polls -= 1;
        }
    }

    fn read_byte(&self, address: u8) -> u8 {
        let state = self.sim.state();
        let address = address as usize;
        let field = |base: u8, bytes: &[u8]| bytes[address - base as usize];

        match address {
            a if a == reg::STAT as usize && self.active => STAT_BUSY,
            a if a < reg::ARG_0 as usize && self.active => 0,
            a if a < reg::VOLATILE_BITS as usize => self.iomem[a],
            a if a < reg::VOLATILE_LOCKS as usize => {
                field(reg::VOLATILE_BITS, &state.volatile_bits().to_le_bytes())
            }
            a if a < reg::COUNTER_0 as usize => {
                field(reg::VOLATILE_LOCKS, &state.volatile_locks().to_le_bytes())
            }
            a if a < reg::COUNTER_1 as usize + 4 => {
                let index = (a - reg::COUNTER_0 as usize) / 4;
                let counter = CounterIndex::new(index).map(|c| state.counter(c)).unwrap_or(0);
                field(reg::counter(index as u8), &counter.to_le_bytes())
            }
            a if a < reg::USER_DATA as usize => 0,
            a if a < reg::PCR_0 as usize => field(reg::USER_DATA, state.user_data()),
            a if a < reg::DEVICE_UID as usize => {
                let index = (a - reg::PCR_0 as usize) / PCR_SIZE;
                match PcrIndex::new(index) {
                    Ok(pcr) => field(pcr.offset(), state.pcr(pcr)),
                    Err(_) => 0,
                }
            }
            _ => field(reg::DEVICE_UID, state.device_uid()),
        }
    }

    fn write_byte(&mut self, address: u8, value: u8) {
        match address {
            reg::CMD => {
                if !self.active {
                    self.start_command(value);
                }
            }
            a if (reg::VOLATILE_BITS..reg::VOLATILE_LOCKS).contains(&a) => {
                let shift = 8 * (a - reg::VOLATILE_BITS) as u32;
                self.sim
                    .state
                    .write_volatile_bits((value as u32) << shift, 0xFF << shift);
            }
            a if (reg::VOLATILE_LOCKS..reg::COUNTER_0).contains(&a) => {
                let shift = 8 * (a - reg::VOLATILE_LOCKS) as u32;
                self.sim.state.lock_volatile_bits((value as u32) << shift);
            }
            a if a < reg::STAT => {
                if !self.active {
                    self.iomem[a as usize] = value;
                }
            }
            a => trace!("ignoring write to read-only register 0x{:02x}", a),
        }
    }
}

impl Transport for SimulatedBus {
    fn read(&mut self, address: u8, len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        check_range(address, len).map_err(|reason| TransportError::Read {
            address,
            len,
            reason,
        })?;
        let status_range = address..=address.saturating_add(len.saturating_sub(1) as u8);
        if len > 0 && status_range.contains(&reg::STAT) {
            self.poll();
        }
        Ok((0..len).map(|i| self.read_byte(address + i as u8)).collect())
    }

    fn write(&mut self, address: u8, data: &[u8]) -> std::result::Result<(), TransportError> {
        check_range(address, data.len()).map_err(|reason| TransportError::Write {
            address,
            len: data.len(),
            reason,
        })?;
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(address + i as u8, byte);
        }
        Ok(())
    }
}

fn check_range(address: u8, len: usize) -> std::result::Result<(), String> {
    if len > MAX_TRANSFER_SIZE {
        return Err(format!(
            "transfer of {} bytes exceeds the {} byte block limit",
            len, MAX_TRANSFER_SIZE
        ));
    }
    if address as usize + len > IOMEM_SIZE {
        return Err("transfer crosses the end of the register window".to_string());
    }
    Ok(())
}
