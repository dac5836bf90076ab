// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem register map, opcodes and status codes

/// Size of the device I/O memory window
pub const IOMEM_SIZE: usize = 256;

/// Maximum number of bytes moved by a single transport transfer
pub const MAX_TRANSFER_SIZE: usize = 32;

/// Size of the command data buffer (also the maximum payload size)
pub const DATA_SIZE: usize = 80;

pub const PCR_COUNT: usize = 3;
pub const PCR_SIZE: usize = 32;
pub const COUNTER_COUNT: usize = 2;
pub const USER_DATA_SIZE: usize = 32;
pub const DEVICE_UID_SIZE: usize = 16;
pub const DIGEST_SIZE: usize = 32;
pub const KEY_SIZE: usize = 32;
pub const KEY_SEED_SIZE: usize = 8;

/// Register offsets in the I/O memory window
pub mod reg {
    pub const DATA: u8 = 0x00;
    pub const ARG_0: u8 = 0x50;
    pub const ARG_1: u8 = 0x51;
    pub const ARG_2: u8 = 0x52;
    pub const CMD: u8 = 0x53;
    pub const STAT: u8 = 0x54;
    pub const RET_0: u8 = 0x55;
    pub const RET_1: u8 = 0x56;
    pub const RET_2: u8 = 0x57;
    pub const VOLATILE_BITS: u8 = 0x58;
    pub const VOLATILE_LOCKS: u8 = 0x5C;
    pub const COUNTER_0: u8 = 0x60;
    pub const COUNTER_1: u8 = 0x64;
    pub const USER_DATA: u8 = 0x70;
    pub const PCR_0: u8 = 0x90;
    pub const PCR_1: u8 = 0xB0;
    pub const PCR_2: u8 = 0xD0;
    pub const DEVICE_UID: u8 = 0xF0;

    /// Offset of the given PCR
    pub const fn pcr(index: u8) -> u8 {
        PCR_0 + index * 0x20
    }

    /// Offset of the given volatile counter
    pub const fn counter(index: u8) -> u8 {
        COUNTER_0 + index * 0x04
    }
}

/// Value of STAT while a command is executing
pub const STAT_BUSY: u8 = 0xFF;
/// Value of STAT once the device is ready for the next command
pub const STAT_READY: u8 = 0xC3;

/// Command opcodes (written to the CMD register)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Quote = 0xA0,
    Hkdf = 0xB0,
    Increment = 0xC0,
    Extend = 0xE0,
}

impl Opcode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Opcode::Nop),
            0xA0 => Some(Opcode::Quote),
            0xB0 => Some(Opcode::Hkdf),
            0xC0 => Some(Opcode::Increment),
            0xE0 => Some(Opcode::Extend),
            _ => None,
        }
    }

    /// Number of response bytes the command leaves in the DATA buffer
    pub fn response_len(self) -> usize {
        match self {
            Opcode::Quote | Opcode::Hkdf => DIGEST_SIZE,
            Opcode::Nop | Opcode::Increment | Opcode::Extend => 0,
        }
    }
}

/// Command return codes (RET_0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Success,
    ParameterError,
    UnknownCommand,
    CounterError,
    ExecutionFailed,
    NotAllowed,
    Other(u8),
}

impl DeviceStatus {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => DeviceStatus::Success,
            0xE1 => DeviceStatus::ParameterError,
            0xE2 => DeviceStatus::UnknownCommand,
            0xE3 => DeviceStatus::CounterError,
            0xE4 => DeviceStatus::ExecutionFailed,
            0xE5 => DeviceStatus::NotAllowed,
            other => DeviceStatus::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            DeviceStatus::Success => 0x00,
            DeviceStatus::ParameterError => 0xE1,
            DeviceStatus::UnknownCommand => 0xE2,
            DeviceStatus::CounterError => 0xE3,
            DeviceStatus::ExecutionFailed => 0xE4,
            DeviceStatus::NotAllowed => 0xE5,
            DeviceStatus::Other(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == DeviceStatus::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            DeviceStatus::Success => "success",
            DeviceStatus::ParameterError => "parameter error",
            DeviceStatus::UnknownCommand => "unknown command",
            DeviceStatus::CounterError => "counter increment failed",
            DeviceStatus::ExecutionFailed => "command execution failed",
            DeviceStatus::NotAllowed => "command not allowed in this device state",
            DeviceStatus::Other(_) => "unknown error",
        }
    }
}
