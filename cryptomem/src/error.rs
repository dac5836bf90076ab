// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Error types

use thiserror::Error;

use crate::constants::{DeviceStatus, STAT_READY};

/// Failures of the underlying register transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus read of {len} bytes at 0x{address:02x} failed: {reason}")]
    Read {
        address: u8,
        len: usize,
        reason: String,
    },
    #[error("bus write of {len} bytes at 0x{address:02x} failed: {reason}")]
    Write {
        address: u8,
        len: usize,
        reason: String,
    },
    #[error("short read at 0x{address:02x}: expected {expected} bytes, got {actual}")]
    ShortRead {
        address: u8,
        expected: usize,
        actual: usize,
    },
    #[error("device still busy after {attempts} status polls")]
    Timeout { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("command failed (0x{status0:02x} 0x{status1:02x})")]
    CommandFailed { status0: u8, status1: u8 },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    /// Decoded device return code, if this is a command failure reported by a ready device
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            Error::CommandFailed { status0, status1 } if *status0 == STAT_READY => {
                Some(DeviceStatus::from_u8(*status1))
            }
            _ => None,
        }
    }

    /// Raw status pair of a failed command
    pub fn status_pair(&self) -> Option<(u8, u8)> {
        match self {
            Error::CommandFailed { status0, status1 } => Some((*status0, *status1)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
