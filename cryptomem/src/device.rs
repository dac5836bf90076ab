// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem device communication layer
//!
//! Issues commands through the register window and waits for completion.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::command::{CommandFrame, Response};
use crate::constants::*;
use crate::error::{Error, Result, TransportError};
use crate::transport::{BlockTransfer, Transport};

/// Bounds on the wait for a command to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum number of status reads before giving up; at least one read
    /// is always made
    pub max_attempts: u32,
    /// Delay between two status reads
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            interval: Duration::from_millis(1),
        }
    }
}

impl PollConfig {
    /// Poll back-to-back without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval: Duration::ZERO,
        }
    }
}

/// CryptoMem device handle
///
/// All command-issuing methods take `&mut self`, so one handle executes at
/// most one command at a time.
pub struct CryptoMemDevice<T> {
    io: BlockTransfer<T>,
    poll: PollConfig,
}

impl<T: Transport> CryptoMemDevice<T> {
    pub fn new(bus: T) -> Self {
        Self::with_poll_config(bus, PollConfig::default())
    }

    pub fn with_poll_config(bus: T, poll: PollConfig) -> Self {
        Self {
            io: BlockTransfer::new(bus),
            poll,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    pub fn set_poll_config(&mut self, poll: PollConfig) {
        self.poll = poll;
    }

    pub fn bus(&self) -> &T {
        self.io.bus()
    }

    pub fn bus_mut(&mut self) -> &mut T {
        self.io.bus_mut()
    }

    pub fn into_inner(self) -> T {
        self.io.into_inner()
    }

    /// Read a register region
    pub fn read(&mut self, offset: u8, len: usize) -> Result<Vec<u8>> {
        self.io.read(offset, len)
    }

    /// Write a register region
    pub fn write(&mut self, offset: u8, data: &[u8]) -> Result<()> {
        self.io.write(offset, data)
    }

    /// Execute a command given as opcode, arguments and payload
    pub fn execute_raw(
        &mut self,
        opcode: u8,
        args: [u8; 3],
        payload: &[u8],
        response_len: usize,
    ) -> Result<Response> {
        let frame = CommandFrame::raw(opcode)
            .with_args(args[0], args[1])
            .with_tag(args[2])
            .with_payload(payload)?;
        self.execute(&frame, response_len)
    }

    /// Execute a command and return the raw status and response data
    ///
    /// The frame's payload was bounded when the frame was built.
    pub fn execute(&mut self, frame: &CommandFrame, response_len: usize) -> Result<Response> {
        if response_len > DATA_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "response length {} exceeds the {} byte data buffer",
                response_len, DATA_SIZE
            )));
        }

        if !frame.payload().is_empty() {
            self.io.write(reg::DATA, frame.payload())?;
        }
        self.io.write(reg::ARG_0, &frame.trigger())?;
        debug!(
            "issued command 0x{:02x} args {:02x?} with {} payload bytes",
            frame.opcode(),
            frame.args(),
            frame.payload().len()
        );

        let status = self.wait_ready()?;
        let data = self.io.read(reg::DATA, response_len)?;

        let response = Response {
            status0: status[0],
            status1: status[1],
            tag: status[3],
            data,
        };
        debug!(
            "command 0x{:02x} completed: {}",
            frame.opcode(),
            response.error_description()
        );
        Ok(response)
    }

    /// Execute a command and fail unless the device reports success
    pub fn execute_checked(
        &mut self,
        frame: &CommandFrame,
        response_len: usize,
    ) -> Result<Vec<u8>> {
        self.execute(frame, response_len)?.ensure_success()
    }

    /// Poll `STAT RET_0 RET_1 RET_2` until the device is no longer busy
    fn wait_ready(&mut self) -> Result<[u8; 4]> {
        // The command is already running; its outcome must be read at least once
        let max_attempts = self.poll.max_attempts.max(1);
        for attempt in 0..max_attempts {
            let status = self.io.read(reg::STAT, 4)?;
            if status[0] != STAT_BUSY {
                return Ok([status[0], status[1], status[2], status[3]]);
            }
            if attempt + 1 < max_attempts && !self.poll.interval.is_zero() {
                thread::sleep(self.poll.interval);
            }
        }

        warn!("device still busy after {} status polls", max_attempts);
        Err(TransportError::Timeout {
            attempts: max_attempts,
        }
        .into())
    }
}
