// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Command framing
//!
//! A command occupies the DATA buffer (payload) and the four trigger bytes
//! `ARG_0 ARG_1 ARG_2 CMD` at offset 0x50. Writing CMD starts execution.

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::{CounterIndex, PcrIndex, QuoteMask};

/// Raw command as written to the register window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: u8,
    args: [u8; 3],
    payload: Vec<u8>,
}

impl CommandFrame {
    pub fn new(opcode: Opcode) -> Self {
        Self::raw(opcode.to_u8())
    }

    /// Frame with an arbitrary opcode byte
    pub fn raw(opcode: u8) -> Self {
        Self {
            opcode,
            args: [0; 3],
            payload: Vec::new(),
        }
    }

    pub fn with_args(mut self, arg0: u8, arg1: u8) -> Self {
        self.args[0] = arg0;
        self.args[1] = arg1;
        self
    }

    /// Set ARG_2; the device mirrors it to RET_2 on completion
    pub fn with_tag(mut self, tag: u8) -> Self {
        self.args[2] = tag;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self> {
        check_payload(payload)?;
        self.payload = payload.to_vec();
        Ok(self)
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn args(&self) -> [u8; 3] {
        self.args
    }

    pub fn tag(&self) -> u8 {
        self.args[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes written to `ARG_0..=CMD`
    pub fn trigger(&self) -> [u8; 4] {
        [self.args[0], self.args[1], self.args[2], self.opcode]
    }
}

pub(crate) fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.len() > DATA_SIZE {
        return Err(Error::InvalidArgument(format!(
            "payload of {} bytes exceeds the {} byte data buffer",
            payload.len(),
            DATA_SIZE
        )));
    }
    Ok(())
}

/// The device command set
///
/// Each variant only carries the fields valid for its opcode; constructors
/// validate ranges so an invalid command never reaches the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nop,
    Extend { pcr: PcrIndex, data: Vec<u8> },
    Quote { mask: QuoteMask, nonce: Vec<u8> },
    Increment { counter: CounterIndex, addend: u8 },
    Hkdf { seed: Vec<u8> },
}

impl Command {
    pub fn extend(pcr: usize, data: &[u8]) -> Result<Self> {
        check_payload(data)?;
        Ok(Command::Extend {
            pcr: PcrIndex::new(pcr)?,
            data: data.to_vec(),
        })
    }

    pub fn quote(mask: QuoteMask, nonce: &[u8]) -> Result<Self> {
        check_payload(nonce)?;
        Ok(Command::Quote {
            mask,
            nonce: nonce.to_vec(),
        })
    }

    pub fn increment(counter: usize, addend: u8) -> Result<Self> {
        if addend == 0 {
            return Err(Error::InvalidArgument(
                "counter addend must be positive".to_string(),
            ));
        }
        Ok(Command::Increment {
            counter: CounterIndex::new(counter)?,
            addend,
        })
    }

    pub fn hkdf(seed: &[u8]) -> Result<Self> {
        check_payload(seed)?;
        Ok(Command::Hkdf {
            seed: seed.to_vec(),
        })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Nop => Opcode::Nop,
            Command::Extend { .. } => Opcode::Extend,
            Command::Quote { .. } => Opcode::Quote,
            Command::Increment { .. } => Opcode::Increment,
            Command::Hkdf { .. } => Opcode::Hkdf,
        }
    }

    pub fn response_len(&self) -> usize {
        self.opcode().response_len()
    }

    /// Encode into the register-level frame
    pub fn frame(&self) -> Result<CommandFrame> {
        let frame = CommandFrame::new(self.opcode());
        let frame = match self {
            Command::Nop => frame,
            Command::Extend { pcr, data } => frame
                .with_args(pcr.get(), data.len() as u8)
                .with_payload(data)?,
            Command::Quote { mask, nonce } => frame
                .with_args(mask.bits(), nonce.len() as u8)
                .with_payload(nonce)?,
            Command::Increment { counter, addend } => frame.with_args(counter.get(), *addend),
            Command::Hkdf { seed } => frame.with_args(seed.len() as u8, 0).with_payload(seed)?,
        };
        Ok(frame)
    }
}

/// Final status and response data of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// STAT register
    pub status0: u8,
    /// RET_0 register
    pub status1: u8,
    /// RET_2 register (mirror of the command's ARG_2)
    pub tag: u8,
    pub data: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status0 == STAT_READY && self.status1 == DeviceStatus::Success.to_u8()
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_u8(self.status1)
    }

    pub fn error_description(&self) -> String {
        if self.is_success() {
            "success".to_string()
        } else {
            format!(
                "{} (0x{:02x} 0x{:02x})",
                self.status().description(),
                self.status0,
                self.status1
            )
        }
    }

    /// Ensure the response is successful and return its data
    pub fn ensure_success(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::CommandFailed {
                status0: self.status0,
                status1: self.status1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_frame() {
        let frame = Command::extend(2, b"measurement").unwrap().frame().unwrap();
        assert_eq!(frame.trigger(), [2, 11, 0, 0xE0]);
        assert_eq!(frame.payload(), b"measurement");
    }

    #[test]
    fn test_quote_and_hkdf_frames() {
        let quote = Command::quote(QuoteMask::from_bits(0x81), &[1, 2, 3])
            .unwrap()
            .frame()
            .unwrap();
        assert_eq!(quote.trigger(), [0x81, 3, 0, 0xA0]);

        let hkdf = Command::hkdf(&[9; 80]).unwrap().frame().unwrap();
        assert_eq!(hkdf.trigger(), [80, 0, 0, 0xB0]);
        assert_eq!(Command::hkdf(&[]).unwrap().response_len(), DIGEST_SIZE);
    }

    #[test]
    fn test_constructors_validate() {
        assert!(matches!(Command::extend(3, b"x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(Command::extend(0, &[0; 81]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            Command::quote(QuoteMask::all(), &[0; 81]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(Command::increment(2, 1), Err(Error::InvalidArgument(_))));
        assert!(matches!(Command::increment(0, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(Command::hkdf(&[0; 81]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            CommandFrame::raw(0x00).with_payload(&[0; 81]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tag() {
        let frame = CommandFrame::new(Opcode::Nop).with_tag(0x5A);
        assert_eq!(frame.trigger(), [0, 0, 0x5A, 0x00]);
    }

    #[test]
    fn test_response_status() {
        let ok = Response {
            status0: 0xC3,
            status1: 0x00,
            tag: 0,
            data: vec![1, 2],
        };
        assert_eq!(ok.clone().ensure_success().unwrap(), vec![1, 2]);

        let failed = Response {
            status0: 0x01,
            status1: 0x00,
            ..ok
        };
        assert!(!failed.is_success());
        let err = failed.ensure_success().unwrap_err();
        assert_eq!(err.status_pair(), Some((0x01, 0x00)));
    }
}
