// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Little-endian marshalling helpers
//!
//! All multi-byte integers in the register window and in quote messages are
//! little-endian.

use crate::error::{Error, Result};

/// Buffer for building digest input messages
#[derive(Debug)]
pub struct MessageBuffer {
    data: Vec<u8>,
}

impl MessageBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over bytes read back from the register window
#[derive(Debug)]
pub struct RegisterReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RegisterReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.get_array()?))
    }

    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(Error::ProtocolViolation(format!(
                "register data underflow reading {} bytes (remaining: {})",
                N,
                self.remaining()
            )));
        }
        let mut v = [0u8; N];
        v.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(v)
    }
}
