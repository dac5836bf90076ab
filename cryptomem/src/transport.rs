// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Register transport and chunked block transfers
//!
//! The device exposes a 256-byte register window. A [`Transport`] moves at
//! most [`MAX_TRANSFER_SIZE`] bytes per call; [`BlockTransfer`] splits larger
//! requests into consecutive chunks.

use tracing::trace;

use crate::constants::{IOMEM_SIZE, MAX_TRANSFER_SIZE};
use crate::error::{Error, Result, TransportError};

/// Synchronous block access to the device register window
///
/// Implementations are only ever asked for transfers of at most
/// [`MAX_TRANSFER_SIZE`] bytes.
pub trait Transport {
    /// Read `len` bytes starting at `address`
    fn read(&mut self, address: u8, len: usize) -> std::result::Result<Vec<u8>, TransportError>;

    /// Write `data` starting at `address`
    fn write(&mut self, address: u8, data: &[u8]) -> std::result::Result<(), TransportError>;
}

/// Chunked reads and writes on top of a [`Transport`]
pub struct BlockTransfer<T> {
    bus: T,
}

impl<T: Transport> BlockTransfer<T> {
    pub fn new(bus: T) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &T {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut T {
        &mut self.bus
    }

    pub fn into_inner(self) -> T {
        self.bus
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&mut self, offset: u8, len: usize) -> Result<Vec<u8>> {
        check_window(offset, len)?;

        let mut result = Vec::with_capacity(len);
        let mut address = offset as usize;

        while result.len() < len {
            let chunk_len = (len - result.len()).min(MAX_TRANSFER_SIZE);
            trace!("bus read {} bytes at 0x{:02x}", chunk_len, address);

            let chunk = self.bus.read(address as u8, chunk_len)?;
            if chunk.len() != chunk_len {
                return Err(TransportError::ShortRead {
                    address: address as u8,
                    expected: chunk_len,
                    actual: chunk.len(),
                }
                .into());
            }
            result.extend_from_slice(&chunk);
            address += chunk_len;
        }

        Ok(result)
    }

    /// Write `data` starting at `offset`
    pub fn write(&mut self, offset: u8, data: &[u8]) -> Result<()> {
        check_window(offset, data.len())?;

        let mut address = offset as usize;
        for chunk in data.chunks(MAX_TRANSFER_SIZE) {
            trace!("bus write {} bytes at 0x{:02x}", chunk.len(), address);
            self.bus.write(address as u8, chunk)?;
            address += chunk.len();
        }

        Ok(())
    }
}

fn check_window(offset: u8, len: usize) -> Result<()> {
    if offset as usize + len > IOMEM_SIZE {
        return Err(Error::ProtocolViolation(format!(
            "transfer of {} bytes at 0x{:02x} exceeds the register window",
            len, offset
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<(u8, Vec<u8>)>,
        reads: Vec<(u8, usize)>,
        fail_after: Option<usize>,
    }

    impl RecordingBus {
        fn transfers(&self) -> usize {
            self.writes.len() + self.reads.len()
        }

        fn check_failure(&self) -> std::result::Result<(), String> {
            match self.fail_after {
                Some(n) if self.transfers() >= n => Err("injected failure".to_string()),
                _ => Ok(()),
            }
        }
    }

    impl Transport for RecordingBus {
        fn read(
            &mut self,
            address: u8,
            len: usize,
        ) -> std::result::Result<Vec<u8>, TransportError> {
            assert!(len <= MAX_TRANSFER_SIZE);
            self.check_failure().map_err(|reason| TransportError::Read {
                address,
                len,
                reason,
            })?;
            self.reads.push((address, len));
            Ok((0..len).map(|i| address.wrapping_add(i as u8)).collect())
        }

        fn write(&mut self, address: u8, data: &[u8]) -> std::result::Result<(), TransportError> {
            assert!(data.len() <= MAX_TRANSFER_SIZE);
            self.check_failure().map_err(|reason| TransportError::Write {
                address,
                len: data.len(),
                reason,
            })?;
            self.writes.push((address, data.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_write_single_chunk() {
        let mut io = BlockTransfer::new(RecordingBus::default());
        let data = [0x5Au8; 32];
        io.write(0x00, &data).unwrap();

        assert_eq!(io.bus().writes, vec![(0x00, data.to_vec())]);
    }

    #[test]
    fn test_write_two_chunks() {
        let mut io = BlockTransfer::new(RecordingBus::default());
        let data: Vec<u8> = (0..50).collect();
        io.write(0x00, &data).unwrap();

        let writes = &io.bus().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (0x00, data[..32].to_vec()));
        assert_eq!(writes[1], (0x20, data[32..].to_vec()));
        assert_eq!(writes.iter().flat_map(|(_, c)| c.clone()).collect::<Vec<_>>(), data);
    }

    #[test]
    fn test_read_chunks() {
        let mut io = BlockTransfer::new(RecordingBus::default());
        let data = io.read(0x90, 96).unwrap();

        assert_eq!(io.bus().reads, vec![(0x90, 32), (0xB0, 32), (0xD0, 32)]);
        let expected: Vec<u8> = (0x90..=0xEF).collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_zero_length_is_noop() {
        let mut io = BlockTransfer::new(RecordingBus::default());
        assert!(io.read(0x00, 0).unwrap().is_empty());
        io.write(0x00, &[]).unwrap();
        assert_eq!(io.bus().transfers(), 0);
    }

    #[test]
    fn test_error_aborts_remaining_chunks() {
        let mut io = BlockTransfer::new(RecordingBus {
            fail_after: Some(1),
            ..Default::default()
        });
        let err = io.write(0x00, &[0u8; 80]).unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::Write { address: 0x20, .. })));
        assert_eq!(io.bus().writes.len(), 1);
    }

    #[test]
    fn test_window_bounds() {
        let mut io = BlockTransfer::new(RecordingBus::default());
        assert!(io.read(0xF0, 16).is_ok());
        assert!(matches!(io.read(0xF0, 17), Err(Error::ProtocolViolation(_))));
    }
}
