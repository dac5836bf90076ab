// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem attestation device driver and simulator
//!
//! CryptoMem is a small secure element behind a 256-byte register window. It
//! keeps three measurement registers (PCRs), two volatile counters, a lockable
//! volatile bit word and a 16-byte device identity, and attests to them with
//! an HMAC-SHA256 quote keyed by a device-derived key.
//!
//! ## Supported Commands
//!
//! - `NOP`
//! - `EXTEND`: chain measurement data into a PCR
//! - `QUOTE`: keyed digest over a selection of device state and a nonce
//! - `INCREMENT`: add to a volatile counter
//! - `HKDF`: derive 32 bytes from the device HKDF key
//!
//! ## Example
//!
//! ```no_run
//! use cryptomem::{CryptoMemContext, QuoteMask, SimulatedBus, SimulatorConfig};
//!
//! let bus = SimulatedBus::from_config(&SimulatorConfig::default())?;
//! let mut ctx = CryptoMemContext::new(bus);
//! ctx.extend(0, b"bootloader")?;
//! let _quote = ctx.quote(QuoteMask::all(), b"nonce")?;
//! # Ok::<(), cryptomem::Error>(())
//! ```

mod command;
mod commands;
mod constants;
mod device;
mod error;
pub mod keys;
mod marshal;
mod simulator;
mod state;
mod transport;
mod types;

pub use commands::CryptoMemContext;
pub use constants::*;
pub use error::{Error, Result, TransportError};
pub use types::*;

pub use command::{Command, CommandFrame, Response};
pub use device::{CryptoMemDevice, PollConfig};
pub use keys::{DeviceKeys, HkdfKey, QuoteKey};
pub use marshal::{MessageBuffer, RegisterReader};
pub use simulator::{SimulatedBus, Simulator, SimulatorConfig};
pub use state::DeviceState;
pub use transport::{BlockTransfer, Transport};
