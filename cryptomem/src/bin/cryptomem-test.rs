// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CryptoMem Test CLI
//!
//! Drives the register-window simulator through the full driver stack.
//!
//! Usage:
//!   cryptomem-test [--config sim.json] <command>
//!
//! Commands:
//!   info       - Show the device state
//!   extend     - Extend a PCR and print the new value
//!   quote      - Generate a quote report and verify it
//!   hkdf       - Derive 32 bytes from a seed
//!   increment  - Increment a volatile counter
//!   selftest   - Run every command and compare with the simulator

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use cryptomem::{
    keys, CryptoMemContext, PollConfig, QuoteKey, QuoteMask, QuoteReport, SimulatedBus,
    Simulator, SimulatorConfig, KEY_SIZE,
};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Simulator configuration (JSON)
    #[arg(short, long, env = "CRYPTOMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of status polls per command
    #[arg(long, default_value_t = 1000)]
    max_polls: u32,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device state
    Info,
    /// Extend a PCR and print the new value
    Extend(ExtendArgs),
    /// Generate a quote report and verify it
    Quote(QuoteArgs),
    /// Derive 32 bytes from a seed
    Hkdf(HkdfArgs),
    /// Increment a volatile counter
    Increment(IncrementArgs),
    /// Run every command and compare with the simulator
    Selftest,
}

#[derive(Args)]
struct ExtendArgs {
    /// PCR index (0..=2)
    #[arg(short, long, default_value_t = 0)]
    pcr: usize,
    /// Measurement data (hex)
    #[arg(short, long)]
    data: String,
}

#[derive(Args)]
struct QuoteArgs {
    /// Field selection mask, e.g. 0xff
    #[arg(short, long, value_parser = parse_u8, default_value = "0xff")]
    mask: u8,
    /// Nonce (hex)
    #[arg(short, long, default_value = "")]
    nonce: String,
    /// Extend PCRs before quoting, as `<index>:<hex data>`
    #[arg(short, long)]
    extend: Vec<String>,
}

#[derive(Args)]
struct HkdfArgs {
    /// Seed (hex)
    #[arg(short, long, default_value = "")]
    seed: String,
}

#[derive(Args)]
struct IncrementArgs {
    /// Counter index (0..=1)
    #[arg(short, long, default_value_t = 0)]
    counter: usize,
    /// Positive addend
    #[arg(short, long, default_value_t = 1)]
    addend: u8,
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    value.map_err(|e| format!("invalid byte value {s:?}: {e}"))
}

fn decode_hex(name: &str, s: &str) -> Result<Vec<u8>> {
    hex::decode(s).with_context(|| format!("invalid hex in {name}"))
}

fn load_config(path: Option<&PathBuf>) -> Result<SimulatorConfig> {
    let Some(path) = path else {
        return Ok(SimulatorConfig::default());
    };
    let content = fs_err::read_to_string(path)?;
    serde_json::from_str(&content).context("failed to parse simulator config")
}

fn open(config: &SimulatorConfig, max_polls: u32) -> Result<CryptoMemContext<SimulatedBus>> {
    let bus = SimulatedBus::from_config(config).context("failed to create simulator")?;
    let poll = PollConfig {
        max_attempts: max_polls,
        ..Default::default()
    };
    Ok(CryptoMemContext::with_poll_config(bus, poll))
}

/// Quote key as a verifier provisioned with the same root key would derive it
fn verifier_key(config: &SimulatorConfig) -> Result<QuoteKey> {
    let root_key: [u8; KEY_SIZE] = config
        .root_key
        .as_slice()
        .try_into()
        .context("root key must be 32 bytes")?;
    let key = keys::derive_device_key(&root_key, keys::QUOTE_TAG, &config.quote_seed);
    Ok(QuoteKey::from_bytes(*key))
}

fn cmd_info(ctx: &mut CryptoMemContext<SimulatedBus>) -> Result<()> {
    let snapshot = ctx.snapshot().context("failed to read device state")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_extend(ctx: &mut CryptoMemContext<SimulatedBus>, args: ExtendArgs) -> Result<()> {
    let data = decode_hex("data", &args.data)?;
    ctx.extend(args.pcr, &data).context("EXTEND failed")?;
    let pcr = ctx.pcr(args.pcr)?;
    println!("PCR[{}] = {}", args.pcr, hex::encode(pcr));
    Ok(())
}

fn cmd_quote(
    ctx: &mut CryptoMemContext<SimulatedBus>,
    config: &SimulatorConfig,
    args: QuoteArgs,
) -> Result<()> {
    for measurement in &args.extend {
        let Some((index, data)) = measurement.split_once(':') else {
            bail!("invalid measurement {measurement:?}, expected <index>:<hex data>");
        };
        let index: usize = index.parse().context("invalid PCR index")?;
        ctx.extend(index, &decode_hex("measurement", data)?)
            .with_context(|| format!("failed to extend PCR {index}"))?;
    }

    let mask = QuoteMask::from_bits(args.mask);
    let nonce = decode_hex("nonce", &args.nonce)?;
    let digest = ctx.quote(mask, &nonce).context("QUOTE failed")?;
    let snapshot = ctx.snapshot()?;
    let report = QuoteReport::new(mask, &nonce, digest, &snapshot);

    if !report.verify(&verifier_key(config)?) {
        bail!("quote does not verify against the disclosed state");
    }
    info!("quote verified");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_hkdf(ctx: &mut CryptoMemContext<SimulatedBus>, args: HkdfArgs) -> Result<()> {
    let seed = decode_hex("seed", &args.seed)?;
    let output = ctx.hkdf(&seed).context("HKDF failed")?;
    println!("{}", hex::encode(output));
    Ok(())
}

fn cmd_increment(ctx: &mut CryptoMemContext<SimulatedBus>, args: IncrementArgs) -> Result<()> {
    let response = ctx.increment(args.counter, args.addend)?;
    println!("status: {}", response.error_description());
    println!("counter[{}] = {}", args.counter, ctx.counter(args.counter)?);
    Ok(())
}

fn check<T: PartialEq + std::fmt::Debug>(name: &str, driver: T, direct: T) -> Result<()> {
    if driver != direct {
        bail!("{name}: driver returned {driver:?}, simulator returned {direct:?}");
    }
    println!("✓ {name}");
    Ok(())
}

fn cmd_selftest(
    ctx: &mut CryptoMemContext<SimulatedBus>,
    config: &SimulatorConfig,
) -> Result<()> {
    let mut sim = Simulator::new(config)?;

    ctx.nop().context("NOP failed")?;
    println!("✓ nop");

    for pcr in 0..3 {
        let data = format!("measurement {pcr}");
        ctx.extend(pcr, data.as_bytes())?;
        sim.extend(pcr, data.as_bytes())?;
        check(&format!("extend pcr {pcr}"), ctx.pcr(pcr)?, sim.pcr(pcr)?)?;
    }

    for counter in 0..2 {
        let response = ctx.increment(counter, 7)?;
        if !response.is_success() {
            bail!("INCREMENT failed: {}", response.error_description());
        }
        sim.increment(counter, 7)?;
        check(
            &format!("increment counter {counter}"),
            ctx.counter(counter)?,
            sim.counter(counter)?,
        )?;
    }

    check("hkdf", ctx.hkdf(b"selftest")?, sim.hkdf(b"selftest")?)?;

    for mask in [0x00, 0x01, 0x80, 0xFF] {
        let mask = QuoteMask::from_bits(mask);
        check(
            &format!("quote mask 0x{:02x}", mask.bits()),
            ctx.quote(mask, b"nonce")?,
            sim.quote(mask, b"nonce")?,
        )?;
    }

    check("snapshot", ctx.snapshot()?, sim.snapshot())?;
    println!("all checks passed");
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let mut ctx = open(&config, cli.max_polls)?;

    match cli.command {
        Commands::Info => cmd_info(&mut ctx)?,
        Commands::Extend(args) => cmd_extend(&mut ctx, args)?,
        Commands::Quote(args) => cmd_quote(&mut ctx, &config, args)?,
        Commands::Hkdf(args) => cmd_hkdf(&mut ctx, args)?,
        Commands::Increment(args) => cmd_increment(&mut ctx, args)?,
        Commands::Selftest => cmd_selftest(&mut ctx, &config)?,
    }
    Ok(())
}
