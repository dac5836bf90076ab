// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Driver against the register-window simulator

use cryptomem::{
    reg, CommandFrame, CryptoMemContext, DeviceStatus, Error, Opcode, PollConfig, QuoteMask,
    QuoteReport, SimulatedBus, Simulator, SimulatorConfig, TransportError,
};

fn context_with(config: &SimulatorConfig) -> CryptoMemContext<SimulatedBus> {
    let bus = SimulatedBus::from_config(config).unwrap();
    CryptoMemContext::with_poll_config(bus, PollConfig::immediate(16))
}

fn context() -> CryptoMemContext<SimulatedBus> {
    context_with(&SimulatorConfig::default())
}

#[test]
fn known_answers() {
    let mut ctx = context();
    ctx.extend(0, b"bootloader").unwrap();

    assert_eq!(
        hex::encode(ctx.pcr(0).unwrap()),
        "12c6daf46831764879c2cf43c4dfe94f52dd540da0314846bf5a9e785b5a3c5c"
    );
    assert_eq!(
        hex::encode(ctx.hkdf(b"seed").unwrap()),
        "0827643e33f62cf49359edb29027cd601e591c26129057fc1967cbefe41dcc40"
    );
    assert_eq!(
        hex::encode(ctx.hkdf(&[]).unwrap()),
        "89244b713f26a09a4faa05b0532cff7258ff3f1a1f6c8169c177fbe318cdb6e0"
    );
    assert_eq!(
        hex::encode(ctx.quote(QuoteMask::all(), b"nonce").unwrap()),
        "ebc6ee35e0dc4a96055ddd2d15ab60ce86cddb24c452711d1aaf71982cbc8b12"
    );
    assert_eq!(
        hex::encode(ctx.quote(QuoteMask::empty(), &[]).unwrap()),
        "499bd0a26ac90dace5e43b551f603db4669f55ede54e1743ca831b3c105c91f5"
    );
}

#[test]
fn driver_matches_direct_simulator() {
    let config = SimulatorConfig {
        busy_polls: 3,
        volatile_bits: 0x0000_1234,
        volatile_locks: 0x0000_FF00,
        ..Default::default()
    };
    let mut ctx = context_with(&config);
    let mut sim = Simulator::new(&config).unwrap();

    let long_measurement: Vec<u8> = (0..80).collect();
    for (pcr, data) in [(0, &b"kernel"[..]), (2, &long_measurement[..]), (0, &b"initrd"[..])] {
        ctx.extend(pcr, data).unwrap();
        sim.extend(pcr, data).unwrap();
    }
    ctx.increment(1, 200).unwrap();
    sim.increment(1, 200).unwrap();

    for pcr in 0..3 {
        assert_eq!(ctx.pcr(pcr).unwrap(), sim.pcr(pcr).unwrap());
    }
    assert_eq!(ctx.counter(1).unwrap(), 200);
    assert_eq!(ctx.volatile_bits().unwrap(), 0x0000_1234);
    assert_eq!(ctx.volatile_locks().unwrap(), 0x0000_FF00);
    assert_eq!(ctx.user_data().unwrap(), sim.user_data());
    assert_eq!(ctx.device_uid().unwrap(), sim.device_uid());
    assert_eq!(ctx.snapshot().unwrap(), sim.snapshot());

    let nonce = [0x5A; 80];
    for bits in [0x00, 0x01, 0x46, 0x80, 0xFF] {
        let mask = QuoteMask::from_bits(bits);
        assert_eq!(ctx.quote(mask, &nonce).unwrap(), sim.quote(mask, &nonce).unwrap());
    }
    assert_eq!(ctx.hkdf(&nonce).unwrap(), sim.hkdf(&nonce).unwrap());
}

#[test]
fn caller_tag_is_echoed() {
    let mut ctx = context();
    let frame = CommandFrame::new(Opcode::Nop).with_tag(0xA5);
    let response = ctx.device_mut().execute(&frame, 0).unwrap();
    assert!(response.is_success());
    assert_eq!(response.tag, 0xA5);
}

#[test]
fn unknown_opcode_is_reported() {
    let mut ctx = context();
    let response = ctx
        .device_mut()
        .execute(&CommandFrame::raw(0x42), 0)
        .unwrap();
    assert_eq!(response.status(), DeviceStatus::UnknownCommand);

    let err = ctx
        .device_mut()
        .execute_checked(&CommandFrame::raw(0x42), 0)
        .unwrap_err();
    assert_eq!(err.status_pair(), Some((0xC3, 0xE2)));
    assert_eq!(err.device_status(), Some(DeviceStatus::UnknownCommand));
}

#[test]
fn firmware_rejects_bad_parameters() {
    let mut ctx = context();
    // HKDF requires ARG_1 == 0
    let err = ctx
        .device_mut()
        .execute_raw(0xB0, [0, 1, 0], &[], 32)
        .unwrap()
        .ensure_success()
        .unwrap_err();
    assert_eq!(err.device_status(), Some(DeviceStatus::ParameterError));

    // INCREMENT on a counter that does not exist
    let response = ctx.device_mut().execute_raw(0xC0, [2, 1, 0], &[], 0).unwrap();
    assert_eq!(response.status(), DeviceStatus::ParameterError);
    assert_eq!(ctx.counter(0).unwrap(), 0);
    assert_eq!(ctx.counter(1).unwrap(), 0);
}

#[test]
fn busy_device_times_out() {
    let config = SimulatorConfig {
        busy_polls: 100,
        ..Default::default()
    };
    let mut ctx = context_with(&config);
    let err = ctx.extend(0, b"slow").unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Timeout { attempts: 16 })));
    assert!(ctx.device().bus().is_busy());
}

#[test]
fn zero_poll_budget_observes_completed_command() {
    let bus = SimulatedBus::from_config(&SimulatorConfig::default()).unwrap();
    let mut ctx = CryptoMemContext::with_poll_config(bus, PollConfig::immediate(0));
    ctx.extend(0, b"once").unwrap();

    let mut expected = Simulator::new(&SimulatorConfig::default()).unwrap();
    expected.extend(0, b"once").unwrap();
    assert_eq!(ctx.pcr(0).unwrap(), expected.pcr(0).unwrap());
}

#[test]
fn response_beyond_result_is_cleared() {
    let mut ctx = context();
    ctx.device_mut().write(reg::DATA, &[0xEE; 80]).unwrap();
    ctx.hkdf(b"x").unwrap();
    let tail = ctx.device_mut().read(reg::DATA + 32, 48).unwrap();
    assert_eq!(tail, vec![0; 48]);
}

#[test]
fn quote_report_round_trip() {
    let config = SimulatorConfig::default();
    let mut ctx = context_with(&config);
    ctx.extend(1, b"app").unwrap();

    let mask = QuoteMask::empty()
        .with_pcr(cryptomem::PcrIndex::new(1).unwrap())
        .with_device_uid();
    let digest = ctx.quote(mask, b"challenge").unwrap();
    let report = QuoteReport::new(mask, b"challenge", digest, &ctx.snapshot().unwrap());

    let json = serde_json::to_string(&report).unwrap();
    let parsed: QuoteReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, report);
    assert_eq!(parsed.state.user_data, [0u8; 32]);

    let root_key: [u8; 32] = config.root_key.as_slice().try_into().unwrap();
    let key = cryptomem::QuoteKey::derive(&root_key, &config.quote_seed);
    assert!(parsed.verify(&key));

    let mut tampered = parsed.clone();
    tampered.state.pcrs[1].0[0] ^= 1;
    assert!(!tampered.verify(&key));
}
