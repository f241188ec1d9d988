use pretty_assertions::assert_eq;
use scanchain::part::{BYPASS, DIR};
use scanchain::{Chain, ChainConfig, Error, ScanChainError, TapState};
use test_case::test_case;

const ARM_TAP: u32 = 0x4BA0_0477;
const STM_BS_TAP: u32 = 0x0641_3041;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn sim_chain(config: ChainConfig, devices: &[&str]) -> Chain {
    init_logging();
    let mut chain = Chain::new(config);
    chain.connect_driver("sim", devices).unwrap();
    chain
}

#[test]
fn parts_are_identified_closest_to_tdo_first() {
    let mut chain = sim_chain(
        ChainConfig::default(),
        &["4:0x4ba00477", "5", "8:0x06413041"],
    );

    assert_eq!(chain.detect_parts(None).unwrap(), 3);
    assert_eq!(chain.total_instr_len(), 17);
    assert_eq!(chain.state(), TapState::RunTestIdle);

    let ids: Vec<_> = chain
        .parts()
        .iter()
        .map(|part| part.id().map(|id| id.value()))
        .collect();
    assert_eq!(ids, vec![Some(ARM_TAP), None, Some(STM_BS_TAP)]);

    let lengths: Vec<_> = chain
        .parts()
        .iter()
        .map(|part| part.instruction_length())
        .collect();
    assert_eq!(lengths, vec![4, 5, 8]);

    let arm = chain.part(0).unwrap();
    assert_eq!(arm.manufacturer, "ARM Ltd");
    assert_eq!(arm.name, "0xba00");
    assert_eq!(
        arm.data_register(DIR).unwrap().output.to_u64(),
        u64::from(ARM_TAP)
    );
    assert!(chain.part(1).unwrap().data_register(DIR).is_err());
    for part in chain.parts() {
        assert_eq!(part.active_instruction().unwrap().name(), BYPASS);
    }
}

#[test]
fn instruction_path_length_is_measured() {
    let mut chain = sim_chain(ChainConfig::default(), &["4", "5", "8"]);

    chain.capture_ir().unwrap();
    assert_eq!(chain.detect_register_size().unwrap(), Some(17));

    chain.reset().unwrap();
    chain.capture_dr().unwrap();
    assert_eq!(chain.detect_register_size().unwrap(), Some(3));
}

#[test]
fn too_many_devices_are_reported() {
    let config = ChainConfig::from_yaml_str("detect:\n  max_parts: 1\n").unwrap();
    let mut chain = sim_chain(config, &["4:0x4ba00477", "4:0x4ba00477"]);

    assert!(matches!(
        chain.scan(None),
        Err(Error::ScanChain(ScanChainError::ChainTooLong(32)))
    ));
}

#[test]
fn expected_lengths_must_match_the_capture() {
    let mut chain = sim_chain(ChainConfig::default(), &["4:0x4ba00477", "5:0x4ba00477"]);

    let parts = chain.scan(Some(&[4, 5])).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1].ir_length, 5);

    assert!(chain.scan(Some(&[4, 4])).is_err());
}

#[test]
fn idcodes_are_read_byte_by_byte() {
    let mut chain = sim_chain(ChainConfig::default(), &["4:0x4ba00477"]);

    let bytes = chain.idcode_bytes(None).unwrap();
    assert_eq!(bytes, vec![0x77, 0x04, 0xa0, 0x4b, 0, 0, 0, 0]);
}

#[test_case("sim"; "lowercase")]
#[test_case("SIM"; "uppercase")]
fn drivers_are_found_by_name(name: &str) {
    init_logging();
    let mut chain = Chain::default();
    chain.connect_driver(name, &["2"]).unwrap();
    assert!(chain.is_connected());
    assert_eq!(chain.cable().unwrap().name(), "sim");
}

#[test]
fn unknown_drivers_and_parameters_are_rejected() {
    init_logging();
    let mut chain = Chain::default();
    assert!(chain.connect_driver("does-not-exist", &[]).is_err());
    assert!(chain.connect_driver("sim", &[]).is_err());
    assert!(chain.connect_driver("sim", &["0"]).is_err());
    assert!(chain.connect_driver("sim", &["4:zz"]).is_err());
    assert!(!chain.is_connected());
}
