use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use scanchain::cable::sim::{SimulatedCable, SimulatedChain, SimulatedRegister, SimulatedTap};
use scanchain::part::{BitType, ControlBit, Part, SignalDirection, BSR, BYPASS};
use scanchain::{Chain, ChainConfig, Error, ExitMode, FlushStrategy, QueueConfig, TapRegister};
use test_case::test_case;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn connect(
    devices: Vec<SimulatedTap>,
    strategy: FlushStrategy,
    queue: QueueConfig,
) -> (Chain, Rc<RefCell<SimulatedChain>>) {
    init_logging();
    let cable = SimulatedCable::new(devices).with_flush_strategy(strategy);
    let sim = cable.chain();
    let mut chain = Chain::new(ChainConfig {
        queue,
        ..ChainConfig::default()
    });
    chain.connect(Box::new(cable)).unwrap();
    (chain, sim)
}

/// A part with BYPASS and one more instruction `A` with opcode `a`.
fn part_with_opcode(a: &str) -> Part {
    let len = a.len();
    let mut part = Part::new(None);
    part.set_instruction_length(len).unwrap();
    part.add_data_register(BYPASS, 1).unwrap();
    part.add_instruction(BYPASS, &"1".repeat(len), Some(BYPASS))
        .unwrap();
    part.add_instruction("A", a, Some(BYPASS)).unwrap();
    part.set_instruction("A").unwrap();
    part
}

fn captured_instructions(chain: &Chain) -> Vec<String> {
    chain
        .parts()
        .iter()
        .map(|part| {
            part.active_instruction()
                .unwrap()
                .out()
                .to_bit_string()
                .to_string()
        })
        .collect()
}

fn loaded_instructions(sim: &Rc<RefCell<SimulatedChain>>) -> Vec<u64> {
    sim.borrow()
        .devices()
        .iter()
        .map(SimulatedTap::instruction)
        .collect()
}

#[test_case(FlushStrategy::OneByOne, None; "one by one")]
#[test_case(FlushStrategy::CombineTransfers, None; "combined")]
#[test_case(FlushStrategy::CombineTransfers, Some(3); "combined with threshold")]
fn instructions_of_three_parts_form_one_stream(
    strategy: FlushStrategy,
    threshold: Option<usize>,
) {
    let queue = QueueConfig {
        initial_capacity: 2,
        growth: 2,
        optional_flush_threshold: threshold,
    };
    let (mut chain, sim) = connect(
        vec![
            SimulatedTap::new(2),
            SimulatedTap::new(4),
            SimulatedTap::new(3),
        ],
        strategy,
        queue,
    );
    chain.add_part(part_with_opcode("10"));
    chain.add_part(part_with_opcode("0110"));
    chain.add_part(part_with_opcode("011"));
    assert_eq!(chain.total_instr_len(), 9);

    chain
        .shift_instructions_mode(true, true, ExitMode::Idle)
        .unwrap();

    assert_eq!(loaded_instructions(&sim), vec![0b10, 0b0110, 0b011]);
    assert_eq!(captured_instructions(&chain), vec!["01", "0001", "001"]);

    chain
        .part_mut(1)
        .unwrap()
        .add_instruction("B", "1001", Some(BYPASS))
        .unwrap();
    chain.part_mut(1).unwrap().set_instruction("B").unwrap();
    chain
        .shift_instructions_mode(true, true, ExitMode::Idle)
        .unwrap();

    assert_eq!(loaded_instructions(&sim), vec![0b10, 0b1001, 0b011]);
    assert_eq!(captured_instructions(&chain), vec!["01", "0001", "001"]);
    assert_eq!(chain.cable().unwrap().pending(), 0);
}

#[test]
fn bypass_delays_by_one_clock() {
    let (mut chain, _sim) = connect(
        vec![SimulatedTap::new(4)],
        FlushStrategy::OneByOne,
        QueueConfig::default(),
    );
    let mut part = Part::new(None);
    part.set_instruction_length(4).unwrap();
    part.add_data_register(BYPASS, 1).unwrap();
    part.add_instruction(BYPASS, "1111", Some(BYPASS)).unwrap();
    part.set_instruction(BYPASS).unwrap();
    chain.add_part(part);

    chain.shift_instructions().unwrap();
    chain.capture_dr().unwrap();

    let input: TapRegister = "01".parse().unwrap();
    let mut output = TapRegister::new(2).unwrap();
    chain
        .shift_register(&input, Some(&mut output), ExitMode::Idle)
        .unwrap();

    assert_eq!(output.to_bit_string(), "10");
}

#[test]
fn boundary_scan_signal_round_trip() {
    let (mut chain, sim) = connect(
        vec![SimulatedTap::new(4).with_instruction(0b0000, SimulatedRegister::Data(8))],
        FlushStrategy::CombineTransfers,
        QueueConfig::default(),
    );

    let mut part = Part::new(None);
    part.set_instruction_length(4).unwrap();
    part.add_data_register(BSR, 8).unwrap();
    part.add_instruction("EXTEST", "0000", Some(BSR)).unwrap();
    part.add_signal("A", None).unwrap();
    part.define_bit(
        3,
        BitType::Bidir,
        false,
        "A",
        Some(ControlBit {
            bit: 4,
            disable_value: true,
        }),
    )
    .unwrap();
    part.define_bit(4, BitType::Control, true, "", None).unwrap();
    part.set_instruction("EXTEST").unwrap();
    chain.add_part(part);

    chain.part_mut(0).unwrap()
        .set_signal("A", SignalDirection::Output, true)
        .unwrap();
    assert_eq!(
        chain.part(0).unwrap().data_register(BSR).unwrap().input.get(3),
        Some(true)
    );

    chain.shift_instructions().unwrap();
    chain.shift_data_registers(false).unwrap();
    chain.flush().unwrap();

    let stored: Vec<bool> = sim
        .borrow()
        .devices()[0]
        .stored(0b0000)
        .unwrap()
        .iter()
        .by_vals()
        .collect();
    assert_eq!(
        stored,
        vec![false, false, false, true, false, false, false, false]
    );

    chain.shift_data_registers(true).unwrap();
    assert!(chain.part(0).unwrap().get_signal("A").unwrap());
}

#[test]
fn every_part_needs_an_instruction() {
    let (mut chain, _sim) = connect(
        vec![SimulatedTap::new(2), SimulatedTap::new(2)],
        FlushStrategy::OneByOne,
        QueueConfig::default(),
    );
    chain.add_part(part_with_opcode("01"));
    let mut lonely = Part::new(None);
    lonely.set_instruction_length(2).unwrap();
    chain.add_part(lonely);

    assert!(matches!(
        chain.shift_instructions(),
        Err(Error::PartWithoutInstruction(1))
    ));

    let mut no_register = Part::new(None);
    no_register.set_instruction_length(2).unwrap();
    no_register.add_instruction("HIGHZ", "00", None).unwrap();
    no_register.set_instruction("HIGHZ").unwrap();
    *chain.part_mut(1).unwrap() = no_register;

    assert!(chain.shift_instructions().is_ok());
    assert!(matches!(
        chain.shift_data_registers(false),
        Err(Error::PartWithoutDataRegister(1))
    ));
}

#[test]
fn reset_bypass_loads_all_ones() {
    let (mut chain, sim) = connect(
        vec![SimulatedTap::new(3), SimulatedTap::new(5)],
        FlushStrategy::CombineTransfers,
        QueueConfig::default(),
    );
    chain.add_part(part_with_opcode("010"));
    chain.add_part(part_with_opcode("00001"));
    chain.shift_instructions().unwrap();
    chain.flush().unwrap();
    assert_eq!(loaded_instructions(&sim), vec![0b010, 0b00001]);

    chain.reset_bypass().unwrap();
    chain.flush().unwrap();

    assert_eq!(loaded_instructions(&sim), vec![0b111, 0b11111]);
    for part in chain.parts() {
        assert_eq!(part.active_instruction().unwrap().name(), BYPASS);
    }
}
