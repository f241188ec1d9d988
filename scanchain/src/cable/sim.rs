//! A cable driving a simulated chain of TAP controllers.
//!
//! The simulation follows IEEE 1149.1 clock by clock: registers are loaded on the clock
//! leaving a capture state, shifted on every clock in a shift state and latched when an
//! update state is entered. Devices are ordered like the parts of a chain: device `0` is
//! the one closest to TDO.
//!
//! The model is shared through an `Rc`, so a test can keep a handle and inspect the devices
//! while a [`Chain`](crate::Chain) drives the cable.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bitvec::prelude::*;

use super::{CableDriver, CableError, CableFactory, FlushStrategy, PodSignals};
use crate::tap::{RegisterState, TapState};

/// The data register an instruction of a [`SimulatedTap`] connects between TDI and TDO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedRegister {
    /// One bit, captures `0`.
    Bypass,
    /// 32 bits, captures the IDCODE of the device.
    IdCode,
    /// A storage register of the given length which captures the value last updated into it.
    Data(usize),
}

/// One simulated TAP controller with its instruction and data registers.
#[derive(Debug, Clone)]
pub struct SimulatedTap {
    ir_len: usize,
    idcode: Option<u32>,
    instructions: Vec<(u64, SimulatedRegister)>,
    ir_shift: BitVec<u8, Lsb0>,
    dr_shift: BitVec<u8, Lsb0>,
    instruction: u64,
    selected: SimulatedRegister,
    storage: HashMap<u64, BitVec<u8, Lsb0>>,
    ir_updates: usize,
}

impl SimulatedTap {
    /// A device with an instruction register of `ir_len` bits and no IDCODE register.
    pub fn new(ir_len: usize) -> Self {
        let mut tap = Self {
            ir_len: ir_len.max(1),
            idcode: None,
            instructions: vec![],
            ir_shift: BitVec::new(),
            dr_shift: BitVec::new(),
            instruction: 0,
            selected: SimulatedRegister::Bypass,
            storage: HashMap::new(),
            ir_updates: 0,
        };
        tap.reset();
        tap
    }

    /// Give the device an IDCODE register, selected after reset.
    pub fn with_idcode(mut self, idcode: u32) -> Self {
        self.idcode = Some(idcode);
        self.reset();
        self
    }

    /// Make instruction `opcode` select `register`. Unlisted opcodes select BYPASS.
    pub fn with_instruction(mut self, opcode: u64, register: SimulatedRegister) -> Self {
        self.instructions.push((opcode, register));
        if let SimulatedRegister::Data(len) = register {
            self.storage.insert(opcode, BitVec::repeat(false, len));
        }
        self
    }

    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// The instruction last latched by Update-IR or reset.
    pub fn instruction(&self) -> u64 {
        self.instruction
    }

    /// How often Update-IR latched a new instruction.
    pub fn ir_updates(&self) -> usize {
        self.ir_updates
    }

    pub fn selected_register(&self) -> SimulatedRegister {
        self.selected
    }

    /// The value last latched into the storage register of instruction `opcode`.
    pub fn stored(&self, opcode: u64) -> Option<&BitSlice<u8, Lsb0>> {
        self.storage.get(&opcode).map(|bits| bits.as_bitslice())
    }

    fn all_ones(&self) -> u64 {
        if self.ir_len >= 64 {
            u64::MAX
        } else {
            (1 << self.ir_len) - 1
        }
    }

    fn reset(&mut self) {
        self.instruction = self.all_ones();
        self.selected = if self.idcode.is_some() {
            SimulatedRegister::IdCode
        } else {
            SimulatedRegister::Bypass
        };
        self.ir_shift = BitVec::repeat(false, self.ir_len);
        self.dr_shift = bitvec![u8, Lsb0; 0];
    }

    fn capture_ir(&mut self) {
        self.ir_shift = BitVec::repeat(false, self.ir_len);
        self.ir_shift.set(0, true);
    }

    fn capture_dr(&mut self) {
        self.dr_shift = match self.selected {
            SimulatedRegister::Bypass => bitvec![u8, Lsb0; 0],
            SimulatedRegister::IdCode => {
                let idcode = self.idcode.unwrap_or(0);
                (0..32).map(|i| idcode & (1 << i) != 0).collect()
            }
            SimulatedRegister::Data(len) => self
                .storage
                .get(&self.instruction)
                .cloned()
                .unwrap_or_else(|| BitVec::repeat(false, len)),
        };
    }

    /// Shift `tdi` in at the TDI end, returning the bit leaving at the TDO end.
    fn shift(&mut self, ir: bool, tdi: bool) -> bool {
        let register = if ir {
            &mut self.ir_shift
        } else {
            &mut self.dr_shift
        };
        if register.is_empty() {
            return tdi;
        }
        let tdo = register.remove(0);
        register.push(tdi);
        tdo
    }

    fn tdo(&self, ir: bool) -> bool {
        let register = if ir { &self.ir_shift } else { &self.dr_shift };
        register.first().map(|bit| *bit).unwrap_or(false)
    }

    fn update_ir(&mut self) {
        self.instruction = self
            .ir_shift
            .iter()
            .take(64)
            .enumerate()
            .fold(0, |acc, (i, bit)| acc | (u64::from(*bit) << i));
        self.ir_updates += 1;

        self.selected = self
            .instructions
            .iter()
            .find(|(opcode, _)| *opcode == self.instruction)
            .map(|(_, register)| *register)
            .unwrap_or(SimulatedRegister::Bypass);
        if self.instruction == self.all_ones() {
            self.selected = SimulatedRegister::Bypass;
        }
    }

    fn update_dr(&mut self) {
        if let SimulatedRegister::Data(_) = self.selected {
            self.storage.insert(self.instruction, self.dr_shift.clone());
        }
    }
}

/// The simulated chain behind a [`SimulatedCable`].
#[derive(Debug)]
pub struct SimulatedChain {
    devices: Vec<SimulatedTap>,
    state: TapState,
    signals: PodSignals,
    clocks: usize,
}

impl SimulatedChain {
    fn new(devices: Vec<SimulatedTap>) -> Self {
        Self {
            devices,
            state: TapState::TestLogicReset,
            signals: PodSignals::TRST | PodSignals::RESET,
            clocks: 0,
        }
    }

    /// The state all controllers of the chain are in.
    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn devices(&self) -> &[SimulatedTap] {
        &self.devices
    }

    /// Total number of TCK cycles seen.
    pub fn clocks(&self) -> usize {
        self.clocks
    }

    pub fn signals(&self) -> PodSignals {
        self.signals
    }

    fn reset(&mut self) {
        self.state = TapState::TestLogicReset;
        for device in &mut self.devices {
            device.reset();
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool) {
        self.clocks += 1;
        if !self.signals.contains(PodSignals::TRST) {
            return;
        }

        match self.state {
            TapState::Dr(RegisterState::Capture) => {
                self.devices.iter_mut().for_each(SimulatedTap::capture_dr)
            }
            TapState::Ir(RegisterState::Capture) => {
                self.devices.iter_mut().for_each(SimulatedTap::capture_ir)
            }
            TapState::Dr(RegisterState::Shift) | TapState::Ir(RegisterState::Shift) => {
                let ir = self.state.is_ir();
                let mut bit = tdi;
                for device in self.devices.iter_mut().rev() {
                    bit = device.shift(ir, bit);
                }
            }
            _ => {}
        }

        self.state = self.state.next(tms);

        match self.state {
            TapState::Dr(RegisterState::Update) => {
                self.devices.iter_mut().for_each(SimulatedTap::update_dr)
            }
            TapState::Ir(RegisterState::Update) => {
                self.devices.iter_mut().for_each(SimulatedTap::update_ir)
            }
            TapState::TestLogicReset => self.reset(),
            _ => {}
        }
    }

    fn tdo(&self) -> bool {
        match (self.state, self.devices.first()) {
            (TapState::Dr(RegisterState::Shift), Some(device)) => device.tdo(false),
            (TapState::Ir(RegisterState::Shift), Some(device)) => device.tdo(true),
            _ => false,
        }
    }
}

/// A cable connected to a [`SimulatedChain`].
#[derive(Debug)]
pub struct SimulatedCable {
    chain: Rc<RefCell<SimulatedChain>>,
    strategy: FlushStrategy,
    frequency: u32,
}

impl SimulatedCable {
    pub fn new(devices: Vec<SimulatedTap>) -> Self {
        Self {
            chain: Rc::new(RefCell::new(SimulatedChain::new(devices))),
            strategy: FlushStrategy::OneByOne,
            frequency: 0,
        }
    }

    /// Flush the queue with `strategy` instead of one item at a time.
    pub fn with_flush_strategy(mut self, strategy: FlushStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// A handle to the simulated devices.
    pub fn chain(&self) -> Rc<RefCell<SimulatedChain>> {
        self.chain.clone()
    }
}

impl CableDriver for SimulatedCable {
    fn name(&self) -> &str {
        "sim"
    }

    fn set_frequency(&mut self, frequency_hz: u32) -> Result<u32, CableError> {
        self.frequency = frequency_hz;
        Ok(frequency_hz)
    }

    fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<(), CableError> {
        let mut chain = self.chain.borrow_mut();
        for _ in 0..count {
            chain.clock(tms, tdi);
        }
        Ok(())
    }

    fn get_tdo(&mut self) -> Result<bool, CableError> {
        Ok(self.chain.borrow().tdo())
    }

    fn set_signal(
        &mut self,
        mask: PodSignals,
        value: PodSignals,
    ) -> Result<PodSignals, CableError> {
        let mut chain = self.chain.borrow_mut();
        let old = chain.signals;
        chain.signals = (old - mask) | (value & mask);
        if !chain.signals.contains(PodSignals::TRST) {
            chain.reset();
        }
        Ok(old)
    }

    fn get_signal(&mut self, signal: PodSignals) -> Result<bool, CableError> {
        Ok(self.chain.borrow().signals.contains(signal))
    }

    fn flush_strategy(&self) -> FlushStrategy {
        self.strategy
    }
}

/// Opens a [`SimulatedCable`]. Every parameter describes one device, closest to TDO first,
/// as `<ir length>` or `<ir length>:<idcode>` with the IDCODE in hex.
#[derive(Debug)]
pub struct SimulatedCableFactory;

impl SimulatedCableFactory {
    fn parse_device(param: &str) -> Result<SimulatedTap, CableError> {
        let invalid = || CableError::InvalidParameter(param.to_string());

        let (ir_len, idcode) = match param.split_once(':') {
            Some((ir_len, idcode)) => (ir_len, Some(idcode)),
            None => (param, None),
        };

        let ir_len: usize = ir_len.trim().parse().map_err(|_| invalid())?;
        if ir_len == 0 {
            return Err(invalid());
        }

        let mut tap = SimulatedTap::new(ir_len);
        if let Some(idcode) = idcode {
            let idcode = idcode.trim();
            let digits = idcode
                .strip_prefix("0x")
                .or_else(|| idcode.strip_prefix("0X"))
                .unwrap_or(idcode);
            let idcode = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
            tap = tap.with_idcode(idcode);
        }
        Ok(tap)
    }
}

impl CableFactory for SimulatedCableFactory {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn description(&self) -> &'static str {
        "Simulated chain of IEEE 1149.1 devices"
    }

    fn open(&self, params: &[&str]) -> Result<Box<dyn CableDriver>, CableError> {
        if params.is_empty() {
            return Err(CableError::InvalidParameter(
                "at least one device is required".to_string(),
            ));
        }

        let devices = params
            .iter()
            .map(|param| Self::parse_device(param))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Simulating a chain of {} devices", devices.len());
        Ok(Box::new(SimulatedCable::new(devices)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn clock_all(cable: &mut SimulatedCable, tms: &[bool]) {
        for tms in tms {
            cable.clock(*tms, false, 1).unwrap();
        }
    }

    #[test]
    fn idcode_is_selected_after_reset() {
        let mut cable = SimulatedCable::new(vec![SimulatedTap::new(4).with_idcode(0x4ba0_0477)]);
        // Run-Test/Idle, Select-DR-Scan, Capture-DR, Shift-DR
        clock_all(&mut cable, &[false, true, false, false]);

        let mut idcode = 0u32;
        for i in 0..32 {
            if cable.get_tdo().unwrap() {
                idcode |= 1 << i;
            }
            cable.clock(false, false, 1).unwrap();
        }
        assert_eq!(idcode, 0x4ba0_0477);
    }

    #[test]
    fn ir_capture_pattern() {
        let mut cable = SimulatedCable::new(vec![SimulatedTap::new(5)]);
        // Run-Test/Idle, Select-DR-Scan, Select-IR-Scan, Capture-IR, Shift-IR
        clock_all(&mut cable, &[false, true, true, false, false]);
        assert_eq!(cable.chain().borrow().state(), TapState::Ir(RegisterState::Shift));

        let mut bits = bitvec![u8, Lsb0; 0; 5];
        cable
            .transfer(bits![u8, Lsb0; 0, 0, 0, 0, 0], Some(bits.as_mut_bitslice()))
            .unwrap();
        assert_eq!(bits.as_bitslice(), bits![u8, Lsb0; 1, 0, 0, 0, 0]);
    }

    #[test]
    fn update_ir_latches_instruction() {
        let mut cable = SimulatedCable::new(vec![
            SimulatedTap::new(4).with_instruction(0b0010, SimulatedRegister::Data(6))
        ]);
        clock_all(&mut cable, &[false, true, true, false, false]);
        cable
            .transfer(bits![u8, Lsb0; 0, 1, 0], None)
            .unwrap();
        // Last bit with TMS high, then Update-IR.
        cable.clock(true, false, 1).unwrap();
        cable.clock(true, false, 1).unwrap();

        let chain = cable.chain();
        let chain = chain.borrow();
        assert_eq!(chain.devices()[0].instruction(), 0b0010);
        assert_eq!(chain.devices()[0].selected_register(), SimulatedRegister::Data(6));
    }

    #[test]
    fn trst_resets_the_chain() {
        let mut cable = SimulatedCable::new(vec![SimulatedTap::new(4)]);
        clock_all(&mut cable, &[false, true]);
        cable
            .set_signal(PodSignals::TRST, PodSignals::empty())
            .unwrap();
        assert_eq!(cable.chain().borrow().state(), TapState::TestLogicReset);

        // Clocks are ignored while TRST is asserted.
        cable.clock(false, false, 3).unwrap();
        assert_eq!(cable.chain().borrow().state(), TapState::TestLogicReset);
        assert!(!cable.get_signal(PodSignals::TRST).unwrap());
    }

    #[test]
    fn factory_parses_devices() {
        let driver = SimulatedCableFactory.open(&["4:0x4ba00477", "5"]).unwrap();
        assert_eq!(driver.name(), "sim");

        assert!(matches!(
            SimulatedCableFactory.open(&["x"]),
            Err(CableError::InvalidParameter(_))
        ));
        assert!(matches!(
            SimulatedCableFactory.open(&["0"]),
            Err(CableError::InvalidParameter(_))
        ));
        assert!(matches!(
            SimulatedCableFactory.open(&[]),
            Err(CableError::InvalidParameter(_))
        ));
    }
}
