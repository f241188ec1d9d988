//! Parts of a scan chain: their instructions, data registers and the pins exposed through the
//! boundary scan register.

mod bsbit;
mod data_register;
mod database;
mod description;
mod instruction;
mod signal;

use std::fmt;

pub use bsbit::{BitType, BoundaryScanBit, ControlBit};
pub use data_register::DataRegister;
pub use database::{PartDatabase, PartDatabaseEntry};
pub use description::{
    BoundaryBitDescription, DataRegisterDescription, InstructionDescription, PartDescription,
    SignalAliasDescription, SignalDescription,
};
pub use instruction::Instruction;
pub use signal::{Signal, SignalAlias, SignalDirection};

use crate::idcode::IdCode;
use crate::register::{RegisterError, TapRegister};

/// Name of the boundary scan register.
pub const BSR: &str = "BSR";
/// Name of the device identification register.
pub const DIR: &str = "DIR";
/// Name of the bypass register and instruction.
pub const BYPASS: &str = "BYPASS";

/// Errors while defining or using the registers and signals of a part.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    #[error("Unknown instruction '{0}'")]
    InstructionNotFound(String),
    #[error("Unknown data register '{0}'")]
    DataRegisterNotFound(String),
    #[error("Unknown signal '{0}'")]
    SignalNotFound(String),
    #[error("Instruction '{0}' is already defined")]
    DuplicateInstruction(String),
    #[error("Data register '{0}' is already defined")]
    DuplicateDataRegister(String),
    #[error("Signal '{0}' is already defined")]
    DuplicateSignal(String),
    #[error("Boundary scan bit {0} is already defined")]
    DuplicateBit(usize),
    #[error("The part has no boundary scan register")]
    BoundaryScanRegisterMissing,
    #[error("Bit {bit} is outside of the {len} bit boundary scan register")]
    BitOutOfRange { bit: usize, len: usize },
    #[error("Instruction is {actual} bits long, the instruction register has {expected}")]
    InstructionLengthMismatch { expected: usize, actual: usize },
    #[error("The instruction length cannot change once instructions are defined")]
    InstructionsAlreadyDefined,
    #[error("Signal '{0}' cannot be driven as an output")]
    NotAnOutput(String),
    #[error("Signal '{0}' cannot be read as an input")]
    NotAnInput(String),
    #[error("Invalid boundary scan bit type '{0}'")]
    InvalidBitType(String),
    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// One chip on the scan chain.
///
/// Instructions refer to their data register by index, so registers have to be defined before
/// the instructions selecting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    id: Option<IdCode>,
    /// Board level name, e.g. `U12`.
    pub alias: Option<String>,
    pub manufacturer: String,
    pub name: String,
    pub stepping: String,
    instruction_length: usize,
    instructions: Vec<Instruction>,
    data_registers: Vec<DataRegister>,
    signals: Vec<Signal>,
    signal_aliases: Vec<SignalAlias>,
    /// Indexed by BSR position, sized when the BSR is defined.
    bsbits: Vec<Option<BoundaryScanBit>>,
    active_instruction: Option<usize>,
}

impl Part {
    pub fn new(id: Option<IdCode>) -> Self {
        Self {
            id,
            alias: None,
            manufacturer: String::new(),
            name: String::new(),
            stepping: String::new(),
            instruction_length: 0,
            instructions: Vec::new(),
            data_registers: Vec::new(),
            signals: Vec::new(),
            signal_aliases: Vec::new(),
            bsbits: Vec::new(),
            active_instruction: None,
        }
    }

    /// Build a part from its declarative description.
    pub fn from_description(
        id: Option<IdCode>,
        description: &PartDescription,
    ) -> Result<Self, PartError> {
        let mut part = Part::new(id);
        part.manufacturer = description.manufacturer.clone();
        part.name = description.name.clone();
        part.stepping = description.stepping.clone();
        part.set_instruction_length(description.instruction_length)?;

        for register in &description.data_registers {
            part.add_data_register(&register.name, register.length)?;
        }
        for instruction in &description.instructions {
            part.add_instruction(
                &instruction.name,
                &instruction.code,
                instruction.register.as_deref(),
            )?;
        }
        for signal in &description.signals {
            part.add_signal(&signal.name, signal.pin.clone())?;
        }
        for alias in &description.aliases {
            part.add_signal_alias(&alias.name, &alias.signal)?;
        }
        for bit in &description.boundary_bits {
            part.define_bit(
                bit.bit,
                bit.bit_type,
                bit.safe,
                bit.signal.as_deref().unwrap_or(""),
                bit.control,
            )?;
        }

        Ok(part)
    }

    pub fn id(&self) -> Option<IdCode> {
        self.id
    }

    pub fn instruction_length(&self) -> usize {
        self.instruction_length
    }

    pub fn set_instruction_length(&mut self, length: usize) -> Result<(), PartError> {
        if !self.instructions.is_empty() && length != self.instruction_length {
            return Err(PartError::InstructionsAlreadyDefined);
        }
        self.instruction_length = length;
        Ok(())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn data_registers(&self) -> &[DataRegister] {
        &self.data_registers
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// The boundary scan register length, zero without a BSR.
    pub fn boundary_length(&self) -> usize {
        self.bsbits.len()
    }

    pub fn boundary_bit(&self, bit: usize) -> Option<&BoundaryScanBit> {
        self.bsbits.get(bit).and_then(Option::as_ref)
    }

    /// Define a data register of `len` bits.
    ///
    /// Defining the `BSR` sizes the boundary scan bit table, defining the `DIR` preloads its
    /// output with the IDCODE of the part.
    pub fn add_data_register(&mut self, name: &str, len: usize) -> Result<usize, PartError> {
        if self.find_data_register(name).is_ok() {
            return Err(PartError::DuplicateDataRegister(name.to_string()));
        }

        let register = DataRegister::new(name, len)?;
        if name == BSR {
            self.bsbits = vec![None; len];
        }

        self.data_registers.push(register);
        let index = self.data_registers.len() - 1;
        if name == DIR {
            self.preload_idcode(index);
        }
        Ok(index)
    }

    fn preload_idcode(&mut self, register: usize) {
        let Some(id) = self.id else {
            return;
        };
        let register = &mut self.data_registers[register].output;
        let n = register.len().min(IdCode::LEN);
        for bit in 0..n {
            register.set(bit, id.value() & (1 << bit) != 0);
        }
    }

    /// Change the length of data register `name`, clearing its contents.
    ///
    /// Resizing the `BSR` drops all boundary scan bit definitions, so signals have to be
    /// mapped again with [`define_bit`](Self::define_bit).
    pub fn resize_data_register(&mut self, name: &str, len: usize) -> Result<(), PartError> {
        let index = self.find_data_register(name)?;
        self.data_registers[index].resize(len)?;

        if name == BSR {
            self.bsbits = vec![None; len];
            for signal in &mut self.signals {
                signal.input = None;
                signal.output = None;
            }
        }
        if name == DIR {
            self.preload_idcode(index);
        }
        Ok(())
    }

    /// Define an instruction with MSB-first opcode `code` selecting `register`.
    pub fn add_instruction(
        &mut self,
        name: &str,
        code: &str,
        register: Option<&str>,
    ) -> Result<usize, PartError> {
        if self.find_instruction(name).is_ok() {
            return Err(PartError::DuplicateInstruction(name.to_string()));
        }
        if code.len() != self.instruction_length {
            return Err(PartError::InstructionLengthMismatch {
                expected: self.instruction_length,
                actual: code.len(),
            });
        }

        let value: TapRegister = code.parse()?;
        let mut instruction = Instruction::new(name, value);
        instruction.data_register = register
            .map(|register| self.find_data_register(register))
            .transpose()?;

        self.instructions.push(instruction);
        Ok(self.instructions.len() - 1)
    }

    pub fn add_signal(&mut self, name: &str, pin: Option<String>) -> Result<usize, PartError> {
        if self.find_signal(name).is_ok() {
            return Err(PartError::DuplicateSignal(name.to_string()));
        }
        self.signals.push(Signal::new(name, pin));
        Ok(self.signals.len() - 1)
    }

    /// Make `signal` reachable under the additional name `alias`.
    pub fn add_signal_alias(&mut self, alias: &str, signal: &str) -> Result<(), PartError> {
        if self.find_signal(alias).is_ok() {
            return Err(PartError::DuplicateSignal(alias.to_string()));
        }
        let signal = self.find_signal(signal)?;
        self.signal_aliases.push(SignalAlias {
            name: alias.to_string(),
            signal,
        });
        Ok(())
    }

    pub fn find_instruction(&self, name: &str) -> Result<usize, PartError> {
        self.instructions
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| PartError::InstructionNotFound(name.to_string()))
    }

    pub fn find_data_register(&self, name: &str) -> Result<usize, PartError> {
        self.data_registers
            .iter()
            .position(|r| r.name() == name)
            .ok_or_else(|| PartError::DataRegisterNotFound(name.to_string()))
    }

    /// Look a signal up by its name or one of its aliases.
    pub fn find_signal(&self, name: &str) -> Result<usize, PartError> {
        self.signals
            .iter()
            .position(|s| s.name() == name)
            .or_else(|| {
                self.signal_aliases
                    .iter()
                    .find(|alias| alias.name == name)
                    .map(|alias| alias.signal)
            })
            .ok_or_else(|| PartError::SignalNotFound(name.to_string()))
    }

    pub fn data_register(&self, name: &str) -> Result<&DataRegister, PartError> {
        let index = self.find_data_register(name)?;
        Ok(&self.data_registers[index])
    }

    pub fn data_register_mut(&mut self, name: &str) -> Result<&mut DataRegister, PartError> {
        let index = self.find_data_register(name)?;
        Ok(&mut self.data_registers[index])
    }

    /// Select the instruction shifted by the next instruction scan.
    ///
    /// An unknown name leaves the part without an active instruction.
    pub fn set_instruction(&mut self, name: &str) -> Result<(), PartError> {
        let found = self.find_instruction(name);
        self.active_instruction = found.as_ref().ok().copied();
        found.map(|_| ())
    }

    pub fn active_instruction(&self) -> Option<&Instruction> {
        self.active_instruction.map(|i| &self.instructions[i])
    }

    pub fn active_instruction_mut(&mut self) -> Option<&mut Instruction> {
        self.active_instruction.map(|i| &mut self.instructions[i])
    }

    /// The data register selected by the active instruction.
    pub fn active_data_register(&self) -> Option<&DataRegister> {
        self.active_instruction()
            .and_then(|i| i.data_register)
            .map(|r| &self.data_registers[r])
    }

    pub fn active_data_register_mut(&mut self) -> Option<&mut DataRegister> {
        let register = self.active_instruction()?.data_register?;
        Some(&mut self.data_registers[register])
    }

    /// Define boundary scan cell `bit`.
    ///
    /// The cell is loaded with its `safe` value. If a signal called `signal` exists, the cell
    /// becomes its input and/or output according to `bit_type`.
    pub fn define_bit(
        &mut self,
        bit: usize,
        bit_type: BitType,
        safe: bool,
        signal: &str,
        control: Option<ControlBit>,
    ) -> Result<(), PartError> {
        let bsr = self
            .find_data_register(BSR)
            .map_err(|_| PartError::BoundaryScanRegisterMissing)?;
        let len = self.boundary_length();

        if bit >= len {
            return Err(PartError::BitOutOfRange { bit, len });
        }
        if let Some(control) = control {
            if control.bit >= len {
                return Err(PartError::BitOutOfRange {
                    bit: control.bit,
                    len,
                });
            }
        }
        if self.bsbits[bit].is_some() {
            return Err(PartError::DuplicateBit(bit));
        }

        set_bit(&mut self.data_registers[bsr].input, bit, safe)?;

        let signal_index = self.find_signal(signal).ok();
        if let Some(index) = signal_index {
            let signal = &mut self.signals[index];
            if bit_type.is_input() {
                signal.input = Some(bit);
            }
            if bit_type.is_output() {
                signal.output = Some(bit);
            }
        }

        self.bsbits[bit] = Some(BoundaryScanBit {
            bit,
            name: signal.to_string(),
            bit_type,
            signal: signal_index,
            safe,
            control,
        });
        Ok(())
    }

    /// Drive `signal` with `value`, or release it so that it can be sampled.
    ///
    /// Only the BSR input is changed; the value reaches the pin with the next data register
    /// shift while EXTEST is active.
    pub fn set_signal(
        &mut self,
        signal: &str,
        direction: SignalDirection,
        value: bool,
    ) -> Result<(), PartError> {
        let index = self.find_signal(signal)?;
        let Signal { input, output, .. } = self.signals[index].clone();
        let control = output
            .and_then(|bit| self.bsbits.get(bit))
            .and_then(|bit| bit.as_ref())
            .and_then(|bit| bit.control);

        let bsr = self
            .data_register_mut(BSR)
            .map_err(|_| PartError::BoundaryScanRegisterMissing)?;

        match direction {
            SignalDirection::Output => {
                let output = output.ok_or_else(|| PartError::NotAnOutput(signal.to_string()))?;
                set_bit(&mut bsr.input, output, value)?;
                if let Some(control) = control {
                    set_bit(&mut bsr.input, control.bit, !control.disable_value)?;
                }
            }
            SignalDirection::Input => {
                if input.is_none() {
                    return Err(PartError::NotAnInput(signal.to_string()));
                }
                if let Some(control) = control {
                    set_bit(&mut bsr.input, control.bit, control.disable_value)?;
                }
            }
        }
        Ok(())
    }

    /// The level of `signal` captured by the last data register shift.
    pub fn get_signal(&self, signal: &str) -> Result<bool, PartError> {
        let index = self.find_signal(signal)?;
        let input = self.signals[index]
            .input
            .ok_or_else(|| PartError::NotAnInput(signal.to_string()))?;
        let bsr = self
            .data_register(BSR)
            .map_err(|_| PartError::BoundaryScanRegisterMissing)?;
        bsr.output
            .get(input)
            .ok_or(PartError::BitOutOfRange {
                bit: input,
                len: bsr.len(),
            })
    }
}

/// Set a bit of a register which may have been replaced by one of a different length.
fn set_bit(register: &mut TapRegister, bit: usize, value: bool) -> Result<(), PartError> {
    let len = register.len();
    if bit >= len {
        return Err(PartError::BitOutOfRange { bit, len });
    }
    register.set(bit, value);
    Ok(())
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instruction = self.active_instruction();
        let register = self.active_data_register();
        write!(
            f,
            "{:<25} {:<20} {:<8} {:<20} {}",
            self.manufacturer,
            self.name,
            self.stepping,
            instruction.map_or("(none)", |i| i.name()),
            register.map_or("(none)", |r| r.name()),
        )
    }
}
