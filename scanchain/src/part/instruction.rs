use super::PartError;
use crate::register::TapRegister;

/// An instruction of a part: its opcode and the data register it selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    name: String,
    /// The opcode shifted into the instruction register.
    value: TapRegister,
    /// Receives the bits captured from the instruction register.
    out: TapRegister,
    /// Index of the selected register in the data registers of the owning part.
    pub(crate) data_register: Option<usize>,
}

impl Instruction {
    /// An instruction with opcode `value` which is not bound to a data register yet.
    pub fn new(name: impl Into<String>, value: TapRegister) -> Self {
        let mut out = value.clone();
        out.fill(false);
        Self {
            name: name.into(),
            value,
            out,
            data_register: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opcode shifted into the instruction register.
    pub fn value(&self) -> &TapRegister {
        &self.value
    }

    /// Replace the opcode. The instruction register length of the part cannot change.
    pub fn set_value(&mut self, value: TapRegister) -> Result<(), PartError> {
        if value.len() != self.value.len() {
            return Err(PartError::InstructionLengthMismatch {
                expected: self.value.len(),
                actual: value.len(),
            });
        }
        self.value = value;
        Ok(())
    }

    /// The bits captured from the instruction register by the last shift.
    pub fn out(&self) -> &TapRegister {
        &self.out
    }

    pub(crate) fn out_mut(&mut self) -> &mut TapRegister {
        &mut self.out
    }

    /// Index of the selected data register within the owning part.
    pub fn data_register(&self) -> Option<usize> {
        self.data_register
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn opcode_keeps_its_length() {
        let mut instruction = Instruction::new("SAMPLE", "0001".parse().unwrap());

        instruction.set_value("0010".parse().unwrap()).unwrap();
        assert_eq!(instruction.value().to_bit_string(), "0010");

        assert_eq!(
            instruction.set_value("10".parse().unwrap()),
            Err(PartError::InstructionLengthMismatch {
                expected: 4,
                actual: 2
            })
        );
        assert_eq!(instruction.value().to_bit_string(), "0010");
        assert_eq!(instruction.out().len(), 4);
    }
}
