use crate::register::{RegisterError, TapRegister};

/// A data register of a part.
///
/// `input` holds the bits shifted into the register, `output` receives the bits captured
/// from it. Both always have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRegister {
    name: String,
    pub input: TapRegister,
    pub output: TapRegister,
}

impl DataRegister {
    pub fn new(name: impl Into<String>, len: usize) -> Result<Self, RegisterError> {
        Ok(Self {
            name: name.into(),
            input: TapRegister::new(len)?,
            output: TapRegister::new(len)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Change the length of both registers. The contents are cleared.
    pub(crate) fn resize(&mut self, len: usize) -> Result<(), RegisterError> {
        let input = TapRegister::new(len)?;
        let output = TapRegister::new(len)?;
        self.input = input;
        self.output = output;
        Ok(())
    }
}
