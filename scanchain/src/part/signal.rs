/// A pin of a part, bound to the boundary scan cells that drive and sample it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    name: String,
    /// Package pin, e.g. `"A12"`.
    pub pin: Option<String>,
    /// BSR bit sampling the pin.
    pub(crate) input: Option<usize>,
    /// BSR bit driving the pin.
    pub(crate) output: Option<usize>,
}

impl Signal {
    pub fn new(name: impl Into<String>, pin: Option<String>) -> Self {
        Self {
            name: name.into(),
            pin,
            input: None,
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_bit(&self) -> Option<usize> {
        self.input
    }

    pub fn output_bit(&self) -> Option<usize> {
        self.output
    }
}

/// A second name for a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalAlias {
    pub name: String,
    /// Index of the signal in the owning part.
    pub(crate) signal: usize,
}

/// Whether a signal is driven by the part or sampled from the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    Input,
    Output,
}
