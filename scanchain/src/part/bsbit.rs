use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PartError;

/// The function of a boundary scan cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitType {
    #[serde(rename = "I", alias = "input")]
    Input,
    #[serde(rename = "O", alias = "output")]
    Output,
    #[serde(rename = "B", alias = "bidir")]
    Bidir,
    #[serde(rename = "C", alias = "control")]
    Control,
    #[serde(rename = "X", alias = "internal")]
    Internal,
}

impl BitType {
    pub fn is_input(self) -> bool {
        matches!(self, BitType::Input | BitType::Bidir)
    }

    pub fn is_output(self) -> bool {
        matches!(self, BitType::Output | BitType::Bidir)
    }
}

impl FromStr for BitType {
    type Err = PartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" | "i" => Ok(BitType::Input),
            "O" | "o" => Ok(BitType::Output),
            "B" | "b" => Ok(BitType::Bidir),
            "C" | "c" => Ok(BitType::Control),
            "X" | "x" => Ok(BitType::Internal),
            other => Err(PartError::InvalidBitType(other.to_string())),
        }
    }
}

impl fmt::Display for BitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            BitType::Input => 'I',
            BitType::Output => 'O',
            BitType::Bidir => 'B',
            BitType::Control => 'C',
            BitType::Internal => 'X',
        };
        write!(f, "{c}")
    }
}

/// The control cell of a tri-state or bidirectional output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBit {
    /// BSR index of the control cell.
    pub bit: usize,
    /// Value which puts the output into high impedance.
    pub disable_value: bool,
}

/// One cell of the boundary scan register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryScanBit {
    pub bit: usize,
    pub name: String,
    pub bit_type: BitType,
    /// Index of the signal in the owning part.
    pub(crate) signal: Option<usize>,
    /// Value loaded into the cell when it is defined.
    pub safe: bool,
    pub control: Option<ControlBit>,
}

impl BoundaryScanBit {
    pub fn signal(&self) -> Option<usize> {
        self.signal
    }
}
