//! Declarative part definitions.
//!
//! A description lists everything [`Part::from_description`](super::Part::from_description)
//! needs to set a part up, in the order it is applied:
//!
//! ```yaml
//! manufacturer: ACME
//! name: Widget
//! stepping: "1"
//! instruction_length: 4
//! data_registers:
//!   - { name: BSR, length: 8 }
//!   - { name: BYPASS, length: 1 }
//! instructions:
//!   - { name: EXTEST, code: "0000", register: BSR }
//!   - { name: BYPASS, code: "1111", register: BYPASS }
//! signals:
//!   - { name: LED, pin: "12" }
//! boundary_bits:
//!   - { bit: 3, type: O, safe: false, signal: LED, control: { bit: 4, disable_value: true } }
//!   - { bit: 4, type: C, safe: true }
//! ```

use serde::{Deserialize, Serialize};

use super::{BitType, ControlBit};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartDescription {
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stepping: String,
    pub instruction_length: usize,
    #[serde(default)]
    pub data_registers: Vec<DataRegisterDescription>,
    #[serde(default)]
    pub instructions: Vec<InstructionDescription>,
    #[serde(default)]
    pub signals: Vec<SignalDescription>,
    #[serde(default)]
    pub aliases: Vec<SignalAliasDescription>,
    #[serde(default)]
    pub boundary_bits: Vec<BoundaryBitDescription>,
}

impl PartDescription {
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(reader)
    }

    pub fn from_yaml_str(definition: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(definition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataRegisterDescription {
    pub name: String,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstructionDescription {
    pub name: String,
    /// Opcode, MSB first.
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalAliasDescription {
    pub name: String,
    pub signal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryBitDescription {
    pub bit: usize,
    #[serde(rename = "type")]
    pub bit_type: BitType,
    #[serde(default)]
    pub safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlBit>,
}
