//! Part definitions looked up by the IDCODE a part reports.
//!
//! Entries are keyed by the manufacturer, part number and version fields of the IDCODE,
//! written as MSB-first bit strings:
//!
//! ```yaml
//! parts:
//!   - manufacturer: "01000111011"
//!     part_number: "1011101000000000"
//!     versions: ["0100"]
//!     definition:
//!       manufacturer: ARM Ltd
//!       name: JTAG-DP
//!       instruction_length: 4
//!       data_registers:
//!         - { name: BYPASS, length: 1 }
//!         - { name: DIR, length: 32 }
//!       instructions:
//!         - { name: IDCODE, code: "1110", register: DIR }
//!         - { name: BYPASS, code: "1111", register: BYPASS }
//! ```

use serde::{Deserialize, Serialize};

use super::PartDescription;
use crate::idcode::IdCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartDatabaseEntry {
    /// The 11 bit manufacturer field.
    pub manufacturer: String,
    /// The 16 bit part number.
    pub part_number: String,
    /// The 4 bit versions this definition applies to. Empty means every version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
    pub definition: PartDescription,
}

impl PartDatabaseEntry {
    fn matches_part(&self, manufacturer: &str, part_number: &str) -> bool {
        self.manufacturer == manufacturer && self.part_number == part_number
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartDatabase {
    #[serde(default)]
    pub parts: Vec<PartDatabaseEntry>,
}

impl PartDatabase {
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_reader(reader)
    }

    pub fn from_yaml_str(definition: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(definition)
    }

    pub fn add(&mut self, entry: PartDatabaseEntry) {
        self.parts.push(entry);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The definition of the part identified by `id`.
    ///
    /// An entry listing the version of `id` is preferred over one valid for every version.
    pub fn lookup(&self, id: IdCode) -> Option<&PartDescription> {
        let (manufacturer, part_number, version) = id.field_strings();

        let mut any_version = None;
        for entry in self
            .parts
            .iter()
            .filter(|entry| entry.matches_part(&manufacturer, &part_number))
        {
            if entry.versions.iter().any(|v| *v == version) {
                return Some(&entry.definition);
            }
            if entry.versions.is_empty() {
                any_version.get_or_insert(&entry.definition);
            }
        }

        if any_version.is_none() {
            tracing::debug!("No definition for part {}", id);
        }
        any_version
    }
}
