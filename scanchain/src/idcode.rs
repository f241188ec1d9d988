//! Decoding of IEEE 1149.1 IDCODEs and of the scan chain captured right after a reset.

use bitfield::bitfield;
use bitvec::prelude::*;

use crate::register::{RegisterError, TapRegister};

bitfield! {
    /// The 32 bit identification code of a part, captured into the data register path
    /// after Test-Logic-Reset.
    #[derive(Copy, Clone, Eq, PartialEq, Hash)]
    pub struct IdCode(u32);
    impl Debug;

    u8;
    /// Revision of the part, often called stepping.
    pub version, set_version: 31, 28;

    u16;
    pub part_number, set_part_number: 27, 12;

    /// JEP-106 manufacturer code, continuation count in the upper four bits.
    pub manufacturer, set_manufacturer: 11, 1;

    u8;
    pub manufacturer_continuation, set_manufacturer_continuation: 11, 8;

    pub manufacturer_identity, set_manufacturer_identity: 7, 1;

    bool;
    /// Set in every IDCODE, a part in BYPASS captures `0` here instead.
    pub marker, set_marker: 0;
}

impl IdCode {
    pub const LEN: usize = 32;

    /// Read an IDCODE from the first 32 bits of `bits`.
    pub fn from_bits(bits: &BitSlice<u8, Lsb0>) -> Option<Self> {
        bits.get(..Self::LEN).map(|bits| Self(bits.load_le::<u32>()))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// The IDCODE as a 32 bit register, bit 0 first.
    pub fn to_register(&self) -> Result<TapRegister, RegisterError> {
        TapRegister::with_value(Self::LEN, self.0.into())
    }

    /// The marker bit is set and the manufacturer identity is not one of the reserved values
    /// `0` and `127`.
    pub fn valid(&self) -> bool {
        self.marker()
            && self.manufacturer_identity() != 0
            && self.manufacturer_identity() != 0x7f
    }

    pub fn manufacturer_name(&self) -> Option<&'static str> {
        jep106::JEP106Code::new(
            self.manufacturer_continuation(),
            self.manufacturer_identity(),
        )
        .get()
    }

    /// The manufacturer, part and version fields as MSB-first bit strings, the form used to
    /// look parts up in a part database.
    pub fn field_strings(&self) -> (String, String, String) {
        (
            format!("{:011b}", self.manufacturer()),
            format!("{:016b}", self.part_number()),
            format!("{:04b}", self.version()),
        )
    }
}

impl From<u32> for IdCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.manufacturer_name() {
            Some(name) => write!(f, "{:#010x} ({name})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Errors while interpreting the reset values of a scan chain.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ScanChainError {
    #[error("Invalid IDCODE {0:#010x}")]
    InvalidIdCode(u32),
    #[error("The data register chain ends in a truncated IDCODE")]
    TruncatedIdCode,
    #[error("The instruction register capture does not match the detected parts")]
    InvalidIr,
    #[error("The chain is longer than the scanned {0} bits")]
    ChainTooLong(usize),
}

/// Length of the common prefix of two captures.
///
/// Shifting two different patterns through a chain returns the same captured bits until the
/// patterns themselves start to come out, so the prefix is the captured chain content.
pub(crate) fn common_prefix(a: &BitSlice<u8, Lsb0>, b: &BitSlice<u8, Lsb0>) -> usize {
    a.iter()
        .by_vals()
        .zip(b.iter().by_vals())
        .take_while(|(a, b)| a == b)
        .count()
}

/// Turn sorted register start offsets into register lengths.
fn starts_to_lengths(starts: &[usize], total: usize) -> Vec<usize> {
    starts
        .iter()
        .zip(starts.iter().skip(1).chain(std::iter::once(&total)))
        .map(|(start, end)| end - start)
        .collect()
}

/// Split the data register chain captured after a reset into one entry per part.
///
/// A part with an IDCODE register contributes 32 bits starting with a `1`, a part without
/// one selects BYPASS and contributes a single `0`. `None` marks a part in BYPASS.
pub(crate) fn extract_idcodes(
    mut dr: &BitSlice<u8, Lsb0>,
) -> Result<Vec<Option<IdCode>>, ScanChainError> {
    let mut idcodes = Vec::new();

    while let Some(first) = dr.first().map(|bit| *bit) {
        if !first {
            tracing::debug!("Part {} is in BYPASS", idcodes.len());
            idcodes.push(None);
            dr = &dr[1..];
            continue;
        }

        let Some(idcode) = IdCode::from_bits(dr) else {
            tracing::warn!("Truncated IDCODE: {}", dr);
            return Err(ScanChainError::TruncatedIdCode);
        };
        if !idcode.valid() {
            tracing::warn!("Invalid IDCODE: {:#010x}", idcode.0);
            return Err(ScanChainError::InvalidIdCode(idcode.0));
        }

        tracing::info!("Part {} has IDCODE {}", idcodes.len(), idcode);
        idcodes.push(Some(idcode));
        dr = &dr[IdCode::LEN..];
    }

    Ok(idcodes)
}

/// Split the instruction register chain captured by Capture-IR into one length per part.
///
/// Every instruction register captures `...01`, so each register starts at a `1` followed by
/// a `0`. Other bits may produce the same pair, which makes the split ambiguous unless
/// there is exactly one candidate per part. Known lengths in `expected` are checked against
/// the capture instead.
pub(crate) fn extract_ir_lengths(
    ir: &BitSlice<u8, Lsb0>,
    parts: usize,
    expected: Option<&[usize]>,
) -> Result<Vec<usize>, ScanChainError> {
    let starts: Vec<usize> = ir
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[0] && !pair[1])
        .map(|(i, _)| i)
        .collect();
    tracing::trace!("Candidate instruction register starts: {:?}", starts);

    if parts == 0 || starts.len() < parts || starts.first() != Some(&0) {
        tracing::warn!(
            "Instruction register capture {} does not fit {} parts",
            ir,
            parts
        );
        return Err(ScanChainError::InvalidIr);
    }

    if let Some(expected) = expected {
        let total: usize = expected.iter().sum();
        if expected.len() != parts || total != ir.len() {
            tracing::warn!(
                "Expected instruction lengths {:?} do not add up to the {} bit capture of {} parts",
                expected,
                ir.len(),
                parts
            );
            return Err(ScanChainError::InvalidIr);
        }

        let mut offset = 0;
        for length in expected {
            if !starts.contains(&offset) {
                tracing::warn!("No instruction register can start at bit {}", offset);
                return Err(ScanChainError::InvalidIr);
            }
            offset += length;
        }
        return Ok(expected.to_vec());
    }

    match parts {
        1 => Ok(vec![ir.len()]),
        parts if parts == starts.len() => Ok(starts_to_lengths(&starts, ir.len())),
        _ => {
            tracing::warn!(
                "Instruction register lengths are ambiguous, {} candidates for {} parts",
                starts.len(),
                parts
            );
            Err(ScanChainError::InvalidIr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const ARM_TAP: IdCode = IdCode(0x4BA00477);
    const STM_BS_TAP: IdCode = IdCode(0x06433041);

    fn chain_of(entries: &[Option<IdCode>]) -> BitVec<u8, Lsb0> {
        let mut dr = BitVec::new();
        for entry in entries {
            match entry {
                Some(idcode) => dr.extend(idcode.0.view_bits::<Lsb0>().iter().by_vals()),
                None => dr.push(false),
            }
        }
        dr
    }

    #[test]
    fn fields() {
        assert_eq!(ARM_TAP.version(), 0x4);
        assert_eq!(ARM_TAP.part_number(), 0xba00);
        assert_eq!(ARM_TAP.manufacturer(), 0x23b);
        assert!(ARM_TAP.valid());
        assert_eq!(
            ARM_TAP.field_strings(),
            (
                "01000111011".to_string(),
                "1011101000000000".to_string(),
                "0100".to_string()
            )
        );
    }

    #[test]
    fn display_names_the_manufacturer() {
        assert_eq!(ARM_TAP.to_string(), "0x4ba00477 (ARM Ltd)");
        assert_eq!(STM_BS_TAP.to_string(), "0x06433041 (STMicroelectronics)");
    }

    #[test_case(0x0000_0000; "no marker")]
    #[test_case(0x0000_0001; "manufacturer zero")]
    #[test_case(0x0000_00ff; "manufacturer 127")]
    fn invalid(value: u32) {
        assert!(!IdCode(value).valid());
    }

    #[test]
    fn register_round_trip() {
        let register = STM_BS_TAP.to_register().unwrap();
        assert_eq!(register.len(), 32);
        assert_eq!(IdCode::from_bits(register.as_bitslice()), Some(STM_BS_TAP));
    }

    #[test_case(&[Some(ARM_TAP)]; "one part")]
    #[test_case(&[Some(ARM_TAP), Some(STM_BS_TAP)]; "two parts")]
    #[test_case(&[Some(ARM_TAP), None, Some(STM_BS_TAP)]; "bypass in the middle")]
    #[test_case(&[None, None]; "only bypass")]
    fn idcodes_are_split(entries: &[Option<IdCode>]) {
        let dr = chain_of(entries);
        assert_eq!(extract_idcodes(&dr).unwrap(), entries.to_vec());
    }

    #[test]
    fn truncated_idcode() {
        let dr = chain_of(&[Some(ARM_TAP)]);
        assert_eq!(
            extract_idcodes(&dr[..20]),
            Err(ScanChainError::TruncatedIdCode)
        );
    }

    #[test]
    fn ir_length_of_a_single_part() {
        let ir = bits![u8, Lsb0; 1, 0, 0, 0, 1];
        assert_eq!(extract_ir_lengths(ir, 1, None).unwrap(), vec![5]);
    }

    #[test]
    fn unambiguous_ir_lengths() {
        let ir = bits![u8, Lsb0; 1, 0, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(extract_ir_lengths(ir, 2, None).unwrap(), vec![4, 5]);
    }

    #[test]
    fn ambiguous_ir_lengths_need_expectations() {
        let ir = bits![u8, Lsb0; 1, 0, 1, 0, 1, 0];
        assert_eq!(
            extract_ir_lengths(ir, 2, None),
            Err(ScanChainError::InvalidIr)
        );
        assert_eq!(
            extract_ir_lengths(ir, 2, Some(&[4, 2])).unwrap(),
            vec![4, 2]
        );
        assert_eq!(
            extract_ir_lengths(ir, 2, Some(&[3, 3])),
            Err(ScanChainError::InvalidIr)
        );
    }

    #[test]
    fn capture_must_start_with_a_register() {
        let ir = bits![u8, Lsb0; 0, 1, 0];
        assert_eq!(
            extract_ir_lengths(ir, 1, None),
            Err(ScanChainError::InvalidIr)
        );
    }

    #[test]
    fn prefix_of_two_captures() {
        let a = bits![u8, Lsb0; 1, 0, 1, 1, 1];
        let b = bits![u8, Lsb0; 1, 0, 1, 0, 0];
        assert_eq!(common_prefix(a, b), 3);
        assert_eq!(starts_to_lengths(&[0, 3, 4], 9), vec![3, 1, 5]);
    }
}
