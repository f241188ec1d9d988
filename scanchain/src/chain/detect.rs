//! Finding out what is connected to a chain.

use crate::error::{Error, Result};
use crate::idcode::{common_prefix, extract_idcodes, extract_ir_lengths, IdCode, ScanChainError};
use crate::part::{Part, PartDatabase, PartDescription, PartError, BYPASS, DIR};
use crate::register::TapRegister;

use super::{Chain, ExitMode};

/// Length of the data register selected by one instruction register value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRegister {
    pub instruction: TapRegister,
    /// `None` if no length was detected.
    pub length: Option<usize>,
}

/// Result of [`Chain::discovery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Length of the whole instruction register path.
    pub ir_length: usize,
    pub registers: Vec<DiscoveredRegister>,
}

/// A part found by [`Chain::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedPart {
    /// `None` for parts without an IDCODE register.
    pub idcode: Option<IdCode>,
    pub ir_length: usize,
}

/// Bytes read after which [`Chain::idcode_bytes`] gives up without a limit.
const IDCODE_BYTES_LIMIT: usize = 1000;

impl Chain {
    /// Measure the length of the register path the chain is currently shifting.
    ///
    /// For every candidate length `len` a zeroed register of that length is shifted, followed
    /// by an incrementing test pattern of `len + pattern_bits` bits. If the chain is `len`
    /// bits long, the pattern comes back delayed by exactly `len` clocks. A length is
    /// accepted once every pattern came back in at least `threshold_percent` of the
    /// `test_count` trials.
    ///
    /// The chain has to be in Capture or Shift of the register to measure.
    #[tracing::instrument(skip_all)]
    pub fn detect_register_size(&mut self) -> Result<Option<usize>> {
        let detect = self.config.detect;
        if detect.pattern_bits == 0 || detect.pattern_bits >= usize::BITS as usize {
            return Err(Error::DetectionFailed("invalid test pattern width"));
        }
        let test_count = detect.test_count.max(1);
        let patterns = 1usize << detect.pattern_bits;

        // `None` before the first trial, `Some(None)` once TDO was seen changing.
        let mut tdo_stuck: Option<Option<bool>> = None;

        for len in 1..=detect.max_register_length {
            let zeros = TapRegister::new(len)?;
            let mut output = TapRegister::new(len + detect.pattern_bits)?;
            let mut pattern = TapRegister::new(len + detect.pattern_bits)?;
            pattern.increment();

            let mut ok = 0;
            for _ in 1..patterns {
                ok = 0;
                for _ in 0..test_count {
                    self.shift_register(&zeros, None, ExitMode::Shift)?;
                    self.shift_register(&pattern, Some(&mut output), ExitMode::Shift)?;

                    let tdo = output.all_bits_same_value();
                    tdo_stuck = match tdo_stuck {
                        None => Some(tdo),
                        Some(stuck) if stuck == tdo => Some(stuck),
                        Some(_) => Some(None),
                    };

                    output.shift_right(len);
                    if output == pattern {
                        ok += 1;
                    }
                }

                if 100 * ok / test_count < detect.threshold_percent {
                    ok = 0;
                    break;
                }
                pattern.increment();
            }

            if ok > 0 {
                tracing::debug!("Register is {} bits long", len);
                return Ok(Some(len));
            }
        }

        if let Some(Some(level)) = tdo_stuck {
            tracing::warn!("TDO seems to be stuck at {}", u8::from(level));
        }
        Ok(None)
    }

    /// Measure the instruction register path, then the data register path selected by every
    /// possible instruction register value.
    ///
    /// This tries `2^n` values for an `n` bit instruction register path, starting with
    /// all ones.
    pub fn discovery(&mut self) -> Result<Discovery> {
        self.trst_reset()?;
        self.capture_ir()?;
        let Some(ir_length) = self.detect_register_size()? else {
            tracing::warn!("Could not detect the instruction register length");
            return Err(Error::DetectionFailed("invalid instruction register length"));
        };
        tracing::info!("Instruction register path is {} bits long", ir_length);

        let first = TapRegister::filled(ir_length, true)?;
        let mut instruction = first.clone();
        let mut registers = Vec::new();
        loop {
            self.trst_reset()?;
            self.capture_ir()?;
            self.shift_register(&instruction, None, ExitMode::Idle)?;

            self.capture_dr()?;
            let length = self.detect_register_size()?;
            tracing::info!(
                "Instruction {} selects a data register of {:?} bits",
                instruction,
                length
            );
            registers.push(DiscoveredRegister {
                instruction: instruction.clone(),
                length,
            });

            instruction.increment();
            if instruction == first {
                break;
            }
        }

        Ok(Discovery {
            ir_length,
            registers,
        })
    }

    /// Identify the parts of the chain from the values captured after a reset.
    ///
    /// The data register path holds the IDCODE or BYPASS register of every part, the
    /// instruction register path the `...01` capture values, which give the instruction
    /// register lengths. Known lengths can be passed in `expected` to resolve ambiguous
    /// captures. All parts are left in BYPASS.
    #[tracing::instrument(skip(self))]
    pub fn scan(&mut self, expected: Option<&[usize]>) -> Result<Vec<ScannedPart>> {
        let detect = self.config.detect;
        self.reset()?;

        let dr_len = IdCode::LEN * detect.max_parts.max(1);
        let (dr_ones, dr_zeros) = self.capture_twice(dr_len, false)?;
        let dr_chain = common_prefix(dr_ones.as_bitslice(), dr_zeros.as_bitslice());
        if dr_chain == dr_len {
            return Err(ScanChainError::ChainTooLong(dr_len).into());
        }
        tracing::debug!("Data register path is {} bits long", dr_chain);
        let idcodes = extract_idcodes(&dr_ones.as_bitslice()[..dr_chain])?;

        let ir_len = detect.max_register_length.max(1);
        let (ir_ones, ir_zeros) = self.capture_twice(ir_len, true)?;
        let ir_chain = common_prefix(ir_ones.as_bitslice(), ir_zeros.as_bitslice());
        if ir_chain == ir_len {
            return Err(ScanChainError::ChainTooLong(ir_len).into());
        }
        let ir_lengths =
            extract_ir_lengths(&ir_ones.as_bitslice()[..ir_chain], idcodes.len(), expected)?;
        tracing::info!(
            "Found {} parts with instruction lengths {:?}",
            idcodes.len(),
            ir_lengths
        );

        Ok(idcodes
            .into_iter()
            .zip(ir_lengths)
            .map(|(idcode, ir_length)| ScannedPart { idcode, ir_length })
            .collect())
    }

    /// Shift ones and then zeros followed by ones through a freshly captured register path,
    /// returning both captures. Ones go last so that instruction registers end up in BYPASS.
    fn capture_twice(&mut self, len: usize, ir: bool) -> Result<(TapRegister, TapRegister)> {
        let ones = TapRegister::filled(len, true)?;
        let mut zeros_then_ones = TapRegister::filled(2 * len, true)?;
        zeros_then_ones.as_mut_bitslice()[..len].fill(false);

        let mut first = TapRegister::new(len)?;
        let mut second = TapRegister::new(len)?;
        for (input, output) in [(&ones, &mut first), (&zeros_then_ones, &mut second)] {
            if ir {
                self.capture_ir()?;
            } else {
                self.capture_dr()?;
            }
            self.shift_register(input, Some(output), ExitMode::Idle)?;
        }
        Ok((first, second))
    }

    /// Replace the parts of the chain with the ones found by [`scan`](Self::scan).
    ///
    /// The new parts only know their IDCODE, instruction length and the BYPASS instruction,
    /// which is active. Returns the number of parts.
    pub fn detect_parts(&mut self, expected: Option<&[usize]>) -> Result<usize> {
        self.detect_parts_with(expected, &PartDatabase::default())
    }

    /// Like [`detect_parts`](Self::detect_parts), but parts whose IDCODE is found in
    /// `database` are set up from their definition.
    ///
    /// A definition which fails to apply, or whose instruction length contradicts the scan,
    /// is ignored with a warning. BYPASS is active in every part afterwards.
    pub fn detect_parts_with(
        &mut self,
        expected: Option<&[usize]>,
        database: &PartDatabase,
    ) -> Result<usize> {
        let scanned = self.scan(expected)?;

        self.clear_parts();
        for ScannedPart { idcode, ir_length } in scanned {
            let defined = idcode.and_then(|id| {
                database
                    .lookup(id)
                    .and_then(|description| defined_part(id, description, ir_length))
            });
            let part = match defined {
                Some(part) => part,
                None => generic_part(idcode, ir_length)?,
            };
            self.add_part(part);
        }

        Ok(self.parts.len())
    }

    /// Read the data register path right after a TRST reset, one byte at a time.
    ///
    /// Without a limit reading stops once four zero bytes in a row came back.
    pub fn idcode_bytes(&mut self, max_bytes: Option<usize>) -> Result<Vec<u8>> {
        let limit = max_bytes.unwrap_or(IDCODE_BYTES_LIMIT);
        let zeros = TapRegister::new(8)?;
        let mut output = TapRegister::new(8)?;

        self.trst_reset()?;
        self.capture_dr()?;

        let mut bytes = Vec::new();
        let mut zero_run = 0;
        for _ in 0..limit {
            self.shift_register(&zeros, Some(&mut output), ExitMode::Shift)?;
            let byte = output.to_u64() as u8;
            bytes.push(byte);

            if max_bytes.is_none() {
                zero_run = if byte == 0 { zero_run + 1 } else { 0 };
                if zero_run > 3 {
                    break;
                }
            }
        }
        tracing::debug!("Read {:02x?}", bytes);
        Ok(bytes)
    }
}

/// Fill in the identification strings a definition left empty.
fn identify(part: &mut Part, id: IdCode) {
    if part.manufacturer.is_empty() {
        part.manufacturer = id.manufacturer_name().unwrap_or("Unknown").to_string();
    }
    if part.name.is_empty() {
        part.name = format!("{:#06x}", id.part_number());
    }
    if part.stepping.is_empty() {
        part.stepping = id.version().to_string();
    }
}

fn generic_part(idcode: Option<IdCode>, ir_length: usize) -> Result<Part, PartError> {
    let mut part = Part::new(idcode);
    if let Some(idcode) = idcode {
        identify(&mut part, idcode);
        part.add_data_register(DIR, IdCode::LEN)?;
    }
    part.set_instruction_length(ir_length)?;
    part.add_data_register(BYPASS, 1)?;
    part.add_instruction(BYPASS, &"1".repeat(ir_length), Some(BYPASS))?;
    part.set_instruction(BYPASS)?;
    Ok(part)
}

fn defined_part(id: IdCode, description: &PartDescription, ir_length: usize) -> Option<Part> {
    let part = Part::from_description(Some(id), description).and_then(|mut part| {
        if part.find_instruction(BYPASS).is_err() {
            if part.find_data_register(BYPASS).is_err() {
                part.add_data_register(BYPASS, 1)?;
            }
            let ones = "1".repeat(part.instruction_length());
            part.add_instruction(BYPASS, &ones, Some(BYPASS))?;
        }
        part.set_instruction(BYPASS)?;
        Ok(part)
    });

    match part {
        Ok(part) if part.instruction_length() != ir_length => {
            tracing::warn!(
                "The definition of part {} has a {} bit instruction register, the chain shows {}",
                id,
                part.instruction_length(),
                ir_length
            );
            None
        }
        Ok(mut part) => {
            identify(&mut part, id);
            tracing::info!("Part {}: {} {} ({})", id, part.manufacturer, part.name, part.stepping);
            Some(part)
        }
        Err(e) => {
            tracing::warn!("Ignoring the definition of part {}: {}", id, e);
            None
        }
    }
}
