//! Capturing and shifting the instruction and data registers of a chain.
//!
//! A shift is issued in two passes. The first pass queues all clocks, transfers and TDO
//! samples on the cable, the second one picks the captured bits up again. Splitting a shift
//! this way lets a cable combine the shifts of all parts into as few transfers as possible.

use crate::cable::{Cable, FlushAmount};
use crate::error::{Error, Result};
use crate::register::TapRegister;
use crate::tap::{TapStateTracker, RESET_CLOCKS};

use super::Chain;

/// Where the TAP controllers go after the last bit of a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitMode {
    /// Stay in Shift, the next shift continues the same scan.
    Shift,
    /// Through Exit1 and Update to Run-Test/Idle.
    #[default]
    Idle,
    /// Leave with the last bit and stop in Exit1.
    Exit1,
    /// Through Exit1 to Update.
    Update,
}

impl ExitMode {
    fn leaves_shift(self) -> bool {
        self != ExitMode::Shift
    }
}

/// The cable of a chain together with the tracked state of its TAP controllers.
///
/// Every clock sent through a port is also applied to the tracker.
#[derive(Debug)]
pub(crate) struct TapPort<'a> {
    pub(crate) cable: &'a mut Cable,
    pub(crate) state: &'a mut TapStateTracker,
}

impl TapPort<'_> {
    pub(crate) fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        self.cable.clock(tms, tdi, count)?;
        self.track(tms, count);
        Ok(())
    }

    pub(crate) fn defer_clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        self.cable.defer_clock(tms, tdi, count)?;
        self.track(tms, count);
        Ok(())
    }

    fn track(&mut self, tms: bool, count: usize) {
        for _ in 0..count {
            self.state.clock(tms);
        }
    }

    /// Five TMS high clocks into Test-Logic-Reset, then on to Run-Test/Idle.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.clock(true, false, RESET_CLOCKS)?;
        self.clock(false, false, 1)
    }

    fn check_capture_start(&self, register: &str) {
        let state = self.state.state();
        if !state.can_start_capture() {
            tracing::warn!("Capture-{} requested in invalid state {}", register, state);
        }
    }

    pub(crate) fn capture_dr(&mut self) -> Result<()> {
        self.check_capture_start("DR");
        // Select-DR-Scan, Capture-DR
        self.defer_clock(true, false, 1)?;
        self.defer_clock(false, false, 1)
    }

    pub(crate) fn capture_ir(&mut self) -> Result<()> {
        self.check_capture_start("IR");
        // Select-DR-Scan, Select-IR-Scan, Capture-IR
        self.defer_clock(true, false, 2)?;
        self.defer_clock(false, false, 1)
    }

    /// Queue the shift of `input`. With `output_len` given, the first `output_len` bits
    /// leaving the chain are captured for [`shift_register_output`](Self::shift_register_output).
    pub(crate) fn defer_shift_register(
        &mut self,
        input: &TapRegister,
        output_len: Option<usize>,
        exit: ExitMode,
    ) -> Result<()> {
        let state = self.state.state();
        if !state.is_shift() {
            tracing::warn!("Shifting a register in invalid state {}", state);
        }
        if state.is_capture() {
            self.defer_clock(false, false, 1)?;
        }

        let len = input.len();
        let mut bulk = if exit.leaves_shift() { len - 1 } else { len };
        if let Some(output_len) = output_len {
            bulk = bulk.min(output_len);
        }

        let bits = input.as_bitslice();
        self.cable
            .defer_transfer(&bits[..bulk], output_len.is_some())?;
        self.track(false, bulk);

        for i in bulk..len {
            if output_len.is_some_and(|output_len| i < output_len) {
                self.cable.defer_get_tdo()?;
            }
            let tms = exit.leaves_shift() && i + 1 == len;
            self.defer_clock(tms, bits[i], 1)?;
        }

        match exit {
            ExitMode::Idle => {
                // Update, Run-Test/Idle
                self.defer_clock(true, false, 1)?;
                self.defer_clock(false, false, 1)?;
            }
            ExitMode::Update => self.defer_clock(true, false, 1)?,
            ExitMode::Shift | ExitMode::Exit1 => {}
        }

        Ok(())
    }

    /// Collect the bits captured by the matching [`defer_shift_register`](Self::defer_shift_register)
    /// of an `input_len` bit register.
    pub(crate) fn shift_register_output(
        &mut self,
        input_len: usize,
        output: &mut TapRegister,
        exit: ExitMode,
    ) -> Result<()> {
        let mut bulk = if exit.leaves_shift() {
            input_len - 1
        } else {
            input_len
        };
        bulk = bulk.min(output.len());

        self.cable.transfer_late(output.as_mut_bitslice())?;
        for i in bulk..input_len.min(output.len()) {
            let tdo = self.cable.get_tdo_late()?;
            output.set(i, tdo);
        }
        Ok(())
    }

    pub(crate) fn shift_register(
        &mut self,
        input: &TapRegister,
        output: Option<&mut TapRegister>,
        exit: ExitMode,
    ) -> Result<()> {
        self.defer_shift_register(input, output.as_ref().map(|output| output.len()), exit)?;
        if let Some(output) = output {
            self.shift_register_output(input.len(), output, exit)?;
        }
        Ok(())
    }
}

impl Chain {
    /// Bring the TAP controllers to Run-Test/Idle through Test-Logic-Reset, using TMS only.
    pub fn reset(&mut self) -> Result<()> {
        self.port()?.reset()
    }

    /// Pulse TRST, then [`reset`](Self::reset).
    pub fn trst_reset(&mut self) -> Result<()> {
        self.set_trst(false)?;
        self.set_trst(true)?;
        self.reset()
    }

    /// Reset the chain and load BYPASS into every part.
    ///
    /// The all-ones instruction is only shifted if the instruction register length of the
    /// chain is known. Parts lacking a BYPASS instruction are left without an active one.
    pub fn reset_bypass(&mut self) -> Result<()> {
        self.reset()?;

        let total_instr_len = self.total_instr_len();
        if total_instr_len == 0 {
            return Ok(());
        }

        let ones = TapRegister::filled(total_instr_len, true)?;
        let (mut port, parts) = self.port_and_parts()?;
        port.capture_ir()?;
        port.shift_register(&ones, None, ExitMode::Idle)?;

        for (i, part) in parts.iter_mut().enumerate() {
            if part.set_instruction(crate::part::BYPASS).is_err() {
                tracing::debug!("Part {} has no BYPASS instruction", i);
            }
        }
        Ok(())
    }

    /// Enter Capture-DR from Run-Test/Idle or one of the Update states.
    pub fn capture_dr(&mut self) -> Result<()> {
        self.port()?.capture_dr()
    }

    /// Enter Capture-IR from Run-Test/Idle or one of the Update states.
    pub fn capture_ir(&mut self) -> Result<()> {
        self.port()?.capture_ir()
    }

    /// Queue a raw shift of `input` through whatever register path the chain is in.
    ///
    /// With `output_len` given, the TDO bits are kept for a later
    /// [`shift_register_output`](Self::shift_register_output) into a register of that length.
    pub fn defer_shift_register(
        &mut self,
        input: &TapRegister,
        output_len: Option<usize>,
        exit: ExitMode,
    ) -> Result<()> {
        self.port()?.defer_shift_register(input, output_len, exit)
    }

    pub fn shift_register_output(
        &mut self,
        input_len: usize,
        output: &mut TapRegister,
        exit: ExitMode,
    ) -> Result<()> {
        self.port()?.shift_register_output(input_len, output, exit)
    }

    /// Shift `input` through the chain, optionally capturing what comes out into `output`.
    pub fn shift_register(
        &mut self,
        input: &TapRegister,
        output: Option<&mut TapRegister>,
        exit: ExitMode,
    ) -> Result<()> {
        self.port()?.shift_register(input, output, exit)
    }

    /// Capture the instruction registers and shift the active instructions of all parts,
    /// ending in Run-Test/Idle.
    pub fn shift_instructions(&mut self) -> Result<()> {
        self.shift_instructions_mode(false, true, ExitMode::Idle)
    }

    /// Shift the active instruction of every part as one scan.
    ///
    /// `capture` enters Capture-IR first, otherwise the chain has to be in a shift state
    /// already. With `capture_output` the bits leaving the chain are stored in the `out`
    /// register of each instruction. Only the last part leaves the shift state as
    /// requested by `exit`.
    pub fn shift_instructions_mode(
        &mut self,
        capture_output: bool,
        capture: bool,
        exit: ExitMode,
    ) -> Result<()> {
        if self.parts.is_empty() {
            return Ok(());
        }
        if let Some(i) = self
            .parts
            .iter()
            .position(|part| part.active_instruction().is_none())
        {
            tracing::warn!("Part {} has no active instruction", i);
            return Err(Error::PartWithoutInstruction(i));
        }

        let (mut port, parts) = self.port_and_parts()?;
        if capture {
            port.capture_ir()?;
        }

        let last = parts.len() - 1;
        let exit_of = |i: usize| if i == last { exit } else { ExitMode::Shift };

        for (i, part) in parts.iter().enumerate() {
            let instruction = part
                .active_instruction()
                .ok_or(Error::PartWithoutInstruction(i))?;
            port.defer_shift_register(
                instruction.value(),
                capture_output.then(|| instruction.out().len()),
                exit_of(i),
            )?;
        }

        if capture_output {
            for (i, part) in parts.iter_mut().enumerate() {
                let instruction = part
                    .active_instruction_mut()
                    .ok_or(Error::PartWithoutInstruction(i))?;
                let len = instruction.value().len();
                port.shift_register_output(len, instruction.out_mut(), exit_of(i))?;
            }
        } else {
            port.cable.flush(FlushAmount::ToOutput)?;
        }

        Ok(())
    }

    /// Capture the data registers selected by the active instructions and shift their `input`,
    /// ending in Run-Test/Idle. With `capture_output` the previous contents end up in the
    /// `output` registers.
    pub fn shift_data_registers(&mut self, capture_output: bool) -> Result<()> {
        self.shift_data_registers_mode(capture_output, true, ExitMode::Idle)
    }

    /// The data register counterpart of [`shift_instructions_mode`](Self::shift_instructions_mode).
    pub fn shift_data_registers_mode(
        &mut self,
        capture_output: bool,
        capture: bool,
        exit: ExitMode,
    ) -> Result<()> {
        if self.parts.is_empty() {
            return Ok(());
        }
        for (i, part) in self.parts.iter().enumerate() {
            let Some(instruction) = part.active_instruction() else {
                tracing::warn!("Part {} has no active instruction", i);
                return Err(Error::PartWithoutInstruction(i));
            };
            if instruction.data_register().is_none() {
                tracing::warn!(
                    "Instruction {} of part {} selects no data register",
                    instruction.name(),
                    i
                );
                return Err(Error::PartWithoutDataRegister(i));
            }
        }

        let (mut port, parts) = self.port_and_parts()?;
        if capture {
            port.capture_dr()?;
        }

        let last = parts.len() - 1;
        let exit_of = |i: usize| if i == last { exit } else { ExitMode::Shift };

        for (i, part) in parts.iter().enumerate() {
            let register = part
                .active_data_register()
                .ok_or(Error::PartWithoutDataRegister(i))?;
            port.defer_shift_register(
                &register.input,
                capture_output.then(|| register.output.len()),
                exit_of(i),
            )?;
        }

        if capture_output {
            for (i, part) in parts.iter_mut().enumerate() {
                let register = part
                    .active_data_register_mut()
                    .ok_or(Error::PartWithoutDataRegister(i))?;
                let len = register.input.len();
                port.shift_register_output(len, &mut register.output, exit_of(i))?;
            }
        } else {
            port.cable.flush(FlushAmount::ToOutput)?;
        }

        Ok(())
    }
}
