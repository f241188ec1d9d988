//! A scan chain: the cable driving it, the state of its TAP controllers and its parts.

mod detect;
mod shift;

use crate::cable::{find_driver, Cable, CableDriver, FlushAmount, PodSignals};
use crate::config::ChainConfig;
use crate::error::{Error, Result};
use crate::part::Part;
use crate::tap::{TapState, TapStateTracker};

pub use detect::{DiscoveredRegister, Discovery, ScannedPart};
pub use shift::ExitMode;
pub(crate) use shift::TapPort;

/// All parts sharing one set of TAP signals, and the cable connected to them.
///
/// The chain follows every clock it sends, so [`state`](Self::state) always reflects the TAP
/// controllers as far as the host can know.
#[derive(Debug)]
pub struct Chain {
    cable: Option<Cable>,
    state: TapStateTracker,
    parts: Vec<Part>,
    active_part: usize,
    /// Instruction register length found by scanning, used while no parts are known.
    scanned_instr_len: Option<usize>,
    config: ChainConfig,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new(ChainConfig::default())
    }
}

impl Chain {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            cable: None,
            state: TapStateTracker::new(),
            parts: Vec::new(),
            active_part: 0,
            scanned_instr_len: None,
            config,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Take over `driver` as the cable of this chain.
    ///
    /// A previously connected cable is disconnected first. The TAP controllers are reset
    /// through TRST and TMS afterwards.
    pub fn connect(&mut self, driver: Box<dyn CableDriver>) -> Result<()> {
        self.disconnect()?;

        let mut cable = Cable::new(driver, &self.config.queue);
        cable.init()?;
        tracing::debug!("Connected cable '{}'", cable.name());

        self.cable = Some(cable);
        self.state.forget();
        self.trst_reset()
    }

    /// Open the registered driver `name` with `params` and [`connect`](Self::connect) it.
    pub fn connect_driver(&mut self, name: &str, params: &[&str]) -> Result<()> {
        let driver = find_driver(name)?.open(params)?;
        self.connect(driver)
    }

    /// Release the cable. Pending operations are executed first.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(mut cable) = self.cable.take() {
            self.state.forget();
            tracing::debug!("Disconnecting cable '{}'", cable.name());
            cable.done()?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.cable.is_some()
    }

    pub fn cable(&self) -> Result<&Cable> {
        self.cable.as_ref().ok_or(Error::NoCable)
    }

    pub fn cable_mut(&mut self) -> Result<&mut Cable> {
        self.cable.as_mut().ok_or(Error::NoCable)
    }

    /// The state of the TAP controllers.
    pub fn state(&self) -> TapState {
        self.state.state()
    }

    /// The cable and the state tracker, borrowed independently of the parts.
    pub(crate) fn port(&mut self) -> Result<TapPort<'_>> {
        let Self { cable, state, .. } = self;
        let cable = cable.as_mut().ok_or(Error::NoCable)?;
        Ok(TapPort { cable, state })
    }

    pub(crate) fn port_and_parts(&mut self) -> Result<(TapPort<'_>, &mut [Part])> {
        let Self {
            cable,
            state,
            parts,
            ..
        } = self;
        let cable = cable.as_mut().ok_or(Error::NoCable)?;
        Ok((TapPort { cable, state }, parts.as_mut_slice()))
    }

    /// Send `count` clocks right away.
    pub fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        self.port()?.clock(tms, tdi, count)
    }

    pub fn defer_clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<()> {
        self.port()?.defer_clock(tms, tdi, count)
    }

    /// Drive TRST, `true` releasing it. Returns the previous level.
    pub fn set_trst(&mut self, trst: bool) -> Result<bool> {
        let value = if trst {
            PodSignals::TRST
        } else {
            PodSignals::empty()
        };
        let old = self.cable_mut()?.set_signal(PodSignals::TRST, value)?;
        let old = old.contains(PodSignals::TRST);
        self.state.set_trst(old, trst);
        Ok(old)
    }

    pub fn get_trst(&mut self) -> Result<bool> {
        Ok(self.cable_mut()?.get_signal(PodSignals::TRST)?)
    }

    /// Drive the cable signals in `mask`, returning the previous levels of all signals.
    ///
    /// A TRST change contained in `mask` is reflected in [`state`](Self::state).
    pub fn set_pod_signal(&mut self, mask: PodSignals, value: PodSignals) -> Result<PodSignals> {
        let old = self.cable_mut()?.set_signal(mask, value)?;
        let new = (old - mask) | (value & mask);
        self.state.set_trst(
            old.contains(PodSignals::TRST),
            new.contains(PodSignals::TRST),
        );
        Ok(old)
    }

    pub fn get_pod_signal(&mut self, signal: PodSignals) -> Result<bool> {
        Ok(self.cable_mut()?.get_signal(signal)?)
    }

    /// Execute everything queued on the cable.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(cable) = self.cable.as_mut() {
            cable.flush(FlushAmount::Completely)?;
        }
        Ok(())
    }

    pub fn frequency(&self) -> Result<u32> {
        Ok(self.cable()?.frequency())
    }

    pub fn set_frequency(&mut self, frequency_hz: u32) -> Result<()> {
        let cable = self.cable_mut()?;
        cable.set_frequency(frequency_hz)?;
        tracing::debug!("TCK frequency is now {} Hz", cable.frequency());
        Ok(())
    }

    /// Walk the TAP controllers to `target` along the shortest path.
    ///
    /// From an unknown state the controllers are reset first.
    pub fn goto_state(&mut self, target: TapState) -> Result<()> {
        let mut port = self.port()?;
        for tms in port.state.state().path_to(target) {
            port.defer_clock(tms, false, 1)?;
        }
        tracing::trace!("TAP controllers in {}", port.state.state());
        Ok(())
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [Part] {
        &mut self.parts
    }

    pub fn part(&self, index: usize) -> Result<&Part> {
        self.parts.get(index).ok_or(Error::InvalidPartIndex(index))
    }

    pub fn part_mut(&mut self, index: usize) -> Result<&mut Part> {
        self.parts
            .get_mut(index)
            .ok_or(Error::InvalidPartIndex(index))
    }

    /// Append a part behind the existing ones, i.e. closer to TDI.
    pub fn add_part(&mut self, part: Part) -> usize {
        self.scanned_instr_len = None;
        self.parts.push(part);
        self.parts.len() - 1
    }

    /// Forget all parts.
    pub fn clear_parts(&mut self) {
        self.parts.clear();
        self.active_part = 0;
        self.scanned_instr_len = None;
    }

    pub fn active_part_index(&self) -> usize {
        self.active_part
    }

    /// Select the part that part level operations of a user interface apply to.
    pub fn set_active_part(&mut self, index: usize) -> Result<()> {
        if index >= self.parts.len() {
            return Err(Error::InvalidPartIndex(index));
        }
        self.active_part = index;
        Ok(())
    }

    pub fn active_part(&self) -> Result<&Part> {
        self.part(self.active_part)
    }

    pub fn active_part_mut(&mut self) -> Result<&mut Part> {
        self.part_mut(self.active_part)
    }

    /// Sum of the instruction register lengths of all parts.
    ///
    /// Follows length changes made through [`parts_mut`](Self::parts_mut). Without parts the
    /// length given to [`set_total_instr_len`](Self::set_total_instr_len) is reported.
    pub fn total_instr_len(&self) -> usize {
        match self.scanned_instr_len {
            Some(len) if self.parts.is_empty() => len,
            _ => self.parts.iter().map(Part::instruction_length).sum(),
        }
    }

    /// Set the instruction register length of a chain whose parts are not known yet, e.g.
    /// after [`detect_register_size`](Self::detect_register_size). Adding a part discards it.
    pub fn set_total_instr_len(&mut self, len: usize) {
        self.scanned_instr_len = Some(len);
    }

    /// Select instruction `name` in every part.
    ///
    /// Every part is updated; parts without such an instruction are left without an active
    /// one and the first of them is reported.
    pub fn set_instruction(&mut self, name: &str) -> Result<()> {
        let mut first_error = None;
        for (i, part) in self.parts.iter_mut().enumerate() {
            if let Err(source) = part.set_instruction(name) {
                first_error.get_or_insert(Error::InPart { part: i, source });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            tracing::warn!("Failed to disconnect the cable: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cable::sim::{SimulatedCable, SimulatedTap};
    use crate::part::PartError;
    use crate::tap::RegisterState;

    fn connected(devices: Vec<SimulatedTap>) -> Chain {
        let mut chain = Chain::default();
        chain
            .connect(Box::new(SimulatedCable::new(devices)))
            .unwrap();
        chain
    }

    #[test]
    fn operations_need_a_cable() {
        let mut chain = Chain::default();
        assert!(matches!(chain.clock(true, false, 1), Err(Error::NoCable)));
        assert!(matches!(chain.set_trst(true), Err(Error::NoCable)));
        assert!(chain.flush().is_ok());
        assert!(chain.disconnect().is_ok());
    }

    #[test]
    fn connecting_resets_to_idle() {
        let chain = connected(vec![SimulatedTap::new(4)]);
        assert!(chain.is_connected());
        assert_eq!(chain.state(), TapState::RunTestIdle);
    }

    #[test]
    fn trst_changes_are_tracked() {
        let mut chain = connected(vec![SimulatedTap::new(4)]);

        assert!(chain.set_trst(false).unwrap());
        assert_eq!(chain.state(), TapState::Unknown);
        assert!(!chain.get_trst().unwrap());

        assert!(!chain.set_trst(true).unwrap());
        assert_eq!(chain.state(), TapState::TestLogicReset);

        chain.clock(false, false, 1).unwrap();
        let old = chain
            .set_pod_signal(PodSignals::TRST | PodSignals::RESET, PodSignals::RESET)
            .unwrap();
        assert!(old.contains(PodSignals::TRST));
        assert_eq!(chain.state(), TapState::Unknown);
    }

    #[test]
    fn goto_state_follows_the_shortest_path() {
        let mut chain = connected(vec![SimulatedTap::new(4)]);
        let target = TapState::Ir(RegisterState::Pause);

        chain.goto_state(target).unwrap();
        chain.flush().unwrap();

        assert_eq!(chain.state(), target);
        let sim = chain.cable().unwrap();
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn instruction_is_selected_in_every_part() {
        let mut chain = Chain::default();
        for len in [2, 3] {
            let mut part = Part::new(None);
            part.set_instruction_length(len).unwrap();
            part.add_instruction("BYPASS", &"1".repeat(len), None).unwrap();
            chain.add_part(part);
        }
        let mut lonely = Part::new(None);
        lonely.set_instruction_length(1).unwrap();
        chain.add_part(lonely);
        assert_eq!(chain.total_instr_len(), 6);

        let result = chain.set_instruction("BYPASS");
        assert!(matches!(
            result,
            Err(Error::InPart {
                part: 2,
                source: PartError::InstructionNotFound(_)
            })
        ));
        assert!(chain.part(1).unwrap().active_instruction().is_some());
        assert!(matches!(chain.set_active_part(3), Err(Error::InvalidPartIndex(3))));
    }

    #[test]
    fn instruction_length_follows_the_parts() {
        let mut chain = Chain::default();
        chain.set_total_instr_len(7);
        assert_eq!(chain.total_instr_len(), 7);

        let mut part = Part::new(None);
        part.set_instruction_length(4).unwrap();
        chain.add_part(part);
        assert_eq!(chain.total_instr_len(), 4);

        chain.parts_mut()[0].set_instruction_length(6).unwrap();
        assert_eq!(chain.total_instr_len(), 6);

        chain.part_mut(0).unwrap().set_instruction_length(2).unwrap();
        assert_eq!(chain.total_instr_len(), 2);

        chain.clear_parts();
        assert_eq!(chain.total_instr_len(), 0);
    }
}
