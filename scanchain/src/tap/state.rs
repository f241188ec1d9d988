use std::fmt;

/// The sub-states shared between the data and the instruction register columns of the TAP
/// state diagram.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RegisterState {
    Select,
    Capture,
    Shift,
    Exit1,
    Pause,
    Exit2,
    Update,
}

impl RegisterState {
    /// TMS value which moves `self` closer to `target` inside the same column.
    ///
    /// `Select` and `Update` leave the column and are handled by [`TapState::step_toward`].
    fn step_toward(self, target: Self) -> bool {
        match self {
            Self::Select => false,
            Self::Capture => target != Self::Shift,
            Self::Shift => true,
            Self::Exit1 => !matches!(target, Self::Pause | Self::Exit2 | Self::Shift),
            Self::Pause => true,
            Self::Exit2 => !matches!(target, Self::Shift | Self::Exit1 | Self::Pause),
            Self::Update => true,
        }
    }

    /// Next state inside the column. `Select` with TMS high and `Update` leave the column,
    /// which [`TapState::next`] takes care of.
    fn next(self, tms: bool) -> Self {
        if tms {
            match self {
                Self::Capture | Self::Shift => Self::Exit1,
                Self::Exit1 | Self::Exit2 => Self::Update,
                Self::Pause => Self::Exit2,
                Self::Select | Self::Update => self,
            }
        } else {
            match self {
                Self::Select => Self::Capture,
                Self::Capture | Self::Shift | Self::Exit2 => Self::Shift,
                Self::Exit1 | Self::Pause => Self::Pause,
                Self::Update => self,
            }
        }
    }
}

/// A state of the IEEE 1149.1 TAP controller.
///
/// `Unknown` is the state after power-up or after TRST was asserted with no guarantee about the
/// controller. Only five consecutive clocks with TMS high, tracked by [`TapStateTracker`], get
/// the controller out of it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum TapState {
    #[default]
    Unknown,
    TestLogicReset,
    RunTestIdle,
    Dr(RegisterState),
    Ir(RegisterState),
}

impl TapState {
    /// All sixteen well-defined states.
    pub const ALL: [TapState; 16] = [
        Self::TestLogicReset,
        Self::RunTestIdle,
        Self::Dr(RegisterState::Select),
        Self::Dr(RegisterState::Capture),
        Self::Dr(RegisterState::Shift),
        Self::Dr(RegisterState::Exit1),
        Self::Dr(RegisterState::Pause),
        Self::Dr(RegisterState::Exit2),
        Self::Dr(RegisterState::Update),
        Self::Ir(RegisterState::Select),
        Self::Ir(RegisterState::Capture),
        Self::Ir(RegisterState::Shift),
        Self::Ir(RegisterState::Exit1),
        Self::Ir(RegisterState::Pause),
        Self::Ir(RegisterState::Exit2),
        Self::Ir(RegisterState::Update),
    ];

    /// The state reached from `self` after one TCK with the given TMS level.
    pub fn next(self, tms: bool) -> Self {
        match self {
            Self::Unknown => Self::Unknown,
            Self::TestLogicReset if tms => Self::TestLogicReset,
            Self::RunTestIdle if tms => Self::Dr(RegisterState::Select),
            Self::TestLogicReset | Self::RunTestIdle => Self::RunTestIdle,
            Self::Dr(RegisterState::Update) | Self::Ir(RegisterState::Update) => {
                if tms {
                    Self::Dr(RegisterState::Select)
                } else {
                    Self::RunTestIdle
                }
            }
            Self::Dr(RegisterState::Select) if tms => Self::Ir(RegisterState::Select),
            Self::Ir(RegisterState::Select) if tms => Self::TestLogicReset,
            Self::Dr(state) => Self::Dr(state.next(tms)),
            Self::Ir(state) => Self::Ir(state.next(tms)),
        }
    }

    /// TMS value for the next clock on the shortest path to `target`, or `None` if the
    /// controller is already there.
    ///
    /// From `Unknown` this keeps TMS high, which reaches `TestLogicReset` after five clocks.
    pub fn step_toward(self, target: Self) -> Option<bool> {
        let tms = match self {
            state if target == state => return None,
            Self::Unknown => true,
            Self::TestLogicReset => false,
            Self::RunTestIdle => true,
            Self::Dr(RegisterState::Select) => !matches!(target, Self::Dr(_)),
            Self::Ir(RegisterState::Select) => !matches!(target, Self::Ir(_)),
            Self::Dr(RegisterState::Update) | Self::Ir(RegisterState::Update) => {
                target != Self::RunTestIdle
            }
            Self::Dr(state) => match target {
                Self::Dr(target) => state.step_toward(target),
                _ => state.step_toward(RegisterState::Update),
            },
            Self::Ir(state) => match target {
                Self::Ir(target) => state.step_toward(target),
                _ => state.step_toward(RegisterState::Update),
            },
        };
        Some(tms)
    }

    /// The TMS sequence leading from `self` to `target`.
    ///
    /// `Unknown` is not a valid target, the path to it is empty.
    pub fn path_to(self, target: Self) -> Vec<bool> {
        let mut path = vec![];
        if target == Self::Unknown {
            return path;
        }

        let mut tracker = TapStateTracker::with_state(self);
        while let Some(tms) = tracker.state().step_toward(target) {
            path.push(tms);
            tracker.clock(tms);
        }
        path
    }

    /// Part of the data register column.
    pub fn is_dr(self) -> bool {
        matches!(self, Self::Dr(_))
    }

    /// Part of the instruction register column.
    pub fn is_ir(self) -> bool {
        matches!(self, Self::Ir(_))
    }

    /// A state from which the next TMS low clock shifts a register: capture, shift and exit2.
    pub fn is_shift(self) -> bool {
        matches!(
            self,
            Self::Dr(RegisterState::Capture | RegisterState::Shift | RegisterState::Exit2)
                | Self::Ir(RegisterState::Capture | RegisterState::Shift | RegisterState::Exit2)
        )
    }

    pub fn is_capture(self) -> bool {
        matches!(
            self,
            Self::Dr(RegisterState::Capture) | Self::Ir(RegisterState::Capture)
        )
    }

    pub fn is_update(self) -> bool {
        matches!(
            self,
            Self::Dr(RegisterState::Update) | Self::Ir(RegisterState::Update)
        )
    }

    pub fn is_pause(self) -> bool {
        matches!(
            self,
            Self::Dr(RegisterState::Pause) | Self::Ir(RegisterState::Pause)
        )
    }

    /// States in which the controller rests between scans.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::TestLogicReset | Self::RunTestIdle) || self.is_update()
    }

    /// States which carry no scan context: reset and unknown.
    pub fn is_reset(self) -> bool {
        matches!(self, Self::TestLogicReset | Self::Unknown)
    }

    /// Whether a capture sequence may start here: Run-Test/Idle or one of the update states.
    pub fn can_start_capture(self) -> bool {
        self.is_idle() && !self.is_reset()
    }
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (column, state) = match self {
            Self::Unknown => return f.write_str("Unknown"),
            Self::TestLogicReset => return f.write_str("Test-Logic-Reset"),
            Self::RunTestIdle => return f.write_str("Run-Test/Idle"),
            Self::Dr(state) => ("DR", state),
            Self::Ir(state) => ("IR", state),
        };
        let name = match state {
            RegisterState::Select => "Select",
            RegisterState::Capture => "Capture",
            RegisterState::Shift => "Shift",
            RegisterState::Exit1 => "Exit1",
            RegisterState::Pause => "Pause",
            RegisterState::Exit2 => "Exit2",
            RegisterState::Update => "Update",
        };
        if *state == RegisterState::Select {
            write!(f, "{name}-{column}-Scan")
        } else {
            write!(f, "{name}-{column}")
        }
    }
}

/// Number of TMS high clocks after which every controller is in Test-Logic-Reset.
pub const RESET_CLOCKS: usize = 5;

/// Follows the TAP controller of a chain from the clocks and TRST changes sent to it.
///
/// On top of [`TapState::next`] this counts consecutive TMS high clocks, so that a controller
/// in an unknown state is known to be in Test-Logic-Reset after [`RESET_CLOCKS`] of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TapStateTracker {
    state: TapState,
    tms_high: usize,
}

impl TapStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: TapState) -> Self {
        Self { state, tms_high: 0 }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    /// Track one TCK with the given TMS level and return the new state.
    pub fn clock(&mut self, tms: bool) -> TapState {
        if tms {
            self.tms_high = self.tms_high.saturating_add(1);
        } else {
            self.tms_high = 0;
        }

        self.state = if self.tms_high >= RESET_CLOCKS {
            TapState::TestLogicReset
        } else {
            self.state.next(tms)
        };
        self.state
    }

    /// The controller was reset by other means.
    pub fn reset(&mut self) {
        self.state = TapState::TestLogicReset;
        self.tms_high = 0;
    }

    /// Nothing is known about the controller anymore.
    pub fn forget(&mut self) {
        self.state = TapState::Unknown;
        self.tms_high = 0;
    }

    /// Track a change of the TRST line. `true` is the released (high) level.
    ///
    /// Releasing TRST after a change leaves the controller in Test-Logic-Reset, asserting it
    /// leaves the controller in an unknown state until it is released again.
    pub fn set_trst(&mut self, old: bool, new: bool) -> TapState {
        if old != new {
            if new {
                self.reset();
            } else {
                self.forget();
            }
        }
        self.state
    }
}
