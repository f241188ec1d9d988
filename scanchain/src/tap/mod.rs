//! The IEEE 1149.1 TAP controller state machine.

mod state;

pub use state::{RegisterState, TapState, TapStateTracker, RESET_CLOCKS};
