//! # IEEE 1149.1 scan chain access
//!
//! `scanchain` drives the TAP controllers of a JTAG chain through a cable: it tracks the state
//! of the controllers, shifts instructions and data registers across all parts of the chain
//! and maps pins of a part onto its boundary scan register.
//!
//! Cable drivers only implement a handful of synchronous primitives. A deferred command queue
//! in front of every driver batches clocks and shifts, so that slow transports are not bound
//! by their per-call latency.
//!
//! # Examples
//!
//! ## Identifying the parts of a chain
//! ```
//! use scanchain::{Chain, ChainConfig};
//!
//! let mut chain = Chain::new(ChainConfig::default());
//!
//! // Two simulated devices: an ARM debug port and a part without an IDCODE.
//! chain.connect_driver("sim", &["4:0x4ba00477", "5"])?;
//!
//! let count = chain.detect_parts(None)?;
//! assert_eq!(count, 2);
//! assert_eq!(chain.total_instr_len(), 9);
//!
//! for part in chain.parts() {
//!     println!("{part}");
//! }
//! # Ok::<(), scanchain::Error>(())
//! ```
//!
//! ## Driving a pin
//! ```
//! use scanchain::part::{BitType, Part, SignalDirection, BSR};
//!
//! let mut part = Part::new(None);
//! part.add_data_register(BSR, 8)?;
//! part.add_signal("LED", None)?;
//! part.define_bit(3, BitType::Output, false, "LED", None)?;
//!
//! part.set_signal("LED", SignalDirection::Output, true)?;
//! assert_eq!(part.data_register(BSR)?.input.to_bit_string(), "00001000");
//! # Ok::<(), scanchain::part::PartError>(())
//! ```

pub mod cable;
mod chain;
pub mod config;
mod error;
pub mod idcode;
pub mod part;
#[warn(missing_docs)]
mod register;
#[warn(missing_docs)]
pub mod tap;

pub use crate::cable::{Cable, CableDriver, CableError, FlushAmount, FlushStrategy, PodSignals};
pub use crate::chain::{Chain, DiscoveredRegister, Discovery, ExitMode, ScannedPart};
pub use crate::config::{ChainConfig, DetectConfig, QueueConfig};
pub use crate::error::{Error, Result};
pub use crate::idcode::{IdCode, ScanChainError};
pub use crate::part::{Part, PartError};
pub use crate::register::{RegisterError, TapRegister};
pub use crate::tap::{RegisterState, TapState};
