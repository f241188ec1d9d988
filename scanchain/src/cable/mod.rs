//! Cables connect the host to the TAP signals of a chain.
//!
//! A [`Cable`] wraps a [`CableDriver`] and puts a deferred command queue in front of it.
//! The `defer_*` methods only record what should happen, the driver sees the operations
//! when the queue is flushed. For transports with a high per-call latency this lets a
//! driver combine many clocks and shifts into a single transfer.
//!
//! Results of deferred reads end up in a second queue and are picked up in submission
//! order with the `*_late` methods. The plain methods (`clock`, `get_tdo`, ...) flush
//! everything first and then talk to the driver directly.

mod generic;
mod list;
mod queue;
pub mod remote_bitbang;
pub mod sim;

use std::fmt::Debug;
use std::time::Duration;

use bitvec::prelude::*;

use crate::config::QueueConfig;

pub use list::{find_driver, list_drivers, CableFactory, CableInfo};
pub use queue::{CableQueue, QueueItem, QueueResult};

bitflags::bitflags! {
    /// Signals of a cable which can be set or sampled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PodSignals: u32 {
        const TDI = 1 << 0;
        const TCK = 1 << 1;
        const TMS = 1 << 2;
        /// Test reset, active low. The bit set means the line is released.
        const TRST = 1 << 3;
        /// System reset, active low. The bit set means the line is released.
        const RESET = 1 << 4;
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CableError {
    #[error("Communication with the cable failed")]
    Io(#[from] std::io::Error),
    #[error("The cable queue is empty")]
    QueueEmpty,
    #[error("The cable result queue is out of sync with the requested operation")]
    QueueOutOfSync,
    #[error("Out of memory while growing the cable queue")]
    OutOfMemory,
    #[error("No cable driver named '{0}' is known")]
    DriverNotFound(String),
    #[error("Invalid cable parameter '{0}'")]
    InvalidParameter(String),
    #[error("The cable does not support {0}")]
    NotSupported(&'static str),
    #[error("An error specific to a cable type occured")]
    CableSpecific(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How much of the queue a flush has to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlushAmount {
    /// Only if the driver considers it worthwhile.
    Optionally,
    /// All pending output has to reach the hardware.
    ToOutput,
    /// The queue has to be empty and all results available.
    Completely,
}

/// The generic algorithm a driver wants its queue flushed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStrategy {
    /// Execute queued items one at a time, on every flush.
    OneByOne,
    /// Combine runs of TMS low clocks, transfers and TDO samples into single transfers.
    CombineTransfers,
}

/// The operations every cable driver implements.
///
/// Only the synchronous primitives are needed; queueing is handled by [`Cable`].
pub trait CableDriver: Debug {
    /// Get a human readable name for the driver.
    fn name(&self) -> &str;

    fn init(&mut self) -> Result<(), CableError> {
        Ok(())
    }

    fn done(&mut self) -> Result<(), CableError> {
        Ok(())
    }

    /// Change the TCK frequency, returning the frequency actually configured.
    fn set_frequency(&mut self, frequency_hz: u32) -> Result<u32, CableError>;

    /// Send `count` clock cycles with the given TMS and TDI levels.
    fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<(), CableError>;

    /// Sample TDO.
    fn get_tdo(&mut self) -> Result<bool, CableError>;

    /// Shift `input` with TMS low. If `output` is given, TDO is sampled before each clock.
    fn transfer(
        &mut self,
        input: &BitSlice<u8, Lsb0>,
        mut output: Option<&mut BitSlice<u8, Lsb0>>,
    ) -> Result<(), CableError> {
        for (i, tdi) in input.iter().by_vals().enumerate() {
            if let Some(output) = output.as_deref_mut() {
                let tdo = self.get_tdo()?;
                output.set(i, tdo);
            }
            self.clock(false, tdi, 1)?;
        }
        Ok(())
    }

    /// Drive the signals in `mask` to the levels given in `value`, returning the previous
    /// levels of all signals.
    fn set_signal(&mut self, mask: PodSignals, value: PodSignals)
        -> Result<PodSignals, CableError>;

    /// Sample a single signal.
    fn get_signal(&mut self, signal: PodSignals) -> Result<bool, CableError>;

    fn flush_strategy(&self) -> FlushStrategy {
        FlushStrategy::OneByOne
    }

    /// Send everything the driver buffered to the hardware.
    ///
    /// Called whenever output has to reach the target, after the queue was processed.
    fn flush(&mut self) -> Result<(), CableError> {
        Ok(())
    }
}

/// A driver together with its deferred command queues.
#[derive(Debug)]
pub struct Cable {
    driver: Box<dyn CableDriver>,
    todo: CableQueue<QueueItem>,
    done: CableQueue<QueueResult>,
    optional_flush_threshold: Option<usize>,
    frequency: u32,
    delay: Duration,
}

impl Cable {
    pub fn new(driver: Box<dyn CableDriver>, config: &QueueConfig) -> Self {
        Self {
            driver,
            todo: CableQueue::new(config),
            done: CableQueue::new(config),
            optional_flush_threshold: config.optional_flush_threshold,
            frequency: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    pub fn init(&mut self) -> Result<(), CableError> {
        self.driver.init()
    }

    /// Flush the queue and shut the driver down.
    pub fn done(&mut self) -> Result<(), CableError> {
        let flushed = self.flush(FlushAmount::Completely);
        self.todo.purge();
        self.done.purge();
        let done = self.driver.done();
        flushed.and(done)
    }

    /// The last configured TCK frequency, `0` if none was set.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), CableError> {
        self.flush(FlushAmount::Completely)?;
        let actual = self.driver.set_frequency(frequency_hz)?;
        tracing::debug!(
            "{}: frequency set to {} Hz (requested {} Hz)",
            self.name(),
            actual,
            frequency_hz
        );
        self.frequency = actual;
        Ok(())
    }

    /// The delay [`wait`](Self::wait) pauses for.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Flush all pending output, then pause for the configured delay.
    pub fn wait(&mut self) -> Result<(), CableError> {
        self.flush(FlushAmount::ToOutput)?;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(())
    }

    /// Number of operations waiting to be executed.
    pub fn pending(&self) -> usize {
        self.todo.len()
    }

    /// Number of results waiting to be picked up.
    pub fn results(&self) -> usize {
        self.done.len()
    }

    /// Drop all queued operations and results without executing them.
    pub fn purge_queue(&mut self) {
        let todo = self.todo.purge();
        let done = self.done.purge();
        if todo + done > 0 {
            tracing::debug!("Purged {} queued operations and {} results", todo, done);
        }
    }

    pub fn flush(&mut self, amount: FlushAmount) -> Result<(), CableError> {
        if !self.todo.is_empty() {
            match self.driver.flush_strategy() {
                FlushStrategy::OneByOne => generic::flush_one_by_one(self)?,
                FlushStrategy::CombineTransfers => generic::flush_using_transfer(self, amount)?,
            }
        }

        if amount >= FlushAmount::ToOutput {
            self.driver.flush()?;
        }
        Ok(())
    }

    fn enqueue(&mut self, item: QueueItem) -> Result<(), CableError> {
        tracing::trace!("Queueing {:?}", item);
        self.todo.push(item)?;
        self.flush(FlushAmount::Optionally)
    }

    pub fn defer_clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<(), CableError> {
        self.enqueue(QueueItem::Clock { tms, tdi, count })
    }

    pub fn defer_get_tdo(&mut self) -> Result<(), CableError> {
        self.enqueue(QueueItem::GetTdo)
    }

    /// Queue a transfer of `input`. With `capture` set, the sampled bits are available to
    /// [`transfer_late`](Self::transfer_late).
    pub fn defer_transfer(
        &mut self,
        input: &BitSlice<u8, Lsb0>,
        capture: bool,
    ) -> Result<(), CableError> {
        self.enqueue(QueueItem::Transfer {
            input: input.to_bitvec(),
            capture,
        })
    }

    pub fn defer_set_signal(
        &mut self,
        mask: PodSignals,
        value: PodSignals,
    ) -> Result<(), CableError> {
        self.enqueue(QueueItem::SetSignal { mask, value })
    }

    pub fn defer_get_signal(&mut self, signal: PodSignals) -> Result<(), CableError> {
        self.enqueue(QueueItem::GetSignal { signal })
    }

    pub fn clock(&mut self, tms: bool, tdi: bool, count: usize) -> Result<(), CableError> {
        self.flush(FlushAmount::Completely)?;
        self.driver.clock(tms, tdi, count)?;
        self.driver.flush()
    }

    pub fn get_tdo(&mut self) -> Result<bool, CableError> {
        self.flush(FlushAmount::Completely)?;
        self.driver.get_tdo()
    }

    pub fn transfer(
        &mut self,
        input: &BitSlice<u8, Lsb0>,
        output: Option<&mut BitSlice<u8, Lsb0>>,
    ) -> Result<(), CableError> {
        self.flush(FlushAmount::Completely)?;
        self.driver.transfer(input, output)?;
        self.driver.flush()
    }

    pub fn set_signal(
        &mut self,
        mask: PodSignals,
        value: PodSignals,
    ) -> Result<PodSignals, CableError> {
        self.flush(FlushAmount::Completely)?;
        self.driver.set_signal(mask, value)
    }

    pub fn get_signal(&mut self, signal: PodSignals) -> Result<bool, CableError> {
        self.flush(FlushAmount::Completely)?;
        self.driver.get_signal(signal)
    }

    /// Pick up the result of the oldest deferred [`defer_get_tdo`](Self::defer_get_tdo).
    ///
    /// Without a queued result TDO is sampled directly.
    pub fn get_tdo_late(&mut self) -> Result<bool, CableError> {
        self.flush(FlushAmount::ToOutput)?;
        match self.done.pop() {
            Ok(QueueResult::Tdo(value)) => Ok(value),
            Ok(other) => Err(self.out_of_sync("TDO", &other)),
            Err(CableError::QueueEmpty) => self.driver.get_tdo(),
            Err(e) => Err(e),
        }
    }

    /// Pick up the bits captured by the oldest deferred capturing transfer.
    pub fn transfer_late(&mut self, output: &mut BitSlice<u8, Lsb0>) -> Result<(), CableError> {
        self.flush(FlushAmount::ToOutput)?;
        match self.done.pop() {
            Ok(QueueResult::Transfer(bits)) => {
                let len = bits.len().min(output.len());
                output[..len].copy_from_bitslice(&bits[..len]);
                Ok(())
            }
            Ok(other) => Err(self.out_of_sync("transfer", &other)),
            Err(CableError::QueueEmpty) => {
                tracing::error!("Wanted a transfer result but none was queued");
                Err(CableError::QueueOutOfSync)
            }
            Err(e) => Err(e),
        }
    }

    /// Pick up the result of the oldest deferred [`defer_get_signal`](Self::defer_get_signal).
    pub fn get_signal_late(&mut self, signal: PodSignals) -> Result<bool, CableError> {
        self.flush(FlushAmount::ToOutput)?;
        match self.done.pop() {
            Ok(QueueResult::Signal {
                signal: queued,
                value,
            }) if queued == signal => Ok(value),
            Ok(other) => Err(self.out_of_sync("signal", &other)),
            Err(CableError::QueueEmpty) => self.driver.get_signal(signal),
            Err(e) => Err(e),
        }
    }

    fn out_of_sync(&mut self, wanted: &str, found: &QueueResult) -> CableError {
        tracing::error!(
            "Internal error: expected a {} result from the queue, got {:?}",
            wanted,
            found
        );
        self.done.purge();
        CableError::QueueOutOfSync
    }

    /// Execute the oldest queued operation, returning `false` if there was none.
    fn do_one_queued_action(&mut self) -> Result<bool, CableError> {
        let item = match self.todo.pop() {
            Ok(item) => item,
            Err(CableError::QueueEmpty) => return Ok(false),
            Err(e) => return Err(e),
        };

        match item {
            QueueItem::Clock { tms, tdi, count } => self.driver.clock(tms, tdi, count)?,
            QueueItem::SetSignal { mask, value } => {
                self.driver.set_signal(mask, value)?;
            }
            QueueItem::Transfer { input, capture } => {
                if capture {
                    let mut output = BitVec::repeat(false, input.len());
                    self.driver.transfer(&input, Some(&mut output))?;
                    self.done.push(QueueResult::Transfer(output))?;
                } else {
                    self.driver.transfer(&input, None)?;
                }
            }
            QueueItem::GetTdo => {
                let value = self.driver.get_tdo()?;
                self.done.push(QueueResult::Tdo(value))?;
            }
            QueueItem::GetSignal { signal } => {
                let value = self.driver.get_signal(signal)?;
                self.done.push(QueueResult::Signal { signal, value })?;
            }
        }
        Ok(true)
    }
}
