//! Growable ring buffers holding the deferred operations of a cable and their results.

use bitvec::prelude::*;

use super::{CableError, PodSignals};
use crate::config::QueueConfig;

/// An operation waiting in the `todo` queue of a cable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    /// `count` clock cycles with constant TMS and TDI.
    Clock { tms: bool, tdi: bool, count: usize },
    /// Sample TDO without clocking.
    GetTdo,
    /// Shift `input` with TMS low, optionally keeping the bits sampled from TDO.
    Transfer {
        input: BitVec<u8, Lsb0>,
        capture: bool,
    },
    /// Change the pod signals selected by `mask` to the levels in `value`.
    SetSignal { mask: PodSignals, value: PodSignals },
    /// Sample one pod signal.
    GetSignal { signal: PodSignals },
}

impl QueueItem {
    /// Whether executing this item produces an entry in the `done` queue.
    pub fn has_result(&self) -> bool {
        match self {
            Self::GetTdo | Self::GetSignal { .. } => true,
            Self::Transfer { capture, .. } => *capture,
            Self::Clock { .. } | Self::SetSignal { .. } => false,
        }
    }
}

/// A result waiting in the `done` queue of a cable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueResult {
    Tdo(bool),
    Transfer(BitVec<u8, Lsb0>),
    Signal { signal: PodSignals, value: bool },
}

/// A FIFO backed by a ring buffer which grows by a fixed increment when full.
///
/// Growing never reorders the queue: when the live region wraps around the end of the
/// buffer, the smaller of its two segments is moved into place.
#[derive(Debug)]
pub struct CableQueue<T> {
    slots: Vec<Option<T>>,
    next_item: usize,
    next_free: usize,
    num_items: usize,
    growth: usize,
}

impl<T> CableQueue<T> {
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_capacity(config.initial_capacity, config.growth)
    }

    /// A queue with `capacity` slots growing by `growth` slots. Both are at least one.
    pub fn with_capacity(capacity: usize, growth: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);

        Self {
            slots,
            next_item: 0,
            next_free: 0,
            num_items: 0,
            growth: growth.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append `item`, growing the buffer if it is full.
    ///
    /// If the buffer cannot grow the item is dropped and the queue is left as it was.
    pub fn push(&mut self, item: T) -> Result<(), CableError> {
        if self.num_items >= self.slots.len() {
            self.grow()?;
        }

        self.slots[self.next_free] = Some(item);
        self.next_free = (self.next_free + 1) % self.slots.len();
        self.num_items += 1;
        Ok(())
    }

    /// Remove the oldest item.
    pub fn pop(&mut self) -> Result<T, CableError> {
        if self.num_items == 0 {
            return Err(CableError::QueueEmpty);
        }

        let item = self.slots[self.next_item]
            .take()
            .ok_or(CableError::QueueOutOfSync)?;
        self.next_item = (self.next_item + 1) % self.slots.len();
        self.num_items -= 1;
        Ok(item)
    }

    /// The item `offset` positions behind the oldest one.
    pub fn peek(&self, offset: usize) -> Option<&T> {
        if offset >= self.num_items {
            return None;
        }

        self.slots[(self.next_item + offset) % self.slots.len()].as_ref()
    }

    /// Iterate over the queued items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.num_items).filter_map(move |offset| self.peek(offset))
    }

    /// Drop every queued item, returning how many there were.
    pub fn purge(&mut self) -> usize {
        let purged = self.num_items;
        for slot in &mut self.slots {
            *slot = None;
        }
        self.next_item = 0;
        self.next_free = 0;
        self.num_items = 0;
        purged
    }

    fn grow(&mut self) -> Result<(), CableError> {
        let max = self.slots.len();
        let new_max = max + self.growth;

        self.slots
            .try_reserve_exact(self.growth)
            .map_err(|_| CableError::OutOfMemory)?;
        self.slots.resize_with(new_max, || None);

        if self.next_item != 0 {
            // The live region wraps: [next_item, max) is followed by [0, next_free).
            let tail = max - self.next_item;
            let added = new_max - max;

            if tail <= self.next_free {
                // Move the tail to the end of the grown buffer, back to front as the ranges
                // may overlap.
                for i in (0..tail).rev() {
                    self.slots[new_max - tail + i] = self.slots[self.next_item + i].take();
                }
                self.next_item = new_max - tail;
            } else if self.next_free <= added {
                // The wrapped head fits completely into the new space.
                for i in 0..self.next_free {
                    self.slots[max + i] = self.slots[i].take();
                }
            } else {
                // Fill the new space with the start of the head, then close the gap.
                for i in 0..added {
                    self.slots[max + i] = self.slots[i].take();
                }
                for i in added..self.next_free {
                    self.slots[i - added] = self.slots[i].take();
                }
            }
        }

        self.next_free = (self.next_item + self.num_items) % new_max;
        tracing::trace!("Cable queue grown from {} to {} slots", max, new_max);
        Ok(())
    }
}
