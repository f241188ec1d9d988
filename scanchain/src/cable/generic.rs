//! Flush algorithms shared by all drivers.

use std::iter;

use bitvec::prelude::*;

use super::{Cable, CableError, FlushAmount, QueueItem, QueueResult};

/// Execute every queued item on its own, regardless of the requested amount.
pub(super) fn flush_one_by_one(cable: &mut Cable) -> Result<(), CableError> {
    while cable.do_one_queued_action()? {}
    Ok(())
}

/// Combine runs of TMS low clocks, transfers and TDO samples into one driver transfer.
///
/// Optional flushes are skipped unless the queue reached the configured threshold.
pub(super) fn flush_using_transfer(cable: &mut Cable, amount: FlushAmount) -> Result<(), CableError> {
    if amount == FlushAmount::Optionally {
        match cable.optional_flush_threshold {
            Some(threshold) if cable.todo.len() >= threshold => {}
            _ => return Ok(()),
        }
    }

    while !cable.todo.is_empty() {
        let mut items = 0;
        let mut bits = 0;
        for item in cable.todo.iter() {
            match item {
                QueueItem::Clock {
                    tms: false, count, ..
                } => bits += count,
                QueueItem::Transfer { input, .. } => bits += input.len(),
                QueueItem::GetTdo => {}
                _ => break,
            }
            items += 1;
        }

        if bits == 0 || items <= 1 {
            cable.do_one_queued_action()?;
            continue;
        }

        tracing::trace!("Combining {} queued items into a {} bit transfer", items, bits);

        let mut input = BitVec::<u8, Lsb0>::with_capacity(bits);
        let mut wants_output = false;
        for item in cable.todo.iter().take(items) {
            wants_output |= item.has_result();
            match item {
                QueueItem::Clock { tdi, count, .. } => input.extend(iter::repeat(*tdi).take(*count)),
                QueueItem::Transfer { input: data, .. } => input.extend_from_bitslice(data),
                _ => {}
            }
        }

        let mut output = BitVec::<u8, Lsb0>::repeat(false, bits);
        if wants_output {
            cable
                .driver
                .transfer(&input, Some(output.as_mut_bitslice()))?;
        } else {
            cable.driver.transfer(&input, None)?;
        }

        let mut position = 0;
        for _ in 0..items {
            match cable.todo.pop()? {
                QueueItem::Clock { count, .. } => position += count,
                QueueItem::Transfer { input, capture } => {
                    let end = position + input.len();
                    if capture {
                        cable
                            .done
                            .push(QueueResult::Transfer(output[position..end].to_bitvec()))?;
                    }
                    position = end;
                }
                QueueItem::GetTdo => {
                    // TDO as it is before the next clock, which is the next sampled bit.
                    let value = if position < bits {
                        output[position]
                    } else {
                        cable.driver.get_tdo()?
                    };
                    cable.done.push(QueueResult::Tdo(value))?;
                }
                other => {
                    tracing::error!("Internal error: {:?} ended up in a combined transfer", other);
                    return Err(CableError::QueueOutOfSync);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::RecordingDriver;
    use super::*;
    use crate::cable::FlushStrategy;
    use crate::config::QueueConfig;

    fn combining_cable(threshold: Option<usize>) -> (Cable, RecordingDriverHandles) {
        let driver = RecordingDriver::new(FlushStrategy::CombineTransfers);
        let handles = RecordingDriverHandles {
            calls: driver.calls.clone(),
            tdo: driver.tdo.clone(),
        };
        let config = QueueConfig {
            initial_capacity: 2,
            growth: 2,
            optional_flush_threshold: threshold,
        };
        (Cable::new(Box::new(driver), &config), handles)
    }

    struct RecordingDriverHandles {
        calls: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
        tdo: std::rc::Rc<std::cell::RefCell<Vec<bool>>>,
    }

    #[test]
    fn clocks_transfers_and_samples_are_combined() {
        let (mut cable, handles) = combining_cable(None);
        *handles.tdo.borrow_mut() = vec![false, false, true, true, false, true];

        cable.defer_clock(false, true, 2).unwrap();
        cable.defer_transfer(bits![u8, Lsb0; 1, 0, 1], true).unwrap();
        cable.defer_get_tdo().unwrap();
        cable.defer_clock(true, false, 1).unwrap();
        assert!(handles.calls.borrow().is_empty());

        let mut out = bitvec![u8, Lsb0; 0; 3];
        cable.transfer_late(&mut out).unwrap();
        assert_eq!(out.as_bitslice(), bits![u8, Lsb0; 1, 1, 0]);
        assert!(cable.get_tdo_late().unwrap());

        assert_eq!(
            *handles.calls.borrow(),
            vec!["transfer(11101, true)", "get_tdo", "clock(1, 0, 1)"]
        );
    }

    #[test]
    fn sample_inside_a_combined_transfer_uses_the_next_bit() {
        let (mut cable, handles) = combining_cable(None);
        *handles.tdo.borrow_mut() = vec![false, false, true];

        cable.defer_transfer(bits![u8, Lsb0; 0, 0], false).unwrap();
        cable.defer_get_tdo().unwrap();
        cable.defer_clock(false, false, 1).unwrap();

        assert!(cable.get_tdo_late().unwrap());
        assert_eq!(*handles.calls.borrow(), vec!["transfer(000, true)"]);
    }

    #[test]
    fn output_only_transfers_skip_sampling() {
        let (mut cable, handles) = combining_cable(None);

        cable.defer_transfer(bits![u8, Lsb0; 1, 1], false).unwrap();
        cable.defer_clock(false, false, 2).unwrap();
        cable.flush(FlushAmount::ToOutput).unwrap();

        assert_eq!(*handles.calls.borrow(), vec!["transfer(1100, false)"]);
        assert_eq!(cable.results(), 0);
    }

    #[test]
    fn optional_flush_honours_threshold() {
        let (mut cable, handles) = combining_cable(Some(3));

        cable.defer_clock(true, false, 1).unwrap();
        cable.defer_clock(true, false, 1).unwrap();
        assert_eq!(cable.pending(), 2);

        cable.defer_clock(true, false, 1).unwrap();
        assert_eq!(cable.pending(), 0);
        assert_eq!(handles.calls.borrow().len(), 3);
    }

    #[test]
    fn lone_sample_goes_to_the_driver() {
        let (mut cable, handles) = combining_cable(None);
        *handles.tdo.borrow_mut() = vec![true];

        cable.defer_get_tdo().unwrap();
        assert!(cable.get_tdo_late().unwrap());
        assert_eq!(*handles.calls.borrow(), vec!["get_tdo"]);
    }
}
