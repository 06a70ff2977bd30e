//! First-fit slot reservation over a vacancy field.

use log::debug;

use crate::error::{DmError, DmResult};
use crate::record::{IndexedRecord, VacancyField, ZERO_INDEX_SENTINEL};

/// Non-zero stamp derived from a slot index.
pub fn slot_sentinel(index: usize) -> i64 {
    if index == 0 {
        i64::from(ZERO_INDEX_SENTINEL)
    } else {
        index as i64
    }
}

fn check_range(table: &str, len: usize, start: usize, end: usize) -> DmResult<()> {
    if start > end || end >= len {
        return Err(DmError::invalid_parameter(format!(
            "{}: range [{}, {}] outside capacity {}",
            table, start, end, len
        )));
    }
    Ok(())
}

/// Reserves the first free slot in `start..=end`.
///
/// The slot is reset to its default and the vacancy field stamped with
/// `value` when non-zero, otherwise with [`slot_sentinel`] of the index.
pub fn reserve_in_range<T: Default>(
    table: &str,
    slots: &mut [T],
    start: usize,
    end: usize,
    vacancy: &VacancyField<T>,
    value: i64,
) -> DmResult<usize> {
    check_range(table, slots.len(), start, end)?;

    let index = (start..=end)
        .find(|&i| vacancy.is_free(&slots[i]))
        .ok_or_else(|| DmError::exhausted(table, start, end))?;

    let slot = &mut slots[index];
    *slot = T::default();
    let stamp = if value != 0 {
        value
    } else {
        slot_sentinel(index)
    };
    vacancy.stamp(slot, stamp);

    debug!(
        "{}: reserved slot {} ({}={})",
        table, index, vacancy.name, stamp
    );
    Ok(index)
}

/// Marks a slot free. Returns whether it was live.
pub fn release_slot<T: IndexedRecord>(table: &str, slots: &mut [T], index: usize) -> DmResult<bool> {
    let slot = slots.get_mut(index).ok_or_else(|| {
        DmError::invalid_parameter(format!("{}: slot {} out of range", table, index))
    })?;
    let was_live = T::VACANCY.is_live(slot);
    T::VACANCY.clear(slot);
    slot.on_release();
    if was_live {
        debug!("{}: released slot {}", table, index);
    }
    Ok(was_live)
}
