use crate::{
    error::{Error, Result},
    state::StateRecord,
};

/// Packs a state snapshot into a 63-bit ID.
///
/// ```text
/// id = (timestamp << timestamp_offset) | (machine_id << machine_id_offset) | (seq << seq_offset)
/// ```
///
/// Pure and deterministic: the same snapshot always yields the same ID.
///
/// # Errors
///
/// - [`Error::TimestampOutOfRange`] if `timestamp` is outside `[0, timestamp_max]`
/// - [`Error::SequenceOutOfRange`] if `seq` is outside `[0, seq_max]`
///
/// # Example
///
/// ```
/// use hashflake::{BitLayout, StateRecord, assemble};
///
/// let layout = BitLayout::new(41, 10, 12).with_start_millis(0);
/// let state = StateRecord::initial(&layout, 5, 100);
/// assert_eq!(assemble(&state), Ok(419_450_880));
/// ```
pub fn assemble(state: &StateRecord) -> Result<i64> {
    if state.timestamp < 0 || state.timestamp > state.timestamp_max {
        return Err(Error::TimestampOutOfRange {
            timestamp: state.timestamp,
            max: state.timestamp_max,
        });
    }
    if state.seq < 0 || state.seq > state.seq_max {
        return Err(Error::SequenceOutOfRange {
            seq: state.seq,
            max: state.seq_max,
        });
    }

    Ok((state.timestamp << state.timestamp_offset)
        | (state.machine_id << state.machine_id_offset)
        | (state.seq << state.seq_offset))
}
