//! The mutable counter record held in the store under one coordination key.
//!
//! The record is persisted as a flat hash whose field names are listed in
//! [`FIELDS`]; each value is the decimal text of an integer. Encoding and
//! decoding go through the fixed schema below so the wire layout never
//! depends on Rust field names.

use std::collections::HashMap;

use crate::{
    codec,
    error::{Error, Result},
    layout::{BitLayout, ID_BITS},
};

/// Field names of the persisted record.
pub mod field {
    pub const TIMESTAMP: &str = "Timestamp";
    pub const TIMESTAMP_MAX: &str = "TimestampMax";
    pub const TIMESTAMP_OFFSET: &str = "TimestampOffset";
    pub const MACHINE_ID: &str = "MachineId";
    pub const MACHINE_ID_OFFSET: &str = "MachineIdOffset";
    pub const SEQ: &str = "Seq";
    pub const SEQ_MAX: &str = "SeqMax";
    pub const SEQ_OFFSET: &str = "SeqOffset";
}

/// Every field a record must carry, in write order.
pub const FIELDS: [&str; 8] = [
    field::TIMESTAMP,
    field::TIMESTAMP_MAX,
    field::TIMESTAMP_OFFSET,
    field::MACHINE_ID,
    field::MACHINE_ID_OFFSET,
    field::SEQ,
    field::SEQ_MAX,
    field::SEQ_OFFSET,
];

/// Raw field map as read from a hash.
pub type FieldMap = HashMap<String, String>;

/// A snapshot of the shared counter.
///
/// The maxima and offsets are denormalized copies of the [`BitLayout`] so an
/// ID can be assembled from the snapshot alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateRecord {
    pub timestamp: i64,
    pub timestamp_max: i64,
    pub timestamp_offset: u32,
    pub machine_id: i64,
    pub machine_id_offset: u32,
    pub seq: i64,
    pub seq_max: i64,
    pub seq_offset: u32,
}

/// The write that follows a successful assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    /// Bump `Seq` in place.
    Increment { seq: i64 },
    /// `Seq` was at its maximum: reset it and advance the logical clock.
    Tick { timestamp: i64 },
}

impl StateUpdate {
    /// The fields this update writes.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match *self {
            Self::Increment { seq } => vec![(field::SEQ, seq.to_string())],
            Self::Tick { timestamp } => vec![
                (field::SEQ, "0".to_owned()),
                (field::TIMESTAMP, timestamp.to_string()),
            ],
        }
    }
}

impl StateRecord {
    /// The record bootstrap writes for a fresh key.
    ///
    /// The timestamp is `now_millis - layout.start_timestamp`; it is not
    /// range-checked here, an out-of-range value surfaces on the first
    /// generate.
    pub fn initial(layout: &BitLayout, machine_id: i64, now_millis: i64) -> Self {
        Self {
            timestamp: now_millis.saturating_sub(layout.start_timestamp),
            timestamp_max: layout.timestamp_max(),
            timestamp_offset: layout.timestamp_offset(),
            machine_id,
            machine_id_offset: layout.machine_id_offset(),
            seq: 0,
            seq_max: layout.seq_max(),
            seq_offset: layout.seq_offset(),
        }
    }

    /// Packs this snapshot into an ID. See [`codec::assemble`].
    pub fn assemble(&self) -> Result<i64> {
        codec::assemble(self)
    }

    /// Computes the write that moves this snapshot to its successor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimestampOutOfRange`] if advancing the logical clock
    /// would overflow an `i64`.
    pub fn next(&self) -> Result<StateUpdate> {
        if self.seq >= self.seq_max {
            let timestamp =
                self.timestamp
                    .checked_add(1)
                    .ok_or(Error::TimestampOutOfRange {
                        timestamp: self.timestamp,
                        max: self.timestamp_max,
                    })?;
            Ok(StateUpdate::Tick { timestamp })
        } else {
            Ok(StateUpdate::Increment { seq: self.seq + 1 })
        }
    }

    /// Returns the successor snapshot.
    pub fn advanced(&self) -> Result<Self> {
        Ok(match self.next()? {
            StateUpdate::Increment { seq } => Self { seq, ..*self },
            StateUpdate::Tick { timestamp } => Self {
                timestamp,
                seq: 0,
                ..*self
            },
        })
    }

    /// Encodes the record as `(field, decimal)` pairs in [`FIELDS`] order.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::TIMESTAMP, self.timestamp.to_string()),
            (field::TIMESTAMP_MAX, self.timestamp_max.to_string()),
            (field::TIMESTAMP_OFFSET, self.timestamp_offset.to_string()),
            (field::MACHINE_ID, self.machine_id.to_string()),
            (field::MACHINE_ID_OFFSET, self.machine_id_offset.to_string()),
            (field::SEQ, self.seq.to_string()),
            (field::SEQ_MAX, self.seq_max.to_string()),
            (field::SEQ_OFFSET, self.seq_offset.to_string()),
        ]
    }

    /// Encodes the record as a flat `[field, value, field, value, ..]` list,
    /// the argument form atomic scripts take.
    pub fn to_flat(&self) -> Vec<String> {
        self.to_fields()
            .into_iter()
            .flat_map(|(name, value)| [name.to_owned(), value])
            .collect()
    }

    /// Returns true if `fields` carries every name in [`FIELDS`].
    pub fn is_complete(fields: &FieldMap) -> bool {
        FIELDS.iter().all(|name| fields.contains_key(*name))
    }

    /// Decodes a record read from `key`. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] if a field is missing, is not a
    /// decimal integer, or an offset does not fit in 63 bits.
    pub fn from_fields(key: &str, fields: &FieldMap) -> Result<Self> {
        let int = |name: &'static str| -> Result<i64> {
            let raw = fields.get(name).ok_or_else(|| Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!("missing field {name}"),
            })?;
            raw.trim().parse::<i64>().map_err(|_| Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!("field {name}={raw:?} is not an integer"),
            })
        };
        let offset = |name: &'static str| -> Result<u32> {
            let value = int(name)?;
            u32::try_from(value)
                .ok()
                .filter(|offset| *offset < ID_BITS)
                .ok_or_else(|| Error::CorruptRecord {
                    key: key.to_owned(),
                    reason: format!("offset {name}={value} is outside [0, {})", ID_BITS),
                })
        };

        let record = Self {
            timestamp: int(field::TIMESTAMP)?,
            timestamp_max: int(field::TIMESTAMP_MAX)?,
            timestamp_offset: offset(field::TIMESTAMP_OFFSET)?,
            machine_id: int(field::MACHINE_ID)?,
            machine_id_offset: offset(field::MACHINE_ID_OFFSET)?,
            seq: int(field::SEQ)?,
            seq_max: int(field::SEQ_MAX)?,
            seq_offset: offset(field::SEQ_OFFSET)?,
        };
        record.check_machine_id(key)?;
        Ok(record)
    }

    // The machine id field spans the bits between its offset and the
    // timestamp's; a wider value would spill into the timestamp or sign bit.
    fn check_machine_id(&self, key: &str) -> Result<()> {
        let Some(bits) = self.timestamp_offset.checked_sub(self.machine_id_offset) else {
            return Err(Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!(
                    "offset {}={} is below {}={}",
                    field::TIMESTAMP_OFFSET,
                    self.timestamp_offset,
                    field::MACHINE_ID_OFFSET,
                    self.machine_id_offset
                ),
            });
        };
        let max = (1_i64 << bits) - 1;
        if self.machine_id < 0 || self.machine_id > max {
            return Err(Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!("{}={} is outside [0, {max}]", field::MACHINE_ID, self.machine_id),
            });
        }
        Ok(())
    }

    /// Decodes a flat `[field, value, ..]` list such as a script reply.
    pub fn from_flat(key: &str, flat: &[String]) -> Result<Self> {
        if flat.len() % 2 != 0 {
            return Err(Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!("odd number of field/value items ({})", flat.len()),
            });
        }
        let fields: FieldMap = flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Self::from_fields(key, &fields)
    }

    /// Compares the stored layout and machine id against a caller's request.
    ///
    /// Returns the first differing `(field, stored, requested)` triple.
    pub fn mismatch(&self, layout: &BitLayout, machine_id: i64) -> Option<(&'static str, i64, i64)> {
        let checks = [
            (field::TIMESTAMP_MAX, self.timestamp_max, layout.timestamp_max()),
            (
                field::TIMESTAMP_OFFSET,
                i64::from(self.timestamp_offset),
                i64::from(layout.timestamp_offset()),
            ),
            (
                field::MACHINE_ID_OFFSET,
                i64::from(self.machine_id_offset),
                i64::from(layout.machine_id_offset()),
            ),
            (field::SEQ_MAX, self.seq_max, layout.seq_max()),
            (
                field::SEQ_OFFSET,
                i64::from(self.seq_offset),
                i64::from(layout.seq_offset()),
            ),
            (field::MACHINE_ID, self.machine_id, machine_id),
        ];
        checks
            .into_iter()
            .find(|(_, stored, requested)| stored != requested)
    }
}
