use core::time::Duration;

use crate::error::{Error, Result};

/// Total number of payload bits in an ID. The 64th bit is always zero, so
/// every ID is positive when stored as an `i64`.
pub const ID_BITS: u32 = 63;

/// Custom epoch: Wednesday, January 1, 2025 00:00:00 UTC
pub const CUSTOM_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// Discord epoch: Thursday, January 1, 2015 00:00:00 UTC
pub const DISCORD_EPOCH: Duration = Duration::from_millis(1_420_070_400_000);

/// Standard UNIX epoch: Thursday, January 1, 1970 00:00:00 UTC
pub const UNIX_EPOCH: Duration = Duration::from_millis(0);

/// The bit layout of an ID, fixed per coordination key once bootstrapped.
///
/// Fields are packed from the most significant payload bit down:
///
/// ```text
///  Bit Index:  63           62                  seq+machine    seq          0
///              +------------+-------------------+--------------+------------+
///  Field:      | zero (1)   | timestamp         | machine ID   | sequence   |
///              +------------+-------------------+--------------+------------+
///              |<----------- MSB ---------- 64 bits ---------- LSB -------->|
/// ```
///
/// `timestamp_bits + machine_id_bits + seq_bits` must equal [`ID_BITS`].
/// The timestamp is a logical clock relative to `start_timestamp`
/// (milliseconds since the UNIX epoch).
///
/// # Example
///
/// ```
/// use hashflake::BitLayout;
///
/// let layout = BitLayout::new(41, 10, 12);
/// assert!(layout.validate().is_ok());
/// assert_eq!(layout.seq_max(), 4095);
/// assert_eq!(layout.machine_id_offset(), 12);
/// assert_eq!(layout.timestamp_offset(), 22);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitLayout {
    pub timestamp_bits: u8,
    pub machine_id_bits: u8,
    pub seq_bits: u8,
    /// Epoch offset in milliseconds since 1970-01-01 UTC.
    pub start_timestamp: i64,
}

/// The three components of a decoded ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdParts {
    pub timestamp: i64,
    pub machine_id: i64,
    pub seq: i64,
}

const fn max_for(bits: u32) -> i64 {
    if bits >= ID_BITS {
        i64::MAX
    } else {
        (1_i64 << bits) - 1
    }
}

const fn millis(epoch: Duration) -> i64 {
    let ms = epoch.as_millis();
    if ms > i64::MAX as u128 {
        i64::MAX
    } else {
        ms as i64
    }
}

impl BitLayout {
    /// Creates a layout anchored at [`CUSTOM_EPOCH`].
    ///
    /// The widths are not checked here; see [`Self::validate`].
    pub const fn new(timestamp_bits: u8, machine_id_bits: u8, seq_bits: u8) -> Self {
        Self {
            timestamp_bits,
            machine_id_bits,
            seq_bits,
            start_timestamp: millis(CUSTOM_EPOCH),
        }
    }

    /// The classic 41/10/12 layout anchored at [`TWITTER_EPOCH`].
    pub const fn twitter() -> Self {
        Self::new(41, 10, 12).with_start_timestamp(TWITTER_EPOCH)
    }

    /// Returns a copy of this layout anchored at `epoch`.
    pub const fn with_start_timestamp(mut self, epoch: Duration) -> Self {
        self.start_timestamp = millis(epoch);
        self
    }

    /// Returns a copy of this layout anchored at `start_millis` milliseconds
    /// since the UNIX epoch.
    pub const fn with_start_millis(mut self, start_millis: i64) -> Self {
        self.start_timestamp = start_millis;
        self
    }

    /// Checks that the widths add up to [`ID_BITS`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBitLayout`] otherwise.
    pub const fn validate(&self) -> Result<()> {
        let sum = self.timestamp_bits as u32 + self.machine_id_bits as u32 + self.seq_bits as u32;
        if sum == ID_BITS {
            Ok(())
        } else {
            Err(Error::InvalidBitLayout {
                timestamp_bits: self.timestamp_bits,
                machine_id_bits: self.machine_id_bits,
                seq_bits: self.seq_bits,
                sum,
            })
        }
    }

    /// Checks that `machine_id` fits in `[0, machine_id_max]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMachineId`] otherwise.
    pub const fn validate_machine_id(&self, machine_id: i64) -> Result<()> {
        let max = self.machine_id_max();
        if machine_id < 0 || machine_id > max {
            Err(Error::InvalidMachineId { machine_id, max })
        } else {
            Ok(())
        }
    }

    pub const fn timestamp_max(&self) -> i64 {
        max_for(self.timestamp_bits as u32)
    }

    pub const fn machine_id_max(&self) -> i64 {
        max_for(self.machine_id_bits as u32)
    }

    pub const fn seq_max(&self) -> i64 {
        max_for(self.seq_bits as u32)
    }

    pub const fn seq_offset(&self) -> u32 {
        0
    }

    pub const fn machine_id_offset(&self) -> u32 {
        self.seq_bits as u32
    }

    pub const fn timestamp_offset(&self) -> u32 {
        self.seq_bits as u32 + self.machine_id_bits as u32
    }

    /// Extracts the machine id component of `id`.
    ///
    /// A layout other than the one that produced `id` yields a meaningless
    /// value, never an error or a panic.
    ///
    /// # Example
    ///
    /// ```
    /// use hashflake::BitLayout;
    ///
    /// let layout = BitLayout::new(41, 10, 12);
    /// assert_eq!(layout.extract_machine_id(419_450_880), 5);
    /// ```
    pub const fn extract_machine_id(&self, id: i64) -> i64 {
        field(id, self.machine_id_offset(), self.machine_id_max())
    }

    /// Extracts the logical timestamp component of `id`.
    pub const fn extract_timestamp(&self, id: i64) -> i64 {
        field(id, self.timestamp_offset(), self.timestamp_max())
    }

    /// Extracts the sequence component of `id`.
    pub const fn extract_sequence(&self, id: i64) -> i64 {
        field(id, self.seq_offset(), self.seq_max())
    }

    /// Splits `id` into its three components.
    pub const fn decompose(&self, id: i64) -> IdParts {
        IdParts {
            timestamp: self.extract_timestamp(id),
            machine_id: self.extract_machine_id(id),
            seq: self.extract_sequence(id),
        }
    }

    /// Milliseconds since the UNIX epoch of the tick encoded in `id`.
    ///
    /// The timestamp only advances on sequence exhaustion, so this is the
    /// bootstrap wall-clock time plus the number of logical ticks, not the
    /// time the ID was issued.
    pub const fn unix_millis(&self, id: i64) -> i64 {
        self.start_timestamp.saturating_add(self.extract_timestamp(id))
    }
}

impl Default for BitLayout {
    /// 41/10/12 anchored at [`CUSTOM_EPOCH`].
    fn default() -> Self {
        Self::new(41, 10, 12)
    }
}

const fn field(id: i64, offset: u32, max: i64) -> i64 {
    match id.checked_shr(offset) {
        Some(shifted) => shifted & max,
        None => 0,
    }
}

/// Extracts the machine id of `id` under `layout`.
///
/// Free-function form of [`BitLayout::extract_machine_id`].
pub const fn extract_machine_id(layout: &BitLayout, id: i64) -> i64 {
    layout.extract_machine_id(id)
}
