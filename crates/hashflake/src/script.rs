//! Server-side routines used by the lock-free coordinator.
//!
//! A [`Scripts`] value is built once by the host and handed to every
//! [`LockFreeCoordinator`]. Backends that evaluate source text (Redis) run
//! [`AtomicScript::source`]; [`MemoryStore`] runs the same routine natively,
//! selected by [`AtomicScript::kind`].
//!
//! Validation failures inside a routine abort it with a reply of the form
//! `<TAG> <detail>`, which [`decode_error`] turns back into a typed [`Error`].
//!
//! [`LockFreeCoordinator`]: crate::LockFreeCoordinator
//! [`MemoryStore`]: crate::MemoryStore

use std::sync::Arc;

use crate::{error::Error, store::StoreError};

const BOOTSTRAP_LUA: &str = include_str!("../lua/bootstrap.lua");
const GENERATE_LUA: &str = include_str!("../lua/generate_id.lua");

pub(crate) const TIMESTAMP_TAG: &str = "TIMESTAMP_OUT_OF_RANGE";
pub(crate) const SEQUENCE_TAG: &str = "SEQUENCE_OUT_OF_RANGE";
pub(crate) const CORRUPT_TAG: &str = "CORRUPT_RECORD";
pub(crate) const WRONG_TYPE_TAG: &str = "WRONG_TYPE";

/// First item of a bootstrap reply when the record was written.
pub(crate) const CREATED: &str = "created";
/// First item of a bootstrap reply when an existing record was kept.
pub(crate) const ATTACHED: &str = "attached";

/// Which routine a script implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    /// Check-and-initialize a record.
    ///
    /// Args: the initial record as flat field/value pairs. Reply: `created`
    /// or `attached`, followed by the stored record's field/value pairs.
    Bootstrap,
    /// Read, validate, advance a record.
    ///
    /// Args: none. Reply: the pre-advance record's field/value pairs.
    Generate,
}

/// One server-side routine and its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicScript {
    kind: ScriptKind,
    source: Arc<str>,
}

impl AtomicScript {
    pub fn new(kind: ScriptKind, source: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    #[cfg(feature = "redis")]
    pub(crate) fn shared_source(&self) -> &Arc<str> {
        &self.source
    }
}

/// The pair of routines a lock-free coordinator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scripts {
    bootstrap: AtomicScript,
    generate: AtomicScript,
}

impl Scripts {
    /// The Lua routines shipped with this crate.
    pub fn bundled() -> Self {
        Self::new(BOOTSTRAP_LUA, GENERATE_LUA)
    }

    /// Custom routines. They must honour the argument and reply contracts
    /// documented on [`ScriptKind`].
    pub fn new(bootstrap: impl Into<Arc<str>>, generate: impl Into<Arc<str>>) -> Self {
        Self {
            bootstrap: AtomicScript::new(ScriptKind::Bootstrap, bootstrap),
            generate: AtomicScript::new(ScriptKind::Generate, generate),
        }
    }

    pub fn bootstrap(&self) -> &AtomicScript {
        &self.bootstrap
    }

    pub fn generate(&self) -> &AtomicScript {
        &self.generate
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::bundled()
    }
}

/// Renders a validation failure as a tagged script abort message.
pub(crate) fn encode_error(err: &Error) -> String {
    match err {
        Error::TimestampOutOfRange { timestamp, max } => format!("{TIMESTAMP_TAG} {timestamp} {max}"),
        Error::SequenceOutOfRange { seq, max } => format!("{SEQUENCE_TAG} {seq} {max}"),
        Error::CorruptRecord { reason, .. } => format!("{CORRUPT_TAG} {reason}"),
        other => other.to_string(),
    }
}

/// Maps a store failure from a routine on `key` back to a typed error.
///
/// Untagged or malformed script failures stay [`Error::StoreUnavailable`].
pub(crate) fn decode_error(key: &str, err: StoreError) -> Error {
    let StoreError::Script(message) = &err else {
        return Error::StoreUnavailable(err);
    };
    let (tag, detail) = message.split_once(' ').unwrap_or((message.as_str(), ""));

    let bounds = || -> Option<(i64, i64)> {
        let mut values = detail.split_whitespace().map(str::parse::<i64>);
        match (values.next(), values.next()) {
            (Some(Ok(value)), Some(Ok(max))) => Some((value, max)),
            _ => None,
        }
    };

    let typed = match tag {
        TIMESTAMP_TAG => bounds().map(|(timestamp, max)| Error::TimestampOutOfRange { timestamp, max }),
        SEQUENCE_TAG => bounds().map(|(seq, max)| Error::SequenceOutOfRange { seq, max }),
        CORRUPT_TAG => Some(Error::CorruptRecord {
            key: key.to_owned(),
            reason: detail.to_owned(),
        }),
        WRONG_TYPE_TAG if !detail.is_empty() => Some(Error::StoreUnavailable(StoreError::WrongType {
            key: key.to_owned(),
            found: detail.to_owned(),
        })),
        _ => None,
    };
    typed.unwrap_or(Error::StoreUnavailable(err))
}
