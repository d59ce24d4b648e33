//! `Write` — the immutable unit ingested by the Buffer (spec.md §3.2, C1).
//!
//! A `Write` pairs an [`Action`] with a `(key, value, record)` triple and a
//! strictly monotonic `version`. Two writes are equal iff `(key, value,
//! record)` match — the action does not participate in equality or
//! hashing; [`Write::matches`] additionally requires action equality.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::encoding::{Decode, Encode, EncodingError};
use crate::value::{Action, Identifier, Text, Value};

/// A single modification to a record: `(action, key, value, record,
/// version)` (spec.md §3.2).
#[derive(Debug, Clone)]
pub struct Write {
    pub action: Action,
    pub key: Text,
    pub value: Value,
    pub record: Identifier,
    pub version: i64,
}

impl Write {
    pub fn new(action: Action, key: Text, value: Value, record: Identifier, version: i64) -> Self {
        Self {
            action,
            key,
            value,
            record,
            version,
        }
    }

    /// `true` iff `(key, value, record)` match **and** the action matches.
    pub fn matches(&self, other: &Write) -> bool {
        self == other && self.action == other.action
    }

    /// Pre-computed size bound used by the buffer admission check
    /// (spec.md §4.1's `insert(write, sync)` step 2): the exact number of
    /// bytes `encode_to` will append.
    pub fn size(&self) -> usize {
        encode_to_vec(self).map(|b| b.len()).unwrap_or(usize::MAX)
    }
}

impl PartialEq for Write {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value && self.record == other.record
    }
}
impl Eq for Write {}

impl std::hash::Hash for Write {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
        self.record.hash(state);
    }
}

/// Encoding layout (spec.md §6.2, bit-exact):
/// `[keySize:i32][action:u8][version:i64][record:u64][key:bytes
/// keySize][value:(type:u8, payload:...)]`.
///
/// Note the key is *not* independently length-prefixed by `Text`'s own
/// `Encode` impl — its length is the `keySize` field, written once, ahead
/// of the action/version/record fields per the spec's exact field order.
impl Encode for Write {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let key_bytes = self.key.as_str().as_bytes();
        let key_size = i32::try_from(key_bytes.len())
            .map_err(|_| EncodingError::LengthOverflow(format!("key length {}", key_bytes.len())))?;

        key_size.encode_to(buf)?;
        self.action.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.record.encode_to(buf)?;
        buf.extend_from_slice(key_bytes);
        self.value.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Write {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key_size, mut off) = i32::decode_from(buf)?;
        let key_size = usize::try_from(key_size).map_err(|_| {
            EncodingError::LengthOverflow(format!("negative key size {key_size}"))
        })?;

        let (action, n) = Action::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (record, n) = Identifier::decode_from(&buf[off..])?;
        off += n;

        if buf.len() < off + key_size {
            return Err(EncodingError::UnexpectedEof {
                needed: off + key_size,
                available: buf.len(),
            });
        }
        let key = Text::new(String::from_utf8(buf[off..off + key_size].to_vec())?);
        off += key_size;

        let (value, n) = Value::decode_from(&buf[off..])?;
        off += n;

        Ok((Write::new(action, key, value, record, version), off))
    }
}

fn encode_to_vec(w: &Write) -> Result<Vec<u8>, EncodingError> {
    crate::encoding::encode_to_vec(w)
}

// ------------------------------------------------------------------------------------------------
// VersionClock — nanosecond clock fused with a per-process sequence
// ------------------------------------------------------------------------------------------------

/// Generates strictly monotonic, globally unique commit versions by fusing
/// a nanosecond wall-clock reading with a per-process sequence counter
/// (spec.md §3.2). Guarantees monotonicity even when the wall clock does
/// not advance between two calls, or goes backwards.
#[derive(Debug)]
pub struct VersionClock {
    last: AtomicI64,
    seq: AtomicU32,
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
            seq: AtomicU32::new(0),
        }
    }

    /// Produce the next strictly increasing version.
    pub fn next(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        loop {
            let last = self.last.load(AtomicOrdering::Acquire);
            let candidate = now.max(last + 1);
            if self
                .last
                .compare_exchange(last, candidate, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_ok()
            {
                self.seq.fetch_add(1, AtomicOrdering::Relaxed);
                return candidate;
            }
        }
    }
}
