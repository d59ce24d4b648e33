//! Primitive entities shared by every block and record type: [`Value`],
//! [`Identifier`], [`Text`], [`Position`], [`Action`], [`Composite`] and the
//! [`Operator`] set consumed by `IndexRecord::explore`.
//!
//! All wire-visible types implement [`crate::encoding::Encode`] /
//! [`crate::encoding::Decode`] directly rather than going through an
//! external serialization crate, matching the rest of the on-disk formats
//! in this crate.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};

/// Errors raised while constructing or comparing [`Value`]s.
#[derive(Debug, Error)]
pub enum ValueError {
    /// The byte-level encoding was malformed.
    #[error("value encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A regular expression supplied to `REGEX`/`NOT_REGEX` failed to compile.
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),
}

// ------------------------------------------------------------------------------------------------
// Identifier
// ------------------------------------------------------------------------------------------------

/// A record id: a fixed-width 8-byte unsigned integer (spec.md §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub u64);

impl Identifier {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Encode for Identifier {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Identifier {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (v, n) = u64::decode_from(buf)?;
        Ok((Identifier(v), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Text — interned UTF-8 key
// ------------------------------------------------------------------------------------------------

/// Process-wide intern table for commonly used keys (field names), per
/// spec.md §3.1: "a process-wide intern table may dedup commonly used
/// keys." Backed by a plain `Mutex<HashSet<...>>`, matching the density of
/// synchronization primitives used elsewhere in this crate (no lock-free
/// interner is warranted at this scale).
fn intern_table() -> &'static Mutex<HashSet<&'static str>> {
    static TABLE: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A UTF-8 key, interned against a process-wide table to deduplicate
/// repeatedly used field names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Text(std::sync::Arc<str>);

impl Text {
    /// Intern `s`, returning a `Text` that shares storage with any prior
    /// `Text` built from an equal string.
    pub fn new(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        let mut table = intern_table().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = table.get(s) {
            return Text(std::sync::Arc::from(*existing));
        }
        let arc: std::sync::Arc<str> = std::sync::Arc::from(s);
        // Leak a `&'static str` view into the table so future lookups can
        // match by content without re-allocating; the Arc itself is what
        // actually owns and eventually frees the bytes.
        let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
        table.insert(leaked);
        Text(arc)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Text::new(s)
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Text::new(s)
    }
}

impl Encode for Text {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.as_ref().encode_to(buf)
    }
}

impl Decode for Text {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (s, n) = String::decode_from(buf)?;
        Ok((Text::new(s), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Position
// ------------------------------------------------------------------------------------------------

/// An `Identifier` plus a token index within a tokenized string value
/// (spec.md §3.1). Used as the value type of Corpus revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub record: Identifier,
    pub index: u32,
}

impl Position {
    pub fn new(record: Identifier, index: u32) -> Self {
        Self { record, index }
    }
}

impl Encode for Position {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.record.encode_to(buf)?;
        self.index.encode_to(buf)
    }
}

impl Decode for Position {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (record, n1) = Identifier::decode_from(buf)?;
        let (index, n2) = u32::decode_from(&buf[n1..])?;
        Ok((Position { record, index }, n1 + n2))
    }
}

// ------------------------------------------------------------------------------------------------
// Action
// ------------------------------------------------------------------------------------------------

/// `{ADD, REMOVE, COMPARE}` (spec.md §3.1). `Compare` is a non-storable
/// sentinel used only for equality probes and never encoded to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Add,
    Remove,
    Compare,
}

impl Action {
    const TAG_ADD: u8 = 0;
    const TAG_REMOVE: u8 = 1;
    const TAG_COMPARE: u8 = 2;
}

impl Encode for Action {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag = match self {
            Action::Add => Self::TAG_ADD,
            Action::Remove => Self::TAG_REMOVE,
            Action::Compare => Self::TAG_COMPARE,
        };
        tag.encode_to(buf)
    }
}

impl Decode for Action {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let action = match tag {
            Self::TAG_ADD => Action::Add,
            Self::TAG_REMOVE => Action::Remove,
            Self::TAG_COMPARE => Action::Compare,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Action",
                });
            }
        };
        Ok((action, n))
    }
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A tagged union over the primitive value types (spec.md §3.1).
///
/// Totally ordered by type rank first, then by natural order within a
/// type. Encodes as `[type:u8][payload]`.
#[derive(Debug, Clone)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Tag(String),
    Link(Identifier),
    Timestamp(i64),
    Null,
}

impl Value {
    const TAG_BOOLEAN: u8 = 0;
    const TAG_INT32: u8 = 1;
    const TAG_INT64: u8 = 2;
    const TAG_FLOAT: u8 = 3;
    const TAG_DOUBLE: u8 = 4;
    const TAG_STRING: u8 = 5;
    const TAG_TAG: u8 = 6;
    const TAG_LINK: u8 = 7;
    const TAG_TIMESTAMP: u8 = 8;
    const TAG_NULL: u8 = 9;

    fn type_rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => Self::TAG_BOOLEAN,
            Value::Int32(_) => Self::TAG_INT32,
            Value::Int64(_) => Self::TAG_INT64,
            Value::Float(_) => Self::TAG_FLOAT,
            Value::Double(_) => Self::TAG_DOUBLE,
            Value::String(_) => Self::TAG_STRING,
            Value::Tag(_) => Self::TAG_TAG,
            Value::Link(_) => Self::TAG_LINK,
            Value::Timestamp(_) => Self::TAG_TIMESTAMP,
            Value::Null => Self::TAG_NULL,
        }
    }

    /// `true` if `self` is a string-like value (`String` or `Tag`) that can
    /// participate in the corpus pipeline and `CONTAINS`/`NOT_CONTAINS`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Tag(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Case-insensitive substring test, used by `CONTAINS`/`NOT_CONTAINS`
    /// and mirrored by the corpus pipeline's substring rule (spec.md §6.3).
    pub fn contains_ci(&self, needle: &str) -> bool {
        match self.as_text() {
            Some(s) => s.to_lowercase().contains(&needle.to_lowercase()),
            None => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_rank().cmp(&other.type_rank()).then_with(|| match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Tag(a), Value::Tag(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            _ => Ordering::Equal,
        })
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_rank().hash(state);
        match self {
            Value::Boolean(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::String(v) | Value::Tag(v) => v.hash(state),
            Value::Link(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Null => {}
        }
    }
}

impl Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.type_rank().encode_to(buf)?;
        match self {
            Value::Boolean(v) => v.encode_to(buf),
            Value::Int32(v) => v.encode_to(buf),
            Value::Int64(v) => v.encode_to(buf),
            Value::Float(v) => v.to_bits().encode_to(buf),
            Value::Double(v) => v.to_bits().encode_to(buf),
            Value::String(v) => v.encode_to(buf),
            Value::Tag(v) => v.encode_to(buf),
            Value::Link(v) => v.encode_to(buf),
            Value::Timestamp(v) => v.encode_to(buf),
            Value::Null => Ok(()),
        }
    }
}

impl Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut n) = u8::decode_from(buf)?;
        let value = match tag {
            Self::TAG_BOOLEAN => {
                let (v, c) = bool::decode_from(&buf[n..])?;
                n += c;
                Value::Boolean(v)
            }
            Self::TAG_INT32 => {
                let (v, c) = i32::decode_from(&buf[n..])?;
                n += c;
                Value::Int32(v)
            }
            Self::TAG_INT64 => {
                let (v, c) = i64::decode_from(&buf[n..])?;
                n += c;
                Value::Int64(v)
            }
            Self::TAG_FLOAT => {
                let (bits, c) = u32::decode_from(&buf[n..])?;
                n += c;
                Value::Float(f32::from_bits(bits))
            }
            Self::TAG_DOUBLE => {
                let (bits, c) = u64::decode_from(&buf[n..])?;
                n += c;
                Value::Double(f64::from_bits(bits))
            }
            Self::TAG_STRING => {
                let (v, c) = String::decode_from(&buf[n..])?;
                n += c;
                Value::String(v)
            }
            Self::TAG_TAG => {
                let (v, c) = String::decode_from(&buf[n..])?;
                n += c;
                Value::Tag(v)
            }
            Self::TAG_LINK => {
                let (v, c) = Identifier::decode_from(&buf[n..])?;
                n += c;
                Value::Link(v)
            }
            Self::TAG_TIMESTAMP => {
                let (v, c) = i64::decode_from(&buf[n..])?;
                n += c;
                Value::Timestamp(v)
            }
            Self::TAG_NULL => Value::Null,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "Value",
                });
            }
        };
        Ok((value, n))
    }
}

// ------------------------------------------------------------------------------------------------
// Composite
// ------------------------------------------------------------------------------------------------

/// A canonical byte-key formed from an ordered list of byteable entities;
/// used as the lookup key into per-block indices (spec.md §3.1).
///
/// Built by concatenating the already-length-prefixed `Encode` output of
/// each part, which keeps the composite unambiguous without an extra
/// framing layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Composite(Vec<u8>);

impl Composite {
    pub fn builder() -> CompositeBuilder {
        CompositeBuilder(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Incrementally builds a [`Composite`] from a sequence of encodable parts.
pub struct CompositeBuilder(Vec<u8>);

impl CompositeBuilder {
    pub fn add<T: Encode>(mut self, part: &T) -> Result<Self, EncodingError> {
        part.encode_to(&mut self.0)?;
        Ok(self)
    }

    pub fn build(self) -> Composite {
        Composite(self.0)
    }
}

impl Encode for Composite {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Composite {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bytes, n) = Vec::<u8>::decode_from(buf)?;
        Ok((Composite(bytes), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Operator
// ------------------------------------------------------------------------------------------------

/// The query operator surface consumed by the core (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEquals,
    LessThan,
    LessThanOrEquals,
    /// Half-open `[lo, hi)`.
    Between,
    Regex,
    NotRegex,
    LinksTo,
    Contains,
    NotContains,
}
