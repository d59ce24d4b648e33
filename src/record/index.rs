//! `IndexRecord` — the Secondary view: `field -> value -> records`
//! (spec.md §4.5). Keyed on an ordered map over [`Value`] so the range
//! operators can use head/tail/subset views directly.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use regex::Regex;
use thiserror::Error;

use crate::value::{Identifier, Operator, Text, Value};

use super::{Record, RecordError, Secondary};

#[derive(Debug, Error)]
pub enum ExploreError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("operator {0:?} is not supported by IndexRecord::explore")]
    UnsupportedOperator(Operator),

    #[error("operator {0:?} requires {1} value argument(s)")]
    WrongArity(Operator, usize),

    #[error("invalid regex pattern: {0}")]
    InvalidPattern(String),
}

/// `field -> value -> records` (Secondary view).
#[derive(Debug, Clone)]
pub struct IndexRecord(Record<Secondary>);

impl IndexRecord {
    pub fn new(field: Text) -> Self {
        Self(Record::new(field, true, false))
    }

    pub fn field(&self) -> &Text {
        &self.0.locator
    }

    pub fn append(&mut self, value: Value, record: Identifier, version: i64, action: crate::value::Action) -> Result<(), RecordError> {
        self.0.append(value, record, version, action)
    }

    pub fn inner_mut(&mut self) -> &mut Record<Secondary> {
        &mut self.0
    }

    /// The current `value -> records` map.
    pub fn browse(&self) -> &BTreeMap<Value, BTreeSet<Identifier>> {
        self.0.present()
    }

    /// The `value -> records` map as of `timestamp` (spec.md §4.5:
    /// "historical queries replay `history` to that timestamp").
    pub fn browse_at(&self, timestamp: i64) -> BTreeMap<Value, BTreeSet<Identifier>> {
        let mut out = BTreeMap::new();
        for value in self.known_values() {
            let records = self.0.replay_at(&value, timestamp);
            if !records.is_empty() {
                out.insert(value, records);
            }
        }
        out
    }

    fn known_values(&self) -> Vec<Value> {
        self.0.present().keys().cloned().collect()
    }

    /// Apply `operator` over `values` against the current (`timestamp =
    /// None`) or historical (`timestamp = Some(ts)`) state (spec.md §4.5).
    pub fn explore(&self, operator: Operator, values: &[Value], timestamp: Option<i64>) -> Result<BTreeMap<Value, BTreeSet<Identifier>>, ExploreError> {
        let source = match timestamp {
            Some(ts) => self.browse_at(ts),
            None => self.browse().clone(),
        };
        explore_over(&source, operator, values)
    }
}

fn explore_over(source: &BTreeMap<Value, BTreeSet<Identifier>>, operator: Operator, values: &[Value]) -> Result<BTreeMap<Value, BTreeSet<Identifier>>, ExploreError> {
    let need = |n: usize| -> Result<(), ExploreError> {
        if values.len() < n {
            Err(ExploreError::WrongArity(operator, n))
        } else {
            Ok(())
        }
    };

    match operator {
        Operator::Equals => {
            need(1)?;
            Ok(source
                .get(&values[0])
                .map(|records| BTreeMap::from([(values[0].clone(), records.clone())]))
                .unwrap_or_default())
        }
        Operator::NotEquals => {
            need(1)?;
            Ok(source.iter().filter(|(k, _)| **k != values[0]).map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        Operator::GreaterThan => {
            need(1)?;
            Ok(range_collect(source, Bound::Excluded(&values[0]), Bound::Unbounded))
        }
        Operator::GreaterThanOrEquals => {
            need(1)?;
            Ok(range_collect(source, Bound::Included(&values[0]), Bound::Unbounded))
        }
        Operator::LessThan => {
            need(1)?;
            Ok(range_collect(source, Bound::Unbounded, Bound::Excluded(&values[0])))
        }
        Operator::LessThanOrEquals => {
            need(1)?;
            Ok(range_collect(source, Bound::Unbounded, Bound::Included(&values[0])))
        }
        Operator::Between => {
            need(2)?;
            // Half-open [lo, hi): spec.md §6 "BETWEEN is half-open [lo, hi)".
            Ok(range_collect(source, Bound::Included(&values[0]), Bound::Excluded(&values[1])))
        }
        Operator::Regex | Operator::NotRegex => {
            need(1)?;
            let pattern = values[0].as_text().ok_or_else(|| ExploreError::InvalidPattern("non-string pattern".to_string()))?;
            let regex = Regex::new(pattern).map_err(|e| ExploreError::InvalidPattern(e.to_string()))?;
            let matches = operator == Operator::Regex;
            Ok(source
                .iter()
                .filter(|(k, _)| k.as_text().is_some_and(|s| regex.is_match(s)) == matches)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
        Operator::Contains | Operator::NotContains => {
            need(1)?;
            let needle = values[0].as_text().ok_or_else(|| ExploreError::InvalidPattern("non-string needle".to_string()))?;
            let matches = operator == Operator::Contains;
            Ok(source
                .iter()
                .filter(|(k, _)| k.contains_ci(needle) == matches)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
        Operator::LinksTo => Err(ExploreError::UnsupportedOperator(operator)),
    }
}

fn range_collect(source: &BTreeMap<Value, BTreeSet<Identifier>>, lo: Bound<&Value>, hi: Bound<&Value>) -> BTreeMap<Value, BTreeSet<Identifier>> {
    source.range((lo.cloned(), hi.cloned())).map(|(k, v)| (k.clone(), v.clone())).collect()
}

trait ClonedBound {
    fn cloned(self) -> Bound<Value>;
}

impl ClonedBound for Bound<&Value> {
    fn cloned(self) -> Bound<Value> {
        match self {
            Bound::Included(v) => Bound::Included(v.clone()),
            Bound::Excluded(v) => Bound::Excluded(v.clone()),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}
