//! Exact-match metadata filters applied before ranking.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::Meta;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, actual: &Value) -> bool {
        match self {
            Self::Eq(expected) => expected == actual,
            Self::In(allowed) => allowed.iter().any(|v| v == actual),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, Condition>,
}

impl MetadataFilter {
    pub fn new() -> Self { Self::default() }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), Condition::Eq(value.into()));
        self
    }

    pub fn any_of<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.insert(key.into(), Condition::In(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Build from a caller-supplied map: arrays become "value in set",
    /// `null` entries are ignored, everything else is an exact match.
    pub fn from_map(map: &Meta) -> Self {
        let mut filter = Self::new();
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::Array(items) => filter = filter.any_of(key.clone(), items.iter().cloned()),
                other => filter = filter.equals(key.clone(), other.clone()),
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool { self.conditions.is_empty() }

    /// A missing key never matches.
    pub fn matches(&self, metadata: &Meta) -> bool {
        self.conditions
            .iter()
            .all(|(key, cond)| metadata.get(key).is_some_and(|actual| cond.matches(actual)))
    }
}
