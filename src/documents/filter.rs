// Metadata predicates for index queries

use serde_json::{Map, Value};

/// How a single metadata field must match
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    Eq(Value),
    In(Vec<Value>),
}

impl FieldMatch {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldMatch::Eq(expected) => value == expected,
            FieldMatch::In(allowed) => allowed.contains(value),
        }
    }
}

/// Conjunction of per-field conditions. A chunk without the field fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, FieldMatch)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), FieldMatch::Eq(value.into())));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push((field.into(), FieldMatch::In(values)));
        self
    }

    /// Restrict to chunks whose `type` is one of `types`
    pub fn types<S: AsRef<str>>(types: &[S]) -> Self {
        Self::new().is_in("type", types.iter().map(|t| t.as_ref().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| metadata.get(field).is_some_and(|v| cond.matches(v)))
    }
}
