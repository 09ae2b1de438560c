use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ActionError;

pub const INTENT: &str = "intent";
pub const ORDER_NUMBER: &str = "orderNumber";
pub const EMAIL: &str = "email";
pub const YES_NO: &str = "yes_no";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl EntityCandidate {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into(), confidence: None }
    }
}

/// Entity extractions for one engine step, candidates in the engine's own
/// ranking order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entities(pub BTreeMap<String, Vec<EntityCandidate>>);

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.entry(name.into()).or_default().push(EntityCandidate::new(value));
        self
    }

    pub fn candidates(&self, name: &str) -> &[EntityCandidate] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// First-value policy shared by every transition: only the top-ranked
/// candidate counts, and an absent entity, an empty candidate list, `null` or
/// an empty string all mean "missing".
pub fn first_value(entities: &Entities, name: &str) -> Result<Option<String>, ActionError> {
    let Some(candidate) = entities.candidates(name).first() else {
        return Ok(None);
    };

    match &candidate.value {
        Value::Object(fields) => match fields.get("value") {
            Some(inner) => scalar(name, inner),
            None => Err(malformed(name, "object without a `value` field")),
        },
        other => scalar(name, other),
    }
}

fn scalar(name: &str, value: &Value) -> Result<Option<String>, ActionError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.is_empty() => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        Value::Array(_) => Err(malformed(name, "array value")),
        Value::Object(_) => Err(malformed(name, "nested object value")),
    }
}

fn malformed(name: &str, detail: &str) -> ActionError {
    ActionError::MalformedEntity { entity: name.to_owned(), detail: detail.to_owned() }
}
