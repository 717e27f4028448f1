use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

pub const WRAPPER_KEY: &str = "data";
const RAW_PREVIEW_CHARS: usize = 512;

/// One extracted profile. Keys and values pass through exactly as the
/// workflow emitted them, in their original order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LeadRecord {
    fields: Map<String, Value>,
}

impl LeadRecord {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedLeads {
    pub records: Vec<LeadRecord>,
    /// Array elements that were not objects.
    pub dropped_elements: usize,
}

/// Top-level response shapes the workflow is known to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    Single(Map<String, Value>),
    List(Vec<Value>),
    Wrapped(Value),
}

impl ResponseShape {
    pub fn classify(raw: Value) -> AppResult<Self> {
        match raw {
            Value::Object(mut object) => match object.remove(WRAPPER_KEY) {
                Some(inner) => Ok(ResponseShape::Wrapped(inner)),
                None => Ok(ResponseShape::Single(object)),
            },
            Value::Array(items) => Ok(ResponseShape::List(items)),
            other => Err(unsupported(&other)),
        }
    }
}

pub fn normalize(raw: Value) -> AppResult<NormalizedLeads> {
    match ResponseShape::classify(raw)? {
        ResponseShape::Single(object) => Ok(single(object)),
        ResponseShape::List(items) => Ok(list(items)),
        // One envelope only: an object inside it is a record even if it
        // carries the wrapper key itself.
        ResponseShape::Wrapped(inner) => match inner {
            Value::Object(object) => Ok(single(object)),
            Value::Array(items) => Ok(list(items)),
            other => Err(unsupported(&other)),
        },
    }
}

fn single(object: Map<String, Value>) -> NormalizedLeads {
    NormalizedLeads {
        records: vec![LeadRecord::from_fields(object)],
        dropped_elements: 0,
    }
}

fn list(items: Vec<Value>) -> NormalizedLeads {
    let total = items.len();
    let records: Vec<LeadRecord> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => Some(LeadRecord::from_fields(object)),
            _ => None,
        })
        .collect();
    NormalizedLeads {
        dropped_elements: total - records.len(),
        records,
    }
}

fn unsupported(value: &Value) -> AppError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let mut raw = value.to_string();
    if raw.chars().count() > RAW_PREVIEW_CHARS {
        raw = raw.chars().take(RAW_PREVIEW_CHARS).collect::<String>() + "…";
    }
    AppError::UnsupportedShape { kind, raw }
}
