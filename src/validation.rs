use serde::Serialize;

use crate::errors::{AppError, AppResult};

pub const EXAMPLE_INPUT: &str =
    "https://www.linkedin.com/in/example-founder\nhttps://www.linkedin.com/in/example-cto";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

impl ValidationResult {
    /// No non-empty lines at all, as opposed to lines that were all rejected.
    pub fn is_blank(&self) -> bool {
        self.valid.is_empty() && self.invalid.is_empty()
    }

    pub fn total_lines(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

/// Identifiers handed to the automation workflow, in input order, duplicates kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRequest {
    identifiers: Vec<String>,
}

impl BatchRequest {
    pub fn new<I, S>(identifiers: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut trimmed = Vec::new();
        for identifier in identifiers {
            let identifier = identifier.into();
            let identifier = identifier.trim();
            if identifier.is_empty() {
                return Err(AppError::InvalidBatch(
                    "batch identifiers must be non-empty".into(),
                ));
            }
            trimmed.push(identifier.to_string());
        }
        Ok(Self {
            identifiers: trimmed,
        })
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

pub fn validate(raw_text: &str, marker: &str) -> ValidationResult {
    let mut result = ValidationResult::default();
    for line in raw_text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains(marker) {
            result.valid.push(line.to_string());
        } else {
            result.invalid.push(line.to_string());
        }
    }
    result
}

/// Session-owned input state. The operator surface keeps one of these and
/// passes it explicitly into validation and submission.
#[derive(Debug, Clone, Default)]
pub struct BatchDraft {
    raw_text: String,
}

impl BatchDraft {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
        }
    }

    pub fn with_example() -> Self {
        Self::new(EXAMPLE_INPUT)
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn set_text(&mut self, raw_text: impl Into<String>) {
        self.raw_text = raw_text.into();
    }

    pub fn clear(&mut self) {
        self.raw_text.clear();
    }

    pub fn validate(&self, marker: &str) -> ValidationResult {
        validate(&self.raw_text, marker)
    }

    /// Validates the draft and builds the request from the valid subset.
    /// Fails with `ValidationEmpty` when nothing is left to send.
    pub fn to_request(&self, marker: &str) -> AppResult<(BatchRequest, ValidationResult)> {
        let validation = self.validate(marker);
        if validation.valid.is_empty() {
            return Err(AppError::ValidationEmpty {
                invalid: validation.invalid,
            });
        }
        let request = BatchRequest::new(validation.valid.iter().cloned())?;
        Ok((request, validation))
    }
}
