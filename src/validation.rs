//! Explicit field-builder validation.
//!
//! Each validated field is declared with a name, a value, and a list of
//! rules. The first failing rule per field is reported; a failure produces
//! a `Validation` error whose metadata carries `(field, message, value)`
//! entries for every offending field.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?|ftp)://[^\s/$.?#].[^\s]*$").expect("valid url regex"));
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid uuid regex")
});
static JOB_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid job type regex"));

/// A value under validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// JSON representation used in error metadata. Bytes are reported as
    /// their length to keep payloads out of error messages.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Str(s) => Value::from(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::from(*b),
            Self::Bytes(b) => Value::from(format!("<{} bytes>", b.len())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<uuid::Uuid> for FieldValue {
    fn from(value: uuid::Uuid) -> Self {
        Self::Str(value.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A single validation rule. Returns the failure message when the value
/// does not satisfy the rule.
pub type Rule = Box<dyn Fn(&FieldValue) -> Result<(), String> + Send + Sync>;

/// A named field with its value and rules.
pub struct Field {
    name: String,
    value: FieldValue,
    rules: Vec<Rule>,
}

impl Field {
    /// Declares a field for validation.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            rules: Vec::new(),
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// One validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub value: Value,
}

/// Validates all fields, reporting the first failing rule of each.
///
/// # Errors
///
/// Returns a `Validation` error with a `fields` metadata entry listing
/// every `(field, message, value)` failure.
pub fn validate(fields: impl IntoIterator<Item = Field>) -> crate::Result<()> {
    let mut failures = Vec::new();

    for field in fields {
        for rule in &field.rules {
            if let Err(message) = rule(&field.value) {
                failures.push(FieldError {
                    field: field.name.clone(),
                    message,
                    value: field.value.to_json(),
                });
                break;
            }
        }
    }

    if failures.is_empty() {
        return Ok(());
    }

    let summary = failures
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(
        Error::new(ErrorKind::Validation, format!("validation failed: {summary}")).with_metadata(
            "fields",
            serde_json::to_value(&failures).unwrap_or(Value::Null),
        ),
    )
}

/// The value must be present and non-empty.
#[must_use]
pub fn required() -> Rule {
    Box::new(|value| match value {
        FieldValue::Null => Err("is required".to_string()),
        FieldValue::Str(s) if s.trim().is_empty() => Err("is required".to_string()),
        FieldValue::Bytes(b) if b.is_empty() => Err("is required".to_string()),
        _ => Ok(()),
    })
}

#[allow(clippy::cast_precision_loss)]
fn numeric_size(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Int(i) => Some(*i as f64),
        FieldValue::Float(f) => Some(*f),
        FieldValue::Str(s) => Some(s.chars().count() as f64),
        FieldValue::Bytes(b) => Some(b.len() as f64),
        _ => None,
    }
}

/// Numbers must be at least `min`; strings/bytes at least `min` long.
#[must_use]
pub fn min(min: f64) -> Rule {
    Box::new(move |value| match (numeric_size(value), value) {
        (Some(size), FieldValue::Str(_)) if size < min => {
            Err(format!("must be at least {min} characters"))
        }
        (Some(size), FieldValue::Bytes(_)) if size < min => {
            Err(format!("must be at least {min} bytes"))
        }
        (Some(size), _) if size < min => Err(format!("must be at least {min}")),
        (Some(_), _) => Ok(()),
        (None, _) => Err("cannot apply min validation to this value".to_string()),
    })
}

/// Numbers must be at most `max`; strings/bytes at most `max` long.
#[must_use]
pub fn max(max: f64) -> Rule {
    Box::new(move |value| match (numeric_size(value), value) {
        (Some(size), FieldValue::Str(_)) if size > max => {
            Err(format!("must be at most {max} characters"))
        }
        (Some(size), FieldValue::Bytes(_)) if size > max => {
            Err(format!("must be at most {max} bytes"))
        }
        (Some(size), _) if size > max => Err(format!("must be at most {max}")),
        (Some(_), _) => Ok(()),
        (None, _) => Err("cannot apply max validation to this value".to_string()),
    })
}

/// The value must be within `[lo, hi]`.
#[must_use]
pub fn between(lo: f64, hi: f64) -> Rule {
    let check_min = min(lo);
    let check_max = max(hi);
    Box::new(move |value| {
        check_min(value)?;
        check_max(value)
    })
}

/// The value must equal one of the given options.
#[must_use]
pub fn one_of(options: Vec<FieldValue>) -> Rule {
    Box::new(move |value| {
        if options.contains(value) {
            Ok(())
        } else {
            let list = options
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            Err(format!("must be one of [{list}]"))
        }
    })
}

/// The string must match the given pattern.
#[must_use]
pub fn pattern(regex: Regex) -> Rule {
    Box::new(move |value| match value {
        FieldValue::Str(s) if regex.is_match(s) => Ok(()),
        FieldValue::Str(_) => Err(format!("must match pattern {regex}")),
        _ => Err("must be a string".to_string()),
    })
}

/// The string must be a valid email address.
#[must_use]
pub fn email() -> Rule {
    Box::new(|value| match value {
        FieldValue::Str(s) if EMAIL_RE.is_match(s) => Ok(()),
        FieldValue::Str(_) => Err("must be a valid email address".to_string()),
        _ => Err("must be a string".to_string()),
    })
}

/// The string must be a valid URL.
#[must_use]
pub fn url() -> Rule {
    Box::new(|value| match value {
        FieldValue::Str(s) if URL_RE.is_match(s) => Ok(()),
        FieldValue::Str(_) => Err("must be a valid URL".to_string()),
        _ => Err("must be a string".to_string()),
    })
}

/// The string must be a valid UUID.
#[must_use]
pub fn uuid() -> Rule {
    Box::new(|value| match value {
        FieldValue::Str(s) if UUID_RE.is_match(&s.to_lowercase()) => Ok(()),
        FieldValue::Str(_) => Err("must be a valid UUID".to_string()),
        _ => Err("must be a string".to_string()),
    })
}

/// Domain rule for job type tags: 1-100 chars of `[A-Za-z0-9_-]`.
#[must_use]
pub fn job_type() -> Rule {
    Box::new(|value| match value {
        FieldValue::Str(s) => {
            if s.is_empty() || s.chars().count() > 100 {
                return Err("must be between 1 and 100 characters".to_string());
            }
            if !JOB_TYPE_RE.is_match(s) {
                return Err(
                    "can only contain letters, numbers, underscore, and hyphen".to_string()
                );
            }
            Ok(())
        }
        _ => Err("must be a string".to_string()),
    })
}

/// Domain rule for priorities: an integer in 0-3.
#[must_use]
pub fn priority() -> Rule {
    one_of(vec![
        FieldValue::Int(0),
        FieldValue::Int(1),
        FieldValue::Int(2),
        FieldValue::Int(3),
    ])
}

/// Domain rule for retry limits: absent, or an integer in 0-10.
#[must_use]
pub fn max_retries() -> Rule {
    let bounds = between(0.0, 10.0);
    Box::new(move |value| match value {
        FieldValue::Null => Ok(()),
        other => bounds(other),
    })
}
