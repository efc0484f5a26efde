//! Property identity: sections, value types and property keys
//!
//! Every property of a functional endpoint is addressed by a full name of the
//! form `<section>/<trait>/<prop>`, where `<section>` is one of the single-letter
//! tags `s` (state), `c` (config) or `m` (metadata). The full name is the only
//! representation that is compared or persisted.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PropertyError, Result};
use crate::transform::Transform;

// ============================================================================
// Section
// ============================================================================

/// One of the three partitions of an endpoint's properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Live state, e.g. on/off or current level
    State,
    /// Configuration, e.g. pairing source and destination
    Config,
    /// Descriptive metadata, e.g. names and manufacturer info
    Metadata,
}

impl Section {
    /// All sections in routing order
    pub const ALL: [Section; 3] = [Section::State, Section::Config, Section::Metadata];

    /// Single-letter tag used as the name prefix
    pub fn tag(&self) -> &'static str {
        match self {
            Section::State => "s",
            Section::Config => "c",
            Section::Metadata => "m",
        }
    }

    /// Parse a section from its tag
    pub fn from_tag(tag: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.tag() == tag)
    }

    /// Determine the section of a full property name by prefix
    pub fn of(name: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.contains(name))
    }

    /// Check whether a full property name belongs to this section
    pub fn contains(&self, name: &str) -> bool {
        name.strip_prefix(self.tag())
            .map_or(false, |rest| rest.starts_with('/'))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ============================================================================
// ValueType
// ============================================================================

/// The value type a property accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Anything, no coercion
    Any,
    Bool,
    /// Signed integer
    Int,
    /// Any number, integer or floating point
    Number,
    Text,
    /// Absolute URL or absolute path
    Uri,
    /// Collection of elements
    Array,
    Map,
    /// Transform expression, see [`Transform`]
    Expression,
}

impl ValueType {
    /// Whether values of this type can be incremented
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Number | ValueType::Any)
    }

    /// Coerce `value` into this type
    ///
    /// `null` is accepted by every type and means "unset".
    pub fn coerce(&self, name: &str, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let mismatch = || PropertyError::TypeMismatch {
            key: name.to_string(),
            expected: *self,
        };

        match self {
            ValueType::Any => Ok(value.clone()),
            ValueType::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(mismatch()),
                },
                Value::String(s) => s.parse::<bool>().map(Value::Bool).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ValueType::Int => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(mismatch()),
                },
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ValueType::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ValueType::Text => match value {
                Value::String(_) => Ok(value.clone()),
                _ => Err(mismatch()),
            },
            ValueType::Uri => match value {
                Value::String(s) if is_locator(s) => Ok(value.clone()),
                Value::String(s) => Err(PropertyError::InvalidValue(format!(
                    "\"{s}\" is not a valid locator for {name}"
                ))),
                _ => Err(mismatch()),
            },
            ValueType::Array => match value {
                Value::Array(_) => Ok(value.clone()),
                _ => Err(mismatch()),
            },
            ValueType::Map => match value {
                Value::Object(_) => Ok(value.clone()),
                _ => Err(mismatch()),
            },
            ValueType::Expression => match value {
                Value::String(s) => s
                    .parse::<Transform>()
                    .map(|_| value.clone())
                    .map_err(|e| PropertyError::InvalidValue(format!("{name}: {e}"))),
                _ => Err(mismatch()),
            },
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Number => "number",
            ValueType::Text => "text",
            ValueType::Uri => "uri",
            ValueType::Array => "array",
            ValueType::Map => "map",
            ValueType::Expression => "expression",
        };
        f.write_str(name)
    }
}

fn is_locator(s: &str) -> bool {
    s.starts_with('/') || url::Url::parse(s).is_ok()
}

// ============================================================================
// PropertyKey
// ============================================================================

/// Immutable typed identifier of a single property
///
/// Equality and hashing use the full name only; the value type is a hint for
/// coercion.
///
/// # Example
///
/// ```rust
/// use propnet_core::{PropertyKey, Section, ValueType};
///
/// let key = PropertyKey::new(Section::State, "onof", "v", ValueType::Bool);
/// assert_eq!(key.name(), "s/onof/v");
/// assert_eq!(key.section(), Some(Section::State));
/// assert_eq!(key.trait_id(), Some("onof"));
/// assert_eq!(key.prop_id(), Some("v"));
/// ```
#[derive(Clone)]
pub struct PropertyKey {
    name: Arc<str>,
    value_type: ValueType,
}

impl PropertyKey {
    /// Build a key by joining `section/trait/prop`
    pub fn new(section: Section, trait_id: &str, prop_id: &str, value_type: ValueType) -> Self {
        Self::from_name(format!("{}/{}/{}", section.tag(), trait_id, prop_id), value_type)
    }

    /// Build a key from an already joined full name
    pub fn from_name(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: Arc::from(name.into()),
            value_type,
        }
    }

    /// Full name, `section/trait/prop`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Section derived from the name prefix
    pub fn section(&self) -> Option<Section> {
        Section::of(&self.name)
    }

    pub fn trait_id(&self) -> Option<&str> {
        self.name.split('/').nth(1)
    }

    pub fn prop_id(&self) -> Option<&str> {
        self.name.splitn(3, '/').nth(2)
    }

    /// Same name, different value type
    pub fn with_type(&self, value_type: ValueType) -> Self {
        Self {
            name: Arc::clone(&self.name),
            value_type,
        }
    }

    /// Coerce a value to this key's type
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        self.value_type.coerce(&self.name, value)
    }
}

impl PartialEq for PropertyKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PropertyKey {}

impl Hash for PropertyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.name, self.value_type)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
