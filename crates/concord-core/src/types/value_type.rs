//! Attribute type specifications.
//!
//! A type is written the way it appears in an attribute declaration:
//! `"string"`, `"number?"`, `"string[]"`, `"Director?"`, `"Actor[]"`.
//! A trailing `?` accepts `undefined`; a trailing `[]` is an array of the
//! inner type; a PascalCase name is an instance of that component class.

use super::{ConcordError, Value};
use std::fmt;

/// The declared type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueType {
    /// Anything, including `undefined`.
    #[default]
    Any,
    Boolean,
    Number,
    String,
    /// A plain object.
    Object,
    Date,
    Function,
    /// An instance of the named component class (or a subclass).
    Component(String),
    Array(Box<ValueType>),
    /// The inner type, or `undefined`.
    Optional(Box<ValueType>),
}

impl ValueType {
    /// Parse a type specification.
    pub fn parse(spec: &str) -> Result<Self, ConcordError> {
        let spec = spec.trim();

        if let Some(inner) = spec.strip_suffix('?') {
            return Ok(Self::Optional(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = spec.strip_suffix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }

        match spec {
            "any" => Ok(Self::Any),
            "boolean" => Ok(Self::Boolean),
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "object" => Ok(Self::Object),
            "Date" => Ok(Self::Date),
            "Function" => Ok(Self::Function),
            name if crate::component::is_valid_component_name(name) => {
                Ok(Self::Component(name.to_string()))
            }
            other => Err(ConcordError::InvalidPayload(format!(
                "the type specification '{other}' is invalid"
            ))),
        }
    }

    /// The type without its optional marker.
    #[must_use]
    pub fn required(&self) -> &ValueType {
        match self {
            Self::Optional(inner) => inner.required(),
            other => other,
        }
    }

    /// The component class name this type refers to, looking through arrays
    /// and optional markers.
    #[must_use]
    pub fn component_name(&self) -> Option<&str> {
        match self {
            Self::Component(name) => Some(name),
            Self::Array(inner) | Self::Optional(inner) => inner.component_name(),
            _ => None,
        }
    }

    /// Check a value against this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Optional(_), Value::Undefined) => true,
            (Self::Optional(inner), value) => inner.accepts(value),
            (_, Value::Undefined) => false,
            (Self::Boolean, Value::Boolean(_))
            | (Self::Number, Value::Number(_))
            | (Self::String, Value::String(_))
            | (Self::Object, Value::Object(_))
            | (Self::Date, Value::Date(_))
            | (Self::Function, Value::Function(_)) => true,
            (Self::Component(name), Value::Component(component)) => {
                component.is_instance() && component.is_of_class_named(name)
            }
            (Self::Array(inner), Value::Array(items)) => items.iter().all(|item| inner.accepts(item)),
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Boolean => f.write_str("boolean"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Object => f.write_str("object"),
            Self::Date => f.write_str("Date"),
            Self::Function => f.write_str("Function"),
            Self::Component(name) => f.write_str(name),
            Self::Array(inner) => write!(f, "{inner}[]"),
            Self::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}
