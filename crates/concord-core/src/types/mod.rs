//! # Core Type Definitions
//!
//! This module contains the types every other module speaks in:
//! - The dynamic value model held by attributes (`Value`)
//! - Attribute type specifications (`ValueType`)
//! - Error types (`ConcordError`)
//!
//! ## Value Semantics
//!
//! Plain values (`Null`, `Boolean`, `Number`, `String`, `Date`, `Array`,
//! `Object`) are owned and cloned deeply. `Component` values are handles:
//! cloning a `Value::Component` yields the same component, and equality
//! compares identity. `Undefined` is a real value, distinct from an unset
//! attribute.

mod value_type;

pub use value_type::ValueType;

use crate::component::Component;
use crate::serialization::ScriptFunction;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// VALUE
// =============================================================================

/// Ordered map used for plain objects.
pub type ObjectMap = BTreeMap<String, Value>;

/// A dynamic value held by an attribute or exchanged on the wire.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Explicitly undefined. Serialized as `{"__undefined": true}`.
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(ObjectMap),
    /// A component class or instance (shared handle).
    Component(Component),
    /// A function carried as source text.
    Function(ScriptFunction),
}

impl Value {
    /// Runtime type name used in error messages.
    ///
    /// Components report their component type (`Movie` or `movie`).
    #[must_use]
    pub fn type_name(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Boolean(_) => "boolean".to_string(),
            Self::Number(_) => "number".to_string(),
            Self::String(_) => "string".to_string(),
            Self::Date(_) => "Date".to_string(),
            Self::Array(_) => "array".to_string(),
            Self::Object(_) => "object".to_string(),
            Self::Component(component) => component.component_type(),
            Self::Function(_) => "function".to_string(),
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_component(&self) -> Option<&Component> {
        match self {
            Self::Component(component) => Some(component),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Convert plain JSON into a value without interpreting any sentinel keys.
    #[must_use]
    pub fn from_plain_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_plain_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_plain_json(value)))
                    .collect(),
            ),
        }
    }

    /// Convert into plain JSON with no sentinel keys.
    ///
    /// `Undefined` becomes `null` and dates become RFC 3339 strings.
    /// Components and functions have no plain form.
    pub fn to_plain_json(&self) -> Result<serde_json::Value, ConcordError> {
        Ok(match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .ok_or_else(|| ConcordError::UnserializableValue(format!("number ({n})")))?,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Date(date) => serde_json::Value::String(date.to_rfc3339()),
            Self::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Self::to_plain_json)
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_plain_json()?)))
                    .collect::<Result<_, ConcordError>>()?,
            ),
            Self::Component(_) | Self::Function(_) => {
                return Err(ConcordError::UnserializableValue(self.type_name()));
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Component(a), Self::Component(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<ObjectMap> for Value {
    fn from(value: ObjectMap) -> Self {
        Self::Object(value)
    }
}

impl From<Component> for Value {
    fn from(value: Component) -> Self {
        Self::Component(value)
    }
}

impl From<&Component> for Value {
    fn from(value: &Component) -> Self {
        Self::Component(value.clone())
    }
}

impl From<ScriptFunction> for Value {
    fn from(value: ScriptFunction) -> Self {
        Self::Function(value)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in concord operations.
#[derive(Debug, Error)]
pub enum ConcordError {
    // --- Validation ---------------------------------------------------------
    /// A component name is not a PascalCase identifier.
    #[error("The specified component name ('{0}') is invalid")]
    InvalidComponentName(String),

    /// A property name is not a valid identifier.
    #[error("The specified property name ('{0}') is invalid")]
    InvalidPropertyName(String),

    /// A value could not be normalized into an attribute selector.
    #[error("Expected a valid attribute selector, but received a value of type '{0}'")]
    InvalidSelector(String),

    /// An options descriptor contained a key that is not understood.
    #[error("Unknown option '{option}' (context: {context})")]
    UnknownOption { option: String, context: String },

    /// One or more validators failed.
    #[error(
        "The following error(s) occurred while validating the component '{component}': {failures}"
    )]
    ValidationFailed { component: String, failures: String },

    // --- Lookup -------------------------------------------------------------
    /// A component was serialized without being listed in `known_components`.
    #[error("Cannot serialize a component that is unknown (component: '{0}')")]
    UnknownComponent(String),

    /// A payload needed a component getter, and none was supplied.
    #[error("Cannot deserialize a component without a component getter (component type: '{0}')")]
    MissingComponentGetter(String),

    /// A registry already holds a class with this name.
    #[error("A component with the same name is already registered (component: '{0}')")]
    DuplicateComponent(String),

    /// The component getter could not resolve a type name.
    #[error("The component '{0}' cannot be found")]
    ComponentNotFound(String),

    /// A property is missing from a component.
    #[error("The property '{name}' is missing (component: '{component}')")]
    PropertyNotFound { name: String, component: String },

    /// A property exists but is not of the expected kind.
    #[error("The property '{name}' is not {expected} (component: '{component}')")]
    PropertyKindMismatch {
        name: String,
        component: String,
        expected: &'static str,
    },

    // --- State --------------------------------------------------------------
    /// An attribute was read before any value was assigned.
    #[error("Cannot get the value of an unset attribute (attribute: '{component}.{name}')")]
    UnsetAttribute { name: String, component: String },

    /// A payload tried to mark an existing non-new component as new.
    #[error("Cannot mark as new an existing non-new component (component: '{0}')")]
    CannotMarkAsNew(String),

    /// Removing an object selector from a `true` selector is ambiguous.
    #[error("Cannot remove an 'object' attribute selector from a 'true' attribute selector")]
    SelectorKindMismatch,

    /// A payload's type tag does not match the target component.
    #[error(
        "Cannot deserialize a component with a mismatched type (expected: '{expected}', received: '{received}')"
    )]
    ComponentTypeMismatch { expected: String, received: String },

    /// A primary identifier was reassigned.
    #[error(
        "Cannot modify the value of a primary identifier attribute (attribute: '{component}.{name}')"
    )]
    PrimaryIdentifierImmutable { name: String, component: String },

    /// Another instance already holds the primary identifier value.
    #[error("A component with the same identifier already exists (component: '{component}', identifier: {identifier})")]
    DuplicateIdentifier {
        component: String,
        identifier: String,
    },

    /// `merge` was called with a component that is not a fork of the target.
    #[error("Cannot merge a component that is not a fork of '{0}'")]
    NotAFork(String),

    /// A synchronous result was requested from a computation that went async.
    #[error("An attribute filter returned an asynchronous result in a synchronous context")]
    AsyncRequired,

    /// The operation does not apply to this kind of component node.
    #[error("{0}")]
    UnsupportedOperation(String),

    // --- Type ---------------------------------------------------------------
    /// A value did not match the attribute's declared type.
    #[error(
        "Cannot assign a value of an unexpected type (attribute: '{component}.{attribute}', expected type: '{expected}', received type: '{received}')"
    )]
    UnexpectedValueType {
        component: String,
        attribute: String,
        expected: String,
        received: String,
    },

    /// `pick`/`traverse` reached a value that has no attributes.
    #[error(
        "Cannot pick attributes from a value that is not a plain object or an array (value type: '{0}')"
    )]
    NotPickable(String),

    /// `pick` was asked to select nothing at the top level.
    #[error("Cannot pick attributes from a value when the specified attribute selector is 'false'")]
    PickWithFalseSelector,

    /// A value has no wire representation.
    #[error("Cannot serialize a value of type '{0}'")]
    UnserializableValue(String),

    /// A wire payload is malformed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Compiling or calling a script function failed.
    #[error("Function error: {0}")]
    Function(String),
}

// =============================================================================
// TESTS
// =============================================================================
