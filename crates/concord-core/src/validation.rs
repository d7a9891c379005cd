//! # Validation
//!
//! Validators are attached to attributes and run on demand through
//! [`Component::run_validators`](crate::Component::run_validators),
//! [`Component::validate`](crate::Component::validate) and
//! [`Component::is_valid`](crate::Component::is_valid).
//!
//! An `undefined` value only fails [`Validator::Required`]; the other
//! validators skip it.

use crate::Value;
use std::fmt;
use std::rc::Rc;

/// A predicate used by [`Validator::Custom`].
pub type ValidatorFn = Rc<dyn Fn(&Value) -> bool>;

/// A check applied to an attribute value.
#[derive(Clone)]
pub enum Validator {
    Required,
    /// Non-empty string (ignoring surrounding whitespace), array or object.
    NotEmpty,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    AnyOf(Vec<Value>),
    Custom { name: String, check: ValidatorFn },
}

impl Validator {
    pub fn custom(name: impl Into<String>, check: impl Fn(&Value) -> bool + 'static) -> Self {
        Self::Custom {
            name: name.into(),
            check: Rc::new(check),
        }
    }

    /// Whether `value` passes.
    #[must_use]
    pub fn check(&self, value: &Value) -> bool {
        if value.is_undefined() {
            return !matches!(self, Self::Required);
        }
        match self {
            Self::Required => true,
            Self::NotEmpty => match value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => true,
            },
            Self::MinLength(min) => length_of(value).is_none_or(|len| len >= *min),
            Self::MaxLength(max) => length_of(value).is_none_or(|len| len <= *max),
            Self::Min(min) => value.as_f64().is_none_or(|n| n >= *min),
            Self::Max(max) => value.as_f64().is_none_or(|n| n <= *max),
            Self::AnyOf(allowed) => allowed.contains(value),
            Self::Custom { check, .. } => check(value),
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required()"),
            Self::NotEmpty => f.write_str("notEmpty()"),
            Self::MinLength(n) => write!(f, "minLength({n})"),
            Self::MaxLength(n) => write!(f, "maxLength({n})"),
            Self::Min(n) => write!(f, "min({n})"),
            Self::Max(n) => write!(f, "max({n})"),
            Self::AnyOf(values) => write!(f, "anyOf({} values)", values.len()),
            Self::Custom { name, .. } => write!(f, "{name}()"),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({self})")
    }
}

/// A validator that rejected a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Attribute path from the validated component, e.g. `director.name`.
    pub path: String,
    /// The failing validator, e.g. `notEmpty()`.
    pub validator: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (validator: {})", self.path, self.validator)
    }
}
