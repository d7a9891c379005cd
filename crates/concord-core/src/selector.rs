//! # Attribute Selectors
//!
//! An attribute selector describes which attributes (and, recursively,
//! which attributes of nested components) take part in an operation:
//!
//! - `true` selects everything, deeply.
//! - `false` selects nothing.
//! - a map selects the listed attributes, each with its own sub-selector.
//!
//! A normalized map never stores a `false` entry: a present key means
//! "include", an absent key means "exclude".
//!
//! All operations are pure. They take selectors by reference and return
//! new selectors.

use crate::{ConcordError, ObjectMap, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

// =============================================================================
// SELECTOR TYPE
// =============================================================================

/// A recursive boolean-or-map selection of attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeSelector {
    Bool(bool),
    Map(BTreeMap<String, AttributeSelector>),
}

impl Default for AttributeSelector {
    fn default() -> Self {
        Self::Bool(true)
    }
}

impl From<bool> for AttributeSelector {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl AttributeSelector {
    /// The selector that selects everything.
    #[must_use]
    pub const fn all() -> Self {
        Self::Bool(true)
    }

    /// The selector that selects nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self::Bool(false)
    }

    /// An empty map selector (selects no attribute, but is not `false`).
    #[must_use]
    pub fn empty() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Build a map selector where every name maps to `true`.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Map(
            names
                .into_iter()
                .map(|name| (name.into(), Self::Bool(true)))
                .collect(),
        )
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::Bool(false))
    }

    /// Iterate over the entries of a map selector. Booleans have no entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &AttributeSelector)> {
        let map = match self {
            Self::Map(map) => Some(map),
            Self::Bool(_) => None,
        };
        map.into_iter()
            .flat_map(|map| map.iter().map(|(name, sub)| (name.as_str(), sub)))
    }

    /// The sub-selector for `name`.
    ///
    /// Booleans are absorbing: `true` selects every nested name, `false` none.
    #[must_use]
    pub fn get(&self, name: &str) -> AttributeSelector {
        match self {
            Self::Bool(b) => Self::Bool(*b),
            Self::Map(map) => map.get(name).cloned().unwrap_or(Self::Bool(false)),
        }
    }

    /// Return a selector where `name` maps to `value`.
    ///
    /// - Setting `false` into a map removes the key.
    /// - A boolean that already satisfies `value` is returned unchanged.
    /// - `true` cannot be narrowed by setting `false`; use [`remove`](Self::remove).
    /// - Otherwise a boolean turns into a map holding the single entry.
    #[must_use]
    pub fn set(&self, name: &str, value: AttributeSelector) -> AttributeSelector {
        match self {
            Self::Bool(b) => {
                if value == Self::Bool(*b) || (*b && value.is_none()) {
                    return self.clone();
                }
                Self::Map(BTreeMap::from([(name.to_string(), value)]))
            }
            Self::Map(map) => {
                let mut map = map.clone();
                if value.is_none() {
                    map.remove(name);
                } else {
                    map.insert(name.to_string(), value);
                }
                Self::Map(map)
            }
        }
    }

    /// Structural equality. A boolean never equals a map, even an empty one.
    #[must_use]
    pub fn is_equal(&self, other: &AttributeSelector) -> bool {
        self == other
    }

    /// Whether everything selected by `other` is also selected by `self`.
    ///
    /// `true` includes everything; a boolean `other` is included in any map
    /// only when it is `false`; `false` includes only `false` itself.
    #[must_use]
    pub fn includes(&self, other: &AttributeSelector) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Bool(b), _) => *b,
            (Self::Map(_), Self::Bool(b)) => !*b,
            (Self::Map(_), Self::Map(other_map)) => other_map
                .iter()
                .all(|(name, other_sub)| self.get(name).includes(other_sub)),
        }
    }

    /// Union of two selectors.
    ///
    /// A scalar `true` for a key absorbs a nested map for the same key.
    #[must_use]
    pub fn add(&self, other: &AttributeSelector) -> AttributeSelector {
        match (self, other) {
            (Self::Bool(false), _) => other.clone(),
            (_, Self::Bool(false)) => self.clone(),
            (Self::Bool(true), _) | (_, Self::Bool(true)) => Self::Bool(true),
            (Self::Map(map), Self::Map(other_map)) => {
                let mut result = map.clone();
                for (name, other_sub) in other_map {
                    let merged = self.get(name).add(other_sub);
                    result.insert(name.clone(), merged);
                }
                Self::Map(result)
            }
        }
    }

    /// Difference of two selectors.
    ///
    /// Fails when a map would have to be removed from a `true` selection,
    /// since the attributes hidden behind `true` are not known.
    pub fn remove(&self, other: &AttributeSelector) -> Result<AttributeSelector, ConcordError> {
        match (self, other) {
            (_, Self::Bool(true)) => Ok(Self::Bool(false)),
            (_, Self::Bool(false)) => Ok(self.clone()),
            (Self::Bool(true), Self::Map(_)) => Err(ConcordError::SelectorKindMismatch),
            (Self::Bool(false), Self::Map(_)) => Ok(Self::Bool(false)),
            (Self::Map(map), Self::Map(other_map)) => {
                let mut result = map.clone();
                for (name, other_sub) in other_map {
                    let Some(current) = map.get(name) else {
                        continue;
                    };
                    let remaining = current.remove(other_sub)?;
                    let emptied = matches!(&remaining, Self::Map(m) if m.is_empty())
                        && !matches!(current, Self::Map(m) if m.is_empty());
                    if remaining.is_none() || emptied {
                        result.remove(name);
                    } else {
                        result.insert(name.clone(), remaining);
                    }
                }
                Ok(Self::Map(result))
            }
        }
    }

    /// Validate and canonicalize a dynamic value into a selector.
    ///
    /// `undefined` is read as `false`. Any other non-boolean, non-object
    /// input is rejected with its runtime type.
    pub fn normalize(value: &Value) -> Result<AttributeSelector, ConcordError> {
        match value {
            Value::Undefined => Ok(Self::Bool(false)),
            Value::Boolean(b) => Ok(Self::Bool(*b)),
            Value::Object(map) => {
                let mut result = BTreeMap::new();
                for (name, sub) in map {
                    let sub = Self::normalize(sub)?;
                    if !sub.is_none() {
                        result.insert(name.clone(), sub);
                    }
                }
                Ok(Self::Map(result))
            }
            other => Err(ConcordError::InvalidSelector(other.type_name())),
        }
    }

    /// Normalize a JSON value into a selector.
    pub fn from_json(json: &serde_json::Value) -> Result<AttributeSelector, ConcordError> {
        Self::normalize(&Value::from_plain_json(json))
    }

    /// The JSON form of this selector.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(name, sub)| (name.clone(), sub.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for AttributeSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttributeSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&json).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PICK
// =============================================================================

/// Options for [`pick`].
#[derive(Debug, Clone, Default)]
pub struct PickOptions {
    /// Keys copied from every object regardless of the selector.
    pub include_attribute_names: Vec<String>,
}

impl PickOptions {
    #[must_use]
    pub fn with_attribute_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_attribute_names
            .extend(names.into_iter().map(Into::into));
        self
    }
}

/// Return a copy of `value` holding only the selected keys at each level.
///
/// Arrays are picked element-wise. A `true` selector returns the value as is.
pub fn pick(
    value: &Value,
    selector: &AttributeSelector,
    options: &PickOptions,
) -> Result<Value, ConcordError> {
    if selector.is_none() {
        return Err(ConcordError::PickWithFalseSelector);
    }
    pick_value(value, selector, options)
}

fn pick_value(
    value: &Value,
    selector: &AttributeSelector,
    options: &PickOptions,
) -> Result<Value, ConcordError> {
    match selector {
        AttributeSelector::Bool(true) => return Ok(value.clone()),
        AttributeSelector::Bool(false) => return Ok(Value::Undefined),
        AttributeSelector::Map(_) => {}
    }

    match value {
        Value::Undefined => Ok(Value::Undefined),
        Value::Array(items) => items
            .iter()
            .map(|item| pick_value(item, selector, options))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = ObjectMap::new();
            for name in &options.include_attribute_names {
                if let Some(kept) = map.get(name) {
                    result.insert(name.clone(), kept.clone());
                }
            }
            for (name, sub) in selector.entries() {
                if let Some(child) = map.get(name) {
                    result.insert(name.to_string(), pick_value(child, sub, options)?);
                }
            }
            Ok(Value::Object(result))
        }
        other => Err(ConcordError::NotPickable(other.type_name())),
    }
}

// =============================================================================
// TRAVERSE
// =============================================================================

/// Options for [`traverse`].
#[derive(Debug, Clone, Copy)]
pub struct TraverseOptions {
    /// Also visit intermediate objects below the root.
    pub include_subtrees: bool,
    /// Visit selected leaves.
    pub include_leafs: bool,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            include_subtrees: false,
            include_leafs: true,
        }
    }
}

/// Where a visited value sits in the traversed tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraverseContext<'a> {
    /// Name of the attribute holding the value.
    pub name: Option<&'a str>,
    /// The object owning that attribute.
    pub object: Option<&'a ObjectMap>,
    /// Position of the value when it is an array element.
    pub index: Option<usize>,
}

/// Walk `value` depth-first along `selector`, calling `visit` at each
/// selected leaf instead of building a new tree.
pub fn traverse<F>(
    value: &Value,
    selector: &AttributeSelector,
    options: TraverseOptions,
    mut visit: F,
) -> Result<(), ConcordError>
where
    F: FnMut(&Value, &TraverseContext<'_>),
{
    if selector.is_none() {
        return Ok(());
    }
    traverse_value(
        value,
        selector,
        options,
        &mut visit,
        TraverseContext::default(),
        false,
    )
}

fn traverse_value<'a, F>(
    value: &'a Value,
    selector: &'a AttributeSelector,
    options: TraverseOptions,
    visit: &mut F,
    context: TraverseContext<'a>,
    is_deep: bool,
) -> Result<(), ConcordError>
where
    F: FnMut(&Value, &TraverseContext<'_>),
{
    if selector.is_all() || value.is_undefined() {
        if options.include_leafs {
            visit(value, &context);
        }
        return Ok(());
    }

    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let element_context = TraverseContext {
                    index: Some(index),
                    ..context
                };
                traverse_value(item, selector, options, visit, element_context, is_deep)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            if is_deep && options.include_subtrees {
                visit(value, &context);
            }
            for (name, sub) in selector.entries() {
                if let Some(child) = map.get(name) {
                    let child_context = TraverseContext {
                        name: Some(name),
                        object: Some(map),
                        index: None,
                    };
                    traverse_value(child, sub, options, visit, child_context, true)?;
                }
            }
            Ok(())
        }
        other => Err(ConcordError::NotPickable(other.type_name())),
    }
}

// =============================================================================
// TESTS
// =============================================================================
