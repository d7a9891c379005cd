//! # Properties
//!
//! A property is a named member of a component class, prototype or
//! instance. There are two kinds:
//! - [`Attribute`]: holds a value.
//! - [`Method`]: names a callable operation. Only its exposure is modelled.
//!
//! Both kinds carry an optional [`Exposure`] describing which remote
//! operations are allowed on them.

use crate::attribute::Attribute;
use crate::component::Component;
use crate::ConcordError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// EXPOSURE
// =============================================================================

/// Who may perform an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Permission {
    /// `true` allows everyone, `false` nobody.
    Anyone(bool),
    /// Callers holding this role.
    Role(String),
    /// Callers holding any of these roles.
    Roles(Vec<String>),
}

impl Permission {
    /// Check the permission against a role predicate.
    pub fn allows(&self, has_role: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Self::Anyone(allowed) => *allowed,
            Self::Role(role) => has_role(role),
            Self::Roles(roles) => roles.iter().any(|role| has_role(role)),
        }
    }
}

/// Operation name to permission, e.g. `{"get": true, "set": "admin"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exposure(BTreeMap<String, Permission>);

impl Exposure {
    pub const GET: &'static str = "get";
    pub const SET: &'static str = "set";
    pub const CALL: &'static str = "call";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `operation` for everyone.
    #[must_use]
    pub fn allow(mut self, operation: &str) -> Self {
        self.0.insert(operation.to_string(), Permission::Anyone(true));
        self
    }

    /// Allow `operation` for callers holding any of `roles`.
    #[must_use]
    pub fn allow_roles<I, S>(mut self, operation: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = roles.into_iter().map(Into::into).collect();
        self.0.insert(operation.to_string(), Permission::Roles(roles));
        self
    }

    #[must_use]
    pub fn permission(&self, operation: &str) -> Option<&Permission> {
        self.0.get(operation)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether `operation` is allowed; unlisted operations are denied.
    pub fn operation_is_allowed(&self, operation: &str, has_role: &dyn Fn(&str) -> bool) -> bool {
        self.permission(operation)
            .is_some_and(|permission| permission.allows(has_role))
    }

    pub(crate) fn from_json(json: &serde_json::Value) -> Result<Self, ConcordError> {
        serde_json::from_value(json.clone())
            .map_err(|err| ConcordError::InvalidPayload(format!("invalid exposure: {err}")))
    }
}

// =============================================================================
// METHOD
// =============================================================================

/// Options for [`Component::define_method`].
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    pub(crate) exposure: Option<Exposure>,
}

impl MethodOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.exposure = Some(exposure);
        self
    }

    /// Build options from a JSON descriptor such as `{"exposure": {"call": true}}`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ConcordError> {
        let map = json
            .as_object()
            .ok_or_else(|| ConcordError::InvalidPayload("method options must be an object".into()))?;
        let mut options = Self::new();
        for (key, value) in map {
            match key.as_str() {
                "exposure" => options.exposure = Some(Exposure::from_json(value)?),
                other => {
                    return Err(ConcordError::UnknownOption {
                        option: other.to_string(),
                        context: "method".to_string(),
                    });
                }
            }
        }
        Ok(options)
    }
}

/// Handle to a method property of a component.
#[derive(Debug, Clone)]
pub struct Method {
    parent: Component,
    name: String,
}

impl Method {
    pub(crate) fn new(parent: Component, name: &str) -> Self {
        Self {
            parent,
            name: name.to_string(),
        }
    }
}

// =============================================================================
// PROPERTY TRAIT
// =============================================================================

/// Behaviour shared by attributes and methods.
pub trait Property {
    fn name(&self) -> &str;

    fn parent(&self) -> &Component;

    /// The exposure visible from this property's parent.
    fn exposure(&self) -> Option<Exposure> {
        self.parent()
            .slot(self.name())
            .ok()
            .and_then(|slot| slot.exposure)
    }

    /// Replace the exposure on this property's parent only.
    fn set_exposure(&self, exposure: Option<Exposure>) -> Result<(), ConcordError> {
        let parent = self.parent();
        parent.ensure_slot(self.name())?;
        if let Some(slot) = parent.node_mut().properties.get_mut(self.name()) {
            slot.exposure = exposure;
        }
        Ok(())
    }

    /// Whether the property is exposed for at least one operation.
    fn is_exposed(&self) -> bool {
        self.exposure().is_some_and(|exposure| !exposure.is_empty())
    }

    fn operation_is_allowed(&self, operation: &str, has_role: &dyn Fn(&str) -> bool) -> bool {
        self.exposure()
            .is_some_and(|exposure| exposure.operation_is_allowed(operation, has_role))
    }
}

impl Property for Method {
    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> &Component {
        &self.parent
    }
}

impl Property for Attribute {
    fn name(&self) -> &str {
        Attribute::name(self)
    }

    fn parent(&self) -> &Component {
        Attribute::parent(self)
    }
}

/// Either kind of property.
#[derive(Debug, Clone)]
pub enum PropertyHandle {
    Attribute(Attribute),
    Method(Method),
}

impl PropertyHandle {
    #[must_use]
    pub fn as_property(&self) -> &dyn Property {
        match self {
            Self::Attribute(attribute) => attribute,
            Self::Method(method) => method,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.as_property().name()
    }

    #[must_use]
    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Self::Attribute(attribute) => Some(attribute),
            Self::Method(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_operations_are_denied() {
        let exposure = Exposure::new().allow(Exposure::GET);
        let nobody = |_: &str| false;

        assert!(exposure.operation_is_allowed("get", &nobody));
        assert!(!exposure.operation_is_allowed("set", &nobody));
    }

    #[test]
    fn role_permissions_consult_the_predicate() {
        let exposure = Exposure::new().allow_roles(Exposure::SET, ["admin", "editor"]);

        assert!(exposure.operation_is_allowed("set", &|role: &str| role == "editor"));
        assert!(!exposure.operation_is_allowed("set", &|role: &str| role == "guest"));
    }

    #[test]
    fn exposure_json_shape() {
        let json = serde_json::json!({"get": true, "set": "admin", "call": ["a", "b"]});
        let exposure = Exposure::from_json(&json).expect("parse");

        assert_eq!(exposure.permission("get"), Some(&Permission::Anyone(true)));
        assert_eq!(
            exposure.permission("set"),
            Some(&Permission::Role("admin".to_string()))
        );
        assert_eq!(serde_json::to_value(&exposure).expect("serialize"), json);
    }

    #[test]
    fn method_options_reject_unknown_keys() {
        let result = MethodOptions::from_json(&serde_json::json!({"expose": {}}));
        assert!(matches!(
            result,
            Err(ConcordError::UnknownOption { option, .. }) if option == "expose"
        ));
    }
}
