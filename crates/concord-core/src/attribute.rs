//! # Attributes
//!
//! An [`Attribute`] is a handle on one value-holding property of a
//! component. The declaration (type, default, accessors, validators,
//! primary identifier flag) is shared by every node that sees the
//! attribute; the value state is per node:
//!
//! - set locally,
//! - unset locally,
//! - inherited from the node's lookup parent.
//!
//! Reading an unset attribute fails unless the caller asks for
//! `undefined` instead.

use crate::component::node::{PropertyDefinition, PropertySlot, ValueState};
use crate::component::Component;
use crate::property::Exposure;
use crate::validation::{ValidationFailure, Validator};
use crate::{ConcordError, Value, ValueType};
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Produces a default value for a component.
pub type DefaultFn = Rc<dyn Fn(&Component) -> Value>;
/// Computes an attribute value instead of reading storage.
pub type GetterFn = Rc<dyn Fn(&Component) -> Result<Value, ConcordError>>;
/// Receives writes instead of storage.
pub type SetterFn = Rc<dyn Fn(&Component, Value) -> Result<(), ConcordError>>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Options for [`Component::define_attribute`].
#[derive(Clone, Default)]
pub struct AttributeOptions {
    pub(crate) type_spec: Option<String>,
    pub(crate) default: Option<DefaultFn>,
    pub(crate) getter: Option<GetterFn>,
    pub(crate) setter: Option<SetterFn>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) exposure: Option<Exposure>,
    pub(crate) primary_identifier: bool,
}

impl fmt::Debug for AttributeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeOptions")
            .field("type_spec", &self.type_spec)
            .field("has_default", &self.default.is_some())
            .field("has_getter", &self.getter.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("validators", &self.validators)
            .field("exposure", &self.exposure)
            .field("primary_identifier", &self.primary_identifier)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeDescriptor {
    value_type: Option<String>,
    default: Option<serde_json::Value>,
    exposure: Option<serde_json::Value>,
    #[serde(default)]
    primary_identifier: bool,
}

impl AttributeOptions {
    const DESCRIPTOR_KEYS: [&'static str; 4] = ["valueType", "default", "exposure", "primaryIdentifier"];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared type, e.g. `"string"` or `"Actor[]"`. Parsed at definition.
    #[must_use]
    pub fn with_type(mut self, spec: &str) -> Self {
        self.type_spec = Some(spec.to_string());
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Fn(&Component) -> Value + 'static) -> Self {
        self.default = Some(Rc::new(default));
        self
    }

    #[must_use]
    pub fn with_default_value(self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.with_default(move |_| value.clone())
    }

    #[must_use]
    pub fn with_getter(
        mut self,
        getter: impl Fn(&Component) -> Result<Value, ConcordError> + 'static,
    ) -> Self {
        self.getter = Some(Rc::new(getter));
        self
    }

    #[must_use]
    pub fn with_setter(
        mut self,
        setter: impl Fn(&Component, Value) -> Result<(), ConcordError> + 'static,
    ) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.exposure = Some(exposure);
        self
    }

    /// Mark the attribute as the primary identifier of its class.
    #[must_use]
    pub fn primary_identifier(mut self) -> Self {
        self.primary_identifier = true;
        self
    }

    /// Build options from a JSON descriptor:
    ///
    /// ```json
    /// {"valueType": "string", "default": "", "exposure": {"get": true}, "primaryIdentifier": false}
    /// ```
    pub fn from_json(json: &serde_json::Value) -> Result<Self, ConcordError> {
        let map = json.as_object().ok_or_else(|| {
            ConcordError::InvalidPayload("attribute options must be an object".into())
        })?;
        if let Some(unknown) = map
            .keys()
            .find(|key| !Self::DESCRIPTOR_KEYS.contains(&key.as_str()))
        {
            return Err(ConcordError::UnknownOption {
                option: unknown.clone(),
                context: "attribute".to_string(),
            });
        }

        let descriptor: AttributeDescriptor = serde_json::from_value(json.clone())
            .map_err(|err| ConcordError::InvalidPayload(format!("invalid attribute options: {err}")))?;

        let mut options = Self::new();
        options.type_spec = descriptor.value_type;
        options.primary_identifier = descriptor.primary_identifier;
        if let Some(exposure) = &descriptor.exposure {
            options.exposure = Some(Exposure::from_json(exposure)?);
        }
        if let Some(default) = &descriptor.default {
            options = options.with_default_value(Value::from_plain_json(default));
        }
        Ok(options)
    }
}

// =============================================================================
// DEFINITION
// =============================================================================

/// The parsed, shared declaration of an attribute.
pub(crate) struct AttributeDefinition {
    pub(crate) value_type: ValueType,
    pub(crate) default: Option<DefaultFn>,
    pub(crate) getter: Option<GetterFn>,
    pub(crate) setter: Option<SetterFn>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) primary_identifier: bool,
}

impl AttributeDefinition {
    pub(crate) fn from_options(options: AttributeOptions) -> Result<(Self, Option<Exposure>), ConcordError> {
        let value_type = match &options.type_spec {
            Some(spec) => ValueType::parse(spec)?,
            None => ValueType::Any,
        };
        let definition = Self {
            value_type,
            default: options.default,
            getter: options.getter,
            setter: options.setter,
            validators: options.validators,
            primary_identifier: options.primary_identifier,
        };
        Ok((definition, options.exposure))
    }
}

// =============================================================================
// ATTRIBUTE HANDLE
// =============================================================================

/// Handle to an attribute as seen from one component node.
#[derive(Clone)]
pub struct Attribute {
    parent: Component,
    name: String,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attribute({}.{})", self.parent.describe(), self.name)
    }
}

impl Attribute {
    pub(crate) fn new(parent: Component, name: &str) -> Self {
        Self {
            parent,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parent(&self) -> &Component {
        &self.parent
    }

    fn with_definition<R>(&self, f: impl FnOnce(&AttributeDefinition) -> R) -> Result<R, ConcordError> {
        let definition = self.parent.slot(&self.name)?.definition;
        match &*definition {
            PropertyDefinition::Attribute(attribute) => Ok(f(attribute)),
            PropertyDefinition::Method => Err(ConcordError::PropertyKindMismatch {
                name: self.name.clone(),
                component: self.parent.describe(),
                expected: "an attribute",
            }),
        }
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.with_definition(|def| def.value_type.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_primary_identifier(&self) -> bool {
        self.with_definition(|def| def.primary_identifier)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn validators(&self) -> Vec<Validator> {
        self.with_definition(|def| def.validators.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_getter(&self) -> bool {
        self.with_definition(|def| def.getter.is_some())
            .unwrap_or(false)
    }

    // --- Values ---------------------------------------------------------------

    /// Whether a value is available. Attributes with a getter always are.
    #[must_use]
    pub fn is_set(&self) -> bool {
        if self.has_getter() {
            return true;
        }
        matches!(self.parent.read_state(&self.name), Ok(Some(_)))
    }

    /// The current value, failing if the attribute is unset.
    pub fn get_value(&self) -> Result<Value, ConcordError> {
        self.read()?.ok_or_else(|| ConcordError::UnsetAttribute {
            name: self.name.clone(),
            component: self.parent.describe(),
        })
    }

    /// The current value, or `undefined` if the attribute is unset.
    pub fn get_value_or_undefined(&self) -> Result<Value, ConcordError> {
        Ok(self.read()?.unwrap_or_default())
    }

    fn read(&self) -> Result<Option<Value>, ConcordError> {
        if let Some(getter) = self.with_definition(|def| def.getter.clone())? {
            return getter(&self.parent).map(Some);
        }
        self.parent.read_state(&self.name)
    }

    /// Assign a value after checking it against the declared type.
    ///
    /// A primary identifier may be assigned once; assigning it registers an
    /// instance in its class's identity map.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<(), ConcordError> {
        let value = value.into();
        let (value_type, setter, primary_identifier) = self.with_definition(|def| {
            (def.value_type.clone(), def.setter.clone(), def.primary_identifier)
        })?;

        if !value_type.accepts(&value) {
            return Err(ConcordError::UnexpectedValueType {
                component: self.parent.describe(),
                attribute: self.name.clone(),
                expected: value_type.to_string(),
                received: value.type_name(),
            });
        }

        if let Some(setter) = setter {
            return setter(&self.parent, value);
        }

        if primary_identifier && self.parent.is_instance() {
            match self.parent.read_state(&self.name)? {
                Some(current) if current == value => return Ok(()),
                Some(_) => {
                    return Err(ConcordError::PrimaryIdentifierImmutable {
                        name: self.name.clone(),
                        component: self.parent.describe(),
                    });
                }
                None => self.parent.register_identifier(&value)?,
            }
        }

        trace!(attribute = %self.name, component = %self.parent.describe(), "set value");
        self.parent.write_state(&self.name, ValueState::Set(value))
    }

    /// Mark the attribute as unset on this node.
    pub fn unset_value(&self) -> Result<(), ConcordError> {
        if self.is_primary_identifier() && self.parent.is_instance() && self.is_set() {
            return Err(ConcordError::PrimaryIdentifierImmutable {
                name: self.name.clone(),
                component: self.parent.describe(),
            });
        }
        self.parent.write_state(&self.name, ValueState::Unset)
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        self.with_definition(|def| def.default.is_some())
            .unwrap_or(false)
    }

    /// Evaluate the default for this attribute's parent, or `undefined`.
    pub fn get_default_value(&self) -> Result<Value, ConcordError> {
        let default = self.with_definition(|def| def.default.clone())?;
        Ok(default.map(|default| default(&self.parent)).unwrap_or_default())
    }

    /// This attribute as seen from `new_parent`, a node that shares the
    /// declaration. The returned attribute reads through to `self` until
    /// written, forking any nested instances it reads.
    pub fn fork(&self, new_parent: &Component) -> Result<Attribute, ConcordError> {
        let slot = self.parent.slot(&self.name)?;
        let forked = PropertySlot::derived_from(&self.parent, &slot, true);
        new_parent.insert_slot(&self.name, forked);
        Ok(Attribute::new(new_parent.clone(), &self.name))
    }

    // --- Validation -----------------------------------------------------------

    /// Run this attribute's validators against its current value.
    pub fn run_validators(&self) -> Result<Vec<ValidationFailure>, ConcordError> {
        let validators = self.validators();
        if validators.is_empty() {
            return Ok(Vec::new());
        }
        let value = self.get_value_or_undefined()?;
        Ok(validators
            .iter()
            .filter(|validator| !validator.check(&value))
            .map(|validator| ValidationFailure {
                path: self.name.clone(),
                validator: validator.to_string(),
            })
            .collect())
    }
}
