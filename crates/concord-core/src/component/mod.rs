//! # Components
//!
//! A [`Component`] is a shared handle on one node of a component graph:
//!
//! | Kind      | Holds                                   | Type tag  |
//! |-----------|-----------------------------------------|-----------|
//! | class     | static properties, identity map         | `Movie`   |
//! | prototype | instance-level property declarations   | `movie`   |
//! | instance  | instance values, `is_new` flag          | `movie`   |
//!
//! Handles are cheap to clone. Equality is identity ([`Component::ptr_eq`]).
//!
//! ## Structure
//!
//! - `node`: storage and lookup chain
//! - `identity`: per-class identity map
//! - `fork`: fork, merge, deep clone

pub(crate) mod fork;
pub(crate) mod identity;
pub(crate) mod node;

use crate::attribute::{Attribute, AttributeDefinition, AttributeOptions};
use crate::primitives::{MAX_NESTING_DEPTH, RESERVED_PREFIX};
use crate::property::{Method, MethodOptions, PropertyHandle};
use crate::selector::AttributeSelector;
use crate::validation::ValidationFailure;
use crate::{ConcordError, ObjectMap, Value, ValueType};
use node::{ClassData, Node, NodeKind, PropertyDefinition, PropertySlot, ValueState};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Whether `name` is a valid component class name (PascalCase identifier).
#[must_use]
pub fn is_valid_component_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Whether `name` is a valid property name.
#[must_use]
pub fn is_valid_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    !name.starts_with(RESERVED_PREFIX)
        && chars
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// =============================================================================
// COMPONENT HANDLE
// =============================================================================

/// Handle to a component class, prototype or instance.
#[derive(Clone)]
pub struct Component(pub(crate) Rc<node::NodeCell>);

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.describe())
    }
}

/// Options for [`Component::resolve_attribute_selector`].
#[derive(Clone)]
pub struct ResolveOptions {
    pub set_attributes_only: bool,
    pub always_include_primary_identifier: bool,
    pub filter: Option<Rc<dyn Fn(&Attribute) -> bool>>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            set_attributes_only: false,
            always_include_primary_identifier: true,
            filter: None,
        }
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("set_attributes_only", &self.set_attributes_only)
            .field(
                "always_include_primary_identifier",
                &self.always_include_primary_identifier,
            )
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

impl ResolveOptions {
    #[must_use]
    pub fn set_attributes_only(mut self) -> Self {
        self.set_attributes_only = true;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Attribute) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }
}

impl Component {
    // --- Construction ---------------------------------------------------------

    /// Define a new component class.
    pub fn define(name: &str) -> Result<Component, ConcordError> {
        if !is_valid_component_name(name) {
            return Err(ConcordError::InvalidComponentName(name.to_string()));
        }
        Ok(Self::new_class(name.to_string(), None, false))
    }

    /// Define a subclass. The subclass inherits static and instance
    /// properties and may redefine them.
    pub fn extend(&self, name: &str) -> Result<Component, ConcordError> {
        self.require_class("extend")?;
        if !is_valid_component_name(name) {
            return Err(ConcordError::InvalidComponentName(name.to_string()));
        }
        Ok(Self::new_class(name.to_string(), Some(self.clone()), false))
    }

    pub(crate) fn new_class(name: String, proto: Option<Component>, forked: bool) -> Component {
        let prototype_proto = proto.as_ref().and_then(Component::class_prototype);
        let cell = Rc::new_cyclic(|weak| {
            let prototype = Component::from_node(Node {
                kind: NodeKind::Prototype {
                    class: weak.clone(),
                },
                proto: prototype_proto,
                forked,
                properties: BTreeMap::new(),
            });
            std::cell::RefCell::new(Node {
                kind: NodeKind::Class(ClassData {
                    name,
                    prototype,
                    identity_map: identity::IdentityMap::default(),
                    fork_scope: None,
                }),
                proto,
                forked,
                properties: BTreeMap::new(),
            })
        });
        Component(cell)
    }

    pub(crate) fn new_instance(&self, is_new: bool) -> Component {
        let class = self.class();
        Component::from_node(Node {
            proto: class.class_prototype(),
            kind: NodeKind::Instance {
                class,
                is_new: Some(is_new),
            },
            forked: false,
            properties: BTreeMap::new(),
        })
    }

    fn require_class(&self, operation: &str) -> Result<(), ConcordError> {
        if self.is_class() {
            Ok(())
        } else {
            Err(ConcordError::UnsupportedOperation(format!(
                "Cannot {operation} '{}': expected a component class",
                self.describe()
            )))
        }
    }

    // --- Kind -----------------------------------------------------------------

    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(self.node().kind, NodeKind::Class(_))
    }

    #[must_use]
    pub fn is_prototype(&self) -> bool {
        matches!(self.node().kind, NodeKind::Prototype { .. })
    }

    #[must_use]
    pub fn is_instance(&self) -> bool {
        matches!(self.node().kind, NodeKind::Instance { .. })
    }

    /// Whether both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Component) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The class of this node (a class is its own class).
    #[must_use]
    pub fn class(&self) -> Component {
        match &self.node().kind {
            NodeKind::Class(_) => self.clone(),
            NodeKind::Prototype { class } => class
                .upgrade()
                .map_or_else(|| self.clone(), Component),
            NodeKind::Instance { class, .. } => class.clone(),
        }
    }

    fn class_prototype(&self) -> Option<Component> {
        match &self.node().kind {
            NodeKind::Class(data) => Some(data.prototype.clone()),
            _ => None,
        }
    }

    /// The prototype of a class, where instance-level properties are
    /// declared.
    pub fn prototype(&self) -> Result<Component, ConcordError> {
        self.class_prototype().ok_or_else(|| {
            ConcordError::UnsupportedOperation(format!(
                "Cannot get the prototype of '{}': expected a component class",
                self.describe()
            ))
        })
    }

    /// The class this class extends, looking through forks.
    #[must_use]
    pub fn base_class(&self) -> Option<Component> {
        let mut current = self.class();
        while current.is_fork_node() {
            current = current.proto()?;
        }
        current.proto()
    }

    // --- Naming ---------------------------------------------------------------

    /// The class name, e.g. `Movie`.
    #[must_use]
    pub fn name(&self) -> String {
        let class = self.class();
        let node = class.node();
        match &node.kind {
            NodeKind::Class(data) => data.name.clone(),
            _ => String::new(),
        }
    }

    /// Rename a class.
    pub fn set_name(&self, name: &str) -> Result<(), ConcordError> {
        self.require_class("rename")?;
        if !is_valid_component_name(name) {
            return Err(ConcordError::InvalidComponentName(name.to_string()));
        }
        if let NodeKind::Class(data) = &mut self.node_mut().kind {
            data.name = name.to_string();
        }
        Ok(())
    }

    /// The wire type tag: the class name for a class, the class name with
    /// a lowercased first letter otherwise.
    #[must_use]
    pub fn component_type(&self) -> String {
        let name = self.name();
        if self.is_class() {
            return name;
        }
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => name,
        }
    }

    pub(crate) fn describe(&self) -> String {
        self.component_type()
    }

    /// Whether this node's class, or a class it extends or was forked from,
    /// is named `name`.
    #[must_use]
    pub fn is_of_class_named(&self, name: &str) -> bool {
        let mut current = Some(self.class());
        while let Some(class) = current {
            if class.name() == name {
                return true;
            }
            current = class.proto();
        }
        false
    }

    // --- Lifecycle ------------------------------------------------------------

    /// Get an instance of this class.
    ///
    /// When `attributes` carries the primary identifier and the identity map
    /// already holds an instance with that value, that instance is returned
    /// unchanged. Otherwise a new instance is created and `attributes` are
    /// assigned to it.
    pub fn instantiate(
        &self,
        attributes: Option<&ObjectMap>,
        is_new: bool,
    ) -> Result<Component, ConcordError> {
        self.require_class("instantiate")?;

        if let Some(attributes) = attributes {
            let identifier = self
                .primary_identifier_attribute()
                .and_then(|attribute| attributes.get(attribute.name()).cloned())
                .filter(|value| !value.is_undefined());
            if let Some(existing) = identifier.and_then(|id| self.identity_lookup(&id)) {
                return Ok(existing);
            }
        }

        let instance = self.new_instance(is_new);
        if let Some(attributes) = attributes {
            for (name, value) in attributes {
                instance.set_value(name, value.clone())?;
            }
        }
        Ok(instance)
    }

    /// Create a new instance, assigning `values` and then defaults for every
    /// attribute not in `values`. Attributes with neither stay unset.
    pub fn create(&self, values: ObjectMap) -> Result<Component, ConcordError> {
        self.require_class("create")?;
        let instance = self.new_instance(true);

        for name in values.keys() {
            instance.get_attribute(name)?;
        }
        for attribute in instance.get_attributes(&AttributeSelector::all(), false) {
            if attribute.has_getter() {
                continue;
            }
            if let Some(value) = values.get(attribute.name()) {
                attribute.set_value(value.clone())?;
            } else if attribute.has_default() {
                attribute.set_value(attribute.get_default_value()?)?;
            }
        }
        Ok(instance)
    }

    /// Whether this instance has not been acknowledged by a backend yet.
    /// Classes and prototypes are never new.
    #[must_use]
    pub fn is_new(&self) -> bool {
        let deferred = match &self.node().kind {
            NodeKind::Instance {
                is_new: Some(is_new),
                ..
            } => return *is_new,
            NodeKind::Instance { is_new: None, .. } => self.node().proto.clone(),
            _ => return false,
        };
        deferred.is_some_and(|origin| origin.is_new())
    }

    pub fn mark_as_new(&self) -> Result<(), ConcordError> {
        self.set_is_new(true)
    }

    pub fn mark_as_not_new(&self) -> Result<(), ConcordError> {
        self.set_is_new(false)
    }

    fn set_is_new(&self, value: bool) -> Result<(), ConcordError> {
        match &mut self.node_mut().kind {
            NodeKind::Instance { is_new, .. } => {
                *is_new = Some(value);
                Ok(())
            }
            _ => Err(ConcordError::UnsupportedOperation(
                "Only instances can be marked as new or not new".to_string(),
            )),
        }
    }

    // --- Properties -----------------------------------------------------------

    fn check_property_definition(&self, name: &str) -> Result<(), ConcordError> {
        if !is_valid_property_name(name) {
            return Err(ConcordError::InvalidPropertyName(name.to_string()));
        }
        if self.is_instance() {
            return Err(ConcordError::UnsupportedOperation(format!(
                "Cannot define the property '{name}' on an instance (component: '{}')",
                self.describe()
            )));
        }
        Ok(())
    }

    /// Define an attribute on a class (static) or a prototype (instance-level).
    pub fn define_attribute(
        &self,
        name: &str,
        options: AttributeOptions,
    ) -> Result<Attribute, ConcordError> {
        self.check_property_definition(name)?;
        let (definition, exposure) = AttributeDefinition::from_options(options)?;

        if definition.primary_identifier {
            if !self.is_prototype() {
                return Err(ConcordError::UnsupportedOperation(format!(
                    "A primary identifier attribute must be defined on a prototype (attribute: '{}.{name}')",
                    self.describe()
                )));
            }
            if !matches!(
                definition.value_type.required(),
                ValueType::String | ValueType::Number
            ) {
                return Err(ConcordError::UnsupportedOperation(format!(
                    "A primary identifier attribute must be of type 'string' or 'number' (attribute: '{}.{name}')",
                    self.describe()
                )));
            }
            if let Some(existing) = self.primary_identifier_attribute() {
                if existing.name() != name {
                    return Err(ConcordError::UnsupportedOperation(format!(
                        "The component '{}' already has a primary identifier attribute ('{}')",
                        self.describe(),
                        existing.name()
                    )));
                }
            }
        }

        let static_default = if self.is_class() {
            definition.default.as_ref().map(|default| default(self))
        } else {
            None
        };

        let mut slot = PropertySlot::declared(PropertyDefinition::Attribute(definition), exposure);
        if let Some(value) = static_default {
            slot.state = ValueState::Set(value);
        }
        self.insert_slot(name, slot);
        Ok(Attribute::new(self.clone(), name))
    }

    /// Define a method on a class or a prototype.
    pub fn define_method(&self, name: &str, options: MethodOptions) -> Result<Method, ConcordError> {
        self.check_property_definition(name)?;
        self.insert_slot(
            name,
            PropertySlot::declared(PropertyDefinition::Method, options.exposure),
        );
        Ok(Method::new(self.clone(), name))
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.chain_has_property(name)
    }

    pub fn get_property(&self, name: &str) -> Result<PropertyHandle, ConcordError> {
        let slot = self.slot(name)?;
        Ok(match *slot.definition {
            PropertyDefinition::Attribute(_) => PropertyHandle::Attribute(Attribute::new(self.clone(), name)),
            PropertyDefinition::Method => PropertyHandle::Method(Method::new(self.clone(), name)),
        })
    }

    /// Every property visible from this node, ordered by name.
    pub fn get_properties(&self) -> Result<Vec<PropertyHandle>, ConcordError> {
        self.chain_property_names()
            .iter()
            .map(|name| self.get_property(name))
            .collect()
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.has_property(name) && self.slot(name).is_ok_and(|slot| slot.is_attribute())
    }

    pub fn get_attribute(&self, name: &str) -> Result<Attribute, ConcordError> {
        match self.get_property(name)? {
            PropertyHandle::Attribute(attribute) => Ok(attribute),
            PropertyHandle::Method(_) => Err(ConcordError::PropertyKindMismatch {
                name: name.to_string(),
                component: self.describe(),
                expected: "an attribute",
            }),
        }
    }

    pub fn get_method(&self, name: &str) -> Result<Method, ConcordError> {
        match self.get_property(name)? {
            PropertyHandle::Method(method) => Ok(method),
            PropertyHandle::Attribute(_) => Err(ConcordError::PropertyKindMismatch {
                name: name.to_string(),
                component: self.describe(),
                expected: "a method",
            }),
        }
    }

    /// Attributes selected by `selector`, ordered by name.
    #[must_use]
    pub fn get_attributes(&self, selector: &AttributeSelector, set_only: bool) -> Vec<Attribute> {
        self.chain_property_names()
            .iter()
            .filter(|name| !selector.get(name).is_none())
            .filter(|name| self.slot(name).is_ok_and(|slot| slot.is_attribute()))
            .map(|name| Attribute::new(self.clone(), name))
            .filter(|attribute| !set_only || attribute.is_set())
            .collect()
    }

    /// Shorthand for `get_attribute(name)?.get_value()`.
    pub fn get_value(&self, name: &str) -> Result<Value, ConcordError> {
        self.get_attribute(name)?.get_value()
    }

    /// Shorthand for `get_attribute(name)?.set_value(value)`.
    pub fn set_value(&self, name: &str, value: impl Into<Value>) -> Result<(), ConcordError> {
        self.get_attribute(name)?.set_value(value)
    }

    /// The primary identifier attribute of an instance (or of a class's
    /// instances).
    #[must_use]
    pub fn primary_identifier_attribute(&self) -> Option<Attribute> {
        let target = if self.is_class() {
            self.class_prototype()?
        } else {
            self.clone()
        };
        target
            .chain_property_names()
            .into_iter()
            .map(|name| Attribute::new(target.clone(), &name))
            .find(Attribute::is_primary_identifier)
    }

    /// The primary identifier value of an instance, if set.
    #[must_use]
    pub fn primary_identifier_value(&self) -> Option<Value> {
        if !self.is_instance() {
            return None;
        }
        let attribute = self.primary_identifier_attribute()?;
        self.read_state(attribute.name()).ok().flatten()
    }

    // --- Selectors ------------------------------------------------------------

    /// Expand `selector` against the actual attribute values, descending
    /// into nested components.
    pub fn resolve_attribute_selector(
        &self,
        selector: &AttributeSelector,
        options: &ResolveOptions,
    ) -> Result<AttributeSelector, ConcordError> {
        self.resolve_selector_at(selector, options, 0)
    }

    fn resolve_selector_at(
        &self,
        selector: &AttributeSelector,
        options: &ResolveOptions,
        depth: usize,
    ) -> Result<AttributeSelector, ConcordError> {
        let mut resolved = AttributeSelector::empty();
        if selector.is_none() || depth > MAX_NESTING_DEPTH {
            return Ok(resolved);
        }

        if options.always_include_primary_identifier {
            if let Some(attribute) = self.primary_identifier_attribute() {
                resolved = resolved.set(attribute.name(), AttributeSelector::all());
            }
        }

        for attribute in self.get_attributes(selector, options.set_attributes_only) {
            if let Some(filter) = &options.filter {
                if !filter(&attribute) {
                    continue;
                }
            }
            let sub_selector = selector.get(attribute.name());
            let value = attribute.get_value_or_undefined()?;
            let nested = match &value {
                Value::Component(component) => {
                    component.resolve_selector_at(&sub_selector, options, depth + 1)?
                }
                Value::Array(items) if items.iter().any(|item| item.as_component().is_some()) => {
                    let mut union = AttributeSelector::empty();
                    for component in items.iter().filter_map(Value::as_component) {
                        let item = component.resolve_selector_at(&sub_selector, options, depth + 1)?;
                        union = union.add(&item);
                    }
                    union
                }
                _ => AttributeSelector::all(),
            };
            resolved = resolved.set(attribute.name(), nested);
        }
        Ok(resolved)
    }

    /// Visit every selected attribute, descending into nested components.
    /// `visit` receives each attribute with its path from `self`.
    pub fn traverse_attributes(
        &self,
        selector: &AttributeSelector,
        set_only: bool,
        visit: &mut dyn FnMut(&Attribute, &str) -> Result<(), ConcordError>,
    ) -> Result<(), ConcordError> {
        let mut seen = Vec::new();
        self.traverse_attributes_at(selector, set_only, "", &mut seen, visit)
    }

    fn traverse_attributes_at(
        &self,
        selector: &AttributeSelector,
        set_only: bool,
        prefix: &str,
        seen: &mut Vec<Component>,
        visit: &mut dyn FnMut(&Attribute, &str) -> Result<(), ConcordError>,
    ) -> Result<(), ConcordError> {
        if seen.iter().any(|component| component.ptr_eq(self)) {
            return Ok(());
        }
        seen.push(self.clone());

        for attribute in self.get_attributes(selector, set_only) {
            let path = if prefix.is_empty() {
                attribute.name().to_string()
            } else {
                format!("{prefix}.{}", attribute.name())
            };
            visit(&attribute, &path)?;

            let sub_selector = selector.get(attribute.name());
            match attribute.get_value_or_undefined()? {
                Value::Component(component) if component.is_instance() => {
                    component.traverse_attributes_at(&sub_selector, set_only, &path, seen, visit)?;
                }
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if let Some(component) = item.as_component().filter(|c| c.is_instance()) {
                            let item_path = format!("{path}[{index}]");
                            component.traverse_attributes_at(&sub_selector, set_only, &item_path, seen, visit)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // --- Validation -----------------------------------------------------------

    /// Run the validators of every selected attribute, nested components
    /// included.
    pub fn run_validators(&self, selector: &AttributeSelector) -> Result<Vec<ValidationFailure>, ConcordError> {
        let mut failures = Vec::new();
        self.traverse_attributes(selector, false, &mut |attribute, path| {
            for failure in attribute.run_validators()? {
                failures.push(ValidationFailure {
                    path: path.to_string(),
                    validator: failure.validator,
                });
            }
            Ok(())
        })?;
        Ok(failures)
    }

    /// Fail with [`ConcordError::ValidationFailed`] if any validator fails.
    pub fn validate(&self, selector: &AttributeSelector) -> Result<(), ConcordError> {
        let failures = self.run_validators(selector)?;
        if failures.is_empty() {
            return Ok(());
        }
        Err(ConcordError::ValidationFailed {
            component: self.describe(),
            failures: failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    #[must_use]
    pub fn is_valid(&self, selector: &AttributeSelector) -> bool {
        self.run_validators(selector)
            .is_ok_and(|failures| failures.is_empty())
    }
}
