//! # Wire Serialization
//!
//! Converts [`Value`]s (components included) to and from the JSON wire
//! format:
//!
//! ```json
//! {
//!   "__component": "movie",
//!   "__new": true,
//!   "id": "m1",
//!   "title": "Inception",
//!   "rating": {"__undefined": true},
//!   "released": {"__date": "2010-07-16T00:00:00.000Z"},
//!   "director": {"__component": "director", "id": "d1"}
//! }
//! ```
//!
//! Walks produce a [`MaybeAsync`]: they stay synchronous unless an
//! attribute filter answers asynchronously.
//!
//! ## Structure
//!
//! - `serialize`: component graph to JSON
//! - `deserialize`: JSON to component graph
//! - `function`: [`ScriptFunction`]

mod deserialize;
mod function;
mod serialize;

pub use function::ScriptFunction;

use crate::attribute::Attribute;
use crate::component::Component;
use crate::possibly::MaybeAsync;
use crate::registry::ComponentGetter;
use crate::selector::AttributeSelector;
use crate::{ConcordError, Value};
use std::fmt;
use std::rc::Rc;

/// Decides per attribute whether it takes part in a walk.
pub type AttributeFilter = Rc<dyn Fn(&Attribute) -> MaybeAsync<bool>>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Options for [`serialize`].
#[derive(Clone)]
pub struct SerializeOptions {
    /// Component classes allowed on the wire, matched by name.
    pub known_components: Vec<Component>,
    pub attribute_selector: AttributeSelector,
    /// Unset attributes it accepts are emitted as `{"__undefined": true}`.
    pub attribute_filter: Option<AttributeFilter>,
    /// Emit function source under `__function`.
    pub serialize_functions: bool,
    /// Emit `__new` for new instances.
    pub include_is_new_marks: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            known_components: Vec::new(),
            attribute_selector: AttributeSelector::all(),
            attribute_filter: None,
            serialize_functions: false,
            include_is_new_marks: true,
        }
    }
}

impl fmt::Debug for SerializeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializeOptions")
            .field("known_components", &self.known_components)
            .field("attribute_selector", &self.attribute_selector)
            .field("has_attribute_filter", &self.attribute_filter.is_some())
            .field("serialize_functions", &self.serialize_functions)
            .field("include_is_new_marks", &self.include_is_new_marks)
            .finish()
    }
}

impl SerializeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_known_components<I>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = Component>,
    {
        self.known_components.extend(components);
        self
    }

    #[must_use]
    pub fn with_attribute_selector(mut self, selector: AttributeSelector) -> Self {
        self.attribute_selector = selector;
        self
    }

    #[must_use]
    pub fn with_attribute_filter(
        mut self,
        filter: impl Fn(&Attribute) -> MaybeAsync<bool> + 'static,
    ) -> Self {
        self.attribute_filter = Some(Rc::new(filter));
        self
    }

    #[must_use]
    pub fn with_serialize_functions(mut self, enabled: bool) -> Self {
        self.serialize_functions = enabled;
        self
    }

    #[must_use]
    pub fn with_is_new_marks(mut self, enabled: bool) -> Self {
        self.include_is_new_marks = enabled;
        self
    }
}

/// Options for [`deserialize`].
#[derive(Clone, Default)]
pub struct DeserializeOptions {
    pub component_getter: Option<Rc<dyn ComponentGetter>>,
    pub attribute_filter: Option<AttributeFilter>,
    /// Compile `__function` payloads into [`ScriptFunction`]s. Otherwise
    /// they stay plain objects.
    pub deserialize_functions: bool,
}

impl fmt::Debug for DeserializeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeserializeOptions")
            .field("has_component_getter", &self.component_getter.is_some())
            .field("has_attribute_filter", &self.attribute_filter.is_some())
            .field("deserialize_functions", &self.deserialize_functions)
            .finish()
    }
}

impl DeserializeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_component_getter(mut self, getter: impl ComponentGetter + 'static) -> Self {
        self.component_getter = Some(Rc::new(getter));
        self
    }

    #[must_use]
    pub fn with_attribute_filter(
        mut self,
        filter: impl Fn(&Attribute) -> MaybeAsync<bool> + 'static,
    ) -> Self {
        self.attribute_filter = Some(Rc::new(filter));
        self
    }

    #[must_use]
    pub fn with_deserialize_functions(mut self, enabled: bool) -> Self {
        self.deserialize_functions = enabled;
        self
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Serialize a value to its wire form.
pub fn serialize(
    value: &Value,
    options: &SerializeOptions,
) -> MaybeAsync<Result<serde_json::Value, ConcordError>> {
    serialize::serialize_root(value, options)
}

/// Deserialize a wire payload into a value, resolving components through
/// the configured getter.
pub fn deserialize(
    json: &serde_json::Value,
    options: &DeserializeOptions,
) -> MaybeAsync<Result<Value, ConcordError>> {
    deserialize::deserialize_root(json, options)
}

impl Component {
    /// Serialize this component.
    pub fn serialize(
        &self,
        options: &SerializeOptions,
    ) -> MaybeAsync<Result<serde_json::Value, ConcordError>> {
        serialize(&Value::Component(self.clone()), options)
    }

    /// Apply a payload to this component in place.
    ///
    /// The payload's `__component` tag, if present, must match this
    /// component's type.
    pub fn deserialize(
        &self,
        json: &serde_json::Value,
        options: &DeserializeOptions,
    ) -> MaybeAsync<Result<Component, ConcordError>> {
        deserialize::deserialize_into_root(self, json, options)
    }
}
