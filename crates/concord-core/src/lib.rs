//! # concord-core
//!
//! Component model and wire format for sharing object graphs across a
//! process boundary.
//!
//! A component class declares attributes (typed, optionally validated and
//! exposed) and methods. Instances carry values, a primary identifier and
//! an `is_new` flag. Component graphs can be:
//! - forked into isolated copies and merged back,
//! - serialized to JSON with `__component` tags and sentinels,
//! - deserialized in place, reusing identified instances through a
//!   per-class identity map.
//!
//! ## Architectural Constraints
//!
//! - Single-threaded: components are `Rc` handles, never shared across threads
//! - Deterministic: BTreeMap only, attributes are always walked in name order
//! - Sync first: walks only go async when an attribute filter does

// =============================================================================
// MODULES
// =============================================================================

pub mod attribute;
pub mod component;
pub mod introspection;
pub mod possibly;
pub mod primitives;
pub mod property;
pub mod registry;
pub mod selector;
pub mod serialization;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{ConcordError, ObjectMap, Value, ValueType};

// =============================================================================
// RE-EXPORTS: Component Model
// =============================================================================

pub use attribute::{Attribute, AttributeOptions};
pub use component::{Component, ResolveOptions, is_valid_component_name, is_valid_property_name};
pub use property::{Exposure, Method, MethodOptions, Permission, Property, PropertyHandle};
pub use registry::{ComponentGetter, ComponentRegistry};
pub use validation::{ValidationFailure, Validator};

// =============================================================================
// RE-EXPORTS: Selectors
// =============================================================================

pub use selector::{AttributeSelector, PickOptions, TraverseContext, TraverseOptions, pick, traverse};

// =============================================================================
// RE-EXPORTS: Wire Format
// =============================================================================

pub use introspection::{introspect, unintrospect};
pub use possibly::MaybeAsync;
pub use serialization::{
    AttributeFilter, DeserializeOptions, ScriptFunction, SerializeOptions, deserialize, serialize,
};
