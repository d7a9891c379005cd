//! # Introspection
//!
//! Describes the exposed surface of a component class as JSON, and
//! rebuilds a class from such a description:
//!
//! ```json
//! {
//!   "name": "Movie",
//!   "properties": [
//!     {"name": "limit", "type": "Attribute", "valueType": "number", "value": 100, "exposure": {"get": true}}
//!   ],
//!   "prototype": {
//!     "properties": [
//!       {"name": "id", "type": "Attribute", "valueType": "string", "primaryIdentifier": true, "exposure": {"get": true}},
//!       {"name": "play", "type": "Method", "exposure": {"call": true}}
//!     ]
//!   }
//! }
//! ```
//!
//! Only properties with a non-empty exposure are described. Static values
//! are included when the attribute is set and exposed for `get`.

use crate::attribute::{Attribute, AttributeOptions};
use crate::component::Component;
use crate::property::{Exposure, MethodOptions, PropertyHandle};
use crate::serialization::{deserialize, serialize, DeserializeOptions, SerializeOptions};
use crate::{ConcordError, ValueType};
use serde_json::{json, Map, Value as Json};
use tracing::debug;

const ATTRIBUTE_TYPE: &str = "Attribute";
const METHOD_TYPE: &str = "Method";

/// Describe the exposed properties of `class`.
pub fn introspect(class: &Component) -> Result<Json, ConcordError> {
    if !class.is_class() {
        return Err(ConcordError::UnsupportedOperation(format!(
            "Only component classes can be introspected (received: '{}')",
            class.component_type()
        )));
    }
    debug!(component = %class.name(), "introspect");

    let mut description = Map::new();
    description.insert("name".to_string(), Json::String(class.name()));

    let statics = describe_properties(class, class)?;
    if !statics.is_empty() {
        description.insert("properties".to_string(), Json::Array(statics));
    }

    let prototype = class.prototype()?;
    let instance_properties = describe_properties(class, &prototype)?;
    if !instance_properties.is_empty() {
        description.insert(
            "prototype".to_string(),
            json!({ "properties": instance_properties }),
        );
    }
    Ok(Json::Object(description))
}

fn describe_properties(class: &Component, node: &Component) -> Result<Vec<Json>, ConcordError> {
    let mut described = Vec::new();
    for property in node.get_properties()? {
        let Some(exposure) = property.as_property().exposure().filter(|e| !e.is_empty()) else {
            continue;
        };
        let mut entry = Map::new();
        entry.insert("name".to_string(), Json::String(property.name().to_string()));
        match &property {
            PropertyHandle::Attribute(attribute) => {
                entry.insert("type".to_string(), Json::String(ATTRIBUTE_TYPE.to_string()));
                describe_attribute(class, attribute, &exposure, &mut entry)?;
            }
            PropertyHandle::Method(_) => {
                entry.insert("type".to_string(), Json::String(METHOD_TYPE.to_string()));
            }
        }
        entry.insert(
            "exposure".to_string(),
            serde_json::to_value(&exposure)
                .map_err(|err| ConcordError::UnserializableValue(err.to_string()))?,
        );
        described.push(Json::Object(entry));
    }
    Ok(described)
}

fn describe_attribute(
    class: &Component,
    attribute: &Attribute,
    exposure: &Exposure,
    entry: &mut Map<String, Json>,
) -> Result<(), ConcordError> {
    let value_type = attribute.value_type();
    if value_type != ValueType::Any {
        entry.insert("valueType".to_string(), Json::String(value_type.to_string()));
    }
    if attribute.is_primary_identifier() {
        entry.insert("primaryIdentifier".to_string(), Json::Bool(true));
    }
    let readable = exposure.permission(Exposure::GET).is_some();
    if attribute.parent().is_class() && readable && attribute.is_set() {
        let options = SerializeOptions::new().with_known_components([class.clone()]);
        let value = serialize(&attribute.get_value()?, &options).into_sync()?;
        entry.insert("value".to_string(), value);
    }
    Ok(())
}

/// Rebuild a class from a description produced by [`introspect`].
///
/// Unknown keys in property descriptors are rejected.
pub fn unintrospect(description: &Json) -> Result<Component, ConcordError> {
    let map = description
        .as_object()
        .ok_or_else(|| ConcordError::InvalidPayload("a component description must be an object".into()))?;
    for key in map.keys() {
        if !matches!(key.as_str(), "name" | "properties" | "prototype") {
            return Err(ConcordError::UnknownOption {
                option: key.clone(),
                context: "component description".to_string(),
            });
        }
    }
    let name = map
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| ConcordError::InvalidPayload("a component description needs a name".into()))?;
    debug!(component = %name, "unintrospect");

    let class = Component::define(name)?;
    if let Some(properties) = map.get("properties") {
        define_properties(&class, properties)?;
    }
    if let Some(prototype) = map.get("prototype") {
        let properties = prototype
            .get("properties")
            .ok_or_else(|| ConcordError::InvalidPayload("a prototype description needs properties".into()))?;
        define_properties(&class.prototype()?, properties)?;
    }
    Ok(class)
}

fn define_properties(node: &Component, properties: &Json) -> Result<(), ConcordError> {
    let properties = properties
        .as_array()
        .ok_or_else(|| ConcordError::InvalidPayload("properties must be an array".into()))?;

    for property in properties {
        let mut descriptor = property
            .as_object()
            .cloned()
            .ok_or_else(|| ConcordError::InvalidPayload("a property description must be an object".into()))?;
        let name = match descriptor.remove("name") {
            Some(Json::String(name)) => name,
            _ => return Err(ConcordError::InvalidPayload("a property description needs a name".into())),
        };
        let kind = descriptor.remove("type");
        let value = descriptor.remove("value");

        match kind.as_ref().and_then(Json::as_str) {
            Some(ATTRIBUTE_TYPE) => {
                let options = AttributeOptions::from_json(&Json::Object(descriptor))?;
                let attribute = node.define_attribute(&name, options)?;
                if let Some(value) = value {
                    let value = deserialize(&value, &DeserializeOptions::new()).into_sync()?;
                    attribute.set_value(value)?;
                }
            }
            Some(METHOD_TYPE) => {
                node.define_method(&name, MethodOptions::from_json(&Json::Object(descriptor))?)?;
            }
            other => {
                return Err(ConcordError::InvalidPayload(format!(
                    "unsupported property type {other:?} (property: '{name}')"
                )));
            }
        }
    }
    Ok(())
}
