//! JSON to component graph.

use super::{DeserializeOptions, ScriptFunction};
use crate::attribute::Attribute;
use crate::component::Component;
use crate::possibly::{try_for_each, MaybeAsync};
use crate::primitives::{
    COMPONENT_KEY, DATE_KEY, FUNCTION_KEY, MAX_NESTING_DEPTH, NEW_KEY, UNDEFINED_KEY,
};
use crate::{ConcordError, ObjectMap, Value};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use std::rc::Rc;
use tracing::{debug, trace};

type Step<T> = MaybeAsync<Result<T, ConcordError>>;

struct Pass {
    options: DeserializeOptions,
}

fn fail<T: 'static>(err: ConcordError) -> Step<T> {
    MaybeAsync::Ready(Err(err))
}

pub(super) fn deserialize_root(json: &Json, options: &DeserializeOptions) -> Step<Value> {
    debug!("deserialize");
    let pass = Rc::new(Pass {
        options: options.clone(),
    });
    deserialize_value(json.clone(), pass, 0)
}

pub(super) fn deserialize_into_root(
    target: &Component,
    json: &Json,
    options: &DeserializeOptions,
) -> Step<Component> {
    debug!(component = %target.component_type(), "deserialize in place");
    let Json::Object(map) = json else {
        return fail(ConcordError::InvalidPayload(format!(
            "expected an object to deserialize '{}'",
            target.component_type()
        )));
    };
    let pass = Rc::new(Pass {
        options: options.clone(),
    });
    deserialize_into(target.clone(), map.clone(), pass, 0)
}

fn deserialize_value(json: Json, pass: Rc<Pass>, depth: usize) -> Step<Value> {
    if depth > MAX_NESTING_DEPTH {
        return fail(ConcordError::InvalidPayload(
            "the payload is nested deeper than the maximum depth".to_string(),
        ));
    }
    match json {
        Json::Null => MaybeAsync::Ready(Ok(Value::Null)),
        Json::Bool(b) => MaybeAsync::Ready(Ok(Value::Boolean(b))),
        Json::Number(n) => MaybeAsync::Ready(
            n.as_f64()
                .map(Value::Number)
                .ok_or_else(|| ConcordError::InvalidPayload(format!("unsupported number {n}"))),
        ),
        Json::String(s) => MaybeAsync::Ready(Ok(Value::String(s))),
        Json::Array(items) => try_for_each(items, move |item| {
            deserialize_value(item, Rc::clone(&pass), depth + 1)
        })
        .map_ok(Value::Array),
        Json::Object(map) => deserialize_object(map, pass, depth),
    }
}

fn deserialize_object(map: Map<String, Json>, pass: Rc<Pass>, depth: usize) -> Step<Value> {
    if let Some(Json::String(tag)) = map.get(COMPONENT_KEY) {
        let tag = tag.clone();
        return deserialize_component(tag, map, pass, depth).map_ok(Value::Component);
    }
    if map.len() == 1 && map.get(UNDEFINED_KEY) == Some(&Json::Bool(true)) {
        return MaybeAsync::Ready(Ok(Value::Undefined));
    }
    if map.len() == 1 {
        if let Some(Json::String(date)) = map.get(DATE_KEY) {
            return MaybeAsync::Ready(parse_date(date).map(Value::Date));
        }
    }
    if pass.options.deserialize_functions {
        if let Some(Json::String(source)) = map.get(FUNCTION_KEY) {
            let source = source.clone();
            return deserialize_entries(map, pass, depth).and_then_ok(move |context| {
                MaybeAsync::Ready(ScriptFunction::with_context(source, context).map(Value::Function))
            });
        }
    }
    deserialize_entries(map, pass, depth).map_ok(Value::Object)
}

/// Deserialize every entry except the function sentinel.
fn deserialize_entries(map: Map<String, Json>, pass: Rc<Pass>, depth: usize) -> Step<ObjectMap> {
    let entries: Vec<(String, Json)> = map
        .into_iter()
        .filter(|(key, _)| !(pass.options.deserialize_functions && key == FUNCTION_KEY))
        .collect();
    try_for_each(entries, move |(key, item)| {
        deserialize_value(item, Rc::clone(&pass), depth + 1).map_ok(|value| (key, value))
    })
    .map_ok(|entries| entries.into_iter().collect())
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, ConcordError> {
    DateTime::parse_from_rfc3339(text)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| ConcordError::InvalidPayload(format!("invalid date '{text}': {err}")))
}

/// Resolve a tagged payload to a class or instance and apply it.
fn deserialize_component(
    tag: String,
    map: Map<String, Json>,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Component> {
    let Some(getter) = pass.options.component_getter.clone() else {
        return fail(ConcordError::MissingComponentGetter(tag));
    };
    let class = match getter.get_component(&tag) {
        Ok(component) => component.class(),
        Err(err) => return fail(err),
    };

    if tag.starts_with(|c: char| c.is_ascii_uppercase()) {
        return deserialize_into(class, map, pass, depth);
    }

    let is_new = map.get(NEW_KEY) == Some(&Json::Bool(true));
    let identifiers = identifier_of(&class, &map);
    let instance = match class.instantiate(identifiers.as_ref(), is_new) {
        Ok(instance) => instance,
        Err(err) => return fail(err),
    };
    if let Some(id) = identifiers.as_ref().and_then(|ids| ids.values().next()) {
        trace!(component = %tag, identifier = ?id, "resolved identified instance");
    }
    deserialize_into(instance, map, pass, depth)
}

/// The primary identifier entry of a payload, as an attribute map.
fn identifier_of(class: &Component, map: &Map<String, Json>) -> Option<ObjectMap> {
    let attribute = class.primary_identifier_attribute()?;
    let json = map.get(attribute.name())?;
    if !matches!(json, Json::String(_) | Json::Number(_)) {
        return None;
    }
    let mut identifiers = ObjectMap::new();
    identifiers.insert(attribute.name().to_string(), Value::from_plain_json(json));
    Some(identifiers)
}

/// Apply `map` to `target` in place.
fn deserialize_into(
    target: Component,
    map: Map<String, Json>,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Component> {
    if depth > MAX_NESTING_DEPTH {
        return fail(ConcordError::InvalidPayload(
            "the payload is nested deeper than the maximum depth".to_string(),
        ));
    }
    if let Some(tag) = map.get(COMPONENT_KEY) {
        let expected = target.component_type();
        if tag.as_str() != Some(expected.as_str()) {
            return fail(ConcordError::ComponentTypeMismatch {
                expected,
                received: tag.as_str().map_or_else(|| tag.to_string(), str::to_string),
            });
        }
    }

    if target.is_instance() {
        let marked_new = map.get(NEW_KEY) == Some(&Json::Bool(true));
        let result = if marked_new {
            if target.is_new() {
                Ok(())
            } else {
                Err(ConcordError::CannotMarkAsNew(target.component_type()))
            }
        } else {
            target.mark_as_not_new()
        };
        if let Err(err) = result {
            return fail(err);
        }
    }

    let entries: Vec<(String, Json)> = map
        .into_iter()
        .filter(|(key, _)| key != COMPONENT_KEY && key != NEW_KEY)
        .collect();
    let owner = target.clone();
    try_for_each(entries, move |(name, json)| {
        let attribute = match owner.get_attribute(&name) {
            Ok(attribute) => attribute,
            Err(err) => return fail(err),
        };
        let keep = match &pass.options.attribute_filter {
            Some(filter) => filter(&attribute),
            None => MaybeAsync::Ready(true),
        };
        let pass = Rc::clone(&pass);
        keep.and_then(move |keep| {
            if !keep {
                return MaybeAsync::Ready(Ok(()));
            }
            deserialize_attribute_value(&attribute, json, pass, depth)
                .and_then_ok(move |value| MaybeAsync::Ready(attribute.set_value(value)))
        })
    })
    .map_ok(move |_| target)
}

/// A nested payload for the instance an attribute already holds is applied
/// to that instance in place. Everything else is rebuilt.
fn deserialize_attribute_value(
    attribute: &Attribute,
    json: Json,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Value> {
    if let Json::Object(map) = &json {
        if let Some(current) = reusable_instance(attribute, map) {
            return deserialize_into(current, map.clone(), pass, depth + 1).map_ok(Value::Component);
        }
    }
    deserialize_value(json, pass, depth + 1)
}

fn reusable_instance(attribute: &Attribute, map: &Map<String, Json>) -> Option<Component> {
    let tag = map.get(COMPONENT_KEY)?.as_str()?;
    if !attribute.is_set() {
        return None;
    }
    let current = attribute.get_value().ok()?;
    let current = current.as_component()?;
    if !current.is_instance() || current.component_type() != tag {
        return None;
    }
    let identifier_matches = match (
        current.primary_identifier_attribute(),
        current.primary_identifier_value(),
    ) {
        (Some(attribute), Some(value)) => match map.get(attribute.name()) {
            Some(json) => Value::from_plain_json(json) == value,
            None => true,
        },
        _ => true,
    };
    identifier_matches.then(|| current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeOptions;
    use crate::registry::ComponentRegistry;
    use crate::serialization::deserialize;
    use serde_json::json;

    fn registry() -> ComponentRegistry {
        let movie = Component::define("Movie").expect("define");
        movie
            .define_attribute("limit", AttributeOptions::new().with_type("number").with_default_value(100))
            .expect("limit");
        let prototype = movie.prototype().expect("prototype");
        prototype
            .define_attribute("id", AttributeOptions::new().with_type("string").primary_identifier())
            .expect("id");
        prototype
            .define_attribute("title", AttributeOptions::new().with_type("string"))
            .expect("title");
        prototype
            .define_attribute("rating", AttributeOptions::new().with_type("number?"))
            .expect("rating");
        prototype
            .define_attribute("released", AttributeOptions::new().with_type("Date"))
            .expect("released");

        let mut registry = ComponentRegistry::new();
        registry.register(&movie).expect("register");
        registry
    }

    fn options(registry: &ComponentRegistry) -> DeserializeOptions {
        DeserializeOptions::new().with_component_getter(registry.clone())
    }

    #[test]
    fn plain_sentinels() {
        let opts = DeserializeOptions::new();
        assert_eq!(
            deserialize(&json!({"__undefined": true}), &opts).into_sync().expect("undefined"),
            Value::Undefined
        );
        let date = deserialize(&json!({"__date": "2010-07-16T00:00:00.000Z"}), &opts)
            .into_sync()
            .expect("date");
        assert!(matches!(date, Value::Date(_)));
        assert!(deserialize(&json!({"__date": "yesterday"}), &opts).into_sync().is_err());
    }

    #[test]
    fn instance_payload_builds_a_new_instance() {
        let registry = registry();
        let value = deserialize(
            &json!({"__component": "movie", "__new": true, "title": "Inception", "rating": {"__undefined": true}}),
            &options(&registry),
        )
        .into_sync()
        .expect("deserialize");

        let movie = value.as_component().expect("component");
        assert!(movie.is_new());
        assert_eq!(movie.get_value("title").expect("title"), Value::from("Inception"));
        assert_eq!(movie.get_value("rating").expect("rating"), Value::Undefined);
        assert!(!movie.get_attribute("id").expect("id").is_set());
    }

    #[test]
    fn identified_payloads_reuse_instances() {
        let registry = registry();
        let opts = options(&registry);

        let first = deserialize(&json!({"__component": "movie", "id": "m1", "title": "A"}), &opts)
            .into_sync()
            .expect("first");
        let second = deserialize(&json!({"__component": "movie", "id": "m1", "title": "B"}), &opts)
            .into_sync()
            .expect("second");

        let first = first.as_component().expect("component");
        assert!(first.ptr_eq(second.as_component().expect("component")));
        assert_eq!(first.get_value("title").expect("title"), Value::from("B"));
        assert!(!first.is_new());
    }

    #[test]
    fn class_payloads_apply_to_the_class() {
        let registry = registry();
        let value = deserialize(&json!({"__component": "Movie", "limit": 5}), &options(&registry))
            .into_sync()
            .expect("deserialize");

        let movie = value.as_component().expect("component");
        assert!(movie.is_class());
        assert_eq!(movie.get_value("limit").expect("limit"), Value::from(5));
    }

    #[test]
    fn marking_an_existing_instance_as_new_fails() {
        let registry = registry();
        let movie = registry.resolve("Movie").expect("class");
        let existing = movie.instantiate(None, false).expect("instance");

        let result = existing
            .deserialize(&json!({"__component": "movie", "__new": true}), &options(&registry))
            .into_sync();
        assert!(matches!(result, Err(ConcordError::CannotMarkAsNew(_))));
    }

    #[test]
    fn payload_without_new_mark_clears_it() {
        let registry = registry();
        let movie = registry.resolve("Movie").expect("class");
        let fresh = movie.instantiate(None, true).expect("instance");

        fresh
            .deserialize(&json!({"__component": "movie", "title": "Saved"}), &options(&registry))
            .into_sync()
            .expect("deserialize");
        assert!(!fresh.is_new());
    }

    #[test]
    fn unknown_attributes_are_rejected() {
        let registry = registry();
        let result = deserialize(&json!({"__component": "movie", "budget": 3}), &options(&registry))
            .into_sync();
        assert!(matches!(
            result,
            Err(ConcordError::PropertyNotFound { name, .. }) if name == "budget"
        ));
    }

    #[test]
    fn type_checks_apply_to_payload_values() {
        let registry = registry();
        let result = deserialize(&json!({"__component": "movie", "title": 7}), &options(&registry))
            .into_sync();
        assert!(matches!(result, Err(ConcordError::UnexpectedValueType { .. })));
    }

    #[test]
    fn function_payloads_stay_plain_unless_enabled() {
        let payload = json!({"__function": "function sum(a, b) return a + b end"});

        let plain = deserialize(&payload, &DeserializeOptions::new()).into_sync().expect("plain");
        assert!(matches!(plain, Value::Object(_)));

        let compiled = deserialize(&payload, &DeserializeOptions::new().with_deserialize_functions(true))
            .into_sync()
            .expect("compiled");
        let function = compiled.as_function().expect("function");
        assert_eq!(function.name(), "sum");
    }
}
