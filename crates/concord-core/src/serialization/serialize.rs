//! Component graph to JSON.

use super::{ScriptFunction, SerializeOptions};
use crate::attribute::Attribute;
use crate::component::Component;
use crate::possibly::{try_for_each, MaybeAsync};
use crate::primitives::{
    COMPONENT_KEY, DATE_KEY, FUNCTION_KEY, MAX_NESTING_DEPTH, MAX_SAFE_INTEGER, NEW_KEY,
    UNDEFINED_KEY,
};
use crate::selector::AttributeSelector;
use crate::{ConcordError, Value};
use chrono::SecondsFormat;
use serde_json::{Map, Value as Json};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

type Step<T> = MaybeAsync<Result<T, ConcordError>>;

/// State shared by one serialization pass.
struct Pass {
    options: SerializeOptions,
    /// Identified instances already emitted in full.
    emitted: RefCell<Vec<Component>>,
}

pub(super) fn serialize_root(value: &Value, options: &SerializeOptions) -> Step<Json> {
    debug!(value_type = %value.type_name(), "serialize");
    let pass = Rc::new(Pass {
        options: options.clone(),
        emitted: RefCell::new(Vec::new()),
    });
    let selector = options.attribute_selector.clone();
    serialize_value(value.clone(), selector, pass, 0)
}

fn serialize_value(value: Value, selector: AttributeSelector, pass: Rc<Pass>, depth: usize) -> Step<Json> {
    if depth > MAX_NESTING_DEPTH {
        return MaybeAsync::Ready(Err(ConcordError::UnserializableValue(
            "a value nested deeper than the maximum depth".to_string(),
        )));
    }
    match value {
        Value::Undefined => MaybeAsync::Ready(Ok(undefined_marker())),
        Value::Null => MaybeAsync::Ready(Ok(Json::Null)),
        Value::Boolean(b) => MaybeAsync::Ready(Ok(Json::Bool(b))),
        Value::Number(n) => MaybeAsync::Ready(number_to_json(n)),
        Value::String(s) => MaybeAsync::Ready(Ok(Json::String(s))),
        Value::Date(date) => {
            let mut map = Map::new();
            map.insert(
                DATE_KEY.to_string(),
                Json::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            MaybeAsync::Ready(Ok(Json::Object(map)))
        }
        Value::Array(items) => try_for_each(items, move |item| {
            serialize_value(item, selector.clone(), Rc::clone(&pass), depth + 1)
        })
        .map_ok(Json::Array),
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = map.into_iter().collect();
            try_for_each(entries, move |(key, item)| {
                serialize_value(item, AttributeSelector::all(), Rc::clone(&pass), depth + 1)
                    .map_ok(|json| (key, json))
            })
            .map_ok(|entries| Json::Object(entries.into_iter().collect()))
        }
        Value::Function(function) => serialize_function(&function, pass, depth),
        Value::Component(component) => serialize_component(&component, selector, pass, depth),
    }
}

fn undefined_marker() -> Json {
    let mut map = Map::new();
    map.insert(UNDEFINED_KEY.to_string(), Json::Bool(true));
    Json::Object(map)
}

/// Integral numbers within the safe range are written without a fraction.
fn number_to_json(n: f64) -> Result<Json, ConcordError> {
    if !n.is_finite() {
        return Err(ConcordError::UnserializableValue(format!("number ({n})")));
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Json::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| ConcordError::UnserializableValue(format!("number ({n})")))
}

fn serialize_function(function: &ScriptFunction, pass: Rc<Pass>, depth: usize) -> Step<Json> {
    let source = pass
        .options
        .serialize_functions
        .then(|| function.source().to_string());
    let entries: Vec<(String, Value)> = function
        .context()
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    try_for_each(entries, move |(key, value)| {
        serialize_value(value, AttributeSelector::all(), Rc::clone(&pass), depth + 1)
            .map_ok(|json| (key, json))
    })
    .map_ok(move |entries| {
        let mut map = Map::new();
        if let Some(source) = source {
            map.insert(FUNCTION_KEY.to_string(), Json::String(source));
        }
        map.extend(entries);
        Json::Object(map)
    })
}

fn serialize_component(
    component: &Component,
    selector: AttributeSelector,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Json> {
    if component.is_prototype() {
        return MaybeAsync::Ready(Err(ConcordError::UnserializableValue(format!(
            "prototype of '{}'",
            component.name()
        ))));
    }
    let name = component.name();
    if !pass
        .options
        .known_components
        .iter()
        .any(|known| known.name() == name)
    {
        return MaybeAsync::Ready(Err(ConcordError::UnknownComponent(component.component_type())));
    }

    let mut head = Map::new();
    head.insert(
        COMPONENT_KEY.to_string(),
        Json::String(component.component_type()),
    );

    if component.is_instance() {
        if let Some(identifier) = component.primary_identifier_value() {
            let already_emitted = pass
                .emitted
                .borrow()
                .iter()
                .any(|emitted| emitted.ptr_eq(component));
            if already_emitted {
                return serialize_reference(component, head, identifier, pass, depth);
            }
            pass.emitted.borrow_mut().push(component.clone());
        }
        if component.is_new() && pass.options.include_is_new_marks {
            head.insert(NEW_KEY.to_string(), Json::Bool(true));
        }
    }

    let attributes = component.get_attributes(&selector, false);
    try_for_each(attributes, move |attribute| {
        serialize_attribute(attribute, &selector, Rc::clone(&pass), depth)
    })
    .map_ok(move |entries| {
        head.extend(entries.into_iter().flatten());
        Json::Object(head)
    })
}

/// `{"__component": "movie", "id": ...}` for an instance emitted earlier in
/// the same pass.
fn serialize_reference(
    component: &Component,
    mut head: Map<String, Json>,
    identifier: Value,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Json> {
    let Some(attribute) = component.primary_identifier_attribute() else {
        return MaybeAsync::Ready(Ok(Json::Object(head)));
    };
    let name = attribute.name().to_string();
    serialize_value(identifier, AttributeSelector::all(), pass, depth + 1).map_ok(move |json| {
        head.insert(name, json);
        Json::Object(head)
    })
}

fn serialize_attribute(
    attribute: Attribute,
    selector: &AttributeSelector,
    pass: Rc<Pass>,
    depth: usize,
) -> Step<Option<(String, Json)>> {
    let sub_selector = selector.get(attribute.name());
    let keep = match &pass.options.attribute_filter {
        Some(filter) => filter(&attribute),
        None => MaybeAsync::Ready(attribute.is_set()),
    };

    keep.and_then(move |keep| {
        if !keep {
            return MaybeAsync::Ready(Ok(None));
        }
        let value = match attribute.get_value_or_undefined() {
            Ok(value) => value,
            Err(err) => return MaybeAsync::Ready(Err(err)),
        };
        let name = attribute.name().to_string();
        serialize_value(value, sub_selector, pass, depth + 1).map_ok(|json| Some((name, json)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeOptions;
    use crate::serialization::serialize;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn movie_class() -> Component {
        let movie = Component::define("Movie").expect("define");
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
            .define_attribute("sequel", AttributeOptions::new().with_type("Movie?"))
            .expect("sequel");
        movie
    }

    fn options(movie: &Component) -> SerializeOptions {
        SerializeOptions::new().with_known_components([movie.clone()])
    }

    #[test]
    fn plain_values() {
        let opts = SerializeOptions::new();
        let date = Utc.with_ymd_and_hms(2010, 7, 16, 0, 0, 0).single().expect("date");

        assert_eq!(serialize(&Value::from(3), &opts).into_sync().expect("int"), json!(3));
        assert_eq!(serialize(&Value::from(1.5), &opts).into_sync().expect("float"), json!(1.5));
        assert_eq!(
            serialize(&Value::Undefined, &opts).into_sync().expect("undefined"),
            json!({"__undefined": true})
        );
        assert_eq!(
            serialize(&Value::Date(date), &opts).into_sync().expect("date"),
            json!({"__date": "2010-07-16T00:00:00.000Z"})
        );
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let result = serialize(&Value::from(f64::NAN), &SerializeOptions::new()).into_sync();
        assert!(matches!(result, Err(ConcordError::UnserializableValue(_))));
    }

    #[test]
    fn instances_carry_type_and_new_mark() {
        let movie = movie_class();
        let instance = movie.instantiate(None, true).expect("instance");
        instance.set_value("title", "Inception").expect("title");

        let json = instance.serialize(&options(&movie)).into_sync().expect("serialize");
        assert_eq!(
            json,
            json!({"__component": "movie", "__new": true, "title": "Inception"})
        );

        let without_marks = options(&movie).with_is_new_marks(false);
        let json = instance.serialize(&without_marks).into_sync().expect("serialize");
        assert_eq!(json, json!({"__component": "movie", "title": "Inception"}));
    }

    #[test]
    fn explicit_undefined_is_kept() {
        let movie = movie_class();
        let instance = movie.instantiate(None, false).expect("instance");
        instance.set_value("rating", Value::Undefined).expect("rating");

        let json = instance.serialize(&options(&movie)).into_sync().expect("serialize");
        assert_eq!(
            json,
            json!({"__component": "movie", "rating": {"__undefined": true}})
        );
    }

    #[test]
    fn unknown_components_are_rejected() {
        let movie = movie_class();
        let instance = movie.instantiate(None, false).expect("instance");

        let result = instance.serialize(&SerializeOptions::new()).into_sync();
        assert!(matches!(result, Err(ConcordError::UnknownComponent(t)) if t == "movie"));
    }

    #[test]
    fn repeated_identified_instances_become_references() {
        let movie = movie_class();
        let instance = movie.instantiate(None, false).expect("instance");
        instance.set_value("id", "m1").expect("id");
        instance.set_value("title", "Loop").expect("title");
        instance.set_value("sequel", &instance).expect("self reference");

        let json = instance.serialize(&options(&movie)).into_sync().expect("serialize");
        assert_eq!(
            json,
            json!({
                "__component": "movie",
                "id": "m1",
                "title": "Loop",
                "sequel": {"__component": "movie", "id": "m1"}
            })
        );
    }

    #[test]
    fn selector_limits_attributes() {
        let movie = movie_class();
        let instance = movie.instantiate(None, false).expect("instance");
        instance.set_value("id", "m1").expect("id");
        instance.set_value("title", "Inception").expect("title");

        let opts = options(&movie).with_attribute_selector(AttributeSelector::from_names(["title"]));
        let json = instance.serialize(&opts).into_sync().expect("serialize");
        assert_eq!(json, json!({"__component": "movie", "title": "Inception"}));
    }

    #[test]
    fn filter_can_opt_in_unset_attributes() {
        let movie = movie_class();
        let instance = movie.instantiate(None, false).expect("instance");

        let opts = options(&movie)
            .with_attribute_filter(|attribute| MaybeAsync::Ready(attribute.name() == "title"));
        let json = instance.serialize(&opts).into_sync().expect("serialize");
        assert_eq!(
            json,
            json!({"__component": "movie", "title": {"__undefined": true}})
        );
    }

    #[test]
    fn functions_emit_source_only_when_enabled() {
        let function = ScriptFunction::compile("function sum(a, b) return a + b end").expect("compile");
        let value = Value::Function(function);

        let with_source = serialize(&value, &SerializeOptions::new().with_serialize_functions(true))
            .into_sync()
            .expect("serialize");
        assert_eq!(
            with_source,
            json!({"__function": "function sum(a, b) return a + b end"})
        );

        let without = serialize(&value, &SerializeOptions::new()).into_sync().expect("serialize");
        assert_eq!(without, json!({}));
    }

    #[test]
    fn classes_serialize_static_values() {
        let movie = movie_class();
        movie
            .define_attribute("limit", AttributeOptions::new().with_type("number").with_default_value(100))
            .expect("limit");

        let json = movie.serialize(&options(&movie)).into_sync().expect("serialize");
        assert_eq!(json, json!({"__component": "Movie", "limit": 100}));
    }
}
