//! # Wire Scenario Tests (W0-W4)
//!
//! End-to-end behavior of the JSON wire format on a small movie model.
//!
//! ## Tiers
//! - W0: Round Trips
//! - W1: Identity And In-Place Updates
//! - W2: Forks
//! - W3: Rejected Payloads
//! - W4: Functions And Async Filters

use concord_core::{
    AttributeOptions, Component, ComponentRegistry, ConcordError, DeserializeOptions, MaybeAsync,
    ObjectMap, ScriptFunction, SerializeOptions, Value, deserialize, serialize,
};
use serde_json::json;

// =============================================================================
// FIXTURES
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Movie (identified), Director (identified) and Actor (anonymous).
/// Movies hold anonymous actors and identified writers in arrays.
fn model() -> ComponentRegistry {
    init_tracing();

    let director = Component::define("Director").expect("define");
    let prototype = director.prototype().expect("prototype");
    prototype
        .define_attribute("id", AttributeOptions::new().with_type("string").primary_identifier())
        .expect("id");
    prototype
        .define_attribute("name", AttributeOptions::new().with_type("string"))
        .expect("name");

    let actor = Component::define("Actor").expect("define");
    actor
        .prototype()
        .expect("prototype")
        .define_attribute("name", AttributeOptions::new().with_type("string"))
        .expect("name");

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
        .define_attribute("director", AttributeOptions::new().with_type("Director?"))
        .expect("director");
    prototype
        .define_attribute("actors", AttributeOptions::new().with_type("Actor[]"))
        .expect("actors");
    prototype
        .define_attribute("writers", AttributeOptions::new().with_type("Director[]"))
        .expect("writers");

    let mut registry = ComponentRegistry::new();
    for class in [&movie, &director, &actor] {
        registry.register(class).expect("register");
    }
    registry
}

fn values(entries: &[(&str, Value)]) -> ObjectMap {
    entries
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

fn write_options(registry: &ComponentRegistry) -> SerializeOptions {
    SerializeOptions::new().with_known_components(registry.known_components())
}

fn read_options(registry: &ComponentRegistry) -> DeserializeOptions {
    DeserializeOptions::new().with_component_getter(registry.clone())
}

fn read(registry: &ComponentRegistry, payload: &serde_json::Value) -> Result<Value, ConcordError> {
    deserialize(payload, &read_options(registry)).into_sync()
}

fn inception(registry: &ComponentRegistry) -> (Component, Component) {
    let nolan = registry
        .resolve("Director")
        .expect("class")
        .create(values(&[("id", "d1".into()), ("name", "Christopher Nolan".into())]))
        .expect("director");
    let movie = registry
        .resolve("Movie")
        .expect("class")
        .create(values(&[
            ("id", "m1".into()),
            ("title", "Inception".into()),
            ("director", Value::from(&nolan)),
            ("actors", Value::Array(Vec::new())),
        ]))
        .expect("movie");
    (movie, nolan)
}

// =============================================================================
// TIER W0: ROUND TRIPS
// =============================================================================

mod w0_round_trips {
    use super::*;

    /// W0.1: A new movie serializes with tags, new marks and set attributes only.
    #[test]
    fn new_movie_wire_form() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);

        let payload = movie.serialize(&write_options(&registry)).into_sync().expect("serialize");
        assert_eq!(
            payload,
            json!({
                "__component": "movie",
                "__new": true,
                "id": "m1",
                "title": "Inception",
                "director": {
                    "__component": "director",
                    "__new": true,
                    "id": "d1",
                    "name": "Christopher Nolan"
                },
                "actors": []
            })
        );
    }

    /// W0.2: Another process rebuilds an equal graph from the payload.
    #[test]
    fn payload_rebuilds_in_another_registry() {
        let source = model();
        let (movie, _nolan) = inception(&source);
        let payload = movie.serialize(&write_options(&source)).into_sync().expect("serialize");

        let target = model();
        let rebuilt = read(&target, &payload).expect("deserialize");
        let rebuilt = rebuilt.as_component().expect("component");

        assert!(rebuilt.is_new());
        assert_eq!(rebuilt.get_value("title").expect("title"), Value::from("Inception"));
        assert!(!rebuilt.ptr_eq(&movie));
        let again = rebuilt.serialize(&write_options(&target)).into_sync().expect("serialize");
        assert_eq!(again, payload);
    }

    /// W0.3: A shared identified component is written once, then referenced.
    #[test]
    fn shared_director_becomes_a_reference() {
        let registry = model();
        let (movie, nolan) = inception(&registry);
        let sequel = registry
            .resolve("Movie")
            .expect("class")
            .create(values(&[("id", "m2".into()), ("director", Value::from(&nolan))]))
            .expect("sequel");

        let both = Value::Array(vec![Value::from(&movie), Value::from(&sequel)]);
        let payload = serialize(&both, &write_options(&registry).with_is_new_marks(false))
            .into_sync()
            .expect("serialize");
        assert_eq!(payload[1]["director"], json!({"__component": "director", "id": "d1"}));

        let target = model();
        let rebuilt = read(&target, &payload).expect("deserialize");
        let movies = rebuilt.as_array().expect("array");
        let first = movies[0].as_component().expect("first").get_value("director").expect("director");
        let second = movies[1].as_component().expect("second").get_value("director").expect("director");
        assert_eq!(first, second);
    }

    /// W0.4: A class payload applies static values to the class itself.
    #[test]
    fn class_payload_applies_in_place() {
        let registry = model();
        let movie = registry.resolve("Movie").expect("class");
        movie
            .define_attribute("limit", AttributeOptions::new().with_type("number").with_default_value(100))
            .expect("limit");

        let result = read(&registry, &json!({"__component": "Movie", "limit": 25})).expect("deserialize");
        assert!(result.as_component().expect("class").ptr_eq(&movie));
        assert_eq!(movie.get_value("limit").expect("limit"), Value::from(25));
    }
}

// =============================================================================
// TIER W1: IDENTITY AND IN-PLACE UPDATES
// =============================================================================

mod w1_identity {
    use super::*;

    /// W1.1: A payload for a known identifier updates the live instance.
    #[test]
    fn identified_payload_updates_the_live_instance() {
        let registry = model();
        let (movie, nolan) = inception(&registry);

        let result = read(
            &registry,
            &json!({
                "__component": "movie",
                "id": "m1",
                "rating": 9,
                "director": {"__component": "director", "id": "d1", "name": "C. Nolan"}
            }),
        )
        .expect("deserialize");

        assert!(result.as_component().expect("component").ptr_eq(&movie));
        assert!(!movie.is_new());
        assert_eq!(movie.get_value("rating").expect("rating"), Value::from(9));
        assert_eq!(movie.get_value("director").expect("director"), Value::from(&nolan));
        assert_eq!(nolan.get_value("name").expect("name"), Value::from("C. Nolan"));
    }

    /// W1.2: Array elements are rebuilt, never matched against the old ones.
    #[test]
    fn array_elements_are_rebuilt() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        let payload = json!({
            "__component": "movie",
            "id": "m1",
            "actors": [{"__component": "actor", "name": "Leonardo DiCaprio"}]
        });

        read(&registry, &payload).expect("first");
        let first = movie.get_value("actors").expect("actors");
        read(&registry, &payload).expect("second");
        let second = movie.get_value("actors").expect("actors");

        let first = first.as_array().expect("array")[0].as_component().expect("actor").clone();
        let second = second.as_array().expect("array")[0].as_component().expect("actor").clone();
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.get_value("name").expect("name"), Value::from("Leonardo DiCaprio"));
    }

    /// W1.3: Undefined sentinels unset nothing; they assign `undefined`.
    #[test]
    fn undefined_sentinel_assigns_undefined() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        movie.set_value("rating", 8).expect("rating");

        read(&registry, &json!({"__component": "movie", "id": "m1", "rating": {"__undefined": true}}))
            .expect("deserialize");
        assert!(movie.get_attribute("rating").expect("rating").is_set());
        assert_eq!(movie.get_value("rating").expect("rating"), Value::Undefined);
    }

    /// W1.4: Identified array elements still resolve through the identity map.
    #[test]
    fn identified_array_elements_resolve_through_the_identity_map() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        let payload = json!({
            "__component": "movie",
            "id": "m1",
            "writers": [{"__component": "director", "id": "d2", "name": "Jonathan Nolan"}]
        });

        read(&registry, &payload).expect("first");
        let first = movie.get_value("writers").expect("writers");
        read(&registry, &payload).expect("second");
        let second = movie.get_value("writers").expect("writers");

        let first = first.as_array().expect("array")[0].as_component().expect("writer").clone();
        let second = second.as_array().expect("array")[0].as_component().expect("writer").clone();
        assert!(first.ptr_eq(&second));
    }
}

// =============================================================================
// TIER W2: FORKS
// =============================================================================

mod w2_forks {
    use super::*;

    /// W2.1: Payloads read into a forked registry never touch the originals.
    #[test]
    fn forked_registry_isolates_updates() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        let forked = registry.fork();

        let result = read(&forked, &json!({"__component": "movie", "id": "m1", "title": "Inception (cut)"}))
            .expect("deserialize");
        let fork = result.as_component().expect("component").clone();

        assert!(fork.is_fork_of(&movie));
        assert_eq!(fork.get_value("title").expect("title"), Value::from("Inception (cut)"));
        assert_eq!(movie.get_value("title").expect("title"), Value::from("Inception"));

        movie.merge(&fork).expect("merge");
        assert_eq!(movie.get_value("title").expect("title"), Value::from("Inception (cut)"));
    }

    /// W2.2: Inside a forked registry, an identifier maps to one fork whether
    /// it is reached through a parent or looked up directly.
    #[test]
    fn forked_registry_keeps_one_fork_per_identifier() {
        let registry = model();
        let (movie, nolan) = inception(&registry);
        let forked = registry.fork();

        let result = read(
            &forked,
            &json!({
                "__component": "movie",
                "id": "m1",
                "director": {"__component": "director", "id": "d1", "name": "C. Nolan"}
            }),
        )
        .expect("movie");
        let movie_fork = result.as_component().expect("component").clone();
        let via_movie = movie_fork.get_value("director").expect("director");
        let via_movie = via_movie.as_component().expect("director").clone();

        let looked_up = read(&forked, &json!({"__component": "director", "id": "d1"})).expect("director");
        let looked_up = looked_up.as_component().expect("director").clone();

        assert!(via_movie.ptr_eq(&looked_up));
        assert!(via_movie.is_fork_of(&nolan));
        assert_eq!(looked_up.get_value("name").expect("name"), Value::from("C. Nolan"));
        assert_eq!(nolan.get_value("name").expect("name"), Value::from("Christopher Nolan"));

        movie.merge(&movie_fork).expect("merge");
        assert_eq!(nolan.get_value("name").expect("name"), Value::from("C. Nolan"));
    }
}

// =============================================================================
// TIER W3: REJECTED PAYLOADS
// =============================================================================

mod w3_rejections {
    use super::*;

    /// W3.1: An existing non-new instance cannot be marked new again.
    #[test]
    fn new_mark_on_existing_instance() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        movie.mark_as_not_new().expect("mark");

        let result = read(&registry, &json!({"__component": "movie", "__new": true, "id": "m1"}));
        assert!(matches!(result, Err(ConcordError::CannotMarkAsNew(_))));
    }

    /// W3.2: A payload tag must match the component it is applied to.
    #[test]
    fn mismatched_tag() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);

        let result = movie
            .deserialize(&json!({"__component": "director"}), &read_options(&registry))
            .into_sync();
        assert!(matches!(
            result,
            Err(ConcordError::ComponentTypeMismatch { expected, received })
                if expected == "movie" && received == "director"
        ));
    }

    /// W3.3: Unknown attributes and mistyped values are rejected.
    #[test]
    fn unknown_attribute_and_wrong_type() {
        let registry = model();

        let unknown = read(&registry, &json!({"__component": "movie", "budget": 160}));
        assert!(matches!(unknown, Err(ConcordError::PropertyNotFound { name, .. }) if name == "budget"));

        let mistyped = read(&registry, &json!({"__component": "movie", "title": 42}));
        assert!(matches!(mistyped, Err(ConcordError::UnexpectedValueType { .. })));
    }

    /// W3.4: Component payloads need a getter, and the getter must know the tag.
    #[test]
    fn getter_is_required_and_must_resolve() {
        let registry = model();

        let missing = deserialize(&json!({"__component": "movie"}), &DeserializeOptions::new()).into_sync();
        assert!(matches!(missing, Err(ConcordError::MissingComponentGetter(tag)) if tag == "movie"));

        let unknown = read(&registry, &json!({"__component": "studio"}));
        assert!(matches!(unknown, Err(ConcordError::ComponentNotFound(_))));
    }

    /// W3.5: Only known components can be written.
    #[test]
    fn unknown_component_is_not_serialized() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);

        let result = movie.serialize(&SerializeOptions::new()).into_sync();
        assert!(matches!(result, Err(ConcordError::UnknownComponent(_))));
    }
}

// =============================================================================
// TIER W4: FUNCTIONS AND ASYNC FILTERS
// =============================================================================

mod w4_functions_and_filters {
    use super::*;

    /// W4.1: A function travels as source and runs on the other side.
    #[test]
    fn function_round_trip() {
        let sum = ScriptFunction::compile("function sum(a, b) return a + b end").expect("compile");
        assert_eq!(sum.name(), "sum");

        let payload = serialize(&Value::from(sum), &SerializeOptions::new().with_serialize_functions(true))
            .into_sync()
            .expect("serialize");
        assert_eq!(payload, json!({"__function": "function sum(a, b) return a + b end"}));

        let restored = deserialize(&payload, &DeserializeOptions::new().with_deserialize_functions(true))
            .into_sync()
            .expect("deserialize");
        let restored = restored.as_function().expect("function");
        assert_eq!(
            restored.call(&[Value::from(1), Value::from(2)]).expect("call"),
            Value::from(3)
        );
    }

    /// W4.2: Without the option, a function payload stays a plain object.
    #[test]
    fn function_payload_stays_plain_by_default() {
        let payload = json!({"__function": "function sum(a, b) return a + b end"});
        let value = deserialize(&payload, &DeserializeOptions::new()).into_sync().expect("deserialize");
        assert!(value.as_object().is_some());
    }

    /// W4.3: An async filter defers the whole walk, which then completes.
    #[test]
    fn async_filter_defers_serialization() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        let options = write_options(&registry)
            .with_is_new_marks(false)
            .with_attribute_filter(|attribute| {
                let keep = attribute.is_set() && attribute.name() != "director";
                MaybeAsync::deferred(async move { keep })
            });

        assert!(matches!(
            movie.serialize(&options).into_sync(),
            Err(ConcordError::AsyncRequired)
        ));

        let payload = futures::executor::block_on(movie.serialize(&options).resolve()).expect("serialize");
        assert_eq!(
            payload,
            json!({"__component": "movie", "id": "m1", "title": "Inception", "actors": []})
        );
    }

    /// W4.4: An async filter on the read side skips what it rejects.
    #[test]
    fn async_filter_on_deserialization() {
        let registry = model();
        let (movie, _nolan) = inception(&registry);
        let options = read_options(&registry).with_attribute_filter(|attribute| {
            let keep = attribute.name() != "title";
            MaybeAsync::deferred(async move { keep })
        });

        let payload = json!({"__component": "movie", "id": "m1", "title": "Ignored", "rating": 7});
        futures::executor::block_on(deserialize(&payload, &options).resolve()).expect("deserialize");

        assert_eq!(movie.get_value("title").expect("title"), Value::from("Inception"));
        assert_eq!(movie.get_value("rating").expect("rating"), Value::from(7));
    }

    /// W4.5: Captured context travels next to the source and is visible again
    /// after the round trip.
    #[test]
    fn function_context_round_trip() {
        let mut context = ObjectMap::new();
        context.insert("offset".to_string(), Value::from(10));
        let shift = ScriptFunction::with_context("function shift(n) return n + offset end", context)
            .expect("compile");

        let payload = serialize(&Value::from(shift), &SerializeOptions::new().with_serialize_functions(true))
            .into_sync()
            .expect("serialize");
        assert_eq!(
            payload,
            json!({"__function": "function shift(n) return n + offset end", "offset": 10})
        );

        let restored = deserialize(&payload, &DeserializeOptions::new().with_deserialize_functions(true))
            .into_sync()
            .expect("deserialize");
        let restored = restored.as_function().expect("function");
        assert_eq!(restored.name(), "shift");
        assert_eq!(restored.context().get("offset"), Some(&Value::from(10)));
        assert_eq!(restored.call(&[Value::from(5)]).expect("call"), Value::from(15));
    }
}
