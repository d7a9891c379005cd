//! # Component Registry
//!
//! Resolves wire type tags (`Movie`, `movie`) to component classes. Used as
//! the component getter during deserialization and as the list of known
//! components during serialization.

use crate::component::Component;
use crate::ConcordError;
use std::collections::BTreeMap;
use tracing::debug;

/// Resolves a type tag to a component class.
pub trait ComponentGetter {
    fn get_component(&self, type_tag: &str) -> Result<Component, ConcordError>;
}

impl<F> ComponentGetter for F
where
    F: Fn(&str) -> Result<Component, ConcordError>,
{
    fn get_component(&self, type_tag: &str) -> Result<Component, ConcordError> {
        self(type_tag)
    }
}

/// Component classes by name.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Component>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under its name.
    pub fn register(&mut self, class: &Component) -> Result<(), ConcordError> {
        if !class.is_class() {
            return Err(ConcordError::UnsupportedOperation(format!(
                "Only component classes can be registered (received: '{}')",
                class.component_type()
            )));
        }
        let name = class.name();
        if self.components.contains_key(&name) {
            return Err(ConcordError::DuplicateComponent(name));
        }
        debug!(component = %name, "register");
        self.components.insert(name, class.clone());
        Ok(())
    }

    /// Resolve a class name or an instance type tag.
    pub fn resolve(&self, type_tag: &str) -> Result<Component, ConcordError> {
        let mut chars = type_tag.chars();
        let name: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        self.components
            .get(&name)
            .cloned()
            .ok_or_else(|| ConcordError::ComponentNotFound(type_tag.to_string()))
    }

    #[must_use]
    pub fn known_components(&self) -> Vec<Component> {
        self.components.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// A registry of forks of every class, for isolated work on the same
    /// component set. The class forks share one scope, so an identified
    /// instance has a single fork however it is reached.
    #[must_use]
    pub fn fork(&self) -> ComponentRegistry {
        let classes: Vec<Component> = self.components.values().cloned().collect();
        Self {
            components: self
                .components
                .keys()
                .cloned()
                .zip(Component::fork_all(&classes))
                .collect(),
        }
    }
}

impl ComponentGetter for ComponentRegistry {
    fn get_component(&self, type_tag: &str) -> Result<Component, ConcordError> {
        self.resolve(type_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_class_and_instance_tags() {
        let movie = Component::define("Movie").expect("define");
        let mut registry = ComponentRegistry::new();
        registry.register(&movie).expect("register");

        assert!(registry.resolve("Movie").expect("class").ptr_eq(&movie));
        assert!(registry.resolve("movie").expect("instance tag").ptr_eq(&movie));
        assert!(matches!(
            registry.resolve("Film"),
            Err(ConcordError::ComponentNotFound(tag)) if tag == "Film"
        ));
    }

    #[test]
    fn rejects_duplicates_and_instances() {
        let movie = Component::define("Movie").expect("define");
        let mut registry = ComponentRegistry::new();
        registry.register(&movie).expect("register");

        let other = Component::define("Movie").expect("define");
        assert!(matches!(
            registry.register(&other),
            Err(ConcordError::DuplicateComponent(_))
        ));

        let instance = movie.instantiate(None, true).expect("instance");
        assert!(registry.register(&instance).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn forked_registry_holds_class_forks() {
        let movie = Component::define("Movie").expect("define");
        let mut registry = ComponentRegistry::new();
        registry.register(&movie).expect("register");

        let forked = registry.fork();
        let forked_movie = forked.resolve("Movie").expect("class");
        assert!(forked_movie.is_fork_of(&movie));
    }

    #[test]
    fn closures_are_getters() {
        let movie = Component::define("Movie").expect("define");
        let getter = move |tag: &str| {
            if tag.eq_ignore_ascii_case("movie") {
                Ok(movie.clone())
            } else {
                Err(ConcordError::ComponentNotFound(tag.to_string()))
            }
        };
        assert!(getter.get_component("movie").is_ok());
        assert!(getter.get_component("actor").is_err());
    }
}
