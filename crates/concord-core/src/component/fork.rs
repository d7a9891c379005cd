//! Fork, merge and deep clone.
//!
//! A fork is a new node whose lookup parent is its origin. It reads through
//! to the origin until written, and writes never reach the origin until the
//! fork is merged back. Nested instances read through a fork are forked in
//! turn, so mutating them leaves the origin's graph untouched.

use super::node::{Node, NodeCell, NodeKind, ValueState};
use super::Component;
use crate::primitives::MAX_NESTING_DEPTH;
use crate::{ConcordError, ObjectMap, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::debug;

/// Class forks made together. A nested instance read through any of them
/// is forked into the matching class fork, so one identifier maps to one
/// fork across the whole scope.
#[derive(Default)]
pub(crate) struct ForkScope {
    classes: RefCell<Vec<Weak<NodeCell>>>,
}

impl ForkScope {
    fn class_fork_of(&self, class: &Component) -> Option<Component> {
        self.classes
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .map(Component)
            .find(|fork| fork.is_fork_of(class))
    }
}

/// Whether `value` holds any component instance.
pub(crate) fn contains_instances(value: &Value) -> bool {
    match value {
        Value::Component(component) => component.is_instance(),
        Value::Array(items) => items.iter().any(contains_instances),
        Value::Object(map) => map.values().any(contains_instances),
        _ => false,
    }
}

/// Copy `value` read through `reader`, replacing every nested instance
/// with its fork in `reader`'s context.
pub(crate) fn fork_value(value: &Value, reader: &Component) -> Value {
    match value {
        Value::Component(component) if component.is_instance() => {
            Value::Component(fork_nested_instance(component, reader))
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| fork_value(item, reader)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), fork_value(value, reader)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Identified instances go through the class fork's identity map, so a
/// later lookup by identifier returns the same fork.
fn fork_nested_instance(instance: &Component, reader: &Component) -> Component {
    let Some(class_fork) = reader.class_fork_for(&instance.class()) else {
        return instance.fork();
    };
    if let Some(found) = instance
        .primary_identifier_value()
        .and_then(|identifier| class_fork.identity_lookup(&identifier))
    {
        return found;
    }
    instance
        .fork_with_class(&class_fork)
        .unwrap_or_else(|_| instance.fork())
}

impl Component {
    /// Create a fork of this component.
    ///
    /// Forking a class also forks its prototype, and instances created from
    /// the forked class see the forked class's static values.
    #[must_use]
    pub fn fork(&self) -> Component {
        debug!(component = %self.describe(), "fork");
        let kind = match &self.node().kind {
            NodeKind::Class(data) => {
                return Component::new_class(data.name.clone(), Some(self.clone()), true);
            }
            NodeKind::Prototype { class } => NodeKind::Prototype {
                class: class.clone(),
            },
            NodeKind::Instance { class, .. } => NodeKind::Instance {
                class: class.clone(),
                is_new: None,
            },
        };
        Component::from_node(Node {
            kind,
            proto: Some(self.clone()),
            forked: true,
            properties: BTreeMap::new(),
        })
    }

    /// Fork several classes into one scope.
    ///
    /// Nested instances read through forks of any of these classes are
    /// forked into the matching class fork instead of standing alone.
    #[must_use]
    pub fn fork_all(classes: &[Component]) -> Vec<Component> {
        let scope = Rc::new(ForkScope::default());
        classes
            .iter()
            .map(|class| {
                let fork = class.fork();
                if let NodeKind::Class(data) = &mut fork.node_mut().kind {
                    data.fork_scope = Some(Rc::clone(&scope));
                    scope.classes.borrow_mut().push(Rc::downgrade(&fork.0));
                }
                fork
            })
            .collect()
    }

    /// The fork of `class` that nested instances read through `self`
    /// belong to, if `self` lives in a forked context.
    fn class_fork_for(&self, class: &Component) -> Option<Component> {
        let own = self.class();
        if own.is_fork_of(class) {
            return Some(own);
        }
        let scope = match &own.node().kind {
            NodeKind::Class(data) => data.fork_scope.clone(),
            _ => None,
        }?;
        scope.class_fork_of(class)
    }

    /// Fork an instance so that it belongs to `class`, typically a fork of
    /// its own class.
    pub fn fork_with_class(&self, class: &Component) -> Result<Component, ConcordError> {
        if !self.is_instance() {
            return Err(ConcordError::UnsupportedOperation(format!(
                "Expected an instance, but received '{}'",
                self.describe()
            )));
        }
        if !class.is_class() {
            return Err(ConcordError::UnsupportedOperation(format!(
                "Expected a component class, but received '{}'",
                class.describe()
            )));
        }
        let forked = self.fork();
        if let NodeKind::Instance { class: owner, .. } = &mut forked.node_mut().kind {
            *owner = class.clone();
        }
        Ok(forked)
    }

    /// The node this component was forked from, if it is a fork.
    #[must_use]
    pub fn fork_origin(&self) -> Option<Component> {
        let node = self.node();
        if node.forked { node.proto.clone() } else { None }
    }

    /// Whether `self` was forked, directly or through other forks, from
    /// `other`. A component is not a fork of itself.
    #[must_use]
    pub fn is_fork_of(&self, other: &Component) -> bool {
        let mut current = self.fork_origin();
        while let Some(origin) = current {
            if origin.ptr_eq(other) {
                return true;
            }
            current = origin.fork_origin();
        }
        false
    }

    /// Apply the local changes of `fork` to `self`.
    ///
    /// Nested forks are merged into their own origins. `self` is returned
    /// for chaining.
    pub fn merge(&self, fork: &Component) -> Result<Component, ConcordError> {
        if !fork.is_fork_of(self) {
            return Err(ConcordError::NotAFork(self.describe()));
        }
        debug!(component = %self.describe(), "merge");

        let changed: Vec<(String, ValueState)> = fork
            .node()
            .properties
            .iter()
            .filter(|(_, slot)| slot.is_attribute() && !matches!(slot.state, ValueState::Inherited))
            .map(|(name, slot)| (name.clone(), slot.state.clone()))
            .collect();

        for (name, state) in changed {
            let attribute = self.get_attribute(&name)?;
            match state {
                ValueState::Set(value) => {
                    let merged = merge_value(&value, 0)?;
                    attribute.set_value(merged)?;
                }
                ValueState::Unset => attribute.unset_value()?,
                ValueState::Inherited => {}
            }
        }

        if self.is_instance() {
            let fork_is_new = fork.is_new();
            if let NodeKind::Instance { is_new, .. } = &mut self.node_mut().kind {
                *is_new = Some(fork_is_new);
            }
        }
        Ok(self.clone())
    }

    /// Deep copy an instance. Nested instances are cloned too; shared
    /// references in the source stay shared in the copy. Clones are not
    /// entered in the identity map.
    pub fn clone_deep(&self) -> Result<Component, ConcordError> {
        let mut clones = Vec::new();
        self.clone_deep_with(&mut clones, 0)
    }

    fn clone_deep_with(
        &self,
        clones: &mut Vec<(Component, Component)>,
        depth: usize,
    ) -> Result<Component, ConcordError> {
        if !self.is_instance() {
            return Err(ConcordError::UnsupportedOperation(format!(
                "Only instances can be cloned (component: '{}')",
                self.describe()
            )));
        }
        if let Some((_, copy)) = clones.iter().find(|(source, _)| source.ptr_eq(self)) {
            return Ok(copy.clone());
        }
        if depth > MAX_NESTING_DEPTH {
            return Err(ConcordError::UnsupportedOperation(
                "Maximum nesting depth exceeded while cloning".to_string(),
            ));
        }

        let copy = self.class().new_instance(self.is_new());
        clones.push((self.clone(), copy.clone()));

        for attribute in self.get_attributes(&crate::AttributeSelector::all(), false) {
            if attribute.has_getter() {
                continue;
            }
            if let Some(value) = self.read_state(attribute.name())? {
                let cloned = clone_value(&value, clones, depth + 1)?;
                copy.write_state(attribute.name(), ValueState::Set(cloned))?;
            }
        }
        Ok(copy)
    }
}

fn merge_value(value: &Value, depth: usize) -> Result<Value, ConcordError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ConcordError::UnsupportedOperation(
            "Maximum nesting depth exceeded while merging".to_string(),
        ));
    }
    Ok(match value {
        Value::Component(component) => match component.fork_origin() {
            Some(origin) if component.is_instance() => {
                Value::Component(origin.merge(component)?)
            }
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| merge_value(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), merge_value(item, depth + 1)?)))
                .collect::<Result<ObjectMap, ConcordError>>()?,
        ),
        other => other.clone(),
    })
}

fn clone_value(
    value: &Value,
    clones: &mut Vec<(Component, Component)>,
    depth: usize,
) -> Result<Value, ConcordError> {
    Ok(match value {
        Value::Component(component) if component.is_instance() => {
            Value::Component(component.clone_deep_with(clones, depth)?)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| clone_value(item, clones, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut copy = ObjectMap::new();
            for (key, item) in map {
                copy.insert(key.clone(), clone_value(item, clones, depth + 1)?);
            }
            Value::Object(copy)
        }
        other => other.clone(),
    })
}
