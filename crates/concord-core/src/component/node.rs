//! Node storage behind [`Component`] handles.
//!
//! Every class, prototype and instance is a node. A node owns a table of
//! property slots and may point at another node through `proto`:
//!
//! - a class points at its base class, or at its origin when it is a fork,
//! - a prototype points at the base class prototype, or its origin's,
//! - an instance points at its origin when it is a fork, otherwise at the
//!   prototype of its class.
//!
//! Slots are created lazily on the node that asks for them. A fresh slot
//! starts `Inherited` and reads through to the same slot on `proto` until
//! something is written locally.

use super::Component;
use super::fork::ForkScope;
use super::identity::IdentityMap;
use crate::attribute::AttributeDefinition;
use crate::property::Exposure;
use crate::{ConcordError, Value};
use std::cell::{Ref, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

pub(crate) type NodeCell = std::cell::RefCell<Node>;

// =============================================================================
// NODE
// =============================================================================

pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    /// Lookup fallback (base, prototype, or fork origin).
    pub(crate) proto: Option<Component>,
    /// Whether `proto` is a fork origin.
    pub(crate) forked: bool,
    pub(crate) properties: BTreeMap<String, PropertySlot>,
}

pub(crate) enum NodeKind {
    Class(ClassData),
    Prototype {
        class: Weak<NodeCell>,
    },
    Instance {
        class: Component,
        /// `None` defers to the fork origin.
        is_new: Option<bool>,
    },
}

pub(crate) struct ClassData {
    pub(crate) name: String,
    pub(crate) prototype: Component,
    pub(crate) identity_map: IdentityMap,
    /// Set on class forks made together with [`Component::fork_all`].
    pub(crate) fork_scope: Option<Rc<ForkScope>>,
}

// =============================================================================
// PROPERTY SLOTS
// =============================================================================

pub(crate) enum PropertyDefinition {
    Attribute(AttributeDefinition),
    Method,
}

#[derive(Clone)]
pub(crate) enum ValueState {
    Inherited,
    Unset,
    Set(Value),
}

#[derive(Clone)]
pub(crate) struct PropertySlot {
    pub(crate) definition: Rc<PropertyDefinition>,
    pub(crate) exposure: Option<Exposure>,
    pub(crate) state: ValueState,
    /// Node read through while the state is `Inherited`.
    pub(crate) origin: Option<Component>,
    /// Nested instances read through `origin` are forked before use.
    pub(crate) fork_on_read: bool,
}

impl PropertySlot {
    pub(crate) fn declared(definition: PropertyDefinition, exposure: Option<Exposure>) -> Self {
        Self {
            definition: Rc::new(definition),
            exposure,
            state: ValueState::Unset,
            origin: None,
            fork_on_read: false,
        }
    }

    pub(crate) fn derived_from(origin: &Component, source: &PropertySlot, fork_on_read: bool) -> Self {
        Self {
            definition: Rc::clone(&source.definition),
            exposure: source.exposure.clone(),
            state: ValueState::Inherited,
            origin: Some(origin.clone()),
            fork_on_read,
        }
    }

    pub(crate) fn is_attribute(&self) -> bool {
        matches!(*self.definition, PropertyDefinition::Attribute(_))
    }
}

// =============================================================================
// NODE ACCESS
// =============================================================================

impl Component {
    pub(crate) fn from_node(node: Node) -> Self {
        Self(Rc::new(std::cell::RefCell::new(node)))
    }

    pub(crate) fn node(&self) -> Ref<'_, Node> {
        self.0.borrow()
    }

    pub(crate) fn node_mut(&self) -> RefMut<'_, Node> {
        self.0.borrow_mut()
    }

    pub(crate) fn proto(&self) -> Option<Component> {
        self.node().proto.clone()
    }

    pub(crate) fn is_fork_node(&self) -> bool {
        self.node().forked
    }

    pub(crate) fn owns_property(&self, name: &str) -> bool {
        self.node().properties.contains_key(name)
    }

    /// Whether `name` is reachable through the lookup chain.
    pub(crate) fn chain_has_property(&self, name: &str) -> bool {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if node.owns_property(name) {
                return true;
            }
            current = node.proto();
        }
        false
    }

    /// Names of every property reachable through the lookup chain.
    pub(crate) fn chain_property_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            names.extend(node.node().properties.keys().cloned());
            current = node.proto();
        }
        names
    }

    /// Make sure this node has its own slot for `name`, deriving it from
    /// the lookup chain when needed.
    pub(crate) fn ensure_slot(&self, name: &str) -> Result<(), ConcordError> {
        if self.owns_property(name) {
            return Ok(());
        }
        let (proto, forked) = {
            let node = self.node();
            (node.proto.clone(), node.forked)
        };
        let Some(proto) = proto.filter(|proto| proto.chain_has_property(name)) else {
            return Err(ConcordError::PropertyNotFound {
                name: name.to_string(),
                component: self.describe(),
            });
        };
        proto.ensure_slot(name)?;
        let slot = {
            let proto_node = proto.node();
            let Some(source) = proto_node.properties.get(name) else {
                return Err(ConcordError::PropertyNotFound {
                    name: name.to_string(),
                    component: proto.describe(),
                });
            };
            PropertySlot::derived_from(&proto, source, forked)
        };
        self.node_mut().properties.insert(name.to_string(), slot);
        Ok(())
    }

    /// A copy of this node's own slot for `name`.
    pub(crate) fn slot(&self, name: &str) -> Result<PropertySlot, ConcordError> {
        self.ensure_slot(name)?;
        self.node()
            .properties
            .get(name)
            .cloned()
            .ok_or_else(|| ConcordError::PropertyNotFound {
                name: name.to_string(),
                component: self.describe(),
            })
    }

    pub(crate) fn insert_slot(&self, name: &str, slot: PropertySlot) {
        self.node_mut().properties.insert(name.to_string(), slot);
    }

    /// Read the stored value of `name`; `None` means unset.
    ///
    /// Inherited values come from the origin node. When the slot forks on
    /// read, nested instances are forked and the result is stored locally
    /// so that later reads see the same forks.
    pub(crate) fn read_state(&self, name: &str) -> Result<Option<Value>, ConcordError> {
        let slot = self.slot(name)?;
        match slot.state {
            ValueState::Set(value) => Ok(Some(value)),
            ValueState::Unset => Ok(None),
            ValueState::Inherited => {
                let Some(origin) = slot.origin else {
                    return Ok(None);
                };
                match origin.read_state(name)? {
                    Some(value) if slot.fork_on_read && super::fork::contains_instances(&value) => {
                        let forked = super::fork::fork_value(&value, self);
                        self.write_state(name, ValueState::Set(forked.clone()))?;
                        Ok(Some(forked))
                    }
                    other => Ok(other),
                }
            }
        }
    }

    pub(crate) fn write_state(&self, name: &str, state: ValueState) -> Result<(), ConcordError> {
        self.ensure_slot(name)?;
        if let Some(slot) = self.node_mut().properties.get_mut(name) {
            slot.state = state;
        }
        Ok(())
    }
}
