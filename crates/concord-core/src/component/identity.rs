//! Per-class identity map.
//!
//! Maps primary identifier values to the live instance holding them. Entries
//! are weak so the map never keeps an instance alive; dead entries are
//! pruned when looked up.

use super::node::{NodeCell, NodeKind};
use super::Component;
use crate::{ConcordError, Value};
use std::collections::BTreeMap;
use std::rc::Weak;
use tracing::debug;

/// Key derived from a primary identifier value.
///
/// Strings and numbers never collide because the variant is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum IdentityKey {
    String(String),
    /// Bit pattern of the number, with `-0.0` folded into `0.0`.
    Number(u64),
}

impl IdentityKey {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) if n.is_finite() => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                Some(Self::Number(n.to_bits()))
            }
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct IdentityMap {
    entries: BTreeMap<IdentityKey, Weak<NodeCell>>,
}

impl IdentityMap {
    fn get(&mut self, key: &IdentityKey) -> Option<Component> {
        match self.entries.get(key).map(Weak::upgrade) {
            Some(Some(node)) => Some(Component(node)),
            Some(None) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&mut self, key: IdentityKey, component: &Component) {
        self.entries.insert(key, std::rc::Rc::downgrade(&component.0));
    }
}

impl Component {
    fn with_identity_map<R>(&self, f: impl FnOnce(&mut IdentityMap) -> R) -> Option<R> {
        match &mut self.node_mut().kind {
            NodeKind::Class(data) => Some(f(&mut data.identity_map)),
            _ => None,
        }
    }

    /// Find a live instance of this class by primary identifier value.
    ///
    /// A forked class that misses falls back to its origin's map and forks
    /// the instance it finds there, so each class fork sees its own copy.
    pub fn identity_lookup(&self, identifier: &Value) -> Option<Component> {
        let key = IdentityKey::from_value(identifier)?;
        if let Some(found) = self.with_identity_map(|map| map.get(&key)).flatten() {
            debug!(component = %self.describe(), identifier = ?key, "identity map hit");
            return Some(found);
        }
        if !self.is_class() || !self.is_fork_node() {
            return None;
        }
        let origin_instance = self.proto()?.identity_lookup(identifier)?;
        let forked = origin_instance.fork_with_class(self).ok()?;
        self.with_identity_map(|map| map.insert(key, &forked));
        Some(forked)
    }

    /// Record this instance under `identifier` in its class's map.
    pub(crate) fn register_identifier(&self, identifier: &Value) -> Result<(), ConcordError> {
        let key = IdentityKey::from_value(identifier).ok_or_else(|| ConcordError::UnexpectedValueType {
            component: self.describe(),
            attribute: "<primary identifier>".to_string(),
            expected: "string or number".to_string(),
            received: identifier.type_name(),
        })?;
        let class = self.class();
        let existing = class.with_identity_map(|map| map.get(&key)).flatten();
        if let Some(existing) = existing {
            if existing.ptr_eq(self) {
                return Ok(());
            }
            return Err(ConcordError::DuplicateIdentifier {
                component: class.name(),
                identifier: format!("{key:?}"),
            });
        }
        class.with_identity_map(|map| map.insert(key, self));
        Ok(())
    }
}
