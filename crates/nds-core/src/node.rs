//! Grouping node.
//!
//! A [`Node`] owns its children in a name-ordered map. Children are added
//! while the tree is being built; once the root is initialized the map is
//! only read.

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::naming::NamingRole;
use crate::state_machine::{self, StateMachine};
use crate::types::{NodeType, State, Timestamp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A component with children.
pub struct Node {
    base: Base,
    node_type: NodeType,
    children: RwLock<BTreeMap<String, Arc<dyn Component>>>,
}

impl Node {
    /// Creates a generic node.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_type(name, NodeType::Generic)
    }

    /// Creates a node with a specific role.
    pub fn with_type(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            base: Base::new(name, NamingRole::Node(node_type)),
            node_type,
            children: RwLock::new(BTreeMap::new()),
        }
    }

    /// Node role used by the naming rules.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Adds a child and returns a typed handle to it.
    ///
    /// Fails when a sibling with the same name exists.
    pub fn add_child<C: Component>(&self, child: C) -> Result<Arc<C>> {
        self.add_child_arc(Arc::new(child))
    }

    /// Adds a child that is already shared.
    ///
    /// Fails when a sibling with the same name exists or when the child
    /// already belongs to another node.
    pub fn add_child_arc<C: Component>(&self, child: Arc<C>) -> Result<Arc<C>> {
        let name = child.base().name().to_string();
        let mut children = self.children.write();
        if children.contains_key(&name) {
            return Err(NdsError::DuplicateChild {
                parent: self.base.full_name(),
                child: name,
            });
        }
        child.base().mark_attached()?;
        let shared: Arc<dyn Component> = child.clone();
        children.insert(name, shared);
        Ok(child)
    }

    /// Child with the given raw name.
    pub fn child(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.children.read().get(name).cloned()
    }

    /// Snapshot of the children, ordered by name.
    pub fn children(&self) -> Vec<Arc<dyn Component>> {
        self.children.read().values().cloned().collect()
    }

    /// Highest-priority state among the descendants, with its timestamp.
    pub fn global_state(&self) -> (Timestamp, State) {
        let _guard = state_machine::state_lock();
        self.children_state(None)
    }

    /// Folds the state of every descendant, skipping `skip`.
    ///
    /// The caller holds the state lock.
    pub(crate) fn children_state(&self, skip: Option<&StateMachine>) -> (Timestamp, State) {
        self.children()
            .iter()
            .filter_map(|child| {
                if let Some(machine) = child.as_state_machine() {
                    if skip.is_some_and(|skip| std::ptr::eq(skip, machine)) {
                        return None;
                    }
                    return Some(machine.local_state_stamped());
                }
                child.as_node().map(|node| node.children_state(None))
            })
            .fold((Timestamp::default(), State::Unknown), max_state)
    }
}

/// Higher state wins; equal states keep the later timestamp.
pub(crate) fn max_state(current: (Timestamp, State), candidate: (Timestamp, State)) -> (Timestamp, State) {
    if (candidate.1, candidate.0) > (current.1, current.0) {
        candidate
    } else {
        current
    }
}

impl Component for Node {
    fn base(&self) -> &Base {
        &self.base
    }

    fn as_node(&self) -> Option<&Node> {
        Some(self)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.base.name())
            .field("type", &self.node_type)
            .field("children", &self.children.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_child_returns_handle() {
        let root = Node::new("root");
        let child = root.add_child(Node::with_type("ch0", NodeType::InputChannel)).unwrap();
        assert_eq!(child.node_type(), NodeType::InputChannel);
        assert!(root.child("ch0").is_some());
        assert!(root.child("ch1").is_none());
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let root = Node::new("root");
        root.add_child(Node::new("ch0")).unwrap();
        let err = root.add_child(Node::new("ch0")).unwrap_err();
        assert!(matches!(
            err,
            NdsError::DuplicateChild { ref parent, ref child } if parent == "root" && child == "ch0"
        ));
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_child_cannot_have_two_parents() {
        let first = Node::new("first");
        let second = Node::new("second");
        let shared = first.add_child(Node::new("shared")).unwrap();
        let err = second.add_child_arc(shared).unwrap_err();
        assert!(matches!(err, NdsError::AlreadyParented(_)));
        assert!(second.children().is_empty());
    }

    #[test]
    fn test_children_sorted_by_name() {
        let root = Node::new("root");
        root.add_child(Node::new("b")).unwrap();
        root.add_child(Node::new("a")).unwrap();
        let names: Vec<String> = root
            .children()
            .iter()
            .map(|child| child.base().name().to_string())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_global_state_without_machines_is_unknown() {
        let root = Node::new("root");
        root.add_child(Node::new("leaf")).unwrap();
        assert_eq!(root.global_state(), (Timestamp::default(), State::Unknown));
    }

    #[test]
    fn test_max_state_priority_then_time() {
        let on = (Timestamp::new(10, 0), State::On);
        let running_early = (Timestamp::new(5, 0), State::Running);
        let running_late = (Timestamp::new(20, 0), State::Running);
        assert_eq!(max_state(on, running_early), running_early);
        assert_eq!(max_state(running_early, on), running_early);
        assert_eq!(max_state(running_early, running_late), running_late);
        assert_eq!(max_state(running_late, running_early), running_late);
    }
}
