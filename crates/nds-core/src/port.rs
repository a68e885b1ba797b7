//! Port: the node that owns a backend interface.
//!
//! Every PV must live below a port. At initialization the port asks the
//! backend for an [`Interface`] keyed by its full name; the PVs below it
//! register through that interface and push their values to it.

use crate::backend::Interface;
use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::node::Node;
use crate::pv::Pv;
use crate::types::{NodeType, Timestamp};
use crate::value::PvValue;
use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::Arc;

/// A node bound to one backend interface.
pub struct Port {
    node: Node,
    interface: RwLock<Option<Box<dyn Interface>>>,
}

impl Port {
    /// Creates a generic port.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_type(name, NodeType::Generic)
    }

    /// Creates a port with a specific node role.
    pub fn with_type(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            node: Node::with_type(name, node_type),
            interface: RwLock::new(None),
        }
    }

    /// True while the backend interface exists.
    pub fn has_interface(&self) -> bool {
        self.interface.read().is_some()
    }

    /// Publishes a value on behalf of a PV below this port.
    pub fn push(&self, pv: &dyn Pv, timestamp: Timestamp, value: &PvValue) -> Result<()> {
        self.with_interface(|interface| interface.push(pv, timestamp, value))
    }

    pub(crate) fn register_pv(&self, pv: Arc<dyn Pv>) -> Result<()> {
        self.with_interface(|interface| interface.register_pv(pv))
    }

    pub(crate) fn deregister_pv(&self, pv: &dyn Pv) -> Result<()> {
        self.with_interface(|interface| interface.deregister_pv(pv))
    }

    fn with_interface<R>(&self, action: impl FnOnce(&dyn Interface) -> Result<R>) -> Result<R> {
        let interface = self.interface.read();
        match interface.as_deref() {
            Some(interface) => action(interface),
            None => Err(NdsError::NotInitialized(self.base().full_name())),
        }
    }
}

impl Deref for Port {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Component for Port {
    fn base(&self) -> &Base {
        self.node.base()
    }

    fn as_node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn as_port(&self) -> Option<&Port> {
        Some(self)
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        let mut interface = self.interface.write();
        if interface.is_none() {
            *interface = Some(factory.backend().new_interface(&self.base().full_name())?);
        }
        Ok(())
    }

    fn finish_initialize(&self) -> Result<()> {
        self.with_interface(|interface| interface.registration_terminated())
    }

    fn finish_deinitialize(&self) -> Result<()> {
        self.interface.write().take();
        Ok(())
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("node", &self.node)
            .field("has_interface", &self.has_interface())
            .finish()
    }
}
