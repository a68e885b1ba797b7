//! The component trait and the initialization walk.
//!
//! Everything that lives in a device tree (nodes, ports, PVs, state machines,
//! data acquisition nodes) implements [`Component`]. Parents own their
//! children through `Arc<dyn Component>`; children point back with a `Weak`.
//!
//! A tree is pure data until its root is initialized:
//!
//! ```text
//! root.initialize("dev0", &factory)
//!   1. attach: every child learns its parent and level
//!   2. for each component, parents first:
//!        compute and cache names      (needs the parent's names)
//!        register commands
//!        initialize_self              (port: create interface, PV: register)
//!        recurse into children
//!        finish_initialize            (port: registration terminated)
//!   3. the factory holds the root under "dev0"
//! ```
//!
//! `deinitialize` walks the same order and undoes each step.

use crate::backend::CommandDefinition;
use crate::base::Base;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::node::Node;
use crate::port::Port;
use crate::state_machine::StateMachine;
use crate::types::{LogLevel, State, Timestamp};
use crate::{node_debug, node_error};
use std::sync::Arc;

/// A member of the device tree.
pub trait Component: Send + Sync + 'static {
    /// Identity and settings shared by all components.
    fn base(&self) -> &Base;

    /// Children container, for components that have children.
    fn as_node(&self) -> Option<&Node> {
        None
    }

    /// Port view, for components owning a backend interface.
    fn as_port(&self) -> Option<&Port> {
        None
    }

    /// State machine view.
    fn as_state_machine(&self) -> Option<&StateMachine> {
        None
    }

    /// Called once the names are cached, before the children.
    #[doc(hidden)]
    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        let _ = factory;
        Ok(())
    }

    /// Called after all the children have been initialized.
    #[doc(hidden)]
    fn finish_initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called before the children are deinitialized.
    #[doc(hidden)]
    fn deinitialize_self(&self) -> Result<()> {
        Ok(())
    }

    /// Called after all the children have been deinitialized.
    #[doc(hidden)]
    fn finish_deinitialize(&self) -> Result<()> {
        Ok(())
    }

    /// Sets the log level of this component and all its descendants.
    fn set_log_level(&self, level: LogLevel) {
        self.base().set_own_log_level(level);
        if let Some(node) = self.as_node() {
            for child in node.children() {
                child.set_log_level(level);
            }
        }
    }

    /// Highest-priority state in this subtree with its timestamp.
    ///
    /// Components without state machines report `Unknown`.
    fn global_state(&self) -> (Timestamp, State) {
        if let Some(machine) = self.as_state_machine() {
            return machine.global_state_stamped();
        }
        match self.as_node() {
            Some(node) => node.global_state(),
            None => (Timestamp::default(), State::Unknown),
        }
    }
}

/// Root-level lifecycle operations.
pub trait ComponentExt {
    /// Initializes the tree rooted here and registers it with the backend.
    ///
    /// Fails with [`NdsError::NotRoot`] when called on a child. The factory
    /// keeps the root alive under `device` until
    /// [`Factory::destroy_device`] or [`ComponentExt::deinitialize`].
    fn initialize(&self, device: &str, factory: &Arc<Factory>) -> Result<()>;

    /// Removes the tree from the backend and the registry.
    fn deinitialize(&self) -> Result<()>;
}

impl<C: Component> ComponentExt for Arc<C> {
    fn initialize(&self, device: &str, factory: &Arc<Factory>) -> Result<()> {
        let root: Arc<dyn Component> = self.clone();
        initialize_root(&root, device, factory)
    }

    fn deinitialize(&self) -> Result<()> {
        let root: Arc<dyn Component> = self.clone();
        deinitialize_root(&root)
    }
}

impl ComponentExt for Arc<dyn Component> {
    fn initialize(&self, device: &str, factory: &Arc<Factory>) -> Result<()> {
        initialize_root(self, device, factory)
    }

    fn deinitialize(&self) -> Result<()> {
        deinitialize_root(self)
    }
}

// =============================================================================
// Tree walks
// =============================================================================

pub(crate) fn initialize_root(
    root: &Arc<dyn Component>,
    device: &str,
    factory: &Arc<Factory>,
) -> Result<()> {
    let base = root.base();
    if base.is_attached() || base.parent().is_some() {
        return Err(NdsError::NotRoot(base.full_name()));
    }
    if base.is_initialized() {
        return Ok(());
    }

    attach(root)?;
    if let Err(err) = initialize_tree(root, factory, device) {
        // Undo whatever got registered before the failure.
        let _ = deinitialize_tree(root);
        return Err(err);
    }
    factory.hold_node(device, root.clone());
    Ok(())
}

pub(crate) fn deinitialize_root(root: &Arc<dyn Component>) -> Result<()> {
    let base = root.base();
    if base.is_attached() || base.parent().is_some() {
        return Err(NdsError::NotRoot(base.full_name()));
    }
    let factory = base.factory().ok();
    let device = base.device();
    let result = deinitialize_tree(root);
    if let (Some(factory), Some(device)) = (factory, device) {
        factory.release_node(&device, root);
    }
    result
}

fn attach(component: &Arc<dyn Component>) -> Result<()> {
    if let Some(node) = component.as_node() {
        let level = component.base().level() + 1;
        for child in node.children() {
            child
                .base()
                .set_parent(Arc::downgrade(component), level)?;
            attach(&child)?;
        }
    }
    Ok(())
}

fn initialize_tree(component: &Arc<dyn Component>, factory: &Arc<Factory>, device: &str) -> Result<()> {
    let base = component.base();
    base.bind(factory, device, component.as_port().is_some())?;

    let full_name = base.full_name();
    for command in base
        .commands()
        .into_iter()
        .chain(log_level_commands(component))
    {
        factory.register_command(&full_name, command)?;
    }

    component.clone().initialize_self(factory)?;

    if let Some(node) = component.as_node() {
        for child in node.children() {
            initialize_tree(&child, factory, device)?;
        }
    }

    component.finish_initialize()?;
    node_debug!(base, "initialized as '{}'", base.full_external_name().unwrap_or_default());
    Ok(())
}

fn deinitialize_tree(component: &Arc<dyn Component>) -> Result<()> {
    let base = component.base();
    if !base.is_initialized() {
        return Ok(());
    }

    let mut first_error: Option<NdsError> = None;
    let mut record = |result: Result<()>| {
        if let Err(err) = result {
            node_error!(base, "deinitialization failed: {}", err);
            first_error.get_or_insert(err);
        }
    };

    if let Ok(factory) = base.factory() {
        factory.deregister_commands(&base.full_name());
    }
    record(component.deinitialize_self());
    if let Some(node) = component.as_node() {
        for child in node.children() {
            record(deinitialize_tree(&child));
        }
    }
    record(component.finish_deinitialize());

    base.unbind();
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn log_level_commands(component: &Arc<dyn Component>) -> Vec<CommandDefinition> {
    [
        ("setLogLevelDebug", LogLevel::Debug),
        ("setLogLevelInfo", LogLevel::Info),
        ("setLogLevelWarning", LogLevel::Warning),
        ("setLogLevelError", LogLevel::Error),
        ("setLogLevelNone", LogLevel::None),
    ]
    .into_iter()
    .map(|(name, level)| {
        let target = Arc::downgrade(component);
        CommandDefinition::new(
            name,
            format!("{name}: set the log level of the node and its children"),
            0,
            move |_| {
                if let Some(component) = target.upgrade() {
                    component.set_log_level(level);
                }
                Ok(Vec::new())
            },
        )
    })
    .collect()
}
