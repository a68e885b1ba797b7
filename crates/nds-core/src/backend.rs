//! Control system backend traits.
//!
//! A backend (EPICS-like, Tango-like, or the in-memory mock) implements
//! [`Backend`] once per process and hands out one [`Interface`] per
//! [`Port`](crate::port::Port). The tree never talks to a backend any other
//! way: PVs reach it through their port's interface, commands through the
//! factory.

use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::pv::Pv;
use crate::thread::spawn_named;
use crate::types::Timestamp;
use crate::value::PvValue;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handler invoked when the backend routes a command to a node.
///
/// Receives the string parameters (already checked against the arity) and
/// returns string results.
pub type CommandHandler = Arc<dyn Fn(&[String]) -> anyhow::Result<Vec<String>> + Send + Sync>;

/// A command a node exposes to operators.
#[derive(Clone)]
pub struct CommandDefinition {
    /// Command name, unique per node
    pub name: String,
    /// Usage text shown by the backend
    pub usage: String,
    /// Exact number of parameters
    pub arity: usize,
    /// Code to run
    pub handler: CommandHandler,
}

impl CommandDefinition {
    /// Builds a definition.
    pub fn new<F>(name: impl Into<String>, usage: impl Into<String>, arity: usize, handler: F) -> Self
    where
        F: Fn(&[String]) -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            usage: usage.into(),
            arity,
            handler: Arc::new(handler),
        }
    }

    /// Checks the parameter count, then runs the handler.
    pub fn execute(&self, node: &str, parameters: &[String]) -> Result<Vec<String>> {
        if parameters.len() != self.arity {
            return Err(NdsError::InvalidCommandArguments {
                command: self.name.clone(),
                expected: self.arity,
                actual: parameters.len(),
            });
        }
        (self.handler)(parameters).map_err(|err| NdsError::from_callback(node, err))
    }
}

impl std::fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Per-port connection to the backend.
pub trait Interface: Send + Sync {
    /// Makes a PV visible to the control system.
    fn register_pv(&self, pv: Arc<dyn Pv>) -> Result<()>;

    /// Removes a PV from the control system.
    fn deregister_pv(&self, pv: &dyn Pv) -> Result<()>;

    /// Called once after every PV below the port has been registered.
    fn registration_terminated(&self) -> Result<()>;

    /// Publishes a value pushed by the driver.
    fn push(&self, pv: &dyn Pv, timestamp: Timestamp, value: &PvValue) -> Result<()>;
}

/// A control system implementation.
pub trait Backend: Send + Sync {
    /// Backend name, also used to pick the default naming rules section.
    fn name(&self) -> &str;

    /// Separator used before level-`level` names when the rules define none.
    fn default_separator(&self, level: u32) -> String {
        if level == 0 {
            String::new()
        } else {
            "-".to_string()
        }
    }

    /// Creates the interface for the port whose full name is given.
    fn new_interface(&self, port_full_name: &str) -> Result<Box<dyn Interface>>;

    /// Exposes a node command.
    fn register_command(&self, node_full_name: &str, command: CommandDefinition) -> Result<()>;

    /// Removes every command registered for the node.
    fn deregister_commands(&self, node_full_name: &str);

    /// Runs the backend's own loop. Blocks until the backend exits.
    fn run(&self, factory: &Arc<Factory>, args: &[String]) -> Result<()>;

    /// Spawns a named thread on behalf of a node.
    fn create_thread(&self, name: &str, work: Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>> {
        spawn_named(name, work)
    }
}
