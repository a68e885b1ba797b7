//! In-memory control system.
//!
//! [`MockBackend`] keeps everything a real control system would publish:
//! the PVs of every port, the values pushed to them and the commands of
//! every node. Tests and the console read it back by name; a PV can be
//! addressed by its full name (`dev-Channel1-value`) or by its full
//! external name (`/dev-Channel1.value`).

use crate::console;
use nds_core::value::expect_type;
use nds_core::{
    Backend, CommandDefinition, Factory, Interface, NdsError, Pv, PvExt, PvType, PvValue, Result,
    Timestamp,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Weak};

/// Name under which the mock registers as control system.
pub const MOCK_BACKEND_NAME: &str = "test";

// =============================================================================
// Interface
// =============================================================================

#[derive(Default)]
struct InterfaceRecords {
    pvs: BTreeMap<String, Weak<dyn Pv>>,
    external_names: HashMap<String, String>,
    pushes: HashMap<String, Vec<(Timestamp, PvValue)>>,
    terminated: bool,
}

/// Connection of one port to the mock control system.
///
/// Clones share the same records, so the backend keeps one clone per port
/// while the port owns the other.
#[derive(Clone)]
pub struct MockInterface {
    port: String,
    records: Arc<RwLock<InterfaceRecords>>,
}

impl MockInterface {
    fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            records: Arc::new(RwLock::new(InterfaceRecords::default())),
        }
    }

    /// Full name of the port this interface serves.
    pub fn port_name(&self) -> &str {
        &self.port
    }

    /// True once the port finished registering its PVs.
    pub fn registration_done(&self) -> bool {
        self.records.read().terminated
    }

    /// Full names of the registered PVs, sorted.
    pub fn pv_names(&self) -> Vec<String> {
        self.records.read().pvs.keys().cloned().collect()
    }

    /// Looks a PV up by full name or full external name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Pv>> {
        let records = self.records.read();
        let full_name = if records.pvs.contains_key(name) {
            name
        } else {
            records.external_names.get(name)?.as_str()
        };
        records.pvs.get(full_name).and_then(Weak::upgrade)
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn Pv>> {
        self.find(name)
            .ok_or_else(|| NdsError::Backend(format!("PV '{name}' is not registered on '{}'", self.port)))
    }

    fn full_name_of(&self, name: &str) -> String {
        let records = self.records.read();
        records
            .external_names
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Writes a value the way a control system client would.
    pub fn write_cs_value<T: PvType>(&self, name: &str, timestamp: Timestamp, value: T) -> Result<()> {
        self.resolve(name)?.write_as(timestamp, value)
    }

    /// Reads a value the way a control system client would.
    pub fn read_cs_value<T: PvType>(&self, name: &str) -> Result<(Timestamp, T)> {
        self.resolve(name)?.read_as()
    }

    /// Every value pushed on the PV, oldest first.
    pub fn pushed_values(&self, name: &str) -> Vec<(Timestamp, PvValue)> {
        let full_name = self.full_name_of(name);
        self.records.read().pushes.get(&full_name).cloned().unwrap_or_default()
    }

    /// The last value pushed on the PV.
    ///
    /// Fails when nothing was pushed or the value has another kind.
    pub fn last_pushed<T: PvType>(&self, name: &str) -> Result<(Timestamp, T)> {
        let (timestamp, value) = self
            .pushed_values(name)
            .pop()
            .ok_or_else(|| NdsError::Backend(format!("nothing pushed on '{name}'")))?;
        Ok((timestamp, expect_type(name, value)?))
    }
}

impl Interface for MockInterface {
    fn register_pv(&self, pv: Arc<dyn Pv>) -> Result<()> {
        let full_name = pv.base().full_name();
        let external = pv.base().full_external_name()?;
        tracing::debug!(port = %self.port, pv = %full_name, external = %external, "registering PV");
        let mut records = self.records.write();
        records.external_names.insert(external, full_name.clone());
        records.pvs.insert(full_name, Arc::downgrade(&pv));
        Ok(())
    }

    fn deregister_pv(&self, pv: &dyn Pv) -> Result<()> {
        let full_name = pv.base().full_name();
        let mut records = self.records.write();
        records.pvs.remove(&full_name);
        records.external_names.retain(|_, target| *target != full_name);
        Ok(())
    }

    fn registration_terminated(&self) -> Result<()> {
        self.records.write().terminated = true;
        Ok(())
    }

    fn push(&self, pv: &dyn Pv, timestamp: Timestamp, value: &PvValue) -> Result<()> {
        self.records
            .write()
            .pushes
            .entry(pv.base().full_name())
            .or_default()
            .push((timestamp, value.clone()));
        Ok(())
    }
}

// =============================================================================
// Backend
// =============================================================================

/// The in-memory control system.
#[derive(Default)]
pub struct MockBackend {
    interfaces: RwLock<BTreeMap<String, MockInterface>>,
    commands: RwLock<BTreeMap<String, Vec<CommandDefinition>>>,
}

impl MockBackend {
    /// Creates an empty backend.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Interface created for the port with the given full name.
    pub fn interface(&self, port: &str) -> Option<MockInterface> {
        self.interfaces.read().get(port).cloned()
    }

    /// Full names of the ports that received an interface.
    pub fn port_names(&self) -> Vec<String> {
        self.interfaces.read().keys().cloned().collect()
    }

    /// Full names of the PVs registered on every port, sorted.
    pub fn pv_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .interfaces
            .read()
            .values()
            .flat_map(MockInterface::pv_names)
            .collect();
        names.sort();
        names
    }

    /// Looks a PV up on every port, by full name or full external name.
    pub fn find_pv(&self, name: &str) -> Option<Arc<dyn Pv>> {
        self.interfaces
            .read()
            .values()
            .find_map(|interface| interface.find(name))
    }

    /// Names of the commands registered for a node, in registration order.
    pub fn command_names(&self, node: &str) -> Vec<String> {
        self.commands
            .read()
            .get(node)
            .map(|commands| commands.iter().map(|command| command.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Nodes that currently expose at least one command.
    pub fn command_nodes(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Runs a node command as an operator would.
    pub fn execute_command(&self, node: &str, command: &str, parameters: &[&str]) -> Result<Vec<String>> {
        let definition = self
            .commands
            .read()
            .get(node)
            .and_then(|commands| commands.iter().find(|candidate| candidate.name == command).cloned())
            .ok_or_else(|| NdsError::CommandNotFound {
                node: node.to_string(),
                command: command.to_string(),
            })?;
        let parameters: Vec<String> = parameters.iter().map(|parameter| parameter.to_string()).collect();
        tracing::debug!(node, command, ?parameters, "executing command");
        definition.execute(node, &parameters)
    }

    /// Runs the console loop on arbitrary streams.
    pub fn run_console<R: BufRead, W: Write>(&self, factory: &Arc<Factory>, input: R, output: W) -> Result<()> {
        console::run(self, factory, input, output)
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        MOCK_BACKEND_NAME
    }

    fn default_separator(&self, level: u32) -> String {
        let separator = match level {
            0 => "/",
            1 => "-",
            _ => ".",
        };
        separator.to_string()
    }

    fn new_interface(&self, port_full_name: &str) -> Result<Box<dyn Interface>> {
        let interface = MockInterface::new(port_full_name);
        let previous = self
            .interfaces
            .write()
            .insert(port_full_name.to_string(), interface.clone());
        if previous.is_some() {
            tracing::debug!(port = port_full_name, "replacing interface of re-initialized port");
        }
        Ok(Box::new(interface))
    }

    fn register_command(&self, node_full_name: &str, command: CommandDefinition) -> Result<()> {
        self.commands
            .write()
            .entry(node_full_name.to_string())
            .or_default()
            .push(command);
        Ok(())
    }

    fn deregister_commands(&self, node_full_name: &str) {
        self.commands.write().remove(node_full_name);
    }

    /// Reads console commands from stdin until `quit` or end of input.
    fn run(&self, factory: &Arc<Factory>, _args: &[String]) -> Result<()> {
        let stdin = io::stdin();
        self.run_console(factory, stdin.lock(), io::stdout())
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("ports", &self.port_names())
            .field("command_nodes", &self.command_nodes())
            .finish()
    }
}
