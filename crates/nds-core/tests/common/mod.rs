//! Recording backend shared by the integration tests.

#![allow(dead_code)]

use nds_core::{Backend, CommandDefinition, Factory, Interface, NdsError, Pv, PvValue, Registry, Result, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

/// Everything the backend saw, shared by all its interfaces.
#[derive(Default)]
pub struct Journal {
    pub interfaces: Vec<String>,
    pub terminated: Vec<String>,
    pub pvs: BTreeMap<String, Weak<dyn Pv>>,
    pub pushes: HashMap<String, Vec<(Timestamp, PvValue)>>,
    pub commands: BTreeMap<String, Vec<CommandDefinition>>,
}

pub struct RecordingInterface {
    port: String,
    journal: Arc<Mutex<Journal>>,
}

impl Interface for RecordingInterface {
    fn register_pv(&self, pv: Arc<dyn Pv>) -> Result<()> {
        let name = pv.base().full_name();
        self.journal.lock().pvs.insert(name, Arc::downgrade(&pv));
        Ok(())
    }

    fn deregister_pv(&self, pv: &dyn Pv) -> Result<()> {
        self.journal.lock().pvs.remove(&pv.base().full_name());
        Ok(())
    }

    fn registration_terminated(&self) -> Result<()> {
        self.journal.lock().terminated.push(self.port.clone());
        Ok(())
    }

    fn push(&self, pv: &dyn Pv, timestamp: Timestamp, value: &PvValue) -> Result<()> {
        self.journal
            .lock()
            .pushes
            .entry(pv.base().full_name())
            .or_default()
            .push((timestamp, value.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    pub journal: Arc<Mutex<Journal>>,
}

impl RecordingBackend {
    pub fn pushed(&self, pv: &str) -> Vec<PvValue> {
        self.journal
            .lock()
            .pushes
            .get(pv)
            .map(|values| values.iter().map(|(_, value)| value.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pushed_stamped(&self, pv: &str) -> Vec<(Timestamp, PvValue)> {
        self.journal.lock().pushes.get(pv).cloned().unwrap_or_default()
    }

    pub fn pv_names(&self) -> Vec<String> {
        self.journal.lock().pvs.keys().cloned().collect()
    }

    pub fn pv(&self, name: &str) -> Option<Arc<dyn Pv>> {
        self.journal.lock().pvs.get(name).and_then(Weak::upgrade)
    }

    pub fn command_names(&self, node: &str) -> Vec<String> {
        self.journal
            .lock()
            .commands
            .get(node)
            .map(|commands| commands.iter().map(|command| command.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn execute(&self, node: &str, command: &str, parameters: &[&str]) -> Result<Vec<String>> {
        let definition = self
            .journal
            .lock()
            .commands
            .get(node)
            .and_then(|commands| commands.iter().find(|c| c.name == command).cloned())
            .ok_or_else(|| NdsError::CommandNotFound {
                node: node.to_string(),
                command: command.to_string(),
            })?;
        let parameters: Vec<String> = parameters.iter().map(|p| p.to_string()).collect();
        definition.execute(node, &parameters)
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn new_interface(&self, port_full_name: &str) -> Result<Box<dyn Interface>> {
        self.journal.lock().interfaces.push(port_full_name.to_string());
        Ok(Box::new(RecordingInterface {
            port: port_full_name.to_string(),
            journal: self.journal.clone(),
        }))
    }

    fn register_command(&self, node_full_name: &str, command: CommandDefinition) -> Result<()> {
        self.journal
            .lock()
            .commands
            .entry(node_full_name.to_string())
            .or_default()
            .push(command);
        Ok(())
    }

    fn deregister_commands(&self, node_full_name: &str) {
        self.journal.lock().commands.remove(node_full_name);
    }

    fn run(&self, _factory: &Arc<Factory>, _args: &[String]) -> Result<()> {
        Ok(())
    }
}

pub fn setup() -> (Arc<Factory>, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let factory = Factory::new(Registry::new(), backend.clone());
    (factory, backend)
}
