//! Process-wide directory of backends, drivers and PVs.
//!
//! The registry is an explicit context object: create one with
//! [`Registry::new`], hand it to every [`Factory`](crate::factory::Factory)
//! and drop it when the process or test fixture ends. It resolves PV names
//! for subscriptions and replications across devices.
//!
//! Input and output PVs share one namespace: a full name belongs to at most
//! one PV. The registry holds weak references only; PVs remove themselves at
//! deinitialization.

use crate::backend::Backend;
use crate::driver::DeviceDriver;
use crate::error::{NdsError, Result};
use crate::pv::input::address_of;
use crate::pv::{PvIn, PvOut};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct PvIndex {
    inputs: HashMap<String, Weak<dyn PvIn>>,
    outputs: HashMap<String, Weak<dyn PvOut>>,
}

impl PvIndex {
    fn contains(&self, name: &str) -> bool {
        self.inputs.contains_key(name) || self.outputs.contains_key(name)
    }

    fn live_inputs(&self) -> Vec<Arc<dyn PvIn>> {
        self.inputs.values().filter_map(Weak::upgrade).collect()
    }
}

/// Directory shared by every factory of the process.
#[derive(Default)]
pub struct Registry {
    control_systems: RwLock<BTreeMap<String, Arc<dyn Backend>>>,
    drivers: RwLock<BTreeMap<String, Arc<dyn DeviceDriver>>>,
    pvs: Mutex<PvIndex>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // =========================================================================
    // Control systems
    // =========================================================================

    /// Makes a backend available by name. A later registration replaces it.
    pub fn register_control_system(&self, backend: Arc<dyn Backend>) {
        let name = backend.name().to_string();
        tracing::debug!(backend = %name, "registered control system");
        self.control_systems.write().insert(name, backend);
    }

    /// Backend registered under `name`.
    pub fn control_system(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.control_systems
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NdsError::ControlSystemNotFound(name.to_string()))
    }

    /// Names of the registered backends.
    pub fn control_system_names(&self) -> Vec<String> {
        self.control_systems.read().keys().cloned().collect()
    }

    // =========================================================================
    // Drivers
    // =========================================================================

    /// Makes a driver available by name.
    pub fn register_driver(&self, driver: Arc<dyn DeviceDriver>) -> Result<()> {
        let name = driver.driver_name().to_string();
        let mut drivers = self.drivers.write();
        if drivers.contains_key(&name) {
            return Err(NdsError::DriverAlreadyRegistered(name));
        }
        tracing::debug!(driver = %name, "registered driver");
        drivers.insert(name, driver);
        Ok(())
    }

    /// Driver registered under `name`.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn DeviceDriver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| NdsError::DriverNotFound(name.to_string()))
    }

    /// Names of the registered drivers.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }

    // =========================================================================
    // PV index
    // =========================================================================

    /// Indexes an input PV under its full name.
    pub fn register_input_pv(&self, name: &str, pv: Weak<dyn PvIn>) -> Result<()> {
        let mut index = self.pvs.lock();
        if index.contains(name) {
            return Err(NdsError::PvAlreadyDeclared(name.to_string()));
        }
        index.inputs.insert(name.to_string(), pv);
        Ok(())
    }

    /// Indexes an output PV under its full name.
    pub fn register_output_pv(&self, name: &str, pv: Weak<dyn PvOut>) -> Result<()> {
        let mut index = self.pvs.lock();
        if index.contains(name) {
            return Err(NdsError::PvAlreadyDeclared(name.to_string()));
        }
        index.outputs.insert(name.to_string(), pv);
        Ok(())
    }

    /// Removes an input PV and every replication link pointing to it.
    pub fn deregister_input_pv(&self, name: &str) {
        let (removed, inputs) = {
            let mut index = self.pvs.lock();
            let removed = index.inputs.remove(name);
            (removed, index.live_inputs())
        };
        if let Some(removed) = removed {
            let address = address_of(removed.as_ptr());
            for input in inputs {
                input.pv_in().remove_replica(address);
            }
        }
    }

    /// Removes an output PV and every subscription it holds.
    pub fn deregister_output_pv(&self, name: &str) {
        let (removed, inputs) = {
            let mut index = self.pvs.lock();
            let removed = index.outputs.remove(name);
            (removed, index.live_inputs())
        };
        if let Some(removed) = removed {
            let address = address_of(removed.as_ptr());
            for input in inputs {
                input.pv_in().remove_subscriber(address);
            }
        }
    }

    /// Live input PV registered under `name`.
    pub fn input_pv(&self, name: &str) -> Option<Arc<dyn PvIn>> {
        self.pvs.lock().inputs.get(name).and_then(Weak::upgrade)
    }

    /// Live output PV registered under `name`.
    pub fn output_pv(&self, name: &str) -> Option<Arc<dyn PvOut>> {
        self.pvs.lock().outputs.get(name).and_then(Weak::upgrade)
    }

    /// Full names of every indexed PV, sorted.
    pub fn pv_names(&self) -> Vec<String> {
        let index = self.pvs.lock();
        let mut names: Vec<String> = index.inputs.keys().chain(index.outputs.keys()).cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Links
    // =========================================================================

    /// Writes every value pushed on `input` to `output`.
    pub fn subscribe(&self, input: &str, output: &str) -> Result<()> {
        let source = self
            .input_pv(input)
            .ok_or_else(|| NdsError::MissingInputPv(input.to_string()))?;
        let receiver = self
            .output_pv(output)
            .ok_or_else(|| NdsError::MissingOutputPv(output.to_string()))?;
        source.pv_in().add_subscriber(&receiver);
        tracing::debug!(input, output, "subscribed");
        Ok(())
    }

    /// Detaches `output` from every input it subscribed to.
    pub fn unsubscribe(&self, output: &str) -> Result<()> {
        let receiver = self
            .output_pv(output)
            .ok_or_else(|| NdsError::MissingOutputPv(output.to_string()))?;
        let address = address_of(Arc::as_ptr(&receiver));
        let inputs = self.pvs.lock().live_inputs();
        for input in inputs {
            input.pv_in().remove_subscriber(address);
        }
        Ok(())
    }

    /// Pushes every value pushed on `source` to `destination` as well.
    pub fn replicate(&self, source: &str, destination: &str) -> Result<()> {
        let from = self
            .input_pv(source)
            .ok_or_else(|| NdsError::MissingInputPv(source.to_string()))?;
        let to = self
            .input_pv(destination)
            .ok_or_else(|| NdsError::MissingDestinationPv(destination.to_string()))?;
        from.pv_in().add_replica(&to);
        tracing::debug!(source, destination, "replicating");
        Ok(())
    }

    /// Detaches `destination` from every input it replicates.
    pub fn stop_replication_to(&self, destination: &str) -> Result<()> {
        let to = self
            .input_pv(destination)
            .ok_or_else(|| NdsError::MissingDestinationPv(destination.to_string()))?;
        let address = address_of(Arc::as_ptr(&to));
        let inputs = self.pvs.lock().live_inputs();
        for input in inputs {
            input.pv_in().remove_replica(address);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("control_systems", &self.control_system_names())
            .field("drivers", &self.driver_names())
            .field("pvs", &self.pv_names().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pv::{PvVariableIn, PvVariableOut};

    #[test]
    fn test_pv_names_are_unique_across_directions() {
        let registry = Registry::new();
        let input: Arc<dyn PvIn> = Arc::new(PvVariableIn::<i32>::new("a"));
        let output: Arc<dyn PvOut> = Arc::new(PvVariableOut::<i32>::new("a"));

        registry.register_input_pv("dev-a", Arc::downgrade(&input)).unwrap();
        let err = registry
            .register_output_pv("dev-a", Arc::downgrade(&output))
            .unwrap_err();
        assert!(matches!(err, NdsError::PvAlreadyDeclared(name) if name == "dev-a"));
        assert_eq!(registry.pv_names(), ["dev-a"]);

        registry.deregister_input_pv("dev-a");
        registry.deregister_input_pv("dev-a");
        assert!(registry.pv_names().is_empty());
        registry.register_output_pv("dev-a", Arc::downgrade(&output)).unwrap();
    }

    #[test]
    fn test_link_lookups() {
        let registry = Registry::new();
        let input: Arc<dyn PvIn> = Arc::new(PvVariableIn::<i32>::new("in"));
        let copy: Arc<dyn PvIn> = Arc::new(PvVariableIn::<i32>::new("copy"));
        let output: Arc<dyn PvOut> = Arc::new(PvVariableOut::<i32>::new("out"));
        registry.register_input_pv("in", Arc::downgrade(&input)).unwrap();
        registry.register_input_pv("copy", Arc::downgrade(&copy)).unwrap();
        registry.register_output_pv("out", Arc::downgrade(&output)).unwrap();

        assert!(matches!(registry.subscribe("nope", "out"), Err(NdsError::MissingInputPv(_))));
        assert!(matches!(registry.subscribe("in", "nope"), Err(NdsError::MissingOutputPv(_))));
        assert!(matches!(registry.subscribe("out", "in"), Err(NdsError::MissingInputPv(_))));

        registry.subscribe("in", "out").unwrap();
        registry.subscribe("in", "out").unwrap();
        assert_eq!(input.pv_in().subscriber_count(), 1);

        assert!(matches!(
            registry.replicate("in", "nope"),
            Err(NdsError::MissingDestinationPv(_))
        ));
        registry.replicate("in", "copy").unwrap();
        assert_eq!(input.pv_in().replica_count(), 1);

        registry.unsubscribe("out").unwrap();
        assert_eq!(input.pv_in().subscriber_count(), 0);
        registry.stop_replication_to("copy").unwrap();
        assert_eq!(input.pv_in().replica_count(), 0);
    }

    #[test]
    fn test_deregistration_cleans_links() {
        let registry = Registry::new();
        let input: Arc<dyn PvIn> = Arc::new(PvVariableIn::<i32>::new("in"));
        let output: Arc<dyn PvOut> = Arc::new(PvVariableOut::<i32>::new("out"));
        registry.register_input_pv("in", Arc::downgrade(&input)).unwrap();
        registry.register_output_pv("out", Arc::downgrade(&output)).unwrap();
        registry.subscribe("in", "out").unwrap();

        registry.deregister_output_pv("out");
        assert_eq!(input.pv_in().subscriber_count(), 0);
        assert!(matches!(registry.unsubscribe("out"), Err(NdsError::MissingOutputPv(_))));
    }

    #[test]
    fn test_unknown_driver_and_backend() {
        let registry = Registry::new();
        assert!(matches!(registry.driver("x"), Err(NdsError::DriverNotFound(_))));
        assert!(matches!(
            registry.control_system("epics"),
            Err(NdsError::ControlSystemNotFound(_))
        ));
    }
}
