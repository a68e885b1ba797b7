//! Per-backend entry point used by drivers and backends.
//!
//! A [`Factory`] wraps one [`Backend`] and one shared [`Registry`]. It owns
//! the naming rules applied to every tree initialized through it, allocates
//! devices through registered drivers and keeps the initialized roots alive
//! until their device is destroyed.
//!
//! # Lifecycle
//!
//! ```text
//! let registry = Registry::new();
//! let factory = Factory::new(registry.clone(), backend);
//! registry.register_driver(driver)?;
//! factory.create_device("mock", "dev0", &params)?;   // driver builds + initializes
//! factory.subscribe("dev0-ch-out", "dev1-ch-in")?;
//! factory.destroy_device("dev0")?;                   // deinitialize + deallocate
//! factory.shutdown()?;
//! ```
//!
//! Trees hold only a weak reference to their factory. Call
//! [`Factory::shutdown`] (or destroy every device) before dropping the last
//! handle so the trees can still reach the backend while they unregister.

use crate::backend::{Backend, CommandDefinition};
use crate::component::{deinitialize_root, Component};
use crate::driver::{DeviceDriver, DeviceObject, NamedParameters};
use crate::error::{NdsError, Result};
use crate::naming::{IniDocument, NamingRole, NamingRules};
use crate::pv::input::address_of;
use crate::registry::Registry;
use crate::thread::ThreadHandle;
use crate::types::LogLevel;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

struct AllocatedDevice {
    driver: Arc<dyn DeviceDriver>,
    object: DeviceObject,
}

/// Devices and naming rules of one backend.
pub struct Factory {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    naming_document: RwLock<Option<IniDocument>>,
    naming_rules: RwLock<NamingRules>,
    default_log_level: AtomicU8,
    // `None` while the driver is still allocating.
    devices: Mutex<HashMap<String, Option<AllocatedDevice>>>,
    held_nodes: Mutex<BTreeMap<String, Vec<Arc<dyn Component>>>>,
}

impl Factory {
    /// Creates the factory and registers its backend as a control system.
    pub fn new(registry: Arc<Registry>, backend: Arc<dyn Backend>) -> Arc<Self> {
        registry.register_control_system(backend.clone());
        Arc::new(Self {
            backend,
            registry,
            naming_document: RwLock::new(None),
            naming_rules: RwLock::new(NamingRules::identity()),
            default_log_level: AtomicU8::new(LogLevel::default() as u8),
            devices: Mutex::new(HashMap::new()),
            held_nodes: Mutex::new(BTreeMap::new()),
        })
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // =========================================================================
    // Naming
    // =========================================================================

    /// Loads a naming rules document and activates `section`.
    ///
    /// An empty `section` selects the section named after the backend
    /// (ignoring case) when there is one, identity rules otherwise. Only
    /// trees initialized afterwards see the new rules.
    pub fn load_naming_rules<R: Read>(&self, mut reader: R, section: &str) -> Result<()> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let document = IniDocument::parse(&text)?;

        let rules = if section.is_empty() {
            match document.section_ignore_case(self.backend.name()) {
                Some((name, _)) => NamingRules::from_document(&document, name)?,
                None => NamingRules::identity(),
            }
        } else {
            NamingRules::from_document(&document, section)?
        };

        tracing::info!(
            backend = self.backend.name(),
            section = rules.section(),
            "naming rules loaded"
        );
        *self.naming_document.write() = Some(document);
        *self.naming_rules.write() = rules;
        Ok(())
    }

    /// Loads naming rules from a file. See [`Factory::load_naming_rules`].
    pub fn load_naming_rules_file(&self, path: impl AsRef<Path>, section: &str) -> Result<()> {
        let file = std::fs::File::open(path)?;
        self.load_naming_rules(std::io::BufReader::new(file), section)
    }

    /// Switches to another section of the loaded document.
    ///
    /// An empty name restores identity rules.
    pub fn set_naming_rules(&self, section: &str) -> Result<()> {
        if section.is_empty() {
            *self.naming_rules.write() = NamingRules::identity();
            return Ok(());
        }
        let rules = match self.naming_document.read().as_ref() {
            Some(document) => NamingRules::from_document(document, section)?,
            None => return Err(NdsError::NamingRulesNotFound(section.to_string())),
        };
        *self.naming_rules.write() = rules;
        Ok(())
    }

    /// Rules currently in force.
    pub fn naming_rules(&self) -> NamingRules {
        self.naming_rules.read().clone()
    }

    /// Separator placed before a level-`level` name.
    pub fn separator(&self, level: u32) -> String {
        match self.naming_rules.read().separator(level) {
            Some(separator) => separator.to_string(),
            None => self.backend.default_separator(level),
        }
    }

    /// External form of `name` for a component of the given role.
    pub fn resolve_name(&self, role: NamingRole, name: &str) -> String {
        self.naming_rules.read().resolve(role, name)
    }

    // =========================================================================
    // Log levels
    // =========================================================================

    /// Level given to roots that were not assigned one explicitly.
    pub fn default_log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.default_log_level.load(Ordering::Acquire))
    }

    /// Changes the level of roots initialized from now on.
    pub fn set_default_log_level(&self, level: LogLevel) {
        self.default_log_level.store(level as u8, Ordering::Release);
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Allocates `device` with the driver named `driver`.
    pub fn create_device(
        self: &Arc<Self>,
        driver: &str,
        device: &str,
        parameters: &NamedParameters,
    ) -> Result<()> {
        let driver = self.registry.driver(driver)?;
        {
            let mut devices = self.devices.lock();
            if devices.contains_key(device) || self.held_nodes.lock().contains_key(device) {
                return Err(NdsError::DeviceAlreadyCreated(device.to_string()));
            }
            devices.insert(device.to_string(), None);
        }

        tracing::info!(driver = driver.driver_name(), device, "creating device");
        match driver.allocate(self, device, parameters) {
            Ok(object) => {
                self.devices
                    .lock()
                    .insert(device.to_string(), Some(AllocatedDevice { driver, object }));
                Ok(())
            }
            Err(err) => {
                self.devices.lock().remove(device);
                // Roots initialized before the failure must not outlive it.
                if let Err(cleanup) = self.deinitialize_held(device) {
                    tracing::warn!(device, error = %cleanup, "cleanup after failed allocation");
                }
                Err(NdsError::from_callback(device, err))
            }
        }
    }

    /// Deinitializes every root held under `device`, then releases the
    /// driver's device object.
    pub fn destroy_device(&self, device: &str) -> Result<()> {
        let allocated = {
            let mut devices = self.devices.lock();
            match devices.get(device) {
                Some(Some(_)) => devices.remove(device).flatten(),
                Some(None) => return Err(NdsError::DeviceNotAllocated(device.to_string())),
                None => None,
            }
        };
        let had_nodes = self.held_nodes.lock().contains_key(device);
        if allocated.is_none() && !had_nodes {
            return Err(NdsError::DeviceNotAllocated(device.to_string()));
        }

        tracing::info!(device, "destroying device");
        let result = self.deinitialize_held(device);
        if let Some(AllocatedDevice { driver, object }) = allocated {
            driver.deallocate(object);
        }
        result
    }

    /// Names of the allocated devices, sorted.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .devices
            .lock()
            .iter()
            .filter(|(_, allocated)| allocated.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Destroys every device and deinitializes every remaining root.
    pub fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for device in self.device_names() {
            if let Err(err) = self.destroy_device(&device) {
                first_error.get_or_insert(err);
            }
        }
        let remaining: Vec<String> = self.held_nodes.lock().keys().cloned().collect();
        for device in remaining {
            if let Err(err) = self.deinitialize_held(&device) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn deinitialize_held(&self, device: &str) -> Result<()> {
        let roots = self.held_nodes.lock().remove(device).unwrap_or_default();
        let mut first_error = None;
        for root in roots.iter().rev() {
            if let Err(err) = deinitialize_root(root) {
                tracing::error!(device, node = %root.base().full_name(), error = %err, "deinitialization failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Held nodes
    // =========================================================================

    /// Keeps `root` alive until `device` is destroyed.
    pub fn hold_node(&self, device: &str, root: Arc<dyn Component>) {
        let address = address_of(Arc::as_ptr(&root));
        let mut held = self.held_nodes.lock();
        let roots = held.entry(device.to_string()).or_default();
        if !roots.iter().any(|held| address_of(Arc::as_ptr(held)) == address) {
            roots.push(root);
        }
    }

    /// Drops the factory's reference to `root`.
    pub fn release_node(&self, device: &str, root: &Arc<dyn Component>) {
        let address = address_of(Arc::as_ptr(root));
        let mut held = self.held_nodes.lock();
        if let Some(roots) = held.get_mut(device) {
            roots.retain(|held| address_of(Arc::as_ptr(held)) != address);
            if roots.is_empty() {
                held.remove(device);
            }
        }
    }

    /// Roots held under `device`, in initialization order.
    pub fn held_nodes(&self, device: &str) -> Vec<Arc<dyn Component>> {
        self.held_nodes.lock().get(device).cloned().unwrap_or_default()
    }

    // =========================================================================
    // Links
    // =========================================================================

    /// See [`Registry::subscribe`].
    pub fn subscribe(&self, input: &str, output: &str) -> Result<()> {
        self.registry.subscribe(input, output)
    }

    /// See [`Registry::unsubscribe`].
    pub fn unsubscribe(&self, output: &str) -> Result<()> {
        self.registry.unsubscribe(output)
    }

    /// See [`Registry::replicate`].
    pub fn replicate(&self, source: &str, destination: &str) -> Result<()> {
        self.registry.replicate(source, destination)
    }

    /// See [`Registry::stop_replication_to`].
    pub fn stop_replication_to(&self, destination: &str) -> Result<()> {
        self.registry.stop_replication_to(destination)
    }

    // =========================================================================
    // Backend services
    // =========================================================================

    /// Exposes a node command through the backend.
    pub fn register_command(&self, node: &str, command: CommandDefinition) -> Result<()> {
        self.backend.register_command(node, command)
    }

    /// Removes the commands of a node from the backend.
    pub fn deregister_commands(&self, node: &str) {
        self.backend.deregister_commands(node);
    }

    /// Runs the backend loop. Blocks until it returns.
    pub fn run(self: &Arc<Self>, args: &[String]) -> Result<()> {
        tracing::info!(backend = self.backend.name(), "running backend");
        self.backend.run(self, args)
    }

    /// Starts `work` on a thread created by the backend.
    pub fn run_in_thread<F>(&self, name: &str, work: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.backend.create_thread(name, Box::new(work))?;
        Ok(ThreadHandle::new(name, handle))
    }
}

impl Drop for Factory {
    fn drop(&mut self) {
        let held = self.held_nodes.get_mut();
        if !held.is_empty() {
            tracing::warn!(
                devices = ?held.keys().collect::<Vec<_>>(),
                "factory dropped with initialized devices"
            );
        }
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("backend", &self.backend.name())
            .field("naming", &self.naming_rules.read().section())
            .field("devices", &self.device_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Interface;
    use crate::component::ComponentExt;
    use crate::driver::DriverFunctions;
    use crate::node::Node;
    use crate::port::Port;
    use crate::pv::{Pv, PvVariableIn};
    use crate::types::{NodeType, Timestamp};
    use crate::value::PvValue;
    use std::sync::atomic::AtomicUsize;

    struct NullInterface;

    impl Interface for NullInterface {
        fn register_pv(&self, _pv: Arc<dyn Pv>) -> Result<()> {
            Ok(())
        }

        fn deregister_pv(&self, _pv: &dyn Pv) -> Result<()> {
            Ok(())
        }

        fn registration_terminated(&self) -> Result<()> {
            Ok(())
        }

        fn push(&self, _pv: &dyn Pv, _timestamp: Timestamp, _value: &PvValue) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullBackend {
        commands: Mutex<Vec<(String, String)>>,
    }

    impl Backend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }

        fn new_interface(&self, _port_full_name: &str) -> Result<Box<dyn Interface>> {
            Ok(Box::new(NullInterface))
        }

        fn register_command(&self, node: &str, command: CommandDefinition) -> Result<()> {
            self.commands.lock().push((node.to_string(), command.name));
            Ok(())
        }

        fn deregister_commands(&self, node: &str) {
            self.commands.lock().retain(|(owner, _)| owner != node);
        }

        fn run(&self, _factory: &Arc<Factory>, _args: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn factory() -> (Arc<Factory>, Arc<NullBackend>) {
        let backend = Arc::new(NullBackend::default());
        let factory = Factory::new(Registry::new(), backend.clone());
        (factory, backend)
    }

    fn port_driver(deallocations: Arc<AtomicUsize>) -> DriverFunctions {
        struct Device {
            deallocations: Arc<AtomicUsize>,
        }

        impl Drop for Device {
            fn drop(&mut self) {
                self.deallocations.fetch_add(1, Ordering::SeqCst);
            }
        }

        DriverFunctions::new("port", move |factory, device, _| {
            let root = Arc::new(Port::new(device));
            root.add_child(PvVariableIn::<i32>::new("value"))?;
            root.initialize(device, factory)?;
            Ok(Box::new(Device {
                deallocations: deallocations.clone(),
            }))
        })
    }

    #[test]
    fn test_backend_is_registered() {
        let (factory, _) = factory();
        assert!(factory.registry().control_system("null").is_ok());
    }

    #[test]
    fn test_create_and_destroy_device() {
        let (factory, backend) = factory();
        let deallocations = Arc::new(AtomicUsize::new(0));
        factory
            .registry()
            .register_driver(Arc::new(port_driver(deallocations.clone())))
            .unwrap();

        factory.create_device("port", "dev0", &NamedParameters::new()).unwrap();
        assert_eq!(factory.device_names(), ["dev0"]);
        assert_eq!(factory.held_nodes("dev0").len(), 1);
        assert!(factory.registry().input_pv("dev0-value").is_some());
        assert!(!backend.commands.lock().is_empty());

        let err = factory
            .create_device("port", "dev0", &NamedParameters::new())
            .unwrap_err();
        assert!(matches!(err, NdsError::DeviceAlreadyCreated(name) if name == "dev0"));

        factory.destroy_device("dev0").unwrap();
        assert_eq!(deallocations.load(Ordering::SeqCst), 1);
        assert!(factory.held_nodes("dev0").is_empty());
        assert!(factory.registry().input_pv("dev0-value").is_none());
        assert!(backend.commands.lock().is_empty());

        let err = factory.destroy_device("dev0").unwrap_err();
        assert!(matches!(err, NdsError::DeviceNotAllocated(name) if name == "dev0"));
    }

    #[test]
    fn test_unknown_driver() {
        let (factory, _) = factory();
        let err = factory
            .create_device("missing", "dev0", &NamedParameters::new())
            .unwrap_err();
        assert!(matches!(err, NdsError::DriverNotFound(name) if name == "missing"));
        assert!(factory.device_names().is_empty());
    }

    #[test]
    fn test_failed_allocation_releases_roots() {
        let (factory, _) = factory();
        factory
            .registry()
            .register_driver(Arc::new(DriverFunctions::new("broken", |factory, device, _| {
                let root = Arc::new(Port::new(device));
                root.add_child(PvVariableIn::<i32>::new("value"))?;
                root.initialize(device, factory)?;
                anyhow::bail!("hardware missing")
            })))
            .unwrap();

        let err = factory
            .create_device("broken", "dev0", &NamedParameters::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "dev0: hardware missing");
        assert!(factory.held_nodes("dev0").is_empty());
        assert!(factory.registry().input_pv("dev0-value").is_none());
        assert!(factory.device_names().is_empty());
    }

    #[test]
    fn test_naming_rules_selection() {
        let (factory, _) = factory();
        let text = "[NULL]\nseparator1 = :\n[other]\nseparator1 = .\n";

        factory.load_naming_rules(text.as_bytes(), "").unwrap();
        assert_eq!(factory.naming_rules().section(), "NULL");
        assert_eq!(factory.separator(1), ":");
        assert_eq!(factory.separator(3), ":");
        assert_eq!(factory.separator(0), "");

        factory.set_naming_rules("other").unwrap();
        assert_eq!(factory.separator(2), ".");

        assert!(matches!(
            factory.set_naming_rules("absent"),
            Err(NdsError::NamingRulesMissingSection(_))
        ));

        factory.set_naming_rules("").unwrap();
        assert!(factory.naming_rules().is_identity());
        assert_eq!(factory.separator(1), "-");
    }

    #[test]
    fn test_set_rules_without_document() {
        let (factory, _) = factory();
        assert!(matches!(
            factory.set_naming_rules("EPICS"),
            Err(NdsError::NamingRulesNotFound(section)) if section == "EPICS"
        ));
    }

    #[test]
    fn test_hold_and_release_by_identity() {
        let (factory, _) = factory();
        let root: Arc<dyn Component> = Arc::new(Node::with_type("root", NodeType::Generic));
        factory.hold_node("dev", root.clone());
        factory.hold_node("dev", root.clone());
        assert_eq!(factory.held_nodes("dev").len(), 1);

        let other: Arc<dyn Component> = Arc::new(Node::new("other"));
        factory.release_node("dev", &other);
        assert_eq!(factory.held_nodes("dev").len(), 1);
        factory.release_node("dev", &root);
        assert!(factory.held_nodes("dev").is_empty());
    }

    #[test]
    fn test_run_in_thread() {
        let (factory, _) = factory();
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = {
            let counter = counter.clone();
            factory
                .run_in_thread("worker", move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };
        assert_eq!(worker.name(), "worker");
        worker.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (factory, _) = factory();
        factory
            .registry()
            .register_driver(Arc::new(port_driver(Arc::new(AtomicUsize::new(0)))))
            .unwrap();
        factory.create_device("port", "a", &NamedParameters::new()).unwrap();
        factory.create_device("port", "b", &NamedParameters::new()).unwrap();

        factory.shutdown().unwrap();
        assert!(factory.device_names().is_empty());
        assert!(factory.registry().pv_names().is_empty());
    }
}
