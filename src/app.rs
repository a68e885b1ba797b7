//! Application wiring: one mock control system, its factory and the devices
//! listed in the configuration.

use crate::config::NdsConfig;
use anyhow::{Context, Result};
use nds_backend_mock::{mock_factory, MockBackend, MockDeviceDriver};
use nds_core::{Factory, Registry};
use std::sync::Arc;

/// A running device runtime.
pub struct App {
    registry: Arc<Registry>,
    factory: Arc<Factory>,
    backend: Arc<MockBackend>,
    driver: Arc<MockDeviceDriver>,
}

impl App {
    /// Builds the runtime described by `config`.
    ///
    /// Naming rules are loaded before any device is created, so every tree
    /// is named with them. A device that fails to allocate aborts startup
    /// and the devices created so far are destroyed again.
    pub fn start(config: &NdsConfig) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new();
        let (factory, backend, driver) = mock_factory(&registry)?;
        let app = Self {
            registry,
            factory,
            backend,
            driver,
        };

        if let Err(err) = app.populate(config) {
            if let Err(shutdown_err) = app.shutdown() {
                tracing::warn!(error = %shutdown_err, "cleanup after failed startup");
            }
            return Err(err);
        }

        Ok(app)
    }

    fn populate(&self, config: &NdsConfig) -> Result<()> {
        self.factory.set_default_log_level(config.node_log_level()?);

        if let Some(path) = &config.naming.rules_file {
            self.factory
                .load_naming_rules_file(path, &config.naming.section)
                .with_context(|| format!("loading naming rules from {}", path.display()))?;
        }

        for device in &config.devices {
            self.factory
                .create_device(&device.driver, &device.name, &device.parameters)
                .with_context(|| {
                    format!("creating device '{}' with driver '{}'", device.name, device.driver)
                })?;
            tracing::info!(device = %device.name, driver = %device.driver, "device created");
        }
        Ok(())
    }

    /// Hands control to the backend until it returns.
    pub fn run(&self, args: &[String]) -> Result<()> {
        self.factory.run(args)?;
        Ok(())
    }

    /// Destroys every device and releases the backend.
    pub fn shutdown(&self) -> Result<()> {
        self.factory.shutdown()?;
        Ok(())
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The factory of the mock control system.
    pub fn factory(&self) -> &Arc<Factory> {
        &self.factory
    }

    /// The mock control system.
    pub fn backend(&self) -> &Arc<MockBackend> {
        &self.backend
    }

    /// The mock device driver.
    pub fn driver(&self) -> &Arc<MockDeviceDriver> {
        &self.driver
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("devices", &self.factory.device_names())
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceDefinition;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_startup_logs_each_device() {
        let config = NdsConfig {
            devices: vec![DeviceDefinition {
                driver: "testDevice".to_string(),
                name: "logged".to_string(),
                parameters: Default::default(),
            }],
            ..Default::default()
        };
        let app = App::start(&config).unwrap();
        assert!(logs_contain("device created"));
        assert!(logs_contain("logged"));
        app.shutdown().unwrap();
    }
}
