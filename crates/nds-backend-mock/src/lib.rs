//! In-memory control system backend for rust-nds.
//!
//! This crate lets a device tree run end to end without a real control
//! system: it records every PV, push and command, and ships a mock device
//! driver whose tree exercises every PV flavour.
//!
//! # Available Types
//!
//! - [`MockBackend`] / [`MockInterface`] - the control system and its per-port records
//! - [`MockDeviceDriver`] / [`MockDevice`] - the `testDevice` driver
//!
//! # Usage
//!
//! ```rust,ignore
//! use nds_backend_mock::{MockBackend, MockDeviceDriver};
//! use nds_core::{Factory, Registry};
//!
//! let registry = Registry::new();
//! let backend = MockBackend::new();
//! let factory = Factory::new(registry.clone(), backend.clone());
//! registry.register_driver(MockDeviceDriver::new())?;
//!
//! factory.create_device("testDevice", "rootNode", &Default::default())?;
//! let interface = backend.interface("rootNode-Channel1").unwrap();
//! interface.write_cs_value("/rootNode-Channel1.delegateOut", Timestamp::now(), "hello".to_string())?;
//! factory.shutdown()?;
//! ```

mod backend;
mod console;
mod device;

pub use backend::{MockBackend, MockInterface, MOCK_BACKEND_NAME};
pub use device::{MockDevice, MockDeviceDriver, MAX_SAMPLES, MOCK_DRIVER_NAME};

use nds_core::{Factory, Registry, Result};
use std::sync::Arc;

/// Builds a factory on a fresh mock backend with the mock driver registered.
pub fn mock_factory(registry: &Arc<Registry>) -> Result<(Arc<Factory>, Arc<MockBackend>, Arc<MockDeviceDriver>)> {
    let backend = MockBackend::new();
    let factory = Factory::new(registry.clone(), backend.clone());
    let driver = MockDeviceDriver::new();
    registry.register_driver(driver.clone())?;
    Ok((factory, backend, driver))
}
