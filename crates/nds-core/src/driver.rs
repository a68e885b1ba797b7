//! Device drivers.
//!
//! A driver is registered once per process in the
//! [`Registry`](crate::registry::Registry) and allocates one device object per
//! [`Factory::create_device`](crate::factory::Factory::create_device) call.
//! The device object typically builds a tree and initializes its root with
//! the factory it receives; the factory keeps that root alive until the
//! device is destroyed.
//!
//! ```ignore
//! struct Counter;
//!
//! impl DeviceDriver for Counter {
//!     fn driver_name(&self) -> &str { "counter" }
//!
//!     fn allocate(&self, factory: &Arc<Factory>, device: &str, _: &NamedParameters)
//!         -> anyhow::Result<DeviceObject>
//!     {
//!         let root = Arc::new(Port::new(device));
//!         root.add_child(PvVariableIn::<i32>::new("count"))?;
//!         root.initialize(device, factory)?;
//!         Ok(Box::new(root))
//!     }
//! }
//! ```

use crate::factory::Factory;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters passed to a driver at allocation (name to value).
pub type NamedParameters = BTreeMap<String, String>;

/// Opaque object returned by a driver for one device.
pub type DeviceObject = Box<dyn Any + Send + Sync>;

/// Factory of devices of one kind.
pub trait DeviceDriver: Send + Sync + 'static {
    /// Name used to select the driver in `create_device`.
    fn driver_name(&self) -> &str;

    /// Human readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Creates the device object for `device`.
    fn allocate(
        &self,
        factory: &Arc<Factory>,
        device: &str,
        parameters: &NamedParameters,
    ) -> anyhow::Result<DeviceObject>;

    /// Releases a device object. Called after the device trees have been
    /// deinitialized.
    fn deallocate(&self, device: DeviceObject) {
        drop(device);
    }
}

type AllocateFn =
    Box<dyn Fn(&Arc<Factory>, &str, &NamedParameters) -> anyhow::Result<DeviceObject> + Send + Sync>;

/// A driver assembled from closures.
pub struct DriverFunctions {
    name: String,
    description: String,
    allocate: AllocateFn,
}

impl DriverFunctions {
    /// Creates a driver named `name` that allocates through `allocate`.
    pub fn new<F>(name: impl Into<String>, allocate: F) -> Self
    where
        F: Fn(&Arc<Factory>, &str, &NamedParameters) -> anyhow::Result<DeviceObject>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            allocate: Box::new(allocate),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl DeviceDriver for DriverFunctions {
    fn driver_name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn allocate(
        &self,
        factory: &Arc<Factory>,
        device: &str,
        parameters: &NamedParameters,
    ) -> anyhow::Result<DeviceObject> {
        (self.allocate)(factory, device, parameters)
    }
}

impl std::fmt::Debug for DriverFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverFunctions")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
