//! PVs that keep their own copy of the value.

use crate::base::Base;
use crate::component::Component;
use crate::error::Result;
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::input::{deinitialize_input, initialize_input, PvBaseIn, PvIn};
use crate::pv::output::{deinitialize_output, initialize_output, PvBaseOut, PvOut};
use crate::pv::{Pv, PvBase};
use crate::types::Timestamp;
use crate::value::{PvType, PvValue};
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// Input
// =============================================================================

/// Input PV storing the last value set by the driver.
pub struct PvVariableIn<T: PvType> {
    input: PvBaseIn,
    value: Mutex<(Timestamp, T)>,
}

impl<T: PvType> std::fmt::Debug for PvVariableIn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PvVariableIn")
            .field("pv", self.input.pv())
            .finish_non_exhaustive()
    }
}

impl<T: PvType> PvVariableIn<T> {
    /// Creates the PV with a default value.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_role(name, NamingRole::InputPv)
    }

    /// Creates the PV with a specific naming role.
    pub fn with_role(name: impl Into<String>, role: NamingRole) -> Self {
        Self {
            input: PvBaseIn::with_role(name, T::DATA_TYPE, role),
            value: Mutex::new((Timestamp::default(), T::default())),
        }
    }

    /// Stores the value, then pushes it if the PV is initialized.
    pub fn set_value(&self, timestamp: Timestamp, value: T) -> Result<()> {
        *self.value.lock() = (timestamp, value.clone());
        if self.base().is_initialized() {
            self.push(timestamp, value)?;
        }
        Ok(())
    }

    /// Stores the value stamped with the node's current time, then pushes it.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_value(self.base().timestamp(), value)
    }

    /// Last stored value.
    pub fn value(&self) -> T {
        self.value.lock().1.clone()
    }

    /// Last stored value and its timestamp.
    pub fn stamped_value(&self) -> (Timestamp, T) {
        self.value.lock().clone()
    }

    /// Pushes a value without storing it.
    pub fn push(&self, timestamp: Timestamp, value: T) -> Result<()> {
        self.input.push(self, timestamp, value.into_value())
    }
}

impl<T: PvType> Component for PvVariableIn<T> {
    fn base(&self) -> &Base {
        self.input.pv().base()
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        initialize_input(self, factory)
    }

    fn deinitialize_self(&self) -> Result<()> {
        deinitialize_input(self)
    }
}

impl<T: PvType> Pv for PvVariableIn<T> {
    fn pv_base(&self) -> &PvBase {
        self.input.pv()
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        let (timestamp, value) = self.stamped_value();
        Ok((timestamp, value.into_value()))
    }
}

impl<T: PvType> PvIn for PvVariableIn<T> {
    fn pv_in(&self) -> &PvBaseIn {
        &self.input
    }

    fn push_value(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        self.input.push(self, timestamp, value)
    }
}

// =============================================================================
// Output
// =============================================================================

/// Output PV storing the last value written by the backend.
pub struct PvVariableOut<T: PvType> {
    output: PvBaseOut,
    value: Mutex<(Timestamp, T)>,
}

impl<T: PvType> PvVariableOut<T> {
    /// Creates the PV with a default value.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_role(name, NamingRole::OutputPv)
    }

    /// Creates the PV with a specific naming role.
    pub fn with_role(name: impl Into<String>, role: NamingRole) -> Self {
        Self {
            output: PvBaseOut::with_role(name, T::DATA_TYPE, role),
            value: Mutex::new((Timestamp::default(), T::default())),
        }
    }

    /// Builder: sets the initial value.
    pub fn with_value(self, value: T) -> Self {
        self.value.lock().1 = value;
        self
    }

    /// Last written value.
    pub fn value(&self) -> T {
        self.value.lock().1.clone()
    }

    /// Last written value and its timestamp.
    pub fn stamped_value(&self) -> (Timestamp, T) {
        self.value.lock().clone()
    }

    /// Stores a value from the driver side.
    pub fn set_value(&self, timestamp: Timestamp, value: T) {
        *self.value.lock() = (timestamp, value);
    }
}

impl<T: PvType> Component for PvVariableOut<T> {
    fn base(&self) -> &Base {
        self.output.pv().base()
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        initialize_output(self, factory)
    }

    fn deinitialize_self(&self) -> Result<()> {
        deinitialize_output(self)
    }
}

impl<T: PvType> Pv for PvVariableOut<T> {
    fn pv_base(&self) -> &PvBase {
        self.output.pv()
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        let (timestamp, value) = self.stamped_value();
        Ok((timestamp, value.into_value()))
    }

    fn write(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let value: T = self.output.pv().typed_value(value)?;
        self.set_value(timestamp, value);
        Ok(())
    }
}

impl<T: PvType> PvOut for PvVariableOut<T> {
    fn pv_out(&self) -> &PvBaseOut {
        &self.output
    }
}
