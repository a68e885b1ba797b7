//! PVs served by a shared driver object.
//!
//! A driver with many similar PVs can implement [`PvDelegate`] once and
//! attach the same object to each [`PvHoldDelegate`]. Every call carries the
//! PV's full name from its port so the object can tell the PVs apart.
//!
//! Hold-delegate PVs are registered with their port only. They take no part
//! in subscriptions or replication.

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::{Pv, PvBase};
use crate::types::{DataDirection, Timestamp};
use crate::value::{PvType, PvValue};
use std::marker::PhantomData;
use std::sync::Arc;

/// Driver object answering reads and writes for several PVs.
pub trait PvDelegate: Send + Sync {
    /// Produces the value of the PV named `pv` (full name from its port).
    fn read(&self, pv: &str) -> anyhow::Result<(Timestamp, PvValue)>;

    /// Receives a value written to the PV named `pv`.
    fn write(&self, pv: &str, timestamp: Timestamp, value: PvValue) -> anyhow::Result<()>;
}

/// PV forwarding to a shared [`PvDelegate`].
pub struct PvHoldDelegate<T: PvType> {
    pv: PvBase,
    delegate: Arc<dyn PvDelegate>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: PvType> PvHoldDelegate<T> {
    /// Creates the PV.
    pub fn new(name: impl Into<String>, direction: DataDirection, delegate: Arc<dyn PvDelegate>) -> Self {
        let role = match direction {
            DataDirection::Input => NamingRole::InputPv,
            DataDirection::Output => NamingRole::OutputPv,
        };
        Self {
            pv: PvBase::new(name, direction, T::DATA_TYPE, role),
            delegate,
            _kind: PhantomData,
        }
    }

    fn key(&self) -> Result<String> {
        self.pv.base().full_name_from_port()
    }
}

impl<T: PvType> Component for PvHoldDelegate<T> {
    fn base(&self) -> &Base {
        self.pv.base()
    }

    fn initialize_self(self: Arc<Self>, _factory: &Arc<Factory>) -> Result<()> {
        let as_pv: Arc<dyn Pv> = self.clone();
        self.pv.base().with_port(|port| port.register_pv(as_pv))
    }

    fn deinitialize_self(&self) -> Result<()> {
        self.pv.base().with_port(|port| port.deregister_pv(self))
    }
}

impl<T: PvType> Pv for PvHoldDelegate<T> {
    fn pv_base(&self) -> &PvBase {
        &self.pv
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        let key = self.key()?;
        let (timestamp, value) = self
            .delegate
            .read(&key)
            .map_err(|err| NdsError::from_callback(self.base().full_name(), err))?;
        let value: T = self.pv.typed_value(value)?;
        Ok((timestamp, value.into_value()))
    }

    fn write(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let value: T = self.pv.typed_value(value)?;
        let key = self.key()?;
        self.delegate
            .write(&key, timestamp, value.into_value())
            .map_err(|err| NdsError::from_callback(self.base().full_name(), err))
    }
}
