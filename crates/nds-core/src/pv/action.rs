//! Action PV: a write that triggers driver work, acknowledged later on a
//! separate input PV.

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::delegate::{ReadFn, WriteFn};
use crate::pv::input::PvIn;
use crate::pv::output::{deinitialize_output, initialize_output, PvBaseOut, PvOut};
use crate::pv::{Pv, PvBase};
use crate::types::Timestamp;
use crate::value::{PvType, PvValue};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Integer output PV running a driver action on each write.
pub struct PvAction {
    output: PvBaseOut,
    writer: WriteFn<i32>,
    initializer: Option<ReadFn<i32>>,
    acknowledge: RwLock<Option<Weak<dyn PvIn>>>,
}

impl PvAction {
    /// Creates the PV.
    pub fn new<W>(name: impl Into<String>, writer: W) -> Self
    where
        W: Fn(Timestamp, i32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            output: PvBaseOut::with_role(name, i32::DATA_TYPE, NamingRole::OutputPv),
            writer: Box::new(writer),
            initializer: None,
            acknowledge: RwLock::new(None),
        }
    }

    /// Builder: supplies the initial value, written at initialization.
    pub fn with_initializer<R>(mut self, initializer: R) -> Self
    where
        R: Fn() -> anyhow::Result<(Timestamp, i32)> + Send + Sync + 'static,
    {
        self.initializer = Some(Box::new(initializer));
        self.output.pv().set_process_at_init(true);
        self
    }

    /// Sets the input PV that receives the acknowledgements.
    pub fn set_acknowledge_pv<P: PvIn>(&self, pv: &Arc<P>) {
        let pv: Arc<dyn PvIn> = pv.clone();
        *self.acknowledge.write() = Some(Arc::downgrade(&pv));
    }

    /// Pushes `value` to the acknowledge PV, if one is set and alive.
    pub fn set_value_back(&self, timestamp: Timestamp, value: i32) -> Result<()> {
        let acknowledge = self.acknowledge.read().as_ref().and_then(Weak::upgrade);
        match acknowledge {
            Some(pv) => pv.push_value(timestamp, value.into_value()),
            None => Ok(()),
        }
    }

    fn run(&self, timestamp: Timestamp, value: i32) -> Result<()> {
        (self.writer)(timestamp, value).map_err(|err| NdsError::from_callback(self.base().full_name(), err))
    }

    fn initial_value(&self) -> Result<Option<(Timestamp, i32)>> {
        match &self.initializer {
            Some(initializer) => initializer()
                .map(Some)
                .map_err(|err| NdsError::from_callback(self.base().full_name(), err)),
            None => Ok(None),
        }
    }
}

impl Component for PvAction {
    fn base(&self) -> &Base {
        self.output.pv().base()
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        initialize_output(self.clone(), factory)?;
        if let Some((timestamp, value)) = self.initial_value()? {
            self.run(timestamp, value)?;
        }
        Ok(())
    }

    fn deinitialize_self(&self) -> Result<()> {
        deinitialize_output(self)
    }
}

impl Pv for PvAction {
    fn pv_base(&self) -> &PvBase {
        self.output.pv()
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        match self.initial_value()? {
            Some((timestamp, value)) => Ok((timestamp, value.into_value())),
            None => Ok((Timestamp::default(), PvValue::Int32(0))),
        }
    }

    fn write(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let value: i32 = self.output.pv().typed_value(value)?;
        self.run(timestamp, value)
    }
}

impl PvOut for PvAction {
    fn pv_out(&self) -> &PvBaseOut {
        &self.output
    }
}
