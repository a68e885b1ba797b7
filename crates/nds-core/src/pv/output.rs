//! Output PVs: values flowing from the control system to the driver.
//!
//! An output PV can also subscribe to an input PV anywhere in the process:
//! every value pushed on the input is then written to the output.

use crate::backend::CommandDefinition;
use crate::component::Component;
use crate::error::Result;
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::{Pv, PvBase};
use crate::types::DataDirection;
use crate::value::DataType;
use std::sync::Arc;

/// State shared by every output PV.
pub struct PvBaseOut {
    pv: PvBase,
}

impl PvBaseOut {
    /// Creates an output PV base with the `outputPV` naming role.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_role(name, data_type, NamingRole::OutputPv)
    }

    /// Creates an output PV base with a specific naming role.
    pub fn with_role(name: impl Into<String>, data_type: DataType, role: NamingRole) -> Self {
        Self {
            pv: PvBase::new(name, DataDirection::Output, data_type, role),
        }
    }

    /// PV metadata.
    pub fn pv(&self) -> &PvBase {
        &self.pv
    }

    /// Receives every value pushed on the input PV named `input`.
    pub fn subscribe_to(&self, input: &str) -> Result<()> {
        let base = self.pv.base();
        base.factory()?.subscribe(input, &base.full_name())
    }

    /// Stops receiving values from any input PV.
    pub fn unsubscribe(&self) -> Result<()> {
        let base = self.pv.base();
        base.factory()?.unsubscribe(&base.full_name())
    }
}

/// An output PV.
pub trait PvOut: Pv {
    /// Output state.
    fn pv_out(&self) -> &PvBaseOut;
}

/// Registers an output PV with the registry, its port and the backend
/// command table.
pub(crate) fn initialize_output<P: PvOut>(pv: Arc<P>, factory: &Arc<Factory>) -> Result<()> {
    let base = pv.base();
    let full_name = base.full_name();

    let as_output: Arc<dyn PvOut> = pv.clone();
    factory
        .registry()
        .register_output_pv(&full_name, Arc::downgrade(&as_output))?;

    let as_pv: Arc<dyn Pv> = pv.clone();
    base.with_port(|port| port.register_pv(as_pv))?;

    let subscriber = full_name.clone();
    let weak_factory = Arc::downgrade(factory);
    factory.register_command(
        &full_name,
        CommandDefinition::new("subscribe", "subscribe inputPV", 1, move |parameters| {
            let factory = weak_factory
                .upgrade()
                .ok_or_else(|| anyhow::anyhow!("factory has been dropped"))?;
            factory.subscribe(&parameters[0], &subscriber)?;
            Ok(Vec::new())
        }),
    )
}

/// Undoes [`initialize_output`]. Missing entries are ignored.
pub(crate) fn deinitialize_output<P: PvOut>(pv: &P) -> Result<()> {
    let base = pv.base();
    if let Ok(factory) = base.factory() {
        factory.registry().deregister_output_pv(&base.full_name());
    }
    base.with_port(|port| port.deregister_pv(pv))
}
