//! Input PVs: values flowing from the driver to the control system.
//!
//! A push on an input PV goes, in this order and on the pushing thread:
//!
//! 1. to the port interface, subject to decimation;
//! 2. to every output PV subscribed to it (`write`), regardless of decimation;
//! 3. to every input PV replicating it (`push`), which fans out again.
//!
//! Subscribers and replicas are kept in registration order behind one mutex,
//! held for the whole fan-out. A subscriber whose `write` pushes back into
//! the same input would deadlock.
//!
//! Only one thread may push to a given input PV at a time.

use crate::backend::CommandDefinition;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::output::PvOut;
use crate::pv::{Pv, PvBase};
use crate::types::{DataDirection, Timestamp};
use crate::value::{DataType, PvValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct InputLinks {
    subscribers: Vec<Weak<dyn PvOut>>,
    replicas: Vec<Weak<dyn PvIn>>,
}

/// State shared by every input PV: decimation and fan-out links.
pub struct PvBaseIn {
    pv: PvBase,
    decimation_factor: AtomicU32,
    decimation_count: AtomicU32,
    links: Mutex<InputLinks>,
}

impl PvBaseIn {
    /// Creates an input PV base with the `inputPV` naming role.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_role(name, data_type, NamingRole::InputPv)
    }

    /// Creates an input PV base with a specific naming role.
    pub fn with_role(name: impl Into<String>, data_type: DataType, role: NamingRole) -> Self {
        Self {
            pv: PvBase::new(name, DataDirection::Input, data_type, role),
            decimation_factor: AtomicU32::new(1),
            decimation_count: AtomicU32::new(1),
            links: Mutex::new(InputLinks::default()),
        }
    }

    /// PV metadata.
    pub fn pv(&self) -> &PvBase {
        &self.pv
    }

    /// Current decimation factor.
    pub fn decimation(&self) -> u32 {
        self.decimation_factor.load(Ordering::Acquire)
    }

    /// Forwards one push out of `factor` to the backend.
    ///
    /// 1 forwards everything, 0 forwards nothing. Subscribers and replicas
    /// are not affected.
    pub fn set_decimation(&self, factor: u32) {
        self.decimation_factor.store(factor, Ordering::Release);
        self.decimation_count.store(factor, Ordering::Release);
    }

    /// Asks the factory to replicate the input PV `source` into this one.
    pub fn replicate_from(&self, source: &str) -> Result<()> {
        let base = self.pv.base();
        base.factory()?.replicate(source, &base.full_name())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.links
            .lock()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.strong_count() > 0)
            .count()
    }

    /// Number of live replicas.
    pub fn replica_count(&self) -> usize {
        self.links
            .lock()
            .replicas
            .iter()
            .filter(|replica| replica.strong_count() > 0)
            .count()
    }

    /// Pushes `value` on behalf of `pv`, which must own this base.
    pub fn push(&self, pv: &dyn Pv, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let base = self.pv.base();
        if value.data_type() != self.pv.data_type() {
            return Err(NdsError::TypeMismatch {
                pv: base.full_name(),
                expected: self.pv.data_type(),
                actual: value.data_type(),
            });
        }
        if !base.is_initialized() {
            return Err(NdsError::NotInitialized(base.full_name()));
        }

        if self.decimation_tick() {
            base.with_port(|port| port.push(pv, timestamp, &value))?;
        }

        let links = self.links.lock();
        for subscriber in links.subscribers.iter().filter_map(Weak::upgrade) {
            subscriber.write(timestamp, value.clone())?;
        }
        for replica in links.replicas.iter().filter_map(Weak::upgrade) {
            replica.push_value(timestamp, value.clone())?;
        }
        Ok(())
    }

    fn decimation_tick(&self) -> bool {
        let factor = self.decimation_factor.load(Ordering::Acquire);
        if factor == 0 {
            return false;
        }
        let count = self
            .decimation_count
            .load(Ordering::Acquire)
            .saturating_sub(1);
        if count == 0 {
            self.decimation_count.store(factor, Ordering::Release);
            true
        } else {
            self.decimation_count.store(count, Ordering::Release);
            false
        }
    }

    // =========================================================================
    // Links, maintained by the registry
    // =========================================================================

    pub(crate) fn add_subscriber(&self, output: &Arc<dyn PvOut>) {
        let mut links = self.links.lock();
        links.subscribers.retain(|subscriber| subscriber.strong_count() > 0);
        let address = address_of(Arc::as_ptr(output));
        if !links
            .subscribers
            .iter()
            .any(|subscriber| address_of(subscriber.as_ptr()) == address)
        {
            links.subscribers.push(Arc::downgrade(output));
        }
    }

    pub(crate) fn remove_subscriber(&self, output: *const ()) -> bool {
        let mut links = self.links.lock();
        let before = links.subscribers.len();
        links
            .subscribers
            .retain(|subscriber| subscriber.strong_count() > 0 && address_of(subscriber.as_ptr()) != output);
        links.subscribers.len() != before
    }

    pub(crate) fn add_replica(&self, destination: &Arc<dyn PvIn>) {
        let mut links = self.links.lock();
        links.replicas.retain(|replica| replica.strong_count() > 0);
        let address = address_of(Arc::as_ptr(destination));
        if !links
            .replicas
            .iter()
            .any(|replica| address_of(replica.as_ptr()) == address)
        {
            links.replicas.push(Arc::downgrade(destination));
        }
    }

    pub(crate) fn remove_replica(&self, destination: *const ()) -> bool {
        let mut links = self.links.lock();
        let before = links.replicas.len();
        links
            .replicas
            .retain(|replica| replica.strong_count() > 0 && address_of(replica.as_ptr()) != destination);
        links.replicas.len() != before
    }

    pub(crate) fn clear_links(&self) {
        let mut links = self.links.lock();
        links.subscribers.clear();
        links.replicas.clear();
    }
}

/// Thin address of a possibly unsized pointer, for identity comparisons.
pub(crate) fn address_of<T: ?Sized>(pointer: *const T) -> *const () {
    pointer as *const ()
}

/// An input PV.
pub trait PvIn: Pv {
    /// Input state.
    fn pv_in(&self) -> &PvBaseIn;

    /// Pushes a value to the backend, the subscribers and the replicas.
    ///
    /// Implementations forward to [`PvBaseIn::push`] with `self`.
    fn push_value(&self, timestamp: Timestamp, value: PvValue) -> Result<()>;
}

// =============================================================================
// Lifecycle helpers
// =============================================================================

/// Registers an input PV with the registry, its port and the backend
/// command table.
pub(crate) fn initialize_input<P: PvIn>(pv: Arc<P>, factory: &Arc<Factory>) -> Result<()> {
    let base = pv.base();
    let full_name = base.full_name();

    let as_input: Arc<dyn PvIn> = pv.clone();
    factory
        .registry()
        .register_input_pv(&full_name, Arc::downgrade(&as_input))?;

    let as_pv: Arc<dyn Pv> = pv.clone();
    base.with_port(|port| port.register_pv(as_pv))?;

    let destination = full_name.clone();
    let weak_factory = Arc::downgrade(factory);
    factory.register_command(
        &full_name,
        CommandDefinition::new(
            "replicate",
            "replicate sourceInputPV",
            1,
            move |parameters| {
                let factory = weak_factory
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("factory has been dropped"))?;
                factory.replicate(&parameters[0], &destination)?;
                Ok(Vec::new())
            },
        ),
    )?;

    let weak_pv = Arc::downgrade(&pv);
    factory.register_command(
        &full_name,
        CommandDefinition::new(
            "decimation",
            "decimation decimationFactor",
            1,
            move |parameters| {
                let factor: u32 = parameters[0]
                    .trim()
                    .parse()
                    .map_err(|err| anyhow::anyhow!("invalid decimation '{}': {}", parameters[0], err))?;
                if let Some(pv) = weak_pv.upgrade() {
                    pv.pv_in().set_decimation(factor);
                }
                Ok(Vec::new())
            },
        ),
    )?;
    Ok(())
}

/// Undoes [`initialize_input`]. Missing entries are ignored.
pub(crate) fn deinitialize_input<P: PvIn>(pv: &P) -> Result<()> {
    let base = pv.base();
    if let Ok(factory) = base.factory() {
        factory.registry().deregister_input_pv(&base.full_name());
    }
    pv.pv_in().clear_links();
    base.with_port(|port| port.deregister_pv(pv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimation_tick() {
        let input = PvBaseIn::new("data", DataType::Int32);
        assert!((0..5).all(|_| input.decimation_tick()));

        input.set_decimation(3);
        let forwarded: Vec<bool> = (0..7).map(|_| input.decimation_tick()).collect();
        assert_eq!(forwarded, [false, false, true, false, false, true, false]);

        input.set_decimation(0);
        assert!((0..10).all(|_| !input.decimation_tick()));
    }

    #[test]
    fn test_push_needs_initialization() {
        struct Detached(PvBaseIn);
        impl Component for Detached {
            fn base(&self) -> &crate::base::Base {
                self.0.pv().base()
            }
        }
        impl Pv for Detached {
            fn pv_base(&self) -> &PvBase {
                self.0.pv()
            }
        }

        let pv = Detached(PvBaseIn::new("value", DataType::Int32));
        let err = pv
            .0
            .push(&pv, Timestamp::default(), PvValue::Int32(1))
            .unwrap_err();
        assert!(matches!(err, NdsError::NotInitialized(_)));

        let err = pv
            .0
            .push(&pv, Timestamp::default(), PvValue::Float64(1.0))
            .unwrap_err();
        assert!(matches!(err, NdsError::TypeMismatch { .. }));
    }
}
