//! Process variables.
//!
//! A PV is a leaf of the device tree that the backend exposes to the
//! control system. Values cross the driver/backend boundary as [`PvValue`],
//! a closed sum type over the seven supported kinds; each concrete PV is
//! generic over one Rust type and rejects the other kinds with
//! [`NdsError::TypeMismatch`].
//!
//! | type | direction | storage |
//! |------|-----------|---------|
//! | [`PvVariableIn`] | input | own copy, pushed on `set_value` |
//! | [`PvVariableOut`] | output | own copy, written by the backend |
//! | [`PvDelegateIn`] | input | driver read function |
//! | [`PvDelegateOut`] | output | driver write (and optional init) function |
//! | [`PvAction`] | output | driver action, acknowledged on another PV |
//! | [`PvHoldDelegate`] | either | shared driver object keyed by PV name |
//!
//! Input PVs push to their port, to the output PVs subscribed to them and to
//! the input PVs replicating them. See [`input`].

pub mod action;
pub mod delegate;
pub mod hold;
pub mod input;
pub mod output;
pub mod variable;

pub use action::PvAction;
pub use delegate::{PvDelegateIn, PvDelegateOut};
pub use hold::{PvDelegate, PvHoldDelegate};
pub use input::{PvBaseIn, PvIn};
pub use output::{PvBaseOut, PvOut};
pub use variable::{PvVariableIn, PvVariableOut};

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::naming::NamingRole;
use crate::types::{DataDirection, ScanType, Timestamp};
use crate::value::{expect_type, DataType, PvType, PvValue};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Metadata common to every PV.
pub struct PvBase {
    base: Base,
    direction: DataDirection,
    data_type: DataType,
    description: RwLock<String>,
    units: RwLock<String>,
    scan_type: RwLock<ScanType>,
    max_elements: AtomicUsize,
    enumerations: RwLock<Vec<String>>,
    process_at_init: AtomicBool,
}

impl PvBase {
    /// Creates the metadata of a PV.
    pub fn new(
        name: impl Into<String>,
        direction: DataDirection,
        data_type: DataType,
        role: NamingRole,
    ) -> Self {
        Self {
            base: Base::new(name, role),
            direction,
            data_type,
            description: RwLock::new(String::new()),
            units: RwLock::new(String::new()),
            scan_type: RwLock::new(ScanType::default()),
            max_elements: AtomicUsize::new(1),
            enumerations: RwLock::new(Vec::new()),
            process_at_init: AtomicBool::new(false),
        }
    }

    /// Component base.
    pub fn base(&self) -> &Base {
        &self.base
    }

    /// Input or output.
    pub fn direction(&self) -> DataDirection {
        self.direction
    }

    /// Kind of the values held.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Human readable description.
    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    /// Sets the description.
    pub fn set_description(&self, description: impl Into<String>) {
        *self.description.write() = description.into();
    }

    /// Engineering units.
    pub fn units(&self) -> String {
        self.units.read().clone()
    }

    /// Sets the engineering units.
    pub fn set_units(&self, units: impl Into<String>) {
        *self.units.write() = units.into();
    }

    /// How the backend refreshes the PV.
    pub fn scan_type(&self) -> ScanType {
        *self.scan_type.read()
    }

    /// Sets the scan type.
    pub fn set_scan_type(&self, scan_type: ScanType) {
        *self.scan_type.write() = scan_type;
    }

    /// Maximum number of elements for array PVs.
    pub fn max_elements(&self) -> usize {
        self.max_elements.load(Ordering::Acquire)
    }

    /// Sets the maximum number of elements.
    pub fn set_max_elements(&self, max_elements: usize) {
        self.max_elements.store(max_elements, Ordering::Release);
    }

    /// Labels of an enumerated PV, indexed by value.
    pub fn enumerations(&self) -> Vec<String> {
        self.enumerations.read().clone()
    }

    /// Sets the enumeration labels.
    pub fn set_enumerations(&self, labels: Vec<String>) {
        *self.enumerations.write() = labels;
    }

    /// True when the backend should process the PV right after registration.
    pub fn process_at_init(&self) -> bool {
        self.process_at_init.load(Ordering::Acquire)
    }

    /// Sets the process-at-init flag.
    pub fn set_process_at_init(&self, process: bool) {
        self.process_at_init.store(process, Ordering::Release);
    }

    /// Checks and unwraps a value for this PV.
    pub fn typed_value<T: PvType>(&self, value: PvValue) -> Result<T> {
        expect_type(&self.base.full_name(), value)
    }

    pub(crate) fn not_supported(&self, operation: &'static str) -> NdsError {
        NdsError::NotSupported {
            pv: self.base.full_name(),
            operation,
        }
    }
}

impl std::fmt::Debug for PvBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PvBase")
            .field("name", &self.base.name())
            .field("direction", &self.direction)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

/// A process variable.
pub trait Pv: Component {
    /// PV metadata.
    fn pv_base(&self) -> &PvBase;

    /// Reads the current value. Unsupported unless overridden.
    fn read(&self) -> Result<(Timestamp, PvValue)> {
        Err(self.pv_base().not_supported("read"))
    }

    /// Writes a value. Unsupported unless overridden.
    fn write(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let _ = (timestamp, value);
        Err(self.pv_base().not_supported("write"))
    }

    /// Builder: sets the description.
    fn with_description(self, description: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.pv_base().set_description(description);
        self
    }

    /// Builder: sets the units.
    fn with_units(self, units: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.pv_base().set_units(units);
        self
    }

    /// Builder: sets the scan type.
    fn with_scan_type(self, scan_type: ScanType) -> Self
    where
        Self: Sized,
    {
        self.pv_base().set_scan_type(scan_type);
        self
    }

    /// Builder: sets the maximum number of elements.
    fn with_max_elements(self, max_elements: usize) -> Self
    where
        Self: Sized,
    {
        self.pv_base().set_max_elements(max_elements);
        self
    }

    /// Builder: sets the enumeration labels.
    fn with_enumerations<I, S>(self, labels: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pv_base()
            .set_enumerations(labels.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: overrides the name fed to the naming rules.
    fn with_external_name(self, name: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.base().set_external_name(name);
        self
    }
}

/// Typed access on top of [`Pv::read`] / [`Pv::write`].
pub trait PvExt: Pv {
    /// Reads and unwraps the value as `T`.
    fn read_as<T: PvType>(&self) -> Result<(Timestamp, T)> {
        let (timestamp, value) = self.read()?;
        Ok((timestamp, self.pv_base().typed_value(value)?))
    }

    /// Wraps and writes a `T`.
    fn write_as<T: PvType>(&self, timestamp: Timestamp, value: T) -> Result<()> {
        self.write(timestamp, value.into_value())
    }
}

impl<P: Pv + ?Sized> PvExt for P {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare {
        pv: PvBase,
    }

    impl Component for Bare {
        fn base(&self) -> &Base {
            self.pv.base()
        }
    }

    impl Pv for Bare {
        fn pv_base(&self) -> &PvBase {
            &self.pv
        }
    }

    fn bare() -> Bare {
        Bare {
            pv: PvBase::new("bare", DataDirection::Input, DataType::Int32, NamingRole::InputPv),
        }
    }

    #[test]
    fn test_default_read_write_unsupported() {
        let pv = bare();
        assert!(matches!(
            pv.read(),
            Err(NdsError::NotSupported { operation: "read", .. })
        ));
        assert!(matches!(
            pv.write_as(Timestamp::default(), 3),
            Err(NdsError::NotSupported { operation: "write", .. })
        ));
    }

    #[test]
    fn test_builders_set_metadata() {
        let pv = bare()
            .with_description("A test PV")
            .with_units("mm")
            .with_scan_type(ScanType::Periodic { period: 0.5 })
            .with_max_elements(16)
            .with_enumerations(["Low", "High"]);
        let meta = pv.pv_base();
        assert_eq!(meta.description(), "A test PV");
        assert_eq!(meta.units(), "mm");
        assert_eq!(meta.scan_type(), ScanType::Periodic { period: 0.5 });
        assert_eq!(meta.max_elements(), 16);
        assert_eq!(meta.enumerations(), ["Low", "High"]);
        assert_eq!(meta.direction(), DataDirection::Input);
        assert!(!meta.process_at_init());
    }
}
