//! PVs whose value lives in the driver.
//!
//! Reads and writes are forwarded to driver functions with no buffering.
//! Errors returned by those functions surface as [`NdsError::Callback`]
//! tagged with the PV's full name.
//!
//! [`NdsError::Callback`]: crate::error::NdsError::Callback

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::pv::input::{deinitialize_input, initialize_input, PvBaseIn, PvIn};
use crate::pv::output::{deinitialize_output, initialize_output, PvBaseOut, PvOut};
use crate::pv::{Pv, PvBase};
use crate::types::Timestamp;
use crate::value::{PvType, PvValue};
use std::sync::Arc;

/// Driver function producing a value.
pub type ReadFn<T> = Box<dyn Fn() -> anyhow::Result<(Timestamp, T)> + Send + Sync>;

/// Driver function consuming a value.
pub type WriteFn<T> = Box<dyn Fn(Timestamp, T) -> anyhow::Result<()> + Send + Sync>;

// =============================================================================
// Input
// =============================================================================

/// Input PV read through a driver function.
pub struct PvDelegateIn<T: PvType> {
    input: PvBaseIn,
    reader: ReadFn<T>,
}

impl<T: PvType> PvDelegateIn<T> {
    /// Creates the PV.
    pub fn new<R>(name: impl Into<String>, reader: R) -> Self
    where
        R: Fn() -> anyhow::Result<(Timestamp, T)> + Send + Sync + 'static,
    {
        Self::with_role(name, NamingRole::InputPv, reader)
    }

    /// Creates the PV with a specific naming role.
    pub fn with_role<R>(name: impl Into<String>, role: NamingRole, reader: R) -> Self
    where
        R: Fn() -> anyhow::Result<(Timestamp, T)> + Send + Sync + 'static,
    {
        Self {
            input: PvBaseIn::with_role(name, T::DATA_TYPE, role),
            reader: Box::new(reader),
        }
    }

    /// Calls the driver's read function.
    pub fn get(&self) -> Result<(Timestamp, T)> {
        (self.reader)().map_err(|err| NdsError::from_callback(self.base().full_name(), err))
    }

    /// Pushes a value to the backend, the subscribers and the replicas.
    pub fn push(&self, timestamp: Timestamp, value: T) -> Result<()> {
        self.input.push(self, timestamp, value.into_value())
    }
}

impl<T: PvType> Component for PvDelegateIn<T> {
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

impl<T: PvType> Pv for PvDelegateIn<T> {
    fn pv_base(&self) -> &PvBase {
        self.input.pv()
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        let (timestamp, value) = self.get()?;
        Ok((timestamp, value.into_value()))
    }
}

impl<T: PvType> PvIn for PvDelegateIn<T> {
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

/// Output PV written through a driver function.
///
/// An optional reader supplies the value for reads. When it is installed
/// with [`with_initializer`](Self::with_initializer) the PV is processed at
/// initialization: the reader's value is passed to the writer once the PV is
/// registered.
pub struct PvDelegateOut<T: PvType> {
    output: PvBaseOut,
    writer: WriteFn<T>,
    reader: Option<ReadFn<T>>,
}

impl<T: PvType> PvDelegateOut<T> {
    /// Creates the PV.
    pub fn new<W>(name: impl Into<String>, writer: W) -> Self
    where
        W: Fn(Timestamp, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_role(name, NamingRole::OutputPv, writer)
    }

    /// Creates the PV with a specific naming role.
    pub fn with_role<W>(name: impl Into<String>, role: NamingRole, writer: W) -> Self
    where
        W: Fn(Timestamp, T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            output: PvBaseOut::with_role(name, T::DATA_TYPE, role),
            writer: Box::new(writer),
            reader: None,
        }
    }

    /// Builder: installs a function answering reads.
    pub fn with_reader<R>(mut self, reader: R) -> Self
    where
        R: Fn() -> anyhow::Result<(Timestamp, T)> + Send + Sync + 'static,
    {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Builder: installs a reader and processes the PV at initialization.
    pub fn with_initializer<R>(self, reader: R) -> Self
    where
        R: Fn() -> anyhow::Result<(Timestamp, T)> + Send + Sync + 'static,
    {
        let pv = self.with_reader(reader);
        pv.output.pv().set_process_at_init(true);
        pv
    }

    /// Calls the driver's write function.
    pub fn set(&self, timestamp: Timestamp, value: T) -> Result<()> {
        (self.writer)(timestamp, value).map_err(|err| NdsError::from_callback(self.base().full_name(), err))
    }

    fn initial_value(&self) -> Result<Option<(Timestamp, T)>> {
        match &self.reader {
            Some(reader) => reader()
                .map(Some)
                .map_err(|err| NdsError::from_callback(self.base().full_name(), err)),
            None => Ok(None),
        }
    }
}

impl<T: PvType> Component for PvDelegateOut<T> {
    fn base(&self) -> &Base {
        self.output.pv().base()
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        initialize_output(self.clone(), factory)?;
        if self.output.pv().process_at_init() {
            if let Some((timestamp, value)) = self.initial_value()? {
                self.set(timestamp, value)?;
            }
        }
        Ok(())
    }

    fn deinitialize_self(&self) -> Result<()> {
        deinitialize_output(self)
    }
}

impl<T: PvType> Pv for PvDelegateOut<T> {
    fn pv_base(&self) -> &PvBase {
        self.output.pv()
    }

    fn read(&self) -> Result<(Timestamp, PvValue)> {
        match self.initial_value()? {
            Some((timestamp, value)) => Ok((timestamp, value.into_value())),
            None => Err(self.output.pv().not_supported("read")),
        }
    }

    fn write(&self, timestamp: Timestamp, value: PvValue) -> Result<()> {
        let value: T = self.output.pv().typed_value(value)?;
        self.set(timestamp, value)
    }
}

impl<T: PvType> PvOut for PvDelegateOut<T> {
    fn pv_out(&self) -> &PvBaseOut {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pv::PvExt;
    use parking_lot::Mutex;

    #[test]
    fn test_delegate_round_trip() {
        let shared = Arc::new(Mutex::new((Timestamp::default(), String::new())));

        let store = shared.clone();
        let out = PvDelegateOut::<String>::new("delegateOut", move |timestamp, value| {
            *store.lock() = (timestamp, value);
            Ok(())
        });
        let load = shared.clone();
        let input = PvDelegateIn::<String>::new("delegateIn", move || Ok(load.lock().clone()));

        out.write_as(Timestamp::new(10, 20), "hello".to_string()).unwrap();
        assert_eq!(
            input.read_as::<String>().unwrap(),
            (Timestamp::new(10, 20), "hello".to_string())
        );
    }

    #[test]
    fn test_reader_errors_carry_pv_name() {
        let input = PvDelegateIn::<i32>::new("broken", || anyhow::bail!("sensor offline"));
        let err = input.read().unwrap_err();
        assert_eq!(err.to_string(), "broken: sensor offline");
    }

    #[test]
    fn test_output_without_reader_cannot_be_read() {
        let out = PvDelegateOut::<i32>::new("setOnly", |_, _| Ok(()));
        assert!(matches!(out.read(), Err(NdsError::NotSupported { .. })));
        assert!(!out.pv_base().process_at_init());

        let out = out.with_initializer(|| Ok((Timestamp::new(1, 0), 7)));
        assert!(out.pv_base().process_at_init());
        assert_eq!(out.read_as::<i32>().unwrap().1, 7);
    }

    #[test]
    fn test_writer_type_check() {
        let out = PvDelegateOut::<Vec<i32>>::new("array", |_, _| Ok(()));
        assert!(out.write_as(Timestamp::default(), vec![1, 2, 3]).is_ok());
        assert!(matches!(
            out.write_as(Timestamp::default(), vec![1.0, 2.0]),
            Err(NdsError::TypeMismatch { .. })
        ));
    }
}
