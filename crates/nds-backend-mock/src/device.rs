//! Mock device driver.
//!
//! Every device allocated by [`MockDeviceDriver`] builds the same tree:
//!
//! ```text
//! <device>                       node
//! └── Channel1                   port
//!     ├── variableIn0            i32 input
//!     ├── variableIn1            Vec<i32> input
//!     ├── numAcquisitions        i32 output, arrays pushed per start
//!     ├── data                   DataAcquisition<Vec<i32>>
//!     ├── delegateIn/delegateOut String delegates sharing one register
//!     ├── testVariableIn         String input, "Initial value"
//!     ├── writeTestVariableIn    String output, stores into testVariableIn
//!     ├── pushTestVariableIn     String output, pushes on testVariableIn
//!     ├── testVariableOut        String output
//!     ├── readTestVariableOut    String input reading testVariableOut
//!     └── setCurrentTime         i32 output, installs a fixed clock
//! ```
//!
//! Switching the acquisition on or off takes `switch_delay_ms` (default
//! 500). Starting it spawns a thread that pushes `numAcquisitions` arrays of
//! `data.max_elements()` samples; stopping it joins that thread.

use anyhow::Context;
use nds_core::{
    Component, ComponentExt, DataAcquisition, DeviceDriver, DeviceObject, Factory, NamedParameters,
    Node, Port, PvDelegateIn, PvDelegateOut, PvVariableIn, PvVariableOut, ThreadHandle, Timestamp,
    TransitionHandlers,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Driver name of the mock device.
pub const MOCK_DRIVER_NAME: &str = "testDevice";

/// Samples per acquired array.
pub const MAX_SAMPLES: usize = 10_000;

const DEFAULT_SWITCH_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// Driver
// =============================================================================

/// Allocates [`MockDevice`]s and tracks the live ones by name.
#[derive(Default)]
pub struct MockDeviceDriver {
    devices: Mutex<BTreeMap<String, Weak<MockDevice>>>,
}

impl MockDeviceDriver {
    /// Creates the driver.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The live device allocated under `name`.
    pub fn device(&self, name: &str) -> Option<Arc<MockDevice>> {
        self.devices.lock().get(name).and_then(Weak::upgrade)
    }

    /// Names of the live devices.
    pub fn device_names(&self) -> Vec<String> {
        self.devices
            .lock()
            .iter()
            .filter(|(_, device)| device.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl DeviceDriver for MockDeviceDriver {
    fn driver_name(&self) -> &str {
        MOCK_DRIVER_NAME
    }

    fn description(&self) -> &str {
        "In-memory device with variables, delegates and a data acquisition channel"
    }

    fn allocate(
        &self,
        factory: &Arc<Factory>,
        device: &str,
        parameters: &NamedParameters,
    ) -> anyhow::Result<DeviceObject> {
        let switch_delay = match parameters.get("switch_delay_ms") {
            Some(text) => Duration::from_millis(
                text.parse()
                    .with_context(|| format!("invalid switch_delay_ms '{text}'"))?,
            ),
            None => DEFAULT_SWITCH_DELAY,
        };
        let created = MockDevice::create(factory, device, switch_delay)?;
        self.devices
            .lock()
            .insert(device.to_string(), Arc::downgrade(&created));
        Ok(Box::new(created))
    }

    fn deallocate(&self, device: DeviceObject) {
        if let Ok(device) = device.downcast::<Arc<MockDevice>>() {
            tracing::debug!(device = %device.name, "deallocating mock device");
            let mut devices = self.devices.lock();
            // A newer device may already live under the same name.
            if devices
                .get(&device.name)
                .is_some_and(|held| std::ptr::eq(held.as_ptr(), Arc::as_ptr(&device)))
            {
                devices.remove(&device.name);
            }
        }
    }
}

impl std::fmt::Debug for MockDeviceDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDeviceDriver")
            .field("devices", &self.device_names())
            .finish()
    }
}

// =============================================================================
// Device
// =============================================================================

#[derive(Default)]
struct Acquisition {
    data: OnceLock<Weak<DataAcquisition<Vec<i32>>>>,
    count: OnceLock<Weak<PvVariableOut<i32>>>,
    thread: Mutex<Option<ThreadHandle>>,
}

impl Acquisition {
    fn start(&self) -> anyhow::Result<()> {
        let data = self
            .data
            .get()
            .and_then(Weak::upgrade)
            .context("acquisition node is gone")?;
        let count = self
            .count
            .get()
            .and_then(Weak::upgrade)
            .map_or(0, |count| count.value());
        let count = usize::try_from(count).unwrap_or(0);
        let samples = data.max_elements();

        let target = Arc::downgrade(&data);
        let handle = data.base().run_in_thread("acquire", move || acquire(&target, count, samples))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.thread.lock().take() {
            handle.join()?;
        }
        Ok(())
    }
}

fn acquire(target: &Weak<DataAcquisition<Vec<i32>>>, count: usize, samples: usize) {
    let rising: Vec<i32> = (0..samples).map(|sample| sample as i32).collect();
    let falling: Vec<i32> = (0..samples).map(|sample| (samples - sample) as i32).collect();
    for acquisition in 0..count {
        let Some(data) = target.upgrade() else {
            return;
        };
        let values = if acquisition % 2 == 0 { &rising } else { &falling };
        if let Err(err) = data.push(data.base().timestamp(), values.clone()) {
            tracing::warn!(node = %data.base().full_name(), error = %err, "acquisition push failed");
            return;
        }
    }
}

/// One allocated mock device.
pub struct MockDevice {
    name: String,
    root: Arc<Node>,
    channel: Arc<Port>,
    variable_in0: Arc<PvVariableIn<i32>>,
    variable_in1: Arc<PvVariableIn<Vec<i32>>>,
    num_acquisitions: Arc<PvVariableOut<i32>>,
    data: Arc<DataAcquisition<Vec<i32>>>,
    test_variable_in: Arc<PvVariableIn<String>>,
    test_variable_out: Arc<PvVariableOut<String>>,
}

impl MockDevice {
    fn create(factory: &Arc<Factory>, name: &str, switch_delay: Duration) -> anyhow::Result<Arc<Self>> {
        let root = Arc::new(Node::new(name));
        let channel = root.add_child(Port::new("Channel1"))?;

        let variable_in0 = channel.add_child(PvVariableIn::<i32>::new("variableIn0"))?;
        let variable_in1 = channel.add_child(PvVariableIn::<Vec<i32>>::new("variableIn1"))?;
        let num_acquisitions = channel.add_child(PvVariableOut::<i32>::new("numAcquisitions"))?;

        let acquisition = Arc::new(Acquisition::default());
        let pause = move || -> anyhow::Result<()> {
            std::thread::sleep(switch_delay);
            Ok(())
        };
        let handlers = TransitionHandlers::new()
            .on_switch_on(pause)
            .on_switch_off(pause)
            .on_start({
                let acquisition = acquisition.clone();
                move || acquisition.start()
            })
            .on_stop({
                let acquisition = acquisition.clone();
                move || acquisition.stop()
            });
        let data = channel.add_child(DataAcquisition::<Vec<i32>>::new("data", MAX_SAMPLES, handlers))?;
        let _ = acquisition.data.set(Arc::downgrade(&data));
        let _ = acquisition.count.set(Arc::downgrade(&num_acquisitions));

        let register = Arc::new(Mutex::new((Timestamp::default(), String::new())));
        let reader = register.clone();
        channel.add_child(PvDelegateIn::<String>::new("delegateIn", move || Ok(reader.lock().clone())))?;
        let writer = register;
        channel.add_child(PvDelegateOut::<String>::new("delegateOut", move |timestamp, value| {
            *writer.lock() = (timestamp, value);
            Ok(())
        }))?;

        let test_variable_in = channel.add_child(PvVariableIn::<String>::new("testVariableIn"))?;
        test_variable_in.set_value(Timestamp::now(), "Initial value".to_string())?;
        let target = Arc::downgrade(&test_variable_in);
        channel.add_child(PvDelegateOut::<String>::new("writeTestVariableIn", move |timestamp, value| {
            upgrade(&target)?.set_value(timestamp, value)?;
            Ok(())
        }))?;
        let target = Arc::downgrade(&test_variable_in);
        channel.add_child(PvDelegateOut::<String>::new("pushTestVariableIn", move |timestamp, value| {
            upgrade(&target)?.push(timestamp, value)?;
            Ok(())
        }))?;

        let test_variable_out = channel.add_child(PvVariableOut::<String>::new("testVariableOut"))?;
        let source = Arc::downgrade(&test_variable_out);
        channel.add_child(PvDelegateIn::<String>::new("readTestVariableOut", move || {
            Ok(upgrade(&source)?.stamped_value())
        }))?;

        let clock_owner = Arc::downgrade(&channel);
        channel.add_child(PvDelegateOut::<i32>::new("setCurrentTime", move |_, seconds| {
            let sec = i64::from(seconds);
            let nsec = u32::try_from(seconds.saturating_add(10)).unwrap_or(0);
            upgrade(&clock_owner)?
                .base()
                .set_timestamp_delegate(move || Timestamp::new(sec, nsec));
            Ok(())
        }))?;

        root.initialize(name, factory)?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            root,
            channel,
            variable_in0,
            variable_in1,
            num_acquisitions,
            data,
            test_variable_in,
            test_variable_out,
        }))
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root node of the device tree.
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// The `Channel1` port.
    pub fn channel(&self) -> &Arc<Port> {
        &self.channel
    }

    /// `variableIn0`.
    pub fn variable_in0(&self) -> &Arc<PvVariableIn<i32>> {
        &self.variable_in0
    }

    /// `variableIn1`.
    pub fn variable_in1(&self) -> &Arc<PvVariableIn<Vec<i32>>> {
        &self.variable_in1
    }

    /// `numAcquisitions`.
    pub fn num_acquisitions(&self) -> &Arc<PvVariableOut<i32>> {
        &self.num_acquisitions
    }

    /// The acquisition channel.
    pub fn data(&self) -> &Arc<DataAcquisition<Vec<i32>>> {
        &self.data
    }

    /// `testVariableIn`.
    pub fn test_variable_in(&self) -> &Arc<PvVariableIn<String>> {
        &self.test_variable_in
    }

    /// `testVariableOut`.
    pub fn test_variable_out(&self) -> &Arc<PvVariableOut<String>> {
        &self.test_variable_out
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("name", &self.name)
            .field("state", &self.data.state_machine().local_state())
            .finish_non_exhaustive()
    }
}

fn upgrade<T>(pv: &Weak<T>) -> anyhow::Result<Arc<T>> {
    pv.upgrade().context("PV has been dropped")
}
