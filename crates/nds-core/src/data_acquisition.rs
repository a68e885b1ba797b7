//! Data acquisition node.
//!
//! [`DataAcquisition`] bundles the PVs every acquisition channel needs
//! (data, frequency, duration, amplitude, offset, decimation, sampling mode,
//! ground) with an asynchronous [`StateMachine`]. Starting the machine
//! records the start time and applies the `Decimation` setting to `Data`
//! before running the driver's own start function.

use crate::base::Base;
use crate::component::Component;
use crate::error::Result;
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::node::Node;
use crate::pv::{Pv, PvIn, PvVariableIn, PvVariableOut};
use crate::state_machine::{StateMachine, TransitionHandlers};
use crate::types::{NodeType, ScanType, Timestamp, TimestampDelegate};
use crate::value::PvType;
use parking_lot::{Mutex, RwLock};
use std::ops::Deref;
use std::sync::{Arc, OnceLock, Weak};

#[derive(Default)]
struct StartTiming {
    start_time: Mutex<Timestamp>,
    delegate: RwLock<Option<TimestampDelegate>>,
    owner: OnceLock<Weak<dyn Component>>,
}

impl StartTiming {
    fn now(&self) -> Timestamp {
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            return delegate();
        }
        match self.owner.get().and_then(Weak::upgrade) {
            Some(owner) => owner.base().timestamp(),
            None => Timestamp::now(),
        }
    }
}

/// Acquisition channel producing values of type `T`.
pub struct DataAcquisition<T: PvType> {
    node: Node,
    data: Arc<PvVariableIn<T>>,
    frequency: Arc<PvVariableOut<f64>>,
    duration: Arc<PvVariableOut<f64>>,
    amplitude: Arc<PvVariableOut<f64>>,
    offset: Arc<PvVariableOut<f64>>,
    decimation: Arc<PvVariableOut<i32>>,
    sampling_mode: Arc<PvVariableOut<i32>>,
    ground: Arc<PvVariableOut<i32>>,
    state_machine: Arc<StateMachine>,
    timing: Arc<StartTiming>,
}

impl<T: PvType> DataAcquisition<T> {
    /// Creates the node and its children.
    ///
    /// `max_elements` sizes the `Data` PV. The handlers drive the embedded
    /// state machine, which always runs asynchronously.
    pub fn new(name: impl Into<String>, max_elements: usize, handlers: TransitionHandlers) -> Self {
        let node = Node::with_type(name, NodeType::DataSource);
        let timestamp = Timestamp::now();

        let data = Arc::new(
            PvVariableIn::<T>::new("Data")
                .with_max_elements(max_elements)
                .with_description("Acquired data")
                .with_scan_type(ScanType::Interrupt),
        );
        let frequency = Arc::new(
            PvVariableOut::<f64>::new("Frequency")
                .with_description("Acquisition frequency"),
        );
        frequency.set_value(timestamp, 1.0);
        let duration = Arc::new(PvVariableOut::<f64>::new("Duration").with_description("Acquisition duration"));
        let amplitude = Arc::new(PvVariableOut::<f64>::new("Amplitude").with_description("Amplitude"));
        amplitude.set_value(timestamp, 1.0);
        let offset = Arc::new(PvVariableOut::<f64>::new("Offset").with_description("Offset"));
        let decimation = Arc::new(
            PvVariableOut::<i32>::with_role("Decimation", NamingRole::SetDecimationPv).with_description("Decimation"),
        );
        decimation.set_value(timestamp, 1);
        let sampling_mode = Arc::new(
            PvVariableOut::<i32>::new("SamplingMode")
                .with_description("Sampling Mode")
                .with_enumerations(["Single", "Continuous"]),
        );
        sampling_mode.set_value(timestamp, 1);
        let ground = Arc::new(
            PvVariableOut::<i32>::new("Ground")
                .with_description("Ground State")
                .with_enumerations(["On", "Off"]),
        );

        let timing = Arc::new(StartTiming::default());
        let user_start = handlers.start_fn();
        let start = {
            let timing = timing.clone();
            let data = Arc::downgrade(&data);
            let decimation = Arc::downgrade(&decimation);
            move || {
                *timing.start_time.lock() = timing.now();
                if let (Some(data), Some(decimation)) = (data.upgrade(), decimation.upgrade()) {
                    let factor = u32::try_from(decimation.value()).unwrap_or(1);
                    data.pv_in().set_decimation(factor);
                }
                user_start()
            }
        };
        let state_machine = Arc::new(StateMachine::new(true, handlers.on_start(start)));

        // Fresh node with distinct names: insertion cannot fail.
        let _ = node.add_child_arc(data.clone());
        let _ = node.add_child_arc(frequency.clone());
        let _ = node.add_child_arc(duration.clone());
        let _ = node.add_child_arc(amplitude.clone());
        let _ = node.add_child_arc(offset.clone());
        let _ = node.add_child_arc(decimation.clone());
        let _ = node.add_child_arc(sampling_mode.clone());
        let _ = node.add_child_arc(ground.clone());
        let _ = node.add_child_arc(state_machine.clone());

        Self {
            node,
            data,
            frequency,
            duration,
            amplitude,
            offset,
            decimation,
            sampling_mode,
            ground,
            state_machine,
            timing,
        }
    }

    /// Pushes acquired data on the `Data` PV.
    pub fn push(&self, timestamp: Timestamp, value: T) -> Result<()> {
        self.data.push(timestamp, value)
    }

    /// The embedded state machine.
    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.state_machine
    }

    /// The `Data` PV.
    pub fn data_pv(&self) -> &Arc<PvVariableIn<T>> {
        &self.data
    }

    /// Requested acquisition frequency.
    pub fn frequency_hz(&self) -> f64 {
        self.frequency.value()
    }

    /// Requested acquisition duration.
    pub fn duration_seconds(&self) -> f64 {
        self.duration.value()
    }

    /// Requested amplitude.
    pub fn amplitude(&self) -> f64 {
        self.amplitude.value()
    }

    /// Requested offset.
    pub fn offset(&self) -> f64 {
        self.offset.value()
    }

    /// Maximum number of elements of `Data`.
    pub fn max_elements(&self) -> usize {
        self.data.pv_base().max_elements()
    }

    /// Requested decimation.
    pub fn decimation(&self) -> i32 {
        self.decimation.value()
    }

    /// Sampling mode (0 single, 1 continuous).
    pub fn sampling_mode(&self) -> i32 {
        self.sampling_mode.value()
    }

    /// Ground setting (0 on, 1 off).
    pub fn ground(&self) -> i32 {
        self.ground.value()
    }

    /// Time recorded by the last start transition.
    pub fn start_timestamp(&self) -> Timestamp {
        *self.timing.start_time.lock()
    }

    /// Replaces the clock read when the acquisition starts.
    pub fn set_start_timestamp_delegate<F>(&self, delegate: F)
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        *self.timing.delegate.write() = Some(Arc::new(delegate));
    }
}

impl<T: PvType> Deref for DataAcquisition<T> {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl<T: PvType> Component for DataAcquisition<T> {
    fn base(&self) -> &Base {
        self.node.base()
    }

    fn as_node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn initialize_self(self: Arc<Self>, _factory: &Arc<Factory>) -> Result<()> {
        let owner: Arc<dyn Component> = self.clone();
        let _ = self.timing.owner.set(Arc::downgrade(&owner));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_and_defaults() {
        let acquisition = DataAcquisition::<Vec<i32>>::new("data", 10_000, TransitionHandlers::new());
        let names: Vec<String> = acquisition
            .children()
            .iter()
            .map(|child| child.base().name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "Amplitude",
                "Data",
                "Decimation",
                "Duration",
                "Frequency",
                "Ground",
                "Offset",
                "SamplingMode",
                "StateMachine"
            ]
        );
        assert_eq!(acquisition.max_elements(), 10_000);
        assert_eq!(acquisition.frequency_hz(), 1.0);
        assert_eq!(acquisition.amplitude(), 1.0);
        assert_eq!(acquisition.offset(), 0.0);
        assert_eq!(acquisition.decimation(), 1);
        assert_eq!(acquisition.sampling_mode(), 1);
        assert_eq!(acquisition.ground(), 0);
        assert_eq!(acquisition.node_type(), NodeType::DataSource);
        assert!(acquisition.state_machine().is_async());
    }

    #[test]
    fn test_start_applies_decimation_and_records_time() {
        let acquisition = DataAcquisition::<i32>::new("acq", 1, TransitionHandlers::new());
        acquisition.set_start_timestamp_delegate(|| Timestamp::new(77, 0));
        acquisition.decimation.set_value(Timestamp::default(), 4);

        let machine = acquisition.state_machine().clone();
        machine.set_state(crate::types::State::On).unwrap();
        wait_for(&machine, crate::types::State::On);
        machine.set_state(crate::types::State::Running).unwrap();
        wait_for(&machine, crate::types::State::Running);

        assert_eq!(acquisition.start_timestamp(), Timestamp::new(77, 0));
        assert_eq!(acquisition.data_pv().pv_in().decimation(), 4);
    }

    fn wait_for(machine: &StateMachine, state: crate::types::State) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while machine.local_state() != state {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for {state}");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}
