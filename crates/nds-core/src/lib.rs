//! `nds-core`
//!
//! Device tree, process variables and state machines for rust-nds.
//!
//! A driver describes its device as a tree of [`Node`]s, [`Port`]s and PVs,
//! attaches [`StateMachine`]s to the nodes whose hardware has a lifecycle,
//! and initializes the root through a [`Factory`]. Initialization computes
//! the external names with the factory's [`NamingRules`], gives each port an
//! [`Interface`] to the control system [`Backend`] and registers every PV and
//! command. From then on:
//!
//! - the backend reads and writes PVs,
//! - the driver pushes new values on input PVs, which fan out to the backend,
//!   to subscribed output PVs and to replicating input PVs,
//! - state machines gate switch on/off, start/stop and recovery, and report
//!   the highest-priority state of their subtree.
//!
//! ## Key Types
//!
//! - [`Component`] / [`ComponentExt`]: tree membership and root lifecycle
//! - [`PvVariableIn`], [`PvVariableOut`], [`PvDelegateIn`], [`PvDelegateOut`],
//!   [`PvAction`], [`PvHoldDelegate`]: the PV flavours
//! - [`StateMachine`] / [`State`]: lifecycle of a node
//! - [`Registry`]: process-wide directory of backends, drivers and PVs
//! - [`NdsError`]: every failure of this crate
//!
//! ## Example
//!
//! ```rust,ignore
//! let root = Arc::new(Port::new("dev0"));
//! let temperature = root.add_child(PvVariableIn::<f64>::new("temperature"))?;
//! root.add_child(StateMachine::new(false, TransitionHandlers::new()))?;
//! root.initialize("dev0", &factory)?;
//!
//! temperature.set(21.5)?;
//! ```

// Declared first so the node_* macros are visible to the other modules.
#[macro_use]
pub mod logging;

pub mod backend;
pub mod base;
pub mod component;
pub mod data_acquisition;
pub mod driver;
pub mod error;
pub mod factory;
pub mod naming;
pub mod node;
pub mod port;
pub mod pv;
pub mod registry;
pub mod state_machine;
pub mod thread;
pub mod types;
pub mod value;

pub use backend::{Backend, CommandDefinition, Interface};
pub use base::Base;
pub use component::{Component, ComponentExt};
pub use data_acquisition::DataAcquisition;
pub use driver::{DeviceDriver, DeviceObject, DriverFunctions, NamedParameters};
pub use error::{NdsError, Result};
pub use factory::Factory;
pub use naming::{NamingRole, NamingRules};
pub use node::Node;
pub use port::Port;
pub use pv::{
    Pv, PvAction, PvBase, PvDelegate, PvDelegateIn, PvDelegateOut, PvExt, PvHoldDelegate, PvIn,
    PvOut, PvVariableIn, PvVariableOut,
};
pub use registry::Registry;
pub use state_machine::{StateMachine, TransitionHandlers};
pub use thread::ThreadHandle;
pub use types::{
    DataDirection, LogLevel, NodeType, ScanType, State, Timestamp, TimestampDelegate,
};
pub use value::{DataType, PvType, PvValue};
