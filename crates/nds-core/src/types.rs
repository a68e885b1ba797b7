//! Shared enumerations and the timestamp type.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a state machine.
///
/// The declaration order is the priority order used when several machines
/// are folded into a global state: a later variant always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum State {
    /// No state information available
    Unknown = 0,
    /// Device is off
    Off = 1,
    /// Transitional: switching off
    SwitchingOff = 2,
    /// Transitional: switching on
    Initializing = 3,
    /// Device is on and idle
    On = 4,
    /// Transitional: stopping the acquisition
    Stopping = 5,
    /// Transitional: starting the acquisition
    Starting = 6,
    /// Acquisition is running
    Running = 7,
    /// Device failed
    Fault = 8,
}

impl State {
    /// All states, in priority order.
    pub const ALL: [State; 9] = [
        State::Unknown,
        State::Off,
        State::SwitchingOff,
        State::Initializing,
        State::On,
        State::Stopping,
        State::Starting,
        State::Running,
        State::Fault,
    ];

    /// Integer encoding published on the state PVs.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decodes a value written to a state PV.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// Upper case label, also used as enumeration string on the state PVs.
    pub fn label(self) -> &'static str {
        match self {
            State::Unknown => "UNKNOWN",
            State::Off => "OFF",
            State::SwitchingOff => "SWITCHING_OFF",
            State::Initializing => "INITIALIZING",
            State::On => "ON",
            State::Stopping => "STOPPING",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Fault => "FAULT",
        }
    }

    /// True while a transition is executing.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            State::SwitchingOff | State::Initializing | State::Starting | State::Stopping
        )
    }

    /// Enumeration labels for all the states, in encoding order.
    pub fn labels() -> Vec<String> {
        Self::ALL.iter().map(|s| s.label().to_string()).collect()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Log level
// =============================================================================

/// Per-node log severity threshold.
///
/// A message is emitted only when its severity is at least the node's level.
/// `None` silences the node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug = 0,
    /// Informational messages
    Info = 1,
    /// Recoverable problems
    #[default]
    Warning = 2,
    /// Failures
    Error = 3,
    /// Nothing is logged
    None = 4,
}

impl LogLevel {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            3 => LogLevel::Error,
            _ => LogLevel::None,
        }
    }

    /// Parses `debug`, `info`, `warning`/`warn`, `error`, `none` (any case).
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "none" | "off" => Some(LogLevel::None),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::None => "none",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Roles
// =============================================================================

/// Role of a node, used to pick its naming template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeType {
    /// Plain grouping node
    #[default]
    Generic,
    /// Input channel
    InputChannel,
    /// Output channel
    OutputChannel,
    /// Node producing acquired data
    DataSource,
    /// Node consuming generated data
    DataSink,
    /// State machine node
    StateMachine,
}

/// Which way data flows through a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataDirection {
    /// Written by the driver, read by the backend
    Input,
    /// Written by the backend, read by the driver
    Output,
}

/// How the backend refreshes a PV.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ScanType {
    /// Read on request only
    #[default]
    Passive,
    /// Read every `period` seconds
    Periodic {
        /// Period in seconds
        period: f64,
    },
    /// Updated when the driver pushes a value
    Interrupt,
}

// =============================================================================
// Timestamp
// =============================================================================

/// Seconds and nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds
    pub sec: i64,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Timestamp {
    /// Builds a timestamp from its parts.
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Converts to a chrono date, `None` when out of range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.sec, self.nsec).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self {
            sec: time.timestamp(),
            nsec: time.timestamp_subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// Function that replaces the wall clock for a subtree.
pub type TimestampDelegate = Arc<dyn Fn() -> Timestamp + Send + Sync>;
