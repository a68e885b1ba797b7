//! Error types for the device tree.
//!
//! Every fallible operation in this crate returns [`NdsError`]. The variants
//! fall into four groups:
//!
//! - **Construction errors** (`DuplicateChild`, `AlreadyParented`, `NotRoot`,
//!   `NoPort`, `NotInitialized`): programmer mistakes detected while building
//!   or initializing a tree. They are reported at the call site and never
//!   recovered automatically.
//! - **State machine errors** (`StateMachineNoSuchTransition`,
//!   `StateMachineTransitionDenied`, `StateMachineRollBack`,
//!   `TransitionFailed`): domain errors. By the time one of them is returned
//!   the machine is already in a well defined state.
//! - **Registry errors** (`PvAlreadyDeclared`, `MissingInputPv`,
//!   `MissingOutputPv`, `MissingDestinationPv`, `DriverNotFound`, ...): name
//!   lookups that failed. A failed registration never leaves a partial entry.
//! - **Value errors** (`TypeMismatch`, `NotSupported`): reading or writing a
//!   PV with a value kind it does not hold.
//!
//! Driver supplied callbacks (delegates, transitions, commands) return
//! [`anyhow::Result`]. [`NdsError::from_callback`] brings their failures back
//! into this enum, preserving an `NdsError` that was raised deeper down.

use crate::types::State;
use crate::value::DataType;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NdsError>;

/// Errors raised by the device tree, its PVs and the factory.
#[derive(Error, Debug)]
pub enum NdsError {
    // =========================================================================
    // Tree construction
    // =========================================================================
    /// A sibling with the same name already exists.
    #[error("node '{parent}' already has a child named '{child}'")]
    DuplicateChild {
        /// Full name of the parent node
        parent: String,
        /// Name of the rejected child
        child: String,
    },

    /// The component was already attached to a parent.
    #[error("'{0}' already has a parent")]
    AlreadyParented(String),

    /// `initialize`/`deinitialize` called on a node that has a parent.
    #[error("'{0}' is not a root node")]
    NotRoot(String),

    /// No port among the ancestors of the node.
    #[error("no port found above '{0}'")]
    NoPort(String),

    /// Operation needs an initialized node.
    #[error("'{0}' has not been initialized")]
    NotInitialized(String),

    // =========================================================================
    // State machine
    // =========================================================================
    /// The requested state cannot be reached from the current one.
    #[error("{node}: no transition from state {from} to state {to}")]
    StateMachineNoSuchTransition {
        /// Full name of the state machine
        node: String,
        /// Current local state
        from: State,
        /// Requested state
        to: State,
    },

    /// The allow-change delegate refused the transition.
    #[error("{node}: the transition from state {from} to state {to} has been denied")]
    StateMachineTransitionDenied {
        /// Full name of the state machine
        node: String,
        /// Current local state
        from: State,
        /// Requested state
        to: State,
    },

    /// Raised by a transition function to restore the previous state.
    #[error("rolling back: {0}")]
    StateMachineRollBack(String),

    /// A transition function failed; the machine moved to `fault`.
    #[error("{node}: transition failed: {reason}")]
    TransitionFailed {
        /// Full name of the state machine
        node: String,
        /// Rendered error chain of the failure
        reason: String,
    },

    // =========================================================================
    // Values
    // =========================================================================
    /// A PV was accessed with a value type it does not hold.
    #[error("PV '{pv}' holds {expected} values, got {actual}")]
    TypeMismatch {
        /// Full name of the PV
        pv: String,
        /// The PV's declared data type
        expected: DataType,
        /// The data type used in the access
        actual: DataType,
    },

    /// The PV does not implement the requested operation.
    #[error("PV '{pv}' does not support {operation}")]
    NotSupported {
        /// Full name of the PV
        pv: String,
        /// Operation name (read, write)
        operation: &'static str,
    },

    /// A string could not be converted to the PV's value type.
    #[error("cannot parse '{text}' as {data_type}")]
    InvalidValue {
        /// Offending text
        text: String,
        /// Target data type
        data_type: DataType,
    },

    /// A driver callback returned an error.
    #[error("{node}: {source:#}")]
    Callback {
        /// Full name of the node owning the callback
        node: String,
        /// The driver's error
        #[source]
        source: anyhow::Error,
    },

    // =========================================================================
    // Registry and factory
    // =========================================================================
    /// An input or output PV with this full name is already registered.
    #[error("a PV named '{0}' has already been declared")]
    PvAlreadyDeclared(String),

    /// No input PV registered under this name.
    #[error("input PV '{0}' not found")]
    MissingInputPv(String),

    /// No output PV registered under this name.
    #[error("output PV '{0}' not found")]
    MissingOutputPv(String),

    /// Replication destination not found.
    #[error("destination PV '{0}' not found")]
    MissingDestinationPv(String),

    /// No driver registered under this name.
    #[error("driver '{0}' not found")]
    DriverNotFound(String),

    /// A driver with this name is already registered.
    #[error("driver '{0}' has already been registered")]
    DriverAlreadyRegistered(String),

    /// A device with this name already exists.
    #[error("device '{0}' has already been created")]
    DeviceAlreadyCreated(String),

    /// Nothing is allocated under this device name.
    #[error("device '{0}' is not allocated")]
    DeviceNotAllocated(String),

    /// No backend registered under this name.
    #[error("control system '{0}' not found")]
    ControlSystemNotFound(String),

    /// No command registered under this name for the node.
    #[error("command '{command}' not found on node '{node}'")]
    CommandNotFound {
        /// Full name of the node
        node: String,
        /// Command name
        command: String,
    },

    /// Wrong number of command parameters.
    #[error("command '{command}' expects {expected} parameters, got {actual}")]
    InvalidCommandArguments {
        /// Command name
        command: String,
        /// Declared arity
        expected: usize,
        /// Parameters received
        actual: usize,
    },

    // =========================================================================
    // Naming rules
    // =========================================================================
    /// Malformed naming rules text.
    #[error("naming rules syntax error at line {line}: {message}")]
    NamingRulesSyntax {
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    /// The requested rules section does not exist.
    #[error("naming rules section '{0}' not found")]
    NamingRulesMissingSection(String),

    /// A rules section was requested before any rules were loaded.
    #[error("no naming rules loaded, cannot select section '{0}'")]
    NamingRulesNotFound(String),

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// A thread could not be spawned or panicked.
    #[error("thread '{name}': {message}")]
    Thread {
        /// Thread name
        name: String,
        /// Failure description
        message: String,
    },

    /// Backend specific failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O failure while reading external files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NdsError {
    /// Converts the error returned by a driver callback.
    ///
    /// An `NdsError` raised inside the callback (for instance a nested
    /// `setState` that was denied, or a roll back request) is returned as is.
    pub fn from_callback(node: impl Into<String>, error: anyhow::Error) -> Self {
        match error.downcast::<NdsError>() {
            Ok(inner) => inner,
            Err(source) => NdsError::Callback {
                node: node.into(),
                source,
            },
        }
    }

    /// True for the roll back signal raised by transition functions.
    pub fn is_roll_back(&self) -> bool {
        matches!(self, NdsError::StateMachineRollBack(_))
    }
}
