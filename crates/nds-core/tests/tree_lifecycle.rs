//! Initialization, naming and teardown of device trees.

mod common;

use common::setup;
use nds_core::{
    Component, ComponentExt, DataDirection, NdsError, Node, NodeType, Port, Pv, PvDelegate, PvExt,
    PvHoldDelegate, PvValue, PvVariableIn, PvVariableOut, StateMachine, Timestamp,
    TransitionHandlers,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const RULES: &str = "\
# rules for the recording backend
[recording]
separator0 = /
separator1 = :
separator2 = .
rootNode = %s
stateMachineNode = STATE
getStatePV = STATUS

[upper]
toUpper = true
separator1 = _
";

#[test]
fn test_external_names_follow_rules() {
    let (factory, backend) = setup();
    factory.load_naming_rules(RULES.as_bytes(), "").unwrap();

    let root = Arc::new(Port::new("dev"));
    let channel = root.add_child(Node::with_type("ch0", NodeType::InputChannel)).unwrap();
    let value = channel.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    let machine = channel
        .add_child(StateMachine::new(false, TransitionHandlers::new()))
        .unwrap();
    root.initialize("dev", &factory).unwrap();

    assert_eq!(root.base().full_external_name().unwrap(), "/dev");
    assert_eq!(channel.base().full_external_name().unwrap(), "/dev:ch0");
    assert_eq!(value.base().full_name(), "dev-ch0-value");
    assert_eq!(value.base().full_external_name().unwrap(), "/dev:ch0.value");
    assert_eq!(value.base().full_name_from_port().unwrap(), "ch0-value");
    assert_eq!(value.base().full_external_name_from_port().unwrap(), "ch0.value");
    assert_eq!(machine.base().full_external_name().unwrap(), "/dev:ch0.STATE");

    let get_state = machine.as_node().and_then(|node| node.child("getState")).unwrap();
    assert_eq!(
        get_state.base().full_external_name().unwrap(),
        "/dev:ch0.STATE.STATUS"
    );
    assert_eq!(root.base().full_name_from_port().unwrap(), "");
    assert_eq!(backend.journal.lock().interfaces, ["dev"]);
    assert_eq!(backend.journal.lock().terminated, ["dev"]);
}

#[test]
fn test_rules_apply_to_trees_initialized_afterwards() {
    let (factory, _) = setup();
    factory.load_naming_rules(RULES.as_bytes(), "upper").unwrap();

    let root = Arc::new(Port::new("dev"));
    let value = root.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    root.initialize("dev", &factory).unwrap();
    assert_eq!(value.base().full_external_name().unwrap(), "DEV_VALUE");

    root.deinitialize().unwrap();
    factory.set_naming_rules("").unwrap();
    root.initialize("dev", &factory).unwrap();
    assert_eq!(value.base().full_external_name().unwrap(), "dev-value");
}

#[test]
fn test_only_roots_initialize() {
    let (factory, _) = setup();
    let root = Arc::new(Port::new("dev"));
    let channel = root.add_child(Node::new("ch0")).unwrap();

    let err = channel.initialize("dev", &factory).unwrap_err();
    assert!(matches!(err, NdsError::NotRoot(name) if name == "dev-ch0"));
    let err = channel.deinitialize().unwrap_err();
    assert!(matches!(err, NdsError::NotRoot(_)));
}

#[test]
fn test_duplicate_siblings_rejected() {
    let root = Arc::new(Port::new("dev"));
    root.add_child(Node::new("a")).unwrap();
    let err = root.add_child(PvVariableIn::<i32>::new("a")).unwrap_err();
    assert!(matches!(
        err,
        NdsError::DuplicateChild { parent, child } if parent == "dev" && child == "a"
    ));
    assert!(root.add_child(StateMachine::new(false, TransitionHandlers::new())).is_ok());
    assert!(root.add_child(StateMachine::new(false, TransitionHandlers::new())).is_err());
}

#[test]
fn test_child_cannot_be_reparented() {
    let first = Arc::new(Port::new("first"));
    let second = Arc::new(Port::new("second"));
    let shared = Arc::new(PvVariableIn::<i32>::new("shared"));
    first.add_child_arc(shared.clone()).unwrap();
    let err = second.add_child_arc(shared).unwrap_err();
    assert!(matches!(err, NdsError::AlreadyParented(_)));
}

#[test]
fn test_pv_outside_port_fails_initialization() {
    let (factory, _) = setup();
    let root = Arc::new(Node::new("dev"));
    root.add_child(PvVariableIn::<i32>::new("value")).unwrap();

    let err = root.initialize("dev", &factory).unwrap_err();
    assert!(matches!(err, NdsError::NoPort(name) if name == "dev-value"));
    assert!(factory.registry().pv_names().is_empty());
    assert!(factory.held_nodes("dev").is_empty());
}

#[test]
fn test_deinitialize_removes_pvs_and_commands() {
    let (factory, backend) = setup();
    let root = Arc::new(Port::new("dev"));
    root.add_child(PvVariableIn::<i32>::new("in")).unwrap();
    root.add_child(PvVariableOut::<i32>::new("out")).unwrap();
    root.initialize("dev", &factory).unwrap();

    assert_eq!(factory.registry().pv_names(), ["dev-in", "dev-out"]);
    assert_eq!(backend.pv_names(), ["dev-in", "dev-out"]);
    assert_eq!(backend.command_names("dev-in"), [
        "setLogLevelDebug",
        "setLogLevelInfo",
        "setLogLevelWarning",
        "setLogLevelError",
        "setLogLevelNone",
        "replicate",
        "decimation",
    ]);
    assert!(backend.command_names("dev-out").contains(&"subscribe".to_string()));
    assert_eq!(factory.held_nodes("dev").len(), 1);

    root.deinitialize().unwrap();
    assert!(factory.registry().pv_names().is_empty());
    assert!(backend.pv_names().is_empty());
    assert!(backend.journal.lock().commands.is_empty());
    assert!(factory.held_nodes("dev").is_empty());
    assert!(!root.base().is_initialized());
}

#[test]
fn test_same_names_in_two_trees_conflict() {
    let (factory, _) = setup();
    let first = Arc::new(Port::new("dev"));
    first.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    first.initialize("a", &factory).unwrap();

    let second = Arc::new(Port::new("dev"));
    second.add_child(PvVariableOut::<i32>::new("value")).unwrap();
    let err = second.initialize("b", &factory).unwrap_err();
    assert!(matches!(err, NdsError::PvAlreadyDeclared(name) if name == "dev-value"));

    // The failed tree left nothing behind.
    assert_eq!(factory.registry().pv_names(), ["dev-value"]);
    assert!(factory.held_nodes("b").is_empty());
}

#[test]
fn test_log_level_commands_cascade() {
    let (factory, backend) = setup();
    let root = Arc::new(Port::new("dev"));
    let channel = root.add_child(Node::new("ch0")).unwrap();
    let value = channel.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    root.initialize("dev", &factory).unwrap();

    assert_eq!(value.base().log_level(), nds_core::LogLevel::Warning);
    backend.execute("dev-ch0", "setLogLevelDebug", &[]).unwrap();
    assert_eq!(channel.base().log_level(), nds_core::LogLevel::Debug);
    assert_eq!(value.base().log_level(), nds_core::LogLevel::Debug);
    assert_eq!(root.base().log_level(), nds_core::LogLevel::Warning);

    let err = backend.execute("dev-ch0", "setLogLevelNone", &["extra"]).unwrap_err();
    assert!(matches!(err, NdsError::InvalidCommandArguments { expected: 0, actual: 1, .. }));
}

#[test]
fn test_factory_default_log_level_reaches_new_trees() {
    let (factory, _) = setup();
    factory.set_default_log_level(nds_core::LogLevel::Error);
    let root = Arc::new(Port::new("dev"));
    let value = root.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    root.initialize("dev", &factory).unwrap();
    assert_eq!(value.base().log_level(), nds_core::LogLevel::Error);
}

struct Registers {
    values: Mutex<HashMap<String, PvValue>>,
}

impl PvDelegate for Registers {
    fn read(&self, pv: &str) -> anyhow::Result<(Timestamp, PvValue)> {
        let value = self
            .values
            .lock()
            .get(pv)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("register {pv} never written"))?;
        Ok((Timestamp::new(1, 0), value))
    }

    fn write(&self, pv: &str, _timestamp: Timestamp, value: PvValue) -> anyhow::Result<()> {
        self.values.lock().insert(pv.to_string(), value);
        Ok(())
    }
}

#[test]
fn test_hold_delegate_keys_by_name_from_port() {
    let (factory, backend) = setup();
    let registers = Arc::new(Registers {
        values: Mutex::new(HashMap::new()),
    });
    let root = Arc::new(Port::new("dev"));
    let bank = root.add_child(Node::new("bank")).unwrap();
    let gain = bank
        .add_child(PvHoldDelegate::<f64>::new("gain", DataDirection::Output, registers.clone()))
        .unwrap();
    let offset = bank
        .add_child(PvHoldDelegate::<f64>::new("offset", DataDirection::Output, registers.clone()))
        .unwrap();
    root.initialize("dev", &factory).unwrap();

    gain.write_as(Timestamp::new(1, 0), 2.5).unwrap();
    offset.write_as(Timestamp::new(1, 0), -1.0).unwrap();
    assert_eq!(gain.read_as::<f64>().unwrap().1, 2.5);
    assert_eq!(
        registers.values.lock().get("bank-offset"),
        Some(&PvValue::Float64(-1.0))
    );

    let err = gain.write(Timestamp::default(), PvValue::Int32(1)).unwrap_err();
    assert!(matches!(err, NdsError::TypeMismatch { .. }));

    // Visible to the backend, invisible to the link registry.
    assert!(backend.pv("dev-bank-gain").is_some());
    assert!(factory.registry().output_pv("dev-bank-gain").is_none());
}
