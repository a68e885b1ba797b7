//! Push fan-out: backend, subscriptions, replication and decimation.

mod common;

use common::setup;
use nds_core::{
    ComponentExt, NdsError, Port, Pv, PvAction, PvDelegateIn, PvDelegateOut, PvExt,
    PvIn, PvOut, PvValue, PvVariableIn, PvVariableOut, Timestamp,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn ts(sec: i64) -> Timestamp {
    Timestamp::new(sec, 0)
}

#[test]
fn test_subscriber_sees_every_push() {
    let (factory, backend) = setup();
    let source = Arc::new(Port::new("src"));
    let input = source.add_child(PvVariableIn::<i32>::new("counter")).unwrap();
    source.initialize("src", &factory).unwrap();

    let sink = Arc::new(Port::new("sink"));
    let output = sink.add_child(PvVariableOut::<i32>::new("copy")).unwrap();
    sink.initialize("sink", &factory).unwrap();

    factory.subscribe("src-counter", "sink-copy").unwrap();
    input.set_value(ts(10), 7).unwrap();
    assert_eq!(output.stamped_value(), (ts(10), 7));
    assert_eq!(backend.pushed("src-counter"), [PvValue::Int32(7)]);

    factory.unsubscribe("sink-copy").unwrap();
    input.set_value(ts(11), 8).unwrap();
    assert_eq!(output.value(), 7);
}

#[test]
fn test_subscribe_through_output_command() {
    let (factory, backend) = setup();
    let root = Arc::new(Port::new("dev"));
    let input = root.add_child(PvVariableIn::<f64>::new("in")).unwrap();
    let output = root.add_child(PvVariableOut::<f64>::new("out")).unwrap();
    root.initialize("dev", &factory).unwrap();

    backend.execute("dev-out", "subscribe", &["dev-in"]).unwrap();
    input.push(ts(1), 2.5).unwrap();
    assert_eq!(output.value(), 2.5);
    assert_eq!(input.value(), 0.0);

    output.pv_out().unsubscribe().unwrap();
    input.push(ts(2), 3.5).unwrap();
    assert_eq!(output.value(), 2.5);
}

struct DecimatedLinks {
    backend: Arc<common::RecordingBackend>,
    input: Arc<PvVariableIn<i32>>,
    delivered: Arc<Mutex<Vec<i32>>>,
}

fn decimated_links() -> DecimatedLinks {
    let (factory, backend) = setup();
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let recorder = delivered.clone();
    let root = Arc::new(Port::new("dev"));
    let input = root.add_child(PvVariableIn::<i32>::new("data")).unwrap();
    root.add_child(PvDelegateOut::<i32>::new("record", move |_, value| {
        recorder.lock().push(value);
        Ok(())
    }))
    .unwrap();
    root.add_child(PvVariableIn::<i32>::new("copy")).unwrap();
    root.initialize("dev", &factory).unwrap();

    factory.subscribe("dev-data", "dev-record").unwrap();
    factory.replicate("dev-data", "dev-copy").unwrap();
    DecimatedLinks {
        backend,
        input,
        delivered,
    }
}

#[test]
fn test_decimation_only_thins_backend_pushes() {
    let links = decimated_links();
    links.backend.execute("dev-data", "decimation", &["3"]).unwrap();
    for value in 1..=7 {
        links.input.push(ts(value.into()), value).unwrap();
    }

    assert_eq!(links.backend.pushed("dev-data"), [PvValue::Int32(3), PvValue::Int32(6)]);
    assert_eq!(*links.delivered.lock(), [1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(links.backend.pushed("dev-copy").len(), 7);

    let err = links.backend.execute("dev-data", "decimation", &["many"]).unwrap_err();
    assert!(err.to_string().contains("invalid decimation"));
}

#[test]
fn test_decimation_zero_silences_backend() {
    let links = decimated_links();
    links.input.pv_in().set_decimation(0);
    for value in 0..5 {
        links.input.push(ts(1), value).unwrap();
    }

    assert!(links.backend.pushed("dev-data").is_empty());
    assert_eq!(*links.delivered.lock(), [0, 1, 2, 3, 4]);
    assert_eq!(
        links.backend.pushed("dev-copy"),
        (0..5).map(PvValue::Int32).collect::<Vec<_>>()
    );
}

#[test]
fn test_replication_chains() {
    let (factory, backend) = setup();
    let root = Arc::new(Port::new("dev"));
    let first = root.add_child(PvVariableIn::<i32>::new("first")).unwrap();
    let second = root.add_child(PvVariableIn::<i32>::new("second")).unwrap();
    let third = root.add_child(PvVariableIn::<i32>::new("third")).unwrap();
    let tail = root.add_child(PvVariableOut::<i32>::new("tail")).unwrap();
    root.initialize("dev", &factory).unwrap();

    factory.replicate("dev-first", "dev-second").unwrap();
    backend.execute("dev-third", "replicate", &["dev-second"]).unwrap();
    factory.subscribe("dev-third", "dev-tail").unwrap();

    first.push(ts(3), 42).unwrap();
    assert_eq!(backend.pushed("dev-first"), [PvValue::Int32(42)]);
    assert_eq!(backend.pushed("dev-second"), [PvValue::Int32(42)]);
    assert_eq!(backend.pushed("dev-third"), [PvValue::Int32(42)]);
    assert_eq!(tail.stamped_value(), (ts(3), 42));

    assert_eq!(second.pv_in().replica_count(), 1);
    factory.stop_replication_to("dev-third").unwrap();
    assert_eq!(second.pv_in().replica_count(), 0);
    first.push(ts(4), 43).unwrap();
    assert_eq!(backend.pushed("dev-third").len(), 1);
    assert_eq!(third.value(), 0);
}

#[test]
fn test_link_errors_name_the_pv() {
    let (factory, _) = setup();
    let root = Arc::new(Port::new("dev"));
    root.add_child(PvVariableIn::<i32>::new("in")).unwrap();
    root.add_child(PvVariableOut::<i32>::new("out")).unwrap();
    root.initialize("dev", &factory).unwrap();

    assert!(matches!(
        factory.subscribe("dev-nothing", "dev-out"),
        Err(NdsError::MissingInputPv(name)) if name == "dev-nothing"
    ));
    assert!(matches!(
        factory.subscribe("dev-in", "dev-nothing"),
        Err(NdsError::MissingOutputPv(name)) if name == "dev-nothing"
    ));
    assert!(matches!(
        factory.replicate("dev-in", "dev-out"),
        Err(NdsError::MissingDestinationPv(name)) if name == "dev-out"
    ));
}

#[test]
fn test_teardown_unlinks_subscribers() {
    let (factory, backend) = setup();
    let source = Arc::new(Port::new("src"));
    let input = source.add_child(PvVariableIn::<i32>::new("value")).unwrap();
    source.initialize("src", &factory).unwrap();

    let sink = Arc::new(Port::new("sink"));
    sink.add_child(PvVariableOut::<i32>::new("value")).unwrap();
    sink.initialize("sink", &factory).unwrap();
    factory.subscribe("src-value", "sink-value").unwrap();
    assert_eq!(input.pv_in().subscriber_count(), 1);

    sink.deinitialize().unwrap();
    assert_eq!(input.pv_in().subscriber_count(), 0);
    input.push(ts(1), 5).unwrap();
    assert_eq!(backend.pushed("src-value"), [PvValue::Int32(5)]);
}

#[test]
fn test_failing_subscriber_aborts_push() {
    let (factory, _) = setup();
    let root = Arc::new(Port::new("dev"));
    let input = root.add_child(PvVariableIn::<i32>::new("in")).unwrap();
    root.add_child(PvDelegateOut::<i32>::new("broken", |_, _| anyhow::bail!("disk full")))
        .unwrap();
    root.initialize("dev", &factory).unwrap();
    factory.subscribe("dev-in", "dev-broken").unwrap();

    let err = input.push(ts(1), 1).unwrap_err();
    assert_eq!(err.to_string(), "dev-broken: disk full");
}

#[test]
fn test_push_type_mismatch() {
    let (factory, _) = setup();
    let root = Arc::new(Port::new("dev"));
    let input = root.add_child(PvVariableIn::<i32>::new("in")).unwrap();
    root.initialize("dev", &factory).unwrap();

    let err = input.push_value(ts(1), PvValue::String("x".into())).unwrap_err();
    assert!(matches!(err, NdsError::TypeMismatch { pv, .. } if pv == "dev-in"));
}

#[test]
fn test_push_before_initialization() {
    let input = PvVariableIn::<i32>::new("in");
    assert!(matches!(input.push(ts(1), 1), Err(NdsError::NotInitialized(_))));
    input.set_value(ts(1), 5).unwrap();
    assert_eq!(input.value(), 5);
}

#[test]
fn test_delegate_round_trip() {
    let (factory, backend) = setup();
    let store = Arc::new(Mutex::new(String::from("initial")));
    let root = Arc::new(Port::new("dev"));

    let reader = store.clone();
    let delegate_in = root
        .add_child(PvDelegateIn::<String>::new("delegateIn", move || {
            Ok((Timestamp::new(9, 0), reader.lock().clone()))
        }))
        .unwrap();
    let writer = store.clone();
    let delegate_out = root
        .add_child(PvDelegateOut::<String>::new("delegateOut", move |_, value| {
            *writer.lock() = value;
            Ok(())
        }))
        .unwrap();
    root.initialize("dev", &factory).unwrap();

    delegate_out.write_as(ts(1), String::from("updated")).unwrap();
    assert_eq!(
        delegate_in.read_as::<String>().unwrap(),
        (Timestamp::new(9, 0), String::from("updated"))
    );
    assert!(matches!(delegate_out.read(), Err(NdsError::NotSupported { .. })));

    delegate_in.push(ts(2), String::from("pushed")).unwrap();
    assert_eq!(backend.pushed("dev-delegateIn"), [PvValue::String("pushed".into())]);
}

#[test]
fn test_delegate_initializer_runs_at_initialization() {
    let (factory, _) = setup();
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = written.clone();
    let root = Arc::new(Port::new("dev"));
    root.add_child(
        PvDelegateOut::<i32>::new("setpoint", move |timestamp, value| {
            sink.lock().push((timestamp, value));
            Ok(())
        })
        .with_initializer(|| Ok((Timestamp::new(3, 0), 12))),
    )
    .unwrap();
    root.initialize("dev", &factory).unwrap();
    assert_eq!(*written.lock(), [(Timestamp::new(3, 0), 12)]);
}

#[test]
fn test_action_acknowledges_on_input() {
    let (factory, backend) = setup();
    let root = Arc::new(Port::new("dev"));
    let acknowledge = root.add_child(PvVariableIn::<i32>::new("ack")).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();
    let action = root
        .add_child(PvAction::new("trigger", move |_, value| {
            recorded.lock().push(value);
            Ok(())
        }))
        .unwrap();
    action.set_acknowledge_pv(&acknowledge);
    root.initialize("dev", &factory).unwrap();

    action.write_as(ts(1), 5).unwrap();
    assert_eq!(*requests.lock(), [5]);
    action.set_value_back(ts(2), 1).unwrap();
    assert_eq!(backend.pushed_stamped("dev-ack"), [(ts(2), PvValue::Int32(1))]);
    assert_eq!(action.read_as::<i32>().unwrap().1, 0);
}
