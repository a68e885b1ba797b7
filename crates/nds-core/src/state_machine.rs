//! Lifecycle state machine.
//!
//! A [`StateMachine`] is a child node named `StateMachine` that gates the
//! hardware lifecycle of its parent. Callers request one of the stable
//! states; the machine moves through a transitional state while the driver's
//! transition function runs:
//!
//! ```text
//!            switch_on                 start
//!   OFF ── INITIALIZING ──▶ ON ── STARTING ──▶ RUNNING
//!    ▲                      │  ◀── STOPPING ──    │
//!    └──── SWITCHING_OFF ◀──┘        stop          │
//!    ▲                                            │
//!    └──── SWITCHING_OFF ◀── FAULT ◀── (any failure)
//!               recover
//! ```
//!
//! The function returns `Ok` to reach the requested state, an error wrapping
//! [`NdsError::StateMachineRollBack`] to go back to the state it started
//! from, or any other error to land in `FAULT`. Asynchronous machines run
//! the function on a dedicated thread; the caller only sees the transitional
//! state and failures are logged.
//!
//! All state reads and writes in the process are serialized by one reentrant
//! lock, so a global state computed at the root is never torn by a
//! concurrent transition further down.

use crate::base::Base;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::node::{max_state, Node};
use crate::pv::{Pv, PvDelegateIn, PvDelegateOut};
use crate::thread::{spawn_named, ThreadHandle};
use crate::types::{NodeType, ScanType, State, Timestamp};
use crate::{node_error, node_info, node_warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static STATE_LOCK: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Takes the process-wide state lock.
pub(crate) fn state_lock() -> ReentrantMutexGuard<'static, ()> {
    STATE_LOCK.lock()
}

/// Driver function run during a transition.
pub type TransitionFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Veto called with `(local, global, requested)` before a transition.
pub type AllowChangeFn = Arc<dyn Fn(State, State, State) -> bool + Send + Sync>;

/// The driver functions attached to a state machine.
///
/// Every transition defaults to a no-op and every change is allowed.
#[derive(Clone)]
pub struct TransitionHandlers {
    switch_on: TransitionFn,
    switch_off: TransitionFn,
    start: TransitionFn,
    stop: TransitionFn,
    recover: TransitionFn,
    allow_change: AllowChangeFn,
}

impl Default for TransitionHandlers {
    fn default() -> Self {
        let noop: TransitionFn = Arc::new(|| Ok(()));
        Self {
            switch_on: noop.clone(),
            switch_off: noop.clone(),
            start: noop.clone(),
            stop: noop.clone(),
            recover: noop,
            allow_change: Arc::new(|_, _, _| true),
        }
    }
}

impl TransitionHandlers {
    /// No-op handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs while going from `OFF` to `ON`.
    pub fn on_switch_on<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.switch_on = Arc::new(f);
        self
    }

    /// Runs while going from `ON` to `OFF`.
    pub fn on_switch_off<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.switch_off = Arc::new(f);
        self
    }

    /// Runs while going from `ON` to `RUNNING`.
    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.start = Arc::new(f);
        self
    }

    /// Runs while going from `RUNNING` to `ON`.
    pub fn on_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.stop = Arc::new(f);
        self
    }

    /// Runs while going from `FAULT` to `OFF`.
    pub fn on_recover<F>(mut self, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.recover = Arc::new(f);
        self
    }

    /// Installs the veto.
    pub fn allow_change<F>(mut self, f: F) -> Self
    where
        F: Fn(State, State, State) -> bool + Send + Sync + 'static,
    {
        self.allow_change = Arc::new(f);
        self
    }

    pub(crate) fn start_fn(&self) -> TransitionFn {
        self.start.clone()
    }

    fn for_transition(&self, from: State, to: State) -> Option<(State, TransitionFn)> {
        let (transitional, function) = match (from, to) {
            (State::Off, State::On) => (State::Initializing, &self.switch_on),
            (State::On, State::Off) => (State::SwitchingOff, &self.switch_off),
            (State::On, State::Running) => (State::Starting, &self.start),
            (State::Running, State::On) => (State::Stopping, &self.stop),
            (State::Fault, State::Off) => (State::SwitchingOff, &self.recover),
            _ => return None,
        };
        Some((transitional, function.clone()))
    }
}

type SelfRef = Arc<OnceLock<Weak<StateMachine>>>;

fn upgrade(this: &SelfRef) -> anyhow::Result<Arc<StateMachine>> {
    this.get()
        .and_then(Weak::upgrade)
        .ok_or_else(|| anyhow::anyhow!("the state machine has not been initialized"))
}

/// A transition in flight.
#[derive(Debug, Clone, Copy)]
struct Transition {
    initial: State,
    target: State,
    generation: u64,
}

/// Hierarchical lifecycle state machine.
pub struct StateMachine {
    node: Node,
    is_async: bool,
    handlers: TransitionHandlers,
    state: Mutex<(Timestamp, State)>,
    // Bumped whenever a transition starts or FAULT is forced, under the state lock.
    generation: AtomicU64,
    get_state: Arc<PvDelegateIn<i32>>,
    transition_thread: Mutex<Option<ThreadHandle>>,
    this: SelfRef,
}

impl StateMachine {
    /// Creates a machine in state `OFF`.
    ///
    /// An asynchronous machine runs each transition function on its own
    /// thread; a synchronous one blocks the caller.
    pub fn new(is_async: bool, handlers: TransitionHandlers) -> Self {
        let node = Node::with_type("StateMachine", NodeType::StateMachine);
        let this: SelfRef = Arc::new(OnceLock::new());

        let writer = this.clone();
        let reader = this.clone();
        let set_state = PvDelegateOut::<i32>::with_role("setState", NamingRole::SetStatePv, move |_, value| {
            let requested = State::from_i32(value).ok_or_else(|| anyhow::anyhow!("invalid state value {value}"))?;
            upgrade(&writer)?.set_state(requested)?;
            Ok(())
        })
        .with_reader(move || {
            let (timestamp, state) = upgrade(&reader)?.local_state_stamped();
            Ok((timestamp, state.as_i32()))
        })
        .with_description("Set local state")
        .with_scan_type(ScanType::Passive)
        .with_enumerations(State::labels());

        let reader = this.clone();
        let get_state = PvDelegateIn::<i32>::with_role("getState", NamingRole::GetStatePv, move || {
            let (timestamp, state) = upgrade(&reader)?.local_state_stamped();
            Ok((timestamp, state.as_i32()))
        })
        .with_description("Get local state")
        .with_scan_type(ScanType::Interrupt)
        .with_enumerations(State::labels());

        let reader = this.clone();
        let get_global_state =
            PvDelegateIn::<i32>::with_role("getGlobalState", NamingRole::GetGlobalStatePv, move || {
                let machine = upgrade(&reader)?;
                Ok((machine.base().timestamp(), machine.global_state().as_i32()))
            })
            .with_description("Get global state")
            .with_scan_type(ScanType::Passive)
            .with_enumerations(State::labels());

        // Fresh node with distinct names: insertion cannot fail.
        let get_state = Arc::new(get_state);
        let _ = node.add_child_arc(get_state.clone());
        let _ = node.add_child(set_state);
        let _ = node.add_child(get_global_state);

        for (command, target) in [
            ("switchOn", State::On),
            ("switchOff", State::Off),
            ("start", State::Running),
            ("stop", State::On),
        ] {
            let this = this.clone();
            node.base().define_command(command, command, 0, move |_| {
                upgrade(&this)?.set_state(target)?;
                Ok(Vec::new())
            });
        }

        Self {
            node,
            is_async,
            handlers,
            state: Mutex::new((Timestamp::default(), State::Off)),
            generation: AtomicU64::new(0),
            get_state,
            transition_thread: Mutex::new(None),
            this,
        }
    }

    /// True when transitions run on a separate thread.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Own state.
    pub fn local_state(&self) -> State {
        self.local_state_stamped().1
    }

    /// Own state and the time it was entered.
    pub fn local_state_stamped(&self) -> (Timestamp, State) {
        let _guard = state_lock();
        *self.state.lock()
    }

    /// Highest-priority state among this machine and the siblings' subtrees.
    pub fn global_state(&self) -> State {
        self.global_state_stamped().1
    }

    /// [`global_state`](Self::global_state) with the winning timestamp.
    pub fn global_state_stamped(&self) -> (Timestamp, State) {
        let _guard = state_lock();
        let local = *self.state.lock();
        match self.base().parent() {
            Some(parent) => match parent.as_node() {
                Some(node) => max_state(local, node.children_state(Some(self))),
                None => local,
            },
            None => local,
        }
    }

    /// True when `requested` is reachable now and the veto agrees.
    ///
    /// Has no side effect.
    pub fn can_change(&self, requested: State) -> bool {
        let (local, global) = {
            let _guard = state_lock();
            (self.local_state(), self.global_state())
        };
        let reachable = requested == State::Fault || self.handlers.for_transition(local, requested).is_some();
        reachable && (self.handlers.allow_change)(local, global, requested)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Requests a stable state.
    ///
    /// Requesting the current state does nothing. `FAULT` is entered
    /// immediately without running any function; a transition still running
    /// at that moment no longer changes the state when it returns.
    pub fn set_state(self: &Arc<Self>, requested: State) -> Result<()> {
        let (transition, function) = {
            let _guard = state_lock();
            let local = self.local_state();
            if requested == local {
                return Ok(());
            }
            let global = self.global_state();

            if requested == State::Fault {
                if !(self.handlers.allow_change)(local, global, requested) {
                    return Err(self.denied(local, requested));
                }
                node_error!(self.base(), "switching from state {} to state {}", local, State::Fault);
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.update(State::Fault);
                return Ok(());
            }

            let (transitional, function) = self.handlers.for_transition(local, requested).ok_or_else(|| {
                NdsError::StateMachineNoSuchTransition {
                    node: self.base().full_name(),
                    from: local,
                    to: requested,
                }
            })?;
            if !(self.handlers.allow_change)(local, global, requested) {
                return Err(self.denied(local, requested));
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.update(transitional);
            let transition = Transition {
                initial: local,
                target: requested,
                generation,
            };
            (transition, function)
        };

        if !self.is_async {
            return self.execute(transition, &function);
        }

        self.join_transition();

        let machine = Arc::clone(self);
        let work = move || {
            if let Err(err) = machine.execute(transition, &function) {
                node_error!(machine.base(), "error while asynchronously changing the state: {}", err);
            }
        };
        let name = format!("{}-transition", self.base().name());
        let spawned = match self.base().factory() {
            Ok(factory) => factory.run_in_thread(&name, work),
            Err(_) => spawn_named(&name, Box::new(work)).map(|handle| ThreadHandle::new(name.clone(), handle)),
        };
        match spawned {
            Ok(handle) => {
                *self.transition_thread.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                node_error!(self.base(), "cannot start the transition thread: {}", err);
                self.update(State::Fault);
                Err(err)
            }
        }
    }

    fn execute(&self, transition: Transition, function: &TransitionFn) -> Result<()> {
        let Transition { initial, target, .. } = transition;
        node_info!(self.base(), "switching state from {} to {}", initial, target);
        let error = match function() {
            Ok(()) => {
                if self.settle(&transition, target) {
                    node_info!(self.base(), "state switching successful");
                }
                return Ok(());
            }
            Err(error) => error,
        };

        match error.downcast::<NdsError>() {
            Ok(err) if err.is_roll_back() => {
                node_warn!(self.base(), "{} - rolling back to state {}", err, initial);
                self.settle(&transition, initial);
                Err(err)
            }
            Ok(err) => {
                node_error!(self.base(), "{} - switching to state {}", err, State::Fault);
                self.settle(&transition, State::Fault);
                Err(err)
            }
            Err(err) => {
                node_error!(self.base(), "{:#} - switching to state {}", err, State::Fault);
                self.settle(&transition, State::Fault);
                Err(NdsError::TransitionFailed {
                    node: self.base().full_name(),
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    fn denied(&self, from: State, to: State) -> NdsError {
        NdsError::StateMachineTransitionDenied {
            node: self.base().full_name(),
            from,
            to,
        }
    }

    /// Ends `transition` in `state` unless FAULT was forced meanwhile.
    fn settle(&self, transition: &Transition, state: State) -> bool {
        let _guard = state_lock();
        if self.generation.load(Ordering::SeqCst) != transition.generation {
            node_warn!(
                self.base(),
                "state changed to {} while switching to {}, ignoring result {}",
                self.local_state(),
                transition.target,
                state
            );
            return false;
        }
        self.update(state);
        true
    }

    /// Enters `state`, stamps it and publishes it on `getState`.
    fn update(&self, state: State) {
        let timestamp = self.base().timestamp();
        let _guard = state_lock();
        *self.state.lock() = (timestamp, state);
        if self.get_state.base().is_initialized() {
            if let Err(err) = self.get_state.push(timestamp, state.as_i32()) {
                node_error!(self.base(), "cannot publish state {}: {}", state, err);
            }
        }
    }

    /// Waits for the previous transition thread, unless called from it.
    fn join_transition(&self) {
        let previous = self.transition_thread.lock().take();
        if let Some(previous) = previous {
            if previous.thread_id() != std::thread::current().id() {
                if let Err(err) = previous.join() {
                    node_error!(self.base(), "transition thread failed: {}", err);
                }
            }
        }
    }
}

impl Component for StateMachine {
    fn base(&self) -> &Base {
        self.node.base()
    }

    fn as_node(&self) -> Option<&Node> {
        Some(&self.node)
    }

    fn as_state_machine(&self) -> Option<&StateMachine> {
        Some(self)
    }

    fn initialize_self(self: Arc<Self>, factory: &Arc<Factory>) -> Result<()> {
        let _ = self.this.set(Arc::downgrade(&self));
        // The lifecycle commands are also reachable from the owning node.
        if let Some(parent) = self.base().parent() {
            let parent_name = parent.base().full_name();
            for command in self.base().commands() {
                factory.register_command(&parent_name, command)?;
            }
        }
        Ok(())
    }

    fn finish_initialize(&self) -> Result<()> {
        self.update(State::Off);
        Ok(())
    }

    fn deinitialize_self(&self) -> Result<()> {
        self.join_transition();
        Ok(())
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.join_transition();
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.base().full_name())
            .field("async", &self.is_async)
            .field("state", &*self.state.lock())
            .finish()
    }
}
