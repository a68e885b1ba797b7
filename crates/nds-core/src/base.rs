//! State shared by every component of the tree.
//!
//! [`Base`] carries the identity of a node or PV (raw name, external name,
//! role), its position in the tree (parent, level), its log level, the
//! commands it declares and the four names computed at initialization:
//!
//! | name | example |
//! |------|---------|
//! | full name | `dev-Channel1-data-StateMachine-getState` |
//! | full name from port | `data-StateMachine-getState` |
//! | full external name | `/dev.Channel1.data.STATE.getState` |
//! | full external name from port | `data.STATE.getState` |
//!
//! The internal names are always joined with `-`. External names follow the
//! factory's [`NamingRules`](crate::naming::NamingRules).

use crate::backend::CommandDefinition;
use crate::component::Component;
use crate::error::{NdsError, Result};
use crate::factory::Factory;
use crate::naming::NamingRole;
use crate::port::Port;
use crate::thread::ThreadHandle;
use crate::types::{LogLevel, Timestamp, TimestampDelegate};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Separator of the internal full names.
pub const NAME_SEPARATOR: &str = "-";

#[derive(Debug, Clone, Default)]
struct CachedNames {
    full: String,
    from_port: String,
    external: String,
    external_from_port: String,
}

struct Binding {
    factory: Weak<Factory>,
    device: String,
}

/// Identity, position and per-node settings of a component.
pub struct Base {
    name: String,
    role: NamingRole,
    external_name: RwLock<String>,
    attached: AtomicBool,
    parent: OnceLock<Weak<dyn Component>>,
    level: AtomicU32,
    log_level: AtomicU8,
    log_level_explicit: AtomicBool,
    commands: Mutex<Vec<CommandDefinition>>,
    timestamp_delegate: RwLock<Option<TimestampDelegate>>,
    names: RwLock<Option<CachedNames>>,
    binding: RwLock<Option<Binding>>,
}

impl Base {
    /// Creates the base of a component with the given raw name and role.
    pub fn new(name: impl Into<String>, role: NamingRole) -> Self {
        let name = name.into();
        Self {
            external_name: RwLock::new(name.clone()),
            name,
            role,
            attached: AtomicBool::new(false),
            parent: OnceLock::new(),
            level: AtomicU32::new(0),
            log_level: AtomicU8::new(LogLevel::default() as u8),
            log_level_explicit: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            timestamp_delegate: RwLock::new(None),
            names: RwLock::new(None),
            binding: RwLock::new(None),
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Raw name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name fed to the naming rules. Defaults to the raw name.
    pub fn external_name(&self) -> String {
        self.external_name.read().clone()
    }

    /// Overrides the name fed to the naming rules.
    ///
    /// Takes effect at the next initialization.
    pub fn set_external_name(&self, name: impl Into<String>) {
        *self.external_name.write() = name.into();
    }

    /// Naming role. Any component without parent resolves as a root.
    pub fn role(&self) -> NamingRole {
        if self.parent().is_some() {
            self.role
        } else {
            NamingRole::Root
        }
    }

    // =========================================================================
    // Tree position
    // =========================================================================

    pub(crate) fn mark_attached(&self) -> Result<()> {
        if self.attached.swap(true, Ordering::AcqRel) {
            return Err(NdsError::AlreadyParented(self.full_name()));
        }
        Ok(())
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Records the parent. A second call must name the same parent.
    pub(crate) fn set_parent(&self, parent: Weak<dyn Component>, level: u32) -> Result<()> {
        match self.parent.get() {
            Some(current) if Weak::ptr_eq(current, &parent) => Ok(()),
            Some(_) => Err(NdsError::AlreadyParented(self.full_name())),
            None => {
                self.parent
                    .set(parent)
                    .map_err(|_| NdsError::AlreadyParented(self.name.clone()))?;
                self.level.store(level, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Parent component, `None` for a root or a detached component.
    pub fn parent(&self) -> Option<Arc<dyn Component>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// Depth in the tree, 0 for the root.
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Acquire)
    }

    /// Nearest enclosing [`Port`] among the ancestors.
    pub fn port(&self) -> Result<Arc<dyn Component>> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.as_port().is_some() {
                return Ok(node);
            }
            current = node.base().parent();
        }
        Err(NdsError::NoPort(self.full_name()))
    }

    pub(crate) fn with_port<R>(&self, action: impl FnOnce(&Port) -> Result<R>) -> Result<R> {
        let port = self.port()?;
        match port.as_port() {
            Some(port) => action(port),
            None => Err(NdsError::NoPort(self.full_name())),
        }
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// Full internal name: ancestors' raw names joined with `-`.
    ///
    /// Cached at initialization; computed on the fly before that.
    pub fn full_name(&self) -> String {
        if let Some(names) = self.names.read().as_ref() {
            return names.full.clone();
        }
        match self.parent() {
            Some(parent) => format!("{}{}{}", parent.base().full_name(), NAME_SEPARATOR, self.name),
            None => self.name.clone(),
        }
    }

    /// Full internal name relative to the owning port.
    pub fn full_name_from_port(&self) -> Result<String> {
        self.cached(|names| names.from_port.clone())
    }

    /// Full name as presented to the control system.
    pub fn full_external_name(&self) -> Result<String> {
        self.cached(|names| names.external.clone())
    }

    /// External name relative to the owning port.
    pub fn full_external_name_from_port(&self) -> Result<String> {
        self.cached(|names| names.external_from_port.clone())
    }

    fn cached(&self, pick: impl FnOnce(&CachedNames) -> String) -> Result<String> {
        self.names
            .read()
            .as_ref()
            .map(pick)
            .ok_or_else(|| NdsError::NotInitialized(self.full_name()))
    }

    /// True between initialization and deinitialization.
    pub fn is_initialized(&self) -> bool {
        self.names.read().is_some()
    }

    /// Computes the cached names and remembers the factory.
    ///
    /// The parent must already be bound.
    pub(crate) fn bind(&self, factory: &Arc<Factory>, device: &str, is_port: bool) -> Result<()> {
        let external = self.external_name();
        let names = match self.parent() {
            None => {
                let resolved = factory.resolve_name(NamingRole::Root, &external);
                CachedNames {
                    full: self.name.clone(),
                    from_port: if is_port { String::new() } else { self.name.clone() },
                    external: format!("{}{}", factory.separator(0), resolved),
                    external_from_port: if is_port { String::new() } else { resolved },
                }
            }
            Some(parent) => {
                let parent_base = parent.base();
                let parent_names = parent_base
                    .names
                    .read()
                    .clone()
                    .ok_or_else(|| NdsError::NotInitialized(parent_base.full_name()))?;
                let resolved = factory.resolve_name(self.role, &external);
                let separator = factory.separator(self.level());
                let external_full = if resolved.is_empty() {
                    parent_names.external.clone()
                } else {
                    format!("{}{}{}", parent_names.external, separator, resolved)
                };
                let external_from_port = if is_port {
                    String::new()
                } else if resolved.is_empty() {
                    parent_names.external_from_port.clone()
                } else {
                    join(&parent_names.external_from_port, &separator, &resolved)
                };
                if !self.log_level_explicit.load(Ordering::Acquire) {
                    self.log_level
                        .store(parent_base.log_level() as u8, Ordering::Release);
                }
                CachedNames {
                    full: format!("{}{}{}", parent_names.full, NAME_SEPARATOR, self.name),
                    from_port: if is_port {
                        String::new()
                    } else {
                        join(&parent_names.from_port, NAME_SEPARATOR, &self.name)
                    },
                    external: external_full,
                    external_from_port,
                }
            }
        };

        if self.parent().is_none() && !self.log_level_explicit.load(Ordering::Acquire) {
            self.log_level
                .store(factory.default_log_level() as u8, Ordering::Release);
        }

        *self.names.write() = Some(names);
        *self.binding.write() = Some(Binding {
            factory: Arc::downgrade(factory),
            device: device.to_string(),
        });
        Ok(())
    }

    pub(crate) fn unbind(&self) {
        *self.names.write() = None;
        *self.binding.write() = None;
    }

    /// Factory the component was initialized with.
    pub fn factory(&self) -> Result<Arc<Factory>> {
        self.binding
            .read()
            .as_ref()
            .and_then(|binding| binding.factory.upgrade())
            .ok_or_else(|| NdsError::NotInitialized(self.full_name()))
    }

    /// Device key the tree was initialized under.
    pub fn device(&self) -> Option<String> {
        self.binding.read().as_ref().map(|binding| binding.device.clone())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Declares a command, registered with the backend at initialization.
    pub fn define_command<F>(&self, name: impl Into<String>, usage: impl Into<String>, arity: usize, handler: F)
    where
        F: Fn(&[String]) -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
    {
        self.commands
            .lock()
            .push(CommandDefinition::new(name, usage, arity, handler));
    }

    pub(crate) fn commands(&self) -> Vec<CommandDefinition> {
        self.commands.lock().clone()
    }

    // =========================================================================
    // Time
    // =========================================================================

    /// Time source of the subtree: own delegate, else the parent's, else the
    /// wall clock.
    pub fn timestamp(&self) -> Timestamp {
        let delegate = self.timestamp_delegate.read().clone();
        if let Some(delegate) = delegate {
            return delegate();
        }
        match self.parent() {
            Some(parent) => parent.base().timestamp(),
            None => Timestamp::now(),
        }
    }

    /// Replaces the time source for this component and its descendants.
    pub fn set_timestamp_delegate<F>(&self, delegate: F)
    where
        F: Fn() -> Timestamp + Send + Sync + 'static,
    {
        *self.timestamp_delegate.write() = Some(Arc::new(delegate));
    }

    /// Restores the inherited time source.
    pub fn clear_timestamp_delegate(&self) {
        *self.timestamp_delegate.write() = None;
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Current log threshold.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.log_level.load(Ordering::Acquire))
    }

    /// Sets the threshold of this component only.
    pub(crate) fn set_own_log_level(&self, level: LogLevel) {
        self.log_level.store(level as u8, Ordering::Release);
        self.log_level_explicit.store(true, Ordering::Release);
    }

    /// True when a message of `severity` passes the threshold.
    pub fn is_logging(&self, severity: LogLevel) -> bool {
        severity != LogLevel::None && severity >= self.log_level()
    }

    /// Emits a message through `tracing`, tagged with the full name.
    pub fn log(&self, severity: LogLevel, message: fmt::Arguments<'_>) {
        if !self.is_logging(severity) {
            return;
        }
        let node = self.full_name();
        match severity {
            LogLevel::Debug => tracing::debug!(node = %node, "{}", message),
            LogLevel::Info => tracing::info!(node = %node, "{}", message),
            LogLevel::Warning => tracing::warn!(node = %node, "{}", message),
            LogLevel::Error => tracing::error!(node = %node, "{}", message),
            LogLevel::None => {}
        }
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Runs `work` on a new thread created through the backend.
    pub fn run_in_thread<F>(&self, name: &str, work: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let factory = self.factory()?;
        factory.run_in_thread(name, work)
    }
}

impl fmt::Debug for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Base")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("level", &self.level())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn join(prefix: &str, separator: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{separator}{name}")
    }
}
