//! Hook registry: per-operation hook lists, layer markers, and propagation.
//!
//! A [`Registry`] owns, for one receiver, the `before`/`after`/`around` hook
//! lists of every operation that has had a hook registered. The first
//! registration for an operation name lazily creates its record and marks the
//! interception layer as installed; later registrations only insert into the
//! stored lists, which the dispatch wrapper reads fresh on every invocation.
//!
//! Registries can also be merged: [`Registry::merge_from`] re-registers every
//! hook of another registry onto this one, re-validating each against this
//! registry's receiver. That is how type-level instance hooks propagate onto
//! freshly constructed instances (see [`crate::instances`]).

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::Context as _;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::call::MethodCall;
use crate::error::SetupError;
use crate::receiver::Receiver;

/// A before or after hook: runs synchronously with the shared call record.
pub type HookFn = Rc<dyn Fn(&MethodCall) -> anyhow::Result<()>>;

/// An around hook: a factory producing one suspendable body per invocation.
///
/// The body runs its pre-call logic, awaits [`MethodCall::proceed`] exactly
/// once, then runs its post-call logic. A fresh future is created from the
/// factory on every invocation.
pub type AroundFn = Rc<dyn Fn(MethodCall) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// The three recognized hook kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Before,
    After,
    Around,
}

impl HookKind {
    /// The ordering used when a registration does not choose one.
    ///
    /// Before and after hooks default to first-in-first-out (append); around
    /// hooks default to prepend, so that each new registration wraps the call
    /// outside everything registered before it. The asymmetry is deliberate.
    pub fn default_placement(self) -> Placement {
        match self {
            HookKind::Before | HookKind::After => Placement::Append,
            HookKind::Around => Placement::Prepend,
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Before => write!(f, "before"),
            HookKind::After => write!(f, "after"),
            HookKind::Around => write!(f, "around"),
        }
    }
}

impl FromStr for HookKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(HookKind::Before),
            "after" => Ok(HookKind::After),
            "around" => Ok(HookKind::Around),
            other => Err(SetupError::InvalidKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Where a registration inserts into its hook list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Insert at the end of the list.
    Append,
    /// Insert at the front of the list.
    Prepend,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Append => write!(f, "append"),
            Placement::Prepend => write!(f, "prepend"),
        }
    }
}

impl FromStr for Placement {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Placement::Append),
            "prepend" => Ok(Placement::Prepend),
            other => Err(SetupError::InvalidPlacement {
                value: other.to_string(),
            }),
        }
    }
}

/// A hook paired with its kind, ready for registration.
///
/// The typed convenience methods on [`Registry`] build these internally;
/// constructing one directly is useful when the kind is data (for example,
/// parsed from configuration via [`HookKind::from_str`]).
pub enum Hook {
    Before(HookFn),
    After(HookFn),
    Around(AroundFn),
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Hook::Before(_) => HookKind::Before,
            Hook::After(_) => HookKind::After,
            Hook::Around(_) => HookKind::Around,
        }
    }

    pub fn before<F>(hook: F) -> Self
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        Hook::Before(Rc::new(hook))
    }

    pub fn after<F>(hook: F) -> Self
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        Hook::After(Rc::new(hook))
    }

    pub fn around<F, Fut>(hook: F) -> Self
    where
        F: Fn(MethodCall) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Hook::Around(Rc::new(move |mc| Box::pin(hook(mc))))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{}", self.kind())
    }
}

/// The three ordered hook lists of one operation.
///
/// Cloning copies the lists (sharing the individual hook `Rc`s), so a clone
/// can be mutated without affecting the registry it came from.
#[derive(Clone, Default)]
pub struct HookSet {
    pub before: Vec<HookFn>,
    pub after: Vec<HookFn>,
    pub around: Vec<AroundFn>,
}

impl HookSet {
    /// Total number of hooks across all three lists.
    pub fn len(&self) -> usize {
        self.before.len() + self.after.len() + self.around.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("around", &self.around.len())
            .finish()
    }
}

/// Receiver-scoped registry settings, immutable for the registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Whether installing an interception layer actually routes dispatch, or
    /// only accumulates hooks (and layer markers) for later propagation.
    pub apply: bool,
    /// Whether validity checks test the receiver's instance surface
    /// ([`Receiver::instance_responds_to`]) instead of the receiver itself.
    pub for_instances: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            apply: true,
            for_instances: false,
        }
    }
}

/// Per-receiver hook storage and registration surface.
pub struct Registry<R: Receiver> {
    receiver: Rc<RefCell<R>>,
    config: RegistryConfig,
    hooks: HashMap<String, HookSet>,
    layers: HashSet<String>,
    installs: usize,
}

impl<R: Receiver> Registry<R> {
    /// Create a registry owning `receiver`.
    pub fn new(receiver: R, config: RegistryConfig) -> Self {
        Self::from_shared(Rc::new(RefCell::new(receiver)), config)
    }

    /// Create a registry over an already shared receiver handle.
    pub fn from_shared(receiver: Rc<RefCell<R>>, config: RegistryConfig) -> Self {
        Self {
            receiver,
            config,
            hooks: HashMap::new(),
            layers: HashSet::new(),
            installs: 0,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    pub fn receiver(&self) -> &Rc<RefCell<R>> {
        &self.receiver
    }

    /// Register a before hook with the kind's default ordering (append).
    pub fn before<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.register(operation, None, Hook::before(hook))
    }

    /// Register a before hook at an explicit position.
    pub fn before_at<F>(
        &mut self,
        operation: &str,
        placement: Placement,
        hook: F,
    ) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.register(operation, Some(placement), Hook::before(hook))
    }

    /// Register an after hook with the kind's default ordering (append).
    pub fn after<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.register(operation, None, Hook::after(hook))
    }

    /// Register an after hook at an explicit position.
    pub fn after_at<F>(
        &mut self,
        operation: &str,
        placement: Placement,
        hook: F,
    ) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.register(operation, Some(placement), Hook::after(hook))
    }

    /// Register an around hook with the kind's default ordering (prepend).
    pub fn around<F, Fut>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(MethodCall) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.register(operation, None, Hook::around(hook))
    }

    /// Register an around hook at an explicit position.
    pub fn around_at<F, Fut>(
        &mut self,
        operation: &str,
        placement: Placement,
        hook: F,
    ) -> Result<usize, SetupError>
    where
        F: Fn(MethodCall) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.register(operation, Some(placement), Hook::around(hook))
    }

    /// Register `hook` for `operation`, returning the new length of that
    /// kind's list.
    ///
    /// Validation happens first: if the receiver does not expose the
    /// operation, no record is created, no layer is marked, and nothing is
    /// inserted. A `None` placement resolves to the kind's default. The
    /// first successful registration for an operation name marks (and, for
    /// applied registries, installs) its interception layer exactly once.
    pub fn register(
        &mut self,
        operation: &str,
        placement: Option<Placement>,
        hook: Hook,
    ) -> Result<usize, SetupError> {
        let kind = hook.kind();
        if !self.permits(operation) {
            return Err(SetupError::UnknownOperation {
                operation: operation.to_string(),
            });
        }
        let placement = placement.unwrap_or_else(|| kind.default_placement());

        self.ensure_layer(operation);
        let set = self.hooks.entry(operation.to_string()).or_default();
        let len = match hook {
            Hook::Before(f) => insert(&mut set.before, placement, f),
            Hook::After(f) => insert(&mut set.after, placement, f),
            Hook::Around(f) => insert(&mut set.around, placement, f),
        };
        debug!(
            "registered {} hook for '{}' with {} ordering ({} in list)",
            kind, operation, placement, len
        );
        Ok(len)
    }

    /// A defensive copy of the hook lists of every operation whose layer
    /// marker is set.
    ///
    /// The returned lists are independent of the registry's own storage;
    /// mutating them never affects later snapshots. The hooks themselves are
    /// shared (`Rc` clones).
    pub fn snapshot(&self) -> HashMap<String, HookSet> {
        self.layers
            .iter()
            .map(|op| (op.clone(), self.hooks.get(op).cloned().unwrap_or_default()))
            .collect()
    }

    /// Merge every hook of `other` into this registry (propagation).
    ///
    /// Operations merge in sorted name order; within one, hooks are
    /// re-registered in append order, preserving kind and per-kind list
    /// order, and each is re-validated against this registry's receiver.
    /// The first validation failure aborts the merge at that point; hooks
    /// merged before the failure are kept (no rollback), and the name
    /// ordering makes which ones those are deterministic.
    pub fn merge_from<S: Receiver>(&mut self, other: &Registry<S>) -> Result<(), SetupError> {
        let mut merged = 0usize;
        let mut entries: Vec<(String, HookSet)> = other.snapshot().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (operation, set) in entries {
            for f in set.before {
                self.register(&operation, Some(Placement::Append), Hook::Before(f))?;
                merged += 1;
            }
            for f in set.after {
                self.register(&operation, Some(Placement::Append), Hook::After(f))?;
                merged += 1;
            }
            for f in set.around {
                self.register(&operation, Some(Placement::Append), Hook::Around(f))?;
                merged += 1;
            }
        }
        debug!("merged {} hooks into registry", merged);
        Ok(())
    }

    /// Whether an interception layer has been marked for `operation`.
    pub fn installed(&self, operation: &str) -> bool {
        self.layers.contains(operation)
    }

    /// Number of interception layers installed over this registry's lifetime.
    ///
    /// Stays equal to the number of distinct hooked operation names: repeat
    /// registrations for a name never install a second layer.
    pub fn install_count(&self) -> usize {
        self.installs
    }

    /// The operation names with an installed layer, in no particular order.
    pub fn installed_operations(&self) -> Vec<&str> {
        self.layers.iter().map(String::as_str).collect()
    }

    /// The current hook lists for one invocation of `operation`.
    ///
    /// Cloned out of the store so the dispatch driver never holds a
    /// reference into the registry while hooks run.
    pub(crate) fn hooks_for(&self, operation: &str) -> HookSet {
        self.hooks.get(operation).cloned().unwrap_or_default()
    }

    /// Invoke the receiver's original implementation.
    pub(crate) fn call_receiver(&self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        let mut receiver = self
            .receiver
            .try_borrow_mut()
            .with_context(|| format!("receiver already borrowed while dispatching '{operation}'"))?;
        receiver.invoke(operation, args)
    }

    fn permits(&self, operation: &str) -> bool {
        let receiver = self.receiver.borrow();
        if self.config.for_instances {
            receiver.instance_responds_to(operation)
        } else {
            receiver.responds_to(operation)
        }
    }

    fn ensure_layer(&mut self, operation: &str) {
        if self.layers.contains(operation) {
            return;
        }
        self.layers.insert(operation.to_string());
        self.installs += 1;
        if self.config.apply {
            debug!("installed interception layer for '{}'", operation);
        } else {
            debug!("recorded deferred interception layer for '{}'", operation);
        }
    }
}

fn insert<T>(list: &mut Vec<T>, placement: Placement, item: T) -> usize {
    match placement {
        Placement::Append => list.push(item),
        Placement::Prepend => list.insert(0, item),
    }
    list.len()
}
