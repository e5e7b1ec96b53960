//! Type-level hook templates propagated onto new instances.
//!
//! An [`InstanceHooks`] value plays the role a class plays in dynamic
//! languages: it accumulates hooks for the operations of instances that do
//! not exist yet. Its internal registry is deferred (`apply = false`) and
//! instance-scoped (`for_instances = true`), so registrations are validated
//! against the blueprint's [`Receiver::instance_responds_to`] surface and
//! nothing is dispatched through it directly.
//!
//! [`InstanceHooks::attach`] then wraps a freshly constructed instance and
//! merges the template into the instance's own applied registry, giving
//! every instance an independently mutable, installed copy of the template
//! hooks.

use std::future::Future;

use tracing::debug;

use crate::call::MethodCall;
use crate::error::SetupError;
use crate::interceptor::Intercepted;
use crate::receiver::Receiver;
use crate::registry::{Registry, RegistryConfig};

/// A template of hooks for instances produced from a blueprint value.
pub struct InstanceHooks<T: Receiver> {
    template: Registry<T>,
}

impl<T: Receiver> InstanceHooks<T> {
    /// Create a template over `blueprint`, which describes the instance
    /// surface via [`Receiver::instance_responds_to`].
    pub fn new(blueprint: T) -> Self {
        let config = RegistryConfig {
            apply: false,
            for_instances: true,
        };
        Self {
            template: Registry::new(blueprint, config),
        }
    }

    pub fn template(&self) -> &Registry<T> {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut Registry<T> {
        &mut self.template
    }

    /// Register a before hook on the template.
    pub fn before<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.template.before(operation, hook)
    }

    /// Register an after hook on the template.
    pub fn after<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.template.after(operation, hook)
    }

    /// Register an around hook on the template.
    pub fn around<F, Fut>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(MethodCall) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.template.around(operation, hook)
    }

    /// Wrap a new instance and give it its own copy of the template hooks.
    ///
    /// Every template hook is re-validated against `receiver`; a hook for an
    /// operation the instance does not expose fails the attach.
    pub fn attach<R: Receiver>(&self, receiver: R) -> Result<Intercepted<R>, SetupError> {
        let mut wrapped = Intercepted::new(receiver);
        wrapped.registry_mut().merge_from(&self.template)?;
        debug!("attached template hooks to a new instance");
        Ok(wrapped)
    }
}
