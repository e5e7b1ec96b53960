//! Installed dispatch surface and the hook invocation protocol.
//!
//! [`Intercepted`] wraps a receiver behind the dispatch boundary every call
//! goes through. Operations with an installed interception layer run the
//! protocol below; every other operation dispatches straight to the
//! receiver, untouched.
//!
//! Protocol, per intercepted invocation:
//!
//! 1. build a [`MethodCall`] from the actual arguments;
//! 2. run every `before` hook in list order;
//! 3. drive every `around` hook to its `proceed()` suspension, in list order;
//! 4. invoke the real operation once and store the raw result;
//! 5. resume the suspended around hooks in reverse order, so the
//!    last-registered-to-suspend wraps the call most tightly;
//! 6. run every `after` hook in list order;
//! 7. deliver whatever the return slot holds.
//!
//! A hook failure at any phase propagates immediately to the caller and
//! aborts the rest of the protocol; nothing already executed is rolled back.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use serde_json::Value;
use tracing::{debug, warn};

use crate::call::{MethodCall, NamedArgs};
use crate::error::SetupError;
use crate::receiver::Receiver;
use crate::registry::{Placement, Registry, RegistryConfig};

/// A receiver wrapped in its dispatch boundary, with an applied registry.
///
/// This is the entry point for most uses: wrap a receiver, register hooks,
/// and route calls through [`Intercepted::call`].
pub struct Intercepted<R: Receiver> {
    registry: Registry<R>,
}

impl<R: Receiver> Intercepted<R> {
    /// Wrap `receiver` with an empty, applied registry.
    pub fn new(receiver: R) -> Self {
        Self {
            registry: Registry::new(receiver, RegistryConfig::default()),
        }
    }

    /// Wrap an already shared receiver handle.
    pub fn from_shared(receiver: Rc<RefCell<R>>) -> Self {
        Self {
            registry: Registry::from_shared(receiver, RegistryConfig::default()),
        }
    }

    pub fn registry(&self) -> &Registry<R> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<R> {
        &mut self.registry
    }

    /// A shared handle to the wrapped receiver.
    pub fn receiver(&self) -> Rc<RefCell<R>> {
        self.registry.receiver().clone()
    }

    /// Register a before hook (appended; see [`Registry::before`]).
    pub fn before<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.registry.before(operation, hook)
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
        self.registry.before_at(operation, placement, hook)
    }

    /// Register an after hook (appended; see [`Registry::after`]).
    pub fn after<F>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(&MethodCall) -> anyhow::Result<()> + 'static,
    {
        self.registry.after(operation, hook)
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
        self.registry.after_at(operation, placement, hook)
    }

    /// Register an around hook (prepended; see [`Registry::around`]).
    pub fn around<F, Fut>(&mut self, operation: &str, hook: F) -> Result<usize, SetupError>
    where
        F: Fn(MethodCall) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        self.registry.around(operation, hook)
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
        self.registry.around_at(operation, placement, hook)
    }

    /// Invoke `operation` with positional arguments only.
    pub fn call(&self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value> {
        self.call_with(operation, args, NamedArgs::new())
    }

    /// Invoke `operation` with positional and named arguments.
    ///
    /// Routes through the interception protocol when a layer is installed
    /// for the operation, and straight to the receiver otherwise. Hook
    /// lists are read fresh from the registry on every invocation, so hooks
    /// registered after the layer was installed still take effect.
    pub fn call_with(
        &self,
        operation: &str,
        args: Vec<Value>,
        named: NamedArgs,
    ) -> anyhow::Result<Value> {
        if self.registry.config().apply && self.registry.installed(operation) {
            run_protocol(&self.registry, operation, args, named)
        } else {
            self.registry
                .call_receiver(operation, pack_arguments(args, &named))
        }
    }
}

/// Named arguments ride as one trailing object value, only when present.
fn pack_arguments(mut args: Vec<Value>, named: &NamedArgs) -> Vec<Value> {
    if !named.is_empty() {
        args.push(Value::Object(named.clone()));
    }
    args
}

/// Drive one intercepted invocation through all hook phases.
fn run_protocol<R: Receiver>(
    registry: &Registry<R>,
    operation: &str,
    args: Vec<Value>,
    named: NamedArgs,
) -> anyhow::Result<Value> {
    let call = MethodCall::new(operation, args, named);
    let hooks = registry.hooks_for(operation);
    let mut cx = Context::from_waker(noop_waker_ref());

    for hook in &hooks.before {
        hook(&call)?;
    }

    // Drive each around body to its suspension point. Bodies that finish
    // without suspending are done for good; bodies parked on anything other
    // than proceed() can never make progress under the cooperative model.
    let mut suspended: Vec<LocalBoxFuture<'static, anyhow::Result<()>>> = Vec::new();
    for factory in &hooks.around {
        let mut body = factory(call.clone());
        call.reset_checkpoint();
        match body.as_mut().poll(&mut cx) {
            Poll::Ready(outcome) => outcome?,
            Poll::Pending if call.checkpoint_reached() => suspended.push(body),
            Poll::Pending => {
                warn!(
                    "around hook for '{}' awaited something other than proceed(); abandoning it",
                    operation
                );
            }
        }
    }

    let result = registry.call_receiver(operation, call.arguments_for_real_call())?;
    call.set_return_value(result);

    // Last to suspend resumes first, so it sees the rawest result and outer
    // hooks see results already transformed by more deeply nested ones.
    for mut body in suspended.into_iter().rev() {
        call.reset_checkpoint();
        match body.as_mut().poll(&mut cx) {
            Poll::Ready(outcome) => outcome?,
            Poll::Pending => {
                debug!(
                    "around hook for '{}' suspended a second time; discarding it",
                    operation
                );
            }
        }
    }

    for hook in &hooks.after {
        hook(&call)?;
    }

    Ok(call.return_value().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Sample {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Receiver for Sample {
        fn responds_to(&self, operation: &str) -> bool {
            matches!(operation, "text" | "sum" | "echo" | "fail")
        }

        fn invoke(&mut self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value> {
            self.calls.borrow_mut().push(operation.to_string());
            match operation {
                "text" => Ok(json!("FOOBAR")),
                "sum" => {
                    let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                    Ok(json!(total))
                }
                "echo" => Ok(Value::Array(args)),
                "fail" => anyhow::bail!("real call failed"),
                other => anyhow::bail!("unknown operation '{other}'"),
            }
        }
    }

    fn wrapped() -> (Intercepted<Sample>, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let intercepted = Intercepted::new(Sample {
            calls: calls.clone(),
        });
        (intercepted, calls)
    }

    fn track(log: &Rc<RefCell<Vec<i32>>>, id: i32) -> impl Fn(&MethodCall) -> anyhow::Result<()> + use<> {
        let log = log.clone();
        move |_| {
            log.borrow_mut().push(id);
            Ok(())
        }
    }

    fn around_track(
        log: &Rc<RefCell<Vec<i32>>>,
        enter: i32,
        exit: i32,
    ) -> impl Fn(MethodCall) -> LocalBoxFuture<'static, anyhow::Result<()>> + use<> {
        let log = log.clone();
        move |mc| {
            let log = log.clone();
            Box::pin(async move {
                log.borrow_mut().push(enter);
                let _ = mc.proceed().await;
                log.borrow_mut().push(exit);
                Ok(())
            })
        }
    }

    #[test]
    fn appended_hooks_run_first_in_first_out() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in 1..=3 {
            w.before_at("text", Placement::Append, track(&log, id)).unwrap();
        }
        for id in 4..=6 {
            w.after_at("text", Placement::Append, track(&log, id)).unwrap();
        }
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn prepended_hooks_run_first_in_last_out() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in 1..=3 {
            w.before_at("text", Placement::Prepend, track(&log, id)).unwrap();
        }
        for id in 4..=6 {
            w.after_at("text", Placement::Prepend, track(&log, id)).unwrap();
        }
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn mixed_placement_builds_the_list_insertion_by_insertion() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.before_at("text", Placement::Prepend, track(&log, 1)).unwrap();
        w.before_at("text", Placement::Append, track(&log, 2)).unwrap();
        w.before_at("text", Placement::Prepend, track(&log, 3)).unwrap();
        w.after_at("text", Placement::Append, track(&log, 4)).unwrap();
        w.after_at("text", Placement::Prepend, track(&log, 5)).unwrap();
        w.after_at("text", Placement::Append, track(&log, 6)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![3, 1, 2, 5, 4, 6]);
    }

    #[test]
    fn appended_around_hooks_nest_first_in_outermost() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.around_at("text", Placement::Append, around_track(&log, 1, 2)).unwrap();
        w.around_at("text", Placement::Append, around_track(&log, 3, 4)).unwrap();
        w.around_at("text", Placement::Append, around_track(&log, 5, 6)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![1, 3, 5, 6, 4, 2]);
    }

    #[test]
    fn default_around_placement_prepends() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.around("text", around_track(&log, 1, 2)).unwrap();
        w.around("text", around_track(&log, 3, 4)).unwrap();
        w.around("text", around_track(&log, 5, 6)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![5, 3, 1, 2, 4, 6]);
    }

    #[test]
    fn mixed_around_placement_nests_by_list_order() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.around_at("text", Placement::Append, around_track(&log, 1, 2)).unwrap();
        w.around_at("text", Placement::Prepend, around_track(&log, 3, 4)).unwrap();
        w.around_at("text", Placement::Append, around_track(&log, 5, 6)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![3, 1, 5, 6, 2, 4]);
    }

    #[test]
    fn full_protocol_runs_phases_in_order() {
        let (mut w, calls) = wrapped();
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        w.before("text", move |_| {
            l.borrow_mut().push("C".into());
            Ok(())
        })
        .unwrap();

        for (enter, exit) in [("B1", "A1"), ("B2", "A2")] {
            let l = log.clone();
            w.around_at("text", Placement::Append, move |mc| {
                let l = l.clone();
                async move {
                    l.borrow_mut().push(enter.into());
                    let _ = mc.proceed().await;
                    l.borrow_mut().push(exit.into());
                    Ok(())
                }
            })
            .unwrap();
        }

        let l = log.clone();
        w.after("text", move |_| {
            l.borrow_mut().push("D".into());
            Ok(())
        })
        .unwrap();

        assert_eq!(w.call("text", vec![]).unwrap(), json!("FOOBAR"));
        assert_eq!(*log.borrow(), vec!["C", "B1", "B2", "A2", "A1", "D"]);
        assert_eq!(*calls.borrow(), vec!["text"]);
    }

    #[test]
    fn after_hook_overrides_the_return_value() {
        let (mut w, _) = wrapped();
        w.after("text", |mc| {
            mc.set_return_value(json!("W00t"));
            Ok(())
        })
        .unwrap();
        assert_eq!(w.call("text", vec![]).unwrap(), json!("W00t"));
    }

    #[test]
    fn around_hook_can_transform_the_result() {
        let (mut w, _) = wrapped();
        w.around("text", |mc| async move {
            let raw = mc.proceed().await;
            let s = raw.as_str().unwrap_or_default();
            mc.set_return_value(json!(format!("{s}{s}")));
            Ok(())
        })
        .unwrap();
        assert_eq!(w.call("text", vec![]).unwrap(), json!("FOOBARFOOBAR"));
    }

    #[test]
    fn inner_around_transforms_before_outer_sees_the_result() {
        let (mut w, _) = wrapped();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        w.around_at("text", Placement::Append, move |mc| {
            let s = s.clone();
            async move {
                let raw = mc.proceed().await;
                s.borrow_mut().push(raw.clone());
                Ok(())
            }
        })
        .unwrap();

        // Registered last with append, so it nests innermost: it sees the
        // raw result and rewrites it before the outer hook resumes.
        w.around_at("text", Placement::Append, |mc| async move {
            let _ = mc.proceed().await;
            mc.set_return_value(json!("inner"));
            Ok(())
        })
        .unwrap();

        assert_eq!(w.call("text", vec![]).unwrap(), json!("inner"));
        assert_eq!(*seen.borrow(), vec![json!("inner")]);
    }

    #[test]
    fn around_hook_that_never_proceeds_does_not_block_the_call() {
        let (mut w, calls) = wrapped();
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        w.around("text", move |mc| {
            let l = l.clone();
            async move {
                l.borrow_mut().push("pre".into());
                if mc.args().is_empty() {
                    return Ok(());
                }
                let _ = mc.proceed().await;
                l.borrow_mut().push("post".into());
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(w.call("text", vec![]).unwrap(), json!("FOOBAR"));
        assert_eq!(*log.borrow(), vec!["pre"]);
        assert_eq!(*calls.borrow(), vec!["text"]);
    }

    #[test]
    fn before_hook_error_aborts_before_the_real_call() {
        let (mut w, calls) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.before("text", |_| anyhow::bail!("nope")).unwrap();
        w.after("text", track(&log, 1)).unwrap();

        let err = w.call("text", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert!(calls.borrow().is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn around_pre_call_error_aborts_before_the_real_call() {
        let (mut w, calls) = wrapped();
        w.around("text", |_mc| async move { anyhow::bail!("pre boom") })
            .unwrap();
        let err = w.call("text", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "pre boom");
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn around_post_call_error_skips_after_hooks() {
        let (mut w, calls) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.around("text", |mc| async move {
            let _ = mc.proceed().await;
            anyhow::bail!("post boom")
        })
        .unwrap();
        w.after("text", track(&log, 1)).unwrap();

        let err = w.call("text", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "post boom");
        assert_eq!(*calls.borrow(), vec!["text"]);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn after_hook_error_aborts_the_remaining_after_hooks() {
        let (mut w, calls) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.after("text", |_| anyhow::bail!("after boom")).unwrap();
        w.after("text", track(&log, 1)).unwrap();

        let err = w.call("text", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "after boom");
        // The real call already ran; only the remaining after hooks are cut.
        assert_eq!(*calls.borrow(), vec!["text"]);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn real_call_failure_abandons_suspended_around_hooks() {
        let (mut w, _) = wrapped();
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        w.around("fail", move |mc| {
            let l = l.clone();
            async move {
                l.borrow_mut().push("pre".into());
                let _ = mc.proceed().await;
                l.borrow_mut().push("post".into());
                Ok(())
            }
        })
        .unwrap();

        let err = w.call("fail", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "real call failed");
        assert_eq!(*log.borrow(), vec!["pre"]);
    }

    #[test]
    fn hooks_registered_after_installation_take_effect() {
        let (mut w, _) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.before("text", track(&log, 1)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![1]);

        w.before("text", track(&log, 2)).unwrap();
        w.call("text", vec![]).unwrap();
        assert_eq!(*log.borrow(), vec![1, 1, 2]);
        assert_eq!(w.registry().install_count(), 1);
    }

    #[test]
    fn unhooked_operations_bypass_the_protocol() {
        let (mut w, calls) = wrapped();
        let log = Rc::new(RefCell::new(Vec::new()));
        w.before("text", track(&log, 1)).unwrap();

        assert_eq!(w.call("sum", vec![json!(2), json!(3)]).unwrap(), json!(5));
        assert!(log.borrow().is_empty());
        assert_eq!(*calls.borrow(), vec!["sum"]);
    }

    #[test]
    fn before_hook_argument_mutation_reaches_the_real_call() {
        let (mut w, _) = wrapped();
        w.before("sum", |mc| {
            mc.args_mut().push(json!(5));
            Ok(())
        })
        .unwrap();
        assert_eq!(w.call("sum", vec![json!(1), json!(2)]).unwrap(), json!(8));
    }

    #[test]
    fn named_arguments_ride_as_a_trailing_object() {
        let (w, _) = wrapped();
        let mut named = NamedArgs::new();
        named.insert("mode".into(), json!("fast"));
        assert_eq!(
            w.call_with("echo", vec![json!(1)], named.clone()).unwrap(),
            json!([1, { "mode": "fast" }])
        );

        // Same packing on an intercepted operation.
        let (mut w, _) = wrapped();
        w.before("echo", |_| Ok(())).unwrap();
        assert_eq!(
            w.call_with("echo", vec![json!(1)], named).unwrap(),
            json!([1, { "mode": "fast" }])
        );
    }

    #[test]
    fn empty_named_arguments_are_not_packed() {
        let (w, _) = wrapped();
        assert_eq!(
            w.call_with("echo", vec![json!(1)], NamedArgs::new()).unwrap(),
            json!([1])
        );
    }
}
