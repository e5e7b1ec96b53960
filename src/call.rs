//! Per-invocation call record shared between hooks and the dispatch driver.
//!
//! A [`MethodCall`] is created once per intercepted invocation and handed to
//! every hook. It carries the operation name, the positional and named
//! arguments, and the return-value slot. The handle is cheaply cloneable and
//! all clones share the same underlying state, so a mutation made by one hook
//! is visible to every later hook and to the real call.
//!
//! Around hooks additionally use [`MethodCall::proceed`] as their single
//! suspension point: the returned future suspends once, the driver runs the
//! real operation, and the future resolves with the (possibly already
//! transformed) return-slot contents.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use serde_json::Value;

/// Named arguments for a call, keyed by unique name.
pub type NamedArgs = serde_json::Map<String, Value>;

#[derive(Debug)]
struct CallState {
    args: Vec<Value>,
    named: NamedArgs,
    return_value: Option<Value>,
}

#[derive(Debug)]
struct CallInner {
    operation: String,
    state: RefCell<CallState>,
    checkpoint: Cell<bool>,
}

/// Handle to one in-flight invocation of an intercepted operation.
///
/// The return-value slot starts unset, is written by the real call, and may
/// be overwritten any number of times by around and after hooks; whatever is
/// present once all hooks have run is delivered to the original caller.
///
/// Accessors hand out [`Ref`]/[`RefMut`] guards over the shared state. Do
/// not hold a guard across the `proceed().await` suspension point; the
/// driver needs the state to run the real call.
#[derive(Clone, Debug)]
pub struct MethodCall {
    inner: Rc<CallInner>,
}

impl MethodCall {
    /// Build a call record for `operation` with the given arguments.
    pub fn new(operation: impl Into<String>, args: Vec<Value>, named: NamedArgs) -> Self {
        Self {
            inner: Rc::new(CallInner {
                operation: operation.into(),
                state: RefCell::new(CallState {
                    args,
                    named,
                    return_value: None,
                }),
                checkpoint: Cell::new(false),
            }),
        }
    }

    /// The name of the operation being invoked.
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// The positional arguments.
    pub fn args(&self) -> Ref<'_, Vec<Value>> {
        Ref::map(self.inner.state.borrow(), |s| &s.args)
    }

    /// Mutable access to the positional arguments.
    ///
    /// Mutations made before the real call are what the real call receives.
    pub fn args_mut(&self) -> RefMut<'_, Vec<Value>> {
        RefMut::map(self.inner.state.borrow_mut(), |s| &mut s.args)
    }

    /// The named arguments.
    pub fn named(&self) -> Ref<'_, NamedArgs> {
        Ref::map(self.inner.state.borrow(), |s| &s.named)
    }

    /// Mutable access to the named arguments.
    pub fn named_mut(&self) -> RefMut<'_, NamedArgs> {
        RefMut::map(self.inner.state.borrow_mut(), |s| &mut s.named)
    }

    /// Current contents of the return-value slot, if any.
    pub fn return_value(&self) -> Option<Value> {
        self.inner.state.borrow().return_value.clone()
    }

    /// Overwrite the return-value slot.
    pub fn set_return_value(&self, value: Value) {
        self.inner.state.borrow_mut().return_value = Some(value);
    }

    /// The argument list the real operation is invoked with: a fresh copy of
    /// the current positional arguments, with the named-argument map appended
    /// as one trailing object value only if it is non-empty.
    ///
    /// The returned vector does not alias the stored positional arguments.
    /// Named-argument mutations made through this handle before the real call
    /// are reflected, because packing happens at call time.
    pub fn arguments_for_real_call(&self) -> Vec<Value> {
        let state = self.inner.state.borrow();
        let mut packed = state.args.clone();
        if !state.named.is_empty() {
            packed.push(Value::Object(state.named.clone()));
        }
        packed
    }

    /// The suspension point of an around hook: "now run the real operation".
    ///
    /// The returned future suspends exactly once; when the driver resumes it
    /// after the real call, it resolves with the current return-slot contents
    /// (`Value::Null` if the slot is somehow unset). It is single-shot: a
    /// second `proceed()` within the same hook invocation is never resumed.
    pub fn proceed(&self) -> Proceed {
        Proceed {
            call: self.clone(),
            suspended: false,
        }
    }

    pub(crate) fn reset_checkpoint(&self) {
        self.inner.checkpoint.set(false);
    }

    pub(crate) fn checkpoint_reached(&self) -> bool {
        self.inner.checkpoint.get()
    }
}

/// Future returned by [`MethodCall::proceed`].
#[derive(Debug)]
pub struct Proceed {
    call: MethodCall,
    suspended: bool,
}

impl Future for Proceed {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Value> {
        let this = self.get_mut();
        if !this.suspended {
            this.suspended = true;
            this.call.inner.checkpoint.set(true);
            Poll::Pending
        } else {
            Poll::Ready(this.call.return_value().unwrap_or(Value::Null))
        }
    }
}
