//! # Intercede
//!
//! Before, after, and around hooks for named operations on any receiver,
//! without touching the operation's own implementation.
//!
//! Wrap a value implementing [`receiver::Receiver`] in an
//! [`interceptor::Intercepted`] dispatch boundary, register hooks against
//! operation names, and every call routed through the boundary runs the full
//! interception protocol: before hooks in order, around hooks nested around
//! the real call, after hooks in order, with the (possibly rewritten) return
//! value delivered to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use intercede::prelude::*;
//! use serde_json::json;
//!
//! struct Greeter;
//!
//! impl Receiver for Greeter {
//!     fn responds_to(&self, operation: &str) -> bool {
//!         operation == "greet"
//!     }
//!
//!     fn invoke(&mut self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value> {
//!         match operation {
//!             "greet" => {
//!                 let name = args.first().and_then(Value::as_str).unwrap_or("world");
//!                 Ok(json!(format!("hello {name}")))
//!             }
//!             other => anyhow::bail!("unknown operation '{other}'"),
//!         }
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut greeter = Intercepted::new(Greeter);
//!
//!     // Rewrite an argument before the real call.
//!     greeter.before("greet", |mc| {
//!         mc.args_mut()[0] = json!("rust");
//!         Ok(())
//!     })?;
//!
//!     // Wrap the call: pre-call logic, proceed(), post-call logic.
//!     greeter.around("greet", |mc| async move {
//!         let raw = mc.proceed().await;
//!         mc.set_return_value(json!(format!("<<{}>>", raw.as_str().unwrap_or_default())));
//!         Ok(())
//!     })?;
//!
//!     let result = greeter.call("greet", vec![json!("you")])?;
//!     assert_eq!(result, json!("<<hello rust>>"));
//!     Ok(())
//! }
//! ```
//!
//! ## Ordering
//!
//! Each registration independently chooses an end of its hook list:
//! [`registry::Placement::Append`] or [`registry::Placement::Prepend`].
//! Before and after hooks default to append (first registered runs first);
//! around hooks default to prepend, so each new registration wraps the call
//! outside everything registered before it and the first registered nests
//! innermost. Around hooks always nest LIFO around the real call: the last
//! hook to reach its suspension point resumes first afterwards, seeing the
//! rawest result.
//!
//! ## Failure semantics
//!
//! Misconfiguration (unknown operation, bad kind or ordering string) is
//! caught at registration time as [`error::SetupError`]. A hook body or the
//! real operation failing at invocation time propagates its own
//! [`anyhow::Error`] straight to the caller, aborting the remaining phases;
//! nothing already executed is rolled back.
//!
//! ## Concurrency
//!
//! Execution is single-threaded and cooperative. Around-hook suspension is
//! plain manually polled futures; no executor, threads, or locks are
//! involved, and nothing here is `Send`.

pub mod call;
pub mod error;
pub mod instances;
pub mod interceptor;
pub mod receiver;
pub mod registry;

/// The prelude re-exports the types most programs need.
pub mod prelude {
    pub use crate::call::{MethodCall, NamedArgs, Proceed};
    pub use crate::error::SetupError;
    pub use crate::instances::InstanceHooks;
    pub use crate::interceptor::Intercepted;
    pub use crate::receiver::Receiver;
    pub use crate::registry::{
        Hook, HookKind, HookSet, Placement, Registry, RegistryConfig,
    };

    // The dynamic value type hooks and receivers traffic in.
    pub use serde_json::Value;
}

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
