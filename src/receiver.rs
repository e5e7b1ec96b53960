//! The dispatch seam between the interception engine and a host object.
//!
//! Anything that wants its operations intercepted implements [`Receiver`]:
//! a named-operation surface the registry validates registrations against
//! and the dispatch wrapper calls through. `invoke` is the original,
//! pre-interception implementation; the engine calls it exactly once per
//! intercepted invocation and never re-enters interception from it.
//!
//! # Examples
//!
//! ```rust
//! use intercede::receiver::Receiver;
//! use serde_json::{json, Value};
//!
//! struct Counter {
//!     total: i64,
//! }
//!
//! impl Receiver for Counter {
//!     fn responds_to(&self, operation: &str) -> bool {
//!         matches!(operation, "add" | "total")
//!     }
//!
//!     fn invoke(&mut self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value> {
//!         match operation {
//!             "add" => {
//!                 self.total += args.first().and_then(Value::as_i64).unwrap_or(0);
//!                 Ok(json!(self.total))
//!             }
//!             "total" => Ok(json!(self.total)),
//!             other => anyhow::bail!("counter cannot '{other}'"),
//!         }
//!     }
//! }
//! ```

use serde_json::Value;

/// A host object whose named operations can be intercepted.
pub trait Receiver {
    /// Whether this receiver can dispatch `operation`.
    fn responds_to(&self, operation: &str) -> bool;

    /// Whether instances produced from this receiver expose `operation`.
    ///
    /// Only consulted by registries configured with `for_instances`, which
    /// lets a factory or blueprint value describe the surface of the
    /// instances it constructs. Defaults to the receiver's own surface.
    fn instance_responds_to(&self, operation: &str) -> bool {
        self.responds_to(operation)
    }

    /// Invoke the original, pre-interception implementation of `operation`.
    ///
    /// Arbitrary failures are returned as [`anyhow::Error`] and propagate to
    /// the caller of the intercepted operation without wrapping.
    fn invoke(&mut self, operation: &str, args: Vec<Value>) -> anyhow::Result<Value>;
}
