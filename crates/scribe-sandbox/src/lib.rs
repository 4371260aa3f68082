//! # scribe-sandbox
//!
//! Compile-check and run untrusted JavaScript snippets inside an embedded
//! engine, bounded by a per-run deadline and a global concurrency ceiling.
//!
//! - [`ScriptSandbox::validate`] parses without executing and reports
//!   error diagnostics. It never takes a concurrency slot.
//! - [`ScriptSandbox::execute`] takes a slot, compiles, and runs on a
//!   dedicated engine thread. The slot is an RAII permit, released on every
//!   exit path including timeout and cancellation.
//!
//! The value of the snippet's last expression comes back as a
//! [`scribe_core::ScriptValue`].

mod cache;
mod engine;
mod error;
mod sandbox;

pub use cache::{CompileVerdict, ScriptCache};
pub use error::{Diagnostic, SandboxError, Severity};
pub use sandbox::{ExecutionSuccess, ScriptSandbox};
