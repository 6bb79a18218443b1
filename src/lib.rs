//! Local variable capture for exception reports.
//!
//! This crate augments error reports produced by a long-running process
//! with the values of local variables that were in lexical scope at the
//! moment an exception was thrown, without debug symbols or manual
//! instrumentation. It drives an inspector-protocol debug session against
//! the running process: on every "execution paused" notification it hashes
//! the paused stack, unrolls the innermost call frames' local scopes and
//! caches the result; during event post-processing it hashes the reported
//! exception's frames and splices matching variables into the report.
//!
//! The correlation key is probabilistic (see [`hash`]), the cache is
//! strictly bounded (see [`cache`]) and caught-exception capture is
//! throttled under load (see [`ratelimit`]). Every internal failure
//! degrades to "no variables captured"; nothing here may stall or crash
//! the monitored process.

pub mod cache;
pub mod capture;
pub mod chain;
pub mod error;
pub mod frame;
pub mod hash;
pub mod inspector;
pub mod log;
pub mod ratelimit;

pub use capture::{CaptureOptions, LocalVariables};
pub use error::Error;
pub use frame::{
    CapturedFrameVariables, Event, Exception, StackFrame, StackParser, Stacktrace, Variables,
};
pub use inspector::{DebugSession, InspectorSession, InspectorTransport};
