//! Argument coercion and the execution engine.

mod coerce;
mod engine;

pub use coerce::coerce_arguments;
pub use engine::{describe_call, ExecutionEngine, RetryPolicy};
