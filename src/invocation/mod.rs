//! The invocation pipeline: template and timeout resolution, process
//! execution, and the dispatcher that composes them under admission control.

pub mod dispatcher;
pub mod invoker;
pub mod template;
pub mod timeout;

pub use dispatcher::{Dispatcher, InvocationRequest};
pub use invoker::{InvocationResult, InvokeOptions, Invoker};
pub use template::ResolvedCommand;
pub use timeout::resolve_timeout;
