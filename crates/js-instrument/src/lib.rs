pub mod pattern;
mod rewrite;
pub mod sandbox;
pub mod trace;
pub mod transform;
pub mod types;

pub use sandbox::{Sandbox, TransformFn};
pub use trace::TraceSink;
pub use transform::{instrument_source, TransformError, HOOK_NAME};
pub use types::{RunOutcome, SandboxOptions, TraceRecord};
