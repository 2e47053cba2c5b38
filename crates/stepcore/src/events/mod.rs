mod base;

pub use base::{EventBus, ExecutionEvent, RunId};
