//! Source compiler
//!
//! Lowers a validated graph into a standalone TypeScript module that runs
//! the same data flow without the engine. Template references are resolved
//! statically to variables holding earlier nodes' outputs, so a reference
//! that cannot be satisfied fails the compile instead of the program.

mod compiler;
mod emit;
mod error;
mod output;

pub use compiler::{compile, Compiler};
pub use error::CompileError;
pub use output::{CompiledWorkflow, WORKFLOW_FILE};
