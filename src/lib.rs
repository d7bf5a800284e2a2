//! runfile - A command-definition language toolchain
//!
//! Turns a declarative file of named commands, decorated with composable
//! modifiers, into interpreted execution, a dry-run plan, or a generated
//! self-contained CLI source file.

pub mod ast;
pub mod decorators;
pub mod engine;
pub mod ir;
pub mod registry;
pub mod runfile;
pub mod strategies;
pub mod supervisor;

pub use ast::{CommandKind, Program};
pub use engine::context::{CommandOutcome, CommandResult, RunStatus};
pub use engine::errors::EngineError;
pub use registry::DecoratorRegistry;
pub use runfile::{Runfile, RunfileOptions};
pub use strategies::planner::ExecutionStep;
