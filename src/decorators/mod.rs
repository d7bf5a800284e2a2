//! Canonical Decorator Library
//!
//! The built-in decorator set every program can rely on. External libraries
//! register additional decorators through the same registry interface.

pub mod cmd;
pub mod env;
pub mod log;
pub mod parallel;
pub mod retry;
pub mod shell;
pub mod timeout;
pub mod try_;
pub mod var;
pub mod when;
pub mod workdir;

use std::sync::Arc;

use lazy_static::lazy_static;

use crate::engine::errors::EngineError;
use crate::registry::DecoratorRegistry;

/// Register the canonical decorators into `registry`.
pub fn register_builtins(registry: &DecoratorRegistry) -> Result<(), EngineError> {
    registry.register_value(Arc::new(var::VarDecorator))?;
    registry.register_value(Arc::new(env::EnvDecorator))?;
    registry.register_action(Arc::new(cmd::CmdDecorator))?;
    registry.register_action(Arc::new(shell::ShellDecorator))?;
    registry.register_action(Arc::new(log::LogDecorator))?;
    registry.register_block(Arc::new(workdir::WorkdirDecorator))?;
    registry.register_block(Arc::new(timeout::TimeoutDecorator))?;
    registry.register_block(Arc::new(retry::RetryDecorator))?;
    registry.register_block(Arc::new(parallel::ParallelDecorator))?;
    registry.register_pattern(Arc::new(when::WhenDecorator))?;
    registry.register_pattern(Arc::new(try_::TryDecorator))?;
    Ok(())
}

lazy_static! {
    static ref BUILTINS: Arc<DecoratorRegistry> = {
        let registry = DecoratorRegistry::new();
        register_builtins(&registry).expect("builtin decorator registration");
        Arc::new(registry)
    };
}

/// The shared registry holding the canonical set. Registration runs once at
/// first use.
pub fn builtin_registry() -> Arc<DecoratorRegistry> {
    BUILTINS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_register_once() {
        let registry = builtin_registry();
        for name in [
            "var", "env", "cmd", "shell", "log", "workdir", "timeout", "retry", "parallel",
            "when", "try",
        ] {
            assert!(registry.contains(name), "missing builtin @{name}");
        }
    }

    #[test]
    fn test_builtin_names_collide_on_reregistration() {
        let registry = DecoratorRegistry::new();
        register_builtins(&registry).unwrap();
        let err = register_builtins(&registry).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDecorator(_)));
    }
}
