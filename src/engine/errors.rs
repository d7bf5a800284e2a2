//! Engine Errors
//!
//! The fatal error taxonomy. Soft failures (non-zero shell exits, timeouts,
//! exhausted retries, cancellation) are ordinary results with distinguished
//! exit codes and never appear here.

use thiserror::Error;

/// Exit code reported when `@timeout` expires (the coreutils convention).
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when execution is canceled (128 + SIGINT).
pub const EXIT_CANCELED: i32 = 130;

/// Fatal engine errors.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Input IR violates a structural invariant; surfaced at engine entry.
    #[error("invalid program: {0}")]
    ParseContract(String),

    /// Unresolved `@var` reference or required env key at snapshot creation.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown decorator '@{0}'")]
    DecoratorNotFound(String),

    /// A decorator name was registered twice, in any kind.
    #[error("decorator '@{0}' is already registered")]
    DuplicateDecorator(String),

    /// Wrong-position or wrong-kind decorator use, e.g. piping into an
    /// action that does not accept stdin.
    #[error("decorator misuse: {0}")]
    DecoratorMisused(String),

    #[error("@{decorator}: missing required parameter '{param}'")]
    ParameterRequired { decorator: String, param: String },

    #[error("@{decorator}: parameter '{param}' expects {expected}, got {got}")]
    ParameterType {
        decorator: String,
        param: String,
        expected: String,
        got: String,
    },

    /// `@cmd` references form a cycle; the path lists the cycle in order.
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("io error during {context}: {message}")]
    Io { context: String, message: String },
}

impl EngineError {
    /// Wrap an io error with the operation it interrupted.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// The one-line message printed to stderr for a user-visible failure.
    pub fn user_line(&self, command: &str) -> String {
        format!("runfile: {}: {}\n", command, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_dependency_message() {
        let err = EngineError::CircularDependency(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "circular dependency: a -> b -> a");
    }

    #[test]
    fn test_parameter_messages() {
        let err = EngineError::ParameterRequired {
            decorator: "retry".to_string(),
            param: "attempts".to_string(),
        };
        assert_eq!(err.to_string(), "@retry: missing required parameter 'attempts'");

        let err = EngineError::ParameterType {
            decorator: "timeout".to_string(),
            param: "duration".to_string(),
            expected: "duration".to_string(),
            got: "bool".to_string(),
        };
        assert!(err.to_string().contains("expects duration"));
    }

    #[test]
    fn test_user_line() {
        let err = EngineError::UnknownCommand("deploy".to_string());
        assert_eq!(err.user_line("deploy"), "runfile: deploy: unknown command 'deploy'\n");
    }
}
