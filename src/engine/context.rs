//! Execution Context
//!
//! Per-evaluation state threaded through every decorator and evaluator call.
//! Contexts are forked (deep-copied variables and UI, shared snapshot,
//! delegate, usage recorder) whenever a decorator needs an isolated
//! sub-execution. The host process working directory is never changed; the
//! working dir is a value on the context and shell invocations receive it
//! explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::errors::{EngineError, EXIT_CANCELED, EXIT_TIMEOUT};
use crate::engine::params::Params;
use crate::engine::scan::ShellScanState;
use crate::engine::snapshot::{EnvSnapshot, EnvUsage};
use crate::ir::{CommandSeq, CommandStep, PatternNode, Wrapper};

// =============================================================================
// RESULTS
// =============================================================================

/// Result of executing a command, step, or element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(stdout: String) -> Self {
        Self { stdout, stderr: String::new(), exit_code: 0 }
    }

    pub fn error(stderr: String) -> Self {
        Self { stdout: String::new(), stderr, exit_code: 1 }
    }

    pub fn with_exit_code(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self { stdout, stderr, exit_code }
    }

    /// Empty success.
    pub fn ok() -> Self {
        Self::success(String::new())
    }

    /// A timeout expiry: distinguished exit code, message on stderr.
    pub fn timed_out(what: &str) -> Self {
        Self::with_exit_code(String::new(), format!("{}: timed out\n", what), EXIT_TIMEOUT)
    }

    /// A cooperative cancellation.
    pub fn canceled(what: &str) -> Self {
        Self::with_exit_code(String::new(), format!("{}: canceled\n", what), EXIT_CANCELED)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl Default for CommandResult {
    fn default() -> Self {
        Self::ok()
    }
}

/// Status classification of a top-level command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

/// Top-level outcome: the combined result plus its classification.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub result: CommandResult,
    pub status: RunStatus,
}

impl CommandOutcome {
    pub fn from_result(result: CommandResult) -> Self {
        let status = if result.is_success() { RunStatus::Success } else { RunStatus::Failed };
        Self { result, status }
    }
}

// =============================================================================
// UI OPTIONS
// =============================================================================

/// Presentation flags. Deep-copied on fork so branches may diverge.
#[derive(Debug, Clone, Default)]
pub struct UiOptions {
    /// Emit ANSI colors in plans and logs.
    pub color: bool,
    /// Suppress informational output.
    pub quiet: bool,
}

// =============================================================================
// EXECUTION DELEGATE
// =============================================================================

/// Callback surface into the active strategy. Decorators recurse through
/// this interface (`@cmd`, nested block bodies) instead of importing the
/// strategy, which keeps the decorator library free of engine edges.
#[async_trait]
pub trait ExecDelegate: Send + Sync {
    /// Run a sequence: sequential steps, fail-fast.
    async fn run_seq(&self, ctx: &mut ExecContext, seq: &CommandSeq)
        -> Result<CommandResult, EngineError>;

    /// Run one operator chain.
    async fn run_step(&self, ctx: &mut ExecContext, step: &CommandStep)
        -> Result<CommandResult, EngineError>;

    /// Dispatch an action decorator by name. `stdin` is set when the
    /// upstream chain operator was a pipe.
    async fn run_action(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: &Params,
        stdin: Option<String>,
    ) -> Result<CommandResult, EngineError>;

    /// Dispatch a block decorator with its inner sequence.
    async fn run_block(&self, ctx: &mut ExecContext, wrapper: &Wrapper)
        -> Result<CommandResult, EngineError>;

    /// Dispatch a pattern decorator with its branch map.
    async fn run_pattern(&self, ctx: &mut ExecContext, pattern: &PatternNode)
        -> Result<CommandResult, EngineError>;

    /// Resolve a value decorator into its substitution text.
    async fn resolve_value(&self, ctx: &mut ExecContext, name: &str, params: &Params)
        -> Result<String, EngineError>;

    /// Run another top-level command in-process (the `@cmd` recursion).
    async fn run_command(&self, ctx: &mut ExecContext, name: &str)
        -> Result<CommandResult, EngineError>;
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Per-evaluation state.
pub struct ExecContext {
    /// Frozen environment for this invocation; shared by reference.
    pub snapshot: Arc<EnvSnapshot>,
    /// CLI and program variables; deep-copied on fork.
    pub vars: HashMap<String, String>,
    /// Working directory value. Never the process cwd.
    pub cwd: PathBuf,
    /// Available parallelism for scheduling decisions.
    pub cpu_count: usize,
    pub dry_run: bool,
    pub debug: bool,
    pub ui: UiOptions,
    /// Cooperative cancellation signal; armed by `@timeout` and externally.
    pub cancel: CancellationToken,
    /// Records env keys referenced via `@env`.
    pub env_usage: Arc<EnvUsage>,
    /// The active strategy's dispatcher.
    pub delegate: Arc<dyn ExecDelegate>,
    /// Quote/substitution counters carried across chain element boundaries.
    pub scan: ShellScanState,
}

impl ExecContext {
    /// Isolated copy for a sub-execution: variables and UI deep-copied,
    /// snapshot/usage/delegate/cancellation shared.
    pub fn fork(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            vars: self.vars.clone(),
            cwd: self.cwd.clone(),
            cpu_count: self.cpu_count,
            dry_run: self.dry_run,
            debug: self.debug,
            ui: self.ui.clone(),
            cancel: self.cancel.clone(),
            env_usage: self.env_usage.clone(),
            delegate: self.delegate.clone(),
            scan: ShellScanState::new(),
        }
    }

    /// Fork with the working directory moved to `path`, resolved against the
    /// current working directory value.
    pub fn with_workdir(&self, path: &str) -> Self {
        let mut forked = self.fork();
        forked.cwd = self.resolve_path(path);
        forked
    }

    /// Fork sharing a fresh child cancellation token, so a wrapper can cancel
    /// the subtree without touching its own signal.
    pub fn with_child_cancel(&self) -> (Self, CancellationToken) {
        let mut forked = self.fork();
        let child = self.cancel.child_token();
        forked.cancel = child.clone();
        (forked, child)
    }

    /// Resolve a path value against the context working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.cwd.join(p)
        }
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.snapshot.get(key)
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Informational line on stderr, suppressed by quiet mode.
    pub fn log_info(&self, message: &str) {
        if !self.ui.quiet {
            eprintln!("{}", message);
        }
    }

    /// Diagnostic line on stderr, emitted only with the debug flag.
    pub fn log_debug(&self, message: &str) {
        if self.debug {
            eprintln!("[debug] {}", message);
        }
    }

    /// Ask the user to confirm. Non-interactive sessions and dry runs
    /// auto-confirm so unattended invocations never block.
    pub fn confirm(&self, prompt: &str) -> bool {
        use std::io::IsTerminal;
        if self.dry_run || !std::io::stdin().is_terminal() {
            return true;
        }
        eprint!("{} [Y/n] ", prompt);
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "" | "y" | "Y" | "yes")
    }
}

/// Builder for the root context of one invocation.
pub struct ContextSeed {
    pub snapshot: Arc<EnvSnapshot>,
    pub vars: HashMap<String, String>,
    pub cwd: PathBuf,
    pub dry_run: bool,
    pub debug: bool,
    pub ui: UiOptions,
}

impl ContextSeed {
    pub fn into_context(self, delegate: Arc<dyn ExecDelegate>, env_usage: Arc<EnvUsage>) -> ExecContext {
        ExecContext {
            snapshot: self.snapshot,
            vars: self.vars,
            cwd: self.cwd,
            cpu_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            dry_run: self.dry_run,
            debug: self.debug,
            ui: self.ui,
            cancel: CancellationToken::new(),
            env_usage,
            delegate,
            scan: ShellScanState::new(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A delegate that refuses every dispatch; enough for context tests and
    /// for decorators that never recurse.
    pub struct NullDelegate;

    #[async_trait]
    impl ExecDelegate for NullDelegate {
        async fn run_seq(&self, _ctx: &mut ExecContext, _seq: &CommandSeq)
            -> Result<CommandResult, EngineError> {
            Err(EngineError::DecoratorMisused("no delegate installed".to_string()))
        }

        async fn run_step(&self, _ctx: &mut ExecContext, _step: &CommandStep)
            -> Result<CommandResult, EngineError> {
            Err(EngineError::DecoratorMisused("no delegate installed".to_string()))
        }

        async fn run_action(
            &self,
            _ctx: &mut ExecContext,
            name: &str,
            _params: &Params,
            _stdin: Option<String>,
        ) -> Result<CommandResult, EngineError> {
            Err(EngineError::DecoratorNotFound(name.to_string()))
        }

        async fn run_block(&self, _ctx: &mut ExecContext, wrapper: &Wrapper)
            -> Result<CommandResult, EngineError> {
            Err(EngineError::DecoratorNotFound(wrapper.name.clone()))
        }

        async fn run_pattern(&self, _ctx: &mut ExecContext, pattern: &PatternNode)
            -> Result<CommandResult, EngineError> {
            Err(EngineError::DecoratorNotFound(pattern.name.clone()))
        }

        async fn resolve_value(&self, _ctx: &mut ExecContext, name: &str, _params: &Params)
            -> Result<String, EngineError> {
            Err(EngineError::DecoratorNotFound(name.to_string()))
        }

        async fn run_command(&self, _ctx: &mut ExecContext, name: &str)
            -> Result<CommandResult, EngineError> {
            Err(EngineError::UnknownCommand(name.to_string()))
        }
    }

    /// A root context over an explicit environment, for tests.
    pub fn test_context(env: &[(&str, &str)], vars: &[(&str, &str)]) -> ExecContext {
        let snapshot = Arc::new(EnvSnapshot::from_map(
            env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        ));
        ContextSeed {
            snapshot,
            vars: vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            cwd: std::env::temp_dir(),
            dry_run: false,
            debug: false,
            ui: UiOptions::default(),
        }
        .into_context(Arc::new(NullDelegate), Arc::new(EnvUsage::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_context;
    use super::*;

    #[test]
    fn test_result_helpers() {
        assert!(CommandResult::ok().is_success());
        assert_eq!(CommandResult::timed_out("@timeout").exit_code, EXIT_TIMEOUT);
        assert_eq!(CommandResult::canceled("sh").exit_code, EXIT_CANCELED);
        assert!(!CommandResult::error("boom\n".to_string()).is_success());
    }

    #[test]
    fn test_outcome_classification() {
        let ok = CommandOutcome::from_result(CommandResult::ok());
        assert_eq!(ok.status, RunStatus::Success);
        let bad = CommandOutcome::from_result(CommandResult::error("x".into()));
        assert_eq!(bad.status, RunStatus::Failed);
    }

    #[test]
    fn test_fork_isolates_vars() {
        let mut ctx = test_context(&[], &[("A", "1")]);
        let mut forked = ctx.fork();
        forked.vars.insert("A".to_string(), "2".to_string());
        assert_eq!(ctx.var("A"), Some("1"));
        ctx.vars.insert("B".to_string(), "3".to_string());
        assert_eq!(forked.var("B"), None);
    }

    #[test]
    fn test_with_workdir_is_a_value() {
        let ctx = test_context(&[], &[]);
        let before = ctx.cwd.clone();
        let sub = ctx.with_workdir("sub");
        assert_eq!(sub.cwd, before.join("sub"));
        assert_eq!(ctx.cwd, before);

        let abs = ctx.with_workdir("/opt/x");
        assert_eq!(abs.cwd, PathBuf::from("/opt/x"));
    }

    #[test]
    fn test_child_cancel_is_scoped() {
        let ctx = test_context(&[], &[]);
        let (forked, child) = ctx.with_child_cancel();
        child.cancel();
        assert!(forked.is_canceled());
        assert!(!ctx.is_canceled());
    }

    #[test]
    fn test_confirm_auto_confirms_on_dry_run() {
        let mut ctx = test_context(&[], &[]);
        ctx.dry_run = true;
        assert!(ctx.confirm("proceed?"));
    }

    #[test]
    fn test_parent_cancel_reaches_children() {
        let ctx = test_context(&[], &[]);
        let (forked, _child) = ctx.with_child_cancel();
        ctx.cancel.cancel();
        assert!(forked.is_canceled());
    }
}
