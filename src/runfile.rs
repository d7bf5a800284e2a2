//! Runfile Engine
//!
//! Main entry point for one program: validates the lowered IR against the
//! structural invariants, freezes the environment snapshot, and exposes the
//! three evaluation strategies plus the process-group surface.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::ast::{CommandKind, Program};
use crate::decorators::builtin_registry;
use crate::engine::context::{
    CommandOutcome, CommandResult, ContextSeed, ExecContext, ExecDelegate, UiOptions,
};
use crate::engine::deps::analyze;
use crate::engine::errors::EngineError;
use crate::engine::snapshot::{EnvSnapshot, EnvUsage};
use crate::ir::{
    collect_var_refs, lower_program, ChainOp, CommandSeq, ElementKind, ProgramIr,
};
use crate::registry::DecoratorRegistry;
use crate::strategies::generator::{GeneratedSource, Generator};
use crate::strategies::interpreter::Interpreter;
use crate::strategies::planner::{ExecutionStep, Planner};
use crate::supervisor;

/// Options for creating a Runfile engine.
#[derive(Default)]
pub struct RunfileOptions {
    /// CLI variable overrides (`--var KEY=VALUE`).
    pub vars: Option<HashMap<String, String>>,
    /// Environment overrides applied on top of the process env.
    pub env_overrides: Option<BTreeMap<String, String>>,
    /// Explicit full environment; replaces the process env when set.
    pub env: Option<BTreeMap<String, String>>,
    /// Working directory value for the root context.
    pub cwd: Option<PathBuf>,
    pub dry_run: bool,
    pub debug: bool,
    pub color: bool,
    /// Decorator registry; the built-in set when absent.
    pub registry: Option<Arc<DecoratorRegistry>>,
}

/// The engine facade over one program and one frozen snapshot.
pub struct Runfile {
    program: Arc<ProgramIr>,
    registry: Arc<DecoratorRegistry>,
    snapshot: Arc<EnvSnapshot>,
    env_usage: Arc<EnvUsage>,
    vars: HashMap<String, String>,
    cwd: PathBuf,
    dry_run: bool,
    debug: bool,
    color: bool,
}

impl Runfile {
    /// Lower, validate, and snapshot. Everything fatal-by-configuration
    /// (parse contract, decorator lookup, pipe well-formedness, pattern
    /// labels, dependency cycles, unresolved variables) fails here, before
    /// any execution.
    pub fn new(program: &Program, options: RunfileOptions) -> Result<Self, EngineError> {
        let ir = Arc::new(lower_program(program)?);
        let registry = options.registry.unwrap_or_else(builtin_registry);

        for command in &ir.commands {
            validate_seq(&command.seq, &registry)?;
        }
        analyze(&ir, &registry)?;

        let snapshot = Arc::new(match options.env {
            Some(map) => EnvSnapshot::from_map(map),
            None => EnvSnapshot::capture(options.env_overrides.as_ref().unwrap_or(&BTreeMap::new())),
        });

        // Program variables first, CLI variables override.
        let mut vars: HashMap<String, String> = ir
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(cli) = options.vars {
            vars.extend(cli);
        }

        // Unresolved @var references fail at snapshot creation, never later.
        for command in &ir.commands {
            for name in collect_var_refs(&command.seq) {
                if !vars.contains_key(&name) {
                    return Err(EngineError::Snapshot(format!(
                        "command '{}' references undefined variable '{}'",
                        command.name, name
                    )));
                }
            }
        }

        let cwd = match options.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()
                .map_err(|e| EngineError::io("reading current directory", e))?,
        };

        Ok(Self {
            program: ir,
            registry,
            snapshot,
            env_usage: Arc::new(EnvUsage::new()),
            vars,
            cwd,
            dry_run: options.dry_run,
            debug: options.debug,
            color: options.color,
        })
    }

    fn seed_context(&self, delegate: Arc<dyn ExecDelegate>) -> ExecContext {
        ContextSeed {
            snapshot: self.snapshot.clone(),
            vars: self.vars.clone(),
            cwd: self.cwd.clone(),
            dry_run: self.dry_run,
            debug: self.debug,
            ui: UiOptions { color: self.color, quiet: false },
        }
        .into_context(delegate, self.env_usage.clone())
    }

    /// Interpreted execution: run a named command in the host process.
    pub async fn run(&self, command: &str) -> Result<CommandOutcome, EngineError> {
        if self.program.command(command).is_none() {
            return Err(EngineError::UnknownCommand(command.to_string()));
        }
        let interpreter = Interpreter::new(self.program.clone(), self.registry.clone());
        let mut ctx = self.seed_context(interpreter.clone());
        interpreter.run(&mut ctx, command).await
    }

    /// Plan generation: what the command would do.
    pub fn plan(&self, command: &str) -> Result<ExecutionStep, EngineError> {
        let interpreter = Interpreter::new(self.program.clone(), self.registry.clone());
        let ctx = self.seed_context(interpreter);
        Planner::new(self.program.clone(), self.registry.clone()).plan_command(&ctx, command)
    }

    /// Code generation: the self-contained CLI source plus its manifest.
    pub fn generate(&self, package: &str) -> Result<GeneratedSource, EngineError> {
        let interpreter = Interpreter::new(self.program.clone(), self.registry.clone());
        let ctx = self.seed_context(interpreter);
        Generator::new(self.program.clone(), self.registry.clone()).generate(&ctx, package)
    }

    pub fn snapshot(&self) -> &EnvSnapshot {
        &self.snapshot
    }

    pub fn command_kind(&self, name: &str) -> Option<CommandKind> {
        self.program.command(name).map(|c| c.kind)
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for command in &self.program.commands {
            if !names.contains(&command.name) {
                names.push(command.name.clone());
            }
        }
        names
    }

    // -------------------------------------------------------------------------
    // Process-group surface
    // -------------------------------------------------------------------------

    /// True when `name` declares a watch command (alone or paired with a
    /// stop command).
    pub fn is_group(&self, name: &str) -> bool {
        matches!(self.program.group(name), (Some(_), _))
    }

    /// Run a group's watch body in the foreground, regardless of which half
    /// of the pair was declared first.
    pub async fn run_group_foreground(&self, name: &str) -> Result<CommandOutcome, EngineError> {
        let (watch, _) = self.program.group(name);
        let watch = watch.ok_or_else(|| EngineError::UnknownCommand(name.to_string()))?;
        let interpreter = Interpreter::new(self.program.clone(), self.registry.clone());
        let mut ctx = self.seed_context(interpreter.clone());
        let result = interpreter.run_seq(&mut ctx, &watch.seq).await?;
        Ok(CommandOutcome::from_result(result))
    }

    pub fn group_status(&self, name: &str) -> supervisor::ProcessStatus {
        supervisor::status(name)
    }

    pub fn group_logs(&self, name: &str) -> supervisor::LogsOutcome {
        supervisor::logs(name)
    }

    /// Stop a process group: run the declared stop body (when present), then
    /// signal the watched PID and remove its PID file.
    pub async fn group_stop(
        &self,
        name: &str,
    ) -> Result<(CommandResult, supervisor::StopOutcome), EngineError> {
        let body = match self.program.group(name) {
            (_, Some(stop)) => {
                let interpreter = Interpreter::new(self.program.clone(), self.registry.clone());
                let mut ctx = self.seed_context(interpreter.clone());
                interpreter.run_seq(&mut ctx, &stop.seq).await?
            }
            _ => CommandResult::ok(),
        };
        Ok((body, supervisor::stop(name)))
    }
}

/// Structural validation over one sequence, recursing into block bodies and
/// pattern branches: decorator existence and kind, pipe well-formedness,
/// pattern label sets.
fn validate_seq(seq: &CommandSeq, registry: &DecoratorRegistry) -> Result<(), EngineError> {
    for step in &seq.steps {
        if step.elements.is_empty() {
            return Err(EngineError::ParseContract("empty command step".to_string()));
        }
        for (index, element) in step.elements.iter().enumerate() {
            let is_last = index + 1 == step.elements.len();
            if !is_last && matches!(element.op_next, ChainOp::Append) {
                return Err(EngineError::ParseContract(
                    "'>>' terminates a chain; nothing may follow it".to_string(),
                ));
            }
            if is_last && !matches!(element.op_next, ChainOp::None | ChainOp::Append) {
                return Err(EngineError::ParseContract(
                    "chain ends with a dangling operator".to_string(),
                ));
            }
            if matches!(element.op_next, ChainOp::Pipe) {
                let downstream = step.elements.get(index + 1).ok_or_else(|| {
                    EngineError::ParseContract("'|' with no downstream element".to_string())
                })?;
                match &downstream.kind {
                    ElementKind::Shell { .. } => {}
                    ElementKind::Action { name, .. } => {
                        let action = registry.action(name)?;
                        if !action.pipe_capable() {
                            return Err(EngineError::DecoratorMisused(format!(
                                "@{} is not pipe-capable",
                                name
                            )));
                        }
                    }
                    ElementKind::Block(wrapper) => {
                        return Err(EngineError::DecoratorMisused(format!(
                            "cannot pipe into block decorator @{}",
                            wrapper.name
                        )));
                    }
                    ElementKind::Pattern(pattern) => {
                        return Err(EngineError::DecoratorMisused(format!(
                            "cannot pipe into pattern decorator @{}",
                            pattern.name
                        )));
                    }
                }
            }
            match &element.kind {
                ElementKind::Shell { parts } => {
                    for part in parts {
                        if let crate::ir::ShellPart::Value { name, .. } = part {
                            registry.value(name)?;
                        }
                    }
                }
                ElementKind::Action { name, .. } => {
                    registry.action(name)?;
                }
                ElementKind::Block(wrapper) => {
                    registry.block(&wrapper.name)?;
                    validate_seq(&wrapper.inner, registry)?;
                }
                ElementKind::Pattern(pattern) => {
                    let dec = registry.pattern(&pattern.name)?;
                    let labels: Vec<String> = pattern.branches.keys().cloned().collect();
                    dec.validate(&labels)?;
                    for body in pattern.branches.values() {
                        validate_seq(body, registry)?;
                    }
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
