//! Decorator Registry
//!
//! Name → implementation map over the four decorator kinds. A single name
//! occupies exactly one kind; registering a name twice fails regardless of
//! kind. Reads vastly outnumber writes (registration happens at startup), so
//! the map sits behind a read/write lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParameterSchema};
use crate::ir::CommandSeq;
use crate::strategies::generator::CodeFragment;
use crate::strategies::planner::ExecutionStep;

// =============================================================================
// DECORATOR CONTRACTS
// =============================================================================

/// Inline substitution: yields a string into a shell element. Each kind
/// carries three entry points — runtime, plan, and codegen — one per
/// evaluation strategy.
#[async_trait]
pub trait ValueDecorator: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ParameterSchema;
    /// Runtime entry: resolve to the substitution text.
    async fn resolve(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
    ) -> Result<String, EngineError>;
    /// Plan entry: the textual expansion shown in plans.
    fn describe(&self, ctx: &ExecContext, params: &BoundParams) -> ExecutionStep;
    /// Codegen entry: a Rust expression evaluating to the substitution text.
    fn gen(&self, ctx: &ExecContext, params: &BoundParams) -> Result<CodeFragment, EngineError>;
}

/// Executes atomically and yields a command result. Pipe-capable actions
/// additionally accept upstream stdout as stdin.
#[async_trait]
pub trait ActionDecorator: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ParameterSchema;
    /// Whether this action accepts piped stdin.
    fn pipe_capable(&self) -> bool {
        false
    }
    /// Cross-command dependency capability: names of commands this action
    /// references, extracted from its parameters.
    fn command_refs(&self, _params: &BoundParams) -> Vec<String> {
        Vec::new()
    }
    async fn run(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        stdin: Option<String>,
    ) -> Result<CommandResult, EngineError>;
    fn describe(&self, ctx: &ExecContext, params: &BoundParams) -> ExecutionStep;
    /// Codegen entry. `stdin` is the Rust expression for piped input when
    /// the upstream operator was `|` (only ever set for pipe-capable
    /// actions).
    fn gen(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        stdin: Option<&str>,
    ) -> Result<CodeFragment, EngineError>;
}

/// Wraps an inner sequence and controls how it runs.
#[async_trait]
pub trait BlockDecorator: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ParameterSchema;
    async fn wrap(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        inner: &CommandSeq,
    ) -> Result<CommandResult, EngineError>;
    fn describe(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        inner: ExecutionStep,
    ) -> ExecutionStep;
    /// Codegen entry: `inner_steps` holds one already-rendered Rust
    /// expression per top-level step of the wrapped body.
    fn gen(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        inner_steps: &[String],
    ) -> Result<CodeFragment, EngineError>;
}

/// Chooses exactly one branch from a labeled map.
#[async_trait]
pub trait PatternDecorator: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ParameterSchema;
    /// Validate the branch label set at program load.
    fn validate(&self, labels: &[String]) -> Result<(), EngineError>;
    async fn select(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        branches: &IndexMap<String, CommandSeq>,
    ) -> Result<CommandResult, EngineError>;
    fn describe(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        branches: IndexMap<String, ExecutionStep>,
    ) -> ExecutionStep;
    fn gen(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        branches: &IndexMap<String, String>,
    ) -> Result<CodeFragment, EngineError>;
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorKind {
    Value,
    Action,
    Block,
    Pattern,
}

#[derive(Clone)]
enum Entry {
    Value(Arc<dyn ValueDecorator>),
    Action(Arc<dyn ActionDecorator>),
    Block(Arc<dyn BlockDecorator>),
    Pattern(Arc<dyn PatternDecorator>),
}

impl Entry {
    fn kind(&self) -> DecoratorKind {
        match self {
            Entry::Value(_) => DecoratorKind::Value,
            Entry::Action(_) => DecoratorKind::Action,
            Entry::Block(_) => DecoratorKind::Block,
            Entry::Pattern(_) => DecoratorKind::Pattern,
        }
    }
}

/// Thread-safe decorator name → implementation map.
#[derive(Default)]
pub struct DecoratorRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl DecoratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, entry: Entry) -> Result<(), EngineError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(name) {
            return Err(EngineError::DuplicateDecorator(name.to_string()));
        }
        entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn register_value(&self, dec: Arc<dyn ValueDecorator>) -> Result<(), EngineError> {
        self.insert(dec.name(), Entry::Value(dec.clone()))
    }

    pub fn register_action(&self, dec: Arc<dyn ActionDecorator>) -> Result<(), EngineError> {
        self.insert(dec.name(), Entry::Action(dec.clone()))
    }

    pub fn register_block(&self, dec: Arc<dyn BlockDecorator>) -> Result<(), EngineError> {
        self.insert(dec.name(), Entry::Block(dec.clone()))
    }

    pub fn register_pattern(&self, dec: Arc<dyn PatternDecorator>) -> Result<(), EngineError> {
        self.insert(dec.name(), Entry::Pattern(dec.clone()))
    }

    fn entry(&self, name: &str) -> Result<Entry, EngineError> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::DecoratorNotFound(name.to_string()))
    }

    pub fn kind(&self, name: &str) -> Option<DecoratorKind> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .map(|e| e.kind())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kind(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn value(&self, name: &str) -> Result<Arc<dyn ValueDecorator>, EngineError> {
        match self.entry(name)? {
            Entry::Value(dec) => Ok(dec),
            other => Err(misuse(name, "value", other.kind())),
        }
    }

    pub fn action(&self, name: &str) -> Result<Arc<dyn ActionDecorator>, EngineError> {
        match self.entry(name)? {
            Entry::Action(dec) => Ok(dec),
            other => Err(misuse(name, "action", other.kind())),
        }
    }

    pub fn block(&self, name: &str) -> Result<Arc<dyn BlockDecorator>, EngineError> {
        match self.entry(name)? {
            Entry::Block(dec) => Ok(dec),
            other => Err(misuse(name, "block", other.kind())),
        }
    }

    pub fn pattern(&self, name: &str) -> Result<Arc<dyn PatternDecorator>, EngineError> {
        match self.entry(name)? {
            Entry::Pattern(dec) => Ok(dec),
            other => Err(misuse(name, "pattern", other.kind())),
        }
    }
}

fn misuse(name: &str, wanted: &str, actual: DecoratorKind) -> EngineError {
    EngineError::DecoratorMisused(format!(
        "@{} is a {:?} decorator, used in {} position",
        name, actual, wanted
    ))
}
