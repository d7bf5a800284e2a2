//! Interpreter Strategy
//!
//! Walks the IR top-down and executes it in the host process. Implements the
//! execution delegate, so decorators recurse through the context instead of
//! importing this module.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::chain::eval_step;
use crate::engine::context::{CommandOutcome, CommandResult, ExecContext, ExecDelegate};
use crate::engine::errors::EngineError;
use crate::engine::params::Params;
use crate::engine::seq::eval_seq;
use crate::ir::{CommandSeq, CommandStep, PatternNode, ProgramIr, Wrapper};
use crate::registry::DecoratorRegistry;

/// The interpreting strategy over one lowered program.
pub struct Interpreter {
    program: Arc<ProgramIr>,
    registry: Arc<DecoratorRegistry>,
}

impl Interpreter {
    pub fn new(program: Arc<ProgramIr>, registry: Arc<DecoratorRegistry>) -> Arc<Self> {
        Arc::new(Self { program, registry })
    }

    /// Run one named command to completion and classify the result.
    pub async fn run(
        &self,
        ctx: &mut ExecContext,
        name: &str,
    ) -> Result<CommandOutcome, EngineError> {
        let result = self.run_command(ctx, name).await?;
        Ok(CommandOutcome::from_result(result))
    }
}

#[async_trait]
impl ExecDelegate for Interpreter {
    async fn run_seq(
        &self,
        ctx: &mut ExecContext,
        seq: &CommandSeq,
    ) -> Result<CommandResult, EngineError> {
        eval_seq(ctx, seq).await
    }

    async fn run_step(
        &self,
        ctx: &mut ExecContext,
        step: &CommandStep,
    ) -> Result<CommandResult, EngineError> {
        eval_step(ctx, step).await
    }

    async fn run_action(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: &Params,
        stdin: Option<String>,
    ) -> Result<CommandResult, EngineError> {
        let action = self.registry.action(name)?;
        if stdin.is_some() && !action.pipe_capable() {
            return Err(EngineError::DecoratorMisused(format!(
                "@{} is not pipe-capable",
                name
            )));
        }
        let bound = action.schema().bind(name, params)?;
        action.run(ctx, &bound, stdin).await
    }

    async fn run_block(
        &self,
        ctx: &mut ExecContext,
        wrapper: &Wrapper,
    ) -> Result<CommandResult, EngineError> {
        let block = self.registry.block(&wrapper.name)?;
        let bound = block.schema().bind(&wrapper.name, &wrapper.params)?;
        block.wrap(ctx, &bound, &wrapper.inner).await
    }

    async fn run_pattern(
        &self,
        ctx: &mut ExecContext,
        pattern: &PatternNode,
    ) -> Result<CommandResult, EngineError> {
        let dec = self.registry.pattern(&pattern.name)?;
        let labels: Vec<String> = pattern.branches.keys().cloned().collect();
        dec.validate(&labels)?;
        let bound = dec.schema().bind(&pattern.name, &pattern.params)?;
        dec.select(ctx, &bound, &pattern.branches).await
    }

    async fn resolve_value(
        &self,
        ctx: &mut ExecContext,
        name: &str,
        params: &Params,
    ) -> Result<String, EngineError> {
        let value = self.registry.value(name)?;
        let bound = value.schema().bind(name, params)?;
        value.resolve(ctx, &bound).await
    }

    async fn run_command(
        &self,
        ctx: &mut ExecContext,
        name: &str,
    ) -> Result<CommandResult, EngineError> {
        let command = self
            .program
            .command(name)
            .ok_or_else(|| EngineError::UnknownCommand(name.to_string()))?;
        eval_seq(ctx, &command.seq).await
    }
}
