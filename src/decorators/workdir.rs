//! `@workdir(path)` — block decorator running its body with the context
//! working directory moved to `path`. The change is a value on a forked
//! context, so it is undone by construction and never touches the host
//! process cwd.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::ir::CommandSeq;
use crate::registry::BlockDecorator;
use crate::strategies::generator::{rust_str, seq_block, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct WorkdirDecorator;

fn path(params: &BoundParams) -> &str {
    params.str("path").unwrap_or_default()
}

#[async_trait]
impl BlockDecorator for WorkdirDecorator {
    fn name(&self) -> &'static str {
        "workdir"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "path",
            ParamType::Str,
            "directory to run the body in",
        )])
    }

    async fn wrap(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        inner: &CommandSeq,
    ) -> Result<CommandResult, EngineError> {
        let delegate = ctx.delegate.clone();
        let mut sub = ctx.with_workdir(path(params));
        delegate.run_seq(&mut sub, inner).await
    }

    fn describe(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner: ExecutionStep,
    ) -> ExecutionStep {
        ExecutionStep::leaf("workdir", path(params)).with_children(inner.children)
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner_steps: &[String],
    ) -> Result<CodeFragment, EngineError> {
        let code = format!(
            "{{\n    let __saved = ctx.cwd.clone();\n    ctx.cwd = resolve_path(&ctx.cwd, {});\n    let __r = {};\n    ctx.cwd = __saved;\n    __r\n}}",
            rust_str(path(params)),
            seq_block(inner_steps)
        );
        Ok(CodeFragment::expr(code))
    }
}
