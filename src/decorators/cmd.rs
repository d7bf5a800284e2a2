//! `@cmd(name)` — action decorator invoking another top-level command
//! in-process via the execution delegate. Declares a dependency edge for the
//! analyzer so emitted code defines the callee before the caller.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::registry::ActionDecorator;
use crate::strategies::generator::{fn_ident, CodeFragment};
use crate::strategies::planner::{ExecutionStep, META_COMMAND_REF};

pub struct CmdDecorator;

fn target(params: &BoundParams) -> &str {
    params.str("name").unwrap_or_default()
}

#[async_trait]
impl ActionDecorator for CmdDecorator {
    fn name(&self) -> &'static str {
        "cmd"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "name",
            ParamType::Ident,
            "command to invoke",
        )])
    }

    fn command_refs(&self, params: &BoundParams) -> Vec<String> {
        vec![target(params).to_string()]
    }

    async fn run(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        _stdin: Option<String>,
    ) -> Result<CommandResult, EngineError> {
        let delegate = ctx.delegate.clone();
        let mut sub = ctx.fork();
        delegate.run_command(&mut sub, target(params)).await
    }

    fn describe(&self, _ctx: &ExecContext, params: &BoundParams) -> ExecutionStep {
        let name = target(params);
        ExecutionStep::leaf("cmd", format!("@cmd({})", name)).with_meta(META_COMMAND_REF, name)
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        _stdin: Option<&str>,
    ) -> Result<CodeFragment, EngineError> {
        Ok(CodeFragment::expr(format!("cmd_{}(ctx)", fn_ident(target(params)))))
    }
}
