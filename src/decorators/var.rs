//! `@var(name)` — value decorator over CLI/program variables.
//!
//! Yields the variable's string value. References are validated when the
//! invocation snapshot is created, so a missing variable here is a snapshot
//! error, never a late runtime surprise.

use async_trait::async_trait;

use crate::engine::context::ExecContext;
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::registry::ValueDecorator;
use crate::strategies::generator::{rust_str, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct VarDecorator;

fn var_name(params: &BoundParams) -> &str {
    params.str("name").unwrap_or_default()
}

#[async_trait]
impl ValueDecorator for VarDecorator {
    fn name(&self) -> &'static str {
        "var"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "name",
            ParamType::Ident,
            "variable to substitute",
        )])
    }

    async fn resolve(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
    ) -> Result<String, EngineError> {
        let name = var_name(params);
        ctx.var(name).map(|v| v.to_string()).ok_or_else(|| {
            EngineError::Snapshot(format!("variable '{}' is not defined", name))
        })
    }

    fn describe(&self, ctx: &ExecContext, params: &BoundParams) -> ExecutionStep {
        let name = var_name(params);
        match ctx.var(name) {
            Some(value) => ExecutionStep::leaf("value", value),
            None => ExecutionStep::leaf("value", format!("@var({})", name)),
        }
    }

    fn gen(&self, ctx: &ExecContext, params: &BoundParams) -> Result<CodeFragment, EngineError> {
        // Variables are frozen at snapshot time, so the generator embeds the
        // resolved literal.
        let name = var_name(params);
        let value = ctx
            .var(name)
            .ok_or_else(|| EngineError::Snapshot(format!("variable '{}' is not defined", name)))?;
        Ok(CodeFragment::expr(rust_str(value)))
    }
}
