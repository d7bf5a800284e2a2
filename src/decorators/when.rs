//! `@when(key)` — pattern decorator matching the string value of `key`
//! (a program variable first, then the environment) against branch labels.
//! The `default` branch matches anything; with no match and no default the
//! decorator is a no-op.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::ir::CommandSeq;
use crate::registry::PatternDecorator;
use crate::strategies::generator::{rust_str, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub const DEFAULT_BRANCH: &str = "default";

pub struct WhenDecorator;

fn key_of(params: &BoundParams) -> &str {
    params.str("key").unwrap_or_default()
}

fn key_value(ctx: &ExecContext, key: &str) -> String {
    if let Some(value) = ctx.var(key) {
        return value.to_string();
    }
    ctx.env_usage.record(key);
    ctx.env(key).unwrap_or_default().to_string()
}

#[async_trait]
impl PatternDecorator for WhenDecorator {
    fn name(&self) -> &'static str {
        "when"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "key",
            ParamType::Ident,
            "variable or environment key to match on",
        )])
    }

    fn validate(&self, labels: &[String]) -> Result<(), EngineError> {
        if labels.is_empty() {
            return Err(EngineError::DecoratorMisused(
                "@when requires at least one branch".to_string(),
            ));
        }
        Ok(())
    }

    async fn select(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        branches: &IndexMap<String, CommandSeq>,
    ) -> Result<CommandResult, EngineError> {
        let value = key_value(ctx, key_of(params));
        let chosen = branches
            .get(&value)
            .or_else(|| branches.get(DEFAULT_BRANCH));
        match chosen {
            Some(body) => {
                let delegate = ctx.delegate.clone();
                let mut sub = ctx.fork();
                delegate.run_seq(&mut sub, body).await
            }
            None => Ok(CommandResult::ok()),
        }
    }

    fn describe(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        branches: IndexMap<String, ExecutionStep>,
    ) -> ExecutionStep {
        let key = key_of(params);
        let value = key_value(ctx, key);
        // Selection is marked, not pruned, so the plan shows every branch.
        let has_exact = branches.contains_key(&value);
        let mut children = Vec::new();
        for (label, mut step) in branches {
            if label == value || (!has_exact && label == DEFAULT_BRANCH) {
                step.metadata.insert("selected".to_string(), "true".to_string());
            }
            children.push(step);
        }
        ExecutionStep::leaf("when", key).with_children(children)
    }

    fn gen(
        &self,
        ctx: &ExecContext,
        params: &BoundParams,
        branches: &IndexMap<String, String>,
    ) -> Result<CodeFragment, EngineError> {
        let key = key_of(params);
        if ctx.var(key).is_none() {
            ctx.env_usage.record(key);
        }
        let mut arms = String::new();
        for (label, body) in branches {
            if label == DEFAULT_BRANCH {
                continue;
            }
            arms.push_str(&format!("        {} => {},\n", rust_str(label), indent(body)));
        }
        let fallback = branches
            .get(DEFAULT_BRANCH)
            .map(|body| indent(body))
            .unwrap_or_else(|| "CmdResult::ok()".to_string());
        let code = format!(
            "{{\n    let __key = lookup_key({});\n    match __key.as_str() {{\n{}        _ => {},\n    }}\n}}",
            rust_str(key),
            arms,
            fallback
        );
        Ok(CodeFragment::expr(code))
    }
}

fn indent(code: &str) -> String {
    let mut lines = code.lines();
    let mut out = String::new();
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str("        ");
        out.push_str(line);
    }
    out
}
