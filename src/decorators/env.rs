//! `@env(name, default?)` — value decorator over the environment snapshot.
//!
//! Yields the env var from the snapshot, the explicit default, or the empty
//! string, in that order. Every reference records its key so generated code
//! can narrow the environment it embeds.

use async_trait::async_trait;

use crate::engine::context::ExecContext;
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::registry::ValueDecorator;
use crate::strategies::generator::{rust_str, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct EnvDecorator;

fn lookup(ctx: &ExecContext, params: &BoundParams) -> String {
    let key = params.str("name").unwrap_or_default();
    ctx.env_usage.record(key);
    match ctx.env(key) {
        Some(value) => value.to_string(),
        None => params.str("default").unwrap_or_default().to_string(),
    }
}

#[async_trait]
impl ValueDecorator for EnvDecorator {
    fn name(&self) -> &'static str {
        "env"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::required("name", ParamType::Ident, "environment key"),
            ParamSpec::optional("default", ParamType::Str, None, "fallback when the key is unset"),
        ])
    }

    async fn resolve(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
    ) -> Result<String, EngineError> {
        Ok(lookup(ctx, params))
    }

    fn describe(&self, ctx: &ExecContext, params: &BoundParams) -> ExecutionStep {
        ExecutionStep::leaf("value", lookup(ctx, params))
    }

    fn gen(&self, ctx: &ExecContext, params: &BoundParams) -> Result<CodeFragment, EngineError> {
        let key = params.str("name").unwrap_or_default();
        ctx.env_usage.record(key);
        let default = params.str("default").unwrap_or_default();
        Ok(CodeFragment::expr(format!(
            "env_or({}, {})",
            rust_str(key),
            rust_str(default)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, ParamValue, Params};

    fn bound(key: &str, default: Option<&str>) -> BoundParams {
        let mut items = vec![Param { name: None, value: ParamValue::Ident(key.to_string()) }];
        if let Some(d) = default {
            items.push(Param { name: None, value: ParamValue::Str(d.to_string()) });
        }
        EnvDecorator.schema().bind("env", &Params::new(items)).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_from_snapshot() {
        let mut ctx = test_context(&[("HOME", "/home/u")], &[]);
        let value = EnvDecorator.resolve(&mut ctx, &bound("HOME", None)).await.unwrap();
        assert_eq!(value, "/home/u");
        assert_eq!(ctx.env_usage.keys(), vec!["HOME".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_default_then_empty() {
        let mut ctx = test_context(&[], &[]);
        let value = EnvDecorator
            .resolve(&mut ctx, &bound("MISSING", Some("fallback")))
            .await
            .unwrap();
        assert_eq!(value, "fallback");

        let value = EnvDecorator.resolve(&mut ctx, &bound("MISSING", None)).await.unwrap();
        assert_eq!(value, "");
    }

    #[test]
    fn test_gen_emits_lookup() {
        let ctx = test_context(&[], &[]);
        let frag = EnvDecorator.gen(&ctx, &bound("HOME", Some("/tmp"))).unwrap();
        assert_eq!(frag.code, "env_or(\"HOME\", \"/tmp\")");
        assert_eq!(ctx.env_usage.keys(), vec!["HOME".to_string()]);
    }
}
