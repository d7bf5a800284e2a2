//! `@shell(text)` — the synthetic shell leaf action. The IR builder
//! normalizes bare shell text into shell elements; this decorator gives the
//! same behavior a decorator-level form, and it is the canonical
//! pipe-capable action.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::engine::shell::exec_shell;
use crate::registry::ActionDecorator;
use crate::strategies::generator::{rust_str, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct ShellDecorator;

fn text(params: &BoundParams) -> &str {
    params.str("text").unwrap_or_default()
}

#[async_trait]
impl ActionDecorator for ShellDecorator {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "text",
            ParamType::Str,
            "shell command text",
        )])
    }

    fn pipe_capable(&self) -> bool {
        true
    }

    async fn run(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        stdin: Option<String>,
    ) -> Result<CommandResult, EngineError> {
        exec_shell(ctx, text(params), stdin.as_deref()).await
    }

    fn describe(&self, _ctx: &ExecContext, params: &BoundParams) -> ExecutionStep {
        ExecutionStep::leaf("shell", text(params))
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        stdin: Option<&str>,
    ) -> Result<CodeFragment, EngineError> {
        Ok(CodeFragment::expr(format!(
            "run_shell(ctx, {}, {})",
            rust_str(text(params)),
            stdin.unwrap_or("None")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, ParamValue, Params};

    fn bound(text: &str) -> BoundParams {
        ShellDecorator
            .schema()
            .bind(
                "shell",
                &Params::new(vec![Param {
                    name: None,
                    value: ParamValue::Str(text.to_string()),
                }]),
            )
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_text() {
        let mut ctx = test_context(&[("PATH", "/usr/bin:/bin")], &[]);
        let result = ShellDecorator.run(&mut ctx, &bound("echo via-decorator"), None).await.unwrap();
        assert_eq!(result.stdout, "via-decorator\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_accepts_piped_stdin() {
        assert!(ShellDecorator.pipe_capable());
        let mut ctx = test_context(&[("PATH", "/usr/bin:/bin")], &[]);
        let result = ShellDecorator
            .run(&mut ctx, &bound("wc -l"), Some("a\nb\n".to_string()))
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "2");
    }

    #[test]
    fn test_gen_threads_stdin_expression() {
        let ctx = test_context(&[], &[]);
        let frag = ShellDecorator.gen(&ctx, &bound("sort"), Some("__piped.take().as_deref()")).unwrap();
        assert_eq!(frag.code, "run_shell(ctx, \"sort\", __piped.take().as_deref())");
    }
}
