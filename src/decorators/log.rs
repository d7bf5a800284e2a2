//! `@log(msg)` — action decorator writing a message to stdout or stderr.
//! Deliberately not pipe-capable; piping into it is rejected before any
//! side effect runs.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParamValue, ParameterSchema};
use crate::registry::ActionDecorator;
use crate::strategies::generator::{rust_str, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct LogDecorator;

#[async_trait]
impl ActionDecorator for LogDecorator {
    fn name(&self) -> &'static str {
        "log"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::required("msg", ParamType::Str, "message to write"),
            ParamSpec::optional(
                "stderr",
                ParamType::Bool,
                Some(ParamValue::Bool(false)),
                "write to stderr instead of stdout",
            ),
        ])
    }

    async fn run(
        &self,
        _ctx: &mut ExecContext,
        params: &BoundParams,
        _stdin: Option<String>,
    ) -> Result<CommandResult, EngineError> {
        let mut line = params.str("msg").unwrap_or_default().to_string();
        line.push('\n');
        if params.bool("stderr").unwrap_or(false) {
            Ok(CommandResult::with_exit_code(String::new(), line, 0))
        } else {
            Ok(CommandResult::success(line))
        }
    }

    fn describe(&self, _ctx: &ExecContext, params: &BoundParams) -> ExecutionStep {
        ExecutionStep::leaf("log", params.str("msg").unwrap_or_default())
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        _stdin: Option<&str>,
    ) -> Result<CodeFragment, EngineError> {
        let mut line = params.str("msg").unwrap_or_default().to_string();
        line.push('\n');
        let code = if params.bool("stderr").unwrap_or(false) {
            format!(
                "CmdResult {{ stdout: String::new(), stderr: {}.to_string(), exit_code: 0 }}",
                rust_str(&line)
            )
        } else {
            format!(
                "CmdResult {{ stdout: {}.to_string(), stderr: String::new(), exit_code: 0 }}",
                rust_str(&line)
            )
        };
        Ok(CodeFragment::expr(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, Params};

    fn bound(msg: &str, stderr: bool) -> BoundParams {
        let mut items = vec![Param {
            name: Some("msg".to_string()),
            value: ParamValue::Str(msg.to_string()),
        }];
        if stderr {
            items.push(Param {
                name: Some("stderr".to_string()),
                value: ParamValue::Bool(true),
            });
        }
        LogDecorator.schema().bind("log", &Params::new(items)).unwrap()
    }

    #[tokio::test]
    async fn test_writes_stdout_line() {
        let mut ctx = test_context(&[], &[]);
        let result = LogDecorator.run(&mut ctx, &bound("deploying", false), None).await.unwrap();
        assert_eq!(result.stdout, "deploying\n");
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_writes_stderr_line() {
        let mut ctx = test_context(&[], &[]);
        let result = LogDecorator.run(&mut ctx, &bound("careful", true), None).await.unwrap();
        assert_eq!(result.stderr, "careful\n");
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_not_pipe_capable() {
        assert!(!LogDecorator.pipe_capable());
    }
}
