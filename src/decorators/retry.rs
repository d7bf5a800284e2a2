//! `@retry(attempts=N, delay=?)` — block decorator re-running its body until
//! the first zero exit. The delay sleep observes the cancellation signal, so
//! a surrounding `@timeout` cuts a retry short mid-sleep.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{
    format_duration, BoundParams, ParamSpec, ParamType, ParamValue, ParameterSchema,
};
use crate::ir::CommandSeq;
use crate::registry::BlockDecorator;
use crate::strategies::generator::{seq_block, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct RetryDecorator;

#[async_trait]
impl BlockDecorator for RetryDecorator {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::required("attempts", ParamType::Int, "maximum attempts"),
            ParamSpec::optional(
                "delay",
                ParamType::Duration,
                Some(ParamValue::Duration(std::time::Duration::ZERO)),
                "sleep between attempts",
            ),
        ])
    }

    async fn wrap(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        inner: &CommandSeq,
    ) -> Result<CommandResult, EngineError> {
        let attempts = params.int("attempts").unwrap_or(1).max(1);
        let delay = params.duration("delay").unwrap_or_default();
        let delegate = ctx.delegate.clone();

        let mut last = CommandResult::ok();
        for attempt in 0..attempts {
            if ctx.is_canceled() {
                return Ok(CommandResult::canceled("@retry"));
            }
            let mut sub = ctx.fork();
            last = delegate.run_seq(&mut sub, inner).await?;
            if last.is_success() {
                return Ok(last);
            }
            if attempt + 1 < attempts && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        return Ok(CommandResult::canceled("@retry"));
                    }
                }
            }
        }
        // Exhausted: the last attempt's result stands.
        Ok(last)
    }

    fn describe(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner: ExecutionStep,
    ) -> ExecutionStep {
        let attempts = params.int("attempts").unwrap_or(1);
        let delay = params.duration("delay").unwrap_or_default();
        let mut step = ExecutionStep::leaf("retry", format!("up to {} attempts", attempts))
            .with_children(inner.children);
        if !delay.is_zero() {
            step.metadata.insert("delay".to_string(), format_duration(delay));
        }
        step
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner_steps: &[String],
    ) -> Result<CodeFragment, EngineError> {
        let attempts = params.int("attempts").unwrap_or(1).max(1);
        let delay = params.duration("delay").unwrap_or_default();
        let sleep = if delay.is_zero() {
            String::new()
        } else {
            format!(
                "        if __attempt < {} {{\n            std::thread::sleep(std::time::Duration::from_millis({}));\n        }}\n",
                attempts,
                delay.as_millis()
            )
        };
        let code = format!(
            "{{\n    let mut __r = CmdResult::ok();\n    let mut __attempt = 0i64;\n    while __attempt < {attempts} {{\n        __r = {body};\n        if __r.exit_code == 0 {{\n            break;\n        }}\n        __attempt += 1;\n{sleep}    }}\n    __r\n}}",
            attempts = attempts,
            body = seq_block(inner_steps),
            sleep = sleep
        );
        Ok(CodeFragment::expr(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, Params};

    fn bound(attempts: i64, delay: Option<&str>) -> BoundParams {
        let mut items = vec![Param {
            name: Some("attempts".to_string()),
            value: ParamValue::Int(attempts),
        }];
        if let Some(d) = delay {
            items.push(Param {
                name: Some("delay".to_string()),
                value: ParamValue::Str(d.to_string()),
            });
        }
        RetryDecorator.schema().bind("retry", &Params::new(items)).unwrap()
    }

    #[test]
    fn test_describe_attempts_and_delay() {
        let ctx = test_context(&[], &[]);
        let step = RetryDecorator.describe(&ctx, &bound(3, Some("1s")), ExecutionStep::leaf("body", ""));
        assert_eq!(step.description, "up to 3 attempts");
        assert_eq!(step.metadata.get("delay").map(|s| s.as_str()), Some("1s"));
    }

    #[test]
    fn test_gen_bounds_attempts() {
        let ctx = test_context(&[], &[]);
        let frag = RetryDecorator
            .gen(&ctx, &bound(5, Some("250ms")), &["CmdResult::ok()".to_string()])
            .unwrap();
        assert!(frag.code.contains("while __attempt < 5"));
        assert!(frag.code.contains("from_millis(250)"));
    }

    #[test]
    fn test_gen_without_delay_has_no_sleep() {
        let ctx = test_context(&[], &[]);
        let frag = RetryDecorator.gen(&ctx, &bound(2, None), &["CmdResult::ok()".to_string()]).unwrap();
        assert!(!frag.code.contains("sleep"));
    }
}
