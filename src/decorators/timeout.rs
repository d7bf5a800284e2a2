//! `@timeout(duration=...)` — block decorator running its body under a
//! deadline. On expiry the body's cancellation token fires (shell children
//! receive SIGTERM, then SIGKILL) and a timeout result is returned.

use async_trait::async_trait;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{format_duration, BoundParams, ParamSpec, ParamType, ParameterSchema};
use crate::ir::CommandSeq;
use crate::registry::BlockDecorator;
use crate::strategies::generator::{seq_block, CodeFragment};
use crate::strategies::planner::ExecutionStep;

pub struct TimeoutDecorator;

#[async_trait]
impl BlockDecorator for TimeoutDecorator {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::required(
            "duration",
            ParamType::Duration,
            "deadline for the body",
        )])
    }

    async fn wrap(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        inner: &CommandSeq,
    ) -> Result<CommandResult, EngineError> {
        let duration = params.duration("duration").unwrap_or_default();
        let delegate = ctx.delegate.clone();
        let (mut sub, deadline_token) = ctx.with_child_cancel();
        tokio::select! {
            result = delegate.run_seq(&mut sub, inner) => result,
            _ = tokio::time::sleep(duration) => {
                deadline_token.cancel();
                Ok(CommandResult::timed_out("@timeout"))
            }
        }
    }

    fn describe(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner: ExecutionStep,
    ) -> ExecutionStep {
        let duration = params.duration("duration").unwrap_or_default();
        ExecutionStep::leaf("timeout", format_duration(duration)).with_children(inner.children)
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner_steps: &[String],
    ) -> Result<CodeFragment, EngineError> {
        let duration = params.duration("duration").unwrap_or_default();
        let code = format!(
            "{{\n    let (__tx, __rx) = std::sync::mpsc::channel();\n    let mut __ctx = ctx.clone();\n    std::thread::spawn(move || {{\n        let ctx = &mut __ctx;\n        let _ = __tx.send({});\n    }});\n    match __rx.recv_timeout(std::time::Duration::from_millis({})) {{\n        Ok(__r) => __r,\n        Err(_) => CmdResult::timed_out(\"@timeout\"),\n    }}\n}}",
            seq_block(inner_steps),
            duration.as_millis()
        );
        Ok(CodeFragment::expr(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, ParamValue, Params};
    use std::time::Duration;

    fn bound(d: Duration) -> BoundParams {
        TimeoutDecorator
            .schema()
            .bind(
                "timeout",
                &Params::new(vec![Param {
                    name: Some("duration".to_string()),
                    value: ParamValue::Duration(d),
                }]),
            )
            .unwrap()
    }

    #[test]
    fn test_describe_formats_duration() {
        let ctx = test_context(&[], &[]);
        let step = TimeoutDecorator.describe(
            &ctx,
            &bound(Duration::from_millis(500)),
            ExecutionStep::leaf("body", ""),
        );
        assert_eq!(step.kind, "timeout");
        assert_eq!(step.description, "500ms");
    }

    #[test]
    fn test_gen_uses_recv_timeout() {
        let ctx = test_context(&[], &[]);
        let frag = TimeoutDecorator
            .gen(&ctx, &bound(Duration::from_millis(250)), &["CmdResult::ok()".to_string()])
            .unwrap();
        assert!(frag.code.contains("recv_timeout(std::time::Duration::from_millis(250))"));
        assert!(frag.code.contains("CmdResult::timed_out(\"@timeout\")"));
    }
}
