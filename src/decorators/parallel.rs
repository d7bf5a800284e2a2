//! `@parallel` — block decorator running each top-level step of its body
//! concurrently in isolated context forks. Output accumulates in completion
//! order; the combined exit code is the first non-zero by step index.
//!
//! Failure modes: `fail-fast` (default, no new step starts after a failed
//! peer), `fail-immediate` (peers are canceled on first failure), `all`
//! (every step runs to completion).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParamSpec, ParamType, ParamValue, ParameterSchema};
use crate::ir::CommandSeq;
use crate::registry::BlockDecorator;
use crate::strategies::generator::CodeFragment;
use crate::strategies::planner::ExecutionStep;

pub struct ParallelDecorator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    FailFast,
    FailImmediate,
    All,
}

fn mode_of(params: &BoundParams) -> Result<FailureMode, EngineError> {
    match params.str("mode").unwrap_or("fail-fast") {
        "fail-fast" => Ok(FailureMode::FailFast),
        "fail-immediate" => Ok(FailureMode::FailImmediate),
        "all" => Ok(FailureMode::All),
        other => Err(EngineError::DecoratorMisused(format!(
            "@parallel: unknown failure mode '{}'",
            other
        ))),
    }
}

fn mode_label(mode: FailureMode) -> &'static str {
    match mode {
        FailureMode::FailFast => "fail-fast",
        FailureMode::FailImmediate => "fail-immediate",
        FailureMode::All => "all",
    }
}

#[async_trait]
impl BlockDecorator for ParallelDecorator {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParamSpec::optional(
            "mode",
            ParamType::Ident,
            Some(ParamValue::Ident("fail-fast".to_string())),
            "failure policy: fail-fast, fail-immediate, or all",
        )])
    }

    async fn wrap(
        &self,
        ctx: &mut ExecContext,
        params: &BoundParams,
        inner: &CommandSeq,
    ) -> Result<CommandResult, EngineError> {
        let mode = mode_of(params)?;
        let delegate = ctx.delegate.clone();
        let (base, group_token) = ctx.with_child_cancel();
        let failed = Arc::new(AtomicBool::new(false));

        let mut join: JoinSet<(usize, Option<Result<CommandResult, EngineError>>)> =
            JoinSet::new();
        for (index, step) in inner.steps.iter().enumerate() {
            let mut branch = base.fork();
            let step = step.clone();
            let delegate = delegate.clone();
            let failed = failed.clone();
            let group_token = group_token.clone();
            join.spawn(async move {
                if mode != FailureMode::All && failed.load(Ordering::SeqCst) {
                    // A peer already failed; this step never starts.
                    return (index, None);
                }
                let outcome = delegate.run_step(&mut branch, &step).await;
                let is_failure = match &outcome {
                    Ok(result) => !result.is_success(),
                    Err(_) => true,
                };
                if is_failure {
                    failed.store(true, Ordering::SeqCst);
                    if mode == FailureMode::FailImmediate {
                        group_token.cancel();
                    }
                }
                (index, Some(outcome))
            });
        }

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut exits: Vec<(usize, i32)> = Vec::new();
        let mut first_error: Option<EngineError> = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((index, Some(Ok(result)))) => {
                    stdout.push_str(&result.stdout);
                    stderr.push_str(&result.stderr);
                    exits.push((index, result.exit_code));
                }
                Ok((_, Some(Err(err)))) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Ok((_, None)) => {}
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(EngineError::DecoratorMisused(format!(
                            "@parallel: branch task failed: {}",
                            join_err
                        )));
                    }
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        exits.sort_by_key(|(index, _)| *index);
        let exit_code = exits
            .iter()
            .map(|(_, code)| *code)
            .find(|code| *code != 0)
            .unwrap_or(0);
        Ok(CommandResult::with_exit_code(stdout, stderr, exit_code))
    }

    fn describe(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner: ExecutionStep,
    ) -> ExecutionStep {
        let mode = mode_of(params).map(mode_label).unwrap_or("fail-fast");
        ExecutionStep::leaf("parallel", mode).with_children(inner.children)
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        params: &BoundParams,
        inner_steps: &[String],
    ) -> Result<CodeFragment, EngineError> {
        let mode = mode_of(params)?;
        let gate = mode != FailureMode::All;
        let mut spawns = String::new();
        for step in inner_steps {
            let guard = if gate {
                "            if __failed.load(std::sync::atomic::Ordering::SeqCst) {\n                return;\n            }\n"
            } else {
                ""
            };
            spawns.push_str(&format!(
                "        {{\n            let mut __ctx = ctx.clone();\n            let __results = &__results;\n            let __failed = &__failed;\n            __s.spawn(move || {{\n{guard}                let ctx = &mut __ctx;\n                let __r = {step};\n                if __r.exit_code != 0 {{\n                    __failed.store(true, std::sync::atomic::Ordering::SeqCst);\n                }}\n                __results.lock().unwrap().push(__r);\n            }});\n        }}\n",
                guard = guard,
                step = step
            ));
        }
        let code = format!(
            "{{\n    let __results: std::sync::Mutex<Vec<CmdResult>> = std::sync::Mutex::new(Vec::new());\n    let __failed = std::sync::atomic::AtomicBool::new(false);\n    std::thread::scope(|__s| {{\n{spawns}    }});\n    let mut __out = CmdResult::ok();\n    for __r in __results.into_inner().unwrap() {{\n        __out.stdout.push_str(&__r.stdout);\n        __out.stderr.push_str(&__r.stderr);\n        if __out.exit_code == 0 && __r.exit_code != 0 {{\n            __out.exit_code = __r.exit_code;\n        }}\n    }}\n    __out\n}}",
            spawns = spawns
        );
        Ok(CodeFragment::expr(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use crate::engine::params::{Param, Params};

    fn bound(mode: Option<&str>) -> BoundParams {
        let items = match mode {
            Some(m) => vec![Param {
                name: Some("mode".to_string()),
                value: ParamValue::Ident(m.to_string()),
            }],
            None => vec![],
        };
        ParallelDecorator.schema().bind("parallel", &Params::new(items)).unwrap()
    }

    #[test]
    fn test_default_mode_is_fail_fast() {
        assert_eq!(mode_of(&bound(None)).unwrap(), FailureMode::FailFast);
    }

    #[test]
    fn test_unknown_mode_is_misuse() {
        assert!(matches!(
            mode_of(&bound(Some("sometimes"))),
            Err(EngineError::DecoratorMisused(_))
        ));
    }

    #[test]
    fn test_gen_gates_on_failure_for_fail_fast() {
        let ctx = test_context(&[], &[]);
        let frag = ParallelDecorator
            .gen(&ctx, &bound(None), &["CmdResult::ok()".to_string()])
            .unwrap();
        assert!(frag.code.contains("__failed.load"));
    }

    #[test]
    fn test_gen_all_mode_has_no_gate() {
        let ctx = test_context(&[], &[]);
        let frag = ParallelDecorator
            .gen(&ctx, &bound(Some("all")), &["CmdResult::ok()".to_string()])
            .unwrap();
        assert!(!frag.code.contains("__failed.load"));
        assert!(frag.code.contains("std::thread::scope"));
    }
}
