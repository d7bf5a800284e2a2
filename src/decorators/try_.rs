//! `@try` — pattern decorator with `main`, `error`, and `finally` branches.
//! Runs `main`; on failure runs `error` (whose result replaces the exit
//! code, so a clean error branch recovers the failure); runs `finally`
//! unconditionally, and a failing `finally` wins.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::params::{BoundParams, ParameterSchema};
use crate::ir::CommandSeq;
use crate::registry::PatternDecorator;
use crate::strategies::generator::CodeFragment;
use crate::strategies::planner::ExecutionStep;

pub const MAIN_BRANCH: &str = "main";
pub const ERROR_BRANCH: &str = "error";
pub const FINALLY_BRANCH: &str = "finally";

pub struct TryDecorator;

#[async_trait]
impl PatternDecorator for TryDecorator {
    fn name(&self) -> &'static str {
        "try"
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    fn validate(&self, labels: &[String]) -> Result<(), EngineError> {
        if !labels.iter().any(|l| l == MAIN_BRANCH) {
            return Err(EngineError::DecoratorMisused(
                "@try requires a 'main' branch".to_string(),
            ));
        }
        for label in labels {
            if label != MAIN_BRANCH && label != ERROR_BRANCH && label != FINALLY_BRANCH {
                return Err(EngineError::DecoratorMisused(format!(
                    "@try: unknown branch '{}'",
                    label
                )));
            }
        }
        Ok(())
    }

    async fn select(
        &self,
        ctx: &mut ExecContext,
        _params: &BoundParams,
        branches: &IndexMap<String, CommandSeq>,
    ) -> Result<CommandResult, EngineError> {
        let delegate = ctx.delegate.clone();
        let main = branches
            .get(MAIN_BRANCH)
            .ok_or_else(|| EngineError::DecoratorMisused("@try requires a 'main' branch".to_string()))?;

        let mut sub = ctx.fork();
        let mut combined = delegate.run_seq(&mut sub, main).await?;

        if !combined.is_success() {
            if let Some(handler) = branches.get(ERROR_BRANCH) {
                let mut sub = ctx.fork();
                let recovery = delegate.run_seq(&mut sub, handler).await?;
                combined = CommandResult::with_exit_code(
                    format!("{}{}", combined.stdout, recovery.stdout),
                    format!("{}{}", combined.stderr, recovery.stderr),
                    recovery.exit_code,
                );
            }
        }

        if let Some(cleanup) = branches.get(FINALLY_BRANCH) {
            let mut sub = ctx.fork();
            let finish = delegate.run_seq(&mut sub, cleanup).await?;
            combined.stdout.push_str(&finish.stdout);
            combined.stderr.push_str(&finish.stderr);
            if !finish.is_success() {
                combined.exit_code = finish.exit_code;
            }
        }

        Ok(combined)
    }

    fn describe(
        &self,
        _ctx: &ExecContext,
        _params: &BoundParams,
        branches: IndexMap<String, ExecutionStep>,
    ) -> ExecutionStep {
        ExecutionStep::leaf("try", "").with_children(branches.into_values().collect())
    }

    fn gen(
        &self,
        _ctx: &ExecContext,
        _params: &BoundParams,
        branches: &IndexMap<String, String>,
    ) -> Result<CodeFragment, EngineError> {
        let main = branches
            .get(MAIN_BRANCH)
            .ok_or_else(|| EngineError::DecoratorMisused("@try requires a 'main' branch".to_string()))?;
        let mut code = String::from("{\n");
        code.push_str(&format!("    let mut __r = {};\n", indent(main)));
        if let Some(handler) = branches.get(ERROR_BRANCH) {
            code.push_str("    if __r.exit_code != 0 {\n");
            code.push_str(&format!("        let __e = {};\n", indent2(handler)));
            code.push_str("        __r = CmdResult {\n");
            code.push_str("            stdout: format!(\"{}{}\", __r.stdout, __e.stdout),\n");
            code.push_str("            stderr: format!(\"{}{}\", __r.stderr, __e.stderr),\n");
            code.push_str("            exit_code: __e.exit_code,\n");
            code.push_str("        };\n");
            code.push_str("    }\n");
        }
        if let Some(cleanup) = branches.get(FINALLY_BRANCH) {
            code.push_str(&format!("    let __f = {};\n", indent(cleanup)));
            code.push_str("    __r.stdout.push_str(&__f.stdout);\n");
            code.push_str("    __r.stderr.push_str(&__f.stderr);\n");
            code.push_str("    if __f.exit_code != 0 {\n        __r.exit_code = __f.exit_code;\n    }\n");
        }
        code.push_str("    __r\n}");
        Ok(CodeFragment::expr(code))
    }
}

fn indent(code: &str) -> String {
    reindent(code, "    ")
}

fn indent2(code: &str) -> String {
    reindent(code, "        ")
}

fn reindent(code: &str, pad: &str) -> String {
    let mut lines = code.lines();
    let mut out = String::new();
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str(pad);
        out.push_str(line);
    }
    out
}
