//! Chain Evaluator
//!
//! Executes one `CommandStep`: a chain of elements joined by `&&`, `||`,
//! `|`, and `>>`. Decision to run each element depends on the previous
//! element's operator and exit code; on `&&` with non-zero or `||` with
//! zero the chain stops and returns the current result.

use tokio::io::AsyncWriteExt;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::engine::shell::exec_shell;
use crate::ir::{ChainElement, ChainOp, CommandStep, ElementKind, ShellPart};

/// Evaluate a full step under the context. The context's quote/substitution
/// counters persist across element boundaries and reset when the chain
/// returns to a non-shell boundary.
pub async fn eval_step(
    ctx: &mut ExecContext,
    step: &CommandStep,
) -> Result<CommandResult, EngineError> {
    let mut stdout_acc = String::new();
    let mut last = CommandResult::ok();
    let mut piped: Option<String> = None;

    for (index, element) in step.elements.iter().enumerate() {
        if ctx.is_canceled() {
            ctx.scan.reset();
            return Ok(CommandResult::canceled("chain"));
        }
        if index > 0 {
            match step.elements[index - 1].op_next {
                ChainOp::And if !last.is_success() => break,
                ChainOp::Or if last.is_success() => break,
                _ => {}
            }
        }

        let result = eval_element(ctx, element, piped.take()).await?;

        match element.op_next {
            ChainOp::Pipe => {
                // Intermediate stdout is consumed by the downstream stdin.
                piped = Some(result.stdout.clone());
            }
            ChainOp::Append => {
                append_to_file(ctx, element, &result.stdout).await?;
                stdout_acc.push_str(&result.stdout);
            }
            _ => stdout_acc.push_str(&result.stdout),
        }
        last = result;
    }

    ctx.scan.reset();
    Ok(CommandResult::with_exit_code(
        stdout_acc,
        last.stderr,
        last.exit_code,
    ))
}

async fn eval_element(
    ctx: &mut ExecContext,
    element: &ChainElement,
    stdin: Option<String>,
) -> Result<CommandResult, EngineError> {
    let delegate = ctx.delegate.clone();
    match &element.kind {
        ElementKind::Shell { parts } => {
            let text = assemble_shell_text(ctx, parts).await?;
            ctx.scan.feed(&text);
            exec_shell(ctx, &text, stdin.as_deref()).await
        }
        ElementKind::Action { name, params } => delegate.run_action(ctx, name, params, stdin).await,
        ElementKind::Block(wrapper) => delegate.run_block(ctx, wrapper).await,
        ElementKind::Pattern(pattern) => delegate.run_pattern(ctx, pattern).await,
    }
}

/// Assemble the final command text of a shell element, resolving value
/// decorators lazily at this point.
pub async fn assemble_shell_text(
    ctx: &mut ExecContext,
    parts: &[ShellPart],
) -> Result<String, EngineError> {
    let delegate = ctx.delegate.clone();
    let mut text = String::new();
    for part in parts {
        match part {
            ShellPart::Text(t) => text.push_str(t),
            ShellPart::Value { name, params } => {
                text.push_str(&delegate.resolve_value(ctx, name, params).await?);
            }
        }
    }
    Ok(text)
}

/// Append element stdout to the `>>` target: create-if-missing, appended in
/// one write so concurrent branches do not interleave partial lines.
async fn append_to_file(
    ctx: &ExecContext,
    element: &ChainElement,
    stdout: &str,
) -> Result<(), EngineError> {
    let target = element.append_target.as_deref().ok_or_else(|| {
        EngineError::ParseContract("append element without a target".to_string())
    })?;
    let path = ctx.resolve_path(target);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| EngineError::io(format!("opening {}", path.display()), e))?;
    file.write_all(stdout.as_bytes())
        .await
        .map_err(|e| EngineError::io(format!("appending to {}", path.display()), e))?;
    file.flush()
        .await
        .map_err(|e| EngineError::io(format!("flushing {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::shell_step;
    use crate::engine::context::test_support::test_context;
    use crate::ir::lower_body;

    fn ctx() -> ExecContext {
        test_context(&[("PATH", "/usr/bin:/bin")], &[])
    }

    async fn run(text: &str) -> CommandResult {
        let seq = lower_body(&[shell_step(text)]).unwrap();
        let mut ctx = ctx();
        eval_step(&mut ctx, &seq.steps[0]).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_and_short_circuit() {
        let result = run("echo a && echo b").await;
        assert_eq!(result.stdout, "a\nb\n");
        assert_eq!(result.exit_code, 0);

        let result = run("false && echo b").await;
        assert_eq!(result.stdout, "");
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_or_short_circuit() {
        let result = run("false || echo fallback").await;
        assert_eq!(result.stdout, "fallback\n");
        assert_eq!(result.exit_code, 0);

        let result = run("echo first || echo never").await;
        assert_eq!(result.stdout, "first\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipe_threads_stdout() {
        let result = run("printf 'b\\na\\n' | sort").await;
        assert_eq!(result.stdout, "a\nb\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipe_final_stdout_only() {
        // The intermediate stdout must not appear in the step output.
        let result = run("echo hidden | wc -l").await;
        assert_eq!(result.stdout.trim(), "1");
        assert!(!result.stdout.contains("hidden"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stderr_is_last_executed() {
        let result = run("echo one 1>&2 && echo two 1>&2 && echo done").await;
        assert_eq!(result.stderr, "");
        let result = run("echo ok && echo bad 1>&2").await;
        assert_eq!(result.stderr, "bad\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_writes_and_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx();
        ctx.cwd = dir.path().to_path_buf();
        let seq = lower_body(&[shell_step("echo line >> out.log")]).unwrap();
        let result = eval_step(&mut ctx, &seq.steps[0]).await.unwrap();
        assert_eq!(result.stdout, "line\n");
        let contents = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(contents, "line\n");

        // Appending again grows the file.
        let result = eval_step(&mut ctx, &seq.steps[0]).await.unwrap();
        assert!(result.is_success());
        let contents = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(contents, "line\nline\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exit_code_is_last_executed() {
        let result = run("echo a && exit 7").await;
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.stdout, "a\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_state_resets_at_chain_exit() {
        let seq = lower_body(&[shell_step("echo 'quoted'")]).unwrap();
        let mut ctx = ctx();
        eval_step(&mut ctx, &seq.steps[0]).await.unwrap();
        assert!(ctx.scan.is_clear());
    }
}
