//! Shell Execution Primitive
//!
//! Spawns a shell interpreter for one chain element. The child receives the
//! snapshot environment and the context working directory explicitly; the
//! host process environment and cwd are never mutated. Children are attached
//! to the context cancellation signal: SIGTERM first, SIGKILL after a short
//! grace period.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;

/// The shell interpreter used for shell elements. An absolute path keeps
/// resolution independent of the captured environment.
pub const SHELL: &str = "/bin/sh";

/// Grace period between SIGTERM and SIGKILL on cancellation.
pub const KILL_GRACE: Duration = Duration::from_millis(100);

/// Run `sh -c <command>` under the context. `stdin` is piped in when the
/// upstream chain operator was `|`.
pub async fn exec_shell(
    ctx: &ExecContext,
    command: &str,
    stdin: Option<&str>,
) -> Result<CommandResult, EngineError> {
    if ctx.is_canceled() {
        return Ok(CommandResult::canceled(command));
    }

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(command)
        .env_clear()
        .current_dir(&ctx.cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in ctx.snapshot.get_all() {
        cmd.env(key, value);
    }
    cmd.stdin(if stdin.is_some() {
        std::process::Stdio::piped()
    } else {
        std::process::Stdio::null()
    });

    let mut child = cmd
        .spawn()
        .map_err(|e| EngineError::io(format!("spawning `{}`", command), e))?;
    let pid = child.id();

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(input.as_bytes())
                .await
                .map_err(|e| EngineError::io("writing pipe stdin", e))?;
            // Dropping the handle closes the pipe so the child sees EOF.
        }
    }

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let output = tokio::select! {
        output = &mut wait => output,
        _ = ctx.cancel.cancelled() => {
            signal(pid, libc::SIGTERM);
            tokio::select! {
                _ = &mut wait => {}
                _ = tokio::time::sleep(KILL_GRACE) => {
                    signal(pid, libc::SIGKILL);
                    let _ = wait.await;
                }
            }
            return Ok(CommandResult::canceled(command));
        }
    };

    let output = output.map_err(|e| EngineError::io(format!("waiting on `{}`", command), e))?;
    Ok(CommandResult::with_exit_code(
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code_of(&output.status),
    ))
}

fn signal(pid: Option<u32>, sig: libc::c_int) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as libc::pid_t, sig);
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::test_support::test_context;
    use std::time::Instant;

    fn ctx_with_path() -> ExecContext {
        test_context(&[("PATH", "/usr/bin:/bin")], &[])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_stdout_and_exit() {
        let ctx = ctx_with_path();
        let result = exec_shell(&ctx, "echo hello", None).await.unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);

        let result = exec_shell(&ctx, "exit 3", None).await.unwrap();
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_stderr() {
        let ctx = ctx_with_path();
        let result = exec_shell(&ctx, "echo oops 1>&2", None).await.unwrap();
        assert_eq!(result.stderr, "oops\n");
        assert!(result.stdout.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_pipes_stdin() {
        let ctx = ctx_with_path();
        let result = exec_shell(&ctx, "cat", Some("from upstream\n")).await.unwrap();
        assert_eq!(result.stdout, "from upstream\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_uses_context_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx_with_path();
        ctx.cwd = dir.path().to_path_buf();
        let result = exec_shell(&ctx, "pwd", None).await.unwrap();
        let printed = result.stdout.trim();
        // Compare canonicalized: the temp dir may itself be a symlink.
        assert_eq!(
            std::fs::canonicalize(printed).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_env_from_snapshot_only() {
        let ctx = test_context(&[("PATH", "/usr/bin:/bin"), ("GREETING", "hi")], &[]);
        let result = exec_shell(&ctx, "echo \"$GREETING\"", None).await.unwrap();
        assert_eq!(result.stdout, "hi\n");
        // A key absent from the snapshot is absent from the child.
        let result = exec_shell(&ctx, "echo \"${HOME:-unset}\"", None).await.unwrap();
        assert_eq!(result.stdout, "unset\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_cancellation_kills_child() {
        let ctx = ctx_with_path();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let start = Instant::now();
        let result = exec_shell(&ctx, "sleep 30", None).await.unwrap();
        assert_eq!(result.exit_code, crate::engine::errors::EXIT_CANCELED);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exec_shell_already_canceled_is_a_no_op() {
        let ctx = ctx_with_path();
        ctx.cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let cmd = format!("touch {}", marker.display());
        let result = exec_shell(&ctx, &cmd, None).await.unwrap();
        assert_eq!(result.exit_code, crate::engine::errors::EXIT_CANCELED);
        assert!(!marker.exists());
    }
}
