//! Sequence Evaluator
//!
//! Runs the steps of a `CommandSeq` in order. Fail-fast: the first non-zero
//! exit halts the sequence and its result (with all output accumulated so
//! far) is returned. Block decorators wrap their bodies on top of this
//! scaffolding.

use crate::engine::chain::eval_step;
use crate::engine::context::{CommandResult, ExecContext};
use crate::engine::errors::EngineError;
use crate::ir::CommandSeq;

pub async fn eval_seq(
    ctx: &mut ExecContext,
    seq: &CommandSeq,
) -> Result<CommandResult, EngineError> {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exit_code = 0;

    for step in &seq.steps {
        if ctx.is_canceled() {
            let canceled = CommandResult::canceled("sequence");
            stderr.push_str(&canceled.stderr);
            return Ok(CommandResult::with_exit_code(stdout, stderr, canceled.exit_code));
        }
        let result = eval_step(ctx, step).await?;
        stdout.push_str(&result.stdout);
        stderr.push_str(&result.stderr);
        exit_code = result.exit_code;
        if exit_code != 0 {
            break;
        }
    }

    Ok(CommandResult::with_exit_code(stdout, stderr, exit_code))
}
