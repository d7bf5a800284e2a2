//! Planner Strategy
//!
//! Walks the IR and builds a tree of `ExecutionStep` nodes describing what a
//! command would do, without running anything. Shell leaves carry the
//! rendered command text with value decorators expanded textually; decorators
//! contribute one step each. Plans render in two byte-stable forms: plain
//! ASCII and ANSI-colored.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::engine::context::ExecContext;
use crate::engine::errors::EngineError;
use crate::ir::{ChainElement, ChainOp, CommandSeq, CommandStep, ElementKind, ProgramIr, ShellPart};
use crate::registry::DecoratorRegistry;

// =============================================================================
// EXECUTION STEP TREE
// =============================================================================

/// Metadata key marking a leaf whose output depends on runtime values.
pub const META_DYNAMIC: &str = "dynamic";

/// Metadata key pointing at another command; the planner resolves it by
/// recursion.
pub const META_COMMAND_REF: &str = "command_reference";

/// One node of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    pub kind: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExecutionStep>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, String>,
}

impl ExecutionStep {
    pub fn leaf(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            children: Vec::new(),
            metadata: IndexMap::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ExecutionStep>) -> Self {
        self.children = children;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.metadata.get(META_DYNAMIC).map(|v| v == "true").unwrap_or(false)
    }

    /// Depth-first leaf sequence: the steps an interpreter run would execute
    /// in order (plan/exec agreement is checked against this).
    pub fn leaves(&self) -> Vec<&ExecutionStep> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a ExecutionStep>) {
        if self.children.is_empty() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }

    /// Plain ASCII rendering.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, false);
        out
    }

    /// ANSI-colored rendering. Both renderings are byte-stable for a given
    /// tree, so generated code can embed either as a string literal.
    pub fn render_colored(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, true);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize, colored: bool) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        if colored {
            out.push('[');
            out.push_str(color_for(&self.kind));
            out.push_str(&self.kind);
            out.push_str(ansi::RESET);
            out.push(']');
        } else {
            out.push('[');
            out.push_str(&self.kind);
            out.push(']');
        }
        out.push(' ');
        out.push_str(&self.description);
        if !self.metadata.is_empty() {
            let mut pairs: Vec<(&String, &String)> = self.metadata.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            let rendered = pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            if colored {
                out.push_str(&format!(" {}{{{}}}{}", ansi::DIM, rendered, ansi::RESET));
            } else {
                out.push_str(&format!(" {{{}}}", rendered));
            }
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1, colored);
        }
    }
}

/// ANSI escape constants for the colored rendering.
pub mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";
}

fn color_for(kind: &str) -> &'static str {
    match kind {
        "command" => ansi::BOLD,
        "shell" => ansi::GREEN,
        "chain" | "body" | "branch" => ansi::DIM,
        "when" | "try" => ansi::MAGENTA,
        "log" | "cmd" => ansi::YELLOW,
        _ => ansi::CYAN,
    }
}

fn op_label(op: ChainOp) -> Option<&'static str> {
    match op {
        ChainOp::None => None,
        ChainOp::And => Some("&&"),
        ChainOp::Or => Some("||"),
        ChainOp::Pipe => Some("|"),
        ChainOp::Append => Some(">>"),
    }
}

// =============================================================================
// PLANNER
// =============================================================================

/// The planning strategy over one lowered program.
pub struct Planner {
    program: Arc<ProgramIr>,
    registry: Arc<DecoratorRegistry>,
}

impl Planner {
    pub fn new(program: Arc<ProgramIr>, registry: Arc<DecoratorRegistry>) -> Self {
        Self { program, registry }
    }

    /// Plan one named command. The root step carries the snapshot
    /// fingerprint so a plan pins down exactly what would run.
    pub fn plan_command(&self, ctx: &ExecContext, name: &str) -> Result<ExecutionStep, EngineError> {
        let mut stack = Vec::new();
        let mut step = self.plan_named(ctx, name, &mut stack)?;
        step.metadata.insert(
            "env_fingerprint".to_string(),
            ctx.snapshot.fingerprint_hex(),
        );
        Ok(step)
    }

    fn plan_named(
        &self,
        ctx: &ExecContext,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<ExecutionStep, EngineError> {
        if stack.iter().any(|n| n == name) {
            let mut cycle = stack.clone();
            cycle.push(name.to_string());
            return Err(EngineError::CircularDependency(cycle));
        }
        let command = self
            .program
            .command(name)
            .ok_or_else(|| EngineError::UnknownCommand(name.to_string()))?;
        stack.push(name.to_string());
        let children = self.plan_seq(ctx, &command.seq, stack)?;
        stack.pop();
        Ok(ExecutionStep::leaf("command", name).with_children(children))
    }

    fn plan_seq(
        &self,
        ctx: &ExecContext,
        seq: &CommandSeq,
        stack: &mut Vec<String>,
    ) -> Result<Vec<ExecutionStep>, EngineError> {
        seq.steps
            .iter()
            .map(|step| self.plan_step(ctx, step, stack))
            .collect()
    }

    fn plan_step(
        &self,
        ctx: &ExecContext,
        step: &CommandStep,
        stack: &mut Vec<String>,
    ) -> Result<ExecutionStep, EngineError> {
        if step.elements.len() == 1 {
            return self.plan_element(ctx, &step.elements[0], stack);
        }
        let children = step
            .elements
            .iter()
            .map(|element| self.plan_element(ctx, element, stack))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecutionStep::leaf("chain", format!("{} elements", step.elements.len()))
            .with_children(children))
    }

    fn plan_element(
        &self,
        ctx: &ExecContext,
        element: &ChainElement,
        stack: &mut Vec<String>,
    ) -> Result<ExecutionStep, EngineError> {
        let mut step = match &element.kind {
            ElementKind::Shell { parts } => self.plan_shell(ctx, parts)?,
            ElementKind::Action { name, params } => {
                let action = self.registry.action(name)?;
                let bound = action.schema().bind(name, params)?;
                let mut step = action.describe(ctx, &bound);
                if let Some(target) = step.metadata.get(META_COMMAND_REF).cloned() {
                    let resolved = self.plan_named(ctx, &target, stack)?;
                    step.children.push(resolved);
                }
                step
            }
            ElementKind::Block(wrapper) => {
                let block = self.registry.block(&wrapper.name)?;
                let bound = block.schema().bind(&wrapper.name, &wrapper.params)?;
                let inner = ExecutionStep::leaf("body", "")
                    .with_children(self.plan_seq(ctx, &wrapper.inner, stack)?);
                block.describe(ctx, &bound, inner)
            }
            ElementKind::Pattern(pattern) => {
                let dec = self.registry.pattern(&pattern.name)?;
                let labels: Vec<String> = pattern.branches.keys().cloned().collect();
                dec.validate(&labels)?;
                let bound = dec.schema().bind(&pattern.name, &pattern.params)?;
                let mut branches = IndexMap::new();
                for (label, body) in &pattern.branches {
                    let branch = ExecutionStep::leaf("branch", label.clone())
                        .with_children(self.plan_seq(ctx, body, stack)?);
                    branches.insert(label.clone(), branch);
                }
                dec.describe(ctx, &bound, branches)
            }
        };
        if let Some(op) = op_label(element.op_next) {
            step.metadata.insert("op".to_string(), op.to_string());
        }
        if let Some(target) = &element.append_target {
            step.metadata.insert("append".to_string(), target.clone());
        }
        Ok(step)
    }

    /// A shell leaf: the command text with value decorators expanded
    /// textually, without executing anything.
    fn plan_shell(&self, ctx: &ExecContext, parts: &[ShellPart]) -> Result<ExecutionStep, EngineError> {
        let mut text = String::new();
        let mut dynamic = false;
        for part in parts {
            match part {
                ShellPart::Text(t) => text.push_str(t),
                ShellPart::Value { name, params } => {
                    let value = self.registry.value(name)?;
                    let bound = value.schema().bind(name, params)?;
                    let described = value.describe(ctx, &bound);
                    dynamic |= described.is_dynamic();
                    text.push_str(&described.description);
                }
            }
        }
        let mut step = ExecutionStep::leaf("shell", text);
        if dynamic {
            step.metadata.insert(META_DYNAMIC.to_string(), "true".to_string());
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_and_colored_are_stable() {
        let step = ExecutionStep::leaf("command", "build").with_children(vec![
            ExecutionStep::leaf("shell", "echo hi").with_meta("op", "&&"),
            ExecutionStep::leaf("shell", "echo bye"),
        ]);
        let plain = step.render_plain();
        assert_eq!(plain, "[command] build\n  [shell] echo hi {op=&&}\n  [shell] echo bye\n");
        assert_eq!(plain, step.render_plain());

        let colored = step.render_colored();
        assert!(colored.contains("\x1b[32mshell\x1b[0m"));
        assert_eq!(colored, step.render_colored());
        // Stripping escapes yields the plain rendering.
        let stripped = colored
            .replace(ansi::BOLD, "")
            .replace(ansi::GREEN, "")
            .replace(ansi::DIM, "")
            .replace(ansi::RESET, "");
        assert_eq!(stripped, plain);
    }

    #[test]
    fn test_leaves_depth_first() {
        let step = ExecutionStep::leaf("command", "c").with_children(vec![
            ExecutionStep::leaf("block", "b")
                .with_children(vec![ExecutionStep::leaf("shell", "x")]),
            ExecutionStep::leaf("shell", "y"),
        ]);
        let leaves: Vec<&str> = step.leaves().iter().map(|s| s.description.as_str()).collect();
        assert_eq!(leaves, vec!["x", "y"]);
    }

    #[test]
    fn test_metadata_renders_sorted() {
        let step = ExecutionStep::leaf("shell", "x")
            .with_meta("zeta", "1")
            .with_meta("alpha", "2");
        assert!(step.render_plain().contains("{alpha=2, zeta=1}"));
    }
}
