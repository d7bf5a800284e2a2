//! Intermediate Representation
//!
//! The engine-native tree the three strategies walk. The IR admits only
//! `@shell` as the shell leaf form; bare text from the parser tree is
//! normalized into shell elements by the builder.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::ast::CommandKind;
use crate::engine::params::Params;

/// A sequence of steps; sequential, fail-fast.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandSeq {
    pub steps: Vec<CommandStep>,
}

/// One step: a chain of elements joined by shell operators.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStep {
    pub elements: Vec<ChainElement>,
}

/// Operator linking an element to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    /// Last element of the step.
    None,
    /// `&&` — run next only on zero exit.
    And,
    /// `||` — run next only on non-zero exit.
    Or,
    /// `|` — next element reads this element's stdout.
    Pipe,
    /// `>>` — this element's stdout is appended to `append_target`; no
    /// further chain linkage.
    Append,
}

/// Atomic unit of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainElement {
    pub kind: ElementKind,
    pub op_next: ChainOp,
    /// File target of a trailing `>>`.
    pub append_target: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    /// A shell invocation assembled from text and value-decorator parts.
    Shell { parts: Vec<ShellPart> },
    /// An action decorator.
    Action { name: String, params: Params },
    /// A block decorator wrapping an inner sequence.
    Block(Wrapper),
    /// A pattern decorator selecting one labeled branch.
    Pattern(PatternNode),
}

/// One part of a shell element's command text.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellPart {
    Text(String),
    /// An inline value decorator, resolved lazily at assembly time.
    Value { name: String, params: Params },
}

/// A block decorator node: `@name(params) { inner }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wrapper {
    pub name: String,
    pub params: Params,
    pub inner: CommandSeq,
}

/// A pattern decorator node: `@name(params) { label: …; … }`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    pub name: String,
    pub params: Params,
    pub branches: IndexMap<String, CommandSeq>,
}

/// A lowered command declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandIr {
    pub name: String,
    pub kind: CommandKind,
    pub seq: CommandSeq,
}

/// A fully lowered program: rendered variables plus command IR, both in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgramIr {
    /// Variable name → rendered literal value.
    pub variables: IndexMap<String, String>,
    pub commands: Vec<CommandIr>,
}

impl ProgramIr {
    /// Look up a command by name. For a watch/stop pair the watch half wins:
    /// it is what plans, `@cmd` references, and foreground runs mean.
    pub fn command(&self, name: &str) -> Option<&CommandIr> {
        self.commands
            .iter()
            .find(|c| c.name == name && c.kind != CommandKind::Stop)
            .or_else(|| self.commands.iter().find(|c| c.name == name))
    }

    /// Commands of a watch/stop process group, by group name.
    pub fn group(&self, name: &str) -> (Option<&CommandIr>, Option<&CommandIr>) {
        let watch = self
            .commands
            .iter()
            .find(|c| c.name == name && c.kind == CommandKind::Watch);
        let stop = self
            .commands
            .iter()
            .find(|c| c.name == name && c.kind == CommandKind::Stop);
        (watch, stop)
    }
}

impl CommandSeq {
    pub fn single(step: CommandStep) -> Self {
        Self { steps: vec![step] }
    }

    /// Walk every element of every step, depth-first, including nested
    /// block bodies and pattern branches.
    pub fn visit_elements<'a>(&'a self, visit: &mut dyn FnMut(&'a ChainElement)) {
        for step in &self.steps {
            for element in &step.elements {
                visit(element);
                match &element.kind {
                    ElementKind::Block(wrapper) => wrapper.inner.visit_elements(visit),
                    ElementKind::Pattern(pattern) => {
                        for branch in pattern.branches.values() {
                            branch.visit_elements(visit);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// All variable names referenced via `@var(...)` anywhere in the sequence.
pub fn collect_var_refs(seq: &CommandSeq) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    seq.visit_elements(&mut |element| {
        if let ElementKind::Shell { parts } = &element.kind {
            for part in parts {
                if let ShellPart::Value { name, params } = part {
                    if name == "var" {
                        if let Some(value) = params.get("name").or_else(|| params.positional(0)) {
                            names.insert(value.render());
                        }
                    }
                }
            }
        }
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::params::{Param, ParamValue};

    fn shell_element(text: &str, op: ChainOp) -> ChainElement {
        ChainElement {
            kind: ElementKind::Shell { parts: vec![ShellPart::Text(text.to_string())] },
            op_next: op,
            append_target: None,
        }
    }

    #[test]
    fn test_visit_elements_recurses() {
        let inner = CommandSeq::single(CommandStep {
            elements: vec![shell_element("echo inner", ChainOp::None)],
        });
        let seq = CommandSeq::single(CommandStep {
            elements: vec![ChainElement {
                kind: ElementKind::Block(Wrapper {
                    name: "retry".to_string(),
                    params: Params::empty(),
                    inner,
                }),
                op_next: ChainOp::None,
                append_target: None,
            }],
        });
        let mut count = 0;
        seq.visit_elements(&mut |_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_collect_var_refs() {
        let seq = CommandSeq::single(CommandStep {
            elements: vec![ChainElement {
                kind: ElementKind::Shell {
                    parts: vec![
                        ShellPart::Text("echo ".to_string()),
                        ShellPart::Value {
                            name: "var".to_string(),
                            params: Params::new(vec![Param {
                                name: None,
                                value: ParamValue::Ident("PORT".to_string()),
                            }]),
                        },
                    ],
                },
                op_next: ChainOp::None,
                append_target: None,
            }],
        });
        let refs = collect_var_refs(&seq);
        assert!(refs.contains("PORT"));
        assert_eq!(refs.len(), 1);
    }
}
