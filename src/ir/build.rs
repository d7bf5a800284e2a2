//! IR Builder
//!
//! Lowers the parser-facing tree into IR: splits shell text on top-level
//! chain operators with quote tracking, normalizes bare text into shell
//! elements, converts decorator arguments into parameter values, and
//! enforces the structural invariants (parse-contract errors).

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::ast::{self, ArgValue, CommandKind, Content};
use crate::engine::errors::EngineError;
use crate::engine::params::{parse_duration, Param, ParamValue, Params};
use crate::engine::scan::ShellScanState;
use crate::ir::types::{
    ChainElement, ChainOp, CommandIr, CommandSeq, CommandStep, ElementKind, PatternNode,
    ProgramIr, ShellPart, Wrapper,
};

lazy_static! {
    /// Valid command and variable identifiers.
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap();
}

/// Lower a whole program. Validates identifier lexemes, name uniqueness
/// (a watch/stop pair may share a name and forms a process group), and
/// variable uniqueness.
pub fn lower_program(program: &ast::Program) -> Result<ProgramIr, EngineError> {
    let mut variables = IndexMap::new();
    for var in &program.variables {
        if !NAME_RE.is_match(&var.name) {
            return Err(EngineError::ParseContract(format!(
                "invalid variable name '{}'",
                var.name
            )));
        }
        if variables.insert(var.name.clone(), var.value.render()).is_some() {
            return Err(EngineError::ParseContract(format!(
                "variable '{}' declared twice",
                var.name
            )));
        }
    }

    let mut commands = Vec::new();
    for decl in &program.commands {
        if !NAME_RE.is_match(&decl.name) {
            return Err(EngineError::ParseContract(format!(
                "invalid command name '{}'",
                decl.name
            )));
        }
        let clash = program
            .commands
            .iter()
            .filter(|other| other.name == decl.name)
            .count();
        if clash > 1 {
            // Only a watch/stop pair may share a name.
            let watches = program
                .commands
                .iter()
                .filter(|c| c.name == decl.name && c.kind == CommandKind::Watch)
                .count();
            let stops = program
                .commands
                .iter()
                .filter(|c| c.name == decl.name && c.kind == CommandKind::Stop)
                .count();
            if clash != 2 || watches != 1 || stops != 1 {
                return Err(EngineError::ParseContract(format!(
                    "command '{}' declared more than once",
                    decl.name
                )));
            }
        }
        commands.push(CommandIr {
            name: decl.name.clone(),
            kind: decl.kind,
            seq: lower_body(&decl.body)?,
        });
    }

    Ok(ProgramIr { variables, commands })
}

/// Lower a command body (one content entry per step line) into a sequence.
pub fn lower_body(body: &[Content]) -> Result<CommandSeq, EngineError> {
    let mut steps = Vec::new();
    for content in body {
        steps.push(lower_content(content)?);
    }
    Ok(CommandSeq { steps })
}

fn lower_content(content: &Content) -> Result<CommandStep, EngineError> {
    match content {
        Content::Shell(shell) => lower_shell(shell),
        Content::Block(block) => Ok(CommandStep {
            elements: vec![ChainElement {
                kind: ElementKind::Block(Wrapper {
                    name: block.name.clone(),
                    params: lower_args(&block.name, &block.args)?,
                    inner: lower_body(&block.inner)?,
                }),
                op_next: ChainOp::None,
                append_target: None,
            }],
        }),
        Content::Pattern(pattern) => {
            let mut branches = IndexMap::new();
            for branch in &pattern.branches {
                let body = lower_body(&branch.body)?;
                if branches.insert(branch.label.clone(), body).is_some() {
                    return Err(EngineError::ParseContract(format!(
                        "@{}: branch '{}' declared twice",
                        pattern.name, branch.label
                    )));
                }
            }
            Ok(CommandStep {
                elements: vec![ChainElement {
                    kind: ElementKind::Pattern(PatternNode {
                        name: pattern.name.clone(),
                        params: lower_args(&pattern.name, &pattern.args)?,
                        branches,
                    }),
                    op_next: ChainOp::None,
                    append_target: None,
                }],
            })
        }
        Content::Action(action) => Ok(CommandStep {
            elements: vec![ChainElement {
                kind: ElementKind::Action {
                    name: action.name.clone(),
                    params: lower_args(&action.name, &action.args)?,
                },
                op_next: ChainOp::None,
                append_target: None,
            }],
        }),
    }
}

/// Convert decorator arguments into parameter values. Duration literals are
/// parsed here so a malformed literal fails before any execution.
pub fn lower_args(decorator: &str, args: &[ast::Arg]) -> Result<Params, EngineError> {
    let mut items = Vec::new();
    for arg in args {
        items.push(Param {
            name: arg.name.clone(),
            value: lower_arg_value(decorator, &arg.value)?,
        });
    }
    Ok(Params::new(items))
}

fn lower_arg_value(decorator: &str, value: &ArgValue) -> Result<ParamValue, EngineError> {
    Ok(match value {
        ArgValue::Str(s) => ParamValue::Str(s.clone()),
        ArgValue::Int(n) => ParamValue::Int(*n),
        ArgValue::Float(f) => ParamValue::Float(*f),
        ArgValue::Bool(b) => ParamValue::Bool(*b),
        ArgValue::Ident(s) => ParamValue::Ident(s.clone()),
        ArgValue::Duration(text) => ParamValue::Duration(parse_duration(text).ok_or_else(
            || {
                EngineError::ParseContract(format!(
                    "@{}: invalid duration literal '{}'",
                    decorator, text
                ))
            },
        )?),
        ArgValue::List(items) => ParamValue::List(
            items
                .iter()
                .map(|v| lower_arg_value(decorator, v))
                .collect::<Result<_, _>>()?,
        ),
        ArgValue::Map(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                out.insert(k.clone(), lower_arg_value(decorator, v)?);
            }
            ParamValue::Map(out)
        }
    })
}

// =============================================================================
// SHELL CHAIN SPLITTING
// =============================================================================

/// In-flight chain element while splitting a shell line.
#[derive(Default)]
struct Segment {
    parts: Vec<ShellPart>,
    action: Option<(String, Params)>,
}

impl Segment {
    fn is_blank(&self) -> bool {
        self.action.is_none()
            && self.parts.iter().all(|p| match p {
                ShellPart::Text(t) => t.trim().is_empty(),
                ShellPart::Value { .. } => false,
            })
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(ShellPart::Text(last)) = self.parts.last_mut() {
            last.push_str(text);
        } else {
            self.parts.push(ShellPart::Text(text.to_string()));
        }
    }

    fn finish(self, op: ChainOp, target: Option<String>) -> Result<ChainElement, EngineError> {
        if let Some((name, params)) = self.action {
            return Ok(ChainElement {
                kind: ElementKind::Action { name, params },
                op_next: op,
                append_target: target,
            });
        }
        let mut parts = self.parts;
        // Trim the outer edges of the assembled command text.
        if let Some(ShellPart::Text(first)) = parts.first_mut() {
            *first = first.trim_start().to_string();
        }
        if let Some(ShellPart::Text(last)) = parts.last_mut() {
            *last = last.trim_end().to_string();
        }
        parts.retain(|p| !matches!(p, ShellPart::Text(t) if t.is_empty()));
        if parts.is_empty() {
            return Err(EngineError::ParseContract(
                "chain operator without a command".to_string(),
            ));
        }
        Ok(ChainElement { kind: ElementKind::Shell { parts }, op_next: op, append_target: target })
    }
}

/// Split one shell line into a chain of elements, honoring quote and
/// substitution context. Operators inside quotes, `${…}`, `$(…)`, or
/// backticks never split. The scanner state spans decorator parts, so text
/// split around a value decorator keeps its context.
fn lower_shell(shell: &ast::ShellContent) -> Result<CommandStep, EngineError> {
    fn finish_segment(
        elements: &mut Vec<ChainElement>,
        segment: &mut Segment,
        op: ChainOp,
        target: Option<String>,
    ) -> Result<(), EngineError> {
        let done = std::mem::take(segment);
        elements.push(done.finish(op, target)?);
        Ok(())
    }

    let mut elements: Vec<ChainElement> = Vec::new();
    let mut segment = Segment::default();
    let mut scan = ShellScanState::new();
    // Once a `>>` is seen, the rest of the line is the append target.
    let mut append_target: Option<String> = None;

    for part in &shell.parts {
        match part {
            ast::ShellPart::Text { text } => {
                if let Some(target) = append_target.as_mut() {
                    target.push_str(text);
                    continue;
                }
                let chars: Vec<char> = text.chars().collect();
                let mut buf = String::new();
                let mut i = 0;
                while i < chars.len() {
                    let c = chars[i];
                    let next = chars.get(i + 1).copied();
                    if scan.is_clear() {
                        let op = match (c, next) {
                            ('&', Some('&')) => Some(ChainOp::And),
                            ('|', Some('|')) => Some(ChainOp::Or),
                            ('>', Some('>')) => Some(ChainOp::Append),
                            ('|', _) => Some(ChainOp::Pipe),
                            _ => None,
                        };
                        if let Some(op) = op {
                            segment.push_text(&buf);
                            buf.clear();
                            if op == ChainOp::Append {
                                // Target text accumulates until end of line;
                                // the element is finished there.
                                append_target = Some(String::new());
                                i += 2;
                                if let Some(target) = append_target.as_mut() {
                                    target.extend(&chars[i..]);
                                }
                                break;
                            }
                            if segment.is_blank() {
                                return Err(EngineError::ParseContract(
                                    "chain operator without a command".to_string(),
                                ));
                            }
                            finish_segment(&mut elements, &mut segment, op, None)?;
                            i += if op == ChainOp::Pipe { 1 } else { 2 };
                            continue;
                        }
                    }
                    if segment.action.is_some() && !c.is_whitespace() {
                        return Err(EngineError::ParseContract(
                            "an action decorator must stand alone between chain operators"
                                .to_string(),
                        ));
                    }
                    if scan.advance(c, next) {
                        buf.push(c);
                        if let Some(n) = next {
                            buf.push(n);
                        }
                        i += 2;
                        continue;
                    }
                    buf.push(c);
                    i += 1;
                }
                segment.push_text(&buf);
            }
            ast::ShellPart::Value { name, args } => {
                if append_target.is_some() {
                    return Err(EngineError::ParseContract(
                        "append target must be literal text".to_string(),
                    ));
                }
                if segment.action.is_some() {
                    return Err(EngineError::ParseContract(
                        "an action decorator must stand alone between chain operators".to_string(),
                    ));
                }
                segment.parts.push(ShellPart::Value {
                    name: name.clone(),
                    params: lower_args(name, args)?,
                });
            }
            ast::ShellPart::Action { name, args } => {
                if append_target.is_some() {
                    return Err(EngineError::ParseContract(
                        "append target must be literal text".to_string(),
                    ));
                }
                if !segment.is_blank() {
                    return Err(EngineError::ParseContract(
                        "an action decorator must stand alone between chain operators".to_string(),
                    ));
                }
                segment.parts.clear();
                segment.action = Some((name.clone(), lower_args(name, args)?));
            }
        }
    }

    if !scan.is_clear() {
        return Err(EngineError::ParseContract(
            "unterminated quote or substitution in shell text".to_string(),
        ));
    }

    match append_target {
        Some(target) => {
            let target = target.trim().to_string();
            if target.is_empty() {
                return Err(EngineError::ParseContract(
                    "append redirect missing its file target".to_string(),
                ));
            }
            finish_segment(&mut elements, &mut segment, ChainOp::Append, Some(target))?;
        }
        None => {
            if segment.is_blank() && !elements.is_empty() {
                return Err(EngineError::ParseContract(
                    "chain ends with a dangling operator".to_string(),
                ));
            }
            finish_segment(&mut elements, &mut segment, ChainOp::None, None)?;
        }
    }

    Ok(CommandStep { elements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{shell_step, Arg, ShellContent};

    fn step_of(text: &str) -> Result<CommandStep, EngineError> {
        match shell_step(text) {
            Content::Shell(shell) => lower_shell(&shell),
            _ => unreachable!(),
        }
    }

    fn shell_text(element: &ChainElement) -> String {
        match &element.kind {
            ElementKind::Shell { parts } => parts
                .iter()
                .map(|p| match p {
                    ShellPart::Text(t) => t.clone(),
                    ShellPart::Value { name, .. } => format!("@{}", name),
                })
                .collect(),
            _ => panic!("not a shell element"),
        }
    }

    #[test]
    fn test_split_and_or_pipe() {
        let step = step_of("a && b || c | d").unwrap();
        assert_eq!(step.elements.len(), 4);
        assert_eq!(shell_text(&step.elements[0]), "a");
        assert_eq!(step.elements[0].op_next, ChainOp::And);
        assert_eq!(step.elements[1].op_next, ChainOp::Or);
        assert_eq!(step.elements[2].op_next, ChainOp::Pipe);
        assert_eq!(step.elements[3].op_next, ChainOp::None);
        assert_eq!(shell_text(&step.elements[3]), "d");
    }

    #[test]
    fn test_operators_inside_quotes_do_not_split() {
        let step = step_of("echo 'a && b'").unwrap();
        assert_eq!(step.elements.len(), 1);
        assert_eq!(shell_text(&step.elements[0]), "echo 'a && b'");

        let step = step_of("echo \"x || y\" && echo z").unwrap();
        assert_eq!(step.elements.len(), 2);
    }

    #[test]
    fn test_operators_inside_substitution_do_not_split() {
        let step = step_of("echo $(true && echo y)").unwrap();
        assert_eq!(step.elements.len(), 1);
        let step = step_of("echo ${X:-a|b}").unwrap();
        assert_eq!(step.elements.len(), 1);
    }

    #[test]
    fn test_append_target() {
        let step = step_of("echo hi >> out.log").unwrap();
        assert_eq!(step.elements.len(), 1);
        assert_eq!(step.elements[0].op_next, ChainOp::Append);
        assert_eq!(step.elements[0].append_target.as_deref(), Some("out.log"));
    }

    #[test]
    fn test_append_missing_target() {
        assert!(matches!(step_of("echo hi >> "), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_dangling_operator() {
        assert!(matches!(step_of("echo hi && "), Err(EngineError::ParseContract(_))));
        assert!(matches!(step_of(" && echo hi"), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(step_of("echo 'oops"), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_pipe_into_action_part() {
        let shell = ShellContent {
            parts: vec![
                ast::ShellPart::Text { text: "echo x | ".to_string() },
                ast::ShellPart::Action {
                    name: "log".to_string(),
                    args: vec![Arg::named("msg", ArgValue::Str("y".to_string()))],
                },
            ],
        };
        let step = lower_shell(&shell).unwrap();
        assert_eq!(step.elements.len(), 2);
        assert_eq!(step.elements[0].op_next, ChainOp::Pipe);
        assert!(matches!(&step.elements[1].kind, ElementKind::Action { name, .. } if name == "log"));
    }

    #[test]
    fn test_action_must_stand_alone() {
        let shell = ShellContent {
            parts: vec![
                ast::ShellPart::Text { text: "echo x ".to_string() },
                ast::ShellPart::Action { name: "log".to_string(), args: vec![] },
            ],
        };
        assert!(matches!(lower_shell(&shell), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_value_part_keeps_quote_context() {
        // `echo "` + @env(HOME) + `"` — the closing quote arrives in a later
        // text part; the scanner must carry the open double quote across the
        // value part so nothing in between is treated as an operator.
        let shell = ShellContent {
            parts: vec![
                ast::ShellPart::Text { text: "echo \"".to_string() },
                ast::ShellPart::Value {
                    name: "env".to_string(),
                    args: vec![Arg::positional(ArgValue::Ident("HOME".to_string()))],
                },
                ast::ShellPart::Text { text: " && not-an-op\"".to_string() },
            ],
        };
        let step = lower_shell(&shell).unwrap();
        assert_eq!(step.elements.len(), 1);
    }

    #[test]
    fn test_lower_program_duplicate_command() {
        let mut prog = ast::Program::default();
        for _ in 0..2 {
            prog.commands.push(ast::CommandDecl {
                name: "build".to_string(),
                kind: CommandKind::Regular,
                body: vec![shell_step("echo hi")],
            });
        }
        assert!(matches!(lower_program(&prog), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_lower_program_watch_stop_pair_allowed() {
        let prog = ast::Program {
            variables: vec![],
            commands: vec![
                ast::CommandDecl {
                    name: "server".to_string(),
                    kind: CommandKind::Watch,
                    body: vec![shell_step("sleep 100")],
                },
                ast::CommandDecl {
                    name: "server".to_string(),
                    kind: CommandKind::Stop,
                    body: vec![shell_step("echo bye")],
                },
            ],
        };
        let ir = lower_program(&prog).unwrap();
        let (watch, stop) = ir.group("server");
        assert!(watch.is_some() && stop.is_some());
    }

    #[test]
    fn test_lower_program_duplicate_variable() {
        let prog = ast::Program {
            variables: vec![
                ast::VarDecl {
                    name: "A".to_string(),
                    value: ast::LiteralValue::Int(1),
                },
                ast::VarDecl {
                    name: "A".to_string(),
                    value: ast::LiteralValue::Int(2),
                },
            ],
            commands: vec![],
        };
        assert!(matches!(lower_program(&prog), Err(EngineError::ParseContract(_))));
    }

    #[test]
    fn test_invalid_duration_literal() {
        let err = lower_args(
            "timeout",
            &[Arg::named("duration", ArgValue::Duration("zzz".to_string()))],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ParseContract(_)));
    }
}
