//! Dependency Analyzer
//!
//! Orders command declarations so that a command referenced via an action
//! decorator's dependency capability (primarily `@cmd(X)`) is defined before
//! its caller. Cycles are fatal.

use indexmap::IndexMap;

use crate::engine::errors::EngineError;
use crate::ir::{ElementKind, ProgramIr};
use crate::registry::DecoratorRegistry;

/// Topologically ordered command names, dependencies first. Declaration
/// order is preserved among independent commands. Watch/stop pairs share a
/// name and collapse into one node.
pub fn analyze(
    program: &ProgramIr,
    registry: &DecoratorRegistry,
) -> Result<Vec<String>, EngineError> {
    let mut edges: IndexMap<String, Vec<String>> = IndexMap::new();

    for command in &program.commands {
        let refs = edges.entry(command.name.clone()).or_default();
        let mut failure: Option<EngineError> = None;
        command.seq.visit_elements(&mut |element| {
            if failure.is_some() {
                return;
            }
            if let ElementKind::Action { name, params } = &element.kind {
                match registry.action(name) {
                    Ok(action) => match action.schema().bind(name, params) {
                        Ok(bound) => {
                            for target in action.command_refs(&bound) {
                                if !refs.contains(&target) {
                                    refs.push(target);
                                }
                            }
                        }
                        Err(err) => failure = Some(err),
                    },
                    Err(err) => failure = Some(err),
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
    }

    // Referenced commands must exist.
    for (from, refs) in &edges {
        for target in refs {
            if !edges.contains_key(target) {
                return Err(EngineError::DecoratorMisused(format!(
                    "'{}' references unknown command '{}'",
                    from, target
                )));
            }
        }
    }

    let mut order = Vec::new();
    let mut state: IndexMap<&str, Mark> = edges.keys().map(|k| (k.as_str(), Mark::New)).collect();
    let mut stack = Vec::new();
    for name in edges.keys() {
        visit(name, &edges, &mut state, &mut stack, &mut order)?;
    }
    Ok(order)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    New,
    InProgress,
    Done,
}

fn visit(
    name: &str,
    edges: &IndexMap<String, Vec<String>>,
    state: &mut IndexMap<&str, Mark>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<(), EngineError> {
    match state.get(name).copied() {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            let mut cycle: Vec<String> = stack
                .iter()
                .skip_while(|n| n.as_str() != name)
                .cloned()
                .collect();
            cycle.push(name.to_string());
            return Err(EngineError::CircularDependency(cycle));
        }
        _ => {}
    }
    if let Some(mark) = state.get_mut(name) {
        *mark = Mark::InProgress;
    }
    stack.push(name.to_string());
    if let Some(refs) = edges.get(name) {
        for target in refs {
            visit(target, edges, state, stack, order)?;
        }
    }
    stack.pop();
    if let Some(mark) = state.get_mut(name) {
        *mark = Mark::Done;
    }
    order.push(name.to_string());
    Ok(())
}
