//! Parser-Facing Tree Types
//!
//! The typed tree an external parser hands to the engine. The engine never
//! sees surface syntax; it consumes this shape and lowers it into IR.
//! All nodes are serde-serializable so a pre-parsed program can cross a
//! process boundary as JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// PROGRAM & DECLARATIONS
// =============================================================================

/// Root node: a complete command-definition program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    /// Variable declarations, in source order.
    #[serde(default)]
    pub variables: Vec<VarDecl>,
    /// Command declarations, in source order.
    #[serde(default)]
    pub commands: Vec<CommandDecl>,
}

impl Program {
    /// Look up a command declaration by name.
    pub fn command(&self, name: &str) -> Option<&CommandDecl> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// A `var NAME = literal` declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub value: LiteralValue,
}

/// Command kind: a plain command, or one half of a watch/stop process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Regular,
    Watch,
    Stop,
}

/// A `name: body` command declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDecl {
    pub name: String,
    pub kind: CommandKind,
    /// Body steps, one entry per source line.
    pub body: Vec<Content>,
}

// =============================================================================
// LITERALS & ARGUMENTS
// =============================================================================

/// A literal value as the parser saw it. Durations keep their source text
/// (`"500ms"`); the parameter model parses them when a schema asks for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(String),
}

impl LiteralValue {
    /// Render the literal as the string it substitutes to.
    pub fn render(&self) -> String {
        match self {
            LiteralValue::Str(s) => s.clone(),
            LiteralValue::Int(n) => n.to_string(),
            LiteralValue::Float(f) => f.to_string(),
            LiteralValue::Bool(b) => b.to_string(),
            LiteralValue::Duration(d) => d.clone(),
        }
    }
}

/// A decorator argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Duration source text, e.g. `"1s"`.
    Duration(String),
    /// A bare identifier, e.g. `@cmd(build)`.
    Ident(String),
    List(Vec<ArgValue>),
    Map(IndexMap<String, ArgValue>),
}

/// A decorator argument: named (`attempts=3`) or positional (`name` empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    #[serde(default)]
    pub name: Option<String>,
    pub value: ArgValue,
}

impl Arg {
    pub fn positional(value: ArgValue) -> Self {
        Self { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: ArgValue) -> Self {
        Self { name: Some(name.into()), value }
    }
}

// =============================================================================
// COMMAND BODY CONTENT
// =============================================================================

/// One step line of a command body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Shell text, possibly with inline decorator parts and chain operators.
    Shell(ShellContent),
    /// A block decorator wrapping an inner body: `@name(args) { ... }`.
    Block(BlockDecorator),
    /// A pattern decorator with labeled branches.
    Pattern(PatternDecorator),
    /// A standalone action decorator: `@name(args)`.
    Action(ActionDecorator),
}

/// Shell text as a sequence of parts. Operators (`&&`, `||`, `|`, `>>`) live
/// inside text parts; the IR builder splits them out with quote tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellContent {
    pub parts: Vec<ShellPart>,
}

/// One part of a shell line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShellPart {
    /// Raw text, operators included.
    Text { text: String },
    /// An inline value decorator, e.g. `@env(HOME)`.
    Value { name: String, args: Vec<Arg> },
    /// An action decorator referenced mid-chain, e.g. `... | @log(msg="x")`.
    Action { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDecorator {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    pub inner: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDecorator {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    pub branches: Vec<PatternBranch>,
}

/// One labeled branch of a pattern decorator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternBranch {
    pub label: String,
    pub body: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecorator {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Arg>,
}

// =============================================================================
// BUILD HELPERS
// =============================================================================

/// Shorthand for a plain shell step.
pub fn shell_step(text: impl Into<String>) -> Content {
    Content::Shell(ShellContent {
        parts: vec![ShellPart::Text { text: text.into() }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_command_lookup() {
        let prog = Program {
            variables: vec![],
            commands: vec![CommandDecl {
                name: "build".to_string(),
                kind: CommandKind::Regular,
                body: vec![shell_step("echo hi")],
            }],
        };
        assert!(prog.command("build").is_some());
        assert!(prog.command("missing").is_none());
    }

    #[test]
    fn test_literal_render() {
        assert_eq!(LiteralValue::Str("a".into()).render(), "a");
        assert_eq!(LiteralValue::Int(3).render(), "3");
        assert_eq!(LiteralValue::Bool(true).render(), "true");
        assert_eq!(LiteralValue::Duration("500ms".into()).render(), "500ms");
    }

    #[test]
    fn test_content_json_round_trip() {
        let content = Content::Block(BlockDecorator {
            name: "retry".to_string(),
            args: vec![Arg::named("attempts", ArgValue::Int(3))],
            inner: vec![shell_step("exit 1")],
        });
        let json = serde_json::to_string(&content).unwrap();
        let back: Content = serde_json::from_str(&json).unwrap();
        assert_eq!(content, back);
    }

    #[test]
    fn test_program_json_shape() {
        // The external parser emits this shape; keep it stable.
        let json = r#"{
            "variables": [{"name": "PORT", "value": {"int": 8080}}],
            "commands": [{
                "name": "serve",
                "kind": "regular",
                "body": [{"type": "shell", "parts": [{"type": "text", "text": "echo serve"}]}]
            }]
        }"#;
        let prog: Program = serde_json::from_str(json).unwrap();
        assert_eq!(prog.variables[0].name, "PORT");
        assert_eq!(prog.commands[0].name, "serve");
    }
}
