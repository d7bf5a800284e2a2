//! Generator Strategy
//!
//! Walks the IR and emits a self-contained Rust source file for a CLI binary
//! that reproduces the interpreter's semantics, plus a module manifest for
//! the crates the emitted code needs. Commands are emitted in dependency
//! order; each command's plain and colored plan renderings are embedded as
//! string literals so the binary answers `--dry-run` without re-deriving the
//! plan; only env keys actually referenced via `@env` are embedded, with
//! their snapshot-time values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::engine::context::ExecContext;
use crate::engine::deps::analyze;
use crate::engine::errors::EngineError;
use crate::ir::{ChainOp, CommandSeq, CommandStep, ElementKind, ProgramIr, ShellPart};
use crate::registry::DecoratorRegistry;
use crate::strategies::planner::Planner;

// =============================================================================
// FRAGMENTS
// =============================================================================

/// A crate requirement declared by a decorator's codegen entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepReq {
    pub name: &'static str,
    pub version: &'static str,
}

/// A piece of emitted Rust produced by a decorator: the code itself plus the
/// `use` lines and external crates it needs.
#[derive(Debug, Clone)]
pub struct CodeFragment {
    pub code: String,
    pub imports: Vec<&'static str>,
    pub deps: Vec<DepReq>,
}

impl CodeFragment {
    pub fn expr(code: impl Into<String>) -> Self {
        Self { code: code.into(), imports: Vec::new(), deps: Vec::new() }
    }

    pub fn with_import(mut self, import: &'static str) -> Self {
        self.imports.push(import);
        self
    }

    pub fn with_dep(mut self, name: &'static str, version: &'static str) -> Self {
        self.deps.push(DepReq { name, version });
        self
    }
}

// =============================================================================
// EMITTED-CODE HELPERS
// =============================================================================

/// Escape a string into a Rust string literal.
pub fn rust_str(s: &str) -> String {
    format!("{:?}", s)
}

/// Function identifier for a command name.
pub fn fn_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn const_ident(name: &str) -> String {
    fn_ident(name).to_ascii_uppercase()
}

/// Compose per-step expressions into a fail-fast sequence block: the emitted
/// equivalent of the sequence evaluator.
pub fn seq_block(steps: &[String]) -> String {
    if steps.is_empty() {
        return "CmdResult::ok()".to_string();
    }
    let mut out = String::from("{\n    let mut __acc = CmdResult::ok();\n");
    for (index, step) in steps.iter().enumerate() {
        let body = format!("    let __r = {};\n    __acc.absorb(__r);\n", step);
        if index == 0 {
            out.push_str(&body);
        } else {
            out.push_str("    if __acc.exit_code == 0 {\n");
            for line in body.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("    }\n");
        }
    }
    out.push_str("    __acc\n}");
    out
}

// =============================================================================
// MANIFEST
// =============================================================================

/// The module manifest accompanying the emitted source.
#[derive(Debug, Clone)]
pub struct GeneratedManifest {
    pub package: String,
    /// Crate name → version requirement, sorted by name.
    pub dependencies: BTreeMap<String, String>,
}

impl GeneratedManifest {
    /// Render as a Cargo manifest.
    pub fn to_cargo_toml(&self) -> String {
        let mut package = toml::Table::new();
        package.insert("name".into(), toml::Value::String(self.package.clone()));
        package.insert("version".into(), toml::Value::String("0.1.0".into()));
        package.insert("edition".into(), toml::Value::String("2021".into()));

        let mut bin = toml::Table::new();
        bin.insert("name".into(), toml::Value::String(self.package.clone()));
        bin.insert("path".into(), toml::Value::String("src/main.rs".into()));

        let mut deps = toml::Table::new();
        for (name, version) in &self.dependencies {
            deps.insert(name.clone(), toml::Value::String(version.clone()));
        }

        let mut root = toml::Table::new();
        root.insert("package".into(), toml::Value::Table(package));
        root.insert(
            "bin".into(),
            toml::Value::Array(vec![toml::Value::Table(bin)]),
        );
        root.insert("dependencies".into(), toml::Value::Table(deps));
        toml::to_string(&root).unwrap_or_default()
    }
}

/// The full generation artifact.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub code: String,
    pub manifest: GeneratedManifest,
}

// =============================================================================
// GENERATOR
// =============================================================================

#[derive(Default)]
struct GenAcc {
    imports: BTreeSet<&'static str>,
    deps: BTreeMap<&'static str, &'static str>,
}

impl GenAcc {
    fn absorb(&mut self, fragment: CodeFragment) -> String {
        for import in fragment.imports {
            self.imports.insert(import);
        }
        for dep in fragment.deps {
            self.deps.insert(dep.name, dep.version);
        }
        fragment.code
    }
}

/// The code-generating strategy over one lowered program.
pub struct Generator {
    program: Arc<ProgramIr>,
    registry: Arc<DecoratorRegistry>,
}

impl Generator {
    pub fn new(program: Arc<ProgramIr>, registry: Arc<DecoratorRegistry>) -> Self {
        Self { program, registry }
    }

    /// Emit the complete source file and manifest for `package`.
    pub fn generate(
        &self,
        ctx: &ExecContext,
        package: &str,
    ) -> Result<GeneratedSource, EngineError> {
        let order = analyze(&self.program, &self.registry)?;
        let planner = Planner::new(self.program.clone(), self.registry.clone());
        let mut acc = GenAcc::default();

        let mut functions = String::new();
        let mut plans = String::new();
        let mut dispatch_arms = String::new();
        let mut command_list: Vec<String> = Vec::new();
        let mut has_groups = false;

        for name in &order {
            let ident = fn_ident(name);
            let cname = const_ident(name);
            let (watch, stop) = self.program.group(name);
            command_list.push(name.clone());

            let plan = planner.plan_command(ctx, name)?;
            plans.push_str(&format!(
                "static PLAN_PLAIN_{}: &str = {};\n",
                cname,
                rust_str(&plan.render_plain())
            ));
            plans.push_str(&format!(
                "static PLAN_COLOR_{}: &str = {};\n",
                cname,
                rust_str(&plan.render_colored())
            ));

            if let Some(watch) = watch {
                // Process group: watch body + optional stop body + the four
                // supervisor subcommands.
                has_groups = true;
                let steps = self.render_seq(ctx, &watch.seq, &mut acc)?;
                functions.push_str(&format!(
                    "fn watch_{}(ctx: &mut Ctx) -> CmdResult {{\n    {}\n}}\n\n",
                    ident,
                    indent_tail(&seq_block(&steps))
                ));
                let stop_body = match stop {
                    Some(stop) => {
                        let steps = self.render_seq(ctx, &stop.seq, &mut acc)?;
                        seq_block(&steps)
                    }
                    None => "CmdResult::ok()".to_string(),
                };
                functions.push_str(&format!(
                    "fn stop_{}(ctx: &mut Ctx) -> CmdResult {{\n    {}\n}}\n\n",
                    ident,
                    indent_tail(&stop_body)
                ));
                dispatch_arms.push_str(&group_dispatch_arm(name, &ident, &cname));
            } else {
                let command = self
                    .program
                    .command(name)
                    .ok_or_else(|| EngineError::UnknownCommand(name.clone()))?;
                let steps = self.render_seq(ctx, &command.seq, &mut acc)?;
                functions.push_str(&format!(
                    "fn cmd_{}(ctx: &mut Ctx) -> CmdResult {{\n    {}\n}}\n\n",
                    ident,
                    indent_tail(&seq_block(&steps))
                ));
                dispatch_arms.push_str(&command_dispatch_arm(name, &ident, &cname));
            }
        }

        // Narrowed env table: only keys referenced via @env, with their
        // snapshot values. Keys absent from the snapshot stay out so the
        // decorator's own default still applies.
        let mut env_rows = String::new();
        for key in ctx.env_usage.keys() {
            if let Some(value) = ctx.snapshot.get(&key) {
                env_rows.push_str(&format!("    ({}, {}),\n", rust_str(&key), rust_str(value)));
            }
        }

        let mut var_rows = String::new();
        for (name, value) in &self.program.variables {
            var_rows.push_str(&format!("    ({}, {}),\n", rust_str(name), rust_str(value)));
        }

        let mut code = String::new();
        code.push_str(&format!(
            "// Generated by runfile from a command-definition program. Do not edit.\n//\n// Commands: {}\n\n",
            command_list.join(", ")
        ));
        for import in &acc.imports {
            code.push_str(import);
            code.push('\n');
        }
        if !acc.imports.is_empty() {
            code.push('\n');
        }
        code.push_str(&format!(
            "static VARS: &[(&str, &str)] = &[\n{}];\n\nstatic SNAPSHOT_ENV: &[(&str, &str)] = &[\n{}];\n\n",
            var_rows, env_rows
        ));
        code.push_str(RUNTIME_PRELUDE);
        code.push('\n');
        if has_groups {
            code.push_str(SUPERVISOR_PRELUDE);
            code.push('\n');
        }
        code.push_str(&plans);
        code.push('\n');
        code.push_str(&functions);
        code.push_str(&main_fn(&dispatch_arms));

        let mut dependencies: BTreeMap<String, String> = acc
            .deps
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if has_groups {
            dependencies.insert("libc".to_string(), "0.2".to_string());
        }

        Ok(GeneratedSource {
            code,
            manifest: GeneratedManifest { package: package.to_string(), dependencies },
        })
    }

    /// Render each top-level step of a sequence to a Rust expression.
    fn render_seq(
        &self,
        ctx: &ExecContext,
        seq: &CommandSeq,
        acc: &mut GenAcc,
    ) -> Result<Vec<String>, EngineError> {
        seq.steps
            .iter()
            .map(|step| self.render_step(ctx, step, acc))
            .collect()
    }

    fn render_step(
        &self,
        ctx: &ExecContext,
        step: &CommandStep,
        acc: &mut GenAcc,
    ) -> Result<String, EngineError> {
        if step.elements.len() == 1 && step.elements[0].op_next == ChainOp::None {
            return self.render_element(ctx, &step.elements[0], acc, false);
        }

        // The emitted equivalent of the chain evaluator: skip/run decisions
        // from the previous element's operator, pipe threading, file append,
        // stdout accumulation.
        let mut out = String::new();
        out.push_str("{\n");
        out.push_str("    let mut __out = String::new();\n");
        out.push_str("    let mut __last = CmdResult::ok();\n");
        out.push_str("    let mut __piped: Option<String> = None;\n");
        out.push_str("    '__chain: {\n");
        let mut piped_in = false;
        for element in &step.elements {
            let expr = self.render_element(ctx, element, acc, piped_in)?;
            out.push_str(&format!("        let __r = {};\n", indent_tail2(&expr)));
            match element.op_next {
                ChainOp::Pipe => {
                    out.push_str("        __piped = Some(__r.stdout.clone());\n");
                }
                ChainOp::Append => {
                    let target = element.append_target.as_deref().unwrap_or_default();
                    out.push_str(&format!(
                        "        if let Err(e) = append_file(ctx, {}, &__r.stdout) {{\n            __last = CmdResult::error(format!(\"append: {{}}\\n\", e));\n            break '__chain;\n        }}\n",
                        rust_str(target)
                    ));
                    out.push_str("        __out.push_str(&__r.stdout);\n");
                }
                _ => out.push_str("        __out.push_str(&__r.stdout);\n"),
            }
            out.push_str("        __last = __r;\n");
            match element.op_next {
                ChainOp::And => {
                    out.push_str("        if __last.exit_code != 0 { break '__chain; }\n");
                }
                ChainOp::Or => {
                    out.push_str("        if __last.exit_code == 0 { break '__chain; }\n");
                }
                _ => {}
            }
            piped_in = element.op_next == ChainOp::Pipe;
        }
        out.push_str("    }\n");
        out.push_str("    let _ = __piped.take();\n");
        out.push_str(
            "    CmdResult { stdout: __out, stderr: __last.stderr, exit_code: __last.exit_code }\n",
        );
        out.push('}');
        Ok(out)
    }

    fn render_element(
        &self,
        ctx: &ExecContext,
        element: &crate::ir::ChainElement,
        acc: &mut GenAcc,
        piped_in: bool,
    ) -> Result<String, EngineError> {
        let stdin_expr = "__piped.take().as_deref()";
        match &element.kind {
            ElementKind::Shell { parts } => {
                let text = self.render_shell_text(ctx, parts, acc)?;
                let stdin = if piped_in { stdin_expr } else { "None" };
                Ok(format!("run_shell(ctx, {}, {})", text, stdin))
            }
            ElementKind::Action { name, params } => {
                let action = self.registry.action(name)?;
                if piped_in && !action.pipe_capable() {
                    return Err(EngineError::DecoratorMisused(format!(
                        "@{} is not pipe-capable",
                        name
                    )));
                }
                let bound = action.schema().bind(name, params)?;
                let stdin = piped_in.then_some(stdin_expr);
                Ok(acc.absorb(action.gen(ctx, &bound, stdin)?))
            }
            ElementKind::Block(wrapper) => {
                let block = self.registry.block(&wrapper.name)?;
                let bound = block.schema().bind(&wrapper.name, &wrapper.params)?;
                let inner = self.render_seq(ctx, &wrapper.inner, acc)?;
                Ok(acc.absorb(block.gen(ctx, &bound, &inner)?))
            }
            ElementKind::Pattern(pattern) => {
                let dec = self.registry.pattern(&pattern.name)?;
                let labels: Vec<String> = pattern.branches.keys().cloned().collect();
                dec.validate(&labels)?;
                let bound = dec.schema().bind(&pattern.name, &pattern.params)?;
                let mut branches = IndexMap::new();
                for (label, body) in &pattern.branches {
                    let steps = self.render_seq(ctx, body, acc)?;
                    branches.insert(label.clone(), seq_block(&steps));
                }
                Ok(acc.absorb(dec.gen(ctx, &bound, &branches)?))
            }
        }
    }

    /// Render the command text of a shell element as a Rust `&str`
    /// expression. All-literal text embeds directly; value decorators splice
    /// through `format!`.
    fn render_shell_text(
        &self,
        ctx: &ExecContext,
        parts: &[ShellPart],
        acc: &mut GenAcc,
    ) -> Result<String, EngineError> {
        let has_values = parts.iter().any(|p| matches!(p, ShellPart::Value { .. }));
        if !has_values {
            let text: String = parts
                .iter()
                .map(|p| match p {
                    ShellPart::Text(t) => t.as_str(),
                    ShellPart::Value { .. } => unreachable!(),
                })
                .collect();
            return Ok(rust_str(&text));
        }
        let mut template = String::new();
        let mut args = Vec::new();
        for part in parts {
            match part {
                ShellPart::Text(t) => template.push_str(&t.replace('{', "{{").replace('}', "}}")),
                ShellPart::Value { name, params } => {
                    let value = self.registry.value(name)?;
                    let bound = value.schema().bind(name, params)?;
                    template.push_str("{}");
                    args.push(acc.absorb(value.gen(ctx, &bound)?));
                }
            }
        }
        Ok(format!("&format!({}, {})", rust_str(&template), args.join(", ")))
    }
}

/// Re-indent every line after the first by one level, keeping nested blocks
/// readable inside a function body.
fn indent_tail(code: &str) -> String {
    let mut lines = code.lines();
    let mut out = String::new();
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str("    ");
        out.push_str(line);
    }
    out
}

fn indent_tail2(code: &str) -> String {
    let mut lines = code.lines();
    let mut out = String::new();
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str("        ");
        out.push_str(line);
    }
    out
}

fn command_dispatch_arm(name: &str, ident: &str, cname: &str) -> String {
    format!(
        r#"        {name} => {{
            if dry_run {{
                print!("{{}}", if color {{ PLAN_COLOR_{cname} }} else {{ PLAN_PLAIN_{cname} }});
                0
            }} else {{
                let mut ctx = Ctx::new();
                let r = cmd_{ident}(&mut ctx);
                print!("{{}}", r.stdout);
                eprint!("{{}}", r.stderr);
                r.exit_code
            }}
        }}
"#,
        name = rust_str(name),
        ident = ident,
        cname = cname,
    )
}

fn group_dispatch_arm(name: &str, ident: &str, cname: &str) -> String {
    format!(
        r#"        {name} => {{
            if dry_run {{
                print!("{{}}", if color {{ PLAN_COLOR_{cname} }} else {{ PLAN_PLAIN_{cname} }});
                0
            }} else {{
                let sub = rest.get(1).map(|s| s.as_str()).unwrap_or("run");
                match sub {{
                    "run" => sup_run({name}),
                    "foreground" => {{
                        let mut ctx = Ctx::new();
                        let r = watch_{ident}(&mut ctx);
                        print!("{{}}", r.stdout);
                        eprint!("{{}}", r.stderr);
                        r.exit_code
                    }}
                    "stop" => {{
                        let mut ctx = Ctx::new();
                        let r = stop_{ident}(&mut ctx);
                        print!("{{}}", r.stdout);
                        eprint!("{{}}", r.stderr);
                        sup_stop({name})
                    }}
                    "status" => sup_status({name}),
                    "logs" => sup_logs({name}),
                    other => {{
                        eprintln!("unknown subcommand '{{}}' for process group {{}}", other, {name});
                        2
                    }}
                }}
            }}
        }}
"#,
        name = rust_str(name),
        ident = ident,
        cname = cname,
    )
}

fn main_fn(dispatch_arms: &str) -> String {
    format!(
        r#"fn main() {{
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut dry_run = false;
    let mut color = true;
    let mut rest: Vec<String> = Vec::new();
    for arg in args {{
        match arg.as_str() {{
            "--dry-run" => dry_run = true,
            "--no-color" => color = false,
            _ => rest.push(arg),
        }}
    }}
    let Some(command) = rest.first().map(|s| s.as_str()) else {{
        eprintln!("usage: cli [--dry-run] [--no-color] <command> [args...]");
        std::process::exit(2);
    }};
    let code = match command {{
{arms}        other => {{
            eprintln!("unknown command '{{}}'", other);
            2
        }}
    }};
    std::process::exit(code);
}}
"#,
        arms = dispatch_arms
    )
}

// =============================================================================
// EMITTED RUNTIME
// =============================================================================

/// The std-only runtime prelude embedded at the top of every emitted file.
/// It mirrors the engine's chain/sequence semantics.
const RUNTIME_PRELUDE: &str = r#"#[derive(Debug, Clone)]
struct CmdResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

impl CmdResult {
    fn ok() -> Self {
        Self { stdout: String::new(), stderr: String::new(), exit_code: 0 }
    }

    fn error(stderr: String) -> Self {
        Self { stdout: String::new(), stderr, exit_code: 1 }
    }

    fn timed_out(what: &str) -> Self {
        Self { stdout: String::new(), stderr: format!("{}: timed out\n", what), exit_code: 124 }
    }

    fn absorb(&mut self, r: CmdResult) {
        self.stdout.push_str(&r.stdout);
        self.stderr.push_str(&r.stderr);
        self.exit_code = r.exit_code;
    }
}

#[derive(Clone)]
struct Ctx {
    cwd: std::path::PathBuf,
}

impl Ctx {
    fn new() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
        }
    }
}

#[allow(dead_code)]
fn var_of(name: &str) -> &'static str {
    for (k, v) in VARS {
        if *k == name {
            return v;
        }
    }
    ""
}

#[allow(dead_code)]
fn env_or(key: &str, default: &str) -> String {
    if let Ok(v) = std::env::var(key) {
        return v;
    }
    for (k, v) in SNAPSHOT_ENV {
        if *k == key {
            return (*v).to_string();
        }
    }
    default.to_string()
}

#[allow(dead_code)]
fn lookup_key(key: &str) -> String {
    for (k, v) in VARS {
        if *k == key {
            return (*v).to_string();
        }
    }
    env_or(key, "")
}

#[allow(dead_code)]
fn resolve_path(cwd: &std::path::Path, p: &str) -> std::path::PathBuf {
    let path = std::path::Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn run_shell(ctx: &mut Ctx, command: &str, stdin: Option<&str>) -> CmdResult {
    use std::io::Write;
    let mut child = match std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.cwd)
        .stdin(if stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return CmdResult::error(format!("sh: {}: {}\n", command, e)),
    };
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let _ = pipe.write_all(input.as_bytes());
    }
    match child.wait_with_output() {
        Ok(out) => CmdResult {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CmdResult::error(format!("sh: {}\n", e)),
    }
}

#[allow(dead_code)]
fn append_file(ctx: &Ctx, target: &str, data: &str) -> std::io::Result<()> {
    use std::io::Write;
    let path = resolve_path(&ctx.cwd, target);
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data.as_bytes())
}
"#;

/// Supervisor subcommand support, emitted only when the program declares
/// watch/stop process groups.
const SUPERVISOR_PRELUDE: &str = r#"fn sup_pid_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}.pid", name))
}

fn sup_log_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}.log", name))
}

fn sup_read_pid(name: &str) -> Option<i32> {
    std::fs::read_to_string(sup_pid_path(name)).ok()?.trim().parse().ok()
}

fn sup_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

fn sup_write_pid(name: &str, pid: u32) -> std::io::Result<()> {
    let path = sup_pid_path(name);
    let tmp = path.with_extension(format!("pid.{}", std::process::id()));
    std::fs::write(&tmp, format!("{}\n", pid))?;
    std::fs::rename(tmp, path)
}

fn sup_run(name: &str) -> i32 {
    if let Some(pid) = sup_read_pid(name) {
        if sup_alive(pid) {
            eprintln!("{} is already running (pid {})", name, pid);
            return 1;
        }
        let _ = std::fs::remove_file(sup_pid_path(name));
    }
    let log_path = sup_log_path(name);
    let log = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}: cannot open log file: {}", name, e);
            return 1;
        }
    };
    let log_err = match log.try_clone() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{}: cannot open log file: {}", name, e);
            return 1;
        }
    };
    let exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{}: cannot locate executable: {}", name, e);
            return 1;
        }
    };
    match std::process::Command::new(exe)
        .arg(name)
        .arg("foreground")
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .spawn()
    {
        Ok(child) => {
            if let Err(e) = sup_write_pid(name, child.id()) {
                eprintln!("{}: cannot write pid file: {}", name, e);
                return 1;
            }
            println!("{} started (pid {}), logging to {}", name, child.id(), log_path.display());
            0
        }
        Err(e) => {
            eprintln!("{}: failed to start: {}", name, e);
            1
        }
    }
}

fn sup_stop(name: &str) -> i32 {
    let Some(pid) = sup_read_pid(name) else {
        eprintln!("{} is not running", name);
        return 0;
    };
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    for _ in 0..50 {
        if !sup_alive(pid) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    if sup_alive(pid) {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
    let _ = std::fs::remove_file(sup_pid_path(name));
    println!("{} stopped", name);
    0
}

fn sup_status(name: &str) -> i32 {
    match sup_read_pid(name) {
        Some(pid) if sup_alive(pid) => {
            println!("{} is running (pid {})", name, pid);
            0
        }
        Some(_) => {
            let _ = std::fs::remove_file(sup_pid_path(name));
            println!("{} is not running (stale pid file removed)", name);
            1
        }
        None => {
            println!("{} is not running", name);
            1
        }
    }
}

fn sup_logs(name: &str) -> i32 {
    match std::fs::read_to_string(sup_log_path(name)) {
        Ok(contents) if contents.is_empty() => {
            println!("{}: log file is empty", name);
            0
        }
        Ok(contents) => {
            print!("{}", contents);
            0
        }
        Err(_) => {
            eprintln!("{}: no log file found", name);
            1
        }
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        shell_step, ActionDecorator as AstAction, Arg, ArgValue, BlockDecorator as AstBlock,
        CommandDecl, CommandKind, Content, Program, ShellContent, ShellPart as AstShellPart,
    };
    use crate::decorators::builtin_registry;
    use crate::engine::context::test_support::test_context;
    use crate::ir::lower_program;

    fn generate(prog: &Program) -> GeneratedSource {
        let ir = Arc::new(lower_program(prog).unwrap());
        let registry = builtin_registry();
        let generator = Generator::new(ir, registry);
        let ctx = test_context(&[("PATH", "/usr/bin:/bin"), ("HOME", "/home/u")], &[]);
        generator.generate(&ctx, "cli").unwrap()
    }

    fn decl(name: &str, body: Vec<Content>) -> CommandDecl {
        CommandDecl { name: name.to_string(), kind: CommandKind::Regular, body }
    }

    #[test]
    fn test_dependency_order_in_emitted_source() {
        let prog = Program {
            variables: vec![],
            commands: vec![
                decl(
                    "greet",
                    vec![Content::Action(AstAction {
                        name: "cmd".to_string(),
                        args: vec![Arg::positional(ArgValue::Ident("hello".to_string()))],
                    })],
                ),
                decl("hello", vec![shell_step("echo hi")]),
            ],
        };
        let out = generate(&prog);
        let hello = out.code.find("fn cmd_hello").unwrap();
        let greet = out.code.find("fn cmd_greet").unwrap();
        assert!(hello < greet, "referenced command must be defined first");
        assert!(out.code.contains("cmd_hello(ctx)"));
    }

    #[test]
    fn test_plans_embedded_as_literals() {
        let prog = Program {
            variables: vec![],
            commands: vec![decl("build", vec![shell_step("echo hi")])],
        };
        let out = generate(&prog);
        assert!(out.code.contains("static PLAN_PLAIN_BUILD: &str ="));
        assert!(out.code.contains("static PLAN_COLOR_BUILD: &str ="));
        assert!(out.code.contains("[command] build"));
        assert!(out.code.contains("--dry-run"));
    }

    #[test]
    fn test_env_table_is_narrowed() {
        let prog = Program {
            variables: vec![],
            commands: vec![decl(
                "show",
                vec![Content::Shell(ShellContent {
                    parts: vec![
                        AstShellPart::Text { text: "echo ".to_string() },
                        AstShellPart::Value {
                            name: "env".to_string(),
                            args: vec![Arg::positional(ArgValue::Ident("HOME".to_string()))],
                        },
                    ],
                })],
            )],
        };
        let out = generate(&prog);
        assert!(out.code.contains("(\"HOME\", \"/home/u\")"));
        // PATH was never referenced; the table must not embed it.
        assert!(!out.code.contains("(\"PATH\""));
    }

    #[test]
    fn test_parallel_emits_scoped_threads() {
        let prog = Program {
            variables: vec![],
            commands: vec![decl(
                "par",
                vec![Content::Block(AstBlock {
                    name: "parallel".to_string(),
                    args: vec![],
                    inner: vec![shell_step("echo A"), shell_step("echo B")],
                })],
            )],
        };
        let out = generate(&prog);
        assert!(out.code.contains("std::thread::scope"));
        assert!(out.code.contains("echo A"));
    }

    #[test]
    fn test_group_emits_supervisor_and_libc_dep() {
        let prog = Program {
            variables: vec![],
            commands: vec![
                CommandDecl {
                    name: "server".to_string(),
                    kind: CommandKind::Watch,
                    body: vec![shell_step("sleep 5")],
                },
                CommandDecl {
                    name: "server".to_string(),
                    kind: CommandKind::Stop,
                    body: vec![shell_step("echo stopping")],
                },
            ],
        };
        let out = generate(&prog);
        assert!(out.code.contains("fn watch_server"));
        assert!(out.code.contains("fn stop_server"));
        assert!(out.code.contains("sup_run"));
        assert_eq!(out.manifest.dependencies.get("libc"), Some(&"0.2".to_string()));

        let parsed: toml::Table = toml::from_str(&out.manifest.to_cargo_toml()).unwrap();
        assert!(parsed["dependencies"].as_table().unwrap().contains_key("libc"));
    }

    #[test]
    fn test_manifest_without_groups_has_no_libc() {
        let prog = Program {
            variables: vec![],
            commands: vec![decl("build", vec![shell_step("echo hi")])],
        };
        let out = generate(&prog);
        assert!(out.manifest.dependencies.is_empty());
        let rendered = out.manifest.to_cargo_toml();
        assert!(rendered.contains("name = \"cli\""));
    }

    #[test]
    fn test_chain_codegen_structure() {
        let prog = Program {
            variables: vec![],
            commands: vec![decl("c", vec![shell_step("echo a && echo b | sort")])],
        };
        let out = generate(&prog);
        assert!(out.code.contains("'__chain:"));
        assert!(out.code.contains("__piped = Some(__r.stdout.clone());"));
        assert!(out.code.contains("if __last.exit_code != 0 { break '__chain; }"));
    }

    #[test]
    fn test_variables_embedded() {
        let prog = Program {
            variables: vec![crate::ast::VarDecl {
                name: "PORT".to_string(),
                value: crate::ast::LiteralValue::Int(8080),
            }],
            commands: vec![decl("show", vec![shell_step("echo ok")])],
        };
        let out = generate(&prog);
        assert!(out.code.contains("(\"PORT\", \"8080\")"));
    }

    #[test]
    fn test_seq_block_shape() {
        let block = seq_block(&["run_shell(ctx, \"a\", None)".to_string(), "run_shell(ctx, \"b\", None)".to_string()]);
        assert!(block.starts_with('{'));
        assert!(block.contains("if __acc.exit_code == 0"));
        assert!(block.ends_with("__acc\n}"));
        assert_eq!(seq_block(&[]), "CmdResult::ok()");
    }

    #[test]
    fn test_fn_ident_sanitizes() {
        assert_eq!(fn_ident("build-all"), "build_all");
        assert_eq!(fn_ident("b2"), "b2");
    }
}
