use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

use runfile::supervisor::{self, LaunchOutcome, LogsOutcome, ProcessStatus};
use runfile::{Program, Runfile, RunfileOptions};

#[derive(Parser)]
#[command(name = "runfile")]
#[command(about = "Run, plan, or generate code for a command-definition program")]
#[command(version)]
struct Cli {
    /// Pre-parsed program (the parser's JSON output)
    #[arg(short = 'p', long = "program")]
    program: PathBuf,

    /// Print the plan instead of executing
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Plain output, no ANSI colors
    #[arg(long = "no-color")]
    no_color: bool,

    /// Print the generated CLI source and exit
    #[arg(long = "emit-source")]
    emit_source: bool,

    /// Print the generated module manifest and exit
    #[arg(long = "emit-manifest")]
    emit_manifest: bool,

    /// CLI variable override, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Run a watch command in the foreground instead of supervising it
    #[arg(long = "foreground")]
    foreground: bool,

    /// Command to execute
    #[arg(value_name = "COMMAND")]
    command: Option<String>,

    /// Process-group subcommand: run, stop, status, logs
    #[arg(value_name = "SUBCOMMAND")]
    subcommand: Option<String>,
}

fn parse_vars(pairs: &[String]) -> Result<HashMap<String, String>, String> {
    let mut vars = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                vars.insert(key.to_string(), value.to_string());
            }
            None => return Err(format!("--var expects KEY=VALUE, got '{}'", pair)),
        }
    }
    Ok(vars)
}

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    let subcommand = cli.subcommand.take();

    let source = match std::fs::read_to_string(&cli.program) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("runfile: cannot read program file {}: {}", cli.program.display(), e);
            std::process::exit(1);
        }
    };
    let program: Program = match serde_json::from_str(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("runfile: invalid program file: {}", e);
            std::process::exit(1);
        }
    };

    let vars = match parse_vars(&cli.vars) {
        Ok(vars) => vars,
        Err(msg) => {
            eprintln!("runfile: {}", msg);
            std::process::exit(2);
        }
    };

    let runfile = match Runfile::new(
        &program,
        RunfileOptions {
            vars: Some(vars),
            dry_run: cli.dry_run,
            color: !cli.no_color,
            ..Default::default()
        },
    ) {
        Ok(runfile) => runfile,
        Err(e) => {
            eprintln!("runfile: {}", e);
            std::process::exit(1);
        }
    };

    if cli.emit_source || cli.emit_manifest {
        let package = cli
            .program
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cli")
            .to_string();
        match runfile.generate(&package) {
            Ok(generated) => {
                if cli.emit_manifest {
                    print!("{}", generated.manifest.to_cargo_toml());
                }
                if cli.emit_source {
                    print!("{}", generated.code);
                }
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("runfile: {}", e);
                std::process::exit(1);
            }
        }
    }

    let Some(command) = command else {
        eprintln!("runfile: no command given; available: {}", runfile.command_names().join(", "));
        std::process::exit(2);
    };

    if cli.dry_run {
        match runfile.plan(&command) {
            Ok(plan) => {
                if cli.no_color {
                    print!("{}", plan.render_plain());
                } else {
                    print!("{}", plan.render_colored());
                }
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("{}", e.user_line(&command).trim_end());
                std::process::exit(1);
            }
        }
    }

    let code = if runfile.command_kind(&command).is_none() {
        eprintln!(
            "runfile: unknown command '{}'; available: {}",
            command,
            runfile.command_names().join(", ")
        );
        2
    } else if runfile.is_group(&command) && !cli.foreground {
        group_dispatch(&runfile, &cli.program, &command, subcommand.as_deref(), &cli.vars).await
    } else if runfile.is_group(&command) {
        // --foreground: the supervised child re-enters here and runs the
        // watch body inline.
        match runfile.run_group_foreground(&command).await {
            Ok(outcome) => {
                print!("{}", outcome.result.stdout);
                eprint!("{}", outcome.result.stderr);
                outcome.result.exit_code
            }
            Err(e) => {
                eprint!("{}", e.user_line(&command));
                1
            }
        }
    } else {
        match runfile.run(&command).await {
            Ok(outcome) => {
                print!("{}", outcome.result.stdout);
                eprint!("{}", outcome.result.stderr);
                outcome.result.exit_code
            }
            Err(e) => {
                eprint!("{}", e.user_line(&command));
                1
            }
        }
    };
    std::process::exit(code);
}

/// The four supervisor subcommands of a watch/stop process group.
async fn group_dispatch(
    runfile: &Runfile,
    program_path: &std::path::Path,
    name: &str,
    subcommand: Option<&str>,
    vars: &[String],
) -> i32 {
    match subcommand.unwrap_or("run") {
        "run" => {
            let exe = match std::env::current_exe() {
                Ok(exe) => exe,
                Err(e) => {
                    eprintln!("runfile: cannot locate executable: {}", e);
                    return 1;
                }
            };
            let mut args = vec![
                "--program".to_string(),
                program_path.display().to_string(),
                "--foreground".to_string(),
            ];
            for var in vars {
                args.push("--var".to_string());
                args.push(var.clone());
            }
            args.push(name.to_string());
            match supervisor::launch(name, &exe, &args) {
                Ok(LaunchOutcome::Started { pid, log }) => {
                    println!("{} started (pid {}), logging to {}", name, pid, log.display());
                    0
                }
                Ok(LaunchOutcome::AlreadyRunning(pid)) => {
                    eprintln!("{} is already running (pid {})", name, pid);
                    1
                }
                Err(e) => {
                    eprintln!("runfile: {}: {}", name, e);
                    1
                }
            }
        }
        "stop" => match runfile.group_stop(name).await {
            Ok((body, outcome)) => {
                print!("{}", body.stdout);
                eprint!("{}", body.stderr);
                match outcome {
                    supervisor::StopOutcome::Stopped(pid) => {
                        println!("{} stopped (pid {})", name, pid);
                        0
                    }
                    supervisor::StopOutcome::NotRunning => {
                        eprintln!("{} is not running", name);
                        0
                    }
                }
            }
            Err(e) => {
                eprint!("{}", e.user_line(name));
                1
            }
        },
        "status" => match runfile.group_status(name) {
            ProcessStatus::Running(pid) => {
                println!("{} is running (pid {})", name, pid);
                0
            }
            ProcessStatus::Stale(pid) => {
                println!("{} is not running (stale pid file for {} removed)", name, pid);
                1
            }
            ProcessStatus::Stopped => {
                println!("{} is not running", name);
                1
            }
        },
        "logs" => match runfile.group_logs(name) {
            LogsOutcome::Contents(contents) => {
                print!("{}", contents);
                0
            }
            LogsOutcome::Empty => {
                println!("{}: log file is empty", name);
                0
            }
            LogsOutcome::Missing => {
                eprintln!("{}: no log file found", name);
                1
            }
        },
        other => {
            eprintln!("runfile: unknown subcommand '{}' for process group '{}'", other, name);
            2
        }
    }
}
