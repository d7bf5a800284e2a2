//! Process Supervisor
//!
//! Watch/stop lifecycle primitives for long-lived commands: PID file, log
//! file, and signal discipline. Files live under the system temp directory,
//! named after the process group. The generated CLI carries the same
//! behavior inline; the interpreter reaches these functions through the
//! facade's process-group surface.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;

/// Grace period before SIGTERM escalates to SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

pub fn pid_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.pid", name))
}

pub fn log_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.log", name))
}

/// Read the PID file: a single-line integer.
pub fn read_pid(name: &str) -> Option<i32> {
    fs::read_to_string(pid_path(name)).ok()?.trim().parse().ok()
}

/// Write the PID file atomically: temp file in the same directory, then
/// rename over the final name.
pub fn write_pid(name: &str, pid: u32) -> io::Result<()> {
    let path = pid_path(name);
    let suffix: u32 = rand::thread_rng().gen();
    let tmp = path.with_extension(format!("pid.{:08x}", suffix));
    fs::write(&tmp, format!("{}\n", pid))?;
    fs::rename(tmp, path)
}

/// `kill(pid, 0)` liveness probe.
pub fn is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running(i32),
    /// A PID file existed but the process is gone; the file was removed.
    Stale(i32),
    Stopped,
}

/// Probe the group's status, cleaning a stale PID file on the way.
pub fn status(name: &str) -> ProcessStatus {
    match read_pid(name) {
        Some(pid) if is_alive(pid) => ProcessStatus::Running(pid),
        Some(pid) => {
            let _ = fs::remove_file(pid_path(name));
            ProcessStatus::Stale(pid)
        }
        None => ProcessStatus::Stopped,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started { pid: u32, log: PathBuf },
    AlreadyRunning(i32),
}

/// Launch a process group in the background: stdout and stderr append to the
/// log file, the PID is written atomically, and the child is left detached.
/// Refuses when a live PID already exists.
pub fn launch(name: &str, exe: &Path, args: &[String]) -> io::Result<LaunchOutcome> {
    if let Some(pid) = read_pid(name) {
        if is_alive(pid) {
            return Ok(LaunchOutcome::AlreadyRunning(pid));
        }
        let _ = fs::remove_file(pid_path(name));
    }

    let log = log_path(name);
    let mut file = fs::OpenOptions::new().create(true).append(true).open(&log)?;
    writeln!(file, "=== {} started {} ===", name, chrono::Utc::now().to_rfc3339())?;
    let stderr_file = file.try_clone()?;

    let child = std::process::Command::new(exe)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(file)
        .stderr(stderr_file)
        .spawn()?;
    write_pid(name, child.id())?;
    Ok(LaunchOutcome::Started { pid: child.id(), log })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(i32),
    NotRunning,
}

/// Stop the group: SIGTERM, wait out the grace period, SIGKILL if needed,
/// remove the PID file.
pub fn stop(name: &str) -> StopOutcome {
    let Some(pid) = read_pid(name) else {
        return StopOutcome::NotRunning;
    };
    if is_alive(pid) {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        let deadline = std::time::Instant::now() + STOP_GRACE;
        while is_alive(pid) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
        if is_alive(pid) {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    let _ = fs::remove_file(pid_path(name));
    StopOutcome::Stopped(pid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsOutcome {
    Missing,
    Empty,
    Contents(String),
}

/// Dump the group's log file.
pub fn logs(name: &str) -> LogsOutcome {
    match fs::read_to_string(log_path(name)) {
        Err(_) => LogsOutcome::Missing,
        Ok(contents) if contents.is_empty() => LogsOutcome::Empty,
        Ok(contents) => LogsOutcome::Contents(contents),
    }
}

/// Sweep the temp directory for PID files of the given groups whose process
/// is gone. Returns the stale file paths after removing them.
pub fn sweep_stale(names: &[String]) -> Vec<PathBuf> {
    let Some(pattern) = std::env::temp_dir().join("*.pid").to_str().map(str::to_string) else {
        return Vec::new();
    };
    let mut removed = Vec::new();
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !names.iter().any(|n| n == stem) {
            continue;
        }
        let alive = fs::read_to_string(&entry)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(is_alive)
            .unwrap_or(false);
        if !alive {
            let _ = fs::remove_file(&entry);
            removed.push(entry);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("runfile-test-{}-{}", name, std::process::id())
    }

    fn cleanup(name: &str) {
        let _ = fs::remove_file(pid_path(name));
        let _ = fs::remove_file(log_path(name));
    }

    #[test]
    fn test_pid_file_round_trip() {
        let name = unique("pid");
        write_pid(&name, 4242).unwrap();
        assert_eq!(read_pid(&name), Some(4242));
        let contents = fs::read_to_string(pid_path(&name)).unwrap();
        assert_eq!(contents, "4242\n");
        cleanup(&name);
    }

    #[test]
    fn test_status_cleans_stale_pid() {
        let name = unique("stale");
        // A PID that can't be a live process on any sane system.
        write_pid(&name, 0x7fff_f000).unwrap();
        match status(&name) {
            ProcessStatus::Stale(_) => {}
            other => panic!("expected stale, got {:?}", other),
        }
        assert!(!pid_path(&name).exists());
        assert_eq!(status(&name), ProcessStatus::Stopped);
        cleanup(&name);
    }

    #[test]
    fn test_launch_status_stop_cycle() {
        let name = unique("cycle");
        let outcome = launch(
            &name,
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
        )
        .unwrap();
        let pid = match outcome {
            LaunchOutcome::Started { pid, .. } => pid as i32,
            other => panic!("expected start, got {:?}", other),
        };
        assert!(matches!(status(&name), ProcessStatus::Running(p) if p == pid));

        // A second launch refuses while the first is alive.
        let second = launch(
            &name,
            Path::new("/bin/sh"),
            &["-c".to_string(), "sleep 30".to_string()],
        )
        .unwrap();
        assert_eq!(second, LaunchOutcome::AlreadyRunning(pid));

        assert_eq!(stop(&name), StopOutcome::Stopped(pid));
        assert!(!pid_path(&name).exists());
        assert_eq!(stop(&name), StopOutcome::NotRunning);
        cleanup(&name);
    }

    #[test]
    fn test_logs_outcomes() {
        let name = unique("logs");
        assert_eq!(logs(&name), LogsOutcome::Missing);
        fs::write(log_path(&name), "").unwrap();
        assert_eq!(logs(&name), LogsOutcome::Empty);
        fs::write(log_path(&name), "line\n").unwrap();
        assert_eq!(logs(&name), LogsOutcome::Contents("line\n".to_string()));
        cleanup(&name);
    }

    #[test]
    fn test_launch_writes_log_header() {
        let name = unique("header");
        let outcome = launch(
            &name,
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo from-child".to_string()],
        )
        .unwrap();
        assert!(matches!(outcome, LaunchOutcome::Started { .. }));
        // Give the child a moment to write and exit.
        std::thread::sleep(Duration::from_millis(300));
        let contents = fs::read_to_string(log_path(&name)).unwrap();
        assert!(contents.contains("started"));
        assert!(contents.contains("from-child"));
        let _ = stop(&name);
        cleanup(&name);
    }

    #[test]
    fn test_sweep_stale_only_touches_named_groups() {
        let name = unique("sweep");
        let other = unique("sweep-other");
        write_pid(&name, 0x7fff_f001).unwrap();
        write_pid(&other, 0x7fff_f002).unwrap();
        let removed = sweep_stale(&[name.clone()]);
        assert_eq!(removed.len(), 1);
        assert!(!pid_path(&name).exists());
        assert!(pid_path(&other).exists());
        cleanup(&name);
        cleanup(&other);
    }
}
