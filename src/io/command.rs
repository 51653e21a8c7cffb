//! External command execution
//!
//! Runs a program with captured output under a hard timeout, and terminates
//! children gracefully (SIGTERM, then SIGKILL) when they must be stopped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::{BenchError, Result};

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// `timeout` bounds the whole call: the wait for exit and the draining of
/// both pipes. When it passes, the child's process group is killed and
/// [`BenchError::Timeout`] is returned. A program that cannot be spawned
/// yields [`BenchError::CommandFailed`].
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    debug!(program, ?args, timeout_ms = timeout.as_millis() as u64, "running command");
    let start = Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = own_process_group(&mut command)
        .spawn()
        .map_err(|e| BenchError::CommandFailed {
            program: program.to_string(),
            message: e.to_string(),
        })?;
    let pgid = child.id();

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_string(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(err) = stderr.as_mut() {
            let _ = err.read_to_string(&mut buf).await;
        }
        buf
    });
    let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];

    // Descendants may hold the pipes open after the child itself exits
    let collected = tokio::time::timeout(timeout, async {
        let status = child.wait().await;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        (status, stdout, stderr)
    })
    .await;

    match collected {
        Ok((status, stdout, stderr)) => {
            let status = status.map_err(|e| BenchError::CommandFailed {
                program: program.to_string(),
                message: e.to_string(),
            })?;
            Ok(CommandOutput {
                exit_code: status.code(),
                stdout,
                stderr,
                elapsed: start.elapsed(),
            })
        }
        Err(_) => {
            warn!(program, timeout_secs = timeout.as_secs_f64(), "command timed out");
            if let Some(pgid) = pgid {
                kill_process_group(pgid);
            }
            let _ = child.start_kill();
            let _ = child.wait().await;
            for reader in readers {
                reader.abort();
            }
            Err(BenchError::Timeout {
                what: program.to_string(),
                after: timeout,
            })
        }
    }
}

/// Make the spawned child the leader of a new process group, so it and
/// everything it forks can be signalled together.
pub fn own_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Resolve `name` against `PATH`, returning the first executable match.
///
/// Names containing a path separator are checked as given.
pub fn find_program(name: &str) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn signal_process_group(pgid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) with a negative pid addresses the group we created
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(()) // Group already gone
    } else {
        Err(err)
    }
}

/// SIGKILL every process left in the group led by `pgid`
#[cfg(unix)]
pub fn kill_process_group(pgid: u32) {
    if let Err(e) = signal_process_group(pgid, libc::SIGKILL) {
        warn!(pgid, error = %e, "SIGKILL to process group failed");
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pgid: u32) {}

/// Stop a child spawned with [`own_process_group`], along with anything it forked.
///
/// On Unix:
/// 1. Send SIGTERM to the process group
/// 2. Wait up to `grace` for the leader to exit
/// 3. Send SIGKILL to the group, sweeping stragglers
/// 4. Reap the leader
#[cfg(unix)]
pub async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pgid) = child.id() else {
        return; // Already reaped
    };

    if let Err(e) = signal_process_group(pgid, libc::SIGTERM) {
        warn!(pgid, error = %e, "SIGTERM to process group failed");
    }

    let exited = tokio::time::timeout(grace, child.wait()).await.is_ok();
    if !exited {
        warn!(pgid, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM, killing");
    }

    kill_process_group(pgid);
    if !exited {
        if let Err(e) = child.kill().await {
            warn!(pgid, error = %e, "SIGKILL failed");
        }
    }
}

#[cfg(not(unix))]
pub async fn terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let output = run_command("sh", &["-c", "echo out; echo err >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_command_times_out() {
        let start = Instant::now();
        let err = run_command("sleep", &["5"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_command_failed() {
        let err = run_command("srvbench-no-such-program", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::CommandFailed { .. }));
    }

    #[test]
    fn test_find_program() {
        assert!(find_program("sh").is_some());
        assert!(find_program("srvbench-no-such-program").is_none());
        assert!(find_program("/srvbench/no/such/program").is_none());
    }

    #[tokio::test]
    async fn test_run_command_timeout_covers_inherited_pipes() {
        // The shell exits at once but its background sleep keeps stdout open
        let start = Instant::now();
        let err = run_command("sh", &["-c", "sleep 6 & echo hi"], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_terminate_stops_child() {
        let mut command = Command::new("sleep");
        command.arg("30").kill_on_drop(true);
        let mut child = own_process_group(&mut command).spawn().unwrap();

        let start = Instant::now();
        terminate(&mut child, Duration::from_secs(2)).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_terminate_reaches_forked_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let script = format!("( sleep 1; touch '{}' ) & wait", marker.display());

        let mut command = Command::new("sh");
        command.args(["-c", &script]).kill_on_drop(true);
        let mut child = own_process_group(&mut command).spawn().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        terminate(&mut child, Duration::from_secs(2)).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked subprocess survived termination");
    }
}
