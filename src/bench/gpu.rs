//! GPU stress benchmark
//!
//! Delegates to the first external stress tool found on `PATH`. A host
//! without any tool still completes, with a result saying so. Tool output
//! is streamed into the job's log tail while it runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::context::{JobContext, RunOutcome, RunnerSettings};
use crate::io::command::{find_program, kill_process_group, own_process_group, run_command, terminate};
use crate::models::{BenchmarkResult, GpuResult, JobMetrics, JobParams, Progress};
use crate::util::percent_of;
use crate::{BenchError, Result, MAX_LOG_TAIL_LINES};

/// Stress tools in order of preference
pub const GPU_TOOLS: [&str; 4] = ["gpu_burn", "gpu-burn", "glmark2", "vkmark"];

const DRIVER_PROBE: &str = "nvidia-smi";
const DRIVER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);

/// What the driver utility reported
#[derive(Debug, Clone, Default)]
pub struct DriverInfo {
    pub detected: bool,
    pub gpus: Vec<String>,
}

/// Query `<program> -L` (normally `nvidia-smi`) for installed GPUs
pub async fn probe_driver(program: &str) -> DriverInfo {
    if find_program(program).is_none() {
        return DriverInfo::default();
    }

    match run_command(program, &["-L"], DRIVER_PROBE_TIMEOUT).await {
        Ok(output) if output.success() => DriverInfo {
            detected: true,
            gpus: output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        },
        Ok(output) => {
            debug!(exit_code = ?output.exit_code, "driver probe reported failure");
            DriverInfo::default()
        }
        Err(e) => {
            debug!(error = %e, "driver probe failed");
            DriverInfo::default()
        }
    }
}

/// Bounded buffer of the most recent output lines
#[derive(Debug, Default)]
struct LogTail {
    lines: VecDeque<String>,
}

impl LogTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == MAX_LOG_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

pub struct GpuBenchmark {
    duration: Duration,
    timeout: Duration,
    tools: Vec<String>,
    driver_probe: String,
}

impl GpuBenchmark {
    pub fn new(params: &JobParams, settings: &RunnerSettings) -> Self {
        let duration = Duration::from_secs(params.duration_secs);
        Self {
            duration,
            timeout: duration + settings.grace_period,
            tools: GPU_TOOLS.iter().map(|t| t.to_string()).collect(),
            driver_probe: DRIVER_PROBE.to_string(),
        }
    }

    /// Replace the driver utility queried before the run
    pub fn with_driver_probe(mut self, program: impl Into<String>) -> Self {
        self.driver_probe = program.into();
        self
    }

    /// Replace the candidate tool list (names or paths), in preference order
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// First available tool and its resolved path
    pub fn locate_tool(&self) -> Option<(String, PathBuf)> {
        self.tools.iter().find_map(|candidate| {
            let path = find_program(candidate)?;
            let name = Path::new(candidate)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| candidate.clone());
            Some((name, path))
        })
    }

    pub async fn run(&self, ctx: &JobContext) -> Result<RunOutcome> {
        let start = Instant::now();
        if ctx.is_cancelled() {
            return Ok(RunOutcome::Canceled);
        }
        let driver = tokio::select! {
            driver = probe_driver(&self.driver_probe) => driver,
            _ = cancellation(ctx) => {
                info!(job_id = %ctx.id(), "gpu job canceled during driver probe");
                return Ok(RunOutcome::Canceled);
            }
        };

        let Some((tool, path)) = self.locate_tool() else {
            let message = if driver.detected {
                format!(
                    "GPU driver detected but no stress tool installed (looked for {})",
                    self.tools.join(", ")
                )
            } else {
                format!(
                    "no GPU stress tool installed (looked for {}) and no GPU driver detected",
                    self.tools.join(", ")
                )
            };
            info!(job_id = %ctx.id(), driver_detected = driver.detected, "gpu benchmark unavailable");
            return Ok(RunOutcome::Completed(BenchmarkResult::Gpu(GpuResult {
                tool: None,
                available: false,
                driver_detected: driver.detected,
                gpus: driver.gpus,
                message,
                exit_code: None,
                elapsed_secs: start.elapsed().as_secs_f64(),
            })));
        };

        if ctx.is_cancelled() {
            return Ok(RunOutcome::Canceled);
        }

        let reports_progress = honours_duration(&tool);
        let args = tool_args(&tool, self.duration);
        info!(job_id = %ctx.id(), tool = %tool, path = %path.display(), ?args, "starting gpu stress tool");

        let mut command = Command::new(&path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = own_process_group(&mut command)
            .spawn()
            .map_err(|e| BenchError::CommandFailed {
                program: tool.clone(),
                message: e.to_string(),
            })?;
        let pgid = child.id();

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, line_tx.clone())));
        }
        drop(line_tx);

        let mut log_tail = LogTail::default();
        let mut ticker = tokio::time::interval(ctx.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !reports_progress {
            ctx.report(Progress::Unknown, JobMetrics::with_elapsed(0.0));
        }

        enum ExitReason {
            Exited(std::process::ExitStatus),
            WaitError(std::io::Error),
            Timeout,
            Canceled,
        }

        let exit_reason = loop {
            tokio::select! {
                wait_result = child.wait() => {
                    break match wait_result {
                        Ok(status) => ExitReason::Exited(status),
                        Err(e) => ExitReason::WaitError(e),
                    };
                }
                Some(line) = line_rx.recv() => {
                    log_tail.push(line);
                }
                _ = ticker.tick() => {
                    if ctx.is_cancelled() {
                        break ExitReason::Canceled;
                    }
                    let elapsed = start.elapsed();
                    if elapsed > self.timeout {
                        break ExitReason::Timeout;
                    }
                    let progress = if reports_progress {
                        Progress::Percent(percent_of(elapsed, self.duration))
                    } else {
                        Progress::Unknown
                    };
                    ctx.report(progress, JobMetrics {
                        log_tail: log_tail.to_vec(),
                        ..JobMetrics::with_elapsed(elapsed.as_secs_f64())
                    });
                }
            }
        };

        match &exit_reason {
            ExitReason::Canceled => {
                info!(job_id = %ctx.id(), tool = %tool, "stopping gpu stress tool on cancellation");
                terminate(&mut child, KILL_GRACE).await;
            }
            ExitReason::Timeout => {
                warn!(job_id = %ctx.id(), tool = %tool, timeout_secs = self.timeout.as_secs(), "gpu stress tool timed out");
                terminate(&mut child, KILL_GRACE).await;
            }
            _ => {
                // The tool is gone but helpers it forked may linger
                if let Some(pgid) = pgid {
                    kill_process_group(pgid);
                }
            }
        }

        // Collect whatever output is still in flight
        for reader in readers {
            if tokio::time::timeout(KILL_GRACE, reader).await.is_err() {
                debug!(job_id = %ctx.id(), "output reader did not finish");
            }
        }
        while let Ok(line) = line_rx.try_recv() {
            log_tail.push(line);
        }

        let elapsed = start.elapsed();
        ctx.report(
            if reports_progress {
                Progress::Percent(percent_of(elapsed, self.duration))
            } else {
                Progress::Unknown
            },
            JobMetrics {
                log_tail: log_tail.to_vec(),
                ..JobMetrics::with_elapsed(elapsed.as_secs_f64())
            },
        );

        match exit_reason {
            ExitReason::Canceled => Ok(RunOutcome::Canceled),
            ExitReason::Timeout => Err(BenchError::Timeout {
                what: tool,
                after: self.timeout,
            }),
            ExitReason::WaitError(e) => Err(BenchError::CommandFailed {
                program: tool,
                message: format!("failed to wait for process: {}", e),
            }),
            ExitReason::Exited(status) => match status.code() {
                Some(0) => Ok(RunOutcome::Completed(BenchmarkResult::Gpu(GpuResult {
                    message: format!("{} finished successfully", tool),
                    tool: Some(tool),
                    available: true,
                    driver_detected: driver.detected,
                    gpus: driver.gpus,
                    exit_code: Some(0),
                    elapsed_secs: elapsed.as_secs_f64(),
                }))),
                code => {
                    let detail = match code {
                        Some(code) => format!("exited with code {}", code),
                        None => "terminated by signal".to_string(),
                    };
                    let message = match log_tail.last() {
                        Some(line) => format!("{} (last output: {})", detail, line),
                        None => detail,
                    };
                    Err(BenchError::CommandFailed {
                        program: tool,
                        message,
                    })
                }
            },
        }
    }
}

/// Whether the tool runs for a requested duration, so elapsed time maps to progress
fn honours_duration(tool: &str) -> bool {
    matches!(tool, "gpu_burn" | "gpu-burn")
}

fn tool_args(tool: &str, duration: Duration) -> Vec<String> {
    match tool {
        "gpu_burn" | "gpu-burn" => vec![duration.as_secs().to_string()],
        "glmark2" => vec!["--off-screen".to_string()],
        _ => Vec::new(),
    }
}

/// Resolves once cancellation has been requested for the job
async fn cancellation(ctx: &JobContext) {
    let mut ticker = tokio::time::interval(ctx.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if ctx.is_cancelled() {
            return;
        }
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "error reading tool output");
                break;
            }
        }
    }
}
