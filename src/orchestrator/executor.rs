//! Compile step execution: spawns the external build script and streams its
//! combined stdout/stderr into the job's build log.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;
use crate::log_collector::JobLog;

/// Status line cadence for compilation units seen in the build output.
const PROGRESS_EVERY: usize = 1000;

/// One invocation of the external build script.
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub script: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub build_log: PathBuf,
}

/// Whether a build output line is a compilation unit (CC/LD/AR).
fn is_compile_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("CC ") || trimmed.starts_with("LD ") || trimmed.starts_with("AR ")
}

/// Run the script to completion.
///
/// The build log is truncated before the script starts. Returns the exit
/// status, or `BuildError::Cancelled` after killing the child if `cancel`
/// fires first.
pub async fn run_build_script(
    invocation: &ScriptInvocation,
    cancel: &CancellationToken,
    log: &JobLog,
) -> Result<ExitStatus, BuildError> {
    log.debug(format!(
        "opening build log file {}",
        invocation.build_log.display()
    ));
    let mut build_log = File::create(&invocation.build_log)
        .await
        .map_err(|e| BuildError::LogFile {
            path: invocation.build_log.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut command = Command::new(&invocation.script);
    command.args(&invocation.args);
    if invocation.work_dir.is_dir() {
        command.current_dir(&invocation.work_dir);
    }
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        BuildError::SpawnFailed(format!("{}: {}", invocation.script.display(), e))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BuildError::SpawnFailed("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BuildError::SpawnFailed("Failed to capture stderr".to_string()))?;

    // Raw segments: build output is not guaranteed to be UTF-8, and a pipe
    // must be drained to EOF or the child blocks on a full buffer.
    let mut stdout_lines = BufReader::new(stdout).split(b'\n');
    let mut stderr_lines = BufReader::new(stderr).split(b'\n');
    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut compiled = 0_usize;

    while !(stdout_closed && stderr_closed) {
        let line = tokio::select! {
            line = stdout_lines.next_segment(), if !stdout_closed => match line {
                Ok(Some(line)) => line,
                Ok(None) => { stdout_closed = true; continue; }
                Err(e) => {
                    log.warn(format!("stdout read error: {}", e));
                    stdout_closed = true;
                    continue;
                }
            },
            line = stderr_lines.next_segment(), if !stderr_closed => match line {
                Ok(Some(line)) => line,
                Ok(None) => { stderr_closed = true; continue; }
                Err(e) => {
                    log.warn(format!("stderr read error: {}", e));
                    stderr_closed = true;
                    continue;
                }
            },
            _ = cancel.cancelled() => {
                log.warn("Cancellation requested, killing build script");
                if let Err(e) = child.kill().await {
                    log.warn(format!("Failed to kill build script: {}", e));
                }
                let _ = build_log.flush().await;
                return Err(BuildError::Cancelled);
            }
        };

        build_log.write_all(&line).await?;
        build_log.write_all(b"\n").await?;

        if is_compile_line(&String::from_utf8_lossy(&line)) {
            compiled += 1;
            if compiled % PROGRESS_EVERY == 0 {
                log.info(format!("Compiling: processed {} files...", compiled));
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            build_log.flush().await?;
            return Err(BuildError::Cancelled);
        }
    };
    build_log.flush().await?;
    Ok(status)
}

/// Environment handed to the build script.
pub fn script_env(work_dir: &Path, build_id: &str) -> Vec<(String, String)> {
    vec![
        ("BUILD_DIR".to_string(), work_dir.display().to_string()),
        ("BUILD_ID".to_string(), build_id.to_string()),
        ("MAKEFLAGS".to_string(), format!("-j{}", num_cpus::get())),
        ("KBUILD_BUILD_TIMESTAMP".to_string(), String::new()),
    ]
}
