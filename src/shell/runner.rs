//! Subprocess-backed command runner.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandRunner, RunError, RunOutput};

const READ_CHUNK: usize = 16384; // 16KB per read

/// Runs commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
}

impl ShellRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("powershell.exe");
            c.arg("-Command").arg(command);
            c
        } else {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Read a stream to EOF keeping at most `max` bytes.
///
/// The rest is drained and discarded so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    max: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    Ok((kept, truncated))
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<RunOutput, RunError> {
        let started = Instant::now();
        let mut child = self.command(command).spawn().map_err(RunError::Spawn)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            let (out, err) = tokio::join!(
                read_capped(stdout, max_output_bytes),
                read_capped(stderr, max_output_bytes)
            );
            let status = child.wait().await;
            (out, err, status)
        };

        let finished = tokio::time::timeout(timeout, collect).await;

        match finished {
            Ok((out, err, status)) => {
                let (stdout, out_truncated) = out.map_err(RunError::Io)?;
                let (stderr, err_truncated) = err.map_err(RunError::Io)?;
                let status = status.map_err(RunError::Io)?;
                let output = RunOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    timed_out: false,
                    truncated: out_truncated || err_truncated,
                    duration: started.elapsed(),
                };
                debug!(
                    "Command exited with {} after {:?}",
                    output.exit_code, output.duration
                );
                Ok(output)
            }
            Err(_) => {
                warn!("Command timed out after {:?}: {}", timeout, command);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                Ok(RunOutput {
                    exit_code: -1,
                    stdout: Vec::new(),
                    stderr: format!("Command timed out after {}s\n", timeout.as_secs_f64())
                        .into_bytes(),
                    timed_out: true,
                    truncated: false,
                    duration: started.elapsed(),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner() -> ShellRunner {
        ShellRunner::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let out = runner()
            .run("echo hello", Duration::from_secs(10), 1024)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, b"hello\n");
        assert!(out.success());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_success() {
        let out = runner()
            .run("echo oops 1>&2; exit 3", Duration::from_secs(10), 1024)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr, b"oops\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let out = runner()
            .run("head -c 100000 /dev/zero", Duration::from_secs(10), 10)
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 10);
        assert!(out.truncated);
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let started = Instant::now();
        let out = runner()
            .run("sleep 30", Duration::from_millis(100), 1024)
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, -1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
