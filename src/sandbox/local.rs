//! Local interpreter runtime
//!
//! Runs already-wrapped code with an interpreter found on `PATH`, in a
//! scratch directory with a cleared environment. Used only by the simulated
//! fallback, and only when enabled in config.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::executor::{Language, ProviderError, ProviderOutput};
use crate::orchestrator::STDERR_CEILING_BYTES;

/// Runs wrapped snippets with local interpreters
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    work_dir: PathBuf,
}

impl LocalRuntime {
    pub fn new(work_dir: PathBuf) -> Self {
        LocalRuntime { work_dir }
    }

    /// Interpreter and the flag that takes inline source
    fn command(language: Language) -> (&'static str, &'static str) {
        match language {
            Language::Python => ("python3", "-c"),
            Language::JavaScript => ("node", "-e"),
            Language::Shell => ("sh", "-c"),
        }
    }

    /// Resolve the interpreter for `language`, if installed
    pub fn interpreter(language: Language) -> Option<PathBuf> {
        which::which(Self::command(language).0).ok()
    }

    /// Run `wrapped` with the local interpreter. Stdin must already be
    /// embedded in the wrapped source.
    ///
    /// At most `max_stdout + 1` bytes of stdout are kept, so the assembler
    /// still sees the overflow and marks the result truncated. Stderr is
    /// read up to its own ceiling. The child is killed as soon as either
    /// pipe overflows.
    pub async fn run(
        &self,
        wrapped: &str,
        language: Language,
        timeout: Duration,
        max_stdout: usize,
    ) -> Result<ProviderOutput, ProviderError> {
        let program = Self::interpreter(language).ok_or_else(|| {
            ProviderError::permanent(format!("No local interpreter for {}", language))
        })?;
        let (_, flag) = Self::command(language);

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ProviderError::permanent(format!("Cannot prepare work dir: {}", e)))?;

        debug!(
            "Running {} locally with {} (work_dir: {})",
            language,
            program.display(),
            self.work_dir.display()
        );

        let start = Instant::now();
        let mut child = Command::new(&program)
            .arg(flag)
            .arg(wrapped)
            .current_dir(&self.work_dir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::permanent(format!("Failed to spawn process: {}", e)))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let collect = async {
            let stdout_read = read_capped(stdout_pipe, max_stdout);
            let stderr_read = read_capped(stderr_pipe, STDERR_CEILING_BYTES);
            tokio::pin!(stdout_read, stderr_read);

            let mut stdout = None;
            let mut stderr = None;
            while stdout.is_none() || stderr.is_none() {
                tokio::select! {
                    read = &mut stdout_read, if stdout.is_none() => {
                        let read = read?;
                        if read.len() > max_stdout {
                            debug!("Local stdout passed {} bytes, stopping process", max_stdout);
                            stop(&mut child);
                        }
                        stdout = Some(read);
                    }
                    read = &mut stderr_read, if stderr.is_none() => {
                        let read = read?;
                        if read.len() > STDERR_CEILING_BYTES {
                            debug!("Local stderr passed {} bytes, stopping process", STDERR_CEILING_BYTES);
                            stop(&mut child);
                        }
                        stderr = Some(read);
                    }
                }
            }

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout.unwrap_or_default(), stderr.unwrap_or_default(), status))
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok((stdout, stderr, status))) => {
                let stdout = String::from_utf8_lossy(&stdout).to_string();
                let stderr = String::from_utf8_lossy(&stderr).to_string();
                // A missing code means the process was signalled
                let code = status.code().unwrap_or(137);

                let mut result = ProviderOutput::exited(stdout, stderr, code);
                result.execution_time_ms = Some(start.elapsed().as_millis() as u64);
                Ok(result)
            }
            Ok(Err(e)) => Err(ProviderError::transient(format!("Process error: {}", e))),
            Err(_) => {
                // The child is killed when it drops at the end of this call
                warn!("Local execution timed out after {:?}", timeout);
                Err(ProviderError::transient(format!(
                    "Local execution timed out after {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

fn stop(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop local process: {}", e);
    }
}

/// Read at most `cap + 1` bytes, then close the pipe
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, cap: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.take(cap as u64 + 1).read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
