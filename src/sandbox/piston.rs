//! Piston-compatible engine adapter (secondary)

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::executor::{
    ExecutionJob, ExecutionProvider, ExitStatus, Isolation, Language, ProviderError, ProviderOutput,
};
use super::{http_client, send_json};
use crate::config::{ProviderRole, RemoteProviderConfig};
use crate::error::Result;

#[derive(Debug, Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PistonFile<'a>>,
    stdin: &'a str,
    run_timeout: u64,
    run_memory_limit: i64,
}

#[derive(Debug, Serialize)]
struct PistonFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PistonResponse {
    run: PistonStage,
    compile: Option<PistonStage>,
}

#[derive(Debug, Deserialize)]
struct PistonStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    code: Option<i32>,
    signal: Option<String>,
}

/// Secondary provider over a Piston-style `/execute` endpoint
pub struct PistonProvider {
    id: String,
    base_url: String,
    api_key: SecretString,
    isolation: Isolation,
    client: Client,
}

impl PistonProvider {
    pub fn new(config: &RemoteProviderConfig) -> Result<Self> {
        let role = ProviderRole::Secondary;
        let native = config
            .native_isolation
            .unwrap_or(role.default_native_isolation());
        Ok(PistonProvider {
            id: config.id.clone().unwrap_or_else(|| role.default_id().to_string()),
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            isolation: if native { Isolation::Kernel } else { Isolation::WrapperOnly },
            client: http_client()?,
        })
    }

    /// Piston runtime name and file name for a language
    fn runtime(language: Language) -> (&'static str, &'static str) {
        match language {
            Language::Python => ("python", "main.py"),
            Language::JavaScript => ("javascript", "main.js"),
            Language::Shell => ("bash", "main.sh"),
        }
    }
}

#[async_trait]
impl ExecutionProvider for PistonProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    async fn execute(&self, job: &ExecutionJob) -> std::result::Result<ProviderOutput, ProviderError> {
        let started = Instant::now();
        let (runtime, file_name) = Self::runtime(job.language);
        let body = PistonRequest {
            language: runtime,
            version: "*",
            files: vec![PistonFile {
                name: file_name,
                content: &job.code,
            }],
            stdin: job.stdin.as_deref().unwrap_or(""),
            run_timeout: job.limits.timeout_ms,
            run_memory_limit: i64::try_from(job.limits.memory_mb * 1024 * 1024).unwrap_or(-1),
        };

        let request = self
            .client
            .post(format!("{}/execute", self.base_url))
            .header("Authorization", self.api_key.expose_secret())
            .json(&body);
        let response: PistonResponse = send_json(request).await?;

        // A failed compile stage means the run never happened
        if let Some(compile) = response.compile.filter(|c| c.code.is_some_and(|code| code != 0)) {
            return Ok(ProviderOutput {
                stdout: compile.stdout,
                stderr: compile.stderr,
                exit: ExitStatus::Code(compile.code.unwrap_or(1)),
                execution_time_ms: Some(started.elapsed().as_millis() as u64),
                memory_used_mb: None,
                warnings: Vec::new(),
            });
        }

        let run = response.run;
        let exit = match (run.signal, run.code) {
            (Some(signal), _) => ExitStatus::Signal(signal),
            (None, Some(code)) => ExitStatus::Code(code),
            (None, None) => ExitStatus::Unknown,
        };

        Ok(ProviderOutput {
            stdout: run.stdout,
            stderr: run.stderr,
            exit,
            execution_time_ms: Some(started.elapsed().as_millis() as u64),
            memory_used_mb: None,
            warnings: Vec::new(),
        })
    }
}
