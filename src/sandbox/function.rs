//! Function runner adapter (tertiary)
//!
//! The runner executes source in a plain language runtime. Unless the
//! config says otherwise it has no kernel sandbox, so it reports
//! [`Isolation::WrapperOnly`] and receives wrapped code.

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
struct RunRequest<'a> {
    runtime: &'a str,
    source: &'a str,
    stdin: &'a str,
    limits: RunLimits,
}

#[derive(Debug, Serialize)]
struct RunLimits {
    timeout_ms: u64,
    memory_mb: u64,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: Option<String>,
    duration_ms: Option<u64>,
}

/// Tertiary provider over a function runner's `/run` endpoint
pub struct FunctionRunnerProvider {
    id: String,
    base_url: String,
    api_key: SecretString,
    isolation: Isolation,
    client: Client,
}

impl FunctionRunnerProvider {
    pub fn new(config: &RemoteProviderConfig) -> Result<Self> {
        let role = ProviderRole::Tertiary;
        let native = config
            .native_isolation
            .unwrap_or(role.default_native_isolation());
        Ok(FunctionRunnerProvider {
            id: config.id.clone().unwrap_or_else(|| role.default_id().to_string()),
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            isolation: if native { Isolation::Kernel } else { Isolation::WrapperOnly },
            client: http_client()?,
        })
    }

    fn runtime(language: Language) -> &'static str {
        match language {
            Language::Python => "python3",
            Language::JavaScript => "nodejs",
            Language::Shell => "bash",
        }
    }
}

#[async_trait]
impl ExecutionProvider for FunctionRunnerProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    async fn execute(&self, job: &ExecutionJob) -> std::result::Result<ProviderOutput, ProviderError> {
        let started = Instant::now();
        let body = RunRequest {
            runtime: Self::runtime(job.language),
            source: &job.code,
            stdin: job.stdin.as_deref().unwrap_or(""),
            limits: RunLimits {
                timeout_ms: job.limits.timeout_ms,
                memory_mb: job.limits.memory_mb,
            },
        };

        let request = self
            .client
            .post(format!("{}/run", self.base_url))
            .header("X-Api-Key", self.api_key.expose_secret())
            .json(&body);
        let response: RunResponse = send_json(request).await?;

        Ok(ProviderOutput {
            stdout: response.output,
            stderr: response.error.unwrap_or_default(),
            exit: response
                .status
                .map(ExitStatus::Status)
                .unwrap_or(ExitStatus::Unknown),
            execution_time_ms: response
                .duration_ms
                .or_else(|| Some(started.elapsed().as_millis() as u64)),
            memory_used_mb: None,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ResourceLimitPolicy, Tier};
    use crate::sandbox::FailureKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> ExecutionJob {
        ExecutionJob {
            execution_id: "exec-3".to_string(),
            code: "wrapped source".to_string(),
            language: Language::JavaScript,
            limits: ResourceLimitPolicy::default().limits_for(Tier::Enterprise),
            stdin: None,
            flagged: false,
        }
    }

    fn provider(server: &MockServer) -> FunctionRunnerProvider {
        FunctionRunnerProvider::new(&RemoteProviderConfig::new(server.uri(), "runner-key")).unwrap()
    }

    #[test]
    fn test_defaults_to_wrapper_only() {
        let config = RemoteProviderConfig::new("https://runner.example", "key");
        let provider = FunctionRunnerProvider::new(&config).unwrap();
        assert_eq!(provider.isolation(), Isolation::WrapperOnly);
        assert_eq!(provider.id(), "function-runner");

        let native = RemoteProviderConfig {
            native_isolation: Some(true),
            id: Some("runner-eu".to_string()),
            ..config
        };
        let provider = FunctionRunnerProvider::new(&native).unwrap();
        assert_eq!(provider.isolation(), Isolation::Kernel);
        assert_eq!(provider.id(), "runner-eu");
    }

    #[tokio::test]
    async fn test_execute_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .and(header("x-api-key", "runner-key"))
            .and(body_partial_json(serde_json::json!({
                "runtime": "nodejs",
                "source": "wrapped source",
                "stdin": "",
                "limits": { "timeout_ms": 120000, "memory_mb": 2048 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "2\n",
                "error": null,
                "status": "ok",
                "duration_ms": 17
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = provider(&server).execute(&job()).await.unwrap();
        assert_eq!(output.stdout, "2\n");
        assert_eq!(output.stderr, "");
        assert_eq!(output.exit, ExitStatus::Status("ok".to_string()));
        assert_eq!(output.execution_time_ms, Some(17));
    }

    #[tokio::test]
    async fn test_timeout_status_is_a_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "",
                "error": "Task timed out",
                "status": "timeout"
            })))
            .mount(&server)
            .await;

        let output = provider(&server).execute(&job()).await.unwrap();
        assert_eq!(output.exit, ExitStatus::Status("timeout".to_string()));
        assert_eq!(output.stderr, "Task timed out");
    }

    #[tokio::test]
    async fn test_bad_key_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server).execute(&job()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }
}
