//! Session sandbox adapter (primary)
//!
//! Creates a sandbox per run, executes the job inside it and tears it down
//! again. Sandboxes still alive when an attempt is abandoned are removed by
//! [`ExecutionProvider::cancel`], or by the attempt's lease when its future
//! is dropped.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

use super::executor::{
    ExecutionJob, ExecutionProvider, ExitStatus, Isolation, ProviderError, ProviderOutput,
};
use super::{http_client, send_json};
use crate::config::{ProviderRole, RemoteProviderConfig};
use crate::error::Result;

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    language: &'a str,
    timeout_ms: u64,
    memory_mb: u64,
    cpu_shares: u32,
    metadata: SandboxMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct SandboxMetadata<'a> {
    execution_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdin: Option<&'a str>,
    timeout_ms: u64,
    memory_mb: u64,
    cpu_shares: u32,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    exit_code: Option<i32>,
    memory_used_mb: Option<f64>,
    execution_time_ms: Option<u64>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// execution id -> sandbox id
type ActiveSandboxes = Arc<Mutex<HashMap<String, String>>>;

fn lock(active: &ActiveSandboxes) -> MutexGuard<'_, HashMap<String, String>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// HTTP side of the sandbox API
struct SandboxApi {
    base_url: String,
    api_key: SecretString,
    client: Client,
}

/// Primary provider over a session sandbox API
pub struct SessionSandboxProvider {
    id: String,
    isolation: Isolation,
    api: Arc<SandboxApi>,
    active: ActiveSandboxes,
}

impl SessionSandboxProvider {
    pub fn new(config: &RemoteProviderConfig) -> Result<Self> {
        let role = ProviderRole::Primary;
        let native = config
            .native_isolation
            .unwrap_or(role.default_native_isolation());
        Ok(SessionSandboxProvider {
            id: config.id.clone().unwrap_or_else(|| role.default_id().to_string()),
            isolation: if native { Isolation::Kernel } else { Isolation::WrapperOnly },
            api: Arc::new(SandboxApi {
                base_url: config.base_url().to_string(),
                api_key: config.api_key.clone(),
                client: http_client()?,
            }),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Track `sandbox_id` until the returned lease is released or dropped
    fn lease(&self, execution_id: &str, sandbox_id: &str) -> SandboxLease {
        lock(&self.active).insert(execution_id.to_string(), sandbox_id.to_string());
        SandboxLease {
            execution_id: execution_id.to_string(),
            sandbox_id: sandbox_id.to_string(),
            active: Arc::clone(&self.active),
            api: Arc::clone(&self.api),
        }
    }
}

impl SandboxApi {
    async fn create_sandbox(&self, job: &ExecutionJob) -> std::result::Result<String, ProviderError> {
        let body = CreateSandboxRequest {
            language: job.language.as_str(),
            timeout_ms: job.limits.timeout_ms,
            memory_mb: job.limits.memory_mb,
            cpu_shares: job.limits.cpu_shares,
            metadata: SandboxMetadata {
                execution_id: &job.execution_id,
            },
        };
        let request = self
            .client
            .post(format!("{}/sandboxes", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        let created: CreateSandboxResponse = send_json(request).await?;
        Ok(created.id)
    }

    async fn run_in_sandbox(
        &self,
        sandbox_id: &str,
        job: &ExecutionJob,
    ) -> std::result::Result<ExecuteResponse, ProviderError> {
        let body = ExecuteRequest {
            code: &job.code,
            language: job.language.as_str(),
            stdin: job.stdin.as_deref(),
            timeout_ms: job.limits.timeout_ms,
            memory_mb: job.limits.memory_mb,
            cpu_shares: job.limits.cpu_shares,
        };
        let request = self
            .client
            .post(format!("{}/sandboxes/{}/execute", self.base_url, sandbox_id))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        send_json(request).await
    }

    async fn destroy_sandbox(&self, sandbox_id: &str) {
        let result = self
            .client
            .delete(format!("{}/sandboxes/{}", self.base_url, sandbox_id))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Destroyed sandbox {}", sandbox_id);
            }
            Ok(response) => warn!(
                "Failed to destroy sandbox {}: HTTP {}",
                sandbox_id,
                response.status()
            ),
            Err(e) => warn!("Failed to destroy sandbox {}: {}", sandbox_id, e),
        }
    }
}

/// A live sandbox owned by one attempt. Whoever removes the map entry first
/// (the lease or `cancel`) destroys the sandbox.
struct SandboxLease {
    execution_id: String,
    sandbox_id: String,
    active: ActiveSandboxes,
    api: Arc<SandboxApi>,
}

impl SandboxLease {
    /// Destroy the sandbox now, unless `cancel` already did
    async fn release(self) {
        let claimed = lock(&self.active).remove(&self.execution_id).is_some();
        if claimed {
            self.api.destroy_sandbox(&self.sandbox_id).await;
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if lock(&self.active).remove(&self.execution_id).is_none() {
            return;
        }
        debug!(
            "Attempt for {} dropped, destroying sandbox {} in the background",
            self.execution_id, self.sandbox_id
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let api = Arc::clone(&self.api);
                let sandbox_id = std::mem::take(&mut self.sandbox_id);
                handle.spawn(async move { api.destroy_sandbox(&sandbox_id).await });
            }
            Err(_) => warn!("No runtime left to destroy sandbox {}", self.sandbox_id),
        }
    }
}

#[async_trait]
impl ExecutionProvider for SessionSandboxProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    async fn execute(&self, job: &ExecutionJob) -> std::result::Result<ProviderOutput, ProviderError> {
        let started = Instant::now();
        let sandbox_id = self.api.create_sandbox(job).await?;
        debug!(
            "Created sandbox {} for execution {}",
            sandbox_id, job.execution_id
        );

        let lease = self.lease(&job.execution_id, &sandbox_id);
        let result = self.api.run_in_sandbox(&sandbox_id, job).await;
        lease.release().await;

        let response = result?;
        Ok(ProviderOutput {
            stdout: response.stdout,
            stderr: response.stderr,
            exit: response
                .exit_code
                .map(ExitStatus::Code)
                .unwrap_or(ExitStatus::Unknown),
            execution_time_ms: response
                .execution_time_ms
                .or_else(|| Some(started.elapsed().as_millis() as u64)),
            memory_used_mb: response.memory_used_mb,
            warnings: response.warnings,
        })
    }

    async fn cancel(&self, execution_id: &str) {
        let sandbox_id = lock(&self.active).remove(execution_id);
        if let Some(sandbox_id) = sandbox_id {
            debug!(
                "Cancelling execution {} in sandbox {}",
                execution_id, sandbox_id
            );
            self.api.destroy_sandbox(&sandbox_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ResourceLimitPolicy, Tier};
    use crate::sandbox::{FailureKind, Language};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(code: &str) -> ExecutionJob {
        ExecutionJob {
            execution_id: "exec-1".to_string(),
            code: code.to_string(),
            language: Language::Python,
            limits: ResourceLimitPolicy::default().limits_for(Tier::Free),
            stdin: Some("input".to_string()),
            flagged: false,
        }
    }

    fn provider(server: &MockServer) -> SessionSandboxProvider {
        SessionSandboxProvider::new(&RemoteProviderConfig::new(server.uri(), "secret")).unwrap()
    }

    async fn mount_create(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "language": "python",
                "memory_mb": 128,
                "metadata": { "execution_id": "exec-1" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "sb-1" })))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_delete(server: &MockServer) {
        Mock::given(method("DELETE"))
            .and(path("/sandboxes/sb-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_execute_creates_runs_and_destroys() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-1/execute"))
            .and(body_partial_json(serde_json::json!({
                "code": "print(1+1)",
                "stdin": "input",
                "timeout_ms": 10000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stdout": "2\n",
                "stderr": "",
                "exit_code": 0,
                "memory_used_mb": 12.5,
                "warnings": ["slow start"]
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_delete(&server).await;

        let provider = provider(&server);
        let output = provider.execute(&job("print(1+1)")).await.unwrap();

        assert_eq!(output.stdout, "2\n");
        assert_eq!(output.exit, ExitStatus::Code(0));
        assert_eq!(output.memory_used_mb, Some(12.5));
        assert_eq!(output.warnings, vec!["slow start".to_string()]);
        assert!(provider.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_transient_and_sandbox_is_destroyed() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-1/execute"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        mount_delete(&server).await;

        let err = provider(&server).execute(&job("print(1)")).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn test_rejected_create_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unsupported language"))
            .mount(&server)
            .await;

        let err = provider(&server).execute(&job("print(1)")).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_malformed_response_is_permanent() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-1/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        mount_delete(&server).await;

        let err = provider(&server).execute(&job("print(1)")).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }

    #[tokio::test]
    async fn test_cancel_destroys_tracked_sandbox() {
        let server = MockServer::start().await;
        mount_delete(&server).await;

        let provider = provider(&server);
        provider
            .active
            .lock()
            .unwrap()
            .insert("exec-1".to_string(), "sb-1".to_string());

        provider.cancel("exec-1").await;
        provider.cancel("unknown").await;
        assert!(provider.active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_attempt_destroys_sandbox() {
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sb-1/execute"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "stdout": "", "exit_code": 0 }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        mount_delete(&server).await;

        let provider = provider(&server);
        let attempt = tokio::time::timeout(Duration::from_millis(300), provider.execute(&job("print(1)"))).await;
        assert!(attempt.is_err());
        assert!(provider.active.lock().unwrap().is_empty());

        let mut deleted = false;
        for _ in 0..50 {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.method.as_str() == "DELETE") {
                deleted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(deleted);

        // Nothing left for a late cancel to do
        provider.cancel("exec-1").await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let config = RemoteProviderConfig::new("http://127.0.0.1:1", "secret");
        let provider = SessionSandboxProvider::new(&config).unwrap();
        let err = provider.execute(&job("print(1)")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
