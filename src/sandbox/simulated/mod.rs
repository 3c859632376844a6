//! Simulated fallback provider
//!
//! Used only after every real provider has failed. Output comes from a
//! local interpreter when one is enabled and the snippet is clean, and from
//! static evaluation otherwise. Static evaluation cannot fail for a
//! supported language, so the fallback always produces a result.

mod expr;
mod script;

pub use script::{simulate, Simulation};

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::executor::{
    ExecutionJob, ExecutionProvider, Isolation, ProviderError, ProviderOutput,
};
use super::local::LocalRuntime;
use crate::security::CodeWrapper;

/// Provider id attributed to every simulated result
pub const SIMULATED_PROVIDER_ID: &str = "simulated";

/// Deterministic last-resort provider
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    local: Option<LocalRuntime>,
    wrapper: CodeWrapper,
}

impl SimulatedProvider {
    /// Static evaluation only
    pub fn new() -> Self {
        SimulatedProvider::default()
    }

    /// Prefer a local interpreter for clean snippets
    pub fn with_local_runtime(mut self, runtime: LocalRuntime) -> Self {
        self.local = Some(runtime);
        self
    }

    async fn try_local(&self, job: &ExecutionJob) -> Option<ProviderOutput> {
        let runtime = self.local.as_ref()?;
        if job.flagged || LocalRuntime::interpreter(job.language).is_none() {
            return None;
        }

        let wrapped = self
            .wrapper
            .wrap(&job.code, job.language, job.stdin.as_deref(), &job.limits);
        let timeout = Duration::from_millis(job.limits.timeout_ms);

        match runtime
            .run(&wrapped, job.language, timeout, job.limits.max_output_bytes)
            .await
        {
            Ok(output) => Some(output.with_warning("Executed by a local interpreter without kernel isolation")),
            Err(e) => {
                warn!(
                    "Local runtime failed for {}, using static evaluation: {}",
                    job.execution_id, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl ExecutionProvider for SimulatedProvider {
    fn id(&self) -> &str {
        SIMULATED_PROVIDER_ID
    }

    fn isolation(&self) -> Isolation {
        Isolation::WrapperOnly
    }

    async fn execute(&self, job: &ExecutionJob) -> Result<ProviderOutput, ProviderError> {
        if let Some(output) = self.try_local(job).await {
            return Ok(output);
        }

        let started = Instant::now();
        let sim = simulate(&job.code, job.language, job.stdin.as_deref());
        debug!(
            "Simulated {} for {}: exit {}, {} statement(s) skipped",
            job.language, job.execution_id, sim.exit_code, sim.skipped
        );

        let mut output = ProviderOutput::exited(sim.stdout, sim.stderr, sim.exit_code);
        output.execution_time_ms = Some(started.elapsed().as_millis() as u64);
        if sim.skipped > 0 {
            output = output.with_warning(format!(
                "Simulation skipped {} statement(s) it could not evaluate",
                sim.skipped
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ResourceLimitPolicy, Tier};
    use crate::sandbox::{ExitStatus, Language};

    fn job(code: &str, language: Language) -> ExecutionJob {
        ExecutionJob {
            execution_id: "exec-sim".to_string(),
            code: code.to_string(),
            language,
            limits: ResourceLimitPolicy::default().limits_for(Tier::Free),
            stdin: None,
            flagged: false,
        }
    }

    #[tokio::test]
    async fn test_static_evaluation() {
        let provider = SimulatedProvider::new();
        assert_eq!(provider.id(), "simulated");

        let output = provider
            .execute(&job("print(1+1)", Language::Python))
            .await
            .unwrap();
        assert_eq!(output.stdout, "2\n");
        assert_eq!(output.exit, ExitStatus::Code(0));
        assert!(output.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_statements_are_reported() {
        let output = SimulatedProvider::new()
            .execute(&job("import json\nprint(json.dumps({}))\nprint('x')", Language::Python))
            .await
            .unwrap();
        assert_eq!(output.stdout, "x\n");
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("skipped 1 statement"));
    }

    #[tokio::test]
    async fn test_flagged_job_never_runs_locally() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new().with_local_runtime(LocalRuntime::new(dir.path().to_path_buf()));

        let mut flagged = job("echo $((6 * 7))", Language::Shell);
        flagged.flagged = true;
        let output = provider.execute(&flagged).await.unwrap();

        assert_eq!(output.stdout, "42\n");
        assert!(output.warnings.iter().all(|w| !w.contains("local interpreter")));
    }

    #[tokio::test]
    async fn test_local_runtime_when_enabled() {
        if LocalRuntime::interpreter(Language::Shell).is_none() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let provider = SimulatedProvider::new().with_local_runtime(LocalRuntime::new(dir.path().to_path_buf()));

        let mut clean = job("read line; echo \"got $line\"", Language::Shell);
        clean.stdin = Some("abc".to_string());
        let output = provider.execute(&clean).await.unwrap();

        assert_eq!(output.stdout, "got abc\n");
        assert!(output.warnings[0].contains("local interpreter"));
    }
}
