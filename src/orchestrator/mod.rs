//! Execution orchestration
//!
//! Each request moves through an explicit sequence of stages:
//!
//! ```text
//! Init -> SecurityGate -> Blocked
//!                      -> Attempting -> Done
//! ```
//!
//! `Init` validates the request, `SecurityGate` scans it, `Attempting` walks
//! the provider list in priority order (each provider at most once) and
//! finally the simulated fallback. Provider failures are values collected
//! along the way; they never abort the request.

mod assembler;

pub use assembler::{
    normalize_exit, truncate_utf8, ExecutionResult, ProducedOutput, ResultAssembler,
    SIMULATION_NOTICE, STDERR_CEILING_BYTES,
};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audit::{ExecutionRecord, ExecutionStatus, UsageLedger};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::limits::{ResourceLimitPolicy, ResourceLimits, Tier};
use crate::sandbox::{
    create_fallback, create_providers, ExecutionJob, ExecutionProvider, ExecutionRequest,
    ExitStatus, FailureKind, Isolation, Language, ProviderError, ProviderOutput,
    SIMULATED_PROVIDER_ID,
};
use crate::security::{has_critical, CodeWrapper, SecurityFinding, SecurityScanner};

/// Largest accepted snippet
pub const MAX_CODE_BYTES: usize = 100 * 1024;

/// Default allowance on top of the tier timeout for each attempt
pub const DEFAULT_ATTEMPT_OVERHEAD: Duration = Duration::from_secs(5);

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub tier: Tier,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, tier: Tier) -> Self {
        Caller {
            user_id: user_id.into(),
            tier,
        }
    }
}

/// A provider attempt that did not produce a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Orchestration stages
#[derive(Debug)]
enum Stage {
    Init,
    SecurityGate {
        language: Language,
        limits: ResourceLimits,
    },
    Blocked {
        findings: Vec<SecurityFinding>,
    },
    Attempting {
        language: Language,
        limits: ResourceLimits,
        findings: Vec<SecurityFinding>,
    },
    Done {
        limits: ResourceLimits,
        findings: Vec<SecurityFinding>,
        produced: ProducedOutput,
        failures: Vec<ProviderFailure>,
    },
}

/// Runs requests against the provider chain
pub struct ExecutionOrchestrator {
    scanner: SecurityScanner,
    policy: ResourceLimitPolicy,
    wrapper: CodeWrapper,
    assembler: ResultAssembler,
    providers: Vec<Arc<dyn ExecutionProvider>>,
    fallback: Arc<dyn ExecutionProvider>,
    ledger: Arc<dyn UsageLedger>,
    attempt_overhead: Duration,
}

impl ExecutionOrchestrator {
    /// Orchestrator over `providers` in the given priority order, with the
    /// static simulated fallback
    pub fn new(
        policy: ResourceLimitPolicy,
        providers: Vec<Arc<dyn ExecutionProvider>>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        ExecutionOrchestrator {
            scanner: SecurityScanner::new(),
            policy,
            wrapper: CodeWrapper::new(),
            assembler: ResultAssembler::new(),
            providers,
            fallback: Arc::new(crate::sandbox::SimulatedProvider::new()),
            ledger,
            attempt_overhead: DEFAULT_ATTEMPT_OVERHEAD,
        }
    }

    /// Build everything from configuration
    pub fn from_config(config: &Config, ledger: Arc<dyn UsageLedger>) -> Result<Self> {
        let policy = ResourceLimitPolicy::new(config.limits.tiers.clone())?;
        let providers = create_providers(&config.providers)?;
        let fallback = create_fallback(&config.providers);

        Ok(ExecutionOrchestrator::new(policy, providers, ledger)
            .with_fallback(Arc::new(fallback))
            .with_attempt_overhead(config.providers.attempt_overhead))
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ExecutionProvider>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_attempt_overhead(mut self, overhead: Duration) -> Self {
        self.attempt_overhead = overhead;
        self
    }

    /// Ids of the real providers in priority order
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn policy(&self) -> &ResourceLimitPolicy {
        &self.policy
    }

    /// Execute a request for `caller`.
    ///
    /// Returns [`Error::InvalidInput`] for malformed requests,
    /// [`Error::SecurityBlocked`] when a critical pattern matched and
    /// [`Error::Internal`] if orchestration itself broke. Provider outages
    /// are not errors: the simulated fallback answers instead.
    pub async fn execute(&self, request: ExecutionRequest, caller: &Caller) -> Result<ExecutionResult> {
        let execution_id = uuid::Uuid::new_v4().to_string();

        let run = AssertUnwindSafe(self.run(&execution_id, &request, caller))
            .catch_unwind()
            .await;

        match run {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Execution {} panicked: {}", execution_id, detail);

                let mut record = ExecutionRecord::new(
                    &execution_id,
                    &caller.user_id,
                    caller.tier,
                    &request.language,
                    ExecutionStatus::Failed,
                );
                record.task_id = request.task_id.clone();
                record.sandbox_id = request.sandbox_id.clone();
                self.write_record(record).await;

                Err(Error::Internal("Internal server error".to_string()))
            }
        }
    }

    async fn run(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        caller: &Caller,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let mut stage = Stage::Init;

        loop {
            stage = match stage {
                Stage::Init => {
                    let (language, limits) = self.validate(request, caller.tier)?;
                    debug!(
                        "Execution {} for {} ({}): {} bytes of {}, timeout {} ms",
                        execution_id,
                        caller.user_id,
                        caller.tier,
                        request.code.len(),
                        language,
                        limits.timeout_ms
                    );
                    Stage::SecurityGate { language, limits }
                }

                Stage::SecurityGate { language, limits } => {
                    let findings = self.scanner.scan(&request.code, language);
                    if has_critical(&findings) {
                        Stage::Blocked { findings }
                    } else {
                        Stage::Attempting {
                            language,
                            limits,
                            findings,
                        }
                    }
                }

                Stage::Blocked { findings } => {
                    let messages: Vec<String> = findings.iter().map(SecurityFinding::message).collect();
                    warn!(
                        "Execution {} blocked for {}: {}",
                        execution_id,
                        caller.user_id,
                        messages.join("; ")
                    );

                    let mut record = self.record(execution_id, request, caller, ExecutionStatus::Blocked);
                    record.security_warnings = messages.clone();
                    record.execution_time_ms = started.elapsed().as_millis() as u64;
                    self.write_record(record).await;

                    return Err(Error::SecurityBlocked { findings: messages });
                }

                Stage::Attempting {
                    language,
                    limits,
                    findings,
                } => {
                    let flagged = !findings.is_empty();
                    let (produced, failures) = self
                        .attempt(execution_id, request, language, &limits, flagged)
                        .await;
                    Stage::Done {
                        limits,
                        findings,
                        produced,
                        failures,
                    }
                }

                Stage::Done {
                    limits,
                    findings,
                    produced,
                    failures,
                } => {
                    let result = self
                        .assembler
                        .assemble(execution_id, produced, &findings, &limits);

                    info!(
                        "Execution {} completed by {} (exit {}, {} ms, {} failed attempt(s))",
                        execution_id,
                        result.provider_id,
                        result.exit_code,
                        result.execution_time_ms,
                        failures.len()
                    );

                    let mut record = self.record(execution_id, request, caller, ExecutionStatus::Completed);
                    record.provider_id = Some(result.provider_id.clone());
                    record.exit_code = Some(result.exit_code);
                    record.execution_time_ms = result.execution_time_ms;
                    record.truncated = result.truncated;
                    record.security_warnings = result.security_warnings.clone();
                    record.provider_failures = failures;
                    self.write_record(record).await;

                    return Ok(result);
                }
            };
        }
    }

    /// Check the request shape and resolve the effective limits
    fn validate(&self, request: &ExecutionRequest, tier: Tier) -> Result<(Language, ResourceLimits)> {
        if request.code.trim().is_empty() {
            return Err(Error::InvalidInput("Code is required".to_string()));
        }
        if request.code.len() > MAX_CODE_BYTES {
            return Err(Error::InvalidInput(format!(
                "Code is {} bytes; the limit is {} bytes",
                request.code.len(),
                MAX_CODE_BYTES
            )));
        }
        let language: Language = request.language.parse()?;
        if request.requested_timeout_ms == Some(0) {
            return Err(Error::InvalidInput("timeout_ms must be greater than zero".to_string()));
        }

        Ok((language, self.policy.effective_limits(tier, request.requested_timeout_ms)))
    }

    /// Try each provider once, then the fallback
    async fn attempt(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        language: Language,
        limits: &ResourceLimits,
        flagged: bool,
    ) -> (ProducedOutput, Vec<ProviderFailure>) {
        let mut failures = Vec::new();
        let bound = Duration::from_millis(limits.timeout_ms) + self.attempt_overhead;

        for provider in &self.providers {
            let provider_id = provider.id().to_string();

            if !provider.supports_language(language) {
                let err = ProviderError::permanent(format!("{} is not supported", language));
                record_failure(&mut failures, execution_id, &provider_id, err);
                continue;
            }

            let job = match provider.isolation() {
                Isolation::WrapperOnly if flagged => {
                    let err = ProviderError::permanent(
                        "Refused: provider lacks kernel isolation and the code has security warnings",
                    );
                    record_failure(&mut failures, execution_id, &provider_id, err);
                    continue;
                }
                Isolation::WrapperOnly => ExecutionJob {
                    execution_id: execution_id.to_string(),
                    code: self
                        .wrapper
                        .wrap(&request.code, language, request.stdin.as_deref(), limits),
                    language,
                    limits: *limits,
                    stdin: None,
                    flagged,
                },
                Isolation::Kernel => ExecutionJob {
                    execution_id: execution_id.to_string(),
                    code: request.code.clone(),
                    language,
                    limits: *limits,
                    stdin: request.stdin.clone(),
                    flagged,
                },
            };

            debug!(
                "Execution {}: trying {} (bound {} ms)",
                execution_id,
                provider_id,
                bound.as_millis()
            );
            let attempt_started = Instant::now();

            match tokio::time::timeout(bound, provider.execute(&job)).await {
                Ok(Ok(output)) => {
                    let produced = ProducedOutput {
                        provider_id,
                        output,
                        simulated: false,
                        elapsed_ms: attempt_started.elapsed().as_millis() as u64,
                    };
                    return (produced, failures);
                }
                Ok(Err(err)) => record_failure(&mut failures, execution_id, &provider_id, err),
                Err(_) => {
                    let err = ProviderError::transient(format!(
                        "No response within {} ms",
                        bound.as_millis()
                    ));
                    record_failure(&mut failures, execution_id, &provider_id, err);

                    let provider = Arc::clone(provider);
                    let id = execution_id.to_string();
                    tokio::spawn(async move {
                        provider.cancel(&id).await;
                    });
                }
            }
        }

        if !self.providers.is_empty() {
            warn!(
                "Execution {}: all {} provider(s) failed, using simulated fallback",
                execution_id,
                self.providers.len()
            );
        }

        let job = ExecutionJob {
            execution_id: execution_id.to_string(),
            code: request.code.clone(),
            language,
            limits: *limits,
            stdin: request.stdin.clone(),
            flagged,
        };
        let attempt_started = Instant::now();
        let output = match tokio::time::timeout(bound, self.fallback.execute(&job)).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                error!("Execution {}: simulated fallback failed: {}", execution_id, err);
                ProviderOutput::exited("", err.message, 1)
            }
            Err(_) => {
                error!("Execution {}: simulated fallback timed out", execution_id);
                ProviderOutput {
                    exit: ExitStatus::Status("timeout".to_string()),
                    ..ProviderOutput::exited("", "", 0)
                }
            }
        };

        let produced = ProducedOutput {
            provider_id: SIMULATED_PROVIDER_ID.to_string(),
            output,
            simulated: true,
            elapsed_ms: attempt_started.elapsed().as_millis() as u64,
        };
        (produced, failures)
    }

    fn record(
        &self,
        execution_id: &str,
        request: &ExecutionRequest,
        caller: &Caller,
        status: ExecutionStatus,
    ) -> ExecutionRecord {
        let mut record = ExecutionRecord::new(
            execution_id,
            &caller.user_id,
            caller.tier,
            request.language.trim().to_lowercase(),
            status,
        );
        record.task_id = request.task_id.clone();
        record.sandbox_id = request.sandbox_id.clone();
        record
    }

    /// Ledger writes never fail a request
    async fn write_record(&self, record: ExecutionRecord) {
        let execution_id = record.execution_id.clone();
        if let Err(e) = self.ledger.record_execution(record).await {
            error!("Failed to record execution {}: {}", execution_id, e);
        }
    }
}

fn record_failure(
    failures: &mut Vec<ProviderFailure>,
    execution_id: &str,
    provider_id: &str,
    err: ProviderError,
) {
    match err.kind {
        FailureKind::Transient => warn!(
            "Execution {}: provider {} failed transiently: {}",
            execution_id, provider_id, err.message
        ),
        FailureKind::Permanent => error!(
            "Execution {}: provider {} failed permanently: {}",
            execution_id, provider_id, err.message
        ),
    }
    failures.push(ProviderFailure {
        provider_id: provider_id.to_string(),
        kind: err.kind,
        message: err.message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    enum Behavior {
        Succeed(ProviderOutput),
        Fail(ProviderError),
        Hang,
        Panic,
    }

    struct FakeProvider {
        id: String,
        isolation: Isolation,
        behavior: Behavior,
        calls: AtomicUsize,
        cancels: Arc<AtomicUsize>,
        last_job: Mutex<Option<ExecutionJob>>,
    }

    impl FakeProvider {
        fn new(id: &str, behavior: Behavior) -> Arc<Self> {
            Self::with_isolation(id, behavior, Isolation::Kernel)
        }

        fn with_isolation(id: &str, behavior: Behavior, isolation: Isolation) -> Arc<Self> {
            Arc::new(FakeProvider {
                id: id.to_string(),
                isolation,
                behavior,
                calls: AtomicUsize::new(0),
                cancels: Arc::new(AtomicUsize::new(0)),
                last_job: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExecutionProvider for FakeProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn isolation(&self) -> Isolation {
            self.isolation
        }

        async fn execute(&self, job: &ExecutionJob) -> std::result::Result<ProviderOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_job.lock().await = Some(job.clone());
            match &self.behavior {
                Behavior::Succeed(output) => Ok(output.clone()),
                Behavior::Fail(err) => Err(err.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::transient("unreachable"))
                }
                Behavior::Panic => panic!("provider exploded"),
            }
        }

        async fn cancel(&self, _execution_id: &str) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn orchestrator(
        providers: Vec<Arc<FakeProvider>>,
        ledger: Arc<MemoryLedger>,
    ) -> ExecutionOrchestrator {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn ExecutionProvider>)
            .collect();
        ExecutionOrchestrator::new(ResourceLimitPolicy::default(), providers, ledger)
    }

    fn free() -> Caller {
        Caller::new("user-1", Tier::Free)
    }

    fn transient() -> Behavior {
        Behavior::Fail(ProviderError::transient("connection refused"))
    }

    #[tokio::test]
    async fn test_critical_pattern_never_reaches_a_provider() {
        let provider = FakeProvider::new("p1", Behavior::Succeed(ProviderOutput::exited("", "", 0)));
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![provider.clone()], ledger.clone());

        let err = orch
            .execute(ExecutionRequest::new(":(){ :|:& };:", "shell"), &free())
            .await
            .unwrap_err();

        match err {
            Error::SecurityBlocked { findings } => {
                assert!(findings[0].starts_with("Critical pattern detected"));
            }
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(provider.calls(), 0);

        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Blocked);
        assert!(records[0].provider_id.is_none());
    }

    #[tokio::test]
    async fn test_root_deletion_scenario_is_blocked() {
        let provider = FakeProvider::new("p1", Behavior::Succeed(ProviderOutput::exited("", "", 0)));
        let orch = orchestrator(vec![provider.clone()], Arc::new(MemoryLedger::new()));

        let err = orch
            .execute(ExecutionRequest::new("rm -rf /", "shell"), &free())
            .await
            .unwrap_err();

        let Error::SecurityBlocked { findings } = err else {
            panic!("expected block");
        };
        assert!(findings
            .iter()
            .any(|f| f == "Critical pattern detected: Recursive deletion of the filesystem root"));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_warning_pattern_still_executes() {
        let provider = FakeProvider::new("p1", Behavior::Succeed(ProviderOutput::exited("ok\n", "", 0)));
        let orch = orchestrator(vec![provider.clone()], Arc::new(MemoryLedger::new()));

        let result = orch
            .execute(
                ExecutionRequest::new("const cp = require('child_process');", "javascript"),
                &free(),
            )
            .await
            .unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(result.stdout, "ok\n");
        assert_eq!(
            result.security_warnings,
            vec!["Warning: Process spawning via child_process".to_string()]
        );
        assert!(provider.last_job.lock().await.as_ref().unwrap().flagged);
    }

    #[tokio::test]
    async fn test_second_provider_is_attributed() {
        let p1 = FakeProvider::new("p1", transient());
        let p2 = FakeProvider::new("p2", Behavior::Succeed(ProviderOutput::exited("from p2\n", "", 0)));
        let p3 = FakeProvider::new("p3", Behavior::Succeed(ProviderOutput::exited("from p3\n", "", 0)));
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![p1.clone(), p2.clone(), p3.clone()], ledger.clone());

        let result = orch
            .execute(ExecutionRequest::new("print('x')", "python"), &free())
            .await
            .unwrap();

        assert_eq!(result.provider_id, "p2");
        assert_eq!(result.stdout, "from p2\n");
        assert_eq!((p1.calls(), p2.calls(), p3.calls()), (1, 1, 0));

        let records = ledger.records().await;
        assert_eq!(records[0].status, ExecutionStatus::Completed);
        assert_eq!(records[0].provider_id.as_deref(), Some("p2"));
        assert_eq!(records[0].provider_failures.len(), 1);
        assert_eq!(records[0].provider_failures[0].kind, FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_permanent_failure_also_falls_through() {
        let p1 = FakeProvider::new("p1", Behavior::Fail(ProviderError::permanent("bad request")));
        let p2 = FakeProvider::new("p2", Behavior::Succeed(ProviderOutput::exited("", "", 0)));
        let orch = orchestrator(vec![p1.clone(), p2.clone()], Arc::new(MemoryLedger::new()));

        let result = orch
            .execute(ExecutionRequest::new("echo hi", "bash"), &free())
            .await
            .unwrap();
        assert_eq!(result.provider_id, "p2");
        assert_eq!(p1.calls(), 1);
    }

    #[tokio::test]
    async fn test_output_truncated_to_tier_ceiling() {
        let max = ResourceLimitPolicy::default().limits_for(Tier::Free).max_output_bytes;
        let p1 = FakeProvider::new(
            "p1",
            Behavior::Succeed(ProviderOutput::exited("z".repeat(max * 2), "", 0)),
        );
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![p1], ledger.clone());

        let result = orch
            .execute(ExecutionRequest::new("print('z' * 999999)", "python"), &free())
            .await
            .unwrap();
        assert_eq!(result.stdout.len(), max);
        assert!(result.truncated);
        assert!(ledger.records().await[0].truncated);
    }

    #[tokio::test]
    async fn test_requested_timeout_cannot_loosen_ceiling() {
        let p1 = FakeProvider::new("p1", Behavior::Succeed(ProviderOutput::exited("", "", 0)));
        let orch = orchestrator(vec![p1.clone()], Arc::new(MemoryLedger::new()));

        orch.execute(
            ExecutionRequest::new("print(1)", "python").with_timeout_ms(999_999),
            &free(),
        )
        .await
        .unwrap();
        let ceiling = ResourceLimitPolicy::default().limits_for(Tier::Free).timeout_ms;
        assert_eq!(p1.last_job.lock().await.as_ref().unwrap().limits.timeout_ms, ceiling);

        orch.execute(
            ExecutionRequest::new("print(1)", "python").with_timeout_ms(500),
            &free(),
        )
        .await
        .unwrap();
        assert_eq!(p1.last_job.lock().await.as_ref().unwrap().limits.timeout_ms, 500);
    }

    #[tokio::test]
    async fn test_all_providers_failing_falls_back_to_simulation() {
        let p1 = FakeProvider::new("p1", transient());
        let p2 = FakeProvider::new("p2", Behavior::Fail(ProviderError::permanent("nope")));
        let p3 = FakeProvider::new("p3", transient());
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![p1, p2, p3], ledger.clone());

        let result = orch
            .execute(ExecutionRequest::new("print(1+1)", "python"), &free())
            .await
            .unwrap();

        assert!(result.stdout.contains('2'));
        assert_eq!(result.provider_id, "simulated");
        assert!(result.security_warnings.iter().any(|w| w == SIMULATION_NOTICE));
        assert!(result.success());

        let records = ledger.records().await;
        assert_eq!(records[0].provider_failures.len(), 3);
        assert_eq!(records[0].provider_id.as_deref(), Some("simulated"));
    }

    #[tokio::test]
    async fn test_no_providers_is_simulated() {
        let orch = orchestrator(vec![], Arc::new(MemoryLedger::new()));
        let result = orch
            .execute(ExecutionRequest::new("console.log(4/2)", "js"), &free())
            .await
            .unwrap();
        assert_eq!(result.stdout, "2\n");
        assert_eq!(result.provider_id, SIMULATED_PROVIDER_ID);
    }

    #[tokio::test]
    async fn test_wrapper_only_provider_gets_wrapped_code() {
        let p1 = FakeProvider::with_isolation(
            "runner",
            Behavior::Succeed(ProviderOutput::exited("", "", 0)),
            Isolation::WrapperOnly,
        );
        let orch = orchestrator(vec![p1.clone()], Arc::new(MemoryLedger::new()));

        orch.execute(
            ExecutionRequest::new("print(input())", "python").with_stdin("hello"),
            &free(),
        )
        .await
        .unwrap();

        let job = p1.last_job.lock().await.clone().unwrap();
        assert!(job.code.contains("RLIMIT_NPROC"));
        assert!(job.code.contains("StringIO(\"hello\")"));
        assert!(job.stdin.is_none());
    }

    #[tokio::test]
    async fn test_wrapper_only_provider_refuses_flagged_code() {
        let p1 = FakeProvider::with_isolation(
            "runner",
            Behavior::Succeed(ProviderOutput::exited("", "", 0)),
            Isolation::WrapperOnly,
        );
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![p1.clone()], ledger.clone());

        let result = orch
            .execute(ExecutionRequest::new("curl http://example.com", "shell"), &free())
            .await
            .unwrap();

        assert_eq!(p1.calls(), 0);
        assert_eq!(result.provider_id, "simulated");
        let failures = &ledger.records().await[0].provider_failures;
        assert_eq!(failures[0].kind, FailureKind::Permanent);
        assert!(failures[0].message.contains("kernel isolation"));
    }

    #[tokio::test]
    async fn test_hung_provider_times_out_and_is_cancelled() {
        let p1 = FakeProvider::new("slow", Behavior::Hang);
        let p2 = FakeProvider::new("p2", Behavior::Succeed(ProviderOutput::exited("done", "", 0)));
        let cancels = p1.cancels.clone();
        let orch = orchestrator(vec![p1.clone(), p2], Arc::new(MemoryLedger::new()))
            .with_attempt_overhead(Duration::ZERO);

        let result = orch
            .execute(
                ExecutionRequest::new("print(1)", "python").with_timeout_ms(50),
                &free(),
            )
            .await
            .unwrap();

        assert_eq!(result.provider_id, "p2");
        // The cancel runs on a spawned task
        for _ in 0..50 {
            if cancels.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![], ledger.clone());

        for request in [
            ExecutionRequest::new("   ", "python"),
            ExecutionRequest::new("print(1)", "cobol"),
            ExecutionRequest::new("x".repeat(MAX_CODE_BYTES + 1), "python"),
            ExecutionRequest::new("print(1)", "python").with_timeout_ms(0),
        ] {
            let err = orch.execute(request, &free()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "got {:?}", err);
        }
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error_with_audit() {
        let p1 = FakeProvider::new("p1", Behavior::Panic);
        let ledger = Arc::new(MemoryLedger::new());
        let orch = orchestrator(vec![p1], ledger.clone());

        let err = orch
            .execute(ExecutionRequest::new("print(1)", "python"), &free())
            .await
            .unwrap_err();

        match err {
            Error::Internal(message) => assert_eq!(message, "Internal server error"),
            other => panic!("expected internal error, got {:?}", other),
        }
        let records = ledger.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_kernel_provider_gets_raw_code_and_stdin() {
        let p1 = FakeProvider::new("p1", Behavior::Succeed(ProviderOutput::exited("", "", 0)));
        let orch = orchestrator(vec![p1.clone()], Arc::new(MemoryLedger::new()));

        orch.execute(
            ExecutionRequest::new("print(input())", "python")
                .with_stdin("abc")
                .with_task_id("task-9"),
            &Caller::new("u2", Tier::Pro),
        )
        .await
        .unwrap();

        let job = p1.last_job.lock().await.clone().unwrap();
        assert_eq!(job.code, "print(input())");
        assert_eq!(job.stdin.as_deref(), Some("abc"));
        assert_eq!(job.limits, ResourceLimitPolicy::default().limits_for(Tier::Pro));
    }
}
