//! Result assembly
//!
//! Turns a provider's raw output into the caller-facing result: warnings
//! merged in a fixed order, output capped, exit status normalized to an
//! integer, provider attributed.

use serde::{Deserialize, Serialize};

use crate::limits::ResourceLimits;
use crate::sandbox::{ExitStatus, ProviderOutput};
use crate::security::SecurityFinding;

/// Hard cap on captured stderr, whatever the tier
pub const STDERR_CEILING_BYTES: usize = 256 * 1024;

/// Appended to the warnings of every simulated result
pub const SIMULATION_NOTICE: &str =
    "Simulated execution: every sandbox provider was unavailable, so this output was produced by the simulated fallback and may differ from a real run";

/// Caller-facing execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    pub memory_used_mb: Option<f64>,
    /// `stdout` was cut at the tier's output ceiling
    pub truncated: bool,
    pub security_warnings: Vec<String>,
    /// Identity of the provider that produced the output
    pub provider_id: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Output of the provider that produced the result
#[derive(Debug, Clone)]
pub struct ProducedOutput {
    pub provider_id: String,
    pub output: ProviderOutput,
    /// Produced by the simulated fallback
    pub simulated: bool,
    /// Wall-clock time of the winning attempt
    pub elapsed_ms: u64,
}

/// Builds [`ExecutionResult`]s
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    stderr_ceiling: usize,
}

impl Default for ResultAssembler {
    fn default() -> Self {
        ResultAssembler {
            stderr_ceiling: STDERR_CEILING_BYTES,
        }
    }
}

impl ResultAssembler {
    pub fn new() -> Self {
        ResultAssembler::default()
    }

    pub fn assemble(
        &self,
        execution_id: &str,
        produced: ProducedOutput,
        findings: &[SecurityFinding],
        limits: &ResourceLimits,
    ) -> ExecutionResult {
        let ProducedOutput {
            provider_id,
            output,
            simulated,
            elapsed_ms,
        } = produced;

        let mut security_warnings: Vec<String> = findings.iter().map(SecurityFinding::message).collect();
        security_warnings.extend(output.warnings);
        if simulated {
            security_warnings.push(SIMULATION_NOTICE.to_string());
        }

        let exit_code = normalize_exit(&output.exit, &output.stderr);
        let (stdout, truncated) = truncate_utf8(output.stdout, limits.max_output_bytes);
        let (stderr, _) = truncate_utf8(output.stderr, self.stderr_ceiling);

        ExecutionResult {
            execution_id: execution_id.to_string(),
            stdout,
            stderr,
            exit_code,
            execution_time_ms: output.execution_time_ms.unwrap_or(elapsed_ms),
            memory_used_mb: output.memory_used_mb,
            truncated,
            security_warnings,
            provider_id,
        }
    }
}

/// Cut `text` to at most `max` bytes without splitting a character
pub fn truncate_utf8(mut text: String, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text, false);
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    (text, true)
}

/// Map a provider's exit representation onto a process-style exit code
pub fn normalize_exit(exit: &ExitStatus, stderr: &str) -> i32 {
    match exit {
        ExitStatus::Code(code) => *code,
        ExitStatus::Signal(signal) => 128 + signal_number(signal).unwrap_or(9),
        ExitStatus::Status(status) => match status.trim().to_ascii_lowercase().as_str() {
            "ok" | "success" | "succeeded" => 0,
            "timeout" | "timed_out" => 124,
            _ => 1,
        },
        ExitStatus::Unknown if stderr.trim().is_empty() => 0,
        ExitStatus::Unknown => 1,
    }
}

fn signal_number(signal: &str) -> Option<i32> {
    let signal = signal.trim().to_ascii_uppercase();
    if let Ok(n) = signal.parse::<i32>() {
        return Some(n);
    }
    let name = signal.strip_prefix("SIG").unwrap_or(&signal);
    let n = match name {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "TRAP" => 5,
        "ABRT" => 6,
        "BUS" => 7,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        "XCPU" => 24,
        "XFSZ" => 25,
        _ => return None,
    };
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ResourceLimitPolicy, Tier};
    use crate::security::Severity;

    fn limits() -> ResourceLimits {
        ResourceLimitPolicy::default().limits_for(Tier::Free)
    }

    fn produced(output: ProviderOutput, simulated: bool) -> ProducedOutput {
        ProducedOutput {
            provider_id: if simulated { "simulated" } else { "piston" }.to_string(),
            output,
            simulated,
            elapsed_ms: 42,
        }
    }

    #[test]
    fn test_truncation_is_exact() {
        let max = limits().max_output_bytes;
        let output = ProviderOutput::exited("a".repeat(max + 100), "", 0);
        let result = ResultAssembler::new().assemble("e", produced(output, false), &[], &limits());
        assert_eq!(result.stdout.len(), max);
        assert!(result.truncated);

        let exact = ProviderOutput::exited("b".repeat(max), "", 0);
        let result = ResultAssembler::new().assemble("e", produced(exact, false), &[], &limits());
        assert_eq!(result.stdout, "b".repeat(max));
        assert!(!result.truncated);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let (text, cut) = truncate_utf8("héllo".to_string(), 2);
        assert_eq!(text, "h");
        assert!(cut);
        let (text, cut) = truncate_utf8("héllo".to_string(), 3);
        assert_eq!(text, "hé");
        assert!(cut);
    }

    #[test]
    fn test_stderr_is_capped() {
        let output = ProviderOutput::exited("", "e".repeat(STDERR_CEILING_BYTES * 2), 1);
        let result = ResultAssembler::new().assemble("e", produced(output, false), &[], &limits());
        assert_eq!(result.stderr.len(), STDERR_CEILING_BYTES);
        assert!(!result.truncated);
    }

    #[test]
    fn test_warning_order() {
        let findings = vec![SecurityFinding::new("Network download", Severity::Warning)];
        let output = ProviderOutput::exited("x", "", 0).with_warning("provider note");
        let result = ResultAssembler::new().assemble("e", produced(output, true), &findings, &limits());
        assert_eq!(
            result.security_warnings,
            vec![
                "Warning: Network download".to_string(),
                "provider note".to_string(),
                SIMULATION_NOTICE.to_string(),
            ]
        );
        assert_eq!(result.provider_id, "simulated");
    }

    #[test]
    fn test_exit_normalization() {
        assert_eq!(normalize_exit(&ExitStatus::Code(3), ""), 3);
        assert_eq!(normalize_exit(&ExitStatus::Signal("SIGKILL".into()), ""), 137);
        assert_eq!(normalize_exit(&ExitStatus::Signal("SIGSEGV".into()), ""), 139);
        assert_eq!(normalize_exit(&ExitStatus::Signal("15".into()), ""), 143);
        assert_eq!(normalize_exit(&ExitStatus::Signal("SIGWEIRD".into()), ""), 137);
        assert_eq!(normalize_exit(&ExitStatus::Status("ok".into()), ""), 0);
        assert_eq!(normalize_exit(&ExitStatus::Status("timeout".into()), ""), 124);
        assert_eq!(normalize_exit(&ExitStatus::Status("error".into()), ""), 1);
        assert_eq!(normalize_exit(&ExitStatus::Unknown, ""), 0);
        assert_eq!(normalize_exit(&ExitStatus::Unknown, "Traceback"), 1);
    }

    #[test]
    fn test_execution_time_prefers_provider_measurement() {
        let mut output = ProviderOutput::exited("", "", 0);
        let result = ResultAssembler::new().assemble("e", produced(output.clone(), false), &[], &limits());
        assert_eq!(result.execution_time_ms, 42);

        output.execution_time_ms = Some(7);
        let result = ResultAssembler::new().assemble("e", produced(output, false), &[], &limits());
        assert_eq!(result.execution_time_ms, 7);
        assert!(result.success());
    }
}
