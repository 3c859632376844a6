//! Snippet Runner CLI
//!
//! Run snippets through the same orchestration the gateway uses, inspect
//! scanner findings and tier limits, and check configuration.

use clap::{Parser, Subcommand};
use console::style;
use snippet_runner::audit::open_ledger;
use snippet_runner::config::{self, Config};
use snippet_runner::gateway::{ErrorResponse, ExecuteResponse};
use snippet_runner::limits::{ResourceLimitPolicy, Tier};
use snippet_runner::orchestrator::{Caller, ExecutionOrchestrator};
use snippet_runner::sandbox::{ExecutionRequest, Language};
use snippet_runner::security::{has_critical, SecurityScanner, Severity};
use snippet_runner::{Error, VERSION};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "snippet-runner",
    author = "Snippet Runner Contributors",
    version = VERSION,
    about = "Snippet Runner - run untrusted code snippets on tiered sandboxes",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short, global = true, env = "SNIPPET_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet and print the JSON response
    Run {
        /// Programming language (python, javascript, shell)
        language: String,
        /// Code to execute, or `-` to read it from standard input
        code: String,
        /// Tier to run under
        #[arg(long, default_value = "free")]
        tier: Tier,
        /// Text fed to the program's standard input
        #[arg(long)]
        stdin: Option<String>,
        /// Tighter timeout than the tier allows
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// User id written to the usage ledger
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Print security findings for a snippet
    Scan {
        /// Programming language (python, javascript, shell)
        language: String,
        /// Code to scan, or `-` to read it from standard input
        code: String,
    },

    /// Print the tier limit table
    Limits,

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Validate the configuration
    CheckConfig {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snippet_runner=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            language,
            code,
            tier,
            stdin,
            timeout_ms,
            user,
        } => {
            let mut request = ExecutionRequest::new(read_code(code)?, language);
            if let Some(stdin) = stdin {
                request = request.with_stdin(stdin);
            }
            if let Some(timeout_ms) = timeout_ms {
                request = request.with_timeout_ms(timeout_ms);
            }
            run_snippet(config_file, request, Caller::new(user, tier)).await
        }
        Commands::Scan { language, code } => scan_snippet(&language, &read_code(code)?),
        Commands::Limits => show_limits(config_file),
        Commands::InitConfig { force } => init_config(config_file, force),
        Commands::CheckConfig { json } => check_config(config_file, json),
    }
}

fn load(config_file: Option<&Path>) -> snippet_runner::Result<Config> {
    match config_file {
        Some(path) => config::load_config_layered(path),
        None => config::load_config(),
    }
}

fn read_code(code: String) -> anyhow::Result<String> {
    if code != "-" {
        return Ok(code);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

// ============================================================================
// Execution
// ============================================================================

async fn run_snippet(config_file: Option<&Path>, request: ExecutionRequest, caller: Caller) -> anyhow::Result<ExitCode> {
    let config = load(config_file)?;
    let ledger = open_ledger(&config.audit).await?;
    let orchestrator = ExecutionOrchestrator::from_config(&config, ledger)?;

    match orchestrator.execute(request, &caller).await {
        Ok(result) => {
            let response = ExecuteResponse::from(result);
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.success {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(response.exit_code.clamp(1, 255) as u8))
            }
        }
        Err(Error::SecurityBlocked { findings }) => {
            let response = ErrorResponse::new("Execution blocked by security policy").with_warnings(findings);
            println!("{}", serde_json::to_string_pretty(&response)?);
            eprintln!("{} blocked by security policy", style("✗").red());
            Ok(ExitCode::from(126))
        }
        Err(Error::InvalidInput(message)) => {
            println!("{}", serde_json::to_string_pretty(&ErrorResponse::new(message))?);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Inspection
// ============================================================================

fn scan_snippet(language: &str, code: &str) -> anyhow::Result<ExitCode> {
    let language: Language = language.parse()?;
    let findings = SecurityScanner::new().scan(code, language);

    if findings.is_empty() {
        println!("{} No findings", style("✓").green());
        return Ok(ExitCode::SUCCESS);
    }

    for finding in &findings {
        let marker = match finding.severity {
            Severity::Critical => style("critical").red().bold(),
            Severity::Warning => style("warning ").yellow(),
        };
        println!("{}  {}", marker, finding.description);
    }

    if has_critical(&findings) {
        println!("\n{}", style("This snippet would be blocked.").red());
        Ok(ExitCode::FAILURE)
    } else {
        println!("\n{}", style("This snippet would run with warnings.").yellow());
        Ok(ExitCode::SUCCESS)
    }
}

fn show_limits(config_file: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load(config_file)?;
    let policy = ResourceLimitPolicy::new(config.limits.tiers.clone())?;

    println!(
        "{:<12} {:>12} {:>10} {:>10} {:>14} {:>12}",
        style("tier").bold(),
        style("timeout_ms").bold(),
        style("memory_mb").bold(),
        style("cpu").bold(),
        style("output_bytes").bold(),
        style("runs/window").bold(),
    );
    for tier in Tier::ALL {
        let limits = policy.limits_for(tier);
        println!(
            "{:<12} {:>12} {:>10} {:>10} {:>14} {:>12}",
            style(tier).cyan(),
            limits.timeout_ms,
            limits.memory_mb,
            limits.cpu_shares,
            limits.max_output_bytes,
            config.limits.rate.budget_for(tier),
        );
    }
    if config.limits.rate.enabled {
        println!(
            "\nRate window: {}",
            humantime_serde::re::humantime::format_duration(config.limits.rate.window)
        );
    } else {
        println!("\nRate limiting disabled");
    }
    Ok(ExitCode::SUCCESS)
}

fn init_config(config_file: Option<&Path>, force: bool) -> anyhow::Result<ExitCode> {
    let path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(config::config_path);
    if path.exists() && !force {
        eprintln!(
            "{} {} already exists (use --force to overwrite)",
            style("✗").red(),
            path.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    config::save_config(&Config::default(), &path)?;
    println!("{} Wrote {}", style("✓").green(), path.display());
    println!(
        "   Add auth.tokens and provider endpoints, or set {} and friends in the environment",
        style("PRIMARY_SANDBOX_URL").cyan()
    );
    Ok(ExitCode::SUCCESS)
}

fn check_config(config_file: Option<&Path>, json: bool) -> anyhow::Result<ExitCode> {
    let path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(config::config_path);
    let snapshot = config::read_config_snapshot(&path);

    let config = match (snapshot.exists, snapshot.config) {
        (false, _) => {
            if !json {
                println!("{} No config file at {}, using defaults", style("○").dim(), path.display());
            }
            let mut config = Config::default();
            config::apply_env_overrides(&mut config);
            config
        }
        (true, Some(mut config)) => {
            config::apply_env_overrides(&mut config);
            config
        }
        (true, None) => {
            for issue in &snapshot.issues {
                eprintln!("{} {}", style("✗").red(), issue);
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    let result = config::validate_config(&config);
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for issue in &result.errors {
            println!("{} {}", style("✗").red(), issue);
        }
        for issue in &result.warnings {
            println!("{} {}", style("!").yellow(), issue);
        }
        if result.valid {
            println!("{} Configuration is valid", style("✓").green());
        }
    }

    Ok(if result.valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
