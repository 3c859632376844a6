//! Curated dangerous-construct patterns per language
//!
//! Patterns are compiled once per process. A pattern that fails to compile
//! is logged and skipped rather than taking the scanner down with it.

use regex::Regex;
use std::sync::OnceLock;
use tracing::error;

use super::Severity;
use crate::sandbox::Language;

/// Uncompiled pattern entry
struct PatternSpec {
    pattern: &'static str,
    description: &'static str,
}

const fn spec(pattern: &'static str, description: &'static str) -> PatternSpec {
    PatternSpec {
        pattern,
        description,
    }
}

/// A compiled pattern with its classification
#[derive(Debug)]
pub struct CompiledPattern {
    pub regex: Regex,
    pub description: &'static str,
    pub severity: Severity,
}

// ============================================================================
// Critical patterns (always block)
// ============================================================================

/// Catastrophic constructs that may appear in any language, typically inside
/// a string handed to a shell.
const COMMON_CRITICAL: &[PatternSpec] = &[
    spec(
        r#"(?m)\brm\s+(?:-{1,2}[\w-]+\s+)*-{1,2}[\w-]*[rR][\w-]*\s+(?:-{1,2}[\w-]+\s+)*/\*?(?:\s|$|;|&|\||'|")"#,
        "Recursive deletion of the filesystem root",
    ),
    spec(
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        "Fork bomb",
    ),
    spec(
        r"\bdd\s+(?:\S+\s+)*of=/dev/(?:sd|hd|vd|xvd|nvme|mmcblk)",
        "Disk wipe via dd onto a block device",
    ),
    spec(r"\bmkfs(?:\.\w+)?\s+(?:-\S+\s+)*/dev/", "Filesystem format of a block device"),
    spec(
        r">\s*/dev/(?:sd|hd|vd|xvd|nvme|mmcblk)[a-z0-9]*",
        "Raw write to a block device",
    ),
    spec(r"\b(?:shred|wipefs)\b[^\n]*/dev/", "Disk wipe of a block device"),
];

const PYTHON_CRITICAL: &[PatternSpec] = &[
    spec(
        r"(?s)while\s+(?:True|1)\s*:.{0,200}?os\.fork\s*\(",
        "Fork bomb (os.fork in an unbounded loop)",
    ),
    spec(
        r#"shutil\.rmtree\s*\(\s*['"]/['"]"#,
        "Recursive deletion of the filesystem root",
    ),
];

const JAVASCRIPT_CRITICAL: &[PatternSpec] = &[
    spec(
        r"(?s)while\s*\(\s*(?:true|1)\s*\)\s*\{.{0,200}?\b(?:fork|spawn|exec|execSync|spawnSync)\s*\(",
        "Fork bomb (process spawning in an unbounded loop)",
    ),
    spec(
        r#"\bfs(?:\.promises)?\.(?:rm|rmSync|rmdir|rmdirSync)\s*\(\s*['"]/['"]"#,
        "Recursive deletion of the filesystem root",
    ),
];

const SHELL_CRITICAL: &[PatternSpec] = &[
    spec(
        r"(?s)while\s+(?:true|:)\s*;?\s*do.{0,100}?&\s*done",
        "Fork bomb (backgrounded work in an unbounded loop)",
    ),
    spec(r"\bfind\s+/\s+[^\n]*-delete\b", "Recursive deletion of the filesystem root"),
];

// ============================================================================
// Warning patterns (recorded, not blocking)
// ============================================================================

const PYTHON_WARNING: &[PatternSpec] = &[
    spec(
        r"\bimport\s+subprocess\b|\bfrom\s+subprocess\s+import\b",
        "Process spawning via subprocess",
    ),
    spec(
        r"\bos\.(?:system|popen|fork|forkpty|exec\w*|spawn\w*|posix_spawn\w*)\s*\(",
        "Process spawning via the os module",
    ),
    spec(r"\bshutil\.rmtree\s*\(", "Recursive directory deletion"),
    spec(
        r"\bos\.(?:remove|unlink|rmdir|removedirs)\s*\(",
        "File deletion",
    ),
    spec(r"(?:^|[^\w.])(?:eval|exec|compile)\s*\(", "Dynamic code evaluation"),
    spec(r"\b__import__\s*\(|\bimportlib\b", "Dynamic module import"),
    spec(
        r"\bimport\s+socket\b|\bfrom\s+socket\s+import\b|\bsocket\.socket\s*\(",
        "Raw socket access",
    ),
    spec(
        r"\bimport\s+(?:urllib|requests|http\.client|ftplib|telnetlib)\b|\bfrom\s+(?:urllib|requests|http)\b",
        "Network access",
    ),
    spec(r"\bimport\s+ctypes\b|\bfrom\s+ctypes\b", "Native code access via ctypes"),
    spec(
        r"\bos\.(?:setuid|setgid|seteuid|setegid|setreuid|chroot)\s*\(",
        "Privilege change",
    ),
    spec(r#"['"]\s*(?:sudo|su|doas)\s"#, "Privilege escalation command"),
];

const JAVASCRIPT_WARNING: &[PatternSpec] = &[
    spec(
        r#"require\s*\(\s*['"](?:node:)?child_process['"]\s*\)|from\s+['"](?:node:)?child_process['"]"#,
        "Process spawning via child_process",
    ),
    spec(r"(?:^|[^\w.])eval\s*\(|\bnew\s+Function\s*\(", "Dynamic code evaluation"),
    spec(
        r#"require\s*\(\s*['"](?:node:)?vm['"]\s*\)|from\s+['"](?:node:)?vm['"]"#,
        "Dynamic code evaluation via vm",
    ),
    spec(
        r#"require\s*\(\s*['"](?:node:)?(?:net|dgram|tls|http|https|http2)['"]\s*\)|from\s+['"](?:node:)?(?:net|dgram|tls|http|https|http2)['"]"#,
        "Raw network access",
    ),
    spec(
        r"\bfs(?:\.promises)?\.(?:rm|rmSync|rmdir|rmdirSync|unlink|unlinkSync)\s*\(",
        "File deletion",
    ),
    spec(
        r"\bprocess\.(?:kill|binding|dlopen|setuid|setgid|seteuid|setegid)\s*\(",
        "Process control or privilege change",
    ),
    spec(r"\bprocess\.env\b", "Environment inspection"),
    spec(r#"['"`]\s*(?:sudo|su|doas)\s"#, "Privilege escalation command"),
];

const SHELL_WARNING: &[PatternSpec] = &[
    spec(r"(?:^|[\s;&|(])(?:sudo|su|doas)(?:\s|$)", "Privilege escalation command"),
    spec(r"\brm\s+-[a-zA-Z]*[rRf]", "Destructive file deletion"),
    spec(r"\b(?:curl|wget)\b", "Network download"),
    spec(
        r"(?:^|[\s;&|(])(?:nc|ncat|netcat|socat|telnet)(?:\s|$)",
        "Raw network access",
    ),
    spec(r"/dev/(?:tcp|udp)/", "Raw socket via /dev/tcp"),
    spec(r"(?:^|[\s;&|(])eval\s", "Dynamic code evaluation"),
    spec(r"\b(?:chmod|chown|chgrp)\s", "Permission change"),
    spec(r"\b(?:kill|killall|pkill)\s", "Process control"),
    spec(r"\b(?:crontab|systemctl|service)\s", "Persistence or service control"),
    spec(r"\b(?:bash|sh|python3?|node|perl)\s+-c\b", "Nested interpreter invocation"),
];

// ============================================================================
// Compilation
// ============================================================================

fn compile(critical: &[&[PatternSpec]], warning: &[PatternSpec]) -> Vec<CompiledPattern> {
    let critical = critical
        .iter()
        .flat_map(|group| group.iter())
        .map(|s| (s, Severity::Critical));
    let warning = warning.iter().map(|s| (s, Severity::Warning));

    critical
        .chain(warning)
        .filter_map(|(s, severity)| match Regex::new(s.pattern) {
            Ok(regex) => Some(CompiledPattern {
                regex,
                description: s.description,
                severity,
            }),
            Err(e) => {
                error!("Skipping invalid security pattern '{}': {}", s.description, e);
                None
            }
        })
        .collect()
}

/// Compiled patterns for a language, criticals first
pub fn patterns_for(language: Language) -> &'static [CompiledPattern] {
    static PYTHON: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    static JAVASCRIPT: OnceLock<Vec<CompiledPattern>> = OnceLock::new();
    static SHELL: OnceLock<Vec<CompiledPattern>> = OnceLock::new();

    match language {
        Language::Python => PYTHON.get_or_init(|| {
            compile(&[COMMON_CRITICAL, PYTHON_CRITICAL], PYTHON_WARNING)
        }),
        Language::JavaScript => JAVASCRIPT.get_or_init(|| {
            compile(&[COMMON_CRITICAL, JAVASCRIPT_CRITICAL], JAVASCRIPT_WARNING)
        }),
        Language::Shell => SHELL.get_or_init(|| {
            compile(&[COMMON_CRITICAL, SHELL_CRITICAL], SHELL_WARNING)
        }),
    }
}
