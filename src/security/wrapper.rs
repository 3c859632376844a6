//! Isolation wrapper synthesis
//!
//! Wraps a snippet in a per-language preamble that sets process resource
//! ceilings, removes dangerous built-ins and feeds stdin from memory.
//!
//! This is a secondary layer for providers without kernel-level
//! sandboxing. It raises the cost of casual abuse; it does not contain a
//! determined adversary, and nothing should rely on it as the only
//! boundary.

use serde_json::Value;

use crate::limits::ResourceLimits;
use crate::sandbox::Language;

/// Maximum open file descriptors inside wrapped code
const MAX_OPEN_FILES: u64 = 64;

/// Maximum size of any file written by wrapped code
const MAX_FILE_SIZE_BYTES: u64 = 16 * 1024 * 1024;

/// Shell code cannot run at all with a process limit of zero, so it gets a
/// small one instead
const SHELL_MAX_PROCESSES: u64 = 32;

/// Python modules the import guard refuses
const PYTHON_BLOCKED_MODULES: &[&str] = &[
    "os",
    "subprocess",
    "socket",
    "ctypes",
    "shutil",
    "multiprocessing",
    "signal",
    "pty",
    "importlib",
    "resource",
];

/// Python built-ins removed from the snippet's namespace
const PYTHON_REMOVED_BUILTINS: &[&str] = &["eval", "exec", "compile", "open", "breakpoint", "__import__"];

/// Synthesizes isolation wrappers
#[derive(Debug, Clone, Default)]
pub struct CodeWrapper;

impl CodeWrapper {
    pub fn new() -> Self {
        CodeWrapper
    }

    /// Wrap `code` for `language`. The result embeds `stdin`, so callers must
    /// not also pipe it.
    pub fn wrap(
        &self,
        code: &str,
        language: Language,
        stdin: Option<&str>,
        limits: &ResourceLimits,
    ) -> String {
        let stdin = stdin.unwrap_or("");
        match language {
            Language::Python => wrap_python(code, stdin, limits),
            Language::JavaScript => wrap_javascript(code, stdin, limits),
            Language::Shell => wrap_shell(code, stdin, limits),
        }
    }
}

/// Quote as a JSON string, which both Python and JavaScript accept as a
/// string literal
fn literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn cpu_seconds(limits: &ResourceLimits) -> u64 {
    limits.timeout_ms.div_ceil(1000).max(1)
}

fn memory_bytes(limits: &ResourceLimits) -> u64 {
    limits.memory_mb * 1024 * 1024
}

fn python_set(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|m| literal(m)).collect();
    format!("frozenset({{{}}})", quoted.join(", "))
}

fn wrap_python(code: &str, stdin: &str, limits: &ResourceLimits) -> String {
    format!(
        r#"import builtins as _builtins
import io as _io
import sys as _sys

try:
    import resource as _resource
except ImportError:
    _resource = None


def _limit(name, value):
    if _resource is None or not hasattr(_resource, name):
        return
    try:
        _resource.setrlimit(getattr(_resource, name), (value, value))
    except (ValueError, OSError):
        pass


_limit("RLIMIT_CPU", {cpu})
_limit("RLIMIT_AS", {memory})
_limit("RLIMIT_FSIZE", {fsize})
_limit("RLIMIT_NOFILE", {nofile})
_limit("RLIMIT_NPROC", 0)

_sys.stdin = _io.StringIO({stdin})

_BLOCKED_MODULES = {blocked}
_REMOVED_BUILTINS = {removed}
_real_import = _builtins.__import__


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if name.split(".")[0] in _BLOCKED_MODULES:
        raise ImportError("import of '%s' is not permitted" % name)
    return _real_import(name, globals, locals, fromlist, level)


_snippet = compile({code}, "<snippet>", "exec")
_run = exec
_safe_builtins = {{k: v for k, v in vars(_builtins).items() if k not in _REMOVED_BUILTINS}}
_safe_builtins["__import__"] = _guarded_import
del _resource, _limit
_run(_snippet, {{"__builtins__": _safe_builtins, "__name__": "__main__"}})
"#,
        cpu = cpu_seconds(limits),
        memory = memory_bytes(limits),
        fsize = MAX_FILE_SIZE_BYTES,
        nofile = MAX_OPEN_FILES,
        stdin = literal(stdin),
        blocked = python_set(PYTHON_BLOCKED_MODULES),
        removed = python_set(PYTHON_REMOVED_BUILTINS),
        code = literal(code),
    )
}

fn wrap_javascript(code: &str, stdin: &str, limits: &ResourceLimits) -> String {
    // The snippet runs in a fresh context: no process, require, module,
    // Buffer or timers exist there.
    format!(
        r#""use strict";
const __vm = require("vm");
const __util = require("util");
const __stdin = {stdin};
const __code = {code};
const __out = (...args) => process.stdout.write(__util.format(...args) + "\n");
const __err = (...args) => process.stderr.write(__util.format(...args) + "\n");
const __context = __vm.createContext(
  Object.freeze({{
    console: Object.freeze({{ log: __out, info: __out, error: __err, warn: __err }}),
    stdin: __stdin,
  }}),
  {{ codeGeneration: {{ strings: false, wasm: false }} }}
);
try {{
  __vm.runInContext(__code, __context, {{ filename: "snippet.js", timeout: {timeout} }});
}} catch (err) {{
  __err(err && err.stack ? err.stack : String(err));
  process.exitCode = 1;
}}
"#,
        stdin = literal(stdin),
        code = literal(code),
        timeout = limits.timeout_ms,
    )
}

fn wrap_shell(code: &str, stdin: &str, limits: &ResourceLimits) -> String {
    let delimiter = format!("SNIPPET_STDIN_{}", uuid::Uuid::new_v4().simple());
    let mut body = code.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    let mut input = stdin.to_string();
    if !input.is_empty() && !input.ends_with('\n') {
        input.push('\n');
    }

    format!(
        "ulimit -t {cpu} 2>/dev/null\n\
         ulimit -v {memory_kb} 2>/dev/null\n\
         ulimit -f {fsize_blocks} 2>/dev/null\n\
         ulimit -n {nofile} 2>/dev/null\n\
         ulimit -u {nproc} 2>/dev/null\n\
         unset BASH_ENV ENV CDPATH\n\
         PATH=/usr/local/bin:/usr/bin:/bin\n\
         export PATH\n\
         readonly PATH\n\
         {{\n\
         {body}\
         }} <<'{delimiter}'\n\
         {input}\
         {delimiter}\n",
        cpu = cpu_seconds(limits),
        memory_kb = limits.memory_mb * 1024,
        fsize_blocks = MAX_FILE_SIZE_BYTES / 512,
        nofile = MAX_OPEN_FILES,
        nproc = SHELL_MAX_PROCESSES,
        body = body,
        delimiter = delimiter,
        input = input,
    )
}
