//! Statement-level drivers for the simulated runtime
//!
//! Each driver walks a snippet one statement at a time. Statements it does
//! not understand are skipped and counted; a statement that would fail at
//! runtime stops the run with the interpreter's usual error text on stderr.

use std::collections::VecDeque;

use super::expr::{check_string_len, evaluate, Dialect, EvalError, Host, Value, Vars};
use crate::sandbox::Language;

/// Upper bound on simulated stdout, independent of tier limits
const MAX_SIMULATED_OUTPUT: usize = 1024 * 1024;

/// Outcome of a simulated run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Simulation {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Statements the simulator could not evaluate
    pub skipped: usize,
}

/// Simulate `code` in `language`
pub fn simulate(code: &str, language: Language, stdin: Option<&str>) -> Simulation {
    let stdin = stdin.unwrap_or("");
    match language {
        Language::Python => run_python(code, stdin),
        Language::JavaScript => run_javascript(code, stdin),
        Language::Shell => run_shell(code, stdin),
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Remove a trailing comment that starts with `marker` outside any quotes
fn strip_comment<'a>(line: &'a str, marker: &str) -> &'a str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' || c == '`' => quote = Some(c),
            None if line[i..].starts_with(marker) => return &line[..i],
            None => {}
        }
    }
    line
}

/// Split `name = expr`, `name += expr` and friends. `==` is not an assignment.
fn split_assignment(stmt: &str) -> Option<(&str, Option<char>, &str)> {
    let name_end = stmt
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)?;
    let name = &stmt[..name_end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let rest = stmt[name_end..].trim_start();
    let (op, rhs) = match rest.chars().next()? {
        '=' if !rest.starts_with("==") => (None, &rest[1..]),
        c @ ('+' | '-' | '*') if rest[1..].starts_with('=') => (Some(c), &rest[2..]),
        _ => return None,
    };
    Some((name, op, rhs.trim()))
}

fn apply_assignment(
    name: &str,
    op: Option<char>,
    rhs: &str,
    dialect: Dialect,
    host: &mut dyn Host,
) -> Result<Value, EvalError> {
    let expr = match op {
        None => rhs.to_string(),
        Some(op) => format!("{} {} ({})", name, op, rhs),
    };
    evaluate(&expr, dialect, host)
}

/// Join printed values, refusing before allocating more than the output cap
fn join_line(parts: &[Value], dialect: Dialect, sep: &str, end: &str) -> Result<String, EvalError> {
    let mut line = String::new();
    for (i, part) in parts.iter().enumerate() {
        let text = part.display(dialect);
        let sep = if i == 0 { "" } else { sep };
        if line.len() + sep.len() + text.len() + end.len() > MAX_SIMULATED_OUTPUT {
            return Err(EvalError::Unsupported("output too large".into()));
        }
        line.push_str(sep);
        line.push_str(&text);
    }
    line.push_str(end);
    Ok(line)
}

fn push_output(buffer: &mut String, text: &str) -> Result<(), EvalError> {
    if buffer.len() + text.len() > MAX_SIMULATED_OUTPUT {
        return Err(EvalError::Unsupported("output too large".into()));
    }
    buffer.push_str(text);
    Ok(())
}

// ============================================================================
// Python
// ============================================================================

struct PythonHost {
    vars: Vars,
    stdout: String,
    stdin: VecDeque<String>,
}

impl Host for PythonHost {
    fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        let dialect = Dialect::Python;
        match name {
            "print" => {
                let mut sep = " ".to_string();
                let mut end = "\n".to_string();
                for (key, value) in kwargs {
                    match key.as_str() {
                        "sep" => sep = value.display(dialect),
                        "end" => end = value.display(dialect),
                        other => return Err(EvalError::Unsupported(format!("print({}=)", other))),
                    }
                }
                let line = join_line(&args, dialect, &sep, &end)?;
                push_output(&mut self.stdout, &line)?;
                Ok(Value::Nil)
            }
            "input" => {
                if let Some(prompt) = args.first() {
                    push_output(&mut self.stdout, &prompt.display(dialect))?;
                }
                self.stdin
                    .pop_front()
                    .map(Value::Str)
                    .ok_or_else(|| EvalError::Runtime("EOFError: EOF when reading a line".into()))
            }
            "str" => Ok(Value::Str(args.first().map(|a| a.display(dialect)).unwrap_or_default())),
            "int" => match args.first() {
                Some(Value::Int(i)) => Ok(Value::Int(*i)),
                Some(Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
                Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    EvalError::Runtime(format!(
                        "ValueError: invalid literal for int() with base 10: '{}'",
                        s
                    ))
                }),
                None => Ok(Value::Int(0)),
                Some(other) => Err(EvalError::Unsupported(format!("int({:?})", other))),
            },
            "float" => match args.first() {
                Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
                Some(Value::Float(f)) => Ok(Value::Float(*f)),
                Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    EvalError::Runtime(format!(
                        "ValueError: could not convert string to float: '{}'",
                        s
                    ))
                }),
                None => Ok(Value::Float(0.0)),
                Some(other) => Err(EvalError::Unsupported(format!("float({:?})", other))),
            },
            "len" => match args.first() {
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                _ => Err(EvalError::Unsupported("len of non-string".into())),
            },
            "abs" => match args.first() {
                Some(Value::Int(i)) => Ok(Value::Int(i.saturating_abs())),
                Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
                _ => Err(EvalError::Unsupported("abs of non-number".into())),
            },
            other => Err(EvalError::Unsupported(format!("call to {}", other))),
        }
    }
}

fn run_python(code: &str, stdin: &str) -> Simulation {
    let mut host = PythonHost {
        vars: Vars::default(),
        stdout: String::new(),
        stdin: stdin.lines().map(str::to_string).collect(),
    };
    let mut sim = Simulation::default();

    for (index, raw) in code.lines().enumerate() {
        let line = strip_comment(raw, "#").trim_end();
        if line.trim().is_empty() {
            continue;
        }
        // Blocks and their bodies are beyond the simulator
        if line.starts_with(char::is_whitespace) || line.ends_with(':') {
            sim.skipped += 1;
            continue;
        }
        if line.starts_with("import ") || line.starts_with("from ") || line == "pass" {
            continue;
        }

        let result = match split_assignment(line) {
            Some((name, op, rhs)) => apply_assignment(name, op, rhs, Dialect::Python, &mut host)
                .and_then(|value| host.vars.set(name, value)),
            None => evaluate(line, Dialect::Python, &mut host).map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(EvalError::Unsupported(_)) => sim.skipped += 1,
            Err(EvalError::Runtime(message)) => {
                sim.stderr = format!(
                    "Traceback (most recent call last):\n  File \"<snippet>\", line {}, in <module>\n{}\n",
                    index + 1,
                    message
                );
                sim.exit_code = 1;
                break;
            }
        }
    }

    sim.stdout = host.stdout;
    sim
}

// ============================================================================
// JavaScript
// ============================================================================

struct JsHost {
    vars: Vars,
    stdout: String,
    stderr: String,
    stdin: String,
}

impl Host for JsHost {
    fn var(&self, name: &str) -> Option<Value> {
        match name {
            "stdin" => Some(Value::Str(self.stdin.clone())),
            "Math.PI" => Some(Value::Float(std::f64::consts::PI)),
            _ => self.vars.get(name).cloned(),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError> {
        let dialect = Dialect::JavaScript;
        let number = |v: Option<&Value>| match v {
            Some(Value::Int(i)) => Some(*i as f64),
            Some(Value::Float(f)) => Some(*f),
            Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            Some(Value::Str(s)) => Some(s.trim().parse::<f64>().unwrap_or(f64::NAN)),
            _ => None,
        };

        match name {
            "console.log" | "console.info" | "console.error" | "console.warn" => {
                let line = join_line(&args, dialect, " ", "\n")?;
                if name == "console.error" || name == "console.warn" {
                    push_output(&mut self.stderr, &line)?;
                } else {
                    push_output(&mut self.stdout, &line)?;
                }
                Ok(Value::Nil)
            }
            "String" => Ok(Value::Str(args.first().map(|a| a.display(dialect)).unwrap_or_default())),
            "Number" => Ok(Value::Float(number(args.first()).unwrap_or(0.0))),
            "Math.floor" => number(args.first())
                .map(|f| Value::Float(f.floor()))
                .ok_or_else(|| EvalError::Unsupported("Math.floor".into())),
            "Math.abs" => number(args.first())
                .map(|f| Value::Float(f.abs()))
                .ok_or_else(|| EvalError::Unsupported("Math.abs".into())),
            "Math.max" | "Math.min" => {
                let values: Vec<f64> = args.iter().filter_map(|a| number(Some(a))).collect();
                let fold = if name == "Math.max" {
                    values.into_iter().fold(f64::NEG_INFINITY, f64::max)
                } else {
                    values.into_iter().fold(f64::INFINITY, f64::min)
                };
                Ok(Value::Float(fold))
            }
            other => Err(EvalError::Unsupported(format!("call to {}", other))),
        }
    }
}

/// Split on `;` and newlines that sit outside strings and parentheses
fn js_statements(code: &str) -> Vec<String> {
    let mut statements = Vec::new();
    for line in code.lines() {
        let line = strip_comment(line, "//");
        let mut current = String::new();
        let mut quote: Option<char> = None;
        let mut depth = 0i32;
        let mut escaped = false;
        for c in line.chars() {
            if escaped {
                escaped = false;
                current.push(c);
                continue;
            }
            match (quote, c) {
                (Some(_), '\\') => escaped = true,
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"' | '`') => quote = Some(c),
                (None, '(') => depth += 1,
                (None, ')') => depth -= 1,
                (None, ';') if depth == 0 => {
                    statements.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        statements.push(current);
    }
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn run_javascript(code: &str, stdin: &str) -> Simulation {
    let mut host = JsHost {
        vars: Vars::default(),
        stdout: String::new(),
        stderr: String::new(),
        stdin: stdin.to_string(),
    };
    let mut sim = Simulation::default();

    for statement in js_statements(code) {
        if statement == "\"use strict\"" || statement == "'use strict'" {
            continue;
        }
        let body = ["let ", "const ", "var "]
            .iter()
            .find_map(|kw| statement.strip_prefix(kw))
            .unwrap_or(&statement)
            .trim();

        let result = match split_assignment(body) {
            Some((name, op, rhs)) => apply_assignment(name, op, rhs, Dialect::JavaScript, &mut host)
                .and_then(|value| host.vars.set(name, value)),
            None => evaluate(body, Dialect::JavaScript, &mut host).map(|_| ()),
        };

        match result {
            Ok(()) => {}
            Err(EvalError::Unsupported(_)) => sim.skipped += 1,
            Err(EvalError::Runtime(message)) => {
                host.stderr.push_str(&format!("Uncaught {}\n", message));
                sim.exit_code = 1;
                break;
            }
        }
    }

    sim.stdout = host.stdout;
    sim.stderr = host.stderr;
    sim
}

// ============================================================================
// Shell
// ============================================================================

/// Split a line into commands on `;` and `&&` outside quotes
fn shell_commands(line: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ';') => {
                commands.push(std::mem::take(&mut current));
                continue;
            }
            (None, '&') if chars.peek() == Some(&'&') => {
                chars.next();
                commands.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    commands.push(current);
    commands
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lookup(vars: &Vars, name: &str) -> String {
    vars.get(name)
        .map(|v| v.display(Dialect::ShellArith))
        .unwrap_or_default()
}

/// Expand `$NAME`, `${NAME}` and `$(( expr ))` starting at `chars[i] == '$'`.
/// Returns the expansion and the index after it.
fn expand_dollar(chars: &[char], i: usize, vars: &mut Vars) -> Result<(String, usize), EvalError> {
    match chars.get(i + 1) {
        Some('(') if chars.get(i + 2) == Some(&'(') => {
            let mut depth = 0;
            let mut j = i + 3;
            while j + 1 < chars.len() {
                match chars[j] {
                    '(' => depth += 1,
                    ')' if depth > 0 => depth -= 1,
                    ')' if chars[j + 1] == ')' => {
                        let inner: String = chars[i + 3..j].iter().collect();
                        let value = evaluate(&inner, Dialect::ShellArith, vars)?;
                        return Ok((value.display(Dialect::ShellArith), j + 2));
                    }
                    _ => {}
                }
                j += 1;
            }
            Err(EvalError::Unsupported("unterminated arithmetic".into()))
        }
        Some('(') => Err(EvalError::Unsupported("command substitution".into())),
        Some('{') => {
            let end = chars[i + 2..]
                .iter()
                .position(|c| *c == '}')
                .ok_or_else(|| EvalError::Unsupported("unterminated ${".into()))?;
            let name: String = chars[i + 2..i + 2 + end].iter().collect();
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(EvalError::Unsupported("parameter expansion operator".into()));
            }
            Ok((lookup(vars, &name), i + 3 + end))
        }
        Some('?') => Ok(("0".to_string(), i + 2)),
        Some(c) if c.is_alphabetic() || *c == '_' => {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let name: String = chars[i + 1..j].iter().collect();
            Ok((lookup(vars, &name), j))
        }
        _ => Ok(("$".to_string(), i + 1)),
    }
}

/// Split a command into words, applying quoting and expansion
fn shell_words(command: &str, vars: &mut Vars) -> Result<Vec<String>, EvalError> {
    let chars: Vec<char> = command.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut expanded = 0;
    let mut i = 0;

    while i < chars.len() {
        check_string_len(expanded + current.len())?;
        match chars[i] {
            c if c.is_whitespace() => {
                if in_word {
                    expanded += current.len();
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
                i += 1;
            }
            '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|c| *c == '\'')
                    .ok_or_else(|| EvalError::Unsupported("unterminated quote".into()))?;
                current.extend(&chars[i + 1..i + 1 + end]);
                in_word = true;
                i += end + 2;
            }
            '"' => {
                in_word = true;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(EvalError::Unsupported("unterminated quote".into())),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if matches!(chars.get(i + 1), Some('"' | '\\' | '$' | '`')) => {
                            current.push(chars[i + 1]);
                            i += 2;
                        }
                        Some('$') => {
                            let (text, next) = expand_dollar(&chars, i, vars)?;
                            check_string_len(expanded + current.len() + text.len())?;
                            current.push_str(&text);
                            i = next;
                        }
                        Some('`') => return Err(EvalError::Unsupported("command substitution".into())),
                        Some(c) => {
                            current.push(*c);
                            i += 1;
                        }
                    }
                }
            }
            '\\' if i + 1 < chars.len() => {
                current.push(chars[i + 1]);
                in_word = true;
                i += 2;
            }
            '$' => {
                let (text, next) = expand_dollar(&chars, i, vars)?;
                check_string_len(expanded + current.len() + text.len())?;
                current.push_str(&text);
                in_word = true;
                i = next;
            }
            '|' | '<' | '>' | '`' | '*' | '?' | '&' | '(' | ')' => {
                return Err(EvalError::Unsupported(format!("shell operator '{}'", chars[i])))
            }
            c => {
                current.push(c);
                in_word = true;
                i += 1;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn is_shell_assignment(word: &str) -> Option<(&str, &str)> {
    let (name, value) = word.split_once('=')?;
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some((name, value))
}

enum Flow {
    Continue,
    Exit(i32),
}

fn run_shell_command(
    command: &str,
    vars: &mut Vars,
    stdin: &str,
    sim: &mut Simulation,
) -> Result<Flow, EvalError> {
    // Assignment words are recognized before expansion so `X="a b"` works
    if let Some((name, raw)) = command.split_once('=') {
        if is_shell_assignment(&format!("{}=", name)).is_some() && !name.contains(char::is_whitespace) {
            let mut words = shell_words(raw, vars)?;
            if words.len() > 1 {
                return Err(EvalError::Unsupported("command with prefix assignment".into()));
            }
            let value = words.pop().unwrap_or_default();
            vars.set(name, Value::Str(value))?;
            return Ok(Flow::Continue);
        }
    }

    let words = shell_words(command, vars)?;
    let Some((program, args)) = words.split_first() else {
        return Ok(Flow::Continue);
    };

    match program.as_str() {
        "echo" => {
            let (newline, args) = match args.first().map(String::as_str) {
                Some("-n") => (false, &args[1..]),
                _ => (true, args),
            };
            let mut line = args.join(" ");
            if newline {
                line.push('\n');
            }
            push_output(&mut sim.stdout, &line)?;
            Ok(Flow::Continue)
        }
        "cat" if args.is_empty() => {
            push_output(&mut sim.stdout, stdin)?;
            Ok(Flow::Continue)
        }
        "true" | ":" => Ok(Flow::Continue),
        "exit" => {
            let code = match args.first() {
                Some(arg) => arg
                    .parse::<i32>()
                    .map_err(|_| EvalError::Unsupported("non-numeric exit".into()))?,
                None => 0,
            };
            Ok(Flow::Exit(code.rem_euclid(256)))
        }
        other => Err(EvalError::Unsupported(format!("command {}", other))),
    }
}

fn run_shell(code: &str, stdin: &str) -> Simulation {
    let mut vars = Vars::default();
    let mut sim = Simulation::default();

    'lines: for raw in code.lines() {
        let line = strip_comment(raw, "#").trim();
        if line.is_empty() || line.starts_with("#!") {
            continue;
        }
        for command in shell_commands(line) {
            match run_shell_command(&command, &mut vars, stdin, &mut sim) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit(code)) => {
                    sim.exit_code = code;
                    break 'lines;
                }
                Err(EvalError::Unsupported(_)) => sim.skipped += 1,
                Err(EvalError::Runtime(message)) => {
                    sim.stderr.push_str(&format!("sh: {}\n", message));
                    sim.exit_code = 1;
                    break 'lines;
                }
            }
        }
    }

    sim
}
