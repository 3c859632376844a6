//! Expression evaluation for the simulated runtime
//!
//! A deliberately small language: numbers, strings, booleans, variables,
//! `+ - * / // % **`, parentheses and function calls. Each dialect keeps
//! its own arithmetic and formatting rules so simulated output looks like
//! what the real interpreter would print.

use std::collections::HashMap;

/// Largest string a single value may hold
pub const MAX_STRING_BYTES: usize = 1024 * 1024;

/// String data all variables of one run may hold together
const MAX_HELD_BYTES: usize = 16 * MAX_STRING_BYTES;

/// String data one evaluation may materialize, variable reads included
const EVAL_BYTE_BUDGET: usize = 4 * MAX_STRING_BYTES;

/// Nesting of parentheses, calls and prefix operators
const MAX_NESTING: usize = 64;

/// Operators, negations and calls in one expression
const MAX_NODES: usize = 512;

/// Which language's rules apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Python,
    JavaScript,
    /// Integer-only `$(( ... ))` arithmetic
    ShellArith,
}

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
}

impl Value {
    /// Render the way the dialect's print function would
    pub fn display(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (Value::Int(i), _) => i.to_string(),
            (Value::Float(f), Dialect::Python) => python_float(*f),
            (Value::Float(f), _) => js_number(*f),
            (Value::Str(s), _) => s.clone(),
            (Value::Bool(b), Dialect::Python) => if *b { "True" } else { "False" }.to_string(),
            (Value::Bool(b), _) => b.to_string(),
            (Value::Nil, Dialect::Python) => "None".to_string(),
            (Value::Nil, _) => "undefined".to_string(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::Nil => "NoneType",
        }
    }
}

fn python_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e16 {
        return format!("{:.1}", f);
    }
    if f.abs() >= 1e16 || (f != 0.0 && f.abs() < 1e-4) {
        let s = format!("{:e}", f);
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{:0>2}", mantissa, exp),
            Some((mantissa, exp)) => format!("{}e-{:0>2}", mantissa, &exp[1..]),
            None => s,
        };
    }
    f.to_string()
}

fn js_number(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e21 {
        return format!("{:.0}", f);
    }
    f.to_string()
}

/// Why evaluation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The simulator does not understand this construct
    Unsupported(String),
    /// The program itself would fail here, e.g. division by zero
    Runtime(String),
}

/// Supplies variables and built-in functions to the evaluator
pub trait Host {
    fn var(&self, name: &str) -> Option<Value>;

    fn call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, EvalError>;
}

/// Fails once a string would grow past [`MAX_STRING_BYTES`]
pub fn check_string_len(len: usize) -> Result<(), EvalError> {
    if len > MAX_STRING_BYTES {
        return Err(EvalError::Unsupported("string too large".into()));
    }
    Ok(())
}

fn string_bytes(value: &Value) -> usize {
    match value {
        Value::Str(s) => s.len(),
        _ => 0,
    }
}

/// Variable store with no callable functions. Refuses writes once the
/// string bytes it holds would pass a fixed ceiling.
#[derive(Debug, Default)]
pub struct Vars {
    values: HashMap<String, Value>,
    held: usize,
}

impl Vars {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        let previous = self.values.get(name).map(string_bytes).unwrap_or(0);
        let held = self.held - previous + string_bytes(&value);
        if held > MAX_HELD_BYTES {
            return Err(EvalError::Unsupported("too much data held in variables".into()));
        }
        self.held = held;
        self.values.insert(name.to_string(), value);
        Ok(())
    }
}

impl Host for Vars {
    fn var(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn call(&mut self, name: &str, _: Vec<Value>, _: Vec<(String, Value)>) -> Result<Value, EvalError> {
        Err(EvalError::Unsupported(format!("call to {}", name)))
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Assign,
}

fn tokenize(src: &str, dialect: Dialect) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' if c != '.' || chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                if text.contains('.') {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| EvalError::Unsupported(format!("number {}", text)))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| EvalError::Unsupported(format!("number {}", text)))?;
                    tokens.push(Token::Int(n));
                }
            }
            '\'' | '"' | '`' if dialect != Dialect::ShellArith => {
                if c == '`' && dialect != Dialect::JavaScript {
                    return Err(EvalError::Unsupported("backtick".into()));
                }
                let (s, next) = read_string(&chars, i)?;
                if c == '`' && s.contains("${") {
                    return Err(EvalError::Unsupported("template literal".into()));
                }
                tokens.push(Token::Str(s));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' || (c == '$' && dialect == Dialect::ShellArith) => {
                if c == '$' {
                    i += 1;
                }
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op("**"));
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') && dialect == Dialect::Python => {
                tokens.push(Token::Op("//"));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => "%",
                }));
                i += 1;
            }
            '=' if chars.get(i + 1) != Some(&'=') => {
                tokens.push(Token::Assign);
                i += 1;
            }
            other => return Err(EvalError::Unsupported(format!("character '{}'", other))),
        }
    }

    Ok(tokens)
}

/// Read a quoted literal starting at `start`; returns the unescaped text and
/// the index just past the closing quote.
fn read_string(chars: &[char], start: usize) -> Result<(String, usize), EvalError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(EvalError::Unsupported("unterminated string".into()))
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    dialect: Dialect,
    depth: usize,
    nodes: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), EvalError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(EvalError::Unsupported(format!("expected {:?}, found {:?}", token, other))),
        }
    }

    /// Count an interior node; bounds both the tree's depth and its size
    fn node(&mut self, expr: Expr) -> Result<Expr, EvalError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(EvalError::Unsupported("expression too large".into()));
        }
        Ok(expr)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        while let Some(Token::Op(op @ ("+" | "-"))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = self.node(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ("*" | "/" | "//" | "%"))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = self.node(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    /// Every recursive path passes through here, so the nesting check lives here
    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::Unsupported("expression too deeply nested".into()));
        }
        self.depth += 1;
        let expr = self.prefixed();
        self.depth -= 1;
        expr
    }

    fn prefixed(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Token::Op("-")) => {
                self.pos += 1;
                let inner = self.unary()?;
                self.node(Expr::Neg(Box::new(inner)))
            }
            Some(Token::Op("+")) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if let Some(Token::Op("**")) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return self.node(Expr::Binary("**", Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Lit(Value::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Lit(Value::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.additive()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if let Some(literal) = self.keyword_literal(&name) {
                    return Ok(Expr::Lit(literal));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.call(name);
                }
                Ok(Expr::Var(name))
            }
            other => Err(EvalError::Unsupported(format!("unexpected {:?}", other))),
        }
    }

    fn keyword_literal(&self, name: &str) -> Option<Value> {
        match (self.dialect, name) {
            (Dialect::Python, "True") | (Dialect::JavaScript, "true") => Some(Value::Bool(true)),
            (Dialect::Python, "False") | (Dialect::JavaScript, "false") => Some(Value::Bool(false)),
            (Dialect::Python, "None") | (Dialect::JavaScript, "undefined" | "null") => Some(Value::Nil),
            _ => None,
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, EvalError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return self.node(Expr::Call { name, args, kwargs });
        }

        loop {
            match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                (Some(Token::Ident(key)), Some(Token::Assign)) => {
                    let key = key.clone();
                    self.pos += 2;
                    kwargs.push((key, self.additive()?));
                }
                _ => args.push(self.additive()?),
            }

            match self.next() {
                Some(Token::Comma) if self.peek() == Some(&Token::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(EvalError::Unsupported(format!("unexpected {:?} in call", other)))
                }
            }
        }

        self.node(Expr::Call { name, args, kwargs })
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Parse and evaluate `src` as a single expression
pub fn evaluate(src: &str, dialect: Dialect, host: &mut dyn Host) -> Result<Value, EvalError> {
    let tokens = tokenize(src, dialect)?;
    if tokens.is_empty() {
        return Err(EvalError::Unsupported("empty expression".into()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        dialect,
        depth: 0,
        nodes: 0,
    };
    let expr = parser.additive()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Unsupported("trailing tokens".into()));
    }
    let mut budget = EVAL_BYTE_BUDGET;
    eval(&expr, dialect, host, &mut budget)
}

/// Deduct a value's string bytes from the evaluation budget
fn charge(value: Value, budget: &mut usize) -> Result<Value, EvalError> {
    *budget = budget
        .checked_sub(string_bytes(&value))
        .ok_or_else(|| EvalError::Unsupported("string too large".into()))?;
    Ok(value)
}

fn eval(expr: &Expr, dialect: Dialect, host: &mut dyn Host, budget: &mut usize) -> Result<Value, EvalError> {
    match expr {
        Expr::Lit(v) => charge(v.clone(), budget),
        Expr::Var(name) => match host.var(name) {
            Some(v) => charge(v, budget),
            None if dialect == Dialect::ShellArith => Ok(Value::Int(0)),
            None if dialect == Dialect::Python => Err(EvalError::Runtime(format!(
                "NameError: name '{}' is not defined",
                name
            ))),
            None => Err(EvalError::Runtime(format!(
                "ReferenceError: {} is not defined",
                name
            ))),
        },
        Expr::Neg(inner) => {
            let v = eval(inner, dialect, host, budget)?;
            match v {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Unsupported("integer overflow".into())),
                other => other
                    .as_f64()
                    .map(|f| Value::Float(-f))
                    .ok_or_else(|| type_error(dialect, "unary -", &other, &Value::Nil)),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, dialect, host, budget)?;
            let r = eval(rhs, dialect, host, budget)?;
            charge(binary(op, l, r, dialect)?, budget)
        }
        Expr::Call { name, args, kwargs } => {
            let args = args
                .iter()
                .map(|a| eval(a, dialect, host, budget))
                .collect::<Result<Vec<_>, _>>()?;
            let kwargs = kwargs
                .iter()
                .map(|(k, v)| Ok((k.clone(), eval(v, dialect, host, budget)?)))
                .collect::<Result<Vec<_>, EvalError>>()?;
            charge(host.call(name, args, kwargs)?, budget)
        }
    }
}

fn type_error(dialect: Dialect, op: &str, l: &Value, r: &Value) -> EvalError {
    match dialect {
        Dialect::Python => EvalError::Runtime(format!(
            "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
            op,
            l.type_name(),
            r.type_name()
        )),
        _ => EvalError::Unsupported(format!("operator {} on {:?} and {:?}", op, l, r)),
    }
}

fn binary(op: &str, l: Value, r: Value, dialect: Dialect) -> Result<Value, EvalError> {
    match dialect {
        Dialect::Python => python_binary(op, l, r),
        Dialect::JavaScript => js_binary(op, l, r),
        Dialect::ShellArith => shell_binary(op, l, r),
    }
}

fn python_binary(op: &str, l: Value, r: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Unsupported("integer overflow".into());
    let zero_division = |what: &str| EvalError::Runtime(format!("ZeroDivisionError: {}", what));

    match (op, &l, &r) {
        ("+", Value::Str(a), Value::Str(b)) => {
            check_string_len(a.len() + b.len())?;
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        ("*", Value::Str(s), n @ (Value::Int(_) | Value::Bool(_)))
        | ("*", n @ (Value::Int(_) | Value::Bool(_)), Value::Str(s)) => {
            let count = n.as_i64().unwrap_or(0).max(0) as usize;
            check_string_len(s.len().saturating_mul(count))?;
            return Ok(Value::Str(s.repeat(count)));
        }
        _ => {}
    }

    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        return match op {
            "+" => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            "-" => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            "*" => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            "/" if b == 0 => Err(zero_division("division by zero")),
            "/" => Ok(Value::Float(a as f64 / b as f64)),
            "//" if b == 0 => Err(zero_division("integer division or modulo by zero")),
            "//" => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let floor = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Ok(Value::Int(floor))
            }
            "%" if b == 0 => Err(zero_division("integer modulo by zero")),
            "%" => {
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            "**" if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Value::Int)
                .ok_or_else(overflow),
            "**" => Ok(Value::Float((a as f64).powf(b as f64))),
            _ => Err(EvalError::Unsupported(format!("operator {}", op))),
        };
    }

    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => match op {
            "+" => Ok(Value::Float(a + b)),
            "-" => Ok(Value::Float(a - b)),
            "*" => Ok(Value::Float(a * b)),
            "/" | "//" | "%" if b == 0.0 => Err(zero_division("float division by zero")),
            "/" => Ok(Value::Float(a / b)),
            "//" => Ok(Value::Float((a / b).floor())),
            "%" => Ok(Value::Float(a - b * (a / b).floor())),
            "**" => Ok(Value::Float(a.powf(b))),
            _ => Err(EvalError::Unsupported(format!("operator {}", op))),
        },
        _ => Err(type_error(Dialect::Python, op, &l, &r)),
    }
}

fn js_binary(op: &str, l: Value, r: Value) -> Result<Value, EvalError> {
    if op == "+" && (matches!(l, Value::Str(_)) || matches!(r, Value::Str(_))) {
        let (a, b) = (l.display(Dialect::JavaScript), r.display(Dialect::JavaScript));
        check_string_len(a.len() + b.len())?;
        return Ok(Value::Str(a + &b));
    }

    let to_number = |v: &Value| match v {
        Value::Str(s) if s.trim().is_empty() => Some(0.0),
        Value::Str(s) => Some(s.trim().parse::<f64>().unwrap_or(f64::NAN)),
        Value::Nil => Some(f64::NAN),
        other => other.as_f64(),
    };

    match (to_number(&l), to_number(&r)) {
        (Some(a), Some(b)) => match op {
            "+" => Ok(Value::Float(a + b)),
            "-" => Ok(Value::Float(a - b)),
            "*" => Ok(Value::Float(a * b)),
            "/" => Ok(Value::Float(a / b)),
            "%" => Ok(Value::Float(a % b)),
            "**" => Ok(Value::Float(a.powf(b))),
            _ => Err(EvalError::Unsupported(format!("operator {}", op))),
        },
        _ => Err(type_error(Dialect::JavaScript, op, &l, &r)),
    }
}

fn shell_binary(op: &str, l: Value, r: Value) -> Result<Value, EvalError> {
    let to_int = |v: &Value| match v {
        Value::Str(s) => s.trim().parse::<i64>().unwrap_or(0),
        other => other.as_i64().unwrap_or(0),
    };
    let (a, b) = (to_int(&l), to_int(&r));
    let overflow = || EvalError::Unsupported("integer overflow".into());

    match op {
        "+" => Ok(Value::Int(a.wrapping_add(b))),
        "-" => Ok(Value::Int(a.wrapping_sub(b))),
        "*" => Ok(Value::Int(a.wrapping_mul(b))),
        "/" | "%" if b == 0 => Err(EvalError::Runtime("division by 0 (error token is \"0\")".into())),
        "/" => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
        "%" => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        "**" if b < 0 => Err(EvalError::Runtime("exponent less than 0".into())),
        "**" => Ok(Value::Int(a.wrapping_pow(u32::try_from(b).unwrap_or(u32::MAX)))),
        _ => Err(EvalError::Unsupported(format!("operator {}", op))),
    }
}
