//! Error handling for the interpreter.
//!
//! A `LuaError` carries the Lua error *value* (any value, most commonly a
//! string), a coarse kind used by the driver for exit-code mapping, and the
//! Lua-level traceback collected while the error unwinds through call frames.

use std::fmt;

use crate::value::LuaValue;

/// Coarse classification of an error, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Produced by the lexer, parser, semantic pre-pass, or binary chunk reader.
    Syntax,
    /// Wrong operand or argument type.
    Type,
    /// Integer division/modulo by zero, bad shift operands, and friends.
    Arith,
    /// Invalid table key (nil or NaN).
    Table,
    /// Const assignment, non-closable `<close>` value.
    Scope,
    /// Unresolved label or jump into a local's scope.
    Goto,
    /// Resume of a dead/running coroutine, yield from a forbidden context.
    Coroutine,
    /// Raised by `error(v)`.
    User,
    /// Everything else raised by the runtime.
    Runtime,
}

/// One collected frame of the Lua call stack, innermost first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: Option<String>,
    pub chunk: String,
    pub line: u32,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}: in function '{}'", self.chunk, self.line, name),
            None => write!(f, "{}:{}: in main chunk", self.chunk, self.line),
        }
    }
}

/// A raised Lua error travelling up through `Result`s.
#[derive(Debug, Clone)]
pub struct LuaError {
    kind: ErrorKind,
    value: LuaValue,
    /// Whether a `chunkname:line:` prefix has already been attached.
    positioned: bool,
    traceback: Vec<TraceFrame>,
}

impl LuaError {
    fn from_message(kind: ErrorKind, message: String) -> Self {
        LuaError {
            kind,
            value: LuaValue::from(message),
            positioned: false,
            traceback: Vec::new(),
        }
    }

    /// A plain runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Runtime, message.into())
    }

    /// Wrong operand/argument type, e.g. "attempt to index a nil value".
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Type, message.into())
    }

    /// Integer arithmetic faults and shift operand errors.
    pub fn arith(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Arith, message.into())
    }

    /// Invalid table key.
    pub fn table(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Table, message.into())
    }

    /// Const/close binding violations.
    pub fn scope(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Scope, message.into())
    }

    /// Label resolution failures.
    pub fn goto_label(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Goto, message.into())
    }

    /// Coroutine protocol violations.
    pub fn coroutine(message: impl Into<String>) -> Self {
        Self::from_message(ErrorKind::Coroutine, message.into())
    }

    /// A load-time error, already carrying its `chunkname:line:` prefix.
    pub fn syntax(chunk: &str, line: u32, message: impl Into<String>) -> Self {
        let mut err = Self::from_message(
            ErrorKind::Syntax,
            format!("{}:{}: {}", chunk, line, message.into()),
        );
        err.positioned = true;
        err
    }

    /// A load-time error whose message is already fully formed.
    pub fn syntax_plain(message: impl Into<String>) -> Self {
        let mut err = Self::from_message(ErrorKind::Syntax, message.into());
        err.positioned = true;
        err
    }

    /// An error raised by `error(v)`; the value is preserved unchanged.
    pub fn user(value: LuaValue) -> Self {
        LuaError {
            kind: ErrorKind::User,
            value,
            positioned: false,
            traceback: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The Lua value carried by this error (what `pcall` returns).
    pub fn value(&self) -> LuaValue {
        self.value.clone()
    }

    /// The error rendered as text, for host-side reporting.
    pub fn message(&self) -> String {
        match &self.value {
            LuaValue::Str(s) => s.to_string(),
            other => format!("(error object is a {} value)", other.type_name()),
        }
    }

    /// Attach the `chunkname:line:` prefix if the value is a string and no
    /// prefix has been attached yet.
    pub fn at(mut self, chunk: &str, line: u32) -> Self {
        if !self.positioned {
            if let LuaValue::Str(s) = &self.value {
                self.value = LuaValue::from(format!("{}:{}: {}", chunk, line, s));
            }
            self.positioned = true;
        }
        self
    }

    /// Mark the error as positioned without rewriting the value.
    pub fn mark_positioned(mut self) -> Self {
        self.positioned = true;
        self
    }

    /// Record a call frame while unwinding; frames arrive innermost first.
    pub fn trace_push(&mut self, frame: TraceFrame) {
        self.traceback.push(frame);
    }

    pub fn traceback(&self) -> &[TraceFrame] {
        &self.traceback
    }

    /// Render the collected traceback in the usual `stack traceback:` form.
    pub fn format_traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for frame in &self.traceback {
            out.push_str("\n\t");
            out.push_str(&frame.to_string());
        }
        out
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for LuaError {}

/// Convenience alias used throughout the interpreter.
pub type LuaResult<T> = Result<T, LuaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_message() {
        let err = LuaError::runtime("attempt to call a nil value");
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(err.message(), "attempt to call a nil value");
    }

    #[test]
    fn test_position_prefix_applied_once() {
        let err = LuaError::runtime("oops").at("test.lua", 7).at("other.lua", 99);
        assert_eq!(err.message(), "test.lua:7: oops");
    }

    #[test]
    fn test_syntax_error_is_prepositioned() {
        let err = LuaError::syntax("chunk", 3, "unexpected symbol");
        assert_eq!(err.message(), "chunk:3: unexpected symbol");
        let err = err.at("chunk", 5);
        assert_eq!(err.message(), "chunk:3: unexpected symbol");
    }

    #[test]
    fn test_user_error_value_preserved() {
        let err = LuaError::user(LuaValue::Integer(42)).at("chunk", 1);
        assert_eq!(err.value(), LuaValue::Integer(42));
    }

    #[test]
    fn test_traceback_formatting() {
        let mut err = LuaError::runtime("boom");
        err.trace_push(TraceFrame { name: Some("f".into()), chunk: "t.lua".into(), line: 2 });
        err.trace_push(TraceFrame { name: None, chunk: "t.lua".into(), line: 9 });
        let tb = err.format_traceback();
        assert!(tb.starts_with("stack traceback:"));
        assert!(tb.contains("in function 'f'"));
        assert!(tb.contains("in main chunk"));
    }
}
