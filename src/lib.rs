//! cpslisp - embeddable Lisp evaluation core
//!
//! This crate evaluates symbolic expressions with an explicit continuation-passing
//! trampoline instead of native recursion. Every pending computation lives on the heap as
//! an immutable continuation node, which gives the evaluator three properties at once:
//!
//! - native stack usage stays constant no matter how deeply the interpreted program recurses,
//!   and calls in tail position never grow the continuation either;
//! - every callable (built-in, closure, macro, captured continuation) shares one calling
//!   convention with required, optional and rest arguments;
//! - `call/cc` hands out continuations that can be re-entered any number of times.
//!
//! ```lisp
//! (setq count-down (lambda (n) (if (< n 1) 'done (count-down (- n 1)))))
//! (count-down 10000000)        ; constant stack
//! (+ 1 (call/cc (lambda (k) (k 41))))   ; => 42
//! ```
//!
//! ## Modules
//!
//! - `ast`: the value model (pairs, symbols, numbers, strings, procedures, nil)
//! - `scope`: chained variable frames
//! - `evaluator`: the trampoline, the calling convention and the special forms
//! - `builtinops`: leaf primitives (arithmetic, predicates, pairs, output)
//! - `reader`: text to value graph (feature `reader`, on by default)

/// Maximum nesting depth accepted by the reader.
/// The reader is recursive descent, so this bounds its native stack use.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum number of enclosing expressions recorded in an error backtrace.
/// A failure at the bottom of a deep non-tail recursion would otherwise copy the whole
/// continuation chain into the error.
pub const MAX_BACKTRACE_DEPTH: usize = 128;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
    /// Literal outside what the value model can hold (integer overflow)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let prefix = input.get(..context_start).unwrap_or("");
        let context_str: String = input
            .get(context_start..)
            .unwrap_or("")
            .chars()
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if !prefix.is_empty() {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.chars().next())
            .map(|c| c.to_string());

        Self::new(kind, message, Some(display_context), found)
    }
}

/// What went wrong during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Wrong argument count for a call
    #[error("ArityError")]
    ArityError,
    /// A value of the wrong variant where a specific one is required
    #[error("TypeError")]
    TypeError,
    /// Variable lookup miss
    #[error("SymbolNotSet")]
    SymbolNotSet,
    /// The operator position of a call did not evaluate to a procedure
    #[error("NotAProcedure")]
    NotAProcedure,
    /// `lambda`/`macro` parameter syntax violation
    #[error("MalformedParameterList")]
    MalformedParameterList,
    /// Illegal characters in a constructed symbol
    #[error("InvalidSymbol")]
    InvalidSymbol,
    /// Failure reported by a primitive (overflow, division by zero, I/O)
    #[error("EvalError")]
    EvalError,
    /// Failure reported by the reader
    #[error("ParseError")]
    ParseError,
}

/// Error type for the interpreter.
///
/// `trace` holds the expression that was being evaluated when the error was raised
/// followed by every enclosing expression still waiting on it, innermost first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Vec<ast::Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArityError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EvalError, message)
    }

    pub fn malformed_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedParameterList, message)
    }

    /// Render the error the way a driver shows it: enclosing expressions outermost first,
    /// then the message.
    pub fn report(&self) -> String {
        let mut out = String::from("*** Exception:\n\n");
        for expr in self.trace.iter().rev() {
            out.push_str(&expr.to_string());
            out.push('\n');
        }
        out.push_str("\n*** ");
        out.push_str(&self.to_string());
        out
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        let mut message = e.message;
        if let Some(found) = e.found {
            message.push_str(&format!("\nFound: {found}"));
        }
        if let Some(context) = e.context {
            message.push_str(&format!("\nContext: {context}"));
        }
        Error::new(ErrorKind::ParseError, message)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod scope;

#[cfg(feature = "reader")]
pub mod reader;

pub use ast::{Symbol, Value};
pub use evaluator::{create_global_scope, evaluate, evaluate_sequence};
pub use scope::Scope;
