//! All error-related types. One error category per pipeline half: everything
//! up to and including code generation raises a [CompileError], execution
//! raises a [RuntimeError]. Both are reported with whatever location
//! information the stage has: the offending token for compile errors, the
//! faulting instruction address for runtime errors. The first error aborts
//! the stage; there is no recovery.

use crate::lex::Token;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// An error that occurs while compiling a program, at lex, parse or code
/// generation time. The error is due to a flaw in the program. This indicates
/// a user error, _not_ an internal compiler error. Compiler bugs will always
/// cause a panic.
#[derive(Clone, Debug, Error, Serialize)]
pub enum CompileError {
    // --- lex ---
    #[error("unknown character `{0}`")]
    UnknownCharacter(char),
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated comment")]
    UnterminatedComment,

    // --- parse/scope ---
    /// `expected` names the kind of element that should have appeared
    #[error("expected {expected}")]
    Expected { expected: &'static str },
    /// A specific symbol or word was required
    #[error("expected `{0}`")]
    ExpectedToken(String),
    #[error("duplicate identifier `{0}`")]
    DuplicateIdentifier(String),
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("unknown module `{0}`")]
    UnknownModule(String),
    #[error("unresolved forward reference to type `{0}`")]
    UnresolvedPointerTarget(String),
    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: String, to: String },
    #[error("operands of `{operator}` are incompatible ({lhs} and {rhs})")]
    IncompatibleOperands {
        operator: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("condition must be Boolean, not {0}")]
    NonBooleanCondition(String),
    #[error("`{name}` expects {expected} arguments but got {actual}")]
    WrongArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("array index must be Integer")]
    NonIntegerIndex,
    #[error("`^` applied to non-pointer {0}")]
    DerefNonPointer(String),
    #[error("cannot assign to constant `{0}`")]
    AssignToConstant(String),
    #[error("`{0}` is not a procedure or function")]
    NotCallable(String),
    #[error("typed constants of record type are not supported")]
    RecordTypedConstant,
    #[error("initializer has {actual} elements but the range holds {expected}")]
    InitializerCount { expected: usize, actual: usize },

    // --- code generation ---
    #[error("bytecode operand {0} out of range")]
    OperandOutOfRange(i64),
    #[error("bytecode operand would be negative")]
    NegativeOperand,
}

/// An error that occurs during execution of a program. The error is due to a
/// flaw in the program, _not_ a bug in the interpreter. Interpreter bugs will
/// always panic.
#[derive(Copy, Clone, Debug, Error, Serialize)]
pub enum RuntimeError {
    #[error("divide by zero")]
    DivideByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("invalid data address {0}")]
    InvalidAddress(i64),
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("stack exhausted")]
    StackExhausted,
    #[error("heap exhausted")]
    HeapExhausted,
}

/// A [CompileError] plus the location information available when it was
/// raised: the offending token (value and line) when there is one, or at
/// least a line number.
#[derive(Clone, Debug, Error, Serialize)]
pub struct CompileErrorReport {
    error: CompileError,
    token: Option<Token>,
    line: Option<u32>,
}

impl CompileErrorReport {
    pub(crate) fn new(error: CompileError, token: Option<Token>) -> Self {
        let line = token.as_ref().map(|token| token.line);
        Self { error, token, line }
    }

    pub(crate) fn at_line(error: CompileError, line: u32) -> Self {
        Self {
            error,
            token: None,
            line: Some(line),
        }
    }

    pub(crate) fn bare(error: CompileError) -> Self {
        Self {
            error,
            token: None,
            line: None,
        }
    }

    /// The underlying error.
    pub fn error(&self) -> &CompileError {
        &self.error
    }

    /// The offending token, if the stage that raised the error had one.
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    /// The source line the error was raised against, if known.
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl Display for CompileErrorReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Compile error at line {}: ", line)?,
            None => write!(f, "Compile error: ")?,
        }
        write!(f, "{}", self.error)?;
        if let Some(token) = &self.token {
            write!(f, " (near `{}`)", token)?;
        }
        Ok(())
    }
}

/// A [RuntimeError] plus the istore address of the faulting instruction.
#[derive(Copy, Clone, Debug, Error, Serialize)]
pub struct RuntimeErrorReport {
    error: RuntimeError,
    address: usize,
}

impl RuntimeErrorReport {
    pub(crate) fn new(error: RuntimeError, address: usize) -> Self {
        Self { error, address }
    }

    /// The underlying error.
    pub fn error(&self) -> RuntimeError {
        self.error
    }

    /// The istore address of the instruction that faulted.
    pub fn address(&self) -> usize {
        self.address
    }
}

impl Display for RuntimeErrorReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime error at address {}: {}", self.address, self.error)
    }
}
