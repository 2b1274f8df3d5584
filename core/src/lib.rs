//! Core implementation of a Turbo-Pascal-3 flavored language. The main usage
//! of this crate is to compile a source program to p-code and execute it on
//! the [Machine], a stack/heap interpreter driven cooperatively by the
//! embedder. Host integration (output, keyboard, extra `uses` modules) goes
//! through the [Host] trait and the [native::ModuleRegistry].
//!
//! ```
//! use turbo::{compile, Host, Machine};
//!
//! struct Stdout;
//! impl Host for Stdout {
//!     fn writeln(&mut self, line: &str) {
//!         println!("{}", line);
//!     }
//! }
//!
//! let source = "
//! program Hello;
//! begin
//!     WriteLn('Hello')
//! end.
//! ";
//!
//! let bytecode = compile(source).unwrap();
//! let mut machine = Machine::new(bytecode, Box::new(Stdout));
//! machine.run();
//! assert!(machine.error().is_none());
//! ```

#![deny(clippy::all)]

pub mod ast;
pub mod bytecode;
mod compile;
mod consts;
pub mod error;
mod lex;
mod machine;
pub mod native;
mod parse;
pub mod symbol;

pub use bytecode::{Bytecode, Opcode};
pub use consts::{DEFAULT_STEP_BUDGET, DSTORE_SIZE, MARK_SIZE};
pub use machine::{Host, Machine, MachineHandle, MachineState, StepOutcome};

use crate::{
    error::CompileErrorReport,
    native::ModuleRegistry,
};

pub use ast::Word;
pub use lex::{Token, TokenKind};

/// Struct used to compile a program. `T` represents the current stage of the
/// pipeline: it starts empty, becomes the typed AST after parsing, and ends
/// as [Bytecode].
#[derive(Debug)]
pub struct Compiler<T> {
    // Deliberately private, to prevent direct construction
    pub(crate) source: String,
    pub(crate) stage: T,
}

impl Compiler<()> {
    /// Compile a source program against a set of host modules. The resulting
    /// bytecode can be handed to a [Machine] for execution.
    pub fn compile(
        source: String,
        modules: &ModuleRegistry,
    ) -> Result<Bytecode, CompileErrorReport> {
        Self { source, stage: () }.parse(modules)?.generate()
    }
}

/// Compile a source program with only the builtin module available.
pub fn compile(source: &str) -> Result<Bytecode, CompileErrorReport> {
    Compiler::compile(source.into(), &ModuleRegistry::default())
}
