//! Integration tests for programs that compile but fail during execution.

use std::{cell::Cell, rc::Rc};
use turbo::{compile, error::RuntimeError, Host, Machine, MachineState};

struct NullHost;

impl Host for NullHost {
    fn writeln(&mut self, _line: &str) {}
}

/// Compile and run a program, expecting it to stop with a runtime error.
/// Returns the stopped machine for further assertions.
fn execute_expecting_error(source: &str) -> Machine {
    let bytecode = compile(source).unwrap_or_else(|error| panic!("{}", error));
    let mut machine = Machine::new(bytecode, Box::new(NullHost));
    machine.run();
    assert!(
        machine.error().is_some(),
        "program completed without a runtime error",
    );
    assert_eq!(machine.state(), MachineState::Stopped);
    machine
}

macro_rules! assert_runtime_error {
    ($src:expr, $pattern:pat, $suffix:expr $(,)?) => {
        let machine = execute_expecting_error($src);
        let report = machine.error().unwrap();
        assert!(
            matches!(report.error(), $pattern),
            "unexpected error {:?}",
            report.error(),
        );
        let rendered = report.to_string();
        assert!(
            rendered.starts_with("Runtime error at address ")
                && rendered.ends_with($suffix),
            "unexpected report: {}",
            rendered,
        );
    };
}

#[test]
fn test_divide_by_zero() {
    assert_runtime_error!(
        "program P;
         var i: Integer;
         begin
             i := 0;
             WriteLn(10 div i)
         end.",
        RuntimeError::DivideByZero,
        "divide by zero",
    );
}

#[test]
fn test_literal_divide_by_zero() {
    assert_runtime_error!(
        "program P; begin WriteLn(10 div 0) end.",
        RuntimeError::DivideByZero,
        "divide by zero",
    );
}

#[test]
fn test_modulo_by_zero() {
    assert_runtime_error!(
        "program P;
         var i: Integer;
         begin
             i := 0;
             WriteLn(10 mod i)
         end.",
        RuntimeError::ModuloByZero,
        "modulo by zero",
    );
}

#[test]
fn test_real_divide_by_zero() {
    assert_runtime_error!(
        "program P; begin WriteLn(1.5 / 0) end.",
        RuntimeError::DivideByZero,
        "divide by zero",
    );
}

#[test]
fn test_dangling_pointer_is_invalid() {
    // q keeps the address of a released block; the gap check catches the
    // store through it
    assert_runtime_error!(
        "program P;
         var p, q: ^Integer;
         begin
             New(p);
             q := p;
             Dispose(p);
             q^ := 5
         end.",
        RuntimeError::InvalidAddress(_),
        "",
    );
}

#[test]
fn test_runaway_recursion_exhausts_stack() {
    assert_runtime_error!(
        "program P;
         procedure R;
         begin
             R
         end;
         begin
             R
         end.",
        RuntimeError::StackExhausted,
        "stack exhausted",
    );
}

#[test]
fn test_heap_exhaustion() {
    assert_runtime_error!(
        "program P;
         var p: ^Integer;
             i: Integer;
         begin
             for i := 1 to 5 do
                 GetMem(p, 20000)
         end.",
        RuntimeError::HeapExhausted,
        "heap exhausted",
    );
}

#[test]
fn test_finish_callback_fires_on_runtime_error() {
    let bytecode =
        compile("program P; begin WriteLn(1 div 0) end.").unwrap();
    let mut machine = Machine::new(bytecode, Box::new(NullHost));
    let fired = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&fired);
    machine.set_finish_callback(move |_| seen.set(seen.get() + 1));
    machine.run();
    machine.stop();
    assert!(machine.error().is_some());
    assert_eq!(fired.get(), 1);
}
