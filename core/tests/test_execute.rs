//! Integration tests that compile and execute whole programs, checking
//! their output and the machine's final state.

use std::{cell::RefCell, rc::Rc};
use turbo::{compile, Host, Machine, StepOutcome, DSTORE_SIZE};

/// Host that collects output lines for assertions.
#[derive(Clone, Default)]
struct TestHost {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Host for TestHost {
    fn writeln(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.into());
    }
}

/// Compile and run a program to completion; panic on any error. Returns the
/// stopped machine and the collected output lines.
fn execute(source: &str) -> (Machine, Vec<String>) {
    let bytecode = compile(source).unwrap_or_else(|error| panic!("{}", error));
    let host = TestHost::default();
    let lines = Rc::clone(&host.lines);
    let mut machine = Machine::new(bytecode, Box::new(host));
    machine.run();
    if let Some(error) = machine.error() {
        panic!("{}", error);
    }
    let output = lines.borrow().clone();
    (machine, output)
}

macro_rules! assert_output {
    ($src:expr, $expected:expr $(,)?) => {
        let (_machine, output) = execute($src);
        let expected: Vec<&str> = $expected.to_vec();
        assert_eq!(output, expected);
    };
}

#[test]
fn test_hello() {
    assert_output!(
        "program P; begin WriteLn('Hello') end.",
        ["Hello"],
    );
}

#[test]
fn test_for_loop_sum() {
    assert_output!(
        "program P;
         var i: Integer; s: Integer;
         begin
             s := 0;
             for i := 1 to 10 do
                 s := s + i;
             WriteLn(s)
         end.",
        ["55"],
    );
}

#[test]
fn test_recursive_fibonacci() {
    assert_output!(
        "program P;
         function F(n: Integer): Integer;
         begin
             if n < 2 then
                 F := n
             else
                 F := F(n - 1) + F(n - 2)
         end;
         begin
             WriteLn(F(10))
         end.",
        ["55"],
    );
}

#[test]
fn test_new_and_dispose() {
    let (machine, output) = execute(
        "program P;
         var p: ^Integer;
         begin
             New(p);
             p^ := 7;
             WriteLn(p^);
             Dispose(p)
         end.",
    );
    assert_eq!(output, vec!["7"]);
    // The only heap block was released, so the heap is empty again
    assert_eq!(machine.np(), DSTORE_SIZE);
}

#[test]
fn test_record_fields() {
    assert_output!(
        "program P;
         type R = record x, y: Integer end;
         var r: R;
         begin
             r.x := 3;
             r.y := 4;
             WriteLn(r.x + r.y)
         end.",
        ["7"],
    );
}

#[test]
fn test_typed_constant_array() {
    let source = "program P;
         const A: array[1..3] of Integer = (10, 20, 30);
         var i: Integer;
         begin
             for i := 1 to 3 do
                 WriteLn(A[i])
         end.";
    let bytecode = compile(source).unwrap();
    assert_eq!(bytecode.typed_constants.len(), 3);
    // On load, the stack starts just above the typed-constant blob
    let machine = Machine::new(bytecode, Box::new(TestHost::default()));
    assert_eq!(machine.sp(), 3);
    assert_eq!(machine.np(), DSTORE_SIZE);

    assert_output!(source, ["10", "20", "30"]);
}

#[test]
fn test_two_dimensional_typed_constant() {
    assert_output!(
        "program P;
         const M: array[1..2, 1..2] of Integer = ((1, 2), (3, 4));
         begin
             WriteLn(M[2, 1])
         end.",
        ["3"],
    );
}

#[test]
fn test_for_downto_while_repeat() {
    assert_output!(
        "program P;
         var i, s: Integer;
         begin
             s := 0;
             for i := 10 downto 1 do
                 s := s + i;
             WriteLn(s);
             i := 0;
             while i < 5 do
                 i := i + 2;
             WriteLn(i);
             i := 0;
             repeat
                 i := i + 1
             until i >= 3;
             WriteLn(i)
         end.",
        ["55", "6", "3"],
    );
}

#[test]
fn test_for_loop_bounds() {
    // An empty range runs zero times; on fall-through the loop variable has
    // passed the bound by one
    assert_output!(
        "program P;
         var i, n: Integer;
         begin
             n := 0;
             for i := 3 to 1 do
                 n := n + 1;
             WriteLn(n);
             for i := 1 to 4 do
                 n := n + 1;
             WriteLn(n);
             WriteLn(i)
         end.",
        ["0", "4", "5"],
    );
}

#[test]
fn test_nested_procedures_static_links() {
    assert_output!(
        "program P;
         var g: Integer;
         procedure Outer;
         var x: Integer;
             procedure Inner;
             begin
                 x := x + 1;
                 g := g + x
             end;
         begin
             x := 10;
             Inner;
             Inner;
             WriteLn(g)
         end;
         begin
             g := 0;
             Outer;
             WriteLn(g)
         end.",
        ["23", "23"],
    );
}

#[test]
fn test_by_reference_parameters() {
    assert_output!(
        "program P;
         var a, b: Integer;
         procedure Swap(var x, y: Integer);
         var t: Integer;
         begin
             t := x;
             x := y;
             y := t
         end;
         begin
             a := 1;
             b := 2;
             Swap(a, b);
             WriteLn(a);
             WriteLn(b)
         end.",
        ["2", "1"],
    );
}

#[test]
fn test_record_assignment_copies() {
    assert_output!(
        "program P;
         type R = record x, y: Integer end;
         var a, b: R;
         begin
             a.x := 3;
             a.y := 4;
             b := a;
             a.x := 0;
             WriteLn(b.x + b.y)
         end.",
        ["7"],
    );
}

#[test]
fn test_multi_dimensional_arrays() {
    assert_output!(
        "program P;
         var m: array[1..2, 1..3] of Integer;
             i, j, s: Integer;
         begin
             for i := 1 to 2 do
                 for j := 1 to 3 do
                     m[i, j] := i * 10 + j;
             WriteLn(m[2, 1]);
             s := 0;
             for i := 1 to 2 do
                 for j := 1 to 3 do
                     s := s + m[i][j];
             WriteLn(s)
         end.",
        ["21", "102"],
    );
}

#[test]
fn test_exit_leaves_subprogram() {
    assert_output!(
        "program P;
         var i: Integer;
         procedure Go;
         begin
             i := 1;
             exit;
             i := 2
         end;
         begin
             i := 0;
             Go;
             WriteLn(i)
         end.",
        ["1"],
    );
}

#[test]
fn test_strings_and_chars() {
    assert_output!(
        "program P; begin WriteLn('it''s', ' ', 'ok') end.",
        ["it's ok"],
    );
}

#[test]
fn test_write_buffers_until_writeln() {
    assert_output!(
        "program P;
         begin
             Write('a');
             Write('b');
             WriteLn;
             WriteLn('x = ', 5)
         end.",
        ["ab", "x = 5"],
    );
}

#[test]
fn test_arithmetic_operators() {
    assert_output!(
        "program P;
         begin
             WriteLn(7 div 2);
             WriteLn(7 mod 2);
             WriteLn(7 / 2);
             WriteLn(2 + 3 * 4);
             WriteLn(-(2 - 5))
         end.",
        ["3", "1", "3.5", "14", "3"],
    );
}

#[test]
fn test_integer_arithmetic_wraps() {
    assert_output!(
        "program P; begin WriteLn(MaxInt + 1) end.",
        ["-2147483648"],
    );
}

#[test]
fn test_boolean_operators_and_comparisons() {
    assert_output!(
        "program P;
         begin
             WriteLn(True and not False);
             if (1 < 2) or (3 < 2) then
                 WriteLn('yes')
             else
                 WriteLn('no');
             WriteLn('abc' < 'abd');
             WriteLn(2.5 >= 2.5)
         end.",
        ["True", "yes", "True", "True"],
    );
}

#[test]
fn test_builtin_functions() {
    assert_output!(
        "program P;
         begin
             WriteLn(Abs(-5));
             WriteLn(Abs(-2.5));
             WriteLn(Trunc(3.7));
             WriteLn(Round(3.7));
             WriteLn(Odd(3));
             WriteLn(Chr(65));
             WriteLn(Ord('A'));
             WriteLn(Sqrt(16.0))
         end.",
        ["5", "2.5", "3", "4", "True", "A", "65", "4"],
    );
}

#[test]
fn test_inc_with_and_without_delta() {
    assert_output!(
        "program P;
         var i: Integer;
         begin
             i := 5;
             Inc(i);
             WriteLn(i);
             Inc(i, 10);
             WriteLn(i)
         end.",
        ["6", "16"],
    );
}

#[test]
fn test_halt_stops_execution() {
    assert_output!(
        "program P;
         begin
             WriteLn('before');
             Halt;
             WriteLn('after')
         end.",
        ["before"],
    );
}

#[test]
fn test_delay_surfaces_between_batches() {
    let bytecode = compile(
        "program P; begin Delay(50); WriteLn('done') end.",
    )
    .unwrap();
    let host = TestHost::default();
    let lines = Rc::clone(&host.lines);
    let mut machine = Machine::new(bytecode, Box::new(host));

    let mut delays = Vec::new();
    loop {
        match machine.step(1_000) {
            StepOutcome::Running => {}
            StepOutcome::NeedsDelay(ms) => delays.push(ms),
            StepOutcome::Halted => break,
        }
    }
    assert_eq!(delays, vec![50]);
    assert_eq!(*lines.borrow(), vec!["done".to_string()]);
}

#[test]
fn test_getmem_and_pointer_sharing() {
    let (machine, output) = execute(
        "program P;
         var p: ^Integer;
             q: Pointer;
         begin
             GetMem(p, 3);
             p^ := 42;
             q := p;
             WriteLn(p^);
             Dispose(p)
         end.",
    );
    assert_eq!(output, vec!["42"]);
    assert_eq!(machine.np(), DSTORE_SIZE);
}

#[test]
fn test_finish_callback_fires_once() {
    use std::cell::Cell;
    let bytecode =
        compile("program P; begin WriteLn('x') end.").unwrap();
    let mut machine =
        Machine::new(bytecode, Box::new(TestHost::default()));
    let fired = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&fired);
    machine.set_finish_callback(move |_| seen.set(seen.get() + 1));
    machine.run();
    machine.stop();
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_debug_callback_traces_instructions() {
    let bytecode = compile("program P; begin end.").unwrap();
    let mut machine =
        Machine::new(bytecode, Box::new(TestHost::default()));
    let trace = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&trace);
    machine.set_debug_callback(move |line| {
        sink.borrow_mut().push(line.to_string())
    });
    machine.run();
    // MST, CUP, ENT, RTN, STP
    assert_eq!(trace.borrow().len(), 5);
    assert!(trace.borrow()[0].contains("MST"));
}

#[test]
fn test_uses_imports_a_registered_module() {
    use turbo::{
        ast::SimpleType,
        error::CompileError,
        native::{ModuleEnv, ModuleRegistry, NativeDecl},
        Compiler,
    };

    fn noise(env: &mut ModuleEnv<'_>) -> Result<(), CompileError> {
        let void = env.types.simple_id(SimpleType::Void);
        env.define_native(NativeDecl {
            name: "Beep",
            ret: void,
            params: vec![],
            variadic: false,
            defaults: vec![],
            inline: None,
            run: |handle, _args| {
                handle.write("beep");
                handle.writeln();
                Ok(None)
            },
        })
    }

    let mut modules = ModuleRegistry::new();
    modules.register("noise", noise);

    let bytecode = Compiler::compile(
        "program P; uses noise; begin Beep end.".into(),
        &modules,
    )
    .unwrap();
    let host = TestHost::default();
    let lines = Rc::clone(&host.lines);
    let mut machine = Machine::new(bytecode, Box::new(host));
    machine.run();
    assert_eq!(*lines.borrow(), vec!["beep".to_string()]);
}

#[test]
fn test_random_returns_integer_below_limit() {
    assert_output!(
        "program P;
         var i: Integer;
         begin
             Randomize;
             i := Random(10);
             WriteLn((i >= 0) and (i < 10))
         end.",
        ["True"],
    );
}

#[test]
fn test_comments_are_ignored() {
    assert_output!(
        "program P; { a comment }
         (* another
            comment *)
         begin
             WriteLn(1) { trailing }
         end.",
        ["1"],
    );
}
