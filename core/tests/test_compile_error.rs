//! Integration tests for programs that should fail to compile, checking the
//! reported message, offending token and line number.

use turbo::compile;

/// Compile a program, expecting a particular compile error. Panics if the
/// program compiles, or if the report renders differently.
macro_rules! assert_compile_error {
    ($src:expr, $expected:expr $(,)?) => {
        let error = compile($src).unwrap_err();
        assert_eq!(error.to_string(), $expected);
    };
}

#[test]
fn test_string_to_integer_assignment() {
    assert_compile_error!(
        "program P;\nvar i: Integer;\nbegin\n    i := 'hi'\nend.",
        "Compile error at line 4: cannot cast String to Integer",
    );
}

#[test]
fn test_unknown_identifier() {
    assert_compile_error!(
        "program P;\nbegin\n    x := 1\nend.",
        "Compile error at line 3: unknown identifier `x` (near `x`)",
    );
}

#[test]
fn test_duplicate_identifier() {
    assert_compile_error!(
        "program P;\nvar x: Integer;\n    x: Integer;\nbegin\nend.",
        "Compile error at line 3: duplicate identifier `x` (near `x`)",
    );
}

#[test]
fn test_unknown_type() {
    assert_compile_error!(
        "program P;\nvar x: Foo;\nbegin\nend.",
        "Compile error at line 2: unknown type `Foo` (near `Foo`)",
    );
}

#[test]
fn test_non_boolean_condition() {
    assert_compile_error!(
        "program P;\nbegin\n    if 1 then WriteLn('x')\nend.",
        "Compile error at line 3: condition must be Boolean, not Integer",
    );
    assert_compile_error!(
        "program P;\nbegin\n    while 'a' do WriteLn('x')\nend.",
        "Compile error at line 3: condition must be Boolean, not Char",
    );
}

#[test]
fn test_incompatible_operands() {
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn('ab' + 1)\nend.",
        "Compile error at line 3: operands of `+` are incompatible \
         (String and Integer)",
    );
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn(1.5 div 2)\nend.",
        "Compile error at line 3: operands of `div` are incompatible \
         (Real and Integer)",
    );
}

#[test]
fn test_wrong_arity() {
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn(Sin(1, 2))\nend.",
        "Compile error at line 3: `Sin` expects 1 arguments but got 2 \
         (near `Sin`)",
    );
}

#[test]
fn test_random_takes_at_most_one_argument() {
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn(Random(1, 2))\nend.",
        "Compile error at line 3: `Random` expects 1 arguments but got 2 \
         (near `Random`)",
    );
}

#[test]
fn test_record_typed_constant_rejected() {
    assert_compile_error!(
        "program P;\nconst R: record x: Integer end = (1);\nbegin\nend.",
        "Compile error at line 2: typed constants of record type are not \
         supported (near `R`)",
    );
}

#[test]
fn test_array_initializer_count() {
    assert_compile_error!(
        "program P;\nconst A: array[1..3] of Integer = (1, 2);\nbegin\nend.",
        "Compile error at line 2: initializer has 2 elements but the range \
         holds 3 (near `)`)",
    );
    assert_compile_error!(
        "program P;\nconst A: array[1..2] of Integer = (1, 2, 3);\nbegin\nend.",
        "Compile error at line 2: initializer has 3 elements but the range \
         holds 2 (near `)`)",
    );
}

#[test]
fn test_unresolved_forward_pointer() {
    assert_compile_error!(
        "program P;\ntype Q = ^Missing;\nbegin\nend.",
        "Compile error at line 2: unresolved forward reference to type \
         `Missing` (near `Missing`)",
    );
}

#[test]
fn test_forward_pointer_resolves_within_section() {
    // The mirror case: a forward reference that is declared later in the
    // same section is fine
    assert!(compile(
        "program P;\n\
         type Link = ^Node;\n\
              Node = record value: Integer; next: Link end;\n\
         var head: Link;\n\
         begin\n\
             head := Nil\n\
         end.",
    )
    .is_ok());
}

#[test]
fn test_unknown_module() {
    assert_compile_error!(
        "program P;\nuses foo;\nbegin\nend.",
        "Compile error at line 2: unknown module `foo` (near `foo`)",
    );
}

#[test]
fn test_assign_to_constant() {
    assert_compile_error!(
        "program P;\nconst C = 5;\nbegin\n    C := 1\nend.",
        "Compile error at line 4: cannot assign to constant `C` (near `C`)",
    );
}

#[test]
fn test_deref_non_pointer() {
    assert_compile_error!(
        "program P;\nvar i: Integer;\nbegin\n    i^ := 1\nend.",
        "Compile error at line 4: `^` applied to non-pointer Integer \
         (near `^`)",
    );
}

#[test]
fn test_unterminated_comment_and_string() {
    assert_compile_error!(
        "program P; { oops",
        "Compile error at line 1: unterminated comment",
    );
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn('oops)\nend.",
        "Compile error at line 3: unterminated string",
    );
}

#[test]
fn test_unknown_character() {
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn(1 $ 2)\nend.",
        "Compile error at line 3: unknown character `$` (near `$`)",
    );
}

#[test]
fn test_missing_separator() {
    assert_compile_error!(
        "program P;\nbegin\n    WriteLn(1)\n    WriteLn(2)\nend.",
        "Compile error at line 4: expected `end` (near `WriteLn`)",
    );
}

#[test]
fn test_by_reference_argument_must_be_variable() {
    assert_compile_error!(
        "program P;\nvar p: ^Integer;\nbegin\n    New(1 + 2)\nend.",
        "Compile error at line 4: expected variable",
    );
}

#[test]
fn test_pointer_type_mismatch() {
    assert_compile_error!(
        "program P;\n\
         type A = record x: Integer end;\n\
              B = record x: Integer end;\n\
         var pa: ^A; pb: ^B;\n\
         begin\n\
             pa := pb\n\
         end.",
        "Compile error at line 6: cannot cast ^B to ^A",
    );
}

#[test]
fn test_function_result_assignment_outside_function() {
    assert_compile_error!(
        "program P;\nprocedure Q;\nbegin\nend;\nbegin\n    Q := 1\nend.",
        "Compile error at line 6: expected assignable variable (near `Q`)",
    );
}
