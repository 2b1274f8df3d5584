//! Host-provided "native" procedures and the module system that registers
//! them. A native is an ordered entry in a [NativeRegistry]; its index is
//! stored on the declaring symbol and emitted as the `CSP` call-site
//! operand. The `__builtin__` module installed into every root scope
//! provides the standard types, constants and procedures; further modules
//! (`crt`, `graph`, ...) are registered by the embedder and imported with
//! `uses`.

use crate::{
    ast::{Param, SimpleType, Type, TypeId, TypeTable, Word},
    bytecode::Opcode,
    error::{CompileError, RuntimeError},
    machine::MachineHandle,
    symbol::{ScopeId, Scopes, Symbol},
};
use std::{collections::HashMap, convert::TryFrom, fmt};

/// The signature of a native implementation. Arguments arrive in declaration
/// order; by-reference parameters arrive as data-store addresses. Returning
/// `Some` pushes the value (functions), `None` pushes nothing (procedures).
pub type NativeFn =
    fn(&mut MachineHandle<'_>, Vec<Word>) -> Result<Option<Word>, RuntimeError>;

/// One registered native procedure. The declared parameter and return types
/// live on the symbol; this is the runtime + call-site view.
#[derive(Clone)]
pub struct NativeProcedure {
    pub name: String,
    /// Accepts any number of arguments of any simple type (Write/WriteLn)
    pub variadic: bool,
    /// Values appended at the call site when trailing arguments are omitted
    /// (`Inc` gets a delta of 1)
    pub defaults: Vec<Word>,
    /// When set, calls compile to this opcode instead of `CSP`
    pub inline: Option<Opcode>,
    pub run: NativeFn,
}

/// Ordered table of native procedures; the index of an entry is the `CSP`
/// operand that calls it.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    procedures: Vec<NativeProcedure>,
}

impl NativeRegistry {
    /// Record a native and return its index.
    pub fn register(&mut self, procedure: NativeProcedure) -> usize {
        self.procedures.push(procedure);
        self.procedures.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&NativeProcedure> {
        self.procedures.get(index)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .procedures
            .iter()
            .map(|procedure| procedure.name.as_str())
            .collect();
        f.debug_tuple("NativeRegistry").field(&names).finish()
    }
}

/// Everything a module may add to: the type table, the scope being imported
/// into, and the native registry.
pub struct ModuleEnv<'a> {
    pub types: &'a mut TypeTable,
    pub scopes: &'a mut Scopes,
    pub scope: ScopeId,
    pub natives: &'a mut NativeRegistry,
}

/// Declaration of one native, handed to [ModuleEnv::define_native].
pub struct NativeDecl {
    pub name: &'static str,
    pub ret: TypeId,
    /// `(type, by_reference)` per parameter
    pub params: Vec<(TypeId, bool)>,
    pub variadic: bool,
    pub defaults: Vec<Word>,
    pub inline: Option<Opcode>,
    pub run: NativeFn,
}

impl<'a> ModuleEnv<'a> {
    /// Add a named type to the scope.
    pub fn define_type(
        &mut self,
        name: &str,
        ty: TypeId,
    ) -> Result<(), CompileError> {
        self.scopes.define_type(self.scope, name, ty)
    }

    /// Add a compile-time constant to the scope.
    pub fn define_constant(
        &mut self,
        name: &str,
        ty: TypeId,
        value: Word,
    ) -> Result<(), CompileError> {
        self.scopes
            .define(
                self.scope,
                Symbol {
                    name: name.into(),
                    ty,
                    address: 0,
                    is_native: false,
                    by_reference: false,
                    value: Some(value),
                },
            )
            .map(|_| ())
    }

    /// Register a native procedure: records the runtime entry, builds the
    /// subprogram type (with by-reference flags on the parameters) and binds
    /// a symbol whose address is the registry index.
    pub fn define_native(
        &mut self,
        decl: NativeDecl,
    ) -> Result<(), CompileError> {
        let params = decl
            .params
            .iter()
            .enumerate()
            .map(|(i, &(ty, by_reference))| Param {
                name: format!("a{}", i),
                ty,
                by_reference,
            })
            .collect();
        let ty = self.types.add(Type::Subprogram {
            params,
            ret: decl.ret,
        });
        let index = self.natives.register(NativeProcedure {
            name: decl.name.into(),
            variadic: decl.variadic,
            defaults: decl.defaults,
            inline: decl.inline,
            run: decl.run,
        });
        self.scopes
            .define(
                self.scope,
                Symbol {
                    name: decl.name.into(),
                    ty,
                    address: index,
                    is_native: true,
                    by_reference: false,
                    value: None,
                },
            )
            .map(|_| ())
    }
}

/// A module initializer: populates a [ModuleEnv] when the module is imported.
pub type ModuleInit = fn(&mut ModuleEnv<'_>) -> Result<(), CompileError>;

/// Named host modules importable with `uses`. The builtin module is not in
/// here; it is installed into every root scope automatically.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleInit>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a module available to `uses`. Name matching is case-insensitive.
    pub fn register(&mut self, name: &str, init: ModuleInit) {
        self.modules.insert(name.to_lowercase(), init);
    }

    pub(crate) fn get(&self, name: &str) -> Option<ModuleInit> {
        self.modules.get(&name.to_lowercase()).copied()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> =
            self.modules.keys().map(String::as_str).collect();
        f.debug_tuple("ModuleRegistry").field(&names).finish()
    }
}

/// Install the `__builtin__` module: native types, constants, and the
/// standard functions and procedures.
pub(crate) fn install_builtin(env: &mut ModuleEnv<'_>) {
    builtin(env).expect("builtin module failed to install");
}

fn builtin(env: &mut ModuleEnv<'_>) -> Result<(), CompileError> {
    let integer = env.types.simple_id(SimpleType::Integer);
    let real = env.types.simple_id(SimpleType::Real);
    let boolean = env.types.simple_id(SimpleType::Boolean);
    let charty = env.types.simple_id(SimpleType::Char);
    let string = env.types.simple_id(SimpleType::String);
    let any = env.types.simple_id(SimpleType::Any);
    let void = env.types.simple_id(SimpleType::Void);
    let pointer = env.types.generic_pointer();

    // Native types. ShortInt/LongInt and Double are aliases; every integer
    // is an i32 and every real an f64 in this machine.
    env.define_type("String", string)?;
    env.define_type("Integer", integer)?;
    env.define_type("ShortInt", integer)?;
    env.define_type("LongInt", integer)?;
    env.define_type("Char", charty)?;
    env.define_type("Boolean", boolean)?;
    env.define_type("Real", real)?;
    env.define_type("Double", real)?;
    env.define_type("Pointer", pointer)?;

    // Constants
    env.define_constant("Nil", pointer, Word::Int(0))?;
    env.define_constant("True", boolean, Word::Bool(true))?;
    env.define_constant("False", boolean, Word::Bool(false))?;
    env.define_constant("Pi", real, Word::Real(std::f64::consts::PI))?;
    env.define_constant("MaxInt", integer, Word::Int(i32::MAX))?;

    // Real functions
    for &(name, run) in &[
        ("Sin", native_sin as NativeFn),
        ("Cos", native_cos as NativeFn),
        ("Sqrt", native_sqrt as NativeFn),
        ("Ln", native_ln as NativeFn),
        ("Sqr", native_sqr as NativeFn),
    ] {
        env.define_native(NativeDecl {
            name,
            ret: real,
            params: vec![(real, false)],
            variadic: false,
            defaults: vec![],
            inline: None,
            run,
        })?;
    }

    // Conversions; these compile straight to machine opcodes
    env.define_native(NativeDecl {
        name: "Round",
        ret: integer,
        params: vec![(real, false)],
        variadic: false,
        defaults: vec![],
        inline: Some(Opcode::Rnd),
        run: native_round,
    })?;
    env.define_native(NativeDecl {
        name: "Trunc",
        ret: integer,
        params: vec![(real, false)],
        variadic: false,
        defaults: vec![],
        inline: Some(Opcode::Trc),
        run: native_trunc,
    })?;
    env.define_native(NativeDecl {
        name: "Chr",
        ret: charty,
        params: vec![(integer, false)],
        variadic: false,
        defaults: vec![],
        inline: Some(Opcode::Chr),
        run: native_chr,
    })?;
    env.define_native(NativeDecl {
        name: "Ord",
        ret: integer,
        params: vec![(any, false)],
        variadic: false,
        defaults: vec![],
        inline: Some(Opcode::Ord),
        run: native_ord,
    })?;

    env.define_native(NativeDecl {
        name: "Odd",
        ret: boolean,
        params: vec![(integer, false)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_odd,
    })?;
    // Abs preserves its argument type; the parser strips the integer→real
    // cast so an integer argument yields an integer result
    env.define_native(NativeDecl {
        name: "Abs",
        ret: real,
        params: vec![(real, false)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_abs,
    })?;
    // Declared with no parameters returning real; the parser accepts an
    // optional integer limit and rewrites the call site to return integer
    env.define_native(NativeDecl {
        name: "Random",
        ret: real,
        params: vec![],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_random,
    })?;
    // The RNG is seeded by the host; Randomize is a no-op
    env.define_native(NativeDecl {
        name: "Randomize",
        ret: void,
        params: vec![],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_randomize,
    })?;

    env.define_native(NativeDecl {
        name: "Inc",
        ret: void,
        params: vec![(any, true), (integer, false)],
        variadic: false,
        defaults: vec![Word::Int(1)],
        inline: None,
        run: native_inc,
    })?;
    env.define_native(NativeDecl {
        name: "Write",
        ret: void,
        params: vec![],
        variadic: true,
        defaults: vec![],
        inline: None,
        run: native_write,
    })?;
    env.define_native(NativeDecl {
        name: "WriteLn",
        ret: void,
        params: vec![],
        variadic: true,
        defaults: vec![],
        inline: None,
        run: native_writeln,
    })?;
    env.define_native(NativeDecl {
        name: "Halt",
        ret: void,
        params: vec![],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_halt,
    })?;
    env.define_native(NativeDecl {
        name: "Delay",
        ret: void,
        params: vec![(integer, false)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_delay,
    })?;
    // New's size argument is hidden: the parser inserts the size in words of
    // the type pointed to by the first argument
    env.define_native(NativeDecl {
        name: "New",
        ret: void,
        params: vec![(pointer, true), (integer, false)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_new,
    })?;
    env.define_native(NativeDecl {
        name: "GetMem",
        ret: void,
        params: vec![(pointer, true), (integer, false)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_new,
    })?;
    env.define_native(NativeDecl {
        name: "Dispose",
        ret: void,
        params: vec![(pointer, true)],
        variadic: false,
        defaults: vec![],
        inline: None,
        run: native_dispose,
    })?;

    Ok(())
}

// --- argument helpers. A type mismatch here is a compiler bug, not a user
// error, so these panic.

fn int_arg(args: &[Word], index: usize) -> i32 {
    match &args[index] {
        Word::Int(value) => *value,
        other => panic!("native expected integer argument, got {:?}", other),
    }
}

fn real_arg(args: &[Word], index: usize) -> f64 {
    match &args[index] {
        Word::Real(value) => *value,
        Word::Int(value) => f64::from(*value),
        other => panic!("native expected real argument, got {:?}", other),
    }
}

fn addr_arg(args: &[Word], index: usize) -> usize {
    let value = int_arg(args, index);
    assert!(value >= 0, "native got negative address {}", value);
    value as usize
}

// --- implementations

fn native_sin(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Real(real_arg(&args, 0).sin())))
}

fn native_cos(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Real(real_arg(&args, 0).cos())))
}

fn native_sqrt(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Real(real_arg(&args, 0).sqrt())))
}

fn native_ln(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Real(real_arg(&args, 0).ln())))
}

fn native_sqr(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let value = real_arg(&args, 0);
    Ok(Some(Word::Real(value * value)))
}

fn native_round(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Int(real_arg(&args, 0).round() as i32)))
}

fn native_trunc(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Int(real_arg(&args, 0).trunc() as i32)))
}

fn native_chr(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let code = int_arg(&args, 0);
    let ch = u32::try_from(code)
        .ok()
        .and_then(std::char::from_u32)
        .unwrap_or('\0');
    Ok(Some(Word::Char(ch)))
}

fn native_ord(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let value = match &args[0] {
        Word::Char(ch) => *ch as i32,
        Word::Bool(b) => *b as i32,
        Word::Int(value) => *value,
        other => panic!("Ord of {:?}", other),
    };
    Ok(Some(Word::Int(value)))
}

fn native_odd(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(Some(Word::Bool(int_arg(&args, 0) % 2 != 0)))
}

fn native_abs(
    _: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let value = match &args[0] {
        Word::Int(value) => Word::Int(value.wrapping_abs()),
        Word::Real(value) => Word::Real(value.abs()),
        other => panic!("Abs of {:?}", other),
    };
    Ok(Some(value))
}

fn native_random(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    if args.is_empty() {
        Ok(Some(Word::Real(handle.random())))
    } else {
        let limit = int_arg(&args, 0);
        Ok(Some(Word::Int(handle.random_below(limit))))
    }
}

fn native_randomize(
    _: &mut MachineHandle<'_>,
    _: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    Ok(None)
}

fn native_inc(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let address = addr_arg(&args, 0);
    let delta = int_arg(&args, 1);
    let bumped = match handle.read_dstore(address)? {
        Word::Int(value) => Word::Int(value.wrapping_add(delta)),
        Word::Char(ch) => {
            let code = (ch as i32).wrapping_add(delta);
            let ch = u32::try_from(code)
                .ok()
                .and_then(std::char::from_u32)
                .unwrap_or('\0');
            Word::Char(ch)
        }
        other => panic!("Inc of {:?}", other),
    };
    handle.write_dstore(address, bumped)?;
    Ok(None)
}

fn native_write(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    for word in &args {
        handle.write(&word.to_string());
    }
    Ok(None)
}

fn native_writeln(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    for word in &args {
        handle.write(&word.to_string());
    }
    handle.writeln();
    Ok(None)
}

fn native_halt(
    handle: &mut MachineHandle<'_>,
    _: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    handle.stop();
    Ok(None)
}

fn native_delay(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let ms = int_arg(&args, 0).max(0) as u64;
    handle.delay(ms);
    Ok(None)
}

/// Shared by New and GetMem: allocate and store the block address through
/// the by-reference pointer argument.
fn native_new(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let address = addr_arg(&args, 0);
    let size = int_arg(&args, 1).max(0) as usize;
    let block = handle.malloc(size)?;
    handle.write_dstore(address, Word::Int(block as i32))?;
    Ok(None)
}

fn native_dispose(
    handle: &mut MachineHandle<'_>,
    args: Vec<Word>,
) -> Result<Option<Word>, RuntimeError> {
    let address = addr_arg(&args, 0);
    if let Word::Int(block) = handle.read_dstore(address)? {
        if block > 0 {
            handle.free(block as usize);
        }
    }
    handle.write_dstore(address, Word::Int(0))?;
    Ok(None)
}
