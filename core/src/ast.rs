//! The typed abstract syntax tree and the type model behind it. There is no
//! functionality implemented here beyond sizing and rendering; the parser
//! builds these types and the code generator walks them.
//!
//! Types are held in a [TypeTable] arena and referenced by [TypeId], so
//! cyclic types (a record containing a pointer to itself) never need owning
//! pointers back into the tree.

use crate::symbol::{Scopes, SymbolId, SymbolLookup};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::{
    convert::TryFrom,
    fmt::{self, Display, Formatter},
};

/// The primitive type codes. These travel in bytecode operands (comparison
/// and return instructions carry one) so the representation is fixed.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum SimpleType {
    Address = 0,
    Boolean = 1,
    Char = 2,
    Integer = 3,
    Real = 4,
    String = 5,
    Set = 6,
    Void = 7,
    /// Matches anything; used by polymorphic native parameters
    Any = 8,
}

impl Display for SimpleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Address => "Address",
            Self::Boolean => "Boolean",
            Self::Char => "Char",
            Self::Integer => "Integer",
            Self::Real => "Real",
            Self::String => "String",
            Self::Set => "Set",
            Self::Void => "Void",
            Self::Any => "Any",
        };
        write!(f, "{}", name)
    }
}

/// One word of the data store. Every value in the language occupies one or
/// more of these; all simple types fit in exactly one.
#[derive(Clone, Debug, Serialize)]
pub enum Word {
    Int(i32),
    Real(f64),
    Bool(bool),
    Char(char),
    Str(String),
}

impl PartialEq for Word {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bit comparison, so the constant pool can de-duplicate reals
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Word {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Real(value) => write!(f, "{}", value),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Char(value) => write!(f, "{}", value),
            Self::Str(value) => write!(f, "{}", value),
        }
    }
}

/// Index of a type in the [TypeTable].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TypeId(pub(crate) usize);

/// A constant index range of one array dimension, `low..high` inclusive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Range {
    pub low: i32,
    pub high: i32,
}

impl Range {
    /// Number of elements in the range.
    pub fn count(&self) -> usize {
        if self.high < self.low {
            0
        } else {
            (self.high - self.low + 1) as usize
        }
    }
}

/// One field of a record type. `offset` is the word offset from the start of
/// the record: the sum of the sizes of all preceding fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub ty: TypeId,
}

/// One parameter of a subprogram type. A by-reference parameter occupies one
/// word (the address) regardless of referent size.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
    pub by_reference: bool,
}

/// A type expression. Compound types reference their component types through
/// the [TypeTable].
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Simple(SimpleType),
    /// `array [R1, R2, ...] of T`, all dimensions in one node
    Array { ranges: Vec<Range>, element: TypeId },
    /// `record f1; f2; ... end`, fields laid out sequentially
    Record { fields: Vec<Field> },
    /// `^Name`. `target_name` is `None` for the generic `Pointer` type;
    /// `pointee` is `None` while a forward reference is unresolved.
    Pointer {
        target_name: Option<String>,
        pointee: Option<TypeId>,
    },
    /// The type of a procedure or function; not a value type
    Subprogram { params: Vec<Param>, ret: TypeId },
}

/// Arena of every type in a compilation, pre-seeded with one canonical entry
/// per [SimpleType] (so simple type ids can be derived from the code) plus
/// the generic pointer type.
#[derive(Clone, Debug)]
pub struct TypeTable {
    types: Vec<Type>,
    generic_pointer: TypeId,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut types: Vec<Type> = (0..=u8::from(SimpleType::Any))
            .map(|code| Type::Simple(SimpleType::try_from(code).unwrap()))
            .collect();
        let generic_pointer = TypeId(types.len());
        types.push(Type::Pointer {
            target_name: None,
            pointee: None,
        });
        Self {
            types,
            generic_pointer,
        }
    }

    /// The canonical id of a simple type.
    pub fn simple_id(&self, code: SimpleType) -> TypeId {
        TypeId(u8::from(code) as usize)
    }

    /// The generic `Pointer` type, compatible with every pointer.
    pub fn generic_pointer(&self) -> TypeId {
        self.generic_pointer
    }

    pub fn add(&mut self, ty: Type) -> TypeId {
        self.types.push(ty);
        TypeId(self.types.len() - 1)
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0]
    }

    /// Fill in the pointee of a forward pointer type.
    pub(crate) fn resolve_pointer(&mut self, id: TypeId, target: TypeId) {
        match &mut self.types[id.0] {
            Type::Pointer { pointee, .. } => *pointee = Some(target),
            other => panic!("resolve_pointer on non-pointer {:?}", other),
        }
    }

    /// The simple type code of a type, if it is a simple type.
    pub fn simple(&self, id: TypeId) -> Option<SimpleType> {
        match self.get(id) {
            Type::Simple(code) => Some(*code),
            _ => None,
        }
    }

    /// Size of a value of this type, in data-store words.
    pub fn size(&self, id: TypeId) -> usize {
        match self.get(id) {
            Type::Simple(_) | Type::Pointer { .. } => 1,
            Type::Array { ranges, element } => {
                let elements: usize =
                    ranges.iter().map(Range::count).product();
                elements * self.size(*element)
            }
            Type::Record { fields } => {
                fields.iter().map(|field| self.size(field.ty)).sum()
            }
            Type::Subprogram { .. } => 0,
        }
    }

    /// Human-readable rendering, for error messages.
    pub fn describe(&self, id: TypeId) -> String {
        match self.get(id) {
            Type::Simple(code) => code.to_string(),
            Type::Array { ranges, element } => {
                let dims: Vec<String> = ranges
                    .iter()
                    .map(|range| format!("{}..{}", range.low, range.high))
                    .collect();
                format!(
                    "array [{}] of {}",
                    dims.join(", "),
                    self.describe(*element)
                )
            }
            Type::Record { .. } => "record".into(),
            Type::Pointer {
                target_name: Some(name),
                ..
            } => format!("^{}", name),
            Type::Pointer {
                target_name: None, ..
            } => "Pointer".into(),
            Type::Subprogram { .. } => "subprogram".into(),
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Unary expression operators.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// Binary expression operators.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    /// `/`: both operands are cast to real
    Divide,
    /// `div`: integer division
    IntDivide,
    Modulo,
    And,
    Or,
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessThanOrEquals,
    GreaterThanOrEquals,
}

impl BinaryOp {
    /// The source spelling, for error messages.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::IntDivide => "div",
            Self::Modulo => "mod",
            Self::And => "and",
            Self::Or => "or",
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessThanOrEquals => "<=",
            Self::GreaterThanOrEquals => ">=",
        }
    }

    /// Does this operator produce a Boolean regardless of operand type?
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Self::Equals
                | Self::NotEquals
                | Self::LessThan
                | Self::GreaterThan
                | Self::LessThanOrEquals
                | Self::GreaterThanOrEquals
        )
    }
}

/// One postfix designator applied to a variable: `[e, ...]`, `.field` or
/// `^`.
#[derive(Clone, Debug, PartialEq)]
pub enum Designator {
    /// Array indexing; one expression per indexed dimension. `ty` is the
    /// type after applying the indexes (the element type, or a smaller
    /// array when fewer indexes than dimensions were given).
    Index { indexes: Vec<ExprNode>, ty: TypeId },
    /// Record field selection, resolved to an offset at parse time
    Field {
        name: String,
        offset: usize,
        ty: TypeId,
    },
    /// Pointer dereference
    Deref,
}

/// A resolved reference to a variable, function result slot or constant
/// symbol, with any designators applied to it. `ty` is the type after all
/// designators.
#[derive(Clone, Debug, PartialEq)]
pub struct VarAccess {
    pub lookup: SymbolLookup,
    pub name: String,
    pub path: Vec<Designator>,
    pub ty: TypeId,
    pub line: u32,
}

/// A resolved call to a user subprogram or native procedure.
#[derive(Clone, Debug, PartialEq)]
pub struct CallExpr {
    pub lookup: SymbolLookup,
    pub name: String,
    pub args: Vec<ExprNode>,
}

/// An expression. Every node carries its type and source line.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprNode {
    pub kind: Expr,
    pub ty: TypeId,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Integer literal; also pointer literals (`Nil` folds to 0 with a
    /// pointer type)
    Integer(i32),
    Real(f64),
    Str(String),
    CharLit(char),
    Boolean(bool),
    Variable(VarAccess),
    /// `@v`: the address of a variable, as a generic pointer
    AddressOf(VarAccess),
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Call(CallExpr),
    /// An implicit cast inserted by the type checker. The node's `ty` is the
    /// target; integer→real is the only cast that emits code.
    Cast { operand: Box<ExprNode> },
}

/// A statement. Carries its source line for error reporting.
#[derive(Clone, Debug, PartialEq)]
pub struct StmtNode {
    pub kind: Stmt,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// `begin ... end`
    Compound(Vec<StmtNode>),
    Assign {
        target: VarAccess,
        value: ExprNode,
    },
    Call(CallExpr),
    If {
        condition: ExprNode,
        then_branch: Box<StmtNode>,
        else_branch: Option<Box<StmtNode>>,
    },
    While {
        condition: ExprNode,
        body: Box<StmtNode>,
    },
    Repeat {
        body: Vec<StmtNode>,
        condition: ExprNode,
    },
    For {
        variable: VarAccess,
        start: ExprNode,
        end: ExprNode,
        downto: bool,
        body: Box<StmtNode>,
    },
    /// `exit`: jump to the enclosing subprogram's return instruction
    Exit,
    Empty,
}

/// Flattened initializer data for one typed constant, in declaration order.
/// Multi-dimensional arrays are flattened row-major.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawData {
    pub data: Vec<Word>,
    pub simple_type_codes: Vec<SimpleType>,
}

impl RawData {
    pub(crate) fn push(&mut self, word: Word, code: SimpleType) {
        self.data.push(word);
        self.simple_type_codes.push(code);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A typed constant declaration: a pre-initialized variable whose data is
/// stored in the program image and copied into the frame on entry. `offset`
/// is the mark-relative frame address of its first word.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedConstant {
    pub offset: usize,
    pub data: RawData,
}

/// A procedure, function or the main program. Owns its local scope, typed
/// constants, nested subprograms and body.
#[derive(Clone, Debug)]
pub struct Subprogram {
    pub name: String,
    /// This subprogram's symbol in the enclosing scope. The code generator
    /// patches its address to the entry instruction.
    pub symbol: SymbolId,
    pub scope: crate::symbol::ScopeId,
    /// Return type; `Void` for procedures and the main program
    pub ret: TypeId,
    /// Mark + parameters + variables + typed constants, in words
    pub frame_size: usize,
    pub nested: Vec<Subprogram>,
    pub typed_constants: Vec<TypedConstant>,
    pub body: StmtNode,
}

impl Subprogram {
    /// Does this subprogram return a value?
    pub fn is_function(&self) -> bool {
        self.ret != TypeId(u8::from(SimpleType::Void) as usize)
    }
}

/// The parsed and type-checked program: the root subprogram plus the arenas
/// the tree references into.
#[derive(Clone, Debug)]
pub struct Program {
    pub root: Subprogram,
    pub types: TypeTable,
    pub scopes: Scopes,
}
