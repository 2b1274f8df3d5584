//! The recursive-descent parser: a single pass that builds the typed AST,
//! maintains the scope chain, checks types and inserts implicit casts.
//! Declaration sections (`uses`, `var`, `const`, `type`, subprograms) may
//! appear in any order and any number of times before a block's `begin`.

use crate::{
    ast::{
        BinaryOp, CallExpr, Designator, Expr, ExprNode, Param, Program, Range,
        RawData, SimpleType, Stmt, StmtNode, Subprogram, Type, TypeId,
        TypedConstant, UnaryOp, VarAccess, Word,
    },
    error::{CompileError, CompileErrorReport},
    lex::{CommentStripper, Lexer, Token, TokenKind},
    native::{self, ModuleEnv, ModuleRegistry, NativeRegistry},
    symbol::{ScopeId, Scopes, Symbol, SymbolLookup},
    Compiler,
};

type PResult<T> = Result<T, CompileErrorReport>;

/// Output of the parse stage: the program plus the native registry the
/// builtin module (and any `uses` imports) filled in.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub(crate) program: Program,
    pub(crate) natives: NativeRegistry,
}

impl Compiler<()> {
    /// Lex and parse the source, producing the typed AST.
    pub(crate) fn parse(
        self,
        modules: &ModuleRegistry,
    ) -> Result<Compiler<Parsed>, CompileErrorReport> {
        let parser = Parser::new(&self.source, modules);
        let (program, natives) = parser.parse_program()?;
        Ok(Compiler {
            source: self.source,
            stage: Parsed { program, natives },
        })
    }
}

struct Parser<'m> {
    tokens: CommentStripper,
    types: crate::ast::TypeTable,
    scopes: Scopes,
    natives: NativeRegistry,
    modules: &'m ModuleRegistry,
    current_scope: ScopeId,
    /// Unresolved `^Name` types of the current `type` section, back-patched
    /// at section end. `None` outside a section.
    forward_pointers: Option<Vec<(TypeId, Token)>>,
}

impl<'m> Parser<'m> {
    fn new(source: &str, modules: &'m ModuleRegistry) -> Self {
        let mut types = crate::ast::TypeTable::new();
        let mut scopes = Scopes::new();
        let root = scopes.push_scope(None);
        let mut natives = NativeRegistry::default();
        {
            let mut env = ModuleEnv {
                types: &mut types,
                scopes: &mut scopes,
                scope: root,
                natives: &mut natives,
            };
            native::install_builtin(&mut env);
        }
        Self {
            tokens: CommentStripper::new(Lexer::new(source)),
            types,
            scopes,
            natives,
            modules,
            current_scope: root,
            forward_pointers: None,
        }
    }

    // --- token plumbing

    fn next(&mut self) -> PResult<Token> {
        self.tokens.next()
    }

    fn peek(&mut self) -> PResult<&Token> {
        self.tokens.peek()
    }

    fn expect_symbol(&mut self, symbol: &str) -> PResult<Token> {
        let token = self.next()?;
        if token.is_symbol(symbol) {
            Ok(token)
        } else {
            Err(CompileErrorReport::new(
                CompileError::ExpectedToken(symbol.into()),
                Some(token),
            ))
        }
    }

    fn expect_reserved(&mut self, word: &str) -> PResult<Token> {
        let token = self.next()?;
        if token.is_reserved(word) {
            Ok(token)
        } else {
            Err(CompileErrorReport::new(
                CompileError::ExpectedToken(word.into()),
                Some(token),
            ))
        }
    }

    fn expect_identifier(&mut self, what: &'static str) -> PResult<Token> {
        let token = self.next()?;
        if token.kind == TokenKind::Identifier {
            Ok(token)
        } else {
            Err(CompileErrorReport::new(
                CompileError::Expected { expected: what },
                Some(token),
            ))
        }
    }

    /// Consume the upcoming token if it is the given symbol.
    fn eat_symbol(&mut self, symbol: &str) -> PResult<bool> {
        if self.peek()?.is_symbol(symbol) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Consume the upcoming token if it is the given reserved word.
    fn eat_reserved(&mut self, word: &str) -> PResult<bool> {
        if self.peek()?.is_reserved(word) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn err<T>(
        &self,
        error: CompileError,
        token: &Token,
    ) -> PResult<T> {
        Err(CompileErrorReport::new(error, Some(token.clone())))
    }

    fn define(
        &mut self,
        scope: ScopeId,
        symbol: Symbol,
        token: &Token,
    ) -> PResult<crate::symbol::SymbolId> {
        self.scopes
            .define(scope, symbol)
            .map_err(|error| {
                CompileErrorReport::new(error, Some(token.clone()))
            })
    }

    fn resolve(&mut self, token: &Token) -> PResult<SymbolLookup> {
        self.scopes
            .lookup(self.current_scope, &token.text)
            .ok_or_else(|| {
                CompileErrorReport::new(
                    CompileError::UnknownIdentifier(token.text.clone()),
                    Some(token.clone()),
                )
            })
    }

    fn void(&self) -> TypeId {
        self.types.simple_id(SimpleType::Void)
    }

    fn integer(&self) -> TypeId {
        self.types.simple_id(SimpleType::Integer)
    }

    fn boolean(&self) -> TypeId {
        self.types.simple_id(SimpleType::Boolean)
    }

    fn real(&self) -> TypeId {
        self.types.simple_id(SimpleType::Real)
    }

    // --- program structure

    /// Entry point: `program Name; <block> .`
    fn parse_program(
        mut self,
    ) -> PResult<(Program, NativeRegistry)> {
        self.expect_reserved("program")?;
        let name_token = self.expect_identifier("program name")?;
        // A `(input, output)` header is accepted and ignored
        if self.eat_symbol("(")? {
            loop {
                self.expect_identifier("file parameter")?;
                if !self.eat_symbol(",")? {
                    break;
                }
            }
            self.expect_symbol(")")?;
        }
        self.expect_symbol(";")?;

        let root = self.current_scope;
        let void = self.void();
        let program_ty = self.types.add(Type::Subprogram {
            params: vec![],
            ret: void,
        });
        let symbol = self.define(
            root,
            Symbol {
                name: name_token.text.clone(),
                ty: program_ty,
                address: 0,
                is_native: false,
                by_reference: false,
                value: None,
            },
            &name_token,
        )?;

        let scope = self.scopes.push_scope(Some(root));
        self.current_scope = scope;
        let (nested, typed_constants, body) = self.parse_block()?;
        self.expect_symbol(".")?;
        let trailing = self.peek()?.clone();
        if trailing.kind != TokenKind::Eof {
            return self.err(
                CompileError::Expected {
                    expected: "end of file",
                },
                &trailing,
            );
        }

        let root_subprogram = Subprogram {
            name: name_token.text,
            symbol,
            scope,
            ret: void,
            frame_size: self.scopes.table(scope).frame_size(),
            nested,
            typed_constants,
            body,
        };
        Ok((
            Program {
                root: root_subprogram,
                types: self.types,
                scopes: self.scopes,
            },
            self.natives,
        ))
    }

    /// Declarations in any order, then the `begin ... end` body.
    fn parse_block(
        &mut self,
    ) -> PResult<(Vec<Subprogram>, Vec<TypedConstant>, StmtNode)> {
        let mut nested = Vec::new();
        let mut typed_constants = Vec::new();
        loop {
            let token = self.peek()?.clone();
            if token.is_reserved("uses") {
                self.parse_uses()?;
            } else if token.is_reserved("var") {
                self.parse_var_section()?;
            } else if token.is_reserved("const") {
                self.parse_const_section(&mut typed_constants)?;
            } else if token.is_reserved("type") {
                self.parse_type_section()?;
            } else if token.is_reserved("procedure")
                || token.is_reserved("function")
            {
                nested.push(self.parse_subprogram()?);
            } else if token.is_reserved("begin") {
                let body = self.parse_compound()?;
                return Ok((nested, typed_constants, body));
            } else {
                return self.err(
                    CompileError::Expected {
                        expected: "declaration or `begin`",
                    },
                    &token,
                );
            }
        }
    }

    /// `uses Name, Name;` — import host modules into the current scope.
    fn parse_uses(&mut self) -> PResult<()> {
        self.next()?; // uses
        loop {
            let token = self.expect_identifier("module name")?;
            let init = match self.modules.get(&token.text) {
                Some(init) => init,
                None => {
                    return self.err(
                        CompileError::UnknownModule(token.text.clone()),
                        &token,
                    )
                }
            };
            let mut env = ModuleEnv {
                types: &mut self.types,
                scopes: &mut self.scopes,
                scope: self.current_scope,
                natives: &mut self.natives,
            };
            init(&mut env).map_err(|error| {
                CompileErrorReport::new(error, Some(token.clone()))
            })?;
            if !self.eat_symbol(",")? {
                break;
            }
        }
        self.expect_symbol(";")?;
        Ok(())
    }

    /// `var a, b: T; c: U;`
    fn parse_var_section(&mut self) -> PResult<()> {
        self.next()?; // var
        while self.peek()?.kind == TokenKind::Identifier {
            let mut names = vec![self.expect_identifier("variable name")?];
            while self.eat_symbol(",")? {
                names.push(self.expect_identifier("variable name")?);
            }
            self.expect_symbol(":")?;
            let ty = self.parse_type()?;
            self.expect_symbol(";")?;
            let size = self.types.size(ty);
            for token in names {
                self.scopes
                    .add_variable(self.current_scope, &token.text, ty, size)
                    .map_err(|error| {
                        CompileErrorReport::new(error, Some(token.clone()))
                    })?;
            }
        }
        Ok(())
    }

    /// `const N = expr;` or `const A: T = initializer;`
    fn parse_const_section(
        &mut self,
        typed_constants: &mut Vec<TypedConstant>,
    ) -> PResult<()> {
        self.next()?; // const
        while self.peek()?.kind == TokenKind::Identifier {
            let name = self.expect_identifier("constant name")?;
            if self.eat_symbol(":")? {
                // Typed constant: parsed according to the declared type
                let ty = self.parse_type()?;
                self.expect_symbol("=")?;
                let size = self.types.size(ty);
                let id = self
                    .scopes
                    .add_typed_constant(
                        self.current_scope,
                        &name.text,
                        ty,
                        size,
                    )
                    .map_err(|error| {
                        CompileErrorReport::new(error, Some(name.clone()))
                    })?;
                let mut data = RawData::default();
                self.parse_typed_const_data(ty, &mut data, &name)?;
                typed_constants.push(TypedConstant {
                    offset: self.scopes.symbol(id).address,
                    data,
                });
            } else {
                self.expect_symbol("=")?;
                let (value, ty) = self.parse_constant_value()?;
                self.define(
                    self.current_scope,
                    Symbol {
                        name: name.text.clone(),
                        ty,
                        address: 0,
                        is_native: false,
                        by_reference: false,
                        value: Some(value),
                    },
                    &name,
                )?;
            }
            self.expect_symbol(";")?;
        }
        Ok(())
    }

    /// A compile-time constant: an optionally negated literal or a reference
    /// to an earlier constant.
    fn parse_constant_value(&mut self) -> PResult<(Word, TypeId)> {
        let negate = self.eat_symbol("-")?;
        let token = self.next()?;
        let (value, ty) = match token.kind {
            TokenKind::Number => {
                let (word, ty) = self.number_literal(&token)?;
                (word, ty)
            }
            TokenKind::String => {
                let mut chars = token.text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => (
                        Word::Char(ch),
                        self.types.simple_id(SimpleType::Char),
                    ),
                    _ => (
                        Word::Str(token.text.clone()),
                        self.types.simple_id(SimpleType::String),
                    ),
                }
            }
            TokenKind::Identifier => {
                let lookup = self.resolve(&token)?;
                let symbol = self.scopes.symbol(lookup.symbol);
                match &symbol.value {
                    Some(value) => (value.clone(), symbol.ty),
                    None => {
                        return self.err(
                            CompileError::Expected {
                                expected: "constant",
                            },
                            &token,
                        )
                    }
                }
            }
            _ => {
                return self.err(
                    CompileError::Expected {
                        expected: "constant",
                    },
                    &token,
                )
            }
        };
        if negate {
            let value = match value {
                Word::Int(v) => Word::Int(v.wrapping_neg()),
                Word::Real(v) => Word::Real(-v),
                _ => {
                    return self.err(
                        CompileError::Expected { expected: "number" },
                        &token,
                    )
                }
            };
            return Ok((value, ty));
        }
        Ok((value, ty))
    }

    /// Parse a typed-constant initializer for `ty` into `raw`, flattening
    /// arrays row-major.
    fn parse_typed_const_data(
        &mut self,
        ty: TypeId,
        raw: &mut RawData,
        name: &Token,
    ) -> PResult<()> {
        match self.types.get(ty).clone() {
            Type::Simple(code) => {
                let token = self.peek()?.clone();
                let (value, value_ty) = self.parse_constant_value()?;
                let value = coerce_constant(value, code).map_err(|_| {
                    CompileErrorReport::new(
                        CompileError::InvalidCast {
                            from: self.types.describe(value_ty),
                            to: code.to_string(),
                        },
                        Some(token),
                    )
                })?;
                raw.push(value, code);
                Ok(())
            }
            Type::Pointer { .. } => {
                let token = self.peek()?.clone();
                let (value, value_ty) = self.parse_constant_value()?;
                match value {
                    Word::Int(_) => {
                        raw.push(value, SimpleType::Address);
                        Ok(())
                    }
                    _ => self.err(
                        CompileError::InvalidCast {
                            from: self.types.describe(value_ty),
                            to: self.types.describe(ty),
                        },
                        &token,
                    ),
                }
            }
            Type::Array { ranges, element } => {
                self.parse_array_initializer(&ranges, element, raw, name)
            }
            Type::Record { .. } | Type::Subprogram { .. } => {
                self.err(CompileError::RecordTypedConstant, name)
            }
        }
    }

    /// One pair of parentheses per array dimension, row-major; the element
    /// count of every dimension must match its range exactly.
    fn parse_array_initializer(
        &mut self,
        ranges: &[Range],
        element: TypeId,
        raw: &mut RawData,
        name: &Token,
    ) -> PResult<()> {
        self.expect_symbol("(")?;
        let expected = ranges[0].count();
        let mut actual = 0;
        loop {
            if ranges.len() > 1 {
                self.parse_array_initializer(&ranges[1..], element, raw, name)?;
            } else {
                self.parse_typed_const_data(element, raw, name)?;
            }
            actual += 1;
            if !self.eat_symbol(",")? {
                break;
            }
        }
        let close = self.expect_symbol(")")?;
        if actual != expected {
            return self.err(
                CompileError::InitializerCount { expected, actual },
                &close,
            );
        }
        Ok(())
    }

    /// `type Name = <type>; ...` with forward `^Name` references resolved at
    /// section end.
    fn parse_type_section(&mut self) -> PResult<()> {
        self.next()?; // type
        let previous = self.forward_pointers.replace(Vec::new());
        debug_assert!(previous.is_none(), "nested type sections");
        let result = self.parse_type_section_body();
        let forwards = self.forward_pointers.take().unwrap_or_default();
        result?;
        for (id, token) in forwards {
            let target_name = match self.types.get(id) {
                Type::Pointer {
                    target_name: Some(name),
                    pointee: None,
                } => name.clone(),
                // Already resolved while the section was still open
                _ => continue,
            };
            match self
                .scopes
                .lookup_type(self.current_scope, &target_name)
            {
                Some(target) => self.types.resolve_pointer(id, target),
                None => {
                    return self.err(
                        CompileError::UnresolvedPointerTarget(target_name),
                        &token,
                    )
                }
            }
        }
        Ok(())
    }

    fn parse_type_section_body(&mut self) -> PResult<()> {
        while self.peek()?.kind == TokenKind::Identifier {
            let name = self.expect_identifier("type name")?;
            self.expect_symbol("=")?;
            let ty = self.parse_type()?;
            self.expect_symbol(";")?;
            self.scopes
                .define_type(self.current_scope, &name.text, ty)
                .map_err(|error| {
                    CompileErrorReport::new(error, Some(name.clone()))
                })?;
        }
        Ok(())
    }

    /// A type expression: a type identifier, `array [..] of T`,
    /// `record ... end` or `^Name`.
    fn parse_type(&mut self) -> PResult<TypeId> {
        let token = self.peek()?.clone();
        if token.is_symbol("^") {
            self.next()?;
            let target = self.expect_identifier("type name")?;
            return match self
                .scopes
                .lookup_type(self.current_scope, &target.text)
            {
                Some(pointee) => Ok(self.types.add(Type::Pointer {
                    target_name: Some(target.text),
                    pointee: Some(pointee),
                })),
                None => {
                    // Within a type section a pointer may reference a type
                    // declared further down; collect it for back-patching
                    let id = self.types.add(Type::Pointer {
                        target_name: Some(target.text.clone()),
                        pointee: None,
                    });
                    match &mut self.forward_pointers {
                        Some(forwards) => {
                            forwards.push((id, target));
                            Ok(id)
                        }
                        None => self.err(
                            CompileError::UnknownType(target.text.clone()),
                            &target,
                        ),
                    }
                }
            };
        }
        if token.is_reserved("array") {
            self.next()?;
            self.expect_symbol("[")?;
            let mut ranges = vec![self.parse_range()?];
            while self.eat_symbol(",")? {
                ranges.push(self.parse_range()?);
            }
            self.expect_symbol("]")?;
            self.expect_reserved("of")?;
            let element = self.parse_type()?;
            return Ok(self.types.add(Type::Array { ranges, element }));
        }
        if token.is_reserved("record") {
            self.next()?;
            let mut fields = Vec::new();
            let mut offset = 0;
            loop {
                if self.eat_reserved("end")? {
                    break;
                }
                let mut names =
                    vec![self.expect_identifier("field name")?];
                while self.eat_symbol(",")? {
                    names.push(self.expect_identifier("field name")?);
                }
                self.expect_symbol(":")?;
                let ty = self.parse_type()?;
                let size = self.types.size(ty);
                for name in names {
                    if fields.iter().any(|field: &crate::ast::Field| {
                        field.name.eq_ignore_ascii_case(&name.text)
                    }) {
                        return self.err(
                            CompileError::DuplicateIdentifier(name.text.clone()),
                            &name,
                        );
                    }
                    fields.push(crate::ast::Field {
                        name: name.text,
                        offset,
                        ty,
                    });
                    offset += size;
                }
                if !self.eat_symbol(";")? {
                    self.expect_reserved("end")?;
                    break;
                }
            }
            return Ok(self.types.add(Type::Record { fields }));
        }
        if token.kind == TokenKind::Identifier {
            self.next()?;
            return self
                .scopes
                .lookup_type(self.current_scope, &token.text)
                .ok_or_else(|| {
                    CompileErrorReport::new(
                        CompileError::UnknownType(token.text.clone()),
                        Some(token),
                    )
                });
        }
        self.err(CompileError::Expected { expected: "type" }, &token)
    }

    /// `low..high`, both integer constants.
    fn parse_range(&mut self) -> PResult<Range> {
        let token = self.peek()?.clone();
        let (low, _) = self.parse_constant_value()?;
        self.expect_symbol("..")?;
        let (high, _) = self.parse_constant_value()?;
        match (low, high) {
            (Word::Int(low), Word::Int(high)) => Ok(Range { low, high }),
            _ => self.err(
                CompileError::Expected {
                    expected: "integer range",
                },
                &token,
            ),
        }
    }

    /// `procedure Name(params); <block>;` or
    /// `function Name(params): T; <block>;`
    fn parse_subprogram(&mut self) -> PResult<Subprogram> {
        let keyword = self.next()?;
        let is_function = keyword.is_reserved("function");
        let name = self.expect_identifier("subprogram name")?;
        let parent = self.current_scope;

        let mut params: Vec<Param> = Vec::new();
        if self.eat_symbol("(")? {
            loop {
                let by_reference = self.eat_reserved("var")?;
                let mut names =
                    vec![self.expect_identifier("parameter name")?];
                while self.eat_symbol(",")? {
                    names.push(self.expect_identifier("parameter name")?);
                }
                self.expect_symbol(":")?;
                let ty = self.parse_type_identifier()?;
                for token in names {
                    params.push(Param {
                        name: token.text,
                        ty,
                        by_reference,
                    });
                }
                if !self.eat_symbol(";")? {
                    break;
                }
            }
            self.expect_symbol(")")?;
        }
        let ret = if is_function {
            self.expect_symbol(":")?;
            self.parse_type_identifier()?
        } else {
            self.void()
        };
        self.expect_symbol(";")?;

        // Define the symbol before the body so recursion resolves
        let ty = self.types.add(Type::Subprogram {
            params: params.clone(),
            ret,
        });
        let symbol = self.define(
            parent,
            Symbol {
                name: name.text.clone(),
                ty,
                address: 0,
                is_native: false,
                by_reference: false,
                value: None,
            },
            &name,
        )?;

        let scope = self.scopes.push_scope(Some(parent));
        for param in &params {
            let size = self.types.size(param.ty);
            self.scopes
                .add_parameter(
                    scope,
                    &param.name,
                    param.ty,
                    param.by_reference,
                    size,
                )
                .map_err(|error| {
                    CompileErrorReport::new(error, Some(name.clone()))
                })?;
        }

        self.current_scope = scope;
        let (nested, typed_constants, body) = self.parse_block()?;
        self.expect_symbol(";")?;
        self.current_scope = parent;

        Ok(Subprogram {
            name: name.text,
            symbol,
            scope,
            ret,
            frame_size: self.scopes.table(scope).frame_size(),
            nested,
            typed_constants,
            body,
        })
    }

    /// Parameter and return types must be type identifiers.
    fn parse_type_identifier(&mut self) -> PResult<TypeId> {
        let token = self.expect_identifier("type name")?;
        self.scopes
            .lookup_type(self.current_scope, &token.text)
            .ok_or_else(|| {
                CompileErrorReport::new(
                    CompileError::UnknownType(token.text.clone()),
                    Some(token),
                )
            })
    }

    // --- statements

    /// `begin s; s; ... end`, trailing `;` optional, empty statements
    /// allowed.
    fn parse_compound(&mut self) -> PResult<StmtNode> {
        let begin = self.expect_reserved("begin")?;
        let mut statements = Vec::new();
        loop {
            if self.eat_reserved("end")? {
                break;
            }
            statements.push(self.parse_statement()?);
            if self.eat_symbol(";")? {
                continue;
            }
            self.expect_reserved("end")?;
            break;
        }
        Ok(StmtNode {
            kind: Stmt::Compound(statements),
            line: begin.line,
        })
    }

    fn parse_statement(&mut self) -> PResult<StmtNode> {
        let token = self.peek()?.clone();
        let line = token.line;

        if token.is_reserved("begin") {
            return self.parse_compound();
        }
        if token.is_reserved("if") {
            self.next()?;
            let condition = self.parse_expression()?;
            self.require_boolean(&condition)?;
            self.expect_reserved("then")?;
            let then_branch = Box::new(self.parse_statement()?);
            let else_branch = if self.eat_reserved("else")? {
                Some(Box::new(self.parse_statement()?))
            } else {
                None
            };
            return Ok(StmtNode {
                kind: Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                },
                line,
            });
        }
        if token.is_reserved("while") {
            self.next()?;
            let condition = self.parse_expression()?;
            self.require_boolean(&condition)?;
            self.expect_reserved("do")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(StmtNode {
                kind: Stmt::While { condition, body },
                line,
            });
        }
        if token.is_reserved("repeat") {
            self.next()?;
            let mut body = Vec::new();
            loop {
                if self.eat_reserved("until")? {
                    break;
                }
                body.push(self.parse_statement()?);
                if self.eat_symbol(";")? {
                    continue;
                }
                self.expect_reserved("until")?;
                break;
            }
            let condition = self.parse_expression()?;
            self.require_boolean(&condition)?;
            return Ok(StmtNode {
                kind: Stmt::Repeat { body, condition },
                line,
            });
        }
        if token.is_reserved("for") {
            return self.parse_for();
        }
        if token.is_reserved("exit") {
            self.next()?;
            return Ok(StmtNode {
                kind: Stmt::Exit,
                line,
            });
        }
        if token.kind == TokenKind::Identifier {
            return self.parse_identifier_statement();
        }
        // Empty statement: nothing before a separator or terminator
        if token.is_symbol(";")
            || token.is_reserved("end")
            || token.is_reserved("until")
        {
            return Ok(StmtNode {
                kind: Stmt::Empty,
                line,
            });
        }
        self.err(
            CompileError::Expected {
                expected: "statement",
            },
            &token,
        )
    }

    /// `for v := start to|downto end do body`. Bounds are implicitly cast to
    /// the loop variable's type.
    fn parse_for(&mut self) -> PResult<StmtNode> {
        let for_token = self.next()?; // for
        let name = self.expect_identifier("loop variable")?;
        let lookup = self.resolve(&name)?;
        let symbol = self.scopes.symbol(lookup.symbol).clone();
        if symbol.value.is_some() {
            return self
                .err(CompileError::AssignToConstant(name.text.clone()), &name);
        }
        if self.types.simple(symbol.ty).is_none()
            || matches!(self.types.get(symbol.ty), Type::Subprogram { .. })
        {
            return self.err(
                CompileError::Expected {
                    expected: "variable of simple type",
                },
                &name,
            );
        }
        let variable = VarAccess {
            lookup,
            name: name.text,
            path: vec![],
            ty: symbol.ty,
            line: name.line,
        };
        self.expect_symbol(":=")?;
        let start = self.parse_expression()?;
        let start = self.cast_expr(start, symbol.ty)?;
        let downto = if self.eat_reserved("to")? {
            false
        } else if self.eat_reserved("downto")? {
            true
        } else {
            let token = self.peek()?.clone();
            return self.err(
                CompileError::ExpectedToken("to".into()),
                &token,
            );
        };
        let end = self.parse_expression()?;
        let end = self.cast_expr(end, symbol.ty)?;
        self.expect_reserved("do")?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtNode {
            kind: Stmt::For {
                variable,
                start,
                end,
                downto,
                body,
            },
            line: for_token.line,
        })
    }

    /// A statement starting with an identifier: assignment, function-result
    /// assignment, or procedure call.
    fn parse_identifier_statement(&mut self) -> PResult<StmtNode> {
        let name = self.next()?;
        let line = name.line;
        let lookup = self.resolve(&name)?;
        let symbol = self.scopes.symbol(lookup.symbol).clone();

        if let Type::Subprogram { ret, .. } =
            self.types.get(symbol.ty).clone()
        {
            if self.peek()?.is_symbol(":=") {
                // Assignment to the enclosing function's result slot
                self.next()?;
                if ret == self.void() || lookup.level == 0 {
                    return self.err(
                        CompileError::Expected {
                            expected: "assignable variable",
                        },
                        &name,
                    );
                }
                let value = self.parse_expression()?;
                let value = self.cast_expr(value, ret)?;
                return Ok(StmtNode {
                    kind: Stmt::Assign {
                        target: VarAccess {
                            lookup,
                            name: name.text,
                            path: vec![],
                            ty: ret,
                            line,
                        },
                        value,
                    },
                    line,
                });
            }
            let (call, result) =
                self.parse_call_args(lookup, &symbol, &name)?;
            if result != self.void() {
                return self.err(
                    CompileError::Expected {
                        expected: "procedure",
                    },
                    &name,
                );
            }
            return Ok(StmtNode {
                kind: Stmt::Call(call),
                line,
            });
        }

        if symbol.value.is_some() {
            return self
                .err(CompileError::AssignToConstant(name.text.clone()), &name);
        }
        let target = self.parse_designators(lookup, &symbol, &name)?;
        self.expect_symbol(":=")?;
        let value = self.parse_expression()?;
        let value = self.cast_expr(value, target.ty)?;
        Ok(StmtNode {
            kind: Stmt::Assign { target, value },
            line,
        })
    }

    // --- expressions

    fn require_boolean(&self, expr: &ExprNode) -> PResult<()> {
        if self.types.simple(expr.ty) == Some(SimpleType::Boolean) {
            Ok(())
        } else {
            Err(CompileErrorReport::at_line(
                CompileError::NonBooleanCondition(
                    self.types.describe(expr.ty),
                ),
                expr.line,
            ))
        }
    }

    /// Lowest precedence: relational operators, yielding Boolean.
    fn parse_expression(&mut self) -> PResult<ExprNode> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = {
                let token = self.peek()?;
                if token.is_symbol("=") {
                    BinaryOp::Equals
                } else if token.is_symbol("<>") {
                    BinaryOp::NotEquals
                } else if token.is_symbol("<") {
                    BinaryOp::LessThan
                } else if token.is_symbol(">") {
                    BinaryOp::GreaterThan
                } else if token.is_symbol("<=") {
                    BinaryOp::LessThanOrEquals
                } else if token.is_symbol(">=") {
                    BinaryOp::GreaterThanOrEquals
                } else {
                    break;
                }
            };
            self.next()?;
            let rhs = self.parse_additive()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<ExprNode> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = {
                let token = self.peek()?;
                if token.is_symbol("+") {
                    BinaryOp::Add
                } else if token.is_symbol("-") {
                    BinaryOp::Subtract
                } else if token.is_reserved("or") {
                    BinaryOp::Or
                } else {
                    break;
                }
            };
            self.next()?;
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<ExprNode> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = {
                let token = self.peek()?;
                if token.is_symbol("*") {
                    BinaryOp::Multiply
                } else if token.is_symbol("/") {
                    BinaryOp::Divide
                } else if token.is_reserved("div") {
                    BinaryOp::IntDivide
                } else if token.is_reserved("mod") {
                    BinaryOp::Modulo
                } else if token.is_reserved("and") {
                    BinaryOp::And
                } else {
                    break;
                }
            };
            self.next()?;
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<ExprNode> {
        let token = self.peek()?.clone();
        if token.is_symbol("-") {
            self.next()?;
            let operand = self.parse_unary()?;
            self.require_numeric(&operand, "-")?;
            let ty = operand.ty;
            let line = operand.line;
            return Ok(ExprNode {
                kind: Expr::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                },
                ty,
                line,
            });
        }
        if token.is_symbol("+") {
            self.next()?;
            let operand = self.parse_unary()?;
            self.require_numeric(&operand, "+")?;
            return Ok(operand);
        }
        if token.is_reserved("not") {
            self.next()?;
            let operand = self.parse_unary()?;
            if self.types.simple(operand.ty) != Some(SimpleType::Boolean) {
                return Err(CompileErrorReport::at_line(
                    CompileError::IncompatibleOperands {
                        operator: "not",
                        lhs: self.types.describe(operand.ty),
                        rhs: SimpleType::Boolean.to_string(),
                    },
                    operand.line,
                ));
            }
            let ty = operand.ty;
            let line = operand.line;
            return Ok(ExprNode {
                kind: Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                ty,
                line,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<ExprNode> {
        let token = self.next()?;
        let line = token.line;
        match token.kind {
            TokenKind::Number => {
                let (word, ty) = self.number_literal(&token)?;
                Ok(literal(word, ty, line))
            }
            TokenKind::String => {
                let mut chars = token.text.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Ok(literal(
                        Word::Char(ch),
                        self.types.simple_id(SimpleType::Char),
                        line,
                    )),
                    _ => Ok(literal(
                        Word::Str(token.text),
                        self.types.simple_id(SimpleType::String),
                        line,
                    )),
                }
            }
            TokenKind::Symbol if token.text == "(" => {
                let expr = self.parse_expression()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            TokenKind::Symbol if token.text == "@" => {
                let name = self.expect_identifier("variable")?;
                let lookup = self.resolve(&name)?;
                let symbol = self.scopes.symbol(lookup.symbol).clone();
                if symbol.value.is_some()
                    || matches!(
                        self.types.get(symbol.ty),
                        Type::Subprogram { .. }
                    )
                {
                    return self.err(
                        CompileError::Expected {
                            expected: "variable",
                        },
                        &name,
                    );
                }
                let access =
                    self.parse_designators(lookup, &symbol, &name)?;
                let ty = self.types.generic_pointer();
                Ok(ExprNode {
                    kind: Expr::AddressOf(access),
                    ty,
                    line,
                })
            }
            TokenKind::Identifier => {
                let lookup = self.resolve(&token)?;
                let symbol = self.scopes.symbol(lookup.symbol).clone();
                if let Some(value) = &symbol.value {
                    return Ok(literal(value.clone(), symbol.ty, line));
                }
                if matches!(
                    self.types.get(symbol.ty),
                    Type::Subprogram { .. }
                ) {
                    let (call, result) =
                        self.parse_call_args(lookup, &symbol, &token)?;
                    if result == self.void() {
                        return self.err(
                            CompileError::Expected {
                                expected: "function",
                            },
                            &token,
                        );
                    }
                    return Ok(ExprNode {
                        kind: Expr::Call(call),
                        ty: result,
                        line,
                    });
                }
                let access =
                    self.parse_designators(lookup, &symbol, &token)?;
                let ty = access.ty;
                Ok(ExprNode {
                    kind: Expr::Variable(access),
                    ty,
                    line,
                })
            }
            _ => self.err(
                CompileError::Expected {
                    expected: "expression",
                },
                &token,
            ),
        }
    }

    fn number_literal(&self, token: &Token) -> PResult<(Word, TypeId)> {
        let value: f64 = token.text.parse().map_err(|_| {
            CompileErrorReport::new(
                CompileError::Expected { expected: "number" },
                Some(token.clone()),
            )
        })?;
        // Integral values are integers, everything else is real
        if value.fract() == 0.0
            && value >= f64::from(i32::MIN)
            && value <= f64::from(i32::MAX)
        {
            Ok((Word::Int(value as i32), self.integer()))
        } else {
            Ok((Word::Real(value), self.real()))
        }
    }

    /// Postfix designators: `[e, ...]`, `.field` and `^`, repeatedly.
    fn parse_designators(
        &mut self,
        lookup: SymbolLookup,
        symbol: &Symbol,
        name: &Token,
    ) -> PResult<VarAccess> {
        let mut ty = symbol.ty;
        let mut path = Vec::new();
        loop {
            let token = self.peek()?.clone();
            if token.is_symbol("[") {
                self.next()?;
                let (ranges, element) = match self.types.get(ty).clone() {
                    Type::Array { ranges, element } => (ranges, element),
                    _ => {
                        return self.err(
                            CompileError::Expected { expected: "array" },
                            &token,
                        )
                    }
                };
                let mut indexes = Vec::new();
                loop {
                    let index = self.parse_expression()?;
                    let index_line = index.line;
                    let index = self
                        .cast_expr(index, self.integer())
                        .map_err(|_| {
                            CompileErrorReport::at_line(
                                CompileError::NonIntegerIndex,
                                index_line,
                            )
                        })?;
                    indexes.push(index);
                    if !self.eat_symbol(",")? {
                        break;
                    }
                }
                self.expect_symbol("]")?;
                if indexes.len() > ranges.len() {
                    return self.err(
                        CompileError::WrongArity {
                            name: name.text.clone(),
                            expected: ranges.len(),
                            actual: indexes.len(),
                        },
                        &token,
                    );
                }
                ty = if indexes.len() == ranges.len() {
                    element
                } else {
                    self.types.add(Type::Array {
                        ranges: ranges[indexes.len()..].to_vec(),
                        element,
                    })
                };
                path.push(Designator::Index { indexes, ty });
            } else if token.is_symbol(".") {
                // Only a field selector if a record precedes; the program's
                // final `.` must stay unconsumed
                if !matches!(self.types.get(ty), Type::Record { .. }) {
                    break;
                }
                self.next()?;
                let field_token = self.expect_identifier("field name")?;
                let fields = match self.types.get(ty) {
                    Type::Record { fields } => fields.clone(),
                    _ => unreachable!(),
                };
                let field = fields
                    .iter()
                    .find(|field| {
                        field.name.eq_ignore_ascii_case(&field_token.text)
                    })
                    .cloned();
                match field {
                    Some(field) => {
                        ty = field.ty;
                        path.push(Designator::Field {
                            name: field.name,
                            offset: field.offset,
                            ty: field.ty,
                        });
                    }
                    None => {
                        return self.err(
                            CompileError::UnknownField(
                                field_token.text.clone(),
                            ),
                            &field_token,
                        )
                    }
                }
            } else if token.is_symbol("^") {
                self.next()?;
                match self.types.get(ty).clone() {
                    Type::Pointer {
                        pointee: Some(pointee),
                        ..
                    } => {
                        ty = pointee;
                        path.push(Designator::Deref);
                    }
                    _ => {
                        return self.err(
                            CompileError::DerefNonPointer(
                                self.types.describe(ty),
                            ),
                            &token,
                        )
                    }
                }
            } else {
                break;
            }
        }
        Ok(VarAccess {
            lookup,
            name: name.text.clone(),
            path,
            ty,
            line: name.line,
        })
    }

    /// Parse (optional) call arguments, check them against the subprogram
    /// type, apply the call-site idiosyncrasies, and return the call with
    /// its result type.
    fn parse_call_args(
        &mut self,
        lookup: SymbolLookup,
        symbol: &Symbol,
        name: &Token,
    ) -> PResult<(CallExpr, TypeId)> {
        let (params, mut ret) = match self.types.get(symbol.ty).clone() {
            Type::Subprogram { params, ret } => (params, ret),
            _ => {
                return self.err(
                    CompileError::NotCallable(name.text.clone()),
                    name,
                )
            }
        };
        let native = if symbol.is_native {
            self.natives.get(symbol.address).cloned()
        } else {
            None
        };

        let mut args = Vec::new();
        if self.eat_symbol("(")? {
            if !self.peek()?.is_symbol(")") {
                loop {
                    args.push(self.parse_expression()?);
                    if !self.eat_symbol(",")? {
                        break;
                    }
                }
            }
            self.expect_symbol(")")?;
        }

        let variadic =
            native.as_ref().map(|n| n.variadic).unwrap_or(false);
        let is_random = native
            .as_ref()
            .map(|n| n.name.eq_ignore_ascii_case("random"))
            .unwrap_or(false);
        if is_random {
            // `Random` takes no argument (real result) or one integer
            // limit, in which case the call returns an integer below it
            match args.len() {
                0 => {}
                1 => {
                    let arg = args.pop().unwrap();
                    args.push(self.cast_expr(arg, self.integer())?);
                    ret = self.integer();
                }
                actual => {
                    return self.err(
                        CompileError::WrongArity {
                            name: name.text.clone(),
                            expected: 1,
                            actual,
                        },
                        name,
                    )
                }
            }
        } else if variadic {
            // Any number of one-word values
            for arg in &args {
                if self.types.size(arg.ty) != 1 {
                    return Err(CompileErrorReport::at_line(
                        CompileError::Expected {
                            expected: "value of simple type",
                        },
                        arg.line,
                    ));
                }
            }
        } else {
            // `New(p)` grows a hidden argument: the size in words of the
            // type `p` points at
            if let Some(native) = &native {
                if native.name.eq_ignore_ascii_case("new")
                    && args.len() == 1
                {
                    let size = match self.types.get(args[0].ty) {
                        Type::Pointer {
                            pointee: Some(pointee),
                            ..
                        } => self.types.size(*pointee),
                        _ => 1,
                    };
                    args.push(literal(
                        Word::Int(size as i32),
                        self.integer(),
                        name.line,
                    ));
                }
                // Omitted trailing arguments take declared defaults
                // (`Inc` without a delta increments by 1)
                let missing = params.len().saturating_sub(args.len());
                if missing > 0 && missing <= native.defaults.len() {
                    let defaults_start = native.defaults.len() - missing;
                    for (index, default) in native.defaults
                        [defaults_start..]
                        .iter()
                        .enumerate()
                    {
                        let param =
                            &params[params.len() - missing + index];
                        args.push(literal(
                            default.clone(),
                            param.ty,
                            name.line,
                        ));
                    }
                }
            }
            if args.len() != params.len() {
                return self.err(
                    CompileError::WrongArity {
                        name: name.text.clone(),
                        expected: params.len(),
                        actual: args.len(),
                    },
                    name,
                );
            }
            let mut checked = Vec::with_capacity(args.len());
            for (arg, param) in args.into_iter().zip(params.iter()) {
                if param.by_reference {
                    // By-reference arguments must be variables; the
                    // compiler pushes their address
                    if !matches!(arg.kind, Expr::Variable(_)) {
                        return Err(CompileErrorReport::at_line(
                            CompileError::Expected {
                                expected: "variable",
                            },
                            arg.line,
                        ));
                    }
                    self.check_cast_legal(&arg, param.ty)?;
                    checked.push(arg);
                } else {
                    checked.push(self.cast_expr(arg, param.ty)?);
                }
            }
            args = checked;
        }

        if let Some(native) = &native {
            // `Abs` keeps its argument's type: undo the integer→real cast
            // the parameter check inserted
            if native.name.eq_ignore_ascii_case("abs")
                && args.len() == 1
            {
                if let Expr::Cast { operand } = &args[0].kind {
                    if self.types.simple(operand.ty)
                        == Some(SimpleType::Integer)
                    {
                        let original = (**operand).clone();
                        args[0] = original;
                        ret = self.integer();
                    }
                }
            }
        }

        Ok((
            CallExpr {
                lookup,
                name: name.text.clone(),
                args,
            },
            ret,
        ))
    }

    // --- type checking

    fn require_numeric(
        &self,
        expr: &ExprNode,
        operator: &'static str,
    ) -> PResult<()> {
        match self.types.simple(expr.ty) {
            Some(SimpleType::Integer) | Some(SimpleType::Real) => Ok(()),
            _ => Err(CompileErrorReport::at_line(
                CompileError::IncompatibleOperands {
                    operator,
                    lhs: self.types.describe(expr.ty),
                    rhs: "number".into(),
                },
                expr.line,
            )),
        }
    }

    /// Build a type-checked binary node, applying the common-type rule.
    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: ExprNode,
        rhs: ExprNode,
    ) -> PResult<ExprNode> {
        let line = lhs.line;
        let incompatible = |parser: &Self, lhs: &ExprNode, rhs: &ExprNode| {
            CompileErrorReport::at_line(
                CompileError::IncompatibleOperands {
                    operator: op.symbol(),
                    lhs: parser.types.describe(lhs.ty),
                    rhs: parser.types.describe(rhs.ty),
                },
                line,
            )
        };

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let boolean = self.boolean();
                if self.types.simple(lhs.ty) != Some(SimpleType::Boolean)
                    || self.types.simple(rhs.ty)
                        != Some(SimpleType::Boolean)
                {
                    return Err(incompatible(self, &lhs, &rhs));
                }
                return Ok(node(op, lhs, rhs, boolean, line));
            }
            BinaryOp::IntDivide | BinaryOp::Modulo => {
                let integer = self.integer();
                if self.types.simple(lhs.ty) != Some(SimpleType::Integer)
                    || self.types.simple(rhs.ty)
                        != Some(SimpleType::Integer)
                {
                    return Err(incompatible(self, &lhs, &rhs));
                }
                return Ok(node(op, lhs, rhs, integer, line));
            }
            BinaryOp::Divide => {
                // `/` always produces a real; both operands are cast
                let real = self.real();
                self.require_numeric(&lhs, "/")?;
                self.require_numeric(&rhs, "/")?;
                let lhs = self.cast_expr(lhs, real)?;
                let rhs = self.cast_expr(rhs, real)?;
                return Ok(node(op, lhs, rhs, real, line));
            }
            _ => {}
        }

        let (lhs, rhs, common) = self.common_type(op, lhs, rhs)?;
        if op.is_relational() {
            let boolean = self.boolean();
            return Ok(node(op, lhs, rhs, boolean, line));
        }
        // Remaining operators: + - *, numeric only
        match self.types.simple(common) {
            Some(SimpleType::Integer) | Some(SimpleType::Real) => {
                Ok(node(op, lhs, rhs, common, line))
            }
            _ => Err(incompatible(self, &lhs, &rhs)),
        }
    }

    /// The common-type rule: both operands must share a type kind. For
    /// simple types, real absorbs integer and string absorbs char; any other
    /// mixture is an error. Pointers are compatible among themselves.
    fn common_type(
        &mut self,
        op: BinaryOp,
        lhs: ExprNode,
        rhs: ExprNode,
    ) -> PResult<(ExprNode, ExprNode, TypeId)> {
        let line = lhs.line;
        let lhs_kind = self.types.get(lhs.ty).clone();
        let rhs_kind = self.types.get(rhs.ty).clone();
        match (lhs_kind, rhs_kind) {
            (Type::Simple(a), Type::Simple(b)) => {
                if a == b {
                    let ty = lhs.ty;
                    return Ok((lhs, rhs, ty));
                }
                match (a, b) {
                    (SimpleType::Integer, SimpleType::Real) => {
                        let real = self.real();
                        let lhs = self.cast_expr(lhs, real)?;
                        Ok((lhs, rhs, real))
                    }
                    (SimpleType::Real, SimpleType::Integer) => {
                        let real = self.real();
                        let rhs = self.cast_expr(rhs, real)?;
                        Ok((lhs, rhs, real))
                    }
                    (SimpleType::Char, SimpleType::String) => {
                        let string =
                            self.types.simple_id(SimpleType::String);
                        let lhs = self.cast_expr(lhs, string)?;
                        Ok((lhs, rhs, string))
                    }
                    (SimpleType::String, SimpleType::Char) => {
                        let string =
                            self.types.simple_id(SimpleType::String);
                        let rhs = self.cast_expr(rhs, string)?;
                        Ok((lhs, rhs, string))
                    }
                    _ => Err(CompileErrorReport::at_line(
                        CompileError::IncompatibleOperands {
                            operator: op.symbol(),
                            lhs: a.to_string(),
                            rhs: b.to_string(),
                        },
                        line,
                    )),
                }
            }
            (Type::Pointer { .. }, Type::Pointer { .. }) => {
                let ty = lhs.ty;
                Ok((lhs, rhs, ty))
            }
            _ => Err(CompileErrorReport::at_line(
                CompileError::IncompatibleOperands {
                    operator: op.symbol(),
                    lhs: self.types.describe(lhs.ty),
                    rhs: self.types.describe(rhs.ty),
                },
                line,
            )),
        }
    }

    /// Is a cast from `expr` to `target` legal? Raises the cast error
    /// without rewriting the expression (used for by-reference arguments).
    fn check_cast_legal(
        &self,
        expr: &ExprNode,
        target: TypeId,
    ) -> PResult<()> {
        if self.cast_kind(expr.ty, target).is_some() {
            Ok(())
        } else {
            Err(CompileErrorReport::at_line(
                CompileError::InvalidCast {
                    from: self.types.describe(expr.ty),
                    to: self.types.describe(target),
                },
                expr.line,
            ))
        }
    }

    /// Classify a cast: `None` = illegal, `Some(false)` = no-op,
    /// `Some(true)` = integer→real conversion.
    fn cast_kind(&self, from: TypeId, to: TypeId) -> Option<bool> {
        if from == to {
            return Some(false);
        }
        match (self.types.get(from), self.types.get(to)) {
            (Type::Simple(a), Type::Simple(b)) => match (a, b) {
                _ if a == b => Some(false),
                (SimpleType::Integer, SimpleType::Real) => Some(true),
                (SimpleType::Char, SimpleType::String) => Some(false),
                (_, SimpleType::Any) => Some(false),
                _ => None,
            },
            // Pointer casts are legal if either side is the generic
            // Pointer (which also covers nil) or the pointee names match
            (
                Type::Pointer {
                    target_name: from_name,
                    ..
                },
                Type::Pointer {
                    target_name: to_name,
                    ..
                },
            ) => match (from_name, to_name) {
                (None, _) | (_, None) => Some(false),
                (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => {
                    Some(false)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Insert an implicit cast, or fail. Identical types and `Any` targets
    /// pass through untouched; legal casts wrap the expression in a cast
    /// node carrying the target type.
    fn cast_expr(
        &mut self,
        expr: ExprNode,
        target: TypeId,
    ) -> PResult<ExprNode> {
        if expr.ty == target {
            return Ok(expr);
        }
        if self.types.simple(target) == Some(SimpleType::Any) {
            return Ok(expr);
        }
        match self.cast_kind(expr.ty, target) {
            Some(_) => {
                let line = expr.line;
                Ok(ExprNode {
                    kind: Expr::Cast {
                        operand: Box::new(expr),
                    },
                    ty: target,
                    line,
                })
            }
            None => Err(CompileErrorReport::at_line(
                CompileError::InvalidCast {
                    from: self.types.describe(expr.ty),
                    to: self.types.describe(target),
                },
                expr.line,
            )),
        }
    }
}

fn literal(word: Word, ty: TypeId, line: u32) -> ExprNode {
    let kind = match word {
        Word::Int(value) => Expr::Integer(value),
        Word::Real(value) => Expr::Real(value),
        Word::Bool(value) => Expr::Boolean(value),
        Word::Char(value) => Expr::CharLit(value),
        Word::Str(value) => Expr::Str(value),
    };
    ExprNode { kind, ty, line }
}

fn node(
    op: BinaryOp,
    lhs: ExprNode,
    rhs: ExprNode,
    ty: TypeId,
    line: u32,
) -> ExprNode {
    ExprNode {
        kind: Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
        line,
    }
}

/// Fit a constant value to a declared simple type (typed-constant
/// initializers).
fn coerce_constant(
    value: Word,
    code: SimpleType,
) -> Result<Word, ()> {
    match (value, code) {
        (Word::Int(v), SimpleType::Integer) => Ok(Word::Int(v)),
        (Word::Int(v), SimpleType::Real) => Ok(Word::Real(f64::from(v))),
        (Word::Real(v), SimpleType::Real) => Ok(Word::Real(v)),
        (Word::Bool(v), SimpleType::Boolean) => Ok(Word::Bool(v)),
        (Word::Char(v), SimpleType::Char) => Ok(Word::Char(v)),
        (Word::Char(v), SimpleType::String) => {
            Ok(Word::Str(v.to_string()))
        }
        (Word::Str(v), SimpleType::String) => Ok(Word::Str(v)),
        (Word::Int(v), SimpleType::Address) => Ok(Word::Int(v)),
        _ => Err(()),
    }
}
