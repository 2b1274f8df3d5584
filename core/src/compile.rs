//! The code generator: a single depth-first walk of the typed AST emitting
//! p-code. Nested subprograms are emitted before their parent, each
//! subprogram's symbol is bound to its entry address as it is reached, and
//! `exit` jumps are collected per subprogram and back-patched to the return
//! instruction.

use crate::{
    ast::{
        BinaryOp, CallExpr, Designator, Expr, ExprNode, Program, SimpleType,
        Stmt, StmtNode, Subprogram, Type, TypeId, UnaryOp, VarAccess, Word,
    },
    bytecode::{Bytecode, Opcode},
    error::CompileErrorReport,
    parse::Parsed,
    Compiler,
};

type CResult<T> = Result<T, CompileErrorReport>;

impl Compiler<Parsed> {
    /// Lower the program to bytecode.
    pub(crate) fn generate(self) -> Result<Bytecode, CompileErrorReport> {
        let Parsed { program, natives } = self.stage;
        let Program {
            root,
            types,
            scopes,
        } = program;
        let mut generator = CodeGenerator {
            types,
            scopes,
            bytecode: Bytecode::new(natives),
            exit_fixups: Vec::new(),
        };
        generator.subprogram(&root)?;

        // Startup epilogue: mark, call the main program, halt
        let start = generator.bytecode.next_address();
        generator.bytecode.start_address = start;
        generator.bytecode.set_comment(start, "start".into());
        let main_entry = generator.scopes.symbol(root.symbol).address;
        generator.bytecode.emit(Opcode::Mst, 0, 0)?;
        generator.bytecode.emit(Opcode::Cup, 0, main_entry)?;
        generator.bytecode.emit(Opcode::Stp, 0, 0)?;
        Ok(generator.bytecode)
    }
}

struct CodeGenerator {
    types: crate::ast::TypeTable,
    scopes: crate::symbol::Scopes,
    bytecode: Bytecode,
    /// One list per open subprogram: addresses of `exit` jumps awaiting the
    /// return address
    exit_fixups: Vec<Vec<usize>>,
}

impl CodeGenerator {
    fn subprogram(&mut self, sub: &Subprogram) -> CResult<()> {
        for nested in &sub.nested {
            self.subprogram(nested)?;
        }

        let entry = self.bytecode.next_address();
        self.scopes.symbol_mut(sub.symbol).address = entry;
        self.bytecode.set_comment(entry, sub.name.clone());
        self.bytecode.emit(Opcode::Ent, 0, sub.frame_size)?;
        self.exit_fixups.push(Vec::new());

        // Copy each typed constant from the program image into its frame
        // slots, one word at a time
        for constant in &sub.typed_constants {
            let blob = self.bytecode.add_typed_constants(&constant.data.data);
            for word in 0..constant.data.len() {
                self.bytecode.emit(
                    Opcode::Lda,
                    0,
                    constant.offset + word,
                )?;
                let index = self
                    .bytecode
                    .intern_constant(Word::Int((blob + word) as i32));
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(SimpleType::Address) as usize,
                    index,
                )?;
                self.bytecode.emit(Opcode::Ldi, 0, 0)?;
                self.bytecode.emit(Opcode::Sti, 0, 0)?;
            }
        }

        self.statement(&sub.body)?;

        let rtn_code = if sub.is_function() {
            self.type_code(sub.ret)
        } else {
            SimpleType::Void
        };
        let rtn_address =
            self.bytecode.emit(Opcode::Rtn, u8::from(rtn_code) as usize, 0)?;
        for fixup in self.exit_fixups.pop().expect("unbalanced exit fixups") {
            self.bytecode.patch_operand2(fixup, rtn_address)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &StmtNode) -> CResult<()> {
        match &stmt.kind {
            Stmt::Compound(statements) => {
                for statement in statements {
                    self.statement(statement)?;
                }
                Ok(())
            }
            Stmt::Empty => Ok(()),
            Stmt::Assign { target, value } => self.assign(target, value),
            Stmt::Call(call) => self.call(call),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expression(condition)?;
                let skip_then = self.bytecode.emit(Opcode::Fjp, 0, 0)?;
                self.statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else =
                            self.bytecode.emit(Opcode::Ujp, 0, 0)?;
                        self.bytecode.patch_operand2(
                            skip_then,
                            self.bytecode.next_address(),
                        )?;
                        self.statement(else_branch)?;
                        self.bytecode.patch_operand2(
                            skip_else,
                            self.bytecode.next_address(),
                        )?;
                    }
                    None => {
                        self.bytecode.patch_operand2(
                            skip_then,
                            self.bytecode.next_address(),
                        )?;
                    }
                }
                Ok(())
            }
            Stmt::While { condition, body } => {
                let top = self.bytecode.next_address();
                self.expression(condition)?;
                let leave = self.bytecode.emit(Opcode::Fjp, 0, 0)?;
                self.statement(body)?;
                self.bytecode.emit(Opcode::Ujp, 0, top)?;
                self.bytecode
                    .patch_operand2(leave, self.bytecode.next_address())?;
                Ok(())
            }
            Stmt::Repeat { body, condition } => {
                let top = self.bytecode.next_address();
                for statement in body {
                    self.statement(statement)?;
                }
                self.expression(condition)?;
                self.bytecode.emit(Opcode::Fjp, 0, top)?;
                Ok(())
            }
            Stmt::For {
                variable,
                start,
                end,
                downto,
                body,
            } => self.for_loop(variable, start, end, *downto, body),
            Stmt::Exit => {
                let jump = self.bytecode.emit(Opcode::Ujp, 0, 0)?;
                self.exit_fixups
                    .last_mut()
                    .expect("exit outside subprogram")
                    .push(jump);
                Ok(())
            }
        }
    }

    fn assign(
        &mut self,
        target: &VarAccess,
        value: &ExprNode,
    ) -> CResult<()> {
        // Assignment to the enclosing function's name stores into its
        // return-value slot at mark offset 0; the frame is one static hop
        // closer than the scope holding the symbol
        let symbol = self.scopes.symbol(target.lookup.symbol).clone();
        if matches!(self.types.get(symbol.ty), Type::Subprogram { .. }) {
            self.bytecode
                .emit(Opcode::Lda, target.lookup.level - 1, 0)?;
            self.expression(value)?;
            self.bytecode.emit(Opcode::Sti, 0, 0)?;
            return Ok(());
        }

        let size = self.types.size(target.ty);
        if size == 1 {
            self.variable_address(target)?;
            self.expression(value)?;
            self.bytecode.emit(Opcode::Sti, 0, 0)?;
            return Ok(());
        }

        // Whole-compound assignment: copy word by word, recomputing both
        // addresses per word
        let source = match &value.kind {
            Expr::Variable(source) => source,
            other => panic!("compound rvalue is not a variable: {:?}", other),
        };
        for word in 0..size {
            self.variable_address(target)?;
            self.word_offset(word)?;
            self.variable_address(source)?;
            self.word_offset(word)?;
            self.bytecode.emit(Opcode::Ldi, 0, 0)?;
            self.bytecode.emit(Opcode::Sti, 0, 0)?;
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        variable: &VarAccess,
        start: &ExprNode,
        end: &ExprNode,
        downto: bool,
        body: &StmtNode,
    ) -> CResult<()> {
        // v := start
        self.variable_address(variable)?;
        self.expression(start)?;
        self.bytecode.emit(Opcode::Sti, 0, 0)?;

        // while not (v beyond bound), re-evaluating the bound each pass
        let top = self.bytecode.next_address();
        self.load_variable(variable)?;
        self.expression(end)?;
        let code = u8::from(self.type_code(variable.ty)) as usize;
        let compare = if downto { Opcode::Les } else { Opcode::Grt };
        self.bytecode.emit(compare, code, 0)?;
        let leave = self.bytecode.emit(Opcode::Tjp, 0, 0)?;

        self.statement(body)?;

        // v := v ± 1
        self.variable_address(variable)?;
        self.load_variable(variable)?;
        let bump = if downto { Opcode::Dec } else { Opcode::Inc };
        self.bytecode.emit(bump, 0, 0)?;
        self.bytecode.emit(Opcode::Sti, 0, 0)?;
        self.bytecode.emit(Opcode::Ujp, 0, top)?;
        self.bytecode
            .patch_operand2(leave, self.bytecode.next_address())?;
        Ok(())
    }

    fn expression(&mut self, expr: &ExprNode) -> CResult<()> {
        match &expr.kind {
            Expr::Integer(value) => {
                let code = self.type_code(expr.ty);
                let index = self.bytecode.intern_constant(Word::Int(*value));
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(code) as usize,
                    index,
                )?;
                Ok(())
            }
            Expr::Real(value) => {
                let index =
                    self.bytecode.intern_constant(Word::Real(*value));
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(SimpleType::Real) as usize,
                    index,
                )?;
                Ok(())
            }
            Expr::Str(value) => {
                let index = self
                    .bytecode
                    .intern_constant(Word::Str(value.clone()));
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(SimpleType::String) as usize,
                    index,
                )?;
                Ok(())
            }
            Expr::CharLit(value) => {
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(SimpleType::Char) as usize,
                    *value as usize,
                )?;
                Ok(())
            }
            Expr::Boolean(value) => {
                self.bytecode.emit(
                    Opcode::Ldc,
                    u8::from(SimpleType::Boolean) as usize,
                    *value as usize,
                )?;
                Ok(())
            }
            Expr::Variable(access) => self.load_variable(access),
            Expr::AddressOf(access) => self.variable_address(access),
            Expr::Unary { op, operand } => {
                self.expression(operand)?;
                let opcode = match op {
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Negate => {
                        match self.types.simple(operand.ty) {
                            Some(SimpleType::Real) => Opcode::Ngr,
                            _ => Opcode::Ngi,
                        }
                    }
                };
                self.bytecode.emit(opcode, 0, 0)?;
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => {
                self.expression(lhs)?;
                self.expression(rhs)?;
                self.binary_op(*op, lhs, expr)
            }
            Expr::Call(call) => self.call(call),
            Expr::Cast { operand } => {
                self.expression(operand)?;
                // Only the numeric widening emits code
                if self.types.simple(expr.ty) == Some(SimpleType::Real)
                    && self.types.simple(operand.ty)
                        == Some(SimpleType::Integer)
                {
                    self.bytecode.emit(Opcode::Flt, 0, 0)?;
                }
                Ok(())
            }
        }
    }

    fn binary_op(
        &mut self,
        op: BinaryOp,
        lhs: &ExprNode,
        expr: &ExprNode,
    ) -> CResult<()> {
        let real = self.types.simple(expr.ty) == Some(SimpleType::Real);
        let opcode = match op {
            BinaryOp::Add => {
                if real {
                    Opcode::Adr
                } else {
                    Opcode::Adi
                }
            }
            BinaryOp::Subtract => {
                if real {
                    Opcode::Sbr
                } else {
                    Opcode::Sbi
                }
            }
            BinaryOp::Multiply => {
                if real {
                    Opcode::Mpr
                } else {
                    Opcode::Mpi
                }
            }
            BinaryOp::Divide => Opcode::Dvr,
            BinaryOp::IntDivide => Opcode::Dvi,
            BinaryOp::Modulo => Opcode::Mod,
            BinaryOp::And => Opcode::And,
            BinaryOp::Or => Opcode::Ior,
            BinaryOp::Equals
            | BinaryOp::NotEquals
            | BinaryOp::LessThan
            | BinaryOp::GreaterThan
            | BinaryOp::LessThanOrEquals
            | BinaryOp::GreaterThanOrEquals => {
                // Comparisons carry the operand type code
                let code = u8::from(self.type_code(lhs.ty)) as usize;
                let opcode = match op {
                    BinaryOp::Equals => Opcode::Equ,
                    BinaryOp::NotEquals => Opcode::Neq,
                    BinaryOp::LessThan => Opcode::Les,
                    BinaryOp::GreaterThan => Opcode::Grt,
                    BinaryOp::LessThanOrEquals => Opcode::Leq,
                    BinaryOp::GreaterThanOrEquals => Opcode::Geq,
                    _ => unreachable!(),
                };
                self.bytecode.emit(opcode, code, 0)?;
                return Ok(());
            }
        };
        self.bytecode.emit(opcode, 0, 0)?;
        Ok(())
    }

    /// Push the value of a variable. Simple values load directly; compound
    /// values are pushed word by word; by-reference symbols load the address
    /// first and read through it.
    fn load_variable(&mut self, access: &VarAccess) -> CResult<()> {
        let symbol = self.scopes.symbol(access.lookup.symbol).clone();
        let size = self.types.size(access.ty);

        if access.path.is_empty() && !symbol.by_reference {
            if size == 1 {
                let opcode = match self.type_code(access.ty) {
                    SimpleType::Address => Opcode::Lva,
                    SimpleType::Boolean => Opcode::Lvb,
                    SimpleType::Char => Opcode::Lvc,
                    SimpleType::Real => Opcode::Lvr,
                    _ => Opcode::Lvi,
                };
                self.bytecode.emit(
                    opcode,
                    access.lookup.level,
                    symbol.address,
                )?;
            } else {
                for word in 0..size {
                    self.bytecode.emit(
                        Opcode::Lvi,
                        access.lookup.level,
                        symbol.address + word,
                    )?;
                }
            }
            return Ok(());
        }

        if size == 1 {
            self.variable_address(access)?;
            self.bytecode.emit(Opcode::Ldi, 0, 0)?;
        } else {
            for word in 0..size {
                self.variable_address(access)?;
                self.word_offset(word)?;
                self.bytecode.emit(Opcode::Ldi, 0, 0)?;
            }
        }
        Ok(())
    }

    /// Push the address of a variable: the lvalue walker. Emits the frame
    /// address (or loads it, for by-reference parameters), then applies
    /// field offsets, `index - low` times stride per array dimension, and
    /// dereferences.
    fn variable_address(&mut self, access: &VarAccess) -> CResult<()> {
        let symbol = self.scopes.symbol(access.lookup.symbol).clone();
        let base = if symbol.by_reference {
            Opcode::Lva
        } else {
            Opcode::Lda
        };
        self.bytecode
            .emit(base, access.lookup.level, symbol.address)?;

        let mut ty = symbol.ty;
        for designator in &access.path {
            match designator {
                Designator::Field { offset, ty: field_ty, .. } => {
                    if *offset > 0 {
                        let index = self
                            .bytecode
                            .intern_constant(Word::Int(*offset as i32));
                        self.bytecode.emit(
                            Opcode::Ldc,
                            u8::from(SimpleType::Integer) as usize,
                            index,
                        )?;
                        self.bytecode.emit(Opcode::Adi, 0, 0)?;
                    }
                    ty = *field_ty;
                }
                Designator::Deref => {
                    self.bytecode.emit(Opcode::Ldi, 0, 0)?;
                    ty = match self.types.get(ty) {
                        Type::Pointer {
                            pointee: Some(pointee),
                            ..
                        } => *pointee,
                        other => panic!("deref of non-pointer {:?}", other),
                    };
                }
                Designator::Index {
                    indexes,
                    ty: result_ty,
                } => {
                    let (ranges, element) = match self.types.get(ty) {
                        Type::Array { ranges, element } => {
                            (ranges.clone(), *element)
                        }
                        other => panic!("index of non-array {:?}", other),
                    };
                    let element_size = self.types.size(element);
                    for (dim, index) in indexes.iter().enumerate() {
                        self.expression(index)?;
                        let low = ranges[dim].low;
                        if low != 0 {
                            let constant = self
                                .bytecode
                                .intern_constant(Word::Int(low));
                            self.bytecode.emit(
                                Opcode::Ldc,
                                u8::from(SimpleType::Integer) as usize,
                                constant,
                            )?;
                            self.bytecode.emit(Opcode::Sbi, 0, 0)?;
                        }
                        let stride: usize = element_size
                            * ranges[dim + 1..]
                                .iter()
                                .map(crate::ast::Range::count)
                                .product::<usize>();
                        self.bytecode.emit(Opcode::Ixa, 0, stride)?;
                    }
                    ty = *result_ty;
                }
            }
        }
        Ok(())
    }

    /// Adjust the address on the stack top by a constant word offset.
    fn word_offset(&mut self, word: usize) -> CResult<()> {
        if word > 0 {
            let index =
                self.bytecode.intern_constant(Word::Int(word as i32));
            self.bytecode.emit(
                Opcode::Ldc,
                u8::from(SimpleType::Integer) as usize,
                index,
            )?;
            self.bytecode.emit(Opcode::Adi, 0, 0)?;
        }
        Ok(())
    }

    /// Emit a call. Native calls push arguments and `CSP` (or lower to a
    /// conversion opcode); user calls emit `MST`, push arguments by value or
    /// by address, then `CUP`.
    fn call(&mut self, call: &CallExpr) -> CResult<()> {
        let symbol = self.scopes.symbol(call.lookup.symbol).clone();
        let params = match self.types.get(symbol.ty) {
            Type::Subprogram { params, .. } => params.clone(),
            other => panic!("call of non-subprogram {:?}", other),
        };

        if symbol.is_native {
            let native = self
                .bytecode
                .natives()
                .get(symbol.address)
                .unwrap_or_else(|| {
                    panic!("unregistered native {}", call.name)
                })
                .clone();
            if let Some(opcode) = native.inline {
                for arg in &call.args {
                    self.expression(arg)?;
                }
                self.bytecode.emit(opcode, 0, 0)?;
                return Ok(());
            }
            for (position, arg) in call.args.iter().enumerate() {
                let by_reference = params
                    .get(position)
                    .map(|param| param.by_reference)
                    .unwrap_or(false);
                if by_reference {
                    match &arg.kind {
                        Expr::Variable(access) => {
                            self.variable_address(access)?
                        }
                        other => panic!(
                            "by-reference argument is not a variable: {:?}",
                            other
                        ),
                    }
                } else {
                    self.expression(arg)?;
                }
            }
            self.bytecode.emit(
                Opcode::Csp,
                call.args.len(),
                symbol.address,
            )?;
            return Ok(());
        }

        self.bytecode.emit(Opcode::Mst, call.lookup.level, 0)?;
        let mut arg_size = 0;
        for (arg, param) in call.args.iter().zip(params.iter()) {
            if param.by_reference {
                match &arg.kind {
                    Expr::Variable(access) => {
                        self.variable_address(access)?
                    }
                    other => panic!(
                        "by-reference argument is not a variable: {:?}",
                        other
                    ),
                }
                arg_size += 1;
            } else {
                let size = self.types.size(param.ty);
                if size == 1 {
                    self.expression(arg)?;
                } else {
                    // Large compound passed by value: push word by word
                    let access = match &arg.kind {
                        Expr::Variable(access) => access,
                        other => panic!(
                            "compound argument is not a variable: {:?}",
                            other
                        ),
                    };
                    for word in 0..size {
                        self.variable_address(access)?;
                        self.word_offset(word)?;
                        self.bytecode.emit(Opcode::Ldi, 0, 0)?;
                    }
                }
                arg_size += size;
            }
        }
        let entry = self.scopes.symbol(call.lookup.symbol).address;
        self.bytecode.emit(Opcode::Cup, arg_size, entry)?;
        Ok(())
    }

    /// The operand type code of a one-word type.
    fn type_code(&self, ty: TypeId) -> SimpleType {
        match self.types.get(ty) {
            Type::Simple(code) => *code,
            Type::Pointer { .. } => SimpleType::Address,
            _ => SimpleType::Address,
        }
    }
}
