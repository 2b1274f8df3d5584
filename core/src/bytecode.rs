//! The compiled program image: encoded instructions, the constant pool, the
//! typed-constant blob and the native registry, plus the instruction
//! encoding itself.
//!
//! One instruction is a single unsigned word:
//! `opcode (8 bits) | operand1 (9 bits) | operand2 (15 bits)`, low to high.

use crate::{
    ast::Word,
    consts::{
        OPCODE_MASK, OPERAND1_MASK, OPERAND1_SHIFT, OPERAND2_MASK,
        OPERAND2_SHIFT,
    },
    error::{CompileError, CompileErrorReport, RuntimeError},
    native::NativeRegistry,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::{collections::HashMap, convert::TryFrom, fmt::Write as _};

/// The p-code instruction set. A close relative of 1978 UCSD Pascal p-code.
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
pub enum Opcode {
    /// Call user procedure: operands are argument size and entry address
    Cup = 0x00,
    /// Call native procedure: operands are argument count and registry index
    Csp = 0x01,
    /// Set sp (operand1 = 0) or ep (operand1 = 1) to mp + operand2,
    /// zero-filling new stack words
    Ent = 0x02,
    /// Push a 5-word mark; operand1 is the static-link hop count
    Mst = 0x03,
    /// Return; operand1 is the return type code (Void leaves no value)
    Rtn = 0x04,
    /// Load constant; operand1 is the type code, operand2 the pool index
    /// (Boolean and Char are operand-encoded instead)
    Ldc = 0x05,
    /// Load address: operand1 = static level, operand2 = offset
    Lda = 0x06,
    /// Load indirect through the popped address
    Ldi = 0x07,
    /// Store indirect: pops value then address
    Sti = 0x08,
    /// Load value, address-typed
    Lva = 0x09,
    /// Load value, boolean
    Lvb = 0x0A,
    /// Load value, char
    Lvc = 0x0B,
    /// Load value, integer (also used for the other one-word types)
    Lvi = 0x0C,
    /// Load value, real
    Lvr = 0x0D,
    /// Indexed address: pops index then address, pushes
    /// `address + index * operand2`
    Ixa = 0x0E,
    /// Unconditional jump
    Ujp = 0x0F,
    /// Jump if the popped boolean is false
    Fjp = 0x10,
    /// Jump if the popped boolean is true
    Tjp = 0x11,
    /// Jump to the popped address (reserved for case statements)
    Xjp = 0x12,
    Adi = 0x13,
    Sbi = 0x14,
    Mpi = 0x15,
    Dvi = 0x16,
    Mod = 0x17,
    Adr = 0x18,
    Sbr = 0x19,
    Mpr = 0x1A,
    Dvr = 0x1B,
    /// Negate integer
    Ngi = 0x1C,
    /// Negate real
    Ngr = 0x1D,
    And = 0x1E,
    Ior = 0x1F,
    Not = 0x20,
    /// Comparisons carry the operand type code in operand1
    Equ = 0x21,
    Neq = 0x22,
    Grt = 0x23,
    Geq = 0x24,
    Les = 0x25,
    Leq = 0x26,
    Inc = 0x27,
    Dec = 0x28,
    /// Integer to real
    Flt = 0x29,
    /// Real to integer, truncating
    Trc = 0x2A,
    /// Real to integer, rounding
    Rnd = 0x2B,
    /// Integer to char
    Chr = 0x2C,
    /// Char (or boolean) to integer
    Ord = 0x2D,
    /// Halt the machine
    Stp = 0x2E,
}

impl Opcode {
    /// Mnemonic for disassembly.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Cup => "CUP",
            Self::Csp => "CSP",
            Self::Ent => "ENT",
            Self::Mst => "MST",
            Self::Rtn => "RTN",
            Self::Ldc => "LDC",
            Self::Lda => "LDA",
            Self::Ldi => "LDI",
            Self::Sti => "STI",
            Self::Lva => "LVA",
            Self::Lvb => "LVB",
            Self::Lvc => "LVC",
            Self::Lvi => "LVI",
            Self::Lvr => "LVR",
            Self::Ixa => "IXA",
            Self::Ujp => "UJP",
            Self::Fjp => "FJP",
            Self::Tjp => "TJP",
            Self::Xjp => "XJP",
            Self::Adi => "ADI",
            Self::Sbi => "SBI",
            Self::Mpi => "MPI",
            Self::Dvi => "DVI",
            Self::Mod => "MOD",
            Self::Adr => "ADR",
            Self::Sbr => "SBR",
            Self::Mpr => "MPR",
            Self::Dvr => "DVR",
            Self::Ngi => "NGI",
            Self::Ngr => "NGR",
            Self::And => "AND",
            Self::Ior => "IOR",
            Self::Not => "NOT",
            Self::Equ => "EQU",
            Self::Neq => "NEQ",
            Self::Grt => "GRT",
            Self::Geq => "GEQ",
            Self::Les => "LES",
            Self::Leq => "LEQ",
            Self::Inc => "INC",
            Self::Dec => "DEC",
            Self::Flt => "FLT",
            Self::Trc => "TRC",
            Self::Rnd => "RND",
            Self::Chr => "CHR",
            Self::Ord => "ORD",
            Self::Stp => "STP",
        }
    }
}

/// Pack an instruction into one word. Operands must already be in range.
pub fn encode(opcode: Opcode, operand1: u32, operand2: u32) -> u32 {
    debug_assert!(operand1 <= OPERAND1_MASK);
    debug_assert!(operand2 <= OPERAND2_MASK);
    u32::from(u8::from(opcode))
        | (operand1 << OPERAND1_SHIFT)
        | (operand2 << OPERAND2_SHIFT)
}

/// Unpack an instruction word. An unrecognized opcode byte is a runtime
/// error.
pub fn decode(word: u32) -> Result<(Opcode, u32, u32), RuntimeError> {
    let byte = (word & OPCODE_MASK) as u8;
    let opcode = Opcode::try_from(byte)
        .map_err(|_| RuntimeError::UnknownOpcode(byte))?;
    Ok((
        opcode,
        (word >> OPERAND1_SHIFT) & OPERAND1_MASK,
        (word >> OPERAND2_SHIFT) & OPERAND2_MASK,
    ))
}

/// A compiled program, ready to be executed. Produced by the code generator;
/// the sole input to the machine along with a host.
#[derive(Debug, Serialize)]
pub struct Bytecode {
    /// The instruction store
    pub istore: Vec<u32>,
    /// De-duplicated pool of constants loaded by `LDC`
    pub constants: Vec<Word>,
    /// Initializer data for typed constants, copied verbatim into the bottom
    /// of the data store at program load
    pub typed_constants: Vec<Word>,
    /// Address of the startup sequence (`MST 0; CUP 0, main; STP`)
    pub start_address: usize,
    /// Human-readable notes per instruction address, for the disassembly
    pub comments: HashMap<usize, String>,
    #[serde(skip)]
    natives: NativeRegistry,
}

impl Bytecode {
    pub(crate) fn new(natives: NativeRegistry) -> Self {
        Self {
            istore: Vec::new(),
            constants: Vec::new(),
            typed_constants: Vec::new(),
            start_address: 0,
            comments: HashMap::new(),
            natives,
        }
    }

    /// The registered native procedures, indexed by `CSP` operand.
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Address the next emitted instruction will have.
    pub(crate) fn next_address(&self) -> usize {
        self.istore.len()
    }

    /// Append one instruction, checking operand ranges. Returns its address.
    pub(crate) fn emit(
        &mut self,
        opcode: Opcode,
        operand1: usize,
        operand2: usize,
    ) -> Result<usize, CompileErrorReport> {
        let operand1 = Self::check_operand(operand1, OPERAND1_MASK)?;
        let operand2 = Self::check_operand(operand2, OPERAND2_MASK)?;
        self.istore.push(encode(opcode, operand1, operand2));
        Ok(self.istore.len() - 1)
    }

    fn check_operand(
        value: usize,
        mask: u32,
    ) -> Result<u32, CompileErrorReport> {
        if value as u64 > u64::from(mask) {
            Err(CompileErrorReport::bare(CompileError::OperandOutOfRange(
                value as i64,
            )))
        } else {
            Ok(value as u32)
        }
    }

    /// Rewrite operand2 of an already-emitted instruction (jump back-patch).
    pub(crate) fn patch_operand2(
        &mut self,
        address: usize,
        operand2: usize,
    ) -> Result<(), CompileErrorReport> {
        let operand2 = Self::check_operand(operand2, OPERAND2_MASK)?;
        let word = self.istore[address];
        self.istore[address] = (word
            & !(OPERAND2_MASK << OPERAND2_SHIFT))
            | (operand2 << OPERAND2_SHIFT);
        Ok(())
    }

    /// Intern a constant, de-duplicating by value (reals by bit pattern).
    pub(crate) fn intern_constant(&mut self, word: Word) -> usize {
        match self
            .constants
            .iter()
            .position(|existing| *existing == word)
        {
            Some(index) => index,
            None => {
                self.constants.push(word);
                self.constants.len() - 1
            }
        }
    }

    /// Append raw words to the typed-constant blob; returns the data-store
    /// address the first word will have at program load.
    pub(crate) fn add_typed_constants(&mut self, words: &[Word]) -> usize {
        let start = self.typed_constants.len();
        self.typed_constants.extend_from_slice(words);
        start
    }

    /// Attach a note to an instruction address.
    pub(crate) fn set_comment(&mut self, address: usize, text: String) {
        self.comments.insert(address, text);
    }

    /// Render one instruction as a disassembly line.
    pub fn disassemble_instruction(&self, address: usize) -> String {
        let mut line = format!("{:04} ", address);
        match self.istore.get(address).copied().map(decode) {
            Some(Ok((opcode, operand1, operand2))) => {
                let _ = write!(
                    line,
                    " {:<4} {:>4} {:>6}",
                    opcode.mnemonic(),
                    operand1,
                    operand2
                );
                if opcode == Opcode::Ldc {
                    if let Some(constant) =
                        self.constants.get(operand2 as usize)
                    {
                        let _ = write!(line, "  ; {}", constant);
                    }
                }
            }
            Some(Err(_)) => {
                let _ = write!(line, " ???");
            }
            None => {
                let _ = write!(line, " <end of istore>");
            }
        }
        if let Some(comment) = self.comments.get(&address) {
            let _ = write!(line, "  ; {}", comment);
        }
        line
    }

    /// Render the whole program listing.
    pub fn disassemble(&self) -> String {
        let mut listing = String::new();
        for address in 0..self.istore.len() {
            listing.push_str(&self.disassemble_instruction(address));
            listing.push('\n');
        }
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        for byte in 0..=0x2Eu8 {
            let opcode = Opcode::try_from(byte).unwrap();
            for &(operand1, operand2) in
                &[(0, 0), (1, 2), (0x1FF, 0x7FFF), (0x100, 0x4000)]
            {
                let word = encode(opcode, operand1, operand2);
                assert_eq!(
                    decode(word).unwrap(),
                    (opcode, operand1, operand2),
                );
            }
        }
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert!(matches!(
            decode(0xFF),
            Err(RuntimeError::UnknownOpcode(0xFF)),
        ));
    }

    #[test]
    fn test_operand_range_check() {
        let mut bytecode = Bytecode::new(NativeRegistry::default());
        assert!(bytecode.emit(Opcode::Ujp, 0, 0x7FFF).is_ok());
        assert!(bytecode.emit(Opcode::Ujp, 0, 0x8000).is_err());
        assert!(bytecode.emit(Opcode::Ldc, 0x200, 0).is_err());
    }

    #[test]
    fn test_constant_interning() {
        let mut bytecode = Bytecode::new(NativeRegistry::default());
        let a = bytecode.intern_constant(Word::Int(42));
        let b = bytecode.intern_constant(Word::Str("hi".into()));
        let c = bytecode.intern_constant(Word::Int(42));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(bytecode.constants.len(), 2);
    }

    #[test]
    fn test_patch_operand2() {
        let mut bytecode = Bytecode::new(NativeRegistry::default());
        let address = bytecode.emit(Opcode::Fjp, 0, 0).unwrap();
        bytecode.patch_operand2(address, 123).unwrap();
        assert_eq!(
            decode(bytecode.istore[address]).unwrap(),
            (Opcode::Fjp, 0, 123),
        );
    }
}
