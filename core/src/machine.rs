//! The p-machine: a steppable stack/heap interpreter for compiled
//! [Bytecode]. Maintains the full runtime state — data store, program
//! counter, frame registers — and executes cooperatively: [Machine::step]
//! runs up to a budget of instructions and returns, so the embedder's event
//! loop stays responsive. Host I/O goes through the [Host] trait; native
//! procedures reach machine state through a [MachineHandle].

use crate::{
    ast::{SimpleType, Word},
    bytecode::{decode, Bytecode, Opcode},
    consts::{DEFAULT_STEP_BUDGET, DSTORE_SIZE, MARK_SIZE},
    error::{RuntimeError, RuntimeErrorReport},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    cmp::Ordering,
    convert::TryFrom,
    fmt, mem, thread,
    time::{Duration, Instant},
};

/// Callbacks the machine needs from its embedder. Output is line-based;
/// keyboard access has do-nothing defaults for hosts without one.
pub trait Host {
    /// One completed line of program output.
    fn writeln(&mut self, line: &str);

    /// Is a key waiting to be read?
    fn key_pressed(&mut self) -> bool {
        false
    }

    /// Dequeue one key, if any.
    fn read_key(&mut self) -> Option<char> {
        None
    }
}

/// Whether the machine is willing to execute more instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MachineState {
    Running,
    Stopped,
}

/// What a call to [Machine::step] is telling the embedder to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Budget exhausted; call `step` again when convenient
    Running,
    /// A native asked for a pause of this many milliseconds before the next
    /// batch
    NeedsDelay(u64),
    /// The machine has stopped (normal halt, `stop()`, or runtime error)
    Halted,
}

/// Internal result of executing one instruction.
enum Control {
    Continue,
    Halt,
}

/// The control handle passed to every native procedure. Mediates all access
/// to machine state: the data store (with the same address validity rule the
/// interpreter applies), the heap, output, delays, the keyboard and the RNG.
pub struct MachineHandle<'a> {
    dstore: &'a mut [Word],
    sp: usize,
    np: &'a mut usize,
    pending_delay: &'a mut Option<u64>,
    stop_requested: &'a mut bool,
    line_buffer: &'a mut String,
    host: &'a mut dyn Host,
    rng: &'a mut StdRng,
}

impl MachineHandle<'_> {
    /// Stop the machine at the end of the current instruction.
    pub fn stop(&mut self) {
        *self.stop_requested = true;
    }

    /// Ask the embedder to wait before the next batch.
    pub fn delay(&mut self, ms: u64) {
        *self.pending_delay = Some(ms);
    }

    /// Append text to the current output line.
    pub fn write(&mut self, text: &str) {
        self.line_buffer.push_str(text);
    }

    /// Complete the current output line and hand it to the host.
    pub fn writeln(&mut self) {
        let line = mem::take(self.line_buffer);
        self.host.writeln(&line);
    }

    fn check(&self, address: usize) -> Result<(), RuntimeError> {
        if address >= DSTORE_SIZE
            || (address >= self.sp && address < *self.np)
        {
            Err(RuntimeError::InvalidAddress(address as i64))
        } else {
            Ok(())
        }
    }

    /// Read one data-store word (used by by-reference parameters).
    pub fn read_dstore(&self, address: usize) -> Result<Word, RuntimeError> {
        self.check(address)?;
        Ok(self.dstore[address].clone())
    }

    /// Write one data-store word (used by by-reference parameters).
    pub fn write_dstore(
        &mut self,
        address: usize,
        word: Word,
    ) -> Result<(), RuntimeError> {
        self.check(address)?;
        self.dstore[address] = word;
        Ok(())
    }

    /// Allocate a zero-filled heap block of `words` words and return its
    /// address. The block size is stored one word below the returned
    /// address.
    pub fn malloc(&mut self, words: usize) -> Result<usize, RuntimeError> {
        let needed = words + 1;
        if *self.np < self.sp + needed {
            return Err(RuntimeError::HeapExhausted);
        }
        *self.np -= needed;
        let base = *self.np;
        self.dstore[base] = Word::Int(words as i32);
        for slot in &mut self.dstore[base + 1..base + needed] {
            *slot = Word::Int(0);
        }
        Ok(base + 1)
    }

    /// Release a heap block. Only the block at the current heap bottom is
    /// actually reclaimed; any other release is a no-op (there is no
    /// coalescing).
    pub fn free(&mut self, address: usize) {
        if address == *self.np + 1 {
            if let Word::Int(size) = self.dstore[address - 1] {
                if size >= 0 {
                    *self.np += size as usize + 1;
                }
            }
        }
    }

    pub fn key_pressed(&mut self) -> bool {
        self.host.key_pressed()
    }

    pub fn read_key(&mut self) -> Option<char> {
        self.host.read_key()
    }

    /// A uniform random real in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.gen()
    }

    /// A uniform random integer in `[0, limit)`; 0 if `limit <= 0`.
    pub fn random_below(&mut self, limit: i32) -> i32 {
        if limit <= 0 {
            0
        } else {
            self.rng.gen_range(0..limit)
        }
    }
}

/// A steppable bytecode executor. Owns the data store exclusively; the host
/// only sees it through a [MachineHandle].
pub struct Machine {
    bytecode: Bytecode,

    // Runtime state
    dstore: Vec<Word>,
    pc: usize,
    sp: usize,
    mp: usize,
    np: usize,
    ep: usize,
    state: MachineState,
    pending_delay: Option<u64>,
    stop_requested: bool,
    line_buffer: String,
    error: Option<RuntimeErrorReport>,

    // Host integration
    host: Box<dyn Host>,
    finish_callback: Option<Box<dyn FnMut(Duration)>>,
    debug_callback: Option<Box<dyn FnMut(&str)>>,
    finish_fired: bool,
    started_at: Instant,
    rng: StdRng,
}

impl Machine {
    /// Load a compiled program: the typed-constant blob is copied into the
    /// bottom of the data store, the stack starts just above it, and the
    /// heap is empty.
    pub fn new(bytecode: Bytecode, host: Box<dyn Host>) -> Self {
        let mut dstore = vec![Word::Int(0); DSTORE_SIZE];
        for (address, word) in bytecode.typed_constants.iter().enumerate() {
            dstore[address] = word.clone();
        }
        let sp = bytecode.typed_constants.len();
        Self {
            pc: bytecode.start_address,
            bytecode,
            dstore,
            sp,
            mp: 0,
            np: DSTORE_SIZE,
            ep: sp,
            state: MachineState::Running,
            pending_delay: None,
            stop_requested: false,
            line_buffer: String::new(),
            error: None,
            host,
            finish_callback: None,
            debug_callback: None,
            finish_fired: false,
            started_at: Instant::now(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Called exactly once, when the machine stops for any reason, with the
    /// elapsed wall time.
    pub fn set_finish_callback(
        &mut self,
        callback: impl FnMut(Duration) + 'static,
    ) {
        self.finish_callback = Some(Box::new(callback));
    }

    /// Called with one disassembly line per instruction stepped.
    pub fn set_debug_callback(
        &mut self,
        callback: impl FnMut(&str) + 'static,
    ) {
        self.debug_callback = Some(Box::new(callback));
    }

    /// Execute up to `budget` instructions and report how things stand.
    /// Suspension only happens between instructions; each instruction is
    /// synchronous and atomic.
    pub fn step(&mut self, budget: u32) -> StepOutcome {
        if self.state == MachineState::Stopped {
            return StepOutcome::Halted;
        }
        for _ in 0..budget {
            let at = self.pc;
            match self.execute_one() {
                Ok(Control::Continue) => {}
                Ok(Control::Halt) => {
                    self.halt();
                    return StepOutcome::Halted;
                }
                Err(error) => {
                    self.error = Some(RuntimeErrorReport::new(error, at));
                    self.halt();
                    return StepOutcome::Halted;
                }
            }
            if self.stop_requested {
                self.halt();
                return StepOutcome::Halted;
            }
            if let Some(ms) = self.pending_delay.take() {
                return StepOutcome::NeedsDelay(ms);
            }
        }
        StepOutcome::Running
    }

    /// Drive the machine to completion, sleeping through requested delays.
    /// Embedders with their own event loop should call [Self::step]
    /// directly instead.
    pub fn run(&mut self) {
        loop {
            match self.step(DEFAULT_STEP_BUDGET) {
                StepOutcome::Running => {}
                StepOutcome::NeedsDelay(ms) => {
                    thread::sleep(Duration::from_millis(ms))
                }
                StepOutcome::Halted => break,
            }
        }
    }

    /// Stop the machine. Idempotent; the finish callback fires only the
    /// first time.
    pub fn stop(&mut self) {
        if self.state == MachineState::Running {
            self.halt();
        }
    }

    fn halt(&mut self) {
        self.state = MachineState::Stopped;
        if !self.finish_fired {
            self.finish_fired = true;
            let elapsed = self.started_at.elapsed();
            if let Some(callback) = &mut self.finish_callback {
                callback(elapsed);
            }
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn mp(&self) -> usize {
        self.mp
    }

    pub fn np(&self) -> usize {
        self.np
    }

    pub fn ep(&self) -> usize {
        self.ep
    }

    /// The program being executed.
    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    /// The runtime error that stopped this machine, if one did.
    pub fn error(&self) -> Option<&RuntimeErrorReport> {
        self.error.as_ref()
    }

    /// Read one data-store word without the validity rule; for tests and
    /// state visualizations.
    pub fn peek_dstore(&self, address: usize) -> Option<&Word> {
        self.dstore.get(address)
    }

    /// Build the control handle natives see.
    pub(crate) fn handle(&mut self) -> MachineHandle<'_> {
        MachineHandle {
            dstore: &mut self.dstore,
            sp: self.sp,
            np: &mut self.np,
            pending_delay: &mut self.pending_delay,
            stop_requested: &mut self.stop_requested,
            line_buffer: &mut self.line_buffer,
            host: self.host.as_mut(),
            rng: &mut self.rng,
        }
    }

    // --- stack primitives. Type confusion on the stack is a compiler bug,
    // so the typed pops panic rather than erroring.

    fn push(&mut self, word: Word) -> Result<(), RuntimeError> {
        if self.sp >= self.np {
            return Err(RuntimeError::StackExhausted);
        }
        self.dstore[self.sp] = word;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Word {
        assert!(self.sp > 0, "pop from empty stack");
        self.sp -= 1;
        mem::replace(&mut self.dstore[self.sp], Word::Int(0))
    }

    fn pop_int(&mut self) -> i32 {
        match self.pop() {
            Word::Int(value) => value,
            other => panic!("expected integer on stack, got {:?}", other),
        }
    }

    fn pop_real(&mut self) -> f64 {
        match self.pop() {
            Word::Real(value) => value,
            Word::Int(value) => f64::from(value),
            other => panic!("expected real on stack, got {:?}", other),
        }
    }

    fn pop_bool(&mut self) -> bool {
        match self.pop() {
            Word::Bool(value) => value,
            other => panic!("expected boolean on stack, got {:?}", other),
        }
    }

    fn pop_address(&mut self) -> Result<usize, RuntimeError> {
        let value = self.pop_int();
        if value < 0 {
            Err(RuntimeError::InvalidAddress(i64::from(value)))
        } else {
            Ok(value as usize)
        }
    }

    /// Validity of a data address: inside the store and outside the unused
    /// gap between stack top and heap bottom.
    fn check_data_address(&self, address: usize) -> Result<(), RuntimeError> {
        if address >= DSTORE_SIZE
            || (address >= self.sp && address < self.np)
        {
            Err(RuntimeError::InvalidAddress(address as i64))
        } else {
            Ok(())
        }
    }

    fn load(&self, address: usize) -> Result<Word, RuntimeError> {
        self.check_data_address(address)?;
        Ok(self.dstore[address].clone())
    }

    fn store(
        &mut self,
        address: usize,
        word: Word,
    ) -> Result<(), RuntimeError> {
        self.check_data_address(address)?;
        self.dstore[address] = word;
        Ok(())
    }

    fn frame_int(&self, address: usize) -> usize {
        match &self.dstore[address] {
            Word::Int(value) if *value >= 0 => *value as usize,
            other => panic!("corrupt mark at {}: {:?}", address, other),
        }
    }

    /// Follow the static-link chain `level` frames up from the current one.
    fn base(&self, level: u32) -> usize {
        let mut base = self.mp;
        for _ in 0..level {
            base = self.frame_int(base + 1);
        }
        base
    }

    fn execute_one(&mut self) -> Result<Control, RuntimeError> {
        if self.debug_callback.is_some() {
            let line = self.bytecode.disassemble_instruction(self.pc);
            if let Some(callback) = &mut self.debug_callback {
                callback(&line);
            }
        }

        let word = *self
            .bytecode
            .istore
            .get(self.pc)
            .ok_or(RuntimeError::InvalidAddress(self.pc as i64))?;
        let (opcode, operand1, operand2) = decode(word)?;
        let mut next_pc = self.pc + 1;

        match opcode {
            Opcode::Cup => {
                let arg_size = operand1 as usize;
                assert!(
                    self.sp >= arg_size + MARK_SIZE,
                    "CUP without a mark"
                );
                let new_mp = self.sp - arg_size - MARK_SIZE;
                self.dstore[new_mp + 4] = Word::Int((self.pc + 1) as i32);
                self.mp = new_mp;
                next_pc = operand2 as usize;
            }
            Opcode::Csp => {
                let arg_count = operand1 as usize;
                let mut args = Vec::with_capacity(arg_count);
                for _ in 0..arg_count {
                    args.push(self.pop());
                }
                args.reverse();
                let run = self
                    .bytecode
                    .natives()
                    .get(operand2 as usize)
                    .unwrap_or_else(|| {
                        panic!("unknown native index {}", operand2)
                    })
                    .run;
                let mut handle = self.handle();
                if let Some(result) = run(&mut handle, args)? {
                    self.push(result)?;
                }
            }
            Opcode::Ent => {
                let target = self.mp + operand2 as usize;
                if operand1 == 0 {
                    if target > self.np {
                        return Err(RuntimeError::StackExhausted);
                    }
                    for slot in &mut self.dstore[self.sp..target] {
                        *slot = Word::Int(0);
                    }
                    self.sp = target;
                } else {
                    self.ep = target;
                }
            }
            Opcode::Mst => {
                let static_link = self.base(operand1);
                self.push(Word::Int(0))?; // return value slot
                self.push(Word::Int(static_link as i32))?;
                self.push(Word::Int(self.mp as i32))?;
                self.push(Word::Int(self.ep as i32))?;
                self.push(Word::Int(0))?; // return address, set by CUP
            }
            Opcode::Rtn => {
                let code = SimpleType::try_from(operand1 as u8)
                    .expect("bad RTN type code");
                let old_mp = self.mp;
                next_pc = self.frame_int(old_mp + 4);
                self.ep = self.frame_int(old_mp + 3);
                self.mp = self.frame_int(old_mp + 2);
                // A function leaves its return value slot on the stack
                self.sp = if code == SimpleType::Void {
                    old_mp
                } else {
                    old_mp + 1
                };
            }
            Opcode::Ldc => {
                let code = SimpleType::try_from(operand1 as u8)
                    .expect("bad LDC type code");
                let value = match code {
                    SimpleType::Boolean => Word::Bool(operand2 != 0),
                    SimpleType::Char => Word::Char(
                        std::char::from_u32(operand2).unwrap_or('\0'),
                    ),
                    _ => self
                        .bytecode
                        .constants
                        .get(operand2 as usize)
                        .unwrap_or_else(|| {
                            panic!("bad constant index {}", operand2)
                        })
                        .clone(),
                };
                self.push(value)?;
            }
            Opcode::Lda => {
                let address = self.base(operand1) + operand2 as usize;
                self.push(Word::Int(address as i32))?;
            }
            Opcode::Ldi => {
                let address = self.pop_address()?;
                let value = self.load(address)?;
                self.push(value)?;
            }
            Opcode::Sti => {
                let value = self.pop();
                let address = self.pop_address()?;
                self.store(address, value)?;
            }
            Opcode::Lva
            | Opcode::Lvb
            | Opcode::Lvc
            | Opcode::Lvi
            | Opcode::Lvr => {
                let address = self.base(operand1) + operand2 as usize;
                let value = self.load(address)?;
                self.push(value)?;
            }
            Opcode::Ixa => {
                let index = self.pop_int();
                let address = self.pop_int();
                let stride = operand2 as i32;
                self.push(Word::Int(
                    address.wrapping_add(index.wrapping_mul(stride)),
                ))?;
            }
            Opcode::Ujp => {
                next_pc = operand2 as usize;
            }
            Opcode::Fjp => {
                if !self.pop_bool() {
                    next_pc = operand2 as usize;
                }
            }
            Opcode::Tjp => {
                if self.pop_bool() {
                    next_pc = operand2 as usize;
                }
            }
            Opcode::Xjp => {
                next_pc = self.pop_address()?;
            }
            Opcode::Adi => {
                let b = self.pop_int();
                let a = self.pop_int();
                self.push(Word::Int(a.wrapping_add(b)))?;
            }
            Opcode::Sbi => {
                let b = self.pop_int();
                let a = self.pop_int();
                self.push(Word::Int(a.wrapping_sub(b)))?;
            }
            Opcode::Mpi => {
                let b = self.pop_int();
                let a = self.pop_int();
                self.push(Word::Int(a.wrapping_mul(b)))?;
            }
            Opcode::Dvi => {
                let b = self.pop_int();
                let a = self.pop_int();
                if b == 0 {
                    return Err(RuntimeError::DivideByZero);
                }
                self.push(Word::Int(a.wrapping_div(b)))?;
            }
            Opcode::Mod => {
                let b = self.pop_int();
                let a = self.pop_int();
                if b == 0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                self.push(Word::Int(a.wrapping_rem(b)))?;
            }
            Opcode::Adr => {
                let b = self.pop_real();
                let a = self.pop_real();
                self.push(Word::Real(a + b))?;
            }
            Opcode::Sbr => {
                let b = self.pop_real();
                let a = self.pop_real();
                self.push(Word::Real(a - b))?;
            }
            Opcode::Mpr => {
                let b = self.pop_real();
                let a = self.pop_real();
                self.push(Word::Real(a * b))?;
            }
            Opcode::Dvr => {
                let b = self.pop_real();
                let a = self.pop_real();
                if b == 0.0 {
                    return Err(RuntimeError::DivideByZero);
                }
                self.push(Word::Real(a / b))?;
            }
            Opcode::Ngi => {
                let value = self.pop_int();
                self.push(Word::Int(value.wrapping_neg()))?;
            }
            Opcode::Ngr => {
                let value = self.pop_real();
                self.push(Word::Real(-value))?;
            }
            Opcode::And => {
                let b = self.pop_bool();
                let a = self.pop_bool();
                self.push(Word::Bool(a && b))?;
            }
            Opcode::Ior => {
                let b = self.pop_bool();
                let a = self.pop_bool();
                self.push(Word::Bool(a || b))?;
            }
            Opcode::Not => {
                let value = self.pop_bool();
                self.push(Word::Bool(!value))?;
            }
            Opcode::Equ
            | Opcode::Neq
            | Opcode::Grt
            | Opcode::Geq
            | Opcode::Les
            | Opcode::Leq => {
                let b = self.pop();
                let a = self.pop();
                let ordering = compare_words(&a, &b);
                let result = match opcode {
                    Opcode::Equ => ordering == Ordering::Equal,
                    Opcode::Neq => ordering != Ordering::Equal,
                    Opcode::Grt => ordering == Ordering::Greater,
                    Opcode::Geq => ordering != Ordering::Less,
                    Opcode::Les => ordering == Ordering::Less,
                    Opcode::Leq => ordering != Ordering::Greater,
                    _ => unreachable!(),
                };
                self.push(Word::Bool(result))?;
            }
            Opcode::Inc => {
                let value = bump(self.pop(), 1);
                self.push(value)?;
            }
            Opcode::Dec => {
                let value = bump(self.pop(), -1);
                self.push(value)?;
            }
            Opcode::Flt => {
                let value = self.pop_real();
                self.push(Word::Real(value))?;
            }
            Opcode::Trc => {
                let value = self.pop_real();
                self.push(Word::Int(value.trunc() as i32))?;
            }
            Opcode::Rnd => {
                let value = self.pop_real();
                self.push(Word::Int(value.round() as i32))?;
            }
            Opcode::Chr => {
                let code = self.pop_int();
                let ch = u32::try_from(code)
                    .ok()
                    .and_then(std::char::from_u32)
                    .unwrap_or('\0');
                self.push(Word::Char(ch))?;
            }
            Opcode::Ord => {
                let value = match self.pop() {
                    Word::Char(ch) => ch as i32,
                    Word::Bool(b) => b as i32,
                    Word::Int(value) => value,
                    other => panic!("ORD of {:?}", other),
                };
                self.push(Word::Int(value))?;
            }
            Opcode::Stp => {
                return Ok(Control::Halt);
            }
        }

        self.pc = next_pc;
        Ok(Control::Continue)
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &self.pc)
            .field("sp", &self.sp)
            .field("mp", &self.mp)
            .field("np", &self.np)
            .field("ep", &self.ep)
            .field("state", &self.state)
            .finish()
    }
}

/// Ordering of two words, used by the comparison instructions. Both operands
/// have the same type after implicit casts, except that a char may meet a
/// string (char→string casts emit no code).
fn compare_words(a: &Word, b: &Word) -> Ordering {
    match (a, b) {
        (Word::Int(a), Word::Int(b)) => a.cmp(b),
        (Word::Real(a), Word::Real(b)) => {
            a.partial_cmp(b).unwrap_or(Ordering::Equal)
        }
        (Word::Int(a), Word::Real(b)) => f64::from(*a)
            .partial_cmp(b)
            .unwrap_or(Ordering::Equal),
        (Word::Real(a), Word::Int(b)) => a
            .partial_cmp(&f64::from(*b))
            .unwrap_or(Ordering::Equal),
        (Word::Bool(a), Word::Bool(b)) => a.cmp(b),
        (Word::Char(a), Word::Char(b)) => a.cmp(b),
        (Word::Str(a), Word::Str(b)) => a.cmp(b),
        (Word::Char(a), Word::Str(b)) => {
            a.to_string().as_str().cmp(b.as_str())
        }
        (Word::Str(a), Word::Char(b)) => {
            a.as_str().cmp(b.to_string().as_str())
        }
        _ => panic!("cannot compare {:?} and {:?}", a, b),
    }
}

/// INC/DEC: ±1 on integers and chars.
fn bump(word: Word, delta: i32) -> Word {
    match word {
        Word::Int(value) => Word::Int(value.wrapping_add(delta)),
        Word::Char(ch) => {
            let code = (ch as i32).wrapping_add(delta);
            let ch = u32::try_from(code)
                .ok()
                .and_then(std::char::from_u32)
                .unwrap_or('\0');
            Word::Char(ch)
        }
        other => panic!("INC/DEC of {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::SimpleType, native::NativeRegistry};

    struct NullHost;

    impl Host for NullHost {
        fn writeln(&mut self, _line: &str) {}
    }

    fn machine_for(build: impl FnOnce(&mut Bytecode)) -> Machine {
        let mut bytecode = Bytecode::new(NativeRegistry::default());
        build(&mut bytecode);
        Machine::new(bytecode, Box::new(NullHost))
    }

    #[test]
    fn test_load_invariants() {
        let machine = machine_for(|bytecode| {
            bytecode.typed_constants.push(Word::Int(7));
            bytecode.typed_constants.push(Word::Str("x".into()));
            bytecode.emit(Opcode::Stp, 0, 0).unwrap();
        });
        assert_eq!(machine.sp(), 2);
        assert_eq!(machine.np(), DSTORE_SIZE);
        assert_eq!(machine.peek_dstore(0), Some(&Word::Int(7)));
        assert_eq!(machine.peek_dstore(1), Some(&Word::Str("x".into())));
    }

    #[test]
    fn test_malloc_free_restores_np() {
        let mut machine = machine_for(|bytecode| {
            bytecode.emit(Opcode::Stp, 0, 0).unwrap();
        });
        let before = machine.np();
        let mut handle = machine.handle();
        let block = handle.malloc(10).unwrap();
        assert_eq!(*handle.np, before - 11);
        // Size word sits one below the block
        assert_eq!(handle.dstore[block - 1], Word::Int(10));
        handle.free(block);
        assert_eq!(machine.np(), before);
    }

    #[test]
    fn test_free_is_noop_unless_bottom_block() {
        let mut machine = machine_for(|bytecode| {
            bytecode.emit(Opcode::Stp, 0, 0).unwrap();
        });
        let mut handle = machine.handle();
        let first = handle.malloc(4).unwrap();
        let second = handle.malloc(4).unwrap();
        let np_after_both = *handle.np;
        // First block is not at the heap bottom, so this does nothing
        handle.free(first);
        assert_eq!(*handle.np, np_after_both);
        handle.free(second);
        handle.free(first);
        assert_eq!(machine.np(), DSTORE_SIZE);
    }

    #[test]
    fn test_mst_cup_rtn_restores_frame() {
        // A mark, a call to an empty procedure, then halt
        let mut machine = machine_for(|bytecode| {
            let void = u8::from(SimpleType::Void) as usize;
            bytecode.emit(Opcode::Mst, 0, 0).unwrap(); // 0
            bytecode.emit(Opcode::Cup, 0, 3).unwrap(); // 1
            bytecode.emit(Opcode::Stp, 0, 0).unwrap(); // 2
            bytecode.emit(Opcode::Ent, 0, 7).unwrap(); // 3: frame of 7
            bytecode.emit(Opcode::Rtn, void, 0).unwrap(); // 4
        });
        let (sp0, mp0, ep0) = (machine.sp(), machine.mp(), machine.ep());
        assert_eq!(machine.step(10), StepOutcome::Halted);
        assert_eq!(machine.sp(), sp0);
        assert_eq!(machine.mp(), mp0);
        assert_eq!(machine.ep(), ep0);
        assert_eq!(machine.pc(), 2);
        assert!(machine.error().is_none());
    }

    #[test]
    fn test_divide_by_zero() {
        let mut machine = machine_for(|bytecode| {
            let int_code = u8::from(SimpleType::Integer) as usize;
            let ten = bytecode.intern_constant(Word::Int(10));
            let zero = bytecode.intern_constant(Word::Int(0));
            bytecode.emit(Opcode::Ldc, int_code, ten).unwrap();
            bytecode.emit(Opcode::Ldc, int_code, zero).unwrap();
            bytecode.emit(Opcode::Dvi, 0, 0).unwrap();
            bytecode.emit(Opcode::Stp, 0, 0).unwrap();
        });
        assert_eq!(machine.step(10), StepOutcome::Halted);
        let report = machine.error().unwrap();
        assert_eq!(report.address(), 2);
        assert_eq!(
            report.to_string(),
            "Runtime error at address 2: divide by zero",
        );
    }

    #[test]
    fn test_stop_is_idempotent_and_fires_finish_once() {
        use std::{cell::Cell, rc::Rc};
        let mut machine = machine_for(|bytecode| {
            bytecode.emit(Opcode::Stp, 0, 0).unwrap();
        });
        let fired = Rc::new(Cell::new(0));
        let seen = Rc::clone(&fired);
        machine.set_finish_callback(move |_| seen.set(seen.get() + 1));
        machine.stop();
        machine.stop();
        assert_eq!(machine.step(10), StepOutcome::Halted);
        assert_eq!(fired.get(), 1);
        assert_eq!(machine.state(), MachineState::Stopped);
    }
}
