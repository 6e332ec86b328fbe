//! Interpreter instance and decode loop.
//!
//! One [`Interpreter`] runs one contract invocation: it owns the linear
//! memory, globals, indirect-call table, and the single live frame of
//! the currently executing function. Function calls swap the frame and
//! recurse into the loop; host calls reenter the driver through a
//! [`Process`] handle that exposes memory and the abort latch.
//!
//! The loop runs while `pc` is inside the code and the abort latch is
//! clear. Every effect is sequenced by bytecode order; the only way to
//! stop a running instance from outside is a host function calling
//! [`Process::terminate`], checked at the next opcode boundary.

use crate::storage::state::ChainState;
use crate::types::address::Address;
use crate::virtual_machine::compiler::CompiledFunction;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::host::HostFunction;
use crate::virtual_machine::memory::{LinearMemory, PointerType, TypeLength};
use crate::virtual_machine::module::{FuncInstance, GlobalDef, InitExpr, Module};
use crate::virtual_machine::opcodes as op;
use crate::virtual_machine::value::Value;
use std::sync::Arc;

/// Chain state visible to host functions during one invocation.
pub struct ChainEnv<'a> {
    /// Account whose storage namespace `get_state`/`set_state` use.
    pub origin: Address,
    pub state: &'a mut dyn ChainState,
}

/// The live execution context: operand stack, locals, code, and pc of
/// the function currently running.
struct Frame {
    stack: Vec<u64>,
    /// Hard bound on the operand stack, `max_depth + 1`.
    stack_limit: usize,
    locals: Vec<u64>,
    func: Arc<CompiledFunction>,
    pc: usize,
}

impl Frame {
    fn idle() -> Frame {
        Frame {
            stack: Vec::new(),
            stack_limit: 0,
            locals: Vec::new(),
            func: Arc::new(CompiledFunction::idle()),
            pc: 0,
        }
    }
}

/// A single-use execution engine for one decoded module.
pub struct Interpreter<'a> {
    module: Module,
    memory: LinearMemory,
    globals: Vec<u64>,
    /// Indirect-call table: function indices, `None` for empty slots.
    table: Vec<Option<u32>>,
    frame: Frame,
    /// One-way latch; set by `close` or a host function to stop the loop
    /// at the next opcode boundary.
    abort: bool,
    chain: Option<ChainEnv<'a>>,
}

impl<'a> Interpreter<'a> {
    /// Builds an instance without chain state; state host functions will
    /// signal failure through their sentinels.
    pub fn new(module: Module) -> Result<Self, VmError> {
        Self::with_env(module, None)
    }

    /// Builds an instance wired to chain state for `origin`.
    pub fn with_chain(
        module: Module,
        origin: Address,
        state: &'a mut dyn ChainState,
    ) -> Result<Self, VmError> {
        Self::with_env(module, Some(ChainEnv { origin, state }))
    }

    fn with_env(module: Module, chain: Option<ChainEnv<'a>>) -> Result<Self, VmError> {
        if module.memories.len() > 1 {
            return Err(VmError::MultipleLinearMemories);
        }
        // Default to a single page when the module declares no memory.
        let pages = module
            .memories
            .first()
            .map(|m| m.initial as usize)
            .unwrap_or(1);
        let memory = LinearMemory::new(pages);

        let mut interpreter = Interpreter {
            module,
            memory,
            globals: Vec::new(),
            table: Vec::new(),
            frame: Frame::idle(),
            abort: false,
            chain,
        };
        interpreter.reset_globals()?;
        interpreter.apply_data_segments()?;
        interpreter.init_table()?;

        if let Some(start) = interpreter.module.start {
            interpreter.exec_code(start as i64, &[])?;
        }
        Ok(interpreter)
    }

    /// Evaluates every global initializer into its 64-bit bit pattern.
    fn reset_globals(&mut self) -> Result<(), VmError> {
        let mut globals = Vec::with_capacity(self.module.globals.len());
        for def in &self.module.globals {
            let value = eval_init_expr(&self.module.globals, &globals, &def.init)?;
            globals.push(value.to_bits());
        }
        self.globals = globals;
        Ok(())
    }

    /// Copies active data segments into memory, registers their regions,
    /// and rebases the bump heap above the data high-water mark.
    fn apply_data_segments(&mut self) -> Result<(), VmError> {
        if self.module.data_segments.is_empty() {
            return Ok(());
        }
        let mut alloced = 0usize;
        for segment in &self.module.data_segments {
            if segment.memory_index != 0 {
                return Err(VmError::InvalidDataIndex(segment.memory_index));
            }
            let offset = match eval_init_expr(&self.module.globals, &self.globals, &segment.offset)?
            {
                Value::I32(v) => v as u32 as usize,
                _ => return Err(VmError::InvalidInitExpr),
            };
            self.memory.store_bytes(offset as u64, &segment.data)?;
            alloced += offset + segment.data.len();

            // A blob with NUL separators is a pack of C strings: record
            // one region per string, trailing NUL included in the length.
            if segment.data.contains(&0) {
                let mut part_offset = offset;
                for part in segment.data.split(|b| *b == 0) {
                    self.memory.register_region(
                        part_offset as u64,
                        TypeLength {
                            ptype: PointerType::String,
                            length: part.len() + 1,
                        },
                    );
                    part_offset += part.len() + 1;
                }
            } else {
                self.memory.register_region(
                    offset as u64,
                    TypeLength {
                        ptype: PointerType::String,
                        length: segment.data.len(),
                    },
                );
            }
        }
        self.memory.set_alloced_index(alloced);
        Ok(())
    }

    /// Populates the indirect-call table from element segments.
    fn init_table(&mut self) -> Result<(), VmError> {
        let mut table = vec![None; self.module.table_size as usize];
        for element in &self.module.elements {
            let offset = match eval_init_expr(&self.module.globals, &self.globals, &element.offset)?
            {
                Value::I32(v) => v as u32 as usize,
                _ => return Err(VmError::InvalidInitExpr),
            };
            for (i, func) in element.functions.iter().enumerate() {
                let slot = table.get_mut(offset + i).ok_or_else(|| {
                    VmError::Decode("element segment out of table range".to_string())
                })?;
                *slot = *func;
            }
        }
        self.table = table;
        Ok(())
    }

    /// The decoded module this instance runs.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The instance's linear memory.
    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Mutable access to the instance's linear memory.
    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    pub(crate) fn chain_mut(&mut self) -> Option<&mut ChainEnv<'a>> {
        self.chain.as_mut()
    }

    /// Readies the instance for another run: globals are re-evaluated,
    /// the frame is cleared, and the abort latch is released.
    pub fn restart(&mut self) -> Result<(), VmError> {
        self.reset_globals()?;
        self.frame = Frame::idle();
        self.abort = false;
        Ok(())
    }

    /// Latches the abort flag; the instance stops at the next opcode
    /// boundary and cannot be used until [`Interpreter::restart`].
    pub fn close(&mut self) {
        self.abort = true;
    }

    /// Calls the function at `fn_index` with the given argument slots.
    ///
    /// Validates the index, the argument count against the signature, and
    /// that the target is contract code rather than a host function. The
    /// result, if the signature declares one, is reinterpreted per the
    /// declared return type.
    pub fn exec_code(&mut self, fn_index: i64, args: &[u64]) -> Result<Option<Value>, VmError> {
        if fn_index < 0 || fn_index as usize >= self.module.functions.len() {
            return Err(VmError::InvalidFunctionIndex(fn_index));
        }
        let sig = self
            .module
            .func_sig(fn_index as u32)
            .ok_or(VmError::InvalidFunctionIndex(fn_index))?;
        if sig.params.len() != args.len() {
            return Err(VmError::InvalidArgumentCount {
                expected: sig.params.len(),
                actual: args.len(),
            });
        }
        let result_ty = sig.results.first().copied();
        let compiled = match &self.module.functions[fn_index as usize] {
            FuncInstance::Compiled(compiled) => Arc::clone(compiled),
            FuncInstance::Host(_) => return Err(VmError::NotCompiledFunction(fn_index)),
        };

        let mut locals = vec![0u64; compiled.total_local_vars];
        locals[..args.len()].copy_from_slice(args);
        self.frame = Frame {
            stack: Vec::with_capacity(compiled.max_depth + 1),
            stack_limit: compiled.max_depth + 1,
            locals,
            func: Arc::clone(&compiled),
            pc: 0,
        };

        let bits = self.run_frame()?;
        if compiled.returns {
            match result_ty {
                Some(ty) => Ok(Some(Value::from_bits(ty, bits))),
                None => Err(VmError::InvalidReturnType("none".to_string())),
            }
        } else {
            Ok(None)
        }
    }

    /// Runs the current frame to completion and returns the raw result
    /// slot (0 for void functions).
    fn run_frame(&mut self) -> Result<u64, VmError> {
        let func = Arc::clone(&self.frame.func);
        let code_len = func.code.len();

        while self.frame.pc < code_len && !self.abort {
            let opcode = func.code[self.frame.pc];
            self.frame.pc += 1;
            match opcode {
                op::RETURN => break,
                op::JMP => {
                    let target = self.fetch_i64()?;
                    self.frame.pc = target as usize;
                }
                op::JMP_Z => {
                    let target = self.fetch_i64()?;
                    if self.pop_u32()? == 0 {
                        self.frame.pc = target as usize;
                    }
                }
                op::JMP_NZ => {
                    let target = self.fetch_i64()?;
                    let preserve_top = self.fetch_bool()?;
                    let discard = self.fetch_i64()?;
                    if self.pop_u32()? != 0 {
                        self.frame.pc = target as usize;
                        self.unwind(discard as usize, preserve_top)?;
                    }
                }
                op::BR_TABLE => {
                    let index = self.fetch_i64()?;
                    let label = self.pop_i32()?;
                    let table = func
                        .branch_tables
                        .get(index as usize)
                        .ok_or(VmError::InvalidBranchTable(index))?;
                    let target = if label >= 0 && (label as usize) < table.targets.len() {
                        table.targets[label as usize]
                    } else {
                        table.default_target
                    };
                    if target.is_return {
                        break;
                    }
                    self.frame.pc = target.addr as usize;
                    self.unwind(target.discard as usize, target.preserve_top)?;
                }
                op::DISCARD => {
                    let count = self.fetch_i64()?;
                    self.unwind(count as usize, false)?;
                }
                op::DISCARD_PRESERVE_TOP => {
                    let count = self.fetch_i64()?;
                    self.unwind(count as usize, true)?;
                }
                op::CALL => {
                    let index = self.fetch_u32()?;
                    self.call_function(index as i64)?;
                }
                op::CALL_INDIRECT => {
                    let type_index = self.fetch_u32()?;
                    self.call_indirect(type_index)?;
                }
                other => self.step(other)?,
            }
        }

        if func.returns {
            self.frame.stack.last().copied().ok_or(VmError::StackUnderflow)
        } else {
            Ok(0)
        }
    }

    /// Removes `count` words from the stack, optionally keeping the top
    /// word in place.
    fn unwind(&mut self, count: usize, preserve_top: bool) -> Result<(), VmError> {
        let stack = &mut self.frame.stack;
        if count > stack.len() {
            return Err(VmError::StackUnderflow);
        }
        let top = if preserve_top {
            stack.last().copied()
        } else {
            None
        };
        let new_len = stack.len() - count;
        stack.truncate(new_len);
        if let Some(top) = top {
            self.push_u64(top)?;
        }
        Ok(())
    }

    /// Calls into the function index space: host functions marshal
    /// through the bridge, contract functions swap the frame and recurse.
    fn call_function(&mut self, index: i64) -> Result<(), VmError> {
        if index < 0 || index as usize >= self.module.functions.len() {
            return Err(VmError::InvalidFunctionIndex(index));
        }
        match &self.module.functions[index as usize] {
            FuncInstance::Host(host) => {
                let host = Arc::clone(host);
                self.call_host(&host)
            }
            FuncInstance::Compiled(compiled) => {
                let compiled = Arc::clone(compiled);
                self.call_compiled(compiled)
            }
        }
    }

    /// Saves the caller's context, runs the callee, restores, and pushes
    /// the callee's result if it declares one.
    fn call_compiled(&mut self, compiled: Arc<CompiledFunction>) -> Result<(), VmError> {
        let mut locals = vec![0u64; compiled.total_local_vars];
        for i in (0..compiled.args).rev() {
            locals[i] = self.pop_u64()?;
        }
        let callee = Frame {
            stack: Vec::with_capacity(compiled.max_depth + 1),
            stack_limit: compiled.max_depth + 1,
            locals,
            func: Arc::clone(&compiled),
            pc: 0,
        };
        let caller = std::mem::replace(&mut self.frame, callee);
        let result = self.run_frame();
        self.frame = caller;
        let bits = result?;
        if compiled.returns {
            self.push_u64(bits)?;
        }
        Ok(())
    }

    /// Pops arguments in reverse declaration order, converts them per the
    /// declared parameter types, invokes the host target, and pushes any
    /// result with the matching typed push.
    fn call_host(&mut self, host: &HostFunction) -> Result<(), VmError> {
        let count = host.sig.params.len();
        let mut args = vec![Value::I32(0); count];
        for i in (0..count).rev() {
            let bits = self.pop_u64()?;
            args[i] = Value::from_bits(host.sig.params[i], bits);
        }
        let result = (host.call)(&mut Process::new(self), &args)?;
        match (host.sig.results.first(), result) {
            (Some(ty), Some(value)) => {
                if value.ty() != *ty {
                    return Err(VmError::InvalidReturnType(value.ty().name().to_string()));
                }
                self.push_u64(value.to_bits())
            }
            (None, None) => Ok(()),
            (Some(ty), None) => Err(VmError::InvalidReturnType(format!(
                "expected {}, host returned nothing",
                ty.name()
            ))),
            (None, Some(value)) => Err(VmError::InvalidReturnType(format!(
                "void host function returned {}",
                value.ty().name()
            ))),
        }
    }

    /// Resolves a table entry, checks the signature, and calls through.
    fn call_indirect(&mut self, type_index: u32) -> Result<(), VmError> {
        let elem = self.pop_u32()?;
        let func_index = self
            .table
            .get(elem as usize)
            .copied()
            .flatten()
            .ok_or(VmError::UndefinedElement(elem))?;
        let matches = {
            let expected = self
                .module
                .types
                .get(type_index as usize)
                .ok_or(VmError::IndirectCallMismatch)?;
            let actual = self
                .module
                .func_sig(func_index)
                .ok_or(VmError::InvalidFunctionIndex(func_index as i64))?;
            actual == expected
        };
        if !matches {
            return Err(VmError::IndirectCallMismatch);
        }
        self.call_function(func_index as i64)
    }

    /// Dispatches one non-control opcode.
    fn step(&mut self, opcode: u8) -> Result<(), VmError> {
        match opcode {
            op::UNREACHABLE => return Err(VmError::Unreachable),
            op::SELECT => {
                let cond = self.pop_u32()?;
                let v2 = self.pop_u64()?;
                let v1 = self.pop_u64()?;
                self.push_u64(if cond != 0 { v1 } else { v2 })?;
            }
            op::LOCAL_GET => {
                let index = self.fetch_u32()?;
                let value = *self
                    .frame
                    .locals
                    .get(index as usize)
                    .ok_or(VmError::InvalidLocalIndex(index))?;
                self.push_u64(value)?;
            }
            op::LOCAL_SET => {
                let index = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let slot = self
                    .frame
                    .locals
                    .get_mut(index as usize)
                    .ok_or(VmError::InvalidLocalIndex(index))?;
                *slot = value;
            }
            op::LOCAL_TEE => {
                let index = self.fetch_u32()?;
                let value = *self
                    .frame
                    .stack
                    .last()
                    .ok_or(VmError::StackUnderflow)?;
                let slot = self
                    .frame
                    .locals
                    .get_mut(index as usize)
                    .ok_or(VmError::InvalidLocalIndex(index))?;
                *slot = value;
            }
            op::GLOBAL_GET => {
                let index = self.fetch_u32()?;
                let value = *self
                    .globals
                    .get(index as usize)
                    .ok_or(VmError::InvalidGlobalIndex(index))?;
                self.push_u64(value)?;
            }
            op::GLOBAL_SET => {
                let index = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let slot = self
                    .globals
                    .get_mut(index as usize)
                    .ok_or(VmError::InvalidGlobalIndex(index))?;
                *slot = value;
            }
            op::I32_CONST => {
                let value = self.fetch_u32()?;
                self.push_u32(value)?;
            }
            op::I64_CONST => {
                let value = self.fetch_u64()?;
                self.push_u64(value)?;
            }
            op::F32_CONST => {
                let bits = self.fetch_u32()?;
                self.push_u32(bits)?;
            }
            op::F64_CONST => {
                let bits = self.fetch_u64()?;
                self.push_u64(bits)?;
            }
            op::I32_LOAD => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<4>(ea)?;
                self.push_u32(u32::from_le_bytes(bytes))?;
            }
            op::I64_LOAD => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<8>(ea)?;
                self.push_u64(u64::from_le_bytes(bytes))?;
            }
            op::F32_LOAD => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<4>(ea)?;
                self.push_u32(u32::from_le_bytes(bytes))?;
            }
            op::F64_LOAD => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<8>(ea)?;
                self.push_u64(u64::from_le_bytes(bytes))?;
            }
            op::I32_LOAD8_S => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<1>(ea)?;
                self.push_i32(bytes[0] as i8 as i32)?;
            }
            op::I32_LOAD8_U => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<1>(ea)?;
                self.push_u32(bytes[0] as u32)?;
            }
            op::I32_LOAD16_S => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<2>(ea)?;
                self.push_i32(i16::from_le_bytes(bytes) as i32)?;
            }
            op::I32_LOAD16_U => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<2>(ea)?;
                self.push_u32(u16::from_le_bytes(bytes) as u32)?;
            }
            op::I64_LOAD8_S => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<1>(ea)?;
                self.push_i64(bytes[0] as i8 as i64)?;
            }
            op::I64_LOAD8_U => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<1>(ea)?;
                self.push_u64(bytes[0] as u64)?;
            }
            op::I64_LOAD16_S => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<2>(ea)?;
                self.push_i64(i16::from_le_bytes(bytes) as i64)?;
            }
            op::I64_LOAD16_U => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<2>(ea)?;
                self.push_u64(u16::from_le_bytes(bytes) as u64)?;
            }
            op::I64_LOAD32_S => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<4>(ea)?;
                self.push_i64(i32::from_le_bytes(bytes) as i64)?;
            }
            op::I64_LOAD32_U => {
                let ea = self.effective_address()?;
                let bytes = self.memory.load_bytes::<4>(ea)?;
                self.push_u64(u32::from_le_bytes(bytes) as u64)?;
            }
            op::I32_STORE | op::F32_STORE => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u32()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &value.to_le_bytes())?;
            }
            op::I64_STORE | op::F64_STORE => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &value.to_le_bytes())?;
            }
            op::I32_STORE8 => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u32()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &[value as u8])?;
            }
            op::I32_STORE16 => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u32()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &(value as u16).to_le_bytes())?;
            }
            op::I64_STORE8 => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &[value as u8])?;
            }
            op::I64_STORE16 => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &(value as u16).to_le_bytes())?;
            }
            op::I64_STORE32 => {
                let offset = self.fetch_u32()?;
                let value = self.pop_u64()?;
                let base = self.pop_u32()?;
                self.memory
                    .store_bytes(base as u64 + offset as u64, &(value as u32).to_le_bytes())?;
            }
            op::MEMORY_SIZE => {
                let pages = self.memory.pages() as u32;
                self.push_u32(pages)?;
            }
            op::MEMORY_GROW => {
                let delta = self.pop_u32()? as u64;
                let max = self
                    .module
                    .memories
                    .first()
                    .and_then(|m| m.maximum)
                    .unwrap_or(u64::MAX);
                let old = self.memory.pages() as u64;
                if old + delta > max {
                    self.push_i32(-1)?;
                } else {
                    self.memory.grow(delta as usize);
                    self.push_u32(old as u32)?;
                }
            }
            other => self.numeric(other)?,
        }
        Ok(())
    }

    fn effective_address(&mut self) -> Result<u64, VmError> {
        let offset = self.fetch_u32()?;
        let base = self.pop_u32()?;
        Ok(base as u64 + offset as u64)
    }

    // Immediate fetches from the flat bytecode, little-endian.

    pub(super) fn fetch_u32(&mut self) -> Result<u32, VmError> {
        let pc = self.frame.pc;
        let slice = self
            .frame
            .func
            .code
            .get(pc..pc + 4)
            .ok_or(VmError::UnexpectedEndOfBytecode(pc))?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(slice);
        self.frame.pc = pc + 4;
        Ok(u32::from_le_bytes(bytes))
    }

    pub(super) fn fetch_u64(&mut self) -> Result<u64, VmError> {
        let pc = self.frame.pc;
        let slice = self
            .frame
            .func
            .code
            .get(pc..pc + 8)
            .ok_or(VmError::UnexpectedEndOfBytecode(pc))?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slice);
        self.frame.pc = pc + 8;
        Ok(u64::from_le_bytes(bytes))
    }

    pub(super) fn fetch_i64(&mut self) -> Result<i64, VmError> {
        Ok(self.fetch_u64()? as i64)
    }

    pub(super) fn fetch_bool(&mut self) -> Result<bool, VmError> {
        let pc = self.frame.pc;
        let byte = *self
            .frame
            .func
            .code
            .get(pc)
            .ok_or(VmError::UnexpectedEndOfBytecode(pc))?;
        self.frame.pc = pc + 1;
        Ok(byte != 0)
    }

    // Typed operand-stack accessors. Values are reinterpreted into the
    // uniform 64-bit slot: i32 and f32 bit patterns zero-extended.

    pub(super) fn push_u64(&mut self, value: u64) -> Result<(), VmError> {
        if self.frame.stack.len() >= self.frame.stack_limit {
            return Err(VmError::StackOverflow(self.frame.stack_limit));
        }
        self.frame.stack.push(value);
        Ok(())
    }

    pub(super) fn push_i64(&mut self, value: i64) -> Result<(), VmError> {
        self.push_u64(value as u64)
    }

    pub(super) fn push_u32(&mut self, value: u32) -> Result<(), VmError> {
        self.push_u64(value as u64)
    }

    pub(super) fn push_i32(&mut self, value: i32) -> Result<(), VmError> {
        self.push_u64(value as u32 as u64)
    }

    pub(super) fn push_f32(&mut self, value: f32) -> Result<(), VmError> {
        self.push_u32(value.to_bits())
    }

    pub(super) fn push_f64(&mut self, value: f64) -> Result<(), VmError> {
        self.push_u64(value.to_bits())
    }

    pub(super) fn push_bool(&mut self, value: bool) -> Result<(), VmError> {
        self.push_u64(if value { 1 } else { 0 })
    }

    pub(super) fn pop_u64(&mut self) -> Result<u64, VmError> {
        self.frame.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub(super) fn pop_i64(&mut self) -> Result<i64, VmError> {
        Ok(self.pop_u64()? as i64)
    }

    pub(super) fn pop_u32(&mut self) -> Result<u32, VmError> {
        Ok(self.pop_u64()? as u32)
    }

    pub(super) fn pop_i32(&mut self) -> Result<i32, VmError> {
        Ok(self.pop_u32()? as i32)
    }

    pub(super) fn pop_f32(&mut self) -> Result<f32, VmError> {
        Ok(f32::from_bits(self.pop_u32()?))
    }

    pub(super) fn pop_f64(&mut self) -> Result<f64, VmError> {
        Ok(f64::from_bits(self.pop_u64()?))
    }
}

/// Evaluates a constant initializer against already-evaluated globals.
fn eval_init_expr(
    defs: &[GlobalDef],
    evaluated: &[u64],
    init: &InitExpr,
) -> Result<Value, VmError> {
    match init {
        InitExpr::Const(value) => Ok(*value),
        InitExpr::GlobalGet(index) => {
            let def = defs
                .get(*index as usize)
                .ok_or(VmError::InvalidInitExpr)?;
            let bits = evaluated
                .get(*index as usize)
                .ok_or(VmError::InvalidInitExpr)?;
            Ok(Value::from_bits(def.ty, *bits))
        }
    }
}

/// Proxy handed to host functions for access to memory and control.
pub struct Process<'p, 'a> {
    vm: &'p mut Interpreter<'a>,
}

impl<'p, 'a> Process<'p, 'a> {
    /// Wraps the running interpreter for a host call.
    pub fn new(vm: &'p mut Interpreter<'a>) -> Self {
        Process { vm }
    }

    /// Copies memory content at `offset` into `buf`, clipping at the
    /// memory boundary with a short-buffer error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, VmError> {
        self.vm.memory.read_at(buf, offset)
    }

    /// Copies `data` into memory at `offset`, clipping at the memory
    /// boundary with a short-write error.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, VmError> {
        self.vm.memory.write_at(data, offset)
    }

    /// Stops the execution of the current module at the next opcode.
    pub fn terminate(&mut self) {
        self.vm.abort = true;
    }

    /// The running instance's linear memory.
    pub fn memory(&mut self) -> &mut LinearMemory {
        &mut self.vm.memory
    }

    /// Chain state attached to the running instance, if any.
    pub(crate) fn chain_mut(&mut self) -> Option<&mut ChainEnv<'a>> {
        self.vm.chain_mut()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::virtual_machine::host::HostRegistry;
    use crate::virtual_machine::module::Module;

    pub(crate) fn instantiate_with(
        wat_src: &str,
        registry: &HostRegistry,
    ) -> Interpreter<'static> {
        let bytes = wat::parse_str(wat_src).expect("fixture must assemble");
        let module = Module::decode(&bytes, registry).expect("fixture must decode");
        Interpreter::new(module).expect("fixture must instantiate")
    }

    pub(crate) fn instantiate(wat_src: &str) -> Interpreter<'static> {
        instantiate_with(wat_src, &HostRegistry::env())
    }

    pub(crate) fn exec(wat_src: &str, name: &str, args: &[u64]) -> Result<Option<Value>, VmError> {
        let mut vm = instantiate(wat_src);
        let index = vm.module().export_func(name).expect("missing export") as i64;
        vm.exec_code(index, args)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{exec, instantiate, instantiate_with};
    use super::*;
    use crate::virtual_machine::host::HostRegistry;
    use crate::virtual_machine::module::Module;
    use crate::virtual_machine::value::ValueType;
    use std::sync::{Arc, Mutex};

    /// Two host imports ahead of three contract functions, so the
    /// contract functions land at indices 2, 3, and 4.
    const ADD_WAT: &str = r#"
        (module
          (import "env" "malloc" (func $malloc (param i32) (result i32)))
          (import "env" "print" (func $print (param i32)))
          (func (export "fct1") (result i32)
            i32.const 42)
          (func (export "fct2") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add)
          (func (export "fct3") (param i32 i32)
            local.get 0
            local.get 1
            i32.add
            call $print)
          (memory 1))
    "#;

    fn add_module() -> (Interpreter<'static>, Arc<Mutex<Vec<String>>>) {
        let printed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&printed);
        let mut registry = HostRegistry::env();
        registry.register("print", &[ValueType::I32], None, move |_, args| {
            if let Some(Value::I32(v)) = args.first() {
                sink.lock().unwrap().push(format!("result = {}", v));
            }
            Ok(None)
        });
        (instantiate_with(ADD_WAT, &registry), printed)
    }

    #[test]
    fn contract_functions_follow_host_imports() {
        let (vm, _) = add_module();
        assert_eq!(vm.module().export_func("fct1"), Some(2));
        assert_eq!(vm.module().export_func("fct2"), Some(3));
        assert_eq!(vm.module().export_func("fct3"), Some(4));
    }

    #[test]
    fn constant_function_returns_42() {
        let (mut vm, _) = add_module();
        let out = vm.exec_code(2, &[]).unwrap();
        assert_eq!(out, Some(Value::I32(42)));
    }

    #[test]
    fn add_function_returns_46() {
        let (mut vm, _) = add_module();
        let out = vm.exec_code(3, &[40, 6]).unwrap();
        assert_eq!(out, Some(Value::I32(46)));
    }

    #[test]
    fn void_function_prints_through_host() {
        let (mut vm, printed) = add_module();
        let out = vm.exec_code(4, &[42, 42]).unwrap();
        assert_eq!(out, None);
        assert_eq!(*printed.lock().unwrap(), vec!["result = 84".to_string()]);
    }

    #[test]
    fn exec_validates_index_arity_and_kind() {
        let (mut vm, _) = add_module();
        assert!(matches!(
            vm.exec_code(99, &[]),
            Err(VmError::InvalidFunctionIndex(99))
        ));
        assert!(matches!(
            vm.exec_code(-1, &[]),
            Err(VmError::InvalidFunctionIndex(-1))
        ));
        assert!(matches!(
            vm.exec_code(3, &[1]),
            Err(VmError::InvalidArgumentCount {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            vm.exec_code(0, &[1]),
            Err(VmError::NotCompiledFunction(0))
        ));
    }

    #[test]
    fn loop_accumulates_sum() {
        let wat_src = r#"
            (module
              (func (export "sum") (param i32) (result i32)
                (local i32 i32)
                block
                  loop
                    local.get 1
                    local.get 0
                    i32.ge_u
                    br_if 1
                    local.get 1
                    i32.const 1
                    i32.add
                    local.tee 1
                    local.get 2
                    i32.add
                    local.set 2
                    br 0
                  end
                end
                local.get 2))
        "#;
        assert_eq!(exec(wat_src, "sum", &[10]).unwrap(), Some(Value::I32(55)));
        assert_eq!(exec(wat_src, "sum", &[0]).unwrap(), Some(Value::I32(0)));
    }

    #[test]
    fn if_else_selects_arm() {
        let wat_src = r#"
            (module
              (func (export "pick") (param i32) (result i32)
                local.get 0
                if (result i32)
                  i32.const 7
                else
                  i32.const 9
                end))
        "#;
        assert_eq!(exec(wat_src, "pick", &[1]).unwrap(), Some(Value::I32(7)));
        assert_eq!(exec(wat_src, "pick", &[0]).unwrap(), Some(Value::I32(9)));
    }

    #[test]
    fn conditional_branch_preserves_block_result() {
        let wat_src = r#"
            (module
              (func (export "early") (param i32) (result i32)
                block (result i32)
                  i32.const 1
                  local.get 0
                  br_if 0
                  drop
                  i32.const 2
                end))
        "#;
        assert_eq!(exec(wat_src, "early", &[1]).unwrap(), Some(Value::I32(1)));
        assert_eq!(exec(wat_src, "early", &[0]).unwrap(), Some(Value::I32(2)));
    }

    #[test]
    fn branch_table_routes_labels() {
        let wat_src = r#"
            (module
              (func (export "route") (param i32) (result i32)
                block
                  block
                    block
                      local.get 0
                      br_table 0 1 2
                    end
                    i32.const 10
                    return
                  end
                  i32.const 20
                  return
                end
                i32.const 30))
        "#;
        assert_eq!(exec(wat_src, "route", &[0]).unwrap(), Some(Value::I32(10)));
        assert_eq!(exec(wat_src, "route", &[1]).unwrap(), Some(Value::I32(20)));
        assert_eq!(exec(wat_src, "route", &[2]).unwrap(), Some(Value::I32(30)));
        assert_eq!(exec(wat_src, "route", &[9]).unwrap(), Some(Value::I32(30)));
    }

    #[test]
    fn branch_table_to_function_label_returns() {
        let wat_src = r#"
            (module
              (func (export "route") (param i32) (result i32)
                i32.const 99
                block
                  local.get 0
                  br_table 0 1
                end
                drop
                i32.const 1))
        "#;
        assert_eq!(exec(wat_src, "route", &[1]).unwrap(), Some(Value::I32(99)));
        assert_eq!(exec(wat_src, "route", &[0]).unwrap(), Some(Value::I32(1)));
    }

    #[test]
    fn calls_swap_and_restore_the_frame() {
        let wat_src = r#"
            (module
              (func $double (param i32) (result i32)
                local.get 0
                i32.const 2
                i32.mul)
              (func (export "entry") (param i32) (result i32)
                local.get 0
                call $double
                i32.const 1
                i32.add))
        "#;
        assert_eq!(exec(wat_src, "entry", &[20]).unwrap(), Some(Value::I32(41)));
    }

    #[test]
    fn indirect_calls_check_table_and_signature() {
        let wat_src = r#"
            (module
              (type $binop (func (param i32 i32) (result i32)))
              (table 2 funcref)
              (elem (i32.const 0) $add $sub)
              (func $add (type $binop)
                local.get 0
                local.get 1
                i32.add)
              (func $sub (type $binop)
                local.get 0
                local.get 1
                i32.sub)
              (func (export "dispatch") (param i32 i32 i32) (result i32)
                local.get 1
                local.get 2
                local.get 0
                call_indirect (type $binop)))
        "#;
        assert_eq!(
            exec(wat_src, "dispatch", &[0, 7, 3]).unwrap(),
            Some(Value::I32(10))
        );
        assert_eq!(
            exec(wat_src, "dispatch", &[1, 7, 3]).unwrap(),
            Some(Value::I32(4))
        );
        assert!(matches!(
            exec(wat_src, "dispatch", &[5, 7, 3]),
            Err(VmError::UndefinedElement(5))
        ));
    }

    #[test]
    fn data_segment_is_copied_and_recorded() {
        let vm = instantiate(r#"(module (memory 1) (data (i32.const 0) "hello"))"#);
        assert_eq!(vm.memory().get_memory(0).unwrap(), b"hello");
        // The bump heap starts midway between the data end and the top.
        assert_eq!(vm.memory().alloced_index(), 5);
        assert_eq!(vm.memory().pointed_index(), (65536 + 5) / 2);
    }

    #[test]
    fn nul_separated_data_splits_into_string_regions() {
        let vm = instantiate(r#"(module (memory 1) (data (i32.const 0) "init\00ok"))"#);
        let first = vm.memory().region_info(0).unwrap();
        assert_eq!(first.length, 5);
        let second = vm.memory().region_info(5).unwrap();
        assert_eq!(second.length, 3);
        assert_eq!(vm.memory().range(0, 4).unwrap(), b"init");
        assert_eq!(vm.memory().range(5, 2).unwrap(), b"ok");
    }

    #[test]
    fn loads_and_stores_round_trip() {
        let wat_src = r#"
            (module
              (memory 1)
              (func (export "rw") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.store offset=4
                local.get 0
                i32.load offset=4))
        "#;
        assert_eq!(
            exec(wat_src, "rw", &[100, 0xdead_beef]).unwrap(),
            Some(Value::I32(0xdead_beefu32 as i32))
        );
    }

    #[test]
    fn narrow_loads_extend_correctly() {
        let wat_src = r#"
            (module
              (memory 1)
              (func (export "s8") (param i32) (result i32)
                i32.const 0
                local.get 0
                i32.store8
                i32.const 0
                i32.load8_s)
              (func (export "u8") (param i32) (result i32)
                i32.const 0
                local.get 0
                i32.store8
                i32.const 0
                i32.load8_u))
        "#;
        assert_eq!(exec(wat_src, "s8", &[0xff]).unwrap(), Some(Value::I32(-1)));
        assert_eq!(exec(wat_src, "u8", &[0xff]).unwrap(), Some(Value::I32(255)));
    }

    #[test]
    fn out_of_bounds_access_traps() {
        let wat_src = r#"
            (module
              (memory 1)
              (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load))
        "#;
        assert!(matches!(
            exec(wat_src, "peek", &[65536]),
            Err(VmError::OutOfBoundsMemory { .. })
        ));
    }

    #[test]
    fn globals_persist_and_reset_on_restart() {
        let wat_src = r#"
            (module
              (global $g (mut i32) (i32.const 5))
              (func (export "bump") (param i32) (result i32)
                global.get $g
                local.get 0
                i32.add
                global.set $g
                global.get $g))
        "#;
        let mut vm = instantiate(wat_src);
        let bump = vm.module().export_func("bump").unwrap() as i64;
        assert_eq!(vm.exec_code(bump, &[3]).unwrap(), Some(Value::I32(8)));
        assert_eq!(vm.exec_code(bump, &[2]).unwrap(), Some(Value::I32(10)));
        vm.restart().unwrap();
        assert_eq!(vm.exec_code(bump, &[1]).unwrap(), Some(Value::I32(6)));
    }

    #[test]
    fn start_function_runs_at_instantiation() {
        let wat_src = r#"
            (module
              (global $g (mut i32) (i32.const 0))
              (func $init
                i32.const 41
                global.set $g)
              (start $init)
              (func (export "get") (result i32)
                global.get $g))
        "#;
        assert_eq!(exec(wat_src, "get", &[]).unwrap(), Some(Value::I32(41)));
    }

    #[test]
    fn unreachable_traps() {
        let wat_src = r#"(module (func (export "boom") unreachable))"#;
        assert!(matches!(
            exec(wat_src, "boom", &[]),
            Err(VmError::Unreachable)
        ));
    }

    #[test]
    fn memory_grow_respects_declared_maximum() {
        let wat_src = r#"
            (module
              (memory 1 3)
              (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow)
              (func (export "size") (result i32)
                memory.size))
        "#;
        let mut vm = instantiate(wat_src);
        let grow = vm.module().export_func("grow").unwrap() as i64;
        let size = vm.module().export_func("size").unwrap() as i64;
        assert_eq!(vm.exec_code(grow, &[1]).unwrap(), Some(Value::I32(1)));
        assert_eq!(vm.exec_code(size, &[]).unwrap(), Some(Value::I32(2)));
        assert_eq!(vm.exec_code(grow, &[5]).unwrap(), Some(Value::I32(-1)));
        assert_eq!(vm.exec_code(size, &[]).unwrap(), Some(Value::I32(2)));
    }

    #[test]
    fn host_terminate_stops_the_loop() {
        let mut registry = HostRegistry::env();
        registry.register("halt", &[], None, |proc, _| {
            proc.terminate();
            Ok(None)
        });
        let wat_src = r#"
            (module
              (import "env" "halt" (func $halt))
              (func (export "spin")
                loop
                  call $halt
                  br 0
                end))
        "#;
        let mut vm = instantiate_with(wat_src, &registry);
        let spin = vm.module().export_func("spin").unwrap() as i64;
        // Without the abort latch this would never return.
        assert_eq!(vm.exec_code(spin, &[]).unwrap(), None);
    }

    #[test]
    fn select_picks_by_condition() {
        let wat_src = r#"
            (module
              (func (export "sel") (param i32) (result i32)
                i32.const 11
                i32.const 22
                local.get 0
                select))
        "#;
        assert_eq!(exec(wat_src, "sel", &[1]).unwrap(), Some(Value::I32(11)));
        assert_eq!(exec(wat_src, "sel", &[0]).unwrap(), Some(Value::I32(22)));
    }

    #[test]
    fn rejects_modules_with_multiple_memories() {
        let bytes =
            wat::parse_str(r#"(module (memory 1) (memory 1))"#).expect("fixture must assemble");
        // Multi-memory must be enabled for the text format to accept it.
        if let Ok(module) = Module::decode(&bytes, &HostRegistry::env()) {
            assert!(matches!(
                Interpreter::new(module),
                Err(VmError::MultipleLinearMemories)
            ));
        }
    }

    #[test]
    fn missing_import_is_rejected_at_decode() {
        let bytes = wat::parse_str(
            r#"(module (import "env" "no_such_fn" (func (param i32))))"#,
        )
        .expect("fixture must assemble");
        assert!(matches!(
            Module::decode(&bytes, &HostRegistry::env()),
            Err(VmError::UnknownImport { .. })
        ));
    }
}
