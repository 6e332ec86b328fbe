//! Compiles structured function bodies into flat bytecode.
//!
//! Structured control flow (`block`/`loop`/`if`/`br`/`br_if`/`br_table`)
//! is resolved here, once, into absolute jumps: forward targets are
//! emitted as 8-byte placeholders and patched when the enclosing block
//! ends, loop targets are known immediately. Branches that unwind operand
//! values emit explicit discard opcodes (or carry discard counts in their
//! immediates, for the conditional forms), so the interpreter never has to
//! re-analyse block structure at runtime.
//!
//! The compiler also simulates operand-stack depth to produce the
//! `max_depth` bound the interpreter pre-sizes its stack with, and counts
//! declared locals into `total_local_vars`.
//!
//! Immediate encoding is fixed-width little-endian: jump targets and
//! discard counts are `i64`, indices and memory offsets `u32`, constants
//! the width of their type.

use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::module::FuncSig;
use crate::virtual_machine::opcodes as op;
use wasmparser::{BlockType, FunctionBody, Operator};

/// One resolved target of a branch table.
#[derive(Clone, Copy, Debug)]
pub struct BranchTarget {
    pub addr: i64,
    pub discard: i64,
    pub preserve_top: bool,
    /// Branch leaves the function instead of jumping.
    pub is_return: bool,
}

/// A precomputed multi-way branch: one entry per label plus a default.
#[derive(Clone, Debug)]
pub struct BranchTable {
    pub targets: Vec<BranchTarget>,
    pub default_target: BranchTarget,
}

/// A contract function lowered to flat bytecode, with the metadata the
/// interpreter needs to run it.
#[derive(Debug)]
pub struct CompiledFunction {
    pub code: Vec<u8>,
    pub branch_tables: Vec<BranchTable>,
    /// Upper bound of the operand-stack depth while this function runs.
    pub max_depth: usize,
    /// Parameters plus declared locals.
    pub total_local_vars: usize,
    /// Parameter count; locals `[0, args)` hold the call arguments.
    pub args: usize,
    /// True when the signature declares a result.
    pub returns: bool,
    pub sig_index: u32,
}

impl CompiledFunction {
    /// Placeholder for an interpreter frame that is not running anything.
    pub(crate) fn idle() -> Self {
        CompiledFunction {
            code: Vec::new(),
            branch_tables: Vec::new(),
            max_depth: 0,
            total_local_vars: 0,
            args: 0,
            returns: false,
            sig_index: 0,
        }
    }
}

/// Signature lookups the compiler needs for call and block typing.
pub(crate) struct SigContext<'m> {
    pub types: &'m [FuncSig],
    /// Type index of every entry in the function index space.
    pub func_sigs: &'m [u32],
}

impl SigContext<'_> {
    fn type_sig(&self, type_index: u32) -> Result<&FuncSig, VmError> {
        self.types
            .get(type_index as usize)
            .ok_or_else(|| VmError::Decode(format!("type index {} out of range", type_index)))
    }

    fn func_sig(&self, func_index: u32) -> Result<&FuncSig, VmError> {
        let type_index = self
            .func_sigs
            .get(func_index as usize)
            .ok_or(VmError::InvalidFunctionIndex(func_index as i64))?;
        self.type_sig(*type_index)
    }
}

/// Compiles one function body.
pub(crate) fn compile(
    body: &FunctionBody<'_>,
    sig_index: u32,
    ctx: &SigContext<'_>,
) -> Result<CompiledFunction, VmError> {
    let sig = ctx.type_sig(sig_index)?;
    let args = sig.params.len();
    let returns = !sig.results.is_empty();

    let mut total_local_vars = args;
    let locals = body
        .get_locals_reader()
        .map_err(|e| VmError::Decode(e.to_string()))?;
    for local in locals {
        let (count, _) = local.map_err(|e| VmError::Decode(e.to_string()))?;
        total_local_vars += count as usize;
    }

    let mut asm = Assembler::new(ctx, if returns { 1 } else { 0 });
    let operators = body
        .get_operators_reader()
        .map_err(|e| VmError::Decode(e.to_string()))?;
    for operator in operators {
        asm.op(operator.map_err(|e| VmError::Decode(e.to_string()))?)?;
    }
    let (code, branch_tables, max_depth) = asm.finish()?;

    Ok(CompiledFunction {
        code,
        branch_tables,
        max_depth,
        total_local_vars,
        args,
        returns,
        sig_index,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Block,
    Loop,
    If,
}

/// One entry of the compile-time control stack.
struct ControlFrame {
    kind: FrameKind,
    /// Operand-stack depth on block entry.
    entry_depth: usize,
    /// Result count of the block (0 or 1).
    results: usize,
    /// Jump target for loop branches.
    start_addr: usize,
    /// Positions of 8-byte address immediates patched at block end.
    jump_patches: Vec<usize>,
    /// Branch-table entries patched at block end: `(table, entry)` where
    /// `None` is the default target.
    table_patches: Vec<(usize, Option<usize>)>,
    /// Position of the `if` false-edge address, patched at else/end.
    else_patch: Option<usize>,
}

impl ControlFrame {
    fn new(kind: FrameKind, entry_depth: usize, results: usize) -> Self {
        ControlFrame {
            kind,
            entry_depth,
            results,
            start_addr: 0,
            jump_patches: Vec::new(),
            table_patches: Vec::new(),
            else_patch: None,
        }
    }

    /// Arity of a branch to this frame's label: loops branch to their
    /// start and carry nothing, other blocks carry their result.
    fn label_arity(&self) -> usize {
        if self.kind == FrameKind::Loop {
            0
        } else {
            self.results
        }
    }
}

struct Assembler<'m> {
    ctx: &'m SigContext<'m>,
    code: Vec<u8>,
    tables: Vec<BranchTable>,
    frames: Vec<ControlFrame>,
    depth: usize,
    max_depth: usize,
    /// Nesting counter while skipping statically unreachable code, set
    /// after `br`, `br_table`, `return`, and `unreachable`.
    dead: Option<u32>,
}

impl<'m> Assembler<'m> {
    fn new(ctx: &'m SigContext<'m>, func_results: usize) -> Self {
        Assembler {
            ctx,
            code: Vec::new(),
            tables: Vec::new(),
            frames: vec![ControlFrame::new(FrameKind::Block, 0, func_results)],
            depth: 0,
            max_depth: 0,
            dead: None,
        }
    }

    fn op(&mut self, operator: Operator<'_>) -> Result<(), VmError> {
        if let Some(nesting) = self.dead {
            match operator {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                    self.dead = Some(nesting + 1);
                }
                Operator::Else if nesting == 0 => {
                    self.dead = None;
                    self.else_branch(false)?;
                }
                Operator::End => {
                    if nesting == 0 {
                        self.dead = None;
                        self.end_block()?;
                    } else {
                        self.dead = Some(nesting - 1);
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match operator {
            Operator::Unreachable => {
                self.emit(op::UNREACHABLE);
                self.dead = Some(0);
            }
            Operator::Nop => {}
            Operator::Block { blockty } => {
                let results = self.block_results(blockty)?;
                self.frames
                    .push(ControlFrame::new(FrameKind::Block, self.depth, results));
            }
            Operator::Loop { blockty } => {
                let results = self.block_results(blockty)?;
                let mut frame = ControlFrame::new(FrameKind::Loop, self.depth, results);
                frame.start_addr = self.code.len();
                self.frames.push(frame);
            }
            Operator::If { blockty } => {
                let results = self.block_results(blockty)?;
                self.pop_operands(1)?;
                self.emit(op::JMP_Z);
                let patch = self.emit_addr_placeholder();
                let mut frame = ControlFrame::new(FrameKind::If, self.depth, results);
                frame.else_patch = Some(patch);
                self.frames.push(frame);
            }
            Operator::Else => self.else_branch(true)?,
            Operator::End => self.end_block()?,
            Operator::Br { relative_depth } => {
                self.branch(relative_depth)?;
                self.dead = Some(0);
            }
            Operator::BrIf { relative_depth } => self.branch_if(relative_depth)?,
            Operator::BrTable { targets } => {
                self.branch_table(&targets)?;
                self.dead = Some(0);
            }
            Operator::Return => {
                self.emit(op::RETURN);
                self.dead = Some(0);
            }
            Operator::Call { function_index } => {
                let sig = self.ctx.func_sig(function_index)?;
                let (params, results) = (sig.params.len(), sig.results.len());
                self.emit(op::CALL);
                self.emit_u32(function_index);
                self.pop_operands(params)?;
                self.push_operands(results);
            }
            Operator::CallIndirect { type_index, .. } => {
                let sig = self.ctx.type_sig(type_index)?;
                let (params, results) = (sig.params.len(), sig.results.len());
                self.emit(op::CALL_INDIRECT);
                self.emit_u32(type_index);
                self.pop_operands(params + 1)?;
                self.push_operands(results);
            }
            Operator::Drop => {
                self.emit(op::DISCARD);
                self.emit_i64(1);
                self.pop_operands(1)?;
            }
            Operator::Select => {
                self.emit(op::SELECT);
                self.pop_operands(3)?;
                self.push_operands(1);
            }
            Operator::LocalGet { local_index } => {
                self.emit(op::LOCAL_GET);
                self.emit_u32(local_index);
                self.push_operands(1);
            }
            Operator::LocalSet { local_index } => {
                self.emit(op::LOCAL_SET);
                self.emit_u32(local_index);
                self.pop_operands(1)?;
            }
            Operator::LocalTee { local_index } => {
                self.emit(op::LOCAL_TEE);
                self.emit_u32(local_index);
            }
            Operator::GlobalGet { global_index } => {
                self.emit(op::GLOBAL_GET);
                self.emit_u32(global_index);
                self.push_operands(1);
            }
            Operator::GlobalSet { global_index } => {
                self.emit(op::GLOBAL_SET);
                self.emit_u32(global_index);
                self.pop_operands(1)?;
            }
            Operator::MemorySize { .. } => {
                self.emit(op::MEMORY_SIZE);
                self.push_operands(1);
            }
            Operator::MemoryGrow { .. } => {
                self.emit(op::MEMORY_GROW);
            }
            Operator::I32Const { value } => {
                self.emit(op::I32_CONST);
                self.emit_u32(value as u32);
                self.push_operands(1);
            }
            Operator::I64Const { value } => {
                self.emit(op::I64_CONST);
                self.emit_i64(value);
                self.push_operands(1);
            }
            Operator::F32Const { value } => {
                self.emit(op::F32_CONST);
                self.emit_u32(value.bits());
                self.push_operands(1);
            }
            Operator::F64Const { value } => {
                self.emit(op::F64_CONST);
                self.emit_i64(value.bits() as i64);
                self.push_operands(1);
            }
            ref operator => {
                if let Some((byte, memarg)) = load_opcode(operator) {
                    self.memory_access(byte, memarg)?;
                } else if let Some((byte, memarg)) = store_opcode(operator) {
                    self.memory_access(byte, memarg)?;
                    self.pop_operands(2)?;
                } else if let Some((byte, operands)) = numeric_opcode(operator) {
                    self.emit(byte);
                    self.pop_operands(operands)?;
                    self.push_operands(1);
                } else {
                    return Err(VmError::UnsupportedInstruction(format!("{:?}", operator)));
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(Vec<u8>, Vec<BranchTable>, usize), VmError> {
        if !self.frames.is_empty() {
            return Err(VmError::Decode("unbalanced block structure".to_string()));
        }
        Ok((self.code, self.tables, self.max_depth))
    }

    /// Handles `else`, terminating the then-arm with a jump to the block
    /// end (skipped when the then-arm cannot fall through) and pointing
    /// the false edge of the `if` here.
    fn else_branch(&mut self, then_falls_through: bool) -> Result<(), VmError> {
        if then_falls_through {
            self.emit(op::JMP);
            let patch = self.emit_addr_placeholder();
            let frame = self.top_frame()?;
            frame.jump_patches.push(patch);
        }
        let else_start = self.code.len();
        let frame = self.top_frame()?;
        if frame.kind != FrameKind::If {
            return Err(VmError::Decode("else outside of if".to_string()));
        }
        match frame.else_patch.take() {
            Some(pos) => self.patch_addr(pos, else_start),
            None => return Err(VmError::Decode("duplicate else".to_string())),
        }
        let entry = self.frame_at(0)?.entry_depth;
        self.depth = entry;
        Ok(())
    }

    /// Handles `end`: patches every branch that targeted this block and
    /// restores the operand depth the surrounding code continues with.
    fn end_block(&mut self) -> Result<(), VmError> {
        let end_addr = self.code.len();
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::Decode("unbalanced end".to_string()))?;
        if let Some(pos) = frame.else_patch {
            // If without else: the false edge falls through to the end.
            self.patch_addr(pos, end_addr);
        }
        for pos in frame.jump_patches {
            self.patch_addr(pos, end_addr);
        }
        for (table, entry) in frame.table_patches {
            let target = match entry {
                Some(i) => &mut self.tables[table].targets[i],
                None => &mut self.tables[table].default_target,
            };
            target.addr = end_addr as i64;
        }
        self.depth = frame.entry_depth + frame.results;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(())
    }

    /// Emits an unconditional branch: explicit discards followed by a jump.
    fn branch(&mut self, relative_depth: u32) -> Result<(), VmError> {
        let (kind, entry_depth, keep, start_addr) = {
            let frame = self.frame_at(relative_depth)?;
            (
                frame.kind,
                frame.entry_depth,
                frame.label_arity(),
                frame.start_addr,
            )
        };
        let discard = self.discard_count(entry_depth)?;
        if keep == 1 {
            if discard > 1 {
                self.emit(op::DISCARD_PRESERVE_TOP);
                self.emit_i64(discard as i64);
            }
        } else if discard > 0 {
            self.emit(op::DISCARD);
            self.emit_i64(discard as i64);
        }
        self.emit(op::JMP);
        if kind == FrameKind::Loop {
            self.emit_i64(start_addr as i64);
        } else {
            let patch = self.emit_addr_placeholder();
            self.frame_at(relative_depth)?.jump_patches.push(patch);
        }
        Ok(())
    }

    /// Emits a conditional branch; the discard count and preserved top
    /// ride in the immediates because the fall-through path keeps the
    /// stack untouched.
    fn branch_if(&mut self, relative_depth: u32) -> Result<(), VmError> {
        self.pop_operands(1)?;
        let (kind, entry_depth, keep, start_addr) = {
            let frame = self.frame_at(relative_depth)?;
            (
                frame.kind,
                frame.entry_depth,
                frame.label_arity(),
                frame.start_addr,
            )
        };
        let discard = self.discard_count(entry_depth)?;
        self.emit(op::JMP_NZ);
        let patch = if kind == FrameKind::Loop {
            self.emit_i64(start_addr as i64);
            None
        } else {
            Some(self.emit_addr_placeholder())
        };
        self.emit(if keep == 1 { 1 } else { 0 });
        self.emit_i64(discard as i64);
        if let Some(patch) = patch {
            self.frame_at(relative_depth)?.jump_patches.push(patch);
        }
        Ok(())
    }

    /// Lowers `br_table` into a precomputed table of resolved targets.
    fn branch_table(&mut self, targets: &wasmparser::BrTable<'_>) -> Result<(), VmError> {
        self.pop_operands(1)?;
        let table_index = self.tables.len();
        self.tables.push(BranchTable {
            targets: Vec::with_capacity(targets.len() as usize),
            default_target: BranchTarget {
                addr: 0,
                discard: 0,
                preserve_top: false,
                is_return: false,
            },
        });
        for (entry, relative_depth) in targets.targets().enumerate() {
            let relative_depth = relative_depth.map_err(|e| VmError::Decode(e.to_string()))?;
            let target = self.table_target(relative_depth, table_index, Some(entry))?;
            self.tables[table_index].targets.push(target);
        }
        let default = self.table_target(targets.default(), table_index, None)?;
        self.tables[table_index].default_target = default;
        self.emit(op::BR_TABLE);
        self.emit_i64(table_index as i64);
        Ok(())
    }

    /// Resolves one branch-table entry, registering a patch when the
    /// target address is not yet known.
    fn table_target(
        &mut self,
        relative_depth: u32,
        table: usize,
        entry: Option<usize>,
    ) -> Result<BranchTarget, VmError> {
        let is_function_frame = relative_depth as usize == self.frames.len() - 1;
        let (kind, entry_depth, keep, start_addr) = {
            let frame = self.frame_at(relative_depth)?;
            (
                frame.kind,
                frame.entry_depth,
                frame.label_arity(),
                frame.start_addr,
            )
        };
        let discard = self.discard_count(entry_depth)?;
        let mut target = BranchTarget {
            addr: 0,
            discard: discard as i64,
            preserve_top: keep == 1,
            is_return: is_function_frame,
        };
        if is_function_frame {
            return Ok(target);
        }
        if kind == FrameKind::Loop {
            target.addr = start_addr as i64;
        } else {
            self.frame_at(relative_depth)?.table_patches.push((table, entry));
        }
        Ok(target)
    }

    fn memory_access(&mut self, byte: u8, memarg: &wasmparser::MemArg) -> Result<(), VmError> {
        if memarg.memory != 0 {
            return Err(VmError::Decode(
                "memory access targets a non-zero memory".to_string(),
            ));
        }
        let offset = u32::try_from(memarg.offset)
            .map_err(|_| VmError::Decode("memory offset exceeds 32 bits".to_string()))?;
        self.emit(byte);
        self.emit_u32(offset);
        Ok(())
    }

    fn block_results(&self, blockty: BlockType) -> Result<usize, VmError> {
        match blockty {
            BlockType::Empty => Ok(0),
            BlockType::Type(_) => Ok(1),
            BlockType::FuncType(type_index) => {
                let sig = self.ctx.type_sig(type_index)?;
                if !sig.params.is_empty() {
                    return Err(VmError::UnsupportedInstruction(
                        "block with parameters".to_string(),
                    ));
                }
                Ok(sig.results.len())
            }
        }
    }

    /// Words above the target block's entry depth, all removed by the
    /// branch (the preserved top, when any, is counted and re-pushed).
    fn discard_count(&self, entry_depth: usize) -> Result<usize, VmError> {
        self.depth
            .checked_sub(entry_depth)
            .ok_or_else(|| VmError::Decode("operand stack underflow in body".to_string()))
    }

    fn frame_at(&mut self, relative_depth: u32) -> Result<&mut ControlFrame, VmError> {
        let len = self.frames.len();
        let index = len
            .checked_sub(1 + relative_depth as usize)
            .ok_or_else(|| VmError::Decode(format!("branch depth {} invalid", relative_depth)))?;
        Ok(&mut self.frames[index])
    }

    fn top_frame(&mut self) -> Result<&mut ControlFrame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::Decode("unbalanced block structure".to_string()))
    }

    fn emit(&mut self, byte: u8) {
        self.code.push(byte);
    }

    fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_i64(&mut self, value: i64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emits an 8-byte address slot and returns its position for patching.
    fn emit_addr_placeholder(&mut self) -> usize {
        let pos = self.code.len();
        self.emit_i64(0);
        pos
    }

    fn patch_addr(&mut self, pos: usize, addr: usize) {
        self.code[pos..pos + 8].copy_from_slice(&(addr as i64).to_le_bytes());
    }

    fn push_operands(&mut self, count: usize) {
        self.depth += count;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop_operands(&mut self, count: usize) -> Result<(), VmError> {
        self.depth = self
            .depth
            .checked_sub(count)
            .ok_or_else(|| VmError::Decode("operand stack underflow in body".to_string()))?;
        Ok(())
    }
}

/// Loads: pop an address, push a value, carry an offset immediate.
fn load_opcode<'o, 'a>(operator: &'o Operator<'a>) -> Option<(u8, &'o wasmparser::MemArg)> {
    let (byte, memarg) = match operator {
        Operator::I32Load { memarg } => (op::I32_LOAD, memarg),
        Operator::I64Load { memarg } => (op::I64_LOAD, memarg),
        Operator::F32Load { memarg } => (op::F32_LOAD, memarg),
        Operator::F64Load { memarg } => (op::F64_LOAD, memarg),
        Operator::I32Load8S { memarg } => (op::I32_LOAD8_S, memarg),
        Operator::I32Load8U { memarg } => (op::I32_LOAD8_U, memarg),
        Operator::I32Load16S { memarg } => (op::I32_LOAD16_S, memarg),
        Operator::I32Load16U { memarg } => (op::I32_LOAD16_U, memarg),
        Operator::I64Load8S { memarg } => (op::I64_LOAD8_S, memarg),
        Operator::I64Load8U { memarg } => (op::I64_LOAD8_U, memarg),
        Operator::I64Load16S { memarg } => (op::I64_LOAD16_S, memarg),
        Operator::I64Load16U { memarg } => (op::I64_LOAD16_U, memarg),
        Operator::I64Load32S { memarg } => (op::I64_LOAD32_S, memarg),
        Operator::I64Load32U { memarg } => (op::I64_LOAD32_U, memarg),
        _ => return None,
    };
    Some((byte, memarg))
}

/// Stores: pop a value and an address, carry an offset immediate.
fn store_opcode<'o, 'a>(operator: &'o Operator<'a>) -> Option<(u8, &'o wasmparser::MemArg)> {
    let (byte, memarg) = match operator {
        Operator::I32Store { memarg } => (op::I32_STORE, memarg),
        Operator::I64Store { memarg } => (op::I64_STORE, memarg),
        Operator::F32Store { memarg } => (op::F32_STORE, memarg),
        Operator::F64Store { memarg } => (op::F64_STORE, memarg),
        Operator::I32Store8 { memarg } => (op::I32_STORE8, memarg),
        Operator::I32Store16 { memarg } => (op::I32_STORE16, memarg),
        Operator::I64Store8 { memarg } => (op::I64_STORE8, memarg),
        Operator::I64Store16 { memarg } => (op::I64_STORE16, memarg),
        Operator::I64Store32 { memarg } => (op::I64_STORE32, memarg),
        _ => return None,
    };
    Some((byte, memarg))
}

/// Numeric operators: `(opcode, operand count)`; every one pushes a
/// single result.
fn numeric_opcode(operator: &Operator<'_>) -> Option<(u8, usize)> {
    let entry = match operator {
        // i32 test and comparison.
        Operator::I32Eqz => (op::I32_EQZ, 1),
        Operator::I32Eq => (op::I32_EQ, 2),
        Operator::I32Ne => (op::I32_NE, 2),
        Operator::I32LtS => (op::I32_LT_S, 2),
        Operator::I32LtU => (op::I32_LT_U, 2),
        Operator::I32GtS => (op::I32_GT_S, 2),
        Operator::I32GtU => (op::I32_GT_U, 2),
        Operator::I32LeS => (op::I32_LE_S, 2),
        Operator::I32LeU => (op::I32_LE_U, 2),
        Operator::I32GeS => (op::I32_GE_S, 2),
        Operator::I32GeU => (op::I32_GE_U, 2),
        // i64 test and comparison.
        Operator::I64Eqz => (op::I64_EQZ, 1),
        Operator::I64Eq => (op::I64_EQ, 2),
        Operator::I64Ne => (op::I64_NE, 2),
        Operator::I64LtS => (op::I64_LT_S, 2),
        Operator::I64LtU => (op::I64_LT_U, 2),
        Operator::I64GtS => (op::I64_GT_S, 2),
        Operator::I64GtU => (op::I64_GT_U, 2),
        Operator::I64LeS => (op::I64_LE_S, 2),
        Operator::I64LeU => (op::I64_LE_U, 2),
        Operator::I64GeS => (op::I64_GE_S, 2),
        Operator::I64GeU => (op::I64_GE_U, 2),
        // f32 comparison.
        Operator::F32Eq => (op::F32_EQ, 2),
        Operator::F32Ne => (op::F32_NE, 2),
        Operator::F32Lt => (op::F32_LT, 2),
        Operator::F32Gt => (op::F32_GT, 2),
        Operator::F32Le => (op::F32_LE, 2),
        Operator::F32Ge => (op::F32_GE, 2),
        // f64 comparison.
        Operator::F64Eq => (op::F64_EQ, 2),
        Operator::F64Ne => (op::F64_NE, 2),
        Operator::F64Lt => (op::F64_LT, 2),
        Operator::F64Gt => (op::F64_GT, 2),
        Operator::F64Le => (op::F64_LE, 2),
        Operator::F64Ge => (op::F64_GE, 2),
        // i32 arithmetic.
        Operator::I32Clz => (op::I32_CLZ, 1),
        Operator::I32Ctz => (op::I32_CTZ, 1),
        Operator::I32Popcnt => (op::I32_POPCNT, 1),
        Operator::I32Add => (op::I32_ADD, 2),
        Operator::I32Sub => (op::I32_SUB, 2),
        Operator::I32Mul => (op::I32_MUL, 2),
        Operator::I32DivS => (op::I32_DIV_S, 2),
        Operator::I32DivU => (op::I32_DIV_U, 2),
        Operator::I32RemS => (op::I32_REM_S, 2),
        Operator::I32RemU => (op::I32_REM_U, 2),
        Operator::I32And => (op::I32_AND, 2),
        Operator::I32Or => (op::I32_OR, 2),
        Operator::I32Xor => (op::I32_XOR, 2),
        Operator::I32Shl => (op::I32_SHL, 2),
        Operator::I32ShrS => (op::I32_SHR_S, 2),
        Operator::I32ShrU => (op::I32_SHR_U, 2),
        Operator::I32Rotl => (op::I32_ROTL, 2),
        Operator::I32Rotr => (op::I32_ROTR, 2),
        // i64 arithmetic.
        Operator::I64Clz => (op::I64_CLZ, 1),
        Operator::I64Ctz => (op::I64_CTZ, 1),
        Operator::I64Popcnt => (op::I64_POPCNT, 1),
        Operator::I64Add => (op::I64_ADD, 2),
        Operator::I64Sub => (op::I64_SUB, 2),
        Operator::I64Mul => (op::I64_MUL, 2),
        Operator::I64DivS => (op::I64_DIV_S, 2),
        Operator::I64DivU => (op::I64_DIV_U, 2),
        Operator::I64RemS => (op::I64_REM_S, 2),
        Operator::I64RemU => (op::I64_REM_U, 2),
        Operator::I64And => (op::I64_AND, 2),
        Operator::I64Or => (op::I64_OR, 2),
        Operator::I64Xor => (op::I64_XOR, 2),
        Operator::I64Shl => (op::I64_SHL, 2),
        Operator::I64ShrS => (op::I64_SHR_S, 2),
        Operator::I64ShrU => (op::I64_SHR_U, 2),
        Operator::I64Rotl => (op::I64_ROTL, 2),
        Operator::I64Rotr => (op::I64_ROTR, 2),
        // f32 arithmetic.
        Operator::F32Abs => (op::F32_ABS, 1),
        Operator::F32Neg => (op::F32_NEG, 1),
        Operator::F32Ceil => (op::F32_CEIL, 1),
        Operator::F32Floor => (op::F32_FLOOR, 1),
        Operator::F32Trunc => (op::F32_TRUNC, 1),
        Operator::F32Nearest => (op::F32_NEAREST, 1),
        Operator::F32Sqrt => (op::F32_SQRT, 1),
        Operator::F32Add => (op::F32_ADD, 2),
        Operator::F32Sub => (op::F32_SUB, 2),
        Operator::F32Mul => (op::F32_MUL, 2),
        Operator::F32Div => (op::F32_DIV, 2),
        Operator::F32Min => (op::F32_MIN, 2),
        Operator::F32Max => (op::F32_MAX, 2),
        Operator::F32Copysign => (op::F32_COPYSIGN, 2),
        // f64 arithmetic.
        Operator::F64Abs => (op::F64_ABS, 1),
        Operator::F64Neg => (op::F64_NEG, 1),
        Operator::F64Ceil => (op::F64_CEIL, 1),
        Operator::F64Floor => (op::F64_FLOOR, 1),
        Operator::F64Trunc => (op::F64_TRUNC, 1),
        Operator::F64Nearest => (op::F64_NEAREST, 1),
        Operator::F64Sqrt => (op::F64_SQRT, 1),
        Operator::F64Add => (op::F64_ADD, 2),
        Operator::F64Sub => (op::F64_SUB, 2),
        Operator::F64Mul => (op::F64_MUL, 2),
        Operator::F64Div => (op::F64_DIV, 2),
        Operator::F64Min => (op::F64_MIN, 2),
        Operator::F64Max => (op::F64_MAX, 2),
        Operator::F64Copysign => (op::F64_COPYSIGN, 2),
        // Conversions.
        Operator::I32WrapI64 => (op::I32_WRAP_I64, 1),
        Operator::I32TruncF32S => (op::I32_TRUNC_F32_S, 1),
        Operator::I32TruncF32U => (op::I32_TRUNC_F32_U, 1),
        Operator::I32TruncF64S => (op::I32_TRUNC_F64_S, 1),
        Operator::I32TruncF64U => (op::I32_TRUNC_F64_U, 1),
        Operator::I64ExtendI32S => (op::I64_EXTEND_I32_S, 1),
        Operator::I64ExtendI32U => (op::I64_EXTEND_I32_U, 1),
        Operator::I64TruncF32S => (op::I64_TRUNC_F32_S, 1),
        Operator::I64TruncF32U => (op::I64_TRUNC_F32_U, 1),
        Operator::I64TruncF64S => (op::I64_TRUNC_F64_S, 1),
        Operator::I64TruncF64U => (op::I64_TRUNC_F64_U, 1),
        Operator::F32ConvertI32S => (op::F32_CONVERT_I32_S, 1),
        Operator::F32ConvertI32U => (op::F32_CONVERT_I32_U, 1),
        Operator::F32ConvertI64S => (op::F32_CONVERT_I64_S, 1),
        Operator::F32ConvertI64U => (op::F32_CONVERT_I64_U, 1),
        Operator::F32DemoteF64 => (op::F32_DEMOTE_F64, 1),
        Operator::F64ConvertI32S => (op::F64_CONVERT_I32_S, 1),
        Operator::F64ConvertI32U => (op::F64_CONVERT_I32_U, 1),
        Operator::F64ConvertI64S => (op::F64_CONVERT_I64_S, 1),
        Operator::F64ConvertI64U => (op::F64_CONVERT_I64_U, 1),
        Operator::F64PromoteF32 => (op::F64_PROMOTE_F32, 1),
        Operator::I32ReinterpretF32 => (op::I32_REINTERPRET_F32, 1),
        Operator::I64ReinterpretF64 => (op::I64_REINTERPRET_F64, 1),
        Operator::F32ReinterpretI32 => (op::F32_REINTERPRET_I32, 1),
        Operator::F64ReinterpretI64 => (op::F64_REINTERPRET_I64, 1),
        // Sign extension.
        Operator::I32Extend8S => (op::I32_EXTEND8_S, 1),
        Operator::I32Extend16S => (op::I32_EXTEND16_S, 1),
        Operator::I64Extend8S => (op::I64_EXTEND8_S, 1),
        Operator::I64Extend16S => (op::I64_EXTEND16_S, 1),
        Operator::I64Extend32S => (op::I64_EXTEND32_S, 1),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::CompiledFunction;
    use crate::virtual_machine::errors::VmError;
    use crate::virtual_machine::host::HostRegistry;
    use crate::virtual_machine::module::{FuncInstance, Module};
    use std::sync::Arc;

    fn compiled(wat_src: &str, index: usize) -> Arc<CompiledFunction> {
        let bytes = wat::parse_str(wat_src).expect("fixture must assemble");
        let module = Module::decode(&bytes, &HostRegistry::env()).expect("fixture must decode");
        match &module.functions[index] {
            FuncInstance::Compiled(compiled) => Arc::clone(compiled),
            FuncInstance::Host(_) => panic!("function {} is a host function", index),
        }
    }

    #[test]
    fn locals_count_params_and_declarations() {
        let func = compiled(
            r#"(module (func (param i32 i32) (local i64) (local f32 f32)))"#,
            0,
        );
        assert_eq!(func.args, 2);
        assert_eq!(func.total_local_vars, 5);
        assert!(!func.returns);
    }

    #[test]
    fn max_depth_bounds_the_operand_stack() {
        let func = compiled(
            r#"(module (func (result i32)
                 i32.const 1
                 i32.const 2
                 i32.const 3
                 i32.add
                 i32.add))"#,
            0,
        );
        assert_eq!(func.max_depth, 3);
        assert!(func.returns);
    }

    #[test]
    fn branch_tables_are_collected_per_function() {
        // The last label is the default target.
        let func = compiled(
            r#"(module (func (param i32)
                 block
                   block
                     local.get 0
                     br_table 0 1 1
                   end
                 end))"#,
            0,
        );
        assert_eq!(func.branch_tables.len(), 1);
        let table = &func.branch_tables[0];
        assert_eq!(table.targets.len(), 2);
        assert!(!table.targets[0].is_return);
        // Inner block ends before the outer one does.
        assert!(table.targets[0].addr < table.targets[1].addr);
        assert_eq!(table.default_target.addr, table.targets[1].addr);
    }

    #[test]
    fn branch_to_function_label_is_a_return_target() {
        let func = compiled(
            r#"(module (func (param i32) (result i32)
                 i32.const 5
                 block
                   local.get 0
                   br_table 0 1
                 end
                 drop
                 i32.const 6))"#,
            0,
        );
        let table = &func.branch_tables[0];
        assert!(!table.targets[0].is_return);
        assert!(table.default_target.is_return);
        assert!(table.default_target.preserve_top);
    }

    #[test]
    fn code_after_a_branch_is_not_emitted() {
        let with_dead = compiled(
            r#"(module (func (result i32)
                 block (result i32)
                   i32.const 1
                   br 0
                   i32.const 2
                   i32.add
                 end))"#,
            0,
        );
        let without_dead = compiled(
            r#"(module (func (result i32)
                 block (result i32)
                   i32.const 1
                   br 0
                 end))"#,
            0,
        );
        assert_eq!(with_dead.code, without_dead.code);
    }

    #[test]
    fn unsupported_instructions_are_rejected() {
        let bytes = wat::parse_str(
            r#"(module (memory 1) (func (param i32)
                 local.get 0
                 i32.const 0
                 i32.const 0
                 memory.fill))"#,
        )
        .expect("fixture must assemble");
        assert!(matches!(
            Module::decode(&bytes, &HostRegistry::env()),
            Err(VmError::UnsupportedInstruction(_))
        ));
    }
}
