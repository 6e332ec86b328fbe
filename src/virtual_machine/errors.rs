use wasmvm_derive::Error;

/// Errors that can occur while decoding, compiling, or executing a
/// contract module.
///
/// Validation and resource errors are returned to the driver caller
/// before or during setup; the trap variants surface from the decode loop
/// while bytecode is running. Host functions never raise errors into the
/// contract: they signal failure through sentinel return values.
#[derive(Debug, Error)]
pub enum VmError {
    /// Module declares more than one linear memory.
    #[error("more than one linear memory in module")]
    MultipleLinearMemories,
    /// Argument count does not match the function signature.
    #[error("invalid number of arguments to function: expected {expected}, got {actual}")]
    InvalidArgumentCount { expected: usize, actual: usize },
    /// Function index outside the module's function index space.
    #[error("invalid index into function index space: {0}")]
    InvalidFunctionIndex(i64),
    /// Entry function resolves to a host function, not contract code.
    #[error("function at index {0} is not a compiled function")]
    NotCompiledFunction(i64),
    /// Declared return type cannot be represented at the host boundary.
    #[error("function has invalid return value type: {0}")]
    InvalidReturnType(String),
    /// Contract does not export the required entry function.
    #[error("entry method `{0}` not found in contract exports")]
    EntryPointNotFound(String),
    /// Caller balance cannot cover the transferred value.
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    /// Derived contract address is already occupied.
    #[error("contract address collision")]
    ContractAddressCollision,
    /// Deployed code exceeds the configured limit.
    #[error("code size {size} exceeds the contract limit {limit}")]
    CodeSizeExceedsLimit { size: usize, limit: usize },
    /// Call input is not a JSON array of strings.
    #[error("invalid call input: {0}")]
    InvalidInput(String),
    /// Module bytes failed to decode.
    #[error("failed to decode module: {0}")]
    Decode(String),
    /// Import cannot be resolved against the host registry.
    #[error("unknown import {module}.{name}")]
    UnknownImport { module: String, name: String },
    /// Value type outside the executable i32/i64/f32/f64 set.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),
    /// Instruction outside the compiled opcode set.
    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(String),
    /// Data segment targets a memory other than memory 0.
    #[error("invalid data segment index {0}")]
    InvalidDataIndex(u32),
    /// Offset or global initializer is not a supported constant expression.
    #[error("invalid init expression")]
    InvalidInitExpr,

    /// Memory access outside the linear memory bounds.
    #[error("memory access out of bounds: offset {offset}, len {len}, memory size {size}")]
    OutOfBoundsMemory { offset: u64, len: usize, size: usize },
    /// Bump allocation would exceed the linear memory.
    #[error("allocation of {size} bytes exhausts linear memory")]
    OutOfMemory { size: usize },
    /// No allocation is recorded at the offset.
    #[error("no allocation recorded at offset {0}")]
    UnknownPointer(u64),
    /// Read clipped at the memory boundary.
    #[error("short read: copied {copied} of {requested} bytes")]
    ShortBuffer { copied: usize, requested: usize },
    /// Write clipped at the memory boundary.
    #[error("short write: copied {copied} of {requested} bytes")]
    ShortWrite { copied: usize, requested: usize },

    /// Integer division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,
    /// Signed division overflow (MIN / -1) or value outside the target
    /// range of a float-to-integer truncation.
    #[error("integer overflow")]
    IntegerOverflow,
    /// Float-to-integer truncation of a NaN.
    #[error("invalid conversion to integer")]
    InvalidConversionToInt,
    /// Operand stack grew past the function's declared depth.
    #[error("operand stack exceeds max depth {0}")]
    StackOverflow(usize),
    /// Operand stack was popped while empty.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// The `unreachable` instruction was executed.
    #[error("unreachable instruction executed")]
    Unreachable,
    /// Indirect call signature does not match the table entry.
    #[error("indirect call type mismatch")]
    IndirectCallMismatch,
    /// Indirect call through a table slot that holds no function.
    #[error("undefined table element {0}")]
    UndefinedElement(u32),
    /// Bytecode ended in the middle of an instruction.
    #[error("unexpected end of bytecode at pc {0}")]
    UnexpectedEndOfBytecode(usize),
    /// Local index outside the function's local vector.
    #[error("local index {0} out of bounds")]
    InvalidLocalIndex(u32),
    /// Global index outside the module's global vector.
    #[error("global index {0} out of bounds")]
    InvalidGlobalIndex(u32),
    /// Branch table id outside the function's table list.
    #[error("invalid branch table index {0}")]
    InvalidBranchTable(i64),
    /// Host function needs chain state but none is attached.
    #[error("no chain context attached to interpreter")]
    NoChainContext,
}
