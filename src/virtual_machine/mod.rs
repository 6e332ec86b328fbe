//! WebAssembly contract execution engine.
//!
//! The engine interprets flat bytecode produced by [`compiler`] from a
//! decoded [`module::Module`]. Each contract invocation constructs one
//! [`interpreter::Interpreter`] instance owning a [`memory::LinearMemory`]
//! and runs a single exported entry point; the [`vm::Vm`] driver wires
//! instances to chain state and handles value transfer and deployment.
//!
//! # Modules
//!
//! - [`vm`]: contract drivers (`create`/`call`) and chain context
//! - [`interpreter`]: instance construction and the decode loop
//! - [`compiler`]: structured control flow to flat bytecode
//! - [`module`]: decoded module model and import resolution
//! - [`memory`]: paired-region linear memory with allocation metadata
//! - [`host`]: host-function bridge and the `env` chain bindings

pub mod compiler;
pub mod errors;
pub mod host;
pub mod interpreter;
pub mod memory;
pub mod module;
mod num;
pub(crate) mod opcodes;
pub mod value;
pub mod vm;

/// Size of one Wasm linear-memory page in bytes (64 KiB).
pub const WASM_PAGE_SIZE: usize = 65536;
