//! WebAssembly smart-contract execution engine.
//!
//! Provides a bytecode interpreter for Wasm contracts, the linear-memory
//! manager and host-function bridge they run against, and the contract
//! drivers (`create`/`call`) that wire an instance to chain state.

pub mod crypto;
pub mod storage;
pub mod types;
pub mod utils;
pub mod virtual_machine;
