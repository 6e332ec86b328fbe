//! Host-function bridge and the chain bindings contracts import.
//!
//! Host functions are registered with an explicit signature over the
//! closed i32/i64/f32/f64 set; the interpreter's bridge marshals operand
//! slots to typed values and back, so a shim only ever sees [`Value`]s.
//! The registry is built once and read-only afterwards.
//!
//! The `env` namespace carries the four bindings of the contract ABI:
//!
//! - `malloc(size: i32) -> i32`: bump allocation, 0 on failure
//! - `memcpy(dest, src, size: i32) -> i32`: copies `size` bytes and
//!   returns the lexicographic comparison of the two ranges taken
//!   *before* the copy (a `memcmp` fused in); contracts compiled for
//!   this runtime rely on that return value, so it is kept as is
//! - `set_state(key_off, key_len, val_off, val_len: i32)`: writes the
//!   storage slot `SHA-256(key)` under the origin address
//! - `get_state(key_off, key_len: i32) -> i32`: reads the slot, copies
//!   the value into a fresh allocation, returns its offset; -1 on error

use crate::types::hash::Hash;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::interpreter::Process;
use crate::virtual_machine::module::FuncSig;
use crate::virtual_machine::value::{Value, ValueType};
use std::cmp::Ordering;
use std::sync::Arc;

/// Shim invoked by the bridge with already-marshalled arguments.
pub type HostFn =
    Box<dyn Fn(&mut Process<'_, '_>, &[Value]) -> Result<Option<Value>, VmError> + Send + Sync>;

/// A native function living in the module's function index space.
///
/// Never compiled or disassembled; the interpreter calls through the
/// bridge instead.
pub struct HostFunction {
    pub name: String,
    pub sig: FuncSig,
    pub call: HostFn,
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("sig", &self.sig)
            .finish_non_exhaustive()
    }
}

/// Named host functions under one import namespace.
pub struct HostRegistry {
    namespace: String,
    funcs: Vec<Arc<HostFunction>>,
}

impl HostRegistry {
    /// Creates an empty registry for the given import namespace.
    pub fn new(namespace: &str) -> Self {
        HostRegistry {
            namespace: namespace.to_string(),
            funcs: Vec::new(),
        }
    }

    /// The import namespace this registry resolves.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registers a host function under `name` with an explicit signature.
    ///
    /// Parameter and result types are limited to the numeric set by
    /// construction; at most one result is representable.
    pub fn register(
        &mut self,
        name: &str,
        params: &[ValueType],
        result: Option<ValueType>,
        call: impl Fn(&mut Process<'_, '_>, &[Value]) -> Result<Option<Value>, VmError>
            + Send
            + Sync
            + 'static,
    ) {
        self.funcs.push(Arc::new(HostFunction {
            name: name.to_string(),
            sig: FuncSig {
                params: params.to_vec(),
                results: result.into_iter().collect(),
            },
            call: Box::new(call),
        }));
    }

    /// Looks up a registered function by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<HostFunction>> {
        self.funcs
            .iter()
            .find(|f| f.name == name)
            .map(Arc::clone)
    }

    /// The `env` namespace every contract links against.
    pub fn env() -> HostRegistry {
        let mut registry = HostRegistry::new("env");
        registry.register(
            "malloc",
            &[ValueType::I32],
            Some(ValueType::I32),
            malloc,
        );
        registry.register(
            "memcpy",
            &[ValueType::I32, ValueType::I32, ValueType::I32],
            Some(ValueType::I32),
            memcpy,
        );
        registry.register(
            "get_state",
            &[ValueType::I32, ValueType::I32],
            Some(ValueType::I32),
            get_state,
        );
        registry.register(
            "set_state",
            &[ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32],
            None,
            set_state,
        );
        registry
    }
}

fn arg_i32(args: &[Value], index: usize) -> Result<i32, VmError> {
    match args.get(index) {
        Some(Value::I32(v)) => Ok(*v),
        other => Err(VmError::UnsupportedValueType(format!(
            "host argument {}: {:?}",
            index, other
        ))),
    }
}

/// Allocates memory for base types; returns the offset, 0 on failure.
fn malloc(proc: &mut Process<'_, '_>, args: &[Value]) -> Result<Option<Value>, VmError> {
    let size = arg_i32(args, 0)? as u32 as usize;
    let pointer = match proc.memory().malloc(size) {
        Ok(pointer) => pointer as i32,
        Err(_) => 0,
    };
    Ok(Some(Value::I32(pointer)))
}

/// Copies `size` bytes from `src` to `dest`; returns the comparison of
/// the two ranges before the copy.
fn memcpy(proc: &mut Process<'_, '_>, args: &[Value]) -> Result<Option<Value>, VmError> {
    let dest = arg_i32(args, 0)? as u32 as u64;
    let src = arg_i32(args, 1)? as u32 as u64;
    let size = arg_i32(args, 2)? as u32 as usize;

    let memory = proc.memory();
    let ret = {
        let dest_range = memory.range(dest, size)?;
        let src_range = memory.range(src, size)?;
        match dest_range.cmp(src_range) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    };
    memory.copy_within(dest, src, size)?;
    Ok(Some(Value::I32(ret)))
}

/// Writes the storage slot `SHA-256(key)` under the origin address.
fn set_state(proc: &mut Process<'_, '_>, args: &[Value]) -> Result<Option<Value>, VmError> {
    let key_offset = arg_i32(args, 0)? as u32 as u64;
    let key_len = arg_i32(args, 1)? as u32 as usize;
    let val_offset = arg_i32(args, 2)? as u32 as u64;
    let val_len = arg_i32(args, 3)? as u32 as usize;

    let (slot, value) = {
        let memory = proc.memory();
        let slot = Hash::sha256().chain(memory.range(key_offset, key_len)?).finalize();
        (slot, memory.range(val_offset, val_len)?.to_vec())
    };
    let chain = proc.chain_mut().ok_or(VmError::NoChainContext)?;
    let origin = chain.origin;
    chain.state.set_state(origin, slot, value);
    Ok(None)
}

/// Reads the storage slot `SHA-256(key)`, copies the value into a fresh
/// allocation, and returns its offset; -1 on any error.
fn get_state(proc: &mut Process<'_, '_>, args: &[Value]) -> Result<Option<Value>, VmError> {
    let key_offset = arg_i32(args, 0)? as u32 as u64;
    let key_len = arg_i32(args, 1)? as u32 as usize;

    let slot = {
        let memory = proc.memory();
        Hash::sha256().chain(memory.range(key_offset, key_len)?).finalize()
    };
    let value = match proc.chain_mut() {
        Some(chain) => {
            let origin = chain.origin;
            chain.state.state(origin, slot)
        }
        None => return Ok(Some(Value::I32(-1))),
    };

    let memory = proc.memory();
    let pointer = match memory.malloc(value.len()) {
        Ok(pointer) => pointer,
        Err(_) => return Ok(Some(Value::I32(-1))),
    };
    memory
        .range_mut(pointer as u64, value.len())?
        .copy_from_slice(&value);
    Ok(Some(Value::I32(pointer as i32)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::state::{ChainState, Repository};
    use crate::types::address::Address;
    use crate::virtual_machine::interpreter::Interpreter;
    use crate::virtual_machine::module::Module;

    fn decode(wat_src: &str) -> Module {
        let bytes = wat::parse_str(wat_src).expect("fixture must assemble");
        Module::decode(&bytes, &HostRegistry::env()).expect("fixture must decode")
    }

    const MALLOC_WAT: &str = r#"
        (module
          (import "env" "malloc" (func $malloc (param i32) (result i32)))
          (func (export "alloc") (param i32) (result i32)
            local.get 0
            call $malloc)
          (memory 1))
    "#;

    #[test]
    fn malloc_import_bumps_monotonically() {
        let mut vm = Interpreter::new(decode(MALLOC_WAT)).unwrap();
        let alloc = vm.module().export_func("alloc").unwrap() as i64;
        let p1 = match vm.exec_code(alloc, &[2]).unwrap() {
            Some(Value::I32(p)) => p,
            other => panic!("unexpected result {:?}", other),
        };
        let p2 = match vm.exec_code(alloc, &[2]).unwrap() {
            Some(Value::I32(p)) => p,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(p1 as usize, vm.memory().len() / 2);
        assert_eq!(p2, p1 + 2);
    }

    #[test]
    fn malloc_import_returns_zero_when_exhausted() {
        let mut vm = Interpreter::new(decode(MALLOC_WAT)).unwrap();
        let alloc = vm.module().export_func("alloc").unwrap() as i64;
        // Half a page is available to the bump heap; ask for a full page.
        let out = vm.exec_code(alloc, &[65536]).unwrap();
        assert_eq!(out, Some(Value::I32(0)));
    }

    const MEMCPY_WAT: &str = r#"
        (module
          (import "env" "memcpy" (func $memcpy (param i32 i32 i32) (result i32)))
          (func (export "copy") (param i32 i32 i32) (result i32)
            local.get 0
            local.get 1
            local.get 2
            call $memcpy)
          (memory 1))
    "#;

    #[test]
    fn memcpy_compares_before_copying() {
        let mut vm = Interpreter::new(decode(MEMCPY_WAT)).unwrap();
        vm.memory_mut().write_at(b"abc", 10).unwrap();
        vm.memory_mut().write_at(b"abd", 20).unwrap();
        let copy = vm.module().export_func("copy").unwrap() as i64;

        let out = vm.exec_code(copy, &[10, 20, 3]).unwrap();
        assert_eq!(out, Some(Value::I32(-1)));
        assert_eq!(vm.memory().range(10, 3).unwrap(), b"abd");

        // Ranges now equal; the comparison result changes.
        let out = vm.exec_code(copy, &[10, 20, 3]).unwrap();
        assert_eq!(out, Some(Value::I32(0)));
    }

    const STATE_WAT: &str = r#"
        (module
          (import "env" "set_state" (func $set_state (param i32 i32 i32 i32)))
          (import "env" "get_state" (func $get_state (param i32 i32) (result i32)))
          (func (export "update") (param i32 i32 i32 i32)
            local.get 0
            local.get 1
            local.get 2
            local.get 3
            call $set_state)
          (func (export "read") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            call $get_state)
          (memory 1))
    "#;

    #[test]
    fn state_round_trip_through_contract() {
        let mut repo = Repository::new();
        let origin = Address::zero();
        let mut vm = Interpreter::with_chain(decode(STATE_WAT), origin, &mut repo).unwrap();

        let (key, val) = (b"Hello".as_slice(), b"World".as_slice());
        let key_ptr = vm.memory_mut().set_pointer_memory(key).unwrap() as u64;
        let val_ptr = vm.memory_mut().set_pointer_memory(val).unwrap() as u64;

        let update = vm.module().export_func("update").unwrap() as i64;
        vm.exec_code(
            update,
            &[key_ptr, key.len() as u64, val_ptr, val.len() as u64],
        )
        .unwrap();

        let read = vm.module().export_func("read").unwrap() as i64;
        let out = vm.exec_code(read, &[key_ptr, key.len() as u64]).unwrap();
        let pointer = match out {
            Some(Value::I32(p)) => p as u64,
            other => panic!("unexpected result {:?}", other),
        };
        assert_eq!(vm.memory().range(pointer, val.len()).unwrap(), val);
        drop(vm);

        // The slot key is the SHA-256 of the key bytes.
        let slot =
            Hash::from_hex("185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969")
                .unwrap();
        assert_eq!(repo.state(origin, slot), val.to_vec());
    }

    #[test]
    fn get_state_without_chain_returns_sentinel() {
        let mut vm = Interpreter::new(decode(STATE_WAT)).unwrap();
        let key_ptr = vm.memory_mut().set_pointer_memory(b"Hello").unwrap() as u64;
        let read = vm.module().export_func("read").unwrap() as i64;
        let out = vm.exec_code(read, &[key_ptr, 5]).unwrap();
        assert_eq!(out, Some(Value::I32(-1)));
    }

    #[test]
    fn get_state_of_missing_key_returns_empty_region() {
        let mut repo = Repository::new();
        let mut vm = Interpreter::with_chain(decode(STATE_WAT), Address::zero(), &mut repo).unwrap();
        let key_ptr = vm.memory_mut().set_pointer_memory(b"absent").unwrap() as u64;
        let read = vm.module().export_func("read").unwrap() as i64;
        let out = vm.exec_code(read, &[key_ptr, 6]).unwrap();
        let pointer = match out {
            Some(Value::I32(p)) => p as u64,
            other => panic!("unexpected result {:?}", other),
        };
        let info = vm.memory().region_info(pointer).unwrap();
        assert_eq!(info.length, 0);
    }
}
