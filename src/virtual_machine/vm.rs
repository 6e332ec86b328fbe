//! Contract drivers: deployment and invocation.
//!
//! [`Vm`] wires the interpreter to chain state. `create` stores code at a
//! derived address after the balance, collision, and size checks pass;
//! it never executes contract code at deploy time. `call` loads the
//! stored code, builds an interpreter instance, marshals the JSON input
//! through pointer memory as `(argc, argv)`, runs the exported `invoke`
//! entry, and reads the returned region back out of linear memory.
//!
//! Gas is threaded through both drivers untouched; metering is not
//! enforced here.

use crate::crypto::{create_address, empty_code_hash};
use crate::storage::state::ChainState;
use crate::types::address::Address;
use crate::types::hash::Hash;
use crate::utils::log::Logger;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::host::HostRegistry;
use crate::virtual_machine::interpreter::Interpreter;
use crate::virtual_machine::module::Module;
use crate::virtual_machine::value::Value;

/// Upper bound on deployed contract code, in bytes.
pub const MAX_CODE_SIZE: usize = 24576;

/// Name of the exported entry function every contract must provide.
pub const ENTRY_POINT_METHOD: &str = "invoke";

/// Chain-level information for one execution.
pub struct ChainContext {
    /// Transaction origin; namespaces contract storage.
    pub origin: Address,
    /// Block beneficiary.
    pub coinbase: Address,
    /// Price per gas unit.
    pub gas_price: u128,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Height of the enclosing block.
    pub block_number: u64,
    /// Timestamp of the enclosing block.
    pub time: u64,
}

impl ChainContext {
    /// Creates a context with the given origin and zeroed block fields.
    pub fn new(origin: Address) -> Self {
        ChainContext {
            origin,
            coinbase: Address::zero(),
            gas_price: 0,
            gas_limit: u64::MAX,
            block_number: 0,
            time: 0,
        }
    }
}

/// Returns true when `addr` can cover a transfer of `amount`.
pub fn can_transfer(state: &dyn ChainState, addr: Address, amount: u128) -> bool {
    state.balance(addr) >= amount
}

/// Moves `amount` from `sender` to `recipient`.
pub fn transfer(state: &mut dyn ChainState, sender: Address, recipient: Address, amount: u128) {
    state.sub_balance(sender, amount);
    state.add_balance(recipient, amount);
}

/// The Wasm contract driver bound to one chain state.
pub struct Vm<'s, S: ChainState> {
    pub context: ChainContext,
    pub state: &'s mut S,
    log: Logger,
}

impl<'s, S: ChainState> Vm<'s, S> {
    /// Creates a driver over the given context and state.
    pub fn new(context: ChainContext, state: &'s mut S) -> Self {
        Vm {
            context,
            state,
            log: Logger::new("wasm-vm"),
        }
    }

    /// Deploys `code` as a new contract funded with `value`.
    ///
    /// The address derives from the caller's current nonce; the nonce is
    /// bumped, the target must be unoccupied, and the code must parse
    /// and fit the size limit. Contract code is not executed.
    pub fn create(
        &mut self,
        caller: Address,
        code: &[u8],
        gas: u64,
        value: u128,
    ) -> Result<(Vec<u8>, Address, u64), VmError> {
        if let Err(err) = Module::decode(code, &HostRegistry::env()) {
            self.log
                .error(&format!("failed to read the module from code: {}", err));
            return Err(err);
        }

        let nonce = self.state.nonce(caller);
        let contract_addr = create_address(caller, nonce);

        if !can_transfer(&*self.state, caller, value) {
            return Err(VmError::InsufficientBalance);
        }

        self.state.set_nonce(caller, nonce + 1);

        // The target must be untouched: no transactions sent from it and
        // no code stored under it.
        let contract_hash = self.state.code_hash(contract_addr);
        if self.state.nonce(contract_addr) != 0
            || (contract_hash != Hash::zero() && contract_hash != empty_code_hash())
        {
            return Err(VmError::ContractAddressCollision);
        }

        if code.len() > MAX_CODE_SIZE {
            return Err(VmError::CodeSizeExceedsLimit {
                size: code.len(),
                limit: MAX_CODE_SIZE,
            });
        }

        self.state.create_account(contract_addr);
        self.state.set_code(contract_addr, code.to_vec());
        transfer(&mut *self.state, caller, contract_addr, value);
        Ok((Vec::new(), contract_addr, gas))
    }

    /// Invokes the contract at `addr` with a JSON array of string
    /// arguments, returning the bytes its entry function points at.
    pub fn call(
        &mut self,
        caller: Address,
        addr: Address,
        input: &[u8],
        gas: u64,
        value: u128,
    ) -> Result<(Vec<u8>, u64), VmError> {
        if !can_transfer(&*self.state, caller, value) {
            return Err(VmError::InsufficientBalance);
        }
        transfer(&mut *self.state, caller, addr, value);

        let code = self.state.code(addr);
        let module = match Module::decode(&code, &HostRegistry::env()) {
            Ok(module) => module,
            Err(err) => {
                self.log
                    .error(&format!("failed to read the module from code: {}", err));
                return Err(err);
            }
        };

        let origin = self.context.origin;
        let mut interpreter = Interpreter::with_chain(module, origin, &mut *self.state)?;

        let fn_index = interpreter
            .module()
            .export_func(ENTRY_POINT_METHOD)
            .ok_or_else(|| VmError::EntryPointNotFound(ENTRY_POINT_METHOD.to_string()))?;

        let args = extract_params(input)?;

        let mut arg_pointers = Vec::with_capacity(args.len());
        for arg in &args {
            let pointer = interpreter.memory_mut().set_pointer_memory(arg.as_bytes())?;
            arg_pointers.push(pointer as u32);
        }
        let argv = interpreter.memory_mut().set_pointer_array(&arg_pointers)?;

        let ret = interpreter.exec_code(fn_index as i64, &[args.len() as u64, argv as u64])?;
        let pointer = match ret {
            Some(Value::I32(pointer)) => pointer as u32,
            other => {
                return Err(VmError::InvalidReturnType(format!(
                    "entry method returned {:?}",
                    other
                )));
            }
        };
        let ret = interpreter.memory().get_memory(pointer as u64)?.to_vec();
        Ok((ret, gas))
    }
}

/// Parses the call input: a JSON array of strings.
fn extract_params(input: &[u8]) -> Result<Vec<String>, VmError> {
    serde_json::from_slice(input).map_err(|e| VmError::InvalidInput(e.to_string()))
}
