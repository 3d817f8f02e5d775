// src/account/mod.rs
//! On-chain account logic. Calls arrive already serialized by the chain, so
//! every method here runs to completion against `&mut self` with no locking.

pub mod disposable;
pub mod entry_point;
pub mod guardian;

use ethers::types::{Address, Bytes, H256, U256};

use crate::codec::AccountCall;
use crate::error::{AccountError, ValidationError};
use crate::signer::recover_signer;
use crate::types::UserOperation;

pub use disposable::DisposableAccount;
pub use entry_point::LocalEntryPoint;
pub use guardian::GuardianAccount;

/// Block context a call executes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockEnv {
    pub timestamp: u64,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
}

impl CallOutcome {
    pub fn ok(return_data: Bytes) -> Self {
        Self {
            success: true,
            return_data,
        }
    }

    pub fn reverted(return_data: Bytes) -> Self {
        Self {
            success: false,
            return_data,
        }
    }
}

/// Performs calls an account makes to other contracts. `Err` carries the
/// revert data.
pub trait CallExecutor {
    fn call(&mut self, from: Address, to: Address, value: U256, data: &Bytes) -> Result<Bytes, Bytes>;
}

pub trait SmartAccount {
    fn address(&self) -> Address;

    fn owner(&self) -> Address;

    /// Checks `op` against this account. `op_hash` is the entry point's hash
    /// of `op`.
    fn validate_user_op(&self, op: &UserOperation, op_hash: H256) -> Result<(), ValidationError>;

    /// ABI-encoded result of a view call, `None` if `call` is not one.
    fn read(&self, call: &AccountCall) -> Option<Bytes>;

    fn handle_call(
        &mut self,
        caller: Address,
        call: AccountCall,
        env: &BlockEnv,
        executor: &mut dyn CallExecutor,
    ) -> Result<CallOutcome, AccountError>;
}

/// Fails unless `signature` is `owner`'s personal signature over `op_hash`.
pub fn check_owner_signature(owner: Address, op_hash: H256, signature: &[u8]) -> Result<(), ValidationError> {
    if recover_signer(op_hash, signature)? != owner {
        return Err(ValidationError::BadSignature);
    }
    Ok(())
}
