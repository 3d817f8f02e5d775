// src/account/disposable.rs
use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use tracing::{info, warn};

use super::{check_owner_signature, BlockEnv, CallExecutor, CallOutcome, SmartAccount};
use crate::codec::{encode_return, AccountCall};
use crate::error::{AccountError, ValidationError};
use crate::types::{Call, UserOperation};

/// Single-use account: one `executeAndBurn` at nonce zero, then burned for
/// good. Operations with any other call data never pass validation, so the
/// only nonce can't be spent without burning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposableAccount {
    address: Address,
    entry_point: Address,
    owner: Address,
    burned: bool,
}

impl DisposableAccount {
    pub fn new(address: Address, entry_point: Address, owner: Address) -> Self {
        Self {
            address,
            entry_point,
            owner,
            burned: false,
        }
    }

    pub fn burned(&self) -> bool {
        self.burned
    }

    /// Marks the account burned, then performs `call`. The burn stands even
    /// when the call reverts; the outcome then reports `success = false`.
    pub fn execute_and_burn(
        &mut self,
        caller: Address,
        call: Call,
        executor: &mut dyn CallExecutor,
    ) -> Result<CallOutcome, AccountError> {
        if caller != self.entry_point && caller != self.owner {
            return Err(AccountError::Unauthorized(caller));
        }
        if self.burned {
            return Err(ValidationError::AlreadyBurned.into());
        }

        self.burned = true;
        info!("Disposable account {:?} burned", self.address);

        match executor.call(self.address, call.to, call.value, &call.data) {
            Ok(ret) => Ok(CallOutcome::ok(ret)),
            Err(revert) => {
                warn!("Call from burned account {:?} to {:?} reverted", self.address, call.to);
                Ok(CallOutcome::reverted(revert))
            }
        }
    }
}

impl SmartAccount for DisposableAccount {
    fn address(&self) -> Address {
        self.address
    }

    fn owner(&self) -> Address {
        self.owner
    }

    fn validate_user_op(&self, op: &UserOperation, op_hash: H256) -> Result<(), ValidationError> {
        if self.burned {
            return Err(ValidationError::AlreadyBurned);
        }
        if !op.nonce.is_zero() {
            return Err(ValidationError::WrongNonce {
                expected: U256::zero(),
                got: op.nonce,
            });
        }
        match AccountCall::decode(&op.call_data) {
            Ok(AccountCall::ExecuteAndBurn(_)) => {}
            Ok(other) => return Err(ValidationError::NotExecuteAndBurn(other.signature().to_string())),
            Err(e) => return Err(ValidationError::NotExecuteAndBurn(e.to_string())),
        }
        check_owner_signature(self.owner, op_hash, &op.signature)
    }

    fn handle_call(
        &mut self,
        caller: Address,
        call: AccountCall,
        _env: &BlockEnv,
        executor: &mut dyn CallExecutor,
    ) -> Result<CallOutcome, AccountError> {
        if let Some(ret) = self.read(&call) {
            return Ok(CallOutcome::ok(ret));
        }
        match call {
            AccountCall::ExecuteAndBurn(call) => self.execute_and_burn(caller, call, executor),
            other => Err(AccountError::UnsupportedCall(other.signature().to_string())),
        }
    }

    fn read(&self, call: &AccountCall) -> Option<Bytes> {
        match call {
            AccountCall::Burned => Some(encode_return(&[Token::Bool(self.burned)])),
            AccountCall::Owner => Some(encode_return(&[Token::Address(self.owner)])),
            _ => None,
        }
    }
}
