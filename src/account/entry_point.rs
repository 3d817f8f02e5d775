// src/account/entry_point.rs
//! In-process entry point: deploys accounts from init code, validates and
//! executes user operations against them, and answers view calls.

use std::collections::HashMap;

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use tracing::{debug, info, warn};

use super::{BlockEnv, CallExecutor, CallOutcome, DisposableAccount, GuardianAccount, SmartAccount};
use crate::codec::{encode_return, split_init_code, AccountCall, EntryPointCall, FactoryCall};
use crate::error::{AccountError, CodecError, EntryPointError};
use crate::predictor::create2_account_address;
use crate::signer::user_op_hash;
use crate::types::UserOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountKind {
    Disposable,
    Guardian,
}

impl AccountKind {
    /// Stands in for the creation bytecode in address derivation.
    pub fn code_id(&self) -> &'static [u8] {
        match self {
            Self::Disposable => b"DisposableAccount",
            Self::Guardian => b"GuardianAccount",
        }
    }

    fn instantiate(&self, address: Address, entry_point: Address, owner: Address) -> DeployedAccount {
        match self {
            Self::Disposable => DeployedAccount::Disposable(DisposableAccount::new(address, entry_point, owner)),
            Self::Guardian => DeployedAccount::Guardian(GuardianAccount::new(address, entry_point, owner)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployedAccount {
    Disposable(DisposableAccount),
    Guardian(GuardianAccount),
}

impl DeployedAccount {
    pub fn as_disposable(&self) -> Option<&DisposableAccount> {
        match self {
            Self::Disposable(account) => Some(account),
            Self::Guardian(_) => None,
        }
    }

    pub fn as_guardian(&self) -> Option<&GuardianAccount> {
        match self {
            Self::Guardian(account) => Some(account),
            Self::Disposable(_) => None,
        }
    }

    fn inner(&self) -> &dyn SmartAccount {
        match self {
            Self::Disposable(account) => account,
            Self::Guardian(account) => account,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SmartAccount {
        match self {
            Self::Disposable(account) => account,
            Self::Guardian(account) => account,
        }
    }
}

/// Result of a handled operation. Validation failures never get here; a
/// failed call does, with its nonce consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpReceipt {
    pub op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    pub deployed: bool,
    pub success: bool,
    pub return_data: Bytes,
    pub revert_reason: Option<String>,
}

pub struct LocalEntryPoint<E> {
    address: Address,
    chain_id: u64,
    factories: HashMap<Address, AccountKind>,
    accounts: HashMap<Address, DeployedAccount>,
    nonces: HashMap<Address, U256>,
    executor: E,
}

impl<E: CallExecutor> LocalEntryPoint<E> {
    pub fn new(address: Address, chain_id: u64, executor: E) -> Self {
        Self {
            address,
            chain_id,
            factories: HashMap::new(),
            accounts: HashMap::new(),
            nonces: HashMap::new(),
            executor,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn register_factory(&mut self, factory: Address, kind: AccountKind) {
        self.factories.insert(factory, kind);
    }

    pub fn counterfactual_address(
        &self,
        factory: Address,
        owner: Address,
        salt: H256,
    ) -> Result<Address, EntryPointError> {
        let kind = self
            .factories
            .get(&factory)
            .ok_or(EntryPointError::UnknownFactory(factory))?;
        Ok(create2_account_address(factory, kind.code_id(), self.address, owner, salt))
    }

    pub fn nonce(&self, sender: Address) -> U256 {
        self.nonces.get(&sender).copied().unwrap_or_default()
    }

    pub fn account(&self, address: Address) -> Option<&DeployedAccount> {
        self.accounts.get(&address)
    }

    /// Whether `address` holds code: this entry point, a factory or an account.
    pub fn is_contract(&self, address: Address) -> bool {
        address == self.address || self.factories.contains_key(&address) || self.accounts.contains_key(&address)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn op_hash(&self, op: &UserOperation) -> H256 {
        user_op_hash(op, self.address, self.chain_id)
    }

    /// Deploys (if needed), validates, checks and bumps the nonce, then
    /// executes `op.call_data` with this entry point as caller. Nothing
    /// changes unless validation and the nonce check pass.
    pub fn handle_op(&mut self, op: &UserOperation, timestamp: u64) -> Result<OpReceipt, EntryPointError> {
        let op_hash = self.op_hash(op);
        let sender = op.sender;

        let deployment = match self.accounts.get(&sender) {
            Some(account) => {
                account
                    .inner()
                    .validate_user_op(op, op_hash)
                    .map_err(AccountError::from)?;
                if !op.init_code.is_empty() {
                    return Err(EntryPointError::AlreadyDeployed(sender));
                }
                None
            }
            None => {
                let account = self.prepare_deployment(sender, &op.init_code)?;
                account
                    .inner()
                    .validate_user_op(op, op_hash)
                    .map_err(AccountError::from)?;
                Some(account)
            }
        };

        let expected = self.nonce(sender);
        if op.nonce != expected {
            return Err(EntryPointError::NonceMismatch {
                expected,
                got: op.nonce,
            });
        }
        self.nonces.insert(sender, expected.saturating_add(U256::one()));

        let deployed = deployment.is_some();
        if let Some(account) = deployment {
            info!("Deployed account {:?}", sender);
            self.accounts.insert(sender, account);
        }

        let mut receipt = OpReceipt {
            op_hash,
            sender,
            nonce: op.nonce,
            deployed,
            success: true,
            return_data: Bytes::new(),
            revert_reason: None,
        };
        if op.call_data.is_empty() {
            return Ok(receipt);
        }

        let env = BlockEnv {
            timestamp,
            chain_id: self.chain_id,
        };
        let caller = self.address;
        let result = AccountCall::decode(&op.call_data)
            .map_err(EntryPointError::from)
            .and_then(|call| self.dispatch(caller, sender, call, &env).map_err(EntryPointError::from));
        match result {
            Ok(outcome) => {
                receipt.success = outcome.success;
                receipt.return_data = outcome.return_data;
                if !receipt.success {
                    receipt.revert_reason = Some("inner call reverted".to_string());
                }
            }
            Err(e) => {
                warn!("Operation {:?} from {:?} failed in execution: {}", op_hash, sender, e);
                receipt.success = false;
                receipt.revert_reason = Some(e.to_string());
            }
        }

        debug!("Handled operation {:?}, success {}", op_hash, receipt.success);
        Ok(receipt)
    }

    /// A plain transaction from `caller` to `to`. Account calls may change
    /// state; everything else is answered as a view.
    pub fn call(&mut self, caller: Address, to: Address, data: &[u8], timestamp: u64) -> Result<Bytes, EntryPointError> {
        if !self.accounts.contains_key(&to) {
            return self.view(to, data);
        }
        let env = BlockEnv {
            timestamp,
            chain_id: self.chain_id,
        };
        let call = AccountCall::decode(data)?;
        let outcome = self.dispatch(caller, to, call, &env)?;
        if outcome.success {
            Ok(outcome.return_data)
        } else {
            Err(AccountError::CallReverted(outcome.return_data).into())
        }
    }

    /// Read-only call, as `eth_call` would answer it.
    pub fn view(&self, to: Address, data: &[u8]) -> Result<Bytes, EntryPointError> {
        if to == self.address {
            return match EntryPointCall::decode(data)? {
                EntryPointCall::GetNonce { sender, .. } => Ok(encode_return(&[Token::Uint(self.nonce(sender))])),
                EntryPointCall::GetUserOpHash(op) => Ok(encode_return(&[Token::FixedBytes(
                    self.op_hash(&op).as_bytes().to_vec(),
                )])),
            };
        }

        if let Some(kind) = self.factories.get(&to) {
            return match FactoryCall::decode(data)? {
                FactoryCall::GetAddress {
                    entry_point,
                    owner,
                    salt,
                } => {
                    let address = create2_account_address(to, kind.code_id(), entry_point, owner, salt);
                    Ok(encode_return(&[Token::Address(address)]))
                }
                FactoryCall::Create { .. } => {
                    Err(AccountError::UnsupportedCall("create is not a view".to_string()).into())
                }
            };
        }

        let account = self.accounts.get(&to).ok_or(EntryPointError::UnknownTarget(to))?;
        let call = AccountCall::decode(data)?;
        account
            .inner()
            .read(&call)
            .ok_or_else(|| AccountError::UnsupportedCall(call.signature().to_string()).into())
    }

    fn dispatch(
        &mut self,
        caller: Address,
        to: Address,
        call: AccountCall,
        env: &BlockEnv,
    ) -> Result<CallOutcome, AccountError> {
        let account = self
            .accounts
            .get_mut(&to)
            .ok_or_else(|| AccountError::UnsupportedCall(format!("no account at {to:?}")))?;
        account.inner_mut().handle_call(caller, call, env, &mut self.executor)
    }

    fn prepare_deployment(&self, sender: Address, init_code: &[u8]) -> Result<DeployedAccount, EntryPointError> {
        let (factory, data) = split_init_code(init_code).ok_or(EntryPointError::NotDeployed(sender))?;
        let kind = self
            .factories
            .get(&factory)
            .ok_or(EntryPointError::UnknownFactory(factory))?;

        let FactoryCall::Create {
            entry_point,
            owner,
            salt,
        } = FactoryCall::decode(data)?
        else {
            return Err(CodecError::UnexpectedTokens.into());
        };

        let address = create2_account_address(factory, kind.code_id(), entry_point, owner, salt);
        if address != sender {
            return Err(EntryPointError::InitCodeMismatch {
                expected: sender,
                got: address,
            });
        }
        Ok(kind.instantiate(address, entry_point, owner))
    }
}
