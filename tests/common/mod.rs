// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H160, H256, U256};
use ethers::utils::keccak256;

use cipher_wallet::account::entry_point::{AccountKind, OpReceipt};
use cipher_wallet::account::{CallExecutor, LocalEntryPoint};
use cipher_wallet::error::{EntryPointError, PipelineError};
use cipher_wallet::node::Node;
use cipher_wallet::rpc::Relay;
use cipher_wallet::types::{GasEstimate, SettlementReceipt, UserOperation, UserOperationReceipt};
use cipher_wallet::{Pipeline, PipelineConfig};

pub const ENTRY_POINT: Address = H160([0xee; 20]);
pub const CHAIN_ID: u64 = 31337;
pub const DISPOSABLE_FACTORY: Address = H160([0xd1; 20]);
pub const ACCOUNT_FACTORY: Address = H160([0xd2; 20]);
pub const PAYMASTER: Address = H160([0x9a; 20]);
pub const TARGET: Address = H160([0x7a; 20]);
pub const GENESIS: u64 = 1_700_000_000;

/// External calls made by accounts, with configurable reverts.
#[derive(Default)]
pub struct Recorder {
    pub calls: Vec<(Address, Address, U256)>,
    pub reverting: Vec<Address>,
}

impl CallExecutor for Recorder {
    fn call(&mut self, from: Address, to: Address, value: U256, _data: &Bytes) -> Result<Bytes, Bytes> {
        self.calls.push((from, to, value));
        if self.reverting.contains(&to) {
            Err(Bytes::from(b"target reverted".to_vec()))
        } else {
            Ok(Bytes::new())
        }
    }
}

pub struct ChainState {
    pub entry_point: LocalEntryPoint<Recorder>,
    pub now: u64,
    pub receipts: HashMap<H256, (H256, OpReceipt)>,
    pub submitted: Vec<UserOperation>,
    /// Plain transactions sent through the node, as (from, to).
    pub transactions: Vec<(Address, Address)>,
    pub hold_receipts: bool,
}

/// A chain, bundler and paymaster in one process.
pub struct DevChain {
    state: Mutex<ChainState>,
}

impl DevChain {
    pub fn new() -> Arc<Self> {
        let mut entry_point = LocalEntryPoint::new(ENTRY_POINT, CHAIN_ID, Recorder::default());
        entry_point.register_factory(DISPOSABLE_FACTORY, AccountKind::Disposable);
        entry_point.register_factory(ACCOUNT_FACTORY, AccountKind::Guardian);
        Arc::new(Self {
            state: Mutex::new(ChainState {
                entry_point,
                now: GENESIS,
                receipts: HashMap::new(),
                submitted: Vec::new(),
                transactions: Vec::new(),
                hold_receipts: false,
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    pub fn advance(&self, seconds: u64) {
        self.state().now += seconds;
    }

    pub fn now(&self) -> u64 {
        self.state().now
    }

    /// A plain transaction, e.g. from a guardian's externally owned key.
    pub fn transact(&self, from: Address, to: Address, data: &[u8]) -> Result<Bytes, EntryPointError> {
        let mut state = self.state();
        let now = state.now;
        state.entry_point.call(from, to, data, now)
    }

    pub fn view(&self, to: Address, data: &[u8]) -> Result<Bytes, EntryPointError> {
        self.state().entry_point.view(to, data)
    }

    pub fn receipt_of(&self, op_hash: H256) -> Option<OpReceipt> {
        self.state().receipts.get(&op_hash).map(|(_, receipt)| receipt.clone())
    }

    pub fn last_submitted(&self) -> UserOperation {
        self.state().submitted.last().cloned().unwrap()
    }
}

#[async_trait]
impl Relay for DevChain {
    async fn estimate(&self, _op: &UserOperation, entry_point: Address) -> Result<GasEstimate, PipelineError> {
        if entry_point != ENTRY_POINT {
            return Err(PipelineError::EstimationFailure("unsupported entry point".into()));
        }
        Ok(GasEstimate {
            call_gas_limit: U256::from(60_000),
            verification_gas_limit: U256::from(250_000),
            pre_verification_gas: U256::from(48_000),
        })
    }

    async fn fee_data(&self) -> Result<U256, PipelineError> {
        Ok(U256::from(1_500_000_000u64))
    }

    async fn sponsor(&self, op: &UserOperation, _entry_point: Address, policy_id: &str) -> Result<Bytes, PipelineError> {
        if policy_id.is_empty() {
            return Err(PipelineError::SponsorshipRejected("missing policy".into()));
        }
        let mut data = PAYMASTER.as_bytes().to_vec();
        data.extend_from_slice(&keccak256(op.sender.as_bytes()));
        Ok(data.into())
    }

    async fn submit(&self, op: &UserOperation, _entry_point: Address) -> Result<H256, PipelineError> {
        let mut state = self.state();
        state.submitted.push(op.clone());
        let now = state.now;
        let receipt = state
            .entry_point
            .handle_op(op, now)
            .map_err(|e| PipelineError::SubmissionFailure(e.to_string()))?;

        let op_hash = receipt.op_hash;
        let tx_hash = H256::from(keccak256(op_hash.as_bytes()));
        state.receipts.insert(op_hash, (tx_hash, receipt));
        Ok(op_hash)
    }

    async fn receipt(&self, op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError> {
        let state = self.state();
        if state.hold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&op_hash).map(|(tx_hash, receipt)| UserOperationReceipt {
            user_op_hash: Some(op_hash),
            success: Some(receipt.success),
            receipt: Some(SettlementReceipt {
                transaction_hash: *tx_hash,
            }),
        }))
    }
}

#[async_trait]
impl Node for DevChain {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, PipelineError> {
        self.view(to, &data)
            .map_err(|e| PipelineError::NodeError(e.to_string()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, PipelineError> {
        if self.state().entry_point.is_contract(address) {
            Ok(Bytes::from(vec![0x60, 0x80, 0x60, 0x40]))
        } else {
            Ok(Bytes::new())
        }
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, PipelineError> {
        Ok(U256::zero())
    }

    async fn gas_price(&self) -> Result<U256, PipelineError> {
        Ok(U256::from(1_500_000_000u64))
    }

    async fn send_transaction(&self, from: &LocalWallet, to: Address, data: Bytes) -> Result<H256, PipelineError> {
        let sender = from.address();
        self.transact(sender, to, &data)
            .map_err(|e| PipelineError::SubmissionFailure(e.to_string()))?;

        let mut state = self.state();
        state.transactions.push((sender, to));
        let mut preimage = sender.as_bytes().to_vec();
        preimage.extend_from_slice(&data);
        preimage.extend_from_slice(&(state.transactions.len() as u64).to_be_bytes());
        Ok(H256::from(keccak256(preimage)))
    }
}

pub fn config() -> PipelineConfig {
    let mut config = PipelineConfig::new("http://localhost:4337", ENTRY_POINT, CHAIN_ID);
    config.disposable_factory = Some(DISPOSABLE_FACTORY);
    config.account_factory = Some(ACCOUNT_FACTORY);
    config.policy_id = "sp_dev".to_string();
    config.receipt_attempts = 3;
    config.receipt_interval = Duration::from_millis(100);
    config.verify_hash_on_chain = true;
    config
}

pub fn pipeline(chain: &Arc<DevChain>) -> Pipeline<DevChain, DevChain> {
    Pipeline::new(config(), Arc::clone(chain), Arc::clone(chain)).unwrap()
}
