// src/pipeline.rs
use std::sync::Arc;

use ethers::core::rand::thread_rng;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::OperationBuilder;
use crate::codec::{self, AccountCall};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::node::{self, Node, NodeClient};
use crate::rpc::{Relay, RelayClient};
use crate::signer::OperationSigner;
use crate::sponsor::SponsorClient;
use crate::tracker::{ReceiptTracker, TrackOutcome};
use crate::types::{AccountRef, Action, Call, Intent, RecoveryStatus};

/// Outcome of one pass through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub sender: Address,
    /// Key that signed the operation.
    pub owner: Address,
    pub op_hash: H256,
    pub outcome: TrackOutcome,
}

/// A recovery call sent as a plain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReceipt {
    pub id: H256,
    pub tx_hash: H256,
}

/// Build, sponsor, sign, submit and track, in that order, for any intent.
pub struct Pipeline<R, N> {
    config: PipelineConfig,
    node: Arc<N>,
    builder: OperationBuilder<R, N>,
    sponsor: SponsorClient<R>,
    signer: OperationSigner<N>,
    tracker: ReceiptTracker<R>,
}

impl Pipeline<RelayClient, NodeClient> {
    /// Pipeline over HTTP clients for the configured relay and node.
    pub fn connect(config: PipelineConfig) -> Result<Self, PipelineError> {
        let relay = Arc::new(RelayClient::new(&config.bundler_url)?);
        let node = Arc::new(NodeClient::new(config.rpc_url())?);
        Self::new(config, relay, node)
    }
}

impl<R: Relay, N: Node> Pipeline<R, N> {
    pub fn new(config: PipelineConfig, relay: Arc<R>, node: Arc<N>) -> Result<Self, PipelineError> {
        config.validate()?;

        let builder = OperationBuilder::new(Arc::clone(&relay), Arc::clone(&node), config.entry_point)
            .with_gas_margin(config.gas_margin)
            .with_priority_fee_divisor(config.priority_fee_divisor);
        let sponsor = SponsorClient::new(Arc::clone(&relay), config.entry_point, config.policy_id.clone());
        let signer = OperationSigner::new(
            Arc::clone(&node),
            config.entry_point,
            config.chain_id,
            config.verify_hash_on_chain,
        );
        let tracker = ReceiptTracker::new(
            relay,
            config.entry_point,
            config.receipt_attempts,
            config.receipt_interval,
        );

        Ok(Self {
            config,
            node,
            builder,
            sponsor,
            signer,
            tracker,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs `intent` to a receipt, or to `Pending` once the polling budget
    /// is spent. Any failure before submission aborts the run.
    pub async fn run(
        &self,
        intent: &Intent,
        owner: &LocalWallet,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        let op = self.builder.build(intent).await?;
        let sponsored = self.sponsor.sponsor(op).await?;
        let signed = self.signer.sign(sponsored, owner).await?;
        let sender = signed.operation().sender;

        let op_hash = self.tracker.submit(&signed).await?;
        let outcome = self.tracker.track(op_hash, cancel).await;

        Ok(SendReport {
            sender,
            owner: owner.address(),
            op_hash,
            outcome,
        })
    }

    /// One-shot send from a fresh disposable account. Owner key and salt are
    /// generated here and dropped afterwards.
    pub async fn send_disposable(&self, call: Call, cancel: &CancellationToken) -> Result<SendReport, PipelineError> {
        let factory = self
            .config
            .disposable_factory
            .ok_or_else(|| PipelineError::InvalidIntent("no disposable factory configured".to_string()))?;

        info!("Sending {} wei to {:?} from a disposable account", call.value, call.to);
        let owner = LocalWallet::new(&mut thread_rng());
        let intent = Intent {
            account: AccountRef::Fresh {
                factory,
                owner: owner.address(),
                salt: H256::random(),
            },
            action: Action::ExecuteAndBurn(call),
        };
        self.run(&intent, &owner, cancel).await
    }

    /// Deploys the account for `owner` and `salt` with an empty call.
    /// Disposable accounts only deploy together with their one call, so the
    /// disposable factory is refused here.
    pub async fn deploy_account(
        &self,
        owner: &LocalWallet,
        salt: H256,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        let factory = self.resolve_factory().await?;
        if Some(factory) == self.config.disposable_factory {
            return Err(PipelineError::InvalidIntent(
                "no guardian account factory deployed; disposable accounts deploy through send-disposable"
                    .to_string(),
            ));
        }
        let intent = Intent {
            account: AccountRef::Fresh {
                factory,
                owner: owner.address(),
                salt,
            },
            action: Action::None,
        };
        self.run(&intent, owner, cancel).await
    }

    pub async fn execute(
        &self,
        account: Address,
        call: Call,
        owner: &LocalWallet,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        let intent = Intent {
            account: AccountRef::Existing(account),
            action: Action::Execute(call),
        };
        self.run(&intent, owner, cancel).await
    }

    /// Replaces the guardian set through a self-call signed by the owner.
    pub async fn configure_guardians(
        &self,
        account: Address,
        guardians: Vec<Address>,
        threshold: u64,
        delay_seconds: u64,
        owner: &LocalWallet,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        if threshold == 0 || threshold > guardians.len() as u64 {
            return Err(PipelineError::InvalidIntent(format!(
                "threshold {} with {} guardians",
                threshold,
                guardians.len()
            )));
        }
        let inner = AccountCall::ConfigureGuardians {
            guardians,
            threshold: U256::from(threshold),
            delay_seconds: U256::from(delay_seconds),
            by_self: true,
        };
        self.execute(account, self_call(account, &inner), owner, cancel).await
    }

    /// Freezes through a self-call. While frozen the account rejects owner
    /// operations, so unfreezing has to be a direct owner transaction.
    pub async fn set_frozen(
        &self,
        account: Address,
        frozen: bool,
        owner: &LocalWallet,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        if !frozen {
            warn!("Unfreezing {:?} through an operation will be rejected while it is frozen", account);
        }
        let inner = AccountCall::SetFrozen { frozen, by_self: true };
        self.execute(account, self_call(account, &inner), owner, cancel).await
    }

    /// Confirms recovery of `account` to `new_owner` with a plain transaction
    /// from a guardian's key. The first confirmation starts the delay.
    pub async fn propose_recovery(
        &self,
        account: Address,
        new_owner: Address,
        guardian: &LocalWallet,
    ) -> Result<RecoveryReceipt, PipelineError> {
        if new_owner.is_zero() {
            return Err(PipelineError::InvalidIntent("new owner must be non-zero".to_string()));
        }
        let id = codec::recovery_id(account, self.config.chain_id, new_owner);
        let data = AccountCall::ProposeRecovery {
            new_owner,
            by_self: false,
        }
        .encode();
        let tx_hash = self.node.send_transaction(guardian, account, data).await?;
        info!(
            "Guardian {:?} proposed recovery {:?} of {:?} to {:?}",
            guardian.address(),
            id,
            account,
            new_owner
        );
        Ok(RecoveryReceipt { id, tx_hash })
    }

    /// Proposes through an owner-signed self-call. It only counts towards
    /// quorum when the account is listed among its own guardians.
    pub async fn propose_recovery_by_self(
        &self,
        account: Address,
        new_owner: Address,
        owner: &LocalWallet,
        cancel: &CancellationToken,
    ) -> Result<SendReport, PipelineError> {
        if new_owner.is_zero() {
            return Err(PipelineError::InvalidIntent("new owner must be non-zero".to_string()));
        }
        let inner = AccountCall::ProposeRecovery {
            new_owner,
            by_self: true,
        };
        self.execute(account, self_call(account, &inner), owner, cancel).await
    }

    /// Rotates the owner of `account` once request `id` has quorum and its
    /// delay has passed. Anyone may send this; `sender` only pays for it.
    pub async fn execute_recovery(
        &self,
        account: Address,
        id: H256,
        sender: &LocalWallet,
    ) -> Result<RecoveryReceipt, PipelineError> {
        let status = node::read_recovery(self.node.as_ref(), account, id).await?;
        if status.new_owner.is_zero() {
            return Err(PipelineError::InvalidIntent(format!(
                "no recovery {id:?} on {account:?}"
            )));
        }
        let data = AccountCall::ExecuteRecovery { id }.encode();
        let tx_hash = self.node.send_transaction(sender, account, data).await?;
        info!("Recovery {:?} executed, {:?} now owned by {:?}", id, account, status.new_owner);
        Ok(RecoveryReceipt { id, tx_hash })
    }

    /// Recovery id for `new_owner` and the request as stored on `account`.
    pub async fn recovery_status(
        &self,
        account: Address,
        new_owner: Address,
    ) -> Result<(H256, RecoveryStatus), PipelineError> {
        let id = codec::recovery_id(account, self.config.chain_id, new_owner);
        let status = node::read_recovery(self.node.as_ref(), account, id).await?;
        Ok((id, status))
    }

    pub async fn balance(&self, address: Address) -> Result<U256, PipelineError> {
        self.node.get_balance(address).await
    }

    /// Polls again for an operation earlier reported as pending.
    pub async fn poll(&self, op_hash: H256, cancel: &CancellationToken) -> TrackOutcome {
        self.tracker.track(op_hash, cancel).await
    }

    /// The guardian account factory when it has code, else the disposable one.
    pub async fn resolve_factory(&self) -> Result<Address, PipelineError> {
        if let Some(factory) = self.config.account_factory {
            if node::is_deployed(self.node.as_ref(), factory).await? {
                return Ok(factory);
            }
            warn!("Account factory {:?} has no code, trying the disposable factory", factory);
        }
        if let Some(factory) = self.config.disposable_factory {
            if node::is_deployed(self.node.as_ref(), factory).await? {
                return Ok(factory);
            }
        }
        Err(PipelineError::NodeError("no deployed account factory".to_string()))
    }
}

fn self_call(account: Address, inner: &AccountCall) -> Call {
    Call {
        to: account,
        value: U256::zero(),
        data: inner.encode(),
    }
}
