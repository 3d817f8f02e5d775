// src/node.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256, U64};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::codec::{self, AccountCall, EntryPointCall};
use crate::error::{CodecError, PipelineError};
use crate::types::RecoveryStatus;

/// What the pipeline needs from the chain node: reads, plus plain signed
/// transactions for calls that don't go through the account's owner.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, PipelineError>;

    async fn get_code(&self, address: Address) -> Result<Bytes, PipelineError>;

    async fn get_balance(&self, address: Address) -> Result<U256, PipelineError>;

    async fn gas_price(&self) -> Result<U256, PipelineError>;

    /// Sends `data` to `to` from `from`'s key and waits for it to be mined.
    /// Returns the transaction hash; a reverted transaction is an error.
    async fn send_transaction(&self, from: &LocalWallet, to: Address, data: Bytes) -> Result<H256, PipelineError>;
}

pub struct NodeClient {
    client: Arc<Provider<Http>>,
}

impl NodeClient {
    pub fn new(rpc_url: &str) -> Result<Self, PipelineError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| PipelineError::InvalidConfig(format!("rpc url {rpc_url}: {e}")))?;
        Ok(Self {
            client: Arc::new(provider),
        })
    }
}

#[async_trait]
impl Node for NodeClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, PipelineError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, PipelineError> {
        self.client
            .get_code(address, None)
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, PipelineError> {
        self.client
            .get_balance(address, None)
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))
    }

    async fn gas_price(&self) -> Result<U256, PipelineError> {
        self.client
            .get_gas_price()
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))
    }

    async fn send_transaction(&self, from: &LocalWallet, to: Address, data: Bytes) -> Result<H256, PipelineError> {
        let chain_id = self
            .client
            .get_chainid()
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))?;
        let signer = SignerMiddleware::new(Arc::clone(&self.client), from.clone().with_chain_id(chain_id.as_u64()));

        let tx = TransactionRequest::new().to(to).data(data);
        let receipt = signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| PipelineError::SubmissionFailure(e.to_string()))?
            .await
            .map_err(|e| PipelineError::NodeError(e.to_string()))?
            .ok_or_else(|| PipelineError::SubmissionFailure(format!("transaction to {to:?} dropped")))?;

        let tx_hash = receipt.transaction_hash;
        debug!("Transaction {:?} from {:?} to {:?} mined", tx_hash, from.address(), to);
        if receipt.status != Some(U64::one()) {
            return Err(PipelineError::SubmissionFailure(format!("transaction {tx_hash:?} reverted")));
        }
        Ok(tx_hash)
    }
}

pub async fn is_deployed<N: Node + ?Sized>(node: &N, address: Address) -> Result<bool, PipelineError> {
    Ok(!node.get_code(address).await?.is_empty())
}

/// Entry point nonce for `sender` under key zero.
pub async fn get_nonce<N: Node + ?Sized>(
    node: &N,
    entry_point: Address,
    sender: Address,
) -> Result<U256, PipelineError> {
    let data = EntryPointCall::GetNonce {
        sender,
        key: U256::zero(),
    }
    .encode();
    let ret = node.call(entry_point, data).await?;
    codec::decode_uint(&ret).map_err(|e| PipelineError::NodeError(format!("getNonce: {e}")))
}

/// Reads `start`, `confirms` and `newOwner` of a recovery request.
pub async fn read_recovery<N: Node + ?Sized>(
    node: &N,
    account: Address,
    id: H256,
) -> Result<RecoveryStatus, PipelineError> {
    let decode_err = |e: CodecError| PipelineError::NodeError(format!("recovery {id:?}: {e}"));

    let start = node.call(account, AccountCall::RecoveryStart { id }.encode()).await?;
    let confirms = node.call(account, AccountCall::RecoveryConfirms { id }.encode()).await?;
    let new_owner = node.call(account, AccountCall::RecoveryNewOwner { id }.encode()).await?;

    let status = RecoveryStatus {
        start: codec::decode_uint(&start).map_err(decode_err)?,
        confirms: codec::decode_uint(&confirms).map_err(decode_err)?,
        new_owner: codec::decode_address(&new_owner).map_err(decode_err)?,
    };
    debug!("Recovery {:?} on {:?}: {:?}", id, account, status);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use ethers::abi::Token;

    use super::*;
    use crate::codec::encode_return;

    #[tokio::test]
    async fn read_recovery_decodes_all_three_fields() {
        let account = Address::repeat_byte(0xac);
        let id = H256::repeat_byte(0x1d);
        let new_owner = Address::repeat_byte(0x0e);

        let mut node = MockNode::new();
        node.expect_call().times(3).returning(move |to, data| {
            assert_eq!(to, account);
            let ret = match AccountCall::decode(&data).unwrap() {
                AccountCall::RecoveryStart { .. } => Token::Uint(U256::from(1_700_000_000u64)),
                AccountCall::RecoveryConfirms { .. } => Token::Uint(U256::from(2)),
                AccountCall::RecoveryNewOwner { .. } => Token::Address(new_owner),
                other => panic!("unexpected call {other:?}"),
            };
            Ok(encode_return(&[ret]))
        });

        let status = read_recovery(&node, account, id).await.unwrap();
        assert_eq!(status.start, U256::from(1_700_000_000u64));
        assert_eq!(status.confirms, U256::from(2));
        assert_eq!(status.new_owner, new_owner);
    }

    #[tokio::test]
    async fn empty_code_means_not_deployed() {
        let mut node = MockNode::new();
        node.expect_get_code().returning(|_| Ok(Bytes::new()));
        assert!(!is_deployed(&node, Address::zero()).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_nonce_is_a_node_error() {
        let mut node = MockNode::new();
        node.expect_call().returning(|_, _| Ok(Bytes::from(vec![1, 2])));
        let err = get_nonce(&node, Address::zero(), Address::zero()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NodeError(_)));
    }
}
