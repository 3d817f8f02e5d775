// src/rpc.rs
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error};

use crate::error::PipelineError;
use crate::types::{
    GasEstimate, PaymasterResponse, SponsorshipContext, UserOperation, UserOperationReceipt,
};

// Bundler and paymaster methods, as served by the relay
#[rpc(client)]
pub trait BundlerApi {
    #[method(name = "eth_estimateUserOperationGas")]
    async fn estimate_user_operation_gas(
        &self,
        user_op: UserOperation,
        entry_point: Address,
    ) -> jsonrpsee::core::RpcResult<GasEstimate>;

    #[method(name = "eth_gasPrice")]
    async fn gas_price(&self) -> jsonrpsee::core::RpcResult<U256>;

    /// Requests the paymaster to sponsor a user operation
    #[method(name = "pm_sponsorUserOperation")]
    async fn sponsor_user_operation(
        &self,
        user_op: UserOperation,
        entry_point: Address,
        context: SponsorshipContext,
    ) -> jsonrpsee::core::RpcResult<PaymasterResponse>;

    #[method(name = "eth_sendUserOperation")]
    async fn send_user_operation(&self, user_op: UserOperation, entry_point: Address) -> jsonrpsee::core::RpcResult<H256>;

    #[method(name = "eth_getUserOperationReceipt")]
    async fn get_user_operation_receipt(&self, user_op_hash: H256) -> jsonrpsee::core::RpcResult<Option<UserOperationReceipt>>;
}

/// What the pipeline needs from the relay. Every method maps its failure
/// onto the error kind of the pipeline step it serves.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    async fn estimate(&self, op: &UserOperation, entry_point: Address) -> Result<GasEstimate, PipelineError>;

    /// Current gas price.
    async fn fee_data(&self) -> Result<U256, PipelineError>;

    /// Returns the sponsor blob for `paymasterAndData`.
    async fn sponsor(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<Bytes, PipelineError>;

    /// Returns the operation id used for receipt tracking.
    async fn submit(&self, op: &UserOperation, entry_point: Address) -> Result<H256, PipelineError>;

    async fn receipt(&self, op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError>;
}

pub struct RelayClient {
    client: HttpClient,
}

impl RelayClient {
    pub fn new(bundler_url: &str) -> Result<Self, PipelineError> {
        let client = HttpClientBuilder::default()
            .build(bundler_url)
            .map_err(|e| PipelineError::InvalidConfig(format!("bundler url: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Relay for RelayClient {
    async fn estimate(&self, op: &UserOperation, entry_point: Address) -> Result<GasEstimate, PipelineError> {
        debug!("Requesting gas estimate for sender: {:?}", op.sender);
        self.client
            .estimate_user_operation_gas(op.clone(), entry_point)
            .await
            .map_err(|e| {
                error!("Gas estimation failed: {}", e);
                PipelineError::EstimationFailure(e.to_string())
            })
    }

    async fn fee_data(&self) -> Result<U256, PipelineError> {
        self.client
            .gas_price()
            .await
            .map_err(|e| PipelineError::EstimationFailure(format!("eth_gasPrice: {e}")))
    }

    async fn sponsor(
        &self,
        op: &UserOperation,
        entry_point: Address,
        policy_id: &str,
    ) -> Result<Bytes, PipelineError> {
        let context = SponsorshipContext {
            sponsorship_policy_id: policy_id.to_string(),
        };
        self.client
            .sponsor_user_operation(op.clone(), entry_point, context)
            .await
            .map(|response| response.paymaster_and_data)
            .map_err(|e| {
                error!("Sponsorship rejected for {:?}: {}", op.sender, e);
                PipelineError::SponsorshipRejected(e.to_string())
            })
    }

    async fn submit(&self, op: &UserOperation, entry_point: Address) -> Result<H256, PipelineError> {
        self.client
            .send_user_operation(op.clone(), entry_point)
            .await
            .map_err(|e| {
                error!("Relay refused operation from {:?}: {}", op.sender, e);
                PipelineError::SubmissionFailure(e.to_string())
            })
    }

    async fn receipt(&self, op_hash: H256) -> Result<Option<UserOperationReceipt>, PipelineError> {
        self.client
            .get_user_operation_receipt(op_hash)
            .await
            .map_err(|e| PipelineError::NodeError(format!("eth_getUserOperationReceipt: {e}")))
    }
}
