// src/builder.rs
use std::sync::Arc;

use ethers::types::{Address, Bytes, U256};
use tracing::{debug, info, warn};

use crate::codec::{self, AccountCall};
use crate::error::PipelineError;
use crate::node::{self, Node};
use crate::predictor::AddressPredictor;
use crate::rpc::Relay;
use crate::types::{AccountRef, Action, GasEstimate, GasFees, Intent, UserOperation};

/// Added to every estimated gas field to absorb estimation noise.
pub const DEFAULT_GAS_MARGIN: u64 = 20_000;

/// Priority fee is the gas price divided by this.
pub const DEFAULT_PRIORITY_FEE_DIVISOR: u64 = 10;

/// Turns an intent into a gas- and fee-populated user operation.
pub struct OperationBuilder<R, N> {
    relay: Arc<R>,
    node: Arc<N>,
    predictor: AddressPredictor<N>,
    entry_point: Address,
    gas_margin: U256,
    priority_fee_divisor: U256,
}

impl<R: Relay, N: Node> OperationBuilder<R, N> {
    pub fn new(relay: Arc<R>, node: Arc<N>, entry_point: Address) -> Self {
        Self {
            predictor: AddressPredictor::new(Arc::clone(&node)),
            relay,
            node,
            entry_point,
            gas_margin: U256::from(DEFAULT_GAS_MARGIN),
            priority_fee_divisor: U256::from(DEFAULT_PRIORITY_FEE_DIVISOR),
        }
    }

    pub fn with_gas_margin(mut self, gas_margin: u64) -> Self {
        self.gas_margin = U256::from(gas_margin);
        self
    }

    pub fn with_priority_fee_divisor(mut self, divisor: u64) -> Self {
        self.priority_fee_divisor = U256::from(divisor.max(1));
        self
    }

    pub async fn build(&self, intent: &Intent) -> Result<UserOperation, PipelineError> {
        let mut op = self.draft(intent).await?;

        let estimate = self.relay.estimate(&op, self.entry_point).await.map_err(|e| match e {
            PipelineError::EstimationFailure(_) => e,
            other => PipelineError::EstimationFailure(other.to_string()),
        })?;
        let fees = self.fee_data().await?;
        self.apply_gas(&mut op, &estimate, &fees)?;

        info!(
            "Built operation for {:?}: nonce {}, callGas {}, verificationGas {}, preVerificationGas {}, maxFee {}",
            op.sender,
            op.nonce,
            op.call_gas_limit,
            op.verification_gas_limit,
            op.pre_verification_gas,
            op.max_fee_per_gas
        );
        Ok(op)
    }

    /// Operation with sender, nonce, init code and call data set and every
    /// gas, fee, sponsor and signature field empty.
    pub async fn draft(&self, intent: &Intent) -> Result<UserOperation, PipelineError> {
        let call_data = match &intent.action {
            Action::None => Bytes::new(),
            Action::Execute(call) => AccountCall::Execute(call.clone()).encode(),
            Action::ExecuteAndBurn(call) => AccountCall::ExecuteAndBurn(call.clone()).encode(),
        };

        let (sender, init_code, nonce) = match &intent.account {
            AccountRef::Fresh {
                factory,
                owner,
                salt,
            } => {
                let sender = self
                    .predictor
                    .predict(*factory, self.entry_point, *owner, *salt)
                    .await?;
                if node::is_deployed(self.node.as_ref(), sender).await? {
                    info!("Account {:?} already deployed, dropping init code", sender);
                    let nonce = node::get_nonce(self.node.as_ref(), self.entry_point, sender).await?;
                    (sender, Bytes::new(), nonce)
                } else {
                    let init_code = codec::pack_init_code(*factory, self.entry_point, *owner, *salt);
                    (sender, init_code, U256::zero())
                }
            }
            AccountRef::Existing(sender) => {
                if !node::is_deployed(self.node.as_ref(), *sender).await? {
                    return Err(PipelineError::InvalidIntent(format!(
                        "account {sender:?} is not deployed"
                    )));
                }
                let nonce = node::get_nonce(self.node.as_ref(), self.entry_point, *sender).await?;
                (*sender, Bytes::new(), nonce)
            }
        };

        debug!("Drafted operation for {:?} with nonce {}", sender, nonce);
        Ok(UserOperation {
            sender,
            nonce,
            init_code,
            call_data,
            ..Default::default()
        })
    }

    /// Gas price from the relay, the node as fallback.
    pub async fn fee_data(&self) -> Result<GasFees, PipelineError> {
        let gas_price = match self.relay.fee_data().await {
            Ok(price) => price,
            Err(e) => {
                warn!("Relay fee data unavailable ({}), asking the node", e);
                self.node
                    .gas_price()
                    .await
                    .map_err(|e| PipelineError::EstimationFailure(format!("fee data: {e}")))?
            }
        };

        Ok(GasFees {
            max_fee_per_gas: gas_price,
            max_priority_fee_per_gas: gas_price / self.priority_fee_divisor,
        })
    }

    fn apply_gas(
        &self,
        op: &mut UserOperation,
        estimate: &GasEstimate,
        fees: &GasFees,
    ) -> Result<(), PipelineError> {
        let with_margin = |value: U256, field: &str| {
            value
                .checked_add(self.gas_margin)
                .ok_or_else(|| PipelineError::EstimationFailure(format!("{field} overflows")))
        };

        op.call_gas_limit = with_margin(estimate.call_gas_limit, "callGasLimit")?;
        op.verification_gas_limit = with_margin(estimate.verification_gas_limit, "verificationGasLimit")?;
        op.pre_verification_gas = with_margin(estimate.pre_verification_gas, "preVerificationGas")?;
        op.max_fee_per_gas = fees.max_fee_per_gas;
        op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
        Ok(())
    }
}
