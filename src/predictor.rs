// src/predictor.rs
use std::sync::Arc;

use ethers::abi::{self, Token};
use ethers::types::{Address, H256};
use ethers::utils::{get_create2_address, keccak256};
use tracing::debug;

use crate::codec::{self, FactoryCall};
use crate::error::PipelineError;
use crate::node::Node;

/// Counterfactual account addresses, asked of the factory itself.
pub struct AddressPredictor<N> {
    node: Arc<N>,
}

impl<N: Node> AddressPredictor<N> {
    pub fn new(node: Arc<N>) -> Self {
        Self { node }
    }

    pub async fn predict(
        &self,
        factory: Address,
        entry_point: Address,
        owner: Address,
        salt: H256,
    ) -> Result<Address, PipelineError> {
        let data = FactoryCall::GetAddress {
            entry_point,
            owner,
            salt,
        }
        .encode();
        let ret = self.node.call(factory, data).await?;
        let predicted = codec::decode_address(&ret)
            .map_err(|e| PipelineError::NodeError(format!("getAddress on {factory:?}: {e}")))?;

        if predicted.is_zero() {
            return Err(PipelineError::NodeError(format!(
                "factory {factory:?} predicted the zero address"
            )));
        }

        debug!("Predicted account {:?} for owner {:?}", predicted, owner);
        Ok(predicted)
    }
}

/// CREATE2 address of an account whose constructor arguments are
/// `(entry_point, owner)`, deployed by `factory` with `salt`. `code_id`
/// stands in for the creation bytecode.
pub fn create2_account_address(
    factory: Address,
    code_id: &[u8],
    entry_point: Address,
    owner: Address,
    salt: H256,
) -> Address {
    let mut init_code = keccak256(code_id).to_vec();
    init_code.extend(abi::encode(&[Token::Address(entry_point), Token::Address(owner)]));
    get_create2_address(factory, salt.as_bytes(), init_code)
}
