// src/signer.rs
use std::sync::Arc;

use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};
use tracing::{debug, error};

use crate::codec::{self, EntryPointCall};
use crate::error::{PipelineError, ValidationError};
use crate::node::Node;
use crate::sponsor::SponsoredOperation;
use crate::types::UserOperation;

/// Canonical v0.6 operation hash, scoped to an entry point and chain.
/// The signature field does not take part.
pub fn user_op_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let packed_hash = keccak256(codec::pack_for_hash(op));
    keccak256(abi::encode(&[
        Token::FixedBytes(packed_hash.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]))
    .into()
}

/// Recovers the address whose personal-message signature over `hash` is `signature`.
pub fn recover_signer(hash: H256, signature: &[u8]) -> Result<Address, ValidationError> {
    let signature = Signature::try_from(signature)
        .map_err(|e| ValidationError::MalformedSignature(e.to_string()))?;
    signature
        .recover(hash_message(hash))
        .map_err(|e| ValidationError::MalformedSignature(e.to_string()))
}

/// An operation whose signature binds every other field. Read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOperation {
    op: UserOperation,
    hash: H256,
}

impl SignedOperation {
    pub fn operation(&self) -> &UserOperation {
        &self.op
    }

    /// Hash the signature was produced over.
    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn into_operation(self) -> UserOperation {
        self.op
    }
}

pub struct OperationSigner<N> {
    node: Arc<N>,
    entry_point: Address,
    chain_id: u64,
    verify_on_chain: bool,
}

impl<N: Node> OperationSigner<N> {
    pub fn new(node: Arc<N>, entry_point: Address, chain_id: u64, verify_on_chain: bool) -> Self {
        Self {
            node,
            entry_point,
            chain_id,
            verify_on_chain,
        }
    }

    /// Signs a sponsored operation with the owner key. Taking the sponsored
    /// value by move keeps gas, fees and sponsor data fixed from here on.
    pub async fn sign(
        &self,
        sponsored: SponsoredOperation,
        owner: &LocalWallet,
    ) -> Result<SignedOperation, PipelineError> {
        let mut op = sponsored.into_operation();
        let hash = self.operation_hash(&op).await?;

        let signature = owner.sign_message(hash.as_bytes()).await.map_err(|e| {
            error!("Failed to sign operation {:?}: {}", hash, e);
            PipelineError::SigningFailure(e.to_string())
        })?;
        op.signature = Bytes::from(signature.to_vec());

        debug!("Signed operation {:?} for sender {:?}", hash, op.sender);
        Ok(SignedOperation { op, hash })
    }

    async fn operation_hash(&self, op: &UserOperation) -> Result<H256, PipelineError> {
        let local = user_op_hash(op, self.entry_point, self.chain_id);
        if !self.verify_on_chain {
            return Ok(local);
        }

        let ret = self
            .node
            .call(self.entry_point, EntryPointCall::GetUserOpHash(op.clone()).encode())
            .await
            .map_err(|e| PipelineError::SigningFailure(format!("getUserOpHash: {e}")))?;
        let remote = codec::decode_h256(&ret)
            .map_err(|e| PipelineError::SigningFailure(format!("getUserOpHash: {e}")))?;

        if remote != local {
            return Err(PipelineError::SigningFailure(format!(
                "hash mismatch: local {local:?}, entry point {remote:?}"
            )));
        }
        Ok(local)
    }
}
