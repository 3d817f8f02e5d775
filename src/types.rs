// src/types.rs
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer, Serialize};

/// ERC-4337 (entry point v0.6) user operation, as exchanged with the bundler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Factory address encoded in the first 20 bytes of `init_code`, if any.
    pub fn factory(&self) -> Option<Address> {
        (self.init_code.len() >= 20).then(|| Address::from_slice(&self.init_code[..20]))
    }

    /// Paymaster address encoded in the first 20 bytes of `paymaster_and_data`, if any.
    pub fn paymaster(&self) -> Option<Address> {
        (self.paymaster_and_data.len() >= 20)
            .then(|| Address::from_slice(&self.paymaster_and_data[..20]))
    }

    /// Upper bound on what the operation can cost, `None` on overflow.
    pub fn max_gas_cost(&self) -> Option<U256> {
        self.call_gas_limit
            .checked_add(self.verification_gas_limit)
            .and_then(|sum| sum.checked_add(self.pre_verification_gas))
            .and_then(|gas| gas.checked_mul(self.max_fee_per_gas))
    }
}

/// A call an account performs once an operation validates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

/// Which account an intent runs through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    /// An account that already exists on chain.
    Existing(Address),
    /// A counterfactual account deployed by `factory` for `owner` and `salt`.
    Fresh {
        factory: Address,
        owner: Address,
        salt: H256,
    },
}

/// What the account should do once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deploy only, empty call data.
    None,
    Execute(Call),
    ExecuteAndBurn(Call),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub account: AccountRef,
    pub action: Action,
}

/// Response of `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    #[serde(deserialize_with = "deserialize_quantity")]
    pub call_gas_limit: U256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub verification_gas_limit: U256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub pre_verification_gas: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Third parameter of `pm_sponsorUserOperation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipContext {
    pub sponsorship_policy_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterResponse {
    pub paymaster_and_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub transaction_hash: H256,
}

/// Response of `eth_getUserOperationReceipt`. Bundlers disagree on the extra
/// fields, only the settlement transaction hash is relied upon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    #[serde(default)]
    pub user_op_hash: Option<H256>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub receipt: Option<SettlementReceipt>,
}

impl UserOperationReceipt {
    pub fn transaction_hash(&self) -> Option<H256> {
        self.receipt.as_ref().map(|r| r.transaction_hash)
    }
}

/// Recovery request fields as read back from a guardian account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStatus {
    pub start: U256,
    pub confirms: U256,
    pub new_owner: Address,
}

/// Parses a JSON-RPC quantity, either `0x`-prefixed hex or decimal.
pub fn parse_quantity(value: &str) -> Result<U256, String> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{value}: {e:?}")),
        None => U256::from_dec_str(value).map_err(|e| format!("{value}: {e:?}")),
    }
}

pub fn deserialize_quantity<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quantity {
        Number(u64),
        Text(String),
    }

    match Quantity::deserialize(deserializer)? {
        Quantity::Number(n) => Ok(U256::from(n)),
        Quantity::Text(s) => parse_quantity(&s).map_err(serde::de::Error::custom),
    }
}
