// src/config.rs
use std::time::Duration;

use clap::Args;
use ethers::types::Address;

use crate::builder::{DEFAULT_GAS_MARGIN, DEFAULT_PRIORITY_FEE_DIVISOR};
use crate::error::PipelineError;
use crate::tracker::{DEFAULT_RECEIPT_ATTEMPTS, DEFAULT_RECEIPT_INTERVAL};

/// Everything a pipeline needs to reach the relay and the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub bundler_url: String,
    /// Node endpoint. Read-only calls go to the bundler when unset.
    pub rpc_url: Option<String>,
    pub entry_point: Address,
    pub chain_id: u64,
    pub disposable_factory: Option<Address>,
    pub account_factory: Option<Address>,
    pub policy_id: String,
    pub gas_margin: u64,
    pub priority_fee_divisor: u64,
    pub receipt_attempts: u32,
    pub receipt_interval: Duration,
    pub verify_hash_on_chain: bool,
}

impl PipelineConfig {
    pub fn new(bundler_url: impl Into<String>, entry_point: Address, chain_id: u64) -> Self {
        Self {
            bundler_url: bundler_url.into(),
            rpc_url: None,
            entry_point,
            chain_id,
            disposable_factory: None,
            account_factory: None,
            policy_id: String::new(),
            gas_margin: DEFAULT_GAS_MARGIN,
            priority_fee_divisor: DEFAULT_PRIORITY_FEE_DIVISOR,
            receipt_attempts: DEFAULT_RECEIPT_ATTEMPTS,
            receipt_interval: DEFAULT_RECEIPT_INTERVAL,
            verify_hash_on_chain: false,
        }
    }

    pub fn rpc_url(&self) -> &str {
        self.rpc_url.as_deref().unwrap_or(&self.bundler_url)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.entry_point.is_zero() {
            return Err(PipelineError::InvalidConfig("entry point must be set".to_string()));
        }
        if self.receipt_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "receipt attempts must be at least 1".to_string(),
            ));
        }
        if self.priority_fee_divisor == 0 {
            return Err(PipelineError::InvalidConfig(
                "priority fee divisor must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Bundler JSON-RPC endpoint, also serving paymaster methods
    #[clap(long, env = "BUNDLER_URL")]
    pub bundler_url: String,

    /// Node JSON-RPC endpoint, defaults to the bundler
    #[clap(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    #[clap(long, env = "ENTRY_POINT")]
    pub entry_point: Address,

    #[clap(long, env = "CHAIN_ID")]
    pub chain_id: u64,

    #[clap(long, env = "DISPOSABLE_FACTORY")]
    pub disposable_factory: Option<Address>,

    #[clap(long, env = "ACCOUNT_FACTORY")]
    pub account_factory: Option<Address>,

    /// Sponsorship policy id passed to the paymaster
    #[clap(long, env = "POLICY_ID", default_value = "")]
    pub policy_id: String,

    #[clap(long, env = "GAS_MARGIN", default_value_t = DEFAULT_GAS_MARGIN)]
    pub gas_margin: u64,

    #[clap(long, env = "PRIORITY_FEE_DIVISOR", default_value_t = DEFAULT_PRIORITY_FEE_DIVISOR)]
    pub priority_fee_divisor: u64,

    #[clap(long, env = "RECEIPT_ATTEMPTS", default_value_t = DEFAULT_RECEIPT_ATTEMPTS)]
    pub receipt_attempts: u32,

    #[clap(long, env = "RECEIPT_INTERVAL_MS", default_value_t = 1500)]
    pub receipt_interval_ms: u64,

    /// Cross-check the operation hash against the entry point before signing
    #[clap(long, env = "VERIFY_HASH_ON_CHAIN")]
    pub verify_hash_on_chain: bool,
}

impl From<ConfigArgs> for PipelineConfig {
    fn from(args: ConfigArgs) -> Self {
        Self {
            bundler_url: args.bundler_url,
            rpc_url: args.rpc_url,
            entry_point: args.entry_point,
            chain_id: args.chain_id,
            disposable_factory: args.disposable_factory,
            account_factory: args.account_factory,
            policy_id: args.policy_id,
            gas_margin: args.gas_margin,
            priority_fee_divisor: args.priority_fee_divisor,
            receipt_attempts: args.receipt_attempts,
            receipt_interval: Duration::from_millis(args.receipt_interval_ms),
            verify_hash_on_chain: args.verify_hash_on_chain,
        }
    }
}
