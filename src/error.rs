// src/error.rs
use ethers::types::{Address, Bytes, H256, U256};
use thiserror::Error;

/// Failures of the off-chain build, sponsor, sign, submit pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Gas estimation failed: {0}")]
    EstimationFailure(String),

    #[error("Sponsorship rejected: {0}")]
    SponsorshipRejected(String),

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Submission failed: {0}")]
    SubmissionFailure(String),

    #[error("Node error: {0}")]
    NodeError(String),

    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether running the same intent again can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EstimationFailure(_) | Self::NodeError(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Calldata shorter than a selector")]
    TooShort,

    #[error("Unknown selector 0x{}", hex::encode(.0))]
    UnknownSelector([u8; 4]),

    #[error("ABI decoding failed: {0}")]
    Abi(String),

    #[error("Unexpected return data")]
    UnexpectedTokens,
}

/// Reasons an account refuses a user operation during validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Signature was not produced by the account owner")]
    BadSignature,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Wrong nonce: expected {expected}, got {got}")]
    WrongNonce { expected: U256, got: U256 },

    #[error("Wallet already used")]
    AlreadyBurned,

    #[error("Disposable account only runs executeAndBurn, got {0}")]
    NotExecuteAndBurn(String),

    #[error("Account is frozen")]
    Frozen,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    #[error("{confirms} of {threshold} guardian confirmations")]
    QuorumUnmet { confirms: u64, threshold: u64 },

    #[error("delay runs until {ready_at}, now {now}")]
    DelayUnmet { ready_at: u64, now: u64 },
}

/// Failures of a call into one of the account state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Validation rejected: {0}")]
    ValidationRejected(#[from] ValidationError),

    #[error("Recovery not ready: {0}")]
    RecoveryNotReady(NotReady),

    #[error("Recovery {0:?} already executed")]
    RecoveryAlreadyExecuted(H256),

    #[error("Unknown recovery {0:?}")]
    UnknownRecovery(H256),

    #[error("Caller {0:?} is not authorized")]
    Unauthorized(Address),

    #[error("Invalid guardian configuration: {0}")]
    InvalidGuardianConfig(String),

    #[error("Invalid new owner")]
    InvalidNewOwner,

    #[error("Unsupported call: {0}")]
    UnsupportedCall(String),

    #[error("Call reverted: {0}")]
    CallReverted(Bytes),
}

/// Failures of the in-process entry point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryPointError {
    #[error("Sender {0:?} is not deployed and has no init code")]
    NotDeployed(Address),

    #[error("Sender {0:?} is already deployed")]
    AlreadyDeployed(Address),

    #[error("Unknown factory {0:?}")]
    UnknownFactory(Address),

    #[error("Init code deploys {got:?}, sender is {expected:?}")]
    InitCodeMismatch { expected: Address, got: Address },

    #[error("Nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: U256, got: U256 },

    #[error("No contract at {0:?}")]
    UnknownTarget(Address),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Account(#[from] AccountError),
}
