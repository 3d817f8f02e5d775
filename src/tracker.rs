// src/tracker.rs
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::rpc::Relay;
use crate::signer::SignedOperation;

pub const DEFAULT_RECEIPT_ATTEMPTS: u32 = 20;
pub const DEFAULT_RECEIPT_INTERVAL: Duration = Duration::from_millis(1500);

/// Where a submitted operation stands once polling stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Included on chain. `success` is false when the account's call
    /// reverted, or when the relay didn't report it.
    Confirmed { op_hash: H256, tx_hash: H256, success: bool },
    /// Submitted, no receipt within the polling budget. Poll again later.
    Pending(H256),
    /// The caller stopped polling.
    Cancelled(H256),
}

impl TrackOutcome {
    pub fn op_hash(&self) -> H256 {
        match self {
            Self::Confirmed { op_hash, .. } | Self::Pending(op_hash) | Self::Cancelled(op_hash) => *op_hash,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            Self::Confirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// Whether the included operation succeeded; `None` until confirmed.
    pub fn success(&self) -> Option<bool> {
        match self {
            Self::Confirmed { success, .. } => Some(*success),
            _ => None,
        }
    }
}

pub struct ReceiptTracker<R> {
    relay: Arc<R>,
    entry_point: Address,
    attempts: u32,
    interval: Duration,
}

impl<R: Relay> ReceiptTracker<R> {
    pub fn new(relay: Arc<R>, entry_point: Address, attempts: u32, interval: Duration) -> Self {
        Self {
            relay,
            entry_point,
            attempts,
            interval,
        }
    }

    /// Hands the signed operation to the relay and returns its operation id.
    pub async fn submit(&self, signed: &SignedOperation) -> Result<H256, PipelineError> {
        let op = signed.operation();
        let op_hash = self.relay.submit(op, self.entry_point).await.map_err(|e| match e {
            PipelineError::SubmissionFailure(_) => e,
            other => PipelineError::SubmissionFailure(other.to_string()),
        })?;

        if op_hash != signed.hash() {
            warn!(
                "Relay returned operation id {:?}, locally computed {:?}",
                op_hash,
                signed.hash()
            );
        }
        info!("Submitted operation {:?} for sender {:?}", op_hash, op.sender);
        Ok(op_hash)
    }

    /// Polls for a receipt at a fixed interval, at most `attempts` times.
    /// Receipt queries have no side effects, so this can be re-run with the
    /// same id at any time.
    pub async fn track(&self, op_hash: H256, cancel: &CancellationToken) -> TrackOutcome {
        for attempt in 1..=self.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stopped tracking {:?} after {} attempts", op_hash, attempt - 1);
                    return TrackOutcome::Cancelled(op_hash);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.relay.receipt(op_hash).await {
                Ok(Some(receipt)) => match receipt.transaction_hash() {
                    Some(tx_hash) => {
                        let success = receipt.success.unwrap_or(false);
                        if success {
                            info!("Operation {:?} settled in transaction {:?}", op_hash, tx_hash);
                        } else {
                            warn!("Operation {:?} included in {:?} but did not succeed", op_hash, tx_hash);
                        }
                        return TrackOutcome::Confirmed {
                            op_hash,
                            tx_hash,
                            success,
                        };
                    }
                    None => debug!("Receipt for {:?} has no transaction yet", op_hash),
                },
                Ok(None) => debug!("No receipt for {:?} (attempt {}/{})", op_hash, attempt, self.attempts),
                Err(e) => warn!("Receipt query for {:?} failed (attempt {}): {}", op_hash, attempt, e),
            }
        }

        warn!("Operation {:?} not confirmed after {} attempts", op_hash, self.attempts);
        TrackOutcome::Pending(op_hash)
    }
}
