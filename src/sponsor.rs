// src/sponsor.rs
use std::sync::Arc;

use ethers::types::Address;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::rpc::Relay;
use crate::types::UserOperation;

/// An operation with gas, fees and sponsor data final. It can no longer be
/// modified, only signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsoredOperation {
    op: UserOperation,
}

impl SponsoredOperation {
    pub(crate) fn new(op: UserOperation) -> Self {
        Self { op }
    }

    pub fn operation(&self) -> &UserOperation {
        &self.op
    }

    pub(crate) fn into_operation(self) -> UserOperation {
        self.op
    }
}

pub struct SponsorClient<R> {
    relay: Arc<R>,
    entry_point: Address,
    policy_id: String,
}

impl<R: Relay> SponsorClient<R> {
    pub fn new(relay: Arc<R>, entry_point: Address, policy_id: impl Into<String>) -> Self {
        Self {
            relay,
            entry_point,
            policy_id: policy_id.into(),
        }
    }

    /// Asks the paymaster to sponsor `op` and copies its answer into
    /// `paymasterAndData`. No other field changes.
    pub async fn sponsor(&self, mut op: UserOperation) -> Result<SponsoredOperation, PipelineError> {
        if op.verification_gas_limit.is_zero() || op.pre_verification_gas.is_zero() {
            return Err(PipelineError::InvalidIntent(
                "operation must be gas-populated before sponsorship".to_string(),
            ));
        }
        if let Some(max_cost) = op.max_gas_cost() {
            debug!("Requesting sponsorship of up to {} wei for {:?}", max_cost, op.sender);
        }

        let paymaster_and_data = self.relay.sponsor(&op, self.entry_point, &self.policy_id).await?;
        if paymaster_and_data.len() < 20 {
            return Err(PipelineError::SponsorshipRejected(format!(
                "paymasterAndData too short ({} bytes)",
                paymaster_and_data.len()
            )));
        }

        op.paymaster_and_data = paymaster_and_data;
        info!(
            "Operation for {:?} sponsored by paymaster {:?} under policy {}",
            op.sender,
            op.paymaster(),
            self.policy_id
        );
        Ok(SponsoredOperation::new(op))
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::{Bytes, U256};
    use mockall::predicate::eq;

    use super::*;
    use crate::rpc::MockRelay;

    fn populated_op() -> UserOperation {
        UserOperation {
            sender: Address::repeat_byte(0x01),
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(70_000),
            verification_gas_limit: U256::from(150_000),
            pre_verification_gas: U256::from(65_000),
            max_fee_per_gas: U256::from(100_000_000u64),
            max_priority_fee_per_gas: U256::from(10_000_000u64),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sponsor_data_is_copied_verbatim_and_nothing_else_changes() {
        let blob = Bytes::from([&[0x99u8; 20][..], &[0x01u8; 64][..]].concat());
        let returned = blob.clone();
        let mut relay = MockRelay::new();
        relay
            .expect_sponsor()
            .withf(|_, ep, policy| *ep == Address::repeat_byte(0xee) && policy == "sp_test")
            .times(1)
            .returning(move |_, _, _| Ok(returned.clone()));

        let client = SponsorClient::new(Arc::new(relay), Address::repeat_byte(0xee), "sp_test");
        let sponsored = client.sponsor(populated_op()).await.unwrap();

        let mut expected = populated_op();
        expected.paymaster_and_data = blob;
        assert_eq!(sponsored.operation(), &expected);
        assert_eq!(sponsored.operation().paymaster(), Some(Address::repeat_byte(0x99)));
    }

    #[tokio::test]
    async fn rejection_is_surfaced_as_sponsorship_rejected() {
        let mut relay = MockRelay::new();
        relay
            .expect_sponsor()
            .returning(|_, _, _| Err(PipelineError::SponsorshipRejected("policy exhausted".into())));

        let client = SponsorClient::new(Arc::new(relay), Address::zero(), "sp_test");
        let err = client.sponsor(populated_op()).await.unwrap_err();
        assert_eq!(err, PipelineError::SponsorshipRejected("policy exhausted".into()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unpopulated_operation_is_not_sent() {
        let mut relay = MockRelay::new();
        relay.expect_sponsor().never();

        let client = SponsorClient::new(Arc::new(relay), Address::zero(), "sp_test");
        let err = client.sponsor(UserOperation::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidIntent(_)));
    }

    #[tokio::test]
    async fn truncated_sponsor_data_is_rejected() {
        let mut relay = MockRelay::new();
        relay
            .expect_sponsor()
            .with(mockall::predicate::always(), eq(Address::zero()), mockall::predicate::always())
            .returning(|_, _, _| Ok(Bytes::from(vec![0x01; 4])));

        let client = SponsorClient::new(Arc::new(relay), Address::zero(), "sp_test");
        let err = client.sponsor(populated_op()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SponsorshipRejected(_)));
    }
}
