// src/account/guardian.rs
use std::collections::{BTreeSet, HashMap};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use tracing::{debug, info, warn};

use super::{check_owner_signature, BlockEnv, CallExecutor, CallOutcome, SmartAccount};
use crate::codec::{encode_return, recovery_id, AccountCall};
use crate::error::{AccountError, NotReady, ValidationError};
use crate::types::{Call, UserOperation};

pub const MAX_GUARDIANS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecoveryRequest {
    start: u64,
    new_owner: Address,
    confirmers: BTreeSet<Address>,
    executed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    /// The caller's confirmation was counted.
    Confirmed { id: H256, confirms: u64 },
    /// The caller had already confirmed this request.
    AlreadyConfirmed { id: H256, confirms: u64 },
    /// The caller is not a guardian; nothing changed.
    Ignored,
}

/// Persistent account with owner rotation by guardian quorum after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianAccount {
    address: Address,
    entry_point: Address,
    owner: Address,
    guardians: Vec<Address>,
    threshold: u64,
    delay_seconds: u64,
    frozen: bool,
    recoveries: HashMap<H256, RecoveryRequest>,
}

impl GuardianAccount {
    pub fn new(address: Address, entry_point: Address, owner: Address) -> Self {
        Self {
            address,
            entry_point,
            owner,
            guardians: Vec::new(),
            threshold: 0,
            delay_seconds: 0,
            frozen: false,
            recoveries: HashMap::new(),
        }
    }

    pub fn guardians(&self) -> &[Address] {
        &self.guardians
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn delay_seconds(&self) -> u64 {
        self.delay_seconds
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_guardian(&self, who: Address) -> bool {
        self.guardians.contains(&who)
    }

    pub fn recovery_start(&self, id: H256) -> u64 {
        self.recoveries.get(&id).map_or(0, |r| r.start)
    }

    pub fn recovery_new_owner(&self, id: H256) -> Address {
        self.recoveries.get(&id).map_or_else(Address::zero, |r| r.new_owner)
    }

    /// Confirmations for `id` from guardians in the current set.
    pub fn confirms(&self, id: H256) -> u64 {
        self.recoveries.get(&id).map_or(0, |r| {
            r.confirmers.iter().filter(|g| self.is_guardian(**g)).count() as u64
        })
    }

    /// Replaces guardians, threshold and delay in one step. `by_self` calls
    /// must come from the account itself; plain calls also accept the owner.
    pub fn configure_guardians(
        &mut self,
        caller: Address,
        guardians: Vec<Address>,
        threshold: U256,
        delay_seconds: U256,
        by_self: bool,
    ) -> Result<(), AccountError> {
        self.authorize_owner(caller, by_self)?;

        if guardians.len() > MAX_GUARDIANS {
            return Err(AccountError::InvalidGuardianConfig(format!(
                "{} guardians, at most {} allowed",
                guardians.len(),
                MAX_GUARDIANS
            )));
        }
        if threshold.is_zero() {
            return Err(AccountError::InvalidGuardianConfig("threshold must be at least 1".to_string()));
        }
        if threshold > U256::from(guardians.len()) {
            return Err(AccountError::InvalidGuardianConfig(format!(
                "threshold {} exceeds {} guardians",
                threshold,
                guardians.len()
            )));
        }
        if delay_seconds > U256::from(u64::MAX) {
            return Err(AccountError::InvalidGuardianConfig("delay out of range".to_string()));
        }
        let mut seen = BTreeSet::new();
        for guardian in &guardians {
            if guardian.is_zero() {
                return Err(AccountError::InvalidGuardianConfig("zero address guardian".to_string()));
            }
            if !seen.insert(*guardian) {
                return Err(AccountError::InvalidGuardianConfig(format!("duplicate guardian {:?}", guardian)));
            }
        }

        self.threshold = threshold.as_u64();
        self.delay_seconds = delay_seconds.as_u64();
        self.guardians = guardians;
        info!(
            "Account {:?} guardians set: {} of {}, delay {}s",
            self.address,
            self.threshold,
            self.guardians.len(),
            self.delay_seconds
        );
        Ok(())
    }

    pub fn set_frozen(&mut self, caller: Address, frozen: bool, by_self: bool) -> Result<(), AccountError> {
        self.authorize_owner(caller, by_self)?;
        self.frozen = frozen;
        info!("Account {:?} frozen = {}", self.address, frozen);
        Ok(())
    }

    /// Records `caller`'s vote for `new_owner`. The first vote for a given
    /// new owner starts its delay clock.
    pub fn propose_recovery(
        &mut self,
        caller: Address,
        new_owner: Address,
        env: &BlockEnv,
    ) -> Result<ProposalOutcome, AccountError> {
        if new_owner.is_zero() {
            return Err(AccountError::InvalidNewOwner);
        }
        if !self.is_guardian(caller) {
            debug!("Ignoring recovery proposal from non-guardian {:?}", caller);
            return Ok(ProposalOutcome::Ignored);
        }

        let id = recovery_id(self.address, env.chain_id, new_owner);
        let request = self.recoveries.entry(id).or_insert_with(|| RecoveryRequest {
            start: env.timestamp,
            new_owner,
            confirmers: BTreeSet::new(),
            executed: false,
        });
        if request.executed {
            return Err(AccountError::RecoveryAlreadyExecuted(id));
        }
        let counted = request.confirmers.insert(caller);

        let confirms = self.confirms(id);
        if !counted {
            return Ok(ProposalOutcome::AlreadyConfirmed { id, confirms });
        }
        info!(
            "Guardian {:?} confirmed recovery {:?} of {:?} ({}/{})",
            caller, id, self.address, confirms, self.threshold
        );
        Ok(ProposalOutcome::Confirmed { id, confirms })
    }

    /// Rotates the owner once quorum is met and the delay has passed.
    /// Callable by anyone, at most once per id.
    pub fn execute_recovery(&mut self, id: H256, env: &BlockEnv) -> Result<Address, AccountError> {
        let confirms = self.confirms(id);
        let threshold = self.threshold;
        let delay = self.delay_seconds;

        let request = self.recoveries.get_mut(&id).ok_or(AccountError::UnknownRecovery(id))?;
        if request.executed {
            return Err(AccountError::RecoveryAlreadyExecuted(id));
        }
        if threshold == 0 || confirms < threshold {
            return Err(AccountError::RecoveryNotReady(NotReady::QuorumUnmet { confirms, threshold }));
        }
        let ready_at = request.start.saturating_add(delay);
        if env.timestamp < ready_at {
            return Err(AccountError::RecoveryNotReady(NotReady::DelayUnmet {
                ready_at,
                now: env.timestamp,
            }));
        }

        request.executed = true;
        let new_owner = request.new_owner;
        info!("Account {:?} owner rotated {:?} -> {:?}", self.address, self.owner, new_owner);
        self.owner = new_owner;
        Ok(new_owner)
    }

    fn execute(
        &mut self,
        caller: Address,
        call: Call,
        env: &BlockEnv,
        executor: &mut dyn CallExecutor,
    ) -> Result<CallOutcome, AccountError> {
        if caller != self.entry_point && caller != self.owner && caller != self.address {
            return Err(AccountError::Unauthorized(caller));
        }
        if self.frozen {
            return Err(ValidationError::Frozen.into());
        }

        if call.to == self.address {
            let inner = AccountCall::decode(&call.data)
                .map_err(|e| AccountError::UnsupportedCall(e.to_string()))?;
            debug!("Self-call {} on {:?}", inner.signature(), self.address);
            return self.handle_call(self.address, inner, env, executor);
        }

        executor
            .call(self.address, call.to, call.value, &call.data)
            .map(CallOutcome::ok)
            .map_err(|revert| {
                warn!("Call from {:?} to {:?} reverted", self.address, call.to);
                AccountError::CallReverted(revert)
            })
    }

    fn authorize_owner(&self, caller: Address, by_self: bool) -> Result<(), AccountError> {
        let allowed = caller == self.address || (!by_self && caller == self.owner);
        if allowed {
            Ok(())
        } else {
            Err(AccountError::Unauthorized(caller))
        }
    }
}

impl SmartAccount for GuardianAccount {
    fn address(&self) -> Address {
        self.address
    }

    fn owner(&self) -> Address {
        self.owner
    }

    fn validate_user_op(&self, op: &UserOperation, op_hash: H256) -> Result<(), ValidationError> {
        if self.frozen {
            return Err(ValidationError::Frozen);
        }
        check_owner_signature(self.owner, op_hash, &op.signature)
    }

    fn handle_call(
        &mut self,
        caller: Address,
        call: AccountCall,
        env: &BlockEnv,
        executor: &mut dyn CallExecutor,
    ) -> Result<CallOutcome, AccountError> {
        if let Some(ret) = self.read(&call) {
            return Ok(CallOutcome::ok(ret));
        }
        let empty = || CallOutcome::ok(Bytes::new());
        match call {
            AccountCall::Execute(call) => self.execute(caller, call, env, executor),
            AccountCall::ConfigureGuardians {
                guardians,
                threshold,
                delay_seconds,
                by_self,
            } => self
                .configure_guardians(caller, guardians, threshold, delay_seconds, by_self)
                .map(|_| empty()),
            AccountCall::SetFrozen { frozen, by_self } => self.set_frozen(caller, frozen, by_self).map(|_| empty()),
            AccountCall::ProposeRecovery { new_owner, by_self } => {
                if by_self && caller != self.address {
                    return Err(AccountError::Unauthorized(caller));
                }
                self.propose_recovery(caller, new_owner, env).map(|_| empty())
            }
            AccountCall::ExecuteRecovery { id } => self.execute_recovery(id, env).map(|_| empty()),
            other => Err(AccountError::UnsupportedCall(other.signature().to_string())),
        }
    }

    fn read(&self, call: &AccountCall) -> Option<Bytes> {
        let token = match call {
            AccountCall::RecoveryStart { id } => Token::Uint(U256::from(self.recovery_start(*id))),
            AccountCall::RecoveryConfirms { id } => Token::Uint(U256::from(self.confirms(*id))),
            AccountCall::RecoveryNewOwner { id } => Token::Address(self.recovery_new_owner(*id)),
            AccountCall::Owner => Token::Address(self.owner),
            _ => return None,
        };
        Some(encode_return(&[token]))
    }
}

#[cfg(test)]
mod tests {
    use ethers::core::rand::thread_rng;
    use ethers::signers::{LocalWallet, Signer};

    use super::*;
    use crate::codec::{decode_address, decode_uint};

    const ACCOUNT: Address = ethers::types::H160([0xac; 20]);
    const ENTRY_POINT: Address = ethers::types::H160([0xee; 20]);
    const OWNER: Address = ethers::types::H160([0x01; 20]);
    const G1: Address = ethers::types::H160([0x11; 20]);
    const G2: Address = ethers::types::H160([0x12; 20]);
    const G3: Address = ethers::types::H160([0x13; 20]);
    const X: Address = ethers::types::H160([0x58; 20]);
    const DAY: u64 = 24 * 3600;

    struct NoCalls;

    impl CallExecutor for NoCalls {
        fn call(&mut self, _: Address, _: Address, _: U256, _: &Bytes) -> Result<Bytes, Bytes> {
            Err(Bytes::from(b"no contracts here".to_vec()))
        }
    }

    fn env(timestamp: u64) -> BlockEnv {
        BlockEnv { timestamp, chain_id: 1 }
    }

    fn two_of_three(owner: Address) -> GuardianAccount {
        let mut account = GuardianAccount::new(ACCOUNT, ENTRY_POINT, owner);
        account
            .configure_guardians(owner, vec![G1, G2, G3], U256::from(2), U256::from(2 * DAY), false)
            .unwrap();
        account
    }

    async fn signed(wallet: &LocalWallet, hash: H256) -> UserOperation {
        let signature = wallet.sign_message(hash.as_bytes()).await.unwrap();
        UserOperation {
            sender: ACCOUNT,
            signature: Bytes::from(signature.to_vec()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn two_of_three_with_48h_delay() {
        let old = LocalWallet::new(&mut thread_rng());
        let mut account = two_of_three(old.address());
        let t0 = 1_700_000_000;

        let first = account.propose_recovery(G1, X, &env(t0)).unwrap();
        let id = recovery_id(ACCOUNT, 1, X);
        assert_eq!(first, ProposalOutcome::Confirmed { id, confirms: 1 });
        assert_eq!(
            account.execute_recovery(id, &env(t0)),
            Err(AccountError::RecoveryNotReady(NotReady::QuorumUnmet {
                confirms: 1,
                threshold: 2
            }))
        );

        assert_eq!(
            account.propose_recovery(G2, X, &env(t0 + 60)).unwrap(),
            ProposalOutcome::Confirmed { id, confirms: 2 }
        );
        assert_eq!(
            account.execute_recovery(id, &env(t0 + 60)),
            Err(AccountError::RecoveryNotReady(NotReady::DelayUnmet {
                ready_at: t0 + 2 * DAY,
                now: t0 + 60
            }))
        );

        assert_eq!(account.execute_recovery(id, &env(t0 + 2 * DAY)), Ok(X));
        assert_eq!(account.owner(), X);

        let hash = H256::repeat_byte(0x33);
        assert_eq!(
            account.validate_user_op(&signed(&old, hash).await, hash),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn second_execution_fails() {
        let mut account = two_of_three(OWNER);
        account.propose_recovery(G1, X, &env(0)).unwrap();
        let Ok(ProposalOutcome::Confirmed { id, .. }) = account.propose_recovery(G3, X, &env(0)) else {
            panic!("second guardian should be counted");
        };
        account.execute_recovery(id, &env(2 * DAY)).unwrap();
        assert_eq!(
            account.execute_recovery(id, &env(3 * DAY)),
            Err(AccountError::RecoveryAlreadyExecuted(id))
        );
        assert_eq!(
            account.propose_recovery(G2, X, &env(3 * DAY)),
            Err(AccountError::RecoveryAlreadyExecuted(id))
        );
        assert_eq!(account.owner(), X);
    }

    #[test]
    fn repeated_proposals_are_not_double_counted() {
        let mut account = two_of_three(OWNER);
        let id = recovery_id(ACCOUNT, 1, X);
        account.propose_recovery(G1, X, &env(100)).unwrap();
        assert_eq!(
            account.propose_recovery(G1, X, &env(200)).unwrap(),
            ProposalOutcome::AlreadyConfirmed { id, confirms: 1 }
        );
        assert_eq!(account.recovery_start(id), 100);
        assert!(matches!(
            account.execute_recovery(id, &env(10 * DAY)),
            Err(AccountError::RecoveryNotReady(NotReady::QuorumUnmet { confirms: 1, .. }))
        ));
    }

    #[test]
    fn different_new_owners_are_separate_requests() {
        let mut account = two_of_three(OWNER);
        let y = Address::repeat_byte(0x59);
        account.propose_recovery(G1, X, &env(0)).unwrap();
        account.propose_recovery(G2, y, &env(0)).unwrap();
        assert_eq!(account.confirms(recovery_id(ACCOUNT, 1, X)), 1);
        assert_eq!(account.confirms(recovery_id(ACCOUNT, 1, y)), 1);
    }

    #[test]
    fn non_guardian_proposals_change_nothing() {
        let mut account = two_of_three(OWNER);
        let stranger = Address::repeat_byte(0x99);
        assert_eq!(account.propose_recovery(stranger, X, &env(0)), Ok(ProposalOutcome::Ignored));
        assert_eq!(account.confirms(recovery_id(ACCOUNT, 1, X)), 0);
        assert_eq!(
            account.execute_recovery(recovery_id(ACCOUNT, 1, X), &env(0)),
            Err(AccountError::UnknownRecovery(recovery_id(ACCOUNT, 1, X)))
        );
    }

    #[test]
    fn removed_guardians_stop_counting() {
        let mut account = two_of_three(OWNER);
        let id = recovery_id(ACCOUNT, 1, X);
        account.propose_recovery(G1, X, &env(0)).unwrap();
        account.propose_recovery(G2, X, &env(0)).unwrap();
        account
            .configure_guardians(OWNER, vec![G2, G3], U256::from(2), U256::zero(), false)
            .unwrap();
        assert_eq!(account.confirms(id), 1);
        assert!(account.confirms(id) <= account.guardians().len() as u64);
    }

    #[test]
    fn guardian_configuration_is_validated() {
        let mut account = GuardianAccount::new(ACCOUNT, ENTRY_POINT, OWNER);
        let bad = [
            (vec![G1, G2], 0u64),
            (vec![G1, G2], 3),
            (vec![G1, G1], 1),
            (vec![G1, Address::zero()], 1),
            ((1..=17u8).map(Address::repeat_byte).collect(), 2),
        ];
        for (guardians, threshold) in bad {
            assert!(matches!(
                account.configure_guardians(OWNER, guardians, U256::from(threshold), U256::zero(), false),
                Err(AccountError::InvalidGuardianConfig(_))
            ));
        }
        assert!(account.guardians().is_empty());
        assert_eq!(account.threshold(), 0);
    }

    #[test]
    fn only_owner_or_self_configures() {
        let mut account = GuardianAccount::new(ACCOUNT, ENTRY_POINT, OWNER);
        assert_eq!(
            account.configure_guardians(G1, vec![G1], U256::one(), U256::zero(), false),
            Err(AccountError::Unauthorized(G1))
        );
        assert_eq!(
            account.configure_guardians(OWNER, vec![G1], U256::one(), U256::zero(), true),
            Err(AccountError::Unauthorized(OWNER))
        );
        assert_eq!(
            account.configure_guardians(ACCOUNT, vec![G1], U256::one(), U256::zero(), true),
            Ok(())
        );
    }

    #[tokio::test]
    async fn freeze_blocks_spending_but_not_recovery() {
        let owner = LocalWallet::new(&mut thread_rng());
        let mut account = two_of_three(owner.address());
        account.set_frozen(owner.address(), true, false).unwrap();

        let hash = H256::repeat_byte(0x44);
        assert_eq!(
            account.validate_user_op(&signed(&owner, hash).await, hash),
            Err(ValidationError::Frozen)
        );
        let transfer = Call {
            to: Address::repeat_byte(0x7a),
            value: U256::zero(),
            data: Bytes::new(),
        };
        assert_eq!(
            account.handle_call(ENTRY_POINT, AccountCall::Execute(transfer), &env(0), &mut NoCalls),
            Err(AccountError::ValidationRejected(ValidationError::Frozen))
        );

        account.propose_recovery(G1, X, &env(0)).unwrap();
        let Ok(ProposalOutcome::Confirmed { id, .. }) = account.propose_recovery(G2, X, &env(0)) else {
            panic!("proposal while frozen should count");
        };
        assert_eq!(account.execute_recovery(id, &env(2 * DAY)), Ok(X));
        assert!(account.frozen());
    }

    #[test]
    fn self_call_reaches_by_self_entrypoints() {
        let mut account = GuardianAccount::new(ACCOUNT, ENTRY_POINT, OWNER);
        let inner = AccountCall::ConfigureGuardians {
            guardians: vec![G1, G2],
            threshold: U256::from(2),
            delay_seconds: U256::from(DAY),
            by_self: true,
        };
        let call = AccountCall::Execute(Call {
            to: ACCOUNT,
            value: U256::zero(),
            data: inner.encode(),
        });
        account.handle_call(ENTRY_POINT, call, &env(0), &mut NoCalls).unwrap();
        assert_eq!(account.guardians(), &[G1, G2]);
        assert_eq!(account.delay_seconds(), DAY);
    }

    #[test]
    fn reverted_external_call_is_reported() {
        let mut account = GuardianAccount::new(ACCOUNT, ENTRY_POINT, OWNER);
        let call = AccountCall::Execute(Call {
            to: Address::repeat_byte(0x7a),
            value: U256::zero(),
            data: Bytes::new(),
        });
        assert!(matches!(
            account.handle_call(OWNER, call, &env(0), &mut NoCalls),
            Err(AccountError::CallReverted(_))
        ));
    }

    #[test]
    fn read_accessors_report_request_fields() {
        let mut account = two_of_three(OWNER);
        let id = recovery_id(ACCOUNT, 1, X);
        account.propose_recovery(G3, X, &env(42)).unwrap();

        let start = account.handle_call(G1, AccountCall::RecoveryStart { id }, &env(50), &mut NoCalls).unwrap();
        let confirms = account
            .handle_call(G1, AccountCall::RecoveryConfirms { id }, &env(50), &mut NoCalls)
            .unwrap();
        let new_owner = account
            .handle_call(G1, AccountCall::RecoveryNewOwner { id }, &env(50), &mut NoCalls)
            .unwrap();
        assert_eq!(decode_uint(&start.return_data).unwrap(), U256::from(42));
        assert_eq!(decode_uint(&confirms.return_data).unwrap(), U256::one());
        assert_eq!(decode_address(&new_owner.return_data).unwrap(), X);
    }
}
