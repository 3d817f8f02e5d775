// src/codec.rs
//! ABI encoding of account, factory and entry point calls, and of the
//! user operation tuple. Pure functions only.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

use crate::error::CodecError;
use crate::types::{Call, UserOperation};

pub const EXECUTE: &str = "execute(address,uint256,bytes)";
pub const EXECUTE_AND_BURN: &str = "executeAndBurn(address,uint256,bytes)";
pub const CONFIGURE_GUARDIANS: &str = "configureGuardians(address[],uint256,uint256)";
pub const CONFIGURE_GUARDIANS_BY_SELF: &str = "configureGuardiansBySelf(address[],uint256,uint256)";
pub const SET_FROZEN: &str = "setFrozen(bool)";
pub const SET_FROZEN_BY_SELF: &str = "setFrozenBySelf(bool)";
pub const PROPOSE_RECOVERY: &str = "proposeRecovery(address)";
pub const PROPOSE_RECOVERY_BY_SELF: &str = "proposeRecoveryBySelf(address)";
pub const EXECUTE_RECOVERY: &str = "executeRecovery(bytes32)";
pub const RECOVERY_START: &str = "recoveryStart(bytes32)";
pub const RECOVERY_CONFIRMS: &str = "recoveryConfirms(bytes32)";
pub const RECOVERY_NEW_OWNER: &str = "recoveryNewOwner(bytes32)";
pub const OWNER: &str = "owner()";
pub const BURNED: &str = "burned()";

pub const FACTORY_CREATE: &str = "create(address,address,bytes32)";
pub const FACTORY_GET_ADDRESS: &str = "getAddress(address,address,bytes32)";

pub const GET_NONCE: &str = "getNonce(address,uint192)";
pub const GET_USER_OP_HASH: &str =
    "getUserOpHash((address,uint256,bytes,bytes,uint256,uint256,uint256,uint256,uint256,bytes,bytes))";

/// Calls understood by the disposable and guardian accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCall {
    Execute(Call),
    ExecuteAndBurn(Call),
    ConfigureGuardians {
        guardians: Vec<Address>,
        threshold: U256,
        delay_seconds: U256,
        by_self: bool,
    },
    SetFrozen {
        frozen: bool,
        by_self: bool,
    },
    ProposeRecovery {
        new_owner: Address,
        by_self: bool,
    },
    ExecuteRecovery {
        id: H256,
    },
    RecoveryStart {
        id: H256,
    },
    RecoveryConfirms {
        id: H256,
    },
    RecoveryNewOwner {
        id: H256,
    },
    Owner,
    Burned,
}

impl AccountCall {
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Execute(_) => EXECUTE,
            Self::ExecuteAndBurn(_) => EXECUTE_AND_BURN,
            Self::ConfigureGuardians { by_self: false, .. } => CONFIGURE_GUARDIANS,
            Self::ConfigureGuardians { by_self: true, .. } => CONFIGURE_GUARDIANS_BY_SELF,
            Self::SetFrozen { by_self: false, .. } => SET_FROZEN,
            Self::SetFrozen { by_self: true, .. } => SET_FROZEN_BY_SELF,
            Self::ProposeRecovery { by_self: false, .. } => PROPOSE_RECOVERY,
            Self::ProposeRecovery { by_self: true, .. } => PROPOSE_RECOVERY_BY_SELF,
            Self::ExecuteRecovery { .. } => EXECUTE_RECOVERY,
            Self::RecoveryStart { .. } => RECOVERY_START,
            Self::RecoveryConfirms { .. } => RECOVERY_CONFIRMS,
            Self::RecoveryNewOwner { .. } => RECOVERY_NEW_OWNER,
            Self::Owner => OWNER,
            Self::Burned => BURNED,
        }
    }

    pub fn encode(&self) -> Bytes {
        let tokens = match self {
            Self::Execute(call) | Self::ExecuteAndBurn(call) => call_tokens(call),
            Self::ConfigureGuardians {
                guardians,
                threshold,
                delay_seconds,
                ..
            } => vec![
                Token::Array(guardians.iter().copied().map(Token::Address).collect()),
                Token::Uint(*threshold),
                Token::Uint(*delay_seconds),
            ],
            Self::SetFrozen { frozen, .. } => vec![Token::Bool(*frozen)],
            Self::ProposeRecovery { new_owner, .. } => vec![Token::Address(*new_owner)],
            Self::ExecuteRecovery { id }
            | Self::RecoveryStart { id }
            | Self::RecoveryConfirms { id }
            | Self::RecoveryNewOwner { id } => vec![Token::FixedBytes(id.as_bytes().to_vec())],
            Self::Owner | Self::Burned => vec![],
        };
        encode_call(self.signature(), &tokens)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (selector, args) = split_selector(data)?;

        let call = if selector == id(EXECUTE) || selector == id(EXECUTE_AND_BURN) {
            let mut tokens = decode_args(
                &[ParamType::Address, ParamType::Uint(256), ParamType::Bytes],
                args,
            )?
            .into_iter();
            let call = Call {
                to: address(tokens.next())?,
                value: uint(tokens.next())?,
                data: bytes(tokens.next())?,
            };
            if selector == id(EXECUTE) {
                Self::Execute(call)
            } else {
                Self::ExecuteAndBurn(call)
            }
        } else if selector == id(CONFIGURE_GUARDIANS) || selector == id(CONFIGURE_GUARDIANS_BY_SELF) {
            let mut tokens = decode_args(
                &[
                    ParamType::Array(Box::new(ParamType::Address)),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                ],
                args,
            )?
            .into_iter();
            let guardians = tokens
                .next()
                .and_then(Token::into_array)
                .ok_or(CodecError::UnexpectedTokens)?
                .into_iter()
                .map(|t| address(Some(t)))
                .collect::<Result<Vec<_>, _>>()?;
            Self::ConfigureGuardians {
                guardians,
                threshold: uint(tokens.next())?,
                delay_seconds: uint(tokens.next())?,
                by_self: selector == id(CONFIGURE_GUARDIANS_BY_SELF),
            }
        } else if selector == id(SET_FROZEN) || selector == id(SET_FROZEN_BY_SELF) {
            let mut tokens = decode_args(&[ParamType::Bool], args)?.into_iter();
            Self::SetFrozen {
                frozen: tokens
                    .next()
                    .and_then(Token::into_bool)
                    .ok_or(CodecError::UnexpectedTokens)?,
                by_self: selector == id(SET_FROZEN_BY_SELF),
            }
        } else if selector == id(PROPOSE_RECOVERY) || selector == id(PROPOSE_RECOVERY_BY_SELF) {
            let mut tokens = decode_args(&[ParamType::Address], args)?.into_iter();
            Self::ProposeRecovery {
                new_owner: address(tokens.next())?,
                by_self: selector == id(PROPOSE_RECOVERY_BY_SELF),
            }
        } else if selector == id(EXECUTE_RECOVERY) {
            Self::ExecuteRecovery { id: single_h256(args)? }
        } else if selector == id(RECOVERY_START) {
            Self::RecoveryStart { id: single_h256(args)? }
        } else if selector == id(RECOVERY_CONFIRMS) {
            Self::RecoveryConfirms { id: single_h256(args)? }
        } else if selector == id(RECOVERY_NEW_OWNER) {
            Self::RecoveryNewOwner { id: single_h256(args)? }
        } else if selector == id(OWNER) {
            Self::Owner
        } else if selector == id(BURNED) {
            Self::Burned
        } else {
            return Err(CodecError::UnknownSelector(selector));
        };

        Ok(call)
    }
}

/// Calls understood by an account factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryCall {
    Create {
        entry_point: Address,
        owner: Address,
        salt: H256,
    },
    GetAddress {
        entry_point: Address,
        owner: Address,
        salt: H256,
    },
}

impl FactoryCall {
    pub fn encode(&self) -> Bytes {
        let (signature, entry_point, owner, salt) = match self {
            Self::Create {
                entry_point,
                owner,
                salt,
            } => (FACTORY_CREATE, entry_point, owner, salt),
            Self::GetAddress {
                entry_point,
                owner,
                salt,
            } => (FACTORY_GET_ADDRESS, entry_point, owner, salt),
        };
        encode_call(
            signature,
            &[
                Token::Address(*entry_point),
                Token::Address(*owner),
                Token::FixedBytes(salt.as_bytes().to_vec()),
            ],
        )
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (selector, args) = split_selector(data)?;
        if selector != id(FACTORY_CREATE) && selector != id(FACTORY_GET_ADDRESS) {
            return Err(CodecError::UnknownSelector(selector));
        }
        let mut tokens = decode_args(
            &[ParamType::Address, ParamType::Address, ParamType::FixedBytes(32)],
            args,
        )?
        .into_iter();
        let entry_point = address(tokens.next())?;
        let owner = address(tokens.next())?;
        let salt = h256(tokens.next())?;

        Ok(if selector == id(FACTORY_CREATE) {
            Self::Create {
                entry_point,
                owner,
                salt,
            }
        } else {
            Self::GetAddress {
                entry_point,
                owner,
                salt,
            }
        })
    }
}

/// Read-only entry point calls the pipeline relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPointCall {
    GetNonce { sender: Address, key: U256 },
    GetUserOpHash(UserOperation),
}

impl EntryPointCall {
    pub fn encode(&self) -> Bytes {
        match self {
            Self::GetNonce { sender, key } => {
                encode_call(GET_NONCE, &[Token::Address(*sender), Token::Uint(*key)])
            }
            Self::GetUserOpHash(op) => encode_call(GET_USER_OP_HASH, &[user_op_token(op)]),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let (selector, args) = split_selector(data)?;
        if selector == id(GET_NONCE) {
            let mut tokens = decode_args(&[ParamType::Address, ParamType::Uint(192)], args)?.into_iter();
            Ok(Self::GetNonce {
                sender: address(tokens.next())?,
                key: uint(tokens.next())?,
            })
        } else if selector == id(GET_USER_OP_HASH) {
            let tuple = decode_args(&[user_op_param()], args)?
                .into_iter()
                .next()
                .and_then(Token::into_tuple)
                .ok_or(CodecError::UnexpectedTokens)?;
            Ok(Self::GetUserOpHash(user_op_from_tokens(tuple)?))
        } else {
            Err(CodecError::UnknownSelector(selector))
        }
    }
}

/// `initCode` is the factory address followed by its `create` calldata.
pub fn pack_init_code(factory: Address, entry_point: Address, owner: Address, salt: H256) -> Bytes {
    let create = FactoryCall::Create {
        entry_point,
        owner,
        salt,
    }
    .encode();
    let mut init_code = factory.as_bytes().to_vec();
    init_code.extend_from_slice(&create);
    init_code.into()
}

pub fn split_init_code(init_code: &[u8]) -> Option<(Address, &[u8])> {
    (init_code.len() >= 20).then(|| (Address::from_slice(&init_code[..20]), &init_code[20..]))
}

/// `keccak256(abi.encode(account, chainId, newOwner))`, shared by every
/// guardian proposing the same new owner.
pub fn recovery_id(account: Address, chain_id: u64, new_owner: Address) -> H256 {
    keccak256(abi::encode(&[
        Token::Address(account),
        Token::Uint(U256::from(chain_id)),
        Token::Address(new_owner),
    ]))
    .into()
}

/// Packs every field but the signature, dynamic fields hashed, as the v0.6
/// entry point does before hashing.
pub fn pack_for_hash(op: &UserOperation) -> Vec<u8> {
    abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
    ])
}

pub fn encode_return(tokens: &[Token]) -> Bytes {
    abi::encode(tokens).into()
}

pub fn decode_address(data: &[u8]) -> Result<Address, CodecError> {
    address(decode_args(&[ParamType::Address], data)?.into_iter().next())
}

pub fn decode_uint(data: &[u8]) -> Result<U256, CodecError> {
    uint(decode_args(&[ParamType::Uint(256)], data)?.into_iter().next())
}

pub fn decode_bool(data: &[u8]) -> Result<bool, CodecError> {
    decode_args(&[ParamType::Bool], data)?
        .into_iter()
        .next()
        .and_then(Token::into_bool)
        .ok_or(CodecError::UnexpectedTokens)
}

pub fn decode_h256(data: &[u8]) -> Result<H256, CodecError> {
    single_h256(data)
}

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(tokens));
    data.into()
}

fn call_tokens(call: &Call) -> Vec<Token> {
    vec![
        Token::Address(call.to),
        Token::Uint(call.value),
        Token::Bytes(call.data.to_vec()),
    ]
}

fn user_op_param() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
    ])
}

fn user_op_token(op: &UserOperation) -> Token {
    Token::Tuple(vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Bytes(op.init_code.to_vec()),
        Token::Bytes(op.call_data.to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::Bytes(op.paymaster_and_data.to_vec()),
        Token::Bytes(op.signature.to_vec()),
    ])
}

fn user_op_from_tokens(tokens: Vec<Token>) -> Result<UserOperation, CodecError> {
    let mut tokens = tokens.into_iter();
    Ok(UserOperation {
        sender: address(tokens.next())?,
        nonce: uint(tokens.next())?,
        init_code: bytes(tokens.next())?,
        call_data: bytes(tokens.next())?,
        call_gas_limit: uint(tokens.next())?,
        verification_gas_limit: uint(tokens.next())?,
        pre_verification_gas: uint(tokens.next())?,
        max_fee_per_gas: uint(tokens.next())?,
        max_priority_fee_per_gas: uint(tokens.next())?,
        paymaster_and_data: bytes(tokens.next())?,
        signature: bytes(tokens.next())?,
    })
}

fn split_selector(data: &[u8]) -> Result<([u8; 4], &[u8]), CodecError> {
    if data.len() < 4 {
        return Err(CodecError::TooShort);
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&data[..4]);
    Ok((selector, &data[4..]))
}

fn decode_args(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, CodecError> {
    abi::decode(types, data).map_err(|e| CodecError::Abi(e.to_string()))
}

fn address(token: Option<Token>) -> Result<Address, CodecError> {
    token.and_then(Token::into_address).ok_or(CodecError::UnexpectedTokens)
}

fn uint(token: Option<Token>) -> Result<U256, CodecError> {
    token.and_then(Token::into_uint).ok_or(CodecError::UnexpectedTokens)
}

fn bytes(token: Option<Token>) -> Result<Bytes, CodecError> {
    token
        .and_then(Token::into_bytes)
        .map(Bytes::from)
        .ok_or(CodecError::UnexpectedTokens)
}

fn h256(token: Option<Token>) -> Result<H256, CodecError> {
    token
        .and_then(Token::into_fixed_bytes)
        .filter(|b| b.len() == 32)
        .map(|b| H256::from_slice(&b))
        .ok_or(CodecError::UnexpectedTokens)
}

fn single_h256(data: &[u8]) -> Result<H256, CodecError> {
    h256(decode_args(&[ParamType::FixedBytes(32)], data)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_known_values() {
        assert_eq!(hex::encode(id(EXECUTE)), "b61d27f6");
        assert_eq!(hex::encode(id(GET_NONCE)), "35567e1a");
    }

    #[test]
    fn account_call_decodes_what_it_encodes() {
        let calls = vec![
            AccountCall::ExecuteAndBurn(Call {
                to: Address::repeat_byte(0x11),
                value: U256::from(7),
                data: Bytes::from(vec![0xde, 0xad]),
            }),
            AccountCall::ConfigureGuardians {
                guardians: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
                threshold: U256::from(2),
                delay_seconds: U256::from(172_800),
                by_self: true,
            },
            AccountCall::SetFrozen {
                frozen: true,
                by_self: false,
            },
            AccountCall::ProposeRecovery {
                new_owner: Address::repeat_byte(9),
                by_self: false,
            },
            AccountCall::RecoveryNewOwner {
                id: H256::repeat_byte(3),
            },
            AccountCall::Burned,
        ];
        for call in calls {
            assert_eq!(AccountCall::decode(&call.encode()).unwrap(), call);
        }
    }

    #[test]
    fn by_self_variants_use_distinct_selectors() {
        let plain = AccountCall::SetFrozen {
            frozen: true,
            by_self: false,
        }
        .encode();
        let by_self = AccountCall::SetFrozen {
            frozen: true,
            by_self: true,
        }
        .encode();
        assert_ne!(plain[..4], by_self[..4]);
        assert_eq!(plain[4..], by_self[4..]);
    }

    #[test]
    fn unknown_selector_is_reported() {
        let err = AccountCall::decode(&[0xff, 0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err, CodecError::UnknownSelector([0xff; 4]));
        assert_eq!(AccountCall::decode(&[0x01]).unwrap_err(), CodecError::TooShort);
    }

    #[test]
    fn init_code_starts_with_factory() {
        let factory = Address::repeat_byte(0xfa);
        let entry_point = Address::repeat_byte(0xee);
        let owner = Address::repeat_byte(0x01);
        let salt = H256::repeat_byte(0x5a);
        let init_code = pack_init_code(factory, entry_point, owner, salt);

        let (decoded_factory, data) = split_init_code(&init_code).unwrap();
        assert_eq!(decoded_factory, factory);
        assert_eq!(
            FactoryCall::decode(data).unwrap(),
            FactoryCall::Create {
                entry_point,
                owner,
                salt
            }
        );
    }

    #[test]
    fn recovery_id_depends_on_new_owner_and_chain() {
        let account = Address::repeat_byte(0xaa);
        let x = Address::repeat_byte(0x01);
        let y = Address::repeat_byte(0x02);
        assert_eq!(recovery_id(account, 1, x), recovery_id(account, 1, x));
        assert_ne!(recovery_id(account, 1, x), recovery_id(account, 1, y));
        assert_ne!(recovery_id(account, 1, x), recovery_id(account, 2, x));
    }

    #[test]
    fn get_user_op_hash_carries_the_whole_operation() {
        let op = UserOperation {
            sender: Address::repeat_byte(0x42),
            nonce: U256::from(3),
            call_data: Bytes::from(vec![1, 2, 3]),
            paymaster_and_data: Bytes::from(vec![4; 40]),
            signature: Bytes::from(vec![5; 65]),
            ..Default::default()
        };
        let encoded = EntryPointCall::GetUserOpHash(op.clone()).encode();
        assert_eq!(EntryPointCall::decode(&encoded).unwrap(), EntryPointCall::GetUserOpHash(op));
    }

    #[test]
    fn return_values_decode() {
        let owner = Address::repeat_byte(0x77);
        assert_eq!(decode_address(&encode_return(&[Token::Address(owner)])).unwrap(), owner);
        assert!(decode_bool(&encode_return(&[Token::Bool(true)])).unwrap());
        assert_eq!(
            decode_uint(&encode_return(&[Token::Uint(U256::from(48 * 3600))])).unwrap(),
            U256::from(172_800)
        );
    }
}
