// src/lib.rs
//! Seedless smart-account wallet: a user operation pipeline (build,
//! sponsor, sign, submit, track) and the disposable and guardian account
//! state machines it drives.

pub mod account;
pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod predictor;
pub mod rpc;
pub mod signer;
pub mod sponsor;
pub mod tracker;
pub mod types;

pub use config::{ConfigArgs, PipelineConfig};
pub use error::{AccountError, CodecError, EntryPointError, NotReady, PipelineError, ValidationError};
pub use pipeline::{Pipeline, RecoveryReceipt, SendReport};
pub use tracker::TrackOutcome;
pub use types::{AccountRef, Action, Call, Intent, UserOperation};
