// src/main.rs
use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cipher_wallet::types::parse_quantity;
use cipher_wallet::{Call, ConfigArgs, Pipeline, PipelineConfig, RecoveryReceipt, SendReport, TrackOutcome};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    config: ConfigArgs,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send once from a fresh disposable account, burned afterwards
    SendDisposable {
        to: Address,

        #[clap(long, default_value = "0", value_parser = parse_quantity)]
        value_wei: U256,

        /// Hex calldata for the target
        #[clap(long)]
        data: Option<Bytes>,
    },
    /// Deploy a persistent account for an owner key
    Deploy {
        #[clap(long, env = "OWNER_KEY")]
        owner_key: String,

        #[clap(long)]
        salt: H256,
    },
    ConfigureGuardians {
        #[clap(long)]
        account: Address,

        #[clap(long, env = "OWNER_KEY")]
        owner_key: String,

        #[clap(long, value_delimiter = ',', required = true)]
        guardians: Vec<Address>,

        #[clap(long)]
        threshold: u64,

        #[clap(long, default_value_t = 48 * 3600)]
        delay_seconds: u64,
    },
    SetFrozen {
        #[clap(long)]
        account: Address,

        #[clap(long, env = "OWNER_KEY")]
        owner_key: String,

        #[clap(long, action = clap::ArgAction::Set)]
        frozen: bool,
    },
    /// Confirm a recovery to `new_owner`, by default as a guardian transaction
    ProposeRecovery {
        account: Address,
        new_owner: Address,

        /// Guardian key, or the owner key with `--by-self`
        #[clap(long, env = "SIGNER_KEY")]
        key: String,

        /// Propose through an owner-signed self-call instead
        #[clap(long)]
        by_self: bool,
    },
    /// Apply a recovery that has quorum and whose delay has passed
    ExecuteRecovery {
        account: Address,
        id: H256,

        /// Any funded key; it only pays for the transaction
        #[clap(long, env = "SIGNER_KEY")]
        key: String,
    },
    /// Show the recovery request for a proposed new owner
    RecoveryStatus { account: Address, new_owner: Address },
    /// Poll again for an operation reported as pending
    Poll { op_hash: H256 },
    Balance { address: Address },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(cli.log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = PipelineConfig::from(cli.config);
    info!(
        "Using bundler {} and entry point {:?} on chain {}",
        config.bundler_url, config.entry_point, config.chain_id
    );
    let pipeline = Pipeline::connect(config)?;

    // Ctrl+C abandons receipt polling; the operation itself stays submitted.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::SendDisposable { to, value_wei, data } => {
            let call = Call {
                to,
                value: value_wei,
                data: data.unwrap_or_default(),
            };
            let report = pipeline.send_disposable(call, &cancel).await?;
            print_report(&report);
        }
        Command::Deploy { owner_key, salt } => {
            let owner = parse_key(&owner_key)?;
            let report = pipeline.deploy_account(&owner, salt, &cancel).await?;
            print_report(&report);
        }
        Command::ConfigureGuardians {
            account,
            owner_key,
            guardians,
            threshold,
            delay_seconds,
        } => {
            let owner = parse_key(&owner_key)?;
            let report = pipeline
                .configure_guardians(account, guardians, threshold, delay_seconds, &owner, &cancel)
                .await?;
            print_report(&report);
        }
        Command::SetFrozen {
            account,
            owner_key,
            frozen,
        } => {
            let owner = parse_key(&owner_key)?;
            let report = pipeline.set_frozen(account, frozen, &owner, &cancel).await?;
            print_report(&report);
        }
        Command::ProposeRecovery {
            account,
            new_owner,
            key,
            by_self,
        } => {
            let signer = parse_key(&key)?;
            if by_self {
                let report = pipeline
                    .propose_recovery_by_self(account, new_owner, &signer, &cancel)
                    .await?;
                print_report(&report);
            } else {
                let sent = pipeline.propose_recovery(account, new_owner, &signer).await?;
                print_recovery(&sent);
            }
        }
        Command::ExecuteRecovery { account, id, key } => {
            let signer = parse_key(&key)?;
            let sent = pipeline.execute_recovery(account, id, &signer).await?;
            print_recovery(&sent);
        }
        Command::RecoveryStatus { account, new_owner } => {
            let (id, status) = pipeline.recovery_status(account, new_owner).await?;
            println!(
                "{}",
                json!({
                    "recoveryId": id,
                    "start": status.start,
                    "confirms": status.confirms,
                    "newOwner": status.new_owner,
                })
            );
        }
        Command::Poll { op_hash } => {
            let outcome = pipeline.poll(op_hash, &cancel).await;
            print_outcome(&outcome);
        }
        Command::Balance { address } => {
            let balance = pipeline.balance(address).await?;
            println!("{}", json!({ "address": address, "balanceWei": balance }));
        }
    }

    Ok(())
}

fn parse_key(key: &str) -> anyhow::Result<LocalWallet> {
    key.trim_start_matches("0x")
        .parse::<LocalWallet>()
        .context("invalid private key")
}

fn print_recovery(sent: &RecoveryReceipt) {
    println!(
        "{}",
        json!({
            "recoveryId": sent.id,
            "transactionHash": sent.tx_hash,
        })
    );
}

fn print_report(report: &SendReport) {
    info!("Sender {:?}, signed by {:?}", report.sender, report.owner);
    print_outcome(&report.outcome);
}

fn print_outcome(outcome: &TrackOutcome) {
    let status = match outcome {
        TrackOutcome::Confirmed { success: false, .. } => {
            warn!("Operation was included but its call did not succeed");
            "confirmed"
        }
        TrackOutcome::Confirmed { .. } => "confirmed",
        TrackOutcome::Pending(op_hash) => {
            warn!("Not confirmed yet, run `poll {:?}` later", op_hash);
            "pending"
        }
        TrackOutcome::Cancelled(_) => "cancelled",
    };
    println!(
        "{}",
        json!({
            "status": status,
            "success": outcome.success(),
            "userOpHash": outcome.op_hash(),
            "transactionHash": outcome.tx_hash(),
        })
    );
}
