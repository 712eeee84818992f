//! epochx
//!
//! Command-line host for an expiring balance ledger stored in a sled
//! directory. Every mutation runs at one timeline position: `--at` when
//! given, otherwise the system clock (time-based ledgers) or the last
//! recorded position (block-based ledgers).
//!
//! Usage:
//!   epochx init               [--params <json>] [--bucket-duration <n>] [--window-size <n>] [--blocks] [--force]
//!   epochx mint               --to <account> --amount <n>
//!   epochx burn               --from <account> --amount <n>
//!   epochx transfer           --from <account> --to <account> --amount <n>
//!   epochx transfer-at-epoch  --from <account> --to <account> --epoch <e> --amount <n>
//!   epochx approve            --owner <account> --spender <account> --amount <n|max>
//!   epochx transfer-from      --spender <account> --from <account> --to <account> --amount <n> [--epoch <e>]
//!   epochx balance            --account <account> [--epoch <e>]
//!   epochx buckets            --account <account> [--epoch <e>]
//!   epochx epoch
//!   epochx supply
//!
//! Accounts are base-58 ids, `0x`-prefixed hex, or `@label`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use epochx_core::constants::INFINITE_ALLOWANCE;
use epochx_core::types::{AccountId, Balance, Bucket, Epoch, EpochType, Position};
use epochx_state::{LedgerEngine, NearestExpiry, StateDb};
use epochx_token::{ExpiringToken, PositionSource, SystemClock};

mod params;
use params::LedgerParams;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "epochx", version, about = "EpochX: expiring balance ledger")]
struct Args {
    /// Directory for the ledger database.
    #[arg(long, global = true, default_value = "~/.epochx/data")]
    data_dir: PathBuf,

    /// Timeline position (block number or Unix seconds) to act at.
    #[arg(long, global = true)]
    at: Option<Position>,

    /// Print query results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the ledger, or reset it with --force.
    Init {
        /// JSON params file; missing fields take their defaults.
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long)]
        origin: Option<Position>,
        #[arg(long)]
        bucket_duration: Option<u64>,
        #[arg(long)]
        window_size: Option<u64>,
        /// Positions are block numbers instead of Unix seconds.
        #[arg(long, default_value_t = false)]
        blocks: bool,
        /// Discard all balances of an existing ledger.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    #[command(flatten)]
    Ledger(LedgerCommand),
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    Mint {
        #[arg(long, value_parser = parse_account)]
        to: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
    },

    Burn {
        #[arg(long, value_parser = parse_account)]
        from: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
    },

    /// Spend oldest-first across the whole window.
    Transfer {
        #[arg(long, value_parser = parse_account)]
        from: AccountId,
        #[arg(long, value_parser = parse_account)]
        to: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
    },

    /// Spend only value minted in one epoch.
    TransferAtEpoch {
        #[arg(long, value_parser = parse_account)]
        from: AccountId,
        #[arg(long, value_parser = parse_account)]
        to: AccountId,
        #[arg(long)]
        epoch: Epoch,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
    },

    /// Set an allowance; `max` never decreases.
    Approve {
        #[arg(long, value_parser = parse_account)]
        owner: AccountId,
        #[arg(long, value_parser = parse_account)]
        spender: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
    },

    TransferFrom {
        #[arg(long, value_parser = parse_account)]
        spender: AccountId,
        #[arg(long, value_parser = parse_account)]
        from: AccountId,
        #[arg(long, value_parser = parse_account)]
        to: AccountId,
        #[arg(long, value_parser = parse_amount)]
        amount: Balance,
        #[arg(long)]
        epoch: Option<Epoch>,
    },

    /// Spendable balance, optionally restricted to one epoch.
    Balance {
        #[arg(long, value_parser = parse_account)]
        account: AccountId,
        #[arg(long)]
        epoch: Option<Epoch>,
    },

    /// Spendable buckets, oldest first.
    Buckets {
        #[arg(long, value_parser = parse_account)]
        account: AccountId,
        #[arg(long)]
        epoch: Option<Epoch>,
    },

    /// Current epoch and valid range.
    #[command(name = "epoch")]
    EpochInfo,

    /// Minted and burned totals.
    Supply,
}

// ── Position source ──────────────────────────────────────────────────────────

/// The pointer resolved once per invocation.
struct HostPosition {
    at: Position,
    kind: EpochType,
}

impl PositionSource for HostPosition {
    fn current(&self) -> Position {
        self.at
    }

    fn epoch_type(&self) -> EpochType {
        self.kind
    }
}

fn resolve_pointer(at: Option<Position>, params: &LedgerParams, last: Option<Position>) -> Position {
    match (at, params.epoch_type) {
        (Some(p), _) => p,
        (None, EpochType::TimeBased) => SystemClock.current(),
        (None, EpochType::BlocksBased) => last.unwrap_or(params.origin),
    }
}

// ── Reports ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BalanceReport {
    account: String,
    position: Position,
    epoch: Option<Epoch>,
    balance: Balance,
    nearest_expiry: Option<NearestExpiry>,
}

#[derive(Serialize)]
struct BucketReport {
    epoch: Epoch,
    buckets: Vec<Bucket>,
}

#[derive(Serialize)]
struct SupplyReport {
    minted: Balance,
    burned: Balance,
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,epochx=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let data_dir = expand_tilde(&args.data_dir);

    match args.command {
        Command::Init { params, origin, bucket_duration, window_size, blocks, force } => {
            let mut p = match params {
                Some(path) => LedgerParams::from_file(&expand_tilde(&path))?,
                None => LedgerParams::default(),
            };
            p.origin = origin.unwrap_or(p.origin);
            p.bucket_duration = bucket_duration.unwrap_or(p.bucket_duration);
            p.window_size = window_size.unwrap_or(p.window_size);
            if blocks {
                p.epoch_type = EpochType::BlocksBased;
            }
            cmd_init(&data_dir, p, force)
        }
        Command::Ledger(cmd) => cmd_ledger(&data_dir, args.at, args.json, cmd),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_ledger(data_dir: &Path, at: Option<Position>, json: bool, cmd: LedgerCommand) -> anyhow::Result<()> {
    let (token, params) = open_token(data_dir, at)?;
    let pointer = token.source().current();
    debug!(pointer, epoch_type = %params.epoch_type, "acting at position");

    match cmd {
        LedgerCommand::Mint { to, amount } => {
            token.mint(&to, amount).context("mint failed")?;
            println!("Minted {} to {} at position {}", amount, to, pointer);
        }

        LedgerCommand::Burn { from, amount } => {
            token.burn(&from, amount).context("burn failed")?;
            println!("Burned {} from {} at position {}", amount, from, pointer);
        }

        LedgerCommand::Transfer { from, to, amount } => {
            token.transfer(&from, &to, amount).context("transfer failed")?;
            println!("Transferred {} from {} to {}", amount, from, to);
        }

        LedgerCommand::TransferAtEpoch { from, to, epoch, amount } => {
            token
                .transfer_at_epoch(&from, epoch, &to, amount)
                .context("transfer failed")?;
            println!("Transferred {} from {} to {} out of epoch {}", amount, from, to, epoch);
        }

        LedgerCommand::Approve { owner, spender, amount } => {
            token.approve(&owner, &spender, amount).context("approve failed")?;
            if amount == INFINITE_ALLOWANCE {
                println!("Approved {} to spend all of {}", spender, owner);
            } else {
                println!("Approved {} to spend {} of {}", spender, amount, owner);
            }
        }

        LedgerCommand::TransferFrom { spender, from, to, amount, epoch } => {
            let result = match epoch {
                Some(e) => token.transfer_from_at_epoch(&spender, e, &from, &to, amount),
                None => token.transfer_from(&spender, &from, &to, amount),
            };
            result.context("transfer-from failed")?;
            println!(
                "Transferred {} from {} to {} (spender {}, allowance left {})",
                amount,
                from,
                to,
                spender,
                token.allowance(&from, &spender)
            );
        }

        LedgerCommand::Balance { account, epoch } => {
            let balance = match epoch {
                Some(e) => token.balance_of_at_epoch(e, &account),
                None => token.balance_of(&account),
            };
            let report = BalanceReport {
                account: account.to_b58(),
                position: pointer,
                epoch,
                balance,
                nearest_expiry: token.nearest_expiry_of(&account),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Account:  {}", report.account);
                println!("Position: {}", report.position);
                println!("Balance:  {} {}", report.balance, token.symbol());
                if let Some(next) = report.nearest_expiry {
                    println!("Next expiry: {} at position {}", next.amount, next.expires_at);
                }
            }
        }

        LedgerCommand::Buckets { account, epoch } => {
            let engine = token.engine();
            let epochs: Vec<Epoch> = match epoch {
                Some(e) => vec![e],
                None => {
                    let (first, last) = engine.window().index_range(pointer);
                    (first..=last).collect()
                }
            };
            let reports: Vec<BucketReport> = epochs
                .into_iter()
                .map(|e| BucketReport { epoch: e, buckets: engine.buckets(pointer, e, &account) })
                .filter(|r| epoch.is_some() || !r.buckets.is_empty())
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for r in &reports {
                    println!("epoch {}", r.epoch);
                    for b in &r.buckets {
                        println!("  position {:>12}  amount {}", b.position, b.amount);
                    }
                }
            }
        }

        LedgerCommand::EpochInfo => {
            let info = token.engine().epoch_info(pointer);
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Position:      {}", info.pointer);
                println!("Epoch type:    {}", token.epoch_type());
                println!("Current epoch: {} ({}..={})", info.current, info.bounds.start, info.bounds.end);
                println!("Valid epochs:  {}..={}", info.first_valid, info.last_valid);
                println!("Expiry cutoff: {}", info.cutoff);
                println!("Epoch length:  {}", token.epoch_length());
                println!("Validity:      {} epochs", token.validity_duration());
            }
        }

        LedgerCommand::Supply => {
            let (minted, burned) = token
                .engine()
                .query(|q| (q.total_supply_minted(), q.total_burned()));
            let report = SupplyReport { minted, burned };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Token:  {} ({})", token.name(), token.symbol());
                println!("Minted: {}", report.minted);
                println!("Burned: {}", report.burned);
            }
        }
    }

    token.engine().flush().context("flushing ledger database")?;
    Ok(())
}

fn cmd_init(data_dir: &Path, params: LedgerParams, force: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(data_dir).context("opening ledger database")?);

    if LedgerParams::load(&db)?.is_some() && !force {
        bail!(
            "Ledger at {} is already initialised. Pass --force to discard its balances.",
            data_dir.display()
        );
    }

    let window = params.window()?;
    let engine = LedgerEngine::init(Arc::clone(&db), window).context("initialising ledger")?;
    params.store(&db)?;
    engine.flush()?;

    info!(data_dir = %data_dir.display(), "ledger initialised");
    println!("Initialised {} ({}) at {}", params.name, params.symbol, data_dir.display());
    println!("  epoch type:      {}", params.epoch_type);
    println!("  origin:          {}", window.origin);
    println!("  bucket duration: {}", window.bucket_duration);
    println!("  window size:     {}", window.window_size);
    Ok(())
}

fn open_token(data_dir: &Path, at: Option<Position>) -> anyhow::Result<(ExpiringToken<HostPosition>, LedgerParams)> {
    let db = Arc::new(StateDb::open(data_dir).context("opening ledger database")?);
    let params = LedgerParams::load(&db)?
        .with_context(|| format!("no ledger at {}; run `epochx init` first", data_dir.display()))?;
    let engine = LedgerEngine::open(db)?
        .with_context(|| format!("ledger at {} has params but no window", data_dir.display()))?;

    let source = HostPosition {
        at: resolve_pointer(at, &params, engine.last_pointer()),
        kind: params.epoch_type,
    };
    Ok((ExpiringToken::with_engine(params.metadata(), engine, source), params))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_account(s: &str) -> Result<AccountId, String> {
    match s.strip_prefix('@') {
        Some("") => Err("empty account label".into()),
        Some(label) => Ok(AccountId::from_label(label)),
        None if s.starts_with("0x") => AccountId::from_hex(s).map_err(|e| e.to_string()),
        None => AccountId::from_b58(s).map_err(|e| e.to_string()),
    }
}

fn parse_amount(s: &str) -> Result<Balance, String> {
    if s.eq_ignore_ascii_case("max") {
        return Ok(INFINITE_ALLOWANCE);
    }
    s.replace('_', "")
        .parse()
        .map_err(|e| format!("invalid amount {s:?}: {e}"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
