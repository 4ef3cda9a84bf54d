use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use error_stack::Result;
use escrow_indexer_common::{
    checkpoint::{Checkpoint, CheckpointManager, CheckpointStore},
    client::{JsonRpcLedgerClient, RetryingLedgerClient},
    indexer_cli_style, initialize_indexer, load_dotenv,
    projection::ProjectionStore,
    sync::{Backfill, Dispatcher, LiveSync},
    BackfillOptions, BackoffOptions, CheckpointOptions, FinalityOptions, IndexerError,
    IndexerErrorReportExt, LedgerOptions, ReportExt, SyncOptions,
};
use escrow_indexer_postgres::{
    connect, run_migrations, PostgresCheckpoint, PostgresConfiguration, PostgresOptions,
    PostgresProjection,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = indexer_cli_style())]
struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the ledger and keep the projection up to date.
    Run(RunArgs),
    /// Replay a range of blocks into the projection.
    Backfill(BackfillArgs),
    /// Move the checkpoint, optionally clearing the projection.
    Reset(ResetArgs),
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    ledger: LedgerOptions,
    #[command(flatten)]
    finality: FinalityOptions,
    #[command(flatten)]
    sync: SyncOptions,
    #[command(flatten)]
    backoff: BackoffOptions,
    #[command(flatten)]
    checkpoint: CheckpointOptions,
    #[command(flatten)]
    postgres: PostgresOptions,
}

#[derive(Args, Debug)]
struct BackfillArgs {
    #[command(flatten)]
    ledger: LedgerOptions,
    #[command(flatten)]
    finality: FinalityOptions,
    #[command(flatten)]
    backfill: BackfillOptions,
    #[command(flatten)]
    backoff: BackoffOptions,
    #[command(flatten)]
    checkpoint: CheckpointOptions,
    #[command(flatten)]
    postgres: PostgresOptions,
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Block to move the checkpoint to.
    #[arg(long, default_value_t = 0)]
    to_block: u64,
    /// Also delete every row of the projection.
    #[arg(long)]
    truncate: bool,
    #[command(flatten)]
    ledger: LedgerOptions,
    #[command(flatten)]
    checkpoint: CheckpointOptions,
    #[command(flatten)]
    postgres: PostgresOptions,
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[command(flatten)]
    postgres: PostgresOptions,
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = load_dotenv();
    if dotenv.is_err() {
        return dotenv.to_exit_code();
    }

    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<(), IndexerError> {
    let ct = CancellationToken::new();
    initialize_indexer(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), ct.clone())?;

    match args.subcommand {
        Command::Run(args) => run(args, ct).await,
        Command::Backfill(args) => backfill(args, ct).await,
        Command::Reset(args) => reset(args, ct).await,
        Command::Migrate(args) => migrate(args).await,
    }
}

async fn run(args: RunArgs, ct: CancellationToken) -> Result<(), IndexerError> {
    let sync = args
        .sync
        .to_sync_configuration(&args.ledger, &args.finality)
        .map_err(|err| err.configuration("invalid sync options"))?;
    let lease = args
        .checkpoint
        .to_lease_configuration()
        .map_err(|err| err.configuration("invalid checkpoint options"))?;
    let ledger = ledger_client(&args.ledger, &args.backoff)?;
    let postgres = args.postgres.to_postgres_configuration()?;

    info!(
        contract = %sync.contract,
        confirmation_depth = sync.confirmation_depth,
        "resolved live sync configuration"
    );

    let projection = projection_store(&postgres).await?;
    let checkpoint = checkpoint_store(&args.checkpoint, &postgres).await?;
    let checkpoint = CheckpointManager::new(checkpoint, sync.contract.clone(), lease);

    LiveSync::new(ledger, Dispatcher::new(projection), checkpoint, sync)
        .run(ct)
        .await
}

async fn backfill(args: BackfillArgs, ct: CancellationToken) -> Result<(), IndexerError> {
    let backfill = args
        .backfill
        .to_backfill_configuration(&args.ledger, &args.finality)
        .map_err(|err| err.configuration("invalid backfill options"))?;
    let lease = args
        .checkpoint
        .to_lease_configuration()
        .map_err(|err| err.configuration("invalid checkpoint options"))?;
    let ledger = ledger_client(&args.ledger, &args.backoff)?;
    let postgres = args.postgres.to_postgres_configuration()?;

    info!(
        contract = %backfill.contract,
        confirmation_depth = backfill.confirmation_depth,
        "resolved backfill configuration"
    );

    let projection = projection_store(&postgres).await?;
    let checkpoint = checkpoint_store(&args.checkpoint, &postgres).await?;
    let checkpoint = CheckpointManager::new(checkpoint, backfill.contract.clone(), lease);

    let summary = Backfill::new(ledger, Dispatcher::new(projection), checkpoint, backfill)
        .run(ct)
        .await?;

    match summary {
        None => info!("backfill cancelled"),
        Some(summary) => {
            let total = summary.total();
            info!(
                from_block = summary.from_block,
                to_block = summary.to_block,
                seen = total.seen,
                applied = total.applied,
                duplicates = total.duplicates,
                orphans = total.orphans,
                decode_failures = total.decode_failures,
                checkpoint_advanced = summary.checkpoint_advanced,
                "backfill finished"
            );
        }
    }

    Ok(())
}

async fn reset(args: ResetArgs, ct: CancellationToken) -> Result<(), IndexerError> {
    let contract = args
        .ledger
        .to_contract_address()
        .map_err(|err| err.configuration("invalid ledger options"))?;
    let lease = args
        .checkpoint
        .to_lease_configuration()
        .map_err(|err| err.configuration("invalid checkpoint options"))?;
    let postgres = args.postgres.to_postgres_configuration()?;

    let checkpoint = checkpoint_store(&args.checkpoint, &postgres).await?;
    let mut checkpoint = CheckpointManager::new(checkpoint, contract, lease);
    if !checkpoint.acquire(&ct).await? {
        return Ok(());
    }

    if args.truncate {
        info!("truncating projection");
        projection_store(&postgres).await?.truncate().await?;
    }
    checkpoint.reset(args.to_block).await?;
    checkpoint.release().await
}

async fn migrate(args: MigrateArgs) -> Result<(), IndexerError> {
    let postgres = args.postgres.to_postgres_configuration()?;
    let mut client = connect(&postgres).await?;
    let applied = run_migrations(&mut client).await?;
    info!(applied = ?applied, "database is up to date");
    Ok(())
}

fn ledger_client(
    ledger: &LedgerOptions,
    backoff: &BackoffOptions,
) -> Result<RetryingLedgerClient<JsonRpcLedgerClient>, IndexerError> {
    let rpc_url = ledger
        .to_rpc_url()
        .map_err(|err| err.configuration("invalid ledger options"))?;
    let backoff = backoff
        .to_backoff()
        .map_err(|err| err.configuration("invalid backoff options"))?;
    let client = JsonRpcLedgerClient::new(rpc_url)?;
    Ok(RetryingLedgerClient::new(client, backoff))
}

async fn projection_store(
    postgres: &PostgresConfiguration,
) -> Result<PostgresProjection, IndexerError> {
    let mut client = connect(postgres).await?;
    run_migrations(&mut client).await?;
    Ok(PostgresProjection::new(client))
}

/// Uses the checkpoint directory if given, the database otherwise.
async fn checkpoint_store(
    options: &CheckpointOptions,
    postgres: &PostgresConfiguration,
) -> Result<Box<dyn CheckpointStore>, IndexerError> {
    if let Some(store) = Checkpoint::new_from_options(options.clone()).connect()? {
        return Ok(store);
    }

    let client = connect(postgres).await?;
    Ok(Box::new(PostgresCheckpoint::new(client)))
}
