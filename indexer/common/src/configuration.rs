use std::{fmt, path::PathBuf, time::Duration};

use clap::Args;
use error_stack::{Result, ResultExt};
use escrow_core::Address;
use exponential_backoff::Backoff;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 12;
pub const DEV_CONFIRMATION_DEPTH: u64 = 1;
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000;
pub const DEFAULT_BACKFILL_CHUNK_SIZE: u64 = 4_000;
pub const DEFAULT_MAX_RETRIES: u32 = 6;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 15_000;
pub const DEFAULT_LEASE_SECONDS: u64 = 60;

#[derive(Debug)]
pub struct OptionsError;

impl error_stack::Context for OptionsError {}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid indexer options")
    }
}

/// Options to connect to the ledger.
#[derive(Args, Debug, Default, Clone)]
pub struct LedgerOptions {
    /// JSON-RPC endpoint of the ledger node.
    #[arg(long, env = "LEDGER_RPC_URL")]
    pub rpc_url: Option<String>,
    /// Address of the escrow contract to index.
    #[arg(long, env = "ESCROW_CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,
}

/// How deep a block must be before it's indexed.
#[derive(Args, Debug, Default, Clone)]
pub struct FinalityOptions {
    /// Number of blocks behind the chain head considered safe to index.
    #[arg(long, env = "CONFIRMATION_DEPTH")]
    pub confirmation_depth: Option<u64>,
    /// Development mode: index blocks one confirmation behind the head.
    #[arg(long, env = "INDEXER_DEV_MODE")]
    pub dev: bool,
}

/// Options for the live sync loop.
#[derive(Args, Debug, Default, Clone)]
pub struct SyncOptions {
    /// Delay between polls when there are no new safe blocks, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,
    /// Maximum number of blocks fetched per window.
    #[arg(long, env = "FETCH_CHUNK_SIZE")]
    pub chunk_size: Option<u64>,
    /// Stop after indexing this block.
    #[arg(long, env = "ENDING_BLOCK")]
    pub ending_block: Option<u64>,
}

/// Options for a backfill run.
#[derive(Args, Debug, Default, Clone)]
pub struct BackfillOptions {
    /// First block to replay.
    #[arg(long, env = "FROM_BLOCK")]
    pub from_block: Option<u64>,
    /// Last block to replay. Defaults to the safe head.
    #[arg(long, env = "TO_BLOCK")]
    pub to_block: Option<u64>,
    /// Number of blocks fetched per request.
    #[arg(long, env = "BACKFILL_CHUNK_SIZE")]
    pub backfill_chunk_size: Option<u64>,
}

/// Retry policy for ledger requests.
#[derive(Args, Debug, Default, Clone)]
pub struct BackoffOptions {
    /// Number of retries before giving up.
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "BASE_BACKOFF_MS")]
    pub base_backoff_ms: Option<u64>,
    /// Upper bound of the delay between retries, in milliseconds.
    #[arg(long, env = "MAX_BACKOFF_MS")]
    pub max_backoff_ms: Option<u64>,
}

/// Options for the checkpoint store and its lease.
#[derive(Args, Debug, Default, Clone)]
pub struct CheckpointOptions {
    /// Store the checkpoint in this directory.
    #[arg(long, env = "CHECKPOINT_DIR")]
    pub checkpoint_dir: Option<PathBuf>,
    /// Identifies this indexer as the checkpoint lease owner.
    #[arg(long, env = "INDEXER_ID")]
    pub indexer_id: Option<String>,
    /// Duration of the checkpoint lease, in seconds.
    #[arg(long, env = "LEASE_SECONDS")]
    pub lease_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SyncConfiguration {
    pub contract: Address,
    pub poll_interval: Duration,
    pub confirmation_depth: u64,
    pub chunk_size: u64,
    pub ending_block: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BackfillConfiguration {
    pub contract: Address,
    pub from_block: u64,
    pub to_block: Option<u64>,
    pub chunk_size: u64,
    pub confirmation_depth: u64,
}

#[derive(Debug, Clone)]
pub struct LeaseConfiguration {
    pub owner: String,
    pub ttl: Duration,
}

impl LedgerOptions {
    pub fn to_contract_address(&self) -> Result<Address, OptionsError> {
        let address = self
            .contract_address
            .as_ref()
            .ok_or(OptionsError)
            .attach_printable("missing contract address")?;

        address
            .parse::<Address>()
            .change_context(OptionsError)
            .attach_printable_lazy(|| format!("invalid contract address: {address}"))
    }

    pub fn to_rpc_url(&self) -> Result<String, OptionsError> {
        let url = self
            .rpc_url
            .clone()
            .ok_or(OptionsError)
            .attach_printable("missing ledger rpc url")?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(OptionsError)
                .attach_printable_lazy(|| format!("ledger rpc url must be http(s): {url}"));
        }

        Ok(url)
    }
}

impl FinalityOptions {
    /// An explicit depth always wins over dev mode.
    pub fn to_confirmation_depth(&self) -> u64 {
        match (self.confirmation_depth, self.dev) {
            (Some(depth), _) => depth,
            (None, true) => DEV_CONFIRMATION_DEPTH,
            (None, false) => DEFAULT_CONFIRMATION_DEPTH,
        }
    }
}

fn non_zero_chunk(size: u64) -> Result<u64, OptionsError> {
    if size == 0 {
        return Err(OptionsError).attach_printable("chunk size must be greater than zero");
    }
    Ok(size)
}

impl SyncOptions {
    pub fn to_sync_configuration(
        &self,
        ledger: &LedgerOptions,
        finality: &FinalityOptions,
    ) -> Result<SyncConfiguration, OptionsError> {
        let contract = ledger.to_contract_address()?;
        let chunk_size = non_zero_chunk(self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE))?;
        let poll_interval =
            Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));

        Ok(SyncConfiguration {
            contract,
            poll_interval,
            confirmation_depth: finality.to_confirmation_depth(),
            chunk_size,
            ending_block: self.ending_block,
        })
    }
}

impl BackfillOptions {
    pub fn to_backfill_configuration(
        &self,
        ledger: &LedgerOptions,
        finality: &FinalityOptions,
    ) -> Result<BackfillConfiguration, OptionsError> {
        let contract = ledger.to_contract_address()?;
        let chunk_size = non_zero_chunk(
            self.backfill_chunk_size
                .unwrap_or(DEFAULT_BACKFILL_CHUNK_SIZE),
        )?;
        let from_block = self.from_block.unwrap_or_default();

        if let Some(to_block) = self.to_block {
            if to_block < from_block {
                return Err(OptionsError).attach_printable_lazy(|| {
                    format!("to block {to_block} is before from block {from_block}")
                });
            }
        }

        Ok(BackfillConfiguration {
            contract,
            from_block,
            to_block: self.to_block,
            chunk_size,
            confirmation_depth: finality.to_confirmation_depth(),
        })
    }
}

impl BackoffOptions {
    pub fn to_backoff(&self) -> Result<Backoff, OptionsError> {
        let retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if retries == 0 {
            return Err(OptionsError).attach_printable("max retries must be greater than zero");
        }
        let min_delay = self.base_backoff_ms.unwrap_or(DEFAULT_BASE_BACKOFF_MS);
        let max_delay = self.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS);
        let mut backoff = Backoff::new(
            retries,
            Duration::from_millis(min_delay),
            Some(Duration::from_millis(max_delay)),
        );
        backoff.set_factor(2);
        Ok(backoff)
    }
}

impl CheckpointOptions {
    /// Lease settings. Generates a random owner id when none is configured.
    pub fn to_lease_configuration(&self) -> Result<LeaseConfiguration, OptionsError> {
        let ttl = Duration::from_secs(self.lease_seconds.unwrap_or(DEFAULT_LEASE_SECONDS));
        if ttl.is_zero() {
            return Err(OptionsError).attach_printable("lease duration must be greater than zero");
        }

        let owner = self
            .indexer_id
            .clone()
            .unwrap_or_else(|| format!("indexer-{}", nanoid::nanoid!(10)));

        Ok(LeaseConfiguration { owner, ttl })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        BackfillOptions, BackoffOptions, CheckpointOptions, FinalityOptions, LedgerOptions,
        OptionsError, SyncOptions,
    };

    fn ledger() -> LedgerOptions {
        LedgerOptions {
            rpc_url: Some("http://localhost:8545".to_string()),
            contract_address: Some("0x00000000000000000000000000000000000000AA".to_string()),
        }
    }

    #[test]
    pub fn test_confirmation_depth_resolution() {
        let default = FinalityOptions::default();
        assert_eq!(default.to_confirmation_depth(), 12);

        let dev = FinalityOptions {
            dev: true,
            ..FinalityOptions::default()
        };
        assert_eq!(dev.to_confirmation_depth(), 1);

        let explicit = FinalityOptions {
            confirmation_depth: Some(3),
            dev: true,
        };
        assert_eq!(explicit.to_confirmation_depth(), 3);
    }

    #[test]
    pub fn test_sync_configuration_defaults() {
        let config = SyncOptions::default()
            .to_sync_configuration(&ledger(), &FinalityOptions::default())
            .expect("sync configuration");

        assert_eq!(
            config.contract.as_str(),
            "0x00000000000000000000000000000000000000aa"
        );
        assert_eq!(config.poll_interval, Duration::from_millis(5_000));
        assert_eq!(config.chunk_size, 1_000);
        assert_eq!(config.confirmation_depth, 12);
        assert!(config.ending_block.is_none());
    }

    #[test]
    pub fn test_invalid_options() {
        let missing = LedgerOptions::default();
        let Err(err) =
            SyncOptions::default().to_sync_configuration(&missing, &FinalityOptions::default())
        else {
            panic!("expected error");
        };
        assert!(err.downcast_ref::<OptionsError>().is_some());

        let zero_chunk = BackfillOptions {
            backfill_chunk_size: Some(0),
            ..BackfillOptions::default()
        };
        assert!(zero_chunk
            .to_backfill_configuration(&ledger(), &FinalityOptions::default())
            .is_err());

        let inverted = BackfillOptions {
            from_block: Some(10),
            to_block: Some(5),
            ..BackfillOptions::default()
        };
        assert!(inverted
            .to_backfill_configuration(&ledger(), &FinalityOptions::default())
            .is_err());

        let bad_url = LedgerOptions {
            rpc_url: Some("localhost:8545".to_string()),
            ..ledger()
        };
        assert!(bad_url.to_rpc_url().is_err());
    }

    #[test]
    pub fn test_backoff_and_lease() {
        let backoff = BackoffOptions {
            max_retries: Some(2),
            base_backoff_ms: Some(1),
            max_backoff_ms: Some(5),
        }
        .to_backoff()
        .expect("backoff");
        assert!((&backoff).into_iter().next().is_some());

        let no_retries = BackoffOptions {
            max_retries: Some(0),
            ..BackoffOptions::default()
        };
        let Err(err) = no_retries.to_backoff() else {
            panic!("expected error");
        };
        assert!(err.downcast_ref::<OptionsError>().is_some());

        let lease = CheckpointOptions::default()
            .to_lease_configuration()
            .expect("lease configuration");
        assert!(lease.owner.starts_with("indexer-"));
        assert_eq!(lease.ttl, Duration::from_secs(60));

        let named = CheckpointOptions {
            indexer_id: Some("indexer-a".to_string()),
            ..CheckpointOptions::default()
        }
        .to_lease_configuration()
        .expect("lease configuration");
        assert_eq!(named.owner, "indexer-a");
    }
}
