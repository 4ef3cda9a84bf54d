//! Live sync and backfill, sharing one dispatch path.
mod backfill;
mod dispatch;
mod live;

pub use self::backfill::{Backfill, BackfillSummary};
pub use self::dispatch::{DispatchCounts, DispatchOutcome, Dispatcher};
pub use self::live::LiveSync;
