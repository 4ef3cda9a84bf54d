use std::{fmt, process::ExitCode};

use error_stack::{report, Context, Report, Result, ResultExt};

/// Indexer error.
///
/// Errors talking to the ledger node are `Fetch` errors, errors writing the
/// projection are `Projection` errors. Use `Temporary` for anything else that may
/// succeed on restart.
#[derive(Debug)]
pub enum IndexerError {
    /// Configuration error. Should not retry.
    Configuration,
    /// Temporary error. Should retry.
    Temporary,
    /// Fatal error. Should not retry.
    Fatal,
    /// Ledger fetch failed, or retries were exhausted.
    Fetch,
    /// Projection store error.
    Projection,
    /// Checkpoint store error, including a lease held by another indexer.
    Checkpoint,
}

impl error_stack::Context for IndexerError {}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::Configuration => f.write_str("indexer configuration error"),
            IndexerError::Temporary => f.write_str("temporary indexer error"),
            IndexerError::Fatal => f.write_str("fatal indexer error"),
            IndexerError::Fetch => f.write_str("ledger fetch error"),
            IndexerError::Projection => f.write_str("projection store error"),
            IndexerError::Checkpoint => f.write_str("checkpoint store error"),
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T, IndexerError> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.downcast_ref::<IndexerError>() {
                    Some(IndexerError::Configuration) => ExitCode::from(78),
                    Some(IndexerError::Temporary) => ExitCode::from(75),
                    Some(IndexerError::Checkpoint) => ExitCode::from(75),
                    Some(IndexerError::Fetch) => ExitCode::from(69),
                    Some(IndexerError::Projection) => ExitCode::FAILURE,
                    Some(IndexerError::Fatal) => ExitCode::FAILURE,
                    None => ExitCode::FAILURE,
                }
            }
        }
    }
}

impl IndexerError {
    pub fn configuration(reason: &str) -> Report<IndexerError> {
        report!(IndexerError::Configuration).attach_printable(reason.to_string())
    }

    pub fn checkpoint(reason: &str) -> Report<IndexerError> {
        report!(IndexerError::Checkpoint).attach_printable(reason.to_string())
    }

    pub fn fetch(reason: &str) -> Report<IndexerError> {
        report!(IndexerError::Fetch).attach_printable(reason.to_string())
    }

    pub fn projection(reason: &str) -> Report<IndexerError> {
        report!(IndexerError::Projection).attach_printable(reason.to_string())
    }
}

pub trait IndexerErrorResultExt {
    type Ok;
    fn configuration(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn temporary(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn fatal(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn fetch(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn projection(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn checkpoint(self, reason: &str) -> Result<Self::Ok, IndexerError>;
}

impl<T, C> IndexerErrorResultExt for core::result::Result<T, C>
where
    C: Context,
{
    type Ok = T;

    fn configuration(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Configuration)
            .attach_printable(reason.to_string())
    }

    fn temporary(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Temporary)
            .attach_printable(reason.to_string())
    }

    fn fatal(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Fatal)
            .attach_printable(reason.to_string())
    }

    fn fetch(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Fetch)
            .attach_printable(reason.to_string())
    }

    fn projection(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Projection)
            .attach_printable(reason.to_string())
    }

    fn checkpoint(self, reason: &str) -> Result<T, IndexerError> {
        self.change_context(IndexerError::Checkpoint)
            .attach_printable(reason.to_string())
    }
}

pub trait IndexerErrorReportExt {
    fn configuration(self, reason: &str) -> Report<IndexerError>;
    fn temporary(self, reason: &str) -> Report<IndexerError>;
    fn fatal(self, reason: &str) -> Report<IndexerError>;
    fn fetch(self, reason: &str) -> Report<IndexerError>;
    fn projection(self, reason: &str) -> Report<IndexerError>;
    fn checkpoint(self, reason: &str) -> Report<IndexerError>;
}

impl<C> IndexerErrorReportExt for Report<C> {
    fn configuration(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Configuration)
            .attach_printable(reason.to_string())
    }

    fn temporary(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Temporary)
            .attach_printable(reason.to_string())
    }

    fn fatal(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Fatal)
            .attach_printable(reason.to_string())
    }

    fn fetch(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Fetch)
            .attach_printable(reason.to_string())
    }

    fn projection(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Projection)
            .attach_printable(reason.to_string())
    }

    fn checkpoint(self, reason: &str) -> Report<IndexerError> {
        self.change_context(IndexerError::Checkpoint)
            .attach_printable(reason.to_string())
    }
}
