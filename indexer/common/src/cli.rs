use anstyle::{AnsiColor, Style};
use clap::builder::Styles;
use error_stack::{report, Result, ResultExt};
use escrow_observability::init_opentelemetry;
use tokio_util::sync::CancellationToken;

use crate::{IndexerError, IndexerErrorReportExt};

/// Load environment variables from a `.env` file, if any.
///
/// Call this before parsing the command line so that options can fall back to
/// variables defined in the file.
pub fn load_dotenv() -> Result<(), IndexerError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(report!(err).configuration("failed to load .env file")),
    }
}

/// Initialize opentelemetry and the sigint (ctrl-c) handler.
pub fn initialize_indexer(
    package_name: &'static str,
    package_version: &'static str,
    ct: CancellationToken,
) -> Result<(), IndexerError> {
    init_opentelemetry(package_name, package_version)
        .map_err(|err| err.configuration("failed to initialize opentelemetry"))?;

    set_ctrlc_handler(ct).map_err(|err| err.fatal("failed to setup ctrl-c handler"))?;

    Ok(())
}

/// Connect the cancellation token to the ctrl-c handler.
pub fn set_ctrlc_handler(ct: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler({
        move || {
            ct.cancel();
        }
    })
    .attach_printable("failed to register ctrl-c handler")?;

    Ok(())
}

/// A clap style for the indexer CLI.
pub fn indexer_cli_style() -> Styles {
    Styles::styled()
        .header(Style::new().bold().fg_color(Some(AnsiColor::Yellow.into())))
        .error(Style::new().bold().fg_color(Some(AnsiColor::Red.into())))
        .usage(Style::new().bold().fg_color(Some(AnsiColor::Yellow.into())))
        .literal(Style::new().fg_color(Some(AnsiColor::BrightCyan.into())))
        .placeholder(Style::new())
        .valid(Style::new().fg_color(Some(AnsiColor::BrightBlue.into())))
        .invalid(
            Style::new()
                .underline()
                .fg_color(Some(AnsiColor::Red.into())),
        )
}
