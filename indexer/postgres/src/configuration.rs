use std::{path::PathBuf, str::FromStr};

use clap::Args;
use error_stack::Result;
use escrow_indexer_common::{IndexerError, IndexerErrorResultExt};
use tokio_postgres::Config;

#[derive(Debug, Clone)]
pub enum TlsConfiguration {
    NoTls,
    Tls {
        certificate: Option<PathBuf>,
        accept_invalid_certificates: Option<bool>,
        disable_system_roots: Option<bool>,
        accept_invalid_hostnames: Option<bool>,
        use_sni: Option<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct PostgresConfiguration {
    pub pg: Config,
    pub tls: TlsConfiguration,
}

/// Options to connect to the projection database.
#[derive(Debug, Args, Default, Clone)]
pub struct PostgresOptions {
    /// Connection string to the PostgreSQL server.
    #[arg(long, env = "POSTGRES_CONNECTION_STRING")]
    pub connection_string: Option<String>,
    /// Disable TLS when connecting to the PostgreSQL server.
    #[arg(long, env = "POSTGRES_NO_TLS")]
    pub no_tls: Option<bool>,
    /// Path to the PEM-formatted X509 TLS certificate file.
    #[arg(long, env = "POSTGRES_TLS_CERTIFICATE")]
    pub tls_certificate: Option<String>,
    /// Disable system root certificates.
    #[arg(long, env = "POSTGRES_TLS_DISABLE_SYSTEM_ROOTS")]
    pub tls_disable_system_roots: Option<bool>,
    /// Disable certificate validation.
    #[arg(long, env = "POSTGRES_TLS_ACCEPT_INVALID_CERTIFICATES")]
    pub tls_accept_invalid_certificates: Option<bool>,
    /// Disable hostname validation.
    #[arg(long, env = "POSTGRES_TLS_ACCEPT_INVALID_HOSTNAMES")]
    pub tls_accept_invalid_hostnames: Option<bool>,
    /// Use Server Name Indication (SNI).
    #[arg(long, env = "POSTGRES_TLS_USE_SNI")]
    pub tls_use_sni: Option<bool>,
}

impl PostgresOptions {
    pub fn to_postgres_configuration(&self) -> Result<PostgresConfiguration, IndexerError> {
        let Some(connection_string) = &self.connection_string else {
            return Err(IndexerError::configuration("missing connection string"));
        };
        let pg = Config::from_str(connection_string)
            .configuration("failed to build postgres config from connection string")?;

        let tls = if self.no_tls.unwrap_or(false) {
            TlsConfiguration::NoTls
        } else {
            TlsConfiguration::Tls {
                certificate: self.tls_certificate.as_ref().map(PathBuf::from),
                accept_invalid_certificates: self.tls_accept_invalid_certificates,
                disable_system_roots: self.tls_disable_system_roots,
                accept_invalid_hostnames: self.tls_accept_invalid_hostnames,
                use_sni: self.tls_use_sni,
            }
        };

        Ok(PostgresConfiguration { pg, tls })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use escrow_indexer_common::IndexerError;

    use super::{PostgresOptions, TlsConfiguration};

    #[test]
    pub fn test_tls_is_on_by_default() {
        let options = PostgresOptions {
            connection_string: Some("postgresql://postgres@localhost:5432/escrow".to_string()),
            tls_use_sni: Some(true),
            ..Default::default()
        };

        let configuration = options.to_postgres_configuration().unwrap();
        assert_eq!(configuration.pg.get_dbname(), Some("escrow"));
        assert_matches!(
            configuration.tls,
            TlsConfiguration::Tls {
                use_sni: Some(true),
                certificate: None,
                ..
            }
        );

        let options = PostgresOptions {
            no_tls: Some(true),
            ..options
        };
        let configuration = options.to_postgres_configuration().unwrap();
        assert_matches!(configuration.tls, TlsConfiguration::NoTls);
    }

    #[test]
    pub fn test_connection_string_is_required() {
        let err = PostgresOptions::default()
            .to_postgres_configuration()
            .unwrap_err();
        assert_matches!(err.current_context(), IndexerError::Configuration);
    }
}
