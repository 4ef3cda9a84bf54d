use error_stack::{Result, ResultExt};
use escrow_indexer_common::{IndexerError, IndexerErrorResultExt};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

use crate::configuration::{PostgresConfiguration, TlsConfiguration};

/// Connects to PostgreSQL and drives the connection on a background task.
pub async fn connect(config: &PostgresConfiguration) -> Result<Client, IndexerError> {
    info!("connecting to database");

    // Connector and connection types differ, so each branch spawns its own connection.
    let client = match &config.tls {
        TlsConfiguration::NoTls => {
            info!("using insecure connection");
            let (client, connection) = config
                .pg
                .connect(NoTls)
                .await
                .temporary("failed to connect to postgres (no tls)")?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    warn!(err = ?err, "postgres connection error");
                }
            });
            client
        }
        TlsConfiguration::Tls {
            certificate,
            accept_invalid_certificates,
            disable_system_roots,
            accept_invalid_hostnames,
            use_sni,
        } => {
            info!("configure tls connection");
            let mut builder = TlsConnector::builder();

            if let Some(certificate) = certificate {
                let pem = tokio::fs::read(certificate)
                    .await
                    .change_context(IndexerError::Configuration)
                    .attach_printable_lazy(|| {
                        format!("failed to read tls certificate at {certificate:?}")
                    })?;
                let pem = Certificate::from_pem(&pem)
                    .configuration("failed to build certificate from PEM file")?;
                builder.add_root_certificate(pem);
            }

            if let Some(accept_invalid_certificates) = accept_invalid_certificates {
                builder.danger_accept_invalid_certs(*accept_invalid_certificates);
            }

            if let Some(disable_system_roots) = disable_system_roots {
                builder.disable_built_in_roots(*disable_system_roots);
            }

            if let Some(accept_invalid_hostnames) = accept_invalid_hostnames {
                builder.danger_accept_invalid_hostnames(*accept_invalid_hostnames);
            }

            if let Some(use_sni) = use_sni {
                builder.use_sni(*use_sni);
            }

            let connector = builder
                .build()
                .configuration("failed to build tls connector")?;
            let connector = MakeTlsConnector::new(connector);
            let (client, connection) = config
                .pg
                .connect(connector)
                .await
                .temporary("failed to connect to postgres (tls)")?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    warn!(err = ?err, "postgres connection error");
                }
            });
            client
        }
    };

    info!("client connected successfully");

    Ok(client)
}
