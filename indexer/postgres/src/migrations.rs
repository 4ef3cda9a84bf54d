//! Versioned schema of the projection database.
//!
//! Migrations are append-only. Each one runs in its own transaction and is
//! recorded in `schema_migrations`, so running them again is a no-op.
use error_stack::Result;
use escrow_indexer_common::{IndexerError, IndexerErrorResultExt};
use tokio_postgres::Client;
use tracing::info;

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create projection tables",
        sql: r#"
CREATE TABLE accounts (
    address TEXT PRIMARY KEY,
    is_creator BOOLEAN NOT NULL DEFAULT FALSE,
    total_pledged TEXT NOT NULL
);

CREATE TABLE projects (
    project_id BIGINT PRIMARY KEY,
    creator TEXT NOT NULL REFERENCES accounts (address),
    funding_goal TEXT NOT NULL,
    deadline BIGINT NOT NULL,
    cumulative_pledged TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('funding', 'active', 'closed')),
    created_block BIGINT NOT NULL
);

CREATE TABLE milestones (
    project_id BIGINT NOT NULL REFERENCES projects (project_id),
    milestone_id BIGINT NOT NULL,
    title TEXT NOT NULL,
    amount TEXT NOT NULL,
    status TEXT NOT NULL
        CHECK (status IN ('pending', 'voting', 'approved', 'rejected', 'paid')),
    is_activated BOOLEAN NOT NULL DEFAULT FALSE,
    approve_weight TEXT NOT NULL,
    reject_weight TEXT NOT NULL,
    PRIMARY KEY (project_id, milestone_id)
);

CREATE TABLE pledges (
    tx_hash TEXT PRIMARY KEY,
    project_id BIGINT NOT NULL REFERENCES projects (project_id),
    backer TEXT NOT NULL,
    amount TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('active', 'refunded')),
    block_number BIGINT NOT NULL
);

CREATE TABLE votes (
    project_id BIGINT NOT NULL,
    milestone_id BIGINT NOT NULL,
    backer TEXT NOT NULL,
    approve BOOLEAN NOT NULL,
    weight TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    PRIMARY KEY (project_id, milestone_id, backer),
    FOREIGN KEY (project_id, milestone_id) REFERENCES milestones (project_id, milestone_id)
);

CREATE TABLE releases (
    tx_hash TEXT PRIMARY KEY,
    project_id BIGINT NOT NULL,
    milestone_id BIGINT NOT NULL,
    amount TEXT NOT NULL,
    block_number BIGINT NOT NULL,
    UNIQUE (project_id, milestone_id),
    FOREIGN KEY (project_id, milestone_id) REFERENCES milestones (project_id, milestone_id)
);

CREATE TABLE refunds (
    tx_hash TEXT NOT NULL,
    pledge_tx_hash TEXT NOT NULL REFERENCES pledges (tx_hash),
    project_id BIGINT NOT NULL REFERENCES projects (project_id),
    backer TEXT NOT NULL,
    amount TEXT NOT NULL,
    block_number BIGINT NOT NULL,
    PRIMARY KEY (tx_hash, pledge_tx_hash)
);
"#,
    },
    Migration {
        version: 2,
        name: "create checkpoint table",
        sql: r#"
CREATE TABLE checkpoint (
    contract_address TEXT PRIMARY KEY,
    last_processed_block BIGINT NOT NULL DEFAULT 0,
    lease_owner TEXT,
    lease_expires_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#,
    },
    Migration {
        version: 3,
        name: "index active pledges by backer",
        sql: r#"
CREATE INDEX pledges_project_backer_idx ON pledges (project_id, backer) WHERE status = 'active';
"#,
    },
];

const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

// Serializes concurrent migration runs.
const MIGRATIONS_LOCK_KEY: i64 = 0x6573_6372_6f77;

/// Applies pending migrations in order. Returns the versions applied.
pub async fn run_migrations(client: &mut Client) -> Result<Vec<i32>, IndexerError> {
    client
        .batch_execute(CREATE_MIGRATIONS_TABLE)
        .await
        .projection("failed to create schema_migrations table")?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        let tx = client
            .transaction()
            .await
            .projection("failed to start migration transaction")?;

        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATIONS_LOCK_KEY])
            .await
            .projection("failed to lock schema_migrations")?;

        let existing = tx
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[&migration.version],
            )
            .await
            .projection("failed to read schema_migrations")?;
        if existing.is_some() {
            continue;
        }

        info!(version = migration.version, name = migration.name, "applying migration");
        tx.batch_execute(migration.sql)
            .await
            .projection(&format!("failed to apply migration {}", migration.version))?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES ($1)",
            &[&migration.version],
        )
        .await
        .projection("failed to record migration")?;
        tx.commit()
            .await
            .projection("failed to commit migration")?;

        applied.push(migration.version);
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::MIGRATIONS;

    #[test]
    fn test_versions_are_sequential() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, index as i32 + 1, "{}", migration.name);
        }
    }
}
