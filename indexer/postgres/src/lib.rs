mod checkpoint;
mod configuration;
mod connection;
mod migrations;
mod projection;

pub use self::checkpoint::PostgresCheckpoint;
pub use self::configuration::{PostgresConfiguration, PostgresOptions, TlsConfiguration};
pub use self::connection::connect;
pub use self::migrations::{run_migrations, Migration, MIGRATIONS};
pub use self::projection::PostgresProjection;
