//! Per-case schema lifecycle: every test case writes into its own freshly
//! created schema, which is dropped again once the case is over.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::database::{Database, DatabaseFactory};
use crate::session::DEFAULT_TIMEOUT_SECONDS;
use crate::{DestinationConfig, Error, Result};

pub const SCHEMA_PREFIX: &str = "integration_test";
pub const SCHEMA_SUFFIX_LENGTH: usize = 5;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Appends `separator` and `len` random lowercase alphanumerics to `base`.
pub fn add_random_suffix(base: &str, separator: &str, len: usize) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{base}{separator}{suffix}")
}

pub fn random_schema_name() -> String {
    add_random_suffix(SCHEMA_PREFIX, "_", SCHEMA_SUFFIX_LENGTH)
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA {schema}")
}

pub fn drop_schema_sql(schema: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {schema}")
}

pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::TimedOut)?
}

/// Creates a uniquely named schema and returns `base_config` pointed at it.
///
/// The schema is created through a handle opened from `base_config`. When the
/// outcome of `CREATE SCHEMA` is unknown (timeout or transport failure), one
/// `DROP SCHEMA IF EXISTS` is attempted before the error is returned. A
/// statement the warehouse rejected is returned without a drop.
pub async fn setup_schema<F: DatabaseFactory>(
    factory: &F,
    base_config: &DestinationConfig,
    timeout: Duration,
) -> Result<DestinationConfig> {
    let schema = random_schema_name();
    let db = with_timeout(timeout, factory.open(base_config)).await?;
    match with_timeout(timeout, db.execute(&create_schema_sql(&schema))).await {
        Ok(()) => {}
        Err(e @ Error::Query(_)) => return Err(e),
        Err(e) => {
            drop_possibly_created(&db, &schema, timeout).await;
            return Err(e);
        }
    }
    tracing::info!(%schema, "created test schema");
    Ok(base_config.with_schema(schema))
}

async fn drop_possibly_created<D: Database>(db: &D, schema: &str, timeout: Duration) {
    match with_timeout(timeout, db.execute(&drop_schema_sql(schema))).await {
        Ok(()) => tracing::info!(%schema, "dropped schema after failed setup"),
        Err(error) => tracing::warn!(%schema, %error, "could not drop schema after failed setup"),
    }
}

/// Drops the schema `config` points at. Attempted once, never retried.
pub async fn teardown_schema<F: DatabaseFactory>(
    factory: &F,
    base_config: &DestinationConfig,
    config: &DestinationConfig,
    timeout: Duration,
) -> Result<()> {
    let schema = config
        .schema()
        .ok_or_else(|| Error::Configuration("config has no 'schema' to drop".into()))?;
    with_timeout(timeout, async {
        let db = factory.open(base_config).await?;
        db.execute(&drop_schema_sql(schema)).await
    })
    .await?;
    tracing::info!(%schema, "dropped test schema");
    Ok(())
}
