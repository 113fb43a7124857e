//! Warehouse handles the fixture drives.

use crate::{DestinationConfig, Result, SnowflakeRow, SnowflakeSession};

/// A connection able to run statements and buffered queries.
#[allow(async_fn_in_trait)]
pub trait Database {
    /// Runs a statement and discards whatever it returns.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Runs a query and maps every returned row, failing on the first row the
    /// mapper rejects.
    async fn buffered_query<T, F>(&self, sql: &str, mapper: F) -> Result<Vec<T>>
    where
        F: FnMut(&SnowflakeRow) -> Result<T>;
}

/// Opens [`Database`] handles from a destination configuration.
#[allow(async_fn_in_trait)]
pub trait DatabaseFactory {
    type Database: Database;

    async fn open(&self, config: &DestinationConfig) -> Result<Self::Database>;
}

pub struct SnowflakeDatabase {
    session: SnowflakeSession,
}

impl SnowflakeDatabase {
    pub async fn connect(config: &DestinationConfig) -> Result<Self> {
        let client = config.client()?;
        let session = client.create_session().await?;
        Ok(Self { session })
    }

    pub fn session(&self) -> &SnowflakeSession {
        &self.session
    }
}

impl Database for SnowflakeDatabase {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.session.query(sql).await?;
        Ok(())
    }

    async fn buffered_query<T, F>(&self, sql: &str, mapper: F) -> Result<Vec<T>>
    where
        F: FnMut(&SnowflakeRow) -> Result<T>,
    {
        let rows = self.session.query(sql).await?;
        rows.iter().map(mapper).collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeDatabaseFactory;

impl DatabaseFactory for SnowflakeDatabaseFactory {
    type Database = SnowflakeDatabase;

    async fn open(&self, config: &DestinationConfig) -> Result<SnowflakeDatabase> {
        SnowflakeDatabase::connect(config).await
    }
}
