//! # Snowflake Destination Acceptance
//!
//! Acceptance-test fixture for a Snowflake destination that loads through
//! internal staging. Every test case runs in its own throwaway schema; rows the
//! destination wrote are read back in emission order for verification.
//!
//! ```rust,no_run
//! # use snowflake_destination_acceptance::{
//! #     DestinationAcceptanceTest, InternalStagingAcceptanceTest, Result, TestDestinationEnv,
//! #     run_case,
//! # };
//! # async fn run() -> Result<()> {
//! let mut test = InternalStagingAcceptanceTest::new()
//!     .with_config_file("secrets/internal_staging_config.json");
//! let env = TestDestinationEnv::new("/tmp/airbyte_local");
//!
//! run_case(&mut test, &env, async |test: &InternalStagingAcceptanceTest| {
//!     // Run the destination against `test.config()?` here, then:
//!     let records = test
//!         .retrieve_records(&env, "users", None, &serde_json::json!({}))
//!         .await?;
//!     assert!(records.is_empty());
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The warehouse is reached through the bundled Snowflake client:
//!
//! ```rust,no_run
//! # use snowflake_destination_acceptance::{Result, SnowflakeAuthMethod, SnowflakeClient, SnowflakeClientConfig};
//! # async fn run() -> Result<()> {
//! let client = SnowflakeClient::new(
//!     "USERNAME",
//!     SnowflakeAuthMethod::Password("PASSWORD".to_string()),
//!     SnowflakeClientConfig {
//!         account: "ACCOUNT".to_string(),
//!         role: Some("ROLE".to_string()),
//!         warehouse: Some("WAREHOUSE".to_string()),
//!         database: Some("DATABASE".to_string()),
//!         schema: Some("SCHEMA".to_string()),
//!         timeout: Some(std::time::Duration::from_secs(30)),
//!     },
//! )?;
//! let session = client.create_session().await?;
//!
//! let rows = session.query("SELECT 1 AS ONE").await?;
//! assert_eq!(rows[0].get::<i64>("ONE")?, 1);
//! # Ok(())
//! # }
//! ```

mod acceptance;
mod auth;
mod chunk;
mod config;
mod database;
mod error;
mod naming;
mod query;
mod records;
mod row;
mod schema;
mod session;
#[cfg(test)]
mod testing;

use std::time::Duration;

pub use acceptance::{
    DestinationAcceptanceTest, IMAGE_NAME, InternalStagingAcceptanceTest, TestDestinationEnv,
    run_case,
};
pub use config::{
    DestinationConfig, INTERNAL_STAGING_CONFIG_ENV, INTERNAL_STAGING_CONFIG_PATH,
    INVALID_PASSWORD, StagingMode,
};
pub use database::{Database, DatabaseFactory, SnowflakeDatabase, SnowflakeDatabaseFactory};
pub use error::{Error, Result};
pub use naming::{NameTransformer, SnowflakeNameTransformer, resolve_identifier};
pub use query::QueryRequest;
pub use records::{
    COLUMN_NAME_AB_ID, COLUMN_NAME_DATA, COLUMN_NAME_EMITTED_AT, JsonRecord, get_ignore_case,
    retrieve_normalized_records, retrieve_records, retrieve_records_from_table,
    select_records_sql, unwrap_data_column,
};
pub use row::{SnowflakeColumn, SnowflakeColumnType, SnowflakeDecode, SnowflakeRow};
pub use schema::{
    DEFAULT_OPERATION_TIMEOUT, SCHEMA_PREFIX, add_random_suffix, create_schema_sql,
    drop_schema_sql, random_schema_name, setup_schema, teardown_schema,
};
pub use session::SnowflakeSession;

use auth::{get_base_url, login};

use reqwest::{Client, ClientBuilder, Proxy};

#[derive(Clone)]
pub struct SnowflakeClient {
    http: Client,

    username: String,
    auth: SnowflakeAuthMethod,
    config: SnowflakeClientConfig,
    connection_config: Option<SnowflakeConnectionConfig>,
}

#[derive(Default, Clone)]
pub struct SnowflakeClientConfig {
    pub account: String,

    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Default, Clone)]
pub(crate) struct SnowflakeConnectionConfig {
    pub(crate) host: String,
    pub(crate) port: Option<u16>,
    pub(crate) protocol: Option<String>,
}

#[derive(Clone)]
pub enum SnowflakeAuthMethod {
    Password(String),
    KeyPair {
        encrypted_pem: String,
        password: Vec<u8>,
    },
    Oauth {
        token: String,
    },
}

impl SnowflakeClient {
    pub fn new(
        username: &str,
        auth: SnowflakeAuthMethod,
        config: SnowflakeClientConfig,
    ) -> Result<Self> {
        let client = ClientBuilder::new().gzip(true).build()?;
        Ok(Self {
            http: client,
            username: username.to_string(),
            auth,
            config,
            connection_config: None,
        })
    }

    pub fn with_proxy(self, host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let proxy =
            Proxy::all(format!("http://{host}:{port}").as_str())?.basic_auth(username, password);

        let client = ClientBuilder::new().gzip(true).proxy(proxy).build()?;
        Ok(Self {
            http: client,
            username: self.username,
            auth: self.auth,
            config: self.config,
            connection_config: self.connection_config,
        })
    }

    pub fn with_address(
        self,
        host: &str,
        port: Option<u16>,
        protocol: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: self.http,
            username: self.username,
            auth: self.auth,
            config: self.config,
            connection_config: Some(SnowflakeConnectionConfig {
                host: host.to_string(),
                port,
                protocol,
            }),
        })
    }

    pub async fn create_session(&self) -> Result<SnowflakeSession> {
        let session_token = login(
            &self.http,
            &self.username,
            &self.auth,
            &self.config,
            &self.connection_config,
        )
        .await?;
        Ok(SnowflakeSession {
            http: self.http.clone(),
            base_url: get_base_url(&self.config, &self.connection_config)?,
            session_token,
            timeout: self.config.timeout,
        })
    }
}
