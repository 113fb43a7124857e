//! Hooks a destination-conformance driver calls for each test case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::config::DestinationConfig;
use crate::database::{DatabaseFactory, SnowflakeDatabaseFactory};
use crate::naming::{NameTransformer, SnowflakeNameTransformer, resolve_identifier};
use crate::records;
use crate::schema::{DEFAULT_OPERATION_TIMEOUT, setup_schema, teardown_schema, with_timeout};
use crate::{Error, Result};

pub const IMAGE_NAME: &str = "airbyte/destination-snowflake:dev";

/// Per-run environment handed to every hook by the driver.
#[derive(Debug, Clone, Default)]
pub struct TestDestinationEnv {
    local_root: PathBuf,
}

impl TestDestinationEnv {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }
}

/// What a destination exposes to the conformance driver.
#[allow(async_fn_in_trait)]
pub trait DestinationAcceptanceTest {
    fn image_name(&self) -> &str;

    /// Configuration of the case in progress.
    fn config(&self) -> Result<&DestinationConfig>;

    /// A configuration the destination's connection check must reject.
    fn fail_check_config(&self) -> Result<DestinationConfig>;

    async fn setup(&mut self, env: &TestDestinationEnv) -> Result<()>;

    async fn tear_down(&mut self, env: &TestDestinationEnv) -> Result<()>;

    /// Payloads written for `stream_name`, in emission order.
    async fn retrieve_records(
        &self,
        env: &TestDestinationEnv,
        stream_name: &str,
        namespace: Option<&str>,
        stream_schema: &Value,
    ) -> Result<Vec<Value>>;

    /// Rows of the normalized table for `stream_name`, in emission order.
    async fn retrieve_normalized_records(
        &self,
        env: &TestDestinationEnv,
        stream_name: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>>;

    fn resolve_identifier(&self, identifier: &str) -> Vec<String>;

    fn supports_normalization(&self) -> bool {
        false
    }

    fn supports_dbt(&self) -> bool {
        false
    }

    fn implements_namespaces(&self) -> bool {
        false
    }
}

/// Runs one case: setup, `body`, then teardown.
///
/// Teardown runs whenever setup succeeded. If both the body and the teardown
/// fail, the teardown error is logged and the body's error is returned.
pub async fn run_case<T, B>(test: &mut T, env: &TestDestinationEnv, body: B) -> Result<()>
where
    T: DestinationAcceptanceTest,
    B: AsyncFnOnce(&T) -> Result<()>,
{
    test.setup(env).await?;
    let outcome = body(&*test).await;
    let cleanup = test.tear_down(env).await;
    match (outcome, cleanup) {
        (Err(e), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "teardown failed after a failed case");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), cleanup) => cleanup,
    }
}

enum BaseConfigSource {
    /// `secrets/internal_staging_config.json` or the environment override.
    Default,
    File(PathBuf),
    Value(DestinationConfig),
}

/// The Snowflake internal-staging destination under test.
///
/// Each case gets its own `integration_test_*` schema, created in
/// [`setup`](DestinationAcceptanceTest::setup) and dropped in
/// [`tear_down`](DestinationAcceptanceTest::tear_down).
pub struct InternalStagingAcceptanceTest<F = SnowflakeDatabaseFactory> {
    factory: F,
    namer: SnowflakeNameTransformer,
    source: BaseConfigSource,
    timeout: Duration,
    base_config: Option<DestinationConfig>,
    config: Option<DestinationConfig>,
}

impl InternalStagingAcceptanceTest<SnowflakeDatabaseFactory> {
    pub fn new() -> Self {
        Self::with_factory(SnowflakeDatabaseFactory)
    }
}

impl Default for InternalStagingAcceptanceTest<SnowflakeDatabaseFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: DatabaseFactory> InternalStagingAcceptanceTest<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            namer: SnowflakeNameTransformer::new(),
            source: BaseConfigSource::Default,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            base_config: None,
            config: None,
        }
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = BaseConfigSource::File(path.into());
        self
    }

    /// Uses `config` instead of reading the secret file. It is still
    /// validated on every setup.
    pub fn with_base_config(mut self, config: DestinationConfig) -> Self {
        self.source = BaseConfigSource::Value(config);
        self
    }

    pub fn with_name_transformer(mut self, namer: SnowflakeNameTransformer) -> Self {
        self.namer = namer;
        self
    }

    /// Bound on every warehouse round trip the fixture makes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The validated base configuration, read fresh from its source.
    pub fn static_config(&self) -> Result<DestinationConfig> {
        match &self.source {
            BaseConfigSource::Default => DestinationConfig::load_base_config(),
            BaseConfigSource::File(path) => DestinationConfig::load_base_config_from(path),
            BaseConfigSource::Value(config) => {
                config.validate_internal_staging()?;
                Ok(config.clone())
            }
        }
    }

    fn target_schema(&self, namespace: Option<&str>) -> Result<String> {
        let namespace = match namespace {
            Some(namespace) => namespace,
            None => self
                .config()?
                .schema()
                .ok_or_else(|| Error::Configuration("config has no 'schema'".into()))?,
        };
        Ok(self.namer.namespace(namespace))
    }
}

impl<F: DatabaseFactory> DestinationAcceptanceTest for InternalStagingAcceptanceTest<F> {
    fn image_name(&self) -> &str {
        IMAGE_NAME
    }

    fn config(&self) -> Result<&DestinationConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::Configuration("no test case is set up".into()))
    }

    fn fail_check_config(&self) -> Result<DestinationConfig> {
        Ok(self.config()?.with_invalid_credentials())
    }

    async fn setup(&mut self, _env: &TestDestinationEnv) -> Result<()> {
        let base_config = self.static_config()?;
        let config = setup_schema(&self.factory, &base_config, self.timeout).await?;
        self.base_config = Some(base_config);
        self.config = Some(config);
        Ok(())
    }

    async fn tear_down(&mut self, _env: &TestDestinationEnv) -> Result<()> {
        let (Some(base_config), Some(config)) = (self.base_config.take(), self.config.take())
        else {
            tracing::debug!("no test schema to drop");
            return Ok(());
        };
        teardown_schema(&self.factory, &base_config, &config, self.timeout).await
    }

    async fn retrieve_records(
        &self,
        _env: &TestDestinationEnv,
        stream_name: &str,
        namespace: Option<&str>,
        _stream_schema: &Value,
    ) -> Result<Vec<Value>> {
        let schema = self.target_schema(namespace)?;
        let table = self.namer.raw_table_name(stream_name);
        with_timeout(self.timeout, async {
            let db = self.factory.open(self.config()?).await?;
            records::retrieve_records(&db, &schema, &table).await
        })
        .await
    }

    async fn retrieve_normalized_records(
        &self,
        _env: &TestDestinationEnv,
        stream_name: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>> {
        let schema = self.target_schema(namespace)?;
        let table = self.namer.identifier(stream_name);
        let rows = with_timeout(self.timeout, async {
            let db = self.factory.open(self.config()?).await?;
            records::retrieve_normalized_records(&db, &schema, &table).await
        })
        .await?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    fn resolve_identifier(&self, identifier: &str) -> Vec<String> {
        resolve_identifier(&self.namer, identifier)
    }

    fn supports_normalization(&self) -> bool {
        true
    }

    fn supports_dbt(&self) -> bool {
        true
    }

    fn implements_namespaces(&self) -> bool {
        true
    }
}
