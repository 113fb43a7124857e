//! Destination configuration: loading the secret file, validating the staging
//! mode, and deriving per-case configurations.

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, SnowflakeAuthMethod, SnowflakeClient, SnowflakeClientConfig};

/// Default location of the internal-staging secret, relative to the working directory.
pub const INTERNAL_STAGING_CONFIG_PATH: &str = "secrets/internal_staging_config.json";

/// Environment variable overriding [`INTERNAL_STAGING_CONFIG_PATH`].
pub const INTERNAL_STAGING_CONFIG_ENV: &str = "SNOWFLAKE_INTERNAL_STAGING_CONFIG";

pub const INVALID_PASSWORD: &str = "wrong password";

const INTERNAL_STAGING_METHOD: &str = "Internal Staging";
const SNOWFLAKE_HOST_SUFFIX: &str = ".snowflakecomputing.com";
const SECRET_KEYS: [&str; 4] = ["password", "private_key", "private_key_password", "access_token"];

/// How the destination moves records into Snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingMode {
    /// Plain `INSERT` statements, no staging area.
    Standard,
    InternalStaging,
    S3Copy,
    GcsCopy,
}

impl fmt::Display for StagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StagingMode::Standard => "standard inserts",
            StagingMode::InternalStaging => "internal staging",
            StagingMode::S3Copy => "S3 copy",
            StagingMode::GcsCopy => "GCS copy",
        };
        f.write_str(name)
    }
}

/// An immutable destination configuration document.
///
/// New configurations are derived with [`DestinationConfig::with_schema`] and
/// [`DestinationConfig::with_invalid_credentials`]; a value is never modified
/// after construction.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationConfig(Map<String, Value>);

impl DestinationConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Configuration(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Loads the internal-staging secret and checks its staging mode.
    ///
    /// The path is taken from `SNOWFLAKE_INTERNAL_STAGING_CONFIG` when set.
    pub fn load_base_config() -> Result<Self> {
        match std::env::var(INTERNAL_STAGING_CONFIG_ENV) {
            Ok(path) => Self::load_base_config_from(path),
            Err(_) => Self::load_base_config_from(INTERNAL_STAGING_CONFIG_PATH),
        }
    }

    pub fn load_base_config_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&body)?;
        let config = Self::from_value(value)?;
        config.validate_internal_staging()?;
        tracing::info!(path = %path.display(), "loaded internal staging config");
        Ok(config)
    }

    pub fn staging_mode(&self) -> Result<StagingMode> {
        let mut active = Vec::new();
        if self.is_s3_copy() {
            active.push(StagingMode::S3Copy);
        }
        if self.is_gcs_copy() {
            active.push(StagingMode::GcsCopy);
        }
        if self.is_internal_staging() {
            active.push(StagingMode::InternalStaging);
        }

        match active.as_slice() {
            [] => Ok(StagingMode::Standard),
            [mode] => Ok(*mode),
            modes => Err(Error::Configuration(format!(
                "staging modes are mutually exclusive, found {}",
                modes
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" and ")
            ))),
        }
    }

    pub fn validate_internal_staging(&self) -> Result<()> {
        match self.staging_mode()? {
            StagingMode::InternalStaging => Ok(()),
            mode => Err(Error::Configuration(format!(
                "expected internal staging, found {mode}"
            ))),
        }
    }

    pub fn is_s3_copy(&self) -> bool {
        self.loading_method_has("s3_bucket_name") || self.flag("s3_staging")
    }

    pub fn is_gcs_copy(&self) -> bool {
        self.loading_method_has("project_id") || self.flag("gcs_staging")
    }

    pub fn is_internal_staging(&self) -> bool {
        let method = self
            .0
            .get("loading_method")
            .and_then(|m| m.get("method"))
            .and_then(Value::as_str);
        method == Some(INTERNAL_STAGING_METHOD) || self.flag("internal_staging")
    }

    /// Returns a copy pointing at `schema`.
    pub fn with_schema(&self, schema: impl Into<String>) -> Self {
        let mut map = self.0.clone();
        map.insert("schema".to_string(), Value::String(schema.into()));
        Self(map)
    }

    /// Returns a copy whose credentials cannot authenticate.
    pub fn with_invalid_credentials(&self) -> Self {
        let mut map = self.0.clone();
        map.insert(
            "password".to_string(),
            Value::String(INVALID_PASSWORD.to_string()),
        );
        if let Some(Value::Object(credentials)) = map.get_mut("credentials") {
            for (key, bad) in [
                ("password", INVALID_PASSWORD),
                ("private_key", "wrong private key"),
                ("access_token", "wrong access token"),
            ] {
                if credentials.contains_key(key) {
                    credentials.insert(key.to_string(), Value::String(bad.to_string()));
                }
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn schema(&self) -> Option<&str> {
        self.str_field("schema")
    }

    pub fn host(&self) -> Option<&str> {
        self.str_field("host")
    }

    pub fn role(&self) -> Option<&str> {
        self.str_field("role")
    }

    pub fn warehouse(&self) -> Option<&str> {
        self.str_field("warehouse")
    }

    pub fn database(&self) -> Option<&str> {
        self.str_field("database")
    }

    /// The explicit `account` field, or the account locator embedded in `host`.
    pub fn account(&self) -> Result<String> {
        if let Some(account) = self.str_field("account") {
            return Ok(account.to_string());
        }
        self.host()
            .map(|host| {
                host.strip_suffix(SNOWFLAKE_HOST_SUFFIX)
                    .unwrap_or(host)
                    .to_string()
            })
            .ok_or_else(|| Error::Configuration("config has neither 'account' nor 'host'".into()))
    }

    pub fn username(&self) -> Result<&str> {
        self.str_field("username")
            .ok_or_else(|| Error::Configuration("config is missing 'username'".into()))
    }

    pub fn auth_method(&self) -> Result<SnowflakeAuthMethod> {
        if let Some(credentials) = self.0.get("credentials").and_then(Value::as_object) {
            let field = |key: &str| credentials.get(key).and_then(Value::as_str);
            if let Some(pem) = field("private_key") {
                return Ok(SnowflakeAuthMethod::KeyPair {
                    encrypted_pem: pem.to_string(),
                    password: field("private_key_password")
                        .map(|p| p.as_bytes().to_vec())
                        .unwrap_or_default(),
                });
            }
            if let Some(token) = field("access_token") {
                return Ok(SnowflakeAuthMethod::Oauth {
                    token: token.to_string(),
                });
            }
            if let Some(password) = field("password") {
                return Ok(SnowflakeAuthMethod::Password(password.to_string()));
            }
        }
        self.str_field("password")
            .map(|p| SnowflakeAuthMethod::Password(p.to_string()))
            .ok_or_else(|| Error::Configuration("config has no usable credentials".into()))
    }

    pub fn client_config(&self) -> Result<SnowflakeClientConfig> {
        Ok(SnowflakeClientConfig {
            account: self.account()?,
            warehouse: self.warehouse().map(str::to_string),
            database: self.database().map(str::to_string),
            schema: self.schema().map(str::to_string),
            role: self.role().map(str::to_string),
            timeout: None,
        })
    }

    /// Builds a Snowflake client for this configuration.
    ///
    /// `host`, plus the optional `port` and `protocol` fields, override the
    /// account-derived address.
    pub fn client(&self) -> Result<SnowflakeClient> {
        let client = SnowflakeClient::new(
            self.username()?,
            self.auth_method()?,
            self.client_config()?,
        )?;
        match self.host() {
            Some(host) => {
                let port = self
                    .0
                    .get("port")
                    .and_then(Value::as_u64)
                    .and_then(|p| u16::try_from(p).ok());
                let protocol = self.str_field("protocol").map(str::to_string);
                client.with_address(host, port, protocol)
            }
            None => Ok(client),
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    fn loading_method_has(&self, key: &str) -> bool {
        self.0
            .get("loading_method")
            .and_then(Value::as_object)
            .is_some_and(|m| m.contains_key(key))
    }
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if SECRET_KEYS.contains(&key.as_str()) || key == "credentials" {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
