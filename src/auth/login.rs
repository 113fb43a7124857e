use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::{Map, Value, json};

use crate::{Error, Result, SnowflakeAuthMethod, SnowflakeClientConfig, SnowflakeConnectionConfig};

use super::key_pair::generate_jwt_from_key_pair;

/// Root URL of the Snowflake REST API: the account host unless an explicit
/// address was configured.
pub(crate) fn get_base_url(
    config: &SnowflakeClientConfig,
    connection_config: &Option<SnowflakeConnectionConfig>,
) -> Result<Url> {
    let Some(connection) = connection_config else {
        let host = format!("https://{}.snowflakecomputing.com", config.account);
        return Ok(Url::parse(&host)?);
    };
    let protocol = connection.protocol.as_deref().unwrap_or("https");
    let mut url = Url::parse(&format!("{protocol}://{}", connection.host))?;
    url.set_port(connection.port)
        .map_err(|()| Error::Url(format!("cannot set a port on {protocol} urls")))?;
    Ok(url)
}

/// Login to Snowflake and return a session token.
pub(crate) async fn login(
    http: &Client,
    username: &str,
    auth: &SnowflakeAuthMethod,
    config: &SnowflakeClientConfig,
    connection_config: &Option<SnowflakeConnectionConfig>,
) -> Result<String> {
    let url = get_base_url(config, connection_config)?.join("session/v1/login-request")?;
    let session_params = [
        ("warehouse", &config.warehouse),
        ("databaseName", &config.database),
        ("schemaName", &config.schema),
        ("roleName", &config.role),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.as_deref().map(|value| (key, value)))
    .collect::<Vec<_>>();

    let response = http
        .post(url)
        .query(&session_params)
        .json(&json!({ "data": login_request_data(username, auth, config)? }))
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(Error::Communication(body));
    }

    match serde_json::from_str::<Response>(&body).map_err(|e| Error::Json(e, body))? {
        Response {
            success: true,
            data: Some(data),
            ..
        } => Ok(data.token),
        Response { success: true, .. } => Err(Error::Communication(
            "missing login-response data".to_string(),
        )),
        Response { message, .. } => Err(Error::Communication(message.unwrap_or_default())),
    }
}

/// The `data` object of a login request. OAuth logins carry only the token.
fn login_request_data(
    username: &str,
    auth: &SnowflakeAuthMethod,
    config: &SnowflakeClientConfig,
) -> Result<Value> {
    let mut data = Map::new();
    if !matches!(auth, SnowflakeAuthMethod::Oauth { .. }) {
        data.insert("ACCOUNT_NAME".to_string(), json!(config.account));
        data.insert("LOGIN_NAME".to_string(), json!(username));
    }

    let (authenticator, credential, secret) = match auth {
        SnowflakeAuthMethod::Password(password) => (None, "PASSWORD", password.clone()),
        SnowflakeAuthMethod::KeyPair {
            encrypted_pem,
            password,
        } => {
            let password = (!password.is_empty()).then_some(password.as_slice());
            let jwt = generate_jwt_from_key_pair(
                encrypted_pem,
                password,
                username,
                &config.account,
                Utc::now().timestamp(),
            )?;
            (Some("SNOWFLAKE_JWT"), "TOKEN", jwt)
        }
        SnowflakeAuthMethod::Oauth { token } => (Some("OAUTH"), "TOKEN", token.clone()),
    };
    if let Some(authenticator) = authenticator {
        data.insert("AUTHENTICATOR".to_string(), json!(authenticator));
    }
    data.insert(credential.to_string(), Value::String(secret));
    Ok(Value::Object(data))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponseData {
    token: String,
}

#[derive(serde::Deserialize)]
struct Response {
    data: Option<LoginResponseData>,
    message: Option<String>,
    success: bool,
}
