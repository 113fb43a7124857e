use std::collections::HashMap;
use std::time::Duration;

use http::{
    HeaderMap,
    header::{ACCEPT, AUTHORIZATION},
};
use reqwest::{Client, RequestBuilder, Url};
use tokio::time::{sleep, timeout as within};

use crate::row::{SnowflakeColumn, SnowflakeColumnType, rows_with_columns};
use crate::{Error, Result, SnowflakeRow, chunk::download_chunk};

const SESSION_EXPIRED: &str = "390112";
const QUERY_IN_PROGRESS_ASYNC_CODE: &str = "333334";

const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub(super) async fn query<Q: Into<QueryRequest>>(
    http: &Client,
    base_url: &Url,
    request: Q,
    session_token: &str,
    timeout: Duration,
) -> Result<Vec<SnowflakeRow>> {
    let request: QueryRequest = request.into();
    let request_id = uuid::Uuid::new_v4();
    let mut url = base_url.join("queries/v1/query-request")?;
    url.query_pairs_mut()
        .append_pair("requestId", &request_id.to_string());

    tracing::debug!(%request_id, sql = %request.sql_text, "submitting query");
    let mut response = send(http.post(url).json(&request), session_token).await?;
    if response.code.as_deref() == Some(QUERY_IN_PROGRESS_ASYNC_CODE) {
        let result_url = response
            .data
            .as_mut()
            .and_then(|data| data.get_result_url.take())
            .ok_or(Error::NoPollingUrlAsyncQuery)?;
        let result_url = base_url.join(&result_url)?;
        response = within(timeout, poll(http, result_url, session_token))
            .await
            .map_err(|_| Error::TimedOut)??;
    }

    if response.code.as_deref() == Some(SESSION_EXPIRED) {
        return Err(Error::SessionExpired);
    }
    if !response.success {
        return Err(Error::Query(response.message.unwrap_or_default()));
    }

    let data = response.data.unwrap_or_default();
    if let Some(format) = data.query_result_format.filter(|format| format != "json") {
        return Err(Error::UnsupportedFormat(format));
    }
    let columns = data
        .row_types
        .ok_or_else(|| Error::UnsupportedFormat("the response doesn't contain 'rowtype'".into()))?
        .into_iter()
        .enumerate()
        .map(|(index, row_type)| row_type.into_column(index))
        .collect::<Vec<_>>();
    let mut row_set = data
        .row_set
        .ok_or_else(|| Error::UnsupportedFormat("the response doesn't contain 'rowset'".into()))?;

    let chunk_headers: HeaderMap = HeaderMap::try_from(&data.chunk_headers.unwrap_or_default())?;
    let chunks = data.chunks.unwrap_or_default();
    let qrmk = data.qrmk.unwrap_or_default();
    let downloads = chunks
        .into_iter()
        .map(|chunk| {
            tokio::spawn(download_chunk(
                http.clone(),
                chunk.url,
                chunk_headers.clone(),
                qrmk.clone(),
            ))
        })
        .collect::<Vec<_>>();
    for download in downloads {
        row_set.extend(download.await??);
    }
    tracing::debug!(%request_id, rows = row_set.len(), "query finished");

    Ok(rows_with_columns(columns, row_set))
}

/// Sends a request with the session's credentials and parses the envelope.
async fn send(request: RequestBuilder, session_token: &str) -> Result<SnowflakeResponse> {
    let response = request
        .header(ACCEPT, "application/snowflake")
        .header(AUTHORIZATION, format!(r#"Snowflake Token="{session_token}""#))
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(Error::Communication(body));
    }
    serde_json::from_str(&body).map_err(|e| Error::Json(e, body))
}

/// Re-fetches `result_url` until the query leaves the in-progress state.
async fn poll(http: &Client, result_url: Url, session_token: &str) -> Result<SnowflakeResponse> {
    loop {
        sleep(POLL_INTERVAL).await;
        let response = send(http.get(result_url.clone()), session_token).await?;
        if response.code.as_deref() != Some(QUERY_IN_PROGRESS_ASYNC_CODE) {
            return Ok(response);
        }
    }
}

#[derive(Debug, serde::Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub sql_text: String,
}

impl From<&str> for QueryRequest {
    fn from(sql_text: &str) -> Self {
        Self {
            sql_text: sql_text.to_string(),
        }
    }
}
impl From<&QueryRequest> for QueryRequest {
    fn from(request: &QueryRequest) -> Self {
        request.clone()
    }
}

impl From<String> for QueryRequest {
    fn from(sql_text: String) -> Self {
        Self { sql_text }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryResponse {
    get_result_url: Option<String>,

    #[serde(rename = "rowset")]
    row_set: Option<Vec<Vec<Option<String>>>>,

    #[serde(rename = "rowtype")]
    row_types: Option<Vec<RawQueryResponseRowType>>,

    chunk_headers: Option<HashMap<String, String>>,

    qrmk: Option<String>,

    chunks: Option<Vec<RawQueryResponseChunk>>,
    query_result_format: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryResponseRowType {
    name: String,
    nullable: bool,
    scale: Option<i64>,

    #[serde(rename = "type")]
    data_type: String,
}

impl RawQueryResponseRowType {
    fn into_column(self, index: usize) -> SnowflakeColumn {
        SnowflakeColumn {
            name: self.name,
            index,
            column_type: SnowflakeColumnType {
                snowflake_type: self.data_type,
                nullable: self.nullable,
                scale: self.scale,
            },
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQueryResponseChunk {
    url: String,
}

#[derive(serde::Deserialize, Debug)]
struct SnowflakeResponse {
    data: Option<RawQueryResponse>,
    message: Option<String>,
    success: bool,
    code: Option<String>,
}
