use std::time::Duration;

use reqwest::Url;

use crate::{
    Result, SnowflakeRow,
    query::{QueryRequest, query},
};

pub(crate) const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

pub struct SnowflakeSession {
    pub(super) http: reqwest::Client,
    pub(super) base_url: Url,
    pub(super) session_token: String,
    pub(super) timeout: Option<Duration>,
}

impl SnowflakeSession {
    pub async fn query<Q: Into<QueryRequest>>(&self, request: Q) -> Result<Vec<SnowflakeRow>> {
        let rows = query(
            &self.http,
            &self.base_url,
            request,
            &self.session_token,
            self.timeout(),
        )
        .await?;
        Ok(rows)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
    }
}
