use reqwest::header::InvalidHeaderValue;
use tokio::task::JoinError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("communication error: {0}")]
    Communication(String),

    /// Snowflake accepted the request but the statement itself failed.
    #[error("query error: {0}")]
    Query(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    #[error("url error: {0}")]
    Url(String),

    #[error("session expired")]
    SessionExpired,

    #[error("no polling url for async query")]
    NoPollingUrlAsyncQuery,

    #[error("timed out")]
    TimedOut,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("chunk download error: {0}")]
    ChunkDownload(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),

    #[error("json error: {0}: {1}")]
    Json(serde_json::Error, String),

    #[error("config json error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("future join error: {0}")]
    FutureJoin(#[from] JoinError),

    #[error("pkcs8 error: {0}")]
    Pkcs8(#[from] pkcs8::Error),

    #[error("spki error: {0}")]
    Spki(#[from] pkcs8::spki::Error),

    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Url(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
