use std::io::Read;

use flate2::read::GzDecoder;
use http::{HeaderMap, HeaderValue};
use reqwest::Client;

use crate::{Error, Result};

/// Downloads one result chunk and returns its rows.
///
/// Chunks are a comma-separated list of JSON row arrays without the enclosing
/// brackets, optionally gzip-compressed.
pub(super) async fn download_chunk(
    client: Client,
    chunk_url: String,
    mut headers: HeaderMap,
    qrmk: String,
) -> Result<Vec<Vec<Option<String>>>> {
    if headers.is_empty() {
        headers.append(
            "x-amz-server-side-encryption-customer-algorithm",
            HeaderValue::from_static("AES256"),
        );
        headers.append(
            "x-amz-server-side-encryption-customer-key",
            HeaderValue::from_str(&qrmk)?,
        );
    }

    let response = client.get(chunk_url).headers(headers).send().await?;
    if !response.status().is_success() {
        let body = response.text().await?;
        return Err(Error::ChunkDownload(body));
    }

    let body = response.bytes().await?;
    parse_chunk(&body)
}

fn parse_chunk(body: &[u8]) -> Result<Vec<Vec<Option<String>>>> {
    if body.len() < 2 {
        return Err(Error::ChunkDownload("invalid chunk format".into()));
    }

    let bytes = if body[0] == 0x1f && body[1] == 0x8b {
        let mut decoder = GzDecoder::new(body);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded)?;
        decoded
    } else {
        body.to_vec()
    };

    let mut buf = Vec::with_capacity(bytes.len() + 2);
    buf.push(b'[');
    buf.extend(bytes);
    buf.push(b']');

    serde_json::from_slice(&buf).map_err(|e| Error::ChunkDownload(e.to_string()))
}
