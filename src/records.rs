//! Reading written rows back out of the destination.

use serde_json::{Map, Value};

use crate::database::Database;
use crate::{Error, Result};

pub const COLUMN_NAME_AB_ID: &str = "_airbyte_ab_id";
pub const COLUMN_NAME_DATA: &str = "_airbyte_data";
pub const COLUMN_NAME_EMITTED_AT: &str = "_airbyte_emitted_at";

/// A row as a JSON object keyed by column name.
pub type JsonRecord = Map<String, Value>;

/// Selects every row of `schema.table`, oldest emission first.
///
/// Rows sharing an emission timestamp are ordered by their record id.
pub fn select_records_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT * FROM {schema}.{table} ORDER BY {COLUMN_NAME_EMITTED_AT} ASC, {COLUMN_NAME_AB_ID} ASC;"
    )
}

/// Looks `key` up ignoring ASCII case, preferring an exact match.
pub fn get_ignore_case<'a>(record: &'a JsonRecord, key: &str) -> Option<&'a Value> {
    record.get(key).or_else(|| {
        record
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

pub async fn retrieve_records_from_table<D: Database>(
    db: &D,
    schema: &str,
    table: &str,
) -> Result<Vec<JsonRecord>> {
    let sql = select_records_sql(schema, table);
    let records = db.buffered_query(&sql, |row| row.to_json()).await?;
    tracing::debug!(%schema, %table, records = records.len(), "retrieved records");
    Ok(records)
}

/// Payloads of the raw table `schema.table`, in emission order.
pub async fn retrieve_records<D: Database>(
    db: &D,
    schema: &str,
    table: &str,
) -> Result<Vec<Value>> {
    retrieve_records_from_table(db, schema, table)
        .await?
        .iter()
        .map(unwrap_data_column)
        .collect()
}

/// Rows of the normalized table `schema.table`, in emission order.
pub async fn retrieve_normalized_records<D: Database>(
    db: &D,
    schema: &str,
    table: &str,
) -> Result<Vec<JsonRecord>> {
    retrieve_records_from_table(db, schema, table).await
}

/// Extracts and parses the payload column of a raw-table row.
pub fn unwrap_data_column(record: &JsonRecord) -> Result<Value> {
    let data = get_ignore_case(record, COLUMN_NAME_DATA).ok_or_else(|| {
        Error::Deserialization(format!("row has no {COLUMN_NAME_DATA} column"))
    })?;
    match data {
        Value::String(text) => serde_json::from_str(text).map_err(|e| {
            Error::Deserialization(format!("{COLUMN_NAME_DATA} is not valid json: {e}"))
        }),
        Value::Object(_) | Value::Array(_) => Ok(data.clone()),
        other => Err(Error::Deserialization(format!(
            "{COLUMN_NAME_DATA} holds {other}, expected a json document"
        ))),
    }
}
