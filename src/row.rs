use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnowflakeColumnType {
    pub snowflake_type: String,
    pub nullable: bool,
    pub scale: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnowflakeColumn {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) column_type: SnowflakeColumnType,
}

impl SnowflakeColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn column_type(&self) -> &SnowflakeColumnType {
        &self.column_type
    }
}

#[derive(Debug)]
pub struct SnowflakeRow {
    pub(crate) row: Vec<Option<String>>,
    pub(crate) columns: Arc<Vec<SnowflakeColumn>>,
    pub(crate) column_names: Arc<HashMap<String, usize>>,
}

impl SnowflakeRow {
    /// Column lookup is case-insensitive.
    pub fn get<T: SnowflakeDecode>(&self, column_name: &str) -> Result<T> {
        let index = self
            .column_names
            .get(&column_name.to_ascii_uppercase())
            .ok_or_else(|| Error::Decode(format!("column not found: {}", column_name)))?;
        self.cell(*index, column_name)?.try_get()
    }

    pub fn columns(&self) -> &[SnowflakeColumn] {
        &self.columns
    }

    /// Converts the row into a JSON object keyed by column name, typing each
    /// value from its Snowflake column type.
    pub fn to_json(&self) -> Result<Map<String, Value>> {
        let mut object = Map::with_capacity(self.columns.len());
        for column in self.columns.iter() {
            let cell = self.cell(column.index, &column.name)?;
            let value = column_to_json(&column.column_type, cell)?;
            object.insert(column.name.clone(), value);
        }
        Ok(object)
    }

    fn cell(&self, index: usize, column_name: &str) -> Result<&Option<String>> {
        self.row.get(index).ok_or_else(|| {
            Error::Decode(format!(
                "row has {} cells, no value for column {column_name}",
                self.row.len()
            ))
        })
    }
}

/// Pairs every row of a result set with the shared column metadata.
pub(crate) fn rows_with_columns(
    columns: Vec<SnowflakeColumn>,
    row_set: Vec<Vec<Option<String>>>,
) -> Vec<SnowflakeRow> {
    let column_names = columns
        .iter()
        .map(|column| (column.name.to_ascii_uppercase(), column.index))
        .collect::<HashMap<_, _>>();
    let columns = Arc::new(columns);
    let column_names = Arc::new(column_names);
    row_set
        .into_iter()
        .map(|row| SnowflakeRow {
            row,
            columns: Arc::clone(&columns),
            column_names: Arc::clone(&column_names),
        })
        .collect()
}

fn column_to_json(column_type: &SnowflakeColumnType, value: &Option<String>) -> Result<Value> {
    let Some(raw) = value else {
        return Ok(Value::Null);
    };

    let value = match column_type.snowflake_type.to_ascii_lowercase().as_str() {
        "fixed" if column_type.scale.unwrap_or(0) == 0 => match raw.parse::<i64>() {
            Ok(v) => Value::from(v),
            Err(_) => float_or_string(raw),
        },
        "fixed" | "real" => float_or_string(raw),
        "boolean" => Value::Bool(bool::try_decode(value)?),
        "variant" | "object" | "array" => serde_json::from_str(raw).map_err(|e| {
            Error::Deserialization(format!("'{raw}' is not valid json: {e}"))
        })?,
        "date" => Value::String(NaiveDate::try_decode(value)?.format("%Y-%m-%d").to_string()),
        "timestamp_ntz" | "timestamp_ltz" | "timestamp_tz" => Value::String(
            NaiveDateTime::try_decode(value)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        _ => Value::String(raw.clone()),
    };
    Ok(value)
}

fn float_or_string(raw: &str) -> Value {
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

pub trait SnowflakeDecode: Sized {
    fn try_decode(value: &Option<String>) -> Result<Self>;
}

impl SnowflakeDecode for u64 {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        value
            .parse()
            .map_err(|_| Error::Decode(format!("'{value}' is not u64")))
    }
}
impl SnowflakeDecode for i64 {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        value
            .parse()
            .map_err(|_| Error::Decode(format!("'{value}' is not i64")))
    }
}
impl SnowflakeDecode for i32 {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        value
            .parse()
            .map_err(|_| Error::Decode(format!("'{value}' is not i32")))
    }
}

impl SnowflakeDecode for f64 {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        value
            .parse()
            .map_err(|_| Error::Decode(format!("'{value}' is not f64")))
    }
}

impl SnowflakeDecode for String {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        Ok(value.to_string())
    }
}

impl SnowflakeDecode for bool {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        if let Ok(v) = value.parse::<u16>() {
            return Ok(v > 0);
        }
        if let Ok(v) = value.parse::<bool>() {
            return Ok(v);
        }
        Err(Error::Decode(format!("'{value}' is not bool")))
    }
}

impl SnowflakeDecode for NaiveDateTime {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        // TIMESTAMP_TZ values carry a trailing offset token.
        let epoch = value.split_whitespace().next().unwrap_or_default();
        if let Some((secs, nsec)) = parse_epoch(epoch) {
            let dt = DateTime::from_timestamp(secs, nsec)
                .ok_or_else(|| Error::Decode(format!("invalid datetime: {}", value)))?;
            return Ok(dt.naive_utc());
        }
        if let Ok(v) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
            return Ok(v);
        }
        Err(Error::Decode(format!("'{value}' is not datetime")))
    }
}

/// Splits `seconds[.fraction]` into whole seconds and nanoseconds, rounding
/// the seconds toward negative infinity so the nanoseconds stay positive.
fn parse_epoch(epoch: &str) -> Option<(i64, u32)> {
    let (whole, fraction) = epoch.split_once('.').unwrap_or((epoch, ""));
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = whole.parse::<i64>().ok()?;
    let digits = fraction.get(..9).unwrap_or(fraction);
    let nsec = if digits.is_empty() {
        0
    } else {
        format!("{digits:0<9}").parse::<u32>().ok()?
    };
    if whole.starts_with('-') && nsec > 0 {
        Some((secs - 1, 1_000_000_000 - nsec))
    } else {
        Some((secs, nsec))
    }
}

impl SnowflakeDecode for NaiveDate {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        if let Ok(days) = value.parse::<i64>() {
            let dt = DateTime::from_timestamp(days * 86_400, 0)
                .ok_or_else(|| Error::Decode(format!("invalid date: {}", value)))?;
            return Ok(dt.date_naive());
        }
        if let Ok(v) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Ok(v);
        }
        Err(Error::Decode(format!("'{value}' is not date")))
    }
}

impl SnowflakeDecode for serde_json::Value {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        let value = unwrap(value)?;
        serde_json::from_str(value).map_err(|_| Error::Decode(format!("'{value}' is not json")))
    }
}

impl<T: SnowflakeDecode> SnowflakeDecode for Option<T> {
    fn try_decode(value: &Option<String>) -> Result<Self> {
        if value.is_none() {
            return Ok(None);
        }
        T::try_decode(value).map(|v| Some(v))
    }
}

trait TryGet {
    fn try_get<T: SnowflakeDecode>(&self) -> Result<T>;
}

impl TryGet for Option<String> {
    fn try_get<T: SnowflakeDecode>(&self) -> Result<T> {
        T::try_decode(self)
    }
}

fn unwrap(value: &Option<String>) -> Result<&String> {
    value
        .as_ref()
        .ok_or_else(|| Error::Decode("value is null".into()))
}

#[cfg(test)]
pub(crate) fn build_rows(
    columns: &[(&str, &str)],
    rows: Vec<Vec<Option<String>>>,
) -> Vec<SnowflakeRow> {
    let columns = columns
        .iter()
        .enumerate()
        .map(|(index, (name, snowflake_type))| SnowflakeColumn {
            name: name.to_string(),
            index,
            column_type: SnowflakeColumnType {
                snowflake_type: snowflake_type.to_string(),
                nullable: true,
                scale: Some(0),
            },
        })
        .collect();
    rows_with_columns(columns, rows)
}
