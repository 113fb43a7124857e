//! In-memory stand-in for a Snowflake account, used by the unit tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::database::{Database, DatabaseFactory};
use crate::row::build_rows;
use crate::{DestinationConfig, Error, Result, SnowflakeRow};

#[derive(Default)]
struct Table {
    columns: Vec<(String, String)>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Default)]
struct State {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), Table>,
    statements: Vec<String>,
    opened_for: Vec<Option<String>>,
    fail_on: Option<String>,
    delay: Option<(String, Duration)>,
    refuse_connections: bool,
}

/// Understands the handful of statements the fixture issues. Unquoted
/// identifiers are folded to upper case like Snowflake does.
#[derive(Clone, Default)]
pub(crate) struct InMemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl InMemoryWarehouse {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fails every statement starting with `prefix`.
    pub(crate) fn fail_statements_starting_with(&self, prefix: &str) {
        self.state().fail_on = Some(prefix.to_string());
    }

    /// Stalls every statement starting with `prefix` for `delay` after it
    /// has taken effect.
    pub(crate) fn delay_statements_starting_with(&self, prefix: &str, delay: Duration) {
        self.state().delay = Some((prefix.to_string(), delay));
    }

    pub(crate) fn refuse_connections(&self) {
        self.state().refuse_connections = true;
    }

    pub(crate) fn has_schema(&self, schema: &str) -> bool {
        self.state().schemas.contains(&fold(schema))
    }

    pub(crate) fn schema_count(&self) -> usize {
        self.state().schemas.len()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Schemas of the configurations handles were opened with.
    pub(crate) fn opened_for(&self) -> Vec<Option<String>> {
        self.state().opened_for.clone()
    }

    pub(crate) fn create_table(&self, schema: &str, table: &str, columns: &[(&str, &str)]) {
        let mut state = self.state();
        state.tables.insert(
            (fold(schema), fold(table)),
            Table {
                columns: columns
                    .iter()
                    .map(|(name, ty)| (name.to_string(), ty.to_string()))
                    .collect(),
                rows: Vec::new(),
            },
        );
    }

    pub(crate) fn insert_row(&self, schema: &str, table: &str, row: Vec<Option<String>>) {
        let mut state = self.state();
        state
            .tables
            .get_mut(&(fold(schema), fold(table)))
            .expect("table must be created before inserting")
            .rows
            .push(row);
    }

    /// Appends a row shaped like the destination's raw tables.
    pub(crate) fn insert_raw_record(
        &self,
        schema: &str,
        table: &str,
        ab_id: &str,
        emitted_at: f64,
        data: &str,
    ) {
        let key = (fold(schema), fold(table));
        let exists = self.state().tables.contains_key(&key);
        if !exists {
            self.create_table(
                schema,
                table,
                &[
                    ("_AIRBYTE_AB_ID", "text"),
                    ("_AIRBYTE_DATA", "variant"),
                    ("_AIRBYTE_EMITTED_AT", "timestamp_ntz"),
                ],
            );
        }
        self.insert_row(
            schema,
            table,
            vec![
                Some(ab_id.to_string()),
                Some(data.to_string()),
                Some(format!("{emitted_at:.9}")),
            ],
        );
    }

    async fn stall(&self, sql: &str) {
        let delay = match &self.state().delay {
            Some((prefix, delay)) if sql.starts_with(prefix.as_str()) => Some(*delay),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn run(&self, sql: &str) -> Result<Vec<SnowflakeRow>> {
        let mut state = self.state();
        state.statements.push(sql.to_string());
        if let Some(prefix) = &state.fail_on {
            if sql.starts_with(prefix.as_str()) {
                return Err(Error::Query(format!("injected failure: {sql}")));
            }
        }

        let sql = sql.trim().trim_end_matches(';');
        let words = sql.split_whitespace().collect::<Vec<_>>();
        match words.as_slice() {
            ["CREATE", "SCHEMA", name] => {
                if !state.schemas.insert(fold(name)) {
                    return Err(Error::Query(format!("Object '{name}' already exists.")));
                }
                Ok(status_rows("Schema successfully created."))
            }
            ["DROP", "SCHEMA", "IF", "EXISTS", name] => {
                let name = fold(name);
                state.schemas.remove(&name);
                state.tables.retain(|(schema, _), _| *schema != name);
                Ok(status_rows("Drop statement executed successfully."))
            }
            ["SELECT", "*", "FROM", qualified, rest @ ..] => {
                let (schema, table) = qualified
                    .split_once('.')
                    .ok_or_else(|| Error::Query(format!("unqualified table: {qualified}")))?;
                let key = (fold(schema), fold(table));
                let table = state.tables.get(&key).ok_or_else(|| {
                    Error::Query(format!("Object '{qualified}' does not exist or not authorized."))
                })?;
                let order_by = parse_order_by(&rest.join(" "));
                Ok(select_all(table, &order_by))
            }
            _ => Err(Error::Query(format!("unsupported statement: {sql}"))),
        }
    }
}

impl Database for InMemoryWarehouse {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.run(sql)?;
        self.stall(sql).await;
        Ok(())
    }

    async fn buffered_query<T, F>(&self, sql: &str, mapper: F) -> Result<Vec<T>>
    where
        F: FnMut(&SnowflakeRow) -> Result<T>,
    {
        let rows = self.run(sql)?;
        self.stall(sql).await;
        rows.iter().map(mapper).collect()
    }
}

impl DatabaseFactory for InMemoryWarehouse {
    type Database = InMemoryWarehouse;

    async fn open(&self, config: &DestinationConfig) -> Result<InMemoryWarehouse> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(Error::Communication("connection refused".to_string()));
        }
        state.opened_for.push(config.schema().map(str::to_string));
        Ok(self.clone())
    }
}

fn fold(identifier: &str) -> String {
    match identifier.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => identifier.to_ascii_uppercase(),
    }
}

fn status_rows(status: &str) -> Vec<SnowflakeRow> {
    build_rows(&[("status", "text")], vec![vec![Some(status.to_string())]])
}

fn parse_order_by(clause: &str) -> Vec<String> {
    let Some((_, columns)) = clause.split_once("ORDER BY") else {
        return Vec::new();
    };
    columns
        .split(',')
        .filter_map(|term| term.split_whitespace().next())
        .map(fold)
        .collect()
}

fn select_all(table: &Table, order_by: &[String]) -> Vec<SnowflakeRow> {
    let columns = table
        .columns
        .iter()
        .map(|(name, ty)| (name.as_str(), ty.as_str()))
        .collect::<Vec<_>>();
    let indices = order_by
        .iter()
        .filter_map(|name| {
            table
                .columns
                .iter()
                .position(|(column, _)| column.eq_ignore_ascii_case(name))
        })
        .collect::<Vec<_>>();

    let mut rows = table.rows.clone();
    rows.sort_by(|a, b| {
        indices
            .iter()
            .map(|&i| compare_cells(&a[i], &b[i]))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    build_rows(&columns, rows)
}

fn compare_cells(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.cmp(b),
        },
        // Snowflake sorts NULLs last in ascending order.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
