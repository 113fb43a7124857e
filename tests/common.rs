#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use snowflake_destination_acceptance::DestinationConfig;
use tokio::net::TcpListener;

pub const USERNAME: &str = "TEST_USER";
pub const PASSWORD: &str = "test-password";
pub const TOKEN: &str = "mock-session-token";

const RAW_COLUMNS: [(&str, &str); 3] = [
    ("_AIRBYTE_AB_ID", "text"),
    ("_AIRBYTE_DATA", "variant"),
    ("_AIRBYTE_EMITTED_AT", "timestamp_ntz"),
];

#[derive(Clone)]
struct RawRow {
    ab_id: String,
    emitted_at: f64,
    data: String,
}

#[derive(Default)]
struct State {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), Vec<RawRow>>,
    statements: Vec<String>,
    logins: usize,
}

/// A tiny HTTP server speaking enough of the Snowflake REST protocol for the
/// fixture: login, schema DDL, raw-table selects, and one chunked result.
pub struct MockSnowflake {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl MockSnowflake {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(Arc::clone(&shared), addr, req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, state }
    }

    /// An internal-staging config pointing at this server.
    pub fn config(&self) -> DestinationConfig {
        DestinationConfig::from_value(json!({
            "account": "mock",
            "host": "127.0.0.1",
            "port": self.addr.port(),
            "protocol": "http",
            "role": "AIRBYTE_ROLE",
            "warehouse": "AIRBYTE_WAREHOUSE",
            "database": "AIRBYTE_DATABASE",
            "schema": "PUBLIC",
            "username": USERNAME,
            "password": PASSWORD,
            "loading_method": { "method": "Internal Staging" }
        }))
        .unwrap()
    }

    pub fn insert_raw_record(&self, schema: &str, table: &str, ab_id: &str, emitted_at: f64, data: Value) {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .entry((fold(schema), fold(table)))
            .or_default()
            .push(RawRow {
                ab_id: ab_id.to_string(),
                emitted_at,
                data: data.to_string(),
            });
    }

    pub fn create_raw_table(&self, schema: &str, table: &str) {
        let mut state = self.state.lock().unwrap();
        state.tables.entry((fold(schema), fold(table))).or_default();
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.state.lock().unwrap().schemas.contains(&fold(schema))
    }

    pub fn schemas(&self) -> Vec<String> {
        self.state.lock().unwrap().schemas.iter().cloned().collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }
}

fn fold(identifier: &str) -> String {
    identifier.to_ascii_uppercase()
}

async fn handle(
    state: Arc<Mutex<State>>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let response = match path.as_str() {
        "/session/v1/login-request" => json_response(login(&state, &payload)),
        "/queries/v1/query-request" => {
            let sql = payload["sqlText"].as_str().unwrap_or_default().to_string();
            json_response(query(&state, addr, &sql))
        }
        "/chunks/0" => Response::new(Full::new(Bytes::from_static(
            br#"["2","two"],["3","three"]"#,
        ))),
        _ => {
            let mut response = Response::new(Full::new(Bytes::from_static(b"not found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };
    Ok(response)
}

fn json_response(value: Value) -> Response<Full<Bytes>> {
    Response::new(Full::new(Bytes::from(value.to_string())))
}

fn login(state: &Mutex<State>, payload: &Value) -> Value {
    let data = &payload["data"];
    if data["LOGIN_NAME"] != USERNAME || data["PASSWORD"] != PASSWORD {
        return json!({
            "data": null,
            "message": "Incorrect username or password was specified.",
            "success": false,
            "code": "390100"
        });
    }
    state.lock().unwrap().logins += 1;
    json!({
        "data": { "token": TOKEN },
        "message": null,
        "success": true
    })
}

fn query(state: &Mutex<State>, addr: SocketAddr, sql: &str) -> Value {
    let mut state = state.lock().unwrap();
    state.statements.push(sql.to_string());

    let trimmed = sql.trim().trim_end_matches(';');
    let words = trimmed.split_whitespace().collect::<Vec<_>>();
    match words.as_slice() {
        ["CREATE", "SCHEMA", name] => {
            if !state.schemas.insert(fold(name)) {
                return failure(&format!("Object '{name}' already exists."));
            }
            status(&format!("Schema {} successfully created.", fold(name)))
        }
        ["DROP", "SCHEMA", "IF", "EXISTS", name] => {
            let name = fold(name);
            state.schemas.remove(&name);
            state.tables.retain(|(schema, _), _| *schema != name);
            status("Drop statement executed successfully.")
        }
        ["SELECT", "*", "FROM", qualified, ..] => {
            let Some((schema, table)) = qualified.split_once('.') else {
                return failure("SQL compilation error: unqualified table");
            };
            let Some(rows) = state.tables.get(&(fold(schema), fold(table))) else {
                return failure(&format!(
                    "SQL compilation error:\nObject '{}' does not exist or not authorized.",
                    qualified.to_ascii_uppercase()
                ));
            };
            let mut rows = rows.clone();
            rows.sort_by(|a, b| {
                a.emitted_at
                    .total_cmp(&b.emitted_at)
                    .then_with(|| a.ab_id.cmp(&b.ab_id))
            });
            result(
                &RAW_COLUMNS,
                rows.into_iter()
                    .map(|row| {
                        vec![
                            Some(row.ab_id),
                            Some(row.data),
                            Some(format!("{:.9}", row.emitted_at)),
                        ]
                    })
                    .collect(),
                json!({}),
            )
        }
        ["SELECT", "SEQ", "FROM", "CHUNKED"] => result(
            &[("SEQ", "fixed"), ("NAME", "text")],
            vec![vec![Some("1".to_string()), Some("one".to_string())]],
            json!({
                "chunks": [{
                    "url": format!("http://{addr}/chunks/0"),
                    "rowCount": 2,
                    "uncompressedSize": 26,
                    "compressedSize": 26
                }],
                "chunkHeaders": { "x-mock-chunk": "1" }
            }),
        ),
        _ => failure(&format!("SQL compilation error: unsupported statement '{sql}'")),
    }
}

fn result(columns: &[(&str, &str)], rows: Vec<Vec<Option<String>>>, extra: Value) -> Value {
    let count = rows.len();
    let mut data = json!({
        "queryId": "01b2c3d4-0000-0000-0000-000000000000",
        "rowtype": columns
            .iter()
            .map(|(name, ty)| json!({
                "name": name,
                "type": ty,
                "nullable": true,
                "scale": 0,
                "database": "AIRBYTE_DATABASE",
                "schema": "",
                "table": ""
            }))
            .collect::<Vec<_>>(),
        "rowset": rows,
        "returned": count,
        "total": count,
        "queryResultFormat": "json"
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        data.extend(extra.clone());
    }
    json!({ "data": data, "message": null, "success": true, "code": null })
}

fn status(message: &str) -> Value {
    result(&[("status", "text")], vec![vec![Some(message.to_string())]], json!({}))
}

fn failure(message: &str) -> Value {
    json!({
        "data": { "queryId": "01b2c3d4-0000-0000-0000-000000000001" },
        "message": message,
        "success": false,
        "code": "002003"
    })
}
