use crate::error::{Result, StoreError};
use crate::record::{Query, Record, StoreNode, StoreRelationship, Value};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// A backing graph database that executes declarative queries.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn run(&self, query: &Query) -> Result<Vec<Record>>;
}

/// Client for the Neo4j HTTP transactional endpoint.
pub struct Neo4jClient {
    client: Client,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
}

impl Neo4jClient {
    pub fn new(base_url: &str, database: &str) -> Result<Self> {
        Self::with_timeout(base_url, database, 30)
    }

    pub fn with_timeout(base_url: &str, database: &str, timeout_secs: u64) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(&format!("db/{}/tx/commit", database))
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = Client::builder()
            .user_agent("Vantage/0.1 (https://github.com/trapdoorsec/vantage)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            username: None,
            password: None,
        })
    }

    pub fn with_credentials(mut self, username: &str, password: Option<String>) -> Self {
        self.username = Some(username.to_string());
        self.password = password;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl GraphStore for Neo4jClient {
    async fn run(&self, query: &Query) -> Result<Vec<Record>> {
        let body = json!({
            "statements": [{
                "statement": query.text,
                "parameters": query.params,
                "resultDataContents": ["row", "graph"],
            }]
        });

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(ref username) = self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let start = Instant::now();
        let response = request.send().await?.error_for_status()?;
        let payload: TxResponse = response.json().await?;
        debug!(
            "Store query returned in {}ms",
            start.elapsed().as_millis()
        );

        decode_response(payload)
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<JsonValue>,
    #[serde(default)]
    meta: Vec<JsonValue>,
    #[serde(default)]
    graph: TxGraph,
}

#[derive(Debug, Default, Deserialize)]
struct TxGraph {
    #[serde(default)]
    nodes: Vec<TxNode>,
    #[serde(default)]
    relationships: Vec<TxRelationship>,
}

#[derive(Debug, Deserialize)]
struct TxNode {
    id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    properties: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct TxRelationship {
    id: String,
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(rename = "startNode")]
    start_node: String,
    #[serde(rename = "endNode")]
    end_node: String,
    #[serde(default)]
    properties: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| StoreError::MalformedResponse(format!("non-numeric identity '{}'", raw)))
}

fn decode_response(payload: TxResponse) -> Result<Vec<Record>> {
    if let Some(error) = payload.errors.into_iter().next() {
        return Err(StoreError::QueryError {
            code: error.code,
            message: error.message,
        });
    }

    let mut records = Vec::new();
    for result in payload.results {
        for row in result.data {
            records.push(decode_row(&result.columns, row)?);
        }
    }
    Ok(records)
}

// `meta` runs parallel to `row`; node and relationship columns point into `graph`
fn decode_row(columns: &[String], row: TxRow) -> Result<Record> {
    let mut record = Record::new();

    for (idx, column) in columns.iter().enumerate() {
        let raw = row.row.get(idx).cloned().unwrap_or(JsonValue::Null);
        let meta = row.meta.get(idx).unwrap_or(&JsonValue::Null);
        let meta_type = meta.get("type").and_then(JsonValue::as_str);
        let meta_id = meta.get("id").and_then(JsonValue::as_i64);

        let value = match (meta_type, meta_id) {
            (Some("node"), Some(id)) => {
                let node = row
                    .graph
                    .nodes
                    .iter()
                    .find(|n| n.id == id.to_string())
                    .ok_or_else(|| {
                        StoreError::MalformedResponse(format!(
                            "column '{}' references node {} missing from graph section",
                            column, id
                        ))
                    })?;
                Value::Node(StoreNode {
                    id: parse_id(&node.id)?,
                    labels: node.labels.clone(),
                    properties: node.properties.clone(),
                })
            }
            (Some("relationship"), Some(id)) => {
                let rel = row
                    .graph
                    .relationships
                    .iter()
                    .find(|r| r.id == id.to_string())
                    .ok_or_else(|| {
                        StoreError::MalformedResponse(format!(
                            "column '{}' references relationship {} missing from graph section",
                            column, id
                        ))
                    })?;
                Value::Relationship(StoreRelationship {
                    id: parse_id(&rel.id)?,
                    start: parse_id(&rel.start_node)?,
                    end: parse_id(&rel.end_node)?,
                    rel_type: rel.rel_type.clone(),
                    properties: rel.properties.clone(),
                })
            }
            (Some(other), _) => {
                warn!("Unexpected column type '{}' in column '{}'", other, column);
                Value::Scalar(raw)
            }
            _ if raw.is_null() => Value::Null,
            _ => Value::Scalar(raw),
        };

        record.push(column, value);
    }

    Ok(record)
}
