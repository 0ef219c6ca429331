//! Scripted in-memory [`GraphStore`] for exercising callers without a database.
//!
//! Responses are matched by substring against the query text, first registered
//! match wins. Every executed query is recorded so tests can assert on how many
//! round trips a caller made and with which parameters.

use crate::client::GraphStore;
use crate::error::{Result, StoreError};
use crate::record::{Query, Record};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

enum Reply {
    Records(Vec<Record>),
    Failure(String),
}

struct Rule {
    pattern: String,
    reply: Reply,
}

#[derive(Default)]
pub struct StubGraphStore {
    rules: Mutex<Vec<Rule>>,
    executed: Mutex<Vec<Query>>,
    latency: Option<Duration>,
}

impl StubGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Answer queries containing `pattern` with `records`.
    pub fn respond(&self, pattern: &str, records: Vec<Record>) {
        self.push_rule(pattern, Reply::Records(records));
    }

    /// Fail queries containing `pattern` with a query error.
    pub fn fail(&self, pattern: &str, message: &str) {
        self.push_rule(pattern, Reply::Failure(message.to_string()));
    }

    pub fn executed(&self) -> Vec<Query> {
        self.executed.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().map(|q| q.len()).unwrap_or_default()
    }

    fn push_rule(&self, pattern: &str, reply: Reply) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                reply,
            });
        }
    }
}

#[async_trait]
impl GraphStore for StubGraphStore {
    async fn run(&self, query: &Query) -> Result<Vec<Record>> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(query.clone());
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let rules = self
            .rules
            .lock()
            .map_err(|e| StoreError::Other(format!("stub poisoned: {}", e)))?;

        match rules.iter().find(|rule| query.text.contains(&rule.pattern)) {
            Some(Rule {
                reply: Reply::Records(records),
                ..
            }) => Ok(records.clone()),
            Some(Rule {
                reply: Reply::Failure(message),
                ..
            }) => Err(StoreError::QueryError {
                code: "Stub.Failure".to_string(),
                message: message.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }
}
