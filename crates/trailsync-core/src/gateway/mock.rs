//! Scripted in-memory gateway for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use super::{GatewayError, GatewayMethod, GatewayRequest, RemoteGateway};

/// Records every request; push requests pop scripted responses and fall back
/// to a fixed outcome, pulls (`GET`) answer from a per-path table.
pub struct MockGateway {
    requests: Mutex<Vec<GatewayRequest>>,
    scripted: Mutex<VecDeque<Result<Value, GatewayError>>>,
    fallback: Mutex<Result<Value, GatewayError>>,
    pulls: Mutex<HashMap<String, Value>>,
    gate: Option<Arc<Semaphore>>,
    started: Notify,
}

impl MockGateway {
    pub fn succeeding() -> Self {
        Self::with_fallback(Ok(Value::Null))
    }

    pub fn failing(error: GatewayError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<Value, GatewayError>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            pulls: Mutex::new(HashMap::new()),
            gate: None,
            started: Notify::new(),
        }
    }

    /// Hold every push request until the returned semaphore gets permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn script(&self, response: Result<Value, GatewayError>) {
        self.scripted.lock().unwrap().push_back(response);
    }

    pub fn set_fallback(&self, response: Result<Value, GatewayError>) {
        *self.fallback.lock().unwrap() = response;
    }

    /// Answer `GET <path>` with `body`. An `updated_since` query drops listed
    /// entities whose numeric `updated_at` is older.
    pub fn serve_pull(&self, path: &str, body: Value) {
        self.pulls.lock().unwrap().insert(path.to_string(), body);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Non-GET requests, in delivery order.
    pub fn pushes(&self) -> Vec<GatewayRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method != GatewayMethod::Get)
            .collect()
    }

    /// Resolves once a push request has entered the gateway.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

pub fn server_error() -> GatewayError {
    GatewayError::Status {
        status: 500,
        message: "internal error".to_string(),
    }
}

pub fn unauthorized() -> GatewayError {
    GatewayError::Status {
        status: 401,
        message: "token expired".to_string(),
    }
}

fn updated_since(query: &str) -> Option<i64> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("updated_since="))
        .and_then(|value| value.parse().ok())
}

fn is_fresh(entity: &Value, since: i64) -> bool {
    entity
        .get("updated_at")
        .and_then(Value::as_i64)
        .map_or(true, |at| at >= since)
}

fn changed_since(body: Value, since: i64) -> Value {
    match body {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|entity| is_fresh(entity, since))
                .collect(),
        ),
        Value::Object(mut map) => {
            for key in ["items", "data"] {
                if let Some(Value::Array(items)) = map.get_mut(key) {
                    items.retain(|entity| is_fresh(entity, since));
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn send(&self, request: GatewayRequest) -> Result<Value, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());

        if request.method == GatewayMethod::Get {
            let (path, query) = request
                .path
                .split_once('?')
                .unwrap_or((request.path.as_str(), ""));
            let body = self.pulls.lock().unwrap().get(path).cloned();
            let body = body.unwrap_or_else(|| Value::Array(Vec::new()));
            return Ok(match updated_since(query) {
                Some(since) => changed_since(body, since),
                None => body,
            });
        }

        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}
