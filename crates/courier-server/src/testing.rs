//! In-memory [`ApiTransport`] used by the unit tests in this crate.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::{ApiTransport, HttpReply, RetryPolicy, RetryableApiClient, TransportError};

type Responder = dyn Fn(&str, &Value) -> Result<HttpReply, TransportError> + Send + Sync;

/// Records every call and answers from a scripted responder.
pub struct FakeTransport {
    responder: Box<Responder>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeTransport {
    /// Answers every method successfully. `createForumTopic` hands out
    /// increasing thread ids starting at 100 and `getChat` reports a forum.
    pub fn ok() -> Self {
        let next_thread = AtomicI64::new(100);
        Self::with(move |method, params| {
            let result = match method {
                "createForumTopic" => json!({
                    "message_thread_id": next_thread.fetch_add(1, Ordering::SeqCst),
                    "name": params["name"],
                }),
                "getChat" => json!({ "id": params["chat_id"], "is_forum": true }),
                _ => json!({ "message_id": 1 }),
            };
            Ok(ok_reply(result))
        })
    }

    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<HttpReply, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Parameters of every call to `method`, in order.
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn post(&self, method: &str, params: &Value) -> Result<HttpReply, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        (self.responder)(method, params)
    }
}

pub fn ok_reply(result: Value) -> HttpReply {
    HttpReply {
        status: 200,
        body: json!({ "ok": true, "result": result }).to_string(),
    }
}

pub fn error_reply(status: u16, description: &str) -> HttpReply {
    HttpReply {
        status,
        body: json!({ "ok": false, "error_code": status, "description": description })
            .to_string(),
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
        timeout: Duration::from_secs(1),
    }
}

pub fn fake_client(transport: Arc<FakeTransport>) -> Arc<RetryableApiClient> {
    Arc::new(RetryableApiClient::new(transport, fast_policy()))
}
