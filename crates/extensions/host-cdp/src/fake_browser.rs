//! A local WebSocket server speaking just enough CDP for tests.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub(crate) enum Reply {
    Result(Value),
    Error(i64, &'static str),
    Silent,
}

enum Outgoing {
    Push(Value),
    Close,
}

pub(crate) struct FakeBrowser {
    pub url: String,
    calls: Arc<Mutex<Vec<Value>>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl FakeBrowser {
    /// Serve one connection, answering each call with `respond(method, params)`.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/devtools/browser/fake", listener.local_addr().unwrap());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel();

        let recorded = calls.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            loop {
                tokio::select! {
                    incoming = ws.next() => {
                        let Some(Ok(Message::Text(text))) = incoming else { break };
                        let request: Value = serde_json::from_str(text.as_str()).unwrap();
                        recorded.lock().push(request.clone());
                        let method = request["method"].as_str().unwrap_or_default();
                        let params = request.get("params").cloned().unwrap_or(Value::Null);
                        let reply = match respond(method, &params) {
                            Reply::Result(result) => json!({"id": request["id"], "result": result}),
                            Reply::Error(code, message) => json!({
                                "id": request["id"],
                                "error": {"code": code, "message": message}
                            }),
                            Reply::Silent => continue,
                        };
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    outgoing = outgoing_rx.recv() => match outgoing {
                        Some(Outgoing::Push(message)) => {
                            if ws.send(Message::Text(message.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outgoing::Close) | None => {
                            let _ = ws.close(None).await;
                            break;
                        }
                    },
                }
            }
        });

        Self { url, calls, outgoing }
    }

    /// Send an event to the client.
    pub fn push(&self, method: &str, params: Value, session_id: Option<&str>) {
        let mut message = json!({"method": method, "params": params});
        if let Some(session_id) = session_id {
            message["sessionId"] = json!(session_id);
        }
        let _ = self.outgoing.send(Outgoing::Push(message));
    }

    pub fn hang_up(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c["method"].as_str().map(str::to_string))
            .collect()
    }

    /// The last call made with `method`.
    pub fn last_call(&self, method: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|c| c["method"] == method)
            .cloned()
    }

    pub fn calls_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c["method"] == method)
            .cloned()
            .collect()
    }
}
