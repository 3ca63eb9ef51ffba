//! A stand-in browser for session tests: the `/json/*` discovery endpoints
//! over axum, and one page websocket over tokio-tungstenite.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use super::http::DebugEndpoint;

pub(crate) struct StubState {
    pub pages: usize,
    pub href: String,
    pub title: String,
    pub ready_state: String,
    /// Returned as `errorText` from `Page.navigate`.
    pub navigate_error: Option<String>,
    /// New websocket connections are dropped before the handshake.
    pub refuse_sockets: bool,
    /// Discovery endpoints answer 503.
    pub http_down: bool,
    /// Websocket connections accepted so far.
    pub connections: usize,
    generation: u64,
    ws_url: String,
}

type Shared = Arc<Mutex<StubState>>;

pub(crate) struct StubBrowser {
    pub endpoint: DebugEndpoint,
    pub ws_url: String,
    state: Shared,
}

impl StubBrowser {
    pub async fn start() -> Self {
        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!(
            "ws://{}/devtools/page/P1",
            ws_listener.local_addr().unwrap()
        );
        let state = Arc::new(Mutex::new(StubState {
            pages: 1,
            href: "about:blank".into(),
            title: "Stub Meeting".into(),
            ready_state: "complete".into(),
            navigate_error: None,
            refuse_sockets: false,
            http_down: false,
            connections: 0,
            generation: 0,
            ws_url: ws_url.clone(),
        }));

        let sockets = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = ws_listener.accept().await {
                let refuse = sockets.lock().unwrap().refuse_sockets;
                if refuse {
                    drop(stream);
                    continue;
                }
                tokio::spawn(serve_socket(stream, Arc::clone(&sockets)));
            }
        });

        let app = Router::new()
            .route("/json/list", get(list_targets))
            .route("/json/version", get(version))
            .route("/json/new", put(new_target))
            .with_state(Arc::clone(&state));
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = http_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(http_listener, app).await.unwrap();
        });

        Self {
            endpoint: DebugEndpoint::new("127.0.0.1", port),
            ws_url,
            state,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }

    /// Open page sockets close, without a reply, on their next request.
    pub fn drop_connections(&self) {
        self.state().generation += 1;
    }
}

fn page_target(state: &StubState) -> Value {
    json!({
        "id": "P1",
        "type": "page",
        "title": state.title,
        "url": state.href,
        "webSocketDebuggerUrl": state.ws_url,
    })
}

async fn list_targets(State(state): State<Shared>) -> Result<Json<Value>, StatusCode> {
    let state = state.lock().unwrap();
    if state.http_down {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let mut targets: Vec<Value> = (0..state.pages).map(|_| page_target(&state)).collect();
    targets.push(json!({
        "id": "W1",
        "type": "service_worker",
        "url": "https://app.zoom.us/sw.js",
    }));
    Ok(Json(Value::Array(targets)))
}

async fn version(State(state): State<Shared>) -> Result<Json<Value>, StatusCode> {
    let state = state.lock().unwrap();
    if state.http_down {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "Browser": "Stub/1.0",
        "webSocketDebuggerUrl": state.ws_url,
    })))
}

async fn new_target(State(state): State<Shared>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.pages += 1;
    Json(page_target(&state))
}

async fn serve_socket(stream: TcpStream, state: Shared) {
    let generation = {
        let mut state = state.lock().unwrap();
        state.connections += 1;
        state.generation
    };
    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(Message::Text(text))) = socket.next().await {
        let request: Value = serde_json::from_str(&text).unwrap();
        let id = request["id"].as_u64().unwrap();
        let reply = {
            let mut state = state.lock().unwrap();
            if state.generation != generation {
                return;
            }
            respond(&mut state, &request)
        };
        let reply = match reply {
            Ok(result) => json!({ "id": id, "result": result }),
            Err(error) => json!({ "id": id, "error": error }),
        };

        // An event and a reply to some other request arrive ahead of the answer.
        let messages = [
            json!({ "method": "Page.frameStoppedLoading", "params": { "frameId": "F1" } }),
            json!({ "id": id + 1000, "result": {} }),
            reply,
        ];
        for message in messages {
            if socket.send(Message::Text(message.to_string())).await.is_err() {
                return;
            }
        }
    }
}

fn respond(state: &mut StubState, request: &Value) -> Result<Value, Value> {
    let params = &request["params"];
    match request["method"].as_str().unwrap_or_default() {
        "Page.enable" => Ok(json!({})),
        "Page.navigate" => match &state.navigate_error {
            Some(error) => Ok(json!({ "frameId": "F1", "errorText": error })),
            None => {
                state.href = params["url"].as_str().unwrap_or_default().to_string();
                Ok(json!({ "frameId": "F1" }))
            }
        },
        "Runtime.evaluate" => {
            let value = match params["expression"].as_str().unwrap_or_default() {
                "document.readyState" => state.ready_state.clone(),
                "window.location.href" => state.href.clone(),
                "document.title" => state.title.clone(),
                other => {
                    return Ok(json!({
                        "result": { "type": "object", "subtype": "error" },
                        "exceptionDetails": { "text": format!("{other} is not defined") },
                    }))
                }
            };
            Ok(json!({ "result": { "type": "string", "value": value } }))
        }
        other => Err(json!({ "code": -32601, "message": format!("'{other}' wasn't found") })),
    }
}
