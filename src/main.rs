use nexus_activity_stream::{
    http_server, ActivityEntry, ActivitySummary, Credential, CredentialStore, StreamConfig,
    StreamManager, WsConnector,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ─── JSON-RPC wire types ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn ok_response(id: Value, data: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({
            "success": true,
            "data": data,
            "message": null
        })),
        error: None,
        id,
    }
}

fn err_response(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError { code, message }),
        id,
    }
}

// ─── Shared app state ────────────────────────────────────────────────────────

#[derive(Default)]
struct AppState {
    credentials: CredentialStore,
    manager: Option<StreamManager>,
    port: Option<u16>,
    base_url: Option<String>,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn init_tracing() {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let state: Arc<RwLock<AppState>> = Arc::new(RwLock::new(AppState::default()));
    let handle = tokio::runtime::Handle::current();

    // Stdin loop on a blocking thread to avoid blocking the async runtime.
    let stdin_loop = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                _ => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        err_response(Value::Number(0.into()), -32700, format!("Parse error: {e}"));
                    emit_line(&mut out, &resp);
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";
            let response = handle.block_on(handle_request(&request, &state));
            emit_line(&mut out, &response);

            if is_shutdown {
                break;
            }
        }
    });

    if let Err(e) = stdin_loop.await {
        error!("stdin loop panicked: {e}");
    }
}

fn emit_line(out: &mut impl Write, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => error!("failed to serialize response: {e}"),
    }
}

// ─── Request dispatch ─────────────────────────────────────────────────────────

async fn handle_request(req: &JsonRpcRequest, state: &Arc<RwLock<AppState>>) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(req, state).await,
        "shutdown" => handle_shutdown(req, state).await,
        "execute" => handle_execute(req, state).await,
        _ => err_response(req.id.clone(), -32601, format!("Unknown method: {}", req.method)),
    }
}

async fn handle_initialize(req: &JsonRpcRequest, state: &Arc<RwLock<AppState>>) -> JsonRpcResponse {
    let config: StreamConfig = match req.params.get("config") {
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(c) => c,
            Err(e) => return err_response(req.id.clone(), -32602, format!("Invalid config: {e}")),
        },
        None => StreamConfig::default(),
    };
    if let Err(e) = config.validate() {
        return err_response(req.id.clone(), -32602, format!("Invalid config: {e}"));
    }

    let mut st = state.write().await;
    if st.manager.is_some() {
        return err_response(req.id.clone(), -32000, "already initialized".to_string());
    }

    if let Some(credential) = non_empty_str(&req.params, "credential") {
        st.credentials.set(Some(Credential::new(credential)));
    }

    let connector = Arc::new(WsConnector::new(config.connect_timeout()));
    let manager = match StreamManager::spawn(&config, &st.credentials, connector) {
        Ok(m) => m,
        Err(e) => return err_response(req.id.clone(), -32603, format!("Stream start failed: {e}")),
    };

    if let Some(bind) = &config.http_bind {
        match http_server::start(bind, manager.publisher()).await {
            Ok(port) => {
                st.port = Some(port);
                st.base_url = Some(format!("http://127.0.0.1:{port}"));
            }
            Err(e) => {
                return err_response(req.id.clone(), -32603, format!("HTTP server failed: {e}"));
            }
        }
    }

    st.manager = Some(manager);
    info!(endpoint = %config.endpoint, "activity stream initialized");

    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({ "ready": true })),
        error: None,
        id: req.id.clone(),
    }
}

async fn handle_shutdown(req: &JsonRpcRequest, state: &Arc<RwLock<AppState>>) -> JsonRpcResponse {
    let manager = state.write().await.manager.take();
    if let Some(manager) = manager {
        manager.shutdown().await;
    }
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({})),
        error: None,
        id: req.id.clone(),
    }
}

// ─── Execute handler ──────────────────────────────────────────────────────────

async fn handle_execute(req: &JsonRpcRequest, state: &Arc<RwLock<AppState>>) -> JsonRpcResponse {
    let operation = req
        .params
        .get("operation")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let input = req
        .params
        .get("input")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    let result = match operation {
        "get_server_info" => op_get_server_info(state).await,
        "set_credential" => op_set_credential(&input, state).await,
        "clear_credential" => op_clear_credential(state).await,
        "get_stream_state" => op_get_stream_state(state).await,
        "get_recent_activity" => op_get_recent_activity(&input, state).await,
        "get_activity_summary" => op_get_activity_summary(state).await,
        _ => Err(format!("Unknown operation: {operation}")),
    };

    match result {
        Ok(data) => ok_response(req.id.clone(), data),
        Err(msg) => err_response(req.id.clone(), -32000, msg),
    }
}

// ─── Operations ───────────────────────────────────────────────────────────────

fn non_empty_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

async fn op_get_server_info(state: &Arc<RwLock<AppState>>) -> Result<Value, String> {
    let st = state.read().await;
    let manager = st.manager.as_ref().ok_or("stream not initialized")?;
    let view = manager.get_snapshot();
    Ok(serde_json::json!({
        "port": st.port,
        "base_url": st.base_url,
        "status": view.status,
        "connection_status": view.status.to_string(),
        "history_len": view.history.len(),
        "credential": st.credentials.current().map(|c| c.fingerprint()),
    }))
}

async fn op_set_credential(input: &Value, state: &Arc<RwLock<AppState>>) -> Result<Value, String> {
    let credential =
        non_empty_str(input, "credential").ok_or("missing required field: credential")?;
    let st = state.read().await;
    if st.manager.is_none() {
        return Err("stream not initialized".to_string());
    }
    let credential = Credential::new(credential);
    let fingerprint = credential.fingerprint();
    st.credentials.set(Some(credential));
    Ok(serde_json::json!({ "accepted": true, "credential": fingerprint }))
}

async fn op_clear_credential(state: &Arc<RwLock<AppState>>) -> Result<Value, String> {
    let st = state.read().await;
    st.credentials.clear();
    Ok(serde_json::json!({ "cleared": true }))
}

async fn op_get_stream_state(state: &Arc<RwLock<AppState>>) -> Result<Value, String> {
    let st = state.read().await;
    let manager = st.manager.as_ref().ok_or("stream not initialized")?;
    serde_json::to_value(manager.get_snapshot()).map_err(|e| e.to_string())
}

async fn op_get_recent_activity(
    input: &Value,
    state: &Arc<RwLock<AppState>>,
) -> Result<Value, String> {
    let webhook_id = non_empty_str(input, "webhook_id");
    let limit = match input.get("limit") {
        None | Some(Value::Null) => usize::MAX,
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or("limit must be a non-negative integer")?,
    };

    let st = state.read().await;
    let manager = st.manager.as_ref().ok_or("stream not initialized")?;
    let view = manager.get_snapshot();
    let entries: Vec<&ActivityEntry> = match webhook_id {
        Some(id) => view.for_webhook(id).take(limit).collect(),
        None => view.history.iter().take(limit).collect(),
    };
    let count = entries.len();

    Ok(serde_json::json!({
        "status": view.status,
        "activity": entries,
        "count": count,
    }))
}

async fn op_get_activity_summary(state: &Arc<RwLock<AppState>>) -> Result<Value, String> {
    let st = state.read().await;
    let manager = st.manager.as_ref().ok_or("stream not initialized")?;
    let view = manager.get_snapshot();
    let summary = ActivitySummary::from_view(&view);
    Ok(serde_json::json!({
        "status": view.status,
        "summary": summary,
        "total": summary.total(),
    }))
}
