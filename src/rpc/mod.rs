//! JSON-RPC 2.0 dispatcher over stdio.
//!
//! One JSON value per line, UTF-8: requests on stdin, responses and
//! progress notifications on stdout (logs go to stderr). Handler methods
//! run one at a time, in arrival order, on a dedicated worker; the reader
//! loop keeps draining stdin so `task.cancel` and `task.cleanup` are
//! served out-of-band while a handler is still blocked.

pub mod methods;
pub mod progress;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::error::HandlerError;
use crate::tasks::cleanup;
use crate::AppContext;
use progress::ProgressSender;

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ─── Error codes ─────────────────────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
/// Cooperative cancellation observed before or during the handler run.
pub const TASK_CANCELLED: i32 = -32001;
/// Collaborator (external tool/library) failure.
pub const HANDLER_FAILURE: i32 = -32000;

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// A handler invocation queued for the serial worker.
pub struct Job {
    pub id: Value,
    pub task_id: String,
    pub method: String,
    pub params: Value,
}

/// Run the server until stdin closes.
pub async fn run(ctx: AppContext) -> Result<()> {
    let (out_tx, out_rx) = unbounded_channel::<String>();
    let writer = tokio::spawn(write_loop(out_rx));

    let (job_tx, mut job_rx) = unbounded_channel::<Job>();
    let worker_ctx = ctx.clone();
    let worker_out = out_tx.clone();
    let worker = tokio::spawn(async move {
        while let Some(job) = job_rx.recv().await {
            execute_job(job, &worker_ctx, &worker_out).await;
        }
    });

    info!("JSON-RPC server ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(job) = route_line(line, &ctx, &out_tx) {
            // Receiver lives as long as the worker; a send failure means
            // shutdown is already underway.
            let _ = job_tx.send(job);
        }
    }

    // stdin closed — drain queued jobs, then flush pending output.
    drop(job_tx);
    worker.await?;
    drop(out_tx);
    writer.await?;
    info!("JSON-RPC server stopped");
    Ok(())
}

async fn write_loop(mut rx: UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = rx.recv().await {
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        if let Err(e) = stdout.write_all(&buf).await {
            error!(err = %e, "failed to write response");
            break;
        }
        let _ = stdout.flush().await;
    }
}

/// Parse one request line. Built-ins (`task.cancel`, `task.cleanup`) and all
/// protocol-level errors are answered immediately; everything else becomes a
/// [`Job`] for the serial worker.
pub fn route_line(text: &str, ctx: &AppContext, out: &UnboundedSender<String>) -> Option<Job> {
    let request: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            send_error(out, Value::Null, PARSE_ERROR, &format!("Parse error: {e}"));
            return None;
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);

    let Some(method) = request.get("method").and_then(Value::as_str) else {
        send_error(
            out,
            id,
            INVALID_REQUEST,
            "Invalid Request: method is required",
        );
        return None;
    };

    let params = request
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    debug!(method = %method, "rpc dispatch");

    match method {
        // Cancellation must work while another handler occupies the worker,
        // so both built-ins are served inline from the reader loop.
        "task.cancel" => {
            let Some(task_id) = params.get("taskId").and_then(Value::as_str) else {
                send_error(out, id, INVALID_PARAMS, "Invalid params: taskId is required");
                return None;
            };
            ctx.tracker.request_cancel(task_id);
            send_result(
                out,
                id,
                serde_json::json!({ "cancelled": true, "taskId": task_id }),
            );
            None
        }
        "task.cleanup" => {
            let Some(file_path) = params.get("filePath").and_then(Value::as_str) else {
                send_error(
                    out,
                    id,
                    INVALID_PARAMS,
                    "Invalid params: filePath is required",
                );
                return None;
            };
            let cleaned = cleanup::remove_path(std::path::Path::new(file_path));
            send_result(
                out,
                id,
                serde_json::json!({ "cleaned": cleaned, "filePath": file_path }),
            );
            None
        }
        _ => {
            if !ctx.registry.contains(method) {
                send_error(
                    out,
                    id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                );
                return None;
            }
            let task_id = task_id_for(&id);
            // Admit before queueing: a cancel arriving while the job waits
            // behind the serial worker keeps its flag until the job runs.
            ctx.tracker.begin(&task_id);
            Some(Job {
                id,
                task_id,
                method: method.to_string(),
                params,
            })
        }
    }
}

/// Execute one queued handler invocation and emit exactly one terminal
/// response. Ordering guarantees: `complete` happens before the success
/// response, `fail_and_clean` before any error response.
pub async fn execute_job(job: Job, ctx: &AppContext, out: &UnboundedSender<String>) {
    let Job {
        id,
        task_id,
        method,
        params,
    } = job;

    // A cancel that arrived while the job was queued short-circuits it.
    if ctx.tracker.is_cancelled(&task_id) {
        ctx.tracker.fail_and_clean(&task_id);
        send_error(out, id, TASK_CANCELLED, "Task cancelled");
        return;
    }

    let Some(def) = ctx.registry.get(&method) else {
        ctx.tracker.fail_and_clean(&task_id);
        send_error(out, id, METHOD_NOT_FOUND, &format!("Method not found: {method}"));
        return;
    };

    // Register the declared output path before the handler can touch it.
    if let Some(key) = def.output.param_key() {
        match params.get(key).and_then(Value::as_str) {
            Some(path) => ctx
                .tracker
                .register_output(&task_id, std::path::Path::new(path)),
            None => {
                ctx.tracker.fail_and_clean(&task_id);
                send_error(
                    out,
                    id,
                    INVALID_PARAMS,
                    &format!("Invalid params: {key} is required"),
                );
                return;
            }
        }
    }

    let handler = def.handler();
    let progress = ProgressSender::new(task_id.clone(), ctx.tracker.clone(), out.clone());
    let handler_ctx = ctx.clone();
    let result = tokio::task::spawn_blocking(move || handler(&handler_ctx, params, &progress))
        .await
        .unwrap_or_else(|e| {
            Err(HandlerError::Other(anyhow::anyhow!(
                "handler panicked: {e}"
            )))
        });

    match result {
        Ok(value) => {
            ctx.tracker.complete(&task_id);
            send_result(out, id, value);
        }
        Err(e) => {
            ctx.tracker.fail_and_clean(&task_id);
            if e.is_cancelled() {
                send_error(out, id, TASK_CANCELLED, "Task cancelled");
            } else {
                let (code, message) = classify_error(&e, &method);
                send_error(out, id, code, &message);
            }
        }
    }
}

fn classify_error(e: &HandlerError, method: &str) -> (i32, String) {
    match e {
        HandlerError::Cancelled => (TASK_CANCELLED, "Task cancelled".to_string()),
        HandlerError::InvalidParams(msg) => (INVALID_PARAMS, format!("Invalid params: {msg}")),
        HandlerError::Other(err) => {
            warn!(method = %method, err = %err, "handler failed");
            (HANDLER_FAILURE, err.to_string())
        }
    }
}

/// Derive the task identifier from the request's correlation id. String
/// ids are used verbatim; other scalars keep their JSON rendering; a
/// missing id still gets a unique identifier so cleanup tracking works.
fn task_id_for(id: &Value) -> String {
    match id {
        Value::Null => uuid::Uuid::new_v4().to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn send_result(out: &UnboundedSender<String>, id: Value, result: Value) {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    };
    send_json(out, &resp);
}

fn send_error(out: &UnboundedSender<String>, id: Value, code: i32, message: &str) {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
            data: None,
        }),
    };
    send_json(out, &resp);
}

fn send_json(out: &UnboundedSender<String>, resp: &RpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => error!(err = %e, "failed to serialize response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_uses_string_ids_verbatim() {
        assert_eq!(task_id_for(&Value::String("req-7".into())), "req-7");
    }

    #[test]
    fn task_id_renders_numeric_ids() {
        assert_eq!(task_id_for(&serde_json::json!(17)), "17");
    }

    #[test]
    fn task_id_for_null_is_unique() {
        let a = task_id_for(&Value::Null);
        let b = task_id_for(&Value::Null);
        assert_ne!(a, b);
    }
}
