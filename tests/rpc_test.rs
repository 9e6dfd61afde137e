//! Dispatcher behavior over the wire: framing errors, built-in methods,
//! declared-output registration, and the cancellation/cleanup lifecycle as
//! a client observes it.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use ihw_backend::config::BackendConfig;
use ihw_backend::error::HandlerError;
use ihw_backend::rpc::methods::{MethodRegistry, OutputSpec};
use ihw_backend::rpc::{execute_job, route_line};
use ihw_backend::AppContext;

fn ctx_with(registry: MethodRegistry) -> AppContext {
    AppContext::with_registry(BackendConfig::default(), registry)
}

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        out.push(serde_json::from_str(&line).expect("output lines must be valid JSON"));
    }
    out
}

#[test]
fn malformed_json_yields_parse_error_with_null_id() {
    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    assert!(route_line("{not json", &ctx, &tx).is_none());

    let responses = drain(&mut rx);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["jsonrpc"], "2.0");
    assert_eq!(responses[0]["id"], Value::Null);
    assert_eq!(responses[0]["error"]["code"], -32700);
}

#[test]
fn request_without_method_is_invalid() {
    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    assert!(route_line(r#"{"jsonrpc":"2.0","id":5,"params":{}}"#, &ctx, &tx).is_none());

    let responses = drain(&mut rx);
    assert_eq!(responses[0]["id"], 5);
    assert_eq!(responses[0]["error"]["code"], -32600);
}

#[test]
fn unknown_method_is_rejected_by_name() {
    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    let line = r#"{"id":"r1","method":"pdf.teleport","params":{}}"#;
    assert!(route_line(line, &ctx, &tx).is_none());

    let responses = drain(&mut rx);
    assert_eq!(responses[0]["error"]["code"], -32601);
    assert_eq!(
        responses[0]["error"]["message"],
        "Method not found: pdf.teleport"
    );
}

#[test]
fn known_method_becomes_a_job() {
    let mut reg = MethodRegistry::new();
    reg.register("t.noop", OutputSpec::None, |_, _, _| Ok(json!({})));
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let job = route_line(r#"{"id":"r2","method":"t.noop"}"#, &ctx, &tx)
        .expect("known methods queue a job");
    assert_eq!(job.method, "t.noop");
    assert_eq!(job.task_id, "r2");
    assert!(drain(&mut rx).is_empty(), "no response until the job runs");
}

#[test]
fn cancel_always_reports_success() {
    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    let line = r#"{"id":9,"method":"task.cancel","params":{"taskId":"never-started"}}"#;
    assert!(route_line(line, &ctx, &tx).is_none());

    let responses = drain(&mut rx);
    assert_eq!(responses[0]["result"]["cancelled"], true);
    assert_eq!(responses[0]["result"]["taskId"], "never-started");
    assert!(ctx.tracker.is_cancelled("never-started"));
}

#[test]
fn cancel_deletes_already_registered_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("partial.mp4");
    std::fs::write(&out, b"partial").unwrap();

    let ctx = ctx_with(MethodRegistry::new());
    ctx.tracker.register_output("t1", &out);
    let (tx, mut rx) = unbounded_channel();

    let line = r#"{"id":1,"method":"task.cancel","params":{"taskId":"t1"}}"#;
    let _ = route_line(line, &ctx, &tx);

    assert!(!out.exists(), "cancel removes the partial file synchronously");
    assert_eq!(drain(&mut rx)[0]["result"]["cancelled"], true);
}

#[test]
fn cleanup_removes_files_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("orphan.pdf");
    std::fs::write(&file, b"x").unwrap();

    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    let line = json!({
        "id": 2,
        "method": "task.cleanup",
        "params": { "filePath": file.to_string_lossy() }
    })
    .to_string();
    let _ = route_line(&line, &ctx, &tx);

    assert!(!file.exists());
    let responses = drain(&mut rx);
    assert_eq!(responses[0]["result"]["cleaned"], true);
}

#[test]
fn cleanup_of_missing_path_still_succeeds() {
    let ctx = ctx_with(MethodRegistry::new());
    let (tx, mut rx) = unbounded_channel();

    let line = r#"{"id":3,"method":"task.cleanup","params":{"filePath":"/nonexistent/gone.pdf"}}"#;
    let _ = route_line(line, &ctx, &tx);

    assert_eq!(drain(&mut rx)[0]["result"]["cleaned"], true);
}

#[tokio::test]
async fn successful_job_keeps_output_and_clears_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("result.pdf");

    let mut reg = MethodRegistry::new();
    reg.register("t.write", OutputSpec::File("outputPath"), |_, params, _| {
        let path = params["outputPath"].as_str().unwrap().to_string();
        std::fs::write(&path, b"done").unwrap();
        Ok(Value::String(path))
    });
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let line = json!({
        "id": "ok-1",
        "method": "t.write",
        "params": { "outputPath": out.to_string_lossy() }
    })
    .to_string();
    let job = route_line(&line, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    assert!(out.exists(), "success keeps the output file");
    assert_eq!(ctx.tracker.active_count(), 0, "tracking state is dropped");
    let responses = drain(&mut rx);
    assert_eq!(responses.len(), 1, "exactly one terminal response");
    assert!(responses[0]["error"].is_null());
}

#[tokio::test]
async fn failed_job_deletes_registered_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("broken.pdf");

    let mut reg = MethodRegistry::new();
    reg.register("t.fail", OutputSpec::File("outputPath"), |_, params, _| {
        std::fs::write(params["outputPath"].as_str().unwrap(), b"partial").unwrap();
        Err(HandlerError::Other(anyhow::anyhow!("disk full")))
    });
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let line = json!({
        "id": "fail-1",
        "method": "t.fail",
        "params": { "outputPath": out.to_string_lossy() }
    })
    .to_string();
    let job = route_line(&line, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    assert!(!out.exists(), "failure cleans the partial output");
    let responses = drain(&mut rx);
    assert_eq!(responses[0]["error"]["code"], -32000);
    assert_eq!(responses[0]["error"]["message"], "disk full");
}

#[tokio::test]
async fn missing_declared_output_param_is_invalid_params() {
    let mut reg = MethodRegistry::new();
    reg.register("t.write", OutputSpec::File("outputPath"), |_, _, _| {
        Ok(json!({}))
    });
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let job = route_line(r#"{"id":"m1","method":"t.write","params":{}}"#, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    let responses = drain(&mut rx);
    assert_eq!(responses[0]["error"]["code"], -32602);
}

#[tokio::test]
async fn cancel_before_run_short_circuits_the_job() {
    let mut reg = MethodRegistry::new();
    reg.register("t.never", OutputSpec::None, |_, _, _| {
        panic!("handler must not run for a cancelled task");
    });
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let job = route_line(r#"{"id":"queued-1","method":"t.never"}"#, &ctx, &tx).unwrap();
    ctx.tracker.request_cancel("queued-1");
    execute_job(job, &ctx, &tx).await;

    let responses = drain(&mut rx);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["error"]["code"], -32001);
    assert_eq!(responses[0]["error"]["message"], "Task cancelled");
    assert!(!ctx.tracker.is_cancelled("queued-1"), "flag cleared at terminal state");
}

#[tokio::test]
async fn cancel_after_completion_leaves_no_tracking_behind() {
    let mut reg = MethodRegistry::new();
    reg.register("t.noop", OutputSpec::None, |_, _, _| Ok(json!({})));
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let job = route_line(r#"{"id":"done-1","method":"t.noop"}"#, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    // Cancelling the finished task still reports success, but it is not
    // active work and must not show up in the status count.
    let _ = route_line(
        r#"{"id":9,"method":"task.cancel","params":{"taskId":"done-1"}}"#,
        &ctx,
        &tx,
    );
    assert_eq!(ctx.tracker.active_count(), 0);

    // The stale flag disappears once the next job reaches a terminal state.
    let job = route_line(r#"{"id":"done-2","method":"t.noop"}"#, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;
    assert!(!ctx.tracker.is_cancelled("done-1"));

    assert_eq!(drain(&mut rx).len(), 3, "two results plus the cancel ack");
}

#[tokio::test]
async fn cancellation_observed_at_progress_unwinds_and_cleans() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("long-run.gif");

    // The handler simulates a cancel arriving between two progress reports,
    // the way the reader loop delivers one mid-flight.
    let mut reg = MethodRegistry::new();
    reg.register(
        "t.longrun",
        OutputSpec::File("outputPath"),
        |ctx: &AppContext, params, progress| {
            std::fs::write(params["outputPath"].as_str().unwrap(), b"frame1").unwrap();
            progress.emit(10.0, "working")?;
            ctx.tracker.request_cancel(progress.task_id());
            progress.emit(20.0, "working")?;
            unreachable!("the second emit must observe the cancellation");
        },
    );
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let line = json!({
        "id": "cancel-mid",
        "method": "t.longrun",
        "params": { "outputPath": out.to_string_lossy() }
    })
    .to_string();
    let job = route_line(&line, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    assert!(!out.exists(), "cancelled task leaves no artifacts behind");

    let lines = drain(&mut rx);
    // One forwarded progress report, then exactly one terminal error.
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["type"], "progress");
    assert_eq!(lines[0]["progress"], 10.0);
    assert_eq!(lines[1]["error"]["code"], -32001);
}

#[tokio::test]
async fn progress_lines_precede_the_terminal_response() {
    let mut reg = MethodRegistry::new();
    reg.register("t.chatty", OutputSpec::None, |_, _, progress| {
        progress.emit(25.0, "quarter")?;
        progress.emit(50.0, "half")?;
        Ok(json!({ "ok": true }))
    });
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let job = route_line(r#"{"id":"p1","method":"t.chatty"}"#, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    let lines = drain(&mut rx);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["type"], "progress");
    assert_eq!(lines[0]["taskId"], "p1");
    assert_eq!(lines[1]["progress"], 50.0);
    assert_eq!(lines[2]["result"]["ok"], true);
}

#[tokio::test]
async fn extra_outputs_declared_mid_run_are_cleaned_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let declared = dir.path().join("out");
    std::fs::create_dir_all(&declared).unwrap();
    let extra = dir.path().join("page_2.png");

    let mut reg = MethodRegistry::new();
    reg.register(
        "t.multi",
        OutputSpec::Dir("outputDir"),
        move |_, params, progress| {
            let extra = Path::new(params["extra"].as_str().unwrap()).to_path_buf();
            std::fs::write(&extra, b"page").unwrap();
            progress.add_output(&extra);
            Err(HandlerError::Other(anyhow::anyhow!("render failed")))
        },
    );
    let ctx = ctx_with(reg);
    let (tx, mut rx) = unbounded_channel();

    let line = json!({
        "id": "multi-1",
        "method": "t.multi",
        "params": {
            "outputDir": declared.to_string_lossy(),
            "extra": extra.to_string_lossy(),
        }
    })
    .to_string();
    let job = route_line(&line, &ctx, &tx).unwrap();
    execute_job(job, &ctx, &tx).await;

    assert!(!declared.exists(), "declared directory is removed recursively");
    assert!(!extra.exists(), "mid-run outputs are removed too");
    assert_eq!(drain(&mut rx).last().unwrap()["error"]["code"], -32000);
}

#[test]
fn arc_cloned_tracker_sees_cancels_across_threads() {
    let ctx = ctx_with(MethodRegistry::new());
    let tracker = Arc::clone(&ctx.tracker);

    let handle = std::thread::spawn(move || {
        tracker.request_cancel("threaded");
    });
    handle.join().unwrap();

    assert!(ctx.tracker.is_cancelled("threaded"));
}
